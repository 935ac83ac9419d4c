//! Wire-stable command namespace shared with the HBM firmware

use std::fmt;

use crate::error::ProtocolError;

/// First command of the channel range
pub const CHANNEL_BASE: u32 = 100;

/// Commands above this value are delivered to the IoT application
pub const DEVICE_BASE: u32 = 1000;

/// Every command the channel knows about
///
/// The discriminants are the values on the wire and must never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Command {
    IotInit = CHANNEL_BASE,
    RasrStart = 101,
    RasrStop = 102,
    RasrDataFeed = 103,
    RasrResult = 104,
    SetParam = 105,
    NetConfigureStatus = 106,
    DaemonRebootRequest = 107,
    ChallengePack = 108,
    ChallengePackAck = 109,
    HbmStateCtrl = 110,
    HbmActionPlay = 111,
    HbmPlayAudio = 112,
    HbmPlayBuzzer = 113,
    HbmReboot = 114,

    AudioSource = 115,
    AudioSourceRemainLen = 116,
    AudioSourceRemainLenAck = 117,

    HbmIotAsrResult = DEVICE_BASE + 1,
    NetConfigure = 1002,
    NetConfigureStop = 1003,
}

impl Command {
    /// All known commands, in wire order
    pub const ALL: [Command; 21] = [
        Command::IotInit,
        Command::RasrStart,
        Command::RasrStop,
        Command::RasrDataFeed,
        Command::RasrResult,
        Command::SetParam,
        Command::NetConfigureStatus,
        Command::DaemonRebootRequest,
        Command::ChallengePack,
        Command::ChallengePackAck,
        Command::HbmStateCtrl,
        Command::HbmActionPlay,
        Command::HbmPlayAudio,
        Command::HbmPlayBuzzer,
        Command::HbmReboot,
        Command::AudioSource,
        Command::AudioSourceRemainLen,
        Command::AudioSourceRemainLenAck,
        Command::HbmIotAsrResult,
        Command::NetConfigure,
        Command::NetConfigureStop,
    ];

    /// Value on the wire
    pub const fn code(self) -> u32 {
        self as u32
    }

    pub fn from_code(code: u32) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| c.code() == code)
    }

    /// Short administrative commands that get their own queue
    pub fn is_non_blocking(self) -> bool {
        matches!(
            self,
            Command::IotInit | Command::ChallengePack | Command::DaemonRebootRequest
        )
    }

    pub fn is_device_scoped(self) -> bool {
        is_device_scoped(self.code())
    }

    pub fn name(self) -> &'static str {
        match self {
            Command::IotInit => "iot-init",
            Command::RasrStart => "rasr-start",
            Command::RasrStop => "rasr-stop",
            Command::RasrDataFeed => "rasr-feed-adpcm",
            Command::RasrResult => "rasr-result",
            Command::SetParam => "set-param",
            Command::NetConfigureStatus => "net-configure-status",
            Command::DaemonRebootRequest => "daemon-reboot-request",
            Command::ChallengePack => "challenge-pack",
            Command::ChallengePackAck => "challenge-pack-ack",
            Command::HbmStateCtrl => "hbm-state-ctrl",
            Command::HbmActionPlay => "hbm-action-play",
            Command::HbmPlayAudio => "hbm-play-audio",
            Command::HbmPlayBuzzer => "hbm-play-buzzer",
            Command::HbmReboot => "hbm-reboot",
            Command::AudioSource => "audio-source",
            Command::AudioSourceRemainLen => "audio-source-remain-len",
            Command::AudioSourceRemainLenAck => "audio-source-remain-len-ack",
            Command::HbmIotAsrResult => "hbm-iot-asr-result",
            Command::NetConfigure => "net-configure",
            Command::NetConfigureStop => "net-configure-stop",
        }
    }
}

/// Whether a raw command value belongs to the IoT application
pub fn is_device_scoped(code: u32) -> bool {
    code > DEVICE_BASE
}

impl TryFrom<u32> for Command {
    type Error = ProtocolError;

    fn try_from(code: u32) -> Result<Self, Self::Error> {
        Self::from_code(code).ok_or(ProtocolError::UnknownCommand(code))
    }
}

impl From<Command> for u32 {
    fn from(command: Command) -> u32 {
        command.code()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), self.code())
    }
}
