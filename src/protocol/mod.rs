//! Channel protocol: command namespace and payload layouts

pub mod command;
pub mod message;

pub use command::{is_device_scoped, Command, CHANNEL_BASE, DEVICE_BASE};
pub use message::{
    AudioLenAck, ChallengePackAck, ChannelEvent, InitParam, NetConfigureStatus, RasrResult,
};
