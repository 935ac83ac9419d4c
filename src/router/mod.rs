//! Channel router
//!
//! Owns three independent event queues and decides which one every inbound
//! packet goes to:
//!
//! - **device**: commands above [`DEVICE_BASE`](crate::protocol::DEVICE_BASE),
//!   handed to the application
//! - **non-blocking**: init, challenge pack and reboot request, so the
//!   handshake is never stuck behind audio traffic
//! - **main**: everything else (RASR control, ADPCM feed, audio acks)
//!
//! Every packet is queued at [`Priority::Highest`] of its queue; the tiers
//! only provide the worker's scheduling, not ordering between queues.

mod admission;
mod audio;

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::buffer::{create_shared_pool, PacketBuffer, PoolStats, SharedBufferPool};
use crate::config::ChannelConfig;
use crate::error::{ChannelError, Result};
use crate::event_queue::{EventQueue, Priority};
use crate::platform::{HostPlatform, Platform};
use crate::protocol::{
    is_device_scoped, ChallengePackAck, ChannelEvent, Command, NetConfigureStatus, RasrResult,
};
use crate::transport::{PacketSender, SendAttributes};

use admission::AdmissionControl;
use audio::{AudioStreamer, FlowControl};

/// Sink for commands addressed to the IoT application
///
/// Runs on the device queue's worker thread.
pub trait DeviceCommandHandler: Send + Sync {
    fn on_device_command(&self, command: u32, payload: &[u8]);
}

impl<F> DeviceCommandHandler for F
where
    F: Fn(u32, &[u8]) + Send + Sync,
{
    fn on_device_command(&self, command: u32, payload: &[u8]) {
        self(command, payload)
    }
}

/// Packet copied out of the codec and owned by the router until handled
#[derive(Debug)]
pub struct Packet {
    pub command: u32,
    pub payload: PacketBuffer,
}

/// The three router queues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueKind {
    Main,
    NonBlocking,
    Device,
}

impl QueueKind {
    pub fn classify(command: u32) -> Self {
        if is_device_scoped(command) {
            QueueKind::Device
        } else if Command::from_code(command).is_some_and(Command::is_non_blocking) {
            QueueKind::NonBlocking
        } else {
            QueueKind::Main
        }
    }
}

/// What `receive_packet` did with a packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Queued(QueueKind),
    /// ADPCM in-flight bound reached
    MemoryBound,
    /// RASR start/stop already outstanding
    Duplicate,
    /// Out of memory or router shut down
    Rejected,
}

impl Admission {
    pub fn is_queued(self) -> bool {
        matches!(self, Admission::Queued(_))
    }
}

/// State shared between the router handle and its worker threads
pub(crate) struct RouterCore {
    config: ChannelConfig,
    sender: Box<dyn PacketSender>,
    device: Box<dyn DeviceCommandHandler>,
    platform: Box<dyn Platform>,
    admission: AdmissionControl,
    flow: FlowControl,
    /// Next challenge pack ack sequence number
    challenge_sequence: Mutex<u32>,
    initialized: AtomicBool,
}

impl RouterCore {
    fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Reliable send that refuses to run before init or after shutdown
    fn push(&self, command: u32, payload: &[u8]) -> Result<()> {
        if !self.is_initialized() {
            tracing::error!("Module not init");
            return Err(ChannelError::NotInitialized.into());
        }
        self.sender
            .send_packet(command, payload, SendAttributes::RELIABLE)
            .map_err(|e| {
                tracing::warn!("Transmit failed, cmd={}: {}", command, e);
                e.into()
            })
    }

    /// Worker entry point for all three queues
    fn dispatch(&self, packet: Packet) {
        if is_device_scoped(packet.command) {
            match Command::from_code(packet.command) {
                Some(command) => tracing::debug!("Forwarding {} to device", command),
                None => tracing::debug!("Forwarding cmd={} to device", packet.command),
            }
            self.device.on_device_command(packet.command, &packet.payload);
            return;
        }

        let Some(command) = Command::from_code(packet.command) else {
            tracing::info!("Unhandled event, cmd={}", packet.command);
            return;
        };

        let event = match ChannelEvent::decode(command, &packet.payload) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!("Dropping malformed {}: {}", command, e);
                if command == Command::AudioSourceRemainLenAck {
                    // Let the streamer re-query instead of waiting out the timeout
                    self.flow.on_ack(0);
                }
                return;
            }
        };

        match event {
            ChannelEvent::Init(param) => {
                tracing::info!("Recv iot init event, appkey={}", param.appkey);
            }
            ChannelEvent::RasrStart { vui_session_id } => {
                self.admission.release(command.code());
                tracing::info!("Recv iot rasr start, vui_session_id={:?}", vui_session_id);
            }
            ChannelEvent::RasrStop => {
                self.admission.release(command.code());
                tracing::info!("Recv iot rasr stop");
            }
            ChannelEvent::RasrFeed(adpcm) => {
                self.admission.release(command.code());
                tracing::debug!(
                    "Recv adpcm data, {} bytes, cache[{}]",
                    adpcm.len(),
                    self.admission.adpcm_in_flight()
                );
            }
            ChannelEvent::RebootRequest => {
                tracing::error!("Recv daemon reboot cmd");
                self.platform.reboot();
            }
            ChannelEvent::ChallengePack => self.answer_challenge_pack(),
            ChannelEvent::AudioLenAck(ack) => {
                tracing::debug!("Audio len={}", ack.remain_bytes);
                self.flow.on_ack(ack.remain_bytes);
            }
            ChannelEvent::Unhandled(command) => {
                tracing::info!("Unhandled event, cmd={}", command);
            }
        }
    }

    /// Reply with the next sequence number; it only advances once the ack is out
    fn answer_challenge_pack(&self) {
        let mut sequence = self.challenge_sequence.lock();
        let ack = ChallengePackAck {
            sequence: *sequence,
            net_connected: self.config.device.net_connected,
            version: self.config.device.version.clone(),
        };
        tracing::info!(
            "Receive challenge pack, cur_seq={}, net={}",
            ack.sequence,
            ack.net_connected
        );

        match self.sender.send_packet(
            Command::ChallengePackAck.code(),
            &ack.encode(),
            SendAttributes::RELIABLE,
        ) {
            Ok(()) => *sequence = sequence.wrapping_add(1),
            Err(e) => tracing::warn!("Challenge pack ack transmit failed: {}", e),
        }
    }
}

/// Router handle owned by the application
///
/// Dropping it shuts the router down.
pub struct ChannelRouter {
    core: Arc<RouterCore>,
    pool: SharedBufferPool,
    main: EventQueue<Packet>,
    non_blocking: EventQueue<Packet>,
    device: EventQueue<Packet>,
    streamer: AudioStreamer,
}

impl ChannelRouter {
    /// Build the queues and start routing, on the host platform
    pub fn init<S, D>(config: ChannelConfig, sender: S, device: D) -> Result<Self>
    where
        S: PacketSender + 'static,
        D: DeviceCommandHandler + 'static,
    {
        Self::init_with_platform(config, sender, device, HostPlatform)
    }

    /// Build the queues and start routing
    pub fn init_with_platform<S, D, P>(
        config: ChannelConfig,
        sender: S,
        device: D,
        platform: P,
    ) -> Result<Self>
    where
        S: PacketSender + 'static,
        D: DeviceCommandHandler + 'static,
        P: Platform + 'static,
    {
        config.validate()?;

        let limit = config.admission.adpcm_in_flight_limit;
        let pool = create_shared_pool(limit as usize, config.admission.pool_slot_len);
        let stack_size = config.queue.worker_stack_size;

        let core = Arc::new(RouterCore {
            admission: AdmissionControl::new(limit),
            config,
            sender: Box::new(sender),
            device: Box::new(device),
            platform: Box::new(platform),
            flow: FlowControl::default(),
            challenge_sequence: Mutex::new(1),
            initialized: AtomicBool::new(false),
        });

        let main = Self::create_queue("channel-main", &core, stack_size)?;
        let non_blocking = Self::create_queue("channel-nonblock", &core, stack_size)?;
        let device = Self::create_queue("channel-device", &core, stack_size)?;

        core.initialized.store(true, Ordering::Release);
        tracing::info!("Channel init success");

        Ok(Self {
            core,
            pool,
            main,
            non_blocking,
            device,
            streamer: AudioStreamer::default(),
        })
    }

    fn create_queue(
        name: &str,
        core: &Arc<RouterCore>,
        stack_size: usize,
    ) -> Result<EventQueue<Packet>> {
        let core = core.clone();
        let queue = EventQueue::create(name, move |packet: Packet| core.dispatch(packet), stack_size)?;
        Ok(queue)
    }

    fn queue(&self, kind: QueueKind) -> &EventQueue<Packet> {
        match kind {
            QueueKind::Main => &self.main,
            QueueKind::NonBlocking => &self.non_blocking,
            QueueKind::Device => &self.device,
        }
    }

    /// Accept a decoded packet from the codec
    ///
    /// Called from the codec's receive context and never blocks. The
    /// payload is copied, so the codec may reuse its buffer on return.
    /// Drops are part of normal operation and are not errors.
    pub fn receive_packet(&self, command: u32, payload: &[u8]) -> Admission {
        if let Err(dropped) = self.core.admission.admit(command) {
            tracing::trace!("Skipped cmd={}: {:?}", command, dropped);
            return dropped;
        }

        let payload = match self.pool.acquire(payload) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!("Dropping cmd={}: {}", command, e);
                self.core.admission.release(command);
                return Admission::Rejected;
            }
        };

        let kind = QueueKind::classify(command);
        match self.queue(kind).add(Packet { command, payload }, Priority::Highest) {
            Ok(()) => Admission::Queued(kind),
            Err(e) => {
                tracing::warn!("Dropping cmd={}: {}", command, e);
                self.core.admission.release(command);
                Admission::Rejected
            }
        }
    }

    /// Send an arbitrary command to the HBM
    pub fn push_command(&self, command: u32, payload: &[u8]) -> Result<()> {
        self.core.push(command, payload)
    }

    /// Report a recognition result to the HBM
    pub fn send_rasr_result(&self, result: &RasrResult) -> Result<()> {
        self.core.push(Command::RasrResult.code(), &result.encode())
    }

    /// Report the outcome of network provisioning to the HBM
    pub fn send_net_configure_status(&self, status: NetConfigureStatus) -> Result<()> {
        self.core.push(Command::NetConfigureStatus.code(), &status.encode())
    }

    /// Stream PCM to the HBM for playback, blocking until all of it is sent
    ///
    /// Chunk sizes follow the free space the HBM reports, capped at
    /// `max_chunk_len`. A 1026 byte feed into an empty HBM buffer goes out
    /// as `[512, 512, 2]`.
    pub fn feed_audio_data(&self, pcm: &[u8]) -> Result<()> {
        self.streamer.feed(&self.core, pcm)
    }

    /// Stop accepting packets and drain all queues
    ///
    /// Every packet already queued is still handled. A streamer waiting
    /// for capacity is woken and returns `NotInitialized`.
    pub fn shutdown(&self) {
        if !self.core.initialized.swap(false, Ordering::AcqRel) {
            return;
        }
        self.core.flow.close();
        self.main.shutdown();
        self.non_blocking.shutdown();
        self.device.shutdown();
        tracing::info!("Channel shut down");
    }

    pub fn is_initialized(&self) -> bool {
        self.core.is_initialized()
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.core.config
    }

    /// ADPCM feed packets admitted but not yet handled
    pub fn adpcm_in_flight(&self) -> u32 {
        self.core.admission.adpcm_in_flight()
    }

    pub fn rasr_start_pending(&self) -> bool {
        self.core.admission.rasr_start_pending()
    }

    pub fn rasr_stop_pending(&self) -> bool {
        self.core.admission.rasr_stop_pending()
    }

    /// Sequence number the next challenge pack ack will carry
    pub fn challenge_sequence(&self) -> u32 {
        *self.core.challenge_sequence.lock()
    }

    /// HBM buffer space the streamer believes is left
    pub fn cached_audio_remaining(&self) -> usize {
        self.streamer.cached_remaining()
    }

    /// Packets waiting in a queue
    pub fn pending_events(&self, kind: QueueKind) -> usize {
        self.queue(kind).len()
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }
}

impl Drop for ChannelRouter {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests;
