//! In-process stand-in for the HBM module
//!
//! A [`LoopbackSender`] replaces the serial codec: every outbound packet is
//! put on a channel, and a [`SimulatedHbm`] thread on the other end plays
//! the remote. It keeps a playback buffer that drains at a fixed rate,
//! answers remaining-length queries from it, and records what the device
//! sent. Packets the HBM originates are delivered with
//! [`ChannelRouter::receive_packet`], exactly like a real codec would.

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::error::TransportError;
use crate::protocol::{AudioLenAck, ChallengePackAck, Command};
use crate::router::{Admission, ChannelRouter};
use crate::transport::{PacketSender, SendAttributes};

/// Packet travelling from the device to the simulated HBM
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: u32,
    pub payload: Vec<u8>,
    pub reliable: bool,
}

/// Codec replacement that forwards packets over a channel
pub struct LoopbackSender {
    tx: Sender<Frame>,
}

impl PacketSender for LoopbackSender {
    fn send_packet(
        &self,
        command: u32,
        payload: &[u8],
        attrs: SendAttributes,
    ) -> Result<(), TransportError> {
        self.tx
            .send(Frame {
                command,
                payload: payload.to_vec(),
                reliable: attrs.reliable,
            })
            .map_err(|_| TransportError::Disconnected)
    }
}

/// Create a connected sender / frame receiver pair
pub fn loopback() -> (LoopbackSender, Receiver<Frame>) {
    let (tx, rx) = unbounded();
    (LoopbackSender { tx }, rx)
}

/// Behaviour of the simulated HBM
#[derive(Debug, Clone)]
pub struct HbmConfig {
    /// Playback buffer size in bytes
    pub buffer_capacity: usize,
    /// Bytes played out of the buffer per tick
    pub drain_per_tick: usize,
    pub tick: Duration,
    /// Whether remaining-length queries get an answer
    pub answer_queries: bool,
}

impl Default for HbmConfig {
    fn default() -> Self {
        Self {
            // 16 kHz, 16 bit mono: 32 bytes per ms
            buffer_capacity: 8 * 1024,
            drain_per_tick: 320,
            tick: Duration::from_millis(10),
            answer_queries: true,
        }
    }
}

/// What the simulated HBM has observed
#[derive(Default)]
pub struct HbmStats {
    queries: AtomicUsize,
    audio_bytes: AtomicUsize,
    chunks: Mutex<Vec<usize>>,
    challenge_acks: Mutex<Vec<ChallengePackAck>>,
    other: Mutex<Vec<Frame>>,
}

impl HbmStats {
    /// Remaining-length queries received
    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::Relaxed)
    }

    /// Total PCM bytes received
    pub fn audio_bytes(&self) -> usize {
        self.audio_bytes.load(Ordering::Relaxed)
    }

    /// Sizes of the PCM chunks in arrival order
    pub fn chunks(&self) -> Vec<usize> {
        self.chunks.lock().clone()
    }

    pub fn challenge_acks(&self) -> Vec<ChallengePackAck> {
        self.challenge_acks.lock().clone()
    }

    /// Every other frame the device sent
    pub fn other_frames(&self) -> Vec<Frame> {
        self.other.lock().clone()
    }
}

struct HbmState {
    config: HbmConfig,
    buffered: usize,
    answer_queries: Arc<AtomicBool>,
    stats: Arc<HbmStats>,
    router: Weak<ChannelRouter>,
}

impl HbmState {
    fn handle_frame(&mut self, frame: Frame) {
        match Command::from_code(frame.command) {
            Some(Command::AudioSourceRemainLen) => {
                self.stats.queries.fetch_add(1, Ordering::Relaxed);
                if self.answer_queries.load(Ordering::Acquire) {
                    let free = self.config.buffer_capacity.saturating_sub(self.buffered);
                    let ack = AudioLenAck {
                        remain_bytes: u32::try_from(free).unwrap_or(u32::MAX),
                    };
                    self.deliver(Command::AudioSourceRemainLenAck.code(), &ack.encode());
                }
            }
            Some(Command::AudioSource) => {
                let len = frame.payload.len();
                if self.buffered + len > self.config.buffer_capacity {
                    tracing::warn!(
                        "HBM buffer overrun: {} buffered, {} pushed, capacity {}",
                        self.buffered,
                        len,
                        self.config.buffer_capacity
                    );
                }
                self.buffered = (self.buffered + len).min(self.config.buffer_capacity);
                self.stats.audio_bytes.fetch_add(len, Ordering::Relaxed);
                self.stats.chunks.lock().push(len);
            }
            Some(Command::ChallengePackAck) => match ChallengePackAck::decode(&frame.payload) {
                Ok(ack) => self.stats.challenge_acks.lock().push(ack),
                Err(e) => tracing::warn!("HBM got a bad challenge ack: {}", e),
            },
            _ => self.stats.other.lock().push(frame),
        }
    }

    fn deliver(&self, command: u32, payload: &[u8]) {
        if let Some(router) = self.router.upgrade() {
            router.receive_packet(command, payload);
        }
    }

    fn tick(&mut self) {
        self.buffered = self.buffered.saturating_sub(self.config.drain_per_tick);
    }

    fn run(mut self, rx: Receiver<Frame>) {
        let tick = self.config.tick.max(Duration::from_millis(1));
        let mut next_tick = Instant::now() + tick;
        loop {
            let wait = next_tick.saturating_duration_since(Instant::now());
            match rx.recv_timeout(wait) {
                Ok(frame) => self.handle_frame(frame),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
            while Instant::now() >= next_tick {
                self.tick();
                next_tick += tick;
            }
        }
        tracing::debug!("Simulated HBM stopped");
    }
}

/// Handle to a running simulated HBM thread
///
/// The thread ends once the router, and with it the loopback sender, is
/// dropped.
pub struct SimulatedHbm {
    router: Weak<ChannelRouter>,
    answer_queries: Arc<AtomicBool>,
    stats: Arc<HbmStats>,
    thread: Option<JoinHandle<()>>,
}

impl SimulatedHbm {
    /// Start serving the frames that `router` sends through the loopback
    pub fn spawn(
        rx: Receiver<Frame>,
        router: &Arc<ChannelRouter>,
        config: HbmConfig,
    ) -> Result<Self, TransportError> {
        let answer_queries = Arc::new(AtomicBool::new(config.answer_queries));
        let stats = Arc::new(HbmStats::default());
        let state = HbmState {
            config,
            buffered: 0,
            answer_queries: answer_queries.clone(),
            stats: stats.clone(),
            router: Arc::downgrade(router),
        };

        let thread = thread::Builder::new()
            .name("hbm-sim".into())
            .spawn(move || state.run(rx))
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;

        Ok(Self {
            router: Arc::downgrade(router),
            answer_queries,
            stats,
            thread: Some(thread),
        })
    }

    /// Send a packet from the HBM to the device
    pub fn send(&self, command: Command, payload: &[u8]) -> Admission {
        match self.router.upgrade() {
            Some(router) => router.receive_packet(command.code(), payload),
            None => Admission::Rejected,
        }
    }

    /// Stop or resume answering remaining-length queries
    pub fn set_answer_queries(&self, answer: bool) {
        self.answer_queries.store(answer, Ordering::Release);
    }

    pub fn stats(&self) -> &HbmStats {
        &self.stats
    }

    /// Wait for the simulator thread to finish and hand back its stats
    ///
    /// Only returns once the router has been dropped.
    pub fn join(mut self) -> Arc<HbmStats> {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("Simulated HBM thread panicked");
            }
        }
        self.stats.clone()
    }
}
