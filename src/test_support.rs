//! Helpers shared by unit tests

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::error::TransportError;
use crate::transport::{PacketSender, SendAttributes};

/// Poll `cond` until it holds or `timeout` passes
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    cond()
}

/// One outbound packet as seen by the codec
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentPacket {
    pub command: u32,
    pub payload: Vec<u8>,
    pub reliable: bool,
    pub delivered: bool,
}

/// Codec double that records every send attempt
#[derive(Default)]
pub struct RecordingSender {
    sent: Mutex<Vec<SentPacket>>,
    failing: AtomicBool,
}

impl RecordingSender {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following send fail
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// All attempts, failed ones included
    pub fn attempts(&self) -> Vec<SentPacket> {
        self.sent.lock().clone()
    }

    /// Successfully delivered packets with the given command
    pub fn delivered(&self, command: u32) -> Vec<SentPacket> {
        self.sent
            .lock()
            .iter()
            .filter(|p| p.delivered && p.command == command)
            .cloned()
            .collect()
    }
}

impl PacketSender for RecordingSender {
    fn send_packet(
        &self,
        command: u32,
        payload: &[u8],
        attrs: SendAttributes,
    ) -> Result<(), TransportError> {
        let delivered = !self.failing.load(Ordering::SeqCst);
        self.sent.lock().push(SentPacket {
            command,
            payload: payload.to_vec(),
            reliable: attrs.reliable,
            delivered,
        });
        if delivered {
            Ok(())
        } else {
            Err(TransportError::SendFailed("link down".into()))
        }
    }
}
