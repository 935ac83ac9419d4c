//! Pull-based PCM streaming to the HBM
//!
//! The HBM plays PCM out of a buffer whose free space only it knows. The
//! streamer asks for that number, then pushes at most that many bytes in
//! chunks of up to 512 bytes. The question goes out as a packet and the
//! answer comes back through the router like any other inbound command, so
//! the calling thread parks on a semaphore until a worker hands the value
//! over.
//!
//! ```text
//!  caller thread                      worker thread           HBM
//!  ─────────────                      ─────────────           ───
//!  send REMAIN_LEN ──────────────────────────────────────────► │
//!  wait(sem, 5s)                                                │
//!       ┊                 receive_packet(REMAIN_LEN_ACK) ◄──────┘
//!       ┊                 store remaining, signal(sem)
//!  read remaining ◄───────┘
//!  push ≤512 byte chunks ────────────────────────────────────► │
//! ```

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use super::RouterCore;
use crate::error::{ChannelError, Result};
use crate::platform::Semaphore;
use crate::protocol::Command;
use crate::transport::SendAttributes;

/// Hand-off point between the worker that processes the ack and the
/// streaming thread waiting for it
#[derive(Default)]
pub(crate) struct FlowControl {
    ack: Semaphore,
    remote_remaining: AtomicU32,
    /// Set once on shutdown; no query goes out afterwards
    closed: AtomicBool,
}

impl FlowControl {
    /// Record the HBM's reported free space and wake one waiter
    pub(crate) fn on_ack(&self, remain_bytes: u32) {
        self.remote_remaining.store(remain_bytes, Ordering::Release);
        self.ack.signal();
    }

    /// Refuse further queries and wake a waiting streamer with zero capacity
    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.on_ack(0);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Ask the HBM how much PCM it can take
    ///
    /// A failed query or a missing answer counts as no capacity; the caller
    /// simply asks again. After `close` nothing is sent and 0 is returned.
    fn query(&self, core: &RouterCore) -> usize {
        let stale = self.ack.drain();
        if stale > 0 {
            tracing::debug!("Discarded {} stale audio length acks", stale);
        }
        // Checked after the drain: a close that lands later leaves its permit
        if self.is_closed() {
            return 0;
        }

        let query = Command::AudioSourceRemainLen.code();
        if let Err(e) = core.sender.send_packet(query, &[], SendAttributes::RELIABLE) {
            tracing::warn!("Audio remaining length query failed: {}", e);
            return 0;
        }

        let timeout = core.config.flow_control.query_timeout();
        if !self.ack.wait_timeout(timeout) {
            tracing::warn!("No audio length ack within {:?}", timeout);
            return 0;
        }
        if self.is_closed() {
            return 0;
        }

        self.remote_remaining.load(Ordering::Acquire) as usize
    }
}

/// Streams caller-supplied PCM under HBM flow control
#[derive(Default)]
pub(crate) struct AudioStreamer {
    /// Last known free space in the HBM buffer; survives between feeds
    cached_remaining: Mutex<usize>,
}

impl AudioStreamer {
    pub(crate) fn feed(&self, core: &RouterCore, pcm: &[u8]) -> Result<()> {
        if pcm.is_empty() {
            tracing::error!("Param invalid, empty pcm buffer");
            return Err(ChannelError::InvalidParam("pcm buffer is empty".into()).into());
        }
        if !core.is_initialized() {
            return Err(ChannelError::NotInitialized.into());
        }

        let flow = &core.config.flow_control;
        // Held for the whole feed so concurrent callers never interleave chunks
        let mut remaining = self.cached_remaining.lock();
        let mut first_query = true;
        let mut offset = 0;

        while offset < pcm.len() {
            if !core.is_initialized() {
                return Err(ChannelError::NotInitialized.into());
            }

            if *remaining == 0 {
                // Only the first query of a feed goes out immediately, which
                // keeps playback start fast while capping the polling rate
                if !first_query {
                    tracing::debug!("Wait {:?} before next query", flow.poll_interval());
                    core.platform.sleep(flow.poll_interval());
                }
                first_query = false;

                *remaining = core.flow.query(core);
                if *remaining == 0 {
                    continue;
                }
            }

            let chunk = (*remaining).min(pcm.len() - offset).min(flow.max_chunk_len);
            core.push(Command::AudioSource.code(), &pcm[offset..offset + chunk])?;
            offset += chunk;
            *remaining -= chunk;
        }

        tracing::debug!("Fed {} bytes of pcm, {} bytes of HBM buffer left", pcm.len(), *remaining);
        Ok(())
    }

    pub(crate) fn cached_remaining(&self) -> usize {
        *self.cached_remaining.lock()
    }
}
