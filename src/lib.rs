//! # HBM Channel
//!
//! Communication middleware between IoT device application logic and the
//! HBM voice module on the other end of a serial link.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                               IoT DEVICE                                     │
//! │                                                                              │
//! │   UART driver ──► packet codec (framing, checksum, retransmission)           │
//! │                          │ receive_packet()          ▲ send_packet()         │
//! │                          ▼ (non-blockable)           │                       │
//! │  ┌────────────────────────────────────────────────────┴──────────────────┐  │
//! │  │                     ChannelRouter (router)                             │  │
//! │  │   admission: ADPCM in-flight bound (16) + RASR start/stop dedup        │  │
//! │  │   copy into pooled buffer ──► classify                                 │  │
//! │  │        │                       │                       │               │  │
//! │  │        ▼                       ▼                       ▼               │  │
//! │  │  ┌────────────┐         ┌────────────┐          ┌────────────┐         │  │
//! │  │  │ main queue │         │ non-block  │          │  device    │         │  │
//! │  │  │ EventQueue │         │ EventQueue │          │ EventQueue │         │  │
//! │  │  │  (worker)  │         │  (worker)  │          │  (worker)  │         │  │
//! │  │  └─────┬──────┘         └─────┬──────┘          └─────┬──────┘         │  │
//! │  │        └──────────────┬───────┘                       │                │  │
//! │  │                       ▼                               ▼                │  │
//! │  │            internal handlers                DeviceCommandHandler       │  │
//! │  │   (challenge ack, reboot, audio-len ack)      (application code)       │  │
//! │  │                       │ signal                                         │  │
//! │  │                       ▼                                                │  │
//! │  │   AudioStreamer: query remaining ──► wait ──► push ≤512 byte chunks    │  │
//! │  └────────────────────────────────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod buffer;
pub mod config;
pub mod error;
pub mod event_queue;
pub mod platform;
pub mod protocol;
pub mod router;
pub mod simulator;
pub mod transport;

pub use error::{Error, Result};
pub use event_queue::{EventHandler, EventQueue, Priority};
pub use router::{Admission, ChannelRouter, DeviceCommandHandler, QueueKind};
pub use transport::{PacketSender, SendAttributes};

/// Application-wide constants
pub mod constants {
    /// Maximum number of ADPCM feed packets buffered at once
    pub const ADPCM_IN_FLIGHT_LIMIT: u32 = 16;

    /// Size of one ADPCM feed payload in bytes
    pub const ADPCM_PACKET_LEN: usize = 128;

    /// Largest PCM chunk pushed to the HBM in one packet
    pub const AUDIO_CHUNK_MAX: usize = 512;

    /// How long to wait for an audio remaining-length ack
    pub const FLOW_CONTROL_TIMEOUT_MS: u64 = 5000;

    /// Pause before every remaining-length query after the first one of a feed
    pub const FLOW_CONTROL_POLL_MS: u64 = 50;

    /// Stack size hint for queue worker threads
    pub const WORKER_STACK_SIZE: usize = 64 * 1024;

    /// Version reported in the challenge pack ack
    pub const DEVICE_VERSION: &str = "v4.1.0";

    /// Width of the version field in the challenge pack ack
    pub const VERSION_FIELD_LEN: usize = 28;
}

#[cfg(test)]
pub(crate) mod test_support;
