//! Contract with the packet codec
//!
//! The codec owns framing, checksums and retransmission. The router only
//! needs a way to hand it a command plus payload, and the codec delivers
//! decoded packets by calling [`ChannelRouter::receive_packet`].
//!
//! [`ChannelRouter::receive_packet`]: crate::router::ChannelRouter::receive_packet

use std::sync::Arc;

use crate::error::TransportError;

/// Per-packet send options understood by the codec
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SendAttributes {
    /// Wait for the remote ACK and retransmit on loss
    pub reliable: bool,
}

impl SendAttributes {
    pub const RELIABLE: Self = Self { reliable: true };
    pub const UNRELIABLE: Self = Self { reliable: false };
}

/// Outbound half of the packet codec
pub trait PacketSender: Send + Sync {
    /// Assemble and transmit one packet
    fn send_packet(
        &self,
        command: u32,
        payload: &[u8],
        attrs: SendAttributes,
    ) -> Result<(), TransportError>;
}

impl<S: PacketSender + ?Sized> PacketSender for Arc<S> {
    fn send_packet(
        &self,
        command: u32,
        payload: &[u8],
        attrs: SendAttributes,
    ) -> Result<(), TransportError> {
        (**self).send_packet(command, payload, attrs)
    }
}
