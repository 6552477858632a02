//! Byte-level link to the engine process.
//!
//! The rest of the crate only talks to the engine through the [`Transport`]
//! capability trait. Two implementations ship with the crate:
//!
//! ```text
//! Transport (trait)
//!     │
//!     ├── TcpTransport     non-blocking loopback socket, length-prefixed frames
//!     │
//!     └── MemoryTransport  in-process engine double driven by MemoryEngine
//! ```
//!
//! Both multiplex plugins the same way: every inbound frame starts with the
//! destination plugin name, and [`router::InboundRouter`] queues the frame for
//! the plugin registered under that exact name.

pub mod framing;
pub mod memory;
pub mod router;
pub mod tcp;

use crate::blob::Blob;
use crate::error::TransportFault;

/// Registration token for one named plugin channel.
///
/// Handles are only meaningful for the connection session that issued
/// them; the registry is cleared on every disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PluginHandle(u32);

impl PluginHandle {
    /// Wrap a raw handle id.
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    /// Raw handle id.
    pub fn id(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for PluginHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Capability interface of the raw engine link.
///
/// Implementations never block for long: `connect` is bounded by a short
/// timeout, `send` is fire-and-forget and `receive` is a non-blocking poll.
pub trait Transport: Send {
    /// Open the link. Returns whether the engine accepted the connection.
    fn connect(&mut self, host: &str, port: u16) -> bool;

    /// Close the link and forget every plugin registration.
    ///
    /// Safe to call when already disconnected.
    fn disconnect(&mut self);

    /// Whether the link is believed to be open.
    fn is_connected(&self) -> bool;

    /// Pump pending I/O.
    ///
    /// Returns `Ok(false)` when the peer went away, and
    /// `Err(TransportFault)` when the link state is corrupted.
    fn poll(&mut self) -> Result<bool, TransportFault>;

    /// Register a plugin name on the current session.
    ///
    /// Returns `None` when there is no open link.
    fn register_plugin(&mut self, name: &str) -> Option<PluginHandle>;

    /// Queue a message for the engine. `false` means "not sent".
    fn send(&mut self, blob: &Blob) -> bool;

    /// Move the next complete inbound message for `handle` into `blob`.
    ///
    /// The blob's read position is left after the plugin-name field, so the
    /// next field is the opcode. Returns `false` when nothing is pending.
    fn receive(&mut self, handle: PluginHandle, blob: &mut Blob) -> bool;
}

pub use memory::{MemoryEngine, MemoryTransport};
pub use router::InboundRouter;
pub use tcp::TcpTransport;
