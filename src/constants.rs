//! Application-wide constants for enginelink.
//!
//! This module centralizes timing values, wire limits and protocol names
//! so they are discoverable in one place. Values that users may want to
//! tune are mirrored in [`crate::config::Config`], which falls back to
//! these defaults.
//!
//! # Categories
//!
//! - **Connection**: default endpoint and connect timeout
//! - **Service loop**: tick, recovery and shutdown intervals
//! - **Wire**: frame limits and well-known opcodes

use std::time::Duration;

// ============================================================================
// Connection
// ============================================================================

/// Default engine host. The engine always listens on loopback.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default engine port when neither config nor `--port` provide one.
pub const DEFAULT_PORT: u16 = 4030;

/// Upper bound for a single TCP connect attempt.
///
/// `connect_if_needed()` runs on every tick while the engine is absent, so
/// an attempt must fail fast instead of stalling the service loop.
pub const CONNECT_TIMEOUT: Duration = Duration::from_millis(250);

// ============================================================================
// Service loop
// ============================================================================

/// Interval between two ticks of a plugin service loop.
pub const TICK_INTERVAL: Duration = Duration::from_millis(10);

/// Back-off after a tick fails with a non-fatal error.
pub const RECOVERY_INTERVAL: Duration = Duration::from_secs(1);

/// How long `stop()` waits for the worker thread to observe cancellation.
pub const STOP_GRACE_PERIOD: Duration = Duration::from_millis(500);

// ============================================================================
// Wire
// ============================================================================

/// Maximum frame payload size (16 MB).
pub const MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;

/// Unsent bytes a transport buffers before treating the peer as gone.
pub const MAX_PENDING_OUTBOUND: usize = MAX_FRAME_SIZE as usize;

/// Read chunk used when draining a socket.
pub const READ_CHUNK_SIZE: usize = 64 * 1024;

/// Opcode of the registration announcement sent after each (re)connect.
pub const PLUGIN_ID_OPCODE: &str = "PluginId";

/// Deepest scene-tree nesting accepted from the engine.
pub const MAX_TREE_DEPTH: usize = 64;
