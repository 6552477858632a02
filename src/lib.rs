//! enginelink - editor-side link to a running game engine.
//!
//! The engine exposes named plugins over one loopback connection. This
//! crate keeps that connection alive and runs editor services against it.
//!
//! # Architecture
//!
//! - **Blob** - ordered typed message buffer, the wire contract
//! - **Transport** - framed byte link plus per-plugin inbound routing
//! - **ConnectionManager** - shared connection, reconnects, plugin registry
//! - **PluginService** - background loop per plugin: connect, dispatch, send
//! - **Services** - scene-graph sync and property editing
//!
//! ```text
//! UI ──enqueue──► CommandQueue ──► PluginService worker ──► ConnectionManager ──► Transport ──► engine
//! UI ◄─EventBus── ServiceHooks ◄──────── inbound dispatch ◄──────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`blob`] - message buffer
//! - [`transport`] - TCP and in-memory transports
//! - [`connection`] - connection manager
//! - [`service`] - plugin service runtime
//! - [`services`] - scene sync and property editing
//! - [`config`] - configuration loading

pub mod blob;
pub mod config;
pub mod connection;
pub mod constants;
pub mod error;
pub mod events;
pub mod service;
pub mod services;
pub mod settings;
pub mod transport;

pub use blob::Blob;
pub use config::Config;
pub use connection::ConnectionManager;
pub use error::{BlobError, EngineError, TransportFault};
pub use events::EventBus;
pub use service::{ConnectionStatus, PluginService, ServiceHooks, StartOutcome};
pub use services::{PropertyEditService, PropertyEvent, SceneEvent, SceneSyncService};
pub use settings::ConnectionSettings;
