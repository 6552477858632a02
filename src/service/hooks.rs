//! Extension points a concrete plugin service plugs into the runtime.

use std::sync::Arc;

use crate::blob::Blob;
use crate::connection::ConnectionManager;

/// Per-service view of the shared connection, handed to every hook.
#[derive(Debug, Clone)]
pub struct ServiceContext {
    plugin_name: String,
    manager: Arc<ConnectionManager>,
}

impl ServiceContext {
    pub(crate) fn new(plugin_name: impl Into<String>, manager: Arc<ConnectionManager>) -> Self {
        Self {
            plugin_name: plugin_name.into(),
            manager,
        }
    }

    /// Name this service registers under.
    pub fn plugin_name(&self) -> &str {
        &self.plugin_name
    }

    /// The shared connection manager.
    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    /// Empty outbound message addressed from this plugin: the plugin name
    /// followed by `opcode`. Callers push the payload fields.
    pub fn message(&self, opcode: &str) -> Blob {
        Blob::message(&self.plugin_name, opcode)
    }

    /// Send a message built with [`message`](Self::message).
    ///
    /// Failures are logged and dropped, never retried.
    pub fn send_message(&self, blob: &Blob) -> bool {
        let sent = self.manager.send(blob);
        if !sent {
            log::debug!(
                "[Service:{}] Dropped outbound message ({} bytes): engine not reachable",
                self.plugin_name,
                blob.len()
            );
        }
        sent
    }
}

/// Behaviour of one plugin service.
///
/// Only [`handle_message`](Self::handle_message) is required. Hooks run on
/// the service worker thread, except `on_service_initializing` and
/// `on_service_stopping`, which run on the thread calling `start`/`stop`.
pub trait ServiceHooks: Send + Sync {
    /// Process one inbound message. `blob` is positioned just after the
    /// opcode.
    ///
    /// An error is logged and the next message is still processed.
    fn handle_message(
        &self,
        opcode: &str,
        blob: &mut Blob,
        ctx: &ServiceContext,
    ) -> anyhow::Result<()>;

    /// Called after each successful registration with the engine.
    fn on_plugin_registered(&self, _ctx: &ServiceContext) {}

    /// Called once per connected session, after the first inbound drain.
    fn on_first_time_connected(&self, _ctx: &ServiceContext) {}

    /// Called from every `start`, including redundant ones.
    fn on_service_initializing(&self) {}

    /// Called at the end of `stop`.
    fn on_service_stopping(&self) {}

    /// Send pending UI commands. Called every connected tick.
    fn drain_queued_commands(&self, _ctx: &ServiceContext) {}
}
