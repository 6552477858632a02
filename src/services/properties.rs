//! Live property editing service (`PropertiesEditor_Plugin`).
//!
//! Both directions use one opcode, `Properties`, carrying an object ref and
//! the object's serialized properties as XML text. There is no request id:
//! a reply is whatever `Properties` message arrives next for that ref, and
//! the last one received wins.

use std::collections::HashMap;
use std::path::Path;
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Context;

use crate::blob::Blob;
use crate::config::Config;
use crate::connection::ConnectionManager;
use crate::error::Result;
use crate::events::EventBus;
use crate::service::{CommandQueue, PluginService, ServiceContext, ServiceHooks, StartOutcome};

/// Registration name of the property editor plugin.
pub const PLUGIN_NAME: &str = "PropertiesEditor_Plugin";

/// Property snapshot or update for one object.
pub const PROPERTIES: &str = "Properties";

/// Data pushed by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyEvent {
    /// New properties for `object_ref`.
    Updated {
        /// Object the properties belong to.
        object_ref: u32,
        /// Properties as received.
        xml: String,
    },
}

#[derive(Debug, Default)]
struct PropertyHooks {
    updates: CommandQueue<(u32, String)>,
    cache: Mutex<HashMap<u32, String>>,
    events: EventBus<PropertyEvent>,
}

impl ServiceHooks for PropertyHooks {
    fn handle_message(
        &self,
        opcode: &str,
        blob: &mut Blob,
        _ctx: &ServiceContext,
    ) -> anyhow::Result<()> {
        if opcode != PROPERTIES {
            log::debug!("[Properties] Ignoring unknown opcode '{opcode}'");
            return Ok(());
        }

        let object_ref: u32 = blob.take().context("object ref")?;
        let xml: String = blob.take().context("properties xml")?;
        blob.ensure_consumed()?;
        log::debug!("[Properties] #{object_ref}: {} bytes", xml.len());

        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(object_ref, xml.clone());
        self.events.emit(PropertyEvent::Updated { object_ref, xml });
        Ok(())
    }

    fn drain_queued_commands(&self, ctx: &ServiceContext) {
        for (object_ref, xml) in self.updates.drain() {
            let mut blob = ctx.message(PROPERTIES);
            blob.push(object_ref).push_str(&xml);
            ctx.send_message(&blob);
        }
    }
}

/// Property editing plugin service.
#[derive(Debug)]
pub struct PropertyEditService {
    runtime: PluginService,
    hooks: Arc<PropertyHooks>,
}

impl PropertyEditService {
    /// Create a stopped service on the shared `manager`.
    pub fn new(manager: Arc<ConnectionManager>, config: &Config) -> Self {
        let hooks = Arc::new(PropertyHooks::default());
        let shared_hooks = Arc::clone(&hooks) as Arc<dyn ServiceHooks>;
        let runtime = PluginService::new(PLUGIN_NAME, shared_hooks, manager, config);
        Self { runtime, hooks }
    }

    /// The underlying runtime.
    pub fn runtime(&self) -> &PluginService {
        &self.runtime
    }

    /// See [`PluginService::start`].
    pub fn start<I, S>(&self, args: I) -> Result<StartOutcome>
    where
        I: IntoIterator<Item = S>,
        S: Into<std::ffi::OsString> + Clone,
    {
        self.runtime.start(args)
    }

    /// See [`PluginService::stop`].
    pub fn stop(&self) {
        self.runtime.stop();
    }

    /// Whether the service is registered with a connected engine.
    pub fn is_connected(&self) -> bool {
        self.runtime.is_connected()
    }

    /// Receive property events from now on.
    pub fn subscribe(&self) -> Receiver<PropertyEvent> {
        self.hooks.events.subscribe()
    }

    /// Queue new properties for `object_ref`.
    pub fn update_properties(&self, object_ref: u32, xml: impl Into<String>) {
        self.hooks.updates.push((object_ref, xml.into()));
    }

    /// Latest properties received for `object_ref`.
    pub fn properties(&self, object_ref: u32) -> Option<String> {
        self.hooks
            .cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&object_ref)
            .cloned()
    }

    /// Write the latest properties of `object_ref` to `path`, byte for byte
    /// as received.
    pub fn dump_properties(&self, object_ref: u32, path: &Path) -> anyhow::Result<()> {
        let xml = self
            .properties(object_ref)
            .with_context(|| format!("no properties received for object #{object_ref}"))?;
        std::fs::write(path, xml)
            .with_context(|| format!("write properties to {}", path.display()))?;
        log::info!("[Properties] Dumped #{object_ref} to {}", path.display());
        Ok(())
    }
}
