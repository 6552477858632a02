//! In-process engine double.
//!
//! [`MemoryEngine`] plays the engine side of the link: it can be switched
//! online and offline, refuse connection attempts, queue inbound messages and
//! inject a fatal fault. [`MemoryTransport`] is the client side handed to the
//! connection manager. Both share one mutex-guarded state, so a test (or an
//! embedder without a socket) keeps a `MemoryEngine` clone and observes
//! everything the services send.
//!
//! # Usage
//!
//! ```ignore
//! let engine = MemoryEngine::new();
//! let manager = ConnectionManager::new(engine.factory());
//! engine.set_online(true);
//! engine.push_inbound(scene_tree_message);
//! ```

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::blob::Blob;
use crate::connection::TransportFactory;
use crate::error::TransportFault;
use crate::settings::ConnectionSettings;

use super::router::InboundRouter;
use super::{PluginHandle, Transport};

#[derive(Debug, Default)]
struct EngineState {
    online: bool,
    /// Bumped whenever the engine goes offline so open links die.
    session: u64,
    refuse_connects: u32,
    connect_attempts: u32,
    successful_connects: u32,
    probes: u32,
    registrations: Vec<String>,
    sent: Vec<Blob>,
    inbound: VecDeque<Vec<u8>>,
    pending_fault: Option<String>,
}

/// Engine side of the in-memory link.
#[derive(Debug, Clone, Default)]
pub struct MemoryEngine {
    state: Arc<Mutex<EngineState>>,
}

impl MemoryEngine {
    /// Create an offline engine.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Client-side transport bound to this engine.
    pub fn transport(&self) -> MemoryTransport {
        MemoryTransport {
            engine: self.clone(),
            session: None,
            router: InboundRouter::new(),
        }
    }

    /// Transport factory for [`ConnectionManager`](crate::connection::ConnectionManager).
    pub fn factory(&self) -> TransportFactory {
        let engine = self.clone();
        Box::new(move |_settings: &ConnectionSettings| {
            Ok(Box::new(engine.transport()) as Box<dyn Transport>)
        })
    }

    /// Bring the engine up or down. Going down kills every open link.
    pub fn set_online(&self, online: bool) {
        let mut state = self.state();
        if state.online && !online {
            state.session += 1;
            state.inbound.clear();
        }
        state.online = online;
    }

    /// Whether the engine accepts connections.
    pub fn is_online(&self) -> bool {
        self.state().online
    }

    /// Make the next `count` connection attempts fail even while online.
    pub fn refuse_next_connects(&self, count: u32) {
        self.state().refuse_connects = count;
    }

    /// Queue a message for delivery on the client's next poll.
    ///
    /// The blob must start with the destination plugin name.
    pub fn push_inbound(&self, blob: &Blob) {
        self.state().inbound.push_back(blob.as_bytes().to_vec());
    }

    /// Queue raw payload bytes, bypassing blob encoding.
    pub fn push_inbound_raw(&self, payload: Vec<u8>) {
        self.state().inbound.push_back(payload);
    }

    /// Make the client's next poll report a fatal transport fault.
    pub fn inject_fault(&self, reason: &str) {
        self.state().pending_fault = Some(reason.to_owned());
    }

    /// Total connection attempts, successful or not.
    pub fn connect_attempts(&self) -> u32 {
        self.state().connect_attempts
    }

    /// Connection attempts the engine accepted.
    pub fn successful_connects(&self) -> u32 {
        self.state().successful_connects
    }

    /// Zero-payload liveness probes received.
    pub fn probe_count(&self) -> u32 {
        self.state().probes
    }

    /// Every plugin registration, in order.
    pub fn registrations(&self) -> Vec<String> {
        self.state().registrations.clone()
    }

    /// Every non-empty message received from the client, in order.
    pub fn sent(&self) -> Vec<Blob> {
        self.state().sent.clone()
    }

    /// Drain and return the received messages.
    pub fn take_sent(&self) -> Vec<Blob> {
        std::mem::take(&mut self.state().sent)
    }

    /// Opcodes received from `plugin`, in order.
    ///
    /// Registration announcements (`"PluginId", name`) are reported as
    /// `"PluginId"` for the plugin they name.
    pub fn sent_opcodes(&self, plugin: &str) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|mut blob| {
                let first = blob.take::<String>().ok()?;
                let second = blob.take::<String>().ok()?;
                if first == crate::constants::PLUGIN_ID_OPCODE && second == plugin {
                    Some(first)
                } else if first == plugin {
                    Some(second)
                } else {
                    None
                }
            })
            .collect()
    }
}

/// Client side of the in-memory link.
#[derive(Debug)]
pub struct MemoryTransport {
    engine: MemoryEngine,
    session: Option<u64>,
    router: InboundRouter,
}

impl MemoryTransport {
    fn alive(&self) -> bool {
        let state = self.engine.state();
        state.online && self.session == Some(state.session)
    }

    fn drop_link(&mut self) {
        self.session = None;
        self.router.clear();
    }
}

impl Transport for MemoryTransport {
    fn connect(&mut self, _host: &str, _port: u16) -> bool {
        self.drop_link();
        let mut state = self.engine.state();
        state.connect_attempts += 1;
        if !state.online {
            return false;
        }
        if state.refuse_connects > 0 {
            state.refuse_connects -= 1;
            return false;
        }
        state.successful_connects += 1;
        self.session = Some(state.session);
        true
    }

    fn disconnect(&mut self) {
        self.drop_link();
    }

    fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    fn poll(&mut self) -> Result<bool, TransportFault> {
        if self.session.is_none() {
            return Ok(false);
        }
        if !self.alive() {
            self.drop_link();
            return Ok(false);
        }

        let (fault, inbound) = {
            let mut state = self.engine.state();
            (state.pending_fault.take(), std::mem::take(&mut state.inbound))
        };
        if let Some(reason) = fault {
            self.drop_link();
            return Err(TransportFault::Corrupted(reason));
        }
        for payload in inbound {
            self.router.route(&payload);
        }
        Ok(true)
    }

    fn register_plugin(&mut self, name: &str) -> Option<PluginHandle> {
        if !self.alive() {
            return None;
        }
        self.engine.state().registrations.push(name.to_owned());
        Some(self.router.register(name))
    }

    fn send(&mut self, blob: &Blob) -> bool {
        if !self.alive() {
            return false;
        }
        let mut state = self.engine.state();
        if blob.is_empty() {
            state.probes += 1;
        } else {
            state.sent.push(blob.clone());
        }
        true
    }

    fn receive(&mut self, handle: PluginHandle, blob: &mut Blob) -> bool {
        match self.router.pop(handle) {
            Some(message) => {
                *blob = message;
                true
            }
            None => false,
        }
    }
}
