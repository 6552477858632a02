//! Shared engine connection and plugin registry.
//!
//! Every plugin service in the process talks to the engine through one
//! [`ConnectionManager`]. It owns the transport exclusively, decides when to
//! reconnect, and caches plugin handles for the current session.
//!
//! # Reconnect policy
//!
//! ```text
//! connect_if_needed()
//!     │
//!     ├── marked connected? ──► probe (zero-payload send) ──ok──► true
//!     │                                   │
//!     │                                 failed
//!     ▼                                   ▼
//!   clear plugin registry ──► transport.connect(host, port) ──► result
//! ```
//!
//! The cached "connected" flag is never trusted on its own; it is
//! revalidated on every call. Plugin handles die with the session that
//! issued them, so a restarted engine always sees fresh registrations.
//!
//! # Locking
//!
//! One manager-wide mutex, held for the full duration of every public
//! method. Connection operations are rare compared to the tick rate.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::blob::Blob;
use crate::error::{EngineError, Result};
use crate::settings::ConnectionSettings;
use crate::transport::{PluginHandle, TcpTransport, Transport};

/// Builds the transport once settings are known.
pub type TransportFactory =
    Box<dyn Fn(&ConnectionSettings) -> anyhow::Result<Box<dyn Transport>> + Send + Sync>;

#[derive(Default)]
struct ManagerState {
    settings: Option<ConnectionSettings>,
    transport: Option<Box<dyn Transport>>,
    connected: bool,
    /// Incremented on every successful connect.
    session: u64,
    plugins: HashMap<String, PluginHandle>,
}

/// Owner of the engine transport, shared by all plugin services.
pub struct ConnectionManager {
    factory: TransportFactory,
    state: Mutex<ManagerState>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("ConnectionManager")
            .field("settings", &state.settings)
            .field("connected", &state.connected)
            .field("plugins", &state.plugins.len())
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    /// Create an uninitialized manager that will build its transport with
    /// `factory`.
    pub fn new(factory: TransportFactory) -> Self {
        Self {
            factory,
            state: Mutex::new(ManagerState::default()),
        }
    }

    /// Manager backed by [`TcpTransport`].
    pub fn tcp(connect_timeout: Duration) -> Self {
        Self::new(Box::new(move |_settings: &ConnectionSettings| {
            Ok(Box::new(TcpTransport::new(connect_timeout)) as Box<dyn Transport>)
        }))
    }

    fn state(&self) -> MutexGuard<'_, ManagerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store `settings` and construct the transport.
    ///
    /// No-op when already initialized: settings are immutable once set.
    pub fn initialize(&self, settings: ConnectionSettings) -> Result<()> {
        let mut state = self.state();
        if state.transport.is_some() {
            log::debug!("[Connection] Already initialized, ignoring new settings");
            return Ok(());
        }

        let transport = (self.factory)(&settings)
            .map_err(|e| EngineError::InitializationFailed(format!("{e:#}")))?;
        log::info!("[Connection] Initialized for engine at {}", settings.endpoint());
        state.transport = Some(transport);
        state.settings = Some(settings);
        Ok(())
    }

    /// Whether `initialize` has succeeded.
    pub fn is_initialized(&self) -> bool {
        self.state().transport.is_some()
    }

    /// Settings captured at initialization.
    pub fn settings(&self) -> Option<ConnectionSettings> {
        self.state().settings.clone()
    }

    /// Revalidate the connection, reconnecting when needed.
    ///
    /// Never fails: every problem is logged and reported as `false`.
    pub fn connect_if_needed(&self) -> bool {
        let mut guard = self.state();
        let state = &mut *guard;
        let (Some(settings), Some(transport)) = (state.settings.as_ref(), state.transport.as_mut())
        else {
            log::trace!("[Connection] connect_if_needed before initialize");
            return false;
        };

        if state.connected {
            if transport.send(&Blob::new()) {
                return true;
            }
            log::info!("[Connection] Engine at {} stopped responding", settings.endpoint());
        }

        let was_connected = state.connected;
        state.plugins.clear();
        state.connected = transport.connect(&settings.host, settings.port);

        if state.connected {
            state.session += 1;
            log::info!("[Connection] Connected to engine at {}", settings.endpoint());
        } else if was_connected {
            log::warn!("[Connection] Reconnect to {} failed", settings.endpoint());
        } else {
            log::trace!("[Connection] Engine at {} unavailable", settings.endpoint());
        }
        state.connected
    }

    /// Whether the manager currently believes the engine is connected.
    pub fn is_connected(&self) -> bool {
        self.state().connected
    }

    /// Identifier of the current connected session.
    ///
    /// Changes on every successful (re)connect, so a caller can tell that
    /// handles it registered earlier are gone even when `connect_if_needed`
    /// reported `true` both times.
    pub fn session(&self) -> u64 {
        self.state().session
    }

    /// Tear down the connection and forget every plugin handle.
    pub fn disconnect(&self) {
        let mut state = self.state();
        if let Some(transport) = state.transport.as_mut() {
            transport.disconnect();
        }
        if state.connected {
            log::info!("[Connection] Disconnected from engine");
        }
        state.connected = false;
        state.plugins.clear();
    }

    /// Pump transport I/O. Call once per tick; no-op while disconnected.
    ///
    /// A peer that went away marks the manager disconnected. Corruption is
    /// returned as [`EngineError::FatalTransport`].
    pub fn update(&self) -> Result<()> {
        let mut guard = self.state();
        let state = &mut *guard;
        if !state.connected {
            return Ok(());
        }
        let Some(transport) = state.transport.as_mut() else {
            return Ok(());
        };

        match transport.poll() {
            Ok(true) => Ok(()),
            Ok(false) => {
                log::info!("[Connection] Engine closed the connection");
                state.connected = false;
                state.plugins.clear();
                Ok(())
            }
            Err(fault) => {
                state.connected = false;
                state.plugins.clear();
                Err(fault.into())
            }
        }
    }

    /// Handle for `name`, registering it with the engine on first use in
    /// the current session.
    pub fn register_plugin(&self, name: &str) -> Result<PluginHandle> {
        let mut guard = self.state();
        let state = &mut *guard;
        let Some(transport) = state.transport.as_mut() else {
            return Err(EngineError::NotInitialized);
        };

        if let Some(handle) = state.plugins.get(name) {
            return Ok(*handle);
        }
        if !state.connected {
            return Err(EngineError::NotConnected);
        }

        let handle = transport
            .register_plugin(name)
            .ok_or_else(|| EngineError::RegistrationRefused(name.to_owned()))?;
        log::debug!("[Connection] Registered plugin '{name}' as {handle}");
        state.plugins.insert(name.to_owned(), handle);
        Ok(handle)
    }

    /// Names registered in the current session.
    pub fn registered_plugins(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state().plugins.keys().cloned().collect();
        names.sort();
        names
    }

    /// Send one message. `false` means "not sent"; a dead link is not an
    /// error.
    pub fn send(&self, blob: &Blob) -> bool {
        let mut state = self.state();
        if !state.connected {
            return false;
        }
        state
            .transport
            .as_mut()
            .is_some_and(|transport| transport.send(blob))
    }

    /// Next buffered inbound message for `handle`, if any.
    ///
    /// Non-blocking; callers loop until it returns `false`.
    pub fn receive(&self, handle: PluginHandle, blob: &mut Blob) -> bool {
        let mut state = self.state();
        if !state.connected {
            return false;
        }
        state
            .transport
            .as_mut()
            .is_some_and(|transport| transport.receive(handle, blob))
    }
}
