//! Plugin service runtime.
//!
//! A [`PluginService`] runs one named plugin against the shared
//! [`ConnectionManager`] on a dedicated worker thread. The concrete service
//! supplies its behaviour through [`ServiceHooks`]; everything else (the
//! reconnect loop, registration, inbound dispatch, failure containment and
//! shutdown) lives here.
//!
//! # Tick
//!
//! ```text
//! connect_if_needed ──► status change? ──► register + announce / reset
//!        │
//!        ▼ (connected)
//!     update ──► drain inbound ──► first-time hook (once) ──► queued commands
//!        │
//!        ▼
//!   sleep tick interval (woken early by stop)
//! ```
//!
//! A failed tick waits the recovery interval instead. A fatal transport
//! fault hard-resets the connection and the next tick reconnects. The loop
//! only ends on cancellation.

mod cancel;
mod hooks;
mod queue;

pub use cancel::CancelToken;
pub use hooks::{ServiceContext, ServiceHooks};
pub use queue::CommandQueue;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::blob::Blob;
use crate::config::Config;
use crate::connection::ConnectionManager;
use crate::constants::PLUGIN_ID_OPCODE;
use crate::error::{EngineError, Result};
use crate::events::EventBus;
use crate::settings::ConnectionSettings;
use crate::transport::PluginHandle;

/// Lifecycle of a service worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    /// No worker.
    Stopped,
    /// `start` is parsing settings and spawning the worker.
    Starting,
    /// Worker loop is running.
    Running,
    /// `stop` is waiting for the worker.
    Stopping,
}

/// What `start` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// A new worker thread was spawned.
    Spawned,
    /// A worker was already running; nothing was spawned.
    AlreadyRunning,
}

/// Connection transitions seen by one service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Registered with a freshly connected engine.
    Connected,
    /// Lost the engine or stopped.
    Disconnected,
}

/// Timing of the worker loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceOptions {
    /// Sleep between ticks.
    pub tick_interval: Duration,
    /// Sleep after a failed tick.
    pub recovery_interval: Duration,
    /// Longest `stop` waits for the worker.
    pub stop_grace: Duration,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl ServiceOptions {
    /// Options taken from `config`.
    pub fn from_config(config: &Config) -> Self {
        Self {
            tick_interval: config.tick_interval(),
            recovery_interval: config.recovery_interval(),
            stop_grace: config.stop_grace(),
        }
    }
}

/// Per-session loop state. Dies with the connection that produced it.
#[derive(Debug, Default)]
struct Session {
    handle: Option<PluginHandle>,
    connected: bool,
    manager_session: u64,
    first_time_pending: bool,
}

struct Shared {
    ctx: ServiceContext,
    hooks: Arc<dyn ServiceHooks>,
    defaults: Config,
    options: ServiceOptions,
    state: Mutex<ServiceState>,
    session: Mutex<Session>,
    connected: AtomicBool,
    status: EventBus<ConnectionStatus>,
}

impl Shared {
    fn name(&self) -> &str {
        self.ctx.plugin_name()
    }

    fn manager(&self) -> &ConnectionManager {
        self.ctx.manager()
    }

    fn session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: ServiceState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// One loop iteration with failure containment. Returns how long the
    /// loop should sleep before the next one.
    fn tick(&self) -> Duration {
        let mut session = self.session();
        match self.tick_inner(&mut session) {
            Ok(()) => self.options.tick_interval,
            Err(e) if e.is_fatal() => {
                log::error!("[Service:{}] {e}; resetting connection", self.name());
                self.hard_reset(&mut session);
                self.options.tick_interval
            }
            Err(e) => {
                log::warn!(
                    "[Service:{}] Tick failed: {e}; retrying in {:?}",
                    self.name(),
                    self.options.recovery_interval
                );
                self.options.recovery_interval
            }
        }
    }

    fn tick_inner(&self, session: &mut Session) -> Result<()> {
        let manager = self.manager();
        let connected = manager.connect_if_needed();
        let manager_session = manager.session();

        if session.connected && (!connected || manager_session != session.manager_session) {
            self.on_disconnected(session);
        }
        if connected && !session.connected {
            self.on_connected(session, manager_session)?;
        }
        if !session.connected {
            return Ok(());
        }

        manager.update()?;
        if !manager.is_connected() {
            self.on_disconnected(session);
            return Ok(());
        }

        self.drain_inbound(session);

        if session.first_time_pending {
            session.first_time_pending = false;
            self.hooks.on_first_time_connected(&self.ctx);
        }
        self.hooks.drain_queued_commands(&self.ctx);
        Ok(())
    }

    fn on_connected(&self, session: &mut Session, manager_session: u64) -> Result<()> {
        let handle = self.manager().register_plugin(self.name())?;

        let mut announce = Blob::new();
        announce.push_str(PLUGIN_ID_OPCODE).push_str(self.name());
        if !self.manager().send(&announce) {
            log::warn!("[Service:{}] Registration announcement not sent", self.name());
        }

        log::info!("[Service:{}] Registered with engine as {handle}", self.name());
        *session = Session {
            handle: Some(handle),
            connected: true,
            manager_session,
            first_time_pending: true,
        };
        self.set_connected(true);
        self.hooks.on_plugin_registered(&self.ctx);
        Ok(())
    }

    fn on_disconnected(&self, session: &mut Session) {
        log::info!("[Service:{}] Lost engine connection", self.name());
        *session = Session::default();
        self.set_connected(false);
    }

    fn hard_reset(&self, session: &mut Session) {
        *session = Session::default();
        self.manager().disconnect();
        self.set_connected(false);
    }

    fn drain_inbound(&self, session: &Session) {
        let Some(handle) = session.handle else {
            return;
        };
        let mut blob = Blob::new();
        while self.manager().receive(handle, &mut blob) {
            let opcode = match blob.take::<String>() {
                Ok(opcode) => opcode,
                Err(e) => {
                    log::warn!("[Service:{}] Dropping message without opcode: {e}", self.name());
                    continue;
                }
            };
            if let Err(e) = self.hooks.handle_message(&opcode, &mut blob, &self.ctx) {
                let err = EngineError::message(opcode, e);
                log::warn!("[Service:{}] {err}", self.name());
            }
        }
    }

    /// Emits a status event only on an actual change.
    fn set_connected(&self, connected: bool) {
        if self.connected.swap(connected, Ordering::SeqCst) != connected {
            self.status.emit(if connected {
                ConnectionStatus::Connected
            } else {
                ConnectionStatus::Disconnected
            });
        }
    }

    fn run(&self, cancel: &CancelToken) {
        log::debug!("[Service:{}] Worker started", self.name());
        while !cancel.is_cancelled() {
            let delay = self.tick();
            if cancel.wait_timeout(delay) {
                break;
            }
        }
        log::debug!("[Service:{}] Worker exiting", self.name());
    }
}

struct Worker {
    cancel: CancelToken,
    exited: Receiver<()>,
    handle: JoinHandle<()>,
}

/// One named plugin service bound to the shared connection.
pub struct PluginService {
    shared: Arc<Shared>,
    worker: Mutex<Option<Worker>>,
}

impl std::fmt::Debug for PluginService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginService")
            .field("name", &self.shared.name())
            .field("state", &self.state())
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

impl PluginService {
    /// Create a stopped service named `plugin_name`.
    ///
    /// `config` supplies loop timing and the endpoint used when `start`
    /// arguments leave it out.
    pub fn new(
        plugin_name: impl Into<String>,
        hooks: Arc<dyn ServiceHooks>,
        manager: Arc<ConnectionManager>,
        config: &Config,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                ctx: ServiceContext::new(plugin_name, manager),
                hooks,
                defaults: config.clone(),
                options: ServiceOptions::from_config(config),
                state: Mutex::new(ServiceState::Stopped),
                session: Mutex::new(Session::default()),
                connected: AtomicBool::new(false),
                status: EventBus::new(),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Plugin name.
    pub fn name(&self) -> &str {
        self.shared.name()
    }

    /// Loop timing.
    pub fn options(&self) -> ServiceOptions {
        self.shared.options
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ServiceState {
        *self.shared.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether this service is registered with a connected engine.
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// Receive [`ConnectionStatus`] transitions from now on.
    pub fn subscribe_status(&self) -> Receiver<ConnectionStatus> {
        self.shared.status.subscribe()
    }

    fn worker(&self) -> MutexGuard<'_, Option<Worker>> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn initialize_manager<I, S>(&self, args: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<std::ffi::OsString> + Clone,
    {
        let settings = ConnectionSettings::parse(args, &self.shared.defaults)?;
        self.shared.manager().initialize(settings)
    }

    /// Start the worker loop.
    ///
    /// `args` is the engine part of the host's command line (see
    /// [`ConnectionSettings::parse`]). Calling `start` on a running
    /// service never spawns a second worker.
    pub fn start<I, S>(&self, args: I) -> Result<StartOutcome>
    where
        I: IntoIterator<Item = S>,
        S: Into<std::ffi::OsString> + Clone,
    {
        let mut worker = self.worker();
        if worker.is_some() {
            if !self.shared.manager().is_initialized() {
                self.initialize_manager(args)?;
            }
            self.shared.hooks.on_service_initializing();
            log::debug!("[Service:{}] Already running", self.name());
            return Ok(StartOutcome::AlreadyRunning);
        }

        self.shared.set_state(ServiceState::Starting);
        match self.spawn_worker(args) {
            Ok(spawned) => {
                *worker = Some(spawned);
                self.shared.set_state(ServiceState::Running);
                log::info!("[Service:{}] Started", self.name());
                Ok(StartOutcome::Spawned)
            }
            Err(e) => {
                self.shared.set_state(ServiceState::Stopped);
                log::error!("[Service:{}] Failed to start: {e}", self.name());
                Err(e)
            }
        }
    }

    fn spawn_worker<I, S>(&self, args: I) -> Result<Worker>
    where
        I: IntoIterator<Item = S>,
        S: Into<std::ffi::OsString> + Clone,
    {
        self.initialize_manager(args)?;
        self.shared.hooks.on_service_initializing();

        let cancel = CancelToken::new();
        let (exit_tx, exited) = mpsc::channel();
        let shared = Arc::clone(&self.shared);
        let worker_cancel = cancel.clone();
        let handle = thread::Builder::new()
            .name(format!("svc-{}", self.name()))
            .spawn(move || {
                shared.run(&worker_cancel);
                let _ = exit_tx.send(());
            })
            .map_err(|e| EngineError::InitializationFailed(format!("spawn worker: {e}")))?;

        Ok(Worker {
            cancel,
            exited,
            handle,
        })
    }

    /// Stop the worker loop, waiting at most the stop grace period.
    ///
    /// Disconnects the shared manager if it is connected. No-op when the
    /// service is already stopped.
    pub fn stop(&self) {
        let Some(worker) = self.worker().take() else {
            return;
        };
        self.shared.set_state(ServiceState::Stopping);
        worker.cancel.cancel();

        match worker.exited.recv_timeout(self.shared.options.stop_grace) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if worker.handle.join().is_err() {
                    log::error!("[Service:{}] Worker panicked", self.name());
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                log::warn!(
                    "[Service:{}] Worker did not stop within {:?}; detaching",
                    self.name(),
                    self.shared.options.stop_grace
                );
            }
        }

        {
            let mut session = self.shared.session();
            *session = Session::default();
        }
        if self.shared.manager().is_connected() {
            self.shared.manager().disconnect();
        }
        self.shared.set_connected(false);
        self.shared.hooks.on_service_stopping();
        self.shared.set_state(ServiceState::Stopped);
        log::info!("[Service:{}] Stopped", self.name());
    }

    /// Run one loop iteration on the calling thread.
    ///
    /// For hosts that drive the service from their own loop instead of
    /// calling `start`. Applies the same failure containment as the worker
    /// and returns the delay the worker would sleep before the next tick.
    pub fn tick(&self) -> Duration {
        self.shared.tick()
    }
}

impl Drop for PluginService {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryEngine;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Recorder {
        registered: AtomicUsize,
        first_time: AtomicUsize,
        initializing: AtomicUsize,
        stopping: AtomicUsize,
        drains: AtomicUsize,
        handled: Mutex<Vec<String>>,
    }

    impl ServiceHooks for Recorder {
        fn handle_message(
            &self,
            opcode: &str,
            blob: &mut Blob,
            _ctx: &ServiceContext,
        ) -> anyhow::Result<()> {
            let value: u32 = blob.take()?;
            self.handled.lock().unwrap().push(format!("{opcode}:{value}"));
            Ok(())
        }

        fn on_plugin_registered(&self, _ctx: &ServiceContext) {
            self.registered.fetch_add(1, Ordering::SeqCst);
        }

        fn on_first_time_connected(&self, _ctx: &ServiceContext) {
            self.first_time.fetch_add(1, Ordering::SeqCst);
        }

        fn on_service_initializing(&self) {
            self.initializing.fetch_add(1, Ordering::SeqCst);
        }

        fn on_service_stopping(&self) {
            self.stopping.fetch_add(1, Ordering::SeqCst);
        }

        fn drain_queued_commands(&self, _ctx: &ServiceContext) {
            self.drains.fetch_add(1, Ordering::SeqCst);
        }
    }

    const NAME: &str = "Test_Plugin";

    fn fixture() -> (MemoryEngine, Arc<Recorder>, PluginService) {
        let engine = MemoryEngine::new();
        let manager = Arc::new(ConnectionManager::new(engine.factory()));
        manager
            .initialize(ConnectionSettings::new("127.0.0.1", 4030))
            .unwrap();
        let hooks = Arc::new(Recorder::default());
        let shared_hooks = Arc::clone(&hooks) as Arc<dyn ServiceHooks>;
        let service = PluginService::new(NAME, shared_hooks, manager, &Config::default());
        (engine, hooks, service)
    }

    #[test]
    fn test_tick_without_engine_does_nothing() {
        let (engine, hooks, service) = fixture();
        assert_eq!(service.tick(), service.options().tick_interval);
        assert!(!service.is_connected());
        assert_eq!(engine.registrations().len(), 0);
        assert_eq!(hooks.drains.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_connect_registers_and_announces() {
        let (engine, hooks, service) = fixture();
        let status = service.subscribe_status();
        engine.set_online(true);

        service.tick();
        assert!(service.is_connected());
        assert_eq!(engine.registrations(), vec![NAME]);
        assert_eq!(engine.sent_opcodes(NAME), vec![PLUGIN_ID_OPCODE]);
        assert_eq!(hooks.registered.load(Ordering::SeqCst), 1);
        assert_eq!(hooks.first_time.load(Ordering::SeqCst), 1);
        assert_eq!(status.try_recv(), Ok(ConnectionStatus::Connected));

        service.tick();
        service.tick();
        assert_eq!(hooks.registered.load(Ordering::SeqCst), 1);
        assert_eq!(hooks.first_time.load(Ordering::SeqCst), 1);
        assert_eq!(hooks.drains.load(Ordering::SeqCst), 3);
        assert!(status.try_recv().is_err(), "no event without a transition");
    }

    #[test]
    fn test_bad_message_does_not_stop_the_drain() {
        let (engine, hooks, service) = fixture();
        engine.set_online(true);
        service.tick();

        let bad = Blob::message(NAME, "Value");
        let mut good = Blob::message(NAME, "Value");
        good.push(5u32);
        engine.push_inbound(&bad);
        engine.push_inbound(&good);

        service.tick();
        assert_eq!(*hooks.handled.lock().unwrap(), vec!["Value:5"]);
    }

    #[test]
    fn test_engine_restart_triggers_fresh_session() {
        let (engine, hooks, service) = fixture();
        let status = service.subscribe_status();
        engine.set_online(true);
        service.tick();

        engine.set_online(false);
        service.tick();
        assert!(!service.is_connected());

        engine.set_online(true);
        service.tick();
        assert!(service.is_connected());
        assert_eq!(engine.registrations().len(), 2);
        assert_eq!(hooks.first_time.load(Ordering::SeqCst), 2);
        assert_eq!(
            status.try_iter().collect::<Vec<_>>(),
            vec![
                ConnectionStatus::Connected,
                ConnectionStatus::Disconnected,
                ConnectionStatus::Connected
            ]
        );
    }

    #[test]
    fn test_fatal_fault_resets_then_reconnects() {
        let (engine, hooks, service) = fixture();
        engine.set_online(true);
        service.tick();

        engine.inject_fault("garbage length");
        assert_eq!(service.tick(), service.options().tick_interval);
        assert!(!service.is_connected());

        service.tick();
        assert!(service.is_connected());
        assert_eq!(engine.successful_connects(), 2);
        assert_eq!(hooks.first_time.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_uninitialized_manager_keeps_loop_idle() {
        let engine = MemoryEngine::new();
        let manager = Arc::new(ConnectionManager::new(engine.factory()));
        let hooks = Arc::new(Recorder::default());
        let service = PluginService::new(NAME, hooks, manager, &Config::default());
        engine.set_online(true);
        assert_eq!(service.tick(), service.options().tick_interval);
        assert!(!service.is_connected());
    }

    #[test]
    fn test_start_twice_spawns_one_worker() {
        let (_engine, hooks, service) = fixture();
        assert_eq!(service.start(Vec::<String>::new()).unwrap(), StartOutcome::Spawned);
        assert_eq!(
            service.start(Vec::<String>::new()).unwrap(),
            StartOutcome::AlreadyRunning
        );
        assert_eq!(service.state(), ServiceState::Running);
        assert_eq!(hooks.initializing.load(Ordering::SeqCst), 2);

        service.stop();
        assert_eq!(service.state(), ServiceState::Stopped);
        assert_eq!(hooks.stopping.load(Ordering::SeqCst), 1);
        service.stop();
        assert_eq!(hooks.stopping.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_bad_arguments_fail_start() {
        let (_engine, _hooks, service) = fixture();
        let err = service.start(["--port", "seventy"]).unwrap_err();
        assert!(matches!(err, EngineError::InvalidArguments(_)));
        assert_eq!(service.state(), ServiceState::Stopped);
    }
}
