//! Scene-graph sync service (`SceneSync_Plugin`).
//!
//! Mirrors the engine's scene hierarchy and forwards editor-side selection
//! and edit commands. Every UI call only enqueues; the worker sends the
//! queues once per connected tick, one queue after another:
//!
//! | Queue | Opcode | Payload |
//! |---|---|---|
//! | tree request | `SendSceneTree` | none |
//! | select scene | `SelectScene` | scene name |
//! | select objects | `SelectObjects` | count, refs |
//! | rename | `RenameItem` | ref, new name |
//! | delete | `DeleteItem` | ref |
//! | duplicate | `DuplicateAndMoveItem` | ref, dx, dy, dz |
//!
//! A tree request is queued automatically on the first tick of every
//! connected session.

mod tree;

pub use tree::{
    ActorEntry, FriseEntry, ObjectKey, SceneTree, TreeFlavor, SCENE_TREE, SCENE_TREE_OFFLINE,
};

use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Context;

use crate::blob::Blob;
use crate::config::Config;
use crate::connection::ConnectionManager;
use crate::error::Result;
use crate::events::EventBus;
use crate::service::{CommandQueue, PluginService, ServiceContext, ServiceHooks, StartOutcome};

/// Registration name of the scene-sync plugin.
pub const PLUGIN_NAME: &str = "SceneSync_Plugin";

/// Request a full scene tree.
pub const SEND_SCENE_TREE: &str = "SendSceneTree";
/// Make a scene the active one.
pub const SELECT_SCENE: &str = "SelectScene";
/// Replace the engine-side object selection.
pub const SELECT_OBJECTS: &str = "SelectObjects";
/// Rename an object.
pub const RENAME_ITEM: &str = "RenameItem";
/// Delete an object.
pub const DELETE_ITEM: &str = "DeleteItem";
/// Duplicate an object and offset the copy.
pub const DUPLICATE_AND_MOVE_ITEM: &str = "DuplicateAndMoveItem";
/// Engine-side selection changed.
pub const OBJECTS_SELECTED_IN_RUNTIME: &str = "ObjectsSelectedInRuntime";

/// Data pushed by the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum SceneEvent {
    /// A new scene tree replaced the cached one.
    TreeUpdated {
        /// Online or offline tree.
        flavor: TreeFlavor,
        /// The decoded tree.
        tree: Arc<SceneTree>,
    },
    /// The user selected an object inside the running engine.
    RuntimeSelection(u32),
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct DuplicateAndMove {
    object_ref: u32,
    offset: [f32; 3],
}

#[derive(Debug, Default)]
struct SceneSyncHooks {
    tree_requests: CommandQueue<()>,
    select_scene: CommandQueue<String>,
    select_objects: CommandQueue<Vec<u32>>,
    rename: CommandQueue<(u32, String)>,
    delete: CommandQueue<u32>,
    duplicate: CommandQueue<DuplicateAndMove>,
    latest: Mutex<Option<(TreeFlavor, Arc<SceneTree>)>>,
    events: EventBus<SceneEvent>,
}

impl SceneSyncHooks {
    fn store_tree(&self, flavor: TreeFlavor, tree: SceneTree) {
        let tree = Arc::new(tree);
        *self.latest.lock().unwrap_or_else(PoisonError::into_inner) =
            Some((flavor, Arc::clone(&tree)));
        self.events.emit(SceneEvent::TreeUpdated { flavor, tree });
    }
}

impl ServiceHooks for SceneSyncHooks {
    fn handle_message(
        &self,
        opcode: &str,
        blob: &mut Blob,
        _ctx: &ServiceContext,
    ) -> anyhow::Result<()> {
        if let Some(flavor) = TreeFlavor::from_opcode(opcode) {
            let tree = SceneTree::decode(blob, flavor).context("decode scene tree")?;
            blob.ensure_consumed()?;
            log::debug!(
                "[SceneSync] Received {opcode} '{}' with {} objects",
                tree.name,
                tree.object_count()
            );
            self.store_tree(flavor, tree);
            return Ok(());
        }

        match opcode {
            OBJECTS_SELECTED_IN_RUNTIME => {
                let object_ref = blob.take::<u32>()?;
                blob.ensure_consumed()?;
                self.events.emit(SceneEvent::RuntimeSelection(object_ref));
            }
            other => log::debug!("[SceneSync] Ignoring unknown opcode '{other}'"),
        }
        Ok(())
    }

    fn on_first_time_connected(&self, _ctx: &ServiceContext) {
        self.tree_requests.push(());
    }

    fn drain_queued_commands(&self, ctx: &ServiceContext) {
        for _ in self.tree_requests.drain() {
            ctx.send_message(&ctx.message(SEND_SCENE_TREE));
        }

        for scene in self.select_scene.drain() {
            let mut blob = ctx.message(SELECT_SCENE);
            blob.push_str(&scene);
            ctx.send_message(&blob);
        }

        for refs in self.select_objects.drain() {
            let mut blob = ctx.message(SELECT_OBJECTS);
            blob.push(refs.len() as u32);
            for object_ref in refs {
                blob.push(object_ref);
            }
            ctx.send_message(&blob);
        }

        for (object_ref, name) in self.rename.drain() {
            let mut blob = ctx.message(RENAME_ITEM);
            blob.push(object_ref).push_str(&name);
            ctx.send_message(&blob);
        }

        for object_ref in self.delete.drain() {
            let mut blob = ctx.message(DELETE_ITEM);
            blob.push(object_ref);
            ctx.send_message(&blob);
        }

        for cmd in self.duplicate.drain() {
            let [dx, dy, dz] = cmd.offset;
            let mut blob = ctx.message(DUPLICATE_AND_MOVE_ITEM);
            blob.push(cmd.object_ref).push(dx).push(dy).push(dz);
            ctx.send_message(&blob);
        }
    }
}

/// Scene-graph sync plugin service.
#[derive(Debug)]
pub struct SceneSyncService {
    runtime: PluginService,
    hooks: Arc<SceneSyncHooks>,
}

impl SceneSyncService {
    /// Create a stopped service on the shared `manager`.
    pub fn new(manager: Arc<ConnectionManager>, config: &Config) -> Self {
        let hooks = Arc::new(SceneSyncHooks::default());
        let shared_hooks = Arc::clone(&hooks) as Arc<dyn ServiceHooks>;
        let runtime = PluginService::new(PLUGIN_NAME, shared_hooks, manager, config);
        Self { runtime, hooks }
    }

    /// The underlying runtime (state, status events, manual ticks).
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

    /// Receive scene events from now on.
    pub fn subscribe(&self) -> Receiver<SceneEvent> {
        self.hooks.events.subscribe()
    }

    /// Most recent tree received in this process, if any.
    pub fn latest_tree(&self) -> Option<(TreeFlavor, Arc<SceneTree>)> {
        self.hooks
            .latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Ask the engine for a fresh scene tree.
    pub fn request_scene_tree(&self) {
        self.hooks.tree_requests.push(());
    }

    /// Make `scene` the engine's active scene.
    pub fn select_scene(&self, scene: impl Into<String>) {
        self.hooks.select_scene.push(scene.into());
    }

    /// Replace the engine-side selection with `refs`.
    pub fn select_objects(&self, refs: impl Into<Vec<u32>>) {
        self.hooks.select_objects.push(refs.into());
    }

    /// Rename the object `object_ref`.
    pub fn rename(&self, object_ref: u32, new_name: impl Into<String>) {
        self.hooks.rename.push((object_ref, new_name.into()));
    }

    /// Delete the object `object_ref`.
    pub fn delete(&self, object_ref: u32) {
        self.hooks.delete.push(object_ref);
    }

    /// Duplicate `object_ref` and move the copy by `(dx, dy, dz)`.
    pub fn duplicate_and_move(&self, object_ref: u32, dx: f32, dy: f32, dz: f32) {
        self.hooks.duplicate.push(DuplicateAndMove {
            object_ref,
            offset: [dx, dy, dz],
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::ConnectionSettings;
    use crate::transport::MemoryEngine;

    fn connected() -> (MemoryEngine, SceneSyncService) {
        let engine = MemoryEngine::new();
        let manager = Arc::new(ConnectionManager::new(engine.factory()));
        manager
            .initialize(ConnectionSettings::new("127.0.0.1", 4030))
            .unwrap();
        let service = SceneSyncService::new(manager, &Config::default());
        engine.set_online(true);
        service.runtime().tick();
        (engine, service)
    }

    #[test]
    fn test_first_connect_requests_tree_once() {
        let (engine, service) = connected();
        service.runtime().tick();
        assert_eq!(
            engine.sent_opcodes(PLUGIN_NAME),
            vec!["PluginId", SEND_SCENE_TREE]
        );
    }

    #[test]
    fn test_commands_are_serialized_in_queue_order() {
        let (engine, service) = connected();
        engine.take_sent();

        service.delete(9);
        service.rename(4, "Door");
        service.select_objects(vec![1, 2]);
        service.duplicate_and_move(4, 1.0, 0.0, -2.5);
        service.select_scene("intro");
        service.runtime().tick();

        assert_eq!(
            engine.sent_opcodes(PLUGIN_NAME),
            vec![
                SELECT_SCENE,
                SELECT_OBJECTS,
                RENAME_ITEM,
                DELETE_ITEM,
                DUPLICATE_AND_MOVE_ITEM
            ]
        );

        let sent = engine.sent();
        let mut select = sent[1].clone();
        select.take::<String>().unwrap();
        select.take::<String>().unwrap();
        assert_eq!(select.take::<u32>().unwrap(), 2);
        assert_eq!(select.take::<u32>().unwrap(), 1);
        assert_eq!(select.take::<u32>().unwrap(), 2);

        let mut dup = sent[4].clone();
        dup.take::<String>().unwrap();
        dup.take::<String>().unwrap();
        assert_eq!(dup.take::<u32>().unwrap(), 4);
        assert_eq!(dup.take::<f32>().unwrap(), 1.0);
        assert_eq!(dup.take::<f32>().unwrap(), 0.0);
        assert_eq!(dup.take::<f32>().unwrap(), -2.5);
        assert!(dup.ensure_consumed().is_ok());
    }

    #[test]
    fn test_commands_wait_for_connection() {
        let engine = MemoryEngine::new();
        let manager = Arc::new(ConnectionManager::new(engine.factory()));
        manager
            .initialize(ConnectionSettings::new("127.0.0.1", 4030))
            .unwrap();
        let service = SceneSyncService::new(manager, &Config::default());

        service.rename(1, "Later");
        service.runtime().tick();
        assert!(engine.sent().is_empty());

        engine.set_online(true);
        service.runtime().tick();
        assert_eq!(
            engine.sent_opcodes(PLUGIN_NAME),
            vec!["PluginId", SEND_SCENE_TREE, RENAME_ITEM]
        );
    }

    #[test]
    fn test_runtime_selection_event() {
        let (engine, service) = connected();
        let events = service.subscribe();

        let mut msg = Blob::message(PLUGIN_NAME, OBJECTS_SELECTED_IN_RUNTIME);
        msg.push(77u32);
        engine.push_inbound(&msg);
        service.runtime().tick();

        assert_eq!(events.try_recv(), Ok(SceneEvent::RuntimeSelection(77)));
    }

    #[test]
    fn test_selection_with_extra_fields_is_rejected() {
        let (engine, service) = connected();
        let events = service.subscribe();

        let mut bad = Blob::message(PLUGIN_NAME, OBJECTS_SELECTED_IN_RUNTIME);
        bad.push(5u32).push(6u32).push(7u32);
        let mut good = Blob::message(PLUGIN_NAME, OBJECTS_SELECTED_IN_RUNTIME);
        good.push(8u32);
        engine.push_inbound(&bad);
        engine.push_inbound(&good);
        service.runtime().tick();

        assert_eq!(
            events.try_iter().collect::<Vec<_>>(),
            vec![SceneEvent::RuntimeSelection(8)]
        );
    }

    #[test]
    fn test_tree_with_trailing_bytes_is_rejected() {
        let (engine, service) = connected();
        let events = service.subscribe();

        let mut msg = SceneTree::default().to_message(PLUGIN_NAME, TreeFlavor::Online);
        msg.push(0u32);
        engine.push_inbound(&msg);
        service.runtime().tick();

        assert!(events.try_recv().is_err());
        assert!(service.latest_tree().is_none());
    }
}
