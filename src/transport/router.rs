//! Per-plugin inbound message queues.
//!
//! One transport carries every plugin's traffic. The router owns the
//! name → handle registry of the current session and demultiplexes decoded
//! payloads into one FIFO per registered plugin.

use std::collections::{HashMap, VecDeque};

use crate::blob::Blob;

use super::PluginHandle;

/// Session-scoped plugin registry and inbound queues.
#[derive(Debug)]
pub struct InboundRouter {
    /// Next handle id. Never reset, so a handle from an old session can
    /// not alias a fresh registration.
    next_id: u32,
    by_name: HashMap<String, PluginHandle>,
    queues: HashMap<PluginHandle, VecDeque<Blob>>,
}

impl Default for InboundRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl InboundRouter {
    /// Create an empty router.
    pub fn new() -> Self {
        Self {
            next_id: 1,
            by_name: HashMap::new(),
            queues: HashMap::new(),
        }
    }

    /// Register `name`, returning the existing handle when already known.
    pub fn register(&mut self, name: &str) -> PluginHandle {
        if let Some(handle) = self.by_name.get(name) {
            return *handle;
        }
        let handle = PluginHandle::new(self.next_id);
        self.next_id = self.next_id.wrapping_add(1);
        self.by_name.insert(name.to_owned(), handle);
        self.queues.insert(handle, VecDeque::new());
        handle
    }

    /// Queue one decoded payload for the plugin named in its first field.
    ///
    /// Returns whether the payload was queued.
    pub fn route(&mut self, payload: &[u8]) -> bool {
        let mut blob = Blob::from_bytes(payload);
        let name = match blob.take::<String>() {
            Ok(name) => name,
            Err(e) => {
                log::warn!("[Router] Dropping message without plugin header: {e}");
                return false;
            }
        };

        let Some(handle) = self.by_name.get(&name) else {
            log::debug!("[Router] Dropping message for unregistered plugin '{name}'");
            return false;
        };

        match self.queues.get_mut(handle) {
            Some(queue) => {
                queue.push_back(blob);
                true
            }
            None => false,
        }
    }

    /// Next pending message for `handle`.
    pub fn pop(&mut self, handle: PluginHandle) -> Option<Blob> {
        self.queues.get_mut(&handle)?.pop_front()
    }

    /// Name registered for `handle`.
    pub fn name_of(&self, handle: PluginHandle) -> Option<&str> {
        self.by_name
            .iter()
            .find(|(_, h)| **h == handle)
            .map(|(name, _)| name.as_str())
    }

    /// Number of registered plugins.
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    /// Whether no plugin is registered.
    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// Forget every registration and pending message.
    pub fn clear(&mut self) {
        self.by_name.clear();
        self.queues.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inbound(plugin: &str, opcode: &str) -> Vec<u8> {
        Blob::message(plugin, opcode).as_bytes().to_vec()
    }

    #[test]
    fn test_register_is_idempotent_per_name() {
        let mut router = InboundRouter::new();
        let a = router.register("SceneSync_Plugin");
        let b = router.register("SceneSync_Plugin");
        let c = router.register("scenesync_plugin");
        assert_eq!(a, b);
        assert_ne!(a, c, "names are case-sensitive");
        assert_eq!(router.len(), 2);
    }

    #[test]
    fn test_messages_routed_by_plugin_name() {
        let mut router = InboundRouter::new();
        let scene = router.register("SceneSync_Plugin");
        let props = router.register("PropertiesEditor_Plugin");

        assert!(router.route(&inbound("PropertiesEditor_Plugin", "Properties")));
        assert!(router.route(&inbound("SceneSync_Plugin", "SceneTree")));
        assert!(!router.route(&inbound("Unknown_Plugin", "SceneTree")));

        let mut msg = router.pop(scene).unwrap();
        assert_eq!(msg.take::<String>().unwrap(), "SceneTree");
        assert!(router.pop(scene).is_none());

        let mut msg = router.pop(props).unwrap();
        assert_eq!(msg.take::<String>().unwrap(), "Properties");
    }

    #[test]
    fn test_clear_never_reuses_handles() {
        let mut router = InboundRouter::new();
        let before = router.register("SceneSync_Plugin");
        router.clear();
        assert!(router.is_empty());
        let after = router.register("SceneSync_Plugin");
        assert_ne!(before, after);
        assert!(router.pop(before).is_none());
    }

    #[test]
    fn test_garbage_header_is_dropped() {
        let mut router = InboundRouter::new();
        router.register("SceneSync_Plugin");
        assert!(!router.route(&[0xff, 0xff]));
    }
}
