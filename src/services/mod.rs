//! Concrete plugin services built on [`crate::service::PluginService`].

pub mod properties;
pub mod scene_sync;

pub use properties::{PropertyEditService, PropertyEvent};
pub use scene_sync::{SceneEvent, SceneSyncService};
