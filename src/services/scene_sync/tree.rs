//! Scene-tree payloads.
//!
//! ```text
//! tree   := name, path,
//!           actor-count(u32), { key, name, components-csv, script-path }*,
//!           frise-count(u32), { key, name, config-path }*,
//!           child-count(u32), tree*
//! key    := ref(u32)          online  ("SceneTree")
//!         | offline-id(str)   offline ("SceneTree_Offline")
//! ```
//!
//! Only the top-level message carries the opcode; nested children do not.

use crate::blob::Blob;
use crate::constants::MAX_TREE_DEPTH;
use crate::error::BlobError;

/// Opcode of an online scene tree.
pub const SCENE_TREE: &str = "SceneTree";
/// Opcode of an offline scene tree.
pub const SCENE_TREE_OFFLINE: &str = "SceneTree_Offline";

/// Which engine mode produced a tree. Decides how object keys are encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeFlavor {
    /// Running engine; objects keyed by numeric reference.
    Online,
    /// Engine editing data on disk; objects keyed by string id.
    Offline,
}

impl TreeFlavor {
    /// Opcode carrying this flavor.
    pub fn opcode(self) -> &'static str {
        match self {
            Self::Online => SCENE_TREE,
            Self::Offline => SCENE_TREE_OFFLINE,
        }
    }

    /// Flavor for an inbound opcode, if it is a scene-tree opcode.
    pub fn from_opcode(opcode: &str) -> Option<Self> {
        match opcode {
            SCENE_TREE => Some(Self::Online),
            SCENE_TREE_OFFLINE => Some(Self::Offline),
            _ => None,
        }
    }
}

/// Identity of a scene object.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ObjectKey {
    /// Runtime object reference.
    Ref(u32),
    /// Offline object id.
    Offline(String),
}

impl ObjectKey {
    /// Numeric reference, for online keys.
    pub fn as_ref_id(&self) -> Option<u32> {
        match self {
            Self::Ref(id) => Some(*id),
            Self::Offline(_) => None,
        }
    }

    fn decode(blob: &mut Blob, flavor: TreeFlavor) -> Result<Self, BlobError> {
        Ok(match flavor {
            TreeFlavor::Online => Self::Ref(blob.take()?),
            TreeFlavor::Offline => Self::Offline(blob.take()?),
        })
    }

    fn encode(&self, blob: &mut Blob) {
        match self {
            Self::Ref(id) => {
                blob.push(*id);
            }
            Self::Offline(id) => {
                blob.push_str(id);
            }
        }
    }
}

impl std::fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ref(id) => write!(f, "#{id}"),
            Self::Offline(id) => f.write_str(id),
        }
    }
}

/// An actor and its component list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActorEntry {
    /// Object identity.
    pub key: ObjectKey,
    /// Display name.
    pub name: String,
    /// Component class names as the engine sent them, comma separated.
    pub components_csv: String,
    /// Path of the actor script.
    pub script_path: String,
}

/// A frise (2D geometry object).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FriseEntry {
    /// Object identity.
    pub key: ObjectKey,
    /// Display name.
    pub name: String,
    /// Path of the frise config.
    pub config_path: String,
}

/// One scene with its objects and sub-scenes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SceneTree {
    /// Scene name.
    pub name: String,
    /// Scene file path.
    pub path: String,
    /// Actors directly in this scene.
    pub actors: Vec<ActorEntry>,
    /// Frises directly in this scene.
    pub frises: Vec<FriseEntry>,
    /// Nested scenes.
    pub children: Vec<SceneTree>,
}

impl ActorEntry {
    /// Component class names, in engine order.
    ///
    /// Entries are returned untrimmed; an empty csv has no components.
    pub fn components(&self) -> Vec<&str> {
        if self.components_csv.is_empty() {
            return Vec::new();
        }
        self.components_csv.split(',').collect()
    }
}

/// Counts come from the peer; never reserve more than the bytes left could
/// possibly hold.
fn bounded_capacity(count: u32, blob: &Blob) -> usize {
    (count as usize).min(blob.remaining() / 4)
}

impl SceneTree {
    /// Decode a tree from `blob`, positioned just after the opcode.
    pub fn decode(blob: &mut Blob, flavor: TreeFlavor) -> Result<Self, BlobError> {
        Self::decode_at(blob, flavor, 0)
    }

    fn decode_at(blob: &mut Blob, flavor: TreeFlavor, depth: usize) -> Result<Self, BlobError> {
        if depth >= MAX_TREE_DEPTH {
            return Err(BlobError::TooDeep {
                limit: MAX_TREE_DEPTH,
            });
        }

        let name = blob.take()?;
        let path = blob.take()?;

        let count: u32 = blob.take()?;
        let mut actors = Vec::with_capacity(bounded_capacity(count, blob));
        for _ in 0..count {
            let key = ObjectKey::decode(blob, flavor)?;
            let name = blob.take()?;
            let components_csv = blob.take()?;
            let script_path = blob.take()?;
            actors.push(ActorEntry {
                key,
                name,
                components_csv,
                script_path,
            });
        }

        let count: u32 = blob.take()?;
        let mut frises = Vec::with_capacity(bounded_capacity(count, blob));
        for _ in 0..count {
            frises.push(FriseEntry {
                key: ObjectKey::decode(blob, flavor)?,
                name: blob.take()?,
                config_path: blob.take()?,
            });
        }

        let count: u32 = blob.take()?;
        let mut children = Vec::with_capacity(bounded_capacity(count, blob));
        for _ in 0..count {
            children.push(Self::decode_at(blob, flavor, depth + 1)?);
        }

        Ok(Self {
            name,
            path,
            actors,
            frises,
            children,
        })
    }

    /// Append the tree body (no opcode) to `blob`.
    pub fn encode(&self, blob: &mut Blob) {
        blob.push_str(&self.name).push_str(&self.path);

        blob.push(self.actors.len() as u32);
        for actor in &self.actors {
            actor.key.encode(blob);
            blob.push_str(&actor.name)
                .push_str(&actor.components_csv)
                .push_str(&actor.script_path);
        }

        blob.push(self.frises.len() as u32);
        for frise in &self.frises {
            frise.key.encode(blob);
            blob.push_str(&frise.name).push_str(&frise.config_path);
        }

        blob.push(self.children.len() as u32);
        for child in &self.children {
            child.encode(blob);
        }
    }

    /// Full inbound message as the engine sends it to `plugin`.
    ///
    /// Object keys must match `flavor`.
    pub fn to_message(&self, plugin: &str, flavor: TreeFlavor) -> Blob {
        let mut blob = Blob::message(plugin, flavor.opcode());
        self.encode(&mut blob);
        blob
    }

    /// Actors and frises in this scene and every sub-scene.
    pub fn object_count(&self) -> usize {
        self.actors.len()
            + self.frises.len()
            + self.children.iter().map(Self::object_count).sum::<usize>()
    }

    /// Depth-first search for the scene named `name`.
    pub fn find_scene(&self, name: &str) -> Option<&SceneTree> {
        if self.name == name {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find_scene(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(name: &str, id: u32) -> SceneTree {
        SceneTree {
            name: name.into(),
            path: format!("world/{name}.isc"),
            actors: vec![ActorEntry {
                key: ObjectKey::Ref(id),
                name: format!("{name}_actor"),
                components_csv: "Renderer,Physics".into(),
                script_path: "actor.act".into(),
            }],
            frises: vec![],
            children: vec![],
        }
    }

    #[test]
    fn test_components_split_on_demand() {
        let mut actor = leaf("root", 1).actors.remove(0);
        assert_eq!(actor.components(), vec!["Renderer", "Physics"]);

        actor.components_csv = String::new();
        assert!(actor.components().is_empty());

        actor.components_csv = " Renderer,,Physics ".into();
        assert_eq!(actor.components(), vec![" Renderer", "", "Physics "]);
    }

    #[test]
    fn test_components_text_survives_round_trip() {
        let mut tree = leaf("root", 1);
        tree.actors[0].components_csv = " Renderer,,Physics ".into();
        let mut child = leaf("child", 2);
        child.actors[0].components_csv = ",".into();
        tree.children.push(child);

        let mut blob = Blob::new();
        tree.encode(&mut blob);
        let decoded = SceneTree::decode(&mut blob, TreeFlavor::Online).unwrap();
        blob.ensure_consumed().unwrap();
        assert_eq!(decoded, tree);
        assert_eq!(decoded.actors[0].components(), vec![" Renderer", "", "Physics "]);
        assert_eq!(decoded.children[0].actors[0].components(), vec!["", ""]);
    }

    #[test]
    fn test_truncated_tree_is_an_error() {
        let mut blob = Blob::new();
        leaf("root", 1).encode(&mut blob);
        let bytes = blob.as_bytes();
        let mut cut = Blob::from_bytes(&bytes[..bytes.len() - 2]);
        assert!(matches!(
            SceneTree::decode(&mut cut, TreeFlavor::Online),
            Err(BlobError::Exhausted { .. })
        ));
    }

    #[test]
    fn test_wrong_flavor_fails_to_decode() {
        let mut tree = leaf("root", 3);
        tree.actors[0].key = ObjectKey::Offline("actor-guid".into());
        let mut blob = Blob::new();
        tree.encode(&mut blob);
        // The offline id string reads as a ref, shifting every later field.
        assert!(SceneTree::decode(&mut blob, TreeFlavor::Online).is_err());
    }

    #[test]
    fn test_excessive_nesting_is_rejected() {
        let mut blob = Blob::new();
        for _ in 0..=MAX_TREE_DEPTH {
            blob.push_str("s").push_str("p").push(0u32).push(0u32).push(1u32);
        }
        assert_eq!(
            SceneTree::decode(&mut blob, TreeFlavor::Online),
            Err(BlobError::TooDeep {
                limit: MAX_TREE_DEPTH
            })
        );
    }

    #[test]
    fn test_find_scene_and_object_count() {
        let mut root = leaf("root", 1);
        let mut mid = leaf("mid", 2);
        mid.children.push(leaf("deep", 3));
        root.children.push(mid);

        assert_eq!(root.object_count(), 3);
        assert_eq!(root.find_scene("deep").map(|s| s.path.as_str()), Some("world/deep.isc"));
        assert!(root.find_scene("missing").is_none());
    }

    #[test]
    fn test_opcode_flavor_mapping() {
        assert_eq!(TreeFlavor::from_opcode("SceneTree"), Some(TreeFlavor::Online));
        assert_eq!(
            TreeFlavor::from_opcode(TreeFlavor::Offline.opcode()),
            Some(TreeFlavor::Offline)
        );
        assert_eq!(TreeFlavor::from_opcode("Properties"), None);
    }
}
