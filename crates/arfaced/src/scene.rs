//! In-process scene graph acting as the overlay renderer.
//!
//! Keeps one node per attached overlay and queues attach/detach events for
//! the session output; the external AR runtime mirrors them into its scene.

use arface_core::{OverlayAssets, OverlayRenderer};
use serde::Serialize;
use std::collections::HashMap;

/// Tracked-face identity as delivered by the external tracker.
pub type FaceId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct NodeId(pub u64);

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SceneEvent {
    Attached {
        node: NodeId,
        face: FaceId,
        model: String,
        texture: String,
        shadow_caster: bool,
        shadow_receiver: bool,
    },
    Detached {
        node: NodeId,
        face: FaceId,
    },
}

/// A face-region overlay bound to the loaded model and texture.
#[derive(Debug)]
struct OverlayNode {
    face: FaceId,
    // Bound resources stay alive for as long as the node is attached.
    _assets: OverlayAssets,
}

#[derive(Debug, Default)]
pub struct SceneGraph {
    nodes: HashMap<NodeId, OverlayNode>,
    next_id: u64,
    events: Vec<SceneEvent>,
}

impl SceneGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Take all events queued since the last drain.
    pub fn drain_events(&mut self) -> Vec<SceneEvent> {
        std::mem::take(&mut self.events)
    }
}

impl OverlayRenderer<FaceId> for SceneGraph {
    type Handle = NodeId;

    fn attach(&mut self, face: &FaceId, assets: &OverlayAssets) -> NodeId {
        self.next_id += 1;
        let node = NodeId(self.next_id);

        // Face overlays receive shadows from the scene but never cast them.
        self.events.push(SceneEvent::Attached {
            node,
            face: *face,
            model: assets.model.source.display().to_string(),
            texture: assets.texture.source.display().to_string(),
            shadow_caster: false,
            shadow_receiver: true,
        });
        self.nodes.insert(
            node,
            OverlayNode {
                face: *face,
                _assets: assets.clone(),
            },
        );

        tracing::info!(face, node = node.0, "overlay attached");
        node
    }

    fn detach(&mut self, handle: NodeId) {
        match self.nodes.remove(&handle) {
            Some(node) => {
                self.events.push(SceneEvent::Detached {
                    node: handle,
                    face: node.face,
                });
                tracing::info!(face = node.face, node = handle.0, "overlay detached");
            }
            None => tracing::warn!(node = handle.0, "detach of unknown overlay node"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arface_core::assets::{FaceTexture, RenderModel};
    use std::path::PathBuf;
    use std::sync::Arc;

    fn assets() -> OverlayAssets {
        OverlayAssets {
            model: Arc::new(RenderModel {
                source: PathBuf::from("models/fox.glb"),
                bytes: Vec::new(),
            }),
            texture: Arc::new(FaceTexture {
                source: PathBuf::from("textures/freckles.png"),
                image: image::RgbaImage::new(1, 1),
            }),
        }
    }

    #[test]
    fn test_attach_detach_events() {
        let mut scene = SceneGraph::new();
        let node = scene.attach(&42, &assets());
        assert_eq!(scene.node_count(), 1);

        scene.detach(node);
        assert_eq!(scene.node_count(), 0);

        let events = scene.drain_events();
        assert_eq!(events.len(), 2);
        assert!(matches!(
            &events[0],
            SceneEvent::Attached { face: 42, shadow_caster: false, shadow_receiver: true, model, .. }
                if model == "models/fox.glb"
        ));
        assert_eq!(events[1], SceneEvent::Detached { node, face: 42 });
        assert!(scene.drain_events().is_empty());
    }

    #[test]
    fn test_node_ids_are_unique() {
        let mut scene = SceneGraph::new();
        let a = scene.attach(&1, &assets());
        scene.detach(a);
        let b = scene.attach(&1, &assets());
        assert_ne!(a, b);
    }

    #[test]
    fn test_detach_unknown_is_ignored() {
        let mut scene = SceneGraph::new();
        scene.detach(NodeId(99));
        assert!(scene.drain_events().is_empty());
    }

    #[test]
    fn test_event_json_shape() {
        let json = serde_json::to_value(SceneEvent::Detached { node: NodeId(3), face: 7 }).unwrap();
        assert_eq!(json, serde_json::json!({"event": "detached", "node": 3, "face": 7}));
    }
}
