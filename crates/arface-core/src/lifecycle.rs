//! Tracked-face → overlay-node state machine.
//!
//! Each tracked face owns at most one overlay node. Nodes are created only
//! while the tracker reports `Tracking` and recognition succeeded, and are
//! destroyed on `Stopped`, on failed recognition, or when recognition is
//! switched off. The mapping is mutated only through `create`/`destroy`, so
//! every attach is paired with exactly one detach.

use crate::assets::OverlayAssets;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;

/// Tracking state reported by the external face tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingState {
    Tracking,
    Stopped,
    /// Anything else (e.g. paused). Never treated as `Stopped`.
    #[serde(other)]
    Other,
}

/// Draws overlay nodes on behalf of the lifecycle.
///
/// The renderer owns the drawable resource; the lifecycle only holds the handle.
pub trait OverlayRenderer<K> {
    type Handle;

    /// Attach a node for `face`, bound to the given model and texture.
    fn attach(&mut self, face: &K, assets: &OverlayAssets) -> Self::Handle;

    /// Detach and drop a previously attached node.
    fn detach(&mut self, handle: Self::Handle);
}

/// What a lifecycle step did to the overlay of one face.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    Created,
    Destroyed,
    Unchanged,
}

/// Why a node was destroyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseCause {
    Stopped,
    RecognitionFailed,
    RecognitionOff,
    Teardown,
}

pub struct TrackedFaceLifecycle<K, R: OverlayRenderer<K>> {
    renderer: R,
    nodes: HashMap<K, R::Handle>,
}

impl<K, R> TrackedFaceLifecycle<K, R>
where
    K: Hash + Eq + Clone + Debug,
    R: OverlayRenderer<K>,
{
    pub fn new(renderer: R) -> Self {
        Self {
            renderer,
            nodes: HashMap::new(),
        }
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    pub fn renderer_mut(&mut self) -> &mut R {
        &mut self.renderer
    }

    pub fn has_node(&self, face: &K) -> bool {
        self.nodes.contains_key(face)
    }

    /// Number of faces that currently have an overlay node.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Reconcile one face's overlay with this frame's tracker state and
    /// recognition result.
    pub fn reconcile(
        &mut self,
        face: &K,
        state: TrackingState,
        recognized: bool,
        assets: &OverlayAssets,
    ) -> Transition {
        if state == TrackingState::Stopped {
            return self.destroy(face, ReleaseCause::Stopped);
        }
        if !recognized {
            return self.destroy(face, ReleaseCause::RecognitionFailed);
        }
        if state == TrackingState::Tracking && !self.nodes.contains_key(face) {
            return self.create(face, assets);
        }
        Transition::Unchanged
    }

    /// Destroy the node for `face` because recognition was switched off.
    pub fn release(&mut self, face: &K) -> Transition {
        self.destroy(face, ReleaseCause::RecognitionOff)
    }

    /// Destroy every node. Returns how many were removed.
    pub fn release_all(&mut self, cause: ReleaseCause) -> usize {
        let faces: Vec<K> = self.nodes.keys().cloned().collect();
        faces
            .iter()
            .filter(|face| self.destroy(face, cause) == Transition::Destroyed)
            .count()
    }

    fn create(&mut self, face: &K, assets: &OverlayAssets) -> Transition {
        let handle = self.renderer.attach(face, assets);
        self.nodes.insert(face.clone(), handle);
        tracing::debug!(?face, nodes = self.nodes.len(), "overlay node created");
        Transition::Created
    }

    fn destroy(&mut self, face: &K, cause: ReleaseCause) -> Transition {
        match self.nodes.remove(face) {
            Some(handle) => {
                self.renderer.detach(handle);
                tracing::debug!(?face, ?cause, nodes = self.nodes.len(), "overlay node destroyed");
                Transition::Destroyed
            }
            None => Transition::Unchanged,
        }
    }
}
