use crate::objects::LayerMesh;
use ossa_math::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct Frame(i32);

impl Frame {
    /// Marker for "never computed".
    pub const INVALID: Frame = Frame(std::i32::MIN);

    pub const fn new(frame: i32) -> Self {
        Self(frame)
    }

    pub fn get(&self) -> i32 {
        self.0
    }

    pub fn set(&mut self, frame: i32) {
        self.0 = frame;
    }

    pub fn is_valid(&self) -> bool {
        *self != Self::INVALID
    }
}

impl Default for Frame {
    fn default() -> Self {
        Self(0)
    }
}

impl std::fmt::Display for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_valid() {
            write!(f, "{}", self.0)
        } else {
            write!(f, "invalid")
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct TimeInfo {
    pub frame: Frame,
    pub fps: u32,
    pub frame_max: i32,
    pub looping: bool,
}

impl Default for TimeInfo {
    fn default() -> Self {
        Self {
            frame: Frame::default(),
            fps: 24,
            frame_max: 60,
            looping: false,
        }
    }
}

/// Frame-keyed animation data of one scene node.
/// A lookup at frame `f` yields the key at `f` or the closest one before it.
#[derive(Debug, Clone, Default)]
pub struct TimeLine {
    meshes: BTreeMap<i32, Arc<LayerMesh>>,
    moves: BTreeMap<i32, Vec3>,
}

impl TimeLine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `mesh` as the key at `frame`. The mesh's frame sign becomes `frame`.
    pub fn set_mesh_key(&mut self, frame: Frame, mut mesh: LayerMesh) {
        mesh.set_frame_sign(frame);
        self.meshes.insert(frame.get(), Arc::new(mesh));
    }

    pub fn remove_mesh_key(&mut self, frame: Frame) -> bool {
        self.meshes.remove(&frame.get()).is_some()
    }

    pub fn mesh_at(&self, frame: Frame) -> Option<&Arc<LayerMesh>> {
        self.meshes
            .range(..=frame.get())
            .next_back()
            .map(|(_, mesh)| mesh)
    }

    pub fn set_move_key(&mut self, frame: Frame, offset: Vec3) {
        self.moves.insert(frame.get(), offset);
    }

    pub fn remove_move_key(&mut self, frame: Frame) -> bool {
        self.moves.remove(&frame.get()).is_some()
    }

    pub fn move_at(&self, frame: Frame) -> Vec3 {
        self.moves
            .range(..=frame.get())
            .next_back()
            .map(|(_, offset)| *offset)
            .unwrap_or(Vec3::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_uses_previous_key() {
        let mut timeline = TimeLine::new();
        timeline.set_mesh_key(Frame::new(5), LayerMesh::new(vec![Vec2::ZERO]));
        timeline.set_mesh_key(
            Frame::new(10),
            LayerMesh::new(vec![Vec2::ZERO, Vec2::ONE]),
        );

        assert!(timeline.mesh_at(Frame::new(4)).is_none());
        assert_eq!(timeline.mesh_at(Frame::new(5)).unwrap().vertex_count(), 1);
        assert_eq!(timeline.mesh_at(Frame::new(9)).unwrap().vertex_count(), 1);

        let mesh = timeline.mesh_at(Frame::new(30)).unwrap();
        assert_eq!(mesh.vertex_count(), 2);
        assert_eq!(mesh.frame_sign(), Frame::new(10));
    }

    #[test]
    fn moves_default_to_zero() {
        let mut timeline = TimeLine::new();
        assert_eq!(timeline.move_at(Frame::new(3)), Vec3::ZERO);

        timeline.set_move_key(Frame::new(2), Vec3::new(1.0, 2.0, 0.0));
        assert_eq!(timeline.move_at(Frame::new(1)), Vec3::ZERO);
        assert_eq!(timeline.move_at(Frame::new(3)), Vec3::new(1.0, 2.0, 0.0));

        assert!(timeline.remove_move_key(Frame::new(2)));
        assert_eq!(timeline.move_at(Frame::new(3)), Vec3::ZERO);
    }

    #[test]
    fn invalid_frame_marker() {
        assert!(!Frame::INVALID.is_valid());
        assert!(Frame::default().is_valid());
        assert_eq!(format!("{}", Frame::INVALID), "invalid");
    }
}
