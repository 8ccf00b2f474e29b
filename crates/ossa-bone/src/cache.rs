use crate::{influence::InfluenceMap, BoneKeyError};
use ossa_math::*;
use ossa_scene::serialize::NodeRef;
use ossa_scene::{Frame, NodeHandle};

/// Skinning state of one scene node below a [`crate::BoneKey`]'s owner.
#[derive(Debug)]
pub struct Cache {
    node: NodeRef,
    inner_matrix: Mat4,
    frame_sign: Frame,
    influence: InfluenceMap,
}

impl Default for Cache {
    fn default() -> Self {
        Self {
            node: NodeRef::Null,
            inner_matrix: Mat4::IDENTITY,
            frame_sign: Frame::INVALID,
            influence: InfluenceMap::new(),
        }
    }
}

impl Cache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bound_to(node: NodeHandle) -> Self {
        Self {
            node: NodeRef::Bound(node),
            ..Self::default()
        }
    }

    pub(crate) fn from_parts(
        node: NodeRef,
        inner_matrix: Mat4,
        frame_sign: Frame,
        influence: InfluenceMap,
    ) -> Self {
        Self {
            node,
            inner_matrix,
            frame_sign,
            influence,
        }
    }

    /// The node this cache belongs to. `None` while unbound or unresolved.
    pub fn node(&self) -> Option<NodeHandle> {
        self.node.get()
    }

    pub(crate) fn node_ref(&self) -> &NodeRef {
        &self.node
    }

    pub(crate) fn node_ref_mut(&mut self) -> &mut NodeRef {
        &mut self.node
    }

    pub fn set_node(&mut self, node: NodeHandle) {
        self.node = NodeRef::Bound(node);
    }

    /// Mesh space to owner space.
    pub fn inner_matrix(&self) -> Mat4 {
        self.inner_matrix
    }

    pub fn set_inner_matrix(&mut self, matrix: Mat4) {
        self.inner_matrix = matrix;
    }

    /// Frame of the mesh key the weights were last requested for.
    pub fn frame_sign(&self) -> Frame {
        self.frame_sign
    }

    pub fn set_frame_sign(&mut self, frame: Frame) {
        self.frame_sign = frame;
    }

    pub fn influence(&self) -> &InfluenceMap {
        &self.influence
    }

    pub fn influence_mut(&mut self) -> &mut InfluenceMap {
        &mut self.influence
    }

    /// Whether the weights are complete and were made for the mesh key at `frame_sign`.
    pub fn is_valid_for(&self, frame_sign: Frame) -> Result<bool, BoneKeyError> {
        if !self.frame_sign.is_valid() || self.frame_sign != frame_sign {
            return Ok(false);
        }
        self.influence.is_computed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ossa_scene::ObjectTree;

    #[test]
    fn fresh_cache_is_never_valid() {
        let mut tree = ObjectTree::new();
        let node = tree.create_node(tree.root(), "layer").unwrap();

        let cache = Cache::bound_to(node);
        assert_eq!(cache.node(), Some(node));
        assert_eq!(cache.inner_matrix(), Mat4::IDENTITY);
        assert!(!cache.is_valid_for(Frame::INVALID).unwrap());
        assert!(!cache.is_valid_for(Frame::new(0)).unwrap());
        assert!(Cache::new().node().is_none());
    }

    #[test]
    fn validity_needs_matching_sign() {
        let mut cache = Cache::new();
        cache.set_frame_sign(Frame::new(4));
        // decoded maps count as computed
        let empty: &[u8] = &[0, 0, 0, 0];
        let mut input = ossa_scene::serialize::Deserializer::new(empty);
        *cache.influence_mut() = InfluenceMap::deserialize(&mut input).unwrap();

        assert!(cache.is_valid_for(Frame::new(4)).unwrap());
        assert!(!cache.is_valid_for(Frame::new(5)).unwrap());
    }
}
