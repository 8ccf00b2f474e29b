use crate::{objects::LayerMesh, timeline::*, SceneError};
use ossa_math::*;
use ossa_utils::collections::{SlotHandle, SlotStorage};
use std::sync::Arc;

/// Identity of a scene node. Resolves through its [`ObjectTree`] and reports
/// absence instead of dangling once the node is removed.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct NodeHandle(SlotHandle);

impl std::fmt::Display for NodeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "node {}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct ObjectNode {
    pub name: String,
    parent: Option<NodeHandle>,
    children: Vec<NodeHandle>,
    pub(crate) translation: Vec3,
    pub(crate) rotation: f32,
    pub(crate) scale: Vec2,
    pub(crate) center_offset: Vec3,
    pub timeline: TimeLine,
}

impl ObjectNode {
    fn new(name: String, parent: Option<NodeHandle>) -> Self {
        Self {
            name,
            parent,
            children: Vec::new(),
            translation: Vec3::ZERO,
            rotation: 0.0,
            scale: Vec2::ONE,
            center_offset: Vec3::ZERO,
            timeline: TimeLine::new(),
        }
    }

    pub fn parent(&self) -> Option<NodeHandle> {
        self.parent
    }

    pub fn children(&self) -> &[NodeHandle] {
        self.children.as_slice()
    }

    pub fn set_translation<T: Into<[f32; 3]>>(&mut self, t: T) {
        self.translation = Vec3::from(t.into());
    }

    /// Rotation in radians around the Z axis.
    pub fn set_rotation(&mut self, radians: f32) {
        self.rotation = radians;
    }

    pub fn set_scale<T: Into<[f32; 2]>>(&mut self, s: T) {
        self.scale = Vec2::from(s.into());
    }

    /// Origin of the layer's image relative to the node's local origin.
    pub fn set_center_offset<T: Into<[f32; 3]>>(&mut self, offset: T) {
        self.center_offset = Vec3::from(offset.into());
    }

    pub fn center_offset(&self) -> Vec3 {
        self.center_offset
    }

    pub fn local_matrix(&self, frame: Frame) -> Mat4 {
        let translation = self.translation + self.timeline.move_at(frame);
        trs_2d(translation, self.rotation, self.scale)
    }
}

/// Project-wide scene hierarchy.
#[derive(Debug, Clone)]
pub struct ObjectTree {
    nodes: SlotStorage<ObjectNode>,
    root: NodeHandle,
}

impl Default for ObjectTree {
    fn default() -> Self {
        let mut nodes = SlotStorage::new();
        let root = NodeHandle(nodes.push(ObjectNode::new(String::from("root"), None)));
        Self { nodes, root }
    }
}

impl ObjectTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn root(&self) -> NodeHandle {
        self.root
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn create_node<S: Into<String>>(
        &mut self,
        parent: NodeHandle,
        name: S,
    ) -> Result<NodeHandle, SceneError> {
        if !self.contains(parent) {
            return Err(SceneError::InvalidNode(parent));
        }

        let handle = NodeHandle(
            self.nodes
                .push(ObjectNode::new(name.into(), Some(parent))),
        );
        self.nodes[parent.0].children.push(handle);
        Ok(handle)
    }

    /// Removes `handle` and its whole subtree.
    pub fn remove_node(&mut self, handle: NodeHandle) -> Result<(), SceneError> {
        if handle == self.root {
            return Err(SceneError::RootRemoval);
        }

        let parent = match self.get(handle) {
            Some(node) => node.parent,
            None => return Err(SceneError::InvalidNode(handle)),
        };

        if let Some(parent) = parent.and_then(|p| self.nodes.get_mut(p.0)) {
            parent.children.retain(|c| *c != handle);
        }

        let subtree: Vec<NodeHandle> = self.iter_depth_first(handle).collect();
        for node in subtree {
            self.nodes.erase(node.0);
        }
        Ok(())
    }

    pub fn contains(&self, handle: NodeHandle) -> bool {
        self.nodes.contains(handle.0)
    }

    pub fn get(&self, handle: NodeHandle) -> Option<&ObjectNode> {
        self.nodes.get(handle.0)
    }

    pub fn get_mut(&mut self, handle: NodeHandle) -> Option<&mut ObjectNode> {
        self.nodes.get_mut(handle.0)
    }

    pub fn children(&self, handle: NodeHandle) -> &[NodeHandle] {
        match self.get(handle) {
            Some(node) => node.children(),
            None => &[],
        }
    }

    pub fn parent(&self, handle: NodeHandle) -> Option<NodeHandle> {
        self.get(handle).and_then(|n| n.parent)
    }

    /// Pre-order walk of the subtree at `root`, children in insertion order.
    pub fn iter_depth_first(&self, root: NodeHandle) -> DepthFirst<'_> {
        let stack = if self.contains(root) {
            vec![root]
        } else {
            Vec::new()
        };
        DepthFirst { tree: self, stack }
    }

    /// Whether `right` is `left` or one of its descendants.
    pub fn left_contains_right(&self, left: NodeHandle, right: NodeHandle) -> bool {
        if !self.contains(left) {
            return false;
        }

        let mut current = Some(right);
        while let Some(node) = current {
            if node == left {
                return true;
            }
            current = self.parent(node);
        }
        false
    }

    /// Mesh the node displays at `time`, if any.
    pub fn area_mesh(&self, handle: NodeHandle, time: &TimeInfo) -> Option<Arc<LayerMesh>> {
        self.get(handle)
            .and_then(|node| node.timeline.mesh_at(time.frame))
            .cloned()
    }

    /// Transform of `handle` expressed in the space of `owner`.
    /// Composes the local matrices below `owner` down to and including `handle`;
    /// when `owner` is not an ancestor this is the world transform.
    pub fn relative_matrix(&self, handle: NodeHandle, time: &TimeInfo, owner: NodeHandle) -> Mat4 {
        let mut matrix = Mat4::IDENTITY;
        let mut current = Some(handle);
        while let Some(node) = current {
            if node == owner {
                break;
            }
            let object = match self.get(node) {
                Some(object) => object,
                None => break,
            };
            matrix = object.local_matrix(time.frame) * matrix;
            current = object.parent;
        }
        matrix
    }

    pub fn center_offset_3d(&self, handle: NodeHandle) -> Vec3 {
        self.get(handle)
            .map(|node| node.center_offset)
            .unwrap_or(Vec3::ZERO)
    }
}

impl std::ops::Index<NodeHandle> for ObjectTree {
    type Output = ObjectNode;
    fn index(&self, index: NodeHandle) -> &Self::Output {
        &self.nodes[index.0]
    }
}

impl std::ops::IndexMut<NodeHandle> for ObjectTree {
    fn index_mut(&mut self, index: NodeHandle) -> &mut Self::Output {
        &mut self.nodes[index.0]
    }
}

pub struct DepthFirst<'a> {
    tree: &'a ObjectTree,
    stack: Vec<NodeHandle>,
}

impl<'a> Iterator for DepthFirst<'a> {
    type Item = NodeHandle;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.stack.pop()?;
        let children = self.tree.children(current);
        self.stack.extend(children.iter().rev());
        Some(current)
    }
}
