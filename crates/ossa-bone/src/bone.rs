use ossa_math::*;
use ossa_scene::serialize::{
    DecodeError, Deserializer, EncodeError, IdResolver, NodeRef, Serializer,
};
use ossa_scene::NodeHandle;
use std::io::{Read, Write};

/// One bone of a 2D skeleton. Owns its children exclusively.
///
/// A bone sits at `local_pos` relative to its parent (rotated by the parent's
/// accumulated angle) and spans the segment from its parent's origin to its
/// own. `range` holds the inner/outer influence radius at the parent end
/// (`range[0]`) and at the bone's own end (`range[1]`).
#[derive(Debug, Clone, PartialEq)]
pub struct Bone {
    local_pos: Vec2,
    local_angle: f32,
    range: [Vec2; 2],
    bindings: Vec<NodeRef>,
    children: Vec<Bone>,
}

impl Default for Bone {
    fn default() -> Self {
        Self {
            local_pos: Vec2::ZERO,
            local_angle: 0.0,
            range: [Vec2::new(10.0, 20.0); 2],
            bindings: Vec::new(),
            children: Vec::new(),
        }
    }
}

impl Bone {
    pub fn new(local_pos: Vec2) -> Self {
        Self {
            local_pos,
            ..Self::default()
        }
    }

    pub fn with_angle(mut self, radians: f32) -> Self {
        self.local_angle = radians;
        self
    }

    pub fn with_range(mut self, root: Vec2, tip: Vec2) -> Self {
        self.range = [root, tip];
        self
    }

    pub fn local_pos(&self) -> Vec2 {
        self.local_pos
    }

    pub fn set_local_pos(&mut self, pos: Vec2) {
        self.local_pos = pos;
    }

    pub fn local_angle(&self) -> f32 {
        self.local_angle
    }

    pub fn set_local_angle(&mut self, radians: f32) {
        self.local_angle = radians;
    }

    pub fn range(&self) -> [Vec2; 2] {
        self.range
    }

    pub fn set_range(&mut self, root: Vec2, tip: Vec2) {
        self.range = [root, tip];
    }

    pub fn children(&self) -> &[Bone] {
        self.children.as_slice()
    }

    pub fn children_mut(&mut self) -> &mut Vec<Bone> {
        &mut self.children
    }

    pub fn push_child(&mut self, bone: Bone) -> &mut Bone {
        let index = self.children.len();
        self.children.push(bone);
        &mut self.children[index]
    }

    pub fn bindings(&self) -> &[NodeRef] {
        self.bindings.as_slice()
    }

    pub fn bind(&mut self, node: NodeHandle) {
        if !self.binds(node) {
            self.bindings.push(NodeRef::Bound(node));
        }
    }

    pub fn unbind(&mut self, node: NodeHandle) -> bool {
        let len = self.bindings.len();
        self.bindings.retain(|b| b.get() != Some(node));
        len != self.bindings.len()
    }

    /// Whether this bone influences `node`.
    pub fn binds(&self, node: NodeHandle) -> bool {
        self.bindings.iter().any(|b| b.get() == Some(node))
    }

    /// Pre-order walk of this bone and its descendants.
    pub fn iter(&self) -> BoneIter<'_> {
        BoneIter { stack: vec![self] }
    }

    fn serialize_fields<W: Write>(&self, out: &mut Serializer<W>) -> Result<(), EncodeError> {
        out.write(&self.local_pos);
        out.write_f32(self.local_angle);
        out.write(&self.range[0]);
        out.write(&self.range[1]);

        out.write_count(self.bindings.len())?;
        for binding in self.bindings.iter() {
            out.write_ref(binding)?;
        }
        Ok(())
    }

    fn deserialize_fields<R: Read>(input: &mut Deserializer<R>) -> Result<Self, DecodeError> {
        let local_pos = input.read();
        let local_angle = input.read_f32();
        let range = [input.read(), input.read()];

        let binding_count = input.read_i32();
        input.check_stream()?;
        if binding_count < 0 {
            return Err(input.errored("invalid binding count"));
        }

        let mut bindings = Vec::new();
        for _ in 0..binding_count {
            bindings.push(NodeRef::Pending(input.order_id()?));
        }

        Ok(Self {
            local_pos,
            local_angle,
            range,
            bindings,
            children: Vec::new(),
        })
    }

    fn resolve_references(&mut self, resolver: &IdResolver<'_>) -> Result<(), DecodeError> {
        for binding in self.bindings.iter_mut() {
            binding.resolve(resolver)?;
        }
        // dangling bindings carry no meaning
        self.bindings.retain(|b| b.is_set());

        for child in self.children.iter_mut() {
            child.resolve_references(resolver)?;
        }
        Ok(())
    }
}

pub struct BoneIter<'a> {
    stack: Vec<&'a Bone>,
}

impl<'a> Iterator for BoneIter<'a> {
    type Item = &'a Bone;

    fn next(&mut self) -> Option<Self::Item> {
        let bone = self.stack.pop()?;
        self.stack.extend(bone.children.iter().rev());
        Some(bone)
    }
}

/// Bone placed in skeleton space, as consumed by influence solvers.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct WorldBone {
    /// Pre-order index of the bone within its forest.
    pub index: u32,
    pub segment: Segment2,
    pub range: [Vec2; 2],
}

/// Forest of top-level bones.
/// Cloning always yields an independent deep copy.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoneTree {
    top_bones: Vec<Bone>,
}

impl BoneTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn top_bones(&self) -> &[Bone] {
        self.top_bones.as_slice()
    }

    pub fn top_bones_mut(&mut self) -> &mut Vec<Bone> {
        &mut self.top_bones
    }

    pub fn push(&mut self, bone: Bone) -> &mut Bone {
        let index = self.top_bones.len();
        self.top_bones.push(bone);
        &mut self.top_bones[index]
    }

    pub fn clear(&mut self) {
        self.top_bones.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.top_bones.is_empty()
    }

    pub fn bone_count(&self) -> usize {
        self.iter().count()
    }

    /// Pre-order walk over every bone of every top-level bone.
    pub fn iter(&self) -> BoneIter<'_> {
        BoneIter {
            stack: self.top_bones.iter().rev().collect(),
        }
    }

    /// Whether a binding still waits for [`BoneTree::resolve_references`].
    pub fn has_pending_references(&self) -> bool {
        self.iter()
            .any(|bone| bone.bindings.iter().any(|b| b.is_pending()))
    }

    /// Whether any bone of the forest binds `node`.
    pub fn is_bound(&self, node: NodeHandle) -> bool {
        self.top_bones
            .iter()
            .any(|top| top.iter().any(|bone| bone.binds(node)))
    }

    /// Every bone placed in skeleton space, in pre-order.
    pub fn world_bones(&self) -> Vec<WorldBone> {
        let mut out = Vec::new();
        for top in self.top_bones.iter() {
            Self::place(top, None, &mut out);
        }
        out
    }

    fn place(bone: &Bone, parent: Option<(Vec2, f32)>, out: &mut Vec<WorldBone>) {
        let (pos, angle) = match parent {
            Some((parent_pos, parent_angle)) => (
                parent_pos + rotate_2d(bone.local_pos, parent_angle),
                parent_angle + bone.local_angle,
            ),
            None => (bone.local_pos, bone.local_angle),
        };
        let from = parent.map(|(p, _)| p).unwrap_or(pos);

        out.push(WorldBone {
            index: out.len() as u32,
            segment: Segment2::new(from, pos),
            range: bone.range,
        });

        for child in bone.children.iter() {
            Self::place(child, Some((pos, angle)), out);
        }
    }

    pub fn serialize<W: Write>(&self, out: &mut Serializer<W>) -> Result<(), EncodeError> {
        out.write_count(self.top_bones.len())?;
        for bone in self.top_bones.iter() {
            Self::serialize_bone(out, bone)?;
        }
        out.check_stream()
    }

    fn serialize_bone<W: Write>(out: &mut Serializer<W>, bone: &Bone) -> Result<(), EncodeError> {
        out.write_count(bone.children.len())?;
        bone.serialize_fields(out)?;

        for child in bone.children.iter() {
            Self::serialize_bone(out, child)?;
        }
        out.check_stream()
    }

    /// Reads a forest. Nothing of a partially read forest survives an error.
    /// Bindings stay pending until [`BoneTree::resolve_references`].
    pub fn deserialize<R: Read>(input: &mut Deserializer<R>) -> Result<Self, DecodeError> {
        let top_bone_count = input.read_i32();
        input.check_stream()?;
        if top_bone_count < 0 {
            return Err(input.errored("invalid top bone count"));
        }

        let mut top_bones = Vec::new();
        for _ in 0..top_bone_count {
            top_bones.push(Self::deserialize_bone(input)?);
        }
        input.check_stream()?;
        Ok(Self { top_bones })
    }

    fn deserialize_bone<R: Read>(input: &mut Deserializer<R>) -> Result<Bone, DecodeError> {
        let child_count = input.read_i32();
        input.check_stream()?;
        if child_count < 0 {
            return Err(input.errored("invalid child count"));
        }

        let mut bone = Bone::deserialize_fields(input)?;
        for _ in 0..child_count {
            bone.children.push(Self::deserialize_bone(input)?);
        }
        input.check_stream()?;
        Ok(bone)
    }

    pub fn resolve_references(&mut self, resolver: &IdResolver<'_>) -> Result<(), DecodeError> {
        for bone in self.top_bones.iter_mut() {
            bone.resolve_references(resolver)?;
        }
        Ok(())
    }
}
