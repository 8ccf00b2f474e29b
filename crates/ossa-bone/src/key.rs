use crate::{
    bone::BoneTree,
    cache::Cache,
    influence::{CapsuleSolver, InfluenceContext, InfluenceMap, InfluenceSolver},
    BoneKeyError,
};
use bitvec::prelude::*;
use ossa_math::*;
use ossa_scene::serialize::{DecodeError, Deserializer, IdResolver, NodeRef, Serializer};
use ossa_scene::{Frame, NodeHandle, Project, SceneError};
use ossa_utils::{log, Timer};
use std::collections::HashSet;
use std::io::{Read, Write};
use std::sync::Arc;

/// A skeleton key on a node's timeline.
///
/// Owns the bone forest and one [`Cache`] per mesh-carrying node below its
/// owner node. Caches are rebuilt with [`BoneKey::reset_caches`], refreshed
/// with [`BoneKey::update_caches`] and computed on the project's worker pool.
#[derive(Debug)]
pub struct BoneKey {
    frame: Frame,
    data: Arc<BoneTree>,
    caches: Vec<Box<Cache>>,
    cache_owner: NodeRef,
    solver: Arc<dyn InfluenceSolver>,
}

impl Default for BoneKey {
    fn default() -> Self {
        Self::new(Frame::default())
    }
}

impl BoneKey {
    pub fn new(frame: Frame) -> Self {
        Self {
            frame,
            data: Arc::new(BoneTree::new()),
            caches: Vec::new(),
            cache_owner: NodeRef::Null,
            solver: Arc::new(CapsuleSolver),
        }
    }

    pub fn with_solver<S: InfluenceSolver + 'static>(mut self, solver: S) -> Self {
        self.solver = Arc::new(solver);
        self
    }

    /// Frame this key sits on. Meshes are looked up at this frame.
    pub fn frame(&self) -> Frame {
        self.frame
    }

    pub fn set_frame(&mut self, frame: Frame) {
        self.frame = frame;
    }

    pub fn data(&self) -> &BoneTree {
        &self.data
    }

    /// Bones for editing. Jobs still in flight keep the bones they were given.
    pub fn data_mut(&mut self) -> &mut BoneTree {
        Arc::make_mut(&mut self.data)
    }

    pub fn set_data(&mut self, data: BoneTree) {
        self.data = Arc::new(data);
    }

    pub fn cache_owner(&self) -> Option<NodeHandle> {
        self.cache_owner.get()
    }

    pub fn caches(&self) -> impl Iterator<Item = &Cache> {
        self.caches.iter().map(|c| c.as_ref())
    }

    pub fn cache_count(&self) -> usize {
        self.caches.len()
    }

    fn cache_index(&self, node: NodeHandle) -> Option<usize> {
        self.caches.iter().position(|c| c.node() == Some(node))
    }

    pub fn find_cache(&self, node: NodeHandle) -> Option<&Cache> {
        self.cache_index(node).map(|i| self.caches[i].as_ref())
    }

    pub fn find_cache_mut(&mut self, node: NodeHandle) -> Option<&mut Cache> {
        let index = self.cache_index(node)?;
        Some(self.caches[index].as_mut())
    }

    /// Takes the cache of `node` out of the key.
    pub fn pop_cache(&mut self, node: NodeHandle) -> Option<Box<Cache>> {
        let index = self.cache_index(node)?;
        Some(self.caches.remove(index))
    }

    pub fn destroy_caches(&mut self) {
        self.caches.clear();
        self.cache_owner.reset();
    }

    /// Rebuilds the cache set for the subtree of `owner` and recomputes it.
    ///
    /// Nodes showing a mesh with at least one vertex at this key's frame keep
    /// their existing cache or get a new one; every other cache is dropped.
    pub fn reset_caches(&mut self, project: &Project, owner: NodeHandle) -> Result<(), BoneKeyError> {
        let mut time = project.current_time_info();
        time.frame = self.frame;

        let mut next = Vec::new();
        let mut kept = 0;
        {
            let tree = project.read_tree()?;
            if !tree.contains(owner) {
                return Err(SceneError::InvalidNode(owner).into());
            }

            for node in tree.iter_depth_first(owner) {
                let eligible = tree
                    .area_mesh(node, &time)
                    .map(|mesh| mesh.vertex_count() > 0)
                    .unwrap_or(false);
                if !eligible {
                    log::trace!("{} has no mesh at frame {}", node, time.frame);
                    continue;
                }

                let cache = match self.pop_cache(node) {
                    Some(cache) => {
                        kept += 1;
                        cache
                    }
                    None => Box::new(Cache::bound_to(node)),
                };
                next.push(cache);
            }
        }

        log::debug!(
            "bone key caches: {} kept, {} created, {} destroyed",
            kept,
            next.len() - kept,
            self.caches.len()
        );

        self.destroy_caches();
        self.caches = next;
        self.cache_owner = NodeRef::Bound(owner);

        let targets: Vec<usize> = (0..self.caches.len()).collect();
        self.recompute(project, &targets)
    }

    /// Recomputes the existing caches of every node below `roots`.
    /// Roots outside the subtree of `owner` are ignored and no cache is created.
    pub fn update_caches(
        &mut self,
        project: &Project,
        owner: NodeHandle,
        roots: &[NodeHandle],
    ) -> Result<(), BoneKeyError> {
        debug_assert!(
            self.cache_owner.get().map_or(true, |current| current == owner),
            "bone key caches are owned by another node"
        );

        let targets = {
            let tree = project.read_tree()?;
            let mut picked: BitVec = BitVec::new();
            picked.resize(self.caches.len(), false);

            let mut targets = Vec::new();
            for root in roots.iter().copied() {
                if !tree.left_contains_right(owner, root) {
                    log::debug!("{} is not below the bone key owner {}", root, owner);
                    continue;
                }

                for node in tree.iter_depth_first(root) {
                    if let Some(index) = self.cache_index(node) {
                        if !picked[index] {
                            picked.set(index, true);
                            targets.push(index);
                        }
                    }
                }
            }
            targets
        };

        self.cache_owner = NodeRef::Bound(owner);
        self.recompute(project, &targets)
    }

    /// Recomputes every cache of the key.
    pub fn update_all_caches(&mut self, project: &Project) -> Result<(), BoneKeyError> {
        let targets: Vec<usize> = (0..self.caches.len()).collect();
        self.recompute(project, &targets)
    }

    fn recompute(&mut self, project: &Project, targets: &[usize]) -> Result<(), BoneKeyError> {
        if targets.is_empty() {
            return Ok(());
        }

        let owner = match self.cache_owner.get() {
            Some(owner) => owner,
            None => {
                debug_assert!(false, "bone key caches have no owner");
                return Ok(());
            }
        };

        let timer = Timer::new();
        let mut time = project.current_time_info();
        time.frame = self.frame;

        let context = InfluenceContext {
            pool: project.paralleler(),
            solver: self.solver.clone(),
        };

        {
            let tree = project.write_tree()?;
            for index in targets.iter().copied() {
                let cache = &mut self.caches[index];
                let node = match cache.node() {
                    Some(node) => node,
                    None => continue,
                };

                let mesh = match tree.area_mesh(node, &time) {
                    Some(mesh) => mesh,
                    None => {
                        log::trace!("{} lost its mesh, keeping previous weights", node);
                        continue;
                    }
                };
                cache.set_frame_sign(mesh.frame_sign());
                if mesh.vertex_count() == 0 {
                    continue;
                }

                let inner_matrix = tree
                    .relative_matrix(node, &time, owner)
                    .translated(-tree.center_offset_3d(node));
                cache.set_inner_matrix(inner_matrix);

                let influence = cache.influence_mut();
                influence.allocate(mesh.vertex_count(), false)?;
                influence.write_async(&context, &self.data, inner_matrix, &mesh)?;
            }
        }

        log::trace!("waking workers");
        project.paralleler().wake_all();
        log::debug!(
            "requested {} bone caches in {:.3} ms",
            targets.len(),
            timer.elapsed_in_millis()
        );
        Ok(())
    }

    pub fn serialize<W: Write>(&self, out: &mut Serializer<W>) -> Result<(), BoneKeyError> {
        self.data.serialize(out)?;

        out.write_ref(&self.cache_owner)?;
        out.write_count(self.caches.len())?;
        for cache in self.caches.iter() {
            out.write_ref(cache.node_ref())?;
            out.write(&cache.inner_matrix());
            out.write(&cache.frame_sign());
            cache.influence().serialize(out)?;
        }

        Ok(out.check_stream()?)
    }

    /// Replaces the key's bones and caches with the ones in `input`.
    ///
    /// Node references stay pending until [`BoneKey::resolve_references`].
    /// On failure the key is left empty.
    pub fn deserialize<R: Read>(&mut self, input: &mut Deserializer<R>) -> Result<(), BoneKeyError> {
        self.data = Arc::new(BoneTree::new());
        self.destroy_caches();

        input.push_log_scope("BoneKey");
        let result = self.deserialize_body(input);
        input.pop_log_scope();

        if result.is_err() {
            self.data = Arc::new(BoneTree::new());
            self.destroy_caches();
        }
        result
    }

    fn deserialize_body<R: Read>(&mut self, input: &mut Deserializer<R>) -> Result<(), BoneKeyError> {
        let data = BoneTree::deserialize(input)?;
        let owner = input.order_id()?;

        let cache_count = input.read_i32();
        input.check_stream()?;
        if cache_count < 0 {
            return Err(input.errored("invalid cache count").into());
        }

        let mut caches = Vec::new();
        for _ in 0..cache_count {
            let node = NodeRef::Pending(input.order_id()?);
            let inner_matrix: Mat4 = input.read();
            let frame_sign: Frame = input.read();
            let influence = InfluenceMap::deserialize(input)?;
            caches.push(Box::new(Cache::from_parts(
                node,
                inner_matrix,
                frame_sign,
                influence,
            )));
        }
        input.check_stream()?;

        self.data = Arc::new(data);
        self.cache_owner = NodeRef::Pending(owner);
        self.caches = caches;
        Ok(())
    }

    /// Binds the pending node references left by [`BoneKey::deserialize`].
    /// Caches whose node id was null are dropped. On failure the key is left empty.
    pub fn resolve_references(&mut self, resolver: &IdResolver<'_>) -> Result<(), BoneKeyError> {
        let result = self.resolve_body(resolver);
        if result.is_err() {
            self.data = Arc::new(BoneTree::new());
            self.destroy_caches();
        }
        result
    }

    fn resolve_body(&mut self, resolver: &IdResolver<'_>) -> Result<(), BoneKeyError> {
        Arc::make_mut(&mut self.data).resolve_references(resolver)?;
        self.cache_owner.resolve(resolver)?;

        let mut bound = HashSet::with_capacity(self.caches.len());
        for cache in self.caches.iter_mut() {
            cache.node_ref_mut().resolve(resolver)?;
            if let Some(node) = cache.node() {
                if !bound.insert(node) {
                    let message = format!("{} has more than one cache", node);
                    log::error!("[BoneKey] {}", message);
                    return Err(DecodeError::Format {
                        scope: String::from("BoneKey"),
                        message,
                    }
                    .into());
                }
            }
        }
        self.caches.retain(|c| c.node().is_some());

        debug_assert!(!self.has_pending_references());
        Ok(())
    }

    /// Whether a node reference still waits for [`BoneKey::resolve_references`].
    pub fn has_pending_references(&self) -> bool {
        self.cache_owner.is_pending()
            || self.caches.iter().any(|c| c.node_ref().is_pending())
            || self.data.has_pending_references()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bone::Bone;
    use ossa_scene::serialize::{EncodeError, IdTable, NULL_ID};
    use ossa_scene::{LayerMesh, ObjectTree, ProjectSettings};

    struct Scene {
        project: Project,
        owner: NodeHandle,
        arm: NodeHandle,
        hand: NodeHandle,
        leg: NodeHandle,
        outsider: NodeHandle,
    }

    fn scene() -> Scene {
        let mut tree = ObjectTree::new();
        let owner = tree.create_node(tree.root(), "body").unwrap();
        let arm = tree.create_node(owner, "arm").unwrap();
        let hand = tree.create_node(arm, "hand").unwrap();
        let leg = tree.create_node(owner, "leg").unwrap();
        let outsider = tree.create_node(tree.root(), "prop").unwrap();

        for node in [arm, hand, leg, outsider].iter().copied() {
            tree[node]
                .timeline
                .set_mesh_key(Frame::new(0), LayerMesh::grid(Vec2::ZERO, 2, 2, 4.0));
        }
        tree[arm].set_translation([10.0, 0.0, 0.0]);
        tree[hand].set_center_offset([2.0, 2.0, 0.0]);

        let settings = ProjectSettings::default().with_worker_threads(2);
        Scene {
            project: Project::with_tree(settings, tree),
            owner,
            arm,
            hand,
            leg,
            outsider,
        }
    }

    fn key() -> BoneKey {
        let mut key = BoneKey::new(Frame::new(0));
        let top = key.data_mut().push(
            Bone::new(Vec2::ZERO).with_range(Vec2::new(20.0, 40.0), Vec2::new(20.0, 40.0)),
        );
        top.push_child(Bone::new(Vec2::new(10.0, 0.0)));
        key
    }

    fn cache_ptr(key: &BoneKey, node: NodeHandle) -> *const Cache {
        key.find_cache(node).unwrap() as *const Cache
    }

    #[test]
    fn reset_covers_meshes_below_owner() {
        let s = scene();
        let mut key = key();
        key.reset_caches(&s.project, s.owner).unwrap();
        s.project.paralleler().wait_idle();

        assert_eq!(key.cache_owner(), Some(s.owner));
        assert_eq!(key.cache_count(), 3);
        assert!(key.find_cache(s.owner).is_none());
        assert!(key.find_cache(s.outsider).is_none());

        let cache = key.find_cache(s.arm).unwrap();
        assert_eq!(cache.frame_sign(), Frame::new(0));
        assert!(cache.is_valid_for(Frame::new(0)).unwrap());
        assert_eq!(cache.influence().vertex_count().unwrap(), 4);
        assert!(!cache.influence().vertex(0).unwrap().is_empty());
    }

    #[test]
    fn inner_matrix_is_relative_to_owner() {
        let s = scene();
        let mut key = key();
        s.project.write_tree().unwrap()[s.owner].set_translation([100.0, 0.0, 0.0]);
        key.reset_caches(&s.project, s.owner).unwrap();
        s.project.paralleler().wait_idle();

        let arm = key.find_cache(s.arm).unwrap().inner_matrix();
        let p = arm.transform_point3(Vec3::ZERO);
        assert!((p - Vec3::new(10.0, 0.0, 0.0)).length() < 1e-5);

        let hand = key.find_cache(s.hand).unwrap().inner_matrix();
        let p = hand.transform_point3(Vec3::ZERO);
        assert!((p - Vec3::new(8.0, -2.0, 0.0)).length() < 1e-5);
    }

    #[test]
    fn reset_prunes_and_reuses() {
        let s = scene();
        let mut key = key();
        key.reset_caches(&s.project, s.owner).unwrap();
        let arm = cache_ptr(&key, s.arm);
        let hand = cache_ptr(&key, s.hand);

        {
            let mut tree = s.project.write_tree().unwrap();
            tree[s.leg].timeline.set_mesh_key(Frame::new(0), LayerMesh::default());
        }
        key.reset_caches(&s.project, s.owner).unwrap();
        s.project.paralleler().wait_idle();

        assert_eq!(key.cache_count(), 2);
        assert!(key.find_cache(s.leg).is_none());
        assert!(std::ptr::eq(arm, cache_ptr(&key, s.arm)));
        assert!(std::ptr::eq(hand, cache_ptr(&key, s.hand)));
    }

    #[test]
    fn removed_nodes_lose_their_cache() {
        let s = scene();
        let mut key = key();
        key.reset_caches(&s.project, s.owner).unwrap();

        s.project.write_tree().unwrap().remove_node(s.arm).unwrap();
        key.reset_caches(&s.project, s.owner).unwrap();
        s.project.paralleler().wait_idle();

        assert_eq!(key.cache_count(), 1);
        assert!(key.find_cache(s.leg).is_some());
        assert!(key.caches().all(|c| c.node() != Some(s.hand)));
    }

    #[test]
    fn reset_with_unknown_owner_fails() {
        let s = scene();
        let mut key = key();
        s.project.write_tree().unwrap().remove_node(s.owner).unwrap();
        assert!(matches!(
            key.reset_caches(&s.project, s.owner),
            Err(BoneKeyError::Scene(SceneError::InvalidNode(_)))
        ));
    }

    #[test]
    fn targeted_update_stays_in_scope() {
        let s = scene();
        let mut key = key();
        key.reset_caches(&s.project, s.owner).unwrap();
        s.project.paralleler().wait_idle();

        {
            let mut tree = s.project.write_tree().unwrap();
            for node in [s.arm, s.hand, s.leg, s.outsider].iter().copied() {
                tree[node]
                    .timeline
                    .set_mesh_key(Frame::new(0), LayerMesh::grid(Vec2::ZERO, 3, 3, 1.0));
            }
        }

        key.update_caches(&s.project, s.owner, &[s.arm, s.arm, s.outsider])
            .unwrap();
        s.project.paralleler().wait_idle();

        let count = |node| key.find_cache(node).unwrap().influence().vertex_count().unwrap();
        assert_eq!(count(s.arm), 9);
        assert_eq!(count(s.hand), 9);
        assert_eq!(count(s.leg), 4);
        assert!(key.find_cache(s.outsider).is_none());
        assert_eq!(key.cache_count(), 3);
    }

    #[test]
    fn missing_mesh_keeps_previous_values() {
        let s = scene();
        let mut key = key();
        key.reset_caches(&s.project, s.owner).unwrap();
        s.project.paralleler().wait_idle();
        let before = key.find_cache(s.leg).unwrap().inner_matrix();

        {
            let mut tree = s.project.write_tree().unwrap();
            tree[s.leg].timeline.remove_mesh_key(Frame::new(0));
            tree[s.leg].set_translation([50.0, 0.0, 0.0]);
        }
        key.update_caches(&s.project, s.owner, &[s.leg]).unwrap();
        s.project.paralleler().wait_idle();

        let cache = key.find_cache(s.leg).unwrap();
        assert_eq!(cache.inner_matrix(), before);
        assert_eq!(cache.frame_sign(), Frame::new(0));
    }

    #[test]
    fn pop_and_destroy() {
        let s = scene();
        let mut key = key();
        key.reset_caches(&s.project, s.owner).unwrap();

        let popped = key.pop_cache(s.leg).unwrap();
        assert_eq!(popped.node(), Some(s.leg));
        assert!(key.find_cache(s.leg).is_none());
        assert!(key.pop_cache(s.leg).is_none());

        key.destroy_caches();
        assert_eq!(key.cache_count(), 0);
        assert!(key.cache_owner().is_none());
        s.project.paralleler().wait_idle();
    }

    #[test]
    fn key_frame_overrides_current_time() {
        let s = scene();
        {
            let mut tree = s.project.write_tree().unwrap();
            tree[s.leg]
                .timeline
                .set_mesh_key(Frame::new(30), LayerMesh::default());
        }
        s.project.set_current_frame(Frame::new(40));

        let mut key = key();
        key.reset_caches(&s.project, s.owner).unwrap();
        assert!(key.find_cache(s.leg).is_some());

        key.set_frame(Frame::new(35));
        key.reset_caches(&s.project, s.owner).unwrap();
        assert!(key.find_cache(s.leg).is_none());
        s.project.paralleler().wait_idle();
    }

    #[test]
    fn stream_round_trip() {
        let s = scene();
        let mut key = key();
        key.data_mut().top_bones_mut()[0].bind(s.arm);
        key.reset_caches(&s.project, s.owner).unwrap();
        s.project.paralleler().wait_idle();

        let tree = s.project.read_tree().unwrap();
        let ids = IdTable::from_tree(&tree);
        let mut out = Serializer::new(Vec::new(), &ids);
        key.serialize(&mut out).unwrap();
        let bytes = out.into_inner();

        let mut restored = BoneKey::default();
        let mut input = Deserializer::new(bytes.as_slice());
        restored.deserialize(&mut input).unwrap();
        assert!(restored.cache_owner().is_none());
        assert!(!restored.data().is_bound(s.arm));
        assert!(restored.has_pending_references());

        // unresolved references must not be written back as null
        let mut out = Serializer::new(Vec::new(), &ids);
        assert!(matches!(
            restored.serialize(&mut out),
            Err(BoneKeyError::Encode(EncodeError::PendingReference(_)))
        ));

        let resolver = input.finish(&ids).unwrap();
        restored.resolve_references(&resolver).unwrap();
        assert!(!restored.has_pending_references());

        assert_eq!(restored.data(), key.data());
        assert!(restored.data().is_bound(s.arm));
        assert_eq!(restored.cache_owner(), Some(s.owner));
        assert_eq!(restored.cache_count(), key.cache_count());
        for cache in key.caches() {
            let node = cache.node().unwrap();
            let other = restored.find_cache(node).unwrap();
            assert_eq!(other.inner_matrix(), cache.inner_matrix());
            assert_eq!(other.frame_sign(), cache.frame_sign());
            for i in 0..cache.influence().vertex_count().unwrap() {
                assert_eq!(
                    other.influence().vertex(i).unwrap(),
                    cache.influence().vertex(i).unwrap()
                );
            }
        }
    }

    #[test]
    fn negative_top_bone_count_is_rejected() {
        let ids = IdTable::default();
        let mut out = Serializer::new(Vec::new(), &ids);
        out.write_i32(-1);
        let bytes = out.into_inner();

        let mut key = key();
        let mut input = Deserializer::new(bytes.as_slice());
        match key.deserialize(&mut input) {
            Err(BoneKeyError::Decode(DecodeError::Format { scope, message })) => {
                assert_eq!(scope, "BoneKey");
                assert_eq!(message, "invalid top bone count");
            }
            other => panic!("unexpected result {:?}", other),
        }
        assert!(key.data().is_empty());
        assert_eq!(key.cache_count(), 0);
    }

    #[test]
    fn negative_cache_count_is_rejected() {
        let ids = IdTable::default();
        let mut out = Serializer::new(Vec::new(), &ids);
        out.write_i32(0);
        out.write_i32(NULL_ID);
        out.write_i32(-1);
        let bytes = out.into_inner();

        let mut key = key();
        let mut input = Deserializer::new(bytes.as_slice());
        match key.deserialize(&mut input) {
            Err(BoneKeyError::Decode(DecodeError::Format { scope, message })) => {
                assert_eq!(scope, "BoneKey");
                assert_eq!(message, "invalid cache count");
            }
            other => panic!("unexpected result {:?}", other),
        }
        assert!(key.data().is_empty());
        assert_eq!(key.cache_count(), 0);
    }

    #[test]
    fn duplicate_cache_nodes_fail_whole_key() {
        let mut tree = ObjectTree::new();
        let layer = tree.create_node(tree.root(), "layer").unwrap();
        let ids = IdTable::from_tree(&tree);

        let mut out = Serializer::new(Vec::new(), &ids);
        out.write_i32(0);
        out.write_id(Some(tree.root()));
        out.write_i32(2);
        for _ in 0..2 {
            out.write_id(Some(layer));
            out.write(&Mat4::IDENTITY);
            out.write(&Frame::new(0));
            out.write_i32(0);
        }
        let bytes = out.into_inner();

        let mut key = BoneKey::default();
        let mut input = Deserializer::new(bytes.as_slice());
        key.deserialize(&mut input).unwrap();
        assert_eq!(key.cache_count(), 2);

        let resolver = input.finish(&ids).unwrap();
        match key.resolve_references(&resolver) {
            Err(BoneKeyError::Decode(DecodeError::Format { scope, .. })) => {
                assert_eq!(scope, "BoneKey");
            }
            other => panic!("unexpected result {:?}", other),
        }
        assert_eq!(key.cache_count(), 0);
        assert!(key.cache_owner().is_none());
    }

    #[test]
    fn unresolved_id_fails_whole_key() {
        let s = scene();
        let mut key = key();
        key.reset_caches(&s.project, s.owner).unwrap();
        s.project.paralleler().wait_idle();

        let ids = IdTable::from_tree(&s.project.read_tree().unwrap());
        let mut out = Serializer::new(Vec::new(), &ids);
        key.serialize(&mut out).unwrap();
        let bytes = out.into_inner();

        let mut restored = BoneKey::default();
        let mut input = Deserializer::new(bytes.as_slice());
        restored.deserialize(&mut input).unwrap();

        // a table of a tree missing the stored nodes
        let smaller = IdTable::from_tree(&ObjectTree::new());
        assert!(matches!(
            input.finish(&smaller),
            Err(DecodeError::UnresolvedId(_))
        ));
        let resolver = IdResolver::new(&smaller);
        assert!(restored.resolve_references(&resolver).is_err());
        assert_eq!(restored.cache_count(), 0);
        assert!(restored.cache_owner().is_none());
    }
}
