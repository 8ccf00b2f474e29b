use crate::{ObjectTree, ProjectSettings, SceneError, TimeInfo, Frame};
use ossa_utils::task::WorkerPool;
use std::sync::{
    atomic::{AtomicI32, Ordering},
    RwLock, RwLockReadGuard, RwLockWriteGuard,
};

/// Everything the bone caches need from the surrounding application:
/// the locked object tree, the current time and the shared worker pool.
#[derive(Debug)]
pub struct Project {
    object_tree: RwLock<ObjectTree>,
    current_frame: AtomicI32,
    paralleler: WorkerPool,
    settings: ProjectSettings,
}

impl Default for Project {
    fn default() -> Self {
        Self::new(ProjectSettings::default())
    }
}

impl Project {
    pub fn new(settings: ProjectSettings) -> Self {
        Self::with_tree(settings, ObjectTree::new())
    }

    pub fn with_tree(settings: ProjectSettings, tree: ObjectTree) -> Self {
        Self {
            object_tree: RwLock::new(tree),
            current_frame: AtomicI32::new(0),
            paralleler: WorkerPool::new(settings.worker_threads),
            settings,
        }
    }

    pub fn settings(&self) -> &ProjectSettings {
        &self.settings
    }

    pub fn object_tree(&self) -> &RwLock<ObjectTree> {
        &self.object_tree
    }

    pub fn read_tree(&self) -> Result<RwLockReadGuard<'_, ObjectTree>, SceneError> {
        Ok(self.object_tree.read()?)
    }

    pub fn write_tree(&self) -> Result<RwLockWriteGuard<'_, ObjectTree>, SceneError> {
        Ok(self.object_tree.write()?)
    }

    pub fn paralleler(&self) -> &WorkerPool {
        &self.paralleler
    }

    pub fn current_time_info(&self) -> TimeInfo {
        TimeInfo {
            frame: Frame::new(self.current_frame.load(Ordering::Acquire)),
            fps: self.settings.fps,
            frame_max: self.settings.max_frame,
            looping: self.settings.looping,
        }
    }

    /// Sets the current frame, clamped to the timeline.
    pub fn set_current_frame(&self, frame: Frame) {
        let frame = frame.get().max(0).min(self.settings.max_frame);
        self.current_frame.store(frame, Ordering::Release);
    }

    /// Moves the current frame by `delta`, wrapping around when the project loops.
    pub fn advance_frame(&self, delta: i32) -> Frame {
        let length = self.settings.max_frame + 1;
        let current = self.current_frame.load(Ordering::Acquire);
        let next = if self.settings.looping {
            (current + delta).rem_euclid(length)
        } else {
            (current + delta).max(0).min(self.settings.max_frame)
        };
        self.current_frame.store(next, Ordering::Release);
        Frame::new(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_is_clamped() {
        let project = Project::new(ProjectSettings::default().with_max_frame(10));
        project.set_current_frame(Frame::new(42));
        assert_eq!(project.current_time_info().frame, Frame::new(10));
        project.set_current_frame(Frame::new(-3));
        assert_eq!(project.current_time_info().frame, Frame::new(0));
    }

    #[test]
    fn advance_loops() {
        let settings = ProjectSettings::default()
            .with_max_frame(9)
            .with_looping(true)
            .with_worker_threads(1);
        let project = Project::new(settings);

        project.set_current_frame(Frame::new(8));
        assert_eq!(project.advance_frame(3), Frame::new(1));
        assert_eq!(project.advance_frame(-2), Frame::new(9));
    }

    #[test]
    fn tree_locks() {
        let project = Project::default();
        let root = project.read_tree().unwrap().root();
        project.write_tree().unwrap().create_node(root, "layer").unwrap();
        assert_eq!(project.read_tree().unwrap().len(), 2);
    }
}
