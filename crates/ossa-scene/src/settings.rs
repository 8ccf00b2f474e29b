use serde::{Deserialize, Serialize};

/// Project-wide knobs. Defaults match a fresh project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectSettings {
    /// Threads of the shared worker pool.
    pub worker_threads: usize,
    pub fps: u32,
    /// Last frame of the timeline, inclusive.
    pub max_frame: i32,
    pub looping: bool,
}

impl Default for ProjectSettings {
    fn default() -> Self {
        Self {
            worker_threads: num_cpus::get(),
            fps: 24,
            max_frame: 60,
            looping: false,
        }
    }
}

impl ProjectSettings {
    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads.max(1);
        self
    }

    pub fn with_fps(mut self, fps: u32) -> Self {
        self.fps = fps;
        self
    }

    pub fn with_max_frame(mut self, max_frame: i32) -> Self {
        self.max_frame = max_frame.max(0);
        self
    }

    pub fn with_looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }
}
