mod graph;
mod objects;
mod project;
mod settings;
mod timeline;

pub mod serialize;

pub use graph::*;
pub use objects::*;
pub use project::*;
pub use settings::*;
pub use timeline::*;

use std::sync::{PoisonError, TryLockError};

#[derive(Debug, Clone)]
pub enum SceneError {
    InvalidNode(NodeHandle),
    RootRemoval,
    LockError,
}

impl<Guard> From<TryLockError<Guard>> for SceneError {
    fn from(_: TryLockError<Guard>) -> Self {
        Self::LockError
    }
}

impl<Guard> From<PoisonError<Guard>> for SceneError {
    fn from(_: PoisonError<Guard>) -> Self {
        Self::LockError
    }
}

impl std::fmt::Display for SceneError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let string = match self {
            Self::InvalidNode(handle) => format!("invalid {}", handle),
            Self::RootRemoval => String::from("the root node cannot be removed"),
            Self::LockError => String::from("could not acquire object tree lock"),
        };

        write!(f, "{}", string)
    }
}

impl std::error::Error for SceneError {}
