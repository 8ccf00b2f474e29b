mod bone;
mod cache;
mod key;

pub mod influence;

pub use bone::*;
pub use cache::*;
pub use influence::{BoneWeight, CapsuleSolver, InfluenceMap, InfluenceSolver, MAX_BONE_INFLUENCE};
pub use key::*;

use ossa_scene::serialize::{DecodeError, EncodeError};
use ossa_scene::SceneError;
use std::sync::{PoisonError, TryLockError};

#[derive(Debug, Clone)]
pub enum BoneKeyError {
    Decode(DecodeError),
    Encode(EncodeError),
    Scene(SceneError),
    LockError,
}

impl From<DecodeError> for BoneKeyError {
    fn from(e: DecodeError) -> Self {
        Self::Decode(e)
    }
}

impl From<EncodeError> for BoneKeyError {
    fn from(e: EncodeError) -> Self {
        Self::Encode(e)
    }
}

impl From<SceneError> for BoneKeyError {
    fn from(e: SceneError) -> Self {
        Self::Scene(e)
    }
}

impl<Guard> From<TryLockError<Guard>> for BoneKeyError {
    fn from(_: TryLockError<Guard>) -> Self {
        Self::LockError
    }
}

impl<Guard> From<PoisonError<Guard>> for BoneKeyError {
    fn from(_: PoisonError<Guard>) -> Self {
        Self::LockError
    }
}

impl std::fmt::Display for BoneKeyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Decode(e) => write!(f, "could not decode bone key: {}", e),
            Self::Encode(e) => write!(f, "could not encode bone key: {}", e),
            Self::Scene(e) => write!(f, "{}", e),
            Self::LockError => write!(f, "could not acquire influence map lock"),
        }
    }
}

impl std::error::Error for BoneKeyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Decode(e) => Some(e),
            Self::Encode(e) => Some(e),
            Self::Scene(e) => Some(e),
            Self::LockError => None,
        }
    }
}
