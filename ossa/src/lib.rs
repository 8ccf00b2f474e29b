pub mod io;

pub use ossa_bone as bone;
pub use ossa_math as math;
pub use ossa_scene as scene;
pub use ossa_utils as utils;

pub mod prelude {
    pub use crate::io::*;
    pub use ossa_bone::*;
    pub use ossa_math::*;
    pub use ossa_scene::serialize::{Deserializer, IdTable, Serializer};
    pub use ossa_scene::*;
    pub use ossa_utils::collections::*;
    pub use ossa_utils::task::*;
    pub use ossa_utils::*;
}
