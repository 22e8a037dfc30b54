//! The symbol/type model and the program registry.

mod object;
mod registry;

pub use object::{
    Array, Object, ObjectKind, Prime, Routine, StorageClass, StructDef, StructInst, Width,
};
pub use registry::{ObjectId, Registry};
