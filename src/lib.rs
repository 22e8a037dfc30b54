pub mod result;

pub mod cli;
pub mod compiler;

pub use compiler::obj::{Object, ObjectId, Registry, StorageClass, Width};
pub use compiler::x86::Mode;
