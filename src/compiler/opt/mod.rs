//! Optimization passes over the block queue. There is exactly one: the
//! block-local dead-code/liveness pass. Constant propagation is tracked by a
//! registry flag but has never been implemented.

mod dead;

pub use dead::eliminate;
