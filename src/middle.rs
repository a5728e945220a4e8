//! The middle-end of the compiler: lowers the front-end AST to a flat IR,
//! then allocates registers and stack slots for it.

pub mod color;
pub mod flatten;
pub mod ir;
pub mod liveness;
pub mod promote;
pub mod regalloc;
pub mod spill;

pub use flatten::flatten_class;
pub use ir::*;
pub use regalloc::{allocate, NUM_REGISTERS};
