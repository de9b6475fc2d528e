//! Replacement-port allocation

pub mod allocator;

pub use allocator::{allocate, PortRange};
