//! Background execution
//!
//! Bounded pool for fire-and-forget jobs and the shutdown signal that stops it.

pub mod background;
pub mod shutdown;

pub use background::BackgroundPool;
pub use shutdown::ShutdownSignal;
