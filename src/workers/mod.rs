//! Background workers
//!
//! Long-running threads that feed a session from outside the runtime.

pub mod replay;

/// Trait for workers that need graceful shutdown.
pub trait WorkerClose {
    /// Close and clean up worker resources.
    fn close(&mut self);
}
