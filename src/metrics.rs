//! Injected metrics sink.
//!
//! Components take the sink explicitly instead of touching a process-wide
//! registry, so tests can count events and production can wire whatever
//! backend the deployment uses.

pub trait Metrics: Send + Sync {
    fn chunk_ingested(&self, _entry_count: usize) {}
    fn batch_finalized(&self, _entry_count: usize) {}
    fn finalize_failed(&self) {}
}

/// Default sink that records nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl Metrics for NoopMetrics {}
