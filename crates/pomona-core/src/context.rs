//! Per-item execution scope.
//!
//! Each item is processed inside a scope supplied by the host. The default
//! runs the task as is; [`SpanContext`] attaches a tracing span so every log
//! line emitted while processing carries the item id.

use std::future::Future;

use tracing::Instrument;

/// Wraps the processing of one item.
pub trait ExecutionContext: Send + Sync + Clone + 'static {
    fn scope<T>(&self, remote_id: &str, task: T) -> impl Future<Output = T::Output> + Send
    where
        T: Future + Send,
        T::Output: Send;
}

/// Runs tasks without any wrapping.
#[derive(Debug, Default, Clone, Copy)]
pub struct DirectContext;

impl ExecutionContext for DirectContext {
    fn scope<T>(&self, _remote_id: &str, task: T) -> impl Future<Output = T::Output> + Send
    where
        T: Future + Send,
        T::Output: Send,
    {
        task
    }
}

/// Runs each task inside a `harvest_item` span.
#[derive(Debug, Default, Clone, Copy)]
pub struct SpanContext;

impl ExecutionContext for SpanContext {
    fn scope<T>(&self, remote_id: &str, task: T) -> impl Future<Output = T::Output> + Send
    where
        T: Future + Send,
        T::Output: Send,
    {
        task.instrument(tracing::info_span!("harvest_item", remote_id = %remote_id))
    }
}
