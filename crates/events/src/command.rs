use polity_core::StreamId;

/// A command targets exactly one stream.
///
/// Commands are transient intent: only the events they produce are persisted.
/// One command is one transaction boundary, so `target_stream` is also the
/// stream the resulting events are appended to.
pub trait Command: Clone + core::fmt::Debug + Send + Sync + 'static {
    fn target_stream(&self) -> StreamId;

    /// Stable name used in logs (e.g. "budget.adjust_allocations").
    fn command_type(&self) -> &'static str;
}
