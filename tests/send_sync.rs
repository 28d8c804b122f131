//! Send/Sync guarantees for core types.

use logship::{
    BulkFormatter, CircuitBreaker, Diagnostics, HttpTransport, LogBridge, LogRecord, LogSink,
    Pipeline, PipelineBuilder, PipelineHandle, PipelineLayer, PipelineState, ProcessorChain,
    RingBuffer,
};
use rstest::rstest;
use static_assertions::assert_impl_all;

#[rstest]
fn producer_side_is_send_sync() {
    assert_impl_all!(PipelineHandle: Send, Sync, Clone);
    assert_impl_all!(Pipeline: Send, Sync);
    assert_impl_all!(ProcessorChain: Send, Sync);
    assert_impl_all!(RingBuffer: Send, Sync);
    assert_impl_all!(PipelineState: Send, Sync);
    assert_impl_all!(Diagnostics: Send, Sync);
    assert_impl_all!(LogRecord: Send, Sync);
}

#[rstest]
fn sender_side_is_send() {
    assert_impl_all!(PipelineBuilder: Send);
    assert_impl_all!(HttpTransport: Send);
    assert_impl_all!(CircuitBreaker: Send);
    assert_impl_all!(BulkFormatter: Send, Sync);
}

#[rstest]
fn bridges_are_send_sync() {
    assert_impl_all!(LogBridge: Send, Sync);
    assert_impl_all!(PipelineLayer: Send, Sync);
    assert_impl_all!(LogSink: Send, Sync);
}
