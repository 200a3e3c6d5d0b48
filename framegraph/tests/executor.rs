//! Executor integration tests on the recording Dummy backend.
//!
//! These cover the frame state machine: frame slots and fences, transient
//! allocation and release, the dummy submit path, parallel recording and
//! bindless index assignment.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use rstest::rstest;

use common::{
    color_desc, compile, declare_linear, deferred_graph, import_target, init_logging, linear_graph, pass,
    write_color,
};
use framegraph::graph::{BufferAccessMode, ImportedState, ResourceUsage};
use framegraph::backend::dummy::RecordedCommand;
use framegraph::executor::SyncPoint;
use framegraph::{
    BackendError, BarrierKind, BufferDesc, DummyBackend, DummyBindless, DummySwapchain, ExecuteError, Executor,
    FrameGraph, FrameGraphBuilder, FrameGraphConfig, GraphError, GraphState, QueueType, ResourceFlags,
};

fn executor(backend: &DummyBackend, config: FrameGraphConfig) -> Executor {
    Executor::new(Arc::new(backend.clone()), config).unwrap()
}

// ============================================================================
// Frame execution
// ============================================================================

/// One frame of the linear graph: two submissions, acquire and present.
#[test]
fn test_execute_linear_frame() {
    init_logging();
    let backend = DummyBackend::new();
    let mut executor = executor(&backend, FrameGraphConfig::default());
    let mut swapchain = DummySwapchain::new(2);
    let graph = Arc::new(compile(linear_graph(FrameGraphConfig::default())));

    let frame = executor.execute(&graph, Some(&mut swapchain), None).unwrap();
    assert_eq!(frame.slot, 0);
    assert_eq!(frame.image, Some(0));
    assert_eq!(frame.submissions, 2);
    assert!(!frame.dummy_submit);
    assert_eq!(graph.state(), GraphState::Executed);
    assert_eq!(swapchain.presented(), &[0]);

    let submissions = backend.submissions();
    assert_eq!(submissions.len(), 2);
    // Only the final submission carries the slot fence.
    assert!(submissions[0].fence.is_none());
    assert!(submissions[1].fence.is_some());
    assert!(submissions[1].signals.contains(&SyncPoint::RenderFinished));
    assert!(submissions[1].waits.iter().any(|w| w.point == SyncPoint::ImageAcquired));

    // Blit records the read transition before its pass and the present
    // transition after it.
    let commands = &submissions[1].commands;
    assert!(matches!(commands.first(), Some(RecordedCommand::AcquireBarrier(_))));
    assert!(matches!(commands.get(1), Some(RecordedCommand::BeginPass { name, .. }) if name == "Blit"));
    assert!(matches!(
        commands.last(),
        Some(RecordedCommand::AcquireBarrier(b)) if b.new_layout == framegraph::TextureLayout::PresentSrc
    ));
}

/// Cross-queue transfers are recorded with the matching backend calls.
#[test]
fn test_ownership_transfer_recording() {
    init_logging();
    let backend = DummyBackend::new();
    let mut executor = executor(&backend, FrameGraphConfig::default());
    let graph = Arc::new(compile(common::cross_queue_graph(FrameGraphConfig::default())));

    let frame = executor.execute(&graph, None, None).unwrap();
    assert_eq!(frame.image, None);

    let submissions = backend.submissions();
    let compute = submissions.iter().find(|s| s.queue == QueueType::Compute).unwrap();
    let graphics = submissions.iter().find(|s| s.queue == QueueType::Graphics).unwrap();
    let release = compute
        .commands
        .iter()
        .find_map(|c| match c {
            RecordedCommand::ReleaseBarrier(b) => Some(*b),
            _ => None,
        })
        .unwrap();
    let acquire = graphics
        .commands
        .iter()
        .find_map(|c| match c {
            RecordedCommand::AcquireBarrier(b) if b.kind == BarrierKind::Acquire => Some(*b),
            _ => None,
        })
        .unwrap();
    assert_eq!(release.kind, BarrierKind::Release);
    assert_eq!(release.resource, acquire.resource);
    assert_eq!(release.src_queue_family, acquire.src_queue_family);
    assert_eq!(release.dst_queue_family, acquire.dst_queue_family);
}

/// Callbacks run once per frame with the refreshed user data.
#[test]
fn test_callbacks_see_refreshed_user_data() {
    init_logging();
    let seen = Arc::new(AtomicUsize::new(0));
    let mut builder = FrameGraphBuilder::new("user-data", FrameGraphConfig::default());
    let target = import_target(&mut builder, "target");
    let draw = builder.add_pass("draw", QueueType::Graphics);
    let observed = Arc::clone(&seen);
    builder
        .set_callback(draw, move |ctx| {
            observed.store(ctx.user_data() as usize, Ordering::SeqCst);
        })
        .unwrap();
    write_color(&mut builder, draw, "out", target);
    let graph = Arc::new(compile(builder));

    let backend = DummyBackend::new();
    let mut executor = executor(&backend, FrameGraphConfig::default());
    for frame in 1..=3u64 {
        graph.set_user_data(draw, frame * 10).unwrap();
        executor.execute(&graph, None, None).unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), (frame * 10) as usize);
    }
    assert_eq!(executor.frame_index(), 3);
}

/// Failed graphs are never executed.
#[test]
fn test_failed_graph_is_not_executed() {
    init_logging();
    let mut builder = FrameGraphBuilder::new("broken", FrameGraphConfig::default());
    let ghost = builder.add_transient_image("ghost", color_desc());
    let target = import_target(&mut builder, "target");
    let p = pass(&mut builder, "reader", QueueType::Graphics);
    common::sample(&mut builder, p, "ghost", ghost);
    write_color(&mut builder, p, "out", target);
    let graph = Arc::new(builder.build());

    let backend = DummyBackend::new();
    let mut executor = executor(&backend, FrameGraphConfig::default());
    let err = executor.execute(&graph, None, None).unwrap_err();
    assert!(matches!(err, ExecuteError::GraphFailed(GraphError::DanglingUsage { .. })));
    assert!(backend.submissions().is_empty());
    assert_eq!(executor.frame_index(), 0);
}

// ============================================================================
// Dummy submit
// ============================================================================

fn empty_graph() -> Arc<FrameGraph> {
    let mut builder = FrameGraphBuilder::new("idle", FrameGraphConfig::default());
    let x = builder.add_transient_image("X", color_desc());
    let p = pass(&mut builder, "orphan", QueueType::Graphics);
    write_color(&mut builder, p, "x", x);
    Arc::new(builder.build())
}

/// A graph with nothing to do still advances the swapchain.
#[test]
fn test_no_work_dummy_submit() {
    init_logging();
    let backend = DummyBackend::new();
    let mut executor = executor(&backend, FrameGraphConfig::default());
    let mut swapchain = DummySwapchain::new(2);
    let graph = empty_graph();
    assert_eq!(graph.error(), Some(&GraphError::NoWorkToDo));

    let frame = executor.execute(&graph, Some(&mut swapchain), None).unwrap();
    assert!(frame.dummy_submit);
    assert_eq!(swapchain.acquired(), &[0]);
    assert_eq!(swapchain.presented(), &[0]);

    let submissions = backend.submissions();
    assert_eq!(submissions.len(), 1);
    assert!(submissions[0].commands.is_empty());
    assert_eq!(submissions[0].signals, vec![SyncPoint::RenderFinished]);
    assert!(submissions[0].fence.is_some());
}

#[test]
fn test_no_work_without_swapchain_reports_no_work() {
    init_logging();
    let backend = DummyBackend::new();
    let mut executor = executor(&backend, FrameGraphConfig::default());
    let err = executor.execute(&empty_graph(), None, None).unwrap_err();
    assert!(matches!(err, ExecuteError::GraphFailed(GraphError::NoWorkToDo)));
    assert!(backend.submissions().is_empty());
}

// ============================================================================
// Frame slots and fences
// ============================================================================

/// Transients live until their slot comes around again.
#[test]
fn test_frame_slots_recycle_transients() {
    init_logging();
    let backend = DummyBackend::new();
    let config = FrameGraphConfig::default().with_frames_in_flight(2);
    let mut executor = executor(&backend, config.clone());
    let mut swapchain = DummySwapchain::new(3);
    let graph = Arc::new(compile(linear_graph(config)));

    executor.execute(&graph, Some(&mut swapchain), None).unwrap();
    assert_eq!(backend.live_transients(), 1);
    executor.execute(&graph, Some(&mut swapchain), None).unwrap();
    assert_eq!(backend.live_transients(), 2);
    // Slot 0 again: its fence is waited on and its transient released.
    let frame = executor.execute(&graph, Some(&mut swapchain), None).unwrap();
    assert_eq!(frame.slot, 0);
    assert_eq!(backend.live_transients(), 2);
    assert_eq!(backend.fence_waits(), 1);

    let slots: Vec<usize> = backend.allocations().iter().map(|(_, _, slot)| *slot).collect();
    assert_eq!(slots, vec![0, 1, 0]);

    executor.wait_idle().unwrap();
    assert_eq!(backend.live_transients(), 0);
}

/// Every queue the frame used ends with a fenced submission, and the slot
/// waits for all of them before reuse.
#[test]
fn test_each_queue_fences_its_last_batch() {
    init_logging();
    let backend = DummyBackend::new();
    let config = FrameGraphConfig::default().with_frames_in_flight(1);
    let mut executor = executor(&backend, config.clone());
    let mut swapchain = DummySwapchain::new(2);

    let mut builder = FrameGraphBuilder::new("linear-with-compute", config);
    declare_linear(&mut builder);
    let scratch = builder.add_transient_buffer("scratch", BufferDesc::new(4096));
    let histogram = builder.import_buffer("histogram", BufferDesc::new(1024), ImportedState::default());
    let bin = pass(&mut builder, "bin", QueueType::Compute);
    builder
        .connect_output(bin, "scratch", ResourceUsage::buffer(scratch, BufferAccessMode::StorageWrite))
        .unwrap();
    let reduce = pass(&mut builder, "reduce", QueueType::Compute);
    builder
        .connect_input(reduce, "scratch", ResourceUsage::buffer(scratch, BufferAccessMode::StorageRead))
        .unwrap();
    builder
        .connect_output(reduce, "histogram", ResourceUsage::buffer(histogram, BufferAccessMode::StorageWrite))
        .unwrap();
    let graph = Arc::new(compile(builder));

    executor.execute(&graph, Some(&mut swapchain), None).unwrap();
    let submissions = backend.submissions();
    assert_eq!(submissions.len(), 4);
    for queue in [QueueType::Graphics, QueueType::Compute] {
        let on_queue: Vec<_> = submissions.iter().filter(|s| s.queue == queue).collect();
        assert_eq!(on_queue.len(), 2);
        assert!(on_queue[0].fence.is_none());
        assert!(on_queue[1].fence.is_some());
    }
    assert_eq!(executor.slots()[0].fences.len(), 2);

    // The single slot comes around again: both queues are waited on.
    executor.execute(&graph, Some(&mut swapchain), None).unwrap();
    assert_eq!(backend.fence_waits(), 2);
    assert_eq!(backend.live_transients(), 2);
}

/// A fence that never signals turns into `DeviceHung` after the hard timeout.
#[test]
fn test_hung_device() {
    init_logging();
    let backend = DummyBackend::new();
    let config = FrameGraphConfig::default()
        .with_frames_in_flight(1)
        .with_fence_timeouts(Duration::from_millis(1), Duration::from_millis(5));
    let mut executor = executor(&backend, config.clone());
    let mut swapchain = DummySwapchain::new(2);
    let graph = Arc::new(compile(linear_graph(config)));

    executor.execute(&graph, Some(&mut swapchain), None).unwrap();
    backend.set_hung(true);

    let err = executor.execute(&graph, Some(&mut swapchain), None).unwrap_err();
    match err {
        ExecuteError::DeviceHung { slot, waited } => {
            assert_eq!(slot, 0);
            assert!(waited >= Duration::from_millis(5));
        }
        other => panic!("expected DeviceHung, got {other:?}"),
    }
    // Nothing was released or submitted while the fence is outstanding.
    assert_eq!(backend.live_transients(), 1);
    assert_eq!(backend.submissions().len(), 2);

    backend.set_hung(false);
    executor.wait_idle().unwrap();
    assert_eq!(backend.live_transients(), 0);
}

/// A submission failing after earlier batches reached the queue: the image
/// still goes back to the swapchain and the frame's transients stay alive
/// until the work already queued has finished.
#[test]
fn test_submit_failure_after_partial_frame() {
    init_logging();
    let backend = DummyBackend::new();
    let config = FrameGraphConfig::default().with_frames_in_flight(1);
    let mut executor = executor(&backend, config.clone());
    let mut swapchain = DummySwapchain::new(2);
    let graph = Arc::new(compile(linear_graph(config)));

    backend.set_fail_submit(Some(1));
    let err = executor.execute(&graph, Some(&mut swapchain), None).unwrap_err();
    assert!(matches!(err, ExecuteError::Backend(BackendError::SubmitFailed(_))));
    assert_eq!(executor.frame_index(), 0);

    // Clear was queued; an empty submission closes the frame.
    let submissions = backend.submissions();
    assert_eq!(submissions.len(), 2);
    let flush = &submissions[1];
    assert!(flush.commands.is_empty());
    assert!(flush.waits.iter().any(|w| w.point == SyncPoint::ImageAcquired));
    assert!(flush.signals.contains(&SyncPoint::RenderFinished));
    assert!(flush.fence.is_some());
    assert_eq!(swapchain.acquired(), &[0]);
    assert_eq!(swapchain.presented(), &[0]);

    assert_eq!(executor.slots()[0].fences.len(), 1);
    assert_eq!(backend.live_transients(), 1);
    assert_eq!(backend.fence_waits(), 0);

    // The retry reuses the slot and waits before releasing.
    backend.set_fail_submit(None);
    executor.execute(&graph, Some(&mut swapchain), None).unwrap();
    assert_eq!(backend.fence_waits(), 1);
    assert_eq!(backend.live_transients(), 1);
    assert_eq!(swapchain.acquired(), swapchain.presented());
}

/// Nothing reached the queue: transients go back at once, the image is
/// still returned.
#[test]
fn test_submit_failure_on_first_batch() {
    init_logging();
    let backend = DummyBackend::new();
    let mut executor = executor(&backend, FrameGraphConfig::default());
    let mut swapchain = DummySwapchain::new(2);
    let graph = Arc::new(compile(linear_graph(FrameGraphConfig::default())));

    backend.set_fail_submit(Some(0));
    let err = executor.execute(&graph, Some(&mut swapchain), None).unwrap_err();
    assert!(matches!(err, ExecuteError::Backend(BackendError::SubmitFailed(_))));

    let submissions = backend.submissions();
    assert_eq!(submissions.len(), 1);
    assert!(submissions[0].commands.is_empty());
    assert!(submissions[0].fence.is_some());
    assert_eq!(swapchain.acquired(), &[0]);
    assert_eq!(swapchain.presented(), &[0]);
    assert_eq!(backend.live_transients(), 0);
}

// ============================================================================
// Transients
// ============================================================================

#[test]
fn test_transient_allocation_failure() {
    init_logging();
    let backend = DummyBackend::new();
    let mut executor = executor(&backend, FrameGraphConfig::default());
    let mut swapchain = DummySwapchain::new(2);
    let graph = Arc::new(compile(deferred_graph(FrameGraphConfig::default())));

    backend.set_fail_allocations(true);
    let err = executor.execute(&graph, Some(&mut swapchain), None).unwrap_err();
    match &err {
        ExecuteError::Backend(backend_err) => {
            assert!(matches!(backend_err, BackendError::TransientAllocationFailed { .. }));
            assert!(!backend_err.is_recoverable());
        }
        other => panic!("expected backend error, got {other:?}"),
    }
    assert!(backend.submissions().is_empty());
    assert_eq!(backend.live_transients(), 0);
    // The image is only acquired once the frame is ready to submit.
    assert!(swapchain.acquired().is_empty());
    assert!(swapchain.presented().is_empty());

    backend.set_fail_allocations(false);
    executor.execute(&graph, Some(&mut swapchain), None).unwrap();
    assert_eq!(backend.live_transients(), graph.lifetimes().len());
}

#[test]
fn test_alias_slots_reach_the_allocator() {
    init_logging();
    let mut builder = FrameGraphBuilder::new("alias", FrameGraphConfig::default());
    let a = builder.add_transient_image("a", color_desc());
    let b = builder.add_transient_image("b", color_desc());
    let target = import_target(&mut builder, "target");
    for resource in [a, b] {
        builder.set_resource_flags(resource, ResourceFlags::ALIASABLE).unwrap();
    }
    let p0 = pass(&mut builder, "p0", QueueType::Graphics);
    write_color(&mut builder, p0, "a", a);
    let p1 = pass(&mut builder, "p1", QueueType::Graphics);
    common::sample(&mut builder, p1, "a", a);
    write_color(&mut builder, p1, "b", b);
    let p2 = pass(&mut builder, "p2", QueueType::Graphics);
    common::sample(&mut builder, p2, "b", b);
    write_color(&mut builder, p2, "out", target);
    let graph = Arc::new(compile(builder));

    let backend = DummyBackend::new();
    let mut executor = executor(&backend, FrameGraphConfig::default());
    executor.execute(&graph, None, None).unwrap();

    let allocations = backend.allocations();
    assert_eq!(allocations.len(), 2);
    assert!(allocations.iter().all(|(_, slot, _)| slot.is_some()));
}

// ============================================================================
// Bindless
// ============================================================================

/// Bindless indices are requested once per resource, then reused.
#[test]
fn test_bindless_index_requested_once() {
    init_logging();
    let mut builder = FrameGraphBuilder::new("bindless", FrameGraphConfig::default());
    let (_, blit) = declare_linear(&mut builder);
    let r = framegraph::ResourceHandle::new(0);
    builder.set_resource_flags(r, ResourceFlags::BINDLESS).unwrap();
    let seen = Arc::new(AtomicUsize::new(usize::MAX));
    let observed = Arc::clone(&seen);
    builder
        .set_callback(blit, move |ctx| {
            if let Some(index) = ctx.bindless_index(r) {
                observed.store(index as usize, Ordering::SeqCst);
            }
        })
        .unwrap();
    let graph = Arc::new(compile(builder));

    let backend = DummyBackend::new();
    let mut executor = executor(&backend, FrameGraphConfig::default());
    let mut swapchain = DummySwapchain::new(2);
    let mut bindless = DummyBindless::new();
    for _ in 0..3 {
        executor
            .execute(&graph, Some(&mut swapchain), Some(&mut bindless))
            .unwrap();
    }

    assert_eq!(bindless.requests(), &["R".to_string()]);
    assert_eq!(graph.resource(r).unwrap().bindless_index(), Some(0));
    assert_eq!(seen.load(Ordering::SeqCst), 0);
}

// ============================================================================
// Recording
// ============================================================================

/// Inline and pooled recording produce the same submissions.
#[rstest]
#[case::inline(0)]
#[case::one_worker(1)]
#[case::four_workers(4)]
fn test_recording_workers(#[case] workers: usize) {
    init_logging();
    let reference = {
        let backend = DummyBackend::new();
        let mut executor = executor(&backend, FrameGraphConfig::default());
        let graph = Arc::new(compile(deferred_graph(FrameGraphConfig::default())));
        executor
            .execute(&graph, Some(&mut DummySwapchain::new(2)), None)
            .unwrap();
        backend.take_submissions()
    };

    let backend = DummyBackend::new();
    let config = FrameGraphConfig::default().with_recording_workers(workers);
    let mut executor = executor(&backend, config.clone());
    let graph = Arc::new(compile(deferred_graph(config)));
    executor
        .execute(&graph, Some(&mut DummySwapchain::new(2)), None)
        .unwrap();

    let pooled = backend.take_submissions();
    assert_eq!(pooled.len(), reference.len());
    for (a, b) in pooled.iter().zip(&reference) {
        assert_eq!(a.queue, b.queue);
        assert_eq!(a.batch, b.batch);
        assert_eq!(a.commands, b.commands);
        assert_eq!(a.waits, b.waits);
        assert_eq!(a.signals, b.signals);
    }
}

/// A panicking callback on a worker surfaces on the frame thread.
#[test]
#[should_panic(expected = "callback failed")]
fn test_worker_panic_is_resumed() {
    let mut builder = FrameGraphBuilder::new("panics", FrameGraphConfig::default());
    let target = import_target(&mut builder, "target");
    let p = builder.add_pass("explode", QueueType::Graphics);
    builder.set_callback(p, |_ctx| panic!("callback failed")).unwrap();
    write_color(&mut builder, p, "out", target);
    let graph = Arc::new(compile(builder));

    let backend = DummyBackend::new();
    let mut executor = executor(&backend, FrameGraphConfig::default().with_recording_workers(2));
    let _ = executor.execute(&graph, None, None);
}
