use std::sync::Arc;

use criterion::{Criterion, black_box, criterion_group, criterion_main};

use framegraph::graph::{ResourceUsage, TextureAccessMode};
use framegraph::{
    CacheKey, DummyBackend, DummySwapchain, Executor, FrameGraphBuilder, FrameGraphConfig, GraphBegin,
    GraphCache, GraphFingerprint, ImageDesc, QueueType, TextureFormat,
};

const WIDTH: u32 = 1920;
const HEIGHT: u32 = 1080;

/// A chain of `count` graphics passes, each sampling the previous target.
/// The last pass writes the swapchain.
fn declare_chain(builder: &mut FrameGraphBuilder, count: usize) {
    let desc = ImageDesc::new_2d(WIDTH, HEIGHT, TextureFormat::Rgba16Float);
    let Ok(swapchain) =
        builder.import_swapchain("backbuffer", ImageDesc::new_2d(WIDTH, HEIGHT, TextureFormat::Bgra8UnormSrgb))
    else {
        return;
    };

    let mut previous = None;
    for i in 0..count {
        let pass = builder.add_pass(format!("pass_{i}"), QueueType::Graphics);
        let _ = builder.set_callback(pass, |ctx| {
            black_box(ctx.name());
        });
        if let Some(source) = previous {
            let _ = builder.connect_input(pass, "source", ResourceUsage::texture(source, TextureAccessMode::ShaderRead));
        }
        let target = if i + 1 == count {
            swapchain
        } else {
            builder.add_transient_image(format!("target_{i}"), desc)
        };
        let _ = builder.connect_output(pass, "target", ResourceUsage::texture(target, TextureAccessMode::RenderTargetWrite));
        previous = Some(target);
    }
}

fn chain_builder(count: usize) -> FrameGraphBuilder {
    let mut builder = FrameGraphBuilder::new("chain", FrameGraphConfig::default());
    declare_chain(&mut builder, count);
    builder
}

// ---------------------------------------------------------------------------
// Compilation
// ---------------------------------------------------------------------------

fn bench_compile_chain(c: &mut Criterion) {
    for count in [8, 64, 256] {
        c.bench_function(&format!("framegraph_compile_{count}_passes"), |b| {
            b.iter(|| {
                let graph = chain_builder(black_box(count)).build();
                black_box(graph.is_ok());
            });
        });
    }
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

fn bench_cache_hit(c: &mut Criterion) {
    let mut cache = GraphCache::new(FrameGraphConfig::default());
    let key = CacheKey::new(
        &GraphFingerprint::new(WIDTH, HEIGHT, TextureFormat::Bgra8UnormSrgb),
        b"chain",
    );
    if let GraphBegin::Build(mut builder) = cache.begin_graph("chain", key) {
        declare_chain(&mut builder, 64);
        builder.end_graph(&mut cache);
    }

    c.bench_function("framegraph_cache_hit_64_passes", |b| {
        b.iter(|| match cache.begin_graph("chain", black_box(key)) {
            GraphBegin::Cached(graph) => black_box(graph),
            GraphBegin::Build(builder) => Arc::new(builder.build()),
        });
    });
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

fn bench_execute_dummy(c: &mut Criterion) {
    for workers in [0, 4] {
        let config = FrameGraphConfig::default().with_recording_workers(workers);
        let backend = DummyBackend::new();
        let Ok(mut executor) = Executor::new(Arc::new(backend.clone()), config.clone()) else {
            continue;
        };
        let mut swapchain = DummySwapchain::new(3);
        let mut builder = FrameGraphBuilder::new("chain", config);
        declare_chain(&mut builder, 64);
        let graph = Arc::new(builder.build());

        c.bench_function(&format!("framegraph_execute_64_passes_{workers}_workers"), |b| {
            b.iter(|| {
                let frame = executor.execute(&graph, Some(&mut swapchain), None);
                black_box(frame.is_ok());
                backend.take_submissions();
            });
        });
    }
}

criterion_group!(benches, bench_compile_chain, bench_cache_hit, bench_execute_dummy);
criterion_main!(benches);
