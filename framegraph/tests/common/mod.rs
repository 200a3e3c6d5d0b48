//! Common utilities for frame graph integration tests.
//!
//! Graph fixtures shared by the scenario and executor tests. Every fixture
//! declares its passes with a no-op callback unless stated otherwise, so
//! culling only removes passes for structural reasons.

#![allow(dead_code)]

use framegraph::graph::{BufferAccessMode, ImportedState, ResourceUsage, TextureAccessMode};
use framegraph::{
    BufferDesc, FrameGraph, FrameGraphBuilder, FrameGraphConfig, ImageDesc, PassHandle, QueueType,
    ResourceHandle, TextureFormat,
};

pub const WIDTH: u32 = 640;
pub const HEIGHT: u32 = 480;

/// Install a test logger once per test binary.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn color_desc() -> ImageDesc {
    ImageDesc::new_2d(WIDTH, HEIGHT, TextureFormat::Rgba8Unorm)
}

pub fn swapchain_desc() -> ImageDesc {
    ImageDesc::new_2d(WIDTH, HEIGHT, TextureFormat::Bgra8UnormSrgb)
}

/// Add a pass with a no-op callback.
pub fn pass(builder: &mut FrameGraphBuilder, name: &str, queue: QueueType) -> PassHandle {
    let pass = builder.add_pass(name, queue);
    builder.set_callback(pass, |_ctx| {}).unwrap();
    pass
}

pub fn write_color(builder: &mut FrameGraphBuilder, pass: PassHandle, name: &str, resource: ResourceHandle) {
    builder
        .connect_output(pass, name, ResourceUsage::texture(resource, TextureAccessMode::RenderTargetWrite))
        .unwrap();
}

pub fn sample(builder: &mut FrameGraphBuilder, pass: PassHandle, name: &str, resource: ResourceHandle) {
    builder
        .connect_input(pass, name, ResourceUsage::texture(resource, TextureAccessMode::ShaderRead))
        .unwrap();
}

/// Import an image nobody reads inside the graph; writing it keeps a pass alive.
pub fn import_target(builder: &mut FrameGraphBuilder, name: &str) -> ResourceHandle {
    builder.import_image(name, color_desc(), ImportedState::default())
}

/// "Clear" writes transient color image R, "Blit" reads R and writes the
/// swapchain.
pub fn linear_graph(config: FrameGraphConfig) -> FrameGraphBuilder {
    let mut builder = FrameGraphBuilder::new("linear", config);
    declare_linear(&mut builder);
    builder
}

/// Declare the linear graph into `builder`, returning (Clear, Blit).
pub fn declare_linear(builder: &mut FrameGraphBuilder) -> (PassHandle, PassHandle) {
    let r = builder.add_transient_image("R", color_desc());
    let s = builder.import_swapchain("S", swapchain_desc()).unwrap();

    let clear = pass(builder, "Clear", QueueType::Graphics);
    write_color(builder, clear, "color", r);

    let blit = pass(builder, "Blit", QueueType::Graphics);
    sample(builder, blit, "source", r);
    write_color(builder, blit, "target", s);
    (clear, blit)
}

/// Compute pass "A" writes storage buffer B, graphics pass "C" reads it as
/// a vertex buffer and writes an imported target.
pub fn cross_queue_graph(config: FrameGraphConfig) -> FrameGraphBuilder {
    let mut builder = FrameGraphBuilder::new("cross-queue", config);
    let b = builder.add_transient_buffer("B", BufferDesc::new(4096));
    let target = import_target(&mut builder, "target");

    let a = pass(&mut builder, "A", QueueType::Compute);
    builder
        .connect_output(a, "particles", ResourceUsage::buffer(b, BufferAccessMode::StorageWrite))
        .unwrap();

    let c = pass(&mut builder, "C", QueueType::Graphics);
    builder
        .connect_input(c, "vertices", ResourceUsage::buffer(b, BufferAccessMode::VertexBuffer))
        .unwrap();
    write_color(&mut builder, c, "color", target);
    builder
}

/// A deferred-style frame with a shadow pass, G-buffer, async compute
/// lighting, tonemapping and UI on the swapchain.
pub fn deferred_graph(config: FrameGraphConfig) -> FrameGraphBuilder {
    let mut builder = FrameGraphBuilder::new("deferred", config);
    declare_deferred(&mut builder);
    builder
}

/// Declare the deferred frame into `builder`.
pub fn declare_deferred(builder: &mut FrameGraphBuilder) {
    let shadow = builder.add_transient_image(
        "shadow_map",
        ImageDesc::new_2d(1024, 1024, TextureFormat::Depth32Float),
    );
    let albedo = builder.add_transient_image("albedo", color_desc());
    let normal = builder.add_transient_image("normal", color_desc());
    let depth = builder.add_transient_image(
        "depth",
        ImageDesc::new_2d(WIDTH, HEIGHT, TextureFormat::Depth32Float),
    );
    let lit = builder.add_transient_image("lit", ImageDesc::new_2d(WIDTH, HEIGHT, TextureFormat::Rgba16Float));
    let backbuffer = builder.import_swapchain("backbuffer", swapchain_desc()).unwrap();

    let shadows = pass(builder, "shadows", QueueType::Graphics);
    builder
        .connect_output(shadows, "depth", ResourceUsage::texture(shadow, TextureAccessMode::DepthStencilWrite))
        .unwrap();

    let gbuffer = pass(builder, "gbuffer", QueueType::Graphics);
    write_color(builder, gbuffer, "albedo", albedo);
    write_color(builder, gbuffer, "normal", normal);
    builder
        .connect_output(gbuffer, "depth", ResourceUsage::texture(depth, TextureAccessMode::DepthStencilWrite))
        .unwrap();

    let lighting = pass(builder, "lighting", QueueType::Compute);
    for (name, resource) in [("albedo", albedo), ("normal", normal), ("depth", depth), ("shadow", shadow)] {
        builder
            .connect_input(lighting, name, ResourceUsage::texture(resource, TextureAccessMode::ComputeRead))
            .unwrap();
    }
    builder
        .connect_output(lighting, "lit", ResourceUsage::texture(lit, TextureAccessMode::StorageReadWrite))
        .unwrap();

    let tonemap = pass(builder, "tonemap", QueueType::Graphics);
    sample(builder, tonemap, "hdr", lit);
    write_color(builder, tonemap, "ldr", backbuffer);

    let ui = pass(builder, "ui", QueueType::Graphics);
    builder
        .connect_input(ui, "background", ResourceUsage::texture(backbuffer, TextureAccessMode::RenderTargetWrite))
        .unwrap();
    write_color(builder, ui, "ui", backbuffer);
}

/// Compile and assert success.
pub fn compile(builder: FrameGraphBuilder) -> FrameGraph {
    let graph = builder.build();
    assert!(graph.is_ok(), "compile failed: {:?}", graph.report());
    graph
}
