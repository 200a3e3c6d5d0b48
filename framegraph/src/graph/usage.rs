//! How passes touch resources: stages, access and layout per usage.
//!
//! Every input or output a pass declares is a [`ResourceUsage`]: which
//! resource, at which pipeline stages, with which memory access and which
//! image layout. The barrier synthesizer compares adjacent usages of the same
//! resource to decide what synchronization is required.
//!
//! [`TextureAccessMode`] and [`BufferAccessMode`] are shorthands that fill in
//! the stage/access/layout triple for common cases.

use crate::types::{AccessFlags, ClearValue, LoadOp, PipelineStages, StoreOp, TextureLayout};

use super::resource::ResourceHandle;

/// How a texture is used within a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureAccessMode {
    /// Written as color render target (color attachment).
    RenderTargetWrite,
    /// Written as depth/stencil render target (depth attachment).
    DepthStencilWrite,
    /// Read-only depth/stencil (sampling + depth test).
    DepthStencilReadOnly,
    /// Sampled in a fragment shader.
    ShaderRead,
    /// Sampled in a compute shader.
    ComputeRead,
    /// Read/write as storage texture from compute.
    StorageReadWrite,
    /// Source of a copy/transfer operation.
    TransferRead,
    /// Destination of a copy/transfer operation.
    TransferWrite,
}

impl TextureAccessMode {
    /// The image layout the texture must be in.
    pub fn layout(self) -> TextureLayout {
        match self {
            Self::RenderTargetWrite => TextureLayout::ColorAttachment,
            Self::DepthStencilWrite => TextureLayout::DepthStencilAttachment,
            Self::DepthStencilReadOnly => TextureLayout::DepthStencilReadOnly,
            Self::ShaderRead | Self::ComputeRead => TextureLayout::ShaderReadOnly,
            Self::StorageReadWrite => TextureLayout::General,
            Self::TransferRead => TextureLayout::TransferSrc,
            Self::TransferWrite => TextureLayout::TransferDst,
        }
    }

    /// Memory access performed by this mode.
    pub fn access(self) -> AccessFlags {
        match self {
            Self::RenderTargetWrite => {
                AccessFlags::COLOR_ATTACHMENT_READ | AccessFlags::COLOR_ATTACHMENT_WRITE
            }
            Self::DepthStencilWrite => {
                AccessFlags::DEPTH_STENCIL_READ | AccessFlags::DEPTH_STENCIL_WRITE
            }
            Self::DepthStencilReadOnly => AccessFlags::DEPTH_STENCIL_READ,
            Self::ShaderRead | Self::ComputeRead => AccessFlags::SHADER_READ,
            Self::StorageReadWrite => AccessFlags::SHADER_READ | AccessFlags::SHADER_WRITE,
            Self::TransferRead => AccessFlags::TRANSFER_READ,
            Self::TransferWrite => AccessFlags::TRANSFER_WRITE,
        }
    }

    /// Pipeline stages at which the access happens.
    pub fn stages(self) -> PipelineStages {
        match self {
            Self::RenderTargetWrite => PipelineStages::COLOR_ATTACHMENT_OUTPUT,
            Self::DepthStencilWrite | Self::DepthStencilReadOnly => {
                PipelineStages::EARLY_FRAGMENT_TESTS | PipelineStages::LATE_FRAGMENT_TESTS
            }
            Self::ShaderRead => PipelineStages::FRAGMENT_SHADER,
            Self::ComputeRead | Self::StorageReadWrite => PipelineStages::COMPUTE_SHADER,
            Self::TransferRead | Self::TransferWrite => PipelineStages::TRANSFER,
        }
    }

    /// Check if this access mode is a write operation.
    pub fn is_write(self) -> bool {
        self.access().has_writes()
    }
}

/// How a buffer is used within a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferAccessMode {
    /// Read as vertex buffer data.
    VertexBuffer,
    /// Read as index buffer data.
    IndexBuffer,
    /// Read as uniform buffer (constant data).
    UniformRead,
    /// Read as storage buffer.
    StorageRead,
    /// Write as storage buffer.
    StorageWrite,
    /// Read and write as storage buffer.
    StorageReadWrite,
    /// Read as indirect draw arguments.
    IndirectRead,
    /// Source of a transfer/copy operation.
    TransferRead,
    /// Destination of a transfer/copy operation.
    TransferWrite,
}

impl BufferAccessMode {
    /// Memory access performed by this mode.
    pub fn access(self) -> AccessFlags {
        match self {
            Self::VertexBuffer => AccessFlags::VERTEX_ATTRIBUTE_READ,
            Self::IndexBuffer => AccessFlags::INDEX_READ,
            Self::UniformRead => AccessFlags::UNIFORM_READ,
            Self::StorageRead => AccessFlags::SHADER_READ,
            Self::StorageWrite => AccessFlags::SHADER_WRITE,
            Self::StorageReadWrite => AccessFlags::SHADER_READ | AccessFlags::SHADER_WRITE,
            Self::IndirectRead => AccessFlags::INDIRECT_COMMAND_READ,
            Self::TransferRead => AccessFlags::TRANSFER_READ,
            Self::TransferWrite => AccessFlags::TRANSFER_WRITE,
        }
    }

    /// Pipeline stages at which the access happens.
    ///
    /// Storage access is assumed to come from compute shaders; use
    /// [`ResourceUsage::with_stages`] for graphics-stage storage access.
    pub fn stages(self) -> PipelineStages {
        match self {
            Self::VertexBuffer | Self::IndexBuffer => PipelineStages::VERTEX_INPUT,
            Self::UniformRead => PipelineStages::VERTEX_SHADER | PipelineStages::FRAGMENT_SHADER,
            Self::StorageRead | Self::StorageWrite | Self::StorageReadWrite => {
                PipelineStages::COMPUTE_SHADER
            }
            Self::IndirectRead => PipelineStages::DRAW_INDIRECT,
            Self::TransferRead | Self::TransferWrite => PipelineStages::TRANSFER,
        }
    }

    /// Check if this access mode is a write operation.
    pub fn is_write(self) -> bool {
        self.access().has_writes()
    }
}

/// A single resource usage declared by a pass.
///
/// `is_output` is set by the builder depending on whether the usage was
/// connected as an input or an output. `version` is the resource version the
/// usage binds to: for inputs, the version live when the input was declared;
/// for outputs, the version the write creates.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceUsage {
    /// The resource being used.
    pub resource: ResourceHandle,
    /// Pipeline stages touching the resource.
    pub stages: PipelineStages,
    /// Memory access performed.
    pub access: AccessFlags,
    /// Required image layout ([`TextureLayout::Undefined`] for buffers).
    pub layout: TextureLayout,
    /// Attachment load operation.
    pub load_op: LoadOp,
    /// Attachment store operation.
    pub store_op: StoreOp,
    /// Clear value used with [`LoadOp::Clear`].
    pub clear_value: Option<ClearValue>,
    /// Whether this usage writes a new version of the resource.
    pub is_output: bool,
    /// Bound resource version.
    pub version: u32,
}

impl ResourceUsage {
    /// Create a usage with explicit stage/access/layout.
    pub fn new(
        resource: ResourceHandle,
        stages: PipelineStages,
        access: AccessFlags,
        layout: TextureLayout,
    ) -> Self {
        Self {
            resource,
            stages,
            access,
            layout,
            load_op: LoadOp::DontCare,
            store_op: StoreOp::Store,
            clear_value: None,
            is_output: false,
            version: 0,
        }
    }

    /// Create a texture usage from an access mode.
    pub fn texture(resource: ResourceHandle, mode: TextureAccessMode) -> Self {
        let mut usage = Self::new(resource, mode.stages(), mode.access(), mode.layout());
        if mode.layout().is_attachment() {
            usage.load_op = LoadOp::Load;
        }
        usage
    }

    /// Create a buffer usage from an access mode.
    pub fn buffer(resource: ResourceHandle, mode: BufferAccessMode) -> Self {
        Self::new(
            resource,
            mode.stages(),
            mode.access(),
            TextureLayout::Undefined,
        )
    }

    /// Override the pipeline stages.
    pub fn with_stages(mut self, stages: PipelineStages) -> Self {
        self.stages = stages;
        self
    }

    /// Set the load operation.
    pub fn with_load_op(mut self, load_op: LoadOp) -> Self {
        self.load_op = load_op;
        self
    }

    /// Set the store operation.
    pub fn with_store_op(mut self, store_op: StoreOp) -> Self {
        self.store_op = store_op;
        self
    }

    /// Clear to the given color at the start of the pass.
    pub fn with_clear_color(mut self, r: f32, g: f32, b: f32, a: f32) -> Self {
        self.load_op = LoadOp::Clear;
        self.clear_value = Some(ClearValue::Color([r, g, b, a]));
        self
    }

    /// Clear depth/stencil at the start of the pass.
    pub fn with_clear_depth(mut self, depth: f32, stencil: u32) -> Self {
        self.load_op = LoadOp::Clear;
        self.clear_value = Some(ClearValue::DepthStencil { depth, stencil });
        self
    }

    /// Check if this usage writes memory.
    pub fn is_write(&self) -> bool {
        self.access.has_writes()
    }

    /// Check if this usage is a render pass attachment.
    pub fn is_attachment(&self) -> bool {
        self.layout.is_attachment()
    }
}

/// A usage registered under a pass-local name.
#[derive(Debug, Clone, PartialEq)]
pub struct NamedUsage {
    /// Pass-local slot name ("color", "history", ...).
    pub name: String,
    /// The usage itself.
    pub usage: ResourceUsage,
}
