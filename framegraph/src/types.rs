//! Backend-agnostic GPU vocabulary used by the frame graph.
//!
//! These mirror the Vulkan/D3D12 concepts the compiler reasons about (queues,
//! image layouts, access and stage masks) without depending on any API crate.

use bitflags::bitflags;

/// Hardware queue a pass is submitted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum QueueType {
    /// Graphics queue (rasterization, also accepts compute and transfer work).
    #[default]
    Graphics,
    /// Async compute queue.
    Compute,
    /// Dedicated copy queue.
    Transfer,
}

impl QueueType {
    /// All queue types in submission order within a wave.
    pub const ALL: [QueueType; 3] = [QueueType::Graphics, QueueType::Compute, QueueType::Transfer];

    /// Stable index of this queue type (0..3).
    pub fn index(self) -> usize {
        match self {
            Self::Graphics => 0,
            Self::Compute => 1,
            Self::Transfer => 2,
        }
    }

    /// Short lowercase name for logs.
    pub fn name(self) -> &'static str {
        match self {
            Self::Graphics => "graphics",
            Self::Compute => "compute",
            Self::Transfer => "transfer",
        }
    }
}

/// Kind of resource tracked by the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// Color or storage image.
    Image,
    /// Linear buffer.
    Buffer,
    /// The presentable swapchain image. At most one per graph.
    SwapchainImage,
    /// Depth (and optionally stencil) image.
    Depth,
}

impl ResourceKind {
    /// Whether the resource has an image layout.
    pub fn is_image(self) -> bool {
        !matches!(self, Self::Buffer)
    }
}

/// Texture format enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[non_exhaustive]
pub enum TextureFormat {
    /// No format, used for buffers.
    Undefined,
    /// 32-bit red channel, float.
    R32Float,
    /// 8-bit RGBA channels, unsigned normalized.
    #[default]
    Rgba8Unorm,
    /// 8-bit RGBA channels, sRGB.
    Rgba8UnormSrgb,
    /// 8-bit BGRA channels, unsigned normalized.
    Bgra8Unorm,
    /// 8-bit BGRA channels, sRGB.
    Bgra8UnormSrgb,
    /// 16-bit RGBA channels, float.
    Rgba16Float,
    /// 32-bit RGBA channels, float.
    Rgba32Float,
    /// 16-bit depth.
    Depth16Unorm,
    /// 24-bit depth with 8-bit stencil.
    Depth24PlusStencil8,
    /// 32-bit depth, float.
    Depth32Float,
    /// 32-bit depth float with 8-bit stencil.
    Depth32FloatStencil8,
}

impl TextureFormat {
    /// Returns true if this is a depth or stencil format.
    pub fn is_depth_stencil(&self) -> bool {
        matches!(
            self,
            Self::Depth16Unorm
                | Self::Depth24PlusStencil8
                | Self::Depth32Float
                | Self::Depth32FloatStencil8
        )
    }

    /// Returns true if this format has a stencil component.
    pub fn has_stencil(&self) -> bool {
        matches!(self, Self::Depth24PlusStencil8 | Self::Depth32FloatStencil8)
    }

    /// Image aspects addressed by a barrier on this format.
    pub fn aspect_mask(&self) -> AspectMask {
        match self {
            Self::Undefined => AspectMask::empty(),
            f if f.has_stencil() => AspectMask::DEPTH | AspectMask::STENCIL,
            f if f.is_depth_stencil() => AspectMask::DEPTH,
            _ => AspectMask::COLOR,
        }
    }
}

bitflags! {
    /// Image aspects covered by a barrier.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AspectMask: u8 {
        const COLOR = 1 << 0;
        const DEPTH = 1 << 1;
        const STENCIL = 1 << 2;
    }
}

bitflags! {
    /// Memory access types, modelled on `VkAccessFlags`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
    pub struct AccessFlags: u32 {
        const INDIRECT_COMMAND_READ = 1 << 0;
        const INDEX_READ = 1 << 1;
        const VERTEX_ATTRIBUTE_READ = 1 << 2;
        const UNIFORM_READ = 1 << 3;
        const SHADER_READ = 1 << 4;
        const SHADER_WRITE = 1 << 5;
        const COLOR_ATTACHMENT_READ = 1 << 6;
        const COLOR_ATTACHMENT_WRITE = 1 << 7;
        const DEPTH_STENCIL_READ = 1 << 8;
        const DEPTH_STENCIL_WRITE = 1 << 9;
        const TRANSFER_READ = 1 << 10;
        const TRANSFER_WRITE = 1 << 11;
        const HOST_READ = 1 << 12;
        const HOST_WRITE = 1 << 13;
        const MEMORY_READ = 1 << 14;
        const MEMORY_WRITE = 1 << 15;
    }
}

impl AccessFlags {
    /// Every flag that denotes a write.
    pub const WRITES: AccessFlags = AccessFlags::SHADER_WRITE
        .union(AccessFlags::COLOR_ATTACHMENT_WRITE)
        .union(AccessFlags::DEPTH_STENCIL_WRITE)
        .union(AccessFlags::TRANSFER_WRITE)
        .union(AccessFlags::HOST_WRITE)
        .union(AccessFlags::MEMORY_WRITE);

    /// Check if any write access is present.
    pub fn has_writes(self) -> bool {
        self.intersects(Self::WRITES)
    }
}

impl Default for AccessFlags {
    fn default() -> Self {
        Self::empty()
    }
}

bitflags! {
    /// Pipeline stages, modelled on `VkPipelineStageFlags`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
    pub struct PipelineStages: u32 {
        const TOP_OF_PIPE = 1 << 0;
        const DRAW_INDIRECT = 1 << 1;
        const VERTEX_INPUT = 1 << 2;
        const VERTEX_SHADER = 1 << 3;
        const FRAGMENT_SHADER = 1 << 4;
        const EARLY_FRAGMENT_TESTS = 1 << 5;
        const LATE_FRAGMENT_TESTS = 1 << 6;
        const COLOR_ATTACHMENT_OUTPUT = 1 << 7;
        const COMPUTE_SHADER = 1 << 8;
        const TRANSFER = 1 << 9;
        const BOTTOM_OF_PIPE = 1 << 10;
        const HOST = 1 << 11;
        const ALL_COMMANDS = 1 << 12;
    }
}

impl Default for PipelineStages {
    fn default() -> Self {
        Self::empty()
    }
}

/// Image layout states, abstracted from `VkImageLayout`.
///
/// Buffers always stay in [`TextureLayout::Undefined`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureLayout {
    /// Initial state, contents undefined.
    #[default]
    Undefined,
    /// General layout (storage images).
    General,
    /// Optimal for color attachment writes.
    ColorAttachment,
    /// Optimal for depth/stencil attachment writes.
    DepthStencilAttachment,
    /// Optimal for depth read-only (sampling + depth testing).
    DepthStencilReadOnly,
    /// Optimal for shader sampling.
    ShaderReadOnly,
    /// Optimal for transfer source operations.
    TransferSrc,
    /// Optimal for transfer destination operations.
    TransferDst,
    /// Optimal for presentation to the swapchain.
    PresentSrc,
}

impl TextureLayout {
    /// Whether this layout is used by render pass attachments.
    pub fn is_attachment(self) -> bool {
        matches!(
            self,
            Self::ColorAttachment | Self::DepthStencilAttachment | Self::DepthStencilReadOnly
        )
    }
}

/// Load operation for an attachment at the start of a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LoadOp {
    /// Preserve existing contents.
    Load,
    /// Clear to the usage's clear value.
    Clear,
    /// Contents are undefined.
    #[default]
    DontCare,
}

/// Store operation for an attachment at the end of a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StoreOp {
    /// Write results to memory.
    #[default]
    Store,
    /// Results may be discarded.
    DontCare,
}

/// Clear value for an attachment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClearValue {
    /// RGBA color.
    Color([f32; 4]),
    /// Depth and stencil.
    DepthStencil {
        /// Depth clear value.
        depth: f32,
        /// Stencil clear value.
        stencil: u32,
    },
}

/// Description of an image resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageDesc {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Pixel format.
    pub format: TextureFormat,
    /// Mip level count.
    pub mip_levels: u32,
    /// Array layer count.
    pub array_layers: u32,
}

impl ImageDesc {
    /// A single-mip, single-layer 2D image.
    pub fn new_2d(width: u32, height: u32, format: TextureFormat) -> Self {
        Self {
            width,
            height,
            format,
            mip_levels: 1,
            array_layers: 1,
        }
    }

    /// Set the mip level count.
    pub fn with_mip_levels(mut self, mip_levels: u32) -> Self {
        self.mip_levels = mip_levels;
        self
    }

    /// Set the array layer count.
    pub fn with_array_layers(mut self, array_layers: u32) -> Self {
        self.array_layers = array_layers;
        self
    }
}

/// Description of a buffer resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferDesc {
    /// Size in bytes.
    pub size: u64,
}

impl BufferDesc {
    /// Create a buffer description of `size` bytes.
    pub fn new(size: u64) -> Self {
        Self { size }
    }
}

/// Image or buffer description of a resource node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceDesc {
    /// Image resource (color, depth or swapchain).
    Image(ImageDesc),
    /// Buffer resource.
    Buffer(BufferDesc),
}

impl ResourceDesc {
    /// Format of an image, [`TextureFormat::Undefined`] for buffers.
    pub fn format(&self) -> TextureFormat {
        match self {
            Self::Image(desc) => desc.format,
            Self::Buffer(_) => TextureFormat::Undefined,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aspect_mask_from_format() {
        assert_eq!(TextureFormat::Rgba8Unorm.aspect_mask(), AspectMask::COLOR);
        assert_eq!(TextureFormat::Depth32Float.aspect_mask(), AspectMask::DEPTH);
        assert_eq!(
            TextureFormat::Depth24PlusStencil8.aspect_mask(),
            AspectMask::DEPTH | AspectMask::STENCIL
        );
        assert!(TextureFormat::Undefined.aspect_mask().is_empty());
    }

    #[test]
    fn test_access_writes() {
        assert!(AccessFlags::SHADER_WRITE.has_writes());
        assert!((AccessFlags::SHADER_READ | AccessFlags::TRANSFER_WRITE).has_writes());
        assert!(!(AccessFlags::SHADER_READ | AccessFlags::UNIFORM_READ).has_writes());
        assert!(!AccessFlags::empty().has_writes());
    }

    #[test]
    fn test_queue_indices_are_distinct() {
        let indices: Vec<_> = QueueType::ALL.iter().map(|q| q.index()).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[test]
    fn test_attachment_layouts() {
        assert!(TextureLayout::ColorAttachment.is_attachment());
        assert!(TextureLayout::DepthStencilAttachment.is_attachment());
        assert!(!TextureLayout::ShaderReadOnly.is_attachment());
        assert!(!TextureLayout::Undefined.is_attachment());
    }
}
