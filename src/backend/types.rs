//! Common types shared between the render graph and backends

use bitflags::bitflags;

/// Texture format enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureFormat {
    #[default]
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Bgra8Unorm,
    Rgba16Float,
    Rgba32Float,
    R32Float,
    Rg16Float,
    Depth16Unorm,
    Depth32Float,
    Depth24PlusStencil8,
}

impl TextureFormat {
    pub fn bytes_per_pixel(&self) -> u32 {
        match self {
            TextureFormat::Depth16Unorm => 2,
            TextureFormat::Rgba8Unorm
            | TextureFormat::Rgba8UnormSrgb
            | TextureFormat::Bgra8Unorm
            | TextureFormat::Depth32Float
            | TextureFormat::Depth24PlusStencil8
            | TextureFormat::R32Float
            | TextureFormat::Rg16Float => 4,
            TextureFormat::Rgba16Float => 8,
            TextureFormat::Rgba32Float => 16,
        }
    }
}

bitflags! {
    /// Usage flags for textures.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TextureUsage: u32 {
        /// Texture can be copied from.
        const COPY_SRC = 1 << 0;
        /// Texture can be copied to.
        const COPY_DST = 1 << 1;
        /// Texture can be sampled in a shader.
        const SHADER_RESOURCE = 1 << 2;
        /// Texture can be written as an unordered access view.
        const UNORDERED_ACCESS = 1 << 3;
        /// Texture can be bound as a color render target.
        const RENDER_TARGET = 1 << 4;
        /// Texture can be bound as a depth-stencil target.
        const DEPTH_STENCIL = 1 << 5;
    }
}

impl Default for TextureUsage {
    fn default() -> Self {
        Self::empty()
    }
}

bitflags! {
    /// Usage flags for buffers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        const COPY_SRC = 1 << 0;
        const COPY_DST = 1 << 1;
        const VERTEX = 1 << 2;
        const INDEX = 1 << 3;
        const CONSTANT = 1 << 4;
        const SHADER_RESOURCE = 1 << 5;
        const UNORDERED_ACCESS = 1 << 6;
        const INDIRECT = 1 << 7;
    }
}

impl Default for BufferUsage {
    fn default() -> Self {
        Self::empty()
    }
}

/// Memory heap a resource is placed in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HeapType {
    #[default]
    Default,
    Upload,
    Readback,
}

/// Optimized clear value stored with a texture descriptor
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClearValue {
    Color([f32; 4]),
    DepthStencil { depth: f32, stencil: u8 },
}

/// Descriptor for creating a texture
#[derive(Debug, Clone, PartialEq)]
pub struct TextureDesc {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub array_size: u32,
    pub mip_levels: u32,
    pub sample_count: u32,
    pub format: TextureFormat,
    pub usage: TextureUsage,
    pub heap: HeapType,
    pub clear_value: Option<ClearValue>,
}

impl Default for TextureDesc {
    fn default() -> Self {
        Self {
            width: 1,
            height: 1,
            depth: 1,
            array_size: 1,
            mip_levels: 1,
            sample_count: 1,
            format: TextureFormat::Rgba8Unorm,
            usage: TextureUsage::empty(),
            heap: HeapType::Default,
            clear_value: None,
        }
    }
}

impl TextureDesc {
    pub fn new_2d(width: u32, height: u32, format: TextureFormat, usage: TextureUsage) -> Self {
        Self {
            width,
            height,
            format,
            usage,
            ..Default::default()
        }
    }

    pub fn with_clear_value(mut self, clear_value: ClearValue) -> Self {
        self.clear_value = Some(clear_value);
        self
    }

    pub fn with_mip_levels(mut self, mip_levels: u32) -> Self {
        self.mip_levels = mip_levels;
        self
    }

    /// Whether a physical texture created from `self` can stand in for one requested with `requested`.
    ///
    /// Shape, format and placement must match exactly; usage flags only need to be a superset.
    pub fn is_compatible(&self, requested: &TextureDesc) -> bool {
        self.width == requested.width
            && self.height == requested.height
            && self.depth == requested.depth
            && self.array_size == requested.array_size
            && self.mip_levels == requested.mip_levels
            && self.sample_count == requested.sample_count
            && self.format == requested.format
            && self.heap == requested.heap
            && self.usage.contains(requested.usage)
            && self.clear_value == requested.clear_value
    }

    /// Approximate memory footprint in bytes
    pub fn size_in_bytes(&self) -> u64 {
        let mut total = 0u64;
        for mip in 0..self.mip_levels.max(1) {
            let w = (self.width >> mip).max(1) as u64;
            let h = (self.height >> mip).max(1) as u64;
            let d = (self.depth >> mip).max(1) as u64;
            total += w * h * d * self.format.bytes_per_pixel() as u64;
        }
        total * self.array_size.max(1) as u64 * self.sample_count.max(1) as u64
    }
}

/// Descriptor for creating a buffer
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BufferDesc {
    pub size: u64,
    pub stride: u32,
    pub usage: BufferUsage,
    pub heap: HeapType,
}

impl Default for BufferDesc {
    fn default() -> Self {
        Self {
            size: 0,
            stride: 0,
            usage: BufferUsage::empty(),
            heap: HeapType::Default,
        }
    }
}

impl BufferDesc {
    pub fn new(size: u64, usage: BufferUsage) -> Self {
        Self {
            size,
            usage,
            ..Default::default()
        }
    }

    pub fn structured(count: u64, stride: u32, usage: BufferUsage) -> Self {
        Self {
            size: count * stride as u64,
            stride,
            usage,
            heap: HeapType::Default,
        }
    }

    /// Whether a physical buffer created from `self` can stand in for one requested with `requested`.
    pub fn is_compatible(&self, requested: &BufferDesc) -> bool {
        self.size == requested.size
            && self.stride == requested.stride
            && self.heap == requested.heap
            && self.usage.contains(requested.usage)
    }
}

bitflags! {
    /// GPU resource state used for transitions.
    ///
    /// Read states may be combined; write states are exclusive.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ResourceState: u32 {
        const COMMON = 0;
        const VERTEX_AND_CONSTANT_BUFFER = 1 << 0;
        const INDEX_BUFFER = 1 << 1;
        const RENDER_TARGET = 1 << 2;
        const UNORDERED_ACCESS = 1 << 3;
        const DEPTH_WRITE = 1 << 4;
        const DEPTH_READ = 1 << 5;
        const NON_PIXEL_SHADER_RESOURCE = 1 << 6;
        const PIXEL_SHADER_RESOURCE = 1 << 7;
        const INDIRECT_ARGUMENT = 1 << 8;
        const COPY_DEST = 1 << 9;
        const COPY_SOURCE = 1 << 10;
        const PRESENT = 1 << 11;
        const ALL_SHADER_RESOURCE = Self::NON_PIXEL_SHADER_RESOURCE.bits()
            | Self::PIXEL_SHADER_RESOURCE.bits();
    }
}

impl Default for ResourceState {
    fn default() -> Self {
        Self::COMMON
    }
}

impl ResourceState {
    const WRITE_STATES: Self = Self::RENDER_TARGET
        .union(Self::UNORDERED_ACCESS)
        .union(Self::DEPTH_WRITE)
        .union(Self::COPY_DEST);

    pub fn is_write(&self) -> bool {
        self.intersects(Self::WRITE_STATES)
    }

    pub fn is_read_only(&self) -> bool {
        !self.is_empty() && !self.is_write()
    }

    /// Combine the states two users of one resource require within a dependency level.
    ///
    /// Read states merge into one combined read state; a write state always wins.
    pub fn combine(self, other: Self) -> Self {
        if self.is_read_only() && other.is_read_only() {
            self | other
        } else if self.is_write() {
            self
        } else {
            other
        }
    }
}

/// Viewport configuration for rendering
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: 0.0,
            height: 0.0,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

impl Viewport {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }

    pub fn from_size(width: u32, height: u32) -> Self {
        Self::new(0.0, 0.0, width as f32, height as f32)
    }
}

/// Scissor rectangle in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScissorRect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl ScissorRect {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn from_size(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }
}

/// Face culling mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CullMode {
    None,
    Front,
    #[default]
    Back,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FillMode {
    #[default]
    Solid,
    Wireframe,
}

/// Depth comparison function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CompareFunction {
    Never,
    #[default]
    Less,
    Equal,
    LessEqual,
    Greater,
    NotEqual,
    GreaterEqual,
    Always,
}

/// Rasterizer state bound on the command stream
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RasterizerState {
    pub fill_mode: FillMode,
    pub cull_mode: CullMode,
    pub depth_bias: i32,
    pub slope_scaled_depth_bias: f32,
    pub depth_clip: bool,
}

impl Default for RasterizerState {
    fn default() -> Self {
        Self {
            fill_mode: FillMode::Solid,
            cull_mode: CullMode::Back,
            depth_bias: 0,
            slope_scaled_depth_bias: 0.0,
            depth_clip: true,
        }
    }
}

impl RasterizerState {
    /// Front-face culling with a slope-scaled bias, used for depth-only shadow rendering
    pub fn shadow_map() -> Self {
        Self {
            fill_mode: FillMode::Solid,
            cull_mode: CullMode::Front,
            depth_bias: 100,
            slope_scaled_depth_bias: 1.5,
            depth_clip: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PrimitiveTopology {
    PointList,
    LineList,
    #[default]
    TriangleList,
    TriangleStrip,
}

/// Index format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexFormat {
    Uint16,
    Uint32,
}

/// Depth state of a pipeline
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepthStencilState {
    pub format: TextureFormat,
    pub depth_write_enabled: bool,
    pub depth_compare: CompareFunction,
}

/// Pipeline-state object description
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineStateDesc {
    pub label: String,
    pub vertex_shader: String,
    pub pixel_shader: Option<String>,
    pub color_formats: Vec<TextureFormat>,
    pub depth_stencil: Option<DepthStencilState>,
    pub rasterizer: RasterizerState,
    pub topology: PrimitiveTopology,
    pub instanced: bool,
}
