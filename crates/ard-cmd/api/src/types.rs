use bitflags::bitflags;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Format {
    // R8
    R8Unorm,
    R8UInt,

    // R16
    R16Unorm,
    R16SFloat,

    // R32
    R32UInt,
    R32SFloat,

    // RG16
    Rg16SFloat,

    // RGBA8
    Rgba8Unorm,
    Rgba8Srgb,
    Rgba8UInt,

    // RGBA16
    Rgba16SFloat,

    // RGBA32
    Rgba32SFloat,

    // BGRA8
    Bgra8Unorm,
    Bgra8Srgb,

    // Packed
    Rgb10A2Unorm,

    // Compressed
    BC7Unorm,

    // Depth
    D16Unorm,
    D24UnormS8Uint,
    D32Sfloat,
    D32SfloatS8Uint,
    S8Uint,
}

/// The hardware generation a device belongs to. Generations select register layouts, errata and
/// compression rules through the device capability table.
#[derive(Debug, Serialize, Deserialize, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Generation {
    Gfx6,
    Gfx7,
    Gfx8,
    Gfx9,
    Gfx10,
    Gfx10_3,
    Gfx11,
}

#[derive(Debug, Serialize, Deserialize, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum QueueFamily {
    /// Supports graphics, compute and transfer work.
    Graphics,
    /// Supports compute and transfer work. Usually runs asynchronously to the graphics family.
    Compute,
    /// Supports transfer work only.
    Transfer,
}

bitflags! {
    #[derive(Debug, Serialize, Deserialize, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
    #[serde(transparent)]
    pub struct QueueFamilies: u32 {
        const GRAPHICS = 0b001;
        const COMPUTE  = 0b010;
        const TRANSFER = 0b100;
    }
}

/// The kind of hardware ring an instruction stream is built for.
#[derive(Debug, Serialize, Deserialize, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RingType {
    Gfx,
    Compute,
    Dma,
}

#[derive(Debug, Serialize, Deserialize, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SharingMode {
    /// Only one queue family may access the resource at a time. Ownership transfers are explicit.
    Exclusive,
    /// The listed queue families may access the resource concurrently.
    Concurrent(QueueFamilies),
}

#[derive(Debug, Serialize, Deserialize, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MultiSamples {
    Count1,
    Count2,
    Count4,
    Count8,
}

bitflags! {
    #[derive(Debug, Serialize, Deserialize, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
    #[serde(transparent)]
    pub struct BufferUsage: u32 {
        const TRANSFER_SRC    = 0b0000001;
        const TRANSFER_DST    = 0b0000010;
        const UNIFORM_BUFFER  = 0b0000100;
        const STORAGE_BUFFER  = 0b0001000;
        const VERTEX_BUFFER   = 0b0010000;
        const INDEX_BUFFER    = 0b0100000;
        const INDIRECT_BUFFER = 0b1000000;
    }
}

bitflags! {
    #[derive(Debug, Serialize, Deserialize, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
    #[serde(transparent)]
    pub struct ImageUsage: u32 {
        const TRANSFER_SRC             = 0b00000001;
        const TRANSFER_DST             = 0b00000010;
        const SAMPLED                  = 0b00000100;
        const STORAGE                  = 0b00001000;
        const COLOR_ATTACHMENT         = 0b00010000;
        const DEPTH_STENCIL_ATTACHMENT = 0b00100000;
        const INPUT_ATTACHMENT         = 0b01000000;
        const SCANOUT                  = 0b10000000;
    }
}

#[derive(Debug, Serialize, Deserialize, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ImageType {
    Type1D,
    Type2D,
    Type3D,
}

#[derive(Debug, Default, Serialize, Deserialize, Copy, Clone, PartialEq, Eq, Hash)]
pub enum IndexType {
    #[default]
    U16,
    U32,
    U8,
}

#[derive(Debug, Default, Serialize, Deserialize, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u32)]
pub enum PrimitiveTopology {
    PointList,
    LineList,
    LineStrip,
    #[default]
    TriangleList,
    TriangleStrip,
    TriangleFan,
    PatchList,
}

#[derive(Debug, Default, Serialize, Deserialize, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u32)]
pub enum PolygonMode {
    #[default]
    Fill,
    Line,
    Point,
}

#[derive(Debug, Default, Serialize, Deserialize, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u32)]
pub enum CullMode {
    #[default]
    None,
    Front,
    Back,
    FrontAndBack,
}

#[derive(Debug, Default, Serialize, Deserialize, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u32)]
pub enum FrontFace {
    #[default]
    CounterClockwise,
    Clockwise,
}

#[derive(Debug, Default, Serialize, Deserialize, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u32)]
pub enum CompareOp {
    #[default]
    Never,
    Less,
    Equal,
    LessOrEqual,
    Greater,
    NotEqual,
    GreaterOrEqual,
    Always,
}

#[derive(Debug, Default, Serialize, Deserialize, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u32)]
pub enum StencilOp {
    #[default]
    Keep,
    Zero,
    Replace,
    IncrementAndClamp,
    DecrementAndClamp,
    Invert,
    IncrementAndWrap,
    DecrementAndWrap,
}

#[derive(Debug, Default, Serialize, Deserialize, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u32)]
pub enum LogicOp {
    Clear,
    And,
    AndReverse,
    #[default]
    Copy,
    AndInverted,
    NoOp,
    Xor,
    Or,
    Nor,
    Equivalent,
    Invert,
    OrReverse,
    CopyInverted,
    OrInverted,
    Nand,
    Set,
}

#[derive(Debug, Serialize, Deserialize, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BindPoint {
    Graphics,
    Compute,
}

#[derive(Debug, Serialize, Deserialize, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ShaderStage {
    Vertex,
    TessellationControl,
    TessellationEvaluation,
    Geometry,
    Fragment,
    Compute,
}

bitflags! {
    #[derive(Debug, Serialize, Deserialize, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
    #[serde(transparent)]
    pub struct ShaderStages: u32 {
        const VERTEX                  = 0b000001;
        const TESSELLATION_CONTROL    = 0b000010;
        const TESSELLATION_EVALUATION = 0b000100;
        const GEOMETRY                = 0b001000;
        const FRAGMENT                = 0b010000;
        const COMPUTE                 = 0b100000;
        const ALL_GRAPHICS            = 0b011111;
    }
}

impl ShaderStage {
    pub const COUNT: usize = 6;

    pub const ALL: [ShaderStage; Self::COUNT] = [
        ShaderStage::Vertex,
        ShaderStage::TessellationControl,
        ShaderStage::TessellationEvaluation,
        ShaderStage::Geometry,
        ShaderStage::Fragment,
        ShaderStage::Compute,
    ];

    #[inline(always)]
    pub const fn flag(self) -> ShaderStages {
        match self {
            ShaderStage::Vertex => ShaderStages::VERTEX,
            ShaderStage::TessellationControl => ShaderStages::TESSELLATION_CONTROL,
            ShaderStage::TessellationEvaluation => ShaderStages::TESSELLATION_EVALUATION,
            ShaderStage::Geometry => ShaderStages::GEOMETRY,
            ShaderStage::Fragment => ShaderStages::FRAGMENT,
            ShaderStage::Compute => ShaderStages::COMPUTE,
        }
    }

    #[inline(always)]
    pub const fn bind_point(self) -> BindPoint {
        match self {
            ShaderStage::Compute => BindPoint::Compute,
            _ => BindPoint::Graphics,
        }
    }
}

impl ShaderStages {
    /// Iterates over every individual stage contained in the set.
    #[inline]
    pub fn stages(self) -> impl Iterator<Item = ShaderStage> {
        ShaderStage::ALL
            .into_iter()
            .filter(move |stage| self.contains(stage.flag()))
    }
}

impl QueueFamily {
    #[inline(always)]
    pub const fn flag(self) -> QueueFamilies {
        match self {
            QueueFamily::Graphics => QueueFamilies::GRAPHICS,
            QueueFamily::Compute => QueueFamilies::COMPUTE,
            QueueFamily::Transfer => QueueFamilies::TRANSFER,
        }
    }

    #[inline(always)]
    pub const fn ring(self) -> RingType {
        match self {
            QueueFamily::Graphics => RingType::Gfx,
            QueueFamily::Compute => RingType::Compute,
            QueueFamily::Transfer => RingType::Dma,
        }
    }
}

impl MultiSamples {
    #[inline(always)]
    pub const fn count(self) -> u32 {
        match self {
            MultiSamples::Count1 => 1,
            MultiSamples::Count2 => 2,
            MultiSamples::Count4 => 4,
            MultiSamples::Count8 => 8,
        }
    }
}

impl IndexType {
    #[inline(always)]
    pub const fn size(self) -> u64 {
        match self {
            IndexType::U8 => 1,
            IndexType::U16 => 2,
            IndexType::U32 => 4,
        }
    }
}

impl Format {
    #[inline(always)]
    pub fn is_color(&self) -> bool {
        !(self.is_depth() || self.has_stencil())
    }

    #[inline(always)]
    pub fn is_depth(&self) -> bool {
        matches!(
            *self,
            Format::D16Unorm | Format::D24UnormS8Uint | Format::D32Sfloat | Format::D32SfloatS8Uint
        )
    }

    #[inline(always)]
    pub fn has_stencil(&self) -> bool {
        matches!(
            *self,
            Format::D24UnormS8Uint | Format::D32SfloatS8Uint | Format::S8Uint
        )
    }

    #[inline(always)]
    pub fn is_block_compressed(&self) -> bool {
        matches!(*self, Format::BC7Unorm)
    }

    /// Size in bytes of a single texel (or block for compressed formats).
    pub fn texel_size(&self) -> u32 {
        match *self {
            Format::R8Unorm | Format::R8UInt | Format::S8Uint => 1,
            Format::R16Unorm | Format::R16SFloat | Format::D16Unorm => 2,
            Format::R32UInt
            | Format::R32SFloat
            | Format::Rg16SFloat
            | Format::Rgba8Unorm
            | Format::Rgba8Srgb
            | Format::Rgba8UInt
            | Format::Bgra8Unorm
            | Format::Bgra8Srgb
            | Format::Rgb10A2Unorm
            | Format::D24UnormS8Uint
            | Format::D32Sfloat => 4,
            Format::Rgba16SFloat | Format::D32SfloatS8Uint => 8,
            Format::Rgba32SFloat | Format::BC7Unorm => 16,
        }
    }
}
