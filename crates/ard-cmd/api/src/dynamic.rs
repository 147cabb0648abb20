//! Dynamic state identifiers and values.
//!
//! Every value type is plain-old-data so the tracker can compare the "current" and the
//! "last-emitted" copy byte for byte.

use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::types::{CompareOp, CullMode, FrontFace, LogicOp, PrimitiveTopology, StencilOp};

pub const MAX_VIEWPORTS: usize = 16;
pub const MAX_SCISSORS: usize = 16;
pub const MAX_DISCARD_RECTANGLES: usize = 8;
pub const MAX_SAMPLE_LOCATIONS: usize = 16;
pub const MAX_COLOR_ATTACHMENTS: usize = 8;

/// Dense enumeration of every independently tracked piece of dynamic state.
#[derive(Debug, Serialize, Deserialize, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum DynamicState {
    Viewport,
    Scissor,
    LineWidth,
    DepthBias,
    BlendConstants,
    DepthBounds,
    StencilCompareMask,
    StencilWriteMask,
    StencilReference,
    DiscardRectangle,
    SampleLocations,
    LineStipple,
    CullMode,
    FrontFace,
    PrimitiveTopology,
    DepthTestEnable,
    DepthWriteEnable,
    DepthCompareOp,
    DepthBoundsTestEnable,
    StencilTestEnable,
    StencilOp,
    FragmentShadingRate,
    PrimitiveRestartEnable,
    RasterizerDiscardEnable,
    DepthBiasEnable,
    LogicOp,
    ColorWriteEnable,
    PatchControlPoints,
}

bitflags! {
    /// One bit per [`DynamicState`].
    #[derive(Debug, Default, Serialize, Deserialize, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
    #[serde(transparent)]
    pub struct DynamicStateMask: u64 {
        const VIEWPORT                 = 1 << 0;
        const SCISSOR                  = 1 << 1;
        const LINE_WIDTH               = 1 << 2;
        const DEPTH_BIAS               = 1 << 3;
        const BLEND_CONSTANTS          = 1 << 4;
        const DEPTH_BOUNDS             = 1 << 5;
        const STENCIL_COMPARE_MASK     = 1 << 6;
        const STENCIL_WRITE_MASK       = 1 << 7;
        const STENCIL_REFERENCE        = 1 << 8;
        const DISCARD_RECTANGLE        = 1 << 9;
        const SAMPLE_LOCATIONS         = 1 << 10;
        const LINE_STIPPLE             = 1 << 11;
        const CULL_MODE                = 1 << 12;
        const FRONT_FACE               = 1 << 13;
        const PRIMITIVE_TOPOLOGY       = 1 << 14;
        const DEPTH_TEST_ENABLE        = 1 << 15;
        const DEPTH_WRITE_ENABLE       = 1 << 16;
        const DEPTH_COMPARE_OP         = 1 << 17;
        const DEPTH_BOUNDS_TEST_ENABLE = 1 << 18;
        const STENCIL_TEST_ENABLE      = 1 << 19;
        const STENCIL_OP               = 1 << 20;
        const FRAGMENT_SHADING_RATE    = 1 << 21;
        const PRIMITIVE_RESTART_ENABLE = 1 << 22;
        const RASTERIZER_DISCARD_ENABLE = 1 << 23;
        const DEPTH_BIAS_ENABLE        = 1 << 24;
        const LOGIC_OP                 = 1 << 25;
        const COLOR_WRITE_ENABLE       = 1 << 26;
        const PATCH_CONTROL_POINTS     = 1 << 27;
    }
}

impl DynamicState {
    pub const COUNT: usize = 28;

    pub const ALL: [DynamicState; Self::COUNT] = [
        DynamicState::Viewport,
        DynamicState::Scissor,
        DynamicState::LineWidth,
        DynamicState::DepthBias,
        DynamicState::BlendConstants,
        DynamicState::DepthBounds,
        DynamicState::StencilCompareMask,
        DynamicState::StencilWriteMask,
        DynamicState::StencilReference,
        DynamicState::DiscardRectangle,
        DynamicState::SampleLocations,
        DynamicState::LineStipple,
        DynamicState::CullMode,
        DynamicState::FrontFace,
        DynamicState::PrimitiveTopology,
        DynamicState::DepthTestEnable,
        DynamicState::DepthWriteEnable,
        DynamicState::DepthCompareOp,
        DynamicState::DepthBoundsTestEnable,
        DynamicState::StencilTestEnable,
        DynamicState::StencilOp,
        DynamicState::FragmentShadingRate,
        DynamicState::PrimitiveRestartEnable,
        DynamicState::RasterizerDiscardEnable,
        DynamicState::DepthBiasEnable,
        DynamicState::LogicOp,
        DynamicState::ColorWriteEnable,
        DynamicState::PatchControlPoints,
    ];

    #[inline(always)]
    pub const fn flag(self) -> DynamicStateMask {
        DynamicStateMask::from_bits_retain(1 << self as u64)
    }

    #[inline(always)]
    pub const fn index(self) -> usize {
        self as usize
    }
}

impl DynamicStateMask {
    /// Iterates over each state contained in the mask.
    #[inline]
    pub fn states(self) -> impl Iterator<Item = DynamicState> {
        DynamicState::ALL
            .into_iter()
            .filter(move |state| self.contains(state.flag()))
    }
}

#[repr(C)]
#[derive(Debug, Default, Serialize, Deserialize, Copy, Clone, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

#[repr(C)]
#[derive(Debug, Default, Serialize, Deserialize, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Scissor {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

#[repr(C)]
#[derive(Debug, Default, Serialize, Deserialize, Copy, Clone, PartialEq)]
pub struct DepthBias {
    pub constant_factor: f32,
    pub clamp: f32,
    pub slope_factor: f32,
}

#[repr(C)]
#[derive(Debug, Default, Serialize, Deserialize, Copy, Clone, PartialEq)]
pub struct DepthBounds {
    pub min: f32,
    pub max: f32,
}

/// A per-face stencil value (compare mask, write mask or reference).
#[repr(C)]
#[derive(Debug, Default, Serialize, Deserialize, Copy, Clone, PartialEq, Eq, Hash)]
pub struct StencilFaces {
    pub front: u32,
    pub back: u32,
}

#[repr(C)]
#[derive(Debug, Default, Serialize, Deserialize, Copy, Clone, PartialEq, Eq, Hash)]
pub struct StencilOpState {
    pub fail: u32,
    pub pass: u32,
    pub depth_fail: u32,
    pub compare: u32,
}

#[repr(C)]
#[derive(Debug, Default, Serialize, Deserialize, Copy, Clone, PartialEq, Eq, Hash)]
pub struct StencilOps {
    pub front: StencilOpState,
    pub back: StencilOpState,
}

#[repr(C)]
#[derive(Debug, Default, Serialize, Deserialize, Copy, Clone, PartialEq)]
pub struct SampleLocations {
    pub samples_per_pixel: u32,
    pub grid_width: u32,
    pub grid_height: u32,
    pub count: u32,
    pub locations: [[f32; 2]; MAX_SAMPLE_LOCATIONS],
}

#[repr(C)]
#[derive(Debug, Default, Serialize, Deserialize, Copy, Clone, PartialEq, Eq, Hash)]
pub struct LineStipple {
    pub factor: u32,
    pub pattern: u32,
}

#[repr(C)]
#[derive(Debug, Default, Serialize, Deserialize, Copy, Clone, PartialEq, Eq, Hash)]
pub struct FragmentShadingRate {
    pub width: u32,
    pub height: u32,
    pub combiner_ops: [u32; 2],
}

// SAFETY: All of these are `repr(C)`, made of 4-byte scalars and contain no padding.
unsafe impl Zeroable for Viewport {}
unsafe impl Pod for Viewport {}
unsafe impl Zeroable for Scissor {}
unsafe impl Pod for Scissor {}
unsafe impl Zeroable for DepthBias {}
unsafe impl Pod for DepthBias {}
unsafe impl Zeroable for DepthBounds {}
unsafe impl Pod for DepthBounds {}
unsafe impl Zeroable for StencilFaces {}
unsafe impl Pod for StencilFaces {}
unsafe impl Zeroable for StencilOpState {}
unsafe impl Pod for StencilOpState {}
unsafe impl Zeroable for StencilOps {}
unsafe impl Pod for StencilOps {}
unsafe impl Zeroable for SampleLocations {}
unsafe impl Pod for SampleLocations {}
unsafe impl Zeroable for LineStipple {}
unsafe impl Pod for LineStipple {}
unsafe impl Zeroable for FragmentShadingRate {}
unsafe impl Pod for FragmentShadingRate {}

impl StencilOpState {
    pub fn new(fail: StencilOp, pass: StencilOp, depth_fail: StencilOp, compare: CompareOp) -> Self {
        Self {
            fail: fail as u32,
            pass: pass as u32,
            depth_fail: depth_fail as u32,
            compare: compare as u32,
        }
    }
}

/// A new value for one piece of dynamic state.
///
/// Array states take a `first` slot and a slice of consecutive values starting at that slot.
#[derive(Debug, Clone, PartialEq)]
pub enum DynamicStateValue {
    Viewports {
        first: u32,
        viewports: SmallVec<[Viewport; 2]>,
    },
    Scissors {
        first: u32,
        scissors: SmallVec<[Scissor; 2]>,
    },
    LineWidth(f32),
    DepthBias(DepthBias),
    BlendConstants([f32; 4]),
    DepthBounds(DepthBounds),
    StencilCompareMask(StencilFaces),
    StencilWriteMask(StencilFaces),
    StencilReference(StencilFaces),
    DiscardRectangles {
        first: u32,
        rectangles: SmallVec<[Scissor; 2]>,
    },
    SampleLocations(SampleLocations),
    LineStipple(LineStipple),
    CullMode(CullMode),
    FrontFace(FrontFace),
    PrimitiveTopology(PrimitiveTopology),
    DepthTestEnable(bool),
    DepthWriteEnable(bool),
    DepthCompareOp(CompareOp),
    DepthBoundsTestEnable(bool),
    StencilTestEnable(bool),
    StencilOp(StencilOps),
    FragmentShadingRate(FragmentShadingRate),
    PrimitiveRestartEnable(bool),
    RasterizerDiscardEnable(bool),
    DepthBiasEnable(bool),
    LogicOp(LogicOp),
    /// One bit per color attachment.
    ColorWriteEnable(u32),
    PatchControlPoints(u32),
}

impl DynamicStateValue {
    /// The state this value belongs to.
    pub fn state(&self) -> DynamicState {
        match self {
            DynamicStateValue::Viewports { .. } => DynamicState::Viewport,
            DynamicStateValue::Scissors { .. } => DynamicState::Scissor,
            DynamicStateValue::LineWidth(_) => DynamicState::LineWidth,
            DynamicStateValue::DepthBias(_) => DynamicState::DepthBias,
            DynamicStateValue::BlendConstants(_) => DynamicState::BlendConstants,
            DynamicStateValue::DepthBounds(_) => DynamicState::DepthBounds,
            DynamicStateValue::StencilCompareMask(_) => DynamicState::StencilCompareMask,
            DynamicStateValue::StencilWriteMask(_) => DynamicState::StencilWriteMask,
            DynamicStateValue::StencilReference(_) => DynamicState::StencilReference,
            DynamicStateValue::DiscardRectangles { .. } => DynamicState::DiscardRectangle,
            DynamicStateValue::SampleLocations(_) => DynamicState::SampleLocations,
            DynamicStateValue::LineStipple(_) => DynamicState::LineStipple,
            DynamicStateValue::CullMode(_) => DynamicState::CullMode,
            DynamicStateValue::FrontFace(_) => DynamicState::FrontFace,
            DynamicStateValue::PrimitiveTopology(_) => DynamicState::PrimitiveTopology,
            DynamicStateValue::DepthTestEnable(_) => DynamicState::DepthTestEnable,
            DynamicStateValue::DepthWriteEnable(_) => DynamicState::DepthWriteEnable,
            DynamicStateValue::DepthCompareOp(_) => DynamicState::DepthCompareOp,
            DynamicStateValue::DepthBoundsTestEnable(_) => DynamicState::DepthBoundsTestEnable,
            DynamicStateValue::StencilTestEnable(_) => DynamicState::StencilTestEnable,
            DynamicStateValue::StencilOp(_) => DynamicState::StencilOp,
            DynamicStateValue::FragmentShadingRate(_) => DynamicState::FragmentShadingRate,
            DynamicStateValue::PrimitiveRestartEnable(_) => DynamicState::PrimitiveRestartEnable,
            DynamicStateValue::RasterizerDiscardEnable(_) => DynamicState::RasterizerDiscardEnable,
            DynamicStateValue::DepthBiasEnable(_) => DynamicState::DepthBiasEnable,
            DynamicStateValue::LogicOp(_) => DynamicState::LogicOp,
            DynamicStateValue::ColorWriteEnable(_) => DynamicState::ColorWriteEnable,
            DynamicStateValue::PatchControlPoints(_) => DynamicState::PatchControlPoints,
        }
    }

    /// Convenience constructor for a single viewport at slot 0.
    #[inline]
    pub fn viewport(viewport: Viewport) -> Self {
        DynamicStateValue::Viewports {
            first: 0,
            viewports: smallvec::smallvec![viewport],
        }
    }

    /// Convenience constructor for a single scissor at slot 0.
    #[inline]
    pub fn scissor(scissor: Scissor) -> Self {
        DynamicStateValue::Scissors {
            first: 0,
            scissors: smallvec::smallvec![scissor],
        }
    }
}
