//! Register groups and their encodings.
//!
//! A register group is the unit of emission. Groups that pack several independently bound
//! fields are always re-assembled from every member, so a partial group is never written.

use api::{
    dynamic::{DynamicStateMask, MAX_COLOR_ATTACHMENTS},
    pipeline::PipelineCreateInfo,
    types::{CullMode, FrontFace, LogicOp, PolygonMode, PrimitiveTopology},
};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use static_assertions::const_assert_eq;

use super::values::DynamicValues;

pub type RegisterValues = SmallVec<[u32; 8]>;

type Encoder = fn(&DynamicValues, &EmitContext, &mut RegisterValues);

#[derive(Debug, Serialize, Deserialize, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum RegisterGroup {
    Viewport,
    Scissor,
    LineWidth,
    DepthBias,
    BlendConstants,
    DepthBounds,
    StencilRefMask,
    DiscardRectangles,
    SampleLocations,
    LineStipple,
    RasterizerControl,
    PrimitiveType,
    DepthStencilControl,
    ShadingRate,
    PrimitiveRestart,
    ClipControl,
    ColorControl,
    TargetMask,
    TessellationControl,
}

/// Pipeline properties some encodings depend on.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct EmitContext {
    pub samples: u32,
    pub polygon_mode: PolygonMode,
    pub tessellation: bool,
    pub color_attachments: u32,
    pub fragment_shading_rate: bool,
}

pub(crate) struct GroupInfo {
    pub members: DynamicStateMask,
    /// Context registers roll the hardware context when written.
    pub context: bool,
    /// The encoding reads the bound pipeline's [`EmitContext`].
    pub pipeline: bool,
    pub encode: Encoder,
}

pub(crate) const REGISTER_GROUPS: [GroupInfo; RegisterGroup::COUNT] = [
    GroupInfo {
        members: DynamicStateMask::VIEWPORT,
        context: true,
        pipeline: false,
        encode: encode_viewports,
    },
    GroupInfo {
        members: DynamicStateMask::SCISSOR,
        context: true,
        pipeline: false,
        encode: encode_scissors,
    },
    GroupInfo {
        members: DynamicStateMask::LINE_WIDTH,
        context: true,
        pipeline: false,
        encode: encode_line_width,
    },
    GroupInfo {
        members: DynamicStateMask::DEPTH_BIAS,
        context: true,
        pipeline: false,
        encode: encode_depth_bias,
    },
    GroupInfo {
        members: DynamicStateMask::BLEND_CONSTANTS,
        context: true,
        pipeline: false,
        encode: encode_blend_constants,
    },
    GroupInfo {
        members: DynamicStateMask::DEPTH_BOUNDS,
        context: true,
        pipeline: false,
        encode: encode_depth_bounds,
    },
    GroupInfo {
        members: DynamicStateMask::STENCIL_COMPARE_MASK
            .union(DynamicStateMask::STENCIL_WRITE_MASK)
            .union(DynamicStateMask::STENCIL_REFERENCE),
        context: true,
        pipeline: false,
        encode: encode_stencil_ref_mask,
    },
    GroupInfo {
        members: DynamicStateMask::DISCARD_RECTANGLE,
        context: true,
        pipeline: false,
        encode: encode_discard_rectangles,
    },
    GroupInfo {
        members: DynamicStateMask::SAMPLE_LOCATIONS,
        context: true,
        pipeline: true,
        encode: encode_sample_locations,
    },
    GroupInfo {
        members: DynamicStateMask::LINE_STIPPLE,
        context: true,
        pipeline: false,
        encode: encode_line_stipple,
    },
    GroupInfo {
        members: DynamicStateMask::CULL_MODE
            .union(DynamicStateMask::FRONT_FACE)
            .union(DynamicStateMask::DEPTH_BIAS_ENABLE),
        context: true,
        pipeline: true,
        encode: encode_rasterizer_control,
    },
    GroupInfo {
        members: DynamicStateMask::PRIMITIVE_TOPOLOGY,
        context: false,
        pipeline: true,
        encode: encode_primitive_type,
    },
    GroupInfo {
        members: DynamicStateMask::DEPTH_TEST_ENABLE
            .union(DynamicStateMask::DEPTH_WRITE_ENABLE)
            .union(DynamicStateMask::DEPTH_COMPARE_OP)
            .union(DynamicStateMask::DEPTH_BOUNDS_TEST_ENABLE)
            .union(DynamicStateMask::STENCIL_TEST_ENABLE)
            .union(DynamicStateMask::STENCIL_OP),
        context: true,
        pipeline: false,
        encode: encode_depth_stencil_control,
    },
    GroupInfo {
        members: DynamicStateMask::FRAGMENT_SHADING_RATE,
        context: true,
        pipeline: true,
        encode: encode_shading_rate,
    },
    GroupInfo {
        members: DynamicStateMask::PRIMITIVE_RESTART_ENABLE,
        context: false,
        pipeline: false,
        encode: encode_primitive_restart,
    },
    GroupInfo {
        members: DynamicStateMask::RASTERIZER_DISCARD_ENABLE,
        context: true,
        pipeline: false,
        encode: encode_clip_control,
    },
    GroupInfo {
        members: DynamicStateMask::LOGIC_OP,
        context: true,
        pipeline: false,
        encode: encode_color_control,
    },
    GroupInfo {
        members: DynamicStateMask::COLOR_WRITE_ENABLE,
        context: true,
        pipeline: true,
        encode: encode_target_mask,
    },
    GroupInfo {
        members: DynamicStateMask::PATCH_CONTROL_POINTS,
        context: true,
        pipeline: true,
        encode: encode_tessellation_control,
    },
];

const fn member_union() -> u64 {
    let mut bits = 0;
    let mut i = 0;
    while i < RegisterGroup::COUNT {
        bits |= REGISTER_GROUPS[i].members.bits();
        i += 1;
    }
    bits
}

const fn member_count() -> u32 {
    let mut count = 0;
    let mut i = 0;
    while i < RegisterGroup::COUNT {
        count += REGISTER_GROUPS[i].members.bits().count_ones();
        i += 1;
    }
    count
}

const fn pipeline_members() -> DynamicStateMask {
    let mut bits = 0;
    let mut i = 0;
    while i < RegisterGroup::COUNT {
        if REGISTER_GROUPS[i].pipeline {
            bits |= REGISTER_GROUPS[i].members.bits();
        }
        i += 1;
    }
    DynamicStateMask::from_bits_truncate(bits)
}

/// Dynamic state whose encoding depends on the bound pipeline. Re-binding a pipeline with a
/// different [`EmitContext`] must re-emit all of it.
pub const PIPELINE_DEPENDENT: DynamicStateMask = pipeline_members();

// Every dynamic state belongs to exactly one group.
const_assert_eq!(member_union(), DynamicStateMask::all().bits());
const_assert_eq!(member_count() as usize, api::dynamic::DynamicState::COUNT);

impl RegisterGroup {
    pub const COUNT: usize = 19;

    pub const ALL: [RegisterGroup; Self::COUNT] = [
        RegisterGroup::Viewport,
        RegisterGroup::Scissor,
        RegisterGroup::LineWidth,
        RegisterGroup::DepthBias,
        RegisterGroup::BlendConstants,
        RegisterGroup::DepthBounds,
        RegisterGroup::StencilRefMask,
        RegisterGroup::DiscardRectangles,
        RegisterGroup::SampleLocations,
        RegisterGroup::LineStipple,
        RegisterGroup::RasterizerControl,
        RegisterGroup::PrimitiveType,
        RegisterGroup::DepthStencilControl,
        RegisterGroup::ShadingRate,
        RegisterGroup::PrimitiveRestart,
        RegisterGroup::ClipControl,
        RegisterGroup::ColorControl,
        RegisterGroup::TargetMask,
        RegisterGroup::TessellationControl,
    ];

    #[inline(always)]
    pub fn members(self) -> DynamicStateMask {
        REGISTER_GROUPS[self as usize].members
    }

    #[inline(always)]
    pub fn is_context(self) -> bool {
        REGISTER_GROUPS[self as usize].context
    }

    /// Encodes the whole group from the current value of every member.
    #[inline]
    pub fn encode(self, values: &DynamicValues, ctx: &EmitContext) -> RegisterValues {
        let mut out = RegisterValues::new();
        (REGISTER_GROUPS[self as usize].encode)(values, ctx, &mut out);
        out
    }
}

impl Default for EmitContext {
    fn default() -> Self {
        Self {
            samples: 1,
            polygon_mode: PolygonMode::Fill,
            tessellation: false,
            color_attachments: 0,
            fragment_shading_rate: false,
        }
    }
}

impl EmitContext {
    pub fn for_pipeline(info: &PipelineCreateInfo) -> Self {
        Self {
            samples: info.samples.count(),
            polygon_mode: info.polygon_mode,
            tessellation: info.tessellation,
            color_attachments: info.color_attachments,
            fragment_shading_rate: info.fragment_shading_rate,
        }
    }
}

#[inline(always)]
fn pack_xy(x: i64, y: i64) -> u32 {
    let x = x.clamp(0, 0x7FFF) as u32;
    let y = y.clamp(0, 0x7FFF) as u32;
    x | (y << 16)
}

fn encode_viewports(values: &DynamicValues, _: &EmitContext, out: &mut RegisterValues) {
    let viewports = &values.viewports;
    for vp in &viewports.slots[..viewports.count as usize] {
        let half_width = vp.width * 0.5;
        let half_height = vp.height * 0.5;
        out.extend([
            half_width.to_bits(),
            (vp.x + half_width).to_bits(),
            half_height.to_bits(),
            (vp.y + half_height).to_bits(),
            (vp.max_depth - vp.min_depth).to_bits(),
            vp.min_depth.to_bits(),
        ]);
    }
}

fn encode_scissors(values: &DynamicValues, _: &EmitContext, out: &mut RegisterValues) {
    let scissors = &values.scissors;
    for rect in &scissors.slots[..scissors.count as usize] {
        let (x, y) = (rect.x as i64, rect.y as i64);
        out.push(pack_xy(x, y));
        out.push(pack_xy(x + rect.width as i64, y + rect.height as i64));
    }
}

fn encode_line_width(values: &DynamicValues, _: &EmitContext, out: &mut RegisterValues) {
    // 12.4 fixed point half width.
    let width = (values.line_width.max(0.0) * 8.0) as u32;
    out.push(width & 0xFFFF);
}

fn encode_depth_bias(values: &DynamicValues, _: &EmitContext, out: &mut RegisterValues) {
    let bias = &values.depth_bias;
    let slope = (bias.slope_factor * 16.0).to_bits();
    let offset = bias.constant_factor.to_bits();
    out.extend([bias.clamp.to_bits(), slope, offset, slope, offset]);
}

fn encode_blend_constants(values: &DynamicValues, _: &EmitContext, out: &mut RegisterValues) {
    out.extend(values.blend_constants.map(f32::to_bits));
}

fn encode_depth_bounds(values: &DynamicValues, _: &EmitContext, out: &mut RegisterValues) {
    out.push(values.depth_bounds.min.to_bits());
    out.push(values.depth_bounds.max.to_bits());
}

fn encode_stencil_ref_mask(values: &DynamicValues, _: &EmitContext, out: &mut RegisterValues) {
    let pack = |reference: u32, compare: u32, write: u32| {
        (reference & 0xFF) | ((compare & 0xFF) << 8) | ((write & 0xFF) << 16) | (1 << 24)
    };
    out.push(pack(
        values.stencil_reference.front,
        values.stencil_compare_mask.front,
        values.stencil_write_mask.front,
    ));
    out.push(pack(
        values.stencil_reference.back,
        values.stencil_compare_mask.back,
        values.stencil_write_mask.back,
    ));
}

fn encode_discard_rectangles(values: &DynamicValues, _: &EmitContext, out: &mut RegisterValues) {
    let rects = &values.discard_rectangles;
    // Rule mask: keep everything when no rectangle is active.
    out.push(if rects.count == 0 { 0xFFFF } else { 0xAAAA });
    for rect in &rects.slots[..rects.count as usize] {
        let (x, y) = (rect.x as i64, rect.y as i64);
        out.push(pack_xy(x, y));
        out.push(pack_xy(x + rect.width as i64, y + rect.height as i64));
    }
}

fn encode_sample_locations(values: &DynamicValues, ctx: &EmitContext, out: &mut RegisterValues) {
    let locations = &values.sample_locations;
    let count = (locations.count as usize).min(ctx.samples as usize);
    // Signed 4-bit offsets from the pixel center, four samples per register.
    let mut packed = [0u32; 4];
    for (i, [x, y]) in locations.locations[..count].iter().enumerate() {
        let x = (((x - 0.5) * 16.0) as i32 & 0xF) as u32;
        let y = (((y - 0.5) * 16.0) as i32 & 0xF) as u32;
        packed[i / 4] |= (x | (y << 4)) << ((i % 4) * 8);
    }
    out.extend(packed);
}

fn encode_line_stipple(values: &DynamicValues, _: &EmitContext, out: &mut RegisterValues) {
    let stipple = &values.line_stipple;
    let repeat = stipple.factor.saturating_sub(1) & 0xFF;
    out.push((stipple.pattern & 0xFFFF) | (repeat << 16) | (1 << 29));
}

fn encode_rasterizer_control(values: &DynamicValues, ctx: &EmitContext, out: &mut RegisterValues) {
    let cull_front = values.cull_mode == CullMode::Front as u32
        || values.cull_mode == CullMode::FrontAndBack as u32;
    let cull_back = values.cull_mode == CullMode::Back as u32
        || values.cull_mode == CullMode::FrontAndBack as u32;
    let clockwise = values.front_face == FrontFace::Clockwise as u32;
    let polygon = ctx.polygon_mode as u32;

    let mut reg = cull_front as u32 | ((cull_back as u32) << 1) | ((clockwise as u32) << 2);
    if ctx.polygon_mode != PolygonMode::Fill {
        reg |= 1 << 3 | polygon << 5 | polygon << 8;
    }
    if values.depth_bias_enable != 0 {
        reg |= 1 << 11 | 1 << 12;
    }
    out.push(reg);
}

fn encode_primitive_type(values: &DynamicValues, ctx: &EmitContext, out: &mut RegisterValues) {
    const PATCH: u32 = 0x11;
    let prim = if ctx.tessellation {
        PATCH
    } else {
        match values.primitive_topology {
            t if t == PrimitiveTopology::PointList as u32 => 0x1,
            t if t == PrimitiveTopology::LineList as u32 => 0x2,
            t if t == PrimitiveTopology::LineStrip as u32 => 0x3,
            t if t == PrimitiveTopology::TriangleFan as u32 => 0x5,
            t if t == PrimitiveTopology::TriangleStrip as u32 => 0x6,
            t if t == PrimitiveTopology::PatchList as u32 => PATCH,
            _ => 0x4,
        }
    };
    out.push(prim);
}

fn encode_depth_stencil_control(
    values: &DynamicValues,
    _: &EmitContext,
    out: &mut RegisterValues,
) {
    let stencil = values.stencil_test_enable & 1;
    let mut depth_control = stencil
        | ((values.depth_test_enable & 1) << 1)
        | ((values.depth_write_enable & 1) << 2)
        | ((values.depth_bounds_test_enable & 1) << 3)
        | ((values.depth_compare_op & 0x7) << 4);
    if stencil != 0 {
        depth_control |= 1 << 7
            | (values.stencil_op.front.compare & 0x7) << 8
            | (values.stencil_op.back.compare & 0x7) << 20;
    }

    let ops = |face: &api::dynamic::StencilOpState| {
        (face.fail & 0xF) | ((face.pass & 0xF) << 4) | ((face.depth_fail & 0xF) << 8)
    };
    let stencil_control = ops(&values.stencil_op.front) | (ops(&values.stencil_op.back) << 12);

    out.push(depth_control);
    out.push(stencil_control);
}

fn encode_shading_rate(values: &DynamicValues, ctx: &EmitContext, out: &mut RegisterValues) {
    if !ctx.fragment_shading_rate {
        out.push(0);
        return;
    }
    let rate = &values.fragment_shading_rate;
    let log2 = |v: u32| v.max(1).ilog2().min(2);
    out.push(
        log2(rate.width)
            | (log2(rate.height) << 2)
            | ((rate.combiner_ops[0] & 0x7) << 4)
            | ((rate.combiner_ops[1] & 0x7) << 7),
    );
}

fn encode_primitive_restart(values: &DynamicValues, _: &EmitContext, out: &mut RegisterValues) {
    out.push(values.primitive_restart_enable & 1);
}

fn encode_clip_control(values: &DynamicValues, _: &EmitContext, out: &mut RegisterValues) {
    out.push((values.rasterizer_discard_enable & 1) << 22);
}

fn encode_color_control(values: &DynamicValues, _: &EmitContext, out: &mut RegisterValues) {
    const ROP3: [u32; 16] = [
        0x00, 0x88, 0x44, 0xCC, 0x22, 0xAA, 0x66, 0xEE, 0x11, 0x99, 0x55, 0xDD, 0x33, 0xBB,
        0x77, 0xFF,
    ];
    let rop = ROP3
        .get(values.logic_op as usize)
        .copied()
        .unwrap_or(ROP3[LogicOp::Copy as usize]);
    out.push(rop << 16);
}

fn encode_target_mask(values: &DynamicValues, ctx: &EmitContext, out: &mut RegisterValues) {
    let attachments = (ctx.color_attachments as usize).min(MAX_COLOR_ATTACHMENTS);
    let mask = (0..attachments)
        .filter(|i| values.color_write_enable & (1 << i) != 0)
        .fold(0u32, |mask, i| mask | (0xF << (4 * i)));
    out.push(mask);
}

fn encode_tessellation_control(
    values: &DynamicValues,
    ctx: &EmitContext,
    out: &mut RegisterValues,
) {
    let points = if ctx.tessellation {
        values.patch_control_points
    } else {
        0
    };
    out.push(points | ((ctx.tessellation as u32) << 8));
}

#[cfg(test)]
mod tests {
    use super::*;
    use api::dynamic::{DynamicState, DynamicStateValue, StencilFaces};

    #[test]
    fn groups_partition_dynamic_state() {
        for state in DynamicState::ALL {
            let owners = RegisterGroup::ALL
                .into_iter()
                .filter(|group| group.members().contains(state.flag()))
                .count();
            assert_eq!(owners, 1, "{state:?}");
        }
    }

    /// Stencil reference, compare mask and write mask share a register.
    #[test]
    fn composite_group_carries_every_member() {
        let mut values = DynamicValues::default();
        values.apply(
            &DynamicStateValue::StencilCompareMask(StencilFaces {
                front: 0x0F,
                back: 0xF0,
            }),
            true,
        );
        values.apply(
            &DynamicStateValue::StencilReference(StencilFaces { front: 1, back: 2 }),
            true,
        );
        let regs = RegisterGroup::StencilRefMask.encode(&values, &EmitContext::default());
        assert_eq!(regs.len(), 2);
        assert_eq!(regs[0] & 0xFF, 1);
        assert_eq!((regs[0] >> 8) & 0xFF, 0x0F);
        assert_eq!(regs[1] & 0xFF, 2);
        assert_eq!((regs[1] >> 8) & 0xFF, 0xF0);
    }

    /// The same values encode differently under a different pipeline.
    #[test]
    fn pipeline_dependent_encoding() {
        let values = DynamicValues::default();
        let fill = EmitContext::default();
        let wireframe = EmitContext {
            polygon_mode: PolygonMode::Line,
            ..fill
        };
        assert_ne!(
            RegisterGroup::RasterizerControl.encode(&values, &fill),
            RegisterGroup::RasterizerControl.encode(&values, &wireframe)
        );

        let two_targets = EmitContext {
            color_attachments: 2,
            ..fill
        };
        assert_eq!(RegisterGroup::TargetMask.encode(&values, &two_targets)[0], 0xFF);
    }

    /// Any group whose encoding changes with the pipeline must be re-flagged on pipeline change.
    #[test]
    fn context_sensitive_groups_are_pipeline_dependent() {
        let mut values = DynamicValues::default();
        values.apply(
            &DynamicStateValue::FragmentShadingRate(api::dynamic::FragmentShadingRate {
                width: 2,
                height: 2,
                combiner_ops: [1, 1],
            }),
            true,
        );
        values.apply(&DynamicStateValue::PatchControlPoints(3), true);
        values.apply(&DynamicStateValue::ColorWriteEnable(0xFF), true);

        let base = EmitContext::default();
        let contexts = [
            EmitContext {
                samples: 4,
                ..base
            },
            EmitContext {
                polygon_mode: PolygonMode::Line,
                ..base
            },
            EmitContext {
                tessellation: true,
                ..base
            },
            EmitContext {
                color_attachments: 2,
                ..base
            },
            EmitContext {
                fragment_shading_rate: true,
                ..base
            },
        ];

        for group in RegisterGroup::ALL {
            let reference = group.encode(&values, &base);
            let varies = contexts
                .iter()
                .any(|ctx| group.encode(&values, ctx) != reference);
            if varies {
                assert!(PIPELINE_DEPENDENT.contains(group.members()), "{group:?}");
            }
        }
        assert!(PIPELINE_DEPENDENT.contains(DynamicStateMask::PRIMITIVE_TOPOLOGY));
        assert!(PIPELINE_DEPENDENT.contains(DynamicStateMask::FRAGMENT_SHADING_RATE));
    }
}
