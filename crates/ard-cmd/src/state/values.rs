use api::dynamic::*;
use bytemuck::{Pod, Zeroable};

/// A fixed-capacity array state (viewports, scissors, discard rectangles) with the number of
/// slots in use.
#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct SlotArray<T, const N: usize> {
    pub count: u32,
    pub slots: [T; N],
}

// SAFETY: Element types are `repr(C)` aggregates of 4-byte scalars, so there is no padding
// between `count` and the slots.
unsafe impl Zeroable for SlotArray<Viewport, MAX_VIEWPORTS> {}
unsafe impl Pod for SlotArray<Viewport, MAX_VIEWPORTS> {}
unsafe impl Zeroable for SlotArray<Scissor, MAX_SCISSORS> {}
unsafe impl Pod for SlotArray<Scissor, MAX_SCISSORS> {}
unsafe impl Zeroable for SlotArray<Scissor, MAX_DISCARD_RECTANGLES> {}
unsafe impl Pod for SlotArray<Scissor, MAX_DISCARD_RECTANGLES> {}

/// One copy of every dynamic state field. Enums and booleans are stored as `u32` so every field
/// is plain-old-data and can be compared byte for byte.
#[derive(Debug, Copy, Clone)]
pub struct DynamicValues {
    pub viewports: SlotArray<Viewport, MAX_VIEWPORTS>,
    pub scissors: SlotArray<Scissor, MAX_SCISSORS>,
    pub line_width: f32,
    pub depth_bias: DepthBias,
    pub blend_constants: [f32; 4],
    pub depth_bounds: DepthBounds,
    pub stencil_compare_mask: StencilFaces,
    pub stencil_write_mask: StencilFaces,
    pub stencil_reference: StencilFaces,
    pub discard_rectangles: SlotArray<Scissor, MAX_DISCARD_RECTANGLES>,
    pub sample_locations: SampleLocations,
    pub line_stipple: LineStipple,
    pub cull_mode: u32,
    pub front_face: u32,
    pub primitive_topology: u32,
    pub depth_test_enable: u32,
    pub depth_write_enable: u32,
    pub depth_compare_op: u32,
    pub depth_bounds_test_enable: u32,
    pub stencil_test_enable: u32,
    pub stencil_op: StencilOps,
    pub fragment_shading_rate: FragmentShadingRate,
    pub primitive_restart_enable: u32,
    pub rasterizer_discard_enable: u32,
    pub depth_bias_enable: u32,
    pub logic_op: u32,
    pub color_write_enable: u32,
    pub patch_control_points: u32,
}

// SAFETY: Every field is `Zeroable`.
unsafe impl Zeroable for DynamicValues {}

macro_rules! dynamic_fields {
    ($($state:ident => $field:ident),* $(,)?) => {
        impl DynamicValues {
            /// Raw bytes of the field backing `state`.
            #[inline]
            pub fn bytes(&self, state: DynamicState) -> &[u8] {
                match state {
                    $(DynamicState::$state => bytemuck::bytes_of(&self.$field),)*
                }
            }

            /// Copies the field backing `state` from `other`.
            #[inline]
            pub fn copy_field(&mut self, other: &Self, state: DynamicState) {
                match state {
                    $(DynamicState::$state => self.$field = other.$field,)*
                }
            }
        }
    };
}

dynamic_fields! {
    Viewport => viewports,
    Scissor => scissors,
    LineWidth => line_width,
    DepthBias => depth_bias,
    BlendConstants => blend_constants,
    DepthBounds => depth_bounds,
    StencilCompareMask => stencil_compare_mask,
    StencilWriteMask => stencil_write_mask,
    StencilReference => stencil_reference,
    DiscardRectangle => discard_rectangles,
    SampleLocations => sample_locations,
    LineStipple => line_stipple,
    CullMode => cull_mode,
    FrontFace => front_face,
    PrimitiveTopology => primitive_topology,
    DepthTestEnable => depth_test_enable,
    DepthWriteEnable => depth_write_enable,
    DepthCompareOp => depth_compare_op,
    DepthBoundsTestEnable => depth_bounds_test_enable,
    StencilTestEnable => stencil_test_enable,
    StencilOp => stencil_op,
    FragmentShadingRate => fragment_shading_rate,
    PrimitiveRestartEnable => primitive_restart_enable,
    RasterizerDiscardEnable => rasterizer_discard_enable,
    DepthBiasEnable => depth_bias_enable,
    LogicOp => logic_op,
    ColorWriteEnable => color_write_enable,
    PatchControlPoints => patch_control_points,
}

impl Default for DynamicValues {
    fn default() -> Self {
        let mut values: Self = Zeroable::zeroed();
        values.line_width = 1.0;
        values.color_write_enable = (1 << MAX_COLOR_ATTACHMENTS) - 1;
        values.patch_control_points = 1;
        values.primitive_topology = api::types::PrimitiveTopology::TriangleList as u32;
        values.logic_op = api::types::LogicOp::Copy as u32;
        values
    }
}

impl DynamicValues {
    /// Stores `value` into its field.
    ///
    /// # Panics
    /// - If `check` is set and an array update or element count exceeds the field's maximum.
    pub fn apply(&mut self, value: &DynamicStateValue, check: bool) {
        match value {
            DynamicStateValue::Viewports { first, viewports } => {
                write_slots(&mut self.viewports, *first, viewports, check)
            }
            DynamicStateValue::Scissors { first, scissors } => {
                write_slots(&mut self.scissors, *first, scissors, check)
            }
            DynamicStateValue::DiscardRectangles { first, rectangles } => {
                write_slots(&mut self.discard_rectangles, *first, rectangles, check)
            }
            DynamicStateValue::LineWidth(width) => self.line_width = *width,
            DynamicStateValue::DepthBias(bias) => self.depth_bias = *bias,
            DynamicStateValue::BlendConstants(constants) => self.blend_constants = *constants,
            DynamicStateValue::DepthBounds(bounds) => self.depth_bounds = *bounds,
            DynamicStateValue::StencilCompareMask(faces) => self.stencil_compare_mask = *faces,
            DynamicStateValue::StencilWriteMask(faces) => self.stencil_write_mask = *faces,
            DynamicStateValue::StencilReference(faces) => self.stencil_reference = *faces,
            DynamicStateValue::SampleLocations(locations) => {
                if check {
                    assert!(
                        locations.count as usize <= MAX_SAMPLE_LOCATIONS,
                        "{} sample locations exceed the maximum of {MAX_SAMPLE_LOCATIONS}",
                        locations.count
                    );
                }
                self.sample_locations = *locations;
                self.sample_locations.count =
                    locations.count.min(MAX_SAMPLE_LOCATIONS as u32);
            }
            DynamicStateValue::LineStipple(stipple) => self.line_stipple = *stipple,
            DynamicStateValue::CullMode(mode) => self.cull_mode = *mode as u32,
            DynamicStateValue::FrontFace(face) => self.front_face = *face as u32,
            DynamicStateValue::PrimitiveTopology(topology) => {
                self.primitive_topology = *topology as u32
            }
            DynamicStateValue::DepthTestEnable(enable) => self.depth_test_enable = *enable as u32,
            DynamicStateValue::DepthWriteEnable(enable) => {
                self.depth_write_enable = *enable as u32
            }
            DynamicStateValue::DepthCompareOp(op) => self.depth_compare_op = *op as u32,
            DynamicStateValue::DepthBoundsTestEnable(enable) => {
                self.depth_bounds_test_enable = *enable as u32
            }
            DynamicStateValue::StencilTestEnable(enable) => {
                self.stencil_test_enable = *enable as u32
            }
            DynamicStateValue::StencilOp(ops) => self.stencil_op = *ops,
            DynamicStateValue::FragmentShadingRate(rate) => self.fragment_shading_rate = *rate,
            DynamicStateValue::PrimitiveRestartEnable(enable) => {
                self.primitive_restart_enable = *enable as u32
            }
            DynamicStateValue::RasterizerDiscardEnable(enable) => {
                self.rasterizer_discard_enable = *enable as u32
            }
            DynamicStateValue::DepthBiasEnable(enable) => self.depth_bias_enable = *enable as u32,
            DynamicStateValue::LogicOp(op) => self.logic_op = *op as u32,
            DynamicStateValue::ColorWriteEnable(mask) => {
                let all = (1u32 << MAX_COLOR_ATTACHMENTS) - 1;
                if check {
                    assert_eq!(
                        mask & !all,
                        0,
                        "color write mask {mask:#x} names more than {MAX_COLOR_ATTACHMENTS} attachments"
                    );
                }
                self.color_write_enable = mask & all;
            }
            DynamicStateValue::PatchControlPoints(points) => {
                if check {
                    assert!(
                        (1..=32).contains(points),
                        "{points} patch control points is out of range"
                    );
                }
                self.patch_control_points = (*points).clamp(1, 32);
            }
        }
    }
}

/// Writes `values` into consecutive slots starting at `first`. Out of range slots are dropped
/// unless `check` is set, in which case they are a fatal error.
fn write_slots<T: Copy, const N: usize>(
    array: &mut SlotArray<T, N>,
    first: u32,
    values: &[T],
    check: bool,
) {
    let start = first as usize;
    let end = start + values.len();
    if check {
        assert!(
            end <= N,
            "dynamic state slots {start}..{end} exceed the maximum of {N}"
        );
    }

    let start = start.min(N);
    let end = end.min(N);
    array.slots[start..end].copy_from_slice(&values[..end - start]);
    array.count = array.count.max(end as u32);
}
