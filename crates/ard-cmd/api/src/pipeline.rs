use serde::{Deserialize, Serialize};

use crate::{
    dynamic::{DynamicStateMask, DynamicStateValue},
    types::{BindPoint, MultiSamples, PolygonMode, ShaderStage, ShaderStages},
};

/// Abstract per-draw data a shader stage reads through its user-data registers.
#[derive(Debug, Serialize, Deserialize, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum UserDataSlot {
    /// Address of the uploaded vertex buffer descriptor table.
    VertexDescriptors,
    /// Address of the uploaded push constant block.
    PushConstants,
    /// Address of a bound descriptor set.
    DescriptorSet(u8),
}

/// Maps a user-data slot of one shader stage to the hardware register that receives it.
#[derive(Debug, Serialize, Deserialize, Copy, Clone, PartialEq, Eq, Hash)]
pub struct UserDataMapping {
    pub stage: ShaderStage,
    pub slot: UserDataSlot,
    pub register: u32,
}

/// A single register write.
#[derive(Debug, Serialize, Deserialize, Copy, Clone, PartialEq, Eq, Hash)]
pub struct RegisterWrite {
    pub offset: u32,
    pub value: u32,
}

/// Describes a compiled pipeline. Shader code and descriptor layouts are owned by the compiler
/// and are opaque here; only the state the recording engine needs is described.
#[derive(Debug, Clone)]
pub struct PipelineCreateInfo {
    pub bind_point: BindPoint,
    pub stages: ShaderStages,
    /// Dynamic state the pipeline actually consumes. State outside of this set is never emitted
    /// while the pipeline is bound.
    pub dynamic_states: DynamicStateMask,
    /// State baked into the pipeline. Bound through the dynamic state tracker when the pipeline
    /// is bound.
    pub static_state: Vec<DynamicStateValue>,
    pub user_data: Vec<UserDataMapping>,
    /// Stride of each vertex buffer binding the pipeline reads.
    pub vertex_strides: Vec<u32>,
    /// Register writes emitted whenever the pipeline is (re)emitted.
    pub registers: Vec<RegisterWrite>,
    pub samples: MultiSamples,
    pub polygon_mode: PolygonMode,
    pub tessellation: bool,
    pub fragment_shading_rate: bool,
    /// Number of color attachments written by the pipeline.
    pub color_attachments: u32,
    pub debug_name: Option<String>,
}

impl PipelineCreateInfo {
    /// Registers that receive `slot` in every stage.
    #[inline]
    pub fn user_data_registers(&self, slot: UserDataSlot) -> impl Iterator<Item = &UserDataMapping> {
        self.user_data.iter().filter(move |mapping| mapping.slot == slot)
    }
}

impl Default for PipelineCreateInfo {
    fn default() -> Self {
        Self {
            bind_point: BindPoint::Graphics,
            stages: ShaderStages::VERTEX | ShaderStages::FRAGMENT,
            dynamic_states: DynamicStateMask::empty(),
            static_state: Vec::default(),
            user_data: Vec::default(),
            vertex_strides: Vec::default(),
            registers: Vec::default(),
            samples: MultiSamples::Count1,
            polygon_mode: PolygonMode::Fill,
            tessellation: false,
            fragment_shading_rate: false,
            color_attachments: 1,
            debug_name: None,
        }
    }
}
