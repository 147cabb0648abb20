pub mod barrier;
pub mod caps;
pub mod command_buffer;
pub mod device;
pub mod image;
pub mod metadata;
pub mod packet;
pub mod pipeline;
pub mod pool;
pub mod settings;
pub mod state;
pub mod upload;
pub mod util;

#[cfg(test)]
mod tests;

pub use api;
pub use headless;

pub mod prelude {
    pub use api::{
        access::{AccessFlags, AccessIntent, PipelineStages},
        dynamic::{DynamicState, DynamicStateMask, DynamicStateValue, Scissor, Viewport},
        layout::{ImageAspects, ImageLayout, SubresourceRange},
        pipeline::{PipelineCreateInfo, UserDataMapping, UserDataSlot},
        surface::{ImageCreateInfo, MetadataKind, MetadataKinds},
        types::*,
        Winsys,
    };

    // Device
    pub use crate::device::{Device, DeviceCaps, DeviceInfo};
    pub use crate::settings::{DriverSettings, SettingsError};

    // Resources
    pub use crate::image::{Image, ImageId};
    pub use crate::pipeline::{Pipeline, PipelineId};

    // Recording
    pub use crate::barrier::{BarrierInfo, FlushBits, ImageBarrier, MemoryBarrier};
    pub use crate::command_buffer::{
        CommandBuffer, CommandBufferId, CommandBufferLevel, CommandBufferState, Inheritance,
        RecordError, VertexBuffer,
    };
    pub use crate::metadata::{ClearValue, MetadataState};
    pub use crate::packet::{Packet, StreamCounters};
    pub use crate::pool::{CommandPool, PoolError};

    // Headless
    pub use headless::{HeadlessSurfaceLayout, HeadlessWinsys};
    pub type HeadlessDevice = crate::device::Device<HeadlessWinsys>;
    pub type HeadlessCommandBuffer = crate::command_buffer::CommandBuffer<HeadlessWinsys>;
    pub type HeadlessCommandPool = crate::pool::CommandPool<HeadlessWinsys>;
}
