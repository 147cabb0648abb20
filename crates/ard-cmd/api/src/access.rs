use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Memory access kinds declared by a barrier. Every flag corresponds to exactly one
    /// [`AccessKind`].
    #[derive(Debug, Default, Serialize, Deserialize, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
    #[serde(transparent)]
    pub struct AccessFlags: u32 {
        const INDIRECT_COMMAND_READ          = 1 << 0;
        const INDEX_READ                     = 1 << 1;
        const VERTEX_ATTRIBUTE_READ          = 1 << 2;
        const UNIFORM_READ                   = 1 << 3;
        const INPUT_ATTACHMENT_READ          = 1 << 4;
        const SHADER_READ                    = 1 << 5;
        const SHADER_WRITE                   = 1 << 6;
        const COLOR_ATTACHMENT_READ          = 1 << 7;
        const COLOR_ATTACHMENT_WRITE         = 1 << 8;
        const DEPTH_STENCIL_ATTACHMENT_READ  = 1 << 9;
        const DEPTH_STENCIL_ATTACHMENT_WRITE = 1 << 10;
        const TRANSFER_READ                  = 1 << 11;
        const TRANSFER_WRITE                 = 1 << 12;
        const HOST_READ                      = 1 << 13;
        const HOST_WRITE                     = 1 << 14;
        const MEMORY_READ                    = 1 << 15;
        const MEMORY_WRITE                   = 1 << 16;
        const TRANSFORM_FEEDBACK_WRITE       = 1 << 17;
        const CONDITIONAL_RENDERING_READ     = 1 << 18;
        const FRAGMENT_SHADING_RATE_READ     = 1 << 19;
    }
}

/// Dense enumeration of access kinds. Used to index fixed lookup tables.
#[derive(Debug, Serialize, Deserialize, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum AccessKind {
    IndirectCommandRead,
    IndexRead,
    VertexAttributeRead,
    UniformRead,
    InputAttachmentRead,
    ShaderRead,
    ShaderWrite,
    ColorAttachmentRead,
    ColorAttachmentWrite,
    DepthStencilAttachmentRead,
    DepthStencilAttachmentWrite,
    TransferRead,
    TransferWrite,
    HostRead,
    HostWrite,
    MemoryRead,
    MemoryWrite,
    TransformFeedbackWrite,
    ConditionalRenderingRead,
    FragmentShadingRateRead,
}

bitflags! {
    /// Pipeline stages an access intent applies to.
    #[derive(Debug, Default, Serialize, Deserialize, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
    #[serde(transparent)]
    pub struct PipelineStages: u32 {
        const TOP_OF_PIPE                    = 1 << 0;
        const DRAW_INDIRECT                  = 1 << 1;
        const VERTEX_INPUT                   = 1 << 2;
        const VERTEX_SHADER                  = 1 << 3;
        const TESSELLATION_CONTROL_SHADER    = 1 << 4;
        const TESSELLATION_EVALUATION_SHADER = 1 << 5;
        const GEOMETRY_SHADER                = 1 << 6;
        const EARLY_FRAGMENT_TESTS           = 1 << 7;
        const FRAGMENT_SHADER                = 1 << 8;
        const LATE_FRAGMENT_TESTS            = 1 << 9;
        const COLOR_ATTACHMENT_OUTPUT        = 1 << 10;
        const COMPUTE_SHADER                 = 1 << 11;
        const TRANSFER                       = 1 << 12;
        const BOTTOM_OF_PIPE                 = 1 << 13;
        const HOST                           = 1 << 14;
        const ALL_GRAPHICS                   = 1 << 15;
        const ALL_COMMANDS                   = 1 << 16;
        const TRANSFORM_FEEDBACK             = 1 << 17;
        const CONDITIONAL_RENDERING          = 1 << 18;
    }
}

/// One side (source or destination) of a dependency.
#[derive(Debug, Default, Serialize, Deserialize, Copy, Clone, PartialEq, Eq, Hash)]
pub struct AccessIntent {
    pub access: AccessFlags,
    pub stages: PipelineStages,
}

impl AccessKind {
    pub const COUNT: usize = 20;

    pub const ALL: [AccessKind; Self::COUNT] = [
        AccessKind::IndirectCommandRead,
        AccessKind::IndexRead,
        AccessKind::VertexAttributeRead,
        AccessKind::UniformRead,
        AccessKind::InputAttachmentRead,
        AccessKind::ShaderRead,
        AccessKind::ShaderWrite,
        AccessKind::ColorAttachmentRead,
        AccessKind::ColorAttachmentWrite,
        AccessKind::DepthStencilAttachmentRead,
        AccessKind::DepthStencilAttachmentWrite,
        AccessKind::TransferRead,
        AccessKind::TransferWrite,
        AccessKind::HostRead,
        AccessKind::HostWrite,
        AccessKind::MemoryRead,
        AccessKind::MemoryWrite,
        AccessKind::TransformFeedbackWrite,
        AccessKind::ConditionalRenderingRead,
        AccessKind::FragmentShadingRateRead,
    ];

    #[inline(always)]
    pub const fn flag(self) -> AccessFlags {
        AccessFlags::from_bits_truncate(1 << self as u32)
    }

    #[inline(always)]
    pub const fn index(self) -> usize {
        self as usize
    }
}

impl AccessFlags {
    /// Iterates over each access kind contained in the set.
    #[inline]
    pub fn kinds(self) -> impl Iterator<Item = AccessKind> {
        AccessKind::ALL
            .into_iter()
            .filter(move |kind| self.contains(kind.flag()))
    }

    /// `true` if any of the contained kinds write memory.
    #[inline]
    pub fn has_writes(self) -> bool {
        self.intersects(
            AccessFlags::SHADER_WRITE
                | AccessFlags::COLOR_ATTACHMENT_WRITE
                | AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE
                | AccessFlags::TRANSFER_WRITE
                | AccessFlags::HOST_WRITE
                | AccessFlags::MEMORY_WRITE
                | AccessFlags::TRANSFORM_FEEDBACK_WRITE,
        )
    }
}

impl AccessIntent {
    #[inline(always)]
    pub const fn new(access: AccessFlags, stages: PipelineStages) -> Self {
        Self { access, stages }
    }
}
