//! Translation from Vulkan barrier vocabulary.

use api::{
    access::{AccessFlags, PipelineStages},
    layout::{ImageAspects, ImageLayout},
};
use ash::vk;

const ACCESS: [(vk::AccessFlags, AccessFlags); 20] = [
    (
        vk::AccessFlags::INDIRECT_COMMAND_READ,
        AccessFlags::INDIRECT_COMMAND_READ,
    ),
    (vk::AccessFlags::INDEX_READ, AccessFlags::INDEX_READ),
    (
        vk::AccessFlags::VERTEX_ATTRIBUTE_READ,
        AccessFlags::VERTEX_ATTRIBUTE_READ,
    ),
    (vk::AccessFlags::UNIFORM_READ, AccessFlags::UNIFORM_READ),
    (
        vk::AccessFlags::INPUT_ATTACHMENT_READ,
        AccessFlags::INPUT_ATTACHMENT_READ,
    ),
    (vk::AccessFlags::SHADER_READ, AccessFlags::SHADER_READ),
    (vk::AccessFlags::SHADER_WRITE, AccessFlags::SHADER_WRITE),
    (
        vk::AccessFlags::COLOR_ATTACHMENT_READ,
        AccessFlags::COLOR_ATTACHMENT_READ,
    ),
    (
        vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        AccessFlags::COLOR_ATTACHMENT_WRITE,
    ),
    (
        vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ,
        AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ,
    ),
    (
        vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
    ),
    (vk::AccessFlags::TRANSFER_READ, AccessFlags::TRANSFER_READ),
    (vk::AccessFlags::TRANSFER_WRITE, AccessFlags::TRANSFER_WRITE),
    (vk::AccessFlags::HOST_READ, AccessFlags::HOST_READ),
    (vk::AccessFlags::HOST_WRITE, AccessFlags::HOST_WRITE),
    (vk::AccessFlags::MEMORY_READ, AccessFlags::MEMORY_READ),
    (vk::AccessFlags::MEMORY_WRITE, AccessFlags::MEMORY_WRITE),
    (
        vk::AccessFlags::TRANSFORM_FEEDBACK_WRITE_EXT,
        AccessFlags::TRANSFORM_FEEDBACK_WRITE,
    ),
    (
        vk::AccessFlags::CONDITIONAL_RENDERING_READ_EXT,
        AccessFlags::CONDITIONAL_RENDERING_READ,
    ),
    (
        vk::AccessFlags::FRAGMENT_SHADING_RATE_ATTACHMENT_READ_KHR,
        AccessFlags::FRAGMENT_SHADING_RATE_READ,
    ),
];

const STAGES: [(vk::PipelineStageFlags, PipelineStages); 19] = [
    (vk::PipelineStageFlags::TOP_OF_PIPE, PipelineStages::TOP_OF_PIPE),
    (
        vk::PipelineStageFlags::DRAW_INDIRECT,
        PipelineStages::DRAW_INDIRECT,
    ),
    (vk::PipelineStageFlags::VERTEX_INPUT, PipelineStages::VERTEX_INPUT),
    (
        vk::PipelineStageFlags::VERTEX_SHADER,
        PipelineStages::VERTEX_SHADER,
    ),
    (
        vk::PipelineStageFlags::TESSELLATION_CONTROL_SHADER,
        PipelineStages::TESSELLATION_CONTROL_SHADER,
    ),
    (
        vk::PipelineStageFlags::TESSELLATION_EVALUATION_SHADER,
        PipelineStages::TESSELLATION_EVALUATION_SHADER,
    ),
    (
        vk::PipelineStageFlags::GEOMETRY_SHADER,
        PipelineStages::GEOMETRY_SHADER,
    ),
    (
        vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
        PipelineStages::EARLY_FRAGMENT_TESTS,
    ),
    (
        vk::PipelineStageFlags::FRAGMENT_SHADER,
        PipelineStages::FRAGMENT_SHADER,
    ),
    (
        vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
        PipelineStages::LATE_FRAGMENT_TESTS,
    ),
    (
        vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        PipelineStages::COLOR_ATTACHMENT_OUTPUT,
    ),
    (
        vk::PipelineStageFlags::COMPUTE_SHADER,
        PipelineStages::COMPUTE_SHADER,
    ),
    (vk::PipelineStageFlags::TRANSFER, PipelineStages::TRANSFER),
    (
        vk::PipelineStageFlags::BOTTOM_OF_PIPE,
        PipelineStages::BOTTOM_OF_PIPE,
    ),
    (vk::PipelineStageFlags::HOST, PipelineStages::HOST),
    (vk::PipelineStageFlags::ALL_GRAPHICS, PipelineStages::ALL_GRAPHICS),
    (vk::PipelineStageFlags::ALL_COMMANDS, PipelineStages::ALL_COMMANDS),
    (
        vk::PipelineStageFlags::TRANSFORM_FEEDBACK_EXT,
        PipelineStages::TRANSFORM_FEEDBACK,
    ),
    (
        vk::PipelineStageFlags::CONDITIONAL_RENDERING_EXT,
        PipelineStages::CONDITIONAL_RENDERING,
    ),
];

/// Bits without a counterpart are dropped.
pub fn from_vk_access(access: vk::AccessFlags) -> AccessFlags {
    ACCESS
        .iter()
        .filter(|(vk, _)| access.contains(*vk))
        .fold(AccessFlags::empty(), |acc, (_, flag)| acc | *flag)
}

pub fn from_vk_stages(stages: vk::PipelineStageFlags) -> PipelineStages {
    STAGES
        .iter()
        .filter(|(vk, _)| stages.contains(*vk))
        .fold(PipelineStages::empty(), |acc, (_, flag)| acc | *flag)
}

#[inline(always)]
pub fn from_vk_aspects(aspects: vk::ImageAspectFlags) -> ImageAspects {
    let mut out = ImageAspects::empty();
    out.set(
        ImageAspects::COLOR,
        aspects.contains(vk::ImageAspectFlags::COLOR),
    );
    out.set(
        ImageAspects::DEPTH,
        aspects.contains(vk::ImageAspectFlags::DEPTH),
    );
    out.set(
        ImageAspects::STENCIL,
        aspects.contains(vk::ImageAspectFlags::STENCIL),
    );
    out
}

/// Layouts without a dedicated counterpart are treated as `General`, which never allows
/// compression.
pub fn from_vk_image_layout(layout: vk::ImageLayout) -> ImageLayout {
    match layout {
        vk::ImageLayout::UNDEFINED => ImageLayout::Undefined,
        vk::ImageLayout::PREINITIALIZED => ImageLayout::Preinitialized,
        vk::ImageLayout::GENERAL => ImageLayout::General,
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL => ImageLayout::ColorAttachment,
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL => ImageLayout::DepthStencilAttachment,
        vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL => ImageLayout::DepthStencilReadOnly,
        vk::ImageLayout::DEPTH_ATTACHMENT_STENCIL_READ_ONLY_OPTIMAL => {
            ImageLayout::DepthAttachmentStencilReadOnly
        }
        vk::ImageLayout::DEPTH_READ_ONLY_STENCIL_ATTACHMENT_OPTIMAL => {
            ImageLayout::DepthReadOnlyStencilAttachment
        }
        vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL => ImageLayout::DepthAttachment,
        vk::ImageLayout::DEPTH_READ_ONLY_OPTIMAL => ImageLayout::DepthReadOnly,
        vk::ImageLayout::STENCIL_ATTACHMENT_OPTIMAL => ImageLayout::StencilAttachment,
        vk::ImageLayout::STENCIL_READ_ONLY_OPTIMAL => ImageLayout::StencilReadOnly,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL => ImageLayout::ShaderReadOnly,
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL => ImageLayout::TransferSrc,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL => ImageLayout::TransferDst,
        vk::ImageLayout::PRESENT_SRC_KHR => ImageLayout::Present,
        vk::ImageLayout::ATTACHMENT_FEEDBACK_LOOP_OPTIMAL_EXT => {
            ImageLayout::AttachmentFeedbackLoop
        }
        _ => ImageLayout::General,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_bits_translate_one_to_one() {
        let all = ACCESS
            .iter()
            .fold(vk::AccessFlags::empty(), |acc, (vk, _)| acc | *vk);
        assert_eq!(from_vk_access(all), AccessFlags::all());
        assert_eq!(
            from_vk_access(vk::AccessFlags::SHADER_READ | vk::AccessFlags::TRANSFER_WRITE),
            AccessFlags::SHADER_READ | AccessFlags::TRANSFER_WRITE
        );
        assert_eq!(
            from_vk_access(vk::AccessFlags::COMMAND_PREPROCESS_READ_NV),
            AccessFlags::empty()
        );
    }

    #[test]
    fn stages_translate() {
        assert_eq!(
            from_vk_stages(
                vk::PipelineStageFlags::FRAGMENT_SHADER | vk::PipelineStageFlags::COMPUTE_SHADER
            ),
            PipelineStages::FRAGMENT_SHADER | PipelineStages::COMPUTE_SHADER
        );
    }

    #[test]
    fn unknown_layouts_are_general() {
        assert_eq!(
            from_vk_image_layout(vk::ImageLayout::READ_ONLY_OPTIMAL),
            ImageLayout::General
        );
        assert_eq!(
            from_vk_image_layout(vk::ImageLayout::DEPTH_READ_ONLY_OPTIMAL),
            ImageLayout::DepthReadOnly
        );
        assert_eq!(
            from_vk_aspects(vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL),
            ImageAspects::DEPTH | ImageAspects::STENCIL
        );
    }
}
