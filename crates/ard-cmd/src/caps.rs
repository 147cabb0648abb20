//! Per-generation capability tables.
//!
//! Everything that differs between hardware generations (register placement, errata, which
//! layouts keep metadata compressed, cache coherence) lives in a [`DeviceCaps`] resolved once at
//! device open. The recording paths only ever consult the resolved table.

use api::{
    dynamic::DynamicStateMask,
    layout::{ImageAspects, ImageLayout},
    surface::{ImageCreateInfo, MetadataKind},
    types::{Generation, ImageUsage, QueueFamilies},
};
use bitflags::bitflags;

use crate::state::{registers::PIPELINE_DEPENDENT, RegisterGroup};

bitflags! {
    /// Hardware errata that change what the recording engine must emit.
    #[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct Errata: u32 {
        /// A context roll can corrupt the scissor. The scissor must be re-emitted after any
        /// context register write in the same draw.
        const SCISSOR_ON_CONTEXT_ROLL = 0b01;
        /// TC-compatible depth metadata mishandles a depth clear value of exactly zero unless the
        /// Z-range precision register is rewritten with every clear value change.
        const TC_COMPAT_ZRANGE = 0b10;
    }
}

/// What the L2 coherence policy gets to look at.
#[derive(Debug, Copy, Clone)]
pub struct CoherenceQuery<'a> {
    /// The image a barrier refers to. `None` for global memory barriers.
    pub image: Option<&'a ImageCreateInfo>,
    pub tcc_rb_non_coherent: bool,
}

/// The layout a metadata kind is being evaluated against.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct LayoutContext {
    /// Layout of the aspect being evaluated. Combined depth/stencil layouts are already resolved
    /// to the aspect.
    pub layout: ImageLayout,
    pub aspect: ImageAspects,
    /// Queue families that may access the image while it is in `layout`.
    pub queue_families: QueueFamilies,
}

pub type CoherenceFn = fn(&CoherenceQuery) -> bool;
pub type MetadataEnabledFn = fn(&ImageCreateInfo, MetadataKind) -> bool;
pub type CompressedFn = fn(&ImageCreateInfo, &LayoutContext) -> bool;

#[derive(Copy, Clone)]
pub struct DeviceCaps {
    pub name: &'static str,
    /// Register offset of every register group.
    pub registers: [u32; RegisterGroup::COUNT],
    pub errata: Errata,
    /// Dynamic state whose encoding depends on the bound pipeline.
    pub pipeline_dependent: DynamicStateMask,
    /// `true` if color/depth block writes are visible to shader reads through L2 without an L2
    /// invalidate.
    pub l2_coherent: CoherenceFn,
    /// Decides at image creation whether a metadata kind is enabled.
    pub metadata_enabled: MetadataEnabledFn,
    /// Per metadata kind, whether the metadata may stay compressed in a layout.
    pub compressed: [CompressedFn; MetadataKind::COUNT],
    /// Per metadata kind, the pattern that marks metadata as fully expanded.
    pub fill_values: [u32; MetadataKind::COUNT],
}

/// Gfx6 through Gfx8.
pub const GFX6_CAPS: DeviceCaps = DeviceCaps {
    name: "gfx6",
    registers: [
        0xA10F, 0xA090, 0xA282, 0xA2DF, 0xA105, 0xA008, 0xA10C, 0xA0D2, 0xA2F8, 0xA283,
        0xA205, 0xC242, 0xA200, 0xA2E6, 0xA2A5, 0xA204, 0xA202, 0xA08E, 0xA2D6,
    ],
    errata: Errata::empty(),
    pipeline_dependent: PIPELINE_DEPENDENT,
    l2_coherent: never_coherent,
    metadata_enabled: gfx6_metadata_enabled,
    compressed: [gfx6_color_compressed, gfx6_depth_compressed, gfx6_msaa_compressed],
    fill_values: [0xCCCC_CCCC, 0xFFFF_FFF0, 0x7654_3210],
};

pub const GFX9_CAPS: DeviceCaps = DeviceCaps {
    name: "gfx9",
    registers: [
        0xA10F, 0xA090, 0xA282, 0xA2DF, 0xA105, 0xA008, 0xA10C, 0xA0D2, 0xA2F8, 0xA283,
        0xA205, 0xC242, 0xA200, 0xA2E6, 0xC24B, 0xA204, 0xA202, 0xA08E, 0xA2D6,
    ],
    errata: Errata::SCISSOR_ON_CONTEXT_ROLL.union(Errata::TC_COMPAT_ZRANGE),
    pipeline_dependent: PIPELINE_DEPENDENT,
    l2_coherent: gfx9_l2_coherent,
    metadata_enabled: gfx9_metadata_enabled,
    compressed: [gfx9_color_compressed, gfx9_depth_compressed, gfx9_msaa_compressed],
    fill_values: [0xFFFF_FFFF, 0xFFFF_FFF0, 0x7654_3210],
};

/// Gfx10 and later.
pub const GFX10_CAPS: DeviceCaps = DeviceCaps {
    name: "gfx10",
    registers: [
        0xA10F, 0xA090, 0xA282, 0xA2DF, 0xA105, 0xA008, 0xA10C, 0xA0D2, 0xA2F8, 0xA283,
        0xA205, 0xC242, 0xA200, 0xA2E6, 0xC24B, 0xA204, 0xA202, 0xA08E, 0xA2D6,
    ],
    errata: Errata::empty(),
    pipeline_dependent: PIPELINE_DEPENDENT,
    l2_coherent: gfx10_l2_coherent,
    metadata_enabled: gfx10_metadata_enabled,
    compressed: [gfx10_color_compressed, gfx10_depth_compressed, gfx10_msaa_compressed],
    fill_values: [0xFFFF_FFFF, 0xFFFF_FFF0, 0xFFFF_FFFF],
};

impl DeviceCaps {
    /// Resolves the capability table of a generation.
    pub fn resolve(generation: Generation) -> DeviceCaps {
        match generation {
            Generation::Gfx6 | Generation::Gfx7 => GFX6_CAPS,
            Generation::Gfx8 => DeviceCaps {
                name: "gfx8",
                errata: Errata::TC_COMPAT_ZRANGE,
                ..GFX6_CAPS
            },
            Generation::Gfx9 => GFX9_CAPS,
            Generation::Gfx10 | Generation::Gfx10_3 | Generation::Gfx11 => GFX10_CAPS,
        }
    }

    #[inline(always)]
    pub fn register(&self, group: RegisterGroup) -> u32 {
        self.registers[group as usize]
    }

    #[inline(always)]
    pub fn has_erratum(&self, erratum: Errata) -> bool {
        self.errata.contains(erratum)
    }

    /// Whether `kind` metadata may stay compressed in the given context. Compression is never
    /// kept when more than one queue family may access the image.
    #[inline]
    pub fn is_compressed(
        &self,
        image: &ImageCreateInfo,
        kind: MetadataKind,
        ctx: &LayoutContext,
    ) -> bool {
        if ctx.queue_families.bits().count_ones() != 1 || ctx.layout.is_undefined() {
            return false;
        }
        (self.compressed[kind.index()])(image, ctx)
    }
}

impl std::fmt::Debug for DeviceCaps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceCaps")
            .field("name", &self.name)
            .field("errata", &self.errata)
            .field("pipeline_dependent", &self.pipeline_dependent)
            .finish_non_exhaustive()
    }
}

fn never_coherent(_: &CoherenceQuery) -> bool {
    false
}

/// Single-sampled render targets without stencil are written through L2 on Gfx9.
fn gfx9_l2_coherent(query: &CoherenceQuery) -> bool {
    match query.image {
        Some(image) => {
            image.samples.count() == 1
                && image.usage.intersects(
                    ImageUsage::COLOR_ATTACHMENT | ImageUsage::DEPTH_STENCIL_ATTACHMENT,
                )
                && !image.format.has_stencil()
        }
        None => false,
    }
}

fn gfx10_l2_coherent(query: &CoherenceQuery) -> bool {
    !query.tcc_rb_non_coherent
}

fn gfx6_metadata_enabled(image: &ImageCreateInfo, kind: MetadataKind) -> bool {
    match kind {
        MetadataKind::Color => {
            image.format.is_color()
                && image.usage.contains(ImageUsage::COLOR_ATTACHMENT)
                && !image
                    .usage
                    .intersects(ImageUsage::STORAGE | ImageUsage::SCANOUT)
        }
        // No mipmapped depth metadata before Gfx10.
        MetadataKind::Depth => {
            !image.format.is_color()
                && image.usage.contains(ImageUsage::DEPTH_STENCIL_ATTACHMENT)
                && image.mip_levels == 1
        }
        MetadataKind::Multisample => {
            image.samples.count() > 1 && image.usage.contains(ImageUsage::COLOR_ATTACHMENT)
        }
    }
}

fn gfx9_metadata_enabled(image: &ImageCreateInfo, kind: MetadataKind) -> bool {
    match kind {
        MetadataKind::Color => {
            image.format.is_color()
                && image.usage.contains(ImageUsage::COLOR_ATTACHMENT)
                && !image.usage.contains(ImageUsage::STORAGE)
        }
        MetadataKind::Depth => {
            !image.format.is_color()
                && image.usage.contains(ImageUsage::DEPTH_STENCIL_ATTACHMENT)
        }
        MetadataKind::Multisample => gfx6_metadata_enabled(image, kind),
    }
}

fn gfx10_metadata_enabled(image: &ImageCreateInfo, kind: MetadataKind) -> bool {
    match kind {
        MetadataKind::Color => {
            image.format.is_color() && image.usage.contains(ImageUsage::COLOR_ATTACHMENT)
        }
        _ => gfx9_metadata_enabled(image, kind),
    }
}

fn gfx6_color_compressed(_: &ImageCreateInfo, ctx: &LayoutContext) -> bool {
    ctx.layout == ImageLayout::ColorAttachment
}

fn gfx9_color_compressed(image: &ImageCreateInfo, ctx: &LayoutContext) -> bool {
    match ctx.layout {
        ImageLayout::ColorAttachment | ImageLayout::TransferSrc => true,
        ImageLayout::ShaderReadOnly => image.usage.contains(ImageUsage::SAMPLED),
        _ => false,
    }
}

fn gfx10_color_compressed(image: &ImageCreateInfo, ctx: &LayoutContext) -> bool {
    match ctx.layout {
        ImageLayout::TransferDst | ImageLayout::General => true,
        _ => gfx9_color_compressed(image, ctx),
    }
}

fn gfx6_depth_compressed(_: &ImageCreateInfo, ctx: &LayoutContext) -> bool {
    ctx.layout.is_depth_stencil_writable() || ctx.layout.is_depth_stencil_read_only()
}

fn gfx9_depth_compressed(image: &ImageCreateInfo, ctx: &LayoutContext) -> bool {
    match ctx.layout {
        ImageLayout::ShaderReadOnly | ImageLayout::TransferSrc => {
            image.usage.contains(ImageUsage::SAMPLED)
        }
        _ => gfx6_depth_compressed(image, ctx),
    }
}

fn gfx10_depth_compressed(image: &ImageCreateInfo, ctx: &LayoutContext) -> bool {
    match ctx.layout {
        ImageLayout::General | ImageLayout::AttachmentFeedbackLoop => true,
        _ => gfx9_depth_compressed(image, ctx),
    }
}

fn gfx6_msaa_compressed(_: &ImageCreateInfo, ctx: &LayoutContext) -> bool {
    ctx.layout == ImageLayout::ColorAttachment
}

fn gfx9_msaa_compressed(_: &ImageCreateInfo, ctx: &LayoutContext) -> bool {
    matches!(
        ctx.layout,
        ImageLayout::ColorAttachment | ImageLayout::ShaderReadOnly | ImageLayout::TransferSrc
    )
}

fn gfx10_msaa_compressed(image: &ImageCreateInfo, ctx: &LayoutContext) -> bool {
    ctx.layout == ImageLayout::General || gfx9_msaa_compressed(image, ctx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use api::types::{Format, ImageType, MultiSamples, SharingMode};

    fn color_target() -> ImageCreateInfo {
        ImageCreateInfo {
            ty: ImageType::Type2D,
            format: Format::Rgba8Unorm,
            width: 64,
            height: 64,
            depth: 1,
            array_layers: 1,
            mip_levels: 1,
            samples: MultiSamples::Count1,
            usage: ImageUsage::COLOR_ATTACHMENT | ImageUsage::SAMPLED,
            sharing: SharingMode::Exclusive,
            address: 0,
            debug_name: None,
        }
    }

    fn ctx(layout: ImageLayout, queue_families: QueueFamilies) -> LayoutContext {
        LayoutContext {
            layout,
            aspect: ImageAspects::COLOR,
            queue_families,
        }
    }

    #[test]
    fn generations_resolve_to_families() {
        assert_eq!(DeviceCaps::resolve(Generation::Gfx7).name, "gfx6");
        assert_eq!(DeviceCaps::resolve(Generation::Gfx11).name, "gfx10");

        let gfx8 = DeviceCaps::resolve(Generation::Gfx8);
        assert!(gfx8.has_erratum(Errata::TC_COMPAT_ZRANGE));
        assert!(!gfx8.has_erratum(Errata::SCISSOR_ON_CONTEXT_ROLL));
        assert!(DeviceCaps::resolve(Generation::Gfx9).has_erratum(Errata::SCISSOR_ON_CONTEXT_ROLL));
    }

    /// Compression needs exactly one owning queue family.
    #[test]
    fn shared_images_never_stay_compressed() {
        let image = color_target();
        let caps = DeviceCaps::resolve(Generation::Gfx10);
        let exclusive = ctx(ImageLayout::ColorAttachment, QueueFamilies::GRAPHICS);
        let shared = ctx(
            ImageLayout::ColorAttachment,
            QueueFamilies::GRAPHICS | QueueFamilies::COMPUTE,
        );
        assert!(caps.is_compressed(&image, MetadataKind::Color, &exclusive));
        assert!(!caps.is_compressed(&image, MetadataKind::Color, &shared));
    }

    #[test]
    fn sampling_compressed_color_depends_on_generation() {
        let image = color_target();
        let sampled = ctx(ImageLayout::ShaderReadOnly, QueueFamilies::GRAPHICS);
        assert!(!GFX6_CAPS.is_compressed(&image, MetadataKind::Color, &sampled));
        assert!(GFX9_CAPS.is_compressed(&image, MetadataKind::Color, &sampled));
        assert!(GFX10_CAPS.is_compressed(&image, MetadataKind::Color, &sampled));
    }

    #[test]
    fn coherence_policies() {
        let image = color_target();
        let with_image = CoherenceQuery {
            image: Some(&image),
            tcc_rb_non_coherent: false,
        };
        let global = CoherenceQuery {
            image: None,
            tcc_rb_non_coherent: true,
        };
        assert!(!(GFX6_CAPS.l2_coherent)(&with_image));
        assert!((GFX9_CAPS.l2_coherent)(&with_image));
        assert!(!(GFX9_CAPS.l2_coherent)(&global));
        assert!((GFX10_CAPS.l2_coherent)(&with_image));
        assert!(!(GFX10_CAPS.l2_coherent)(&global));
    }

    #[test]
    fn storage_images_lose_color_metadata_before_gfx10() {
        let mut image = color_target();
        image.usage |= ImageUsage::STORAGE;
        assert!(!(GFX6_CAPS.metadata_enabled)(&image, MetadataKind::Color));
        assert!(!(GFX9_CAPS.metadata_enabled)(&image, MetadataKind::Color));
        assert!((GFX10_CAPS.metadata_enabled)(&image, MetadataKind::Color));
        assert!(!(GFX10_CAPS.metadata_enabled)(&image, MetadataKind::Depth));
    }
}
