use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// Describes how an image subresource is going to be accessed. Layouts decide whether compressed
/// metadata may stay compressed.
#[derive(Debug, Default, Serialize, Deserialize, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ImageLayout {
    /// Contents are undefined. Transitioning out of this layout (re)initializes metadata.
    #[default]
    Undefined,
    /// Host-written contents. Treated like `Undefined` for metadata purposes.
    Preinitialized,
    /// Supports every access kind.
    General,
    ColorAttachment,
    DepthStencilAttachment,
    DepthStencilReadOnly,
    DepthAttachmentStencilReadOnly,
    DepthReadOnlyStencilAttachment,
    /// Per-aspect layouts used with separate depth/stencil layout tracking.
    DepthAttachment,
    DepthReadOnly,
    StencilAttachment,
    StencilReadOnly,
    ShaderReadOnly,
    TransferSrc,
    TransferDst,
    Present,
    /// The image is bound as an attachment and sampled in the same pass (a render loop).
    AttachmentFeedbackLoop,
}

bitflags! {
    #[derive(Debug, Serialize, Deserialize, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
    #[serde(transparent)]
    pub struct ImageAspects: u32 {
        const COLOR   = 0b001;
        const DEPTH   = 0b010;
        const STENCIL = 0b100;
    }
}

/// A range of mip levels and array layers of a single image.
#[derive(Debug, Serialize, Deserialize, Copy, Clone, PartialEq, Eq, Hash)]
pub struct SubresourceRange {
    pub aspects: ImageAspects,
    pub base_mip: u32,
    /// `None` means every remaining mip level.
    pub mip_count: Option<u32>,
    pub base_layer: u32,
    /// `None` means every remaining array layer.
    pub layer_count: Option<u32>,
}

impl ImageLayout {
    /// Transitioning out of one of these layouts discards contents and requires metadata to be
    /// reinitialized.
    #[inline(always)]
    pub fn is_undefined(self) -> bool {
        matches!(self, ImageLayout::Undefined | ImageLayout::Preinitialized)
    }

    /// The layout the given aspect of a combined depth/stencil layout resolves to.
    pub fn for_aspect(self, aspect: ImageAspects) -> ImageLayout {
        let depth = aspect.contains(ImageAspects::DEPTH);
        match (self, depth) {
            (ImageLayout::DepthAttachmentStencilReadOnly, true) => ImageLayout::DepthAttachment,
            (ImageLayout::DepthAttachmentStencilReadOnly, false) => ImageLayout::StencilReadOnly,
            (ImageLayout::DepthReadOnlyStencilAttachment, true) => ImageLayout::DepthReadOnly,
            (ImageLayout::DepthReadOnlyStencilAttachment, false) => ImageLayout::StencilAttachment,
            (ImageLayout::DepthStencilAttachment, true) => ImageLayout::DepthAttachment,
            (ImageLayout::DepthStencilAttachment, false) => ImageLayout::StencilAttachment,
            (ImageLayout::DepthStencilReadOnly, true) => ImageLayout::DepthReadOnly,
            (ImageLayout::DepthStencilReadOnly, false) => ImageLayout::StencilReadOnly,
            (layout, _) => layout,
        }
    }

    /// `true` if the layout permits writes through the depth/stencil block.
    #[inline(always)]
    pub fn is_depth_stencil_writable(self) -> bool {
        matches!(
            self,
            ImageLayout::DepthStencilAttachment
                | ImageLayout::DepthAttachmentStencilReadOnly
                | ImageLayout::DepthReadOnlyStencilAttachment
                | ImageLayout::DepthAttachment
                | ImageLayout::StencilAttachment
        )
    }

    #[inline(always)]
    pub fn is_depth_stencil_read_only(self) -> bool {
        matches!(
            self,
            ImageLayout::DepthStencilReadOnly
                | ImageLayout::DepthReadOnly
                | ImageLayout::StencilReadOnly
        )
    }
}

impl SubresourceRange {
    /// Every mip and layer of the given aspects.
    #[inline(always)]
    pub fn all(aspects: ImageAspects) -> Self {
        Self {
            aspects,
            base_mip: 0,
            mip_count: None,
            base_layer: 0,
            layer_count: None,
        }
    }

    /// Resolves the mip range against an image with `mip_levels` levels.
    #[inline(always)]
    pub fn mips(&self, mip_levels: u32) -> std::ops::Range<u32> {
        let end = match self.mip_count {
            Some(count) => self.base_mip + count,
            None => mip_levels,
        };
        self.base_mip..end.min(mip_levels)
    }

    /// Resolves the layer range against an image with `array_layers` layers.
    #[inline(always)]
    pub fn layers(&self, array_layers: u32) -> std::ops::Range<u32> {
        let end = match self.layer_count {
            Some(count) => self.base_layer + count,
            None => array_layers,
        };
        self.base_layer..end.min(array_layers)
    }

    /// The same range restricted to a single aspect.
    #[inline(always)]
    pub fn with_aspects(mut self, aspects: ImageAspects) -> Self {
        self.aspects = aspects;
        self
    }
}
