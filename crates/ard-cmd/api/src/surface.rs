use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::{
    layout::SubresourceRange,
    types::{Format, ImageType, ImageUsage, MultiSamples, SharingMode},
};

/// Describes an image whose metadata the recording engine manages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageCreateInfo {
    pub ty: ImageType,
    pub format: Format,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub array_layers: u32,
    pub mip_levels: u32,
    pub samples: MultiSamples,
    pub usage: ImageUsage,
    pub sharing: SharingMode,
    /// GPU address of the memory bound to the image.
    pub address: u64,
    pub debug_name: Option<String>,
}

/// Kinds of hardware-private metadata an image may carry.
#[derive(Debug, Serialize, Deserialize, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum MetadataKind {
    /// Lossless color compression and fast-clear color values.
    Color,
    /// Depth/stencil compression and fast-clear depth/stencil values.
    Depth,
    /// Multisample compression.
    Multisample,
}

bitflags! {
    #[derive(Debug, Default, Serialize, Deserialize, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
    #[serde(transparent)]
    pub struct MetadataKinds: u32 {
        const COLOR       = 0b001;
        const DEPTH       = 0b010;
        const MULTISAMPLE = 0b100;
    }
}

/// Placement of one kind of metadata, as computed by the surface layout module.
#[derive(Debug, Serialize, Deserialize, Copy, Clone, PartialEq, Eq, Hash)]
pub struct MetadataSurface {
    /// Stable GPU address of the metadata of the queried subresources.
    pub address: u64,
    /// Size in bytes of the metadata of the queried subresources.
    pub size: u64,
    /// Size in bytes of a single metadata element. Fills are written in units of this size.
    pub element_size: u32,
    /// GPU address where the fast-clear value is published.
    pub clear_value_address: u64,
    /// Number of leading mip levels covered by the metadata. Levels past this count are never
    /// compressed.
    pub eligible_levels: u32,
}

/// The surface/image layout module. Computes metadata placement for images.
///
/// Metadata is laid out mip-major: every layer of mip 0, then every layer of mip 1 and so on.
/// The recording engine only queries ranges that are contiguous under that order, meaning a run
/// of layers within one mip or whole mips.
pub trait SurfaceLayout: Send + Sync + 'static {
    /// Returns the placement of `kind` metadata for the subresources in `range`, or `None` if the
    /// layout does not support that kind of metadata for the image. Aspects of `range` are
    /// ignored.
    fn metadata(
        &self,
        image: &ImageCreateInfo,
        kind: MetadataKind,
        range: &SubresourceRange,
    ) -> Option<MetadataSurface>;
}

impl MetadataKind {
    pub const COUNT: usize = 3;

    pub const ALL: [MetadataKind; Self::COUNT] = [
        MetadataKind::Color,
        MetadataKind::Depth,
        MetadataKind::Multisample,
    ];

    #[inline(always)]
    pub const fn flag(self) -> MetadataKinds {
        match self {
            MetadataKind::Color => MetadataKinds::COLOR,
            MetadataKind::Depth => MetadataKinds::DEPTH,
            MetadataKind::Multisample => MetadataKinds::MULTISAMPLE,
        }
    }

    #[inline(always)]
    pub const fn index(self) -> usize {
        self as usize
    }
}

impl MetadataKinds {
    #[inline]
    pub fn kinds(self) -> impl Iterator<Item = MetadataKind> {
        MetadataKind::ALL
            .into_iter()
            .filter(move |kind| self.contains(kind.flag()))
    }
}

impl ImageCreateInfo {
    /// Number of subresources (mip levels times array layers).
    #[inline(always)]
    pub fn subresource_count(&self) -> usize {
        (self.mip_levels * self.array_layers) as usize
    }
}
