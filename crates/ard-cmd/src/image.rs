use std::sync::Arc;

use api::surface::{ImageCreateInfo, MetadataKind, MetadataKinds, MetadataSurface};

use crate::util::id_gen::ResourceId;

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ImageId(pub(crate) ResourceId);

/// An image whose compressed metadata is managed by the recording engine. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Image(Arc<ImageInner>);

#[derive(Debug)]
struct ImageInner {
    id: ImageId,
    info: ImageCreateInfo,
    metadata: [Option<MetadataSurface>; MetadataKind::COUNT],
    kinds: MetadataKinds,
}

impl Image {
    pub(crate) fn new(
        id: ResourceId,
        info: ImageCreateInfo,
        metadata: [Option<MetadataSurface>; MetadataKind::COUNT],
    ) -> Self {
        let kinds = MetadataKind::ALL
            .into_iter()
            .filter(|kind| metadata[kind.index()].is_some())
            .fold(MetadataKinds::empty(), |kinds, kind| kinds | kind.flag());

        Self(Arc::new(ImageInner {
            id: ImageId(id),
            info,
            metadata,
            kinds,
        }))
    }

    #[inline(always)]
    pub fn id(&self) -> ImageId {
        self.0.id
    }

    #[inline(always)]
    pub fn info(&self) -> &ImageCreateInfo {
        &self.0.info
    }

    /// Metadata kinds enabled on the image. Fixed for the lifetime of the image.
    #[inline(always)]
    pub fn metadata_kinds(&self) -> MetadataKinds {
        self.0.kinds
    }

    #[inline(always)]
    pub fn metadata(&self, kind: MetadataKind) -> Option<&MetadataSurface> {
        self.0.metadata[kind.index()].as_ref()
    }

    #[inline(always)]
    pub fn debug_name(&self) -> Option<&str> {
        self.0.info.debug_name.as_deref()
    }
}

impl PartialEq for Image {
    fn eq(&self, other: &Self) -> bool {
        self.0.id == other.0.id
    }
}

impl Eq for Image {}
