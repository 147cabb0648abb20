use std::sync::Arc;

use api::{
    layout::{ImageAspects, SubresourceRange},
    pipeline::PipelineCreateInfo,
    surface::{ImageCreateInfo, MetadataKind, SurfaceLayout},
    types::{Generation, QueueFamilies},
    Winsys,
};
use ard_log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::{
    image::Image,
    pipeline::Pipeline,
    settings::DriverSettings,
    util::id_gen::{IdGenerator, ResourceId},
};

pub use crate::caps::DeviceCaps;

/// Describes the device being opened.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceInfo {
    pub generation: Generation,
    /// Marketing or family name, used for logging only.
    pub name: String,
    /// Set when color/depth block writes bypass L2 coherence even where the generation would
    /// otherwise guarantee it.
    pub tcc_rb_non_coherent: bool,
    /// Queue families exposed by the device.
    pub queue_families: QueueFamilies,
}

/// An opened device. Cheap to clone.
pub struct Device<W: Winsys>(Arc<DeviceInner<W>>);

struct DeviceInner<W: Winsys> {
    winsys: W,
    surface: Box<dyn SurfaceLayout>,
    info: DeviceInfo,
    caps: DeviceCaps,
    settings: DriverSettings,
    ids: IdGenerator,
}

impl<W: Winsys> Device<W> {
    /// Opens a device. The capability table is resolved here once and never changes.
    pub fn new(
        winsys: W,
        surface: impl SurfaceLayout,
        info: DeviceInfo,
        settings: DriverSettings,
    ) -> Self {
        let generation = settings.generation_override.unwrap_or(info.generation);
        let caps = DeviceCaps::resolve(generation);
        info!(
            "opened device `{}` ({:?}) with `{}` capabilities",
            info.name, generation, caps.name
        );
        if settings.generation_override.is_some() {
            info!("capabilities forced to {generation:?} by driver settings");
        }

        Self(Arc::new(DeviceInner {
            winsys,
            surface: Box::new(surface),
            info,
            caps,
            settings,
            ids: IdGenerator::default(),
        }))
    }

    #[inline(always)]
    pub fn winsys(&self) -> &W {
        &self.0.winsys
    }

    #[inline(always)]
    pub fn caps(&self) -> &DeviceCaps {
        &self.0.caps
    }

    #[inline(always)]
    pub fn info(&self) -> &DeviceInfo {
        &self.0.info
    }

    #[inline(always)]
    pub fn surface_layout(&self) -> &dyn SurfaceLayout {
        self.0.surface.as_ref()
    }

    #[inline(always)]
    pub fn settings(&self) -> &DriverSettings {
        &self.0.settings
    }

    /// Creates an image and decides which metadata kinds it carries. The decision is permanent.
    pub fn create_image(&self, create_info: ImageCreateInfo) -> Image {
        let caps = &self.0.caps;
        let disabled = self.0.settings.disable_compression;

        let mut metadata = [None; MetadataKind::COUNT];
        for kind in MetadataKind::ALL {
            if disabled.contains(kind.flag()) || !(caps.metadata_enabled)(&create_info, kind) {
                continue;
            }
            metadata[kind.index()] = self.0.surface.metadata(
                &create_info,
                kind,
                &SubresourceRange::all(ImageAspects::all()),
            );
        }

        let image = Image::new(self.0.ids.create(), create_info, metadata);
        debug!(
            "created image {:?} {:?} with metadata {:?}",
            image.id(),
            image.debug_name(),
            image.metadata_kinds()
        );
        image
    }

    #[inline(always)]
    pub(crate) fn create_id(&self) -> ResourceId {
        self.0.ids.create()
    }

    /// # Panics
    /// - If a static state value is also declared dynamic.
    pub fn create_pipeline(&self, create_info: PipelineCreateInfo) -> Pipeline {
        for value in &create_info.static_state {
            assert!(
                !create_info.dynamic_states.contains(value.state().flag()),
                "{:?} is both static and dynamic",
                value.state()
            );
        }
        Pipeline::new(self.0.ids.create(), create_info)
    }
}

impl<W: Winsys> Clone for Device<W> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl DeviceInfo {
    pub fn new(generation: Generation) -> Self {
        Self {
            generation,
            name: format!("{generation:?}"),
            tcc_rb_non_coherent: false,
            queue_families: QueueFamilies::all(),
        }
    }
}
