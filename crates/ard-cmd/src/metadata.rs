//! Compressed metadata tracking.
//!
//! Every metadata kind of every subresource (and, for depth metadata, every aspect) is in one of
//! four states. Layout transitions move between them and produce the fills and decompresses that
//! keep the metadata consistent with the data it describes.

use std::ops::Range;

use api::{
    layout::{ImageAspects, ImageLayout, SubresourceRange},
    surface::{ImageCreateInfo, MetadataKind, SurfaceLayout},
    types::{QueueFamilies, QueueFamily, SharingMode},
};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use smallvec::{smallvec, SmallVec};

use crate::{
    caps::{DeviceCaps, Errata, LayoutContext},
    image::{Image, ImageId},
};

/// Depth and stencil are tracked separately. Color uses the first slot.
const ASPECT_SLOTS: usize = 2;

#[derive(Debug, Default, Serialize, Deserialize, Copy, Clone, PartialEq, Eq, Hash)]
pub enum MetadataState {
    /// The image has no metadata of this kind. Terminal.
    #[default]
    Absent,
    /// Metadata storage holds garbage and must be filled before use.
    Uninitialized,
    /// Metadata is valid and describes fully expanded data.
    Expanded,
    /// Metadata is valid and the data may be stored compressed.
    Compressed,
}

/// What a single metadata state transition requires.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum MetadataAction {
    Fill,
    Decompress,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Decision {
    pub next: MetadataState,
    pub action: Option<MetadataAction>,
}

/// Decides the next metadata state of one subresource aspect.
///
/// # Arguments
/// - `state` - The current state.
/// - `discard` - `true` if the old layout discards contents (undefined or preinitialized).
/// - `compressible` - `true` if the new layout and queue ownership allow compression.
/// - `eligible` - `false` for subresources outside of the range covered by the metadata.
pub fn decide(state: MetadataState, discard: bool, compressible: bool, eligible: bool) -> Decision {
    let (next, action) = match state {
        MetadataState::Absent => (MetadataState::Absent, None),
        _ if !eligible => (MetadataState::Expanded, None),
        _ if discard || state == MetadataState::Uninitialized => {
            let next = if compressible {
                MetadataState::Compressed
            } else {
                MetadataState::Expanded
            };
            (next, Some(MetadataAction::Fill))
        }
        MetadataState::Compressed if !compressible => {
            (MetadataState::Expanded, Some(MetadataAction::Decompress))
        }
        MetadataState::Expanded if compressible => (MetadataState::Compressed, None),
        state => (state, None),
    };
    Decision { next, action }
}

/// A GPU side operation on metadata storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataOp {
    /// Writes the "fully expanded" pattern over the metadata of a subresource range.
    Fill {
        kind: MetadataKind,
        aspects: ImageAspects,
        mips: Range<u32>,
        layers: Range<u32>,
        address: u64,
        size: u64,
        value: u32,
    },
    /// Expands compressed data in place.
    Decompress {
        kind: MetadataKind,
        aspects: ImageAspects,
        mips: Range<u32>,
        layers: Range<u32>,
    },
    /// Writes a fast-clear value into metadata storage. `zero_clear` is set when the Z-range
    /// precision register must be rewritten alongside.
    PublishClearValue {
        kind: MetadataKind,
        address: u64,
        value: [u32; 4],
        zero_clear: Option<bool>,
    },
}

/// A fast-clear value.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum ClearValue {
    /// Raw bits of the clear color.
    Color([u32; 4]),
    DepthStencil { depth: f32, stencil: u32 },
}

/// A layout transition of a subresource range.
#[derive(Copy, Clone)]
pub struct TransitionRequest<'a> {
    pub image: &'a Image,
    /// Places fills over exactly the subresources being initialized.
    pub surface_layout: &'a dyn SurfaceLayout,
    pub old_layout: ImageLayout,
    pub new_layout: ImageLayout,
    pub range: SubresourceRange,
    /// Queue families that may access the image in the new layout.
    pub queue_families: QueueFamilies,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TransitionOutcome {
    pub ops: SmallVec<[MetadataOp; 4]>,
    /// `true` if depth and stencil were transitioned separately.
    pub split: bool,
}

/// Metadata and layout state of the images touched by one command buffer.
#[derive(Debug, Default, Clone)]
pub struct ImageTracker {
    images: FxHashMap<ImageId, TrackedImage>,
}

#[derive(Debug, Clone)]
struct TrackedImage {
    array_layers: u32,
    /// Indexed by `mip * array_layers + layer`. `None` until first touched.
    subresources: Vec<Option<Subresource>>,
    clear_values: [Option<[u32; 4]>; MetadataKind::COUNT],
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
struct Subresource {
    /// Layouts as last declared, per aspect slot.
    layouts: [ImageLayout; ASPECT_SLOTS],
    meta: [[MetadataState; ASPECT_SLOTS]; MetadataKind::COUNT],
}

/// Subresources an action applies to, as rectangles of mips and layers.
///
/// Subresources must be added in mip-major order. A rectangle is either a run of layers within a
/// single mip or whole mips, so it never covers a subresource that was not added.
#[derive(Default)]
struct Regions(SmallVec<[(Range<u32>, Range<u32>); 2]>);

/// The queue families an image may be accessed from, given its sharing mode and the family of
/// the recording command buffer.
#[inline]
pub fn queue_families(sharing: SharingMode, family: QueueFamily) -> QueueFamilies {
    match sharing {
        SharingMode::Exclusive => family.flag(),
        SharingMode::Concurrent(families) => families,
    }
}

#[inline(always)]
fn aspect_slot(aspect: ImageAspects) -> usize {
    if aspect == ImageAspects::STENCIL {
        1
    } else {
        0
    }
}

fn image_aspects(info: &ImageCreateInfo) -> ImageAspects {
    if info.format.is_color() {
        return ImageAspects::COLOR;
    }
    let mut aspects = ImageAspects::empty();
    if info.format.is_depth() {
        aspects |= ImageAspects::DEPTH;
    }
    if info.format.has_stencil() {
        aspects |= ImageAspects::STENCIL;
    }
    aspects
}

/// Aspects a metadata kind describes.
#[inline(always)]
fn kind_aspects(kind: MetadataKind) -> ImageAspects {
    match kind {
        MetadataKind::Color | MetadataKind::Multisample => ImageAspects::COLOR,
        MetadataKind::Depth => ImageAspects::DEPTH | ImageAspects::STENCIL,
    }
}

impl Regions {
    fn add(&mut self, mip: u32, layer: u32) {
        if let Some((mips, layers)) = self.0.last_mut() {
            if mips.start == mip {
                if layer < layers.end {
                    // Already added for another aspect.
                    return;
                }
                if layer == layers.end {
                    layers.end += 1;
                    return;
                }
            }
        }
        self.0.push((mip..mip + 1, layer..layer + 1));
    }

    /// Merges rows of whole layers into runs of whole mips.
    fn finish(self, array_layers: u32) -> SmallVec<[(Range<u32>, Range<u32>); 2]> {
        let whole = 0..array_layers;
        let mut merged: SmallVec<[(Range<u32>, Range<u32>); 2]> = SmallVec::new();
        for (mips, layers) in self.0 {
            match merged.last_mut() {
                Some((prev_mips, prev_layers))
                    if prev_mips.end == mips.start && *prev_layers == whole && layers == whole =>
                {
                    prev_mips.end = mips.end;
                }
                _ => merged.push((mips, layers)),
            }
        }
        merged
    }
}

impl TrackedImage {
    fn new(info: &ImageCreateInfo) -> Self {
        Self {
            array_layers: info.array_layers,
            subresources: vec![None; info.subresource_count()],
            clear_values: [None; MetadataKind::COUNT],
        }
    }

    #[inline(always)]
    fn index(&self, mip: u32, layer: u32) -> usize {
        (mip * self.array_layers + layer) as usize
    }

    #[inline(always)]
    fn get(&self, mip: u32, layer: u32) -> Option<&Subresource> {
        self.subresources
            .get(self.index(mip, layer))
            .and_then(Option::as_ref)
    }
}

impl Subresource {
    /// State of a subresource seen for the first time in this command buffer. Derived from the
    /// layout the caller says it is in.
    fn first_touch(
        caps: &DeviceCaps,
        image: &Image,
        mip: u32,
        layout: ImageLayout,
        queue_families: QueueFamilies,
    ) -> Self {
        let info = image.info();
        let mut meta = [[MetadataState::Absent; ASPECT_SLOTS]; MetadataKind::COUNT];

        for kind in image.metadata_kinds().kinds() {
            let Some(surface) = image.metadata(kind) else {
                continue;
            };
            for aspect in (kind_aspects(kind) & image_aspects(info)).iter() {
                let ctx = LayoutContext {
                    layout: layout.for_aspect(aspect),
                    aspect,
                    queue_families,
                };
                meta[kind.index()][aspect_slot(aspect)] = if layout.is_undefined() {
                    MetadataState::Uninitialized
                } else if mip >= surface.eligible_levels {
                    MetadataState::Expanded
                } else if caps.is_compressed(info, kind, &ctx) {
                    MetadataState::Compressed
                } else {
                    MetadataState::Expanded
                };
            }
        }

        Self {
            layouts: [layout; ASPECT_SLOTS],
            meta,
        }
    }
}

impl ImageTracker {
    /// Runs a layout transition and returns the metadata operations it requires, in order.
    ///
    /// The outcome depends only on the tracked state and the request.
    pub fn transition(
        &mut self,
        caps: &DeviceCaps,
        request: &TransitionRequest,
    ) -> TransitionOutcome {
        let image = request.image;
        let info = image.info();
        let aspects = request.range.aspects & image_aspects(info);
        let mut outcome = TransitionOutcome::default();
        if aspects.is_empty() {
            return outcome;
        }

        let mips = request.range.mips(info.mip_levels);
        let layers = request.range.layers(info.array_layers);
        let tracked = self
            .images
            .entry(image.id())
            .or_insert_with(|| TrackedImage::new(info));

        for mip in mips.clone() {
            for layer in layers.clone() {
                let index = tracked.index(mip, layer);
                if tracked.subresources[index].is_none() {
                    tracked.subresources[index] = Some(Subresource::first_touch(
                        caps,
                        image,
                        mip,
                        request.old_layout,
                        request.queue_families,
                    ));
                }
            }
        }

        // Depth and stencil are transitioned separately if their tracked layouts disagree.
        outcome.split = aspects == ImageAspects::DEPTH | ImageAspects::STENCIL
            && mips.clone().any(|mip| {
                layers.clone().any(|layer| {
                    tracked
                        .get(mip, layer)
                        .is_some_and(|sub| sub.layouts[0] != sub.layouts[1])
                })
            });
        let groups: SmallVec<[ImageAspects; 2]> = if outcome.split {
            smallvec![ImageAspects::DEPTH, ImageAspects::STENCIL]
        } else {
            smallvec![aspects]
        };

        let discard = request.old_layout.is_undefined();

        for group in groups {
            for kind in image.metadata_kinds().kinds() {
                let covered = group & kind_aspects(kind);
                let Some(surface) = image.metadata(kind) else {
                    continue;
                };
                if covered.is_empty() {
                    continue;
                }

                let mut fill = Regions::default();
                let mut decompress = Regions::default();

                for mip in mips.clone() {
                    let eligible = mip < surface.eligible_levels;
                    for layer in layers.clone() {
                        let index = tracked.index(mip, layer);
                        let Some(sub) = tracked.subresources[index].as_mut() else {
                            continue;
                        };
                        for aspect in covered.iter() {
                            let slot = aspect_slot(aspect);
                            let ctx = LayoutContext {
                                layout: request.new_layout.for_aspect(aspect),
                                aspect,
                                queue_families: request.queue_families,
                            };
                            let compressible = eligible && caps.is_compressed(info, kind, &ctx);
                            let decision =
                                decide(sub.meta[kind.index()][slot], discard, compressible, eligible);
                            sub.meta[kind.index()][slot] = decision.next;
                            match decision.action {
                                Some(MetadataAction::Fill) => fill.add(mip, layer),
                                Some(MetadataAction::Decompress) => decompress.add(mip, layer),
                                None => {}
                            }
                        }
                    }
                }

                let fills = fill.finish(info.array_layers);
                for (mips, layers) in fills.iter().cloned() {
                    let range = SubresourceRange {
                        aspects: covered,
                        base_mip: mips.start,
                        mip_count: Some(mips.len() as u32),
                        base_layer: layers.start,
                        layer_count: Some(layers.len() as u32),
                    };
                    // The layout placed this kind at image creation, so it places sub-ranges too.
                    let Some(placement) = request.surface_layout.metadata(info, kind, &range)
                    else {
                        continue;
                    };
                    outcome.ops.push(MetadataOp::Fill {
                        kind,
                        aspects: covered,
                        mips,
                        layers,
                        address: placement.address,
                        size: placement.size,
                        value: caps.fill_values[kind.index()],
                    });
                }

                // Freshly initialized metadata starts out with a zero clear value.
                let zero = [0; 4];
                if !fills.is_empty() && tracked.clear_values[kind.index()] != Some(zero) {
                    tracked.clear_values[kind.index()] = Some(zero);
                    outcome.ops.push(MetadataOp::PublishClearValue {
                        kind,
                        address: surface.clear_value_address,
                        value: zero,
                        zero_clear: zrange_update(caps, kind, true),
                    });
                }

                for (mips, layers) in decompress.finish(info.array_layers) {
                    outcome.ops.push(MetadataOp::Decompress {
                        kind,
                        aspects: covered,
                        mips,
                        layers,
                    });
                }
            }
        }

        for mip in mips {
            for layer in layers.clone() {
                let index = tracked.index(mip, layer);
                if let Some(sub) = tracked.subresources[index].as_mut() {
                    for aspect in aspects.iter() {
                        sub.layouts[aspect_slot(aspect)] = request.new_layout;
                    }
                }
            }
        }

        outcome
    }

    /// Updates the cached fast-clear value. Returns the publish operation if the value changed.
    pub fn set_clear_value(
        &mut self,
        caps: &DeviceCaps,
        image: &Image,
        value: ClearValue,
    ) -> Option<MetadataOp> {
        let (kind, bits, zero_depth) = match value {
            ClearValue::Color(color) => (MetadataKind::Color, color, false),
            ClearValue::DepthStencil { depth, stencil } => (
                MetadataKind::Depth,
                [depth.to_bits(), stencil, 0, 0],
                depth.to_bits() == 0,
            ),
        };
        let surface = image.metadata(kind)?;

        let tracked = self
            .images
            .entry(image.id())
            .or_insert_with(|| TrackedImage::new(image.info()));
        if tracked.clear_values[kind.index()] == Some(bits) {
            return None;
        }
        tracked.clear_values[kind.index()] = Some(bits);

        Some(MetadataOp::PublishClearValue {
            kind,
            address: surface.clear_value_address,
            value: bits,
            zero_clear: zrange_update(caps, kind, zero_depth),
        })
    }

    /// Metadata state of one subresource aspect, if the image was touched.
    pub fn state(
        &self,
        image: ImageId,
        kind: MetadataKind,
        aspect: ImageAspects,
        mip: u32,
        layer: u32,
    ) -> Option<MetadataState> {
        let sub = self.images.get(&image)?.get(mip, layer)?;
        Some(sub.meta[kind.index()][aspect_slot(aspect)])
    }

    /// Last declared layout of one subresource aspect, if the image was touched.
    pub fn layout(
        &self,
        image: ImageId,
        aspect: ImageAspects,
        mip: u32,
        layer: u32,
    ) -> Option<ImageLayout> {
        let sub = self.images.get(&image)?.get(mip, layer)?;
        Some(sub.layouts[aspect_slot(aspect)])
    }

    pub fn clear_value(&self, image: ImageId, kind: MetadataKind) -> Option<[u32; 4]> {
        self.images.get(&image)?.clear_values[kind.index()]
    }

    /// Takes over the state of every subresource `other` touched. Used after executing a
    /// secondary command buffer.
    pub fn absorb(&mut self, other: &ImageTracker) {
        for (id, theirs) in &other.images {
            match self.images.get_mut(id) {
                Some(ours) => {
                    for (ours, theirs) in ours.subresources.iter_mut().zip(&theirs.subresources) {
                        if theirs.is_some() {
                            *ours = *theirs;
                        }
                    }
                    for (ours, theirs) in ours.clear_values.iter_mut().zip(&theirs.clear_values) {
                        if theirs.is_some() {
                            *ours = *theirs;
                        }
                    }
                }
                None => {
                    self.images.insert(*id, theirs.clone());
                }
            }
        }
    }

    #[inline(always)]
    pub fn tracked_images(&self) -> usize {
        self.images.len()
    }

    pub fn reset(&mut self) {
        self.images.clear();
    }
}

#[inline(always)]
fn zrange_update(caps: &DeviceCaps, kind: MetadataKind, zero_clear: bool) -> Option<bool> {
    (kind == MetadataKind::Depth && caps.has_erratum(Errata::TC_COMPAT_ZRANGE))
        .then_some(zero_clear)
}
