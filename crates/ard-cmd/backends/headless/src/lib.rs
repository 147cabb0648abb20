//! An in-memory winsys and surface layout.
//!
//! Buffers are plain host allocations with made up GPU addresses and instruction streams only
//! remember which buffers they reference. Useful for tests and for tooling that wants to inspect
//! recorded command streams without a GPU.

use std::{
    ptr::NonNull,
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex,
    },
};

use api::{
    layout::SubresourceRange,
    surface::{ImageCreateInfo, MetadataKind, MetadataSurface, SurfaceLayout},
    types::RingType,
    winsys::{BufferCreateError, BufferCreateInfo, BufferMapError, StreamCreateError, Winsys},
};
use ard_log::{trace, warn};
use rustc_hash::{FxHashMap, FxHashSet};

/// Base of the fake GPU virtual address space.
const ADDRESS_BASE: u64 = 0x1_0000_0000;
const ADDRESS_ALIGNMENT: u64 = 0x1000;

#[derive(Default)]
pub struct HeadlessWinsys {
    buffers: Mutex<FxHashMap<u64, Allocation>>,
    next_id: AtomicU64,
    next_address: AtomicU64,
    created: AtomicU64,
    failure: Mutex<Option<InjectedFailure>>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct HeadlessBuffer {
    id: u64,
    size: u64,
    address: u64,
}

#[derive(Debug)]
pub struct HeadlessStream {
    ring: RingType,
    references: FxHashSet<u64>,
}

struct Allocation {
    address: u64,
    memory: Box<[u8]>,
}

#[derive(Debug, Copy, Clone)]
struct InjectedFailure {
    /// Successful creations left before failures start.
    remaining: u64,
    error: BufferCreateError,
}

/// Places metadata directly after the main surface of an image.
#[derive(Debug, Copy, Clone)]
pub struct HeadlessSurfaceLayout {
    /// Mip levels smaller than this (in either dimension) are not covered by metadata.
    pub min_eligible_extent: u32,
}

impl HeadlessWinsys {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lets `successes` more buffer creations succeed, then fails every following creation with
    /// `error` until [`HeadlessWinsys::clear_failures`] is called.
    pub fn fail_buffer_creation_after(&self, successes: u64, error: BufferCreateError) {
        *self.failure.lock().unwrap() = Some(InjectedFailure {
            remaining: successes,
            error,
        });
    }

    pub fn clear_failures(&self) {
        *self.failure.lock().unwrap() = None;
    }

    /// Number of buffers that have been created and not yet destroyed.
    pub fn live_buffers(&self) -> usize {
        self.buffers.lock().unwrap().len()
    }

    /// Number of buffers ever created.
    pub fn created_buffers(&self) -> u64 {
        self.created.load(Ordering::Relaxed)
    }

    /// Copies the current contents of a buffer.
    ///
    /// # Panics
    /// - If the buffer was destroyed.
    pub fn read_buffer(&self, buffer: &HeadlessBuffer) -> Vec<u8> {
        self.buffers
            .lock()
            .unwrap()
            .get(&buffer.id)
            .expect("buffer was destroyed")
            .memory
            .to_vec()
    }

    /// Copies `len` bytes starting at GPU address `address`, if a live buffer contains them.
    pub fn read_address(&self, address: u64, len: usize) -> Option<Vec<u8>> {
        let buffers = self.buffers.lock().unwrap();
        // Address ranges never overlap so at most one buffer can contain the range.
        buffers.values().find_map(|allocation| {
            let start = address.checked_sub(allocation.address)? as usize;
            allocation
                .memory
                .get(start..start + len)
                .map(|bytes| bytes.to_vec())
        })
    }
}

impl Winsys for HeadlessWinsys {
    type Buffer = HeadlessBuffer;
    type InstructionStream = HeadlessStream;

    fn create_buffer(
        &self,
        create_info: BufferCreateInfo,
    ) -> Result<Self::Buffer, BufferCreateError> {
        if let Some(failure) = self.failure.lock().unwrap().as_mut() {
            if failure.remaining == 0 {
                warn!(
                    "injected failure creating buffer {:?}: {}",
                    create_info.debug_name, failure.error
                );
                return Err(failure.error);
            }
            failure.remaining -= 1;
        }

        let size = create_info.size.max(1);
        let mut memory = Vec::new();
        usize::try_from(size)
            .ok()
            .and_then(|len| memory.try_reserve_exact(len).ok())
            .ok_or(BufferCreateError::OutOfHostMemory)?;
        memory.resize(size as usize, 0u8);

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let span = size.div_ceil(ADDRESS_ALIGNMENT) * ADDRESS_ALIGNMENT;
        let address = ADDRESS_BASE + self.next_address.fetch_add(span, Ordering::Relaxed);

        self.buffers.lock().unwrap().insert(
            id,
            Allocation {
                address,
                memory: memory.into_boxed_slice(),
            },
        );
        self.created.fetch_add(1, Ordering::Relaxed);

        trace!(
            "created headless buffer {id} ({size} bytes at {address:#x}) {:?}",
            create_info.debug_name
        );

        Ok(HeadlessBuffer { id, size, address })
    }

    unsafe fn destroy_buffer(&self, buffer: Self::Buffer) {
        self.buffers.lock().unwrap().remove(&buffer.id);
    }

    unsafe fn map_buffer(
        &self,
        buffer: &mut Self::Buffer,
    ) -> Result<(NonNull<u8>, u64), BufferMapError> {
        let mut buffers = self.buffers.lock().unwrap();
        let allocation = buffers
            .get_mut(&buffer.id)
            .ok_or(BufferMapError::NotHostVisible)?;
        // The boxed slice never moves, so the pointer outlives the lock.
        let ptr = NonNull::new(allocation.memory.as_mut_ptr())
            .ok_or(BufferMapError::OutOfHostMemory)?;
        Ok((ptr, buffer.size))
    }

    #[inline(always)]
    fn buffer_address(&self, buffer: &Self::Buffer) -> u64 {
        buffer.address
    }

    fn create_instruction_stream(
        &self,
        ring: RingType,
    ) -> Result<Self::InstructionStream, StreamCreateError> {
        Ok(HeadlessStream {
            ring,
            references: FxHashSet::default(),
        })
    }

    #[inline(always)]
    fn add_buffer_reference(&self, stream: &mut Self::InstructionStream, buffer: &Self::Buffer) {
        stream.references.insert(buffer.id);
    }

    #[inline(always)]
    fn reset_instruction_stream(&self, stream: &mut Self::InstructionStream) {
        stream.references.clear();
    }
}

impl HeadlessBuffer {
    #[inline(always)]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline(always)]
    pub fn size(&self) -> u64 {
        self.size
    }
}

impl HeadlessStream {
    #[inline(always)]
    pub fn ring(&self) -> RingType {
        self.ring
    }

    #[inline(always)]
    pub fn references(&self, buffer: &HeadlessBuffer) -> bool {
        self.references.contains(&buffer.id)
    }

    #[inline(always)]
    pub fn reference_count(&self) -> usize {
        self.references.len()
    }
}

impl Default for HeadlessSurfaceLayout {
    fn default() -> Self {
        Self {
            min_eligible_extent: 8,
        }
    }
}

impl HeadlessSurfaceLayout {
    /// Bytes of main surface covered by one byte of metadata.
    const METADATA_RATIO: u64 = 256;
    const CLEAR_VALUE_SIZE: u64 = 16;

    fn main_surface_size(image: &ImageCreateInfo) -> u64 {
        let texel = image.format.texel_size() as u64 * image.samples.count() as u64;
        (0..image.mip_levels)
            .map(|mip| {
                let width = (image.width >> mip).max(1) as u64;
                let height = (image.height >> mip).max(1) as u64;
                let depth = (image.depth >> mip).max(1) as u64;
                width * height * depth * texel
            })
            .sum::<u64>()
            * image.array_layers as u64
    }

    fn supports(image: &ImageCreateInfo, kind: MetadataKind) -> bool {
        match kind {
            MetadataKind::Color => image.format.is_color() && !image.format.is_block_compressed(),
            MetadataKind::Depth => image.format.is_depth() || image.format.has_stencil(),
            MetadataKind::Multisample => image.format.is_color() && image.samples.count() > 1,
        }
    }

    /// Metadata bytes of a single layer of one mip level.
    fn layer_metadata_size(image: &ImageCreateInfo, mip: u32) -> u64 {
        let texel = image.format.texel_size() as u64 * image.samples.count() as u64;
        let width = (image.width >> mip).max(1) as u64;
        let height = (image.height >> mip).max(1) as u64;
        let depth = (image.depth >> mip).max(1) as u64;
        (width * height * depth * texel / Self::METADATA_RATIO)
            .max(4)
            .next_multiple_of(4)
    }

    fn mip_metadata_size(image: &ImageCreateInfo, mip: u32) -> u64 {
        Self::layer_metadata_size(image, mip) * image.array_layers as u64
    }

    fn metadata_size(image: &ImageCreateInfo) -> u64 {
        (0..image.mip_levels)
            .map(|mip| Self::mip_metadata_size(image, mip))
            .sum()
    }
}

impl SurfaceLayout for HeadlessSurfaceLayout {
    fn metadata(
        &self,
        image: &ImageCreateInfo,
        kind: MetadataKind,
        range: &SubresourceRange,
    ) -> Option<MetadataSurface> {
        if !Self::supports(image, kind) {
            return None;
        }

        let main = Self::main_surface_size(image).next_multiple_of(ADDRESS_ALIGNMENT);
        let size = Self::metadata_size(image);

        // Every supported kind gets a slot, in kind order, followed by the clear values.
        let preceding = MetadataKind::ALL
            .into_iter()
            .take_while(|other| *other != kind)
            .filter(|other| Self::supports(image, *other))
            .count() as u64;
        let supported = MetadataKind::ALL
            .into_iter()
            .filter(|other| Self::supports(image, *other))
            .count() as u64;

        let base = image.address + main + preceding * size;
        let clear_value_address = image.address
            + main
            + supported * size
            + kind.index() as u64 * Self::CLEAR_VALUE_SIZE;

        let eligible_levels = (0..image.mip_levels)
            .take_while(|mip| {
                (image.width >> mip) >= self.min_eligible_extent
                    && (image.height >> mip) >= self.min_eligible_extent
            })
            .count() as u32;

        // Mip-major. A single mip may be queried for any run of layers.
        let mips = range.mips(image.mip_levels);
        let layers = range.layers(image.array_layers);
        let mip_offset = (0..mips.start)
            .map(|mip| Self::mip_metadata_size(image, mip))
            .sum::<u64>();
        let (offset, range_size) = if mips.len() == 1 {
            let layer_size = Self::layer_metadata_size(image, mips.start);
            (
                mip_offset + layers.start as u64 * layer_size,
                layers.len() as u64 * layer_size,
            )
        } else {
            let mips_size = mips
                .map(|mip| Self::mip_metadata_size(image, mip))
                .sum::<u64>();
            (mip_offset, mips_size)
        };

        Some(MetadataSurface {
            address: base + offset,
            size: range_size,
            element_size: 4,
            clear_value_address,
            eligible_levels,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use api::{
        layout::ImageAspects,
        types::{BufferUsage, Format, ImageType, ImageUsage, MultiSamples, SharingMode},
    };

    fn image(format: Format, size: u32, mips: u32, samples: MultiSamples) -> ImageCreateInfo {
        ImageCreateInfo {
            ty: ImageType::Type2D,
            format,
            width: size,
            height: size,
            depth: 1,
            array_layers: 1,
            mip_levels: mips,
            samples,
            usage: ImageUsage::COLOR_ATTACHMENT | ImageUsage::SAMPLED,
            sharing: SharingMode::Exclusive,
            address: 0x10_0000,
            debug_name: None,
        }
    }

    fn whole() -> SubresourceRange {
        SubresourceRange::all(ImageAspects::COLOR)
    }

    fn buffer_info(size: u64) -> BufferCreateInfo {
        BufferCreateInfo {
            size,
            usage: BufferUsage::UNIFORM_BUFFER,
            debug_name: None,
        }
    }

    /// Small mips fall outside of the metadata.
    #[test]
    fn eligible_levels_stop_at_min_extent() {
        let layout = HeadlessSurfaceLayout::default();
        let info = image(Format::Rgba8Unorm, 32, 6, MultiSamples::Count1);
        let color = layout.metadata(&info, MetadataKind::Color, &whole()).unwrap();
        // 32, 16 and 8 are eligible. 4, 2 and 1 are not.
        assert_eq!(color.eligible_levels, 3);

        let tiny = image(Format::Rgba8Unorm, 4, 1, MultiSamples::Count1);
        assert_eq!(
            layout.metadata(&tiny, MetadataKind::Color, &whole()).unwrap().eligible_levels,
            0
        );
    }

    /// Sub-ranges never overlap the metadata of other mips or layers.
    #[test]
    fn ranges_are_disjoint() {
        let layout = HeadlessSurfaceLayout::default();
        let mut info = image(Format::Rgba8Unorm, 64, 3, MultiSamples::Count1);
        info.array_layers = 2;
        let query = |base_mip: u32, mip_count: u32, base_layer: u32, layer_count: u32| {
            let range = SubresourceRange {
                aspects: ImageAspects::COLOR,
                base_mip,
                mip_count: Some(mip_count),
                base_layer,
                layer_count: Some(layer_count),
            };
            let surface = layout
                .metadata(&info, MetadataKind::Color, &range)
                .unwrap();
            surface.address..surface.address + surface.size
        };

        let all = layout.metadata(&info, MetadataKind::Color, &whole()).unwrap();
        let mip0 = query(0, 1, 0, 2);
        let mip1 = query(1, 1, 0, 2);
        let mip1_layer1 = query(1, 1, 1, 1);
        let tail = query(1, 2, 0, 2);

        assert_eq!(mip0.start, all.address);
        assert_eq!(mip0.end, mip1.start);
        assert!(mip1_layer1.start > mip1.start && mip1_layer1.end == mip1.end);
        assert_eq!(tail.start, mip1.start);
        assert_eq!(tail.end, all.address + all.size);
        assert_eq!(mip0.end - mip0.start, 2 * 64 * 64 * 4 / 256);
    }

    #[test]
    fn metadata_kinds_follow_format() {
        let layout = HeadlessSurfaceLayout::default();
        let depth = image(Format::D32Sfloat, 64, 1, MultiSamples::Count1);
        assert!(layout.metadata(&depth, MetadataKind::Color, &whole()).is_none());
        assert!(layout.metadata(&depth, MetadataKind::Depth, &whole()).is_some());

        let msaa = image(Format::Rgba8Unorm, 64, 1, MultiSamples::Count4);
        let color = layout.metadata(&msaa, MetadataKind::Color, &whole()).unwrap();
        let fmask = layout.metadata(&msaa, MetadataKind::Multisample, &whole()).unwrap();
        assert!(color.address + color.size <= fmask.address);
        assert_ne!(color.clear_value_address, fmask.clear_value_address);
    }

    #[test]
    fn injected_failures() {
        let winsys = HeadlessWinsys::new();
        winsys.fail_buffer_creation_after(1, BufferCreateError::OutOfDeviceMemory);
        assert!(winsys.create_buffer(buffer_info(64)).is_ok());
        assert_eq!(
            winsys.create_buffer(buffer_info(64)),
            Err(BufferCreateError::OutOfDeviceMemory)
        );
        winsys.clear_failures();
        assert!(winsys.create_buffer(buffer_info(64)).is_ok());
        assert_eq!(winsys.created_buffers(), 2);
    }

    #[test]
    fn mapped_writes_are_visible_by_address() {
        let winsys = HeadlessWinsys::new();
        let mut buffer = winsys.create_buffer(buffer_info(64)).unwrap();
        let address = winsys.buffer_address(&buffer);
        unsafe {
            let (ptr, size) = winsys.map_buffer(&mut buffer).unwrap();
            assert_eq!(size, 64);
            *ptr.as_ptr().add(8) = 0xAB;
        }
        assert_eq!(winsys.read_address(address + 8, 1), Some(vec![0xAB]));
        assert_eq!(winsys.read_buffer(&buffer)[8], 0xAB);

        unsafe { winsys.destroy_buffer(buffer) };
        assert_eq!(winsys.live_buffers(), 0);
    }
}
