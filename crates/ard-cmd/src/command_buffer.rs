//! Command recording.
//!
//! A command buffer turns bind, barrier and draw calls into an ordered packet stream. State is
//! only written when it actually changed since it was last written, and cache maintenance is
//! accumulated and emitted once right before the work that needs it.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use api::{
    dynamic::{DynamicStateMask, DynamicStateValue},
    layout::{ImageLayout, SubresourceRange},
    pipeline::UserDataSlot,
    surface::MetadataKind,
    types::{BindPoint, IndexType, QueueFamily},
    Winsys,
};
use ard_log::{debug, trace, warn};
use arrayvec::ArrayVec;
use bytemuck::{Pod, Zeroable};
use smallvec::SmallVec;
use thiserror::Error;

use crate::{
    barrier::{dst_flush_bits, src_flush_bits, stage_flush_bits, BarrierInfo, FlushBits},
    caps::Errata,
    device::Device,
    image::Image,
    metadata::{queue_families, ClearValue, ImageTracker, MetadataOp, TransitionRequest},
    packet::{CmdStream, Packet, PacketSink, StreamCounters},
    pipeline::{Pipeline, PipelineId},
    state::{CmdDirty, DynamicStateTable, RegisterGroup},
    upload::UploadAllocator,
    util::id_gen::ResourceId,
};

pub const MAX_VERTEX_BUFFERS: usize = 32;
pub const MAX_DESCRIPTOR_SETS: usize = 8;
pub const MAX_PUSH_CONSTANTS_SIZE: usize = 256;

/// Failures that invalidate a recording. Once latched, every following recording call is
/// ignored and [`CommandBuffer::end`] reports the error.
#[derive(Debug, Error, Copy, Clone, PartialEq, Eq)]
pub enum RecordError {
    #[error("out of host memory")]
    OutOfHostMemory,
    #[error("out of device memory")]
    OutOfDeviceMemory,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum CommandBufferState {
    Initial,
    Recording,
    Executable,
    /// Submitted and not yet completed.
    Pending,
    /// Recording failed. Must be reset before reuse.
    Invalid,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum CommandBufferLevel {
    Primary,
    Secondary,
}

/// State a secondary command buffer inherits from the primary that executes it.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct Inheritance {
    /// The primary executes the secondary inside a conditional rendering block.
    pub predicated: bool,
}

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct VertexBuffer {
    pub address: u64,
    pub size: u64,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
struct IndexBuffer {
    address: u64,
    size: u64,
    index_type: IndexType,
}

/// Layout of one entry of the uploaded vertex buffer descriptor table.
#[repr(C)]
#[derive(Debug, Default, Copy, Clone)]
struct VertexDescriptor {
    address: u64,
    size: u32,
    stride: u32,
}

unsafe impl Zeroable for VertexDescriptor {}
unsafe impl Pod for VertexDescriptor {}

/// Bindings of one bind point.
#[derive(Default)]
struct Bindings {
    pipeline: Option<Pipeline>,
    /// Pipeline the hardware was last told about.
    emitted: Option<PipelineId>,
    descriptor_sets: [Option<u64>; MAX_DESCRIPTOR_SETS],
    push_constants: ArrayVec<u8, MAX_PUSH_CONSTANTS_SIZE>,
}

/// Identifies one allocation of a command buffer. Never reused, even when the pool recycles the
/// underlying storage.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CommandBufferId(pub(crate) ResourceId);

pub struct CommandBuffer<W: Winsys> {
    device: Device<W>,
    id: CommandBufferId,
    level: CommandBufferLevel,
    queue_family: QueueFamily,
    state: CommandBufferState,
    error: Option<RecordError>,
    stream: CmdStream<W>,
    upload: UploadAllocator<W>,
    dynamic: DynamicStateTable,
    dirty: CmdDirty,
    pending_flush: FlushBits,
    /// Copy engine work was recorded and has not been waited on.
    copy_busy: bool,
    images: ImageTracker,
    graphics: Bindings,
    compute: Bindings,
    vertex_buffers: ArrayVec<VertexBuffer, MAX_VERTEX_BUFFERS>,
    index_buffer: Option<IndexBuffer>,
    predicated: bool,
    inheritance: Inheritance,
    labels: u32,
    /// Reset generation of the owning pool at the last reset of this buffer.
    epoch: u64,
    pool_epoch: Arc<AtomicU64>,
}

/// Reusable parts of a freed command buffer.
pub(crate) struct CommandBufferParts<W: Winsys> {
    pub stream: CmdStream<W>,
    pub upload: UploadAllocator<W>,
}

impl<W: Winsys> CommandBuffer<W> {
    pub(crate) fn new(
        device: Device<W>,
        level: CommandBufferLevel,
        queue_family: QueueFamily,
        parts: CommandBufferParts<W>,
        pool_epoch: Arc<AtomicU64>,
    ) -> Self {
        let epoch = pool_epoch.load(Ordering::Acquire);
        Self {
            id: CommandBufferId(device.create_id()),
            device,
            level,
            queue_family,
            state: CommandBufferState::Initial,
            error: None,
            stream: parts.stream,
            upload: parts.upload,
            dynamic: DynamicStateTable::default(),
            dirty: CmdDirty::empty(),
            pending_flush: FlushBits::empty(),
            copy_busy: false,
            images: ImageTracker::default(),
            graphics: Bindings::default(),
            compute: Bindings::default(),
            vertex_buffers: ArrayVec::default(),
            index_buffer: None,
            predicated: false,
            inheritance: Inheritance::default(),
            labels: 0,
            epoch,
            pool_epoch,
        }
    }

    pub(crate) fn into_parts(self) -> CommandBufferParts<W> {
        CommandBufferParts {
            stream: self.stream,
            upload: self.upload,
        }
    }

    #[inline(always)]
    pub fn id(&self) -> CommandBufferId {
        self.id
    }

    #[inline(always)]
    pub fn level(&self) -> CommandBufferLevel {
        self.level
    }

    #[inline(always)]
    pub fn queue_family(&self) -> QueueFamily {
        self.queue_family
    }

    /// The lifecycle state. Command buffers of a pool that was reset report `Initial`.
    #[inline]
    pub fn state(&self) -> CommandBufferState {
        if self.epoch != self.pool_epoch.load(Ordering::Acquire)
            && self.state != CommandBufferState::Recording
        {
            CommandBufferState::Initial
        } else {
            self.state
        }
    }

    /// The latched recording error, if any.
    #[inline(always)]
    pub fn error(&self) -> Option<RecordError> {
        self.error
    }

    #[inline(always)]
    pub fn packets(&self) -> &[Packet] {
        self.stream.packets()
    }

    #[inline(always)]
    pub fn stats(&self) -> StreamCounters {
        self.stream.counters()
    }

    #[inline(always)]
    pub fn stream(&self) -> &W::InstructionStream {
        self.stream.raw()
    }

    #[inline(always)]
    pub fn dynamic_state(&self) -> &DynamicStateTable {
        &self.dynamic
    }

    #[inline(always)]
    pub fn image_tracker(&self) -> &ImageTracker {
        &self.images
    }

    #[inline(always)]
    pub fn pending_flush(&self) -> FlushBits {
        self.pending_flush
    }

    #[inline(always)]
    pub fn upload_allocator(&self) -> &UploadAllocator<W> {
        &self.upload
    }

    /// Starts recording a primary command buffer. Anything previously recorded is discarded.
    ///
    /// # Panics
    /// - If the command buffer is a secondary.
    /// - If the command buffer is recording or pending.
    pub fn begin(&mut self) {
        assert_eq!(
            self.level,
            CommandBufferLevel::Primary,
            "secondary command buffers begin with `begin_secondary`"
        );
        self.begin_inner(Inheritance::default());
    }

    /// Starts recording a secondary command buffer.
    ///
    /// # Panics
    /// - If the command buffer is a primary.
    /// - If the command buffer is recording or pending.
    pub fn begin_secondary(&mut self, inheritance: Inheritance) {
        assert_eq!(
            self.level,
            CommandBufferLevel::Secondary,
            "primary command buffers begin with `begin`"
        );
        self.begin_inner(inheritance);
    }

    fn begin_inner(&mut self, inheritance: Inheritance) {
        let state = self.state();
        assert!(
            state != CommandBufferState::Recording && state != CommandBufferState::Pending,
            "cannot begin a command buffer in the {state:?} state"
        );
        self.reset_recording();
        self.inheritance = inheritance;
        self.state = CommandBufferState::Recording;
        debug!("began {:?} command buffer", self.level);
    }

    /// Finishes recording. Outstanding copy engine work is waited on and outstanding cache
    /// maintenance is emitted, so the stream is self-contained.
    ///
    /// # Panics
    /// - If the command buffer is not recording.
    /// - If a debug label or conditional rendering block is still open.
    pub fn end(&mut self) -> Result<(), RecordError> {
        assert_eq!(
            self.state,
            CommandBufferState::Recording,
            "command buffer is not recording"
        );

        if self.error.is_none() {
            assert_eq!(self.labels, 0, "{} debug labels left open", self.labels);
            assert!(!self.predicated, "conditional rendering left open");

            let result = (|| {
                if self.copy_busy {
                    self.stream.push(Packet::WaitCopyIdle)?;
                    self.copy_busy = false;
                }
                self.flush_pending()
            })();
            if let Err(err) = result {
                self.latch(err);
            }
        }

        match self.error {
            Some(err) => {
                self.state = CommandBufferState::Invalid;
                debug!("ended command buffer with error: {err}");
                Err(err)
            }
            None => {
                self.state = CommandBufferState::Executable;
                debug!(
                    "ended command buffer with {} packets",
                    self.stream.counters().packets
                );
                Ok(())
            }
        }
    }

    /// Discards everything recorded.
    ///
    /// # Panics
    /// - If the command buffer is pending.
    pub fn reset(&mut self) {
        assert_ne!(
            self.state(),
            CommandBufferState::Pending,
            "cannot reset a pending command buffer"
        );
        self.reset_recording();
        self.state = CommandBufferState::Initial;
        debug!("reset {:?} command buffer", self.level);
    }

    /// # Panics
    /// - If the command buffer is not executable.
    pub fn mark_pending(&mut self) {
        assert_eq!(
            self.state(),
            CommandBufferState::Executable,
            "only executable command buffers can be submitted"
        );
        self.state = CommandBufferState::Pending;
    }

    /// # Panics
    /// - If the command buffer is not pending.
    pub fn mark_complete(&mut self) {
        assert_eq!(
            self.state,
            CommandBufferState::Pending,
            "command buffer was not submitted"
        );
        self.state = CommandBufferState::Executable;
    }

    fn reset_recording(&mut self) {
        let winsys = self.device.winsys();
        self.stream.reset(winsys);
        self.upload.reset(self.stream.raw_mut());
        self.dynamic.reset();
        self.images.reset();
        self.error = None;
        self.dirty = CmdDirty::empty();
        self.pending_flush = FlushBits::empty();
        self.copy_busy = false;
        self.graphics = Bindings::default();
        self.compute = Bindings::default();
        self.vertex_buffers.clear();
        self.index_buffer = None;
        self.predicated = false;
        self.inheritance = Inheritance::default();
        self.labels = 0;
        self.epoch = self.pool_epoch.load(Ordering::Acquire);
    }

    fn latch(&mut self, err: RecordError) {
        if self.error.is_none() {
            warn!("command buffer recording failed: {err}");
            self.error = Some(err);
        }
    }

    /// Runs a recording step. Steps are skipped once an error is latched.
    #[inline]
    fn record(&mut self, f: impl FnOnce(&mut Self) -> Result<(), RecordError>) {
        assert_eq!(
            self.state,
            CommandBufferState::Recording,
            "command buffer is not recording"
        );
        if self.error.is_some() {
            return;
        }
        if let Err(err) = f(self) {
            self.latch(err);
        }
    }

    /// Copies `data` into GPU-visible scratch memory owned by this command buffer and returns its
    /// address. The memory stays valid until the command buffer is reset. Returns `None` once
    /// recording has failed.
    pub fn upload(&mut self, data: &[u8], alignment: u64) -> Option<u64> {
        let mut address = None;
        self.record(|cb| {
            address = Some(cb.upload.upload(cb.stream.raw_mut(), data, alignment)?);
            Ok(())
        });
        address
    }

    pub fn record_bind_pipeline(&mut self, pipeline: &Pipeline) {
        self.record(|cb| {
            let check = cb.device.settings().check_dynamic_state();
            let (bindings, flag) = match pipeline.bind_point() {
                BindPoint::Graphics => (&mut cb.graphics, CmdDirty::PIPELINE),
                BindPoint::Compute => (&mut cb.compute, CmdDirty::COMPUTE_PIPELINE),
            };
            if bindings.pipeline.as_ref() != Some(pipeline) {
                bindings.pipeline = Some(pipeline.clone());
                cb.dirty |= flag;
            }

            // Baked state goes through the tracker, so state equal to what is already emitted
            // stays clean.
            for value in &pipeline.info().static_state {
                cb.dynamic.bind(value, check);
            }
            Ok(())
        });
    }

    /// # Panics
    /// - If dynamic state checks are enabled and the value addresses slots past the maximum.
    pub fn record_set_dynamic_state(&mut self, value: &DynamicStateValue) {
        self.record(|cb| {
            let check = cb.device.settings().check_dynamic_state();
            cb.dynamic.bind(value, check);
            Ok(())
        });
    }

    /// # Panics
    /// - If the bindings exceed [`MAX_VERTEX_BUFFERS`].
    pub fn record_bind_vertex_buffers(&mut self, first: u32, buffers: &[VertexBuffer]) {
        self.record(|cb| {
            let first = first as usize;
            assert!(
                first + buffers.len() <= MAX_VERTEX_BUFFERS,
                "vertex buffer bindings {first}..{} exceed the maximum of {MAX_VERTEX_BUFFERS}",
                first + buffers.len()
            );
            while cb.vertex_buffers.len() < first + buffers.len() {
                cb.vertex_buffers.push(VertexBuffer::default());
            }
            let slots = &mut cb.vertex_buffers[first..first + buffers.len()];
            if *slots != *buffers {
                slots.copy_from_slice(buffers);
                cb.dirty |= CmdDirty::VERTEX_BUFFERS;
            }
            Ok(())
        });
    }

    pub fn record_bind_index_buffer(&mut self, address: u64, size: u64, index_type: IndexType) {
        self.record(|cb| {
            let binding = Some(IndexBuffer {
                address,
                size,
                index_type,
            });
            if cb.index_buffer != binding {
                cb.index_buffer = binding;
                cb.dirty |= CmdDirty::INDEX_BUFFER;
            }
            Ok(())
        });
    }

    /// Binds descriptor sets by GPU address.
    ///
    /// # Panics
    /// - If the sets exceed [`MAX_DESCRIPTOR_SETS`].
    pub fn record_bind_descriptor_sets(&mut self, bind_point: BindPoint, first: u32, sets: &[u64]) {
        self.record(|cb| {
            let first = first as usize;
            assert!(
                first + sets.len() <= MAX_DESCRIPTOR_SETS,
                "descriptor sets {first}..{} exceed the maximum of {MAX_DESCRIPTOR_SETS}",
                first + sets.len()
            );
            let (bindings, flag) = match bind_point {
                BindPoint::Graphics => (&mut cb.graphics, CmdDirty::DESCRIPTOR_SETS),
                BindPoint::Compute => (&mut cb.compute, CmdDirty::COMPUTE_DESCRIPTOR_SETS),
            };
            for (slot, address) in bindings.descriptor_sets[first..].iter_mut().zip(sets) {
                if *slot != Some(*address) {
                    *slot = Some(*address);
                    cb.dirty |= flag;
                }
            }
            Ok(())
        });
    }

    /// # Panics
    /// - If `offset + data.len()` exceeds [`MAX_PUSH_CONSTANTS_SIZE`].
    pub fn record_push_constants(&mut self, bind_point: BindPoint, offset: u32, data: &[u8]) {
        self.record(|cb| {
            let start = offset as usize;
            let end = start + data.len();
            assert!(
                end <= MAX_PUSH_CONSTANTS_SIZE,
                "push constants {start}..{end} exceed the maximum of {MAX_PUSH_CONSTANTS_SIZE}"
            );
            let (bindings, flag) = match bind_point {
                BindPoint::Graphics => (&mut cb.graphics, CmdDirty::PUSH_CONSTANTS),
                BindPoint::Compute => (&mut cb.compute, CmdDirty::COMPUTE_PUSH_CONSTANTS),
            };
            while bindings.push_constants.len() < end {
                bindings.push_constants.push(0);
            }
            if bindings.push_constants[start..end] != *data {
                bindings.push_constants[start..end].copy_from_slice(data);
                cb.dirty |= flag;
            }
            Ok(())
        });
    }

    /// # Panics
    /// - If no graphics pipeline is bound.
    pub fn record_draw(
        &mut self,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) {
        self.record(|cb| {
            cb.prepare_draw(false)?;
            cb.stream.push(Packet::Draw {
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            })
        });
    }

    /// # Panics
    /// - If no graphics pipeline or no index buffer is bound.
    pub fn record_draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        self.record(|cb| {
            cb.prepare_draw(true)?;
            cb.stream.push(Packet::DrawIndexed {
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            })
        });
    }

    /// Draws with parameters read from GPU memory at `address`.
    ///
    /// # Panics
    /// - If no graphics pipeline is bound, or `indexed` is set and no index buffer is bound.
    pub fn record_draw_indirect(
        &mut self,
        address: u64,
        draw_count: u32,
        stride: u32,
        indexed: bool,
    ) {
        self.record(|cb| {
            cb.prepare_draw(indexed)?;
            cb.stream.push(Packet::DrawIndirect {
                address,
                draw_count,
                stride,
                indexed,
            })
        });
    }

    /// # Panics
    /// - If no compute pipeline is bound.
    pub fn record_dispatch(&mut self, x: u32, y: u32, z: u32) {
        self.record(|cb| {
            cb.prepare_dispatch()?;
            cb.stream.push(Packet::Dispatch { x, y, z })
        });
    }

    /// # Panics
    /// - If no compute pipeline is bound.
    pub fn record_dispatch_indirect(&mut self, address: u64) {
        self.record(|cb| {
            cb.prepare_dispatch()?;
            cb.stream.push(Packet::DispatchIndirect { address })
        });
    }

    /// Declares memory dependencies and image layout transitions. Cache maintenance is
    /// accumulated and emitted before the next work that depends on it.
    pub fn record_barrier(&mut self, info: &BarrierInfo) {
        self.record(|cb| {
            puffin::profile_function!();

            if cb.copy_busy {
                cb.stream.push(Packet::WaitCopyIdle)?;
                cb.copy_busy = false;
            }

            let device = cb.device.clone();
            let caps = device.caps();
            let tcc = device.info().tcc_rb_non_coherent;

            for barrier in &info.memory {
                cb.pending_flush |= src_flush_bits(caps, tcc, barrier.src.access, None)
                    | stage_flush_bits(barrier.src.stages)
                    | dst_flush_bits(caps, tcc, barrier.dst.access, None);
            }
            for barrier in &info.images {
                let image = Some(&barrier.image);
                cb.pending_flush |= src_flush_bits(caps, tcc, barrier.src.access, image)
                    | stage_flush_bits(barrier.src.stages)
                    | dst_flush_bits(caps, tcc, barrier.dst.access, image);
            }

            for barrier in &info.images {
                if barrier.old_layout != barrier.new_layout || barrier.old_layout.is_undefined() {
                    cb.transition(
                        &barrier.image,
                        barrier.old_layout,
                        barrier.new_layout,
                        barrier.range,
                    )?;
                }
            }
            Ok(())
        });
    }

    /// Transitions a subresource range between layouts, initializing or decompressing metadata
    /// as needed.
    pub fn record_layout_transition(
        &mut self,
        image: &Image,
        old_layout: ImageLayout,
        new_layout: ImageLayout,
        range: SubresourceRange,
    ) {
        self.record(|cb| cb.transition(image, old_layout, new_layout, range));
    }

    /// Updates the fast-clear value of an image. Nothing is emitted if the value is unchanged.
    pub fn record_clear_value(&mut self, image: &Image, value: ClearValue) {
        self.record(|cb| {
            let device = cb.device.clone();
            match cb.images.set_clear_value(device.caps(), image, value) {
                Some(op) => cb.apply_metadata_op(image, op),
                None => Ok(()),
            }
        });
    }

    /// Copies between buffers on the copy engine.
    pub fn record_copy_buffer(&mut self, src: u64, dst: u64, size: u64) {
        self.record(|cb| {
            cb.flush_pending()?;
            cb.stream.push(Packet::CopyBuffer { src, dst, size })?;
            cb.copy_busy = true;
            Ok(())
        });
    }

    /// Fills a buffer range with a repeated 32-bit value on the copy engine.
    pub fn record_fill_buffer(&mut self, dst: u64, size: u64, value: u32) {
        self.record(|cb| {
            cb.flush_pending()?;
            cb.stream.push(Packet::FillBuffer { dst, size, value })?;
            cb.copy_busy = true;
            Ok(())
        });
    }

    /// Predicates following work on the 64-bit value at `address`. Work is skipped when the value
    /// is zero, or non-zero if `inverted` is set.
    ///
    /// # Panics
    /// - If conditional rendering is already active, or was inherited.
    pub fn record_begin_conditional(&mut self, address: u64, inverted: bool) {
        self.record(|cb| {
            assert!(
                !cb.predicated && !cb.inheritance.predicated,
                "conditional rendering is already active"
            );
            cb.stream.push(Packet::SetPredication {
                address: Some(address),
                inverted,
            })?;
            cb.predicated = true;
            Ok(())
        });
    }

    /// # Panics
    /// - If conditional rendering is not active.
    pub fn record_end_conditional(&mut self) {
        self.record(|cb| {
            assert!(cb.predicated, "conditional rendering is not active");
            cb.stream.push(Packet::SetPredication {
                address: None,
                inverted: false,
            })?;
            cb.predicated = false;
            Ok(())
        });
    }

    pub fn record_begin_label(&mut self, name: &str, color: [f32; 4]) {
        self.record(|cb| {
            cb.stream.push(Packet::BeginLabel {
                name: String::from(name),
                color,
            })?;
            cb.labels += 1;
            Ok(())
        });
    }

    /// # Panics
    /// - If no label is open.
    pub fn record_end_label(&mut self) {
        self.record(|cb| {
            assert_ne!(cb.labels, 0, "no debug label to end");
            cb.stream.push(Packet::EndLabel)?;
            cb.labels -= 1;
            Ok(())
        });
    }

    /// Executes secondary command buffers inline. Afterwards nothing is assumed about hardware
    /// state, so every binding and every bound dynamic state is emitted again before the next
    /// draw or dispatch.
    ///
    /// # Panics
    /// - If this is not a primary command buffer.
    /// - If any of `secondaries` is not an executable secondary command buffer.
    pub fn execute_commands(&mut self, secondaries: &[&CommandBuffer<W>]) {
        self.record(|cb| {
            puffin::profile_function!();
            assert_eq!(
                cb.level,
                CommandBufferLevel::Primary,
                "only primary command buffers execute secondaries"
            );

            for secondary in secondaries {
                assert_eq!(
                    secondary.level,
                    CommandBufferLevel::Secondary,
                    "cannot execute a primary command buffer"
                );
                let state = secondary.state();
                assert!(
                    matches!(
                        state,
                        CommandBufferState::Executable | CommandBufferState::Pending
                    ),
                    "cannot execute a secondary command buffer in the {state:?} state"
                );

                cb.flush_pending()?;
                secondary.upload.add_references(cb.stream.raw_mut());
                cb.stream.push(Packet::ExecuteSecondary {
                    secondary: secondary.id(),
                    packets: secondary.packets().len(),
                })?;

                // Fold what the secondary left behind.
                if let Some(id) = secondary.graphics.emitted {
                    cb.graphics.emitted = Some(id);
                }
                if let Some(id) = secondary.compute.emitted {
                    cb.compute.emitted = Some(id);
                }
                cb.images.absorb(&secondary.images);
                cb.copy_busy |= secondary.copy_busy;
            }

            let pipeline_dependent = cb.device.caps().pipeline_dependent;
            cb.dynamic.invalidate_all();
            cb.dynamic.invalidate_pipeline_dependent(pipeline_dependent);
            cb.dirty = CmdDirty::all();
            trace!(
                "executed {} secondary command buffers, all state invalidated",
                secondaries.len()
            );
            Ok(())
        });
    }

    fn flush_pending(&mut self) -> Result<(), RecordError> {
        if self.pending_flush.is_empty() {
            return Ok(());
        }
        trace!("emitting cache flush {:?}", self.pending_flush);
        self.stream.push(Packet::CacheFlush {
            bits: self.pending_flush,
        })?;
        self.pending_flush = FlushBits::empty();
        Ok(())
    }

    fn transition(
        &mut self,
        image: &Image,
        old_layout: ImageLayout,
        new_layout: ImageLayout,
        range: SubresourceRange,
    ) -> Result<(), RecordError> {
        puffin::profile_function!();
        let device = self.device.clone();
        let request = TransitionRequest {
            image,
            surface_layout: device.surface_layout(),
            old_layout,
            new_layout,
            range,
            queue_families: queue_families(image.info().sharing, self.queue_family),
        };
        let outcome = self.images.transition(device.caps(), &request);
        if outcome.split {
            trace!(
                "depth and stencil of image {:?} transitioned separately",
                image.id()
            );
        }
        for op in outcome.ops {
            self.apply_metadata_op(image, op)?;
        }
        Ok(())
    }

    fn apply_metadata_op(&mut self, image: &Image, op: MetadataOp) -> Result<(), RecordError> {
        match op {
            MetadataOp::Fill {
                kind,
                aspects,
                mips,
                layers,
                address,
                size,
                value,
            } => {
                self.flush_pending()?;
                self.stream.push(Packet::FillMetadata {
                    image: image.id(),
                    kind,
                    aspects,
                    mips,
                    layers,
                    address,
                    size,
                    value,
                })?;
                // Fills are compute writes. Later metadata readers must wait for them.
                self.pending_flush |=
                    FlushBits::CS_PARTIAL_FLUSH | FlushBits::INV_VCACHE | metadata_flush(kind);
            }
            MetadataOp::Decompress {
                kind,
                aspects,
                mips,
                layers,
            } => {
                let bits = block_flush(kind);
                self.pending_flush |= bits;
                self.flush_pending()?;
                self.stream.push(Packet::Decompress {
                    image: image.id(),
                    kind,
                    aspects,
                    mips,
                    layers,
                })?;
                self.stream.push(Packet::CacheFlush {
                    bits: bits | FlushBits::PS_PARTIAL_FLUSH,
                })?;
            }
            MetadataOp::PublishClearValue {
                kind,
                address,
                value,
                zero_clear,
            } => {
                self.stream.push(Packet::WriteClearValue {
                    image: image.id(),
                    kind,
                    address,
                    value,
                })?;
                if let Some(zero_clear) = zero_clear {
                    self.stream.push(Packet::SetZRangePrecision {
                        image: image.id(),
                        zero_clear,
                    })?;
                }
            }
        }
        Ok(())
    }

    /// Everything a draw needs emitted before the draw packet itself.
    fn prepare_draw(&mut self, indexed: bool) -> Result<(), RecordError> {
        puffin::profile_function!();
        let Some(pipeline) = self.graphics.pipeline.clone() else {
            panic!("drawing with no graphics pipeline bound");
        };
        let device = self.device.clone();
        let caps = device.caps();
        let ctx = *pipeline.emit_context();
        let need_set = pipeline.need_set();

        // 1. Pipeline and the state whose encoding depends on it.
        let pipeline_emitted = self.dirty.contains(CmdDirty::PIPELINE)
            || self.graphics.emitted != Some(pipeline.id());
        if pipeline_emitted {
            if self.graphics.emitted != Some(pipeline.id()) {
                self.dynamic
                    .invalidate_pipeline_dependent(caps.pipeline_dependent);
            }
            trace!("emitting graphics pipeline {:?}", pipeline.id());
            self.emit_pipeline(&pipeline)?;
            self.graphics.emitted = Some(pipeline.id());
            self.dirty -= CmdDirty::PIPELINE;
            self.dirty |=
                CmdDirty::VERTEX_BUFFERS | CmdDirty::DESCRIPTOR_SETS | CmdDirty::PUSH_CONSTANTS;
        }
        let mut summary = self.dynamic.flush(
            caps.pipeline_dependent & need_set,
            &ctx,
            caps,
            &mut self.stream,
        )?;

        // 2. Outstanding cache maintenance.
        self.flush_pending()?;

        // 3. Per-draw data through upload memory.
        self.emit_user_data(BindPoint::Graphics, &pipeline)?;
        if indexed {
            let Some(index_buffer) = self.index_buffer else {
                panic!("indexed draw with no index buffer bound");
            };
            if self.dirty.contains(CmdDirty::INDEX_BUFFER) {
                self.stream.push(Packet::BindIndexBuffer {
                    address: index_buffer.address,
                    size: index_buffer.size,
                    index_type: index_buffer.index_type,
                })?;
                self.dirty -= CmdDirty::INDEX_BUFFER;
            }
        }

        // 4. Everything else the pipeline can observe.
        let rest = self.dynamic.flush(need_set, &ctx, caps, &mut self.stream)?;
        summary.groups |= rest.groups;
        summary.context_rolled |= rest.context_rolled;

        let scissor = 1 << RegisterGroup::Scissor as u32;
        if caps.has_erratum(Errata::SCISSOR_ON_CONTEXT_ROLL)
            && (summary.context_rolled || pipeline_emitted)
            && summary.groups & scissor == 0
            && need_set.contains(DynamicStateMask::SCISSOR)
            && self.dynamic.valid().contains(DynamicStateMask::SCISSOR)
        {
            trace!("re-emitting scissor after a context roll");
            self.dynamic
                .force_emit(RegisterGroup::Scissor, &ctx, caps, &mut self.stream)?;
        }

        Ok(())
    }

    fn prepare_dispatch(&mut self) -> Result<(), RecordError> {
        puffin::profile_function!();
        let Some(pipeline) = self.compute.pipeline.clone() else {
            panic!("dispatching with no compute pipeline bound");
        };

        if self.dirty.contains(CmdDirty::COMPUTE_PIPELINE)
            || self.compute.emitted != Some(pipeline.id())
        {
            trace!("emitting compute pipeline {:?}", pipeline.id());
            self.emit_pipeline(&pipeline)?;
            self.compute.emitted = Some(pipeline.id());
            self.dirty -= CmdDirty::COMPUTE_PIPELINE;
            self.dirty |= CmdDirty::COMPUTE_DESCRIPTOR_SETS | CmdDirty::COMPUTE_PUSH_CONSTANTS;
        }

        self.flush_pending()?;
        self.emit_user_data(BindPoint::Compute, &pipeline)
    }

    fn emit_pipeline(&mut self, pipeline: &Pipeline) -> Result<(), RecordError> {
        self.stream.push(Packet::BindPipeline {
            pipeline: pipeline.id(),
            bind_point: pipeline.bind_point(),
            registers: pipeline.info().registers.iter().copied().collect(),
        })
    }

    fn set_user_data(
        &mut self,
        pipeline: &Pipeline,
        slot: UserDataSlot,
        address: u64,
    ) -> Result<(), RecordError> {
        for mapping in pipeline.info().user_data_registers(slot) {
            self.stream.push(Packet::SetUserData {
                stage: mapping.stage,
                register: mapping.register,
                address,
            })?;
        }
        Ok(())
    }

    /// Uploads and points the pipeline at every dirty piece of per-draw data.
    fn emit_user_data(
        &mut self,
        bind_point: BindPoint,
        pipeline: &Pipeline,
    ) -> Result<(), RecordError> {
        let (sets_flag, push_flag) = match bind_point {
            BindPoint::Graphics => (CmdDirty::DESCRIPTOR_SETS, CmdDirty::PUSH_CONSTANTS),
            BindPoint::Compute => (
                CmdDirty::COMPUTE_DESCRIPTOR_SETS,
                CmdDirty::COMPUTE_PUSH_CONSTANTS,
            ),
        };

        if bind_point == BindPoint::Graphics && self.dirty.contains(CmdDirty::VERTEX_BUFFERS) {
            let strides = &pipeline.info().vertex_strides;
            if !strides.is_empty() && pipeline.uses(UserDataSlot::VertexDescriptors) {
                let descriptors: SmallVec<[VertexDescriptor; 8]> = strides
                    .iter()
                    .enumerate()
                    .map(|(binding, stride)| {
                        let buffer = self
                            .vertex_buffers
                            .get(binding)
                            .copied()
                            .unwrap_or_default();
                        VertexDescriptor {
                            address: buffer.address,
                            size: buffer.size.min(u32::MAX as u64) as u32,
                            stride: *stride,
                        }
                    })
                    .collect();
                let address = self.upload.upload(
                    self.stream.raw_mut(),
                    bytemuck::cast_slice(&descriptors),
                    16,
                )?;
                self.set_user_data(pipeline, UserDataSlot::VertexDescriptors, address)?;
            }
            self.dirty -= CmdDirty::VERTEX_BUFFERS;
        }

        if self.dirty.contains(sets_flag) {
            let sets = match bind_point {
                BindPoint::Graphics => self.graphics.descriptor_sets,
                BindPoint::Compute => self.compute.descriptor_sets,
            };
            for (index, set) in sets.iter().enumerate() {
                if let Some(address) = set {
                    let slot = UserDataSlot::DescriptorSet(index as u8);
                    self.set_user_data(pipeline, slot, *address)?;
                }
            }
            self.dirty -= sets_flag;
        }

        if self.dirty.contains(push_flag) {
            let bindings = match bind_point {
                BindPoint::Graphics => &self.graphics,
                BindPoint::Compute => &self.compute,
            };
            if !bindings.push_constants.is_empty() && pipeline.uses(UserDataSlot::PushConstants) {
                let address =
                    self.upload
                        .upload(self.stream.raw_mut(), &bindings.push_constants, 16)?;
                self.set_user_data(pipeline, UserDataSlot::PushConstants, address)?;
            }
            self.dirty -= push_flag;
        }

        Ok(())
    }
}

/// Caches a decompress of `kind` metadata reads and writes through.
#[inline(always)]
fn block_flush(kind: MetadataKind) -> FlushBits {
    match kind {
        MetadataKind::Color | MetadataKind::Multisample => {
            FlushBits::FLUSH_AND_INV_CB | FlushBits::FLUSH_AND_INV_CB_META
        }
        MetadataKind::Depth => FlushBits::FLUSH_AND_INV_DB | FlushBits::FLUSH_AND_INV_DB_META,
    }
}

#[inline(always)]
fn metadata_flush(kind: MetadataKind) -> FlushBits {
    match kind {
        MetadataKind::Color | MetadataKind::Multisample => FlushBits::FLUSH_AND_INV_CB_META,
        MetadataKind::Depth => FlushBits::FLUSH_AND_INV_DB_META,
    }
}
