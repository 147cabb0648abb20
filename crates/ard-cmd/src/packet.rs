//! The recorded instruction stream.
//!
//! The hardware encoding is device specific and owned by the submission layer, so the stream is
//! kept as a vector of tagged packets. Packet order is the order the GPU observes.

use std::ops::Range;

use api::{
    layout::ImageAspects,
    pipeline::RegisterWrite,
    surface::MetadataKind,
    types::{BindPoint, IndexType, ShaderStage},
    Winsys,
};
use smallvec::SmallVec;

use crate::{
    barrier::FlushBits,
    command_buffer::{CommandBufferId, RecordError},
    image::ImageId,
    pipeline::PipelineId,
    state::RegisterGroup,
};

#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    /// Consecutive registers starting at `offset`, carrying one complete register group.
    SetRegisters {
        group: RegisterGroup,
        offset: u32,
        values: SmallVec<[u32; 8]>,
    },
    BindPipeline {
        pipeline: PipelineId,
        bind_point: BindPoint,
        registers: SmallVec<[RegisterWrite; 8]>,
    },
    /// A GPU address written to a user-data register of a shader stage.
    SetUserData {
        stage: ShaderStage,
        register: u32,
        address: u64,
    },
    BindIndexBuffer {
        address: u64,
        size: u64,
        index_type: IndexType,
    },
    CacheFlush {
        bits: FlushBits,
    },
    /// Waits for outstanding copy engine work to finish.
    WaitCopyIdle,
    FillMetadata {
        image: ImageId,
        kind: MetadataKind,
        aspects: ImageAspects,
        mips: Range<u32>,
        layers: Range<u32>,
        address: u64,
        size: u64,
        value: u32,
    },
    Decompress {
        image: ImageId,
        kind: MetadataKind,
        aspects: ImageAspects,
        mips: Range<u32>,
        layers: Range<u32>,
    },
    /// Publishes a fast-clear value into metadata storage.
    WriteClearValue {
        image: ImageId,
        kind: MetadataKind,
        address: u64,
        value: [u32; 4],
    },
    /// Rewrites the Z-range precision register for images affected by the TC-compatible depth
    /// erratum.
    SetZRangePrecision {
        image: ImageId,
        zero_clear: bool,
    },
    Draw {
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    },
    DrawIndirect {
        address: u64,
        draw_count: u32,
        stride: u32,
        indexed: bool,
    },
    Dispatch {
        x: u32,
        y: u32,
        z: u32,
    },
    DispatchIndirect {
        address: u64,
    },
    CopyBuffer {
        src: u64,
        dst: u64,
        size: u64,
    },
    FillBuffer {
        dst: u64,
        size: u64,
        value: u32,
    },
    /// Starts predicating following work on the 64-bit value at `address`. `None` ends
    /// predication.
    SetPredication {
        address: Option<u64>,
        inverted: bool,
    },
    BeginLabel {
        name: String,
        color: [f32; 4],
    },
    EndLabel,
    /// Runs the packets of a secondary command buffer.
    ExecuteSecondary {
        secondary: CommandBufferId,
        packets: usize,
    },
}

/// Anything packets can be recorded into.
pub trait PacketSink {
    fn push(&mut self, packet: Packet) -> Result<(), RecordError>;
}

/// Packet counts of one recording.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct StreamCounters {
    pub packets: u64,
    pub register_groups: u64,
    pub pipeline_binds: u64,
    pub flushes: u64,
    pub draws: u64,
    pub dispatches: u64,
    pub fills: u64,
    pub decompresses: u64,
}

/// A winsys instruction stream plus the packets recorded into it.
pub struct CmdStream<W: Winsys> {
    stream: W::InstructionStream,
    packets: Vec<Packet>,
    counters: StreamCounters,
}

impl<W: Winsys> CmdStream<W> {
    pub fn new(stream: W::InstructionStream) -> Self {
        Self {
            stream,
            packets: Vec::default(),
            counters: StreamCounters::default(),
        }
    }

    #[inline(always)]
    pub fn packets(&self) -> &[Packet] {
        &self.packets
    }

    #[inline(always)]
    pub fn counters(&self) -> StreamCounters {
        self.counters
    }

    #[inline(always)]
    pub fn raw(&self) -> &W::InstructionStream {
        &self.stream
    }

    #[inline(always)]
    pub fn raw_mut(&mut self) -> &mut W::InstructionStream {
        &mut self.stream
    }

    /// Drops every packet and buffer reference. Keeps the packet storage.
    pub fn reset(&mut self, winsys: &W) {
        winsys.reset_instruction_stream(&mut self.stream);
        self.packets.clear();
        self.counters = StreamCounters::default();
    }
}

impl<W: Winsys> PacketSink for CmdStream<W> {
    /// Growth goes through `try_reserve` so running out of host memory latches an error instead
    /// of aborting.
    fn push(&mut self, packet: Packet) -> Result<(), RecordError> {
        self.packets
            .try_reserve(1)
            .map_err(|_| RecordError::OutOfHostMemory)?;
        self.counters.count(&packet);
        self.packets.push(packet);
        Ok(())
    }
}

impl PacketSink for Vec<Packet> {
    fn push(&mut self, packet: Packet) -> Result<(), RecordError> {
        self.try_reserve(1).map_err(|_| RecordError::OutOfHostMemory)?;
        Vec::push(self, packet);
        Ok(())
    }
}

impl StreamCounters {
    fn count(&mut self, packet: &Packet) {
        self.packets += 1;
        match packet {
            Packet::SetRegisters { .. } => self.register_groups += 1,
            Packet::BindPipeline { .. } => self.pipeline_binds += 1,
            Packet::CacheFlush { .. } => self.flushes += 1,
            Packet::Draw { .. } | Packet::DrawIndexed { .. } | Packet::DrawIndirect { .. } => {
                self.draws += 1
            }
            Packet::Dispatch { .. } | Packet::DispatchIndirect { .. } => self.dispatches += 1,
            Packet::FillMetadata { .. } => self.fills += 1,
            Packet::Decompress { .. } => self.decompresses += 1,
            _ => {}
        }
    }
}
