//! Dirty-state tracking.
//!
//! Every dynamic state field has a "current" copy (what the application last bound) and an
//! "emitted" copy (what the hardware was last told). A field is dirty only while the two differ
//! byte for byte, so re-binding an unchanged value never causes an emission.

pub mod registers;
pub mod values;

use api::dynamic::{DynamicStateMask, DynamicStateValue};
use bitflags::bitflags;

use crate::{
    caps::DeviceCaps,
    command_buffer::RecordError,
    packet::{Packet, PacketSink},
};

pub use registers::{EmitContext, RegisterGroup};
pub use values::DynamicValues;

bitflags! {
    /// Non-dynamic bindings that must be re-emitted before the next draw or dispatch.
    #[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct CmdDirty: u32 {
        const PIPELINE                = 1 << 0;
        const COMPUTE_PIPELINE        = 1 << 1;
        const INDEX_BUFFER            = 1 << 2;
        const VERTEX_BUFFERS          = 1 << 3;
        const DESCRIPTOR_SETS         = 1 << 4;
        const PUSH_CONSTANTS          = 1 << 5;
        const COMPUTE_DESCRIPTOR_SETS = 1 << 6;
        const COMPUTE_PUSH_CONSTANTS  = 1 << 7;
    }
}

#[derive(Debug, Clone)]
pub struct DynamicStateTable {
    current: DynamicValues,
    emitted: DynamicValues,
    /// Fields that have been bound at least once since the last reset.
    valid: DynamicStateMask,
    /// Fields whose emitted copy reflects what the hardware holds.
    emitted_valid: DynamicStateMask,
    dirty: DynamicStateMask,
}

/// What a flush wrote.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct FlushSummary {
    /// One bit per emitted [`RegisterGroup`].
    pub groups: u32,
    /// `true` if any emitted group lives in context registers.
    pub context_rolled: bool,
}

impl Default for DynamicStateTable {
    fn default() -> Self {
        Self {
            current: DynamicValues::default(),
            emitted: DynamicValues::default(),
            valid: DynamicStateMask::empty(),
            emitted_valid: DynamicStateMask::empty(),
            dirty: DynamicStateMask::empty(),
        }
    }
}

impl DynamicStateTable {
    #[inline(always)]
    pub fn dirty(&self) -> DynamicStateMask {
        self.dirty
    }

    #[inline(always)]
    pub fn valid(&self) -> DynamicStateMask {
        self.valid
    }

    #[inline(always)]
    pub fn current(&self) -> &DynamicValues {
        &self.current
    }

    /// Binds a new value. Returns `true` if the field is dirty afterwards.
    ///
    /// # Panics
    /// - If `check` is set and the value addresses slots past the field's maximum.
    pub fn bind(&mut self, value: &DynamicStateValue, check: bool) -> bool {
        let state = value.state();
        let flag = state.flag();
        self.current.apply(value, check);
        self.valid |= flag;

        let changed = !self.emitted_valid.contains(flag)
            || self.current.bytes(state) != self.emitted.bytes(state);
        self.dirty.set(flag, changed);
        changed
    }

    /// Emits every register group touched by `dirty ∩ filter`. Each group is written once with
    /// the current value of all of its members, after which all members are clean.
    pub fn flush(
        &mut self,
        filter: DynamicStateMask,
        ctx: &EmitContext,
        caps: &DeviceCaps,
        sink: &mut impl PacketSink,
    ) -> Result<FlushSummary, RecordError> {
        let pending = self.dirty & filter;
        let mut summary = FlushSummary::default();
        if pending.is_empty() {
            return Ok(summary);
        }

        for group in RegisterGroup::ALL {
            if group.members().intersects(pending) {
                self.emit_group(group, ctx, caps, sink)?;
                summary.groups |= 1 << group as u32;
                summary.context_rolled |= group.is_context();
            }
        }

        Ok(summary)
    }

    /// Emits a group whether or not any member is dirty.
    pub fn force_emit(
        &mut self,
        group: RegisterGroup,
        ctx: &EmitContext,
        caps: &DeviceCaps,
        sink: &mut impl PacketSink,
    ) -> Result<(), RecordError> {
        self.emit_group(group, ctx, caps, sink)
    }

    fn emit_group(
        &mut self,
        group: RegisterGroup,
        ctx: &EmitContext,
        caps: &DeviceCaps,
        sink: &mut impl PacketSink,
    ) -> Result<(), RecordError> {
        sink.push(Packet::SetRegisters {
            group,
            offset: caps.register(group),
            values: group.encode(&self.current, ctx),
        })?;

        let members = group.members();
        for state in members.states() {
            self.emitted.copy_field(&self.current, state);
        }
        self.emitted_valid |= members;
        self.dirty -= members;
        Ok(())
    }

    /// Marks bound state whose encoding depends on the bound pipeline as dirty. Used when a
    /// different pipeline is bound, since the hardware copy was encoded for the old one. State
    /// that was never bound stays clean.
    #[inline]
    pub fn invalidate_pipeline_dependent(&mut self, mask: DynamicStateMask) {
        self.emitted_valid -= mask;
        self.dirty |= mask & self.valid;
    }

    /// Forgets everything known about hardware state. Every field that has a value becomes
    /// dirty.
    #[inline]
    pub fn invalidate_all(&mut self) {
        self.emitted_valid = DynamicStateMask::empty();
        self.dirty = self.valid;
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
