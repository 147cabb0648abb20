use std::sync::Arc;

use api::{
    dynamic::DynamicStateMask,
    pipeline::{PipelineCreateInfo, UserDataSlot},
    types::BindPoint,
};

use crate::{state::EmitContext, util::id_gen::ResourceId};

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PipelineId(pub(crate) ResourceId);

/// A compiled pipeline as seen by the recording engine. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Pipeline(Arc<PipelineInner>);

#[derive(Debug)]
struct PipelineInner {
    id: PipelineId,
    info: PipelineCreateInfo,
    ctx: EmitContext,
    /// Union of the dynamic states consumed and the statically baked ones.
    need_set: DynamicStateMask,
}

impl Pipeline {
    pub(crate) fn new(id: ResourceId, info: PipelineCreateInfo) -> Self {
        let ctx = EmitContext::for_pipeline(&info);
        let need_set = info
            .static_state
            .iter()
            .fold(info.dynamic_states, |mask, value| mask | value.state().flag());

        Self(Arc::new(PipelineInner {
            id: PipelineId(id),
            info,
            ctx,
            need_set,
        }))
    }

    #[inline(always)]
    pub fn id(&self) -> PipelineId {
        self.0.id
    }

    #[inline(always)]
    pub fn info(&self) -> &PipelineCreateInfo {
        &self.0.info
    }

    #[inline(always)]
    pub fn bind_point(&self) -> BindPoint {
        self.0.info.bind_point
    }

    #[inline(always)]
    pub fn emit_context(&self) -> &EmitContext {
        &self.0.ctx
    }

    /// Dynamic state the pipeline can observe. State outside of this set is never emitted while
    /// the pipeline is bound.
    #[inline(always)]
    pub fn need_set(&self) -> DynamicStateMask {
        self.0.need_set
    }

    /// `true` if any stage reads `slot` through a user-data register.
    #[inline]
    pub fn uses(&self, slot: UserDataSlot) -> bool {
        self.0.info.user_data_registers(slot).next().is_some()
    }
}

impl PartialEq for Pipeline {
    fn eq(&self, other: &Self) -> bool {
        self.0.id == other.0.id
    }
}

impl Eq for Pipeline {}
