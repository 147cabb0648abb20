//! Maps declared memory dependencies to cache flush/invalidate and pipeline drain requests.
//!
//! Both mappings are table lookups. Results of several declarations are combined with a plain
//! union, so the order declarations arrive in never matters.

use api::{
    access::{AccessFlags, AccessIntent, AccessKind, PipelineStages},
    layout::{ImageLayout, SubresourceRange},
    surface::MetadataKinds,
};
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use static_assertions::const_assert_eq;

use crate::{
    caps::{CoherenceQuery, DeviceCaps},
    image::Image,
};

bitflags! {
    #[derive(Debug, Default, Serialize, Deserialize, Copy, Clone, PartialEq, Eq, Hash)]
    #[serde(transparent)]
    pub struct FlushBits: u32 {
        const CB_FLUSH         = 1 << 0;
        const CB_INV           = 1 << 1;
        const DB_FLUSH         = 1 << 2;
        const DB_INV           = 1 << 3;
        const CB_META_FLUSH    = 1 << 4;
        const CB_META_INV      = 1 << 5;
        const DB_META_FLUSH    = 1 << 6;
        const DB_META_INV      = 1 << 7;
        /// Vector memory (texture) cache.
        const INV_VCACHE       = 1 << 8;
        /// Scalar (constant) cache.
        const INV_SCACHE       = 1 << 9;
        const INV_ICACHE       = 1 << 10;
        const WB_L2            = 1 << 11;
        const INV_L2           = 1 << 12;
        /// Wait for in-flight vertex/geometry stage work.
        const VS_PARTIAL_FLUSH = 1 << 13;
        /// Wait for in-flight fragment and output merger work.
        const PS_PARTIAL_FLUSH = 1 << 14;
        /// Wait for in-flight compute work.
        const CS_PARTIAL_FLUSH = 1 << 15;

        const FLUSH_AND_INV_CB = Self::CB_FLUSH.bits() | Self::CB_INV.bits();
        const FLUSH_AND_INV_DB = Self::DB_FLUSH.bits() | Self::DB_INV.bits();
        const FLUSH_AND_INV_CB_META = Self::CB_META_FLUSH.bits() | Self::CB_META_INV.bits();
        const FLUSH_AND_INV_DB_META = Self::DB_META_FLUSH.bits() | Self::DB_META_INV.bits();
        const DRAINS = Self::VS_PARTIAL_FLUSH.bits()
            | Self::PS_PARTIAL_FLUSH.bits()
            | Self::CS_PARTIAL_FLUSH.bits();
    }
}

/// Flush requirements of one access kind, for either side of a dependency.
#[derive(Debug, Copy, Clone)]
pub(crate) struct AccessFlush {
    /// Always required.
    pub base: FlushBits,
    /// Required if the resource carries metadata of the matching block (or the barrier is
    /// global).
    pub meta: FlushBits,
    /// Required unless the resource is known to be L2 coherent.
    pub uncached: FlushBits,
}

#[derive(Debug, Copy, Clone)]
pub(crate) struct AccessFlushEntry {
    pub src: AccessFlush,
    pub dst: AccessFlush,
}

const NONE: AccessFlush = AccessFlush {
    base: FlushBits::empty(),
    meta: FlushBits::empty(),
    uncached: FlushBits::empty(),
};

const fn flush(base: FlushBits, meta: FlushBits, uncached: FlushBits) -> AccessFlush {
    AccessFlush {
        base,
        meta,
        uncached,
    }
}

const SHADER_READ_DST: AccessFlush = flush(
    FlushBits::INV_VCACHE.union(FlushBits::INV_SCACHE),
    FlushBits::empty(),
    FlushBits::INV_L2,
);

const CB_WRITE: AccessFlush = flush(
    FlushBits::FLUSH_AND_INV_CB,
    FlushBits::FLUSH_AND_INV_CB_META,
    FlushBits::empty(),
);

const DB_WRITE: AccessFlush = flush(
    FlushBits::FLUSH_AND_INV_DB,
    FlushBits::FLUSH_AND_INV_DB_META,
    FlushBits::empty(),
);

const ANY_WRITE_SRC: AccessFlush = flush(
    FlushBits::FLUSH_AND_INV_CB.union(FlushBits::FLUSH_AND_INV_DB),
    FlushBits::FLUSH_AND_INV_CB_META.union(FlushBits::FLUSH_AND_INV_DB_META),
    FlushBits::WB_L2,
);

const ANY_ACCESS_DST: AccessFlush = flush(
    FlushBits::FLUSH_AND_INV_CB
        .union(FlushBits::FLUSH_AND_INV_DB)
        .union(FlushBits::INV_VCACHE)
        .union(FlushBits::INV_SCACHE),
    FlushBits::FLUSH_AND_INV_CB_META.union(FlushBits::FLUSH_AND_INV_DB_META),
    FlushBits::INV_L2,
);

/// Indexed by [`AccessKind`].
pub(crate) const ACCESS_FLUSH_TABLE: [AccessFlushEntry; AccessKind::COUNT] = [
    // IndirectCommandRead
    AccessFlushEntry {
        src: NONE,
        dst: flush(FlushBits::empty(), FlushBits::empty(), FlushBits::INV_L2),
    },
    // IndexRead
    AccessFlushEntry {
        src: NONE,
        dst: flush(FlushBits::empty(), FlushBits::empty(), FlushBits::INV_L2),
    },
    // VertexAttributeRead
    AccessFlushEntry {
        src: NONE,
        dst: flush(FlushBits::INV_VCACHE, FlushBits::empty(), FlushBits::INV_L2),
    },
    // UniformRead
    AccessFlushEntry {
        src: NONE,
        dst: SHADER_READ_DST,
    },
    // InputAttachmentRead
    AccessFlushEntry {
        src: NONE,
        dst: flush(FlushBits::INV_VCACHE, FlushBits::empty(), FlushBits::INV_L2),
    },
    // ShaderRead
    AccessFlushEntry {
        src: NONE,
        dst: SHADER_READ_DST,
    },
    // ShaderWrite
    AccessFlushEntry {
        src: flush(FlushBits::empty(), FlushBits::empty(), FlushBits::WB_L2),
        dst: flush(FlushBits::INV_VCACHE, FlushBits::empty(), FlushBits::empty()),
    },
    // ColorAttachmentRead
    AccessFlushEntry {
        src: NONE,
        dst: CB_WRITE,
    },
    // ColorAttachmentWrite
    AccessFlushEntry {
        src: CB_WRITE,
        dst: CB_WRITE,
    },
    // DepthStencilAttachmentRead
    AccessFlushEntry {
        src: NONE,
        dst: DB_WRITE,
    },
    // DepthStencilAttachmentWrite
    AccessFlushEntry {
        src: DB_WRITE,
        dst: DB_WRITE,
    },
    // TransferRead
    AccessFlushEntry {
        src: NONE,
        dst: flush(FlushBits::INV_VCACHE, FlushBits::empty(), FlushBits::INV_L2),
    },
    // TransferWrite
    AccessFlushEntry {
        src: ANY_WRITE_SRC,
        dst: flush(
            FlushBits::FLUSH_AND_INV_CB
                .union(FlushBits::FLUSH_AND_INV_DB)
                .union(FlushBits::INV_VCACHE),
            FlushBits::FLUSH_AND_INV_CB_META.union(FlushBits::FLUSH_AND_INV_DB_META),
            FlushBits::INV_L2,
        ),
    },
    // HostRead
    AccessFlushEntry {
        src: NONE,
        dst: flush(FlushBits::empty(), FlushBits::empty(), FlushBits::WB_L2),
    },
    // HostWrite
    AccessFlushEntry {
        src: NONE,
        dst: SHADER_READ_DST,
    },
    // MemoryRead
    AccessFlushEntry {
        src: NONE,
        dst: ANY_ACCESS_DST,
    },
    // MemoryWrite
    AccessFlushEntry {
        src: ANY_WRITE_SRC,
        dst: ANY_ACCESS_DST,
    },
    // TransformFeedbackWrite
    AccessFlushEntry {
        src: flush(FlushBits::empty(), FlushBits::empty(), FlushBits::WB_L2),
        dst: flush(FlushBits::INV_VCACHE, FlushBits::empty(), FlushBits::empty()),
    },
    // ConditionalRenderingRead
    AccessFlushEntry {
        src: NONE,
        dst: flush(FlushBits::empty(), FlushBits::empty(), FlushBits::INV_L2),
    },
    // FragmentShadingRateRead
    AccessFlushEntry {
        src: NONE,
        dst: flush(FlushBits::INV_VCACHE, FlushBits::empty(), FlushBits::INV_L2),
    },
];

const_assert_eq!(ACCESS_FLUSH_TABLE.len(), AccessKind::COUNT);
const_assert_eq!(
    AccessKind::COUNT,
    AccessFlags::all().bits().count_ones() as usize
);

/// Stage classes and the drain each one requires when it appears on the source side of a
/// dependency.
pub(crate) const STAGE_DRAIN_TABLE: [(PipelineStages, FlushBits); 3] = [
    (
        PipelineStages::VERTEX_INPUT
            .union(PipelineStages::VERTEX_SHADER)
            .union(PipelineStages::TESSELLATION_CONTROL_SHADER)
            .union(PipelineStages::TESSELLATION_EVALUATION_SHADER)
            .union(PipelineStages::GEOMETRY_SHADER)
            .union(PipelineStages::TRANSFORM_FEEDBACK)
            .union(PipelineStages::ALL_GRAPHICS)
            .union(PipelineStages::ALL_COMMANDS)
            .union(PipelineStages::BOTTOM_OF_PIPE),
        FlushBits::VS_PARTIAL_FLUSH,
    ),
    (
        PipelineStages::EARLY_FRAGMENT_TESTS
            .union(PipelineStages::FRAGMENT_SHADER)
            .union(PipelineStages::LATE_FRAGMENT_TESTS)
            .union(PipelineStages::COLOR_ATTACHMENT_OUTPUT)
            .union(PipelineStages::TRANSFER)
            .union(PipelineStages::ALL_GRAPHICS)
            .union(PipelineStages::ALL_COMMANDS)
            .union(PipelineStages::BOTTOM_OF_PIPE),
        FlushBits::PS_PARTIAL_FLUSH,
    ),
    (
        PipelineStages::COMPUTE_SHADER
            .union(PipelineStages::DRAW_INDIRECT)
            .union(PipelineStages::TRANSFER)
            .union(PipelineStages::CONDITIONAL_RENDERING)
            .union(PipelineStages::ALL_COMMANDS)
            .union(PipelineStages::BOTTOM_OF_PIPE),
        FlushBits::CS_PARTIAL_FLUSH,
    ),
];

/// A memory dependency between two access intents.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
pub struct MemoryBarrier {
    pub src: AccessIntent,
    pub dst: AccessIntent,
}

/// A memory dependency on one image, optionally with a layout transition.
#[derive(Debug, Clone)]
pub struct ImageBarrier {
    pub image: Image,
    pub src: AccessIntent,
    pub dst: AccessIntent,
    pub old_layout: ImageLayout,
    pub new_layout: ImageLayout,
    pub range: SubresourceRange,
}

/// Everything declared by one barrier call.
#[derive(Debug, Default, Clone)]
pub struct BarrierInfo {
    pub memory: SmallVec<[MemoryBarrier; 2]>,
    pub images: SmallVec<[ImageBarrier; 2]>,
}

fn resolve(
    caps: &DeviceCaps,
    tcc_rb_non_coherent: bool,
    flush: &AccessFlush,
    image: Option<&Image>,
) -> FlushBits {
    let mut bits = flush.base;

    if !flush.meta.is_empty() {
        // Without a resource, any resource might carry metadata.
        let kinds = image.map_or(MetadataKinds::all(), |image| image.metadata_kinds());
        if kinds.intersects(MetadataKinds::COLOR | MetadataKinds::MULTISAMPLE) {
            bits |= flush.meta & FlushBits::FLUSH_AND_INV_CB_META;
        }
        if kinds.contains(MetadataKinds::DEPTH) {
            bits |= flush.meta & FlushBits::FLUSH_AND_INV_DB_META;
        }
    }

    if !flush.uncached.is_empty() {
        let query = CoherenceQuery {
            image: image.map(|image| image.info()),
            tcc_rb_non_coherent,
        };
        if !(caps.l2_coherent)(&query) {
            bits |= flush.uncached;
        }
    }

    bits
}

/// Flushes needed to make writes of `access` available.
pub fn src_flush_bits(
    caps: &DeviceCaps,
    tcc_rb_non_coherent: bool,
    access: AccessFlags,
    image: Option<&Image>,
) -> FlushBits {
    access.kinds().fold(FlushBits::empty(), |bits, kind| {
        bits | resolve(
            caps,
            tcc_rb_non_coherent,
            &ACCESS_FLUSH_TABLE[kind.index()].src,
            image,
        )
    })
}

/// Invalidations needed to make available data visible to `access`.
pub fn dst_flush_bits(
    caps: &DeviceCaps,
    tcc_rb_non_coherent: bool,
    access: AccessFlags,
    image: Option<&Image>,
) -> FlushBits {
    access.kinds().fold(FlushBits::empty(), |bits, kind| {
        bits | resolve(
            caps,
            tcc_rb_non_coherent,
            &ACCESS_FLUSH_TABLE[kind.index()].dst,
            image,
        )
    })
}

/// Drains needed before work in `stages` may be considered complete.
pub fn stage_flush_bits(stages: PipelineStages) -> FlushBits {
    STAGE_DRAIN_TABLE
        .iter()
        .filter(|(class, _)| class.intersects(stages))
        .fold(FlushBits::empty(), |bits, (_, drain)| bits | *drain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caps::{GFX10_CAPS, GFX6_CAPS, GFX9_CAPS};
    use rand::{Rng, SeedableRng};

    #[test]
    fn every_access_kind_has_an_entry() {
        for kind in AccessKind::ALL {
            // Indexing would panic on a short table.
            let _ = ACCESS_FLUSH_TABLE[kind.index()];
            assert_eq!(kind.flag().kinds().collect::<Vec<_>>(), vec![kind]);
        }
    }

    #[test]
    fn color_write_then_shader_read() {
        let src = src_flush_bits(&GFX6_CAPS, false, AccessFlags::COLOR_ATTACHMENT_WRITE, None);
        assert!(src.contains(FlushBits::FLUSH_AND_INV_CB));
        // Global barriers assume metadata might be present.
        assert!(src.contains(FlushBits::FLUSH_AND_INV_CB_META));

        let dst = dst_flush_bits(&GFX6_CAPS, false, AccessFlags::SHADER_READ, None);
        assert!(dst.contains(FlushBits::INV_VCACHE | FlushBits::INV_SCACHE | FlushBits::INV_L2));

        // Coherent L2 skips the invalidate.
        let dst = dst_flush_bits(&GFX10_CAPS, false, AccessFlags::SHADER_READ, None);
        assert!(!dst.contains(FlushBits::INV_L2));
        let dst = dst_flush_bits(&GFX10_CAPS, true, AccessFlags::SHADER_READ, None);
        assert!(dst.contains(FlushBits::INV_L2));
        let dst = dst_flush_bits(&GFX9_CAPS, false, AccessFlags::SHADER_READ, None);
        assert!(dst.contains(FlushBits::INV_L2));
    }

    #[test]
    fn stage_classes() {
        assert_eq!(
            stage_flush_bits(PipelineStages::FRAGMENT_SHADER),
            FlushBits::PS_PARTIAL_FLUSH
        );
        assert_eq!(
            stage_flush_bits(PipelineStages::VERTEX_SHADER | PipelineStages::COMPUTE_SHADER),
            FlushBits::VS_PARTIAL_FLUSH | FlushBits::CS_PARTIAL_FLUSH
        );
        assert_eq!(
            stage_flush_bits(PipelineStages::ALL_COMMANDS),
            FlushBits::DRAINS
        );
        assert_eq!(
            stage_flush_bits(PipelineStages::TOP_OF_PIPE),
            FlushBits::empty()
        );
    }

    /// Looking up a combined access set equals the union of looking up its parts, in any
    /// grouping.
    #[test]
    fn lookups_distribute_over_union() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(0x5EED);
        for _ in 0..256 {
            let a = AccessFlags::from_bits_truncate(rng.gen());
            let b = AccessFlags::from_bits_truncate(rng.gen());
            let stages_a = PipelineStages::from_bits_truncate(rng.gen());
            let stages_b = PipelineStages::from_bits_truncate(rng.gen());

            for caps in [&GFX6_CAPS, &GFX9_CAPS, &GFX10_CAPS] {
                assert_eq!(
                    src_flush_bits(caps, false, a | b, None),
                    src_flush_bits(caps, false, a, None) | src_flush_bits(caps, false, b, None)
                );
                assert_eq!(
                    dst_flush_bits(caps, false, a | b, None),
                    dst_flush_bits(caps, false, b, None) | dst_flush_bits(caps, false, a, None)
                );
            }
            assert_eq!(
                stage_flush_bits(stages_a | stages_b),
                stage_flush_bits(stages_a) | stage_flush_bits(stages_b)
            );
        }
    }
}
