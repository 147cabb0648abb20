use api::{
    access::{AccessFlags, AccessIntent, PipelineStages},
    dynamic::{
        DynamicStateMask, DynamicStateValue, FragmentShadingRate, SampleLocations, Scissor,
        StencilFaces, Viewport,
    },
    layout::{ImageAspects, ImageLayout, SubresourceRange},
    pipeline::{PipelineCreateInfo, UserDataMapping, UserDataSlot},
    surface::{ImageCreateInfo, MetadataKind},
    types::{
        BindPoint, CullMode, Format, Generation, ImageType, ImageUsage, MultiSamples, PolygonMode,
        PrimitiveTopology, QueueFamilies, QueueFamily, ShaderStage, ShaderStages, SharingMode,
    },
    winsys::BufferCreateError,
};
use headless::{HeadlessSurfaceLayout, HeadlessWinsys};

use crate::{
    barrier::{
        dst_flush_bits, src_flush_bits, stage_flush_bits, BarrierInfo, FlushBits, ImageBarrier,
        MemoryBarrier,
    },
    command_buffer::{
        CommandBuffer, CommandBufferLevel, CommandBufferState, Inheritance, RecordError,
    },
    device::{Device, DeviceInfo},
    image::Image,
    metadata::{ClearValue, MetadataState},
    packet::Packet,
    pipeline::Pipeline,
    pool::CommandPool,
    settings::DriverSettings,
    state::RegisterGroup,
};

type TestDevice = Device<HeadlessWinsys>;
type TestCommandBuffer = CommandBuffer<HeadlessWinsys>;

fn device(generation: Generation) -> TestDevice {
    device_with(generation, DriverSettings::default())
}

fn device_with(generation: Generation, settings: DriverSettings) -> TestDevice {
    Device::new(
        HeadlessWinsys::new(),
        HeadlessSurfaceLayout::default(),
        DeviceInfo::new(generation),
        settings,
    )
}

fn primary(pool: &CommandPool<HeadlessWinsys>) -> TestCommandBuffer {
    pool.allocate(CommandBufferLevel::Primary).unwrap()
}

fn graphics_pipeline(device: &TestDevice, dynamic_states: DynamicStateMask) -> Pipeline {
    device.create_pipeline(PipelineCreateInfo {
        dynamic_states,
        ..Default::default()
    })
}

fn viewport(width: f32) -> DynamicStateValue {
    DynamicStateValue::viewport(Viewport {
        width,
        height: 64.0,
        max_depth: 1.0,
        ..Default::default()
    })
}

fn scissor() -> DynamicStateValue {
    DynamicStateValue::scissor(Scissor {
        x: 0,
        y: 0,
        width: 64,
        height: 64,
    })
}

fn image(device: &TestDevice, format: Format) -> Image {
    let usage = if format.is_color() {
        ImageUsage::COLOR_ATTACHMENT | ImageUsage::SAMPLED
    } else {
        ImageUsage::DEPTH_STENCIL_ATTACHMENT | ImageUsage::SAMPLED
    };
    device.create_image(ImageCreateInfo {
        ty: ImageType::Type2D,
        format,
        width: 64,
        height: 64,
        depth: 1,
        array_layers: 1,
        mip_levels: 1,
        samples: MultiSamples::Count1,
        usage,
        sharing: SharingMode::Exclusive,
        address: 0x10_0000,
        debug_name: Some(String::from("test_image")),
    })
}

fn groups(packets: &[Packet]) -> Vec<RegisterGroup> {
    packets
        .iter()
        .filter_map(|packet| match packet {
            Packet::SetRegisters { group, .. } => Some(*group),
            _ => None,
        })
        .collect()
}

fn count(packets: &[Packet], f: impl Fn(&Packet) -> bool) -> usize {
    packets.iter().filter(|packet| f(packet)).count()
}

/// Rebinding an unchanged value between two draws emits it once.
#[test]
fn unchanged_state_is_emitted_once() {
    let device = device(Generation::Gfx10);
    let pool = CommandPool::new(device.clone(), QueueFamily::Graphics);
    let pipeline = graphics_pipeline(&device, DynamicStateMask::VIEWPORT);
    let mut cb = primary(&pool);

    cb.begin();
    cb.record_bind_pipeline(&pipeline);
    cb.record_set_dynamic_state(&viewport(64.0));
    cb.record_draw(3, 1, 0, 0);
    cb.record_set_dynamic_state(&viewport(64.0));
    cb.record_draw(3, 1, 0, 0);
    cb.end().unwrap();

    let viewports = groups(cb.packets())
        .into_iter()
        .filter(|group| *group == RegisterGroup::Viewport)
        .count();
    assert_eq!(viewports, 1);
    assert_eq!(cb.stats().pipeline_binds, 1);
    assert_eq!(cb.stats().draws, 2);
}

/// Changing one member of a packed group rewrites the whole group with the current value of
/// every member.
#[test]
fn packed_groups_are_written_whole() {
    let device = device(Generation::Gfx10);
    let pool = CommandPool::new(device.clone(), QueueFamily::Graphics);
    let pipeline = graphics_pipeline(
        &device,
        DynamicStateMask::STENCIL_WRITE_MASK
            | DynamicStateMask::STENCIL_COMPARE_MASK
            | DynamicStateMask::STENCIL_REFERENCE,
    );
    let mut cb = primary(&pool);

    cb.begin();
    cb.record_bind_pipeline(&pipeline);
    cb.record_set_dynamic_state(&DynamicStateValue::StencilWriteMask(StencilFaces {
        front: 0xAB,
        back: 0xCD,
    }));
    cb.record_set_dynamic_state(&DynamicStateValue::StencilCompareMask(StencilFaces {
        front: 0xFF,
        back: 0x0F,
    }));
    cb.record_set_dynamic_state(&DynamicStateValue::StencilReference(StencilFaces {
        front: 1,
        back: 1,
    }));
    cb.record_draw(3, 1, 0, 0);
    cb.record_set_dynamic_state(&DynamicStateValue::StencilReference(StencilFaces {
        front: 2,
        back: 2,
    }));
    cb.record_draw(3, 1, 0, 0);

    let expected =
        RegisterGroup::StencilRefMask.encode(cb.dynamic_state().current(), pipeline.emit_context());
    cb.end().unwrap();

    let writes: Vec<_> = cb
        .packets()
        .iter()
        .filter_map(|packet| match packet {
            Packet::SetRegisters {
                group: RegisterGroup::StencilRefMask,
                values,
                ..
            } => Some(values.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(writes.len(), 2);
    assert_eq!(writes[1], expected);
    assert_ne!(writes[0], writes[1]);
}

/// State the bound pipeline cannot observe stays pending until a pipeline that observes it is
/// bound.
#[test]
fn state_outside_need_set_waits() {
    let device = device(Generation::Gfx10);
    let pool = CommandPool::new(device.clone(), QueueFamily::Graphics);
    let without = graphics_pipeline(&device, DynamicStateMask::VIEWPORT);
    let with = graphics_pipeline(
        &device,
        DynamicStateMask::VIEWPORT | DynamicStateMask::LINE_WIDTH,
    );
    let mut cb = primary(&pool);

    cb.begin();
    cb.record_bind_pipeline(&without);
    cb.record_set_dynamic_state(&DynamicStateValue::LineWidth(2.0));
    cb.record_draw(3, 1, 0, 0);
    assert!(!groups(cb.packets()).contains(&RegisterGroup::LineWidth));
    assert!(cb
        .dynamic_state()
        .dirty()
        .contains(DynamicStateMask::LINE_WIDTH));

    cb.record_bind_pipeline(&with);
    cb.record_draw(3, 1, 0, 0);
    cb.end().unwrap();
    assert!(groups(cb.packets()).contains(&RegisterGroup::LineWidth));
    assert_eq!(cb.stats().pipeline_binds, 2);
}

/// Every barrier since the last draw contributes to a single cache flush.
#[test]
fn barriers_union_into_one_flush() {
    let device = device(Generation::Gfx10);
    let pool = CommandPool::new(device.clone(), QueueFamily::Graphics);
    let pipeline = graphics_pipeline(&device, DynamicStateMask::empty());
    let mut cb = primary(&pool);

    let first = MemoryBarrier {
        src: AccessIntent::new(
            AccessFlags::COLOR_ATTACHMENT_WRITE,
            PipelineStages::COLOR_ATTACHMENT_OUTPUT,
        ),
        dst: AccessIntent::new(AccessFlags::SHADER_READ, PipelineStages::FRAGMENT_SHADER),
    };
    let second = MemoryBarrier {
        src: AccessIntent::new(AccessFlags::SHADER_WRITE, PipelineStages::COMPUTE_SHADER),
        dst: AccessIntent::new(
            AccessFlags::INDIRECT_COMMAND_READ,
            PipelineStages::DRAW_INDIRECT,
        ),
    };

    let caps = device.caps();
    let mut expected = FlushBits::empty();
    for barrier in [&first, &second] {
        expected |= src_flush_bits(caps, false, barrier.src.access, None)
            | stage_flush_bits(barrier.src.stages)
            | dst_flush_bits(caps, false, barrier.dst.access, None);
    }
    assert!(!expected.is_empty());

    cb.begin();
    cb.record_bind_pipeline(&pipeline);
    for barrier in [first, second] {
        let mut info = BarrierInfo::default();
        info.memory.push(barrier);
        cb.record_barrier(&info);
    }
    assert_eq!(cb.pending_flush(), expected);
    cb.record_draw(3, 1, 0, 0);
    assert!(cb.pending_flush().is_empty());
    cb.record_draw(3, 1, 0, 0);
    cb.end().unwrap();

    let flushes: Vec<_> = cb
        .packets()
        .iter()
        .filter_map(|packet| match packet {
            Packet::CacheFlush { bits } => Some(*bits),
            _ => None,
        })
        .collect();
    assert_eq!(flushes, vec![expected]);

    let draw = cb
        .packets()
        .iter()
        .position(|packet| matches!(packet, Packet::Draw { .. }))
        .unwrap();
    let flush = cb
        .packets()
        .iter()
        .position(|packet| matches!(packet, Packet::CacheFlush { .. }))
        .unwrap();
    assert!(flush < draw);
}

/// The first transition out of an undefined layout initializes metadata exactly once.
#[test]
fn first_use_initializes_metadata() {
    let device = device(Generation::Gfx10);
    let pool = CommandPool::new(device.clone(), QueueFamily::Graphics);
    let target = image(&device, Format::Rgba8Unorm);
    assert!(target.metadata(MetadataKind::Color).is_some());
    let mut cb = primary(&pool);

    cb.begin();
    cb.record_layout_transition(
        &target,
        ImageLayout::Undefined,
        ImageLayout::ColorAttachment,
        SubresourceRange::all(ImageAspects::COLOR),
    );
    cb.record_layout_transition(
        &target,
        ImageLayout::ColorAttachment,
        ImageLayout::ColorAttachment,
        SubresourceRange::all(ImageAspects::COLOR),
    );
    cb.end().unwrap();

    let fills: Vec<_> = cb
        .packets()
        .iter()
        .filter_map(|packet| match packet {
            Packet::FillMetadata { kind, value, .. } => Some((*kind, *value)),
            _ => None,
        })
        .collect();
    assert_eq!(
        fills,
        vec![(
            MetadataKind::Color,
            device.caps().fill_values[MetadataKind::Color.index()]
        )]
    );
    assert_eq!(
        count(cb.packets(), |packet| matches!(
            packet,
            Packet::WriteClearValue { .. }
        )),
        1
    );
    assert_eq!(
        cb.image_tracker().state(
            target.id(),
            MetadataKind::Color,
            ImageAspects::COLOR,
            0,
            0
        ),
        Some(MetadataState::Compressed)
    );
}

/// Leaving a compressible layout decompresses once, and coming back costs nothing.
#[test]
fn compression_round_trip_decompresses_once() {
    let device = device(Generation::Gfx6);
    let pool = CommandPool::new(device.clone(), QueueFamily::Graphics);
    let target = image(&device, Format::Rgba8Unorm);
    let range = SubresourceRange::all(ImageAspects::COLOR);
    let mut cb = primary(&pool);

    cb.begin();
    cb.record_layout_transition(
        &target,
        ImageLayout::Undefined,
        ImageLayout::ColorAttachment,
        range,
    );
    for _ in 0..2 {
        cb.record_layout_transition(
            &target,
            ImageLayout::ColorAttachment,
            ImageLayout::ShaderReadOnly,
            range,
        );
        cb.record_layout_transition(
            &target,
            ImageLayout::ShaderReadOnly,
            ImageLayout::ColorAttachment,
            range,
        );
    }
    cb.end().unwrap();

    assert_eq!(cb.stats().fills, 1);
    assert_eq!(cb.stats().decompresses, 2);

    let packets = cb.packets();
    for (index, packet) in packets.iter().enumerate() {
        if let Packet::Decompress { .. } = packet {
            let Packet::CacheFlush { bits: before } = &packets[index - 1] else {
                panic!("decompress not preceded by a cache flush");
            };
            let Packet::CacheFlush { bits: after } = &packets[index + 1] else {
                panic!("decompress not followed by a cache flush");
            };
            assert!(before.contains(FlushBits::FLUSH_AND_INV_CB));
            assert!(after.contains(FlushBits::FLUSH_AND_INV_CB));
        }
    }
}

/// Images shared between queue families never stay compressed.
#[test]
fn concurrent_images_stay_expanded() {
    let device = device(Generation::Gfx10);
    let pool = CommandPool::new(device.clone(), QueueFamily::Graphics);
    let exclusive = image(&device, Format::Rgba8Unorm);
    let target = device.create_image(ImageCreateInfo {
        sharing: SharingMode::Concurrent(QueueFamilies::GRAPHICS | QueueFamilies::COMPUTE),
        ..exclusive.info().clone()
    });
    let mut cb = primary(&pool);

    cb.begin();
    let mut info = BarrierInfo::default();
    info.images.push(ImageBarrier {
        image: target.clone(),
        src: AccessIntent::default(),
        dst: AccessIntent::new(
            AccessFlags::COLOR_ATTACHMENT_WRITE,
            PipelineStages::COLOR_ATTACHMENT_OUTPUT,
        ),
        old_layout: ImageLayout::Undefined,
        new_layout: ImageLayout::ColorAttachment,
        range: SubresourceRange::all(ImageAspects::COLOR),
    });
    cb.record_barrier(&info);
    cb.end().unwrap();

    assert_eq!(cb.stats().fills, 1);
    assert_eq!(
        cb.image_tracker().state(
            target.id(),
            MetadataKind::Color,
            ImageAspects::COLOR,
            0,
            0
        ),
        Some(MetadataState::Expanded)
    );
}

/// A zero depth clear rewrites the Z-range precision register on parts with the erratum.
#[test]
fn depth_clear_values_track_zrange_erratum() {
    let device = device(Generation::Gfx9);
    let pool = CommandPool::new(device.clone(), QueueFamily::Graphics);
    let depth = image(&device, Format::D32Sfloat);
    let mut cb = primary(&pool);

    cb.begin();
    cb.record_clear_value(
        &depth,
        ClearValue::DepthStencil {
            depth: 0.0,
            stencil: 0,
        },
    );
    cb.record_clear_value(
        &depth,
        ClearValue::DepthStencil {
            depth: 0.0,
            stencil: 0,
        },
    );
    cb.record_clear_value(
        &depth,
        ClearValue::DepthStencil {
            depth: 1.0,
            stencil: 0,
        },
    );
    cb.end().unwrap();

    let zrange: Vec<_> = cb
        .packets()
        .iter()
        .filter_map(|packet| match packet {
            Packet::SetZRangePrecision { zero_clear, .. } => Some(*zero_clear),
            _ => None,
        })
        .collect();
    assert_eq!(zrange, vec![true, false]);
    assert_eq!(
        count(cb.packets(), |packet| matches!(
            packet,
            Packet::WriteClearValue { .. }
        )),
        2
    );
}

/// Executing a secondary leaves the primary assuming nothing about hardware state.
#[test]
fn secondary_execution_invalidates_primary_state() {
    let device = device(Generation::Gfx10);
    let pool = CommandPool::new(device.clone(), QueueFamily::Graphics);
    let dynamic = DynamicStateMask::VIEWPORT | DynamicStateMask::CULL_MODE;
    let ours = graphics_pipeline(&device, dynamic);
    let theirs = graphics_pipeline(&device, dynamic);

    let mut secondary = pool.allocate(CommandBufferLevel::Secondary).unwrap();
    secondary.begin_secondary(Inheritance::default());
    secondary.record_bind_pipeline(&theirs);
    secondary.record_set_dynamic_state(&DynamicStateValue::CullMode(CullMode::Front));
    secondary.record_draw(3, 1, 0, 0);
    secondary.end().unwrap();

    let mut cb = primary(&pool);
    cb.begin();
    cb.record_bind_pipeline(&ours);
    cb.record_set_dynamic_state(&viewport(64.0));
    cb.record_set_dynamic_state(&DynamicStateValue::CullMode(CullMode::Back));
    cb.record_draw(3, 1, 0, 0);
    cb.execute_commands(&[&secondary]);
    cb.record_draw(3, 1, 0, 0);
    cb.end().unwrap();

    let packets = cb.packets();
    let executed = packets
        .iter()
        .position(|packet| matches!(packet, Packet::ExecuteSecondary { .. }))
        .unwrap();
    assert_eq!(
        packets[executed],
        Packet::ExecuteSecondary {
            secondary: secondary.id(),
            packets: secondary.packets().len(),
        }
    );
    assert_ne!(secondary.id(), cb.id());
    let after = &packets[executed..];

    assert!(after.iter().any(|packet| matches!(
        packet,
        Packet::BindPipeline { pipeline, .. } if *pipeline == ours.id()
    )));
    let regroups = groups(after);
    assert!(regroups.contains(&RegisterGroup::Viewport));
    assert!(regroups.contains(&RegisterGroup::RasterizerControl));
}

/// Switching to a pipeline that encodes the same values differently re-emits them, even though
/// none of the values changed.
#[test]
fn pipeline_change_reencodes_dependent_state() {
    let mut sample_locations = SampleLocations {
        samples_per_pixel: 4,
        grid_width: 1,
        grid_height: 1,
        count: 4,
        ..Default::default()
    };
    sample_locations.locations[..4]
        .copy_from_slice(&[[0.25, 0.25], [0.75, 0.25], [0.25, 0.75], [0.75, 0.75]]);

    type Variant = fn(&mut PipelineCreateInfo);
    let cases: [(RegisterGroup, DynamicStateValue, Variant); 6] = [
        (
            RegisterGroup::PrimitiveType,
            DynamicStateValue::PrimitiveTopology(PrimitiveTopology::TriangleList),
            |info| info.tessellation = true,
        ),
        (
            RegisterGroup::TessellationControl,
            DynamicStateValue::PatchControlPoints(3),
            |info| info.tessellation = true,
        ),
        (
            RegisterGroup::RasterizerControl,
            DynamicStateValue::CullMode(CullMode::Back),
            |info| info.polygon_mode = PolygonMode::Line,
        ),
        (
            RegisterGroup::SampleLocations,
            DynamicStateValue::SampleLocations(sample_locations),
            |info| info.samples = MultiSamples::Count4,
        ),
        (
            RegisterGroup::TargetMask,
            DynamicStateValue::ColorWriteEnable(0xFF),
            |info| info.color_attachments = 2,
        ),
        (
            RegisterGroup::ShadingRate,
            DynamicStateValue::FragmentShadingRate(FragmentShadingRate {
                width: 2,
                height: 2,
                combiner_ops: [0, 0],
            }),
            |info| info.fragment_shading_rate = true,
        ),
    ];

    for generation in [Generation::Gfx6, Generation::Gfx9, Generation::Gfx10] {
        for (group, value, variant) in &cases {
            let device = device(generation);
            let pool = CommandPool::new(device.clone(), QueueFamily::Graphics);
            let dynamic_states = value.state().flag();
            let plain = graphics_pipeline(&device, dynamic_states);
            let mut info = PipelineCreateInfo {
                dynamic_states,
                ..Default::default()
            };
            variant(&mut info);
            let varied = device.create_pipeline(info);
            let mut cb = primary(&pool);

            cb.begin();
            cb.record_bind_pipeline(&plain);
            cb.record_set_dynamic_state(value);
            cb.record_draw(3, 1, 0, 0);
            cb.record_bind_pipeline(&varied);
            cb.record_draw(3, 1, 0, 0);
            let expected = group.encode(cb.dynamic_state().current(), varied.emit_context());
            cb.end().unwrap();

            let writes: Vec<_> = cb
                .packets()
                .iter()
                .filter_map(|packet| match packet {
                    Packet::SetRegisters {
                        group: written,
                        values,
                        ..
                    } if written == group => Some(values.clone()),
                    _ => None,
                })
                .collect();
            assert_eq!(writes.len(), 2, "{generation:?} {group:?}");
            assert_ne!(writes[0], writes[1], "{generation:?} {group:?}");
            assert_eq!(writes[1], expected, "{generation:?} {group:?}");
        }
    }
}

/// Pipeline changes do not emit state that was never bound.
#[test]
fn pipeline_change_skips_unbound_state() {
    let device = device(Generation::Gfx10);
    let pool = CommandPool::new(device.clone(), QueueFamily::Graphics);
    let dynamic_states = DynamicStateMask::VIEWPORT | DynamicStateMask::FRAGMENT_SHADING_RATE;
    let plain = graphics_pipeline(&device, dynamic_states);
    let shaded = device.create_pipeline(PipelineCreateInfo {
        dynamic_states,
        fragment_shading_rate: true,
        ..Default::default()
    });
    let mut cb = primary(&pool);

    cb.begin();
    cb.record_bind_pipeline(&plain);
    cb.record_set_dynamic_state(&viewport(64.0));
    cb.record_draw(3, 1, 0, 0);
    cb.record_bind_pipeline(&shaded);
    cb.record_draw(3, 1, 0, 0);
    cb.end().unwrap();

    assert!(!groups(cb.packets()).contains(&RegisterGroup::ShadingRate));
}

/// Initializing one mip writes only that mip's metadata, leaving compressed mips alone.
#[test]
fn mip_fills_stay_in_their_range() {
    let device = device(Generation::Gfx10);
    let pool = CommandPool::new(device.clone(), QueueFamily::Graphics);
    let base = image(&device, Format::Rgba8Unorm);
    let target = device.create_image(ImageCreateInfo {
        mip_levels: 2,
        array_layers: 2,
        ..base.info().clone()
    });
    let whole = *target.metadata(MetadataKind::Color).unwrap();
    assert_eq!(whole.eligible_levels, 2);
    let mip = |base_mip: u32| SubresourceRange {
        aspects: ImageAspects::COLOR,
        base_mip,
        mip_count: Some(1),
        base_layer: 0,
        layer_count: None,
    };
    let mut cb = primary(&pool);

    cb.begin();
    for base_mip in 0..2 {
        cb.record_layout_transition(
            &target,
            ImageLayout::Undefined,
            ImageLayout::ColorAttachment,
            mip(base_mip),
        );
    }
    cb.end().unwrap();

    let fills: Vec<_> = cb
        .packets()
        .iter()
        .filter_map(|packet| match packet {
            Packet::FillMetadata {
                mips,
                address,
                size,
                ..
            } => Some((mips.clone(), *address..*address + *size)),
            _ => None,
        })
        .collect();
    assert_eq!(fills.len(), 2);
    let (first_mips, first) = &fills[0];
    let (second_mips, second) = &fills[1];
    assert_eq!(*first_mips, 0..1);
    assert_eq!(*second_mips, 1..2);
    assert_eq!(first.start, whole.address);
    assert!(first.end <= second.start);
    assert!(second.end <= whole.address + whole.size);
    assert_eq!(
        cb.image_tracker().state(
            target.id(),
            MetadataKind::Color,
            ImageAspects::COLOR,
            0,
            1
        ),
        Some(MetadataState::Compressed)
    );
}

/// Depth and stencil that were moved to different layouts are transitioned separately, and
/// only the aspect that is still compressed is decompressed.
#[test]
fn disagreeing_depth_stencil_layouts_split() {
    let device = device(Generation::Gfx10);
    let pool = CommandPool::new(device.clone(), QueueFamily::Graphics);
    let target = image(&device, Format::D32SfloatS8Uint);
    assert!(target.metadata(MetadataKind::Depth).is_some());
    let both = ImageAspects::DEPTH | ImageAspects::STENCIL;
    let mut cb = primary(&pool);

    cb.begin();
    cb.record_layout_transition(
        &target,
        ImageLayout::Undefined,
        ImageLayout::DepthStencilAttachment,
        SubresourceRange::all(both),
    );
    cb.record_layout_transition(
        &target,
        ImageLayout::DepthStencilAttachment,
        ImageLayout::Present,
        SubresourceRange::all(ImageAspects::STENCIL),
    );
    let before = cb.packets().len();
    cb.record_layout_transition(
        &target,
        ImageLayout::General,
        ImageLayout::TransferDst,
        SubresourceRange::all(both),
    );
    cb.end().unwrap();

    let decompressed: Vec<_> = cb.packets()[before..]
        .iter()
        .filter_map(|packet| match packet {
            Packet::Decompress { aspects, .. } => Some(*aspects),
            _ => None,
        })
        .collect();
    assert_eq!(decompressed, vec![ImageAspects::DEPTH]);
    for aspect in [ImageAspects::DEPTH, ImageAspects::STENCIL] {
        assert_eq!(
            cb.image_tracker().layout(target.id(), aspect, 0, 0),
            Some(ImageLayout::TransferDst)
        );
    }
}

/// Growing upload memory keeps earlier allocations intact and referenced until reset.
#[test]
fn upload_overflow_keeps_old_buffer_alive() {
    let device = device_with(
        Generation::Gfx10,
        DriverSettings {
            upload_min_size: 256,
            ..Default::default()
        },
    );
    let pool = CommandPool::new(device.clone(), QueueFamily::Graphics);
    let mut cb = primary(&pool);
    let winsys = device.winsys();

    cb.begin();
    let first = cb.upload(&[0xAA; 200], 16).unwrap();
    let second = cb.upload(&[0xBB; 200], 16).unwrap();

    assert_eq!(cb.upload_allocator().retired_buffers(), 1);
    assert!(cb.upload_allocator().capacity() >= 512);
    assert_eq!(cb.stream().reference_count(), 2);
    assert_eq!(winsys.read_address(first, 200).unwrap(), vec![0xAA; 200]);
    assert_eq!(winsys.read_address(second, 200).unwrap(), vec![0xBB; 200]);
    cb.end().unwrap();

    let live = winsys.live_buffers();
    cb.reset();
    assert_eq!(winsys.live_buffers(), live - 1);
    assert_eq!(cb.upload_allocator().retired_buffers(), 0);
    assert_eq!(cb.stream().reference_count(), 1);
    assert!(winsys.read_address(first, 200).is_none());
}

/// Allocation failures latch. Everything after is ignored and `end` reports the failure.
#[test]
fn recording_errors_are_sticky() {
    let device = device_with(
        Generation::Gfx10,
        DriverSettings {
            upload_min_size: 256,
            ..Default::default()
        },
    );
    let pool = CommandPool::new(device.clone(), QueueFamily::Graphics);
    let pipeline = graphics_pipeline(&device, DynamicStateMask::VIEWPORT);
    let mut cb = primary(&pool);

    device
        .winsys()
        .fail_buffer_creation_after(0, BufferCreateError::OutOfDeviceMemory);

    cb.begin();
    cb.record_bind_pipeline(&pipeline);
    assert!(cb.upload(&[0; 200], 16).is_some());
    assert!(cb.upload(&[0; 200], 16).is_none());
    assert_eq!(cb.error(), Some(RecordError::OutOfDeviceMemory));

    let recorded = cb.packets().len();
    cb.record_set_dynamic_state(&viewport(32.0));
    cb.record_draw(3, 1, 0, 0);
    assert_eq!(cb.packets().len(), recorded);

    assert_eq!(cb.end(), Err(RecordError::OutOfDeviceMemory));
    assert_eq!(cb.state(), CommandBufferState::Invalid);

    device.winsys().clear_failures();
    cb.reset();
    assert_eq!(cb.state(), CommandBufferState::Initial);
    cb.begin();
    cb.record_bind_pipeline(&pipeline);
    cb.record_draw(3, 1, 0, 0);
    assert!(cb.end().is_ok());
}

/// Barriers after copy engine work wait for it first.
#[test]
fn barriers_wait_for_copies() {
    let device = device(Generation::Gfx10);
    let pool = CommandPool::new(device.clone(), QueueFamily::Graphics);
    let mut cb = primary(&pool);

    cb.begin();
    cb.record_copy_buffer(0x1000, 0x2000, 256);
    cb.record_barrier(&BarrierInfo::default());
    cb.record_barrier(&BarrierInfo::default());
    cb.record_fill_buffer(0x2000, 256, 0);
    cb.end().unwrap();

    let packets = cb.packets();
    assert_eq!(
        count(packets, |packet| matches!(packet, Packet::WaitCopyIdle)),
        2
    );
    assert!(matches!(packets[1], Packet::WaitCopyIdle));
    assert!(matches!(packets.last(), Some(Packet::WaitCopyIdle)));
}

/// A context roll on affected parts re-emits the scissor even though it did not change.
#[test]
fn context_roll_reemits_scissor() {
    for (generation, expected) in [(Generation::Gfx9, 2), (Generation::Gfx10, 1)] {
        let device = device(generation);
        let pool = CommandPool::new(device.clone(), QueueFamily::Graphics);
        let pipeline = graphics_pipeline(
            &device,
            DynamicStateMask::SCISSOR | DynamicStateMask::CULL_MODE,
        );
        let mut cb = primary(&pool);

        cb.begin();
        cb.record_bind_pipeline(&pipeline);
        cb.record_set_dynamic_state(&scissor());
        cb.record_set_dynamic_state(&DynamicStateValue::CullMode(CullMode::Back));
        cb.record_draw(3, 1, 0, 0);
        cb.record_set_dynamic_state(&DynamicStateValue::CullMode(CullMode::Front));
        cb.record_draw(3, 1, 0, 0);
        cb.end().unwrap();

        let scissors = groups(cb.packets())
            .into_iter()
            .filter(|group| *group == RegisterGroup::Scissor)
            .count();
        assert_eq!(scissors, expected, "{generation:?}");
    }
}

/// Push constants land in upload memory and the pipeline is pointed at them.
#[test]
fn push_constants_are_uploaded() {
    let device = device(Generation::Gfx10);
    let pool = CommandPool::new(device.clone(), QueueFamily::Graphics);
    let pipeline = device.create_pipeline(PipelineCreateInfo {
        bind_point: BindPoint::Compute,
        stages: ShaderStages::COMPUTE,
        user_data: vec![UserDataMapping {
            stage: ShaderStage::Compute,
            slot: UserDataSlot::PushConstants,
            register: 4,
        }],
        ..Default::default()
    });
    let mut cb = primary(&pool);

    cb.begin();
    cb.record_bind_pipeline(&pipeline);
    cb.record_push_constants(BindPoint::Compute, 0, &[1, 2, 3, 4]);
    cb.record_dispatch(8, 8, 1);
    cb.record_dispatch(8, 8, 1);
    cb.end().unwrap();

    let addresses: Vec<_> = cb
        .packets()
        .iter()
        .filter_map(|packet| match packet {
            Packet::SetUserData {
                stage: ShaderStage::Compute,
                register: 4,
                address,
            } => Some(*address),
            _ => None,
        })
        .collect();
    assert_eq!(addresses.len(), 1);
    assert_eq!(
        device.winsys().read_address(addresses[0], 4).unwrap(),
        vec![1, 2, 3, 4]
    );
    assert_eq!(cb.stats().dispatches, 2);
}

#[test]
fn pool_recycles_command_buffers() {
    let device = device(Generation::Gfx10);
    let pool = CommandPool::new(device.clone(), QueueFamily::Graphics);

    let mut cb = primary(&pool);
    cb.begin();
    cb.record_copy_buffer(0x1000, 0x2000, 64);
    let created = device.winsys().created_buffers();
    pool.free(cb);
    assert_eq!(pool.cached(), 1);

    let mut cb = primary(&pool);
    assert_eq!(device.winsys().created_buffers(), created);
    assert_eq!(pool.cached(), 0);
    assert!(cb.packets().is_empty());

    cb.begin();
    cb.end().unwrap();
    assert_eq!(cb.state(), CommandBufferState::Executable);
    pool.reset();
    assert_eq!(cb.state(), CommandBufferState::Initial);

    pool.free(cb);
    pool.trim();
    assert_eq!(pool.cached(), 0);
}

#[test]
fn begin_discards_previous_recording() {
    let device = device(Generation::Gfx10);
    let pool = CommandPool::new(device.clone(), QueueFamily::Graphics);
    let pipeline = graphics_pipeline(&device, DynamicStateMask::VIEWPORT);
    let mut cb = primary(&pool);

    for _ in 0..2 {
        cb.begin();
        cb.record_bind_pipeline(&pipeline);
        cb.record_set_dynamic_state(&viewport(64.0));
        cb.record_draw(3, 1, 0, 0);
        cb.end().unwrap();
        assert_eq!(cb.stats().pipeline_binds, 1);
        assert_eq!(cb.stats().draws, 1);
    }

    cb.mark_pending();
    assert_eq!(cb.state(), CommandBufferState::Pending);
    cb.mark_complete();
    assert_eq!(cb.state(), CommandBufferState::Executable);
}

#[test]
#[should_panic]
fn drawing_without_a_pipeline_panics() {
    let device = device(Generation::Gfx10);
    let pool = CommandPool::new(device.clone(), QueueFamily::Graphics);
    let mut cb = primary(&pool);
    cb.begin();
    cb.record_draw(3, 1, 0, 0);
}

#[test]
#[should_panic]
fn ending_with_an_open_label_panics() {
    let device = device(Generation::Gfx10);
    let pool = CommandPool::new(device.clone(), QueueFamily::Graphics);
    let mut cb = primary(&pool);
    cb.begin();
    cb.record_begin_label("frame", [1.0; 4]);
    let _ = cb.end();
}

#[test]
#[should_panic]
fn pending_command_buffers_cannot_begin() {
    let device = device(Generation::Gfx10);
    let pool = CommandPool::new(device.clone(), QueueFamily::Graphics);
    let mut cb = primary(&pool);
    cb.begin();
    cb.end().unwrap();
    cb.mark_pending();
    cb.begin();
}
