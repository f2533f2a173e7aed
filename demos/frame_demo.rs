//! Frame demo
//!
//! Drives a small deferred frame (cascaded shadows, G-buffer, lighting, luminance
//! histogram, tonemap) through the render graph on the headless dummy backend and
//! logs what each frame recorded.
//!
//! ```bash
//! cargo run --example frame_demo -- --frames 16 --quality high
//! RUST_LOG=trace cargo run --example frame_demo -- --graphviz
//! ```

use clap::Parser;
use glam::{Quat, Vec3};

use framegraph_engine::backend::{
    BufferDesc, BufferUsage, DummyBackend, RecordedCommand, RenderBackend, ResourceState,
    TextureDesc, TextureFormat, TextureUsage,
};
use framegraph_engine::render_graph::{
    BufferReadOnlyId, BufferReadWriteId, DepthStencilId, GraphError, LoadStoreAccessOp, PassFlags,
    PassType, ReadAccess, RenderGraph, RenderTargetId, ResourceName, ResourcePool,
    TextureReadOnlyId,
};
use framegraph_engine::scene::{
    Camera, DirectionalLight, InstanceData, Mesh, MeshLod, Projection, RenderObject, Transform,
};
use framegraph_engine::shadow::{
    shadow_material_name, ShadowCascadeData, ShadowQuality, CASCADE_COUNT, SHADOW_MAP_NAMES,
};
use framegraph_engine::{EngineConfig, Scene, ShadowMapper};

const WIDTH: u32 = 1280;
const HEIGHT: u32 = 720;

const GBUFFER: ResourceName = ResourceName::new("GBuffer");
const SCENE_DEPTH: ResourceName = ResourceName::new("SceneDepth");
const HDR: ResourceName = ResourceName::new("Hdr");
const HISTOGRAM: ResourceName = ResourceName::new("LuminanceHistogram");
const BACKBUFFER: ResourceName = ResourceName::new("Backbuffer");

/// Shadow map quality for CLI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
enum CliQuality {
    Low,
    #[default]
    Medium,
    High,
}

impl From<CliQuality> for ShadowQuality {
    fn from(cli: CliQuality) -> Self {
        match cli {
            CliQuality::Low => ShadowQuality::Low,
            CliQuality::Medium => ShadowQuality::Medium,
            CliQuality::High => ShadowQuality::High,
        }
    }
}

#[derive(Debug, Parser)]
#[command(about = "Render a few frames through the render graph on the dummy backend")]
struct Args {
    /// Number of frames to render
    #[arg(long, default_value_t = 8)]
    frames: u32,

    /// Shadow map resolution preset
    #[arg(long, value_enum, default_value_t = CliQuality::default())]
    quality: CliQuality,

    /// Keep passes even when nothing observes their output
    #[arg(long)]
    no_cull: bool,

    /// Print the built graph in graphviz format
    #[arg(long)]
    graphviz: bool,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    if let Err(err) = run(&args) {
        log::error!("Frame demo failed: {}", err);
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = EngineConfig::default();
    config.shadow.quality = args.quality.into();
    config.graph.cull_passes = !args.no_cull;
    config.validate()?;

    let mut backend = DummyBackend::new();
    let mut scene = build_scene(&mut backend)?;
    let mut shadows = ShadowMapper::new(&mut backend, &config.shadow)?;
    shadows.update(&scene.camera, &scene.light, &config.shadow);

    let backbuffer_desc = TextureDesc::new_2d(
        WIDTH,
        HEIGHT,
        TextureFormat::Bgra8Unorm,
        TextureUsage::RENDER_TARGET,
    );
    let backbuffer = backend.create_texture(&backbuffer_desc)?;

    let mut graph = RenderGraph::new(ResourcePool::shared(&config.pool));
    graph.import_texture(BACKBUFFER, backbuffer, backbuffer_desc, ResourceState::PRESENT)?;
    shadows.add_passes(&mut graph)?;
    add_frame_passes(&mut graph)?;
    graph.export_texture(BACKBUFFER, ResourceState::PRESENT)?;
    graph.build(&config.graph)?;

    if args.graphviz {
        println!("{}", graph.dump_graphviz());
    }
    log::info!(
        "Built {} passes into {} levels",
        graph.scheduled_passes().len(),
        graph.levels().len()
    );

    for frame in 0..args.frames {
        let angle = frame as f32 * 0.1;
        scene.camera.set_position(Vec3::new(angle.sin() * 40.0, 15.0, angle.cos() * 40.0));
        shadows.update(&scene.camera, &scene.light, &config.shadow);
        shadows.publish(&mut graph);

        graph.execute(&mut backend, &scene)?;
        graph.pool().lock().tick(&mut backend);

        let commands = backend.take_commands();
        let count = |pred: fn(&RecordedCommand) -> bool| commands.iter().filter(|c| pred(c)).count();
        log::info!(
            "Frame {}: {} draws, {} dispatches, {} barrier batches, {} live textures",
            frame,
            count(|c| matches!(c, RecordedCommand::Draw { .. } | RecordedCommand::DrawIndexed { .. })),
            count(|c| matches!(c, RecordedCommand::Dispatch(..))),
            count(|c| matches!(c, RecordedCommand::Barriers(_))),
            backend.live_texture_count()
        );
    }

    let stats = graph.pool().lock().stats();
    log::info!(
        "Pool: {} created, {} reused, {} evicted",
        stats.created,
        stats.reused,
        stats.evicted
    );

    graph.clear();
    graph.pool().lock().clear(&mut backend);
    shadows.destroy(&mut backend);
    backend.destroy_texture(backbuffer);
    Ok(())
}

fn build_scene(backend: &mut DummyBackend) -> Result<Scene, Box<dyn std::error::Error>> {
    let camera = Camera::new(Vec3::new(0.0, 15.0, 40.0), Vec3::ZERO)
        .with_projection(Projection::perspective(60.0, WIDTH as f32 / HEIGHT as f32, 0.1, 2000.0));
    let mut scene = Scene::new(camera, DirectionalLight::default());

    let geometry = BufferDesc::new(64 * 1024, BufferUsage::VERTEX | BufferUsage::INDEX);
    let mut lod = |index_count: u32| -> Result<MeshLod, Box<dyn std::error::Error>> {
        Ok(MeshLod {
            vertex_buffer: backend.create_buffer(&geometry)?,
            index_buffer: backend.create_buffer(&geometry)?,
            index_count,
        })
    };
    let rock = Mesh::new(vec![lod(2400)?, lod(600)?, lod(120)?]);
    let tree = Mesh::new(vec![lod(900)?]);

    for i in 0..16 {
        let position = Vec3::new((i % 4) as f32 * 12.0 - 18.0, 0.0, (i / 4) as f32 * -30.0);
        let mut object = RenderObject::new(format!("rock {}", i))
            .with_mesh(rock.clone())
            .with_position(position);
        for cascade in 0..CASCADE_COUNT {
            object = object.with_material(shadow_material_name(cascade));
        }
        scene.add_object(object);
    }

    let instances = backend.create_buffer(&BufferDesc::new(256 * 64, BufferUsage::VERTEX))?;
    scene.add_object(
        RenderObject::new("forest")
            .with_mesh(tree)
            .with_transform(Transform {
                position: Vec3::new(0.0, 0.0, -60.0),
                rotation: Quat::from_rotation_y(0.4),
                scale: Vec3::splat(1.5),
            })
            .with_instances(InstanceData {
                buffer: instances,
                count: 256,
            })
            .with_material(shadow_material_name(1))
            .with_material(shadow_material_name(2)),
    );
    Ok(scene)
}

#[derive(Debug, Default)]
struct GBufferData {
    color: RenderTargetId,
    depth: DepthStencilId,
}

#[derive(Debug, Default)]
struct LightingData {
    gbuffer: TextureReadOnlyId,
    shadow_maps: [TextureReadOnlyId; CASCADE_COUNT],
}

#[derive(Debug, Default)]
struct HistogramData {
    hdr: TextureReadOnlyId,
    histogram: BufferReadWriteId,
}

#[derive(Debug, Default)]
struct TonemapData {
    hdr: TextureReadOnlyId,
    histogram: BufferReadOnlyId,
}

fn add_frame_passes(graph: &mut RenderGraph) -> Result<(), GraphError> {
    graph.add_pass(
        "GBuffer",
        PassType::Graphics,
        PassFlags::empty(),
        |data: &mut GBufferData, builder| {
            builder.create_texture(
                GBUFFER,
                TextureDesc::new_2d(
                    WIDTH,
                    HEIGHT,
                    TextureFormat::Rgba8Unorm,
                    TextureUsage::RENDER_TARGET | TextureUsage::SHADER_RESOURCE,
                ),
            )?;
            builder.create_texture(
                SCENE_DEPTH,
                TextureDesc::new_2d(
                    WIDTH,
                    HEIGHT,
                    TextureFormat::Depth32Float,
                    TextureUsage::DEPTH_STENCIL,
                ),
            )?;
            data.color = builder.write_render_target(GBUFFER, LoadStoreAccessOp::CLEAR_PRESERVE)?;
            data.depth = builder.write_depth_stencil(
                SCENE_DEPTH,
                LoadStoreAccessOp::CLEAR_DISCARD,
                LoadStoreAccessOp::NO_ACCESS_NO_ACCESS,
            )?;
            Ok(())
        },
        |data, ctx| {
            log::trace!(
                "GBuffer into {:?} with depth {:?}",
                ctx.render_target(data.color),
                ctx.depth_stencil(data.depth)
            );
            let scene = ctx.scene();
            let backend = ctx.backend();
            for object in &scene.objects {
                for mesh in &object.meshes {
                    let Some(lod) = mesh.finest_lod() else {
                        continue;
                    };
                    backend.set_vertex_buffer(0, lod.vertex_buffer, 0);
                    let instances = object.instances.map_or(1, |instances| instances.count);
                    backend.draw_indexed(0..lod.index_count, 0, 0..instances);
                }
            }
            Ok(())
        },
    )?;

    graph.add_pass(
        "Lighting",
        PassType::Graphics,
        PassFlags::empty(),
        |data: &mut LightingData, builder| {
            data.gbuffer = builder.read_texture(GBUFFER, ReadAccess::PixelShader)?;
            for (slot, name) in data.shadow_maps.iter_mut().zip(SHADOW_MAP_NAMES) {
                *slot = builder.read_texture(name, ReadAccess::PixelShader)?;
            }
            builder.create_texture(
                HDR,
                TextureDesc::new_2d(
                    WIDTH,
                    HEIGHT,
                    TextureFormat::Rgba16Float,
                    TextureUsage::RENDER_TARGET | TextureUsage::SHADER_RESOURCE,
                ),
            )?;
            builder.write_render_target(HDR, LoadStoreAccessOp::DISCARD_PRESERVE)?;
            Ok(())
        },
        |data, ctx| {
            let (gbuffer, _) = ctx.read_only_texture(data.gbuffer);
            let shadow_maps = data.shadow_maps.map(|map| ctx.read_only_texture(map).0);
            log::trace!("Lighting {:?} with shadow maps {:?}", gbuffer, shadow_maps);
            let cascades = ctx.blackboard().get::<ShadowCascadeData>();
            let backend = ctx.backend();
            backend.set_constants(0, bytemuck::bytes_of(cascades));
            backend.draw(0..3, 0..1);
            Ok(())
        },
    )?;

    graph.add_pass(
        "Luminance Histogram",
        PassType::Compute,
        PassFlags::ALLOW_UAV_WRITES,
        |data: &mut HistogramData, builder| {
            data.hdr = builder.read_texture(HDR, ReadAccess::NonPixelShader)?;
            builder.create_buffer(
                HISTOGRAM,
                BufferDesc::new(
                    256 * 4,
                    BufferUsage::UNORDERED_ACCESS | BufferUsage::SHADER_RESOURCE,
                ),
            )?;
            data.histogram = builder.write_buffer(HISTOGRAM)?;
            Ok(())
        },
        |data, ctx| {
            let (hdr, _) = ctx.read_only_texture(data.hdr);
            let (histogram, _) = ctx.read_write_buffer(data.histogram);
            log::trace!("Histogram of {:?} into {:?}", hdr, histogram);
            ctx.backend().dispatch(WIDTH.div_ceil(16), HEIGHT.div_ceil(16), 1);
            Ok(())
        },
    )?;

    graph.add_pass(
        "Tonemap",
        PassType::Graphics,
        PassFlags::empty(),
        |data: &mut TonemapData, builder| {
            data.hdr = builder.read_texture(HDR, ReadAccess::PixelShader)?;
            data.histogram = builder.read_buffer(HISTOGRAM, ReadAccess::PixelShader)?;
            builder.write_render_target(BACKBUFFER, LoadStoreAccessOp::DISCARD_PRESERVE)?;
            Ok(())
        },
        |data, ctx| {
            let (hdr, _) = ctx.read_only_texture(data.hdr);
            let (histogram, _) = ctx.read_only_buffer(data.histogram);
            log::trace!("Tonemap {:?} exposed by {:?}", hdr, histogram);
            ctx.backend().draw(0..3, 0..1);
            Ok(())
        },
    )?;
    Ok(())
}
