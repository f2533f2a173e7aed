//! Cascaded shadow maps for the directional light
//!
//! [`ShadowMapper`] owns one depth texture per cascade. Every frame `update` refits the
//! cascades around the camera, then the maps are filled either directly with
//! [`ShadowMapper::draw`] or through the render graph passes added by
//! [`ShadowMapper::add_passes`].

mod cascade;
mod draw;
mod scope;

pub use cascade::*;
pub use draw::*;
pub use scope::*;

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::config::ShadowConfig;
use crate::render_graph::{
    DepthStencilId, GraphError, LoadStoreAccessOp, PassFlags, PassType, RenderGraph, ResourceName,
};
use crate::scene::{Camera, DirectionalLight, Scene, TerrainShadowCaster};
use bytemuck::{Pod, Zeroable};
use glam::Mat4;

/// Number of cascades
pub const CASCADE_COUNT: usize = 3;

pub const SHADOW_MAP_FORMAT: TextureFormat = TextureFormat::Depth16Unorm;

/// Render graph names of the cascade shadow maps
pub const SHADOW_MAP_NAMES: [ResourceName; CASCADE_COUNT] = [
    ResourceName::new("ShadowMap0"),
    ResourceName::new("ShadowMap1"),
    ResourceName::new("ShadowMap2"),
];

/// Shadow map resolution presets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ShadowQuality {
    Low,
    #[default]
    Medium,
    High,
}

impl ShadowQuality {
    /// Width and height of every cascade's map in texels
    pub fn resolution(&self) -> u32 {
        match self {
            ShadowQuality::Low => 512,
            ShadowQuality::Medium => 1024,
            ShadowQuality::High => 2048,
        }
    }
}

/// Cascade matrices handed to lighting passes through the blackboard
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ShadowCascadeData {
    pub views: [Mat4; CASCADE_COUNT],
    pub projections: [Mat4; CASCADE_COUNT],
}

impl ShadowCascadeData {
    pub fn view_projection(&self, cascade: usize) -> Mat4 {
        self.projections[cascade] * self.views[cascade]
    }
}

/// Per-pass data of a cascade pass
#[derive(Debug, Default)]
pub struct ShadowPassData {
    pub depth: DepthStencilId,
    pub cascade: usize,
    pub resolution: u32,
    pub pipelines: ShadowPipelineCache,
}

/// Renders the directional light's cascaded shadow maps
#[derive(Debug)]
pub struct ShadowMapper {
    cascades: Vec<Cascade>,
    distances: [f32; CASCADE_COUNT],
    resolution: u32,
    cascaded: bool,
    pipelines: ShadowPipelineCache,
}

impl ShadowMapper {
    /// Create the cascade shadow maps.
    ///
    /// The maps start out in [`SHADOW_MAP_READ_STATE`], which is where they rest
    /// between frames.
    pub fn new(backend: &mut dyn RenderBackend, config: &ShadowConfig) -> BackendResult<Self> {
        let resolution = config.quality.resolution();
        let desc = Self::texture_desc(resolution);

        let mut cascades: Vec<Cascade> = Vec::with_capacity(CASCADE_COUNT);
        for _ in 0..CASCADE_COUNT {
            match backend.create_texture(&desc) {
                Ok(texture) => cascades.push(Cascade::new(texture)),
                Err(err) => {
                    for cascade in &cascades {
                        backend.destroy_texture(cascade.texture);
                    }
                    return Err(err);
                }
            }
        }

        let barriers: Vec<ResourceBarrier> = cascades
            .iter()
            .map(|cascade| ResourceBarrier::Transition {
                resource: ResourceHandle::Texture(cascade.texture),
                before: ResourceState::COMMON,
                after: SHADOW_MAP_READ_STATE,
            })
            .collect();
        backend.resource_barriers(&barriers);

        log::info!(
            "Created {} shadow cascades at {}x{} ({:?})",
            CASCADE_COUNT,
            resolution,
            resolution,
            config.quality
        );

        Ok(Self {
            cascades,
            distances: config.cascade_distances,
            resolution,
            cascaded: config.cascaded,
            pipelines: ShadowPipelineCache::new(),
        })
    }

    /// Descriptor of every cascade's shadow map
    pub fn texture_desc(resolution: u32) -> TextureDesc {
        TextureDesc::new_2d(
            resolution,
            resolution,
            SHADOW_MAP_FORMAT,
            TextureUsage::DEPTH_STENCIL | TextureUsage::SHADER_RESOURCE,
        )
        .with_clear_value(ClearValue::DepthStencil {
            depth: 1.0,
            stencil: 0,
        })
    }

    /// Destroy the shadow maps
    pub fn destroy(self, backend: &mut dyn RenderBackend) {
        for cascade in &self.cascades {
            backend.destroy_texture(cascade.texture);
        }
    }

    /// Refit every cascade around the camera.
    ///
    /// Resolution is fixed at creation; a different `config.quality` needs a new mapper.
    pub fn update(&mut self, camera: &Camera, light: &DirectionalLight, config: &ShadowConfig) {
        self.distances = config.cascade_distances;
        self.cascaded = config.cascaded;
        let fit = CascadeFit {
            mode: config.fit_mode,
            stabilize: config.stabilize,
            resolution: self.resolution,
        };

        for i in 0..CASCADE_COUNT {
            let (near, far) = if self.cascaded {
                let near = if i == 0 {
                    camera.near()
                } else {
                    self.camera_near_shadow_cascade_distance(i)
                };
                (near, self.camera_far_shadow_cascade_distance(i))
            } else {
                (camera.near(), camera.far())
            };
            self.cascades[i].fit(camera, light, near, far, fit);
        }
    }

    // Queries

    pub fn cascades(&self) -> &[Cascade] {
        &self.cascades
    }

    /// Panics if `cascade` is out of range.
    pub fn cascade(&self, cascade: usize) -> &Cascade {
        assert!(cascade < CASCADE_COUNT, "Shadow cascade {} out of range", cascade);
        &self.cascades[cascade]
    }

    pub fn view_matrix(&self, cascade: usize) -> Mat4 {
        self.cascade(cascade).view_matrix()
    }

    pub fn projection_matrix(&self, cascade: usize) -> Mat4 {
        self.cascade(cascade).projection_matrix()
    }

    pub fn shadow_texture(&self, cascade: usize) -> TextureHandle {
        self.cascade(cascade).texture()
    }

    pub fn state(&self, cascade: usize) -> CascadeState {
        self.cascade(cascade).state()
    }

    pub fn cascade_camera_view_projection(&self, cascade: usize) -> Mat4 {
        self.cascade(cascade).camera_view_projection()
    }

    pub fn resolution(&self) -> u32 {
        self.resolution
    }

    pub fn is_cascaded(&self) -> bool {
        self.cascaded
    }

    pub fn pipelines(&self) -> &ShadowPipelineCache {
        &self.pipelines
    }

    /// Camera distance where `cascade` ends
    pub fn camera_far_shadow_cascade_distance(&self, cascade: usize) -> f32 {
        assert!(cascade < CASCADE_COUNT, "Shadow cascade {} out of range", cascade);
        self.distances[cascade]
    }

    /// Camera distance where `cascade` starts. Cascade 0 starts at the camera's near
    /// plane, so asking for it panics.
    pub fn camera_near_shadow_cascade_distance(&self, cascade: usize) -> f32 {
        assert!(cascade > 0, "Cascade 0 starts at the camera's near plane");
        assert!(cascade < CASCADE_COUNT, "Shadow cascade {} out of range", cascade);
        self.distances[cascade - 1]
    }

    pub fn cascade_data(&self) -> ShadowCascadeData {
        ShadowCascadeData {
            views: std::array::from_fn(|i| self.cascades[i].view_matrix()),
            projections: std::array::from_fn(|i| self.cascades[i].projection_matrix()),
        }
    }

    // Rendering

    /// Bind cascade `cascade` as the depth target until the returned scope is dropped.
    ///
    /// Panics if `cascade` is out of range or already being rendered.
    pub fn begin_rendering_to_shadow_map<'a>(
        &'a mut self,
        backend: &'a mut dyn RenderBackend,
        cascade: usize,
    ) -> ShadowMapScope<'a> {
        assert!(cascade < CASCADE_COUNT, "Shadow cascade {} out of range", cascade);
        let resolution = self.resolution;
        let target = &mut self.cascades[cascade];
        assert!(
            target.state != CascadeState::Rendering,
            "Shadow cascade {} is already being rendered",
            cascade
        );
        ShadowMapScope::begin_tracked(backend, &mut target.state, target.texture, resolution, cascade)
    }

    /// Render terrain and every shadow caster of `scene` into all cascades.
    pub fn draw(
        &mut self,
        backend: &mut dyn RenderBackend,
        scene: &Scene,
        terrain: Option<&dyn TerrainShadowCaster>,
    ) -> BackendResult<()> {
        let pipelines = self.pipelines.clone();
        for i in 0..CASCADE_COUNT {
            let view_projection = self.cascades[i].view_projection();
            let mut scope = self.begin_rendering_to_shadow_map(backend, i);

            if let Some(terrain) = terrain {
                scope.backend().begin_event(&format!("Shadow Maps (terrain), cascade {}", i));
                let result = terrain.draw_shadow(scope.backend(), i, view_projection);
                scope.backend().end_event();
                result?;
            }

            scope.backend().begin_event(&format!("Shadow Maps (objects), cascade {}", i));
            let result = draw_shadow_casters(scope.backend(), &pipelines, scene, i, view_projection);
            scope.backend().end_event();
            result?;
        }
        Ok(())
    }

    // Render graph

    /// Add one graphics pass per cascade to `graph`.
    ///
    /// The shadow maps are imported under [`SHADOW_MAP_NAMES`] and exported again in
    /// [`SHADOW_MAP_READ_STATE`], so the passes are never culled. The first pass
    /// publishes [`ShadowCascadeData`]; call [`ShadowMapper::publish`] after every
    /// `update` to refresh it.
    pub fn add_passes(&self, graph: &mut RenderGraph) -> Result<(), GraphError> {
        let desc = Self::texture_desc(self.resolution);
        for (i, cascade) in self.cascades.iter().enumerate() {
            graph.import_texture(
                SHADOW_MAP_NAMES[i],
                cascade.texture,
                desc.clone(),
                SHADOW_MAP_READ_STATE,
            )?;
        }

        let cascade_data = self.cascade_data();
        for i in 0..CASCADE_COUNT {
            let resolution = self.resolution;
            let pipelines = self.pipelines.clone();
            graph.add_pass(
                &format!("Shadow Cascade {}", i),
                PassType::Graphics,
                PassFlags::SKIP_AUTO_RENDER_PASS,
                move |data: &mut ShadowPassData, builder| {
                    data.depth = builder.write_depth_stencil(
                        SHADOW_MAP_NAMES[i],
                        LoadStoreAccessOp::CLEAR_PRESERVE,
                        LoadStoreAccessOp::NO_ACCESS_NO_ACCESS,
                    )?;
                    data.cascade = i;
                    data.resolution = resolution;
                    data.pipelines = pipelines;
                    if i == 0 {
                        builder.publish(cascade_data)?;
                    }
                    Ok(())
                },
                |data, ctx| {
                    let target = ctx.depth_stencil(data.depth);
                    let view_projection = ctx
                        .blackboard()
                        .get::<ShadowCascadeData>()
                        .view_projection(data.cascade);
                    let scene = ctx.scene();
                    let mut scope =
                        ShadowMapScope::begin(ctx.backend(), target, data.resolution, data.cascade);
                    draw_shadow_casters(
                        scope.backend(),
                        &data.pipelines,
                        scene,
                        data.cascade,
                        view_projection,
                    )
                },
            )?;
        }

        for name in SHADOW_MAP_NAMES {
            graph.export_texture(name, SHADOW_MAP_READ_STATE)?;
        }
        Ok(())
    }

    /// Refresh the cascade matrices on the graph's blackboard.
    pub fn publish(&self, graph: &mut RenderGraph) {
        graph.blackboard_mut().add(self.cascade_data());
    }
}

#[cfg(all(test, feature = "dummy"))]
mod tests {
    use super::*;
    use crate::backend::dummy::{DummyBackend, RecordedCommand};
    use crate::config::{GraphConfig, PoolConfig};
    use crate::render_graph::ResourcePool;
    use crate::scene::{Mesh, MeshLod, Projection, RenderObject};
    use glam::Vec3;

    fn camera() -> Camera {
        Camera::new(Vec3::new(0.0, 20.0, 0.0), Vec3::new(0.0, 20.0, -100.0))
            .with_projection(Projection::perspective(60.0, 16.0 / 9.0, 0.1, 2000.0))
    }

    fn mapper(backend: &mut DummyBackend, config: &ShadowConfig) -> ShadowMapper {
        let mut mapper = ShadowMapper::new(backend, config).unwrap();
        mapper.update(&camera(), &DirectionalLight::default(), config);
        mapper
    }

    fn scene_with_caster() -> Scene {
        let mut scene = Scene::new(camera(), DirectionalLight::default());
        let mut rock = RenderObject::new("rock").with_mesh(Mesh::new(vec![MeshLod {
            vertex_buffer: BufferHandle(500),
            index_buffer: BufferHandle(501),
            index_count: 36,
        }]));
        for i in 0..CASCADE_COUNT {
            rock = rock.with_material(shadow_material_name(i));
        }
        scene.add_object(rock);
        scene
    }

    struct FailingTerrain;

    impl TerrainShadowCaster for FailingTerrain {
        fn draw_shadow(
            &self,
            _backend: &mut dyn RenderBackend,
            _cascade: usize,
            _light_view_projection: Mat4,
        ) -> BackendResult<()> {
            Err(BackendError::DeviceLost)
        }
    }

    #[test]
    fn test_quality_resolutions() {
        assert_eq!(ShadowQuality::Low.resolution(), 512);
        assert_eq!(ShadowQuality::Medium.resolution(), 1024);
        assert_eq!(ShadowQuality::High.resolution(), 2048);
    }

    #[test]
    fn test_creates_depth_maps() {
        let mut backend = DummyBackend::new();
        let config = ShadowConfig {
            quality: ShadowQuality::Low,
            ..Default::default()
        };
        let mapper = ShadowMapper::new(&mut backend, &config).unwrap();
        assert_eq!(mapper.resolution(), 512);
        assert_eq!(backend.live_texture_count(), CASCADE_COUNT);

        let desc = backend.texture_desc(mapper.shadow_texture(2)).unwrap();
        assert_eq!(desc.format, TextureFormat::Depth16Unorm);
        assert_eq!(desc.width, 512);

        mapper.destroy(&mut backend);
        assert_eq!(backend.live_texture_count(), 0);
    }

    #[test]
    fn test_failed_creation_releases_earlier_maps() {
        let resolution = ShadowQuality::Low.resolution() as u64;
        let mut backend = DummyBackend::new().with_memory_budget(resolution * resolution * 2 * 2);
        let config = ShadowConfig {
            quality: ShadowQuality::Low,
            ..Default::default()
        };
        let err = ShadowMapper::new(&mut backend, &config).unwrap_err();
        assert!(matches!(err, BackendError::OutOfMemory { .. }));
        assert_eq!(backend.live_texture_count(), 0);
    }

    #[test]
    fn test_default_split_distances() {
        let mut backend = DummyBackend::new();
        let mapper = mapper(&mut backend, &ShadowConfig::default());
        let far: Vec<f32> = (0..CASCADE_COUNT)
            .map(|i| mapper.camera_far_shadow_cascade_distance(i))
            .collect();
        assert!(far[0] < far[1] && far[1] < far[2]);
        for i in 1..CASCADE_COUNT {
            assert_eq!(
                mapper.camera_near_shadow_cascade_distance(i),
                mapper.camera_far_shadow_cascade_distance(i - 1)
            );
        }
        assert_eq!(mapper.cascade(0).near(), 0.1);
        assert_eq!(mapper.cascade(2).far(), 2000.0);
    }

    #[test]
    #[should_panic]
    fn test_near_distance_of_first_cascade_panics() {
        let mut backend = DummyBackend::new();
        let mapper = mapper(&mut backend, &ShadowConfig::default());
        mapper.camera_near_shadow_cascade_distance(0);
    }

    #[test]
    #[should_panic]
    fn test_out_of_range_cascade_panics() {
        let mut backend = DummyBackend::new();
        let mapper = mapper(&mut backend, &ShadowConfig::default());
        mapper.view_matrix(CASCADE_COUNT);
    }

    #[test]
    fn test_non_cascaded_covers_full_range() {
        let mut backend = DummyBackend::new();
        let config = ShadowConfig {
            cascaded: false,
            ..Default::default()
        };
        let mapper = mapper(&mut backend, &config);
        for cascade in mapper.cascades() {
            assert_eq!(cascade.near(), 0.1);
            assert_eq!(cascade.far(), 2000.0);
        }
    }

    #[test]
    fn test_cascade_states() {
        let mut backend = DummyBackend::new();
        let config = ShadowConfig::default();
        let mut mapper = ShadowMapper::new(&mut backend, &config).unwrap();
        assert_eq!(mapper.state(0), CascadeState::Idle);

        mapper.update(&camera(), &DirectionalLight::default(), &config);
        assert_eq!(mapper.state(0), CascadeState::Configured);

        let scope = mapper.begin_rendering_to_shadow_map(&mut backend, 0);
        scope.stop();
        assert_eq!(mapper.state(0), CascadeState::Idle);
        assert_eq!(mapper.state(1), CascadeState::Configured);
    }

    #[test]
    #[should_panic(expected = "already being rendered")]
    fn test_nested_begin_panics() {
        let mut backend = DummyBackend::new();
        let mut mapper = mapper(&mut backend, &ShadowConfig::default());
        let scope = mapper.begin_rendering_to_shadow_map(&mut backend, 1);
        std::mem::forget(scope);
        mapper.begin_rendering_to_shadow_map(&mut backend, 1);
    }

    #[test]
    fn test_stop_restores_previous_state() {
        let mut backend = DummyBackend::new();
        let mut mapper = mapper(&mut backend, &ShadowConfig::default());
        backend.set_viewport(Viewport::from_size(1920, 1080));
        backend.set_scissor_rect(ScissorRect::from_size(1920, 1080));

        mapper.begin_rendering_to_shadow_map(&mut backend, 2).stop();

        assert_eq!(backend.viewport(), Viewport::from_size(1920, 1080));
        assert_eq!(backend.scissor_rect(), ScissorRect::from_size(1920, 1080));
        assert_eq!(backend.rasterizer_state(), RasterizerState::default());
    }

    #[test]
    fn test_failed_draw_restores_previous_state() {
        let mut backend = DummyBackend::new();
        let mut mapper = mapper(&mut backend, &ShadowConfig::default());
        backend.set_viewport(Viewport::from_size(800, 600));

        let err = mapper
            .draw(&mut backend, &scene_with_caster(), Some(&FailingTerrain))
            .unwrap_err();
        assert_eq!(err, BackendError::DeviceLost);
        assert_eq!(backend.viewport(), Viewport::from_size(800, 600));
        assert_eq!(backend.rasterizer_state(), RasterizerState::default());
        assert_eq!(mapper.state(0), CascadeState::Idle);
        assert_eq!(
            backend.commands().last(),
            Some(&RecordedCommand::SetRasterizerState(RasterizerState::default()))
        );
    }

    #[test]
    fn test_draw_renders_every_cascade() {
        let mut backend = DummyBackend::new();
        let mut mapper = mapper(&mut backend, &ShadowConfig::default());
        backend.take_commands();

        mapper.draw(&mut backend, &scene_with_caster(), None).unwrap();

        let commands = backend.commands();
        for i in 0..CASCADE_COUNT {
            assert!(commands.contains(&RecordedCommand::ClearDepthStencil(mapper.shadow_texture(i))));
        }
        let draws = commands
            .iter()
            .filter(|command| matches!(command, RecordedCommand::DrawIndexed { .. }))
            .count();
        assert_eq!(draws, CASCADE_COUNT);
        assert_eq!(mapper.pipelines().len(), 1);
    }

    #[test]
    fn test_stabilized_projection_survives_camera_rotation() {
        let mut backend = DummyBackend::new();
        let config = ShadowConfig::default();
        let mut mapper = mapper(&mut backend, &config);
        let before = mapper.projection_matrix(1);

        let mut turned = camera();
        turned.look_at(Vec3::new(100.0, 20.0, 0.0));
        mapper.update(&turned, &DirectionalLight::default(), &config);

        assert!(mapper.projection_matrix(1).abs_diff_eq(before, 1e-5));
    }

    #[test]
    fn test_stabilized_position_moves_in_whole_texels() {
        let mut backend = DummyBackend::new();
        let config = ShadowConfig::default();
        let light = DirectionalLight::default();
        let mut mapper = mapper(&mut backend, &config);

        let mut moved = camera();
        moved.set_position(Vec3::new(0.37, 20.0, 0.0));
        moved.look_at(Vec3::new(0.37, 20.0, -100.0));
        mapper.update(&moved, &light, &config);

        for cascade in mapper.cascades() {
            let basis = texel_basis(&light, cascade.radius(), mapper.resolution());
            let texel = basis.transform_point3(cascade.light_position());
            assert!((texel.x - texel.x.round()).abs() < 1e-2);
            assert!((texel.y - texel.y.round()).abs() < 1e-2);
        }
    }

    #[test]
    fn test_graph_passes_render_and_export_maps() {
        let mut backend = DummyBackend::new();
        let mapper = mapper(&mut backend, &ShadowConfig::default());
        let mut graph = RenderGraph::new(ResourcePool::shared(&PoolConfig::default()));
        mapper.add_passes(&mut graph).unwrap();
        mapper.publish(&mut graph);
        graph.build(&GraphConfig::default()).unwrap();

        assert_eq!(graph.pass_count(), CASCADE_COUNT);
        assert_eq!(graph.levels().len(), 1);
        assert_eq!(
            graph.blackboard().get::<ShadowCascadeData>(),
            &mapper.cascade_data()
        );

        backend.take_commands();
        graph.execute(&mut backend, &scene_with_caster()).unwrap();

        for (i, name) in SHADOW_MAP_NAMES.into_iter().enumerate() {
            assert_eq!(graph.exported_texture(name), Some(mapper.shadow_texture(i)));
        }
        let draws = backend
            .commands()
            .iter()
            .filter(|command| matches!(command, RecordedCommand::DrawIndexed { .. }))
            .count();
        assert_eq!(draws, CASCADE_COUNT);
    }

    #[test]
    fn test_second_publisher_of_cascade_data_conflicts() {
        let mut backend = DummyBackend::new();
        let mapper = mapper(&mut backend, &ShadowConfig::default());
        let mut graph = RenderGraph::new(ResourcePool::shared(&PoolConfig::default()));
        mapper.add_passes(&mut graph).unwrap();

        let err = graph
            .add_pass(
                "Rogue",
                PassType::Compute,
                PassFlags::empty(),
                |_: &mut (), builder| builder.publish(mapper.cascade_data()),
                |_, _| Ok(()),
            )
            .unwrap_err();
        assert!(matches!(err, GraphError::BlackboardConflict { .. }));
    }
}
