//! Shadow caster drawing

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::scene::{RenderObject, Scene};
use crate::shadow::SHADOW_MAP_FORMAT;
use bytemuck::{Pod, Zeroable};
use glam::Mat4;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Root constant slot the per-draw constants are uploaded to
pub const SHADOW_CONSTANTS_SLOT: u32 = 0;

/// Vertex buffer slot carrying per-instance transforms
pub const INSTANCE_BUFFER_SLOT: u32 = 1;

/// Name of the material an object registers to cast shadows into `cascade`
pub fn shadow_material_name(cascade: usize) -> String {
    format!("ShadowMapMaterial {}", cascade)
}

/// Shadow caster pipeline variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShadowPipelineKind {
    NonInstanced,
    Instanced,
}

impl ShadowPipelineKind {
    pub fn of(object: &RenderObject) -> Self {
        if object.is_instanced() {
            ShadowPipelineKind::Instanced
        } else {
            ShadowPipelineKind::NonInstanced
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ShadowPipelineKind::NonInstanced => "ShadowMap",
            ShadowPipelineKind::Instanced => "ShadowMap Instanced",
        }
    }

    fn vertex_shader(&self) -> &'static str {
        match self {
            ShadowPipelineKind::NonInstanced => "shaders/shadow_map.vs",
            ShadowPipelineKind::Instanced => "shaders/shadow_map_instanced.vs",
        }
    }

    pub fn desc(&self) -> PipelineStateDesc {
        PipelineStateDesc {
            label: self.label().to_string(),
            vertex_shader: self.vertex_shader().to_string(),
            pixel_shader: None,
            color_formats: Vec::new(),
            depth_stencil: Some(DepthStencilState {
                format: SHADOW_MAP_FORMAT,
                depth_write_enabled: true,
                depth_compare: CompareFunction::LessEqual,
            }),
            rasterizer: RasterizerState::shadow_map(),
            topology: PrimitiveTopology::TriangleList,
            instanced: *self == ShadowPipelineKind::Instanced,
        }
    }
}

/// Lazily built shadow caster pipelines, shared between the shadow mapper and its
/// render graph passes
#[derive(Debug, Clone, Default)]
pub struct ShadowPipelineCache {
    pipelines: Arc<Mutex<HashMap<ShadowPipelineKind, PipelineHandle>>>,
}

impl ShadowPipelineCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pipeline for `kind`, created on first use
    pub fn get_or_create(
        &self,
        backend: &mut dyn RenderBackend,
        kind: ShadowPipelineKind,
    ) -> BackendResult<PipelineHandle> {
        let mut pipelines = self.pipelines.lock();
        if let Some(&pipeline) = pipelines.get(&kind) {
            return Ok(pipeline);
        }
        let pipeline = backend.create_pipeline(&kind.desc())?;
        log::debug!("Created shadow pipeline `{}`", kind.label());
        pipelines.insert(kind, pipeline);
        Ok(pipeline)
    }

    pub fn contains(&self, kind: ShadowPipelineKind) -> bool {
        self.pipelines.lock().contains_key(&kind)
    }

    pub fn len(&self) -> usize {
        self.pipelines.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipelines.lock().is_empty()
    }
}

/// Constants uploaded before every shadow caster draw
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct ShadowDrawConstants {
    pub light_view_projection: Mat4,
    pub world: Mat4,
    pub lod: u32,
    pub cascade: u32,
    pub _padding: [u32; 2],
}

/// Draw every shadow caster of `scene` into the bound depth target of `cascade`.
///
/// Objects without the cascade's shadow material are skipped. Non-instanced objects
/// draw their coarsest LOD, instanced objects their finest.
pub fn draw_shadow_casters(
    backend: &mut dyn RenderBackend,
    pipelines: &ShadowPipelineCache,
    scene: &Scene,
    cascade: usize,
    light_view_projection: Mat4,
) -> BackendResult<()> {
    let material = shadow_material_name(cascade);
    let mut draws = 0usize;

    for object in scene.objects.iter().filter(|object| object.has_material(&material)) {
        let kind = ShadowPipelineKind::of(object);
        let pipeline = pipelines.get_or_create(backend, kind)?;
        backend.set_pipeline(pipeline);

        for mesh in &object.meshes {
            let (lod_index, lod) = match object.instances {
                Some(_) => (0, mesh.finest_lod()),
                None => (mesh.lods.len().saturating_sub(1), mesh.coarsest_lod()),
            };
            let Some(lod) = lod else {
                continue;
            };

            let constants = ShadowDrawConstants {
                light_view_projection,
                world: object.transform.matrix(),
                lod: lod_index as u32,
                cascade: cascade as u32,
                _padding: [0; 2],
            };
            backend.set_constants(SHADOW_CONSTANTS_SLOT, bytemuck::bytes_of(&constants));
            backend.set_vertex_buffer(0, lod.vertex_buffer, 0);
            backend.set_index_buffer(lod.index_buffer, 0, IndexFormat::Uint32);

            match object.instances {
                Some(instances) => {
                    backend.set_vertex_buffer(INSTANCE_BUFFER_SLOT, instances.buffer, 0);
                    backend.draw_indexed(0..lod.index_count, 0, 0..instances.count);
                }
                None => backend.draw_indexed(0..lod.index_count, 0, 0..1),
            }
            draws += 1;
        }
    }

    log::trace!("Shadow cascade {}: {} draws", cascade, draws);
    Ok(())
}
