//! Scene management
//!
//! The scene is what passes read while recording: a camera, the sun and a flat list of
//! objects whose GPU buffers were created by the asset layer.

mod camera;
mod light;
mod transform;

pub use camera::*;
pub use light::*;
pub use transform::*;

use crate::backend::traits::{BackendResult, BufferHandle, RenderBackend};
use glam::{Mat4, Vec3};
use std::collections::HashSet;

/// One level of detail of a mesh
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeshLod {
    pub vertex_buffer: BufferHandle,
    pub index_buffer: BufferHandle,
    pub index_count: u32,
}

/// A mesh with its levels of detail, finest first
#[derive(Debug, Clone, Default)]
pub struct Mesh {
    pub lods: Vec<MeshLod>,
}

impl Mesh {
    pub fn new(lods: Vec<MeshLod>) -> Self {
        Self { lods }
    }

    pub fn finest_lod(&self) -> Option<&MeshLod> {
        self.lods.first()
    }

    pub fn coarsest_lod(&self) -> Option<&MeshLod> {
        self.lods.last()
    }
}

/// Per-instance transforms of an instanced object
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InstanceData {
    pub buffer: BufferHandle,
    pub count: u32,
}

/// A renderable object in the scene
#[derive(Debug, Clone, Default)]
pub struct RenderObject {
    pub name: String,
    pub meshes: Vec<Mesh>,
    pub transform: Transform,
    /// Names of the materials registered for this object
    pub materials: HashSet<String>,
    pub instances: Option<InstanceData>,
}

impl RenderObject {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_mesh(mut self, mesh: Mesh) -> Self {
        self.meshes.push(mesh);
        self
    }

    pub fn with_material(mut self, material: impl Into<String>) -> Self {
        self.materials.insert(material.into());
        self
    }

    pub fn with_instances(mut self, instances: InstanceData) -> Self {
        self.instances = Some(instances);
        self
    }

    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_position(mut self, position: Vec3) -> Self {
        self.transform.position = position;
        self
    }

    pub fn has_material(&self, material: &str) -> bool {
        self.materials.contains(material)
    }

    pub fn is_instanced(&self) -> bool {
        self.instances.is_some()
    }
}

/// The scene containing all renderable content
#[derive(Debug, Clone, Default)]
pub struct Scene {
    pub camera: Camera,
    pub light: DirectionalLight,
    pub objects: Vec<RenderObject>,
}

impl Scene {
    pub fn new(camera: Camera, light: DirectionalLight) -> Self {
        Self {
            camera,
            light,
            objects: Vec::new(),
        }
    }

    /// Add a render object to the scene
    pub fn add_object(&mut self, object: RenderObject) -> usize {
        let id = self.objects.len();
        self.objects.push(object);
        id
    }
}

/// Terrain that renders its own geometry into a shadow cascade
pub trait TerrainShadowCaster {
    fn draw_shadow(
        &self,
        backend: &mut dyn RenderBackend,
        cascade: usize,
        light_view_projection: Mat4,
    ) -> BackendResult<()>;
}
