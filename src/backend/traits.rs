//! Core backend abstraction traits
//!
//! The render graph and the shadow mapper only talk to the GPU through [`RenderBackend`].

use crate::backend::types::*;
use std::ops::Range;
use thiserror::Error;

/// Backend error type
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    #[error("Failed to create texture: {0}")]
    TextureCreationFailed(String),
    #[error("Failed to create buffer: {0}")]
    BufferCreationFailed(String),
    #[error("Failed to create pipeline: {0}")]
    PipelineCreationFailed(String),
    #[error("Pipeline `{0}` does not exist")]
    PipelineNotFound(String),
    #[error("Out of memory: requested {requested} bytes with {budget} bytes left")]
    OutOfMemory { requested: u64, budget: u64 },
    #[error("Invalid handle: {0}")]
    InvalidHandle(String),
    #[error("Device lost")]
    DeviceLost,
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Handle to a GPU buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle(pub(crate) u64);

/// Handle to a GPU texture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureHandle(pub(crate) u64);

/// Handle to a pipeline-state object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineHandle(pub(crate) u64);

impl BufferHandle {
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl TextureHandle {
    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// A physical resource a barrier applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceHandle {
    Texture(TextureHandle),
    Buffer(BufferHandle),
}

/// One resource-state transition or UAV barrier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceBarrier {
    Transition {
        resource: ResourceHandle,
        before: ResourceState,
        after: ResourceState,
    },
    /// Orders two consecutive unordered-access writes to the same resource
    UnorderedAccess { resource: ResourceHandle },
}

/// Render hardware interface consumed by the render graph
///
/// Object safe so passes can record through `&mut dyn RenderBackend`.
pub trait RenderBackend {
    /// Human readable backend name
    fn name(&self) -> &str;

    // Resource creation

    /// Create a texture
    fn create_texture(&mut self, desc: &TextureDesc) -> BackendResult<TextureHandle>;

    /// Destroy a texture
    fn destroy_texture(&mut self, texture: TextureHandle);

    /// Create a buffer
    fn create_buffer(&mut self, desc: &BufferDesc) -> BackendResult<BufferHandle>;

    /// Destroy a buffer
    fn destroy_buffer(&mut self, buffer: BufferHandle);

    // Pipelines

    /// Create a pipeline-state object, keyed by `desc.label`
    fn create_pipeline(&mut self, desc: &PipelineStateDesc) -> BackendResult<PipelineHandle>;

    /// Bind a pipeline-state object
    fn set_pipeline(&mut self, pipeline: PipelineHandle);

    // State

    /// Submit a batch of barriers
    fn resource_barriers(&mut self, barriers: &[ResourceBarrier]);

    /// Bind render targets and an optional depth-stencil target
    fn set_render_targets(&mut self, color: &[TextureHandle], depth_stencil: Option<TextureHandle>);

    /// Unbind all render targets
    fn unbind_render_targets(&mut self);

    fn clear_render_target(&mut self, texture: TextureHandle, color: [f32; 4]);

    fn clear_depth_stencil(&mut self, texture: TextureHandle, depth: f32, stencil: u8);

    fn clear_buffer_uint(&mut self, buffer: BufferHandle, value: u32);

    fn viewport(&self) -> Viewport;

    fn set_viewport(&mut self, viewport: Viewport);

    fn scissor_rect(&self) -> ScissorRect;

    fn set_scissor_rect(&mut self, rect: ScissorRect);

    fn rasterizer_state(&self) -> RasterizerState;

    fn set_rasterizer_state(&mut self, state: RasterizerState);

    // Commands

    /// Upload root constants for the next draw or dispatch
    fn set_constants(&mut self, slot: u32, data: &[u8]);

    /// Set vertex buffer
    fn set_vertex_buffer(&mut self, slot: u32, buffer: BufferHandle, offset: u64);

    /// Set index buffer
    fn set_index_buffer(&mut self, buffer: BufferHandle, offset: u64, format: IndexFormat);

    /// Draw primitives
    fn draw(&mut self, vertices: Range<u32>, instances: Range<u32>);

    /// Draw indexed primitives
    fn draw_indexed(&mut self, indices: Range<u32>, base_vertex: i32, instances: Range<u32>);

    /// Dispatch compute work
    fn dispatch(&mut self, x: u32, y: u32, z: u32);

    fn copy_texture(&mut self, src: TextureHandle, dst: TextureHandle);

    fn copy_buffer(&mut self, src: BufferHandle, dst: BufferHandle, size: u64);

    // Debug markers

    fn begin_event(&mut self, _label: &str) {}

    fn end_event(&mut self) {}
}
