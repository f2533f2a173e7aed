//! Dummy GPU backend for testing and development.
//!
//! This backend doesn't perform actual GPU operations. It records every command it
//! receives and tracks bound state, so the render graph and the shadow mapper can be
//! driven and inspected without GPU hardware.

use std::collections::HashMap;
use std::ops::Range;

use crate::backend::traits::*;
use crate::backend::types::*;

/// A command recorded by [`DummyBackend`]
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCommand {
    CreateTexture(TextureHandle),
    DestroyTexture(TextureHandle),
    CreateBuffer(BufferHandle),
    DestroyBuffer(BufferHandle),
    CreatePipeline(String),
    SetPipeline(PipelineHandle),
    Barriers(Vec<ResourceBarrier>),
    SetRenderTargets {
        color: Vec<TextureHandle>,
        depth_stencil: Option<TextureHandle>,
    },
    UnbindRenderTargets,
    ClearRenderTarget(TextureHandle),
    ClearDepthStencil(TextureHandle),
    ClearBuffer(BufferHandle, u32),
    SetViewport(Viewport),
    SetScissorRect(ScissorRect),
    SetRasterizerState(RasterizerState),
    SetConstants { slot: u32, size: usize },
    SetVertexBuffer(u32, BufferHandle),
    SetIndexBuffer(BufferHandle),
    Draw {
        vertices: Range<u32>,
        instances: Range<u32>,
    },
    DrawIndexed {
        indices: Range<u32>,
        instances: Range<u32>,
    },
    Dispatch(u32, u32, u32),
    CopyTexture(TextureHandle, TextureHandle),
    CopyBuffer(BufferHandle, BufferHandle),
    BeginEvent(String),
    EndEvent,
}

/// Dummy GPU backend.
#[derive(Debug)]
pub struct DummyBackend {
    next_handle: u64,
    textures: HashMap<TextureHandle, TextureDesc>,
    buffers: HashMap<BufferHandle, BufferDesc>,
    pipelines: HashMap<String, PipelineHandle>,
    memory_budget: Option<u64>,
    memory_used: u64,
    viewport: Viewport,
    scissor: ScissorRect,
    rasterizer: RasterizerState,
    commands: Vec<RecordedCommand>,
}

impl DummyBackend {
    /// Create a new dummy backend.
    pub fn new() -> Self {
        Self {
            next_handle: 1,
            textures: HashMap::new(),
            buffers: HashMap::new(),
            pipelines: HashMap::new(),
            memory_budget: None,
            memory_used: 0,
            viewport: Viewport::default(),
            scissor: ScissorRect::default(),
            rasterizer: RasterizerState::default(),
            commands: Vec::new(),
        }
    }

    /// Fail resource creation once `bytes` of memory are in use.
    pub fn with_memory_budget(mut self, bytes: u64) -> Self {
        self.memory_budget = Some(bytes);
        self
    }

    /// Every command recorded so far, in submission order.
    pub fn commands(&self) -> &[RecordedCommand] {
        &self.commands
    }

    /// Drain the recorded command list.
    pub fn take_commands(&mut self) -> Vec<RecordedCommand> {
        std::mem::take(&mut self.commands)
    }

    pub fn live_texture_count(&self) -> usize {
        self.textures.len()
    }

    pub fn live_buffer_count(&self) -> usize {
        self.buffers.len()
    }

    /// Pipeline created under `label`
    pub fn pipeline(&self, label: &str) -> Option<PipelineHandle> {
        self.pipelines.get(label).copied()
    }

    pub fn texture_desc(&self, texture: TextureHandle) -> Option<&TextureDesc> {
        self.textures.get(&texture)
    }

    pub fn memory_used(&self) -> u64 {
        self.memory_used
    }

    fn record(&mut self, command: RecordedCommand) {
        log::trace!("DummyBackend: {:?}", command);
        self.commands.push(command);
    }

    fn next_handle(&mut self) -> u64 {
        let handle = self.next_handle;
        self.next_handle += 1;
        handle
    }

    fn reserve_memory(&mut self, requested: u64) -> BackendResult<()> {
        if let Some(budget) = self.memory_budget {
            let left = budget.saturating_sub(self.memory_used);
            if requested > left {
                return Err(BackendError::OutOfMemory {
                    requested,
                    budget: left,
                });
            }
        }
        self.memory_used += requested;
        Ok(())
    }
}

impl Default for DummyBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderBackend for DummyBackend {
    fn name(&self) -> &str {
        "Dummy Backend"
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> BackendResult<TextureHandle> {
        if desc.width == 0 || desc.height == 0 {
            return Err(BackendError::TextureCreationFailed(format!(
                "zero-sized texture {}x{}",
                desc.width, desc.height
            )));
        }
        self.reserve_memory(desc.size_in_bytes())?;
        let handle = TextureHandle(self.next_handle());
        self.textures.insert(handle, desc.clone());
        self.record(RecordedCommand::CreateTexture(handle));
        Ok(handle)
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        if let Some(desc) = self.textures.remove(&texture) {
            self.memory_used = self.memory_used.saturating_sub(desc.size_in_bytes());
            self.record(RecordedCommand::DestroyTexture(texture));
        }
    }

    fn create_buffer(&mut self, desc: &BufferDesc) -> BackendResult<BufferHandle> {
        if desc.size == 0 {
            return Err(BackendError::BufferCreationFailed(
                "zero-sized buffer".to_string(),
            ));
        }
        self.reserve_memory(desc.size)?;
        let handle = BufferHandle(self.next_handle());
        self.buffers.insert(handle, desc.clone());
        self.record(RecordedCommand::CreateBuffer(handle));
        Ok(handle)
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        if let Some(desc) = self.buffers.remove(&buffer) {
            self.memory_used = self.memory_used.saturating_sub(desc.size);
            self.record(RecordedCommand::DestroyBuffer(buffer));
        }
    }

    fn create_pipeline(&mut self, desc: &PipelineStateDesc) -> BackendResult<PipelineHandle> {
        if desc.vertex_shader.is_empty() {
            return Err(BackendError::PipelineCreationFailed(format!(
                "pipeline `{}` has no vertex shader",
                desc.label
            )));
        }
        let handle = PipelineHandle(self.next_handle());
        self.pipelines.insert(desc.label.clone(), handle);
        self.record(RecordedCommand::CreatePipeline(desc.label.clone()));
        Ok(handle)
    }

    fn set_pipeline(&mut self, pipeline: PipelineHandle) {
        self.record(RecordedCommand::SetPipeline(pipeline));
    }

    fn resource_barriers(&mut self, barriers: &[ResourceBarrier]) {
        self.record(RecordedCommand::Barriers(barriers.to_vec()));
    }

    fn set_render_targets(&mut self, color: &[TextureHandle], depth_stencil: Option<TextureHandle>) {
        self.record(RecordedCommand::SetRenderTargets {
            color: color.to_vec(),
            depth_stencil,
        });
    }

    fn unbind_render_targets(&mut self) {
        self.record(RecordedCommand::UnbindRenderTargets);
    }

    fn clear_render_target(&mut self, texture: TextureHandle, _color: [f32; 4]) {
        self.record(RecordedCommand::ClearRenderTarget(texture));
    }

    fn clear_depth_stencil(&mut self, texture: TextureHandle, _depth: f32, _stencil: u8) {
        self.record(RecordedCommand::ClearDepthStencil(texture));
    }

    fn clear_buffer_uint(&mut self, buffer: BufferHandle, value: u32) {
        self.record(RecordedCommand::ClearBuffer(buffer, value));
    }

    fn viewport(&self) -> Viewport {
        self.viewport
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport;
        self.record(RecordedCommand::SetViewport(viewport));
    }

    fn scissor_rect(&self) -> ScissorRect {
        self.scissor
    }

    fn set_scissor_rect(&mut self, rect: ScissorRect) {
        self.scissor = rect;
        self.record(RecordedCommand::SetScissorRect(rect));
    }

    fn rasterizer_state(&self) -> RasterizerState {
        self.rasterizer
    }

    fn set_rasterizer_state(&mut self, state: RasterizerState) {
        self.rasterizer = state;
        self.record(RecordedCommand::SetRasterizerState(state));
    }

    fn set_constants(&mut self, slot: u32, data: &[u8]) {
        self.record(RecordedCommand::SetConstants {
            slot,
            size: data.len(),
        });
    }

    fn set_vertex_buffer(&mut self, slot: u32, buffer: BufferHandle, _offset: u64) {
        self.record(RecordedCommand::SetVertexBuffer(slot, buffer));
    }

    fn set_index_buffer(&mut self, buffer: BufferHandle, _offset: u64, _format: IndexFormat) {
        self.record(RecordedCommand::SetIndexBuffer(buffer));
    }

    fn draw(&mut self, vertices: Range<u32>, instances: Range<u32>) {
        self.record(RecordedCommand::Draw {
            vertices,
            instances,
        });
    }

    fn draw_indexed(&mut self, indices: Range<u32>, _base_vertex: i32, instances: Range<u32>) {
        self.record(RecordedCommand::DrawIndexed { indices, instances });
    }

    fn dispatch(&mut self, x: u32, y: u32, z: u32) {
        self.record(RecordedCommand::Dispatch(x, y, z));
    }

    fn copy_texture(&mut self, src: TextureHandle, dst: TextureHandle) {
        self.record(RecordedCommand::CopyTexture(src, dst));
    }

    fn copy_buffer(&mut self, src: BufferHandle, dst: BufferHandle, _size: u64) {
        self.record(RecordedCommand::CopyBuffer(src, dst));
    }

    fn begin_event(&mut self, label: &str) {
        self.record(RecordedCommand::BeginEvent(label.to_string()));
    }

    fn end_event(&mut self) {
        self.record(RecordedCommand::EndEvent);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dummy_backend_creation() {
        let backend = DummyBackend::new();
        assert_eq!(backend.name(), "Dummy Backend");
        assert!(backend.commands().is_empty());
    }

    #[test]
    fn test_dummy_create_and_destroy_texture() {
        let mut backend = DummyBackend::new();
        let desc = TextureDesc::new_2d(64, 64, TextureFormat::Rgba8Unorm, TextureUsage::RENDER_TARGET);
        let texture = backend.create_texture(&desc).unwrap();
        assert_eq!(backend.live_texture_count(), 1);
        assert_eq!(backend.memory_used(), 64 * 64 * 4);

        backend.destroy_texture(texture);
        assert_eq!(backend.live_texture_count(), 0);
        assert_eq!(backend.memory_used(), 0);
    }

    #[test]
    fn test_dummy_memory_budget() {
        let mut backend = DummyBackend::new().with_memory_budget(1024);
        assert!(backend.create_buffer(&BufferDesc::new(1000, BufferUsage::VERTEX)).is_ok());
        let err = backend
            .create_buffer(&BufferDesc::new(100, BufferUsage::VERTEX))
            .unwrap_err();
        assert_eq!(
            err,
            BackendError::OutOfMemory {
                requested: 100,
                budget: 24
            }
        );
    }

    #[test]
    fn test_dummy_tracks_bound_state() {
        let mut backend = DummyBackend::new();
        backend.set_viewport(Viewport::from_size(320, 240));
        backend.set_scissor_rect(ScissorRect::from_size(320, 240));
        backend.set_rasterizer_state(RasterizerState::shadow_map());

        assert_eq!(backend.viewport(), Viewport::from_size(320, 240));
        assert_eq!(backend.scissor_rect(), ScissorRect::from_size(320, 240));
        assert_eq!(backend.rasterizer_state(), RasterizerState::shadow_map());
        assert_eq!(backend.take_commands().len(), 3);
        assert!(backend.commands().is_empty());
    }

    #[test]
    fn test_dummy_pipeline_lookup() {
        let mut backend = DummyBackend::new();
        assert!(backend.pipeline("Shadow").is_none());
        let mut desc = PipelineStateDesc {
            label: "Shadow".to_string(),
            vertex_shader: "shadow.vs".to_string(),
            pixel_shader: None,
            color_formats: Vec::new(),
            depth_stencil: None,
            rasterizer: RasterizerState::default(),
            topology: PrimitiveTopology::TriangleList,
            instanced: false,
        };
        let handle = backend.create_pipeline(&desc).unwrap();
        assert_eq!(backend.pipeline("Shadow"), Some(handle));

        desc.label = "Broken".to_string();
        desc.vertex_shader.clear();
        assert!(matches!(
            backend.create_pipeline(&desc),
            Err(BackendError::PipelineCreationFailed(_))
        ));
        assert!(backend.pipeline("Broken").is_none());
    }
}
