//! Render graph executor
//!
//! Walks the dependency levels of a built graph once per frame. Every level allocates
//! what it creates, submits one batch of state transitions, records its passes and then
//! hands resources whose last use it contains back to the pool.

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::render_graph::blackboard::Blackboard;
use crate::render_graph::graph::GraphError;
use crate::render_graph::pass::*;
use crate::render_graph::pool::ResourcePool;
use crate::render_graph::registry::*;
use crate::render_graph::resource::*;
use crate::scene::Scene;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// A group of passes without edges between each other
///
/// The sets are the union of the member passes' declarations, plus the resources whose
/// last scheduled use falls into this level (`*_destroys`).
#[derive(Debug, Clone, Default)]
pub struct DependencyLevel {
    index: usize,
    passes: Vec<PassId>,

    pub(crate) texture_creates: BTreeSet<TextureId>,
    pub(crate) texture_reads: BTreeSet<TextureId>,
    pub(crate) texture_writes: BTreeSet<TextureId>,
    pub(crate) texture_destroys: BTreeSet<TextureId>,
    pub(crate) texture_states: BTreeMap<TextureId, ResourceState>,

    pub(crate) buffer_creates: BTreeSet<BufferId>,
    pub(crate) buffer_reads: BTreeSet<BufferId>,
    pub(crate) buffer_writes: BTreeSet<BufferId>,
    pub(crate) buffer_destroys: BTreeSet<BufferId>,
    pub(crate) buffer_states: BTreeMap<BufferId, ResourceState>,
}

impl DependencyLevel {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            ..Default::default()
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn passes(&self) -> &[PassId] {
        &self.passes
    }

    pub fn texture_creates(&self) -> &BTreeSet<TextureId> {
        &self.texture_creates
    }

    pub fn texture_reads(&self) -> &BTreeSet<TextureId> {
        &self.texture_reads
    }

    pub fn texture_writes(&self) -> &BTreeSet<TextureId> {
        &self.texture_writes
    }

    pub fn texture_destroys(&self) -> &BTreeSet<TextureId> {
        &self.texture_destroys
    }

    pub fn buffer_creates(&self) -> &BTreeSet<BufferId> {
        &self.buffer_creates
    }

    pub fn buffer_reads(&self) -> &BTreeSet<BufferId> {
        &self.buffer_reads
    }

    pub fn buffer_writes(&self) -> &BTreeSet<BufferId> {
        &self.buffer_writes
    }

    pub fn buffer_destroys(&self) -> &BTreeSet<BufferId> {
        &self.buffer_destroys
    }

    /// State every member pass needs the texture in
    pub fn texture_state(&self, texture: TextureId) -> Option<ResourceState> {
        self.texture_states.get(&texture).copied()
    }

    pub fn buffer_state(&self, buffer: BufferId) -> Option<ResourceState> {
        self.buffer_states.get(&buffer).copied()
    }

    pub(crate) fn add_pass(&mut self, pass: PassId, declarations: &PassDeclarations) {
        self.passes.push(pass);

        self.texture_creates.extend(&declarations.texture_creates);
        self.texture_reads.extend(&declarations.texture_reads);
        self.texture_writes.extend(&declarations.texture_writes);
        for (&texture, &state) in &declarations.texture_states {
            let entry = self.texture_states.entry(texture).or_insert(state);
            *entry = entry.combine(state);
        }

        self.buffer_creates.extend(&declarations.buffer_creates);
        self.buffer_reads.extend(&declarations.buffer_reads);
        self.buffer_writes.extend(&declarations.buffer_writes);
        for (&buffer, &state) in &declarations.buffer_states {
            let entry = self.buffer_states.entry(buffer).or_insert(state);
            *entry = entry.combine(state);
        }
    }
}

/// Current state of every physical resource touched this frame
///
/// Keyed by the physical handle, so two logical resources sharing pooled memory see each
/// other's transitions.
#[derive(Debug, Default)]
pub struct ResourceStateTracker {
    states: HashMap<ResourceHandle, ResourceState>,
}

impl ResourceStateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// `COMMON` for resources that are not tracked
    pub fn get(&self, resource: ResourceHandle) -> ResourceState {
        self.states
            .get(&resource)
            .copied()
            .unwrap_or(ResourceState::COMMON)
    }

    pub fn set(&mut self, resource: ResourceHandle, state: ResourceState) {
        self.states.insert(resource, state);
    }

    pub fn remove(&mut self, resource: ResourceHandle) -> Option<ResourceState> {
        self.states.remove(&resource)
    }

    pub fn reset(&mut self) {
        self.states.clear();
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

/// Barriers collected for one level and submitted with a single backend call
#[derive(Debug, Default)]
pub struct BarrierBatch {
    barriers: Vec<ResourceBarrier>,
    /// Position of each resource's transition in `barriers`
    transitions: HashMap<ResourceHandle, usize>,
}

impl BarrierBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a state transition. Transitions to the same state are skipped and a second
    /// transition of one resource replaces the first.
    pub fn add_transition(
        &mut self,
        resource: ResourceHandle,
        before: ResourceState,
        after: ResourceState,
    ) {
        if before == after {
            return;
        }

        let barrier = ResourceBarrier::Transition {
            resource,
            before,
            after,
        };
        match self.transitions.get(&resource) {
            Some(&index) => self.barriers[index] = barrier,
            None => {
                self.transitions.insert(resource, self.barriers.len());
                self.barriers.push(barrier);
            }
        }
    }

    pub fn add_unordered_access(&mut self, resource: ResourceHandle) {
        let barrier = ResourceBarrier::UnorderedAccess { resource };
        if !self.barriers.contains(&barrier) {
            self.barriers.push(barrier);
        }
    }

    pub fn barriers(&self) -> &[ResourceBarrier] {
        &self.barriers
    }

    pub fn len(&self) -> usize {
        self.barriers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.barriers.is_empty()
    }

    pub fn submit(self, backend: &mut dyn RenderBackend) {
        if self.barriers.is_empty() {
            return;
        }
        for barrier in &self.barriers {
            log::trace!("Barrier: {:?}", barrier);
        }
        backend.resource_barriers(&self.barriers);
    }
}

/// Physical backing of the logical resources alive at the current point of the frame
#[derive(Debug, Default)]
pub struct PhysicalResources {
    textures: HashMap<TextureId, TextureHandle>,
    buffers: HashMap<BufferId, BufferHandle>,
}

impl PhysicalResources {
    pub fn texture(&self, id: TextureId) -> Option<TextureHandle> {
        self.textures.get(&id).copied()
    }

    pub fn buffer(&self, id: BufferId) -> Option<BufferHandle> {
        self.buffers.get(&id).copied()
    }

    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }

    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    pub(crate) fn insert_texture(&mut self, id: TextureId, handle: TextureHandle) {
        self.textures.insert(id, handle);
    }

    pub(crate) fn insert_buffer(&mut self, id: BufferId, handle: BufferHandle) {
        self.buffers.insert(id, handle);
    }

    pub(crate) fn remove_texture(&mut self, id: TextureId) -> Option<TextureHandle> {
        self.textures.remove(&id)
    }

    pub(crate) fn remove_buffer(&mut self, id: BufferId) -> Option<BufferHandle> {
        self.buffers.remove(&id)
    }
}

/// Everything a pass can reach while recording its commands
pub struct RenderGraphContext<'a> {
    backend: &'a mut dyn RenderBackend,
    scene: &'a Scene,
    blackboard: &'a Blackboard,
    resources: &'a PhysicalResources,
    registry: &'a ResourceRegistry,
    pass_name: &'a str,
}

impl<'a> RenderGraphContext<'a> {
    pub fn backend(&mut self) -> &mut dyn RenderBackend {
        &mut *self.backend
    }

    /// Outlives the borrow of the context, so it can be held across `backend()` calls
    pub fn scene(&self) -> &'a Scene {
        self.scene
    }

    pub fn blackboard(&self) -> &'a Blackboard {
        self.blackboard
    }

    pub fn pass_name(&self) -> &str {
        self.pass_name
    }

    pub fn try_texture(&self, id: TextureId) -> Option<TextureHandle> {
        self.resources.texture(id)
    }

    pub fn try_buffer(&self, id: BufferId) -> Option<BufferHandle> {
        self.resources.buffer(id)
    }

    /// Panics if the texture has no physical backing at this point of the frame.
    pub fn texture(&self, id: TextureId) -> TextureHandle {
        self.try_texture(id).unwrap_or_else(|| {
            panic!(
                "Texture `{}` is not available to pass `{}`",
                self.registry.texture_name(id),
                self.pass_name
            )
        })
    }

    /// Panics if the buffer has no physical backing at this point of the frame.
    pub fn buffer(&self, id: BufferId) -> BufferHandle {
        self.try_buffer(id).unwrap_or_else(|| {
            panic!(
                "Buffer `{}` is not available to pass `{}`",
                self.registry.buffer_name(id),
                self.pass_name
            )
        })
    }

    pub fn render_target(&self, id: RenderTargetId) -> TextureHandle {
        self.texture(id.resource())
    }

    pub fn depth_stencil(&self, id: DepthStencilId) -> TextureHandle {
        self.texture(id.resource())
    }

    pub fn read_only_texture(&self, id: TextureReadOnlyId) -> (TextureHandle, TextureViewDesc) {
        (
            self.texture(id.resource()),
            self.texture_view(id.resource(), id.view_id()),
        )
    }

    pub fn read_write_texture(&self, id: TextureReadWriteId) -> (TextureHandle, TextureViewDesc) {
        (
            self.texture(id.resource()),
            self.texture_view(id.resource(), id.view_id()),
        )
    }

    pub fn read_only_buffer(&self, id: BufferReadOnlyId) -> (BufferHandle, BufferViewDesc) {
        (
            self.buffer(id.resource()),
            self.buffer_view(id.resource(), id.view_id()),
        )
    }

    pub fn read_write_buffer(&self, id: BufferReadWriteId) -> (BufferHandle, BufferViewDesc) {
        (
            self.buffer(id.resource()),
            self.buffer_view(id.resource(), id.view_id()),
        )
    }

    pub fn texture_desc(&self, id: TextureId) -> Option<&TextureDesc> {
        self.registry.texture(id).map(|texture| &texture.desc)
    }

    pub fn buffer_desc(&self, id: BufferId) -> Option<&BufferDesc> {
        self.registry.buffer(id).map(|buffer| &buffer.desc)
    }

    fn texture_view(&self, id: TextureId, view_id: u32) -> TextureViewDesc {
        self.registry
            .texture(id)
            .and_then(|texture| texture.views.get(view_id as usize).copied())
            .unwrap_or_default()
    }

    fn buffer_view(&self, id: BufferId, view_id: u32) -> BufferViewDesc {
        self.registry
            .buffer(id)
            .and_then(|buffer| buffer.views.get(view_id as usize).copied())
            .unwrap_or_default()
    }
}

/// Physical resources an execution hands over to the caller
#[derive(Debug, Default)]
pub(crate) struct FrameOutput {
    pub textures: HashMap<ResourceName, TextureHandle>,
    pub buffers: HashMap<ResourceName, BufferHandle>,
    /// Exported pooled resources, kept active until the next frame
    pub retained: Vec<ResourceHandle>,
}

/// One frame's walk over the levels of a built graph
pub(crate) struct FrameExecutor<'a> {
    registry: &'a ResourceRegistry,
    pass_nodes: &'a [PassNode],
    passes: &'a [Box<dyn PassBase>],
    blackboard: &'a Blackboard,
    scene: &'a Scene,
    pool: &'a mut ResourcePool,
    backend: &'a mut dyn RenderBackend,
    physical: PhysicalResources,
    tracker: ResourceStateTracker,
}

impl<'a> FrameExecutor<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: &'a ResourceRegistry,
        pass_nodes: &'a [PassNode],
        passes: &'a [Box<dyn PassBase>],
        blackboard: &'a Blackboard,
        scene: &'a Scene,
        pool: &'a mut ResourcePool,
        backend: &'a mut dyn RenderBackend,
    ) -> Self {
        Self {
            registry,
            pass_nodes,
            passes,
            blackboard,
            scene,
            pool,
            backend,
            physical: PhysicalResources::default(),
            tracker: ResourceStateTracker::new(),
        }
    }

    pub fn run(mut self, levels: &[DependencyLevel]) -> Result<FrameOutput, GraphError> {
        self.bind_imports();

        for level in levels {
            if let Err(err) = self.run_level(level) {
                log::error!("Render graph level {} failed: {}", level.index(), err);
                self.restore_imports();
                self.release_all();
                return Err(err);
            }
        }

        Ok(self.finish())
    }

    fn bind_imports(&mut self) {
        for (id, texture) in self.registry.textures() {
            if let Some(handle) = texture.imported {
                self.physical.insert_texture(id, handle);
                self.tracker
                    .set(ResourceHandle::Texture(handle), texture.initial_state);
            }
        }
        for (id, buffer) in self.registry.buffers() {
            if let Some(handle) = buffer.imported {
                self.physical.insert_buffer(id, handle);
                self.tracker
                    .set(ResourceHandle::Buffer(handle), buffer.initial_state);
            }
        }
    }

    fn run_level(&mut self, level: &DependencyLevel) -> Result<(), GraphError> {
        self.allocate(level)?;
        self.transition(level)?;
        for &pass in level.passes() {
            self.execute_pass(pass)?;
        }
        self.release(level);
        Ok(())
    }

    fn allocate(&mut self, level: &DependencyLevel) -> Result<(), GraphError> {
        let registry = self.registry;

        for &id in &level.texture_creates {
            let texture = registry
                .texture(id)
                .ok_or(GraphError::InvalidResourceId(id.resource_id()))?;
            let handle = self
                .pool
                .allocate_texture(&mut *self.backend, &texture.desc)
                .map_err(|source| GraphError::Allocation {
                    resource: texture.name.name(),
                    source,
                })?;
            self.physical.insert_texture(id, handle);
            self.tracker
                .set(ResourceHandle::Texture(handle), self.pool.texture_state(handle));
        }

        for &id in &level.buffer_creates {
            let buffer = registry
                .buffer(id)
                .ok_or(GraphError::InvalidResourceId(id.resource_id()))?;
            let handle = self
                .pool
                .allocate_buffer(&mut *self.backend, &buffer.desc)
                .map_err(|source| GraphError::Allocation {
                    resource: buffer.name.name(),
                    source,
                })?;
            self.physical.insert_buffer(id, handle);
            self.tracker
                .set(ResourceHandle::Buffer(handle), self.pool.buffer_state(handle));
        }

        Ok(())
    }

    fn transition(&mut self, level: &DependencyLevel) -> Result<(), GraphError> {
        let mut batch = BarrierBatch::new();

        for (&id, &required) in &level.texture_states {
            let handle = self
                .physical
                .texture(id)
                .ok_or(GraphError::InvalidResourceId(id.resource_id()))?;
            let resource = ResourceHandle::Texture(handle);
            let current = self.tracker.get(resource);
            if current == required {
                if required == ResourceState::UNORDERED_ACCESS
                    && level.texture_writes.contains(&id)
                    && !level.texture_creates.contains(&id)
                {
                    batch.add_unordered_access(resource);
                }
            } else {
                batch.add_transition(resource, current, required);
            }
            self.tracker.set(resource, required);
        }

        for (&id, &required) in &level.buffer_states {
            let handle = self
                .physical
                .buffer(id)
                .ok_or(GraphError::InvalidResourceId(id.resource_id()))?;
            let resource = ResourceHandle::Buffer(handle);
            let current = self.tracker.get(resource);
            if current == required {
                if required == ResourceState::UNORDERED_ACCESS
                    && level.buffer_writes.contains(&id)
                    && !level.buffer_creates.contains(&id)
                {
                    batch.add_unordered_access(resource);
                }
            } else {
                batch.add_transition(resource, current, required);
            }
            self.tracker.set(resource, required);
        }

        if !batch.is_empty() {
            log::trace!("Level {}: {} barriers", level.index(), batch.len());
        }
        batch.submit(&mut *self.backend);
        Ok(())
    }

    fn execute_pass(&mut self, pass: PassId) -> Result<(), GraphError> {
        let pass_nodes = self.pass_nodes;
        let passes = self.passes;
        let node = &pass_nodes[pass.index()];

        self.backend.begin_event(&node.name);
        let auto_render_pass = node.uses_auto_render_pass();
        if auto_render_pass {
            if let Err(err) = self.begin_render_pass(node) {
                self.backend.end_event();
                return Err(err);
            }
        }

        let result = {
            let mut ctx = RenderGraphContext {
                backend: &mut *self.backend,
                scene: self.scene,
                blackboard: self.blackboard,
                resources: &self.physical,
                registry: self.registry,
                pass_name: &node.name,
            };
            passes[pass.index()].execute(&mut ctx)
        };

        if auto_render_pass {
            self.backend.unbind_render_targets();
        }
        self.backend.end_event();

        result.map_err(|source| GraphError::PassExecution {
            pass: node.name.clone(),
            source,
        })
    }

    /// Bind the pass's attachments, apply their clear load ops and cover them with the
    /// viewport and scissor.
    fn begin_render_pass(&mut self, node: &PassNode) -> Result<(), GraphError> {
        let declarations = &node.declarations;

        let mut colors = Vec::with_capacity(declarations.render_targets.len());
        for target in &declarations.render_targets {
            colors.push(self.physical_texture(target.id.resource())?);
        }
        let depth = match declarations.depth_stencil {
            Some(info) => Some(self.physical_texture(info.id.resource())?),
            None => None,
        };

        self.backend.set_render_targets(&colors, depth);

        if !node.flags.contains(PassFlags::LEGACY_RENDER_PASS) {
            for (target, &handle) in declarations.render_targets.iter().zip(&colors) {
                if target.access.load() != LoadAccessOp::Clear {
                    continue;
                }
                let color = match self.clear_value(target.id.resource()) {
                    Some(ClearValue::Color(color)) => color,
                    _ => [0.0; 4],
                };
                self.backend.clear_render_target(handle, color);
            }

            if let (Some(info), Some(handle)) = (declarations.depth_stencil, depth) {
                let clears = info.depth_access.load() == LoadAccessOp::Clear
                    || info.stencil_access.load() == LoadAccessOp::Clear;
                if clears && !info.read_only {
                    let (depth, stencil) = match self.clear_value(info.id.resource()) {
                        Some(ClearValue::DepthStencil { depth, stencil }) => (depth, stencil),
                        _ => (1.0, 0),
                    };
                    self.backend.clear_depth_stencil(handle, depth, stencil);
                }
            }
        }

        let first_attachment = declarations
            .render_targets
            .first()
            .map(|target| target.id.resource())
            .or_else(|| declarations.depth_stencil.map(|info| info.id.resource()));
        if let Some(texture) = first_attachment.and_then(|id| self.registry.texture(id)) {
            let (width, height) = (texture.desc.width, texture.desc.height);
            self.backend.set_viewport(Viewport::from_size(width, height));
            self.backend
                .set_scissor_rect(ScissorRect::from_size(width, height));
        }

        Ok(())
    }

    fn physical_texture(&self, id: TextureId) -> Result<TextureHandle, GraphError> {
        self.physical
            .texture(id)
            .ok_or(GraphError::InvalidResourceId(id.resource_id()))
    }

    fn clear_value(&self, id: TextureId) -> Option<ClearValue> {
        self.registry
            .texture(id)
            .and_then(|texture| texture.desc.clear_value)
    }

    fn release(&mut self, level: &DependencyLevel) {
        for &id in &level.texture_destroys {
            if let Some(handle) = self.physical.remove_texture(id) {
                self.release_texture(handle);
            }
        }
        for &id in &level.buffer_destroys {
            if let Some(handle) = self.physical.remove_buffer(id) {
                self.release_buffer(handle);
            }
        }
    }

    fn release_texture(&mut self, handle: TextureHandle) {
        let state = self
            .tracker
            .remove(ResourceHandle::Texture(handle))
            .unwrap_or(ResourceState::COMMON);
        self.pool.set_texture_state(handle, state);
        self.pool.release_texture(handle);
    }

    fn release_buffer(&mut self, handle: BufferHandle) {
        let state = self
            .tracker
            .remove(ResourceHandle::Buffer(handle))
            .unwrap_or(ResourceState::COMMON);
        self.pool.set_buffer_state(handle, state);
        self.pool.release_buffer(handle);
    }

    /// Return every pooled resource still alive after a failed level.
    fn release_all(&mut self) {
        let registry = self.registry;
        let textures: Vec<(TextureId, TextureHandle)> =
            self.physical.textures.drain().collect();
        for (id, handle) in textures {
            if !registry.texture(id).is_some_and(|texture| texture.is_imported()) {
                self.release_texture(handle);
            }
        }
        let buffers: Vec<(BufferId, BufferHandle)> = self.physical.buffers.drain().collect();
        for (id, handle) in buffers {
            if !registry.buffer(id).is_some_and(|buffer| buffer.is_imported()) {
                self.release_buffer(handle);
            }
        }
    }

    /// Put imports back where the caller expects them after a failed level, so the next
    /// frame's barriers start from the real state.
    fn restore_imports(&mut self) {
        let registry = self.registry;
        let mut batch = BarrierBatch::new();

        for (id, texture) in registry.textures() {
            if !texture.is_imported() {
                continue;
            }
            let target_state = texture.export_state.unwrap_or(texture.initial_state);
            if let Some(handle) = self.physical.texture(id) {
                let resource = ResourceHandle::Texture(handle);
                batch.add_transition(resource, self.tracker.get(resource), target_state);
                self.tracker.set(resource, target_state);
            }
        }
        for (id, buffer) in registry.buffers() {
            if !buffer.is_imported() {
                continue;
            }
            let target_state = buffer.export_state.unwrap_or(buffer.initial_state);
            if let Some(handle) = self.physical.buffer(id) {
                let resource = ResourceHandle::Buffer(handle);
                batch.add_transition(resource, self.tracker.get(resource), target_state);
                self.tracker.set(resource, target_state);
            }
        }

        batch.submit(&mut *self.backend);
    }

    /// Move exported resources into their requested state and put every other import
    /// back into the state it arrived in.
    fn finish(mut self) -> FrameOutput {
        let registry = self.registry;
        let mut batch = BarrierBatch::new();
        let mut output = FrameOutput::default();

        for (id, texture) in registry.textures() {
            let target_state = match (texture.export_state, texture.imported) {
                (Some(state), _) => state,
                (None, Some(_)) => texture.initial_state,
                (None, None) => continue,
            };
            let Some(handle) = self.physical.texture(id) else {
                log::warn!(
                    "Exported texture `{}` is not used by any scheduled pass",
                    texture.name
                );
                continue;
            };
            let resource = ResourceHandle::Texture(handle);
            batch.add_transition(resource, self.tracker.get(resource), target_state);
            self.tracker.set(resource, target_state);

            if texture.is_exported() {
                output.textures.insert(texture.name, handle);
                if !texture.is_imported() {
                    self.pool.set_texture_state(handle, target_state);
                    output.retained.push(resource);
                }
            }
        }

        for (id, buffer) in registry.buffers() {
            let target_state = match (buffer.export_state, buffer.imported) {
                (Some(state), _) => state,
                (None, Some(_)) => buffer.initial_state,
                (None, None) => continue,
            };
            let Some(handle) = self.physical.buffer(id) else {
                log::warn!(
                    "Exported buffer `{}` is not used by any scheduled pass",
                    buffer.name
                );
                continue;
            };
            let resource = ResourceHandle::Buffer(handle);
            batch.add_transition(resource, self.tracker.get(resource), target_state);
            self.tracker.set(resource, target_state);

            if buffer.is_exported() {
                output.buffers.insert(buffer.name, handle);
                if !buffer.is_imported() {
                    self.pool.set_buffer_state(handle, target_state);
                    output.retained.push(resource);
                }
            }
        }

        batch.submit(&mut *self.backend);
        output
    }
}
