//! Render graph definition and compilation
//!
//! Passes are added with a setup closure that declares resource usage through a
//! [`RenderGraphBuilder`] and an execute closure that records GPU work. [`RenderGraph::build`]
//! turns the declarations into an ordered list of dependency levels; [`RenderGraph::execute`]
//! runs them once per frame.

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::config::GraphConfig;
use crate::render_graph::blackboard::Blackboard;
use crate::render_graph::builder::RenderGraphBuilder;
use crate::render_graph::executor::*;
use crate::render_graph::pass::*;
use crate::render_graph::pool::{ResourcePool, SharedResourcePool};
use crate::render_graph::registry::*;
use crate::render_graph::resource::*;
use crate::scene::Scene;
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur during graph construction or execution.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    #[error("Pass `{pass}` creates `{resource}`, which already exists")]
    DuplicateResource { pass: String, resource: &'static str },

    #[error("Pass `{pass}` uses `{resource}` before it is created or imported")]
    ReadBeforeCreate { pass: String, resource: &'static str },

    #[error("Resource `{resource}` is not declared in the graph")]
    UnresolvedResource { resource: &'static str },

    #[error("Pass `{pass}` writes read-only import `{resource}`")]
    WriteToReadOnlyImport { pass: String, resource: &'static str },

    #[error("Pass `{pass}` writes `{resource}` through an unordered-access view without ALLOW_UAV_WRITES")]
    UavWriteNotAllowed { pass: String, resource: &'static str },

    #[error("Resource id {0:?} does not belong to this graph")]
    InvalidResourceId(ResourceId),

    #[error("Blackboard type `{type_name}` is published by both `{first}` and `{second}`")]
    BlackboardConflict {
        type_name: &'static str,
        first: String,
        second: String,
    },

    #[error(
        "Cyclic dependency between passes [{}] through resources [{}]",
        .passes.join(" -> "),
        .resources.join(", ")
    )]
    CyclicDependency {
        passes: Vec<String>,
        resources: Vec<String>,
    },

    #[error("Render graph must be built before it is executed")]
    NotBuilt,

    #[error("Failed to allocate `{resource}`: {source}")]
    Allocation {
        resource: &'static str,
        source: BackendError,
    },

    #[error("Pass `{pass}` failed: {source}")]
    PassExecution { pass: String, source: BackendError },
}

/// Name used in errors raised by graph-level imports
const IMPORT_SCOPE: &str = "<import>";

/// The main render graph structure
pub struct RenderGraph {
    pool: SharedResourcePool,
    registry: ResourceRegistry,
    blackboard: Blackboard,
    /// Pass that published each blackboard type
    producers: HashMap<TypeId, (PassId, String)>,

    passes: Vec<Box<dyn PassBase>>,
    pass_nodes: Vec<PassNode>,

    /// Successors of every pass, indexed by pass id
    adjacency: Vec<Vec<PassId>>,
    sorted: Vec<PassId>,
    scheduled: Vec<PassId>,
    levels: Vec<DependencyLevel>,
    built: bool,

    exported_textures: HashMap<ResourceName, TextureHandle>,
    exported_buffers: HashMap<ResourceName, BufferHandle>,
    /// Exported pooled resources handed out by the last frame
    retained: Vec<ResourceHandle>,
}

impl RenderGraph {
    pub fn new(pool: SharedResourcePool) -> Self {
        Self {
            pool,
            registry: ResourceRegistry::new(),
            blackboard: Blackboard::new(),
            producers: HashMap::new(),
            passes: Vec::new(),
            pass_nodes: Vec::new(),
            adjacency: Vec::new(),
            sorted: Vec::new(),
            scheduled: Vec::new(),
            levels: Vec::new(),
            built: false,
            exported_textures: HashMap::new(),
            exported_buffers: HashMap::new(),
            retained: Vec::new(),
        }
    }

    // Import / export

    /// Adopt an externally owned texture. The graph never allocates or frees it.
    pub fn import_texture(
        &mut self,
        name: ResourceName,
        handle: TextureHandle,
        desc: TextureDesc,
        initial_state: ResourceState,
    ) -> Result<TextureId, GraphError> {
        self.import_texture_impl(name, handle, desc, initial_state, false)
    }

    /// Import a texture that passes may only read.
    pub fn import_texture_read_only(
        &mut self,
        name: ResourceName,
        handle: TextureHandle,
        desc: TextureDesc,
        initial_state: ResourceState,
    ) -> Result<TextureId, GraphError> {
        self.import_texture_impl(name, handle, desc, initial_state, true)
    }

    pub fn import_buffer(
        &mut self,
        name: ResourceName,
        handle: BufferHandle,
        desc: BufferDesc,
        initial_state: ResourceState,
    ) -> Result<BufferId, GraphError> {
        self.import_buffer_impl(name, handle, desc, initial_state, false)
    }

    pub fn import_buffer_read_only(
        &mut self,
        name: ResourceName,
        handle: BufferHandle,
        desc: BufferDesc,
        initial_state: ResourceState,
    ) -> Result<BufferId, GraphError> {
        self.import_buffer_impl(name, handle, desc, initial_state, true)
    }

    fn import_texture_impl(
        &mut self,
        name: ResourceName,
        handle: TextureHandle,
        desc: TextureDesc,
        initial_state: ResourceState,
        read_only: bool,
    ) -> Result<TextureId, GraphError> {
        self.check_unique(name)?;
        let mut texture = TextureResource::new(name, desc);
        texture.imported = Some(handle);
        texture.read_only = read_only;
        texture.initial_state = initial_state;
        let id = self.registry.add_texture(texture);
        self.invalidate();
        Ok(id)
    }

    fn import_buffer_impl(
        &mut self,
        name: ResourceName,
        handle: BufferHandle,
        desc: BufferDesc,
        initial_state: ResourceState,
        read_only: bool,
    ) -> Result<BufferId, GraphError> {
        self.check_unique(name)?;
        let mut buffer = BufferResource::new(name, desc);
        buffer.imported = Some(handle);
        buffer.read_only = read_only;
        buffer.initial_state = initial_state;
        let id = self.registry.add_buffer(buffer);
        self.invalidate();
        Ok(id)
    }

    /// Point an existing import at a new physical texture, e.g. this frame's back buffer.
    /// Does not require a rebuild.
    pub fn set_imported_texture(
        &mut self,
        name: ResourceName,
        handle: TextureHandle,
    ) -> Result<(), GraphError> {
        let texture = self
            .registry
            .texture_id(name)
            .and_then(|id| self.registry.texture_mut(id))
            .filter(|texture| texture.is_imported())
            .ok_or(GraphError::UnresolvedResource {
                resource: name.name(),
            })?;
        texture.imported = Some(handle);
        Ok(())
    }

    pub fn set_imported_buffer(
        &mut self,
        name: ResourceName,
        handle: BufferHandle,
    ) -> Result<(), GraphError> {
        let buffer = self
            .registry
            .buffer_id(name)
            .and_then(|id| self.registry.buffer_mut(id))
            .filter(|buffer| buffer.is_imported())
            .ok_or(GraphError::UnresolvedResource {
                resource: name.name(),
            })?;
        buffer.imported = Some(handle);
        Ok(())
    }

    /// Hand the texture's physical backing to the caller once the frame finishes,
    /// transitioned to `final_state`. See [`RenderGraph::exported_texture`].
    pub fn export_texture(
        &mut self,
        name: ResourceName,
        final_state: ResourceState,
    ) -> Result<(), GraphError> {
        let texture = self
            .registry
            .texture_id(name)
            .and_then(|id| self.registry.texture_mut(id))
            .ok_or(GraphError::UnresolvedResource {
                resource: name.name(),
            })?;
        texture.export_state = Some(final_state);
        self.invalidate();
        Ok(())
    }

    pub fn export_buffer(
        &mut self,
        name: ResourceName,
        final_state: ResourceState,
    ) -> Result<(), GraphError> {
        let buffer = self
            .registry
            .buffer_id(name)
            .and_then(|id| self.registry.buffer_mut(id))
            .ok_or(GraphError::UnresolvedResource {
                resource: name.name(),
            })?;
        buffer.export_state = Some(final_state);
        self.invalidate();
        Ok(())
    }

    /// Physical texture exported by the last executed frame.
    ///
    /// Pooled exports stay reserved for the caller until the next `execute`.
    pub fn exported_texture(&self, name: ResourceName) -> Option<TextureHandle> {
        self.exported_textures.get(&name).copied()
    }

    pub fn exported_buffer(&self, name: ResourceName) -> Option<BufferHandle> {
        self.exported_buffers.get(&name).copied()
    }

    // Passes

    /// Add a pass to the graph.
    ///
    /// `setup` runs immediately and declares what the pass uses. If it fails, every
    /// resource it created is removed again and the graph is left as it was.
    pub fn add_pass<D, S, E>(
        &mut self,
        name: &str,
        pass_type: PassType,
        flags: PassFlags,
        setup: S,
        execute: E,
    ) -> Result<PassHandle<D>, GraphError>
    where
        D: Default + Send + Sync + 'static,
        S: FnOnce(&mut D, &mut RenderGraphBuilder<'_>) -> Result<(), GraphError>,
        E: Fn(&D, &mut RenderGraphContext<'_>) -> BackendResult<()> + Send + Sync + 'static,
    {
        let id = PassId(self.pass_nodes.len() as u32);
        let checkpoint = self.registry.checkpoint();
        let mut data = D::default();
        let mut declarations = PassDeclarations::default();
        let mut published = Vec::new();

        let result = {
            let mut builder = RenderGraphBuilder {
                registry: &mut self.registry,
                blackboard: &self.blackboard,
                producers: &self.producers,
                declarations: &mut declarations,
                published: &mut published,
                pass_id: id,
                pass_name: name,
                flags,
            };
            setup(&mut data, &mut builder)
        };

        if let Err(err) = result {
            log::error!("Setup of pass `{}` failed: {}", name, err);
            self.registry.rollback(checkpoint);
            return Err(err);
        }

        for (&texture, &state) in &declarations.texture_exports {
            if let Some(texture) = self.registry.texture_mut(texture) {
                texture.export_state = Some(state);
            }
        }
        for (&buffer, &state) in &declarations.buffer_exports {
            if let Some(buffer) = self.registry.buffer_mut(buffer) {
                buffer.export_state = Some(state);
            }
        }
        for publish in published {
            self.producers
                .insert(publish.type_id, (id, name.to_string()));
            (publish.apply)(&mut self.blackboard);
        }

        self.passes
            .push(Box::new(RenderGraphPass::new(data, Box::new(execute))));
        self.pass_nodes.push(PassNode {
            id,
            name: name.to_string(),
            pass_type,
            flags,
            declarations,
            culled: false,
        });
        self.invalidate();

        log::debug!("Added {:?} pass `{}`", pass_type, name);
        Ok(PassHandle::new(id))
    }

    /// Data produced by a pass's setup
    pub fn pass_data<D: Send + Sync + 'static>(&self, handle: PassHandle<D>) -> Option<&D> {
        self.passes
            .get(handle.id().index())?
            .as_any()
            .downcast_ref::<RenderGraphPass<D>>()
            .map(|pass| pass.data())
    }

    // Build

    /// Order the passes, cull the ones nothing observes, group the rest into dependency
    /// levels and compute resource lifetimes.
    pub fn build(&mut self, config: &GraphConfig) -> Result<(), GraphError> {
        self.invalidate();
        self.registry.reset_lifetimes();
        for node in &mut self.pass_nodes {
            node.culled = false;
            node.declarations.texture_destroys.clear();
            node.declarations.buffer_destroys.clear();
        }

        self.build_adjacency();
        let sorted = self.topological_sort()?;
        if config.cull_passes {
            self.cull_passes();
        }
        self.build_levels(&sorted);
        self.compute_lifetimes();
        self.sorted = sorted;
        self.built = true;

        let culled = self.pass_nodes.iter().filter(|node| node.culled).count();
        log::info!(
            "Render graph built: {} passes, {} culled, {} levels",
            self.pass_nodes.len(),
            culled,
            self.levels.len()
        );
        for level in &self.levels {
            let names: Vec<&str> = level
                .passes()
                .iter()
                .map(|pass| self.pass_nodes[pass.index()].name.as_str())
                .collect();
            if config.log_schedule {
                log::info!("Level {}: {}", level.index(), names.join(", "));
            } else {
                log::debug!("Level {}: {}", level.index(), names.join(", "));
            }
        }
        Ok(())
    }

    fn build_adjacency(&mut self) {
        let count = self.pass_nodes.len();
        self.adjacency = vec![Vec::new(); count];
        for (producer, producer_node) in self.pass_nodes.iter().enumerate() {
            for (consumer, consumer_node) in self.pass_nodes.iter().enumerate() {
                if producer == consumer {
                    continue;
                }
                if depends_on(
                    &consumer_node.declarations,
                    &producer_node.declarations,
                    producer < consumer,
                ) {
                    self.adjacency[producer].push(PassId(consumer as u32));
                }
            }
        }
    }

    /// Depth-first sort; the reversed post-order lists every pass before its successors.
    fn topological_sort(&self) -> Result<Vec<PassId>, GraphError> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            InProgress,
            Done,
        }

        let count = self.pass_nodes.len();
        let mut marks = vec![Mark::Unvisited; count];
        let mut post_order = Vec::with_capacity(count);
        // (pass, index of the next successor to visit)
        let mut stack: Vec<(usize, usize)> = Vec::new();

        for root in 0..count {
            if marks[root] != Mark::Unvisited {
                continue;
            }
            marks[root] = Mark::InProgress;
            stack.push((root, 0));

            while let Some(top) = stack.last_mut() {
                let node = top.0;
                match self.adjacency[node].get(top.1) {
                    Some(&successor) => {
                        top.1 += 1;
                        let successor = successor.index();
                        match marks[successor] {
                            Mark::Unvisited => {
                                marks[successor] = Mark::InProgress;
                                stack.push((successor, 0));
                            }
                            Mark::InProgress => {
                                let start = stack
                                    .iter()
                                    .position(|&(pass, _)| pass == successor)
                                    .unwrap_or(0);
                                let cycle: Vec<usize> =
                                    stack[start..].iter().map(|&(pass, _)| pass).collect();
                                return Err(self.cycle_error(&cycle));
                            }
                            Mark::Done => {}
                        }
                    }
                    None => {
                        marks[node] = Mark::Done;
                        post_order.push(PassId(node as u32));
                        stack.pop();
                    }
                }
            }
        }

        post_order.reverse();
        Ok(post_order)
    }

    fn cycle_error(&self, cycle: &[usize]) -> GraphError {
        let mut passes: Vec<String> = cycle
            .iter()
            .map(|&pass| self.pass_nodes[pass].name.clone())
            .collect();
        if let Some(first) = passes.first().cloned() {
            passes.push(first);
        }

        let mut resources: Vec<String> = Vec::new();
        for (i, &producer) in cycle.iter().enumerate() {
            let consumer = cycle[(i + 1) % cycle.len()];
            for name in self.linking_resources(producer, consumer) {
                if !resources.contains(&name) {
                    resources.push(name);
                }
            }
        }

        GraphError::CyclicDependency { passes, resources }
    }

    /// Resources through which `consumer` depends on `producer`
    fn linking_resources(&self, producer: usize, consumer: usize) -> Vec<String> {
        let producer = &self.pass_nodes[producer].declarations;
        let consumer = &self.pass_nodes[consumer].declarations;
        let mut names = Vec::new();
        for &texture in consumer.texture_reads.iter().chain(&consumer.texture_writes) {
            if producer.writes_texture(texture) {
                names.push(self.registry.texture_name(texture).to_string());
            }
        }
        for &buffer in consumer.buffer_reads.iter().chain(&consumer.buffer_writes) {
            if producer.writes_buffer(buffer) {
                names.push(self.registry.buffer_name(buffer).to_string());
            }
        }
        names
    }

    /// A pass survives if it is a cull root or something a surviving pass depends on.
    fn cull_passes(&mut self) {
        let count = self.pass_nodes.len();
        let mut predecessors = vec![Vec::new(); count];
        for (producer, successors) in self.adjacency.iter().enumerate() {
            for successor in successors {
                predecessors[successor.index()].push(producer);
            }
        }

        let mut live = vec![false; count];
        let mut stack: Vec<usize> = (0..count).filter(|&pass| self.is_cull_root(pass)).collect();
        for &pass in &stack {
            live[pass] = true;
        }
        while let Some(pass) = stack.pop() {
            for &producer in &predecessors[pass] {
                if !live[producer] {
                    live[producer] = true;
                    stack.push(producer);
                }
            }
        }

        for (node, live) in self.pass_nodes.iter_mut().zip(live) {
            node.culled = !live;
            if node.culled {
                log::debug!("Culled pass `{}`", node.name);
            }
        }
    }

    /// Passes whose effects are visible outside the graph
    fn is_cull_root(&self, pass: usize) -> bool {
        let node = &self.pass_nodes[pass];
        if !node.can_be_culled() || node.declarations.exports {
            return true;
        }

        let declarations = &node.declarations;
        let external_texture = declarations
            .texture_writes
            .iter()
            .chain(&declarations.texture_creates)
            .any(|&texture| {
                self.registry
                    .texture(texture)
                    .is_some_and(|texture| texture.is_imported() || texture.is_exported())
            });
        let external_buffer = declarations
            .buffer_writes
            .iter()
            .chain(&declarations.buffer_creates)
            .any(|&buffer| {
                self.registry
                    .buffer(buffer)
                    .is_some_and(|buffer| buffer.is_imported() || buffer.is_exported())
            });
        external_texture || external_buffer
    }

    /// Level of a pass is the length of the longest path reaching it.
    fn build_levels(&mut self, sorted: &[PassId]) {
        let mut depth = vec![0usize; self.pass_nodes.len()];
        let mut level_count = 0;

        for &pass in sorted {
            if self.pass_nodes[pass.index()].culled {
                continue;
            }
            let next = depth[pass.index()] + 1;
            level_count = level_count.max(next);
            for successor in &self.adjacency[pass.index()] {
                if !self.pass_nodes[successor.index()].culled {
                    depth[successor.index()] = depth[successor.index()].max(next);
                }
            }
        }

        let mut levels: Vec<DependencyLevel> = (0..level_count).map(DependencyLevel::new).collect();
        for &pass in sorted {
            let node = &self.pass_nodes[pass.index()];
            if !node.culled {
                levels[depth[pass.index()]].add_pass(pass, &node.declarations);
            }
        }

        self.scheduled = levels
            .iter()
            .flat_map(|level| level.passes().iter().copied())
            .collect();
        self.levels = levels;
    }

    fn compute_lifetimes(&mut self) {
        let mut position = 0;
        for level in &self.levels {
            for &pass in level.passes() {
                let declarations = &self.pass_nodes[pass.index()].declarations;
                let textures = declarations
                    .texture_creates
                    .iter()
                    .chain(&declarations.texture_reads)
                    .chain(&declarations.texture_writes);
                for &texture in textures {
                    if let Some(texture) = self.registry.texture_mut(texture) {
                        extend_lifetime(&mut texture.lifetime, position, level.index());
                    }
                }
                let buffers = declarations
                    .buffer_creates
                    .iter()
                    .chain(&declarations.buffer_reads)
                    .chain(&declarations.buffer_writes);
                for &buffer in buffers {
                    if let Some(buffer) = self.registry.buffer_mut(buffer) {
                        extend_lifetime(&mut buffer.lifetime, position, level.index());
                    }
                }
                position += 1;
            }
        }

        for (id, texture) in self.registry.textures() {
            if texture.is_imported() {
                continue;
            }
            match texture.lifetime {
                Some(_) if texture.is_exported() => {}
                Some(lifetime) => {
                    let last = self.scheduled[lifetime.last_pass];
                    self.pass_nodes[last.index()]
                        .declarations
                        .texture_destroys
                        .insert(id);
                    self.levels[lifetime.last_level].texture_destroys.insert(id);
                }
                None if texture.is_exported() => log::warn!(
                    "Exported texture `{}` is not used by any scheduled pass",
                    texture.name
                ),
                None => {}
            }
        }

        for (id, buffer) in self.registry.buffers() {
            if buffer.is_imported() {
                continue;
            }
            match buffer.lifetime {
                Some(_) if buffer.is_exported() => {}
                Some(lifetime) => {
                    let last = self.scheduled[lifetime.last_pass];
                    self.pass_nodes[last.index()]
                        .declarations
                        .buffer_destroys
                        .insert(id);
                    self.levels[lifetime.last_level].buffer_destroys.insert(id);
                }
                None if buffer.is_exported() => log::warn!(
                    "Exported buffer `{}` is not used by any scheduled pass",
                    buffer.name
                ),
                None => {}
            }
        }
    }

    // Execute

    /// Run every scheduled pass once.
    pub fn execute(
        &mut self,
        backend: &mut dyn RenderBackend,
        scene: &Scene,
    ) -> Result<(), GraphError> {
        if !self.built {
            return Err(GraphError::NotBuilt);
        }

        let pool = Arc::clone(&self.pool);
        let mut pool = pool.lock();
        release_retained(&mut self.retained, &mut pool);
        self.exported_textures.clear();
        self.exported_buffers.clear();

        let output = FrameExecutor::new(
            &self.registry,
            &self.pass_nodes,
            &self.passes,
            &self.blackboard,
            scene,
            &mut pool,
            backend,
        )
        .run(&self.levels)?;

        self.exported_textures = output.textures;
        self.exported_buffers = output.buffers;
        self.retained = output.retained;
        Ok(())
    }

    /// Remove every pass, resource and blackboard value. Ids handed out before stay
    /// invalid.
    pub fn clear(&mut self) {
        release_retained(&mut self.retained, &mut self.pool.lock());
        self.registry.clear();
        self.blackboard.clear();
        self.producers.clear();
        self.passes.clear();
        self.pass_nodes.clear();
        self.exported_textures.clear();
        self.exported_buffers.clear();
        self.invalidate();
    }

    fn invalidate(&mut self) {
        self.built = false;
        self.adjacency.clear();
        self.sorted.clear();
        self.scheduled.clear();
        self.levels.clear();
    }

    fn check_unique(&self, name: ResourceName) -> Result<(), GraphError> {
        if self.registry.contains_name(name) {
            return Err(GraphError::DuplicateResource {
                pass: IMPORT_SCOPE.to_string(),
                resource: name.name(),
            });
        }
        Ok(())
    }

    /// GraphViz description of the passes, resources and their usage
    pub fn dump_graphviz(&self) -> String {
        let mut lines = vec![
            "digraph RenderGraph {".to_string(),
            "    rankdir=LR;".to_string(),
        ];

        for node in &self.pass_nodes {
            let style = if node.culled { ", style=dashed" } else { "" };
            lines.push(format!(
                "    pass{} [shape=box, label=\"{}\"{}];",
                node.id.index(),
                node.name,
                style
            ));
        }
        for (id, texture) in self.registry.textures() {
            let shape = if texture.is_imported() { "doubleoctagon" } else { "ellipse" };
            lines.push(format!(
                "    tex{} [shape={}, label=\"{}\"];",
                id.resource_id().raw(),
                shape,
                texture.name
            ));
        }
        for (id, buffer) in self.registry.buffers() {
            let shape = if buffer.is_imported() { "doubleoctagon" } else { "ellipse" };
            lines.push(format!(
                "    buf{} [shape={}, label=\"{}\"];",
                id.resource_id().raw(),
                shape,
                buffer.name
            ));
        }

        for node in &self.pass_nodes {
            let pass = node.id.index();
            let declarations = &node.declarations;
            for texture in &declarations.texture_reads {
                lines.push(format!("    tex{} -> pass{};", texture.resource_id().raw(), pass));
            }
            for texture in declarations.texture_creates.union(&declarations.texture_writes) {
                lines.push(format!("    pass{} -> tex{};", pass, texture.resource_id().raw()));
            }
            for buffer in &declarations.buffer_reads {
                lines.push(format!("    buf{} -> pass{};", buffer.resource_id().raw(), pass));
            }
            for buffer in declarations.buffer_creates.union(&declarations.buffer_writes) {
                lines.push(format!("    pass{} -> buf{};", pass, buffer.resource_id().raw()));
            }
        }

        lines.push("}".to_string());
        lines.join("\n")
    }

    // Accessors

    pub fn is_built(&self) -> bool {
        self.built
    }

    pub fn pass_count(&self) -> usize {
        self.pass_nodes.len()
    }

    pub fn pass_nodes(&self) -> &[PassNode] {
        &self.pass_nodes
    }

    pub fn pass_node(&self, id: PassId) -> Option<&PassNode> {
        self.pass_nodes.get(id.index())
    }

    /// Find a pass by name
    pub fn pass_id(&self, name: &str) -> Option<PassId> {
        self.pass_nodes
            .iter()
            .find(|node| node.name == name)
            .map(|node| node.id)
    }

    pub fn is_culled(&self, id: PassId) -> bool {
        self.pass_node(id).is_some_and(|node| node.culled)
    }

    /// Successors of a pass in the dependency graph
    pub fn adjacency(&self, id: PassId) -> &[PassId] {
        self.adjacency
            .get(id.index())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Topological order of every pass, culled ones included
    pub fn sorted_passes(&self) -> &[PassId] {
        &self.sorted
    }

    /// Passes that run, in execution order
    pub fn scheduled_passes(&self) -> &[PassId] {
        &self.scheduled
    }

    pub fn levels(&self) -> &[DependencyLevel] {
        &self.levels
    }

    pub fn texture_lifetime(&self, id: TextureId) -> Option<ResourceLifetime> {
        self.registry.texture(id).and_then(|texture| texture.lifetime)
    }

    pub fn buffer_lifetime(&self, id: BufferId) -> Option<ResourceLifetime> {
        self.registry.buffer(id).and_then(|buffer| buffer.lifetime)
    }

    pub fn registry(&self) -> &ResourceRegistry {
        &self.registry
    }

    pub fn blackboard(&self) -> &Blackboard {
        &self.blackboard
    }

    /// The frame driver may refresh blackboard values between frames.
    pub fn blackboard_mut(&mut self) -> &mut Blackboard {
        &mut self.blackboard
    }

    pub fn pool(&self) -> &SharedResourcePool {
        &self.pool
    }
}

impl Drop for RenderGraph {
    fn drop(&mut self) {
        if !self.retained.is_empty() {
            release_retained(&mut self.retained, &mut self.pool.lock());
        }
    }
}

impl std::fmt::Debug for RenderGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderGraph")
            .field("passes", &self.pass_nodes.len())
            .field("levels", &self.levels.len())
            .field("built", &self.built)
            .finish()
    }
}

/// Whether `consumer` has to run after `producer`.
///
/// Creates count as writes. Writers of a resource run in declaration order and a pass
/// that only reads a resource runs after every writer of it, including writers declared
/// later. Reading the previous contents before overwriting them needs a copy into a
/// separate resource; a read never orders itself ahead of a write.
fn depends_on(consumer: &PassDeclarations, producer: &PassDeclarations, producer_first: bool) -> bool {
    let textures = consumer
        .texture_reads
        .iter()
        .chain(&consumer.texture_writes)
        .any(|&texture| {
            producer.writes_texture(texture) && (producer_first || !consumer.writes_texture(texture))
        });
    let buffers = consumer
        .buffer_reads
        .iter()
        .chain(&consumer.buffer_writes)
        .any(|&buffer| {
            producer.writes_buffer(buffer) && (producer_first || !consumer.writes_buffer(buffer))
        });
    textures || buffers
}

fn extend_lifetime(lifetime: &mut Option<ResourceLifetime>, pass: usize, level: usize) {
    match lifetime {
        Some(lifetime) => {
            lifetime.last_pass = pass;
            lifetime.last_level = level;
        }
        None => {
            *lifetime = Some(ResourceLifetime {
                first_pass: pass,
                last_pass: pass,
                first_level: level,
                last_level: level,
            })
        }
    }
}

fn release_retained(retained: &mut Vec<ResourceHandle>, pool: &mut ResourcePool) {
    for resource in retained.drain(..) {
        match resource {
            ResourceHandle::Texture(handle) => pool.release_texture(handle),
            ResourceHandle::Buffer(handle) => pool.release_buffer(handle),
        }
    }
}

#[cfg(all(test, feature = "dummy"))]
mod tests {
    use super::*;
    use crate::backend::dummy::{DummyBackend, RecordedCommand};
    use crate::config::PoolConfig;

    const COLOR: ResourceName = ResourceName::new("Color");
    const DEPTH: ResourceName = ResourceName::new("Depth");
    const HISTOGRAM: ResourceName = ResourceName::new("Histogram");
    const BACK_BUFFER: ResourceName = ResourceName::new("BackBuffer");

    fn new_graph() -> RenderGraph {
        RenderGraph::new(ResourcePool::shared(&PoolConfig::default()))
    }

    fn color_desc() -> TextureDesc {
        TextureDesc::new_2d(
            64,
            32,
            TextureFormat::Rgba8Unorm,
            TextureUsage::RENDER_TARGET | TextureUsage::SHADER_RESOURCE,
        )
    }

    fn noop<D>(_: &D, _: &mut RenderGraphContext<'_>) -> BackendResult<()> {
        Ok(())
    }

    #[derive(Default)]
    struct ColorData {
        target: RenderTargetId,
    }

    fn add_producer(graph: &mut RenderGraph, flags: PassFlags) -> PassHandle<ColorData> {
        graph
            .add_pass(
                "producer",
                PassType::Graphics,
                flags,
                |data: &mut ColorData, builder| {
                    builder.create_texture(COLOR, color_desc())?;
                    data.target =
                        builder.write_render_target(COLOR, LoadStoreAccessOp::CLEAR_PRESERVE)?;
                    Ok(())
                },
                noop,
            )
            .unwrap()
    }

    #[test]
    fn test_duplicate_create_fails_and_rolls_back() {
        let mut graph = new_graph();
        add_producer(&mut graph, PassFlags::FORCE_NO_CULL);

        let err = graph
            .add_pass(
                "second",
                PassType::Graphics,
                PassFlags::empty(),
                |_: &mut (), builder| {
                    builder.create_texture(DEPTH, color_desc())?;
                    builder.create_texture(COLOR, color_desc())?;
                    Ok(())
                },
                noop,
            )
            .unwrap_err();

        assert_eq!(
            err,
            GraphError::DuplicateResource {
                pass: "second".to_string(),
                resource: "Color",
            }
        );
        assert_eq!(graph.pass_count(), 1);
        assert!(graph.registry().texture_id(DEPTH).is_none());
    }

    #[test]
    fn test_read_before_create_names_pass_and_resource() {
        let mut graph = new_graph();
        let err = graph
            .add_pass(
                "lighting",
                PassType::Graphics,
                PassFlags::empty(),
                |_: &mut (), builder| {
                    builder.read_texture(COLOR, ReadAccess::PixelShader)?;
                    Ok(())
                },
                noop,
            )
            .unwrap_err();

        assert_eq!(
            err,
            GraphError::ReadBeforeCreate {
                pass: "lighting".to_string(),
                resource: "Color",
            }
        );
        assert!(err.to_string().contains("lighting"));
    }

    #[test]
    fn test_write_to_read_only_import_fails() {
        let mut graph = new_graph();
        graph
            .import_texture_read_only(
                BACK_BUFFER,
                TextureHandle(100),
                color_desc(),
                ResourceState::PRESENT,
            )
            .unwrap();

        let err = graph
            .add_pass(
                "overlay",
                PassType::Graphics,
                PassFlags::empty(),
                |_: &mut (), builder| {
                    builder.write_render_target(BACK_BUFFER, LoadStoreAccessOp::PRESERVE_PRESERVE)?;
                    Ok(())
                },
                noop,
            )
            .unwrap_err();

        assert!(matches!(err, GraphError::WriteToReadOnlyImport { .. }));
    }

    #[test]
    fn test_uav_write_requires_flag() {
        let mut graph = new_graph();
        let err = graph
            .add_pass(
                "histogram",
                PassType::Compute,
                PassFlags::empty(),
                |_: &mut (), builder| {
                    builder.create_buffer(HISTOGRAM, BufferDesc::new(1024, BufferUsage::UNORDERED_ACCESS))?;
                    builder.write_buffer(HISTOGRAM)?;
                    Ok(())
                },
                noop,
            )
            .unwrap_err();

        assert!(matches!(err, GraphError::UavWriteNotAllowed { .. }));
    }

    #[test]
    fn test_export_unknown_name_is_unresolved() {
        let mut graph = new_graph();
        assert_eq!(
            graph.export_texture(COLOR, ResourceState::PIXEL_SHADER_RESOURCE),
            Err(GraphError::UnresolvedResource { resource: "Color" })
        );
    }

    #[test]
    fn test_execute_requires_build() {
        let mut graph = new_graph();
        let mut backend = DummyBackend::new();
        assert_eq!(
            graph.execute(&mut backend, &Scene::default()),
            Err(GraphError::NotBuilt)
        );
    }

    #[test]
    fn test_mutual_read_write_is_a_cycle() {
        let mut graph = new_graph();
        graph
            .import_texture(COLOR, TextureHandle(10), color_desc(), ResourceState::COMMON)
            .unwrap();
        graph
            .import_texture(DEPTH, TextureHandle(11), color_desc(), ResourceState::COMMON)
            .unwrap();

        graph
            .add_pass(
                "A",
                PassType::Graphics,
                PassFlags::empty(),
                |_: &mut (), builder| {
                    builder.read_texture(COLOR, ReadAccess::PixelShader)?;
                    builder.write_render_target(DEPTH, LoadStoreAccessOp::PRESERVE_PRESERVE)?;
                    Ok(())
                },
                noop,
            )
            .unwrap();
        graph
            .add_pass(
                "B",
                PassType::Graphics,
                PassFlags::empty(),
                |_: &mut (), builder| {
                    builder.read_texture(DEPTH, ReadAccess::PixelShader)?;
                    builder.write_render_target(COLOR, LoadStoreAccessOp::PRESERVE_PRESERVE)?;
                    Ok(())
                },
                noop,
            )
            .unwrap();

        match graph.build(&GraphConfig::default()) {
            Err(GraphError::CyclicDependency { passes, resources }) => {
                assert!(passes.contains(&"A".to_string()));
                assert!(passes.contains(&"B".to_string()));
                assert!(resources.contains(&"Color".to_string()));
                assert!(resources.contains(&"Depth".to_string()));
            }
            other => panic!("expected a cycle, got {:?}", other),
        }
        assert!(!graph.is_built());
    }

    #[test]
    fn test_same_named_passes_cannot_share_blackboard_type() {
        let mut graph = new_graph();
        for attempt in 0..2u32 {
            let result = graph.add_pass(
                "tonemap",
                PassType::Compute,
                PassFlags::empty(),
                move |_: &mut (), builder| builder.publish(attempt),
                noop,
            );
            if attempt == 0 {
                assert!(result.is_ok());
            } else {
                assert_eq!(
                    result.err(),
                    Some(GraphError::BlackboardConflict {
                        type_name: "u32",
                        first: "tonemap".to_string(),
                        second: "tonemap".to_string(),
                    })
                );
            }
        }
        assert_eq!(graph.pass_count(), 1);
        assert_eq!(*graph.blackboard().get::<u32>(), 0);
    }

    #[test]
    fn test_reader_runs_after_later_writer() {
        let mut graph = new_graph();
        graph
            .import_texture(BACK_BUFFER, TextureHandle(100), color_desc(), ResourceState::PRESENT)
            .unwrap();
        graph
            .add_pass(
                "read_old",
                PassType::Compute,
                PassFlags::FORCE_NO_CULL,
                |_: &mut (), builder| {
                    builder.read_texture(BACK_BUFFER, ReadAccess::NonPixelShader)?;
                    Ok(())
                },
                noop,
            )
            .unwrap();
        graph
            .add_pass(
                "overwrite",
                PassType::Graphics,
                PassFlags::empty(),
                |_: &mut (), builder| {
                    builder.write_render_target(BACK_BUFFER, LoadStoreAccessOp::CLEAR_PRESERVE)?;
                    Ok(())
                },
                noop,
            )
            .unwrap();
        graph.build(&GraphConfig::default()).unwrap();

        let read_old = graph.pass_id("read_old").unwrap();
        let overwrite = graph.pass_id("overwrite").unwrap();
        assert_eq!(graph.sorted_passes(), &[overwrite, read_old]);
    }

    #[test]
    fn test_unused_pass_is_culled_unless_forced() {
        let mut graph = new_graph();
        let culled = add_producer(&mut graph, PassFlags::empty());
        graph.build(&GraphConfig::default()).unwrap();
        assert!(graph.is_culled(culled.id()));
        assert!(graph.scheduled_passes().is_empty());

        let mut graph = new_graph();
        let kept = add_producer(&mut graph, PassFlags::FORCE_NO_CULL);
        graph.build(&GraphConfig::default()).unwrap();
        assert!(!graph.is_culled(kept.id()));
        assert_eq!(graph.scheduled_passes(), &[kept.id()]);
    }

    #[test]
    fn test_culling_can_be_disabled() {
        let mut graph = new_graph();
        let pass = add_producer(&mut graph, PassFlags::empty());
        let config = GraphConfig {
            cull_passes: false,
            ..GraphConfig::default()
        };
        graph.build(&config).unwrap();
        assert!(!graph.is_culled(pass.id()));
    }

    #[test]
    fn test_pass_data_is_retrievable() {
        let mut graph = new_graph();
        let handle = add_producer(&mut graph, PassFlags::FORCE_NO_CULL);
        let data = graph.pass_data(handle).unwrap();
        assert!(data.target.is_valid());
        assert_eq!(data.target.resource(), graph.registry().texture_id(COLOR).unwrap());
    }

    #[test]
    fn test_auto_render_pass_clears_and_binds() {
        let mut graph = new_graph();
        add_producer(&mut graph, PassFlags::FORCE_NO_CULL);
        graph.build(&GraphConfig::default()).unwrap();

        let mut backend = DummyBackend::new();
        graph.execute(&mut backend, &Scene::default()).unwrap();

        let commands = backend.take_commands();
        let bind = commands
            .iter()
            .position(|c| matches!(c, RecordedCommand::SetRenderTargets { .. }))
            .unwrap();
        let clear = commands
            .iter()
            .position(|c| matches!(c, RecordedCommand::ClearRenderTarget(_)))
            .unwrap();
        let unbind = commands
            .iter()
            .position(|c| matches!(c, RecordedCommand::UnbindRenderTargets))
            .unwrap();
        assert!(bind < clear && clear < unbind);
        assert!(commands.contains(&RecordedCommand::SetViewport(Viewport::from_size(64, 32))));
    }

    #[test]
    fn test_legacy_render_pass_skips_clears() {
        let mut graph = new_graph();
        add_producer(
            &mut graph,
            PassFlags::FORCE_NO_CULL | PassFlags::LEGACY_RENDER_PASS,
        );
        graph.build(&GraphConfig::default()).unwrap();

        let mut backend = DummyBackend::new();
        graph.execute(&mut backend, &Scene::default()).unwrap();
        assert!(!backend
            .commands()
            .iter()
            .any(|c| matches!(c, RecordedCommand::ClearRenderTarget(_))));
    }

    #[test]
    fn test_pass_failure_releases_resources() {
        let mut graph = new_graph();
        graph
            .add_pass(
                "failing",
                PassType::Graphics,
                PassFlags::FORCE_NO_CULL,
                |_: &mut (), builder| {
                    builder.create_texture(COLOR, color_desc())?;
                    builder.write_render_target(COLOR, LoadStoreAccessOp::CLEAR_PRESERVE)?;
                    Ok(())
                },
                |_: &(), _ctx| Err(BackendError::DeviceLost),
            )
            .unwrap();
        graph.build(&GraphConfig::default()).unwrap();

        let mut backend = DummyBackend::new();
        let err = graph.execute(&mut backend, &Scene::default()).unwrap_err();
        assert_eq!(
            err,
            GraphError::PassExecution {
                pass: "failing".to_string(),
                source: BackendError::DeviceLost,
            }
        );
        assert_eq!(graph.pool().lock().active_count(), 0);
    }

    #[test]
    fn test_allocation_failure_is_reported() {
        let mut graph = new_graph();
        add_producer(&mut graph, PassFlags::FORCE_NO_CULL);
        graph.build(&GraphConfig::default()).unwrap();

        let mut backend = DummyBackend::new().with_memory_budget(16);
        let err = graph.execute(&mut backend, &Scene::default()).unwrap_err();
        assert!(matches!(
            err,
            GraphError::Allocation {
                resource: "Color",
                source: BackendError::OutOfMemory { .. }
            }
        ));
    }

    #[test]
    fn test_imported_texture_is_restored_after_frame() {
        let mut graph = new_graph();
        graph
            .import_texture(BACK_BUFFER, TextureHandle(100), color_desc(), ResourceState::PRESENT)
            .unwrap();
        graph
            .add_pass(
                "present",
                PassType::Graphics,
                PassFlags::empty(),
                |_: &mut (), builder| {
                    builder.write_render_target(BACK_BUFFER, LoadStoreAccessOp::CLEAR_PRESERVE)?;
                    Ok(())
                },
                noop,
            )
            .unwrap();
        graph.build(&GraphConfig::default()).unwrap();

        let mut backend = DummyBackend::new();
        graph.execute(&mut backend, &Scene::default()).unwrap();

        let barriers: Vec<&Vec<ResourceBarrier>> = backend
            .commands()
            .iter()
            .filter_map(|c| match c {
                RecordedCommand::Barriers(barriers) => Some(barriers),
                _ => None,
            })
            .collect();
        let back_buffer = ResourceHandle::Texture(TextureHandle(100));
        assert_eq!(
            barriers,
            vec![
                &vec![ResourceBarrier::Transition {
                    resource: back_buffer,
                    before: ResourceState::PRESENT,
                    after: ResourceState::RENDER_TARGET,
                }],
                &vec![ResourceBarrier::Transition {
                    resource: back_buffer,
                    before: ResourceState::RENDER_TARGET,
                    after: ResourceState::PRESENT,
                }],
            ]
        );
    }

    #[test]
    fn test_failed_frame_restores_imports_for_next_frame() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let fail = Arc::new(AtomicBool::new(true));
        let fail_in_pass = Arc::clone(&fail);
        let mut graph = new_graph();
        graph
            .import_texture(BACK_BUFFER, TextureHandle(100), color_desc(), ResourceState::PRESENT)
            .unwrap();
        graph
            .add_pass(
                "present",
                PassType::Graphics,
                PassFlags::empty(),
                |_: &mut (), builder| {
                    builder.write_render_target(BACK_BUFFER, LoadStoreAccessOp::CLEAR_PRESERVE)?;
                    Ok(())
                },
                move |_: &(), _ctx| {
                    if fail_in_pass.load(Ordering::Relaxed) {
                        Err(BackendError::DeviceLost)
                    } else {
                        Ok(())
                    }
                },
            )
            .unwrap();
        graph.build(&GraphConfig::default()).unwrap();

        let mut backend = DummyBackend::new();
        assert!(graph.execute(&mut backend, &Scene::default()).is_err());
        fail.store(false, Ordering::Relaxed);
        graph.execute(&mut backend, &Scene::default()).unwrap();

        let back_buffer = ResourceHandle::Texture(TextureHandle(100));
        let to_target = vec![ResourceBarrier::Transition {
            resource: back_buffer,
            before: ResourceState::PRESENT,
            after: ResourceState::RENDER_TARGET,
        }];
        let to_present = vec![ResourceBarrier::Transition {
            resource: back_buffer,
            before: ResourceState::RENDER_TARGET,
            after: ResourceState::PRESENT,
        }];
        let barriers: Vec<&Vec<ResourceBarrier>> = backend
            .commands()
            .iter()
            .filter_map(|c| match c {
                RecordedCommand::Barriers(barriers) => Some(barriers),
                _ => None,
            })
            .collect();
        assert_eq!(
            barriers,
            vec![&to_target, &to_present, &to_target, &to_present]
        );
    }

    #[test]
    fn test_graphviz_lists_passes_and_resources() {
        let mut graph = new_graph();
        add_producer(&mut graph, PassFlags::FORCE_NO_CULL);
        graph.build(&GraphConfig::default()).unwrap();

        let dot = graph.dump_graphviz();
        assert!(dot.starts_with("digraph RenderGraph {"));
        assert!(dot.contains("label=\"producer\""));
        assert!(dot.contains("label=\"Color\""));
        assert!(dot.contains("pass0 -> tex"));
    }

    #[test]
    fn test_clear_invalidates_old_ids() {
        let mut graph = new_graph();
        add_producer(&mut graph, PassFlags::FORCE_NO_CULL);
        let old = graph.registry().texture_id(COLOR).unwrap();
        graph.clear();

        assert_eq!(graph.pass_count(), 0);
        assert!(graph.registry().texture(old).is_none());
        assert!(!graph.is_built());
    }
}
