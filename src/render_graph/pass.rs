//! Render pass definitions for the render graph

use crate::backend::traits::BackendResult;
use crate::backend::types::ResourceState;
use crate::render_graph::executor::RenderGraphContext;
use crate::render_graph::resource::*;
use bitflags::bitflags;
use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::marker::PhantomData;

/// Unique identifier for a render pass, assigned in insertion order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PassId(pub(crate) u32);

impl PassId {
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

/// Type of render pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassType {
    /// Graphics render pass
    Graphics,
    /// Compute pass on the graphics queue
    Compute,
    /// Compute pass that may overlap graphics work
    AsyncCompute,
    /// Copy pass
    Copy,
}

bitflags! {
    /// Behaviour switches of a pass.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PassFlags: u32 {
        /// Never cull this pass, even if nothing consumes its outputs.
        const FORCE_NO_CULL = 1 << 0;
        /// The executor does not bind or clear the pass's attachments.
        const SKIP_AUTO_RENDER_PASS = 1 << 1;
        /// Attachments are bound but load ops are left to the pass.
        const LEGACY_RENDER_PASS = 1 << 2;
        /// The pass may write resources through unordered-access views.
        const ALLOW_UAV_WRITES = 1 << 3;
    }
}

impl Default for PassFlags {
    fn default() -> Self {
        Self::empty()
    }
}

/// Shader stages a read is visible to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadAccess {
    PixelShader,
    NonPixelShader,
    AllShader,
}

impl ReadAccess {
    pub fn state(&self) -> ResourceState {
        match self {
            ReadAccess::PixelShader => ResourceState::PIXEL_SHADER_RESOURCE,
            ReadAccess::NonPixelShader => ResourceState::NON_PIXEL_SHADER_RESOURCE,
            ReadAccess::AllShader => ResourceState::ALL_SHADER_RESOURCE,
        }
    }
}

/// A color attachment declared by a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderTargetInfo {
    pub id: RenderTargetId,
    pub access: LoadStoreAccessOp,
}

/// The depth-stencil attachment declared by a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepthStencilInfo {
    pub id: DepthStencilId,
    pub depth_access: LoadStoreAccessOp,
    pub stencil_access: LoadStoreAccessOp,
    pub read_only: bool,
}

/// Resource usage recorded for one pass during setup
#[derive(Debug, Default, Clone)]
pub struct PassDeclarations {
    pub texture_creates: BTreeSet<TextureId>,
    pub texture_reads: BTreeSet<TextureId>,
    pub texture_writes: BTreeSet<TextureId>,
    pub texture_destroys: BTreeSet<TextureId>,
    pub texture_states: BTreeMap<TextureId, ResourceState>,

    pub buffer_creates: BTreeSet<BufferId>,
    pub buffer_reads: BTreeSet<BufferId>,
    pub buffer_writes: BTreeSet<BufferId>,
    pub buffer_destroys: BTreeSet<BufferId>,
    pub buffer_states: BTreeMap<BufferId, ResourceState>,

    pub render_targets: Vec<RenderTargetInfo>,
    pub depth_stencil: Option<DepthStencilInfo>,

    pub texture_exports: BTreeMap<TextureId, ResourceState>,
    pub buffer_exports: BTreeMap<BufferId, ResourceState>,
    /// Set when the pass hands a resource to an external owner
    pub exports: bool,
}

impl PassDeclarations {
    /// Creates count as writes for ordering purposes
    pub fn writes_texture(&self, texture: TextureId) -> bool {
        self.texture_writes.contains(&texture) || self.texture_creates.contains(&texture)
    }

    pub fn reads_texture(&self, texture: TextureId) -> bool {
        self.texture_reads.contains(&texture)
    }

    pub fn writes_buffer(&self, buffer: BufferId) -> bool {
        self.buffer_writes.contains(&buffer) || self.buffer_creates.contains(&buffer)
    }

    pub fn reads_buffer(&self, buffer: BufferId) -> bool {
        self.buffer_reads.contains(&buffer)
    }

    pub(crate) fn require_texture_state(&mut self, texture: TextureId, state: ResourceState) {
        let entry = self.texture_states.entry(texture).or_insert(state);
        *entry = entry.combine(state);
    }

    pub(crate) fn require_buffer_state(&mut self, buffer: BufferId, state: ResourceState) {
        let entry = self.buffer_states.entry(buffer).or_insert(state);
        *entry = entry.combine(state);
    }
}

/// Metadata about a pass in the graph
#[derive(Debug)]
pub struct PassNode {
    pub id: PassId,
    pub name: String,
    pub pass_type: PassType,
    pub flags: PassFlags,
    pub declarations: PassDeclarations,
    pub culled: bool,
}

impl PassNode {
    pub fn can_be_culled(&self) -> bool {
        !self.flags.contains(PassFlags::FORCE_NO_CULL)
    }

    pub fn uses_auto_render_pass(&self) -> bool {
        self.pass_type == PassType::Graphics
            && !self.flags.contains(PassFlags::SKIP_AUTO_RENDER_PASS)
    }
}

/// Type-erased pass stored in the graph's pass arena
pub trait PassBase: Send + Sync {
    /// Record the pass's GPU work
    fn execute(&self, ctx: &mut RenderGraphContext<'_>) -> BackendResult<()>;

    /// Allow downcasting to the typed pass
    fn as_any(&self) -> &dyn Any;
}

type ExecuteFn<D> = dyn Fn(&D, &mut RenderGraphContext<'_>) -> BackendResult<()> + Send + Sync;

/// A pass carrying typed data produced during setup
pub struct RenderGraphPass<D> {
    data: D,
    execute: Box<ExecuteFn<D>>,
}

impl<D> RenderGraphPass<D> {
    pub(crate) fn new(data: D, execute: Box<ExecuteFn<D>>) -> Self {
        Self { data, execute }
    }

    pub fn data(&self) -> &D {
        &self.data
    }
}

impl<D: Send + Sync + 'static> PassBase for RenderGraphPass<D> {
    fn execute(&self, ctx: &mut RenderGraphContext<'_>) -> BackendResult<()> {
        (self.execute)(&self.data, ctx)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Typed handle returned by [`RenderGraph::add_pass`](crate::render_graph::RenderGraph::add_pass)
pub struct PassHandle<D> {
    id: PassId,
    _data: PhantomData<fn() -> D>,
}

impl<D> PassHandle<D> {
    pub(crate) fn new(id: PassId) -> Self {
        Self {
            id,
            _data: PhantomData,
        }
    }

    pub fn id(&self) -> PassId {
        self.id
    }
}

impl<D> Clone for PassHandle<D> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<D> Copy for PassHandle<D> {}

impl<D> fmt::Debug for PassHandle<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PassHandle").field(&self.id).finish()
    }
}
