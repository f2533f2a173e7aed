//! Per-pass declaration API used during graph setup

use crate::backend::types::*;
use crate::render_graph::blackboard::Blackboard;
use crate::render_graph::graph::GraphError;
use crate::render_graph::pass::*;
use crate::render_graph::registry::*;
use crate::render_graph::resource::*;
use bytemuck::Pod;
use std::any::{type_name, TypeId};
use std::collections::HashMap;

/// Blackboard value published by a pass, applied once its setup succeeds
pub(crate) struct PendingPublish {
    pub type_id: TypeId,
    pub apply: Box<dyn FnOnce(&mut Blackboard)>,
}

/// Declares the resources one pass creates, reads and writes
///
/// Every call checks its preconditions immediately and returns a [`GraphError`] naming
/// the pass and resource involved.
pub struct RenderGraphBuilder<'a> {
    pub(crate) registry: &'a mut ResourceRegistry,
    pub(crate) blackboard: &'a Blackboard,
    pub(crate) producers: &'a HashMap<TypeId, (PassId, String)>,
    pub(crate) declarations: &'a mut PassDeclarations,
    pub(crate) published: &'a mut Vec<PendingPublish>,
    pub(crate) pass_id: PassId,
    pub(crate) pass_name: &'a str,
    pub(crate) flags: PassFlags,
}

impl<'a> RenderGraphBuilder<'a> {
    pub fn pass_name(&self) -> &str {
        self.pass_name
    }

    pub fn flags(&self) -> PassFlags {
        self.flags
    }

    /// Values published by passes added earlier
    pub fn blackboard(&self) -> &Blackboard {
        self.blackboard
    }

    /// Publish a value for later passes and the frame driver.
    ///
    /// One pass owns each type: a second pass publishing the same type is an error.
    pub fn publish<T: Pod + Send + Sync>(&mut self, value: T) -> Result<(), GraphError> {
        let type_id = TypeId::of::<T>();
        if let Some((owner, owner_name)) = self.producers.get(&type_id) {
            if *owner != self.pass_id {
                return Err(GraphError::BlackboardConflict {
                    type_name: type_name::<T>(),
                    first: owner_name.clone(),
                    second: self.pass_name.to_string(),
                });
            }
        }
        self.published.push(PendingPublish {
            type_id,
            apply: Box::new(move |blackboard| blackboard.add(value)),
        });
        Ok(())
    }

    // Creation

    /// Register a new logical texture owned by the graph.
    pub fn create_texture(
        &mut self,
        name: ResourceName,
        desc: TextureDesc,
    ) -> Result<TextureId, GraphError> {
        self.check_unique(name)?;
        let id = self.registry.add_texture(TextureResource::new(name, desc));
        self.declarations.texture_creates.insert(id);
        Ok(id)
    }

    /// Register a new logical buffer owned by the graph.
    pub fn create_buffer(
        &mut self,
        name: ResourceName,
        desc: BufferDesc,
    ) -> Result<BufferId, GraphError> {
        self.check_unique(name)?;
        let id = self.registry.add_buffer(BufferResource::new(name, desc));
        self.declarations.buffer_creates.insert(id);
        Ok(id)
    }

    // Texture usage

    pub fn read_texture(
        &mut self,
        name: ResourceName,
        access: ReadAccess,
    ) -> Result<TextureReadOnlyId, GraphError> {
        self.read_texture_with_view(name, access, TextureViewDesc::default())
    }

    pub fn read_texture_with_view(
        &mut self,
        name: ResourceName,
        access: ReadAccess,
        view: TextureViewDesc,
    ) -> Result<TextureReadOnlyId, GraphError> {
        let id = self.texture_for_read(name, access.state())?;
        Ok(TextureReadOnlyId::new(self.add_texture_view(id, view), id))
    }

    /// Write through an unordered-access view. Needs [`PassFlags::ALLOW_UAV_WRITES`].
    pub fn write_texture(&mut self, name: ResourceName) -> Result<TextureReadWriteId, GraphError> {
        self.write_texture_with_view(name, TextureViewDesc::default())
    }

    pub fn write_texture_with_view(
        &mut self,
        name: ResourceName,
        view: TextureViewDesc,
    ) -> Result<TextureReadWriteId, GraphError> {
        self.check_uav_allowed(name)?;
        let id = self.texture_for_write(name, ResourceState::UNORDERED_ACCESS)?;
        Ok(TextureReadWriteId::new(self.add_texture_view(id, view), id))
    }

    pub fn write_render_target(
        &mut self,
        name: ResourceName,
        access: LoadStoreAccessOp,
    ) -> Result<RenderTargetId, GraphError> {
        let id = self.texture_for_write(name, ResourceState::RENDER_TARGET)?;
        let rtv = RenderTargetId::new(self.add_texture_view(id, TextureViewDesc::default()), id);
        self.declarations
            .render_targets
            .push(RenderTargetInfo { id: rtv, access });
        Ok(rtv)
    }

    pub fn write_depth_stencil(
        &mut self,
        name: ResourceName,
        depth_access: LoadStoreAccessOp,
        stencil_access: LoadStoreAccessOp,
    ) -> Result<DepthStencilId, GraphError> {
        let id = self.texture_for_write(name, ResourceState::DEPTH_WRITE)?;
        let dsv = DepthStencilId::new(self.add_texture_view(id, TextureViewDesc::default()), id);
        self.declarations.depth_stencil = Some(DepthStencilInfo {
            id: dsv,
            depth_access,
            stencil_access,
            read_only: false,
        });
        Ok(dsv)
    }

    /// Bind a depth buffer for depth testing without writing it.
    pub fn read_depth_stencil(
        &mut self,
        name: ResourceName,
        depth_access: LoadStoreAccessOp,
    ) -> Result<DepthStencilId, GraphError> {
        let id = self.texture_for_read(name, ResourceState::DEPTH_READ)?;
        let dsv = DepthStencilId::new(self.add_texture_view(id, TextureViewDesc::default()), id);
        self.declarations.depth_stencil = Some(DepthStencilInfo {
            id: dsv,
            depth_access,
            stencil_access: LoadStoreAccessOp::NO_ACCESS_NO_ACCESS,
            read_only: true,
        });
        Ok(dsv)
    }

    pub fn read_copy_src_texture(&mut self, name: ResourceName) -> Result<TextureId, GraphError> {
        self.texture_for_read(name, ResourceState::COPY_SOURCE)
    }

    pub fn write_copy_dst_texture(&mut self, name: ResourceName) -> Result<TextureId, GraphError> {
        self.texture_for_write(name, ResourceState::COPY_DEST)
    }

    // Buffer usage

    pub fn read_buffer(
        &mut self,
        name: ResourceName,
        access: ReadAccess,
    ) -> Result<BufferReadOnlyId, GraphError> {
        self.read_buffer_with_view(name, access, BufferViewDesc::default())
    }

    pub fn read_buffer_with_view(
        &mut self,
        name: ResourceName,
        access: ReadAccess,
        view: BufferViewDesc,
    ) -> Result<BufferReadOnlyId, GraphError> {
        let id = self.buffer_for_read(name, access.state())?;
        Ok(BufferReadOnlyId::new(self.add_buffer_view(id, view), id))
    }

    /// Write through an unordered-access view. Needs [`PassFlags::ALLOW_UAV_WRITES`].
    pub fn write_buffer(&mut self, name: ResourceName) -> Result<BufferReadWriteId, GraphError> {
        self.write_buffer_with_view(name, BufferViewDesc::default())
    }

    pub fn write_buffer_with_view(
        &mut self,
        name: ResourceName,
        view: BufferViewDesc,
    ) -> Result<BufferReadWriteId, GraphError> {
        self.check_uav_allowed(name)?;
        let id = self.buffer_for_write(name, ResourceState::UNORDERED_ACCESS)?;
        Ok(BufferReadWriteId::new(self.add_buffer_view(id, view), id))
    }

    pub fn read_vertex_buffer(&mut self, name: ResourceName) -> Result<BufferId, GraphError> {
        self.buffer_for_read(name, ResourceState::VERTEX_AND_CONSTANT_BUFFER)
    }

    pub fn read_constant_buffer(&mut self, name: ResourceName) -> Result<BufferId, GraphError> {
        self.buffer_for_read(name, ResourceState::VERTEX_AND_CONSTANT_BUFFER)
    }

    pub fn read_index_buffer(&mut self, name: ResourceName) -> Result<BufferId, GraphError> {
        self.buffer_for_read(name, ResourceState::INDEX_BUFFER)
    }

    pub fn read_indirect_args(&mut self, name: ResourceName) -> Result<BufferId, GraphError> {
        self.buffer_for_read(name, ResourceState::INDIRECT_ARGUMENT)
    }

    pub fn read_copy_src_buffer(&mut self, name: ResourceName) -> Result<BufferId, GraphError> {
        self.buffer_for_read(name, ResourceState::COPY_SOURCE)
    }

    pub fn write_copy_dst_buffer(&mut self, name: ResourceName) -> Result<BufferId, GraphError> {
        self.buffer_for_write(name, ResourceState::COPY_DEST)
    }

    // Export

    /// Hand the texture's final backing to an external owner once the frame finishes,
    /// transitioned to `final_state`. Exporting keeps this pass from being culled.
    pub fn export_texture(
        &mut self,
        name: ResourceName,
        final_state: ResourceState,
    ) -> Result<TextureId, GraphError> {
        let id = self.lookup_texture(name)?;
        self.declarations.texture_exports.insert(id, final_state);
        self.declarations.exports = true;
        Ok(id)
    }

    pub fn export_buffer(
        &mut self,
        name: ResourceName,
        final_state: ResourceState,
    ) -> Result<BufferId, GraphError> {
        let id = self.lookup_buffer(name)?;
        self.declarations.buffer_exports.insert(id, final_state);
        self.declarations.exports = true;
        Ok(id)
    }

    // Helpers

    fn check_unique(&self, name: ResourceName) -> Result<(), GraphError> {
        if self.registry.contains_name(name) {
            return Err(GraphError::DuplicateResource {
                pass: self.pass_name.to_string(),
                resource: name.name(),
            });
        }
        Ok(())
    }

    fn check_uav_allowed(&self, name: ResourceName) -> Result<(), GraphError> {
        if !self.flags.contains(PassFlags::ALLOW_UAV_WRITES) {
            return Err(GraphError::UavWriteNotAllowed {
                pass: self.pass_name.to_string(),
                resource: name.name(),
            });
        }
        Ok(())
    }

    fn lookup_texture(&self, name: ResourceName) -> Result<TextureId, GraphError> {
        self.registry
            .texture_id(name)
            .ok_or_else(|| GraphError::ReadBeforeCreate {
                pass: self.pass_name.to_string(),
                resource: name.name(),
            })
    }

    fn lookup_buffer(&self, name: ResourceName) -> Result<BufferId, GraphError> {
        self.registry
            .buffer_id(name)
            .ok_or_else(|| GraphError::ReadBeforeCreate {
                pass: self.pass_name.to_string(),
                resource: name.name(),
            })
    }

    fn texture_for_read(
        &mut self,
        name: ResourceName,
        state: ResourceState,
    ) -> Result<TextureId, GraphError> {
        let id = self.lookup_texture(name)?;
        self.declarations.texture_reads.insert(id);
        self.declarations.require_texture_state(id, state);
        Ok(id)
    }

    fn texture_for_write(
        &mut self,
        name: ResourceName,
        state: ResourceState,
    ) -> Result<TextureId, GraphError> {
        let id = self.lookup_texture(name)?;
        if self.registry.texture(id).is_some_and(|t| t.read_only) {
            return Err(GraphError::WriteToReadOnlyImport {
                pass: self.pass_name.to_string(),
                resource: name.name(),
            });
        }
        self.declarations.texture_writes.insert(id);
        self.declarations.require_texture_state(id, state);
        Ok(id)
    }

    fn buffer_for_read(
        &mut self,
        name: ResourceName,
        state: ResourceState,
    ) -> Result<BufferId, GraphError> {
        let id = self.lookup_buffer(name)?;
        self.declarations.buffer_reads.insert(id);
        self.declarations.require_buffer_state(id, state);
        Ok(id)
    }

    fn buffer_for_write(
        &mut self,
        name: ResourceName,
        state: ResourceState,
    ) -> Result<BufferId, GraphError> {
        let id = self.lookup_buffer(name)?;
        if self.registry.buffer(id).is_some_and(|b| b.read_only) {
            return Err(GraphError::WriteToReadOnlyImport {
                pass: self.pass_name.to_string(),
                resource: name.name(),
            });
        }
        self.declarations.buffer_writes.insert(id);
        self.declarations.require_buffer_state(id, state);
        Ok(id)
    }

    fn add_texture_view(&mut self, id: TextureId, view: TextureViewDesc) -> u32 {
        self.registry
            .texture_mut(id)
            .map(|texture| texture.add_view(view))
            .unwrap_or(0)
    }

    fn add_buffer_view(&mut self, id: BufferId, view: BufferViewDesc) -> u32 {
        self.registry
            .buffer_mut(id)
            .map(|buffer| buffer.add_view(view))
            .unwrap_or(0)
    }
}
