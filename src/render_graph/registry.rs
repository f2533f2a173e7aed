//! Logical resources declared in a graph

use crate::backend::traits::{BufferHandle, TextureHandle};
use crate::backend::types::*;
use crate::render_graph::resource::*;
use std::collections::HashMap;

/// First and last scheduled use of a logical resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceLifetime {
    /// Index of the first pass in scheduled order
    pub first_pass: usize,
    /// Index of the last pass in scheduled order
    pub last_pass: usize,
    pub first_level: usize,
    pub last_level: usize,
}

impl ResourceLifetime {
    pub fn overlaps(&self, other: &ResourceLifetime) -> bool {
        self.first_level <= other.last_level && other.first_level <= self.last_level
    }
}

/// A logical resource and everything the graph knows about it
#[derive(Debug, Clone)]
pub struct GraphResource<H, D, V> {
    pub name: ResourceName,
    pub desc: D,
    /// Externally owned backing, set for imported resources
    pub imported: Option<H>,
    pub read_only: bool,
    /// State the resource is in when the frame starts (imports only)
    pub initial_state: ResourceState,
    /// State requested by whoever exports the resource
    pub export_state: Option<ResourceState>,
    pub views: Vec<V>,
    pub lifetime: Option<ResourceLifetime>,
}

impl<H, D, V> GraphResource<H, D, V> {
    pub(crate) fn new(name: ResourceName, desc: D) -> Self {
        Self {
            name,
            desc,
            imported: None,
            read_only: false,
            initial_state: ResourceState::COMMON,
            export_state: None,
            views: Vec::new(),
            lifetime: None,
        }
    }

    pub fn is_imported(&self) -> bool {
        self.imported.is_some()
    }

    pub fn is_exported(&self) -> bool {
        self.export_state.is_some()
    }

    pub(crate) fn add_view(&mut self, view: V) -> u32 {
        self.views.push(view);
        (self.views.len() - 1) as u32
    }
}

pub type TextureResource = GraphResource<TextureHandle, TextureDesc, TextureViewDesc>;
pub type BufferResource = GraphResource<BufferHandle, BufferDesc, BufferViewDesc>;

/// Storage of logical resources for one graph topology
///
/// Ids come from counters that only move forward, so ids from a rolled back setup or an
/// old topology never resolve again.
#[derive(Debug, Default)]
pub struct ResourceRegistry {
    textures: Vec<(TextureId, TextureResource)>,
    buffers: Vec<(BufferId, BufferResource)>,
    texture_names: HashMap<ResourceName, TextureId>,
    buffer_names: HashMap<ResourceName, BufferId>,
    next_texture: u32,
    next_buffer: u32,
}

/// Registry size and per-resource view counts before a pass setup
#[derive(Debug, Clone)]
pub(crate) struct RegistryCheckpoint {
    textures: usize,
    buffers: usize,
    texture_views: Vec<usize>,
    buffer_views: Vec<usize>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_texture(&mut self, resource: TextureResource) -> TextureId {
        let id = TextureId(ResourceId(self.next_texture));
        self.next_texture += 1;
        self.texture_names.insert(resource.name, id);
        self.textures.push((id, resource));
        id
    }

    pub fn add_buffer(&mut self, resource: BufferResource) -> BufferId {
        let id = BufferId(ResourceId(self.next_buffer));
        self.next_buffer += 1;
        self.buffer_names.insert(resource.name, id);
        self.buffers.push((id, resource));
        id
    }

    pub fn texture_id(&self, name: ResourceName) -> Option<TextureId> {
        self.texture_names.get(&name).copied()
    }

    pub fn buffer_id(&self, name: ResourceName) -> Option<BufferId> {
        self.buffer_names.get(&name).copied()
    }

    pub fn contains_name(&self, name: ResourceName) -> bool {
        self.texture_names.contains_key(&name) || self.buffer_names.contains_key(&name)
    }

    // Entries are pushed in id order
    fn texture_index(&self, id: TextureId) -> Option<usize> {
        self.textures.binary_search_by_key(&id, |(id, _)| *id).ok()
    }

    fn buffer_index(&self, id: BufferId) -> Option<usize> {
        self.buffers.binary_search_by_key(&id, |(id, _)| *id).ok()
    }

    pub fn texture(&self, id: TextureId) -> Option<&TextureResource> {
        self.texture_index(id).map(|index| &self.textures[index].1)
    }

    pub fn texture_mut(&mut self, id: TextureId) -> Option<&mut TextureResource> {
        self.texture_index(id).map(move |index| &mut self.textures[index].1)
    }

    pub fn buffer(&self, id: BufferId) -> Option<&BufferResource> {
        self.buffer_index(id).map(|index| &self.buffers[index].1)
    }

    pub fn buffer_mut(&mut self, id: BufferId) -> Option<&mut BufferResource> {
        self.buffer_index(id).map(move |index| &mut self.buffers[index].1)
    }

    pub fn textures(&self) -> impl Iterator<Item = (TextureId, &TextureResource)> {
        self.textures.iter().map(|(id, r)| (*id, r))
    }

    pub fn buffers(&self) -> impl Iterator<Item = (BufferId, &BufferResource)> {
        self.buffers.iter().map(|(id, r)| (*id, r))
    }

    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }

    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    /// Name for diagnostics, `"<unknown>"` for ids that don't resolve
    pub fn texture_name(&self, id: TextureId) -> &'static str {
        self.texture(id).map(|r| r.name.name()).unwrap_or("<unknown>")
    }

    pub fn buffer_name(&self, id: BufferId) -> &'static str {
        self.buffer(id).map(|r| r.name.name()).unwrap_or("<unknown>")
    }

    pub(crate) fn reset_lifetimes(&mut self) {
        for (_, texture) in &mut self.textures {
            texture.lifetime = None;
        }
        for (_, buffer) in &mut self.buffers {
            buffer.lifetime = None;
        }
    }

    /// Snapshot used to roll back a failed pass setup
    pub(crate) fn checkpoint(&self) -> RegistryCheckpoint {
        RegistryCheckpoint {
            textures: self.textures.len(),
            buffers: self.buffers.len(),
            texture_views: self.textures.iter().map(|(_, t)| t.views.len()).collect(),
            buffer_views: self.buffers.iter().map(|(_, b)| b.views.len()).collect(),
        }
    }

    /// Drop the resources and views added since `checkpoint`. Their ids stay retired.
    pub(crate) fn rollback(&mut self, checkpoint: RegistryCheckpoint) {
        for (_, texture) in self.textures.drain(checkpoint.textures..) {
            self.texture_names.remove(&texture.name);
        }
        for (_, buffer) in self.buffers.drain(checkpoint.buffers..) {
            self.buffer_names.remove(&buffer.name);
        }
        for ((_, texture), views) in self.textures.iter_mut().zip(checkpoint.texture_views) {
            texture.views.truncate(views);
        }
        for ((_, buffer), views) in self.buffers.iter_mut().zip(checkpoint.buffer_views) {
            buffer.views.truncate(views);
        }
    }

    /// Forget every resource. Ids handed out so far stay invalid forever.
    pub fn clear(&mut self) {
        self.textures.clear();
        self.buffers.clear();
        self.texture_names.clear();
        self.buffer_names.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COLOR: ResourceName = ResourceName::new("Color");
    const DEPTH: ResourceName = ResourceName::new("Depth");

    #[test]
    fn test_add_and_lookup() {
        let mut registry = ResourceRegistry::new();
        let color = registry.add_texture(TextureResource::new(COLOR, TextureDesc::default()));
        let depth = registry.add_texture(TextureResource::new(DEPTH, TextureDesc::default()));

        assert_ne!(color, depth);
        assert_eq!(registry.texture_id(COLOR), Some(color));
        assert_eq!(registry.texture_name(depth), "Depth");
        assert!(registry.buffer_id(COLOR).is_none());
    }

    #[test]
    fn test_ids_are_not_reused_after_clear() {
        let mut registry = ResourceRegistry::new();
        let old = registry.add_texture(TextureResource::new(COLOR, TextureDesc::default()));
        registry.clear();
        let new = registry.add_texture(TextureResource::new(COLOR, TextureDesc::default()));

        assert_ne!(old, new);
        assert!(registry.texture(old).is_none());
        assert!(registry.texture(new).is_some());
    }

    #[test]
    fn test_rollback_removes_names() {
        let mut registry = ResourceRegistry::new();
        registry.add_buffer(BufferResource::new(COLOR, BufferDesc::default()));
        let checkpoint = registry.checkpoint();
        registry.add_buffer(BufferResource::new(DEPTH, BufferDesc::default()));
        registry.rollback(checkpoint);

        assert_eq!(registry.buffer_count(), 1);
        assert!(registry.buffer_id(DEPTH).is_none());
        assert!(registry.buffer_id(COLOR).is_some());
    }

    #[test]
    fn test_rollback_retires_ids_and_views() {
        let mut registry = ResourceRegistry::new();
        let color = registry.add_texture(TextureResource::new(COLOR, TextureDesc::default()));
        let checkpoint = registry.checkpoint();
        let depth = registry.add_texture(TextureResource::new(DEPTH, TextureDesc::default()));
        registry
            .texture_mut(color)
            .unwrap()
            .add_view(TextureViewDesc::default());
        registry.rollback(checkpoint);

        assert!(registry.texture(depth).is_none());
        assert!(registry.texture(color).unwrap().views.is_empty());
        let again = registry.add_texture(TextureResource::new(DEPTH, TextureDesc::default()));
        assert_ne!(again, depth);
        assert!(registry.texture(depth).is_none());
        assert_eq!(registry.texture_id(DEPTH), Some(again));
    }

    #[test]
    fn test_lifetime_overlap() {
        let a = ResourceLifetime {
            first_pass: 0,
            last_pass: 1,
            first_level: 0,
            last_level: 1,
        };
        let b = ResourceLifetime {
            first_pass: 2,
            last_pass: 3,
            first_level: 2,
            last_level: 3,
        };
        assert!(!a.overlaps(&b));
        assert!(a.overlaps(&a));
    }
}
