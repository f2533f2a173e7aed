//! Physical resource pool
//!
//! The pool owns every physical texture and buffer the render graph allocates. Released
//! resources stay cached and are handed out again for a compatible descriptor until they
//! have gone unused for the configured number of frames.

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::config::PoolConfig;
use parking_lot::Mutex;
use std::sync::Arc;

/// Pool shared by every graph that allocates from it
pub type SharedResourcePool = Arc<Mutex<ResourcePool>>;

/// A physical resource owned by the pool
#[derive(Debug, Clone)]
pub struct PooledEntry<H, D> {
    pub handle: H,
    pub desc: D,
    pub last_used_frame: u64,
    pub active: bool,
    /// State the resource was left in by its last user
    pub state: ResourceState,
}

pub type PooledTexture = PooledEntry<TextureHandle, TextureDesc>;
pub type PooledBuffer = PooledEntry<BufferHandle, BufferDesc>;

/// Allocation counters, reset by nothing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub created: u64,
    pub reused: u64,
    pub evicted: u64,
}

/// Allocator and recycler of physical textures and buffers
#[derive(Debug)]
pub struct ResourcePool {
    textures: Vec<PooledTexture>,
    buffers: Vec<PooledBuffer>,
    frame_index: u64,
    eviction_frames: u64,
    stats: PoolStats,
}

impl ResourcePool {
    pub fn new(config: &PoolConfig) -> Self {
        Self {
            textures: Vec::new(),
            buffers: Vec::new(),
            frame_index: 0,
            eviction_frames: config.eviction_frames,
            stats: PoolStats::default(),
        }
    }

    pub fn shared(config: &PoolConfig) -> SharedResourcePool {
        Arc::new(Mutex::new(Self::new(config)))
    }

    /// Hand out a cached compatible texture, or create a new one.
    pub fn allocate_texture(
        &mut self,
        backend: &mut dyn RenderBackend,
        desc: &TextureDesc,
    ) -> BackendResult<TextureHandle> {
        if let Some(entry) = self
            .textures
            .iter_mut()
            .find(|entry| !entry.active && entry.desc.is_compatible(desc))
        {
            entry.active = true;
            entry.last_used_frame = self.frame_index;
            self.stats.reused += 1;
            return Ok(entry.handle);
        }

        let handle = backend.create_texture(desc)?;
        log::debug!(
            "Pool: created texture {:?} ({}x{} {:?})",
            handle,
            desc.width,
            desc.height,
            desc.format
        );
        self.textures.push(PooledEntry {
            handle,
            desc: desc.clone(),
            last_used_frame: self.frame_index,
            active: true,
            state: ResourceState::COMMON,
        });
        self.stats.created += 1;
        Ok(handle)
    }

    /// Return a texture to the cache. Unknown handles are ignored.
    pub fn release_texture(&mut self, handle: TextureHandle) {
        match self
            .textures
            .iter_mut()
            .find(|entry| entry.active && entry.handle == handle)
        {
            Some(entry) => {
                entry.active = false;
                entry.last_used_frame = self.frame_index;
            }
            None => log::warn!("Pool: released texture {:?} is not active in the pool", handle),
        }
    }

    /// Hand out a cached compatible buffer, or create a new one.
    pub fn allocate_buffer(
        &mut self,
        backend: &mut dyn RenderBackend,
        desc: &BufferDesc,
    ) -> BackendResult<BufferHandle> {
        if let Some(entry) = self
            .buffers
            .iter_mut()
            .find(|entry| !entry.active && entry.desc.is_compatible(desc))
        {
            entry.active = true;
            entry.last_used_frame = self.frame_index;
            self.stats.reused += 1;
            return Ok(entry.handle);
        }

        let handle = backend.create_buffer(desc)?;
        log::debug!("Pool: created buffer {:?} ({} bytes)", handle, desc.size);
        self.buffers.push(PooledEntry {
            handle,
            desc: desc.clone(),
            last_used_frame: self.frame_index,
            active: true,
            state: ResourceState::COMMON,
        });
        self.stats.created += 1;
        Ok(handle)
    }

    /// Return a buffer to the cache. Unknown handles are ignored.
    pub fn release_buffer(&mut self, handle: BufferHandle) {
        match self
            .buffers
            .iter_mut()
            .find(|entry| entry.active && entry.handle == handle)
        {
            Some(entry) => {
                entry.active = false;
                entry.last_used_frame = self.frame_index;
            }
            None => log::warn!("Pool: released buffer {:?} is not active in the pool", handle),
        }
    }

    pub fn texture_state(&self, handle: TextureHandle) -> ResourceState {
        self.textures
            .iter()
            .find(|entry| entry.handle == handle)
            .map_or(ResourceState::COMMON, |entry| entry.state)
    }

    pub fn set_texture_state(&mut self, handle: TextureHandle, state: ResourceState) {
        if let Some(entry) = self.textures.iter_mut().find(|entry| entry.handle == handle) {
            entry.state = state;
        }
    }

    pub fn buffer_state(&self, handle: BufferHandle) -> ResourceState {
        self.buffers
            .iter()
            .find(|entry| entry.handle == handle)
            .map_or(ResourceState::COMMON, |entry| entry.state)
    }

    pub fn set_buffer_state(&mut self, handle: BufferHandle, state: ResourceState) {
        if let Some(entry) = self.buffers.iter_mut().find(|entry| entry.handle == handle) {
            entry.state = state;
        }
    }

    /// Advance the frame counter and destroy cached resources that went stale.
    pub fn tick(&mut self, backend: &mut dyn RenderBackend) {
        self.frame_index += 1;
        let frame_index = self.frame_index;
        let eviction_frames = self.eviction_frames;
        let is_stale =
            |active: bool, last_used: u64| !active && last_used + eviction_frames < frame_index;

        let mut evicted = 0;
        self.textures.retain(|entry| {
            if is_stale(entry.active, entry.last_used_frame) {
                backend.destroy_texture(entry.handle);
                evicted += 1;
                false
            } else {
                true
            }
        });
        self.buffers.retain(|entry| {
            if is_stale(entry.active, entry.last_used_frame) {
                backend.destroy_buffer(entry.handle);
                evicted += 1;
                false
            } else {
                true
            }
        });

        if evicted > 0 {
            log::debug!("Pool: evicted {} resources at frame {}", evicted, frame_index);
        }
        self.stats.evicted += evicted;
    }

    /// Destroy every resource, active or not.
    pub fn clear(&mut self, backend: &mut dyn RenderBackend) {
        for entry in self.textures.drain(..) {
            backend.destroy_texture(entry.handle);
        }
        for entry in self.buffers.drain(..) {
            backend.destroy_buffer(entry.handle);
        }
    }

    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    pub fn eviction_frames(&self) -> u64 {
        self.eviction_frames
    }

    pub fn textures(&self) -> &[PooledTexture] {
        &self.textures
    }

    pub fn buffers(&self) -> &[PooledBuffer] {
        &self.buffers
    }

    pub fn active_count(&self) -> usize {
        self.textures.iter().filter(|e| e.active).count()
            + self.buffers.iter().filter(|e| e.active).count()
    }

    pub fn stats(&self) -> PoolStats {
        self.stats
    }
}
