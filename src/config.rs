//! Engine configuration
//!
//! Owned by the frame driver and passed by reference into the render graph and the
//! shadow mapper. Nothing in the crate reads configuration from global state.

use crate::shadow::{CascadeFitMode, ShadowQuality, CASCADE_COUNT};
use thiserror::Error;

/// Configuration errors reported by [`EngineConfig::validate`]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Shadow cascade distances must be positive and strictly increasing, got {0:?}")]
    CascadeDistances([f32; CASCADE_COUNT]),
    #[error("Pool eviction window must be at least one frame")]
    EvictionWindow,
    #[error("Shadow split weight must be in (0, 1], got {0}")]
    SplitWeight(f32),
}

/// Top-level configuration for the engine
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub graph: GraphConfig,
    pub shadow: ShadowConfig,
    pub pool: PoolConfig,
    /// Set by editor front ends. The graph and the shadow mapper never read it.
    pub editor_mode: bool,
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.shadow.validate()?;
        self.pool.validate()
    }
}

/// Render graph build options
#[derive(Debug, Clone)]
pub struct GraphConfig {
    /// Remove passes whose results nothing observes
    pub cull_passes: bool,
    /// Log the level schedule at info level after every build
    pub log_schedule: bool,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            cull_passes: true,
            log_schedule: false,
        }
    }
}

/// Resource pool options
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Frames an unused pooled resource survives before it is destroyed
    pub eviction_frames: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self { eviction_frames: 4 }
    }
}

impl PoolConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.eviction_frames == 0 {
            return Err(ConfigError::EvictionWindow);
        }
        Ok(())
    }
}

/// Cascaded shadow map options
#[derive(Debug, Clone)]
pub struct ShadowConfig {
    /// Far distance of every cascade, in view-space units
    pub cascade_distances: [f32; CASCADE_COUNT],
    pub quality: ShadowQuality,
    /// When false every cascade covers the whole camera range
    pub cascaded: bool,
    /// Snap cascade projections to whole texels
    pub stabilize: bool,
    pub fit_mode: CascadeFitMode,
    /// Blend between uniform (0) and logarithmic (1) splits for `practical_splits`
    pub split_weight: f32,
}

impl Default for ShadowConfig {
    fn default() -> Self {
        Self {
            cascade_distances: [50.0, 800.0, 2000.0],
            quality: ShadowQuality::Medium,
            cascaded: true,
            stabilize: true,
            fit_mode: CascadeFitMode::BoundingSphere,
            split_weight: 0.04,
        }
    }
}

impl ShadowConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let distances = self.cascade_distances;
        let increasing = distances.windows(2).all(|pair| pair[0] < pair[1]);
        if distances[0] <= 0.0 || !increasing {
            return Err(ConfigError::CascadeDistances(distances));
        }
        if !(self.split_weight > 0.0 && self.split_weight <= 1.0) {
            return Err(ConfigError::SplitWeight(self.split_weight));
        }
        Ok(())
    }

    /// Split table blending logarithmic and uniform distribution over `near..far`.
    pub fn practical_splits(near: f32, far: f32, weight: f32) -> [f32; CASCADE_COUNT] {
        let mut splits = [0.0; CASCADE_COUNT];
        for (i, split) in splits.iter_mut().enumerate() {
            let fraction = (i + 1) as f32 / CASCADE_COUNT as f32;
            let logarithmic = near * (far / near).powf(fraction);
            let uniform = near + (far - near) * fraction;
            *split = weight * logarithmic + (1.0 - weight) * uniform;
        }
        splits
    }

    /// Replace the split table with [`ShadowConfig::practical_splits`] for a camera range.
    pub fn with_practical_splits(mut self, near: f32, far: f32) -> Self {
        self.cascade_distances = Self::practical_splits(near, far, self.split_weight);
        self
    }
}
