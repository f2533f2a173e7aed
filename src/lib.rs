//! Framegraph Engine - A render graph-based frame scheduler with cascaded shadow maps
//!
//! Passes declare the resources they create, read and write; the graph derives the
//! execution order, groups passes into dependency levels, assigns pooled physical
//! resources and records every state transition. Everything is recorded through the
//! [`RenderBackend`] trait, so the engine runs on any RHI, including the headless
//! [`DummyBackend`](backend::DummyBackend).
//!
//! # Features
//! - Render graph with culling, dependency levels and automatic barriers
//! - Frame-to-frame resource pooling with an eviction window
//! - Type-keyed blackboard for pass-to-pass data
//! - Cascaded shadow maps with stable bounding-sphere fitting and texel snapping

pub mod backend;
pub mod config;
pub mod render_graph;
pub mod scene;
pub mod shadow;

pub use backend::traits::{BackendError, BackendResult, RenderBackend};
pub use config::{ConfigError, EngineConfig, GraphConfig, PoolConfig, ShadowConfig};
pub use render_graph::{GraphError, RenderGraph, ResourcePool};
pub use scene::Scene;
pub use shadow::ShadowMapper;
