//! Render Graph System
//!
//! A declarative system for defining render passes as a directed acyclic graph (DAG).
//! The graph orders passes from their declared resource usage, culls work nothing
//! observes, recycles physical resources through a pool and inserts state transitions.

pub mod blackboard;
pub mod builder;
pub mod executor;
pub mod graph;
pub mod pass;
pub mod passes;
pub mod pool;
pub mod registry;
pub mod resource;

pub use blackboard::*;
pub use builder::*;
pub use executor::*;
pub use graph::*;
pub use pass::*;
pub use passes::*;
pub use pool::*;
pub use registry::*;
pub use resource::*;
