//! Backend abstraction layer
//!
//! Provides the render hardware interface the render graph records through, plus a
//! headless recording backend.

#[cfg(feature = "dummy")]
pub mod dummy;
pub mod traits;
pub mod types;

#[cfg(feature = "dummy")]
pub use dummy::*;
pub use traits::*;
pub use types::*;
