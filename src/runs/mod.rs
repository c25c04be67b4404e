//! Run lifecycle - creation, start, stop, completion, cleanup
//!
//! The [`RunManager`] is the authority over every run. Each started run
//! owns a RunContext (clock, strategy runner, engine or live bridge,
//! adapter registration) that is guaranteed to be released on every exit
//! path: natural completion, explicit stop, or error.

pub mod bridge;
pub mod error;
pub mod manager;
pub mod registry;
pub mod types;

pub use bridge::LiveBridge;
pub use error::RunError;
pub use manager::{ExchangeFactory, RunManager, RunManagerConfig};
pub use registry::RunRegistry;
pub use types::{Run, RunMode, RunSpec, RunStatus};
