//! Execution layer: definitions, dispatch, the sensor engine and the
//! scheduling harness.

#![warn(missing_docs)]

pub mod config;
pub mod definitions;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod harness;
pub mod status;

pub use config::SchedulerConfig;
pub use definitions::{AssetSpec, Definitions, DefinitionsBuilder, DefinitionsSpec, DependencySpec};
pub use dispatcher::{DispatchError, MemoryDispatcher, RequestDispatcher};
pub use engine::{SensorEngine, TickResult};
pub use error::{LoadError, TickError};
pub use harness::SchedulingHarness;
pub use status::{BindingState, StatusBoard};
