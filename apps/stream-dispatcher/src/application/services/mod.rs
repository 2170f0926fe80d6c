//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `InstrumentKeyResolver`: single-flight ticker resolution
//! - `ExecutionAdapter`: runs handlers per their execution mode
//! - `CategoryDispatcher`: one ordered dispatch loop per category
//! - `DispatchEngine`: startup orchestration and loop lifecycle

mod dispatcher;
mod engine;
mod executor;
mod reconnect;
mod resolver;
mod status;

pub use dispatcher::{CategoryDispatcher, DispatcherConfig, StreamFailure};
pub use engine::{DispatchEngine, PreparedDispatch, RunningEngine, StartupError};
pub use executor::{EventContext, ExecutionAdapter, InvocationOutcome};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
pub use resolver::{InstrumentKeyResolver, ResolveError};
pub use status::{CategorySnapshot, CategoryStatus, StatusBoard};
