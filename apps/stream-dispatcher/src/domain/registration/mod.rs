//! Handler Registration
//!
//! Handler contracts, the two declaration styles (declarative
//! [`DeclaredHandler`] and programmatic [`RegistrationBuilder`]) and the
//! startup [`HandlerRegistry`].

mod builder;
mod declaration;
mod declared;
mod handler;
mod registry;

pub use builder::RegistrationBuilder;
pub use declaration::{
    DeclarationError, HandlerAdapter, OrderingRole, Registration, RegistrationOptions, Scope,
};
pub use declared::{Declaration, DeclaredHandler, InstrumentSelector};
pub use handler::{
    AsyncFn, AsyncHandler, BlockingFn, BlockingHandler, ExecutionMode, HandlerExecutor,
    HandlerResult, async_fn, blocking_fn,
};
pub use registry::{HandlerId, HandlerRegistry, RegisteredHandler, RegistrySnapshot};
