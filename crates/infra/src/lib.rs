//! Infrastructure layer: event stores, projections, command dispatch, ticks,
//! configuration and the kernel façade.

pub mod command_dispatcher;
pub mod config;
pub mod event_store;
pub mod kernel;
pub mod projections;
pub mod triggers;
pub mod workers;

pub use command_dispatcher::{CommandDispatcher, DispatchError, DispatchOutcome};
pub use config::{ConfigError, KernelConfig};
pub use kernel::{DelegationAuthority, Kernel, KernelError};
