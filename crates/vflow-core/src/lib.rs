//! `vflow-core`: shared data model, error domain, and ambient contracts
//! for the vflow RPC runtime.
//!
//! This crate has no transport dependencies. It defines the vocabulary
//! every other crate in the workspace builds on: [`endpoint::Endpoint`]
//! and [`ids`] (spec §3 data model), the closed [`error`] domain (spec
//! §7), [`context`] for cancellation/deadline propagation (spec §5), and
//! a handful of ambient-stack types (logging facade, option enums) that
//! a complete crate needs but that spec.md treats as external
//! collaborators named only by interface.

pub mod blessings;
pub mod context;
pub mod endpoint;
pub mod error;
pub mod ids;
pub mod mount;
pub mod observability;
pub mod options;

pub use context::{CallContext, Cancellation, Context, Deadline};
pub use endpoint::Endpoint;
pub use error::{Error, Kind as ErrorKind, Result};
pub use ids::{FlowId, RoutingId, VcId, NUM_RESERVED_FLOWS, SHARED_FLOW_ID};
pub use mount::{CacheEntry, MountEntry, MountedServer};
pub use observability::{NoopObservability, Observability, TracingObservability};
pub use options::{ClientCallOption, DialOption, ListenOption, RuntimeConfig, ServerOption};

/// Convenience re-exports for downstream crates; mirrors the single
/// `prelude` module pattern used throughout the crate's sibling crates.
pub mod prelude {
    pub use crate::blessings::{AllowEveryone, Blessings, Discharge, ServerAuthorizer};
    pub use crate::context::{CallContext, Cancellation, Context, Deadline};
    pub use crate::endpoint::Endpoint;
    pub use crate::error::{Error, Kind as ErrorKind, Result};
    pub use crate::ids::{FlowId, RoutingId, VcId};
    pub use crate::mount::{CacheEntry, MountEntry, MountedServer};
    pub use crate::observability::Observability;
    pub use crate::options::RuntimeConfig;
}
