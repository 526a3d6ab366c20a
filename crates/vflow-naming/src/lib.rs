//! `vflow-naming`: namespace resolution and mount-table publishing
//! (spec §4.8/§4.9, C8/C9).
//!
//! Depends on `vflow-server` (to subscribe to `Server::watch_endpoints`)
//! rather than the reverse — `vflow-server` has no naming awareness at
//! all, so a server can run standalone or be published, never both
//! coupled in the same direction.

pub mod cache;
pub mod client;
pub mod publisher;
pub mod resolver;
pub mod watch;

pub use cache::ResolutionCache;
pub use client::{MountTableClient, RpcMountTableClient};
pub use publisher::Publisher;
pub use resolver::Resolver;
pub use watch::bridge_endpoints;

pub mod prelude {
    pub use crate::client::{MountTableClient, RpcMountTableClient};
    pub use crate::publisher::Publisher;
    pub use crate::resolver::Resolver;
    pub use crate::watch::bridge_endpoints;
}
