//! Mount-table data model (spec §3 "Endpoint Namespace entry (MountEntry)").

use std::time::{Duration, Instant};

use crate::endpoint::Endpoint;

/// One server mounted at a name, with its advertised TTL.
#[derive(Clone, Debug)]
pub struct MountedServer {
    pub endpoint: Endpoint,
    pub ttl: Duration,
}

/// The result of resolving one step of a hierarchical name.
#[derive(Clone, Debug)]
pub struct MountEntry {
    pub name: String,
    pub servers: Vec<MountedServer>,
    pub serves_mount_table: bool,
}

impl MountEntry {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            servers: Vec::new(),
            serves_mount_table: false,
        }
    }

    /// A name has no further suffix to resolve and is not itself a mount
    /// table: the resolve loop's termination condition (spec §4.8).
    pub fn is_terminal(&self) -> bool {
        !self.serves_mount_table
    }
}

/// A cached [`MountEntry`] with an expiry, held by the resolution cache.
#[derive(Clone, Debug)]
pub struct CacheEntry {
    pub entry: MountEntry,
    pub expiry: Instant,
}

impl CacheEntry {
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expiry
    }
}
