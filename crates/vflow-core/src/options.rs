//! Call-site option types (spec §9 REDESIGN FLAGS: "option structs of
//! mixed types... re-encode as a tagged variant enumerating exactly the
//! options the core consumes, and a separate enumeration per call site").
//!
//! The source system shares one marker-method option hierarchy across
//! listen/dial/server/client call sites, relying on dynamic type
//! assertions to recover the options that apply to a given call. That
//! pattern has no sound translation into a statically typed language, so
//! each call site gets its own closed enum here instead.

use std::time::Duration;

/// Options accepted by [`crate::RuntimeConfig`]-driven `Listen` calls.
#[derive(Clone, Debug)]
pub enum ListenOption {
    /// Dial through this proxy's name instead of listening directly.
    Proxy(String),
    /// Override the advertised protocol for the resulting endpoints.
    ServesMountTable(bool),
}

/// Options accepted by `Dial` calls.
#[derive(Clone, Debug)]
pub enum DialOption {
    /// Fail fast instead of retrying once on a dead cached VIF.
    NoRetry,
    /// Attach a channel-timeout override for this dial only.
    Timeout(Duration),
}

/// Options accepted when constructing a `Server`.
#[derive(Clone, Debug)]
pub enum ServerOption {
    /// Mark the server as a leaf: non-empty suffixes are rejected before
    /// reaching the dispatcher (spec §4.7.5 step 4).
    IsLeaf,
    /// Serves a mount table (affects the endpoints it publishes).
    ServesMountTable,
}

/// Options accepted by client calls (`StartCall`-equivalent).
#[derive(Clone, Debug)]
pub enum ClientCallOption {
    /// Skip namespace resolution; `name` is already a dialable endpoint.
    NoResolve,
    /// Override the per-call deadline.
    Deadline(Duration),
}

/// Runtime-wide tunables the core consumes directly (spec §1 descopes
/// *loading* configuration from a file/CLI, but the option types the
/// loaded values populate are part of the core's public contract).
#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    /// Upper bound on a single frame's payload length (spec §4.1).
    pub frame_max_bytes: u32,
    /// Default timeout for decoding the initial request header (spec §4.7.5 step 1).
    pub default_call_timeout: Duration,
    /// Mount-table RPC timeout used when the caller's context has no
    /// deadline (spec §4.8 step 3, §5 "Timeouts").
    pub mount_table_call_timeout: Duration,
    /// Publisher remount interval (spec §4.9).
    pub publish_period: Duration,
    /// Proxy-reconnect backoff bounds (spec §4.7.3).
    pub proxy_backoff_min: Duration,
    pub proxy_backoff_max: Duration,
    /// Resolution depth guard (spec §4.8 step 3/4, §8 scenario 6).
    pub max_resolve_depth: u32,
    /// Resolution cache TTL (spec §4.8 "Resolution cache").
    pub resolve_cache_ttl: Duration,
    /// Initial per-flow credit granted on `OpenFlow` (spec §6).
    pub initial_flow_credit: u32,
    /// Hard bound on `Server::stop` waiting for in-flight work (spec §4.7.6).
    pub stop_grace_period: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            frame_max_bytes: 4 * 1024 * 1024,
            default_call_timeout: Duration::from_secs(30),
            mount_table_call_timeout: Duration::from_secs(5),
            publish_period: Duration::from_secs(60),
            proxy_backoff_min: Duration::from_millis(5),
            proxy_backoff_max: Duration::from_secs(5 * 60),
            max_resolve_depth: 32,
            resolve_cache_ttl: Duration::from_secs(120),
            initial_flow_credit: 1024 * 1024,
            stop_grace_period: Duration::from_secs(5),
        }
    }
}
