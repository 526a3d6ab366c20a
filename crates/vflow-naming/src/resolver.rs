//! Namespace resolver (spec §4.8, C8): `Resolve` / `ResolveToMountTable`.
//!
//! ```text
//! 1. Split `name` against each configured root, forming an initial
//!    mount entry whose servers are the roots themselves.
//! 2. If `NoResolve` is set, return that entry immediately.
//! 3. Loop up to `max_resolve_depth`: if the current entry is terminal,
//!    return it (or the last mount-table entry seen, for
//!    `ResolveToMountTable`); otherwise resolve one more step against
//!    its servers (racing replicas, first answer wins, each call bounded
//!    by the caller's own deadline if it has one, else a configured
//!    per-call timeout) and continue.
//! 4. Exceeding the depth limit fails with `ResolutionDepthExceeded`.
//! ```

use std::sync::Arc;
use std::time::Duration;

use vflow_core::context::CallContext;
use vflow_core::error::{Error, Kind, Result};
use vflow_core::mount::{MountEntry, MountedServer};
use vflow_core::options::{ClientCallOption, RuntimeConfig};
use vflow_core::prelude::Endpoint;

use crate::cache::ResolutionCache;
use crate::client::MountTableClient;

pub struct Resolver<C: MountTableClient> {
    client: Arc<C>,
    roots: Vec<Endpoint>,
    cache: ResolutionCache,
    max_depth: u32,
    call_timeout: Duration,
}

impl<C: MountTableClient> Resolver<C> {
    pub fn new(client: Arc<C>, roots: Vec<Endpoint>, config: &RuntimeConfig) -> Self {
        Self {
            client,
            roots,
            cache: ResolutionCache::new(config.resolve_cache_ttl),
            max_depth: config.max_resolve_depth,
            call_timeout: config.mount_table_call_timeout,
        }
    }

    /// Resolves `name` down to the object it ultimately names (spec
    /// §4.8 `Resolve`).
    pub async fn resolve(&self, ctx: &CallContext, name: &str, opts: &[ClientCallOption]) -> Result<MountEntry> {
        self.resolve_generic(ctx, name, opts, false).await
    }

    /// Resolves `name` only as far as the last mount table on the path
    /// (spec §4.8 `ResolveToMountTable`) — used by `Mount`/`Unmount` to
    /// find the table to administer rather than the leaf it names.
    pub async fn resolve_to_mount_table(&self, ctx: &CallContext, name: &str, opts: &[ClientCallOption]) -> Result<MountEntry> {
        self.resolve_generic(ctx, name, opts, true).await
    }

    /// Evicts the cached entry for `name` and its nearest cached
    /// ancestor (spec §4.8 `FlushCacheEntry`).
    pub fn flush_cache_entry(&self, name: &str) {
        self.cache.flush(name);
    }

    fn initial_entry(&self, name: &str) -> Result<MountEntry> {
        if self.roots.is_empty() {
            return Err(Error::no_servers(
                "no mount table roots configured; cannot resolve names",
            ));
        }
        Ok(MountEntry {
            name: name.to_string(),
            servers: self
                .roots
                .iter()
                .map(|root| MountedServer {
                    endpoint: root.clone(),
                    ttl: Duration::ZERO,
                })
                .collect(),
            serves_mount_table: true,
        })
    }

    /// The timeout applied to one `ResolveStep` RPC: the caller's own
    /// deadline if it set one, else this resolver's configured default
    /// (spec §4.8 step 3 "a per-call timeout, but only if the context
    /// carries no deadline of its own").
    fn step_timeout(&self, ctx: &CallContext) -> Duration {
        ctx.deadline().remaining().unwrap_or(self.call_timeout)
    }

    async fn resolve_generic(
        &self,
        ctx: &CallContext,
        name: &str,
        opts: &[ClientCallOption],
        want_mount_table: bool,
    ) -> Result<MountEntry> {
        let mut entry = self.initial_entry(name)?;
        if opts.iter().any(|o| matches!(o, ClientCallOption::NoResolve)) {
            return Ok(entry);
        }

        let mut last_mount_table = entry.clone();
        for _ in 0..self.max_depth {
            if entry.is_terminal() {
                return Ok(if want_mount_table { last_mount_table } else { entry });
            }
            last_mount_table = entry.clone();
            entry = self.resolve_step_any(ctx, &entry.servers, &entry.name).await?;
        }
        Err(Error::resolution_depth_exceeded(format!(
            "exceeded max resolve depth ({}) resolving {name}",
            self.max_depth
        )))
    }

    /// Races every server in `servers` for one step of resolution on
    /// `suffix`; the first to answer wins, `NoExist` short-circuits the
    /// rest (spec §4.8 "the first server to answer wins; a `NoSuchName`
    /// from any replica is authoritative").
    async fn resolve_step_any(&self, ctx: &CallContext, servers: &[MountedServer], suffix: &str) -> Result<MountEntry> {
        if let Some(cached) = self.cache.get(suffix) {
            return Ok(cached);
        }

        let timeout = self.step_timeout(ctx);
        let mut set = tokio::task::JoinSet::new();
        for server in servers {
            let client = self.client.clone();
            let endpoint = server.endpoint.clone();
            let name = suffix.to_string();
            set.spawn(async move { client.resolve_step(&endpoint, &name, timeout).await });
        }

        let mut last_err = None;
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(Ok(entry)) => {
                    self.cache.put(suffix, entry.clone());
                    return Ok(entry);
                }
                Ok(Err(e)) if e.kind() == Kind::NoExist => return Err(e),
                Ok(Err(e)) => last_err = Some(e),
                Err(_join_err) => {}
            }
        }
        Err(last_err.unwrap_or_else(|| Error::no_servers("no mount table replica responded")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use vflow_core::ids::RoutingId;

    struct CyclicClient {
        calls: AtomicU32,
    }

    #[async_trait]
    impl MountTableClient for CyclicClient {
        async fn resolve_step(&self, _server: &Endpoint, name: &str, _timeout: Duration) -> Result<MountEntry> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            Ok(MountEntry {
                name: name.to_string(),
                servers: vec![MountedServer {
                    endpoint: Endpoint::new("tcp", "127.0.0.1:1".to_string(), RoutingId::NULL),
                    ttl: Duration::from_secs(60),
                }],
                serves_mount_table: true,
            })
        }

        async fn mount(&self, _server: &Endpoint, _name: &str, _target: &Endpoint, _ttl: Duration, _replace: bool) -> Result<()> {
            unimplemented!()
        }

        async fn unmount(&self, _server: &Endpoint, _name: &str, _target: Option<&Endpoint>) -> Result<()> {
            unimplemented!()
        }
    }

    struct TerminalClient;

    #[async_trait]
    impl MountTableClient for TerminalClient {
        async fn resolve_step(&self, _server: &Endpoint, name: &str, _timeout: Duration) -> Result<MountEntry> {
            Ok(MountEntry {
                name: name.to_string(),
                servers: Vec::new(),
                serves_mount_table: false,
            })
        }

        async fn mount(&self, _server: &Endpoint, _name: &str, _target: &Endpoint, _ttl: Duration, _replace: bool) -> Result<()> {
            unimplemented!()
        }

        async fn unmount(&self, _server: &Endpoint, _name: &str, _target: Option<&Endpoint>) -> Result<()> {
            unimplemented!()
        }
    }

    fn roots() -> Vec<Endpoint> {
        vec![Endpoint::new("tcp", "127.0.0.1:0".to_string(), RoutingId::NULL)]
    }

    #[tokio::test]
    async fn resolve_with_no_roots_fails_no_servers() {
        let client = Arc::new(TerminalClient);
        let resolver = Resolver::new(client, Vec::new(), &RuntimeConfig::default());
        let err = resolver.resolve(&CallContext::new(), "a/b", &[]).await.unwrap_err();
        assert_eq!(err.kind(), Kind::NoServers);
    }

    #[tokio::test]
    async fn no_resolve_option_skips_resolution() {
        let client = Arc::new(TerminalClient);
        let resolver = Resolver::new(client, roots(), &RuntimeConfig::default());
        let entry = resolver
            .resolve(&CallContext::new(), "a/b", &[ClientCallOption::NoResolve])
            .await
            .unwrap();
        assert_eq!(entry.name, "a/b");
        assert!(entry.serves_mount_table);
    }

    #[tokio::test]
    async fn resolve_stops_at_a_terminal_entry() {
        let client = Arc::new(TerminalClient);
        let mut config = RuntimeConfig::default();
        config.resolve_cache_ttl = Duration::from_secs(0);
        let resolver = Resolver::new(client, roots(), &config);
        let entry = resolver.resolve(&CallContext::new(), "a/b", &[]).await.unwrap();
        assert!(entry.is_terminal());
    }

    #[tokio::test]
    async fn a_mount_cycle_past_max_depth_fails_with_resolution_depth_exceeded() {
        let client = Arc::new(CyclicClient { calls: AtomicU32::new(0) });
        let mut config = RuntimeConfig::default();
        config.max_resolve_depth = 4;
        config.resolve_cache_ttl = Duration::from_secs(0);
        let resolver = Resolver::new(client, roots(), &config);
        let err = resolver.resolve(&CallContext::new(), "a/b", &[]).await.unwrap_err();
        assert_eq!(err.kind(), Kind::ResolutionDepthExceeded);
    }

    #[tokio::test]
    async fn resolve_step_uses_context_deadline_over_configured_timeout() {
        let client = Arc::new(TerminalClient);
        let mut config = RuntimeConfig::default();
        config.mount_table_call_timeout = Duration::from_secs(30);
        let resolver = Resolver::new(client, roots(), &config);
        let ctx = CallContext::new().with_deadline(vflow_core::context::Deadline::after(Duration::from_millis(50)));
        let timeout = resolver.step_timeout(&ctx);
        assert!(timeout <= Duration::from_millis(50));
    }
}
