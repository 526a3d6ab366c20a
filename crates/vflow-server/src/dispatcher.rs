//! User-supplied lookup from object suffix to (invoker, authorizer)
//! (spec §3 "Dispatcher"), plus the reserved-names dispatcher spec
//! §4.7.5 step 4 carves out for introspection methods.

use std::sync::Arc;

use vflow_core::context::CallContext;
use vflow_core::error::Result;
use vflow_core::prelude::Blessings;

use crate::invoker::{Invoker, MethodPrepare, MethodSignature};

/// Every suffix beginning with this prefix routes to the
/// reserved-names dispatcher under `AllowEveryone` authorization (spec
/// §4.7.5 step 4), never to the user dispatcher.
pub const RESERVED_NAME_PREFIX: &str = "__";

/// Decides whether a caller's presented blessings permit a call (spec
/// §4.7.5 step 7). Distinct from
/// [`vflow_core::blessings::ServerAuthorizer`], which runs on the
/// *dialing* side to decide whether to trust a server; this one runs on
/// the *serving* side to decide whether to trust a caller.
pub trait Authorizer: Send + Sync + 'static {
    fn authorize(&self, ctx: &CallContext, blessings: &Blessings) -> Result<()>;
}

/// Accepts every caller unconditionally (spec §4.7.5 step 4
/// "`AllowEveryone` authorization").
#[derive(Default, Clone, Copy)]
pub struct AllowEveryoneAuthorizer;

impl Authorizer for AllowEveryoneAuthorizer {
    fn authorize(&self, _ctx: &CallContext, _blessings: &Blessings) -> Result<()> {
        Ok(())
    }
}

/// User-supplied lookup from object suffix to (invoker, authorizer)
/// (spec §3 "Dispatcher"). A `None` result means "no object at this
/// suffix" (spec §4.7.5 step 4: "a nil result yields `ErrUnknownSuffix`").
pub trait Dispatcher: Send + Sync + 'static {
    fn lookup(&self, suffix: &str) -> Result<Option<(Arc<dyn Invoker>, Arc<dyn Authorizer>)>>;
}

/// A dispatcher backed by a fixed, pre-registered map from suffix to
/// (invoker, authorizer) — the common case for a server that hosts a
/// small, known set of objects.
pub struct StaticDispatcher {
    entries: Vec<(String, Arc<dyn Invoker>, Arc<dyn Authorizer>)>,
}

impl StaticDispatcher {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    pub fn register(
        mut self,
        suffix: impl Into<String>,
        invoker: Arc<dyn Invoker>,
        authorizer: Arc<dyn Authorizer>,
    ) -> Self {
        self.entries.push((suffix.into(), invoker, authorizer));
        self
    }
}

impl Default for StaticDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher for StaticDispatcher {
    fn lookup(&self, suffix: &str) -> Result<Option<(Arc<dyn Invoker>, Arc<dyn Authorizer>)>> {
        Ok(self
            .entries
            .iter()
            .find(|(s, _, _)| s == suffix)
            .map(|(_, inv, auth)| (inv.clone(), auth.clone())))
    }
}

/// The built-in dispatcher reserved-prefix suffixes route to (spec
/// §4.7.5 step 4). Exposes introspection-style methods under
/// `AllowEveryone`; today this is limited to `__Signature`, reporting
/// the signatures of every method the *user* dispatcher would expose
/// for a given suffix is out of scope for the core (that belongs to the
/// reflection layer built atop it) — the reserved dispatcher itself
/// only needs to exist and route correctly.
pub struct ReservedDispatcher {
    invoker: Arc<dyn Invoker>,
}

impl ReservedDispatcher {
    pub fn new(invoker: Arc<dyn Invoker>) -> Self {
        Self { invoker }
    }
}

impl Dispatcher for ReservedDispatcher {
    fn lookup(&self, _suffix: &str) -> Result<Option<(Arc<dyn Invoker>, Arc<dyn Authorizer>)>> {
        Ok(Some((
            self.invoker.clone(),
            Arc::new(AllowEveryoneAuthorizer) as Arc<dyn Authorizer>,
        )))
    }
}

/// A no-op reserved invoker: answers `__Signature` with an empty
/// signature list and rejects everything else as `UnknownMethod`. A
/// real embedding replaces this with one that actually reflects over
/// the dispatcher it is paired with.
#[derive(Default)]
pub struct EmptyReservedInvoker;

#[async_trait::async_trait]
impl Invoker for EmptyReservedInvoker {
    fn prepare(&self, method: &str) -> Result<MethodPrepare> {
        if method == "__Signature" {
            Ok(MethodPrepare {
                num_args: 0,
                tags: Vec::new(),
            })
        } else {
            Err(vflow_core::error::Error::unknown_method(format!(
                "reserved method {method} not implemented"
            )))
        }
    }

    async fn invoke(
        &self,
        _ctx: &CallContext,
        _method: &str,
        _args: Vec<bytes::Bytes>,
        _stream: &crate::call::ServerStream,
    ) -> Result<Vec<bytes::Bytes>> {
        Ok(Vec::new())
    }

    fn signature(&self) -> Vec<MethodSignature> {
        Vec::new()
    }
}
