//! What an object exposes to the dispatch engine (spec §3 "Invoker").
//!
//! The value codec that turns typed arguments into the [`Bytes`] blobs
//! this trait traffics in is an external collaborator (spec §1); the
//! core only needs the capability set described here: `Prepare` (how
//! many placeholders a method expects, plus its tags), `Invoke` (call
//! it), and `Signature` (describe it for introspection).

use async_trait::async_trait;
use bytes::Bytes;
use vflow_core::context::CallContext;
use vflow_core::error::Result;

use crate::call::ServerStream;

/// What `Prepare` returns: the number of positional argument
/// placeholders a method expects and its method tags (spec §3 "how to
/// decode positional argument placeholders for a named method").
#[derive(Clone, Debug, Default)]
pub struct MethodPrepare {
    pub num_args: u32,
    pub tags: Vec<String>,
}

/// One method's full signature, as `Signature` exposes it for
/// introspection/reflection callers (spec §3 "Signature").
#[derive(Clone, Debug)]
pub struct MethodSignature {
    pub name: String,
    pub num_args: u32,
    pub num_results: u32,
    pub tags: Vec<String>,
}

/// Describes how to decode a method's arguments, invoke it, and produce
/// results (spec §3 "Invoker").
///
/// Implementations are typically reflection-generated by the codec this
/// crate doesn't own; the dispatch engine only ever calls through this
/// trait, never assumes a concrete shape underneath it.
#[async_trait]
pub trait Invoker: Send + Sync + 'static {
    /// Spec §4.7.5 step 5: "`Prepare(method, numArgs)` to get argument
    /// placeholders and method tags". Returns `Err(UnknownMethod)` if
    /// this object has no such method.
    fn prepare(&self, method: &str) -> Result<MethodPrepare>;

    /// Spec §4.7.5 step 8: invoke the method with its decoded arguments
    /// under a call context, streaming extra results/arguments through
    /// `stream` if the method needs to.
    async fn invoke(
        &self,
        ctx: &CallContext,
        method: &str,
        args: Vec<Bytes>,
        stream: &ServerStream,
    ) -> Result<Vec<Bytes>>;

    /// Describes every method this invoker exposes (spec §3 "Signature").
    fn signature(&self) -> Vec<MethodSignature>;
}
