//! Runnable walkthrough of spec scenario 1 (spec §8): start a server that
//! exposes a single `Echo` method, publish an endpoint for it, dial that
//! endpoint from an in-process client, and print the round trip.
//!
//! This is the one ambient tooling binary alongside the six library
//! crates — there is no protocol in it that the `vflow-server` test
//! suite doesn't already exercise; it only wires the pieces together the
//! way an operator would run them from a shell.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use vflow_core::context::CallContext;
use vflow_core::error::{Error, Result};
use vflow_core::ids::RoutingId;
use vflow_core::options::RuntimeConfig;
use vflow_core::prelude::{AllowEveryone, Blessings};
use vflow_server::dispatcher::{AllowEveryoneAuthorizer, Authorizer, Dispatcher, EmptyReservedInvoker, ReservedDispatcher};
use vflow_server::invoker::{Invoker, MethodPrepare, MethodSignature};
use vflow_server::server::{ListenSpec, Server};
use vflow_server::wire::{RequestHeader, ResponseHeader};
use vflow_server::ServerStream;
use vflow_transport::{SecurityMode, StreamManager};

struct EchoInvoker;

#[async_trait]
impl Invoker for EchoInvoker {
    fn prepare(&self, method: &str) -> Result<MethodPrepare> {
        if method == "Echo" {
            Ok(MethodPrepare {
                num_args: 1,
                tags: Vec::new(),
            })
        } else {
            Err(Error::unknown_method(method.to_string()))
        }
    }

    async fn invoke(
        &self,
        _ctx: &CallContext,
        method: &str,
        mut args: Vec<Bytes>,
        _stream: &ServerStream,
    ) -> Result<Vec<Bytes>> {
        assert_eq!(method, "Echo");
        Ok(vec![args.remove(0)])
    }

    fn signature(&self) -> Vec<MethodSignature> {
        vec![MethodSignature {
            name: "Echo".into(),
            num_args: 1,
            num_results: 1,
            tags: Vec::new(),
        }]
    }
}

/// Routes every suffix to the one `EchoInvoker` object (spec's "leaf
/// server with a single exported object" shape).
struct SingleObjectDispatcher(Arc<dyn Invoker>);

impl Dispatcher for SingleObjectDispatcher {
    fn lookup(&self, suffix: &str) -> Result<Option<(Arc<dyn Invoker>, Arc<dyn Authorizer>)>> {
        if suffix.is_empty() {
            Ok(Some((self.0.clone(), Arc::new(AllowEveryoneAuthorizer) as Arc<dyn Authorizer>)))
        } else {
            Ok(None)
        }
    }
}

fn runtime_config() -> RuntimeConfig {
    RuntimeConfig {
        initial_flow_credit: 64 * 1024,
        ..RuntimeConfig::default()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")))
        .init();

    let server_mgr = StreamManager::new(
        RoutingId::new_random(),
        Blessings::new(vec!["demo/server".into()]),
        runtime_config(),
        SecurityMode::None,
    );
    let dispatcher = Arc::new(SingleObjectDispatcher(Arc::new(EchoInvoker)));
    let reserved = Arc::new(ReservedDispatcher::new(Arc::new(EmptyReservedInvoker)));
    let server = Server::new(server_mgr.clone(), dispatcher, reserved, runtime_config(), &[]);

    let endpoints = server
        .listen(&[ListenSpec::new("tcp", "127.0.0.1:0")], None, false)
        .await?;
    server.serve().await?;
    let endpoint = endpoints.into_iter().next().expect("listen produced at least one endpoint");
    tracing::info!(%endpoint, "echo server listening");

    let client_mgr = StreamManager::new(
        RoutingId::new_random(),
        Blessings::new(vec!["demo/client".into()]),
        runtime_config(),
        SecurityMode::None,
    );
    let vc = client_mgr.dial(&endpoint, &AllowEveryone, &[]).await?;
    let flow = vc.connect().await?;

    let header = RequestHeader {
        method: "Echo".into(),
        suffix: String::new(),
        deadline_millis: 0,
        num_args: 1,
        trace_id: None,
        language: None,
        end_of_stream_args: true,
    };
    flow.write(header.encode()).await?;
    flow.write(b"hello, vflow".to_vec()).await?;

    let response_bytes = flow.read().await?;
    let response = ResponseHeader::decode(response_bytes)?;
    if let Some(wire_err) = response.error {
        let err = Error::from(wire_err);
        eprintln!("Echo call failed: {err}");
        server.stop().await?;
        return Err(err);
    }
    let result = flow.read().await?;
    println!("Echo replied: {}", String::from_utf8_lossy(&result));

    server.stop().await?;
    Ok(())
}
