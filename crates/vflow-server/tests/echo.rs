//! End-to-end scenario 1 (spec §8): dial a server endpoint, call
//! `Echo("ping")`, receive `"ping"`.

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

fn config() -> RuntimeConfig {
    RuntimeConfig {
        initial_flow_credit: 64 * 1024,
        ..RuntimeConfig::default()
    }
}

#[tokio::test]
async fn echo_round_trip() {
    let server_mgr = StreamManager::new(
        RoutingId::new_random(),
        Blessings::new(vec!["server".into()]),
        config(),
        SecurityMode::None,
    );
    let dispatcher = Arc::new(SingleObjectDispatcher(Arc::new(EchoInvoker)));
    let reserved = Arc::new(ReservedDispatcher::new(Arc::new(EmptyReservedInvoker)));
    let server = Server::new(server_mgr.clone(), dispatcher, reserved, config(), &[]);

    let endpoints = server
        .listen(&[ListenSpec::new("tcp", "127.0.0.1:0")], None, false)
        .await
        .unwrap();
    server.serve().await.unwrap();
    let endpoint = endpoints.into_iter().next().unwrap();

    let client_mgr = StreamManager::new(
        RoutingId::new_random(),
        Blessings::new(vec!["client".into()]),
        config(),
        SecurityMode::None,
    );
    let vc = client_mgr.dial(&endpoint, &AllowEveryone, &[]).await.unwrap();
    let flow = vc.connect().await.unwrap();

    let header = vflow_server::wire::RequestHeader {
        method: "Echo".into(),
        suffix: String::new(),
        deadline_millis: 0,
        num_args: 1,
        trace_id: None,
        language: None,
        end_of_stream_args: true,
    };
    flow.write(header.encode()).await.unwrap();
    flow.write(b"ping".to_vec()).await.unwrap();

    let response_bytes = flow.read().await.unwrap();
    let response = vflow_server::wire::ResponseHeader::decode(response_bytes).unwrap();
    assert!(response.error.is_none());
    assert_eq!(response.num_results, 1);
    let result = flow.read().await.unwrap();
    assert_eq!(result, b"ping");

    server.stop().await.unwrap();
}

#[tokio::test]
async fn stop_is_idempotent_after_reaching_stopped() {
    let server_mgr = StreamManager::new(
        RoutingId::new_random(),
        Blessings::new(vec!["server".into()]),
        config(),
        SecurityMode::None,
    );
    let dispatcher = Arc::new(SingleObjectDispatcher(Arc::new(EchoInvoker)));
    let reserved = Arc::new(ReservedDispatcher::new(Arc::new(EmptyReservedInvoker)));
    let server = Server::new(server_mgr, dispatcher, reserved, config(), &[]);

    server
        .listen(&[ListenSpec::new("tcp", "127.0.0.1:0")], None, false)
        .await
        .unwrap();
    server.serve().await.unwrap();

    server.stop().await.unwrap();
    // Spec §8: "For all servers S: Stop(S) idempotent — second call
    // returns nil without blocking." The server has already reached
    // `Stopped` here, not merely `Stopping`.
    server.stop().await.unwrap();
}
