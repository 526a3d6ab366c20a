//! End-to-end scenario 2 (spec §8): three flows opened concurrently on
//! one VC each complete independently and return only their own data.

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
        _method: &str,
        mut args: Vec<Bytes>,
        _stream: &ServerStream,
    ) -> Result<Vec<Bytes>> {
        Ok(vec![args.remove(0)])
    }

    fn signature(&self) -> Vec<MethodSignature> {
        Vec::new()
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

async fn call_echo(vc: &Arc<vflow_transport::VirtualCircuit>, payload: &'static str) -> Vec<u8> {
    let flow = vc.connect().await.unwrap();
    let header = RequestHeader {
        method: "Echo".into(),
        suffix: String::new(),
        deadline_millis: 0,
        num_args: 1,
        trace_id: None,
        language: None,
        end_of_stream_args: true,
    };
    flow.write(header.encode()).await.unwrap();
    flow.write(payload.as_bytes().to_vec()).await.unwrap();
    let response_bytes = flow.read().await.unwrap();
    let response = ResponseHeader::decode(response_bytes).unwrap();
    assert!(response.error.is_none());
    flow.read().await.unwrap()
}

#[tokio::test]
async fn three_concurrent_flows_each_return_their_own_data() {
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

    let (a, b, c) = tokio::join!(call_echo(&vc, "a"), call_echo(&vc, "b"), call_echo(&vc, "c"));
    assert_eq!(a, b"a");
    assert_eq!(b, b"b");
    assert_eq!(c, b"c");

    server.stop().await.unwrap();
}
