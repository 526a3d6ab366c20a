//! End-to-end round trip: an in-process `vflow-server`-hosted mount
//! table, resolved through `RpcMountTableClient`/`Resolver` over a real
//! dialed connection (spec §4.8/§4.9, §8 "mount-table interaction").

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use vflow_core::context::CallContext;
use vflow_core::error::{Error, Result};
use vflow_core::ids::RoutingId;
use vflow_core::mount::{MountEntry, MountedServer};
use vflow_core::options::{ClientCallOption, RuntimeConfig};
use vflow_core::prelude::{AllowEveryone, Blessings, Endpoint};
use vflow_naming::client::RpcMountTableClient;
use vflow_naming::resolver::Resolver;
use vflow_server::dispatcher::{AllowEveryoneAuthorizer, Authorizer, Dispatcher, EmptyReservedInvoker, ReservedDispatcher};
use vflow_server::invoker::{Invoker, MethodPrepare, MethodSignature};
use vflow_server::server::{ListenSpec, Server};
use vflow_server::ServerStream;
use vflow_transport::{SecurityMode, StreamManager};

/// The shared state behind every suffix of the mount table object.
struct MountTableStore {
    entries: Mutex<HashMap<String, MountEntry>>,
}

impl MountTableStore {
    fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

/// One suffix's view onto the shared store — `Dispatcher::lookup` binds
/// the suffix (the mounted name) at lookup time, since `Invoker::invoke`
/// itself is never told which suffix it was reached through.
struct MountTableInvoker {
    name: String,
    store: Arc<MountTableStore>,
}

fn encode_entry(name: &str, entry: &MountEntry) -> Bytes {
    use bytes::BufMut;
    let mut buf = bytes::BytesMut::new();
    buf.put_u32(name.len() as u32);
    buf.put_slice(name.as_bytes());
    buf.put_u8(entry.serves_mount_table as u8);
    buf.put_u32(entry.servers.len() as u32);
    for server in &entry.servers {
        let formatted = server.endpoint.format();
        buf.put_u32(formatted.len() as u32);
        buf.put_slice(formatted.as_bytes());
        buf.put_u64(server.ttl.as_secs());
    }
    buf.freeze()
}

#[async_trait]
impl Invoker for MountTableInvoker {
    fn prepare(&self, method: &str) -> Result<MethodPrepare> {
        match method {
            "ResolveStep" => Ok(MethodPrepare {
                num_args: 0,
                tags: Vec::new(),
            }),
            "Mount" => Ok(MethodPrepare {
                num_args: 3,
                tags: Vec::new(),
            }),
            "Unmount" => Ok(MethodPrepare {
                num_args: 0,
                tags: Vec::new(),
            }),
            other => Err(Error::unknown_method(other.to_string())),
        }
    }

    async fn invoke(&self, _ctx: &CallContext, method: &str, args: Vec<Bytes>, _stream: &ServerStream) -> Result<Vec<Bytes>> {
        match method {
            "ResolveStep" => {
                let entry = self
                    .store
                    .entries
                    .lock()
                    .get(&self.name)
                    .cloned()
                    .ok_or_else(|| Error::no_exist(format!("no mount entry for {}", self.name)))?;
                Ok(vec![encode_entry(&self.name, &entry)])
            }
            "Mount" => {
                let address = String::from_utf8(args[0].to_vec()).unwrap();
                let endpoint = Endpoint::parse(&address).unwrap();
                let ttl_secs = u64::from_be_bytes(args[1][..8].try_into().unwrap());
                self.store.entries.lock().insert(
                    self.name.clone(),
                    MountEntry {
                        name: self.name.clone(),
                        servers: vec![MountedServer {
                            endpoint,
                            ttl: Duration::from_secs(ttl_secs),
                        }],
                        serves_mount_table: false,
                    },
                );
                Ok(Vec::new())
            }
            "Unmount" => {
                self.store.entries.lock().remove(&self.name);
                Ok(Vec::new())
            }
            other => Err(Error::unknown_method(other.to_string())),
        }
    }

    fn signature(&self) -> Vec<MethodSignature> {
        Vec::new()
    }
}

struct SuffixRoutedDispatcher(Arc<MountTableStore>);

impl Dispatcher for SuffixRoutedDispatcher {
    fn lookup(&self, suffix: &str) -> Result<Option<(Arc<dyn Invoker>, Arc<dyn Authorizer>)>> {
        let invoker = Arc::new(MountTableInvoker {
            name: suffix.to_string(),
            store: self.0.clone(),
        });
        Ok(Some((invoker, Arc::new(AllowEveryoneAuthorizer) as Arc<dyn Authorizer>)))
    }
}

fn config() -> RuntimeConfig {
    RuntimeConfig {
        initial_flow_credit: 64 * 1024,
        ..RuntimeConfig::default()
    }
}

#[tokio::test]
async fn resolve_reaches_a_server_mounted_through_the_rpc_client() {
    let server_mgr = StreamManager::new(
        RoutingId::new_random(),
        Blessings::new(vec!["mount-table".into()]),
        config(),
        SecurityMode::None,
    );
    let dispatcher = Arc::new(SuffixRoutedDispatcher(Arc::new(MountTableStore::new())));
    let reserved = Arc::new(ReservedDispatcher::new(Arc::new(EmptyReservedInvoker)));
    let server = Server::new(server_mgr.clone(), dispatcher, reserved, config(), &[]);
    let endpoints = server
        .listen(&[ListenSpec::new("tcp", "127.0.0.1:0")], None, false)
        .await
        .unwrap();
    server.serve().await.unwrap();
    let table_endpoint = endpoints.into_iter().next().unwrap();

    let client_mgr = StreamManager::new(
        RoutingId::new_random(),
        Blessings::new(vec!["client".into()]),
        config(),
        SecurityMode::None,
    );
    let client = Arc::new(RpcMountTableClient::new(client_mgr));

    let target = Endpoint::new("tcp", "10.1.1.1:9000", RoutingId::new_random());
    client
        .mount(&table_endpoint, "svc/leaf", &target, Duration::from_secs(60), true)
        .await
        .unwrap();

    let resolver = Resolver::new(client.clone(), vec![table_endpoint.clone()], &config());
    let ctx = CallContext::new();
    let resolved = resolver.resolve(&ctx, "svc/leaf", &[]).await.unwrap();
    assert!(resolved.is_terminal());
    assert_eq!(resolved.servers.len(), 1);
    assert_eq!(resolved.servers[0].endpoint, target);

    let unresolved = resolver.resolve(&ctx, "svc/missing", &[]).await;
    assert_eq!(unresolved.unwrap_err().kind(), vflow_core::error::Kind::NoExist);

    let no_resolve = resolver
        .resolve(&ctx, "svc/leaf", &[ClientCallOption::NoResolve])
        .await
        .unwrap();
    assert_eq!(no_resolve.name, "svc/leaf");

    server.stop().await.unwrap();
}
