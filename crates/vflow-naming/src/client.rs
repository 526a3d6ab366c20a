//! RPC client for mount-table servers (spec §4.8/§6: `ResolveStep`,
//! `Mount`, `Unmount`).
//!
//! The value codec is external per spec §1; this module only needs a
//! small encoding for the handful of primitive argument/result shapes
//! mount-table calls actually carry (strings, endpoints, u64 TTLs,
//! bools), framed the same way `vflow-server`'s flow-server loop frames
//! them: one [`vflow_transport::Flow::write`] per positional value.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use vflow_core::error::{Error, Result};
use vflow_core::mount::{MountEntry, MountedServer};
use vflow_core::prelude::{AllowEveryone, Endpoint};
use vflow_server::wire::{RequestHeader, ResponseHeader};
use vflow_transport::StreamManager;

fn put_string(buf: &mut BytesMut, s: &str) {
    buf.put_u32(s.len() as u32);
    buf.put_slice(s.as_bytes());
}

fn require(buf: &Bytes, n: usize) -> Result<()> {
    if buf.len() < n {
        Err(Error::bad_protocol("truncated mount-table RPC value"))
    } else {
        Ok(())
    }
}

fn get_string(buf: &mut Bytes) -> Result<String> {
    require(buf, 4)?;
    let len = buf.get_u32() as usize;
    require(buf, len)?;
    let bytes = buf.split_to(len);
    String::from_utf8(bytes.to_vec()).map_err(|e| Error::bad_protocol("mount-table RPC string is not utf-8").with_source(e))
}

fn encode_mount_entry(name: &str, entry: &MountEntry) -> Vec<u8> {
    let mut buf = BytesMut::new();
    put_string(&mut buf, name);
    buf.put_u8(entry.serves_mount_table as u8);
    buf.put_u32(entry.servers.len() as u32);
    for server in &entry.servers {
        put_string(&mut buf, &server.endpoint.format());
        buf.put_u64(server.ttl.as_secs());
    }
    buf.to_vec()
}

fn decode_mount_entry(bytes: Vec<u8>) -> Result<MountEntry> {
    let mut buf = Bytes::from(bytes);
    let name = get_string(&mut buf)?;
    require(&buf, 1)?;
    let serves_mount_table = buf.get_u8() != 0;
    require(&buf, 4)?;
    let count = buf.get_u32();
    let mut servers = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let address = get_string(&mut buf)?;
        require(&buf, 8)?;
        let ttl = Duration::from_secs(buf.get_u64());
        let endpoint = Endpoint::parse(&address)?;
        servers.push(MountedServer { endpoint, ttl });
    }
    Ok(MountEntry {
        name,
        servers,
        serves_mount_table,
    })
}

/// What the resolver and publisher need from a mount-table peer,
/// abstracted so tests can substitute an in-memory fake (spec §8
/// scenarios reference mount-table behavior without requiring a live
/// network round trip for every case).
#[async_trait]
pub trait MountTableClient: Send + Sync + 'static {
    async fn resolve_step(&self, server: &Endpoint, name: &str, timeout: Duration) -> Result<MountEntry>;
    async fn mount(&self, server: &Endpoint, name: &str, target: &Endpoint, ttl: Duration, replace: bool) -> Result<()>;
    async fn unmount(&self, server: &Endpoint, name: &str, target: Option<&Endpoint>) -> Result<()>;
}

/// A [`MountTableClient`] that dials the peer over [`StreamManager`] and
/// speaks the same request/response framing `vflow-server` serves (spec
/// §6 "a `ResolveStep`, `Mount`, and `Unmount` method on an object at
/// the given name").
pub struct RpcMountTableClient {
    stream_manager: Arc<StreamManager>,
}

impl RpcMountTableClient {
    pub fn new(stream_manager: Arc<StreamManager>) -> Self {
        Self { stream_manager }
    }

    async fn call(&self, server: &Endpoint, method: &str, suffix: &str, args: Vec<Vec<u8>>, timeout: Duration) -> Result<Vec<Vec<u8>>> {
        let vc = self.stream_manager.dial(server, &AllowEveryone, &[]).await?;
        let flow = vc.connect().await?;
        let header = RequestHeader {
            method: method.to_string(),
            suffix: suffix.to_string(),
            deadline_millis: timeout.as_millis() as u64,
            num_args: args.len() as u32,
            trace_id: None,
            language: None,
            end_of_stream_args: true,
        };
        flow.write(header.encode()).await?;
        for arg in args {
            flow.write(arg).await?;
        }

        let response_bytes = tokio::time::timeout(timeout, flow.read())
            .await
            .map_err(|_| Error::timeout("mount-table RPC timed out waiting for response header"))??;
        let response = ResponseHeader::decode(response_bytes)?;
        if let Some(err) = response.error {
            return Err(err.into());
        }
        let mut results = Vec::with_capacity(response.num_results as usize);
        for _ in 0..response.num_results {
            results.push(flow.read().await?);
        }
        Ok(results)
    }
}

#[async_trait]
impl MountTableClient for RpcMountTableClient {
    async fn resolve_step(&self, server: &Endpoint, name: &str, timeout: Duration) -> Result<MountEntry> {
        let mut results = self.call(server, "ResolveStep", name, Vec::new(), timeout).await?;
        let bytes = results
            .pop()
            .ok_or_else(|| Error::bad_protocol("ResolveStep returned no result"))?;
        decode_mount_entry(bytes)
    }

    async fn mount(&self, server: &Endpoint, name: &str, target: &Endpoint, ttl: Duration, replace: bool) -> Result<()> {
        let args = vec![
            target.format().into_bytes(),
            ttl.as_secs().to_be_bytes().to_vec(),
            vec![replace as u8],
        ];
        self.call(server, "Mount", name, args, Duration::from_secs(5)).await?;
        Ok(())
    }

    async fn unmount(&self, server: &Endpoint, name: &str, target: Option<&Endpoint>) -> Result<()> {
        let args = match target {
            Some(target) => vec![target.format().into_bytes()],
            None => Vec::new(),
        };
        self.call(server, "Unmount", name, args, Duration::from_secs(5)).await?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn encode_entry_for_test(name: &str, entry: &MountEntry) -> Vec<u8> {
    encode_mount_entry(name, entry)
}
