//! What an [`crate::invoker::Invoker`] is handed during `Invoke` (spec
//! §3 "Invoker", §4.7.5 step 8): the call context plus a handle for the
//! streaming `Send`/`Recv` pattern of spec §4.7.5 "Streaming".

use std::sync::Arc;

use bytes::Bytes;
use vflow_core::error::Result;
use vflow_transport::Flow;

use crate::wire::ResponseHeader;

/// A handle bidirectional-streaming methods use to push extra results
/// and pull extra arguments beyond the ones decoded up front (spec
/// §4.7.5 "Streaming": "`Send` prepends an empty response header then
/// encodes the item; `Recv` decodes a framed request wrapper and either
/// returns EOF... or decodes the item").
pub struct ServerStream {
    flow: Arc<Flow>,
}

impl ServerStream {
    pub(crate) fn new(flow: Arc<Flow>) -> Self {
        Self { flow }
    }

    /// Streams one additional result item ahead of the final response.
    pub async fn send(&self, item: Bytes) -> Result<()> {
        let header = ResponseHeader::ok(1);
        self.flow.write(header.encode()).await?;
        self.flow.write(item.to_vec()).await
    }

    /// Reads one additional streamed argument, or `None` once the
    /// caller has signalled `end_of_stream_args` (observed here as the
    /// flow's inbound queue reporting `Aborted` — spec §4.2's terminal
    /// state once a peer-closed flow has fully drained).
    pub async fn recv(&self) -> Result<Option<Bytes>> {
        match self.flow.read().await {
            Ok(item) => Ok(Some(Bytes::from(item))),
            Err(e) if e.kind() == vflow_core::ErrorKind::Aborted => Ok(None),
            Err(e) => Err(e),
        }
    }
}
