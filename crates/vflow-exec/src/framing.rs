//! Length-prefixed blobs on the data pipe (spec §4.10: "a length-prefixed
//! serialised config and a length-prefixed secret").
//!
//! This mirrors `vflow-wire`'s frame length convention (a 4-byte
//! big-endian unsigned length) without depending on that crate — the
//! exec handshake is deliberately transport-independent (spec §A: "no
//! transport coupling").

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use vflow_core::error::{Error, Result};

/// Upper bound on a single handshake blob. The config/secret exchanged
/// here are small in-process values, never user payloads, so a generous
/// fixed cap catches a corrupt length prefix without needing a
/// negotiated maximum.
const MAX_BLOB_LEN: u32 = 1024 * 1024;

pub(crate) async fn write_framed<W: tokio::io::AsyncWrite + Unpin>(
    writer: &mut W,
    bytes: &[u8],
) -> Result<()> {
    let len = u32::try_from(bytes.len())
        .map_err(|_| Error::bad_arg("handshake blob too large to frame"))?;
    writer.write_u32(len).await.map_err(Error::from)?;
    writer.write_all(bytes).await.map_err(Error::from)?;
    Ok(())
}

pub(crate) async fn read_framed<R: tokio::io::AsyncRead + Unpin>(reader: &mut R) -> Result<Vec<u8>> {
    let len = reader.read_u32().await.map_err(Error::from)?;
    if len > MAX_BLOB_LEN {
        return Err(Error::bad_protocol(format!(
            "handshake blob length {len} exceeds {MAX_BLOB_LEN}"
        )));
    }
    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf).await.map_err(Error::from)?;
    Ok(buf)
}
