//! Read/write one [`Message`] on a byte stream (spec §4.1, §6).
//!
//! Every frame on the wire is `length_prefix || cipher_MAC(type_byte ||
//! body)`, where `length_prefix` is a 4-byte big-endian unsigned integer
//! (spec §6). Oversized frames and cipher-MAC mismatches both fail
//! closed, the former with [`vflow_core::ErrorKind::BadProtocol`], the
//! latter with [`vflow_core::ErrorKind::ErrorSecurity`].

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use vflow_core::error::{Error, Result};
use vflow_core::ids::{FlowId, VcId};

use crate::cipher::ControlCipher;
use crate::message::{Message, PublicKeyOffer, VersionRange};

/// `SetupStream` frames are bounded to 8 KiB (spec §6).
pub const SETUP_STREAM_MAX_BYTES: usize = 8 * 1024;

const TYPE_SETUP: u8 = 0;
const TYPE_SETUP_STREAM: u8 = 1;
const TYPE_DATA: u8 = 2;
const TYPE_OPEN_FLOW: u8 = 3;
const TYPE_ADD_RECEIVE_BUFFERS: u8 = 4;
const TYPE_CLOSE: u8 = 5;
const TYPE_HEALTH_REQUEST: u8 = 6;
const TYPE_HEALTH_RESPONSE: u8 = 7;

fn encode_body(msg: &Message) -> Result<BytesMut> {
    let mut body = BytesMut::new();
    match msg {
        Message::Setup {
            versions,
            public_key,
            auth_enabled,
        } => {
            body.put_u8(TYPE_SETUP);
            body.put_u32(versions.min);
            body.put_u32(versions.max);
            body.put_u32(public_key.0.len() as u32);
            body.put_slice(&public_key.0);
            body.put_u8(*auth_enabled as u8);
        }
        Message::SetupStream { bytes } => {
            if bytes.len() > SETUP_STREAM_MAX_BYTES {
                return Err(Error::bad_protocol("SetupStream frame exceeds 8 KiB"));
            }
            body.put_u8(TYPE_SETUP_STREAM);
            body.put_u32(bytes.len() as u32);
            body.put_slice(bytes);
        }
        Message::Data {
            vc_id,
            flow_id,
            flags,
            payload,
        } => {
            body.put_u8(TYPE_DATA);
            body.put_u64(vc_id.value());
            body.put_u64(flow_id.value());
            body.put_u8(*flags);
            body.put_u32(payload.len() as u32);
            body.put_slice(payload);
        }
        Message::OpenFlow {
            vc_id,
            flow_id,
            initial_credit,
        } => {
            body.put_u8(TYPE_OPEN_FLOW);
            body.put_u64(vc_id.value());
            body.put_u64(flow_id.value());
            body.put_u32(*initial_credit);
        }
        Message::AddReceiveBuffers {
            vc_id,
            flow_id,
            delta,
        } => {
            body.put_u8(TYPE_ADD_RECEIVE_BUFFERS);
            body.put_u64(vc_id.value());
            body.put_u64(flow_id.value());
            body.put_u32(*delta);
        }
        Message::Close { vc_id, flow_id } => {
            body.put_u8(TYPE_CLOSE);
            body.put_u64(vc_id.value());
            match flow_id {
                Some(id) => {
                    body.put_u8(1);
                    body.put_u64(id.value());
                }
                None => body.put_u8(0),
            }
        }
        Message::HealthCheckRequest { vc_id } => {
            body.put_u8(TYPE_HEALTH_REQUEST);
            body.put_u64(vc_id.value());
        }
        Message::HealthCheckResponse { vc_id } => {
            body.put_u8(TYPE_HEALTH_RESPONSE);
            body.put_u64(vc_id.value());
        }
    }
    Ok(body)
}

fn decode_body(mut body: Bytes) -> Result<Message> {
    if body.is_empty() {
        return Err(Error::bad_protocol("empty frame body"));
    }
    let ty = body.get_u8();
    Ok(match ty {
        TYPE_SETUP => {
            require_len(&body, 4 + 4 + 4)?;
            let min = body.get_u32();
            let max = body.get_u32();
            let key_len = body.get_u32() as usize;
            require_len(&body, key_len + 1)?;
            let key = body.split_to(key_len);
            let auth_enabled = body.get_u8() != 0;
            Message::Setup {
                versions: VersionRange { min, max },
                public_key: PublicKeyOffer(key),
                auth_enabled,
            }
        }
        TYPE_SETUP_STREAM => {
            require_len(&body, 4)?;
            let len = body.get_u32() as usize;
            if len > SETUP_STREAM_MAX_BYTES {
                return Err(Error::bad_protocol("SetupStream frame exceeds 8 KiB"));
            }
            require_len(&body, len)?;
            Message::SetupStream {
                bytes: body.split_to(len),
            }
        }
        TYPE_DATA => {
            require_len(&body, 8 + 8 + 1 + 4)?;
            let vc_id = VcId::new(body.get_u64());
            let flow_id = FlowId::new(body.get_u64());
            let flags = body.get_u8();
            let len = body.get_u32() as usize;
            require_len(&body, len)?;
            Message::Data {
                vc_id,
                flow_id,
                flags,
                payload: body.split_to(len),
            }
        }
        TYPE_OPEN_FLOW => {
            require_len(&body, 8 + 8 + 4)?;
            Message::OpenFlow {
                vc_id: VcId::new(body.get_u64()),
                flow_id: FlowId::new(body.get_u64()),
                initial_credit: body.get_u32(),
            }
        }
        TYPE_ADD_RECEIVE_BUFFERS => {
            require_len(&body, 8 + 8 + 4)?;
            Message::AddReceiveBuffers {
                vc_id: VcId::new(body.get_u64()),
                flow_id: FlowId::new(body.get_u64()),
                delta: body.get_u32(),
            }
        }
        TYPE_CLOSE => {
            require_len(&body, 8 + 1)?;
            let vc_id = VcId::new(body.get_u64());
            let has_flow = body.get_u8() != 0;
            let flow_id = if has_flow {
                require_len(&body, 8)?;
                Some(FlowId::new(body.get_u64()))
            } else {
                None
            };
            Message::Close { vc_id, flow_id }
        }
        TYPE_HEALTH_REQUEST => {
            require_len(&body, 8)?;
            Message::HealthCheckRequest {
                vc_id: VcId::new(body.get_u64()),
            }
        }
        TYPE_HEALTH_RESPONSE => {
            require_len(&body, 8)?;
            Message::HealthCheckResponse {
                vc_id: VcId::new(body.get_u64()),
            }
        }
        other => return Err(Error::bad_protocol(format!("unknown frame type {other}"))),
    })
}

fn require_len(buf: &Bytes, needed: usize) -> Result<()> {
    if buf.len() < needed {
        Err(Error::bad_protocol("truncated frame body"))
    } else {
        Ok(())
    }
}

/// Writes one framed, sealed message. `frame_max` bounds the plaintext
/// body (spec §4.1 "fixed upper bound... oversized frames fail with
/// `ErrBadProtocol`").
pub async fn write_to<W: AsyncWrite + Unpin>(
    writer: &mut W,
    msg: &Message,
    cipher: &dyn ControlCipher,
    frame_max: u32,
) -> Result<()> {
    let body = encode_body(msg)?;
    if body.len() as u64 > frame_max as u64 {
        return Err(Error::bad_protocol("frame exceeds configured maximum"));
    }
    let sealed = cipher.seal(&body);
    if sealed.len() > u32::MAX as usize {
        return Err(Error::bad_protocol("sealed frame too large to frame"));
    }
    writer.write_u32(sealed.len() as u32).await?;
    writer.write_all(&sealed).await?;
    Ok(())
}

/// Reads one framed, sealed message.
pub async fn read_from<R: AsyncRead + Unpin>(
    reader: &mut R,
    cipher: &dyn ControlCipher,
    frame_max: u32,
) -> Result<Message> {
    let len = reader.read_u32().await?;
    if len > frame_max {
        return Err(Error::bad_protocol(format!(
            "frame length {len} exceeds maximum {frame_max}"
        )));
    }
    let mut sealed = vec![0u8; len as usize];
    reader.read_exact(&mut sealed).await?;
    let body = cipher.open(&sealed)?;
    decode_body(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::{BoxCrypter, NullCipher};

    async fn round_trip(msg: Message, cipher: &dyn ControlCipher) -> Message {
        let mut buf = Vec::new();
        write_to(&mut buf, &msg, cipher, 4 * 1024 * 1024).await.unwrap();
        let mut cursor = std::io::Cursor::new(buf);
        read_from(&mut cursor, cipher, 4 * 1024 * 1024).await.unwrap()
    }

    #[tokio::test]
    async fn data_frame_round_trips_under_null_cipher() {
        let msg = Message::Data {
            vc_id: VcId::new(1),
            flow_id: FlowId::new(9),
            flags: 0,
            payload: Bytes::from_static(b"ping"),
        };
        let got = round_trip(msg.clone(), &NullCipher).await;
        assert_eq!(got, msg);
    }

    #[tokio::test]
    async fn every_variant_round_trips_under_authenticated_cipher() {
        let cipher = BoxCrypter::new([3u8; 32]);
        let msgs = vec![
            Message::Setup {
                versions: VersionRange { min: 1, max: 2 },
                public_key: PublicKeyOffer(Bytes::from_static(b"pk")),
                auth_enabled: true,
            },
            Message::SetupStream {
                bytes: Bytes::from_static(b"hello"),
            },
            Message::OpenFlow {
                vc_id: VcId::new(4),
                flow_id: FlowId::new(10),
                initial_credit: 65536,
            },
            Message::AddReceiveBuffers {
                vc_id: VcId::new(4),
                flow_id: FlowId::new(10),
                delta: 1024,
            },
            Message::Close {
                vc_id: VcId::new(4),
                flow_id: Some(FlowId::new(10)),
            },
            Message::Close {
                vc_id: VcId::new(4),
                flow_id: None,
            },
            Message::HealthCheckRequest { vc_id: VcId::new(4) },
            Message::HealthCheckResponse { vc_id: VcId::new(4) },
        ];
        for msg in msgs {
            let got = round_trip(msg.clone(), &cipher).await;
            assert_eq!(got, msg);
        }
    }

    #[tokio::test]
    async fn oversized_frame_fails_bad_protocol() {
        let mut buf = Vec::new();
        // A length prefix that exceeds the configured maximum.
        buf.extend_from_slice(&(16u32 * 1024 * 1024).to_be_bytes());
        let mut cursor = std::io::Cursor::new(buf);
        let err = read_from(&mut cursor, &NullCipher, 4 * 1024 * 1024)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), vflow_core::ErrorKind::BadProtocol);
    }

    #[tokio::test]
    async fn tampered_frame_fails_security_closed() {
        let cipher = BoxCrypter::new([9u8; 32]);
        let msg = Message::HealthCheckRequest { vc_id: VcId::new(1) };
        let mut buf = Vec::new();
        write_to(&mut buf, &msg, &cipher, 4 * 1024 * 1024).await.unwrap();
        let last = buf.len() - 1;
        buf[last] ^= 0xFF;
        let mut cursor = std::io::Cursor::new(buf);
        let err = read_from(&mut cursor, &cipher, 4 * 1024 * 1024)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), vflow_core::ErrorKind::ErrorSecurity);
    }
}
