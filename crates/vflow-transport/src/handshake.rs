//! Wire payloads exchanged on the reserved handshake/auth flows during
//! VC setup (spec §4.4.1/§4.4.2).
//!
//! The handshake and auth flows ride inside an already-encrypted VIF
//! (the control cipher from the Setup exchange covers every frame), so
//! these payloads need no cipher of their own — just a stable encoding.
//! The actual key-agreement/signature primitives are the handshake
//! crypto library's job (spec §1, out of scope); what lives here is the
//! bookkeeping the VC state machine consumes: version range, a public
//! key offer opaque to this layer, and blessing names.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use vflow_core::error::{Error, Result};
use vflow_core::ids::RoutingId;

pub struct HandshakeHello {
    pub version: u32,
    pub routing_id: RoutingId,
    pub public_key: Bytes,
}

impl HandshakeHello {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u32(self.version);
        buf.put_slice(self.routing_id.as_bytes());
        buf.put_u32(self.public_key.len() as u32);
        buf.put_slice(&self.public_key);
        buf.to_vec()
    }

    pub fn decode(mut bytes: Bytes) -> Result<Self> {
        if bytes.len() < 4 + 16 + 4 {
            return Err(Error::bad_protocol("truncated handshake hello"));
        }
        let version = bytes.get_u32();
        let mut rid_bytes = [0u8; 16];
        bytes.copy_to_slice(&mut rid_bytes);
        let key_len = bytes.get_u32() as usize;
        if bytes.len() < key_len {
            return Err(Error::bad_protocol("truncated handshake public key"));
        }
        let public_key = bytes.split_to(key_len);
        Ok(Self {
            version,
            routing_id: RoutingId::from_bytes(rid_bytes),
            public_key,
        })
    }
}

/// The auth-flow exchange: a signature placeholder plus the sender's
/// blessing names (spec §4.4.1 step 3).
pub struct AuthMessage {
    pub signature: Bytes,
    pub blessing_names: Vec<String>,
}

impl AuthMessage {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u32(self.signature.len() as u32);
        buf.put_slice(&self.signature);
        buf.put_u32(self.blessing_names.len() as u32);
        for name in &self.blessing_names {
            buf.put_u32(name.len() as u32);
            buf.put_slice(name.as_bytes());
        }
        buf.to_vec()
    }

    pub fn decode(mut bytes: Bytes) -> Result<Self> {
        if bytes.len() < 4 {
            return Err(Error::bad_protocol("truncated auth message"));
        }
        let sig_len = bytes.get_u32() as usize;
        if bytes.len() < sig_len + 4 {
            return Err(Error::bad_protocol("truncated auth signature"));
        }
        let signature = bytes.split_to(sig_len);
        let count = bytes.get_u32() as usize;
        let mut blessing_names = Vec::with_capacity(count);
        for _ in 0..count {
            if bytes.len() < 4 {
                return Err(Error::bad_protocol("truncated blessing count"));
            }
            let len = bytes.get_u32() as usize;
            if bytes.len() < len {
                return Err(Error::bad_protocol("truncated blessing name"));
            }
            let name = bytes.split_to(len);
            blessing_names.push(
                String::from_utf8(name.to_vec())
                    .map_err(|e| Error::bad_protocol("blessing name is not utf-8").with_source(e))?,
            );
        }
        Ok(Self {
            signature,
            blessing_names,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hello_round_trips() {
        let hello = HandshakeHello {
            version: 3,
            routing_id: RoutingId::new_random(),
            public_key: Bytes::from_static(b"pubkey"),
        };
        let encoded = hello.encode();
        let decoded = HandshakeHello::decode(Bytes::from(encoded)).unwrap();
        assert_eq!(decoded.version, 3);
        assert_eq!(decoded.routing_id, hello.routing_id);
        assert_eq!(decoded.public_key, hello.public_key);
    }

    #[test]
    fn auth_message_round_trips() {
        let msg = AuthMessage {
            signature: Bytes::from_static(b"sig"),
            blessing_names: vec!["root:alice".into(), "root:alice:phone".into()],
        };
        let encoded = msg.encode();
        let decoded = AuthMessage::decode(Bytes::from(encoded)).unwrap();
        assert_eq!(decoded.signature, msg.signature);
        assert_eq!(decoded.blessing_names, msg.blessing_names);
    }
}
