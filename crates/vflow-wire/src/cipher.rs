//! The control cipher every post-setup frame is authenticated under
//! (spec §4.1 "every frame... is authenticated by the control cipher").
//!
//! The actual key agreement and AEAD primitive are the TLS/handshake
//! crypto library's job (spec §1, named only by interface and
//! explicitly out of scope). What the framing layer needs is a trait it
//! can fail closed against: [`seal`](ControlCipher::seal) /
//! [`open`](ControlCipher::open) must round-trip, and `open` must reject
//! any tampering with [`vflow_core::ErrorKind::ErrorSecurity`].

use bytes::{Bytes, BytesMut};
use sha2::{Digest, Sha256};
use vflow_core::error::{Error, Result};

const MAC_LEN: usize = 32;

/// Authenticates (and, for a real implementation, encrypts) frame bodies
/// before they hit the wire.
pub trait ControlCipher: Send + Sync + 'static {
    /// Authenticates `frame`, returning the bytes to place on the wire.
    fn seal(&self, frame: &[u8]) -> Bytes;

    /// Verifies and strips the authentication tag from `sealed`, or fails
    /// with [`vflow_core::ErrorKind::ErrorSecurity`] on a MAC mismatch
    /// (spec §4.1 "fail closed on cipher-MAC mismatch").
    fn open(&self, sealed: &[u8]) -> Result<Bytes>;
}

/// Used before setup completes, and for the whole VC's life when
/// `SecurityNone` is in force (spec §4.4.1 step 2). Performs no
/// authentication at all: frames pass through unchanged.
#[derive(Default, Clone, Copy)]
pub struct NullCipher;

impl ControlCipher for NullCipher {
    fn seal(&self, frame: &[u8]) -> Bytes {
        Bytes::copy_from_slice(frame)
    }

    fn open(&self, sealed: &[u8]) -> Result<Bytes> {
        Ok(Bytes::copy_from_slice(sealed))
    }
}

/// A keyed MAC-then-XOR-keystream construction derived from the session
/// secret negotiated during handshake.
///
/// This stands in for the AEAD (e.g. box-crypter) the real handshake
/// crypto library would provide; it is intentionally simple because the
/// negotiation and primitive selection live outside this crate's scope
/// (spec §1). It still gives the framing layer real fail-closed behavior:
/// any bit flip in the sealed frame changes the recomputed MAC and
/// `open` returns `ErrorSecurity`.
pub struct BoxCrypter {
    key: [u8; 32],
}

impl BoxCrypter {
    pub fn new(key: [u8; 32]) -> Self {
        Self { key }
    }

    fn keystream(&self, len: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(len);
        let mut counter: u64 = 0;
        while out.len() < len {
            let mut hasher = Sha256::new();
            hasher.update(self.key);
            hasher.update(counter.to_le_bytes());
            out.extend_from_slice(&hasher.finalize());
            counter += 1;
        }
        out.truncate(len);
        out
    }

    fn mac(&self, data: &[u8]) -> [u8; MAC_LEN] {
        let mut hasher = Sha256::new();
        hasher.update(self.key);
        hasher.update(data);
        hasher.finalize().into()
    }
}

impl ControlCipher for BoxCrypter {
    fn seal(&self, frame: &[u8]) -> Bytes {
        let keystream = self.keystream(frame.len());
        let mut ciphertext: Vec<u8> = frame
            .iter()
            .zip(keystream.iter())
            .map(|(a, b)| a ^ b)
            .collect();
        let tag = self.mac(&ciphertext);
        let mut out = BytesMut::with_capacity(ciphertext.len() + MAC_LEN);
        out.extend_from_slice(&mut ciphertext);
        out.extend_from_slice(&tag);
        out.freeze()
    }

    fn open(&self, sealed: &[u8]) -> Result<Bytes> {
        if sealed.len() < MAC_LEN {
            return Err(Error::security("sealed frame shorter than MAC"));
        }
        let (ciphertext, tag) = sealed.split_at(sealed.len() - MAC_LEN);
        let expected = self.mac(ciphertext);
        if !constant_time_eq(&expected, tag) {
            return Err(Error::security("control cipher MAC mismatch"));
        }
        let keystream = self.keystream(ciphertext.len());
        let plaintext: Vec<u8> = ciphertext
            .iter()
            .zip(keystream.iter())
            .map(|(a, b)| a ^ b)
            .collect();
        Ok(Bytes::from(plaintext))
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_cipher_round_trips() {
        let cipher = NullCipher;
        let sealed = cipher.seal(b"hello");
        assert_eq!(cipher.open(&sealed).unwrap(), Bytes::from_static(b"hello"));
    }

    #[test]
    fn box_crypter_round_trips() {
        let cipher = BoxCrypter::new([7u8; 32]);
        let sealed = cipher.seal(b"authenticated payload");
        let opened = cipher.open(&sealed).unwrap();
        assert_eq!(opened, Bytes::from_static(b"authenticated payload"));
    }

    #[test]
    fn box_crypter_fails_closed_on_tamper() {
        let cipher = BoxCrypter::new([7u8; 32]);
        let mut sealed = cipher.seal(b"payload").to_vec();
        let last = sealed.len() - 1;
        sealed[last] ^= 0xFF;
        let err = cipher.open(&sealed).unwrap_err();
        assert_eq!(err.kind(), vflow_core::ErrorKind::ErrorSecurity);
    }
}
