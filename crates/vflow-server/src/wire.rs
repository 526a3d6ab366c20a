//! Request/response header framing on top of a flow's byte stream (spec
//! §3 "Request header (wire)" / "Response header (wire)").
//!
//! The positional argument and result *values* are one opaque encoded
//! blob each, produced and consumed by the external value codec (spec
//! §1); this module only frames the header fields around them. Each
//! header and each argument/result value is written with exactly one
//! [`vflow_transport::Flow::write`] call, which — because the queue
//! underneath never coalesces items (spec §4.2) — arrives as exactly
//! one [`vflow_transport::Flow::read`] on the peer, matching spec §6
//! "each is one encoded value followed by positional argument/result
//! values, each also a single encoded value".

use bytes::{Buf, BufMut, Bytes, BytesMut};
use vflow_core::error::{Error, Kind};

fn put_string(buf: &mut BytesMut, s: &str) {
    buf.put_u32(s.len() as u32);
    buf.put_slice(s.as_bytes());
}

fn get_string(buf: &mut Bytes) -> vflow_core::Result<String> {
    require(buf, 4)?;
    let len = buf.get_u32() as usize;
    require(buf, len)?;
    let bytes = buf.split_to(len);
    String::from_utf8(bytes.to_vec()).map_err(|e| Error::bad_protocol("header string is not utf-8").with_source(e))
}

fn require(buf: &Bytes, n: usize) -> vflow_core::Result<()> {
    if buf.len() < n {
        Err(Error::bad_protocol("truncated request/response header"))
    } else {
        Ok(())
    }
}

fn put_option_string(buf: &mut BytesMut, s: &Option<String>) {
    match s {
        Some(s) => {
            buf.put_u8(1);
            put_string(buf, s);
        }
        None => buf.put_u8(0),
    }
}

fn get_option_string(buf: &mut Bytes) -> vflow_core::Result<Option<String>> {
    require(buf, 1)?;
    if buf.get_u8() == 0 {
        Ok(None)
    } else {
        Ok(Some(get_string(buf)?))
    }
}

/// The closed set of error kinds (spec §7), as they travel on the wire.
fn kind_to_code(kind: Kind) -> u8 {
    match kind {
        Kind::BadArg => 0,
        Kind::BadProtocol => 1,
        Kind::BadState => 2,
        Kind::NoExist => 3,
        Kind::NoAccess => 4,
        Kind::NoServers => 5,
        Kind::NotTrusted => 6,
        Kind::Aborted => 7,
        Kind::Canceled => 8,
        Kind::Timeout => 9,
        Kind::ResolutionDepthExceeded => 10,
        Kind::ErrorSecurity => 11,
        Kind::InternalError => 12,
        Kind::UnknownSuffix => 13,
        Kind::UnknownMethod => 14,
    }
}

fn code_to_kind(code: u8) -> vflow_core::Result<Kind> {
    Ok(match code {
        0 => Kind::BadArg,
        1 => Kind::BadProtocol,
        2 => Kind::BadState,
        3 => Kind::NoExist,
        4 => Kind::NoAccess,
        5 => Kind::NoServers,
        6 => Kind::NotTrusted,
        7 => Kind::Aborted,
        8 => Kind::Canceled,
        9 => Kind::Timeout,
        10 => Kind::ResolutionDepthExceeded,
        11 => Kind::ErrorSecurity,
        12 => Kind::InternalError,
        13 => Kind::UnknownSuffix,
        14 => Kind::UnknownMethod,
        other => return Err(Error::bad_protocol(format!("unknown wire error code {other}"))),
    })
}

/// The wire form of a response's `error` field: kind + message, no
/// source chain (spec §6 "wire representation is an external concern";
/// this is the minimal form the core itself needs to round-trip).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WireError {
    pub kind: Kind,
    pub message: String,
}

impl From<&Error> for WireError {
    fn from(err: &Error) -> Self {
        WireError {
            kind: err.kind(),
            message: err.message().to_string(),
        }
    }
}

impl From<WireError> for Error {
    fn from(w: WireError) -> Self {
        Error::new(w.kind, w.message)
    }
}

/// Spec §3 "Request header (wire)".
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestHeader {
    pub method: String,
    pub suffix: String,
    /// Remaining time until the caller's deadline, in milliseconds; `0`
    /// means "no deadline" (spec §5 "a context deadline is enforced
    /// both client-side... and server-side via the flow's read
    /// deadline").
    pub deadline_millis: u64,
    pub num_args: u32,
    pub trace_id: Option<String>,
    pub language: Option<String>,
    pub end_of_stream_args: bool,
}

impl RequestHeader {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        put_string(&mut buf, &self.method);
        put_string(&mut buf, &self.suffix);
        buf.put_u64(self.deadline_millis);
        buf.put_u32(self.num_args);
        put_option_string(&mut buf, &self.trace_id);
        put_option_string(&mut buf, &self.language);
        buf.put_u8(self.end_of_stream_args as u8);
        buf.to_vec()
    }

    pub fn decode(bytes: impl Into<Bytes>) -> vflow_core::Result<Self> {
        let mut buf = bytes.into();
        let method = get_string(&mut buf)?;
        let suffix = get_string(&mut buf)?;
        require(&buf, 8 + 4)?;
        let deadline_millis = buf.get_u64();
        let num_args = buf.get_u32();
        let trace_id = get_option_string(&mut buf)?;
        let language = get_option_string(&mut buf)?;
        require(&buf, 1)?;
        let end_of_stream_args = buf.get_u8() != 0;
        Ok(Self {
            method,
            suffix,
            deadline_millis,
            num_args,
            trace_id,
            language,
            end_of_stream_args,
        })
    }
}

/// Spec §3 "Response header (wire)".
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResponseHeader {
    pub error: Option<WireError>,
    pub end_of_stream_results: bool,
    pub num_results: u32,
    pub trace_response: Option<String>,
    pub ack_blessings: bool,
}

impl ResponseHeader {
    pub fn ok(num_results: u32) -> Self {
        Self {
            error: None,
            end_of_stream_results: false,
            num_results,
            trace_response: None,
            ack_blessings: false,
        }
    }

    pub fn from_error(err: &Error) -> Self {
        Self {
            error: Some(WireError::from(err)),
            end_of_stream_results: true,
            num_results: 0,
            trace_response: None,
            ack_blessings: false,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        match &self.error {
            Some(e) => {
                buf.put_u8(1);
                buf.put_u8(kind_to_code(e.kind));
                put_string(&mut buf, &e.message);
            }
            None => buf.put_u8(0),
        }
        buf.put_u8(self.end_of_stream_results as u8);
        buf.put_u32(self.num_results);
        put_option_string(&mut buf, &self.trace_response);
        buf.put_u8(self.ack_blessings as u8);
        buf.to_vec()
    }

    pub fn decode(bytes: impl Into<Bytes>) -> vflow_core::Result<Self> {
        let mut buf = bytes.into();
        require(&buf, 1)?;
        let error = if buf.get_u8() != 0 {
            require(&buf, 1)?;
            let kind = code_to_kind(buf.get_u8())?;
            let message = get_string(&mut buf)?;
            Some(WireError { kind, message })
        } else {
            None
        };
        require(&buf, 1 + 4)?;
        let end_of_stream_results = buf.get_u8() != 0;
        let num_results = buf.get_u32();
        let trace_response = get_option_string(&mut buf)?;
        require(&buf, 1)?;
        let ack_blessings = buf.get_u8() != 0;
        Ok(Self {
            error,
            end_of_stream_results,
            num_results,
            trace_response,
            ack_blessings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_header_round_trips() {
        let header = RequestHeader {
            method: "Echo".into(),
            suffix: "a/b".into(),
            deadline_millis: 5_000,
            num_args: 1,
            trace_id: Some("trace-1".into()),
            language: None,
            end_of_stream_args: true,
        };
        let decoded = RequestHeader::decode(header.encode()).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn response_header_with_error_round_trips() {
        let err = Error::no_access("denied");
        let header = ResponseHeader::from_error(&err);
        let decoded = ResponseHeader::decode(header.encode()).unwrap();
        assert_eq!(decoded.error.unwrap().kind, Kind::NoAccess);
        assert!(decoded.end_of_stream_results);
    }

    #[test]
    fn response_header_ok_round_trips() {
        let header = ResponseHeader::ok(3);
        let decoded = ResponseHeader::decode(header.encode()).unwrap();
        assert_eq!(decoded.num_results, 3);
        assert!(decoded.error.is_none());
    }
}
