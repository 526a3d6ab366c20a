//! Wire shape of the status-pipe messages (spec §4.10).
//!
//! The child writes exactly one line — `ready<pid>` or
//! `failed<reason>` — then the parent stops reading. Lines are plain
//! ASCII terminated by `\n`; there is no length prefix here (unlike the
//! data pipe), matching the spec's description of a short, human-
//! readable status line rather than a binary frame.

use vflow_core::error::{Error, Result};

const READY_PREFIX: &str = "ready";
const FAILED_PREFIX: &str = "failed";

/// Forced-unblock sentinel byte (spec §4.10, §9(b)): the parent may
/// write this into the status pipe to wake a reader that has been
/// waiting past its timeout. Downstream child implementations MUST NOT
/// emit this byte as part of a legitimate status line — the spec notes
/// this constraint explicitly rather than inferring a stronger encoding
/// rule, so we keep it to one documented non-printable byte (ASCII EOT)
/// that a `ready<pid>`/`failed<reason>` line would never contain.
pub const EOF_CHAR: u8 = 0x04;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChildStatus {
    Ready { pid: u32 },
    Failed { reason: String },
}

pub(crate) fn encode_ready(pid: u32) -> Vec<u8> {
    format!("{READY_PREFIX}{pid}\n").into_bytes()
}

pub(crate) fn encode_failed(reason: &str) -> Vec<u8> {
    format!("{FAILED_PREFIX}{reason}\n").into_bytes()
}

pub(crate) fn decode_status_line(line: &str) -> Result<ChildStatus> {
    if let Some(rest) = line.strip_prefix(READY_PREFIX) {
        let pid = rest
            .trim()
            .parse::<u32>()
            .map_err(|e| Error::bad_protocol("malformed ready<pid> status line").with_source(e))?;
        Ok(ChildStatus::Ready { pid })
    } else if let Some(rest) = line.strip_prefix(FAILED_PREFIX) {
        Ok(ChildStatus::Failed {
            reason: rest.trim().to_string(),
        })
    } else {
        Err(Error::bad_protocol(format!("unrecognized status line: {line:?}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_ready() {
        let line = String::from_utf8(encode_ready(4242)).unwrap();
        let line = line.trim_end_matches('\n');
        assert_eq!(decode_status_line(line).unwrap(), ChildStatus::Ready { pid: 4242 });
    }

    #[test]
    fn round_trips_failed() {
        let line = String::from_utf8(encode_failed("could not bind socket")).unwrap();
        let line = line.trim_end_matches('\n');
        assert_eq!(
            decode_status_line(line).unwrap(),
            ChildStatus::Failed {
                reason: "could not bind socket".to_string()
            }
        );
    }

    #[test]
    fn rejects_unrecognized_line() {
        let err = decode_status_line("garbage").unwrap_err();
        assert_eq!(err.kind(), vflow_core::ErrorKind::BadProtocol);
    }
}
