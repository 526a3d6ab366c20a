//! Test-only helper process for `tests/handshake.rs`.
//!
//! Reads the handshake over the pipes its parent installed, reports
//! `ready` unless the config blob asks it to fail, then exits.

#[tokio::main]
async fn main() {
    let mut handshake = match vflow_exec::ChildHandshake::from_parent() {
        Ok(h) => h,
        Err(_) => std::process::exit(2),
    };
    let data = match handshake.read_handshake().await {
        Ok(d) => d,
        Err(_) => std::process::exit(2),
    };
    if data.config.as_slice() == b"fail-me" {
        let _ = handshake.report_failed("asked to fail by test config").await;
        return;
    }
    if handshake.report_ready().await.is_err() {
        std::process::exit(2);
    }
}
