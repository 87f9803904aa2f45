//! Newline-delimited JSON-RPC over stdin/stdout.
//!
//! One message per line; responses and notifications are emitted as
//! single lines terminated by `\n`. Logging must go to stderr in this
//! mode (stdout is the protocol channel). Parse failures answer `-32700`
//! and the loop continues; only EOF, cancellation, or a broken stdout
//! terminate it.

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::io::BufReader;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::dispatcher::{Dispatcher, RequestMeta};
use crate::error::{McpError, McpResult};
use crate::session::McpSession;

/// Serve the dispatcher over stdin/stdout until EOF or cancellation.
///
/// The whole stdio stream is one MCP session. Local processes are
/// considered authorized: there is no credential channel on stdio.
///
/// # Errors
///
/// Only transport-fatal failures (a broken stdout) surface; malformed
/// input is answered in-band and skipped.
pub async fn run(dispatcher: Arc<Dispatcher>, cancel: CancellationToken) -> McpResult<()> {
    let mut reader = FramedRead::new(BufReader::new(tokio::io::stdin()), LinesCodec::new());
    let mut writer = FramedWrite::new(tokio::io::stdout(), LinesCodec::new());
    let session = McpSession::new();

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                debug!("stdio transport canceled");
                break;
            }
            line = reader.next() => {
                let Some(line) = line else {
                    debug!("stdin closed; stdio transport done");
                    break;
                };
                let line = match line {
                    Ok(line) => line,
                    Err(err) => {
                        warn!(error = %err, "stdio read error; skipping line");
                        continue;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }

                let meta = RequestMeta {
                    authorized: true,
                    cancel: cancel.child_token(),
                };
                if let Some(response) = dispatcher.handle_body(line.as_bytes(), &session, &meta).await {
                    let text = serde_json::to_string(&response)?;
                    writer
                        .send(text)
                        .await
                        .map_err(|err| McpError::Internal(format!("stdout write failed: {err}")))?;
                }
            }
        }
    }
    Ok(())
}
