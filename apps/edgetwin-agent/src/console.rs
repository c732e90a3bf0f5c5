//! Feeds desired-property patches typed on stdin into the local twin.
//!
//! One JSON object per line, e.g. `{"Log_Level": "info"}`.

use serde_json::{Map, Value};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use edgetwin_sync::LocalTwin;

/// Reads stdin until EOF.
pub async fn feed_desired(twin: LocalTwin) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "Failed to read stdin");
                break;
            }
        };

        let patch = match parse_patch(&line) {
            Some(Ok(patch)) => patch,
            Some(Err(reason)) => {
                warn!(reason = %reason, "Ignoring console input");
                continue;
            }
            None => continue,
        };

        match twin.push_desired(patch).await {
            Ok(version) => info!(version, "Desired change queued"),
            Err(e) => {
                warn!(error = %e, "Desired change stream closed");
                break;
            }
        }
    }
}

/// `None` for blank lines.
fn parse_patch(line: &str) -> Option<Result<Map<String, Value>, String>> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    Some(match serde_json::from_str::<Value>(line) {
        Ok(Value::Object(patch)) => Ok(patch),
        Ok(_) => Err("expected a JSON object".to_string()),
        Err(e) => Err(e.to_string()),
    })
}
