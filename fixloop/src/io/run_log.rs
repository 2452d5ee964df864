//! Terminal run records written as pretty JSON.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use tracing::info;

use crate::core::machine::RunState;

/// Write `state` to `dir/run-<unix-millis>.json` and return the path.
pub fn write_run_record(dir: &Path, state: &RunState) -> Result<PathBuf> {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("system clock before unix epoch")?
        .as_millis();
    let path = dir.join(format!("run-{millis}.json"));
    let mut buf = serde_json::to_string_pretty(state).context("serialize run record")?;
    buf.push('\n');
    super::write_atomic(&path, &buf)?;
    info!(path = %path.display(), status = %state.status, "wrote run record");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::machine::Status;

    #[test]
    fn record_round_trips_through_json() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut state = RunState::new("print('hi')");
        state.status = Status::Success;

        let path = write_run_record(&temp.path().join("runs"), &state).expect("write");
        let name = path.file_name().and_then(|n| n.to_str()).expect("name");
        assert!(name.starts_with("run-") && name.ends_with(".json"), "{name}");

        let contents = std::fs::read_to_string(&path).expect("read");
        let loaded: RunState = serde_json::from_str(&contents).expect("parse");
        assert_eq!(loaded, state);
        assert!(contents.contains("\"status\": \"success\""));
    }
}
