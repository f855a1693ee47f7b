pub mod descriptor;
pub mod events;
pub mod history;
pub mod leader;
pub mod paths;
pub mod snapshot;
pub mod token_file;

pub use descriptor::{TokenDescriptor, TokenState, TokenStatus, scan_tokens};
pub use events::EventLog;
pub use history::{HistoryJournal, RefreshMode, RefreshOutcome, TokenHistory};
pub use leader::LeaderLease;
pub use snapshot::SnapshotWriter;
pub use token_file::{TokenPayload, read_token_file, token_file_mtime_ms, write_token_file};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed json at {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("leader lease held by pid {pid}")]
    LeaseHeld { pid: u32 },
}

impl StoreError {
    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.display().to_string(),
            source,
        }
    }

    pub(crate) fn json(path: &std::path::Path, source: serde_json::Error) -> Self {
        StoreError::Json {
            path: path.display().to_string(),
            source,
        }
    }
}

pub fn now_epoch_ms() -> i64 {
    (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}
