use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{StoreError, now_epoch_ms};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LeaseRecord {
    owner_id: String,
    pid: u32,
    started_at: i64,
}

/// Single-leader election via a pid file.
///
/// The claimant writes `{owner_id, pid, started_at}`; other processes read
/// the record and back off while the recorded pid is alive. A lease whose
/// pid is dead is stale and can be taken over.
#[derive(Debug)]
pub struct LeaderLease {
    path: PathBuf,
    owner_id: String,
    held: bool,
}

impl LeaderLease {
    pub fn new(path: impl Into<PathBuf>, owner_id: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            owner_id: owner_id.into(),
            held: false,
        }
    }

    /// Try to become leader. Returns `StoreError::LeaseHeld` when a live
    /// process owns the lease.
    pub async fn claim(&mut self) -> Result<(), StoreError> {
        if let Ok(raw) = tokio::fs::read(&self.path).await
            && let Ok(record) = serde_json::from_slice::<LeaseRecord>(&raw)
            && record.pid != std::process::id()
            && pid_alive(record.pid)
        {
            return Err(StoreError::LeaseHeld { pid: record.pid });
        }

        let record = LeaseRecord {
            owner_id: self.owner_id.clone(),
            pid: std::process::id(),
            started_at: now_epoch_ms(),
        };
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| StoreError::io(parent, err))?;
        }
        let raw = serde_json::to_vec_pretty(&record)
            .map_err(|err| StoreError::json(&self.path, err))?;
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, &raw)
            .await
            .map_err(|err| StoreError::io(&tmp, err))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|err| StoreError::io(&self.path, err))?;
        self.held = true;
        info!(event = "leader_claimed", owner = %self.owner_id, pid = record.pid);
        Ok(())
    }

    pub fn is_held(&self) -> bool {
        self.held
    }

    pub async fn release(&mut self) {
        if !self.held {
            return;
        }
        self.held = false;
        let _ = tokio::fs::remove_file(&self.path).await;
        info!(event = "leader_released", owner = %self.owner_id);
    }
}

#[cfg(unix)]
fn pid_alive(pid: u32) -> bool {
    // Signal 0 probes for existence without touching the process.
    unsafe { libc_kill(pid as i32, 0) == 0 }
}

#[cfg(not(unix))]
fn pid_alive(_pid: u32) -> bool {
    true
}

#[cfg(unix)]
unsafe fn libc_kill(pid: i32, sig: i32) -> i32 {
    unsafe extern "C" {
        fn kill(pid: i32, sig: i32) -> i32;
    }
    unsafe { kill(pid, sig) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn own_process_can_reclaim_its_lease() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("leader.json");
        let mut first = LeaderLease::new(&path, "daemon-a");
        first.claim().await.unwrap();

        // Same pid: takeover allowed (restart within the same process image).
        let mut second = LeaderLease::new(&path, "daemon-b");
        second.claim().await.unwrap();
        assert!(second.is_held());
    }

    #[tokio::test]
    async fn stale_lease_from_dead_pid_is_taken_over() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("leader.json");
        let record = serde_json::json!({
            "owner_id": "ghost",
            // Pid from far outside the live range on test systems.
            "pid": 4_000_000u32,
            "started_at": 0,
        });
        tokio::fs::write(&path, serde_json::to_vec(&record).unwrap())
            .await
            .unwrap();

        let mut lease = LeaderLease::new(&path, "daemon");
        lease.claim().await.unwrap();
        assert!(lease.is_held());
        lease.release().await;
        assert!(!tokio::fs::try_exists(&path).await.unwrap());
    }
}
