//! Run mutual exclusion.
//!
//! A run holds the slot by owning a lease file in the curated zone:
//!
//! 1. Acquisition creates the file exclusively; only one contender can win.
//! 2. If the file exists and its lease has not expired, the slot is taken.
//! 3. An expired lease is renamed aside, and the contender that wins that
//!    rename retries step 1.
//! 4. A long run renews its lease before half the TTL has passed and stops
//!    as soon as it finds the lease held by someone else.
//! 5. The guard deletes the file on drop, but only while it is still the
//!    recorded holder.
//!
//! A process killed without unwinding leaves its lease behind; the TTL
//! bounds how long that blocks later runs.

use crate::error::{ProcessingError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Attempts at create-or-take-over before giving up on a contended slot
const MAX_ACQUIRE_ROUNDS: u32 = 3;

/// Lease file contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaseInfo {
    pub holder_id: String,
    pub run_id: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

fn lease_ttl(ttl: Duration) -> chrono::Duration {
    chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::hours(2))
}

impl LeaseInfo {
    fn new(run_id: &str, ttl: Duration, now: DateTime<Utc>) -> Self {
        Self {
            holder_id: Uuid::new_v4().to_string(),
            run_id: run_id.to_string(),
            acquired_at: now,
            expires_at: now + lease_ttl(ttl),
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// The single run slot guarding the curated zone.
#[derive(Debug, Clone)]
pub struct RunSlot {
    path: PathBuf,
    ttl: Duration,
}

impl RunSlot {
    pub fn new(path: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            path: path.into(),
            ttl,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Take the slot for `run_id`.
    ///
    /// Fails with `ConcurrentRunRejected` while another live lease exists.
    pub fn acquire(&self, run_id: &str) -> Result<RunSlotGuard> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        for _ in 0..MAX_ACQUIRE_ROUNDS {
            let now = Utc::now();
            let lease = LeaseInfo::new(run_id, self.ttl, now);

            match self.try_create(&lease) {
                Ok(()) => {
                    info!(
                        holder = %lease.holder_id,
                        run_id,
                        expires_at = %lease.expires_at,
                        "Acquired run slot"
                    );
                    return Ok(RunSlotGuard {
                        path: self.path.clone(),
                        holder_id: lease.holder_id.clone(),
                        ttl: self.ttl,
                        lease: Mutex::new(lease),
                        released: false,
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
                Err(e) => return Err(e.into()),
            }

            let current = match self.current()? {
                Some(current) => current,
                // Released between our create and our read.
                None => continue,
            };

            if !current.is_expired_at(now) {
                return Err(ProcessingError::ConcurrentRunRejected {
                    holder: current.holder_id,
                });
            }

            self.take_over(&current)?;
        }

        let holder = self
            .current()?
            .map(|lease| lease.holder_id)
            .unwrap_or_else(|| "unknown".to_string());
        Err(ProcessingError::ConcurrentRunRejected { holder })
    }

    /// The lease currently on disk, if any
    pub fn current(&self) -> Result<Option<LeaseInfo>> {
        match fs::read(&self.path) {
            Ok(bytes) => match serde_json::from_slice::<LeaseInfo>(&bytes) {
                Ok(lease) => Ok(Some(lease)),
                Err(_) => Ok(Some(self.unreadable_lease()?)),
            },
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn try_create(&self, lease: &LeaseInfo) -> std::io::Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)?;
        let body = serde_json::to_vec_pretty(lease)?;
        file.write_all(&body)?;
        file.sync_all()
    }

    /// A lease file that cannot be parsed, e.g. a holder killed mid-write.
    /// It expires a TTL after it was last modified.
    fn unreadable_lease(&self) -> Result<LeaseInfo> {
        let modified = fs::metadata(&self.path)?
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        Ok(LeaseInfo {
            holder_id: "unknown".to_string(),
            run_id: "unknown".to_string(),
            acquired_at: modified,
            expires_at: modified + lease_ttl(self.ttl),
        })
    }

    fn take_over(&self, expired: &LeaseInfo) -> Result<()> {
        let aside = self
            .path
            .with_file_name(format!(".expired-{}", Uuid::new_v4()));

        match fs::rename(&self.path, &aside) {
            Ok(()) => {}
            // Another contender moved it first.
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        }

        // The file we moved may be a fresh lease created after our read.
        let moved = fs::read(&aside)
            .ok()
            .and_then(|bytes| serde_json::from_slice::<LeaseInfo>(&bytes).ok());
        if let Some(moved) = moved {
            if moved.holder_id != expired.holder_id && !moved.is_expired_at(Utc::now()) {
                if !restore_lease(&aside, &self.path)? {
                    warn!(
                        holder = %moved.holder_id,
                        "Another contender took the slot while a live lease was set aside"
                    );
                }
                return Err(ProcessingError::ConcurrentRunRejected {
                    holder: moved.holder_id,
                });
            }
        }

        warn!(
            holder = %expired.holder_id,
            run_id = %expired.run_id,
            expired_at = %expired.expires_at,
            "Taking over expired run slot"
        );
        if let Err(e) = fs::remove_file(&aside) {
            debug!(path = %aside.display(), error = %e, "Could not remove expired lease");
        }
        Ok(())
    }
}

/// Put a lease moved aside back at `path` unless a newer lease already sits
/// there. Returns whether it was restored.
fn restore_lease(aside: &Path, path: &Path) -> Result<bool> {
    let restored = match fs::hard_link(aside, path) {
        Ok(()) => true,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => false,
        Err(e) => return Err(e.into()),
    };
    if let Err(e) = fs::remove_file(aside) {
        debug!(path = %aside.display(), error = %e, "Could not remove set-aside lease");
    }
    Ok(restored)
}

fn read_lease(path: &Path) -> Result<Option<LeaseInfo>> {
    match fs::read(path) {
        Ok(bytes) => Ok(serde_json::from_slice::<LeaseInfo>(&bytes).ok()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Proof of holding the run slot. Releases it when dropped.
#[derive(Debug)]
pub struct RunSlotGuard {
    path: PathBuf,
    holder_id: String,
    ttl: Duration,
    lease: Mutex<LeaseInfo>,
    released: bool,
}

impl RunSlotGuard {
    pub fn lease(&self) -> LeaseInfo {
        self.lease
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn holder_id(&self) -> &str {
        &self.holder_id
    }

    /// Fail with `LeaseLost` unless the lease on disk is still ours
    pub fn ensure_held(&self) -> Result<()> {
        match read_lease(&self.path)? {
            Some(lease) if lease.holder_id == self.holder_id => Ok(()),
            Some(lease) => Err(ProcessingError::LeaseLost {
                holder: lease.holder_id,
            }),
            None => Err(ProcessingError::LeaseLost {
                holder: "none".to_string(),
            }),
        }
    }

    /// Push the expiry one TTL past now.
    pub fn extend(&self) -> Result<()> {
        self.ensure_held()?;

        let mut lease = self
            .lease
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        lease.expires_at = Utc::now() + lease_ttl(self.ttl);

        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(&serde_json::to_vec_pretty(&*lease)?)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path)
            .map_err(|e| ProcessingError::Io(e.error))?;

        debug!(holder = %self.holder_id, expires_at = %lease.expires_at, "Extended run slot lease");
        Ok(())
    }

    /// Check the lease is still held and extend it once half the TTL is
    /// used. Called between units of work by a long run.
    pub fn renew(&self) -> Result<()> {
        self.ensure_held()?;

        let expires_at = self.lease().expires_at;
        if expires_at - Utc::now() < lease_ttl(self.ttl) / 2 {
            self.extend()?;
        }
        Ok(())
    }

    pub fn release(mut self) -> Result<()> {
        self.release_inner()
    }

    fn release_inner(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;

        let still_holder = read_lease(&self.path)
            .ok()
            .flatten()
            .map(|lease| lease.holder_id == self.holder_id)
            .unwrap_or(false);

        if !still_holder {
            warn!(holder = %self.holder_id, "Run slot was taken over before release");
            return Ok(());
        }

        match fs::remove_file(&self.path) {
            Ok(()) => {
                debug!(holder = %self.holder_id, "Released run slot");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for RunSlotGuard {
    fn drop(&mut self) {
        if let Err(e) = self.release_inner() {
            warn!(path = %self.path.display(), error = %e, "Failed to release run slot");
        }
    }
}
