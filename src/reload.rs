//! Reload orchestration
//!
//! Applies an assembled snapshot to the live proxy using a two-phase
//! protocol: write to a temp file, validate offline, atomically rename
//! over the live config, reload, then confirm the proxy survived. The
//! phases are an explicit state machine so the escalation path is
//! unambiguous:
//!
//! Idle -> Validating -> Applying -> Confirming -> Idle
//!          \-> ValidationFailed -> Idle
//!                        Confirming fail -> RollingBack -> Idle | FatalFailure
//!
//! A rollback that itself fails validation latches [`ReloadPhase::FatalFailure`];
//! the orchestrator then refuses all further applies until an operator
//! clears it.

use crate::config::NginxConfig;
use crate::error::ReloadError;
use crate::store::{ConfigSnapshot, ConfigStore};
use parking_lot::Mutex;
use serde::Serialize;
use std::io::Write as _;
use std::path::Path;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, error, info, warn};

/// Interval between liveness probe attempts
const PROBE_INTERVAL: Duration = Duration::from_millis(200);

/// Orchestrator state machine phases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReloadPhase {
    Idle,
    Validating,
    Applying,
    Confirming,
    RollingBack,
    /// Rollback failed; no automatic mutation until manually cleared
    FatalFailure,
}

/// Outcome of committing one cycle's snapshot
#[derive(Debug)]
pub enum CommitOutcome {
    /// Snapshot validated, applied, and confirmed; now current
    Committed { version: u64 },
    /// Reload failed but the last-known-good snapshot was restored
    RolledBack {
        error: ReloadError,
        restored_version: u64,
    },
}

/// Validates, applies, and reloads assembled snapshots
pub struct ReloadOrchestrator {
    nginx: NginxConfig,
    phase: Mutex<ReloadPhase>,
}

impl ReloadOrchestrator {
    pub fn new(nginx: NginxConfig) -> Self {
        Self {
            nginx,
            phase: Mutex::new(ReloadPhase::Idle),
        }
    }

    pub fn phase(&self) -> ReloadPhase {
        *self.phase.lock()
    }

    pub fn is_fatal(&self) -> bool {
        self.phase() == ReloadPhase::FatalFailure
    }

    /// Operator acknowledgement that the fatal condition was resolved
    pub fn clear_fatal(&self) -> bool {
        let mut phase = self.phase.lock();
        if *phase == ReloadPhase::FatalFailure {
            *phase = ReloadPhase::Idle;
            info!("Fatal reload state cleared by operator");
            true
        } else {
            false
        }
    }

    fn set_phase(&self, next: ReloadPhase) {
        let mut phase = self.phase.lock();
        debug!(from = ?*phase, to = ?next, "Reload phase transition");
        *phase = next;
    }

    /// Apply a snapshot through the full protocol. On validation failure
    /// the live config is untouched; on reload/liveness failure the live
    /// config holds the failed snapshot and the caller must roll back.
    pub async fn apply(&self, snapshot: &ConfigSnapshot) -> Result<(), ReloadError> {
        if self.is_fatal() {
            return Err(ReloadError::FatallyLatched);
        }

        // Validate against a temp file next to the live config so the
        // final rename stays on one filesystem
        self.set_phase(ReloadPhase::Validating);
        let live_path = self.nginx.config_path.clone();
        let dir = live_path.parent().unwrap_or_else(|| Path::new("."));
        let mut temp = tempfile::NamedTempFile::new_in(dir).map_err(|e| {
            self.set_phase(ReloadPhase::Idle);
            ReloadError::Write {
                path: dir.display().to_string(),
                source: e,
            }
        })?;
        if let Err(e) = temp
            .write_all(snapshot.text.as_bytes())
            .and_then(|_| temp.flush())
        {
            self.set_phase(ReloadPhase::Idle);
            return Err(ReloadError::Write {
                path: temp.path().display().to_string(),
                source: e,
            });
        }

        if let Err(diagnostic) = run_command(&self.nginx.validate_command, temp.path()).await {
            self.set_phase(ReloadPhase::Idle);
            return Err(ReloadError::Validation { diagnostic });
        }

        // Atomic rename over the live config; never edit it in place
        self.set_phase(ReloadPhase::Applying);
        if let Err(e) = temp.persist(&live_path) {
            self.set_phase(ReloadPhase::Idle);
            return Err(ReloadError::Write {
                path: live_path.display().to_string(),
                source: e.error,
            });
        }
        info!(
            path = %live_path.display(),
            version = snapshot.version,
            blocks = snapshot.block_count,
            "Config written"
        );

        if let Err(diagnostic) = run_command(&self.nginx.reload_command, &live_path).await {
            return Err(ReloadError::Reload { diagnostic });
        }

        self.set_phase(ReloadPhase::Confirming);
        self.confirm_liveness().await?;

        self.set_phase(ReloadPhase::Idle);
        info!(version = snapshot.version, "Config reloaded and confirmed");
        Ok(())
    }

    /// Commit a cycle's snapshot: apply it and install it as current, or
    /// roll the store and the live config back to last-known-good.
    ///
    /// `Err` means either validation rejected the snapshot (live config
    /// untouched, cycle aborted) or the rollback itself failed (fatal).
    pub async fn commit_snapshot(
        &self,
        store: &mut ConfigStore,
        snapshot: ConfigSnapshot,
    ) -> Result<CommitOutcome, ReloadError> {
        let original = match self.apply(&snapshot).await {
            Ok(()) => {
                let version = snapshot.version;
                store.commit(snapshot);
                return Ok(CommitOutcome::Committed { version });
            }
            Err(e) if e.live_config_untouched() => return Err(e),
            Err(e) => e,
        };

        warn!(error = %original, "Reload failed, rolling back to last-known-good");
        self.set_phase(ReloadPhase::RollingBack);

        let lkg = match store.rollback() {
            Ok(lkg) => lkg,
            Err(e) => {
                self.set_phase(ReloadPhase::FatalFailure);
                error!(original = %original, rollback = %e, "Rollback impossible, escalating");
                return Err(ReloadError::Fatal {
                    original: original.to_string(),
                    rollback: e.to_string(),
                });
            }
        };

        match self.apply_for_rollback(&lkg).await {
            Ok(()) => {
                self.set_phase(ReloadPhase::Idle);
                info!(restored_version = lkg.version, "Last-known-good restored");
                Ok(CommitOutcome::RolledBack {
                    error: original,
                    restored_version: lkg.version,
                })
            }
            Err(e) => {
                // The known-good config failed to come back; operator time
                self.set_phase(ReloadPhase::FatalFailure);
                error!(original = %original, rollback = %e, "Rollback failed, escalating");
                Err(ReloadError::Fatal {
                    original: original.to_string(),
                    rollback: e.to_string(),
                })
            }
        }
    }

    /// Same protocol as [`apply`], but without the fatal-latch guard
    /// (we are the rollback).
    async fn apply_for_rollback(&self, snapshot: &ConfigSnapshot) -> Result<(), ReloadError> {
        let live_path = self.nginx.config_path.clone();
        let dir = live_path.parent().unwrap_or_else(|| Path::new("."));
        let mut temp = tempfile::NamedTempFile::new_in(dir).map_err(|e| ReloadError::Write {
            path: dir.display().to_string(),
            source: e,
        })?;
        temp.write_all(snapshot.text.as_bytes())
            .and_then(|_| temp.flush())
            .map_err(|e| ReloadError::Write {
                path: temp.path().display().to_string(),
                source: e,
            })?;

        if let Err(diagnostic) = run_command(&self.nginx.validate_command, temp.path()).await {
            return Err(ReloadError::Validation { diagnostic });
        }

        temp.persist(&live_path).map_err(|e| ReloadError::Write {
            path: live_path.display().to_string(),
            source: e.error,
        })?;

        if let Err(diagnostic) = run_command(&self.nginx.reload_command, &live_path).await {
            return Err(ReloadError::Reload { diagnostic });
        }

        self.confirm_liveness().await
    }

    /// Bounded liveness probe of the proxy master process. Skipped with a
    /// debug log when no PID file is configured.
    async fn confirm_liveness(&self) -> Result<(), ReloadError> {
        let Some(pid_file) = self.nginx.pid_file.clone() else {
            debug!("No nginx pid_file configured, skipping liveness probe");
            return Ok(());
        };

        let deadline = tokio::time::Instant::now() + self.nginx.liveness_timeout();
        let mut last_diag = String::from("probe never ran");

        loop {
            // Give the proxy a moment to act on the reload before probing
            tokio::time::sleep(PROBE_INTERVAL).await;

            match probe_pid_file(&pid_file) {
                Ok(pid) => {
                    debug!(pid, "Proxy liveness confirmed");
                    return Ok(());
                }
                Err(diag) => last_diag = diag,
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(ReloadError::Liveness {
                    diagnostic: last_diag,
                });
            }
        }
    }
}

/// Read the PID file and check the process exists. Returns the live PID
/// or a diagnostic string.
fn probe_pid_file(pid_file: &Path) -> Result<u32, String> {
    let content = std::fs::read_to_string(pid_file)
        .map_err(|e| format!("cannot read pid file {}: {}", pid_file.display(), e))?;
    let pid: i32 = content
        .split_whitespace()
        .next()
        .unwrap_or("")
        .parse()
        .map_err(|_| format!("pid file {} has no numeric pid", pid_file.display()))?;

    if process_alive(pid) {
        Ok(pid as u32)
    } else {
        Err(format!("process {} is not running", pid))
    }
}

#[cfg(unix)]
fn process_alive(pid: i32) -> bool {
    // Signal 0 performs the permission/existence check without delivering
    unsafe { libc::kill(pid, 0) == 0 }
}

#[cfg(not(unix))]
fn process_alive(_pid: i32) -> bool {
    true
}

/// Run a configured command line with `{config}` substituted. Returns the
/// combined diagnostic output on failure.
async fn run_command(command: &str, config_path: &Path) -> Result<(), String> {
    let rendered = command.replace("{config}", &config_path.to_string_lossy());
    let parts =
        shell_words::split(&rendered).map_err(|e| format!("unparseable command: {}", e))?;
    let (program, args) = parts
        .split_first()
        .ok_or_else(|| "empty command".to_string())?;

    let output = Command::new(program)
        .args(args)
        .output()
        .await
        .map_err(|e| format!("failed to spawn '{}': {}", program, e))?;

    if output.status.success() {
        Ok(())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stdout = String::from_utf8_lossy(&output.stdout);
        Err(format!(
            "'{}' exited with {}: {}{}",
            rendered,
            output.status,
            stderr.trim(),
            stdout.trim()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn snapshot(version: u64, text: &str) -> ConfigSnapshot {
        ConfigSnapshot {
            version,
            text: text.to_string(),
            block_count: 0,
            assembled_at: Utc::now(),
        }
    }

    fn nginx_config(dir: &Path, validate: &str, reload: &str) -> NginxConfig {
        NginxConfig {
            config_path: dir.join("campaigns.conf"),
            validate_command: validate.to_string(),
            reload_command: reload.to_string(),
            pid_file: None,
            liveness_timeout_secs: 1,
        }
    }

    #[tokio::test]
    async fn test_apply_success_writes_live_config() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = ReloadOrchestrator::new(nginx_config(dir.path(), "true", "true"));

        let snap = snapshot(1, "# generated\n");
        orchestrator.apply(&snap).await.unwrap();

        let written = std::fs::read_to_string(dir.path().join("campaigns.conf")).unwrap();
        assert_eq!(written, "# generated\n");
        assert_eq!(orchestrator.phase(), ReloadPhase::Idle);
    }

    #[tokio::test]
    async fn test_validation_failure_leaves_live_config_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let live = dir.path().join("campaigns.conf");
        std::fs::write(&live, "# original\n").unwrap();

        let orchestrator = ReloadOrchestrator::new(nginx_config(dir.path(), "false", "true"));
        let err = orchestrator.apply(&snapshot(2, "# candidate\n")).await.unwrap_err();

        assert!(matches!(err, ReloadError::Validation { .. }));
        assert!(err.live_config_untouched());
        assert_eq!(std::fs::read_to_string(&live).unwrap(), "# original\n");
        assert_eq!(orchestrator.phase(), ReloadPhase::Idle);
    }

    #[tokio::test]
    async fn test_reload_failure_surfaces_diagnostic() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = ReloadOrchestrator::new(nginx_config(dir.path(), "true", "false"));

        let err = orchestrator.apply(&snapshot(1, "x\n")).await.unwrap_err();
        assert!(matches!(err, ReloadError::Reload { .. }));
        assert!(!err.live_config_untouched());
    }

    #[tokio::test]
    async fn test_liveness_probe_with_own_pid() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("nginx.pid");
        std::fs::write(&pid_file, format!("{}\n", std::process::id())).unwrap();

        let mut nginx = nginx_config(dir.path(), "true", "true");
        nginx.pid_file = Some(pid_file);
        let orchestrator = ReloadOrchestrator::new(nginx);

        orchestrator.apply(&snapshot(1, "x\n")).await.unwrap();
    }

    #[tokio::test]
    async fn test_liveness_probe_dead_pid_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("nginx.pid");
        // PID far above pid_max is never a live process
        std::fs::write(&pid_file, "999999999\n").unwrap();

        let mut nginx = nginx_config(dir.path(), "true", "true");
        nginx.pid_file = Some(pid_file);
        let orchestrator = ReloadOrchestrator::new(nginx);

        let err = orchestrator.apply(&snapshot(1, "x\n")).await.unwrap_err();
        assert!(matches!(err, ReloadError::Liveness { .. }));
    }

    #[tokio::test]
    async fn test_commit_snapshot_commits_on_success() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = ReloadOrchestrator::new(nginx_config(dir.path(), "true", "true"));
        let mut store = ConfigStore::new();

        let snap = store.assemble();
        let outcome = orchestrator.commit_snapshot(&mut store, snap).await.unwrap();
        assert!(matches!(outcome, CommitOutcome::Committed { version: 1 }));
        assert_eq!(store.current().unwrap().version, 1);
    }

    #[tokio::test]
    async fn test_commit_snapshot_rolls_back_on_reload_failure() {
        let dir = tempfile::tempdir().unwrap();
        let live = dir.path().join("campaigns.conf");

        // First commit succeeds and becomes last-known-good
        let mut store = ConfigStore::new();
        let first = store.assemble();
        let good_version = first.version;
        ReloadOrchestrator::new(nginx_config(dir.path(), "true", "true"))
            .commit_snapshot(&mut store, first)
            .await
            .unwrap();
        let good_text = std::fs::read_to_string(&live).unwrap();

        // Reload command fails on its first run (the new snapshot) and
        // succeeds afterwards (the rollback re-apply)
        let marker = dir.path().join("reload-ran-once");
        let fail_once = format!(
            "sh -c 'if test -e {m}; then exit 0; else touch {m}; exit 1; fi'",
            m = marker.display()
        );
        let orchestrator = ReloadOrchestrator::new(nginx_config(dir.path(), "true", &fail_once));

        store
            .stage(crate::synth::ConfigBlock {
                campaign: "new-campaign".to_string(),
                location: "new-campaign".to_string(),
                verdict: crate::classifier::Verdict::Static,
                text: "# new-campaign\n".to_string(),
                content_hash: crate::synth::hash_text("# new-campaign\n"),
                generated_at: Utc::now(),
            })
            .unwrap();
        let second = store.assemble();
        let outcome = orchestrator
            .commit_snapshot(&mut store, second)
            .await
            .unwrap();

        match outcome {
            CommitOutcome::RolledBack {
                error,
                restored_version,
            } => {
                assert!(matches!(error, ReloadError::Reload { .. }));
                assert_eq!(restored_version, good_version);
            }
            other => panic!("expected rollback, got {other:?}"),
        }

        // Live config equals the last-known-good text, not the failed one
        assert_eq!(std::fs::read_to_string(&live).unwrap(), good_text);
        assert_eq!(store.current().unwrap().version, good_version);
        assert!(!orchestrator.is_fatal());
        assert_eq!(orchestrator.phase(), ReloadPhase::Idle);
    }

    #[tokio::test]
    async fn test_commit_snapshot_fatal_when_rollback_impossible() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = ReloadOrchestrator::new(nginx_config(dir.path(), "true", "false"));
        let mut store = ConfigStore::new();

        // No last-known-good exists, so a reload failure cannot roll back
        let snap = store.assemble();
        let err = orchestrator.commit_snapshot(&mut store, snap).await.unwrap_err();
        assert!(matches!(err, ReloadError::Fatal { .. }));
        assert!(orchestrator.is_fatal());

        // Latched: further applies are refused until cleared
        let next = store.assemble();
        let err = orchestrator.apply(&next).await.unwrap_err();
        assert!(matches!(err, ReloadError::FatallyLatched));

        assert!(orchestrator.clear_fatal());
        assert_eq!(orchestrator.phase(), ReloadPhase::Idle);
    }

    #[tokio::test]
    async fn test_validation_failure_aborts_without_rollback() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = ReloadOrchestrator::new(nginx_config(dir.path(), "false", "true"));
        let mut store = ConfigStore::new();

        let snap = store.assemble();
        let err = orchestrator.commit_snapshot(&mut store, snap).await.unwrap_err();
        assert!(matches!(err, ReloadError::Validation { .. }));
        assert!(!orchestrator.is_fatal());
        assert!(store.current().is_none());
    }
}
