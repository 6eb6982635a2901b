//! Scan controller
//!
//! Drives one full cycle: walk the campaigns root, snapshot each immediate
//! subdirectory, diff against the previous cycle, classify and synthesize
//! the affected campaigns in parallel, then serialize every store mutation
//! and run the cycle's single assemble + commit through the orchestrator.
//! The proxy reloads at most once per cycle regardless of how many
//! campaigns changed.

use crate::campaign::CampaignDirectory;
use crate::classifier::{classify, ClassificationVerdict, Verdict};
use crate::config::{Config, MarkerConfig};
use crate::error::{ReloadError, SynthesisError};
use crate::reload::{CommitOutcome, ReloadOrchestrator};
use crate::report::{
    skip_notice, CampaignOutcome, CampaignReport, ChangeKind, CycleOutcome, ScanReport,
};
use crate::store::{ConfigStore, StageOutcome};
use crate::synth::{synthesize, ConfigBlock};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Summary of one staged block, for the admin API
#[derive(Debug, Clone, Serialize)]
pub struct BlockSummary {
    pub campaign: String,
    pub location: String,
    pub verdict: Verdict,
    pub content_hash: String,
    pub generated_at: DateTime<Utc>,
}

/// Result of the parallel per-campaign phase
struct CampaignWork {
    name: String,
    change: ChangeKind,
    result: WorkResult,
    snapshot: Option<CampaignDirectory>,
}

enum WorkResult {
    /// Snapshot identical to the previous cycle; not re-processed
    Unchanged,
    Classified {
        verdict: ClassificationVerdict,
        block: Result<Option<ConfigBlock>, SynthesisError>,
    },
    Io(String),
}

/// Interim per-campaign outcome, finalized once the cycle commit resolves
enum Interim {
    Staged { verdict: Verdict, location: String },
    Skipped { verdict: Verdict, reason: String },
    Failed { reason: String },
    Retracted,
    Unchanged,
}

/// Walks the campaigns root and drives classification, synthesis, the
/// store, and the orchestrator for each cycle
pub struct ScanController {
    root: PathBuf,
    markers: Arc<MarkerConfig>,
    store: tokio::sync::Mutex<ConfigStore>,
    orchestrator: ReloadOrchestrator,
    previous: parking_lot::Mutex<HashMap<String, CampaignDirectory>>,
    last_report: parking_lot::Mutex<Option<ScanReport>>,
}

impl ScanController {
    pub fn new(config: &Config) -> Self {
        Self {
            root: config.campaigns.root.clone(),
            markers: Arc::new(config.markers.clone()),
            store: tokio::sync::Mutex::new(ConfigStore::new()),
            orchestrator: ReloadOrchestrator::new(config.nginx.clone()),
            previous: parking_lot::Mutex::new(HashMap::new()),
            last_report: parking_lot::Mutex::new(None),
        }
    }

    pub fn orchestrator(&self) -> &ReloadOrchestrator {
        &self.orchestrator
    }

    /// The last completed cycle's report
    pub fn last_report(&self) -> Option<ScanReport> {
        self.last_report.lock().clone()
    }

    /// Current working-set blocks, for the status surface
    pub async fn block_summaries(&self) -> Vec<BlockSummary> {
        let store = self.store.lock().await;
        store
            .blocks()
            .map(|b| BlockSummary {
                campaign: b.campaign.clone(),
                location: b.location.clone(),
                verdict: b.verdict,
                content_hash: b.content_hash.clone(),
                generated_at: b.generated_at,
            })
            .collect()
    }

    pub async fn current_version(&self) -> Option<u64> {
        self.store.lock().await.current().map(|s| s.version)
    }

    /// Run one scan cycle. With `dry_run` the working set and previous
    /// snapshots are left untouched and the assembled text is returned in
    /// the report instead of being committed.
    pub async fn scan(&self, dry_run: bool) -> anyhow::Result<ScanReport> {
        let started_at = Utc::now();

        if self.orchestrator.is_fatal() && !dry_run {
            warn!("Scan refused: orchestrator is in fatal state");
            let report = ScanReport {
                started_at,
                finished_at: Utc::now(),
                dry_run,
                campaigns: Vec::new(),
                cycle: CycleOutcome::FatallyLatched,
            };
            *self.last_report.lock() = Some(report.clone());
            return Ok(report);
        }

        // Phase 1: discover campaign directories (blocking I/O off the
        // async runtime)
        let root = self.root.clone();
        let dirs = tokio::task::spawn_blocking(move || list_campaign_dirs(&root))
            .await
            .map_err(|e| anyhow::anyhow!("campaign discovery task panicked: {}", e))??;

        // Phase 2: snapshot + classify + synthesize each campaign in
        // parallel; pure and read-only per campaign, so order is free
        let previous = self.previous.lock().clone();
        let mut tasks = Vec::with_capacity(dirs.len());
        for path in dirs {
            let markers = Arc::clone(&self.markers);
            let prev = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .and_then(|name| previous.get(&name).cloned());
            tasks.push(tokio::task::spawn_blocking(move || {
                process_campaign(&path, &markers, prev.as_ref())
            }));
        }

        let mut work: Vec<CampaignWork> = Vec::with_capacity(tasks.len());
        for task in futures::future::join_all(tasks).await {
            match task {
                Ok(w) => work.push(w),
                Err(e) => error!(error = %e, "Campaign processing task panicked"),
            }
        }

        // Campaigns present last cycle but gone now
        let seen: std::collections::HashSet<&str> =
            work.iter().map(|w| w.name.as_str()).collect();
        let removed: Vec<String> = previous
            .keys()
            .filter(|name| !seen.contains(name.as_str()))
            .cloned()
            .collect();

        work.sort_by(|a, b| a.name.cmp(&b.name));

        // Phase 3: serialized store mutation + single commit
        let mut store = self.store.lock().await;
        let report = if dry_run {
            let mut scratch = store.clone();
            self.mutate_and_commit(&mut scratch, work, removed, started_at, true)
                .await
        } else {
            self.mutate_and_commit(&mut store, work, removed, started_at, false)
                .await
        };
        drop(store);

        log_summary(&report);
        *self.last_report.lock() = Some(report.clone());
        Ok(report)
    }

    async fn mutate_and_commit(
        &self,
        store: &mut ConfigStore,
        work: Vec<CampaignWork>,
        removed: Vec<String>,
        started_at: DateTime<Utc>,
        dry_run: bool,
    ) -> ScanReport {
        let mut interim: Vec<(String, ChangeKind, Interim)> = Vec::new();
        let mut next_previous: HashMap<String, CampaignDirectory> = HashMap::new();

        for w in work {
            if let Some(snapshot) = &w.snapshot {
                next_previous.insert(w.name.clone(), snapshot.clone());
            }
            let outcome = match w.result {
                WorkResult::Unchanged => Interim::Unchanged,
                WorkResult::Io(reason) => {
                    warn!(campaign = %w.name, reason = %reason, "Campaign unreadable, skipping");
                    Interim::Failed { reason }
                }
                WorkResult::Classified { verdict, block } => {
                    stage_campaign(store, &w.name, verdict, block)
                }
            };
            interim.push((w.name, w.change, outcome));
        }

        for name in removed {
            let had_block = store.retract(&name);
            debug!(campaign = %name, had_block, "Campaign directory removed, block retracted");
            interim.push((name, ChangeKind::Removed, Interim::Retracted));
        }

        interim.sort_by(|a, b| a.0.cmp(&b.0));

        let cycle = if !store.is_dirty() {
            CycleOutcome::NoChanges {
                current_version: store.current().map(|s| s.version),
            }
        } else if dry_run {
            let snapshot = store.assemble();
            CycleOutcome::DryRun {
                version: snapshot.version,
                assembled: Some(snapshot.text),
            }
        } else {
            let snapshot = store.assemble();
            match self.orchestrator.commit_snapshot(store, snapshot).await {
                Ok(CommitOutcome::Committed { version }) => CycleOutcome::Committed { version },
                Ok(CommitOutcome::RolledBack {
                    error,
                    restored_version,
                }) => CycleOutcome::RolledBack {
                    error: error.to_string(),
                    restored_version,
                },
                Err(ReloadError::Validation { diagnostic }) => {
                    CycleOutcome::ValidationFailed { diagnostic }
                }
                Err(e) => CycleOutcome::Fatal {
                    error: e.to_string(),
                },
            }
        };

        // Snapshots only advance the diff baseline on real cycles
        if !dry_run {
            *self.previous.lock() = next_previous;
        }

        let committed = matches!(cycle, CycleOutcome::Committed { .. });
        let campaigns = interim
            .into_iter()
            .map(|(name, change, outcome)| CampaignReport {
                name,
                change,
                outcome: finalize_outcome(outcome, committed),
            })
            .collect();

        ScanReport {
            started_at,
            finished_at: Utc::now(),
            dry_run,
            campaigns,
            cycle,
        }
    }
}

/// Immediate subdirectories of the campaigns root; plain files are ignored
fn list_campaign_dirs(root: &std::path::Path) -> anyhow::Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    for entry in std::fs::read_dir(root)
        .map_err(|e| anyhow::anyhow!("cannot read campaigns root {}: {}", root.display(), e))?
    {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            dirs.push(entry.path());
        }
    }
    Ok(dirs)
}

/// Snapshot, diff, classify, and synthesize one campaign. Pure apart from
/// the snapshot itself; runs off the async runtime.
fn process_campaign(
    path: &std::path::Path,
    markers: &MarkerConfig,
    previous: Option<&CampaignDirectory>,
) -> CampaignWork {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    let snapshot = match CampaignDirectory::snapshot(path, markers) {
        Ok(s) => s,
        Err(e) => {
            return CampaignWork {
                name,
                change: if previous.is_some() {
                    ChangeKind::Changed
                } else {
                    ChangeKind::Added
                },
                result: WorkResult::Io(e.to_string()),
                snapshot: None,
            }
        }
    };

    let change = match previous {
        Some(prev) if *prev == snapshot => {
            return CampaignWork {
                name,
                change: ChangeKind::Unchanged,
                result: WorkResult::Unchanged,
                snapshot: Some(snapshot),
            }
        }
        Some(_) => ChangeKind::Changed,
        None => ChangeKind::Added,
    };

    let verdict = classify(&snapshot);
    debug!(
        campaign = %name,
        verdict = verdict.verdict.as_str(),
        evidence = ?verdict.evidence,
        "Campaign classified"
    );
    let block = synthesize(&snapshot, &verdict, markers);

    CampaignWork {
        name,
        change,
        result: WorkResult::Classified { verdict, block },
        snapshot: Some(snapshot),
    }
}

/// Apply one campaign's synthesis result to the working set
fn stage_campaign(
    store: &mut ConfigStore,
    name: &str,
    verdict: ClassificationVerdict,
    block: Result<Option<ConfigBlock>, SynthesisError>,
) -> Interim {
    match block {
        Ok(Some(block)) => {
            let location = block.location.clone();
            let v = block.verdict;
            match store.stage(block) {
                Ok(StageOutcome::Unchanged) => Interim::Unchanged,
                Ok(_) => Interim::Staged {
                    verdict: v,
                    location,
                },
                Err(e) => {
                    warn!(campaign = %name, error = %e, "Block rejected at stage time");
                    Interim::Failed {
                        reason: e.to_string(),
                    }
                }
            }
        }
        Ok(None) => {
            // A campaign that regressed from deployable must not leave a
            // stale block behind
            let retracted = store.retract(name);
            if retracted {
                info!(campaign = %name, verdict = verdict.verdict.as_str(), "Previously deployed campaign regressed, block retracted");
            }
            Interim::Skipped {
                verdict: verdict.verdict,
                reason: skip_notice(verdict.verdict, &verdict.reason),
            }
        }
        Err(e) => {
            warn!(campaign = %name, error = %e, "Synthesis failed");
            Interim::Failed {
                reason: e.to_string(),
            }
        }
    }
}

fn finalize_outcome(interim: Interim, cycle_committed: bool) -> CampaignOutcome {
    match interim {
        Interim::Staged { verdict, location } if cycle_committed => CampaignOutcome::Committed {
            verdict,
            location,
        },
        Interim::Staged { verdict, location } => CampaignOutcome::Staged { verdict, location },
        Interim::Skipped { verdict, reason } => CampaignOutcome::Skipped { verdict, reason },
        Interim::Failed { reason } => CampaignOutcome::Failed { reason },
        Interim::Retracted => CampaignOutcome::Retracted,
        Interim::Unchanged => CampaignOutcome::Unchanged,
    }
}

fn log_summary(report: &ScanReport) {
    info!(
        campaigns = report.campaigns.len(),
        committed = report.committed_count(),
        skipped = report.skipped_count(),
        failed = report.failed_count(),
        dry_run = report.dry_run,
        cycle = ?report.cycle,
        "Scan cycle finished"
    );
}
