//! Scan reports
//!
//! One [`ScanReport`] is produced per scan cycle: what changed per
//! campaign, each affected campaign's terminal outcome, and how the
//! cycle's single commit went. Reports serialize to JSON for the admin
//! API and the `ztctl` CLI.

use crate::classifier::Verdict;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// How a campaign directory changed since the previous scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChangeKind {
    Added,
    Removed,
    Changed,
    Unchanged,
}

/// Terminal outcome for one campaign in one cycle
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum CampaignOutcome {
    /// Block staged (or already present) and the cycle's snapshot committed
    Committed { verdict: Verdict, location: String },
    /// Block staged but the cycle did not commit (dry run, validation
    /// failure, or rollback)
    Staged { verdict: Verdict, location: String },
    /// No block generated; reason carries the manual-setup notice
    Skipped { verdict: Verdict, reason: String },
    /// Per-campaign failure (I/O or synthesis); cycle continued without it
    Failed { reason: String },
    /// Directory disappeared; its block was retracted
    Retracted,
    /// Structure unchanged since the previous scan; nothing to do
    Unchanged,
}

/// Per-campaign line in the report
#[derive(Debug, Clone, Serialize)]
pub struct CampaignReport {
    pub name: String,
    pub change: ChangeKind,
    #[serde(flatten)]
    pub outcome: CampaignOutcome,
}

/// How the cycle's single commit step ended
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "kebab-case")]
pub enum CycleOutcome {
    /// Assembled snapshot validated, applied, and confirmed
    Committed { version: u64 },
    /// Working set unchanged; no assemble or reload was attempted
    NoChanges { current_version: Option<u64> },
    /// Validation rejected the snapshot; live config untouched
    ValidationFailed { diagnostic: String },
    /// Reload failed; last-known-good was restored
    RolledBack {
        error: String,
        restored_version: u64,
    },
    /// Rollback failed too; automatic mutation halted
    Fatal { error: String },
    /// Assembled but deliberately not committed
    DryRun {
        version: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        assembled: Option<String>,
    },
    /// A previous fatal condition is still latched; cycle refused
    FatallyLatched,
}

/// Machine-readable result of one scan cycle
#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub dry_run: bool,
    pub campaigns: Vec<CampaignReport>,
    pub cycle: CycleOutcome,
}

impl ScanReport {
    /// Number of campaigns whose outcome matches the predicate
    pub fn count_where(&self, pred: impl Fn(&CampaignOutcome) -> bool) -> usize {
        self.campaigns.iter().filter(|c| pred(&c.outcome)).count()
    }

    pub fn committed_count(&self) -> usize {
        self.count_where(|o| matches!(o, CampaignOutcome::Committed { .. }))
    }

    pub fn skipped_count(&self) -> usize {
        self.count_where(|o| matches!(o, CampaignOutcome::Skipped { .. }))
    }

    pub fn failed_count(&self) -> usize {
        self.count_where(|o| matches!(o, CampaignOutcome::Failed { .. }))
    }

    pub fn outcome_for(&self, name: &str) -> Option<&CampaignOutcome> {
        self.campaigns
            .iter()
            .find(|c| c.name == name)
            .map(|c| &c.outcome)
    }
}

/// Skip notice for a non-deployable verdict, mirroring the manual-setup
/// wording shown on skipped campaigns
pub fn skip_notice(verdict: Verdict, reason: &str) -> String {
    match verdict {
        Verdict::FrameworkLike => format!("{}; manual nginx configuration required", reason),
        _ => format!("{}; manual review required", reason),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report_with(outcomes: Vec<(&str, CampaignOutcome)>) -> ScanReport {
        ScanReport {
            started_at: Utc::now(),
            finished_at: Utc::now(),
            dry_run: false,
            campaigns: outcomes
                .into_iter()
                .map(|(name, outcome)| CampaignReport {
                    name: name.to_string(),
                    change: ChangeKind::Added,
                    outcome,
                })
                .collect(),
            cycle: CycleOutcome::Committed { version: 1 },
        }
    }

    #[test]
    fn test_counts() {
        let report = report_with(vec![
            (
                "a",
                CampaignOutcome::Committed {
                    verdict: Verdict::Static,
                    location: "a".to_string(),
                },
            ),
            (
                "b",
                CampaignOutcome::Skipped {
                    verdict: Verdict::FrameworkLike,
                    reason: "framework bootstrap structure detected".to_string(),
                },
            ),
            (
                "c",
                CampaignOutcome::Failed {
                    reason: "permission denied".to_string(),
                },
            ),
        ]);

        assert_eq!(report.committed_count(), 1);
        assert_eq!(report.skipped_count(), 1);
        assert_eq!(report.failed_count(), 1);
        assert!(matches!(
            report.outcome_for("b"),
            Some(CampaignOutcome::Skipped { .. })
        ));
        assert!(report.outcome_for("missing").is_none());
    }

    #[test]
    fn test_skip_notice_wording() {
        let framework = skip_notice(
            Verdict::FrameworkLike,
            "framework bootstrap structure detected",
        );
        assert!(framework.contains("manual nginx configuration required"));

        let unknown = skip_notice(Verdict::Unknown, "no recognized entry point");
        assert!(unknown.contains("manual review required"));
    }

    #[test]
    fn test_report_serializes_to_json() {
        let report = report_with(vec![(
            "sample-static-campaign",
            CampaignOutcome::Committed {
                verdict: Verdict::Static,
                location: "sample-static-campaign".to_string(),
            },
        )]);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["campaigns"][0]["name"], "sample-static-campaign");
        assert_eq!(json["campaigns"][0]["status"], "committed");
        assert_eq!(json["campaigns"][0]["change"], "added");
        assert_eq!(json["cycle"]["result"], "committed");
    }
}
