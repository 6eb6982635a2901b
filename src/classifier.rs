//! Structure classification
//!
//! Classification is a pure function over a [`CampaignDirectory`] snapshot.
//! The rules live in a fixed-priority table ([`RULES`]); the first matching
//! rule decides the verdict, and every rule that fired is recorded as
//! evidence so skip notices can name exactly what was seen.

use crate::campaign::CampaignDirectory;
use serde::Serialize;

/// The classifier's structural judgment about a campaign
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Verdict {
    /// Passive assets, optionally behind a single entry-point script
    Static,
    /// Entry-point script plus further server-side scripts, no framework
    DynamicSimple,
    /// Framework bootstrap structure; never auto-configured
    FrameworkLike,
    /// No recognized entry point; needs manual review
    Unknown,
}

impl Verdict {
    /// Verdicts that route to config synthesis
    pub fn is_deployable(&self) -> bool {
        matches!(self, Verdict::Static | Verdict::DynamicSimple)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Static => "static",
            Verdict::DynamicSimple => "dynamic-simple",
            Verdict::FrameworkLike => "framework-like",
            Verdict::Unknown => "unknown",
        }
    }
}

/// A verdict plus the evidence behind it
#[derive(Debug, Clone, Serialize)]
pub struct ClassificationVerdict {
    pub verdict: Verdict,
    /// Names of every rule that fired, in table order
    pub evidence: Vec<&'static str>,
    /// Human-readable reason, used verbatim in skip notices
    pub reason: String,
}

/// One classification rule: a name and a predicate over the snapshot
struct Rule {
    name: &'static str,
    verdict: Verdict,
    matches: fn(&CampaignDirectory) -> bool,
}

/// The rule table, in priority order. First match wins; later entries act
/// as tie-breakers for ambiguous structures.
const RULES: &[Rule] = &[
    Rule {
        name: "framework-bootstrap",
        verdict: Verdict::FrameworkLike,
        matches: |d| d.has_public_entry_point && (d.has_framework_dir || d.has_manifest),
    },
    Rule {
        name: "entry-point-with-scripts",
        verdict: Verdict::DynamicSimple,
        matches: |d| {
            d.top_level_entry_point.is_some()
                && !d.has_manifest
                && d.dynamic_file_count > usize::from(d.entry_point_is_dynamic)
        },
    },
    Rule {
        name: "entry-point-with-passive-assets",
        verdict: Verdict::Static,
        matches: |d| {
            d.top_level_entry_point.is_some()
                && !d.has_manifest
                && d.dynamic_file_count <= usize::from(d.entry_point_is_dynamic)
        },
    },
    Rule {
        name: "passive-assets-only",
        verdict: Verdict::Static,
        matches: |d| d.file_count > 0 && d.dynamic_file_count == 0 && !d.has_manifest,
    },
];

/// Classify one campaign snapshot.
pub fn classify(dir: &CampaignDirectory) -> ClassificationVerdict {
    let fired: Vec<&'static str> = RULES
        .iter()
        .filter(|r| (r.matches)(dir))
        .map(|r| r.name)
        .collect();

    let decided = RULES.iter().find(|r| (r.matches)(dir));

    match decided {
        Some(rule) => {
            let reason = match rule.verdict {
                Verdict::FrameworkLike => "framework bootstrap structure detected".to_string(),
                verdict => format!("{} structure matched rule '{}'", verdict.as_str(), rule.name),
            };
            ClassificationVerdict {
                verdict: rule.verdict,
                evidence: fired,
                reason,
            }
        }
        None => ClassificationVerdict {
            verdict: Verdict::Unknown,
            evidence: fired,
            reason: "no recognized entry point".to_string(),
        },
    }
}
