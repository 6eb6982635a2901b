//! Error taxonomy for the deployment engine
//!
//! Per-campaign failures (I/O, synthesis) skip that campaign and the scan
//! cycle continues. Validation and reload failures affect the whole cycle:
//! validation aborts the commit with the live config untouched, reload
//! failure rolls back to the last-known-good snapshot, and a rollback that
//! itself fails validation latches a fatal condition that blocks further
//! automatic mutation until an operator clears it.

use thiserror::Error;

/// Synthesis failed for one campaign; the campaign is skipped and reported.
#[derive(Debug, Error)]
pub enum SynthesisError {
    /// Campaign name sanitizes to an empty location path
    #[error("campaign name '{0}' sanitizes to an empty location path")]
    UnsanitizableName(String),

    /// Document root contains characters that could break out of the
    /// nginx configuration grammar
    #[error("document root '{path}' contains unsafe character {chr:?}")]
    UnsafePath { path: String, chr: char },

    /// Two distinct campaign names sanitize to the same location path
    #[error("location '/{location}/' for campaign '{campaign}' collides with campaign '{existing}'")]
    LocationCollision {
        campaign: String,
        existing: String,
        location: String,
    },
}

/// Applying an assembled snapshot to the live proxy failed.
#[derive(Debug, Error)]
pub enum ReloadError {
    /// Offline syntax validation rejected the assembled config.
    /// The live config was not touched.
    #[error("config validation failed: {diagnostic}")]
    Validation { diagnostic: String },

    /// Writing or renaming the config file failed
    #[error("failed to write config to {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The reload command could not be spawned or exited non-zero
    #[error("proxy reload command failed: {diagnostic}")]
    Reload { diagnostic: String },

    /// The proxy process was gone after the reload signal
    #[error("proxy liveness probe failed after reload: {diagnostic}")]
    Liveness { diagnostic: String },

    /// Reload failed and restoring the last-known-good snapshot also
    /// failed. No further automatic mutation until manually cleared.
    #[error("rollback after reload failure also failed: original: {original}; rollback: {rollback}")]
    Fatal { original: String, rollback: String },

    /// A previous cycle latched the fatal condition and it has not been
    /// cleared yet
    #[error("orchestrator is in fatal state; clear it before applying new config")]
    FatallyLatched,

    /// Rollback requested with no last-known-good snapshot retained
    #[error("no last-known-good snapshot available for rollback")]
    NoLastKnownGood,
}

impl ReloadError {
    /// True for the variants that must halt automatic mutation entirely
    pub fn is_fatal(&self) -> bool {
        matches!(self, ReloadError::Fatal { .. } | ReloadError::FatallyLatched)
    }

    /// True when the live config is known to be untouched by the failure
    pub fn live_config_untouched(&self) -> bool {
        matches!(
            self,
            ReloadError::Validation { .. } | ReloadError::Write { .. } | ReloadError::FatallyLatched
        )
    }
}
