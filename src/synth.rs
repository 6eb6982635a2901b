//! Config block synthesis
//!
//! Turns a classified campaign into an nginx `location` block, or decides
//! that none should exist. Synthesis is deterministic: the same snapshot
//! and verdict always produce byte-identical text, so the content hash can
//! be used for idempotence checks in the store.

use crate::campaign::CampaignDirectory;
use crate::classifier::{ClassificationVerdict, Verdict};
use crate::config::MarkerConfig;
use crate::error::SynthesisError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Characters that could break out of the nginx configuration grammar.
/// Any of these in a document-root path rejects synthesis outright.
const UNSAFE_PATH_CHARS: &[char] = &['"', '\'', ';', '{', '}', '#', '\\'];

/// Generated proxy directive fragment for one campaign
#[derive(Debug, Clone, Serialize)]
pub struct ConfigBlock {
    /// Campaign name (unique key into the store)
    pub campaign: String,
    /// Sanitized location path (without surrounding slashes)
    pub location: String,
    /// Verdict the block was derived from
    pub verdict: Verdict,
    /// The nginx directive block
    pub text: String,
    /// SHA-256 of `text`, hex encoded
    pub content_hash: String,
    /// When this block was generated
    pub generated_at: DateTime<Utc>,
}

/// Sanitize a campaign name into a location path segment: lowercase, runs
/// of non-alphanumerics collapsed to `-`, leading/trailing `-` trimmed.
pub fn sanitize_name(name: &str) -> Result<String, SynthesisError> {
    let mut out = String::with_capacity(name.len());
    let mut pending_dash = false;

    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }

    if out.is_empty() {
        return Err(SynthesisError::UnsanitizableName(name.to_string()));
    }
    Ok(out)
}

/// Synthesize the config block for a classified campaign.
///
/// FrameworkLike and Unknown verdicts produce no block; the caller must
/// retract any previously staged block for the campaign so a structure
/// that regressed from Static does not leave stale config behind.
pub fn synthesize(
    dir: &CampaignDirectory,
    verdict: &ClassificationVerdict,
    markers: &MarkerConfig,
) -> Result<Option<ConfigBlock>, SynthesisError> {
    if !verdict.verdict.is_deployable() {
        return Ok(None);
    }

    let location = sanitize_name(&dir.name)?;
    let root = safe_path(&dir.path)?;
    check_comment_safe(&dir.name)?;

    let mut text = String::new();
    text.push_str(&format!(
        "# campaign: {} ({})\n",
        dir.name,
        verdict.verdict.as_str()
    ));
    text.push_str(&format!("location ^~ /{}/ {{\n", location));
    text.push_str(&format!("    root {};\n", root));
    text.push_str(&format!("    index {};\n", markers.entry_points.join(" ")));
    text.push_str("    try_files $uri $uri/ =404;\n");

    if verdict.verdict == Verdict::DynamicSimple {
        text.push_str(&format!(
            "    location ~ {} {{\n",
            script_pattern(&markers.dynamic_extensions)
        ));
        text.push_str(&format!(
            "        fastcgi_pass unix:{};\n",
            markers.fastcgi_socket
        ));
        text.push_str("        include fastcgi_params;\n");
        text.push_str("        fastcgi_param SCRIPT_FILENAME $request_filename;\n");
        text.push_str("    }\n");
    }

    text.push_str("}\n");

    let content_hash = hash_text(&text);

    Ok(Some(ConfigBlock {
        campaign: dir.name.clone(),
        location,
        verdict: verdict.verdict,
        text,
        content_hash,
        generated_at: Utc::now(),
    }))
}

/// SHA-256 hex digest of a block's text
pub fn hash_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

/// Regex fragment matching the configured server-side script extensions
fn script_pattern(extensions: &[String]) -> String {
    match extensions {
        [single] => format!("\\.{}$", single),
        many => format!("\\.({})$", many.join("|")),
    }
}

/// Reject document roots that could break out of the config grammar
fn safe_path(path: &std::path::Path) -> Result<&str, SynthesisError> {
    let s = path.to_str().ok_or_else(|| SynthesisError::UnsafePath {
        path: path.to_string_lossy().into_owned(),
        chr: '\u{fffd}',
    })?;

    for c in s.chars() {
        if c.is_control() || c.is_whitespace() || UNSAFE_PATH_CHARS.contains(&c) {
            return Err(SynthesisError::UnsafePath {
                path: s.to_string(),
                chr: c,
            });
        }
    }
    Ok(s)
}

/// The raw campaign name appears in a comment line; only line breaks and
/// other control characters can escape a comment
fn check_comment_safe(name: &str) -> Result<(), SynthesisError> {
    for c in name.chars() {
        if c.is_control() {
            return Err(SynthesisError::UnsafePath {
                path: name.to_string(),
                chr: c,
            });
        }
    }
    Ok(())
}
