//! Attachment version deduplication.
//!
//! Several vendors (Legistar above all) publish every revision of a
//! document: `Staff Report Leg Ver1`, `Staff Report Leg Ver2`, … Showing
//! all of them doubles packet downloads and confuses summaries, so the
//! filter keeps only the highest explicit version and leaves everything
//! unversioned untouched.

use regex::Regex;

use crate::types::AttachmentRef;

/// Default version markers (Legistar's wording).
const DEFAULT_VERSION_PATTERNS: &[&str] = &["leg ver", "legislative version"];

/// Highest explicit version number we scan for.
const MAX_SCANNED_VERSION: u32 = 10;

/// Keep at most one revision of versioned documents, preferring higher
/// version numbers. The chosen revision is inserted at the front of the
/// unversioned attachments; idempotent by construction.
pub fn filter_version_attachments(
    attachments: Vec<AttachmentRef>,
    version_patterns: Option<&[&str]>,
) -> Vec<AttachmentRef> {
    let patterns = version_patterns.unwrap_or(DEFAULT_VERSION_PATTERNS);

    let (versioned, mut others): (Vec<AttachmentRef>, Vec<AttachmentRef>) =
        attachments.into_iter().partition(|att| {
            let name = att.name.to_lowercase();
            patterns.iter().any(|pattern| name.contains(pattern))
        });

    if let Some(selected) = select_highest_version(versioned) {
        others.insert(0, selected);
    }
    others
}

/// Pick the attachment with the highest explicit version number
/// (`Ver2`, `v 2`, `version 2`), scanning high to low. Falls back to the
/// first attachment when no number is detected.
fn select_highest_version(versioned: Vec<AttachmentRef>) -> Option<AttachmentRef> {
    if versioned.is_empty() {
        return None;
    }

    for target in (1..=MAX_SCANNED_VERSION).rev() {
        let pattern =
            Regex::new(&format!(r"(?i)ver\s*{target}\b|v\s*{target}\b|\bversion\s*{target}\b"))
                .expect("static version pattern");
        if let Some(found) = versioned.iter().find(|att| pattern.is_match(&att.name)) {
            return Some(found.clone());
        }
    }

    versioned.into_iter().next()
}
