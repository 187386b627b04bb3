//! Participation info extraction from agenda page text.
//!
//! Agenda headers bury how to actually attend: a clerk email, a dial-in
//! number, a Zoom link. Everything here is regex over the page's visible
//! text; the phone pattern requires a `Phone:` prefix (or the vendor's
//! `1(nnn)nnn-nnnn` shape) so Zoom meeting ids don't masquerade as phone
//! numbers.

use std::sync::OnceLock;

use regex::Regex;

use crate::types::Participation;

/// Domains that mark a URL as a virtual-meeting link.
const VIRTUAL_DOMAINS: &[&str] = &[
    "zoom.us",
    "meet.google.com",
    "teams.microsoft.com",
    "webex.com",
    "gotomeeting.com",
];

/// Page-text phrases that signal a hybrid meeting.
const HYBRID_KEYWORDS: &[&str] = &[
    "hybrid",
    "in-person and virtual",
    "attend in person or",
    "zoom or in person",
];

/// Email addresses that are never a participation contact.
const SKIP_EMAILS: &[&str] = &["example.com", "test@", "noreply"];

fn re_email() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").unwrap()
    })
}

fn re_phone_labeled() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // "Phone: 1(669)900-6833"
    RE.get_or_init(|| {
        Regex::new(r"[Pp]hone[:\s]+(\+?1?\s*\(?\d{3}\)?[\s.-]?\d{3}[\s.-]?\d{4})").unwrap()
    })
}

fn re_phone_bare() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b1\s*\(\d{3}\)\s*\d{3}-\d{4}\b").unwrap())
}

fn re_url() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Stop at whitespace and closing punctuation so "(https://…)" parses.
    RE.get_or_init(|| Regex::new(r#"https?://[^\s<>"{}|\\^`\[\]\)]+"#).unwrap())
}

fn re_meeting_id() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)meeting\s*id[:\s]+(\d{3}[\s-]?\d{3,4}[\s-]?\d{4})").unwrap()
    })
}

/// Extract participation info from agenda page text.
pub fn extract_participation(text: &str) -> Participation {
    let mut info = Participation::default();

    // Email: first address that isn't a placeholder
    info.email = re_email()
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .find(|email| {
            let lower = email.to_lowercase();
            !SKIP_EMAILS.iter().any(|skip| lower.contains(skip))
        });

    // Phone: labeled form first, then the bare national format
    let phone_raw = re_phone_labeled()
        .captures(text)
        .map(|caps| caps[1].to_string())
        .or_else(|| re_phone_bare().find(text).map(|m| m.as_str().to_string()));
    info.phone = phone_raw.and_then(|raw| normalize_phone(&raw));

    // Virtual meeting URL from known conferencing domains
    info.virtual_url = re_url()
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .find(|url| {
            let lower = url.to_lowercase();
            VIRTUAL_DOMAINS.iter().any(|domain| lower.contains(domain))
        });

    // Zoom meeting id, only when the page mentions zoom at all
    if text.to_lowercase().contains("zoom") {
        info.meeting_id = re_meeting_id()
            .captures(text)
            .map(|caps| caps[1].trim().to_string());
    }

    let lower = text.to_lowercase();
    if HYBRID_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
        info.is_hybrid = true;
    } else if info.virtual_url.is_some() {
        info.is_virtual_only = true;
    }

    info
}

/// Strip punctuation and normalize to E.164-ish `+1nnnnnnnnnn`.
fn normalize_phone(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    match digits.len() {
        10 => Some(format!("+1{digits}")),
        11 if digits.starts_with('1') => Some(format!("+{digits}")),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HYBRID_PAGE: &str = "\
        Members of the public may attend in person or join via Zoom at \
        https://cityofpaloalto.zoom.us/j/3620272381 (Meeting ID: 362 027 2381). \
        Phone: 1(669)900-6833. Questions: city.clerk@cityofpaloalto.org";

    #[test]
    fn test_extracts_all_fields_from_hybrid_page() {
        let info = extract_participation(HYBRID_PAGE);
        assert_eq!(info.email.as_deref(), Some("city.clerk@cityofpaloalto.org"));
        assert_eq!(info.phone.as_deref(), Some("+16699006833"));
        assert_eq!(
            info.virtual_url.as_deref(),
            Some("https://cityofpaloalto.zoom.us/j/3620272381")
        );
        assert_eq!(info.meeting_id.as_deref(), Some("362 027 2381"));
        assert!(info.is_hybrid);
        assert!(!info.is_virtual_only);
    }

    #[test]
    fn test_virtual_only_without_hybrid_keywords() {
        let info = extract_participation(
            "Join the meeting at https://teams.microsoft.com/l/meetup-join/abc123",
        );
        assert!(info.is_virtual_only);
        assert!(!info.is_hybrid);
    }

    #[test]
    fn test_placeholder_emails_skipped() {
        let info = extract_participation(
            "Contact noreply@cityportal.gov or clerk@springfield.gov for details",
        );
        assert_eq!(info.email.as_deref(), Some("clerk@springfield.gov"));
    }

    #[test]
    fn test_zoom_meeting_id_not_mistaken_for_phone() {
        // No "Phone:" label and not in 1(nnn) form, so it must not become a phone.
        let info = extract_participation("Zoom Meeting ID: 862 1234 5678");
        assert_eq!(info.phone, None);
        assert_eq!(info.meeting_id.as_deref(), Some("862 1234 5678"));
    }

    #[test]
    fn test_ten_digit_phone_normalized() {
        let info = extract_participation("Phone: (650) 329-2571");
        assert_eq!(info.phone.as_deref(), Some("+16503292571"));
    }

    #[test]
    fn test_url_stops_at_closing_paren() {
        let info =
            extract_participation("(see https://cityofpaloalto.zoom.us/j/99) for details");
        assert_eq!(
            info.virtual_url.as_deref(),
            Some("https://cityofpaloalto.zoom.us/j/99")
        );
    }

    #[test]
    fn test_plain_page_has_empty_info() {
        let info = extract_participation("The council will convene in chambers.");
        assert!(info.is_empty());
    }
}
