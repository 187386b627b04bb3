//! Vendor adapters: one per civic-software vendor, all reconciled into the
//! normalized meeting/item/attachment model.
//!
//! Adapters are stateless and safe to call concurrently across cities; the
//! shared [`RateLimiter`](crate::rate_limit::RateLimiter) serializes
//! outbound traffic per vendor. Structural selectors and URL templates are
//! isolated inside each vendor's file so upstream HTML changes break in
//! one place.

use std::sync::Arc;
use std::sync::OnceLock;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use regex::Regex;

use crate::db::{City, MeetingRow};
use crate::error::AdapterError;
use crate::fetch::HttpFetcher;
use crate::rate_limit::RateLimiter;
use crate::types::{AgendaDetail, NormalizedMeeting, Vendor};

pub mod attachments;
pub mod civicclerk;
pub mod civicplus;
pub mod granicus;
pub mod legistar;
pub mod novusagenda;
pub mod participation;
pub mod primegov;

pub use attachments::filter_version_attachments;

/// The common capability every vendor adapter implements.
#[async_trait]
pub trait VendorAdapter: Send + Sync {
    fn vendor(&self) -> Vendor;

    fn slug(&self) -> &str;

    /// Upcoming meetings in deterministic order: start ascending, then
    /// vendor meeting id.
    async fn upcoming_meetings(&self) -> Result<Vec<NormalizedMeeting>, AdapterError>;

    /// Item-level agenda detail for an agenda-mode meeting. `None` for
    /// monolithic-packet vendors and meetings.
    async fn fetch_agenda(
        &self,
        meeting: &MeetingRow,
    ) -> Result<Option<AgendaDetail>, AdapterError>;
}

/// Handles threaded through every adapter: the shared HTTP client and the
/// process-wide vendor rate limiter.
#[derive(Clone)]
pub struct AdapterContext {
    pub fetcher: Arc<HttpFetcher>,
    pub limiter: Arc<RateLimiter>,
}

/// Build the adapter for a city's vendor. Rejects blank slugs. The token
/// only applies to Legistar clients that require one.
pub fn make_adapter(
    city: &City,
    ctx: AdapterContext,
    legistar_token: Option<String>,
) -> Result<Box<dyn VendorAdapter>, AdapterError> {
    if city.slug.trim().is_empty() {
        return Err(AdapterError::blank_slug(city.vendor));
    }
    let slug = city.slug.clone();
    Ok(match city.vendor {
        Vendor::PrimeGov => Box::new(primegov::PrimeGovAdapter::new(slug, ctx)?),
        Vendor::CivicClerk => Box::new(civicclerk::CivicClerkAdapter::new(slug, ctx)?),
        Vendor::Legistar => Box::new(legistar::LegistarAdapter::new(slug, ctx, legistar_token)?),
        Vendor::Granicus => Box::new(granicus::GranicusAdapter::new(slug, ctx)?),
        Vendor::CivicPlus => Box::new(civicplus::CivicPlusAdapter::new(slug, ctx)?),
        Vendor::NovusAgenda => Box::new(novusagenda::NovusAgendaAdapter::new(slug, ctx)?),
    })
}

/// Deterministic adapter output ordering: start ascending, ties by id.
pub(crate) fn sort_meetings(meetings: &mut [NormalizedMeeting]) {
    meetings.sort_by(|a, b| {
        a.start
            .cmp(&b.start)
            .then_with(|| a.vendor_meeting_id.cmp(&b.vendor_meeting_id))
    });
}

// ---------------------------------------------------------------------------
// Shared parsing helpers
// ---------------------------------------------------------------------------

fn re_long_date() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // "November 20, 2025" with optional "- 7:00 PM"
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(January|February|March|April|May|June|July|August|September|October|November|December)\s+(\d{1,2}),\s+(\d{4})(?:\s*[-–]?\s*(\d{1,2}):(\d{2})\s*(AM|PM))?").unwrap()
    })
}

/// Parse the timestamp formats vendors actually emit: RFC 3339, naive
/// ISO-8601 (with or without fractional seconds), bare dates.
pub(crate) fn parse_vendor_datetime(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?));
    }
    None
}

/// Pull a long-form date ("November 20, 2025 - 7:00 PM") out of listing
/// row text. Used by the HTML-scrape vendors.
pub(crate) fn parse_listed_date(text: &str) -> Option<DateTime<Utc>> {
    let caps = re_long_date().captures(text)?;
    let month = match caps[1].to_lowercase().as_str() {
        "january" => 1,
        "february" => 2,
        "march" => 3,
        "april" => 4,
        "may" => 5,
        "june" => 6,
        "july" => 7,
        "august" => 8,
        "september" => 9,
        "october" => 10,
        "november" => 11,
        "december" => 12,
        _ => return None,
    };
    let day: u32 = caps[2].parse().ok()?;
    let year: i32 = caps[3].parse().ok()?;

    let (mut hour, minute) = match (caps.get(4), caps.get(5)) {
        (Some(h), Some(m)) => (h.as_str().parse::<u32>().ok()?, m.as_str().parse().ok()?),
        _ => (0, 0),
    };
    if let Some(meridiem) = caps.get(6) {
        let meridiem = meridiem.as_str().to_uppercase();
        if meridiem == "PM" && hour != 12 {
            hour += 12;
        } else if meridiem == "AM" && hour == 12 {
            hour = 0;
        }
    }

    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    Some(Utc.from_utc_datetime(&date.and_hms_opt(hour, minute, 0)?))
}

/// Resolve a possibly-relative href against a base URL.
pub(crate) fn absolute_url(base: &str, href: &str) -> Option<String> {
    if href.starts_with("http://") || href.starts_with("https://") {
        return Some(href.to_string());
    }
    url::Url::parse(base)
        .ok()?
        .join(href)
        .ok()
        .map(|u| u.to_string())
}

/// Extract a single query parameter from a URL or bare query string.
pub(crate) fn query_param(url: &str, name: &str) -> Option<String> {
    let parsed = url::Url::parse(url)
        .or_else(|_| url::Url::parse(&format!("https://placeholder.invalid/{url}")))
        .ok()?;
    parsed
        .query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MeetingSource;
    use chrono::TimeZone;

    #[test]
    fn test_parse_vendor_datetime_formats() {
        let expected = Utc.with_ymd_and_hms(2025, 11, 20, 19, 0, 0).unwrap();
        assert_eq!(parse_vendor_datetime("2025-11-20T19:00:00Z"), Some(expected));
        assert_eq!(parse_vendor_datetime("2025-11-20T19:00:00"), Some(expected));
        assert_eq!(
            parse_vendor_datetime("2025-11-20T14:00:00-05:00"),
            Some(expected)
        );
        assert_eq!(
            parse_vendor_datetime("2025-11-20"),
            Some(Utc.with_ymd_and_hms(2025, 11, 20, 0, 0, 0).unwrap())
        );
        assert_eq!(parse_vendor_datetime(""), None);
        assert_eq!(parse_vendor_datetime("next Tuesday"), None);
    }

    #[test]
    fn test_parse_listed_date() {
        assert_eq!(
            parse_listed_date("City Council — November 20, 2025 - 7:00 PM"),
            Some(Utc.with_ymd_and_hms(2025, 11, 20, 19, 0, 0).unwrap())
        );
        assert_eq!(
            parse_listed_date("Planning Commission December 3, 2025"),
            Some(Utc.with_ymd_and_hms(2025, 12, 3, 0, 0, 0).unwrap())
        );
        assert_eq!(
            parse_listed_date("Special Meeting — March 1, 2026 - 12:30 PM"),
            Some(Utc.with_ymd_and_hms(2026, 3, 1, 12, 30, 0).unwrap())
        );
        assert_eq!(parse_listed_date("no date here"), None);
    }

    #[test]
    fn test_absolute_url() {
        assert_eq!(
            absolute_url("https://x.granicus.com/ViewPublisher.php?view_id=1", "AgendaViewer.php?view_id=1&event_id=9"),
            Some("https://x.granicus.com/AgendaViewer.php?view_id=1&event_id=9".to_string())
        );
        assert_eq!(
            absolute_url("https://x.example", "https://already.absolute/doc.pdf"),
            Some("https://already.absolute/doc.pdf".to_string())
        );
    }

    #[test]
    fn test_query_param() {
        assert_eq!(
            query_param("https://x/MetaViewer.php?view_id=1&meta_id=456", "meta_id"),
            Some("456".to_string())
        );
        assert_eq!(query_param("https://x/page", "missing"), None);
    }

    #[test]
    fn test_sort_meetings_orders_by_start_then_id() {
        let at = |h| Utc.with_ymd_and_hms(2025, 11, 20, h, 0, 0).unwrap();
        let mk = |id: &str, start| NormalizedMeeting {
            vendor_meeting_id: id.to_string(),
            title: "m".to_string(),
            start,
            source: MeetingSource::Packet("https://x/p.pdf".to_string()),
        };
        let mut meetings = vec![mk("b", at(9)), mk("a", at(9)), mk("c", at(7))];
        sort_meetings(&mut meetings);
        let ids: Vec<_> = meetings.iter().map(|m| m.vendor_meeting_id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }
}
