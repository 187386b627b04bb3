//! Legistar Web API adapter.
//!
//! OData events endpoint with a 30-day date-range filter. Meetings with a
//! compiled `EventAgendaFile` are monolithic packets; the rest are
//! item-based, with items from `/events/{id}/eventitems` and attachments
//! from `/matters/{id}/attachments`. Legislative-version duplicates
//! (`Leg Ver1`, `Leg Ver2`) are deduped to the highest version. Some
//! clients require an API token, passed as the `token` query parameter.

use std::sync::OnceLock;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveTime, Utc};
use regex::Regex;
use serde::Deserialize;

use super::{parse_vendor_datetime, sort_meetings, AdapterContext, VendorAdapter};
use crate::db::MeetingRow;
use crate::error::AdapterError;
use crate::fetch::TimeoutClass;
use crate::types::{
    AgendaDetail, AgendaItem, AttachmentRef, MeetingSource, NormalizedMeeting, Vendor,
};
use crate::vendors::attachments::filter_version_attachments;

const API_BASE: &str = "https://webapi.legistar.com/v1";

/// How far ahead the events filter looks.
const LOOKAHEAD_DAYS: i64 = 30;

/// Page size for the events listing.
const EVENTS_TOP: &str = "50";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ApiEvent {
    event_id: i64,
    #[serde(default)]
    event_date: Option<String>,
    #[serde(default)]
    event_time: Option<String>,
    #[serde(default)]
    event_body_name: Option<String>,
    #[serde(default)]
    event_agenda_file: Option<String>,
    #[serde(default, rename = "EventInSiteURL")]
    event_in_site_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ApiEventItem {
    event_item_id: i64,
    #[serde(default)]
    event_item_title: Option<String>,
    #[serde(default)]
    event_item_agenda_sequence: Option<u32>,
    #[serde(default)]
    event_item_matter_id: Option<i64>,
    #[serde(default)]
    event_item_matter_file: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ApiMatterAttachment {
    #[serde(default)]
    matter_attachment_name: Option<String>,
    #[serde(default)]
    matter_attachment_hyperlink: Option<String>,
}

fn re_event_time() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)(\d{1,2}):(\d{2})\s*(AM|PM)").unwrap())
}

/// Query parameters for the events listing: a dated OData range filter.
pub(crate) fn upcoming_query(now: DateTime<Utc>) -> Vec<(&'static str, String)> {
    let start = now.format("%Y-%m-%d").to_string();
    let end = (now + Duration::days(LOOKAHEAD_DAYS)).format("%Y-%m-%d").to_string();
    vec![
        (
            "$filter",
            format!("EventDate ge datetime'{start}' and EventDate lt datetime'{end}'"),
        ),
        ("$orderby", "EventDate asc".to_string()),
        ("$top", EVENTS_TOP.to_string()),
    ]
}

/// Combine Legistar's midnight `EventDate` with its separate `EventTime`.
fn event_start(event_date: Option<&str>, event_time: Option<&str>) -> Option<DateTime<Utc>> {
    let date = parse_vendor_datetime(event_date?)?;
    let Some(time_raw) = event_time else {
        return Some(date);
    };
    let Some(caps) = re_event_time().captures(time_raw) else {
        return Some(date);
    };

    let mut hour: u32 = caps[1].parse().ok()?;
    let minute: u32 = caps[2].parse().ok()?;
    let meridiem = caps[3].to_uppercase();
    if meridiem == "PM" && hour != 12 {
        hour += 12;
    } else if meridiem == "AM" && hour == 12 {
        hour = 0;
    }
    let time = NaiveTime::from_hms_opt(hour, minute, 0)?;
    Some(DateTime::from_naive_utc_and_offset(date.date_naive().and_time(time), Utc))
}

pub struct LegistarAdapter {
    slug: String,
    ctx: AdapterContext,
    token: Option<String>,
}

impl LegistarAdapter {
    pub fn new(
        slug: String,
        ctx: AdapterContext,
        token: Option<String>,
    ) -> Result<Self, AdapterError> {
        if slug.trim().is_empty() {
            return Err(AdapterError::blank_slug(Vendor::Legistar));
        }
        log::debug!("Initialized Legistar adapter for {slug}");
        Ok(Self { slug, ctx, token })
    }

    fn with_token<'a>(&self, mut query: Vec<(&'a str, String)>) -> Vec<(&'a str, String)> {
        if let Some(token) = &self.token {
            query.push(("token", token.clone()));
        }
        query
    }

    fn normalize(&self, events: Vec<ApiEvent>) -> Vec<NormalizedMeeting> {
        let mut normalized = Vec::with_capacity(events.len());
        for event in events {
            let Some(start) = event_start(event.event_date.as_deref(), event.event_time.as_deref())
            else {
                log::warn!(
                    "Legistar {}: event {} has unparseable EventDate, skipping",
                    self.slug,
                    event.event_id
                );
                continue;
            };

            let packet = event
                .event_agenda_file
                .as_deref()
                .filter(|url| !url.trim().is_empty());
            let source = match packet {
                Some(url) => MeetingSource::Packet(url.to_string()),
                None => {
                    let Some(insite) = event
                        .event_in_site_url
                        .as_deref()
                        .filter(|url| !url.trim().is_empty())
                    else {
                        log::debug!(
                            "Legistar {}: event {} has neither packet nor InSite page, skipping",
                            self.slug,
                            event.event_id
                        );
                        continue;
                    };
                    MeetingSource::Agenda(insite.to_string())
                }
            };

            normalized.push(NormalizedMeeting {
                vendor_meeting_id: event.event_id.to_string(),
                title: event.event_body_name.unwrap_or_default(),
                start,
                source,
            });
        }
        sort_meetings(&mut normalized);
        normalized
    }

    async fn fetch_matter_attachments(
        &self,
        matter_id: i64,
    ) -> Result<Vec<AttachmentRef>, AdapterError> {
        self.ctx.limiter.wait(Vendor::Legistar).await;
        let url = format!("{API_BASE}/{}/matters/{matter_id}/attachments", self.slug);
        let raw: Vec<ApiMatterAttachment> = self
            .ctx
            .fetcher
            .get_json(&url, &self.with_token(Vec::new()), TimeoutClass::Listing)
            .await
            .map_err(|e| AdapterError::new(Vendor::Legistar, &self.slug, "fetch attachments", e))?;

        let attachments = raw
            .into_iter()
            .filter_map(|att| {
                let url = att.matter_attachment_hyperlink?;
                Some(AttachmentRef {
                    name: att.matter_attachment_name.unwrap_or_default(),
                    url,
                    metadata: serde_json::json!({ "vendor": "legistar", "matterId": matter_id }),
                })
            })
            .collect();
        Ok(filter_version_attachments(attachments, None))
    }
}

#[async_trait]
impl VendorAdapter for LegistarAdapter {
    fn vendor(&self) -> Vendor {
        Vendor::Legistar
    }

    fn slug(&self) -> &str {
        &self.slug
    }

    async fn upcoming_meetings(&self) -> Result<Vec<NormalizedMeeting>, AdapterError> {
        self.ctx.limiter.wait(Vendor::Legistar).await;
        let url = format!("{API_BASE}/{}/events", self.slug);
        let query = self.with_token(upcoming_query(Utc::now()));
        let events: Vec<ApiEvent> = self
            .ctx
            .fetcher
            .get_json(&url, &query, TimeoutClass::Listing)
            .await
            .map_err(|e| AdapterError::new(Vendor::Legistar, &self.slug, "list meetings", e))?;
        log::info!(
            "Retrieved {} meetings from Legistar for {}",
            events.len(),
            self.slug
        );
        Ok(self.normalize(events))
    }

    async fn fetch_agenda(
        &self,
        meeting: &MeetingRow,
    ) -> Result<Option<AgendaDetail>, AdapterError> {
        if meeting.agenda_url.is_none() {
            return Ok(None);
        }

        self.ctx.limiter.wait(Vendor::Legistar).await;
        let url = format!(
            "{API_BASE}/{}/events/{}/eventitems",
            self.slug, meeting.vendor_meeting_id
        );
        let raw_items: Vec<ApiEventItem> = self
            .ctx
            .fetcher
            .get_json(&url, &self.with_token(Vec::new()), TimeoutClass::Listing)
            .await
            .map_err(|e| AdapterError::new(Vendor::Legistar, &self.slug, "fetch agenda", e))?;

        let mut items = Vec::with_capacity(raw_items.len());
        for (index, raw) in raw_items.into_iter().enumerate() {
            let attachments = match raw.event_item_matter_id {
                Some(matter_id) => self.fetch_matter_attachments(matter_id).await?,
                None => Vec::new(),
            };
            items.push(AgendaItem {
                vendor_item_id: raw.event_item_id.to_string(),
                title: raw.event_item_title.unwrap_or_default(),
                sequence: raw.event_item_agenda_sequence.unwrap_or((index + 1) as u32),
                matter_number: raw
                    .event_item_matter_file
                    .filter(|number| !number.trim().is_empty()),
                attachments,
            });
        }

        log::info!(
            "Legistar {}: fetched {} agenda items for event {}",
            self.slug,
            items.len(),
            meeting.vendor_meeting_id
        );
        Ok(Some(AgendaDetail {
            items,
            participation: None,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RateLimitConfig;
    use crate::fetch::HttpFetcher;
    use crate::rate_limit::RateLimiter;
    use chrono::TimeZone;
    use std::sync::Arc;

    fn adapter(token: Option<&str>) -> LegistarAdapter {
        let ctx = AdapterContext {
            fetcher: Arc::new(HttpFetcher::new().unwrap()),
            limiter: Arc::new(RateLimiter::new(RateLimitConfig::default())),
        };
        LegistarAdapter::new("cambridge".to_string(), ctx, token.map(String::from)).unwrap()
    }

    #[test]
    fn test_upcoming_query_date_range() {
        let now = Utc.with_ymd_and_hms(2025, 11, 13, 9, 0, 0).unwrap();
        let query = upcoming_query(now);
        assert_eq!(
            query[0],
            (
                "$filter",
                "EventDate ge datetime'2025-11-13' and EventDate lt datetime'2025-12-13'"
                    .to_string()
            )
        );
        assert_eq!(query[1], ("$orderby", "EventDate asc".to_string()));
    }

    #[test]
    fn test_token_appended_when_configured() {
        let query = adapter(Some("sekrit")).with_token(upcoming_query(Utc::now()));
        assert_eq!(query.last().unwrap(), &("token", "sekrit".to_string()));

        let query = adapter(None).with_token(upcoming_query(Utc::now()));
        assert!(query.iter().all(|(k, _)| *k != "token"));
    }

    #[test]
    fn test_event_start_combines_date_and_time() {
        let start = event_start(Some("2025-11-20T00:00:00"), Some("7:00 PM")).unwrap();
        assert_eq!(start, Utc.with_ymd_and_hms(2025, 11, 20, 19, 0, 0).unwrap());

        // Missing or unparseable time falls back to the date
        let start = event_start(Some("2025-11-20T00:00:00"), None).unwrap();
        assert_eq!(start, Utc.with_ymd_and_hms(2025, 11, 20, 0, 0, 0).unwrap());

        assert!(event_start(None, Some("7:00 PM")).is_none());
    }

    #[test]
    fn test_event_start_noon_and_midnight() {
        let noon = event_start(Some("2025-11-20T00:00:00"), Some("12:00 PM")).unwrap();
        assert_eq!(noon, Utc.with_ymd_and_hms(2025, 11, 20, 12, 0, 0).unwrap());
        let midnight = event_start(Some("2025-11-20T00:00:00"), Some("12:00 AM")).unwrap();
        assert_eq!(midnight, Utc.with_ymd_and_hms(2025, 11, 20, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_normalize_prefers_packet_over_insite() {
        let events: Vec<ApiEvent> = serde_json::from_str(
            r#"[
                {"EventId": 900, "EventDate": "2025-11-20T00:00:00", "EventTime": "7:00 PM",
                 "EventBodyName": "City Council",
                 "EventAgendaFile": "https://legistar2.granicus.com/cambridge/agenda.pdf",
                 "EventInSiteURL": "https://cambridge.legistar.com/MeetingDetail.aspx?ID=900"},
                {"EventId": 901, "EventDate": "2025-11-21T00:00:00",
                 "EventBodyName": "Ordinance Committee",
                 "EventInSiteURL": "https://cambridge.legistar.com/MeetingDetail.aspx?ID=901"},
                {"EventId": 902, "EventDate": "2025-11-22T00:00:00",
                 "EventBodyName": "No sources at all"}
            ]"#,
        )
        .unwrap();

        let meetings = adapter(None).normalize(events);
        assert_eq!(meetings.len(), 2);
        assert!(meetings[0].source.packet_url().is_some());
        assert_eq!(
            meetings[1].source.agenda_url(),
            Some("https://cambridge.legistar.com/MeetingDetail.aspx?ID=901")
        );
    }

    #[test]
    fn test_event_item_parsing() {
        let items: Vec<ApiEventItem> = serde_json::from_str(
            r#"[{"EventItemId": 77, "EventItemTitle": "Zoning petition",
                 "EventItemAgendaSequence": 3, "EventItemMatterId": 123,
                 "EventItemMatterFile": "O2025-0019668"}]"#,
        )
        .unwrap();
        assert_eq!(items[0].event_item_id, 77);
        assert_eq!(items[0].event_item_matter_file.as_deref(), Some("O2025-0019668"));
    }
}
