//! CivicClerk adapter.
//!
//! OData-style events API. The packet is the published file typed
//! `Agenda Packet`, streamed through `GetMeetingFileStream`. CivicClerk
//! never exposes an item-level agenda, so every meeting is monolithic and
//! meetings without a packet are skipped until one is published.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::{parse_vendor_datetime, sort_meetings, AdapterContext, VendorAdapter};
use crate::db::MeetingRow;
use crate::error::AdapterError;
use crate::fetch::TimeoutClass;
use crate::types::{AgendaDetail, MeetingSource, NormalizedMeeting, Vendor};

#[derive(Debug, Deserialize)]
struct ApiEnvelope {
    #[serde(default)]
    value: Vec<ApiEvent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiEvent {
    id: i64,
    #[serde(default)]
    event_name: String,
    #[serde(default)]
    start_date_time: String,
    #[serde(default)]
    published_files: Vec<ApiPublishedFile>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiPublishedFile {
    #[serde(default, rename = "type")]
    file_type: String,
    #[serde(default)]
    file_id: i64,
}

/// Query parameters for the upcoming-events call. The filter timestamp is
/// millisecond-precision UTC; reqwest percent-encodes the pairs on send.
pub(crate) fn upcoming_query(now: DateTime<Utc>) -> [(&'static str, String); 2] {
    let stamp = now.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string();
    [
        ("$filter", format!("startDateTime gt {stamp}")),
        ("$orderby", "startDateTime asc, eventName asc".to_string()),
    ]
}

pub struct CivicClerkAdapter {
    slug: String,
    base: String,
    ctx: AdapterContext,
}

impl CivicClerkAdapter {
    pub fn new(slug: String, ctx: AdapterContext) -> Result<Self, AdapterError> {
        if slug.trim().is_empty() {
            return Err(AdapterError::blank_slug(Vendor::CivicClerk));
        }
        let base = format!("https://{slug}.api.civicclerk.com");
        log::debug!("Initialized CivicClerk adapter for {slug}");
        Ok(Self { slug, base, ctx })
    }

    fn packet_url(&self, file: &ApiPublishedFile) -> String {
        format!(
            "{}/v1/Meetings/GetMeetingFileStream(fileId={},plainText=false)",
            self.base, file.file_id
        )
    }

    fn normalize(&self, events: Vec<ApiEvent>) -> Vec<NormalizedMeeting> {
        let mut normalized = Vec::with_capacity(events.len());
        for event in events {
            let packet = event
                .published_files
                .iter()
                .find(|file| file.file_type == "Agenda Packet");
            let Some(packet) = packet else {
                log::debug!(
                    "CivicClerk {}: event {} has no published packet yet, skipping",
                    self.slug,
                    event.id
                );
                continue;
            };
            let Some(start) = parse_vendor_datetime(&event.start_date_time) else {
                log::warn!(
                    "CivicClerk {}: event {} has unparseable startDateTime {:?}, skipping",
                    self.slug,
                    event.id,
                    event.start_date_time
                );
                continue;
            };

            normalized.push(NormalizedMeeting {
                vendor_meeting_id: event.id.to_string(),
                title: event.event_name,
                start,
                source: MeetingSource::Packet(self.packet_url(packet)),
            });
        }
        sort_meetings(&mut normalized);
        normalized
    }
}

#[async_trait]
impl VendorAdapter for CivicClerkAdapter {
    fn vendor(&self) -> Vendor {
        Vendor::CivicClerk
    }

    fn slug(&self) -> &str {
        &self.slug
    }

    async fn upcoming_meetings(&self) -> Result<Vec<NormalizedMeeting>, AdapterError> {
        self.ctx.limiter.wait(Vendor::CivicClerk).await;
        let url = format!("{}/v1/Events", self.base);
        let query = upcoming_query(Utc::now());
        let envelope: ApiEnvelope = self
            .ctx
            .fetcher
            .get_json(&url, &[(query[0].0, query[0].1.clone()), (query[1].0, query[1].1.clone())], TimeoutClass::Listing)
            .await
            .map_err(|e| AdapterError::new(Vendor::CivicClerk, &self.slug, "list meetings", e))?;
        log::info!(
            "Retrieved {} meetings from CivicClerk for {}",
            envelope.value.len(),
            self.slug
        );
        Ok(self.normalize(envelope.value))
    }

    async fn fetch_agenda(
        &self,
        _meeting: &MeetingRow,
    ) -> Result<Option<AgendaDetail>, AdapterError> {
        Ok(None)
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

    fn adapter(slug: &str) -> CivicClerkAdapter {
        let ctx = AdapterContext {
            fetcher: Arc::new(HttpFetcher::new().unwrap()),
            limiter: Arc::new(RateLimiter::new(RateLimitConfig::default())),
        };
        CivicClerkAdapter::new(slug.to_string(), ctx).unwrap()
    }

    #[test]
    fn test_upcoming_query_date_filter() {
        // Wall clock 2025-11-13T09:00:00.000Z, as Montpelier's portal sees it.
        let now = Utc.with_ymd_and_hms(2025, 11, 13, 9, 0, 0).unwrap();
        let query = upcoming_query(now);
        assert_eq!(query[0].0, "$filter");
        assert_eq!(query[0].1, "startDateTime gt 2025-11-13T09:00:00.000Z");
        assert_eq!(query[1].0, "$orderby");
        assert_eq!(query[1].1, "startDateTime asc, eventName asc");
    }

    #[test]
    fn test_packet_url_shape() {
        let envelope: ApiEnvelope = serde_json::from_str(
            r#"{"value": [{
                "id": 310,
                "eventName": "City Council",
                "startDateTime": "2025-11-19T18:30:00Z",
                "publishedFiles": [
                    {"type": "Agenda", "fileId": 8},
                    {"type": "Agenda Packet", "fileId": 9}
                ]
            }]}"#,
        )
        .unwrap();

        let meetings = adapter("montpeliervt").normalize(envelope.value);
        assert_eq!(meetings.len(), 1);
        assert_eq!(
            meetings[0].source.packet_url(),
            Some(
                "https://montpeliervt.api.civicclerk.com/v1/Meetings/GetMeetingFileStream(fileId=9,plainText=false)"
            )
        );
    }

    #[test]
    fn test_events_without_packet_are_skipped() {
        let envelope: ApiEnvelope = serde_json::from_str(
            r#"{"value": [
                {"id": 1, "eventName": "A", "startDateTime": "2025-11-19T18:30:00Z",
                 "publishedFiles": [{"type": "Agenda", "fileId": 3}]},
                {"id": 2, "eventName": "B", "startDateTime": "2025-11-20T18:30:00Z",
                 "publishedFiles": [{"type": "Agenda Packet", "fileId": 4}]}
            ]}"#,
        )
        .unwrap();

        let meetings = adapter("montpeliervt").normalize(envelope.value);
        assert_eq!(meetings.len(), 1);
        assert_eq!(meetings[0].vendor_meeting_id, "2");
    }

    #[test]
    fn test_ordering_is_start_then_id() {
        let envelope: ApiEnvelope = serde_json::from_str(
            r#"{"value": [
                {"id": 9, "eventName": "Later", "startDateTime": "2025-11-21T18:00:00Z",
                 "publishedFiles": [{"type": "Agenda Packet", "fileId": 1}]},
                {"id": 5, "eventName": "Earlier", "startDateTime": "2025-11-19T18:00:00Z",
                 "publishedFiles": [{"type": "Agenda Packet", "fileId": 2}]}
            ]}"#,
        )
        .unwrap();

        let meetings = adapter("montpeliervt").normalize(envelope.value);
        assert_eq!(meetings[0].vendor_meeting_id, "5");
        assert_eq!(meetings[1].vendor_meeting_id, "9");
    }
}
