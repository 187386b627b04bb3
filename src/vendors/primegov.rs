//! PrimeGov adapter.
//!
//! Listing comes from the public portal API; the packet is the first
//! document whose template name contains `Packet`. Cities that publish an
//! item-level portal page (`/Portal/Meeting/{id}`) get agenda mode: each
//! `<div class="agenda-item">` is an item, its attachments live in the
//! companion `#agenda_item_area_{n}` div behind `historyattachment` links.

use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use scraper::{Html, Selector};
use serde::Deserialize;

use super::{
    absolute_url, parse_vendor_datetime, sort_meetings, AdapterContext, VendorAdapter,
};
use crate::db::MeetingRow;
use crate::error::AdapterError;
use crate::fetch::TimeoutClass;
use crate::types::{
    AgendaDetail, AgendaItem, AttachmentRef, MeetingSource, NormalizedMeeting, Vendor,
};
use crate::vendors::participation::extract_participation;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiMeeting {
    id: i64,
    #[serde(default)]
    title: String,
    #[serde(default)]
    date_time: String,
    #[serde(default)]
    document_list: Vec<ApiDocument>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiDocument {
    #[serde(default)]
    template_name: String,
    #[serde(default)]
    template_id: i64,
    #[serde(default)]
    compile_output_type: i64,
}

pub struct PrimeGovAdapter {
    slug: String,
    base: String,
    ctx: AdapterContext,
}

impl PrimeGovAdapter {
    pub fn new(slug: String, ctx: AdapterContext) -> Result<Self, AdapterError> {
        if slug.trim().is_empty() {
            return Err(AdapterError::blank_slug(Vendor::PrimeGov));
        }
        let base = format!("https://{slug}.primegov.com");
        log::debug!("Initialized PrimeGov adapter for {slug}");
        Ok(Self { slug, base, ctx })
    }

    fn packet_url(&self, doc: &ApiDocument) -> String {
        format!(
            "{}/Public/CompiledDocument?meetingTemplateId={}&compileOutputType={}",
            self.base, doc.template_id, doc.compile_output_type
        )
    }

    fn portal_url(&self, meeting_id: i64) -> String {
        format!("{}/Portal/Meeting/{meeting_id}", self.base)
    }

    fn normalize(&self, meetings: Vec<ApiMeeting>) -> Vec<NormalizedMeeting> {
        let mut normalized = Vec::with_capacity(meetings.len());
        for mtg in meetings {
            let Some(start) = parse_vendor_datetime(&mtg.date_time) else {
                log::warn!(
                    "PrimeGov {}: meeting {} has unparseable dateTime {:?}, skipping",
                    self.slug,
                    mtg.id,
                    mtg.date_time
                );
                continue;
            };

            let packet = mtg
                .document_list
                .iter()
                .find(|doc| doc.template_name.contains("Packet"));
            let source = match packet {
                Some(doc) => MeetingSource::Packet(self.packet_url(doc)),
                // No compiled packet: this city publishes item-level agendas.
                None => MeetingSource::Agenda(self.portal_url(mtg.id)),
            };

            normalized.push(NormalizedMeeting {
                vendor_meeting_id: mtg.id.to_string(),
                title: mtg.title,
                start,
                source,
            });
        }
        sort_meetings(&mut normalized);
        normalized
    }
}

#[async_trait]
impl VendorAdapter for PrimeGovAdapter {
    fn vendor(&self) -> Vendor {
        Vendor::PrimeGov
    }

    fn slug(&self) -> &str {
        &self.slug
    }

    async fn upcoming_meetings(&self) -> Result<Vec<NormalizedMeeting>, AdapterError> {
        self.ctx.limiter.wait(Vendor::PrimeGov).await;
        let url = format!("{}/api/v2/PublicPortal/ListUpcomingMeetings", self.base);
        let meetings: Vec<ApiMeeting> = self
            .ctx
            .fetcher
            .get_json(&url, &[], TimeoutClass::Listing)
            .await
            .map_err(|e| AdapterError::new(Vendor::PrimeGov, &self.slug, "list meetings", e))?;
        log::info!(
            "Retrieved {} meetings from PrimeGov for {}",
            meetings.len(),
            self.slug
        );
        Ok(self.normalize(meetings))
    }

    async fn fetch_agenda(
        &self,
        meeting: &MeetingRow,
    ) -> Result<Option<AgendaDetail>, AdapterError> {
        let Some(agenda_url) = meeting.agenda_url.as_deref() else {
            return Ok(None);
        };

        self.ctx.limiter.wait(Vendor::PrimeGov).await;
        let html = self
            .ctx
            .fetcher
            .get_text(agenda_url, TimeoutClass::Listing)
            .await
            .map_err(|e| AdapterError::new(Vendor::PrimeGov, &self.slug, "fetch agenda", e))?;

        let detail = parse_agenda_html(&html, &self.base);
        log::info!(
            "PrimeGov {}: parsed {} agenda items from {}",
            self.slug,
            detail.items.len(),
            agenda_url
        );
        Ok(Some(detail))
    }
}

// ---------------------------------------------------------------------------
// Portal page selectors
// ---------------------------------------------------------------------------

fn sel_agenda_item() -> &'static Selector {
    static SEL: OnceLock<Selector> = OnceLock::new();
    SEL.get_or_init(|| Selector::parse("div.agenda-item").unwrap())
}

fn sel_links() -> &'static Selector {
    static SEL: OnceLock<Selector> = OnceLock::new();
    SEL.get_or_init(|| Selector::parse("a[href]").unwrap())
}

fn re_history_id() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)historyId=([a-f0-9-]+)").unwrap())
}

fn collapse_text(parts: impl Iterator<Item = impl AsRef<str>>) -> String {
    let joined = parts.map(|p| p.as_ref().to_string()).collect::<Vec<_>>().join(" ");
    joined.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Parse a `/Portal/Meeting/{id}` page into items + participation info.
pub(crate) fn parse_agenda_html(html: &str, base: &str) -> AgendaDetail {
    let document = Html::parse_document(html);

    let page_text = collapse_text(document.root_element().text());
    let participation = extract_participation(&page_text);

    let mut items = Vec::new();
    for (index, item_div) in document.select(sel_agenda_item()).enumerate() {
        let sequence = (index + 1) as u32;
        let Some(full_id) = item_div.value().attr("id") else {
            log::warn!("Agenda item {sequence} has no id attribute, skipping");
            continue;
        };
        let vendor_item_id = full_id.trim_start_matches("AgendaItem_").to_string();
        let title = collapse_text(item_div.text());

        // Attachments live in the companion contents div.
        let contents_selector = format!("div#agenda_item_area_{vendor_item_id}");
        let attachments = match Selector::parse(&contents_selector) {
            Ok(selector) => document
                .select(&selector)
                .next()
                .map(|contents| extract_attachments(&contents, base))
                .unwrap_or_default(),
            Err(_) => Vec::new(),
        };

        items.push(AgendaItem {
            vendor_item_id,
            title,
            sequence,
            matter_number: None,
            attachments,
        });
    }

    AgendaDetail {
        items,
        participation: (!participation.is_empty()).then_some(participation),
    }
}

fn extract_attachments(contents: &scraper::ElementRef<'_>, base: &str) -> Vec<AttachmentRef> {
    let mut attachments = Vec::new();
    for link in contents.select(sel_links()) {
        let Some(href) = link.value().attr("href") else {
            continue;
        };
        if !href.to_lowercase().contains("historyattachment") {
            continue;
        }
        let Some(history_id) = re_history_id()
            .captures(href)
            .map(|caps| caps[1].to_string())
        else {
            continue;
        };

        let mut name = collapse_text(link.text());
        if name.is_empty() {
            name = format!("Attachment {}", attachments.len() + 1);
        }
        let url = absolute_url(base, href).unwrap_or_else(|| href.to_string());
        attachments.push(AttachmentRef {
            name,
            url,
            metadata: serde_json::json!({ "vendor": "primegov", "historyId": history_id }),
        });
    }
    attachments
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RateLimitConfig;
    use crate::fetch::HttpFetcher;
    use crate::rate_limit::RateLimiter;
    use std::sync::Arc;

    fn adapter(slug: &str) -> PrimeGovAdapter {
        let ctx = AdapterContext {
            fetcher: Arc::new(HttpFetcher::new().unwrap()),
            limiter: Arc::new(RateLimiter::new(RateLimitConfig::default())),
        };
        PrimeGovAdapter::new(slug.to_string(), ctx).unwrap()
    }

    #[test]
    fn test_blank_slug_rejected() {
        let ctx = AdapterContext {
            fetcher: Arc::new(HttpFetcher::new().unwrap()),
            limiter: Arc::new(RateLimiter::new(RateLimitConfig::default())),
        };
        assert!(PrimeGovAdapter::new("  ".to_string(), ctx).is_err());
    }

    #[test]
    fn test_packet_meeting_normalization() {
        // Mirrors Palo Alto's portal: one council meeting with a compiled
        // packet document.
        let listing: Vec<ApiMeeting> = serde_json::from_str(
            r#"[{
                "id": 42,
                "title": "City Council",
                "dateTime": "2025-11-20T19:00:00Z",
                "documentList": [
                    {"templateName": "Agenda", "templateId": 41, "compileOutputType": 1},
                    {"templateName": "Agenda Packet", "templateId": 42, "compileOutputType": 1}
                ]
            }]"#,
        )
        .unwrap();

        let meetings = adapter("cityofpaloalto").normalize(listing);
        assert_eq!(meetings.len(), 1);
        let meeting = &meetings[0];
        assert_eq!(meeting.vendor_meeting_id, "42");
        assert_eq!(meeting.title, "City Council");
        assert_eq!(
            meeting.source.packet_url(),
            Some(
                "https://cityofpaloalto.primegov.com/Public/CompiledDocument?meetingTemplateId=42&compileOutputType=1"
            )
        );
        assert_eq!(meeting.source.agenda_url(), None);
    }

    #[test]
    fn test_packetless_meeting_switches_to_agenda_mode() {
        let listing: Vec<ApiMeeting> = serde_json::from_str(
            r#"[{"id": 7, "title": "Planning", "dateTime": "2025-11-21T18:00:00Z", "documentList": []}]"#,
        )
        .unwrap();

        let meetings = adapter("cityofpaloalto").normalize(listing);
        assert_eq!(
            meetings[0].source.agenda_url(),
            Some("https://cityofpaloalto.primegov.com/Portal/Meeting/7")
        );
    }

    #[test]
    fn test_unparseable_date_skipped() {
        let listing: Vec<ApiMeeting> = serde_json::from_str(
            r#"[{"id": 8, "title": "Council", "dateTime": "TBD", "documentList": []}]"#,
        )
        .unwrap();
        assert!(adapter("cityofpaloalto").normalize(listing).is_empty());
    }

    const PORTAL_HTML: &str = r##"
        <html><body>
        <div class="header">
          Join via Zoom: https://cityofpaloalto.zoom.us/j/3620272381
          Phone: 1(669)900-6833 or attend in person or online.
        </div>
        <div class="agenda-item" id="AgendaItem_12345">1. Approval of Minutes</div>
        <div id="agenda_item_area_12345">
          <a href="/api/v2/PublicPortal/HistoryAttachment?historyId=ab12-cd34">Draft Minutes</a>
          <a href="/some/other/link">Not an attachment</a>
        </div>
        <div class="agenda-item" id="AgendaItem_12346">2. Budget Update</div>
        <div id="agenda_item_area_12346">
          <a href="/api/v2/PublicPortal/HistoryAttachment?historyId=ef56-aa77"></a>
        </div>
        <div class="agenda-item">3. No id, skipped</div>
        </body></html>"##;

    #[test]
    fn test_parse_agenda_html_items_and_attachments() {
        let detail = parse_agenda_html(PORTAL_HTML, "https://cityofpaloalto.primegov.com");
        assert_eq!(detail.items.len(), 2);

        let first = &detail.items[0];
        assert_eq!(first.vendor_item_id, "12345");
        assert_eq!(first.sequence, 1);
        assert_eq!(first.title, "1. Approval of Minutes");
        assert_eq!(first.attachments.len(), 1);
        assert_eq!(first.attachments[0].name, "Draft Minutes");
        assert_eq!(
            first.attachments[0].url,
            "https://cityofpaloalto.primegov.com/api/v2/PublicPortal/HistoryAttachment?historyId=ab12-cd34"
        );
        assert_eq!(
            first.attachments[0].metadata["historyId"],
            serde_json::json!("ab12-cd34")
        );

        // Nameless link falls back to a positional name
        let second = &detail.items[1];
        assert_eq!(second.attachments[0].name, "Attachment 1");
    }

    #[test]
    fn test_parse_agenda_html_participation() {
        let detail = parse_agenda_html(PORTAL_HTML, "https://cityofpaloalto.primegov.com");
        let participation = detail.participation.expect("participation parsed");
        assert_eq!(participation.phone.as_deref(), Some("+16699006833"));
        assert!(participation.is_hybrid);
    }
}
