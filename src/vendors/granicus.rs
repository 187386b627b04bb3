//! Granicus adapter.
//!
//! No public API here; the per-city ViewPublisher listing page is scraped.
//! Agenda links pointing at `AgendaViewer.php` mean item mode; direct PDF
//! links (often redirecting to the `granicus_production_attachments` S3
//! bucket) mean a monolithic packet. In item mode, attachments route
//! through `MetaViewer.php`.

use std::sync::OnceLock;

use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};

use super::{
    absolute_url, parse_listed_date, query_param, sort_meetings, AdapterContext, VendorAdapter,
};
use crate::db::MeetingRow;
use crate::error::AdapterError;
use crate::fetch::TimeoutClass;
use crate::types::{
    AgendaDetail, AgendaItem, AttachmentRef, MeetingSource, NormalizedMeeting, Vendor,
};

fn sel_rows() -> &'static Selector {
    static SEL: OnceLock<Selector> = OnceLock::new();
    SEL.get_or_init(|| Selector::parse("tr").unwrap())
}

fn sel_links() -> &'static Selector {
    static SEL: OnceLock<Selector> = OnceLock::new();
    SEL.get_or_init(|| Selector::parse("a[href]").unwrap())
}

fn row_text(row: &ElementRef<'_>) -> String {
    row.text().collect::<Vec<_>>().join(" ").split_whitespace().collect::<Vec<_>>().join(" ")
}

pub struct GranicusAdapter {
    slug: String,
    base: String,
    ctx: AdapterContext,
}

impl GranicusAdapter {
    pub fn new(slug: String, ctx: AdapterContext) -> Result<Self, AdapterError> {
        if slug.trim().is_empty() {
            return Err(AdapterError::blank_slug(Vendor::Granicus));
        }
        let base = format!("https://{slug}.granicus.com");
        log::debug!("Initialized Granicus adapter for {slug}");
        Ok(Self { slug, base, ctx })
    }

    fn list_url(&self) -> String {
        format!("{}/ViewPublisher.php?view_id=1", self.base)
    }

    fn parse_listing(&self, html: &str) -> Vec<NormalizedMeeting> {
        let document = Html::parse_document(html);
        let mut meetings = Vec::new();

        for row in document.select(sel_rows()) {
            let text = row_text(&row);
            let Some(start) = parse_listed_date(&text) else {
                continue;
            };

            let mut agenda_link: Option<String> = None;
            let mut packet_link: Option<String> = None;
            for link in row.select(sel_links()) {
                let Some(href) = link.value().attr("href") else {
                    continue;
                };
                let lower = href.to_lowercase();
                if lower.contains("agendaviewer.php") {
                    agenda_link = absolute_url(&self.base, href);
                } else if lower.ends_with(".pdf") || lower.contains("generatedagendaviewer") {
                    packet_link = absolute_url(&self.base, href);
                }
            }

            // Item-level agenda wins when the city publishes both.
            let source = match (agenda_link, packet_link) {
                (Some(url), _) => MeetingSource::Agenda(url),
                (None, Some(url)) => MeetingSource::Packet(url),
                (None, None) => continue,
            };

            let Some(vendor_meeting_id) = meeting_id_from_url(source.url()) else {
                log::warn!(
                    "Granicus {}: no stable id in {}, skipping row",
                    self.slug,
                    source.url()
                );
                continue;
            };

            // Row text minus the trailing link labels is the meeting title.
            let title = text
                .split(" Agenda")
                .next()
                .unwrap_or(&text)
                .trim()
                .to_string();

            meetings.push(NormalizedMeeting {
                vendor_meeting_id,
                title,
                start,
                source,
            });
        }

        sort_meetings(&mut meetings);
        meetings
    }
}

/// A stable vendor meeting id for a listing link: the `event_id` /
/// `clip_id` query parameter, or the final path segment for bare PDFs.
fn meeting_id_from_url(url: &str) -> Option<String> {
    if let Some(id) = query_param(url, "event_id").or_else(|| query_param(url, "clip_id")) {
        return Some(id);
    }
    let path = url.split('?').next()?;
    let segment = path.rsplit('/').next()?;
    let stem = segment.split('.').next()?.trim();
    (!stem.is_empty()).then(|| stem.to_string())
}

/// Parse an AgendaViewer page: every row holding `MetaViewer.php` links
/// becomes an item, the links its attachments.
pub(crate) fn parse_agenda_viewer(html: &str, base: &str) -> AgendaDetail {
    let document = Html::parse_document(html);
    let mut items = Vec::new();

    for row in document.select(sel_rows()) {
        let mut attachments = Vec::new();
        for link in row.select(sel_links()) {
            let Some(href) = link.value().attr("href") else {
                continue;
            };
            if !href.contains("MetaViewer.php") {
                continue;
            }
            let mut name = link.text().collect::<String>().trim().to_string();
            if name.is_empty() {
                name = format!("Attachment {}", attachments.len() + 1);
            }
            let meta_id = query_param(href, "meta_id");
            attachments.push(AttachmentRef {
                name,
                url: absolute_url(base, href).unwrap_or_else(|| href.to_string()),
                metadata: serde_json::json!({ "vendor": "granicus", "metaId": meta_id }),
            });
        }
        if attachments.is_empty() {
            continue;
        }

        let sequence = (items.len() + 1) as u32;
        let vendor_item_id = attachments[0]
            .metadata
            .get("metaId")
            .and_then(|v| v.as_str())
            .map(String::from)
            .unwrap_or_else(|| sequence.to_string());

        items.push(AgendaItem {
            vendor_item_id,
            title: row_text(&row),
            sequence,
            matter_number: None,
            attachments,
        });
    }

    AgendaDetail {
        items,
        participation: None,
    }
}

#[async_trait]
impl VendorAdapter for GranicusAdapter {
    fn vendor(&self) -> Vendor {
        Vendor::Granicus
    }

    fn slug(&self) -> &str {
        &self.slug
    }

    async fn upcoming_meetings(&self) -> Result<Vec<NormalizedMeeting>, AdapterError> {
        self.ctx.limiter.wait(Vendor::Granicus).await;
        let html = self
            .ctx
            .fetcher
            .get_text(&self.list_url(), TimeoutClass::Listing)
            .await
            .map_err(|e| AdapterError::new(Vendor::Granicus, &self.slug, "list meetings", e))?;
        let meetings = self.parse_listing(&html);
        log::info!(
            "Retrieved {} meetings from Granicus for {}",
            meetings.len(),
            self.slug
        );
        Ok(meetings)
    }

    async fn fetch_agenda(
        &self,
        meeting: &MeetingRow,
    ) -> Result<Option<AgendaDetail>, AdapterError> {
        let Some(agenda_url) = meeting.agenda_url.as_deref() else {
            return Ok(None);
        };

        self.ctx.limiter.wait(Vendor::Granicus).await;
        let html = self
            .ctx
            .fetcher
            .get_text(agenda_url, TimeoutClass::Listing)
            .await
            .map_err(|e| AdapterError::new(Vendor::Granicus, &self.slug, "fetch agenda", e))?;

        let detail = parse_agenda_viewer(&html, &self.base);
        log::info!(
            "Granicus {}: parsed {} agenda items from {}",
            self.slug,
            detail.items.len(),
            agenda_url
        );
        Ok(Some(detail))
    }
}
