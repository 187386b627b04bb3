//! NovusAgenda adapter.
//!
//! Public meeting list scrape. Rows carry a `MM/DD/YYYY` date and a
//! `DisplayAgendaPDF.ashx?MeetingID=nnn` link, which doubles as the stable
//! meeting id and the packet URL. Monolithic packets only.

use std::sync::OnceLock;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use super::{absolute_url, query_param, sort_meetings, AdapterContext, VendorAdapter};
use crate::db::MeetingRow;
use crate::error::AdapterError;
use crate::fetch::TimeoutClass;
use crate::types::{AgendaDetail, MeetingSource, NormalizedMeeting, Vendor};

fn sel_rows() -> &'static Selector {
    static SEL: OnceLock<Selector> = OnceLock::new();
    SEL.get_or_init(|| Selector::parse("tr").unwrap())
}

fn sel_pdf_links() -> &'static Selector {
    static SEL: OnceLock<Selector> = OnceLock::new();
    SEL.get_or_init(|| Selector::parse(r#"a[href*="DisplayAgendaPDF.ashx"]"#).unwrap())
}

fn re_us_date() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(\d{1,2})/(\d{1,2})/(\d{4})\b").unwrap())
}

fn parse_us_date(text: &str) -> Option<DateTime<Utc>> {
    let caps = re_us_date().captures(text)?;
    let month: u32 = caps[1].parse().ok()?;
    let day: u32 = caps[2].parse().ok()?;
    let year: i32 = caps[3].parse().ok()?;
    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?))
}

pub struct NovusAgendaAdapter {
    slug: String,
    base: String,
    ctx: AdapterContext,
}

impl NovusAgendaAdapter {
    pub fn new(slug: String, ctx: AdapterContext) -> Result<Self, AdapterError> {
        if slug.trim().is_empty() {
            return Err(AdapterError::blank_slug(Vendor::NovusAgenda));
        }
        let base = format!("https://{slug}.novusagenda.com");
        log::debug!("Initialized NovusAgenda adapter for {slug}");
        Ok(Self { slug, base, ctx })
    }

    fn list_url(&self) -> String {
        format!("{}/agendapublic/meetingsresponsive.aspx", self.base)
    }

    fn parse_listing(&self, html: &str) -> Vec<NormalizedMeeting> {
        let document = Html::parse_document(html);
        let mut meetings = Vec::new();

        for row in document.select(sel_rows()) {
            let Some(link) = row.select(sel_pdf_links()).next() else {
                continue;
            };
            let Some(href) = link.value().attr("href") else {
                continue;
            };
            let Some(meeting_id) = query_param(href, "MeetingID") else {
                continue;
            };

            let text = row_text(&row);
            let Some(start) = parse_us_date(&text) else {
                continue;
            };
            let Some(url) = absolute_url(&format!("{}/agendapublic/", self.base), href) else {
                continue;
            };

            let title = re_us_date().replace(&text, "").trim().to_string();
            meetings.push(NormalizedMeeting {
                vendor_meeting_id: meeting_id,
                title: if title.is_empty() { "Meeting".to_string() } else { title },
                start,
                source: MeetingSource::Packet(url),
            });
        }

        sort_meetings(&mut meetings);
        meetings
    }
}

fn row_text(row: &ElementRef<'_>) -> String {
    row.text().collect::<Vec<_>>().join(" ").split_whitespace().collect::<Vec<_>>().join(" ")
}

#[async_trait]
impl VendorAdapter for NovusAgendaAdapter {
    fn vendor(&self) -> Vendor {
        Vendor::NovusAgenda
    }

    fn slug(&self) -> &str {
        &self.slug
    }

    async fn upcoming_meetings(&self) -> Result<Vec<NormalizedMeeting>, AdapterError> {
        self.ctx.limiter.wait(Vendor::NovusAgenda).await;
        let html = self
            .ctx
            .fetcher
            .get_text(&self.list_url(), TimeoutClass::Listing)
            .await
            .map_err(|e| AdapterError::new(Vendor::NovusAgenda, &self.slug, "list meetings", e))?;
        let meetings = self.parse_listing(&html);
        log::info!(
            "Retrieved {} meetings from NovusAgenda for {}",
            meetings.len(),
            self.slug
        );
        Ok(meetings)
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

    fn adapter() -> NovusAgendaAdapter {
        let ctx = AdapterContext {
            fetcher: Arc::new(HttpFetcher::new().unwrap()),
            limiter: Arc::new(RateLimiter::new(RateLimitConfig::default())),
        };
        NovusAgendaAdapter::new("coralgables".to_string(), ctx).unwrap()
    }

    const LISTING_HTML: &str = r#"
        <table id="meetingTable">
          <tr><th>Date</th><th>Meeting</th><th>Agenda</th></tr>
          <tr>
            <td>11/20/2025</td><td>City Commission</td>
            <td><a href="DisplayAgendaPDF.ashx?MeetingID=3301">Download</a></td>
          </tr>
          <tr>
            <td>11/17/2025</td><td>Planning Board</td>
            <td><a href="DisplayAgendaPDF.ashx?MeetingID=3290">Download</a></td>
          </tr>
        </table>"#;

    #[test]
    fn test_parse_listing() {
        let meetings = adapter().parse_listing(LISTING_HTML);
        assert_eq!(meetings.len(), 2);

        assert_eq!(meetings[0].vendor_meeting_id, "3290");
        assert_eq!(meetings[0].title, "Planning Board Download");
        assert_eq!(
            meetings[0].start,
            Utc.with_ymd_and_hms(2025, 11, 17, 0, 0, 0).unwrap()
        );
        assert_eq!(
            meetings[1].source.packet_url(),
            Some("https://coralgables.novusagenda.com/agendapublic/DisplayAgendaPDF.ashx?MeetingID=3301")
        );
    }

    #[test]
    fn test_parse_us_date() {
        assert_eq!(
            parse_us_date("1/5/2026 Special Meeting"),
            Some(Utc.with_ymd_and_hms(2026, 1, 5, 0, 0, 0).unwrap())
        );
        assert_eq!(parse_us_date("no date"), None);
    }
}
