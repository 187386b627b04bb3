//! CivicPlus adapter.
//!
//! AgendaCenter scrape. Agenda links follow the
//! `/AgendaCenter/ViewFile/Agenda/_MMDDYYYY-NNN` shape, which carries both
//! the meeting date and a stable numeric id. CivicPlus never exposes
//! item-level agendas, so everything is a monolithic packet. The vendor
//! also blocks scrapers aggressively, so it gets the longest rate-limiter
//! spacing and extra jitter.

use std::sync::OnceLock;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use regex::Regex;
use scraper::{Html, Selector};

use super::{absolute_url, sort_meetings, AdapterContext, VendorAdapter};
use crate::db::MeetingRow;
use crate::error::AdapterError;
use crate::fetch::TimeoutClass;
use crate::types::{AgendaDetail, MeetingSource, NormalizedMeeting, Vendor};

fn sel_agenda_links() -> &'static Selector {
    static SEL: OnceLock<Selector> = OnceLock::new();
    SEL.get_or_init(|| Selector::parse(r#"a[href*="/AgendaCenter/ViewFile/Agenda/"]"#).unwrap())
}

fn re_view_file() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // /AgendaCenter/ViewFile/Agenda/_11202025-1205
    RE.get_or_init(|| {
        Regex::new(r"/AgendaCenter/ViewFile/Agenda/_(\d{2})(\d{2})(\d{4})-(\d+)").unwrap()
    })
}

fn date_from_href(href: &str) -> Option<(DateTime<Utc>, String)> {
    let caps = re_view_file().captures(href)?;
    let month: u32 = caps[1].parse().ok()?;
    let day: u32 = caps[2].parse().ok()?;
    let year: i32 = caps[3].parse().ok()?;
    let id = caps[4].to_string();
    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    Some((Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?), id))
}

pub struct CivicPlusAdapter {
    slug: String,
    base: String,
    ctx: AdapterContext,
}

impl CivicPlusAdapter {
    pub fn new(slug: String, ctx: AdapterContext) -> Result<Self, AdapterError> {
        if slug.trim().is_empty() {
            return Err(AdapterError::blank_slug(Vendor::CivicPlus));
        }
        let base = format!("https://{slug}.civicplus.com");
        log::debug!("Initialized CivicPlus adapter for {slug}");
        Ok(Self { slug, base, ctx })
    }

    fn parse_listing(&self, html: &str) -> Vec<NormalizedMeeting> {
        let document = Html::parse_document(html);
        let mut meetings = Vec::new();

        for link in document.select(sel_agenda_links()) {
            let Some(href) = link.value().attr("href") else {
                continue;
            };
            let Some((start, id)) = date_from_href(href) else {
                continue;
            };
            let Some(url) = absolute_url(&self.base, href) else {
                continue;
            };

            let mut title = link
                .value()
                .attr("aria-label")
                .map(|label| label.trim().to_string())
                .unwrap_or_else(|| link.text().collect::<String>().trim().to_string());
            if title.is_empty() {
                title = "Agenda".to_string();
            }

            meetings.push(NormalizedMeeting {
                vendor_meeting_id: id,
                title,
                start,
                source: MeetingSource::Packet(url),
            });
        }

        sort_meetings(&mut meetings);
        meetings.dedup_by(|a, b| a.vendor_meeting_id == b.vendor_meeting_id);
        meetings
    }
}

#[async_trait]
impl VendorAdapter for CivicPlusAdapter {
    fn vendor(&self) -> Vendor {
        Vendor::CivicPlus
    }

    fn slug(&self) -> &str {
        &self.slug
    }

    async fn upcoming_meetings(&self) -> Result<Vec<NormalizedMeeting>, AdapterError> {
        self.ctx.limiter.wait(Vendor::CivicPlus).await;
        let url = format!("{}/AgendaCenter", self.base);
        let html = self
            .ctx
            .fetcher
            .get_text(&url, TimeoutClass::Listing)
            .await
            .map_err(|e| AdapterError::new(Vendor::CivicPlus, &self.slug, "list meetings", e))?;
        let meetings = self.parse_listing(&html);
        log::info!(
            "Retrieved {} meetings from CivicPlus for {}",
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

    fn adapter() -> CivicPlusAdapter {
        let ctx = AdapterContext {
            fetcher: Arc::new(HttpFetcher::new().unwrap()),
            limiter: Arc::new(RateLimiter::new(RateLimitConfig::default())),
        };
        CivicPlusAdapter::new("springfieldmo".to_string(), ctx).unwrap()
    }

    const LISTING_HTML: &str = r#"
        <div id="AgendaCenterContent">
          <h2>City Council</h2>
          <a href="/AgendaCenter/ViewFile/Agenda/_11202025-1205"
             aria-label="Agenda for City Council November 20, 2025">Agenda</a>
          <a href="/AgendaCenter/ViewFile/Agenda/_11182025-1199">Agenda</a>
          <a href="/AgendaCenter/ViewFile/Minutes/_11042025-1180">Minutes</a>
        </div>"#;

    #[test]
    fn test_parse_listing() {
        let meetings = adapter().parse_listing(LISTING_HTML);
        assert_eq!(meetings.len(), 2);

        assert_eq!(meetings[0].vendor_meeting_id, "1199");
        assert_eq!(
            meetings[0].start,
            Utc.with_ymd_and_hms(2025, 11, 18, 0, 0, 0).unwrap()
        );

        assert_eq!(meetings[1].vendor_meeting_id, "1205");
        assert_eq!(
            meetings[1].title,
            "Agenda for City Council November 20, 2025"
        );
        assert_eq!(
            meetings[1].source.packet_url(),
            Some("https://springfieldmo.civicplus.com/AgendaCenter/ViewFile/Agenda/_11202025-1205")
        );
    }

    #[test]
    fn test_date_from_href() {
        let (start, id) =
            date_from_href("/AgendaCenter/ViewFile/Agenda/_01052026-88").unwrap();
        assert_eq!(start, Utc.with_ymd_and_hms(2026, 1, 5, 0, 0, 0).unwrap());
        assert_eq!(id, "88");
        assert!(date_from_href("/AgendaCenter/ViewFile/Minutes/_01052026-88").is_none());
    }
}
