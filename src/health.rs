//! Aggregate health reporting and data-corruption detection.
//!
//! Beyond status counts, the report hunts for cross-contamination: a
//! meeting stored under one city whose packet URL belongs to another
//! city's portal. The tell is the slug embedded in the URL: vendor
//! subdomains for the API vendors, the
//! `granicus_production_attachments/{slug}/` S3 path for Granicus.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

use crate::db::{DbError, QueueStats, Store};

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CityStats {
    pub total: u64,
    pub active: u64,
    pub inactive: u64,
    pub vendors: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VendorBreakdown {
    pub vendor: String,
    pub city_count: u64,
    pub meeting_count: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingStats {
    pub total_meetings: u64,
    pub completed: u64,
    pub pending: u64,
    pub running: u64,
    pub failed: u64,
    pub with_summaries: u64,
}

/// A meeting whose packet URL does not belong to its city.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContaminationIssue {
    pub banana: String,
    pub city_name: String,
    pub vendor: String,
    pub configured_slug: String,
    /// Distinct foreign slugs found in this city's packet URLs.
    pub foreign_slugs: Vec<String>,
}

/// A meeting whose packet URL is not on its vendor's domain at all.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainIssue {
    pub banana: String,
    pub city_name: String,
    pub vendor: String,
    pub packet_url: String,
}

/// A city and its meeting count, for the leaderboard sections.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CityMeetingCount {
    pub banana: String,
    pub city_name: String,
    pub meeting_count: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub cities: CityStats,
    pub vendor_breakdown: Vec<VendorBreakdown>,
    pub processing: ProcessingStats,
    pub queue: QueueStats,
    pub cities_without_meetings: Vec<String>,
    /// Top cities by total meeting count.
    pub top_cities: Vec<CityMeetingCount>,
    /// Cities with meetings ingested in the last 7 days.
    pub recent_activity: Vec<CityMeetingCount>,
    pub cross_contamination: Vec<ContaminationIssue>,
    pub domain_mismatches: Vec<DomainIssue>,
}

/// How many rows the leaderboard sections carry.
const LEADERBOARD_LIMIT: i64 = 10;

/// Window for the recent-activity section, days.
const RECENT_ACTIVITY_DAYS: i64 = 7;

// ---------------------------------------------------------------------------
// Slug extraction
// ---------------------------------------------------------------------------

fn re_subdomain(pattern: &'static str) -> Regex {
    Regex::new(pattern).expect("static slug pattern")
}

fn re_s3_granicus() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| re_subdomain(r"granicus_production_attachments/([^/]+)/"))
}

/// Extract the city slug a URL actually belongs to, for any vendor.
pub fn extract_slug_from_url(url: &str) -> Option<String> {
    let mut url = url.trim();
    // Legacy rows stored packet URLs as JSON arrays; take the first entry.
    if url.starts_with('[') {
        let parsed: Vec<String> = serde_json::from_str(url).ok()?;
        return extract_slug_from_url(parsed.first()?).map(|s| s.to_string());
    }
    if url.is_empty() {
        return None;
    }

    let lower = url.to_lowercase();
    let parsed = url::Url::parse(&lower).ok()?;
    let domain = parsed.host_str()?;
    url = domain;

    static PATTERNS: OnceLock<Vec<(&'static str, Regex)>> = OnceLock::new();
    let patterns = PATTERNS.get_or_init(|| {
        vec![
            ("primegov.com", re_subdomain(r"^([^.]+)\.primegov\.com$")),
            ("civicclerk.com", re_subdomain(r"^([^.]+)\.api\.civicclerk\.com$")),
            ("legistar", re_subdomain(r"^([^.]+)\.legistar1?\.com$")),
            ("novusagenda.com", re_subdomain(r"^([^.]+)\.novusagenda\.com$")),
            ("civicplus.com", re_subdomain(r"^([^.]+)\.civicplus\.com$")),
            ("granicus.com", re_subdomain(r"^([^.]+)\.granicus\.com$")),
        ]
    });
    for (marker, pattern) in patterns {
        if url.contains(marker) {
            return pattern.captures(url).map(|caps| caps[1].to_string());
        }
    }

    // S3-hosted Granicus packets carry the slug in the path.
    if url.contains("s3.amazonaws.com") {
        return re_s3_granicus()
            .captures(&lower)
            .map(|caps| caps[1].to_string());
    }

    None
}

/// The domain markers a vendor's packet URLs are expected to match.
fn vendor_domain_markers(vendor: &str) -> &'static [&'static str] {
    match vendor {
        "primegov" => &[".primegov.com"],
        "granicus" => &[".granicus.com", "s3.amazonaws.com"],
        "civicclerk" => &[".civicclerk.com"],
        "novusagenda" => &[".novusagenda.com"],
        "civicplus" => &[".civicplus.com"],
        "legistar" => &["legistar"],
        _ => &[],
    }
}

impl Store {
    /// Build the full health report.
    pub fn health_report(&self) -> Result<HealthReport, DbError> {
        let conn = self.conn_ref();

        let cities = conn.query_row(
            "SELECT COUNT(*),
                    COUNT(CASE WHEN status = 'active' THEN 1 END),
                    COUNT(CASE WHEN status != 'active' THEN 1 END),
                    COUNT(DISTINCT vendor)
             FROM cities",
            [],
            |row| {
                Ok(CityStats {
                    total: row.get(0)?,
                    active: row.get(1)?,
                    inactive: row.get(2)?,
                    vendors: row.get(3)?,
                })
            },
        )?;

        let mut vendor_breakdown = Vec::new();
        {
            let mut stmt = conn.prepare(
                "SELECT c.vendor, COUNT(DISTINCT c.banana), COUNT(m.id)
                 FROM cities c
                 LEFT JOIN meetings m ON c.banana = m.banana
                 GROUP BY c.vendor
                 ORDER BY COUNT(DISTINCT c.banana) DESC",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok(VendorBreakdown {
                    vendor: row.get(0)?,
                    city_count: row.get(1)?,
                    meeting_count: row.get(2)?,
                })
            })?;
            for row in rows {
                vendor_breakdown.push(row?);
            }
        }

        let processing = conn.query_row(
            "SELECT COUNT(*),
                    COUNT(CASE WHEN processing_status = 'completed' THEN 1 END),
                    COUNT(CASE WHEN processing_status = 'pending' THEN 1 END),
                    COUNT(CASE WHEN processing_status = 'running' THEN 1 END),
                    COUNT(CASE WHEN processing_status = 'failed' THEN 1 END),
                    COUNT(CASE WHEN summary IS NOT NULL THEN 1 END)
             FROM meetings",
            [],
            |row| {
                Ok(ProcessingStats {
                    total_meetings: row.get(0)?,
                    completed: row.get(1)?,
                    pending: row.get(2)?,
                    running: row.get(3)?,
                    failed: row.get(4)?,
                    with_summaries: row.get(5)?,
                })
            },
        )?;

        let mut cities_without_meetings = Vec::new();
        {
            let mut stmt = conn.prepare(
                "SELECT c.banana
                 FROM cities c
                 LEFT JOIN meetings m ON c.banana = m.banana
                 WHERE c.status = 'active'
                 GROUP BY c.banana
                 HAVING COUNT(m.id) = 0
                 ORDER BY c.vendor, c.name",
            )?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            for row in rows {
                cities_without_meetings.push(row?);
            }
        }

        let top_cities = self.city_meeting_counts(
            "SELECT c.banana, c.name, COUNT(m.id) AS meeting_count
             FROM cities c
             INNER JOIN meetings m ON c.banana = m.banana
             GROUP BY c.banana
             ORDER BY meeting_count DESC
             LIMIT ?1",
            rusqlite::params![LEADERBOARD_LIMIT],
        )?;

        let recent_cutoff = crate::db::ago_str(RECENT_ACTIVITY_DAYS * 24 * 3600);
        let recent_activity = self.city_meeting_counts(
            "SELECT c.banana, c.name, COUNT(m.id) AS meeting_count
             FROM cities c
             INNER JOIN meetings m ON c.banana = m.banana
             WHERE m.created_at > ?1
             GROUP BY c.banana
             ORDER BY meeting_count DESC
             LIMIT 10",
            rusqlite::params![recent_cutoff],
        )?;

        let (cross_contamination, domain_mismatches) = self.detect_contamination()?;

        Ok(HealthReport {
            cities,
            vendor_breakdown,
            processing,
            queue: self.queue_stats()?,
            cities_without_meetings,
            top_cities,
            recent_activity,
            cross_contamination,
            domain_mismatches,
        })
    }

    fn city_meeting_counts<P: rusqlite::Params>(
        &self,
        sql: &str,
        params: P,
    ) -> Result<Vec<CityMeetingCount>, DbError> {
        let mut stmt = self.conn_ref().prepare(sql)?;
        let rows = stmt.query_map(params, |row| {
            Ok(CityMeetingCount {
                banana: row.get(0)?,
                city_name: row.get(1)?,
                meeting_count: row.get(2)?,
            })
        })?;

        let mut counts = Vec::new();
        for row in rows {
            counts.push(row?);
        }
        Ok(counts)
    }

    /// Compare every packet URL's embedded slug against its city's
    /// configured slug, and its domain against the vendor's expected
    /// domains.
    fn detect_contamination(
        &self,
    ) -> Result<(Vec<ContaminationIssue>, Vec<DomainIssue>), DbError> {
        let conn = self.conn_ref();
        let mut stmt = conn.prepare(
            "SELECT c.banana, c.name, c.vendor, c.slug, m.packet_url
             FROM cities c
             INNER JOIN meetings m ON c.banana = m.banana
             WHERE m.packet_url IS NOT NULL
             ORDER BY c.banana",
        )?;
        let rows: Vec<(String, String, String, String, String)> = stmt
            .query_map([], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                ))
            })?
            .collect::<Result<_, _>>()?;

        let mut contamination: Vec<ContaminationIssue> = Vec::new();
        let mut mismatches = Vec::new();

        for (banana, name, vendor, slug, packet_url) in rows {
            let lower_url = packet_url.to_lowercase();
            let markers = vendor_domain_markers(&vendor);
            if !markers.is_empty() && !markers.iter().any(|m| lower_url.contains(m)) {
                mismatches.push(DomainIssue {
                    banana: banana.clone(),
                    city_name: name.clone(),
                    vendor: vendor.clone(),
                    packet_url: packet_url.clone(),
                });
            }

            let Some(found_slug) = extract_slug_from_url(&packet_url) else {
                continue;
            };
            if found_slug.eq_ignore_ascii_case(&slug) {
                continue;
            }

            match contamination.iter_mut().find(|issue| issue.banana == banana) {
                Some(issue) => {
                    let mut slugs: BTreeSet<String> =
                        issue.foreign_slugs.iter().cloned().collect();
                    slugs.insert(found_slug);
                    issue.foreign_slugs = slugs.into_iter().collect();
                }
                None => contamination.push(ContaminationIssue {
                    banana,
                    city_name: name,
                    vendor,
                    configured_slug: slug,
                    foreign_slugs: vec![found_slug],
                }),
            }
        }

        Ok((contamination, mismatches))
    }
}
