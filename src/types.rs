//! Normalized entity model shared across vendor adapters, the store, and
//! the processing pipeline.
//!
//! Every vendor portal is reconciled into the same three shapes: a
//! [`NormalizedMeeting`] (one scheduled gathering), an [`AgendaItem`] (a line
//! on an item-based agenda), and an [`AttachmentRef`] (a downloadable
//! document hanging off an item). The city key is the "banana":
//! lowercase-alphanumeric city token + uppercase 2-letter state code
//! (`paloaltoCA`).

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Vendors
// ---------------------------------------------------------------------------

/// The closed set of civic-software vendors we ingest from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vendor {
    PrimeGov,
    Granicus,
    CivicClerk,
    Legistar,
    CivicPlus,
    NovusAgenda,
}

impl Vendor {
    /// All vendors, in adapter-registry order.
    pub const ALL: &'static [Vendor] = &[
        Vendor::PrimeGov,
        Vendor::Granicus,
        Vendor::CivicClerk,
        Vendor::Legistar,
        Vendor::CivicPlus,
        Vendor::NovusAgenda,
    ];

    /// Stable lowercase tag used in the database and rate-limiter table.
    pub fn as_str(&self) -> &'static str {
        match self {
            Vendor::PrimeGov => "primegov",
            Vendor::Granicus => "granicus",
            Vendor::CivicClerk => "civicclerk",
            Vendor::Legistar => "legistar",
            Vendor::CivicPlus => "civicplus",
            Vendor::NovusAgenda => "novusagenda",
        }
    }
}

impl fmt::Display for Vendor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Vendor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "primegov" => Ok(Vendor::PrimeGov),
            "granicus" => Ok(Vendor::Granicus),
            "civicclerk" => Ok(Vendor::CivicClerk),
            "legistar" => Ok(Vendor::Legistar),
            "civicplus" => Ok(Vendor::CivicPlus),
            "novusagenda" => Ok(Vendor::NovusAgenda),
            other => Err(format!("unknown vendor: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Banana: canonical city key
// ---------------------------------------------------------------------------

fn re_banana() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z0-9]+[A-Z]{2}$").unwrap())
}

/// Whether `s` is a well-formed banana (`paloaltoCA`, `montpelierVT`).
pub fn is_valid_banana(s: &str) -> bool {
    re_banana().is_match(s)
}

/// Build a banana from a display name and a state code.
///
/// Strips everything but ASCII alphanumerics from the name and lowercases
/// it; the state code is uppercased. `("Palo Alto", "ca")` → `paloaltoCA`.
pub fn make_banana(city_name: &str, state: &str) -> String {
    let token: String = city_name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_lowercase();
    format!("{}{}", token, state.to_uppercase())
}

// ---------------------------------------------------------------------------
// Composite ids
// ---------------------------------------------------------------------------
// All persistent ids are kind-prefixed strings so they can never collide
// across entity tables.

/// `meeting:{banana}:{vendor_meeting_id}`
pub fn meeting_id(banana: &str, vendor_meeting_id: &str) -> String {
    format!("meeting:{banana}:{vendor_meeting_id}")
}

/// `item:{meeting_id}:{vendor_item_id}`
pub fn item_id(meeting_id: &str, vendor_item_id: &str) -> String {
    format!("item:{meeting_id}:{vendor_item_id}")
}

/// `matter:{banana}:{matter_number}`
pub fn matter_id(banana: &str, matter_number: &str) -> String {
    format!("matter:{banana}:{matter_number}")
}

/// Synthetic source URL for meetings whose items are already in the store.
pub fn items_url(meeting_id: &str) -> String {
    format!("items://{meeting_id}")
}

/// Inverse of [`items_url`]; returns the meeting id for `items://…` URLs.
pub fn parse_items_url(url: &str) -> Option<&str> {
    url.strip_prefix("items://")
}

// ---------------------------------------------------------------------------
// Meetings
// ---------------------------------------------------------------------------

/// Where a meeting's content lives: a monolithic PDF packet, or an HTML
/// agenda page with per-item attachments. Exactly one, always.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MeetingSource {
    /// Direct link to the compiled agenda packet PDF.
    Packet(String),
    /// Link to an item-level HTML agenda page.
    Agenda(String),
}

impl MeetingSource {
    pub fn packet_url(&self) -> Option<&str> {
        match self {
            MeetingSource::Packet(u) => Some(u),
            MeetingSource::Agenda(_) => None,
        }
    }

    pub fn agenda_url(&self) -> Option<&str> {
        match self {
            MeetingSource::Packet(_) => None,
            MeetingSource::Agenda(u) => Some(u),
        }
    }

    /// The URL regardless of variant.
    pub fn url(&self) -> &str {
        match self {
            MeetingSource::Packet(u) | MeetingSource::Agenda(u) => u,
        }
    }
}

/// A meeting as reported by a vendor adapter, before persistence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedMeeting {
    /// Vendor-side meeting id, unique per (vendor, slug).
    pub vendor_meeting_id: String,
    pub title: String,
    /// Scheduled start, UTC. Meetings without a parseable start are dropped
    /// at the adapter boundary.
    pub start: DateTime<Utc>,
    pub source: MeetingSource,
}

/// Meeting pipeline state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Pending => "pending",
            ProcessingStatus::Running => "running",
            ProcessingStatus::Completed => "completed",
            ProcessingStatus::Failed => "failed",
        }
    }
}

impl FromStr for ProcessingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ProcessingStatus::Pending),
            "running" => Ok(ProcessingStatus::Running),
            "completed" => Ok(ProcessingStatus::Completed),
            "failed" => Ok(ProcessingStatus::Failed),
            other => Err(format!("unknown processing status: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Agenda detail (item-based meetings)
// ---------------------------------------------------------------------------

/// A downloadable document attached to an agenda item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentRef {
    pub name: String,
    /// Absolute URL.
    pub url: String,
    /// Vendor-specific extras (history ids, file ids) kept verbatim.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub metadata: serde_json::Value,
}

/// One line on an item-based agenda.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgendaItem {
    /// Vendor-side item id (numeric for PrimeGov, EventItemId for Legistar).
    pub vendor_item_id: String,
    pub title: String,
    /// 1-based position on the agenda.
    pub sequence: u32,
    /// Legislative tracking number (`O2025-0019668`), when the vendor
    /// exposes one.
    #[serde(default)]
    pub matter_number: Option<String>,
    #[serde(default)]
    pub attachments: Vec<AttachmentRef>,
}

/// How the public can attend, scraped from the agenda page header.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub virtual_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meeting_id: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_hybrid: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_virtual_only: bool,
}

impl Participation {
    pub fn is_empty(&self) -> bool {
        self.email.is_none()
            && self.phone.is_none()
            && self.virtual_url.is_none()
            && self.meeting_id.is_none()
            && !self.is_hybrid
            && !self.is_virtual_only
    }
}

/// Items and participation info parsed from an HTML agenda page.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgendaDetail {
    #[serde(default)]
    pub items: Vec<AgendaItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participation: Option<Participation>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
