//! Row types and job payloads for the store.

use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{ProcessingStatus, Vendor};

#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Failed to create data directory: {0}")]
    CreateDir(std::io::Error),

    #[error("Could not determine home directory")]
    HomeDirNotFound,

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Database not found at {0}")]
    NotFound(PathBuf),

    #[error("Invalid row: {0}")]
    InvalidRow(String),
}

// ---------------------------------------------------------------------------
// Cities
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CityStatus {
    Active,
    Inactive,
}

impl CityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CityStatus::Active => "active",
            CityStatus::Inactive => "inactive",
        }
    }
}

impl FromStr for CityStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(CityStatus::Active),
            "inactive" => Ok(CityStatus::Inactive),
            other => Err(format!("unknown city status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct City {
    pub banana: String,
    pub name: String,
    pub state: String,
    pub vendor: Vendor,
    pub slug: String,
    pub status: CityStatus,
}

/// Optional filters for `list_cities`.
#[derive(Debug, Clone, Default)]
pub struct CityFilter {
    pub vendor: Option<Vendor>,
    pub status: Option<CityStatus>,
}

// ---------------------------------------------------------------------------
// Meetings / items / attachments / matters
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct MeetingRow {
    pub id: String,
    pub banana: String,
    pub vendor_meeting_id: String,
    pub title: String,
    pub start_ts: String,
    pub packet_url: Option<String>,
    pub agenda_url: Option<String>,
    pub processing_status: ProcessingStatus,
    pub summary: Option<String>,
    pub topics: Option<String>,
    pub extraction_method: Option<String>,
    pub participation: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl MeetingRow {
    /// The single source URL (packet or agenda). A row violating the
    /// exclusivity CHECK cannot exist, so this never has two answers.
    pub fn source_url(&self) -> Option<&str> {
        self.packet_url.as_deref().or(self.agenda_url.as_deref())
    }
}

#[derive(Debug, Clone)]
pub struct ItemRow {
    pub id: String,
    pub meeting_id: String,
    pub vendor_item_id: String,
    pub sequence: u32,
    pub title: String,
    pub matter_number: Option<String>,
    pub summary: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AttachmentRow {
    pub id: String,
    pub item_id: String,
    pub name: String,
    pub url: String,
    pub metadata: Option<String>,
}

#[derive(Debug, Clone)]
pub struct MatterRow {
    pub id: String,
    pub banana: String,
    pub matter_number: String,
    pub title: String,
    pub summary: Option<String>,
}

/// What `upsert_meetings` did with one normalized meeting. Drives the
/// conductor's decision to enqueue.
#[derive(Debug, Clone)]
pub struct MeetingDelta {
    pub meeting_id: String,
    pub source_url: String,
    /// True for newly inserted rows and rows whose source URL, title, or
    /// start time changed upstream.
    pub changed: bool,
}

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobType {
    Meeting,
    Matter,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Meeting => "meeting",
            JobType::Matter => "matter",
        }
    }
}

impl FromStr for JobType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "meeting" => Ok(JobType::Meeting),
            "matter" => Ok(JobType::Matter),
            other => Err(format!("unknown job type: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeetingJob {
    pub meeting_id: String,
    /// packet_url, agenda_url, or the synthetic `items://{meeting_id}`.
    pub source_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatterJob {
    pub matter_id: String,
    pub meeting_id: String,
    pub item_ids: Vec<String>,
}

/// A typed queue payload. The `job_type` column tags which variant the
/// `payload` JSON deserializes into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobPayload {
    Meeting(MeetingJob),
    Matter(MatterJob),
}

impl JobPayload {
    pub fn job_type(&self) -> JobType {
        match self {
            JobPayload::Meeting(_) => JobType::Meeting,
            JobPayload::Matter(_) => JobType::Matter,
        }
    }

    /// Dedup key: one non-terminal entry per fingerprint.
    pub fn fingerprint(&self) -> &str {
        match self {
            JobPayload::Meeting(job) => &job.meeting_id,
            JobPayload::Matter(job) => &job.matter_id,
        }
    }

    pub fn to_json(&self) -> String {
        match self {
            // Serialization of these payload structs cannot fail.
            JobPayload::Meeting(job) => serde_json::to_string(job).unwrap_or_default(),
            JobPayload::Matter(job) => serde_json::to_string(job).unwrap_or_default(),
        }
    }

    pub fn from_parts(job_type: JobType, payload_json: &str) -> Result<Self, serde_json::Error> {
        match job_type {
            JobType::Meeting => Ok(JobPayload::Meeting(serde_json::from_str(payload_json)?)),
            JobType::Matter => Ok(JobPayload::Matter(serde_json::from_str(payload_json)?)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueStatus {
    Pending,
    Claimed,
    Completed,
    Failed,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Pending => "pending",
            QueueStatus::Claimed => "claimed",
            QueueStatus::Completed => "completed",
            QueueStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, QueueStatus::Completed | QueueStatus::Failed)
    }
}

impl FromStr for QueueStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(QueueStatus::Pending),
            "claimed" => Ok(QueueStatus::Claimed),
            "completed" => Ok(QueueStatus::Completed),
            "failed" => Ok(QueueStatus::Failed),
            other => Err(format!("unknown queue status: {other}")),
        }
    }
}

/// A claimed job handed to a worker.
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    pub id: String,
    pub payload: JobPayload,
    pub attempts: u32,
    pub created_at: String,
}

/// Queue status counts for the CLI and health surface.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub pending: u64,
    pub claimed: u64,
    pub completed: u64,
    pub failed: u64,
}

impl QueueStats {
    pub fn total(&self) -> u64 {
        self.pending + self.claimed + self.completed + self.failed
    }
}
