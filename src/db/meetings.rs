use std::str::FromStr;

use rusqlite::{params, OptionalExtension, Row};

use super::*;
use crate::types::{meeting_id, MeetingSource, NormalizedMeeting, Participation, ProcessingStatus};

fn meeting_from_row(row: &Row<'_>) -> rusqlite::Result<MeetingRow> {
    let status: String = row.get(7)?;
    Ok(MeetingRow {
        id: row.get(0)?,
        banana: row.get(1)?,
        vendor_meeting_id: row.get(2)?,
        title: row.get(3)?,
        start_ts: row.get(4)?,
        packet_url: row.get(5)?,
        agenda_url: row.get(6)?,
        processing_status: ProcessingStatus::from_str(&status)
            .unwrap_or(ProcessingStatus::Pending),
        summary: row.get(8)?,
        topics: row.get(9)?,
        extraction_method: row.get(10)?,
        participation: row.get(11)?,
        created_at: row.get(12)?,
        updated_at: row.get(13)?,
    })
}

const MEETING_COLUMNS: &str = "id, banana, vendor_meeting_id, title, start_ts, packet_url, \
     agenda_url, processing_status, summary, topics, extraction_method, participation, \
     created_at, updated_at";

impl Store {
    // =========================================================================
    // Meetings
    // =========================================================================

    /// Idempotent upsert by `(banana, vendor_meeting_id)`, one transaction
    /// for the whole batch. Returns a delta per meeting so the conductor
    /// can enqueue only new or changed ones; re-running a poll with no
    /// upstream changes reports zero changed rows.
    pub fn upsert_meetings(
        &self,
        banana: &str,
        meetings: &[NormalizedMeeting],
    ) -> Result<Vec<MeetingDelta>, DbError> {
        self.with_transaction(|store| {
            let mut deltas = Vec::with_capacity(meetings.len());
            for meeting in meetings {
                deltas.push(store.upsert_one_meeting(banana, meeting)?);
            }
            Ok(deltas)
        })
    }

    fn upsert_one_meeting(
        &self,
        banana: &str,
        meeting: &NormalizedMeeting,
    ) -> Result<MeetingDelta, DbError> {
        let id = meeting_id(banana, &meeting.vendor_meeting_id);
        let start_ts = meeting
            .start
            .to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
        let (packet_url, agenda_url) = match &meeting.source {
            MeetingSource::Packet(url) => (Some(url.as_str()), None),
            MeetingSource::Agenda(url) => (None, Some(url.as_str())),
        };
        let source_url = meeting.source.url().to_string();

        let existing: Option<(String, Option<String>, Option<String>, String)> = self
            .conn
            .query_row(
                "SELECT title, packet_url, agenda_url, start_ts FROM meetings WHERE id = ?1",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()?;

        let now = now_str();
        match existing {
            None => {
                self.conn.execute(
                    "INSERT INTO meetings (id, banana, vendor_meeting_id, title, start_ts,
                        packet_url, agenda_url, processing_status, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'pending', ?8, ?8)",
                    params![
                        id,
                        banana,
                        meeting.vendor_meeting_id,
                        meeting.title,
                        start_ts,
                        packet_url,
                        agenda_url,
                        now
                    ],
                )?;
                Ok(MeetingDelta {
                    meeting_id: id,
                    source_url,
                    changed: true,
                })
            }
            Some((old_title, old_packet, old_agenda, old_start)) => {
                let changed = old_title != meeting.title
                    || old_packet.as_deref() != packet_url
                    || old_agenda.as_deref() != agenda_url
                    || old_start != start_ts;
                if changed {
                    self.conn.execute(
                        "UPDATE meetings
                         SET title = ?2, start_ts = ?3, packet_url = ?4, agenda_url = ?5,
                             processing_status = 'pending', updated_at = ?6
                         WHERE id = ?1",
                        params![id, meeting.title, start_ts, packet_url, agenda_url, now],
                    )?;
                }
                Ok(MeetingDelta {
                    meeting_id: id,
                    source_url,
                    changed,
                })
            }
        }
    }

    pub fn get_meeting(&self, id: &str) -> Result<Option<MeetingRow>, DbError> {
        let sql = format!("SELECT {MEETING_COLUMNS} FROM meetings WHERE id = ?1");
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query_map(params![id], meeting_from_row)?;
        match rows.next() {
            Some(Ok(meeting)) => Ok(Some(meeting)),
            Some(Err(e)) => Err(DbError::Sqlite(e)),
            None => Ok(None),
        }
    }

    pub fn set_processing_status(
        &self,
        id: &str,
        status: ProcessingStatus,
    ) -> Result<(), DbError> {
        self.conn.execute(
            "UPDATE meetings SET processing_status = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, status.as_str(), now_str()],
        )?;
        Ok(())
    }

    /// Write the summary, topic tags, and which extractor produced the
    /// text; marks the meeting completed.
    pub fn record_summary(
        &self,
        id: &str,
        summary: &str,
        topics: &[String],
        extraction_method: &str,
    ) -> Result<(), DbError> {
        let topics_json = if topics.is_empty() {
            None
        } else {
            Some(serde_json::to_string(topics).unwrap_or_default())
        };
        self.conn.execute(
            "UPDATE meetings
             SET summary = ?2, topics = ?3, extraction_method = ?4,
                 processing_status = 'completed', updated_at = ?5
             WHERE id = ?1",
            params![id, summary, topics_json, extraction_method, now_str()],
        )?;
        Ok(())
    }

    /// Store participation info scraped from the agenda header.
    pub fn set_participation(
        &self,
        id: &str,
        participation: &Participation,
    ) -> Result<(), DbError> {
        let json = serde_json::to_string(participation).unwrap_or_default();
        self.conn.execute(
            "UPDATE meetings SET participation = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, json, now_str()],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{City, CityStatus};
    use crate::types::Vendor;
    use chrono::{TimeZone, Utc};

    fn store_with_city() -> Store {
        let store = Store::open_in_memory().unwrap();
        store
            .upsert_city(&City {
                banana: "paloaltoCA".to_string(),
                name: "Palo Alto".to_string(),
                state: "CA".to_string(),
                vendor: Vendor::PrimeGov,
                slug: "cityofpaloalto".to_string(),
                status: CityStatus::Active,
            })
            .unwrap();
        store
    }

    fn council_meeting() -> NormalizedMeeting {
        NormalizedMeeting {
            vendor_meeting_id: "42".to_string(),
            title: "City Council".to_string(),
            start: Utc.with_ymd_and_hms(2025, 11, 20, 19, 0, 0).unwrap(),
            source: MeetingSource::Packet(
                "https://cityofpaloalto.primegov.com/Public/CompiledDocument?meetingTemplateId=42&compileOutputType=1"
                    .to_string(),
            ),
        }
    }

    #[test]
    fn test_upsert_inserts_and_reports_changed() {
        let store = store_with_city();
        let deltas = store
            .upsert_meetings("paloaltoCA", &[council_meeting()])
            .unwrap();
        assert_eq!(deltas.len(), 1);
        assert!(deltas[0].changed);
        assert_eq!(deltas[0].meeting_id, "meeting:paloaltoCA:42");

        let row = store.get_meeting("meeting:paloaltoCA:42").unwrap().unwrap();
        assert!(row.packet_url.is_some());
        assert!(row.agenda_url.is_none());
        assert_eq!(row.processing_status, ProcessingStatus::Pending);
    }

    #[test]
    fn test_repoll_without_changes_is_noop() {
        let store = store_with_city();
        store
            .upsert_meetings("paloaltoCA", &[council_meeting()])
            .unwrap();
        let deltas = store
            .upsert_meetings("paloaltoCA", &[council_meeting()])
            .unwrap();
        assert_eq!(deltas.len(), 1);
        assert!(!deltas[0].changed);
    }

    #[test]
    fn test_source_flip_reports_changed_and_resets_status() {
        let store = store_with_city();
        store
            .upsert_meetings("paloaltoCA", &[council_meeting()])
            .unwrap();
        store
            .set_processing_status("meeting:paloaltoCA:42", ProcessingStatus::Completed)
            .unwrap();

        // Vendor switched this meeting to an HTML agenda.
        let mut meeting = council_meeting();
        meeting.source =
            MeetingSource::Agenda("https://cityofpaloalto.primegov.com/Portal/Meeting/42".into());
        let deltas = store.upsert_meetings("paloaltoCA", &[meeting]).unwrap();
        assert!(deltas[0].changed);

        let row = store.get_meeting("meeting:paloaltoCA:42").unwrap().unwrap();
        assert!(row.packet_url.is_none());
        assert_eq!(
            row.agenda_url.as_deref(),
            Some("https://cityofpaloalto.primegov.com/Portal/Meeting/42")
        );
        assert_eq!(row.processing_status, ProcessingStatus::Pending);
    }

    #[test]
    fn test_record_summary_marks_completed() {
        let store = store_with_city();
        store
            .upsert_meetings("paloaltoCA", &[council_meeting()])
            .unwrap();
        store
            .record_summary(
                "meeting:paloaltoCA:42",
                "Budget hearing and housing element update.",
                &["budget".to_string(), "housing".to_string()],
                "pdf_text",
            )
            .unwrap();

        let row = store.get_meeting("meeting:paloaltoCA:42").unwrap().unwrap();
        assert_eq!(row.processing_status, ProcessingStatus::Completed);
        assert_eq!(row.extraction_method.as_deref(), Some("pdf_text"));
        let topics: Vec<String> = serde_json::from_str(row.topics.as_deref().unwrap()).unwrap();
        assert_eq!(topics, vec!["budget", "housing"]);
    }

    #[test]
    fn test_set_participation_roundtrip() {
        let store = store_with_city();
        store
            .upsert_meetings("paloaltoCA", &[council_meeting()])
            .unwrap();
        let participation = Participation {
            email: Some("clerk@cityofpaloalto.org".to_string()),
            phone: Some("+16699006833".to_string()),
            virtual_url: Some("https://cityofpaloalto.zoom.us/j/362027238".to_string()),
            meeting_id: Some("362 027 238".to_string()),
            is_hybrid: true,
            is_virtual_only: false,
        };
        store
            .set_participation("meeting:paloaltoCA:42", &participation)
            .unwrap();

        let row = store.get_meeting("meeting:paloaltoCA:42").unwrap().unwrap();
        let parsed: Participation =
            serde_json::from_str(row.participation.as_deref().unwrap()).unwrap();
        assert_eq!(parsed, participation);
    }
}
