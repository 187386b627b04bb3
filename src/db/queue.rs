use std::collections::HashMap;
use std::str::FromStr;

use rusqlite::{params, OptionalExtension};

use super::*;

/// Recorded on legacy rows (written before typed payloads) when a worker
/// claims one.
const CORRUPT_PAYLOAD_REASON: &str = "corrupt payload (pre-typed row)";

impl Store {
    // =========================================================================
    // Queue
    // =========================================================================

    /// Enqueue a typed job. Deduplicates against any non-terminal entry
    /// sharing the same fingerprint (meeting_id / matter_id); returns the
    /// new entry id, or None when an equivalent job is already queued or
    /// in flight.
    pub fn enqueue(&self, payload: &JobPayload) -> Result<Option<String>, DbError> {
        self.with_transaction(|store| {
            let fingerprint = payload.fingerprint();
            let existing: Option<String> = store
                .conn
                .query_row(
                    "SELECT id FROM queue
                     WHERE fingerprint = ?1 AND status IN ('pending', 'claimed')
                     LIMIT 1",
                    params![fingerprint],
                    |row| row.get(0),
                )
                .optional()?;
            if let Some(id) = existing {
                log::debug!("Queue: deduped {fingerprint} against {id}");
                return Ok(None);
            }

            let id = uuid::Uuid::new_v4().to_string();
            store.conn.execute(
                "INSERT INTO queue (id, job_type, payload, fingerprint, status, attempts, created_at)
                 VALUES (?1, ?2, ?3, ?4, 'pending', 0, ?5)",
                params![
                    id,
                    payload.job_type().as_str(),
                    payload.to_json(),
                    fingerprint,
                    now_str()
                ],
            )?;
            log::info!("Queue: enqueued {} job {fingerprint}", payload.job_type().as_str());
            Ok(Some(id))
        })
    }

    /// Atomically claim up to `limit` pending entries, oldest first (ties
    /// broken by id). Legacy rows with missing or unparseable typed fields
    /// are failed in place with a clear reason and never handed to workers.
    pub fn claim(&self, limit: usize) -> Result<Vec<ClaimedJob>, DbError> {
        self.with_transaction(|store| {
            let mut stmt = store.conn.prepare(
                "SELECT id, job_type, payload, attempts, created_at FROM queue
                 WHERE status = 'pending'
                 ORDER BY created_at, id
                 LIMIT ?1",
            )?;
            let rows: Vec<(String, Option<String>, Option<String>, u32, String)> = stmt
                .query_map(params![limit as i64], |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                    ))
                })?
                .collect::<Result<_, _>>()?;
            drop(stmt);

            let now = now_str();
            let mut claimed = Vec::with_capacity(rows.len());
            for (id, job_type, payload_json, attempts, created_at) in rows {
                let payload = job_type
                    .as_deref()
                    .and_then(|t| JobType::from_str(t).ok())
                    .zip(payload_json.as_deref())
                    .and_then(|(t, json)| JobPayload::from_parts(t, json).ok());

                match payload {
                    Some(payload) => {
                        store.conn.execute(
                            "UPDATE queue SET status = 'claimed', claimed_at = ?2 WHERE id = ?1",
                            params![id, now],
                        )?;
                        claimed.push(ClaimedJob {
                            id,
                            payload,
                            attempts,
                            created_at,
                        });
                    }
                    None => {
                        log::warn!("Queue: failing legacy entry {id}: {CORRUPT_PAYLOAD_REASON}");
                        store.conn.execute(
                            "UPDATE queue SET status = 'failed', last_error = ?2 WHERE id = ?1",
                            params![id, CORRUPT_PAYLOAD_REASON],
                        )?;
                    }
                }
            }
            Ok(claimed)
        })
    }

    /// Mark an entry completed. Idempotent: completing a completed entry
    /// is a no-op.
    pub fn complete(&self, id: &str) -> Result<(), DbError> {
        self.conn.execute(
            "UPDATE queue SET status = 'completed', last_error = NULL WHERE id = ?1",
            params![id],
        )?;
        Ok(())
    }

    /// Record a failure. Retryable failures requeue as pending until
    /// `max_attempts`, then the entry terminally fails.
    pub fn fail(
        &self,
        id: &str,
        error: &str,
        retryable: bool,
        max_attempts: u32,
    ) -> Result<(), DbError> {
        self.with_transaction(|store| {
            let attempts: Option<u32> = store
                .conn
                .query_row(
                    "SELECT attempts FROM queue WHERE id = ?1",
                    params![id],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(attempts) = attempts else {
                return Ok(());
            };

            let attempts = attempts + 1;
            let requeue = retryable && attempts < max_attempts;
            let status = if requeue { "pending" } else { "failed" };
            store.conn.execute(
                "UPDATE queue
                 SET status = ?2, attempts = ?3, last_error = ?4, claimed_at = NULL
                 WHERE id = ?1",
                params![id, status, attempts, error],
            )?;
            if requeue {
                log::warn!("Queue: requeued {id} after attempt {attempts}: {error}");
            } else {
                log::warn!("Queue: terminally failed {id} after {attempts} attempts: {error}");
            }
            Ok(())
        })
    }

    /// Return expired claims to pending. Called at startup and on every
    /// conductor tick; makes interrupted workers harmless.
    pub fn recover_leases(&self, lease_seconds: i64) -> Result<usize, DbError> {
        let cutoff = ago_str(lease_seconds);
        let recovered = self.conn.execute(
            "UPDATE queue SET status = 'pending', claimed_at = NULL
             WHERE status = 'claimed' AND claimed_at < ?1",
            params![cutoff],
        )?;
        if recovered > 0 {
            log::info!("Queue: recovered {recovered} expired leases");
        }
        Ok(recovered)
    }

    /// Status counts across the queue.
    pub fn queue_stats(&self) -> Result<QueueStats, DbError> {
        let mut stmt = self
            .conn
            .prepare("SELECT status, COUNT(*) FROM queue GROUP BY status")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, u64>(1)?))
        })?;

        let mut stats = QueueStats::default();
        for row in rows {
            let (status, count) = row?;
            match status.as_str() {
                "pending" => stats.pending = count,
                "claimed" => stats.claimed = count,
                "completed" => stats.completed = count,
                "failed" => stats.failed = count,
                _ => {}
            }
        }
        Ok(stats)
    }

    /// Per-city status counts for meeting jobs (joined through the
    /// fingerprint, which is the meeting id).
    pub fn queue_stats_by_city(&self) -> Result<HashMap<String, QueueStats>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT m.banana, q.status, COUNT(*)
             FROM queue q
             JOIN meetings m ON q.fingerprint = m.id
             GROUP BY m.banana, q.status",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, u64>(2)?,
            ))
        })?;

        let mut breakdown: HashMap<String, QueueStats> = HashMap::new();
        for row in rows {
            let (banana, status, count) = row?;
            let stats = breakdown.entry(banana).or_default();
            match status.as_str() {
                "pending" => stats.pending = count,
                "claimed" => stats.claimed = count,
                "completed" => stats.completed = count,
                "failed" => stats.failed = count,
                _ => {}
            }
        }
        Ok(breakdown)
    }

    /// Delete queue entries by status, or all of them.
    pub fn reset_queue(&self, status: Option<QueueStatus>) -> Result<usize, DbError> {
        let deleted = match status {
            Some(status) => self.conn.execute(
                "DELETE FROM queue WHERE status = ?1",
                params![status.as_str()],
            )?,
            None => self.conn.execute("DELETE FROM queue", [])?,
        };
        Ok(deleted)
    }

    /// Garbage-collect terminal entries past the retention window.
    pub fn gc_queue(&self, retention_days: i64) -> Result<usize, DbError> {
        let cutoff = ago_str(retention_days * 24 * 3600);
        let deleted = self.conn.execute(
            "DELETE FROM queue
             WHERE status IN ('completed', 'failed') AND created_at < ?1",
            params![cutoff],
        )?;
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meeting_job(meeting: &str) -> JobPayload {
        JobPayload::Meeting(MeetingJob {
            meeting_id: meeting.to_string(),
            source_url: format!("https://example.com/{meeting}.pdf"),
        })
    }

    #[test]
    fn test_enqueue_dedups_non_terminal() {
        let store = Store::open_in_memory().unwrap();
        let first = store.enqueue(&meeting_job("meeting:paloaltoCA:1")).unwrap();
        assert!(first.is_some());
        // Same fingerprint while pending → deduped
        assert!(store.enqueue(&meeting_job("meeting:paloaltoCA:1")).unwrap().is_none());

        // Still deduped while claimed
        let claimed = store.claim(10).unwrap();
        assert_eq!(claimed.len(), 1);
        assert!(store.enqueue(&meeting_job("meeting:paloaltoCA:1")).unwrap().is_none());

        // After completion a fresh job is accepted
        store.complete(&claimed[0].id).unwrap();
        assert!(store.enqueue(&meeting_job("meeting:paloaltoCA:1")).unwrap().is_some());
    }

    #[test]
    fn test_claim_is_oldest_first() {
        let store = Store::open_in_memory().unwrap();
        for n in 0..3 {
            store.enqueue(&meeting_job(&format!("meeting:xCA:{n}"))).unwrap();
            // created_at has millisecond precision; space the rows out.
            std::thread::sleep(std::time::Duration::from_millis(3));
        }

        let claimed = store.claim(2).unwrap();
        assert_eq!(claimed.len(), 2);
        assert_eq!(claimed[0].payload.fingerprint(), "meeting:xCA:0");
        assert_eq!(claimed[1].payload.fingerprint(), "meeting:xCA:1");

        // The third is still pending
        let stats = store.queue_stats().unwrap();
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.claimed, 2);
    }

    #[test]
    fn test_legacy_rows_fail_with_clear_reason() {
        let store = Store::open_in_memory().unwrap();
        // A pre-typed row: no job_type, no payload.
        store
            .conn_ref()
            .execute(
                "INSERT INTO queue (id, status, attempts, created_at)
                 VALUES ('legacy-1', 'pending', 0, '2024-01-01T00:00:00.000Z')",
                [],
            )
            .unwrap();
        store.enqueue(&meeting_job("meeting:xCA:5")).unwrap();

        let claimed = store.claim(10).unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].payload.fingerprint(), "meeting:xCA:5");

        let (status, error): (String, String) = store
            .conn_ref()
            .query_row(
                "SELECT status, last_error FROM queue WHERE id = 'legacy-1'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(status, "failed");
        assert_eq!(error, CORRUPT_PAYLOAD_REASON);
    }

    #[test]
    fn test_retryable_failures_requeue_until_max() {
        let store = Store::open_in_memory().unwrap();
        store.enqueue(&meeting_job("meeting:xCA:9")).unwrap();

        for attempt in 1..=3u32 {
            let claimed = store.claim(1).unwrap();
            assert_eq!(claimed.len(), 1, "attempt {attempt} should find the job");
            assert_eq!(claimed[0].attempts, attempt - 1);
            store
                .fail(&claimed[0].id, "HTTP 503 from vendor", true, 3)
                .unwrap();
        }

        // Third failure is terminal
        assert!(store.claim(1).unwrap().is_empty());
        let stats = store.queue_stats().unwrap();
        assert_eq!(stats.failed, 1);
    }

    #[test]
    fn test_non_retryable_failure_is_terminal_immediately() {
        let store = Store::open_in_memory().unwrap();
        store.enqueue(&meeting_job("meeting:xCA:11")).unwrap();
        let claimed = store.claim(1).unwrap();
        store
            .fail(&claimed[0].id, "extraction_failed: no text", false, 3)
            .unwrap();

        assert!(store.claim(1).unwrap().is_empty());
        assert_eq!(store.queue_stats().unwrap().failed, 1);
    }

    #[test]
    fn test_recover_leases() {
        let store = Store::open_in_memory().unwrap();
        store.enqueue(&meeting_job("meeting:xCA:7")).unwrap();
        let claimed = store.claim(1).unwrap();
        assert_eq!(claimed.len(), 1);

        // Fresh lease → untouched
        assert_eq!(store.recover_leases(900).unwrap(), 0);

        // Backdate the claim beyond the lease
        store
            .conn_ref()
            .execute(
                "UPDATE queue SET claimed_at = '2020-01-01T00:00:00.000Z' WHERE id = ?1",
                params![claimed[0].id],
            )
            .unwrap();
        assert_eq!(store.recover_leases(900).unwrap(), 1);

        // No claimed entry older than the lease remains
        let stale: i64 = store
            .conn_ref()
            .query_row(
                "SELECT COUNT(*) FROM queue WHERE status = 'claimed'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(stale, 0);
        assert_eq!(store.claim(1).unwrap().len(), 1);
    }

    #[test]
    fn test_complete_is_idempotent() {
        let store = Store::open_in_memory().unwrap();
        store.enqueue(&meeting_job("meeting:xCA:3")).unwrap();
        let claimed = store.claim(1).unwrap();
        store.complete(&claimed[0].id).unwrap();
        store.complete(&claimed[0].id).unwrap();
        let stats = store.queue_stats().unwrap();
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.total(), 1);
    }

    #[test]
    fn test_reset_by_status() {
        let store = Store::open_in_memory().unwrap();
        store.enqueue(&meeting_job("meeting:xCA:1")).unwrap();
        store.enqueue(&meeting_job("meeting:xCA:2")).unwrap();
        let claimed = store.claim(1).unwrap();
        store.fail(&claimed[0].id, "boom", false, 3).unwrap();

        assert_eq!(store.reset_queue(Some(QueueStatus::Failed)).unwrap(), 1);
        assert_eq!(store.reset_queue(None).unwrap(), 1);
        assert_eq!(store.queue_stats().unwrap().total(), 0);
    }

    #[test]
    fn test_gc_removes_only_old_terminal_rows() {
        let store = Store::open_in_memory().unwrap();
        store.enqueue(&meeting_job("meeting:xCA:1")).unwrap();
        let claimed = store.claim(1).unwrap();
        store.complete(&claimed[0].id).unwrap();

        // Fresh terminal row survives
        assert_eq!(store.gc_queue(30).unwrap(), 0);

        store
            .conn_ref()
            .execute(
                "UPDATE queue SET created_at = '2020-01-01T00:00:00.000Z'",
                [],
            )
            .unwrap();
        assert_eq!(store.gc_queue(30).unwrap(), 1);
    }

    #[test]
    fn test_matter_job_roundtrip() {
        let store = Store::open_in_memory().unwrap();
        let payload = JobPayload::Matter(MatterJob {
            matter_id: "matter:chicagoIL:O2025-0019668".to_string(),
            meeting_id: "meeting:chicagoIL:4".to_string(),
            item_ids: vec!["item:meeting:chicagoIL:4:1".to_string()],
        });
        store.enqueue(&payload).unwrap();

        let claimed = store.claim(1).unwrap();
        assert_eq!(claimed[0].payload, payload);
    }
}
