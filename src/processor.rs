//! Job processing: turn a claimed queue entry into a stored summary.
//!
//! Three phases per job, with the store lock held only around the short
//! read/write phases, never across network or LLM calls:
//! 1. gather rows from the store
//! 2. fetch, extract, and summarize (slow, no locks)
//! 3. write results back
//!
//! Meeting jobs branch on their source: a monolithic packet PDF, an HTML
//! agenda delegated back to the vendor adapter, or the synthetic
//! `items://` URL for meetings whose items are already persisted.

use std::sync::Arc;

use crate::config::Config;
use crate::db::{
    AttachmentRow, ClaimedJob, ItemRow, JobPayload, MatterJob, MeetingJob, MeetingRow,
    SharedStore,
};
use crate::error::PipelineError;
use crate::extract::{Extraction, TextExtractor};
use crate::fetch::HttpFetcher;
use crate::pdf_chunker::{
    chunk_prompt_prefix, combine_chunk_summaries, estimate_chunk_tokens, PdfChunker,
};
use crate::summarize::{prompts, SummaryProvider};
use crate::types::{parse_items_url, AgendaDetail, ProcessingStatus};
use crate::vendors::{make_adapter, AdapterContext};

/// Attachments above this size are refused outright; packets have no cap
/// because the chunker handles them.
const MAX_ATTACHMENT_BYTES: usize = 100 * 1024 * 1024;

/// How a meeting job's source URL is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SourceKind {
    /// Load persisted items and process their attachments.
    StoredItems,
    /// Download and summarize one monolithic PDF.
    Packet,
    /// Delegate to the adapter's agenda parser, then process items.
    Agenda,
}

fn source_kind(source_url: &str, row: &MeetingRow) -> SourceKind {
    if parse_items_url(source_url).is_some() {
        SourceKind::StoredItems
    } else if source_url.to_lowercase().ends_with(".pdf")
        || row.packet_url.as_deref() == Some(source_url)
    {
        SourceKind::Packet
    } else {
        SourceKind::Agenda
    }
}

pub struct Processor {
    store: SharedStore,
    fetcher: Arc<HttpFetcher>,
    adapter_ctx: AdapterContext,
    chunker: PdfChunker,
    provider: Arc<dyn SummaryProvider>,
    primary: Arc<dyn TextExtractor>,
    fallback: Option<Arc<dyn TextExtractor>>,
    config: Arc<Config>,
}

impl Processor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: SharedStore,
        fetcher: Arc<HttpFetcher>,
        adapter_ctx: AdapterContext,
        provider: Arc<dyn SummaryProvider>,
        primary: Arc<dyn TextExtractor>,
        fallback: Option<Arc<dyn TextExtractor>>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            store,
            fetcher,
            adapter_ctx,
            chunker: PdfChunker::new(&config.chunking),
            provider,
            primary,
            fallback,
            config,
        }
    }

    /// Run one claimed job to completion. The caller (conductor worker)
    /// translates the result into `Queue::complete` / `Queue::fail`.
    pub async fn process(&self, job: &ClaimedJob) -> Result<(), PipelineError> {
        match &job.payload {
            JobPayload::Meeting(meeting_job) => self.process_meeting(meeting_job).await,
            JobPayload::Matter(matter_job) => self.process_matter(matter_job).await,
        }
    }

    // -----------------------------------------------------------------------
    // Meeting jobs
    // -----------------------------------------------------------------------

    async fn process_meeting(&self, job: &MeetingJob) -> Result<(), PipelineError> {
        let meeting = {
            let store = self.store.lock();
            store.get_meeting(&job.meeting_id)?
        }
        .ok_or_else(|| PipelineError::MeetingNotFound(job.meeting_id.clone()))?;

        {
            let store = self.store.lock();
            store.set_processing_status(&meeting.id, ProcessingStatus::Running)?;
        }
        log::info!(
            "Processor: meeting {} via {}",
            meeting.id,
            job.source_url
        );

        match source_kind(&job.source_url, &meeting) {
            SourceKind::Packet => self.process_packet(&meeting, &job.source_url).await,
            SourceKind::Agenda => self.process_agenda(&meeting).await,
            SourceKind::StoredItems => self.process_stored_items(&meeting).await,
        }
    }

    /// Monolithic packet: download, chunk if oversized, extract, summarize.
    async fn process_packet(
        &self,
        meeting: &MeetingRow,
        packet_url: &str,
    ) -> Result<(), PipelineError> {
        let city_name = self.city_name(&meeting.banana)?;
        let bytes = self.fetcher.download(packet_url, None).await?;

        let (summary_raw, method) = if self.chunker.needs_chunking(&bytes)? {
            let chunks = self.chunker.split(&bytes)?;
            let mut summaries = Vec::with_capacity(chunks.len());
            let mut method = "pdf_text";
            for chunk in &chunks {
                log::debug!(
                    "Processor: chunk {}/{} (~{} tokens)",
                    chunk.chunk_number + 1,
                    chunk.total_chunks,
                    estimate_chunk_tokens(chunk)
                );
                let extraction = self.extract(chunk.content.clone()).await?;
                method = extraction.method;
                let prompt = prompts::meeting_prompt(
                    &city_name,
                    &meeting.title,
                    &chunk_prompt_prefix(chunk),
                    &extraction.text,
                );
                summaries.push(self.provider.complete(&prompt).await?);
            }
            (combine_chunk_summaries(&summaries, &chunks), method)
        } else {
            let extraction = self.extract(bytes).await?;
            let prompt =
                prompts::meeting_prompt(&city_name, &meeting.title, "", &extraction.text);
            (self.provider.complete(&prompt).await?, extraction.method)
        };

        let (summary, topics) = prompts::parse_summary_response(&summary_raw);
        let store = self.store.lock();
        store.record_summary(&meeting.id, &summary, &topics, method)?;
        Ok(())
    }

    /// HTML agenda: let the vendor adapter parse it, persist the item set,
    /// then process the items.
    async fn process_agenda(&self, meeting: &MeetingRow) -> Result<(), PipelineError> {
        let city = {
            let store = self.store.lock();
            store.get_city(&meeting.banana)?
        }
        .ok_or_else(|| PipelineError::MeetingNotFound(meeting.banana.clone()))?;

        let token = self.config.legistar_tokens.get(&city.slug).cloned();
        let adapter = make_adapter(&city, self.adapter_ctx.clone(), token)?;
        let detail = adapter.fetch_agenda(meeting).await?;

        let Some(detail) = detail else {
            // The adapter says this meeting is monolithic after all; the
            // packet path will pick it up on the next poll.
            log::warn!(
                "Processor: adapter returned no agenda detail for {}",
                meeting.id
            );
            return Err(PipelineError::ExtractionFailed(
                "agenda page yielded no items".to_string(),
            ));
        };

        let matter_jobs = {
            let store = self.store.lock();
            persist_agenda_detail(&store, meeting, &detail)?
        };

        self.process_stored_items(meeting).await?;

        // Matter histories build on the item summaries written above, so
        // the jobs enter the queue only once those summaries exist.
        for payload in matter_jobs {
            let store = self.store.lock();
            store.enqueue(&payload)?;
        }
        Ok(())
    }

    /// Items already persisted (the `items://` path, and the tail of the
    /// agenda path). Items that still carry a summary from a previous pass
    /// are reused; only new or replaced items hit the network.
    async fn process_stored_items(&self, meeting: &MeetingRow) -> Result<(), PipelineError> {
        let city_name = self.city_name(&meeting.banana)?;
        let items = {
            let store = self.store.lock();
            store.get_items_with_attachments(&meeting.id)?
        };

        let mut sections = Vec::new();
        let mut method = "pdf_text";
        for (item, attachments) in &items {
            if let Some(existing) = &item.summary {
                sections.push(format!("{}: {existing}", item.title));
                continue;
            }

            let Some(summary) = self
                .summarize_item(&city_name, item, attachments, &mut method)
                .await?
            else {
                continue;
            };
            {
                let store = self.store.lock();
                store.set_item_summary(&item.id, &summary)?;
            }
            sections.push(format!("{}: {summary}", item.title));
        }

        if sections.is_empty() {
            return Err(PipelineError::ExtractionFailed(
                "no item produced extractable text".to_string(),
            ));
        }

        // Aggregate the per-item notes into one meeting-level summary.
        let digest = sections.join("\n\n");
        let prompt = prompts::meeting_prompt(&city_name, &meeting.title, "", &digest);
        let response = self.provider.complete(&prompt).await?;
        let (summary, topics) = prompts::parse_summary_response(&response);

        let store = self.store.lock();
        store.record_summary(&meeting.id, &summary, &topics, method)?;
        Ok(())
    }

    /// Summarize one item from its attachments. Returns None when the item
    /// has no processable attachment (procedural items routinely have none).
    async fn summarize_item(
        &self,
        city_name: &str,
        item: &ItemRow,
        attachments: &[AttachmentRow],
        method: &mut &'static str,
    ) -> Result<Option<String>, PipelineError> {
        let mut parts = Vec::new();
        for attachment in attachments {
            let bytes = match self
                .fetcher
                .download(&attachment.url, Some(MAX_ATTACHMENT_BYTES))
                .await
            {
                Ok(bytes) => bytes,
                Err(e) if !e.is_transient() => {
                    log::warn!(
                        "Processor: skipping attachment {} ({e})",
                        attachment.url
                    );
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let extraction = match self.extract(bytes).await {
                Ok(extraction) => extraction,
                Err(e) => {
                    log::warn!(
                        "Processor: attachment {} not extractable ({e}), skipping",
                        attachment.name
                    );
                    continue;
                }
            };
            *method = extraction.method;

            let prompt =
                prompts::item_prompt(city_name, &item.title, &attachment.name, &extraction.text);
            parts.push(self.provider.complete(&prompt).await?);
        }

        if parts.is_empty() {
            return Ok(None);
        }
        Ok(Some(parts.join("\n\n")))
    }

    // -----------------------------------------------------------------------
    // Matter jobs
    // -----------------------------------------------------------------------

    async fn process_matter(&self, job: &MatterJob) -> Result<(), PipelineError> {
        let (matter, sections, city_name) = {
            let store = self.store.lock();
            let matter = store
                .get_matter(&job.matter_id)?
                .ok_or_else(|| PipelineError::MatterNotFound(job.matter_id.clone()))?;
            let city_name = store
                .get_city(&matter.banana)?
                .map(|c| c.name)
                .unwrap_or_else(|| matter.banana.clone());
            let sections = matter_sections(&store, &job.item_ids)?;
            (matter, sections, city_name)
        };

        if sections.is_empty() {
            // The item summaries this history builds on haven't landed
            // yet (or were cleared by an agenda re-fetch); retry rather
            // than commit a title-only summary.
            return Err(PipelineError::MatterNotReady(job.matter_id.clone()));
        }

        let prompt = prompts::matter_prompt(
            &city_name,
            &matter.matter_number,
            &matter.title,
            &sections,
        );
        let response = self.provider.complete(&prompt).await?;
        let (summary, _topics) = prompts::parse_summary_response(&response);

        let store = self.store.lock();
        store.record_matter_summary(&matter.id, &summary)?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Shared helpers
    // -----------------------------------------------------------------------

    fn city_name(&self, banana: &str) -> Result<String, PipelineError> {
        let store = self.store.lock();
        Ok(store
            .get_city(banana)?
            .map(|c| c.name)
            .unwrap_or_else(|| banana.to_string()))
    }

    /// Run the primary extractor on a blocking thread; on failure, try the
    /// configured fallback exactly once. Still-empty text is terminal.
    async fn extract(&self, bytes: Vec<u8>) -> Result<Extraction, PipelineError> {
        // The fallback needs its own copy; only pay for it when one exists.
        let fallback_bytes = self.fallback.as_ref().map(|_| bytes.clone());

        let primary = self.primary.clone();
        let first = tokio::task::spawn_blocking(move || primary.extract(&bytes))
            .await
            .map_err(|e| PipelineError::ExtractionFailed(e.to_string()))?;

        let primary_err = match first {
            Ok(extraction) => return Ok(extraction),
            Err(e) => e,
        };

        let (Some(fallback), Some(bytes)) = (self.fallback.clone(), fallback_bytes) else {
            return Err(PipelineError::ExtractionFailed(primary_err.to_string()));
        };
        log::warn!(
            "Processor: {} failed ({primary_err}), trying {}",
            self.primary.name(),
            fallback.name()
        );
        let second = tokio::task::spawn_blocking(move || fallback.extract(&bytes))
            .await
            .map_err(|e| PipelineError::ExtractionFailed(e.to_string()))?;
        second.map_err(|e| {
            PipelineError::ExtractionFailed(format!("{primary_err}; fallback: {e}"))
        })
    }
}

/// Persist an agenda detail: replace the item set, store participation,
/// and return the matter jobs to enqueue. Pure store work, testable
/// without any network.
pub(crate) fn persist_agenda_detail(
    store: &crate::db::Store,
    meeting: &MeetingRow,
    detail: &AgendaDetail,
) -> Result<Vec<JobPayload>, crate::db::DbError> {
    store.upsert_items_and_attachments(&meeting.id, &detail.items)?;

    if let Some(participation) = &detail.participation {
        store.set_participation(&meeting.id, participation)?;
    }

    let mut matter_jobs = Vec::new();
    for item in &detail.items {
        let Some(number) = item.matter_number.as_deref() else {
            continue;
        };
        let matter_id = store.upsert_matter(&meeting.banana, number, &item.title)?;
        let item_id = crate::types::item_id(&meeting.id, &item.vendor_item_id);
        store.record_matter_appearance(&matter_id, &meeting.id, &item_id)?;

        let item_ids = store.matter_item_ids(&matter_id)?;
        matter_jobs.push(JobPayload::Matter(MatterJob {
            matter_id,
            meeting_id: meeting.id.clone(),
            item_ids,
        }));
    }
    Ok(matter_jobs)
}

/// Appearance sections for a matter prompt. Only items that already carry
/// a summary contribute; a bare title says nothing about what happened at
/// that appearance, so title-only items are left out entirely.
fn matter_sections(
    store: &crate::db::Store,
    item_ids: &[String],
) -> Result<Vec<String>, crate::db::DbError> {
    let mut sections = Vec::new();
    for item_id in item_ids {
        let row = store.conn_ref().query_row(
            "SELECT title, summary FROM items WHERE id = ?1",
            rusqlite::params![item_id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                ))
            },
        );
        match row {
            Ok((title, Some(summary))) => sections.push(format!("{title}\n{summary}")),
            Ok((_, None)) => continue,
            Err(rusqlite::Error::QueryReturnedNoRows) => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(sections)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{City, CityStatus, Store};
    use crate::types::{
        AgendaItem, AttachmentRef, MeetingSource, NormalizedMeeting, Vendor,
    };
    use chrono::{TimeZone, Utc};

    fn meeting_row(packet: Option<&str>, agenda: Option<&str>) -> MeetingRow {
        MeetingRow {
            id: "meeting:paloaltoCA:42".to_string(),
            banana: "paloaltoCA".to_string(),
            vendor_meeting_id: "42".to_string(),
            title: "City Council".to_string(),
            start_ts: "2025-11-20T19:00:00Z".to_string(),
            packet_url: packet.map(String::from),
            agenda_url: agenda.map(String::from),
            processing_status: crate::types::ProcessingStatus::Pending,
            summary: None,
            topics: None,
            extraction_method: None,
            participation: None,
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    #[test]
    fn test_source_kind_items_url() {
        let row = meeting_row(None, Some("https://x/Portal/Meeting/42"));
        assert_eq!(
            source_kind("items://meeting:paloaltoCA:42", &row),
            SourceKind::StoredItems
        );
    }

    #[test]
    fn test_source_kind_pdf_suffix() {
        let row = meeting_row(None, Some("https://x/agenda"));
        assert_eq!(
            source_kind("https://x/packets/council.PDF", &row),
            SourceKind::Packet
        );
    }

    #[test]
    fn test_source_kind_vendor_marked_packet() {
        // PrimeGov CompiledDocument URLs don't end in .pdf, but the row's
        // packet_url marks them as packets.
        let url = "https://cityofpaloalto.primegov.com/Public/CompiledDocument?meetingTemplateId=42&compileOutputType=1";
        let row = meeting_row(Some(url), None);
        assert_eq!(source_kind(url, &row), SourceKind::Packet);
    }

    #[test]
    fn test_source_kind_agenda_fallback() {
        let row = meeting_row(None, Some("https://x/Portal/Meeting/42"));
        assert_eq!(
            source_kind("https://x/Portal/Meeting/42", &row),
            SourceKind::Agenda
        );
    }

    fn seeded_store() -> (Store, MeetingRow) {
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
            .upsert_meetings(
                "paloaltoCA",
                &[NormalizedMeeting {
                    vendor_meeting_id: "42".to_string(),
                    title: "City Council".to_string(),
                    start: Utc.with_ymd_and_hms(2025, 11, 20, 19, 0, 0).unwrap(),
                    source: MeetingSource::Agenda(
                        "https://cityofpaloalto.primegov.com/Portal/Meeting/42".to_string(),
                    ),
                }],
            )
            .unwrap();
        let row = store.get_meeting("meeting:paloaltoCA:42").unwrap().unwrap();
        (store, row)
    }

    #[test]
    fn test_persist_agenda_detail_creates_matter_jobs() {
        let (store, meeting) = seeded_store();
        let detail = AgendaDetail {
            items: vec![
                AgendaItem {
                    vendor_item_id: "1".to_string(),
                    title: "Zoning ordinance".to_string(),
                    sequence: 1,
                    matter_number: Some("O2025-7".to_string()),
                    attachments: vec![AttachmentRef {
                        name: "Staff Report".to_string(),
                        url: "https://x/report.pdf".to_string(),
                        metadata: serde_json::Value::Null,
                    }],
                },
                AgendaItem {
                    vendor_item_id: "2".to_string(),
                    title: "Proclamation".to_string(),
                    sequence: 2,
                    matter_number: None,
                    attachments: vec![],
                },
            ],
            participation: None,
        };

        let jobs = persist_agenda_detail(&store, &meeting, &detail).unwrap();
        assert_eq!(jobs.len(), 1);
        let JobPayload::Matter(job) = &jobs[0] else {
            panic!("expected matter job");
        };
        assert_eq!(job.matter_id, "matter:paloaltoCA:O2025-7");
        assert_eq!(job.meeting_id, meeting.id);
        assert_eq!(job.item_ids, vec!["item:meeting:paloaltoCA:42:1"]);

        // The matter row and appearance exist
        let matter = store.get_matter("matter:paloaltoCA:O2025-7").unwrap().unwrap();
        assert_eq!(matter.title, "Zoning ordinance");
    }

    #[test]
    fn test_persist_agenda_detail_is_repeatable() {
        let (store, meeting) = seeded_store();
        let detail = AgendaDetail {
            items: vec![AgendaItem {
                vendor_item_id: "1".to_string(),
                title: "Zoning ordinance".to_string(),
                sequence: 1,
                matter_number: Some("O2025-7".to_string()),
                attachments: vec![],
            }],
            participation: None,
        };

        persist_agenda_detail(&store, &meeting, &detail).unwrap();
        persist_agenda_detail(&store, &meeting, &detail).unwrap();

        let items = store.get_items_with_attachments(&meeting.id).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(
            store.matter_item_ids("matter:paloaltoCA:O2025-7").unwrap().len(),
            1
        );
    }

    #[test]
    fn test_matter_sections_require_summaries() {
        let (store, meeting) = seeded_store();
        let detail = AgendaDetail {
            items: vec![AgendaItem {
                vendor_item_id: "1".to_string(),
                title: "Zoning ordinance".to_string(),
                sequence: 1,
                matter_number: Some("O2025-7".to_string()),
                attachments: vec![],
            }],
            participation: None,
        };
        persist_agenda_detail(&store, &meeting, &detail).unwrap();

        // A bare title contributes nothing; the matter job must see an
        // empty section list and defer rather than summarize titles.
        let item_id = "item:meeting:paloaltoCA:42:1";
        let sections = matter_sections(&store, &[item_id.to_string()]).unwrap();
        assert!(sections.is_empty());

        store.set_item_summary(item_id, "First reading passed.").unwrap();
        let sections = matter_sections(&store, &[item_id.to_string()]).unwrap();
        assert_eq!(sections, vec!["Zoning ordinance\nFirst reading passed."]);
    }
}
