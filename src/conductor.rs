//! The conductor: polls vendor adapters, keeps the store current, and
//! drives the worker pool through the queue.
//!
//! Each tick: poll every active city, enqueue a meeting job per new or
//! changed meeting, recover expired leases, then drain the queue onto the
//! bounded worker pool. Workers never block the poll loop: the loop only
//! claims as many jobs as there are free worker slots, and interrupted
//! workers are harmless because lease recovery requeues their claims.

use std::sync::Arc;

use tokio::sync::{Notify, Semaphore};

use crate::config::Config;
use crate::db::{ClaimedJob, JobPayload, MeetingJob, SharedStore};
use crate::processor::Processor;
use crate::types::ProcessingStatus;
use crate::vendors::{make_adapter, AdapterContext};

pub struct Conductor {
    store: SharedStore,
    processor: Arc<Processor>,
    adapter_ctx: AdapterContext,
    config: Arc<Config>,
    workers: Arc<Semaphore>,
    shutdown: Arc<Notify>,
}

impl Conductor {
    pub fn new(
        store: SharedStore,
        processor: Arc<Processor>,
        adapter_ctx: AdapterContext,
        config: Arc<Config>,
    ) -> Self {
        let workers = Arc::new(Semaphore::new(config.worker_count));
        Self {
            store,
            processor,
            adapter_ctx,
            config,
            workers,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Handle for signaling shutdown from outside the run loop.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run until shutdown is signaled. Startup recovers leases left over
    /// from a previous process; in-flight workers are drained before
    /// returning.
    pub async fn run(&self) {
        {
            let store = self.store.lock();
            if let Err(e) = store.recover_leases(self.config.lease_seconds) {
                log::error!("Conductor: startup lease recovery failed: {e}");
            }
        }

        log::info!(
            "Conductor: started (poll every {}s, {} workers)",
            self.config.poll_interval_seconds,
            self.config.worker_count
        );

        loop {
            self.tick().await;

            tokio::select! {
                _ = tokio::time::sleep(std::time::Duration::from_secs(
                    self.config.poll_interval_seconds,
                )) => {}
                _ = self.shutdown.notified() => {
                    log::info!("Conductor: shutdown requested, draining workers");
                    break;
                }
            }
        }

        // Wait for every worker slot to free up: current jobs finish, and
        // anything still queued is picked up on the next startup.
        let _ = self
            .workers
            .acquire_many(self.config.worker_count as u32)
            .await;
        log::info!("Conductor: stopped");
    }

    /// One poll cycle: POLLING → ENQUEUEING → DISPATCHING.
    pub async fn tick(&self) {
        self.poll_cities().await;

        {
            let store = self.store.lock();
            if let Err(e) = store.recover_leases(self.config.lease_seconds) {
                log::error!("Conductor: lease recovery failed: {e}");
            }
            if let Err(e) = store.gc_queue(self.config.queue_retention_days) {
                log::error!("Conductor: queue GC failed: {e}");
            }
        }

        self.dispatch().await;
    }

    /// Poll every active city and enqueue new or changed meetings. An
    /// adapter failure skips that city for the cycle, never the loop.
    async fn poll_cities(&self) {
        let cities = {
            let store = self.store.lock();
            match store.list_active_cities() {
                Ok(cities) => cities,
                Err(e) => {
                    log::error!("Conductor: failed to list cities: {e}");
                    return;
                }
            }
        };

        for city in cities {
            self.poll_city(&city).await;
        }
    }

    /// Poll a single city: list upcoming meetings, upsert, enqueue deltas.
    async fn poll_city(&self, city: &crate::db::City) {
        let token = self.config.legistar_tokens.get(&city.slug).cloned();
        let adapter = match make_adapter(city, self.adapter_ctx.clone(), token) {
            Ok(adapter) => adapter,
            Err(e) => {
                log::warn!("Conductor: skipping {}: {e}", city.banana);
                return;
            }
        };

        let meetings = match adapter.upcoming_meetings().await {
            Ok(meetings) => meetings,
            Err(e) => {
                log::warn!("Conductor: skipping {} this cycle: {e}", city.banana);
                return;
            }
        };

        let deltas = {
            let store = self.store.lock();
            match store.upsert_meetings(&city.banana, &meetings) {
                Ok(deltas) => deltas,
                Err(e) => {
                    log::error!("Conductor: upsert failed for {}: {e}", city.banana);
                    return;
                }
            }
        };

        let mut enqueued = 0usize;
        for delta in deltas.iter().filter(|d| d.changed) {
            let payload = JobPayload::Meeting(MeetingJob {
                meeting_id: delta.meeting_id.clone(),
                source_url: delta.source_url.clone(),
            });
            let store = self.store.lock();
            match store.enqueue(&payload) {
                Ok(Some(_)) => enqueued += 1,
                Ok(None) => {}
                Err(e) => log::error!("Conductor: enqueue failed for {}: {e}", delta.meeting_id),
            }
        }

        log::info!(
            "Conductor: {}: {} upcoming, {} enqueued",
            city.banana,
            deltas.len(),
            enqueued
        );
    }

    /// One cycle restricted to a single city, for the CLI's one-shot poll.
    pub async fn tick_city(&self, banana: &str) -> Result<(), String> {
        let city = {
            let store = self.store.lock();
            store.get_city(banana).map_err(|e| e.to_string())?
        }
        .ok_or_else(|| format!("unknown city: {banana}"))?;

        self.poll_city(&city).await;

        {
            let store = self.store.lock();
            if let Err(e) = store.recover_leases(self.config.lease_seconds) {
                log::error!("Conductor: lease recovery failed: {e}");
            }
        }
        self.dispatch().await;
        Ok(())
    }

    /// Claim up to the free worker capacity and spawn a worker per job.
    async fn dispatch(&self) {
        loop {
            let free = self.workers.available_permits();
            if free == 0 {
                return;
            }

            let jobs = {
                let store = self.store.lock();
                match store.claim(free) {
                    Ok(jobs) => jobs,
                    Err(e) => {
                        log::error!("Conductor: claim failed: {e}");
                        return;
                    }
                }
            };
            if jobs.is_empty() {
                return;
            }

            for job in jobs {
                let Ok(permit) = self.workers.clone().acquire_owned().await else {
                    return;
                };
                let processor = self.processor.clone();
                let store = self.store.clone();
                let max_attempts = self.config.max_attempts;
                tokio::spawn(async move {
                    let _permit = permit;
                    run_worker(processor, store, job, max_attempts).await;
                });
            }
        }
    }
}

/// Process one claimed job and report the outcome back through the queue.
async fn run_worker(
    processor: Arc<Processor>,
    store: SharedStore,
    job: ClaimedJob,
    max_attempts: u32,
) {
    let fingerprint = job.payload.fingerprint().to_string();
    match processor.process(&job).await {
        Ok(()) => {
            let store = store.lock();
            if let Err(e) = store.complete(&job.id) {
                log::error!("Worker: complete({}) failed: {e}", job.id);
            }
            log::info!("Worker: completed {fingerprint}");
        }
        Err(err) => {
            let retryable = err.is_retryable();
            let message = format!("{}: {err}", err.category());
            let store = store.lock();
            if let Err(e) = store.fail(&job.id, &message, retryable, max_attempts) {
                log::error!("Worker: fail({}) failed: {e}", job.id);
                return;
            }

            // Mirror the queue outcome onto the meeting row: terminal
            // failure surfaces as failed, a requeue goes back to pending.
            if let JobPayload::Meeting(meeting_job) = &job.payload {
                let terminal = store
                    .conn_ref()
                    .query_row(
                        "SELECT status FROM queue WHERE id = ?1",
                        rusqlite::params![job.id],
                        |row| row.get::<_, String>(0),
                    )
                    .map(|status| status == "failed")
                    .unwrap_or(false);
                let status = if terminal {
                    ProcessingStatus::Failed
                } else {
                    ProcessingStatus::Pending
                };
                let _ = store.set_processing_status(&meeting_job.meeting_id, status);
            }
        }
    }
}
