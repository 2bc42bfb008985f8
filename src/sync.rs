//! The sync engine: one polling cycle plus the recurring scheduler.
//!
//! A cycle lists every message received inside the lookback window, fetches
//! each one, runs it through decode, extract and classify, drops candidates
//! the store already holds, and writes the rest in one bulk insert.
//!
//! # Single flight
//!
//! [`SyncState`] admits at most one cycle at a time. A trigger that arrives
//! while a cycle is running is skipped, not queued. If the running cycle has
//! been going for longer than the stuck threshold, the trigger force-resets
//! the state and starts a fresh cycle. The wedged cycle keeps running; when
//! it finally finishes it leaves the newer cycle's state alone, and its
//! inserts are harmless because they are keyed by [`DedupKey`].
//!
//! # Scheduling
//!
//! [`SyncEngine::start`] ticks at a fixed rate from loop start, first tick
//! immediately. Each tick spawns its cycle as a separate task so that a hung
//! cycle never blocks the timer, which is what lets the stuck check fire.
//!
//! [`DedupKey`]: crate::record::DedupKey

use crate::classifier::classify;
use crate::config::SyncConfig;
use crate::decoder::decode;
use crate::dedup::filter_new;
use crate::error::{Error, Result};
use crate::extractor::{Extractor, VerificationCodeExtractor};
use crate::mailbox::{list_all_message_ids, MailboxClient, MessageQuery};
use crate::record::{CodeRecord, MessageEnvelope};
use crate::store::CodeStore;
use chrono::{DateTime, Utc};
use futures::{stream, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, info_span, instrument, trace, warn, Instrument};

// ─────────────────────────────────────────────────────────────────────────────
// Cycle state
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct CycleSlot {
    in_progress: bool,
    started_at: Option<Instant>,
    generation: u64,
}

/// Single-flight guard and loop flag for one engine.
#[derive(Debug, Default)]
pub struct SyncState {
    slot: Mutex<CycleSlot>,
    loop_running: AtomicBool,
}

/// Result of asking [`SyncState`] for permission to run a cycle.
#[derive(Debug)]
pub enum Admission<'a> {
    /// No cycle was running; this one may start.
    Start(CycleTicket<'a>),
    /// The running cycle exceeded the stuck threshold and was discarded.
    ForcedReset {
        /// Permission for the replacement cycle.
        ticket: CycleTicket<'a>,
        /// How long the discarded cycle had been running.
        stuck_for: Duration,
    },
    /// A cycle is running and is not yet considered stuck.
    Skip {
        /// How long the current cycle has been running.
        running_for: Duration,
    },
}

/// Proof that a cycle holds the state. Dropping it ends the cycle.
///
/// A ticket whose cycle was force-reset ends nothing: the replacement cycle
/// owns the state by then.
#[derive(Debug)]
#[must_use = "the cycle ends when the ticket is dropped"]
pub struct CycleTicket<'a> {
    state: &'a SyncState,
    generation: u64,
}

impl CycleTicket<'_> {
    /// Monotonic number of this cycle within its engine, starting at 1.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl Drop for CycleTicket<'_> {
    fn drop(&mut self) {
        self.state.finish(self.generation);
    }
}

impl SyncState {
    /// Creates an idle state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self) -> MutexGuard<'_, CycleSlot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Tries to enter `Running` at `now`.
    pub fn try_begin(&self, now: Instant, stuck_threshold: Duration) -> Admission<'_> {
        let mut slot = self.slot();

        let stuck_for = match (slot.in_progress, slot.started_at) {
            (false, _) => None,
            (true, started_at) => {
                let running_for =
                    started_at.map_or(Duration::MAX, |s| now.saturating_duration_since(s));
                if running_for <= stuck_threshold {
                    return Admission::Skip { running_for };
                }
                Some(running_for)
            }
        };

        slot.in_progress = true;
        slot.started_at = Some(now);
        slot.generation += 1;
        let ticket = CycleTicket {
            state: self,
            generation: slot.generation,
        };

        match stuck_for {
            Some(stuck_for) => Admission::ForcedReset { ticket, stuck_for },
            None => Admission::Start(ticket),
        }
    }

    fn finish(&self, generation: u64) {
        let mut slot = self.slot();
        if slot.generation == generation {
            slot.in_progress = false;
            slot.started_at = None;
        } else {
            debug!(
                generation,
                current = slot.generation,
                "Superseded cycle finished, leaving state untouched"
            );
        }
    }

    /// Returns `true` while a cycle holds the state.
    #[must_use]
    pub fn is_in_progress(&self) -> bool {
        self.slot().in_progress
    }

    /// When the current cycle started, if one is running.
    #[must_use]
    pub fn started_at(&self) -> Option<Instant> {
        self.slot().started_at
    }

    /// Returns `true` while the recurring scheduler is active.
    #[must_use]
    pub fn is_loop_running(&self) -> bool {
        self.loop_running.load(Ordering::SeqCst)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Cycle results
// ─────────────────────────────────────────────────────────────────────────────

/// Counters for one completed cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Identifiers returned by the listing.
    pub listed: usize,
    /// Messages fetched and scanned.
    pub scanned: usize,
    /// Messages skipped because the provider timestamp fell before the window.
    pub out_of_window: usize,
    /// Messages that could not be fetched or dated.
    pub failed: usize,
    /// Records built before deduplication.
    pub candidates: usize,
    /// Records written.
    pub inserted: usize,
    /// Records the store rejected as already present.
    pub duplicates: usize,
}

/// How a call to [`SyncEngine::run_cycle`] ended.
#[derive(Debug)]
pub enum CycleOutcome {
    /// The cycle ran to completion.
    Completed(CycleReport),
    /// Another cycle was running; nothing was done.
    Skipped,
    /// Listing or persisting failed; no records from this cycle were written.
    Failed(Error),
}

impl CycleOutcome {
    /// Returns the report if the cycle completed.
    #[must_use]
    pub fn report(&self) -> Option<&CycleReport> {
        match self {
            Self::Completed(report) => Some(report),
            _ => None,
        }
    }
}

fn elapsed_millis(since: Instant) -> u64 {
    u64::try_from(since.elapsed().as_millis()).unwrap_or(u64::MAX)
}

enum MessageOutcome {
    Scanned(Vec<CodeRecord>),
    OutOfWindow,
    Failed,
}

// ─────────────────────────────────────────────────────────────────────────────
// Engine
// ─────────────────────────────────────────────────────────────────────────────

/// Polls a [`MailboxClient`] and persists new codes to a [`CodeStore`].
///
/// ```no_run
/// use code_sync::{ImapConfig, ImapMailbox, MemoryStore, SyncConfig, SyncEngine};
/// use std::sync::Arc;
///
/// # async fn example() -> code_sync::Result<()> {
/// let mailbox = ImapMailbox::new(ImapConfig::from_env()?)?;
/// let engine = Arc::new(SyncEngine::new(
///     SyncConfig::default(),
///     Arc::new(mailbox),
///     Arc::new(MemoryStore::new()),
/// ));
///
/// engine.start();
/// // ...
/// engine.shutdown().await;
/// # Ok(())
/// # }
/// ```
pub struct SyncEngine {
    config: SyncConfig,
    mailbox: Arc<dyn MailboxClient>,
    store: Arc<dyn CodeStore>,
    extractor: Arc<dyn Extractor>,
    state: SyncState,
    scheduler: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("config", &self.config)
            .field("backend", &self.mailbox.backend())
            .field("extractor", &self.extractor.description())
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl SyncEngine {
    /// Creates an engine using the default [`VerificationCodeExtractor`].
    #[must_use]
    pub fn new(
        config: SyncConfig,
        mailbox: Arc<dyn MailboxClient>,
        store: Arc<dyn CodeStore>,
    ) -> Self {
        Self {
            config,
            mailbox,
            store,
            extractor: Arc::new(VerificationCodeExtractor::new()),
            state: SyncState::new(),
            scheduler: Mutex::new(None),
        }
    }

    /// Replaces the extractor.
    #[must_use]
    pub fn with_extractor(mut self, extractor: Arc<dyn Extractor>) -> Self {
        self.extractor = extractor;
        self
    }

    /// Returns the engine's configuration.
    #[must_use]
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Returns the single-flight state.
    #[must_use]
    pub fn state(&self) -> &SyncState {
        &self.state
    }

    /// Runs one cycle now, unless another is already running.
    ///
    /// Errors are logged and returned inside [`CycleOutcome::Failed`]; the
    /// state is back to idle when this returns, or when the future is dropped.
    pub async fn run_cycle(&self) -> CycleOutcome {
        let ticket = match self
            .state
            .try_begin(Instant::now(), self.config.stuck_threshold)
        {
            Admission::Start(ticket) => ticket,
            Admission::ForcedReset { ticket, stuck_for } => {
                warn!(
                    stuck_secs = stuck_for.as_secs(),
                    threshold_secs = self.config.stuck_threshold.as_secs(),
                    "Previous sync cycle looks stuck, forcing reset"
                );
                ticket
            }
            Admission::Skip { running_for } => {
                debug!(
                    running_ms = u64::try_from(running_for.as_millis()).unwrap_or(u64::MAX),
                    "Sync cycle already running, skipping trigger"
                );
                return CycleOutcome::Skipped;
            }
        };

        let cycle = ticket.generation();
        let span = info_span!("sync_cycle", cycle, backend = self.mailbox.backend());
        let outcome = async {
            let started = Instant::now();
            match self.sync_window().await {
                Ok(report) => {
                    info!(
                        listed = report.listed,
                        inserted = report.inserted,
                        failed = report.failed,
                        elapsed_ms = elapsed_millis(started),
                        "Sync cycle complete"
                    );
                    CycleOutcome::Completed(report)
                }
                Err(e) => {
                    error!(
                        error = %e,
                        category = %e.category(),
                        retryable = e.is_retryable(),
                        "Sync cycle failed"
                    );
                    CycleOutcome::Failed(e)
                }
            }
        }
        .instrument(span)
        .await;

        drop(ticket);
        outcome
    }

    async fn sync_window(&self) -> Result<CycleReport> {
        let window_start = Utc::now() - self.config.lookback();
        let query = MessageQuery::received_after(window_start);

        let ids = list_all_message_ids(self.mailbox.as_ref(), &query).await?;
        let mut report = CycleReport {
            listed: ids.len(),
            ..CycleReport::default()
        };
        if ids.is_empty() {
            debug!("No messages in lookback window");
            return Ok(report);
        }

        let outcomes: Vec<MessageOutcome> = stream::iter(ids)
            .map(|id| self.process_message(id, window_start))
            .buffer_unordered(self.config.fetch_concurrency.max(1))
            .collect()
            .await;

        let mut candidates = Vec::new();
        for outcome in outcomes {
            match outcome {
                MessageOutcome::Scanned(records) => {
                    report.scanned += 1;
                    candidates.extend(records);
                }
                MessageOutcome::OutOfWindow => report.out_of_window += 1,
                MessageOutcome::Failed => report.failed += 1,
            }
        }
        report.candidates = candidates.len();

        let fresh =
            filter_new(self.store.as_ref(), candidates, self.config.dedup_chunk_size).await?;
        if fresh.is_empty() {
            debug!(candidates = report.candidates, "No new codes");
            return Ok(report);
        }

        let inserted = self.store.insert_many(fresh).await?;
        report.inserted = inserted.inserted;
        report.duplicates = inserted.duplicates;
        Ok(report)
    }

    #[instrument(name = "SyncEngine::process_message", skip(self, window_start))]
    async fn process_message(
        &self,
        message_id: String,
        window_start: DateTime<Utc>,
    ) -> MessageOutcome {
        let message = match self.mailbox.get_message(&message_id).await {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Failed to fetch message, skipping");
                return MessageOutcome::Failed;
            }
        };

        if message.internal_date.is_some_and(|received| received < window_start) {
            trace!("Message predates lookback window");
            return MessageOutcome::OutOfWindow;
        }

        let Some(envelope) = MessageEnvelope::from_headers(&message.headers, message.internal_date)
        else {
            warn!("Message has no usable date, skipping");
            return MessageOutcome::Failed;
        };

        let content = decode(&message.body);
        let codes = self.extractor.extract(&content.combined());
        if codes.is_empty() {
            trace!("No codes in message");
            return MessageOutcome::Scanned(Vec::new());
        }

        let is_protected = classify(&content.text, &content.html);
        debug!(
            count = codes.len(),
            recipient = %envelope.recipient,
            is_protected,
            extractor = self.extractor.description(),
            "Extracted codes"
        );

        MessageOutcome::Scanned(
            codes
                .into_iter()
                .map(|code| envelope.record(code, is_protected))
                .collect(),
        )
    }

    /// Starts the recurring scheduler. Returns `false` if it was already running.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn start(self: &Arc<Self>) -> bool {
        if self.state.loop_running.swap(true, Ordering::SeqCst) {
            debug!("Sync loop already running");
            return false;
        }

        let engine = Arc::clone(self);
        let handle = tokio::spawn(engine.run_loop());
        *self.scheduler.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);

        info!(
            interval_secs = self.config.interval.as_secs(),
            lookback_minutes = self.config.lookback_minutes,
            backend = self.mailbox.backend(),
            "Sync loop started"
        );
        true
    }

    async fn run_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let engine = Arc::clone(&self);
            tokio::spawn(async move {
                engine.run_cycle().await;
            });
        }
    }

    /// Stops the scheduler. A cycle already in flight runs to completion.
    ///
    /// The loop may be started again afterwards.
    pub async fn shutdown(&self) {
        let handle = self
            .scheduler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(handle) = handle {
            handle.abort();
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    warn!(error = %e, "Sync loop task ended abnormally");
                }
            }
            info!("Sync loop stopped");
        }
        self.state.loop_running.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const THRESHOLD: Duration = Duration::from_secs(120);

    #[test]
    fn test_second_trigger_is_skipped() {
        let state = SyncState::new();
        let now = Instant::now();

        let Admission::Start(ticket) = state.try_begin(now, THRESHOLD) else {
            panic!("idle state must admit");
        };
        assert!(state.is_in_progress());
        assert!(matches!(
            state.try_begin(now + Duration::from_secs(5), THRESHOLD),
            Admission::Skip { .. }
        ));

        drop(ticket);
        assert!(!state.is_in_progress());
        assert_eq!(state.started_at(), None);
    }

    #[test]
    fn test_stuck_cycle_is_force_reset() {
        let state = SyncState::new();
        let now = Instant::now();

        let Admission::Start(stuck) = state.try_begin(now, THRESHOLD) else {
            panic!("idle state must admit");
        };
        let later = now + THRESHOLD + Duration::from_secs(1);
        let Admission::ForcedReset { ticket, stuck_for } = state.try_begin(later, THRESHOLD) else {
            panic!("stuck cycle must be reset");
        };
        assert_eq!(stuck_for, THRESHOLD + Duration::from_secs(1));
        assert_eq!(state.started_at(), Some(later));

        // The wedged cycle finishing late must not clear the new one.
        drop(stuck);
        assert!(state.is_in_progress());

        drop(ticket);
        assert!(!state.is_in_progress());
    }

    #[test]
    fn test_threshold_is_exclusive() {
        let state = SyncState::new();
        let now = Instant::now();
        let _ticket = state.try_begin(now, THRESHOLD);
        assert!(matches!(
            state.try_begin(now + THRESHOLD, THRESHOLD),
            Admission::Skip { .. }
        ));
    }

    #[test]
    fn test_generations_increase() {
        let state = SyncState::new();
        let now = Instant::now();
        for expected in 1..=3 {
            let Admission::Start(ticket) = state.try_begin(now, THRESHOLD) else {
                panic!("idle state must admit");
            };
            assert_eq!(ticket.generation(), expected);
        }
    }
}
