//! Background search worker and its control surface.
//!
//! The caller never blocks on a search: `start` validates synchronously,
//! spawns the worker, and hands back a signal channel carrying progress
//! and the final outcome. Cancellation is cooperative; starting a new
//! search first drains any previous worker, then clears the flag.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use timestamp_engine::DetectorConfig;
use tracing::warn;
use unified_search::{
    run_search, CancelToken, HistoryStore, SearchError, SearchHistoryEntry, SearchParameters,
    SearchProgress, SearchReport, SearchState,
};

/// Everything the worker reports back to the caller.
#[derive(Debug)]
pub enum SearchSignal {
    Progress(SearchProgress),
    Completed(SearchReport),
    Cancelled(SearchReport),
    Error(String),
}

/// One search session: at most one worker at a time.
pub struct SearchSession {
    stores_dir: PathBuf,
    detector: DetectorConfig,
    cancel: CancelToken,
    state: Arc<Mutex<SearchState>>,
    history: Arc<HistoryStore>,
    worker: Option<JoinHandle<()>>,
}

impl SearchSession {
    /// `stores_dir` is scanned for artifact stores; the history JSON
    /// files live under `case_dir`.
    pub fn new(stores_dir: PathBuf, case_dir: &std::path::Path, detector: DetectorConfig) -> Self {
        let history = Arc::new(HistoryStore::new(case_dir));
        SearchSession {
            stores_dir,
            detector,
            cancel: CancelToken::new(),
            state: Arc::new(Mutex::new(SearchState::Idle)),
            history,
            worker: None,
        }
    }

    pub fn state(&self) -> SearchState {
        *self.state.lock()
    }

    /// Request cancellation of the running search; the worker notices at
    /// its next checkpoint.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    /// Validate and launch a search. Validation failures return
    /// synchronously and nothing is spawned.
    pub fn start(
        &mut self,
        params: SearchParameters,
    ) -> Result<Receiver<SearchSignal>, SearchError> {
        // Drain the previous worker before touching shared state; only
        // then is clearing the cancel flag safe.
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
        self.cancel.clear();

        transition(&self.state, SearchState::Idle, SearchState::Validating);
        if let Err(err) = params.validate() {
            *self.state.lock() = SearchState::Error;
            reset_to_idle(&self.state);
            return Err(err);
        }
        transition(&self.state, SearchState::Validating, SearchState::Running);

        let (tx, rx) = unbounded();
        let stores_dir = self.stores_dir.clone();
        let detector = self.detector;
        let cancel = self.cancel.clone();
        let state = Arc::clone(&self.state);
        let history = Arc::clone(&self.history);

        self.worker = Some(std::thread::spawn(move || {
            run_worker(&stores_dir, &params, &detector, &cancel, &state, &history, &tx);
        }));
        Ok(rx)
    }
}

fn run_worker(
    stores_dir: &std::path::Path,
    params: &SearchParameters,
    detector: &DetectorConfig,
    cancel: &CancelToken,
    state: &Arc<Mutex<SearchState>>,
    history: &HistoryStore,
    tx: &Sender<SearchSignal>,
) {
    let progress_tx = tx.clone();
    let outcome = run_search(stores_dir, params, detector, cancel, |progress| {
        let _ = progress_tx.send(SearchSignal::Progress(progress));
    });

    match outcome {
        Ok(report) => {
            // Timeouts convert to a cancel: partial results, distinct
            // from both success and failure.
            if report.cancelled || report.timed_out {
                *state.lock() = SearchState::Cancelled;
                let _ = tx.send(SearchSignal::Cancelled(report));
            } else {
                *state.lock() = SearchState::Completed;
                let entry = SearchHistoryEntry::from_completed(
                    params,
                    report.total_matches,
                    report.elapsed.as_millis() as u64,
                );
                if let Err(err) = history.add_entry(entry) {
                    warn!(error = %err, "failed to persist search history");
                }
                let _ = tx.send(SearchSignal::Completed(report));
            }
        }
        Err(err) => {
            *state.lock() = SearchState::Error;
            let _ = tx.send(SearchSignal::Error(err.to_string()));
        }
    }
    reset_to_idle(state);
}

fn transition(state: &Arc<Mutex<SearchState>>, from: SearchState, to: SearchState) {
    let mut lock = state.lock();
    debug_assert!(from.can_transition(to));
    if *lock == from {
        *lock = to;
    }
}

/// Terminal states flow back to Idle so the session can be reused.
fn reset_to_idle(state: &Arc<Mutex<SearchState>>) {
    let mut lock = state.lock();
    if lock.can_transition(SearchState::Idle) {
        *lock = SearchState::Idle;
    }
}
