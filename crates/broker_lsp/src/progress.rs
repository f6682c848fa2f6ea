//! Derives an indexing state machine from `$/progress` notifications.
//!
//! A single indexing *cycle* can comprise several `begin`/`report`*/`end`
//! phases in a row (the analyzer re-triggers indexing for sub-passes); the
//! `first_started_at` anchor only resets when the gap since the last
//! update exceeds 30 seconds, so consecutive phases accumulate into one
//! reported cycle instead of restarting the elapsed-time clock each time.

use std::time::{Duration, Instant};

use parking_lot::RwLock;

const CYCLE_GAP: Duration = Duration::from_secs(30);
const SPEED_WEIGHT_PREVIOUS: f64 = 0.7;
const SPEED_WEIGHT_NEW: f64 = 0.3;

#[derive(Debug, Clone)]
struct ProgressState {
    active: bool,
    title: Option<String>,
    message: Option<String>,
    current: u64,
    total: u64,
    percentage: u8,
    /// Exponentially smoothed files/sec.
    speed: f64,
    started_at: Option<Instant>,
    first_started_at: Option<Instant>,
    last_update_at: Option<Instant>,
}

impl Default for ProgressState {
    fn default() -> Self {
        Self {
            active: false,
            title: None,
            message: None,
            current: 0,
            total: 0,
            percentage: 0,
            speed: 0.0,
            started_at: None,
            first_started_at: None,
            last_update_at: None,
        }
    }
}

/// Indexing lifecycle as exposed to API clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexingState {
    Idle,
    Indexing,
    Complete,
}

/// The view of progress exposed over the API — derived, never stored.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ProgressView {
    pub state: IndexingState,
    pub title: Option<String>,
    pub message: Option<String>,
    pub current: u64,
    pub total: u64,
    pub percentage: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eta_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed_seconds: Option<u64>,
}

/// Thread-safe progress state machine, written by the notification router
/// and read by `session/status` handlers and the file watcher's
/// indexing-active check.
pub struct ProgressTracker {
    state: RwLock<ProgressState>,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self { state: RwLock::new(ProgressState::default()) }
    }

    /// `kind: "begin"` — starts a phase, possibly starting a new cycle.
    pub fn begin(&self, title: Option<String>, message: Option<String>, percentage: Option<u8>) {
        self.begin_at(title, message, percentage, Instant::now());
    }

    fn begin_at(
        &self,
        title: Option<String>,
        message: Option<String>,
        percentage: Option<u8>,
        now: Instant,
    ) {
        let mut state = self.state.write();

        let is_new_cycle = match state.last_update_at {
            None => true,
            Some(last) => now.saturating_duration_since(last) > CYCLE_GAP,
        };

        if is_new_cycle {
            state.current = 0;
            state.total = 0;
            state.speed = 0.0;
            state.first_started_at = Some(now);
        }

        state.active = true;
        state.title = title;
        if let Some(message) = message {
            state.message = Some(message);
        }
        if let Some(pct) = percentage {
            state.percentage = pct;
        }
        state.started_at = Some(now);
        state.last_update_at = Some(now);
    }

    /// `kind: "report"` — updates message/percentage and, if the message
    /// carries a `<current>/<total>` fraction, folds a speed estimate.
    pub fn report(&self, message: Option<String>, percentage: Option<u8>) {
        self.report_at(message, percentage, Instant::now());
    }

    fn report_at(&self, message: Option<String>, percentage: Option<u8>, now: Instant) {
        let mut state = self.state.write();

        if let Some(pct) = percentage {
            state.percentage = pct;
        }

        if let Some(ref message) = message {
            if let Some((current, total)) = parse_fraction(message) {
                if total > 0 {
                    let delta_t = state
                        .last_update_at
                        .map(|last| now.saturating_duration_since(last).as_secs_f64())
                        .unwrap_or(0.0);
                    let delta_current = current.saturating_sub(state.current) as f64;

                    if delta_t > 0.0 {
                        let instantaneous = delta_current / delta_t;
                        state.speed = if state.speed > 0.0 {
                            state.speed * SPEED_WEIGHT_PREVIOUS + instantaneous * SPEED_WEIGHT_NEW
                        } else {
                            instantaneous
                        };
                    }

                    state.current = current;
                    state.total = total;
                }
            }
        }

        state.message = message.or(state.message.take());
        state.last_update_at = Some(now);
    }

    /// `kind: "end"` — closes the phase. The cycle's `first_started_at`
    /// anchor is preserved so elapsed-time reporting keeps working after
    /// indexing completes.
    pub fn end(&self) {
        self.end_at(Instant::now());
    }

    fn end_at(&self, now: Instant) {
        let mut state = self.state.write();
        state.active = false;
        state.percentage = 100;
        if state.total > 0 {
            state.current = state.total;
        }
        state.last_update_at = Some(now);
    }

    /// True while an indexing cycle is in progress — gates the file
    /// watcher's polling tick.
    pub fn is_indexing(&self) -> bool {
        matches!(self.view().state, IndexingState::Indexing)
    }

    /// Snapshot the derived view exposed to API clients.
    pub fn view(&self) -> ProgressView {
        self.view_at(Instant::now())
    }

    fn view_at(&self, now: Instant) -> ProgressView {
        let state = self.state.read();

        let state_kind = if state.active || (state.total > 0 && state.current < state.total) {
            IndexingState::Indexing
        } else if state.total > 0 && state.current >= state.total {
            IndexingState::Complete
        } else {
            IndexingState::Idle
        };

        let eta_seconds = if state_kind == IndexingState::Indexing && state.speed > 0.0 {
            let remaining = state.total.saturating_sub(state.current) as f64;
            Some((remaining / state.speed).round() as u64)
        } else {
            None
        };

        let elapsed_seconds = state.first_started_at.map(|first| {
            if state_kind == IndexingState::Indexing {
                now.saturating_duration_since(first).as_secs()
            } else {
                state
                    .last_update_at
                    .map(|last| last.saturating_duration_since(first).as_secs())
                    .unwrap_or(0)
            }
        });

        ProgressView {
            state: state_kind,
            title: state.title.clone(),
            message: state.message.clone(),
            current: state.current,
            total: state.total,
            percentage: state.percentage,
            eta_seconds,
            elapsed_seconds,
        }
    }
}

/// Find the first `<int>/<int>` substring in `message` (e.g. "10/100
/// files indexed") and parse it as `(current, total)`.
fn parse_fraction(message: &str) -> Option<(u64, u64)> {
    let bytes = message.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i].is_ascii_digit() {
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if i < bytes.len() && bytes[i] == b'/' {
                let num_end = i;
                let denom_start = i + 1;
                let mut j = denom_start;
                while j < bytes.len() && bytes[j].is_ascii_digit() {
                    j += 1;
                }
                if j > denom_start {
                    let current: u64 = message[start..num_end].parse().ok()?;
                    let total: u64 = message[denom_start..j].parse().ok()?;
                    return Some((current, total));
                }
            }
        } else {
            i += 1;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fraction_from_message() {
        assert_eq!(parse_fraction("10/100 files"), Some((10, 100)));
        assert_eq!(parse_fraction("Indexing modules"), None);
        assert_eq!(parse_fraction("build 3/7, stage 2/2"), Some((3, 7)));
    }

    #[test]
    fn idle_until_first_begin() {
        let tracker = ProgressTracker::new();
        assert_eq!(tracker.view().state, IndexingState::Idle);
    }

    /// A full cycle: begin, two reports, end.
    #[test]
    fn progress_cycle_transitions() {
        let tracker = ProgressTracker::new();
        let t0 = Instant::now();

        tracker.begin_at(Some("Index".to_string()), None, None, t0);
        assert_eq!(tracker.view_at(t0).state, IndexingState::Indexing);

        let t1 = t0 + Duration::from_secs(1);
        tracker.report_at(Some("10/100 files".to_string()), None, t1);
        let view = tracker.view_at(t1);
        assert_eq!(view.state, IndexingState::Indexing);
        assert_eq!(view.current, 10);
        assert_eq!(view.total, 100);

        let t2 = t1 + Duration::from_secs(1);
        tracker.report_at(Some("50/100 files".to_string()), None, t2);
        let view = tracker.view_at(t2);
        assert_eq!(view.current, 50);
        assert_eq!(view.total, 100);
        assert!(view.eta_seconds.unwrap() > 0);

        let t3 = t2 + Duration::from_millis(500);
        tracker.end_at(t3);
        let view = tracker.view_at(t3);
        assert_eq!(view.state, IndexingState::Complete);
        assert_eq!(view.current, 100);
        assert_eq!(view.total, 100);
    }

    #[test]
    fn gap_over_30s_starts_a_new_cycle() {
        let tracker = ProgressTracker::new();
        let t0 = Instant::now();
        tracker.begin_at(Some("Index".to_string()), None, None, t0);
        tracker.report_at(Some("100/100".to_string()), None, t0 + Duration::from_millis(10));
        tracker.end_at(t0 + Duration::from_millis(20));

        let t_far = t0 + Duration::from_secs(45);
        tracker.begin_at(Some("Reindex".to_string()), None, None, t_far);
        let view = tracker.view_at(t_far);
        assert_eq!(view.state, IndexingState::Indexing);
        assert_eq!(view.current, 0);
        assert_eq!(view.total, 0);
    }

    #[test]
    fn phases_within_30s_accumulate_into_one_cycle() {
        let tracker = ProgressTracker::new();
        let t0 = Instant::now();
        tracker.begin_at(Some("Phase 1".to_string()), None, None, t0);
        tracker.report_at(Some("50/100".to_string()), None, t0 + Duration::from_millis(10));
        tracker.end_at(t0 + Duration::from_millis(20));

        let t_soon = t0 + Duration::from_secs(5);
        tracker.begin_at(Some("Phase 2".to_string()), None, None, t_soon);
        // first_started_at must be unchanged, so elapsed time keeps growing
        // across phases instead of resetting.
        let elapsed = tracker.view_at(t_soon).elapsed_seconds.unwrap();
        assert!(elapsed >= 5);
    }
}
