//! Progress reporting: kdam bars for the task runner, status lines and ETA for the supervisor.

use kdam::{Animation, Bar, BarExt};
use log::info;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Bar shared between the rayon workers of one task run.
pub type ProgressBar = Arc<Mutex<Bar>>;

/// Create a progress bar over `total` units.
pub fn create_progress_bar(total: usize, desc: String) -> ProgressBar {
    Arc::new(Mutex::new(kdam::tqdm!(
        total = total,
        desc = desc,
        animation = Animation::Classic,
        unit = " files"
    )))
}

/// Advance the bar by `n` units unless another worker holds it.
///
/// Returns false when skipped; [`UnitTicker`] then carries the units into its next refresh.
pub fn update_progress_bar(pb: &ProgressBar, n: usize) -> bool {
    let Ok(mut bar) = pb.try_lock() else {
        return false;
    };
    let _ = bar.update(n);
    true
}

/// Rate-limited counter shared by parallel workers.
///
/// Workers call [`UnitTicker::tick`] after each unit; the bar (or a log line when there is no bar)
/// is refreshed at most once per `interval`.
pub struct UnitTicker {
    stage: String,
    bar: Option<ProgressBar>,
    interval: Duration,
    done: AtomicUsize,
    reported: AtomicUsize,
    last: Mutex<Instant>,
}

impl UnitTicker {
    pub fn new(stage: &str, total: usize, interval: Duration, show_bar: bool) -> Self {
        let bar = show_bar.then(|| create_progress_bar(total, format!("[{stage}]")));
        Self {
            stage: stage.to_string(),
            bar,
            interval,
            done: AtomicUsize::new(0),
            reported: AtomicUsize::new(0),
            last: Mutex::new(Instant::now()),
        }
    }

    pub fn done(&self) -> usize {
        self.done.load(Ordering::Relaxed)
    }

    pub fn tick(&self) {
        self.done.fetch_add(1, Ordering::Relaxed);
        // Contended: another worker is reporting right now.
        let Ok(mut last) = self.last.try_lock() else {
            return;
        };
        if last.elapsed() >= self.interval {
            *last = Instant::now();
            self.report();
        }
    }

    /// Push whatever is pending. Call once after the pool drains.
    pub fn finish(&self) {
        self.report();
        if let Some(bar) = &self.bar
            && let Ok(mut bar) = bar.lock()
        {
            let _ = bar.refresh();
            eprintln!();
        }
    }

    fn report(&self) {
        let done = self.done();
        match &self.bar {
            Some(bar) => {
                let prev = self.reported.load(Ordering::Relaxed);
                if done > prev && update_progress_bar(bar, done - prev) {
                    self.reported.store(done, Ordering::Relaxed);
                }
            }
            None => {
                if done > self.reported.swap(done, Ordering::Relaxed) {
                    info!("[{}] Processing: {}.", self.stage, done);
                }
            }
        }
    }
}

/// Estimated hours left, extrapolating linearly from elapsed time per completed job.
/// `None` until at least one job has completed.
pub fn eta_hours(total: usize, completed: usize, elapsed: Duration) -> Option<f64> {
    if completed == 0 {
        return None;
    }
    let per_job = elapsed.as_secs_f64() / completed as f64;
    Some(total.saturating_sub(completed) as f64 * per_job / 3600.0)
}

/// Snapshot of supervisor counters for one status line.
#[derive(Clone, Copy, Debug, Default)]
pub struct PoolStatus {
    pub dispatched: usize,
    pub total: usize,
    pub completed: usize,
    pub running: usize,
    pub failed: usize,
}

/// Render `[stage] Processing: d/t (h) | n instance(s) | f job(s) failed.`
pub fn format_status(stage: &str, status: &PoolStatus, elapsed: Duration) -> String {
    let eta = eta_hours(status.total, status.completed, elapsed)
        .map(|h| format!("{h:.2}h"))
        .unwrap_or_else(|| "?h".to_string());
    format!(
        "[{}] Processing: {}/{} ({}) | {} instance(s) | {} job(s) failed.",
        stage, status.dispatched, status.total, eta, status.running, status.failed
    )
}

/// Emits a status line whenever `interval` has passed since the previous one.
pub struct StatusReporter {
    stage: String,
    interval: Duration,
    start: Instant,
    last: Instant,
}

impl StatusReporter {
    pub fn new(stage: &str, interval: Duration) -> Self {
        let now = Instant::now();
        Self {
            stage: stage.to_string(),
            interval,
            start: now,
            last: now,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Time left until the next line is due.
    pub fn until_next(&self) -> Duration {
        self.interval.saturating_sub(self.last.elapsed())
    }

    pub fn maybe_report(&mut self, status: &PoolStatus) {
        if self.last.elapsed() >= self.interval {
            self.report(status);
        }
    }

    pub fn report(&mut self, status: &PoolStatus) {
        self.last = Instant::now();
        info!("{}", format_status(&self.stage, status, self.elapsed()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eta_is_linear_in_remaining_jobs() {
        // 10 of 100 done in one hour -> 90 left at 6 minutes each.
        let h = eta_hours(100, 10, Duration::from_secs(3600)).unwrap();
        assert!((h - 9.0).abs() < 1e-9);
        assert_eq!(eta_hours(100, 0, Duration::from_secs(5)), None);
        assert_eq!(eta_hours(4, 4, Duration::from_secs(5)), Some(0.0));
    }

    #[test]
    fn status_line_format() {
        let status = PoolStatus {
            dispatched: 7,
            total: 20,
            completed: 0,
            running: 4,
            failed: 1,
        };
        assert_eq!(
            format_status("sanitize_midi", &status, Duration::ZERO),
            "[sanitize_midi] Processing: 7/20 (?h) | 4 instance(s) | 1 job(s) failed."
        );
    }

    #[test]
    fn ticker_counts_every_unit() {
        let ticker = UnitTicker::new("flatten", 3, Duration::ZERO, false);
        ticker.tick();
        ticker.tick();
        ticker.tick();
        ticker.finish();
        assert_eq!(ticker.done(), 3);
    }

    #[test]
    fn held_bar_skips_update() {
        let bar = create_progress_bar(5, "flatten".into());
        {
            let _held = bar.lock().unwrap();
            assert!(!update_progress_bar(&bar, 2));
        }
        assert!(update_progress_bar(&bar, 2));
    }
}
