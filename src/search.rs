use std::path::PathBuf;
use std::time::Duration;

use serde_json::json;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::client::AlertSource;
use crate::config::{
    DEFAULT_INTERVAL_DAYS, FLUSH_EVERY_BATCHES, INTERVAL_FLOOR_DAYS, INTERVAL_SHRINK_FACTOR,
    PACING_DELAY_SECS, RESUME_AFTER_ITERS,
};
use crate::error::{AppError, Result};
use crate::filters::apply_prefilter;
use crate::output::{save_candidates, CandidateSet};
use crate::photometry::enrich_and_filter;
use crate::query::build_window_query;
use crate::types::{Instrument, SearchProfile, TimeWindow};

/// Explicit state for the adaptive-interval walk over the requested span:
/// the cursor, the current window width, and the iteration at which a
/// shrunken width is restored to the default.
#[derive(Debug, Clone)]
pub struct WindowSchedule {
    jd_start: f64,
    end_jd: f64,
    interval: f64,
    resume_at: Option<u64>,
}

/// Outcome of a query failure.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FailureAction {
    /// Retry the same cursor with a narrower window.
    Shrunk { new_interval: f64 },
    /// Width already at the floor; give up on the remaining span.
    Abandon,
}

impl WindowSchedule {
    pub fn new(start_jd: f64, end_jd: f64) -> Self {
        Self {
            jd_start: start_jd,
            end_jd,
            interval: DEFAULT_INTERVAL_DAYS,
            resume_at: None,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.jd_start >= self.end_jd
    }

    pub fn current_window(&self) -> TimeWindow {
        TimeWindow::new(self.jd_start, self.interval)
    }

    pub fn interval(&self) -> f64 {
        self.interval
    }

    /// Move the cursor past the window just queried.
    pub fn advance(&mut self) {
        self.jd_start += self.interval;
    }

    /// True once the next window would reach the end of the span.
    pub fn is_final_window(&self) -> bool {
        self.jd_start + self.interval >= self.end_jd
    }

    /// Shrink policy: divide the width by the shrink factor and arm the
    /// restore horizon, unless the width is already at the floor — then
    /// the remaining span is abandoned.
    pub fn on_failure(&mut self, iter_counter: u64) -> FailureAction {
        if self.interval <= INTERVAL_FLOOR_DAYS {
            return FailureAction::Abandon;
        }
        self.interval /= INTERVAL_SHRINK_FACTOR;
        self.resume_at = Some(iter_counter + RESUME_AFTER_ITERS);
        FailureAction::Shrunk { new_interval: self.interval }
    }

    /// Restore the default width once enough accepted iterations have
    /// passed since the last shrink, so a transient slowdown does not
    /// throttle the rest of the run.
    pub fn maybe_restore(&mut self, iter_counter: u64) {
        if let Some(resume_at) = self.resume_at {
            if iter_counter > resume_at {
                self.interval = DEFAULT_INTERVAL_DAYS;
                self.resume_at = None;
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct SearchParams {
    pub instrument: Instrument,
    pub profile: SearchProfile,
    pub start_jd: f64,
    pub end_jd: f64,
    /// Worker-thread count forwarded to the query service.
    pub nthreads: u32,
    pub savefile: PathBuf,
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub accepted: usize,
    pub windows_queried: u64,
    /// Start of the span left uncovered after retry exhaustion.
    pub abandoned_from: Option<f64>,
}

/// Walk the requested span in chunks, filtering and enriching each
/// window's alerts and periodically flushing the accumulated set.
pub async fn run_search<S: AlertSource>(
    source: &S,
    params: &SearchParams,
) -> Result<(CandidateSet, RunSummary)> {
    let catalog = params.instrument.alert_catalog();
    let mut schedule = WindowSchedule::new(params.start_jd, params.end_jd);
    let mut set = CandidateSet::new();
    let mut iter_counter: u64 = 0;
    let mut windows_queried: u64 = 0;
    let mut abandoned_from = None;

    while !schedule.is_exhausted() {
        schedule.maybe_restore(iter_counter);
        let window = schedule.current_window();
        info!(%window, "searching for candidates");

        let query = build_window_query(&catalog, window, params.profile)
            .with_kwargs(json!({ "max_n_threads": params.nthreads }));
        windows_queried += 1;

        let alerts = match source.find_alerts(&query).await {
            Ok(alerts) => alerts,
            // A malformed packet is a data-quality defect, not a query
            // failure; shrinking the window would just re-fetch it.
            Err(e @ AppError::MalformedRecord { .. }) => return Err(e),
            Err(e) => match schedule.on_failure(iter_counter) {
                FailureAction::Abandon => {
                    error!(
                        %window,
                        "{e}: giving up after retries at interval {:.4}; \
                         span from {:.4} is not covered",
                        schedule.interval(),
                        window.jd_start,
                    );
                    abandoned_from = Some(window.jd_start);
                    break;
                }
                FailureAction::Shrunk { new_interval } => {
                    warn!(%window, "{e}: retrying with smaller interval {new_interval:.4}");
                    continue;
                }
            },
        };

        schedule.advance();
        if alerts.is_empty() {
            continue;
        }

        iter_counter += 1;
        let survivors = apply_prefilter(alerts, params.profile);
        info!(%window, survivors = survivors.len(), "window filtered");

        let enriched = enrich_and_filter(source, params.instrument, survivors).await?;
        set.append(enriched);

        if iter_counter % FLUSH_EVERY_BATCHES == 0 || schedule.is_final_window() {
            save_candidates(&params.savefile, &set)?;
        }

        // Pacing between successful windows to respect rate limits.
        sleep(Duration::from_secs(PACING_DELAY_SECS)).await;
    }

    if !set.is_empty() {
        save_candidates(&params.savefile, &set)?;
    }

    let summary = RunSummary {
        accepted: set.len(),
        windows_queried,
        abandoned_from,
    };
    Ok((set, summary))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::FindQuery;
    use crate::types::{Alert, CandidateMetrics, GalacticCoordinates};
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::Mutex;

    enum Script {
        /// Every window succeeds with no alerts.
        Empty,
        /// Every window fails.
        FailAlways,
        /// Every window returns one alert that passes the full cascade.
        OneGoodAlert,
        /// First call returns a packet missing required fields.
        Malformed,
    }

    struct MockSource {
        script: Script,
        /// Windows reconstructed from each received query filter.
        windows: Mutex<Vec<TimeWindow>>,
        next_candid: AtomicI64,
    }

    impl MockSource {
        fn new(script: Script) -> Self {
            Self {
                script,
                windows: Mutex::new(Vec::new()),
                next_candid: AtomicI64::new(1),
            }
        }

        fn windows(&self) -> Vec<TimeWindow> {
            self.windows.lock().unwrap().clone()
        }

        fn good_alert(&self) -> Alert {
            Alert {
                object_id: "ZTF23aaaaaaaa".to_string(),
                candid: self.next_candid.fetch_add(1, Ordering::SeqCst),
                candidate: CandidateMetrics {
                    jd: 2_400_150.5,
                    jdstarthist: 2_400_100.5,
                    jdendhist: 2_400_150.5,
                    ra: 281.2,
                    dec: -1.9,
                    drb: 0.98,
                    ndethist: 12,
                    isdiffpos: "t".to_string(),
                    magpsf: 17.4,
                    distpsnr1: 4.1,
                    distpsnr2: 8.0,
                    srmag1: 21.0,
                    srmag2: 20.5,
                    ssdistnr: 5.0,
                },
                coordinates: GalacticCoordinates { b: 3.0, l: None },
            }
        }
    }

    impl AlertSource for MockSource {
        async fn find_alerts(&self, query: &FindQuery) -> crate::error::Result<Vec<Alert>> {
            let jd = &query.filter["candidate.jd"];
            self.windows.lock().unwrap().push(TimeWindow {
                jd_start: jd["$gt"].as_f64().unwrap(),
                jd_end: jd["$lt"].as_f64().unwrap(),
            });
            match self.script {
                Script::Empty => Ok(Vec::new()),
                Script::FailAlways => Err(AppError::Query("simulated timeout".to_string())),
                Script::OneGoodAlert => Ok(vec![self.good_alert()]),
                Script::Malformed => Err(AppError::MalformedRecord {
                    object_id: "ZTF23zzzzzzzz".to_string(),
                    reason: "missing field `ssdistnr`".to_string(),
                }),
            }
        }

        async fn find_raw(&self, _query: &FindQuery) -> crate::error::Result<Vec<Value>> {
            // Detected history spanning mjd 100–150 with the triggering
            // detection at mjd 150.
            Ok(vec![json!({ "prv_candidates": [
                { "jd": 2_400_100.5, "magpsf": 18.6 },
                { "jd": 2_400_125.5, "magpsf": 18.0 },
            ] })])
        }

        async fn cone_search(
            &self,
            _catalog: &str,
            _ra: f64,
            _dec: f64,
            _radius_arcsec: f64,
        ) -> crate::error::Result<Vec<Value>> {
            Ok(Vec::new())
        }
    }

    fn params(start_jd: f64, end_jd: f64, savefile: &str) -> SearchParams {
        SearchParams {
            instrument: Instrument::Ztf,
            profile: SearchProfile::GalacticPlane,
            start_jd,
            end_jd,
            nthreads: 8,
            savefile: std::env::temp_dir()
                .join(format!("galscan_search_{}_{savefile}.csv", std::process::id())),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn span_of_three_intervals_issues_three_queries() {
        let source = MockSource::new(Script::Empty);
        let (set, summary) = run_search(&source, &params(100.0, 100.6, "three")).await.unwrap();

        assert_eq!(summary.windows_queried, 3);
        assert!(set.is_empty());
        assert!(summary.abandoned_from.is_none());

        let windows = source.windows();
        assert_eq!(windows.len(), 3);
        for w in &windows {
            assert!((w.jd_end - (w.jd_start + 0.2)).abs() < 1e-9);
        }
        assert!((windows[1].jd_start - 100.2).abs() < 1e-9);
        assert!((windows[2].jd_start - 100.4).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_failure_shrinks_then_abandons() {
        let source = MockSource::new(Script::FailAlways);
        let (set, summary) = run_search(&source, &params(100.0, 100.6, "fail")).await.unwrap();

        assert!(set.is_empty());
        assert_eq!(summary.abandoned_from, Some(100.0));

        // 0.2 → 0.02 → 0.002, all at the same cursor, then give up.
        let widths: Vec<f64> = source.windows().iter().map(|w| w.width()).collect();
        assert_eq!(widths.len(), 3);
        assert!((widths[0] - 0.2).abs() < 1e-12);
        assert!((widths[1] - 0.02).abs() < 1e-12);
        assert!((widths[2] - 0.002).abs() < 1e-12);
        assert!(source.windows().iter().all(|w| (w.jd_start - 100.0).abs() < 1e-12));
    }

    #[tokio::test(start_paused = true)]
    async fn accepted_candidates_reach_the_savefile() {
        let p = params(100.0, 100.4, "flush");
        let source = MockSource::new(Script::OneGoodAlert);
        let (set, summary) = run_search(&source, &p).await.unwrap();

        assert_eq!(summary.windows_queried, 2);
        assert_eq!(set.len(), 2);
        let contents = std::fs::read_to_string(&p.savefile).unwrap();
        // Header plus one row per accepted candidate.
        assert_eq!(contents.lines().count(), 3);
        std::fs::remove_file(&p.savefile).unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_record_propagates_without_retry() {
        let source = MockSource::new(Script::Malformed);
        let err = run_search(&source, &params(100.0, 100.6, "malformed"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::MalformedRecord { .. }));
        // One query only: data-quality errors must not trigger the
        // shrink-and-retry policy.
        assert_eq!(source.windows().len(), 1);
    }

    #[test]
    fn schedule_restores_default_interval_after_horizon() {
        let mut schedule = WindowSchedule::new(100.0, 200.0);
        let action = schedule.on_failure(5);
        assert_eq!(action, FailureAction::Shrunk { new_interval: 0.02 });

        // Not yet past the horizon: stays shrunk.
        schedule.maybe_restore(15);
        assert!((schedule.interval() - 0.02).abs() < 1e-12);

        schedule.maybe_restore(16);
        assert!((schedule.interval() - DEFAULT_INTERVAL_DAYS).abs() < 1e-12);
    }

    #[test]
    fn interval_shrinks_at_most_once_per_failure() {
        let mut schedule = WindowSchedule::new(100.0, 200.0);
        for expected in [0.02, 0.002] {
            match schedule.on_failure(0) {
                FailureAction::Shrunk { new_interval } => {
                    assert!((new_interval - expected).abs() < 1e-12)
                }
                FailureAction::Abandon => panic!("abandoned before reaching the floor"),
            }
        }
        // 0.002 is at or below the floor: the next failure abandons
        // without shrinking further.
        assert_eq!(schedule.on_failure(0), FailureAction::Abandon);
        assert!((schedule.interval() - 0.002).abs() < 1e-12);
    }
}
