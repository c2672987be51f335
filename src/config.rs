use crate::error::{AppError, Result};

pub const KOWALSKI_API_URL: &str = "https://kowalski.caltech.edu";
pub const FRITZ_API_URL: &str = "https://fritz.science";

/// Default query window width in days. Queries are chunked to avoid
/// server-side timeouts on dense stretches of the alert stream.
pub const DEFAULT_INTERVAL_DAYS: f64 = 0.2;

/// Once the window has been shrunk to or below this width, the next
/// failure abandons the remaining span instead of shrinking further.
pub const INTERVAL_FLOOR_DAYS: f64 = 0.01;

/// Each query failure divides the window width by this factor.
pub const INTERVAL_SHRINK_FACTOR: f64 = 10.0;

/// Number of accepted iterations to run at reduced width before
/// restoring the default window.
pub const RESUME_AFTER_ITERS: u64 = 10;

/// Flush the accumulated candidate set every this many accepted batches.
pub const FLUSH_EVERY_BATCHES: u64 = 10;

/// Pacing delay after each successful window, to respect rate limits.
pub const PACING_DELAY_SECS: u64 = 1;

/// HTTP timeout for query-service requests (seconds).
pub const QUERY_TIMEOUT_SECS: u64 = 120;

/// Candidate selection thresholds shared by the query builder and the
/// filter cascade.
pub mod thresholds {
    /// Days. Candidates with a detection history shorter than this are
    /// likely fast transients or artifacts, not the slow galactic-plane
    /// events this search targets.
    pub const MIN_DURATION_DAYS: f64 = 20.0;
    /// Days. Longer histories are likely variable stars.
    pub const MAX_DURATION_DAYS: f64 = 200.0;

    /// Arcsec. Solar-system cross-matches closer than this are treated
    /// as moving objects and rejected.
    pub const SSDIST_MIN_ARCSEC: f64 = 2.0;
    /// Sentinel boundary: ssdistnr below this means "no known match".
    pub const SSDIST_UNKNOWN_BELOW: f64 = -0.5;

    /// Magnitudes. Required contrast against a nearby catalog star for
    /// the candidate to count as a genuine brightening.
    pub const MIN_STAR_CONTRAST_MAG: f64 = 4.0;
    /// Arcsec. Association radius for the nearest-star disjunction.
    pub const STAR_ASSOC_RADIUS_ARCSEC: f64 = 2.0;
    /// Kowalski sentinel for an unset reference magnitude.
    pub const SRMAG_UNSET: f64 = -999.0;

    /// Degrees. Galactic latitude band of the search.
    pub const GALACTIC_LATITUDE_DEG: f64 = 10.0;

    pub const MIN_DRB: f64 = 0.5;
    pub const MIN_NDETHIST: i64 = 5;

    /// Stricter cuts used by the hostless profile.
    pub mod hostless {
        pub const MIN_DRB: f64 = 0.95;
        pub const MIN_NDETHIST: i64 = 20;
        /// Arcsec. Hostless candidates must sit well clear of any
        /// cataloged point source.
        pub const MIN_STAR_DISTANCE_ARCSEC: f64 = 3.0;
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub kowalski_url: String,
    pub kowalski_token: String,
    pub fritz_url: String,
    pub fritz_token: Option<String>,
    pub log_level: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            kowalski_url: std::env::var("KOWALSKI_URL")
                .unwrap_or_else(|_| KOWALSKI_API_URL.to_string()),
            kowalski_token: std::env::var("KOWALSKI_TOKEN").map_err(|_| {
                AppError::Config("KOWALSKI_TOKEN must be set to query the alert archive".to_string())
            })?,
            fritz_url: std::env::var("FRITZ_URL").unwrap_or_else(|_| FRITZ_API_URL.to_string()),
            fritz_token: std::env::var("FRITZ_TOKEN").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }
}
