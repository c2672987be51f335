use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

// ---------------------------------------------------------------------------
// Instrument / run modes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Instrument {
    #[value(name = "ZTF")]
    Ztf,
    #[value(name = "WNTR")]
    Wntr,
}

impl Instrument {
    /// Kowalski alert catalog for this instrument.
    pub fn alert_catalog(&self) -> String {
        format!("{self}_alerts")
    }

    /// Companion catalog holding prior-detection histories.
    pub fn aux_catalog(&self) -> String {
        format!("{self}_alerts_aux")
    }
}

impl std::fmt::Display for Instrument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Instrument::Ztf => "ZTF",
            Instrument::Wntr => "WNTR",
        };
        write!(f, "{s}")
    }
}

/// Which query thresholds and cascade variant a run uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SearchProfile {
    /// Slow transients in the galactic plane, with the star-contrast
    /// disjunction and the solar-system exclusion.
    GalacticPlane,
    /// Stricter upstream cuts, no nearby catalog star, duration-only
    /// cascade.
    Hostless,
}

impl std::fmt::Display for SearchProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SearchProfile::GalacticPlane => "galactic-plane",
            SearchProfile::Hostless => "hostless",
        };
        write!(f, "{s}")
    }
}

/// Post-run triage behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FilterMode {
    None,
    Fritz,
}

// ---------------------------------------------------------------------------
// Alert record
// ---------------------------------------------------------------------------

/// One alert packet as returned by the query service. Every field the
/// filter cascade references is required: a packet missing one fails
/// deserialization and surfaces as a data-quality error rather than being
/// silently dropped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    #[serde(rename = "objectId")]
    pub object_id: String,
    pub candid: i64,
    pub candidate: CandidateMetrics,
    pub coordinates: GalacticCoordinates,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateMetrics {
    pub jd: f64,
    pub jdstarthist: f64,
    pub jdendhist: f64,
    pub ra: f64,
    pub dec: f64,
    /// Real/bogus classifier score.
    pub drb: f64,
    pub ndethist: i64,
    /// Sign of the flux difference: "t"/"1" positive, "f"/"0" negative.
    pub isdiffpos: String,
    pub magpsf: f64,
    pub distpsnr1: f64,
    pub distpsnr2: f64,
    pub srmag1: f64,
    pub srmag2: f64,
    pub ssdistnr: f64,
}

impl CandidateMetrics {
    /// Span of the detection history in days. Pure derivation — never
    /// written back onto the record.
    pub fn deltajd(&self) -> f64 {
        self.jdendhist - self.jdstarthist
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GalacticCoordinates {
    /// Galactic latitude, degrees.
    pub b: f64,
    /// Galactic longitude, degrees.
    #[serde(default)]
    pub l: Option<f64>,
}

// ---------------------------------------------------------------------------
// Photometry
// ---------------------------------------------------------------------------

/// One measurement in a candidate's light curve. A non-finite `magpsf`
/// marks an upper limit (no detection at that epoch).
#[derive(Debug, Clone, Copy, Serialize)]
pub struct PhotometryPoint {
    pub mjd: f64,
    pub magpsf: f64,
}

impl PhotometryPoint {
    pub fn is_detected(&self) -> bool {
        self.magpsf.is_finite()
    }
}

// ---------------------------------------------------------------------------
// Time windows
// ---------------------------------------------------------------------------

/// Half-open query interval `[jd_start, jd_end)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeWindow {
    pub jd_start: f64,
    pub jd_end: f64,
}

impl TimeWindow {
    pub fn new(jd_start: f64, interval: f64) -> Self {
        Self { jd_start, jd_end: jd_start + interval }
    }

    pub fn width(&self) -> f64 {
        self.jd_end - self.jd_start
    }
}

impl std::fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{:.4}, {:.4})", self.jd_start, self.jd_end)
    }
}

// ---------------------------------------------------------------------------
// Time conversions
// ---------------------------------------------------------------------------

/// JD of the Unix epoch.
const JD_UNIX_EPOCH: f64 = 2_440_587.5;
/// Offset between Julian and modified Julian dates.
const JD_MJD_OFFSET: f64 = 2_400_000.5;

pub fn jd_from_datetime(dt: DateTime<Utc>) -> f64 {
    dt.timestamp() as f64 / 86_400.0 + JD_UNIX_EPOCH
}

pub fn mjd_from_jd(jd: f64) -> f64 {
    jd - JD_MJD_OFFSET
}

/// Parse an ISO-8601 timestamp (`2023-04-23T00:00:00`, optionally with a
/// trailing `Z` or just a date) into a Julian date.
pub fn jd_from_iso(s: &str) -> Result<f64> {
    let s = s.trim();
    let naive = NaiveDateTime::parse_from_str(s.trim_end_matches('Z'), "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d").map(|d| d.and_time(chrono::NaiveTime::MIN))
        })
        .map_err(|e| AppError::Config(format!("invalid ISO-8601 date '{s}': {e}")))?;
    Ok(jd_from_datetime(naive.and_utc()))
}
