use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::info;

use crate::error::Result;
use crate::photometry::{detected_span, EnrichedCandidate};
use crate::types::{Instrument, SearchProfile};

/// Append-only collection of accepted candidates for one run. Owned by
/// the retrieval loop; flushed wholesale at flush points.
#[derive(Debug, Default)]
pub struct CandidateSet {
    candidates: Vec<EnrichedCandidate>,
}

impl CandidateSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, batch: Vec<EnrichedCandidate>) {
        self.candidates.extend(batch);
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &EnrichedCandidate> {
        self.candidates.iter()
    }

    pub fn into_vec(self) -> Vec<EnrichedCandidate> {
        self.candidates
    }
}

/// One flattened CSV row per candidate.
#[derive(Debug, Serialize)]
struct CandidateRow<'a> {
    object_id: &'a str,
    candid: i64,
    jd: f64,
    jdstarthist: f64,
    jdendhist: f64,
    deltajd: f64,
    detected_span_days: f64,
    ra: f64,
    dec: f64,
    gal_b: f64,
    drb: f64,
    ndethist: i64,
    isdiffpos: &'a str,
    magpsf: f64,
    distpsnr1: f64,
    distpsnr2: f64,
    srmag1: f64,
    srmag2: f64,
    ssdistnr: f64,
}

impl<'a> CandidateRow<'a> {
    fn from_candidate(c: &'a EnrichedCandidate) -> Self {
        let m = &c.alert.candidate;
        Self {
            object_id: &c.alert.object_id,
            candid: c.alert.candid,
            jd: m.jd,
            jdstarthist: m.jdstarthist,
            jdendhist: m.jdendhist,
            deltajd: m.deltajd(),
            detected_span_days: detected_span(&c.light_curve).unwrap_or(f64::NAN),
            ra: m.ra,
            dec: m.dec,
            gal_b: c.alert.coordinates.b,
            drb: m.drb,
            ndethist: m.ndethist,
            isdiffpos: &m.isdiffpos,
            magpsf: m.magpsf,
            distpsnr1: m.distpsnr1,
            distpsnr2: m.distpsnr2,
            srmag1: m.srmag1,
            srmag2: m.srmag2,
            ssdistnr: m.ssdistnr,
        }
    }
}

/// Run artifact path, embedding instrument and the rounded span bounds.
pub fn run_csv_path(
    outdir: &Path,
    profile: SearchProfile,
    instrument: Instrument,
    start_jd: f64,
    end_jd: f64,
) -> PathBuf {
    let prefix = match profile {
        SearchProfile::GalacticPlane => "galactic_plane",
        SearchProfile::Hostless => "hostless",
    };
    outdir.join(format!(
        "{prefix}_candidates_{instrument}_alerts_{start_jd:.2}_{end_jd:.2}.csv"
    ))
}

/// Truncate-and-rewrite flush: re-flushing the same set to the same path
/// produces an identical file.
pub fn save_candidates(path: &Path, set: &CandidateSet) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    for candidate in set.iter() {
        writer.serialize(CandidateRow::from_candidate(candidate))?;
    }
    writer.flush()?;
    info!(path = %path.display(), rows = set.len(), "candidate set flushed");
    Ok(())
}
