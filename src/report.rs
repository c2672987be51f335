use std::collections::HashMap;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::client::{AlertSource, TriageClient};
use crate::error::Result;
use crate::photometry::EnrichedCandidate;
use crate::query::build_cutout_query;
use crate::search::RunSummary;
use crate::types::Instrument;

/// Reference catalogs each candidate is cross-matched against.
const CROSSMATCH_CATALOGS: &[&str] = &["CLU_20190625", "milliquas"];
/// Cross-match cone radius, arcsec.
const CROSSMATCH_RADIUS_ARCSEC: f64 = 5.0;
/// Cutout kinds carried by an alert packet.
const CUTOUT_KINDS: &[&str] = &["cutoutScience", "cutoutTemplate", "cutoutDifference"];

#[derive(Debug, Clone)]
pub struct ReportOptions {
    pub phot_dir: PathBuf,
    pub thumbnails_dir: PathBuf,
    /// One photometry CSV per candidate instead of a combined file.
    pub lightcurves_separately: bool,
    /// Download raw cutout triplets for each candidate.
    pub fetch_thumbnails: bool,
}

#[derive(Debug, Clone)]
pub struct AnnotatedCandidate {
    pub candidate: EnrichedCandidate,
    /// Human-readable cross-match summaries, one per catalog with hits.
    pub annotations: Vec<String>,
}

/// Collapse repeated detections of the same object down to the packet
/// with the newest `jd`, preserving first-seen order.
pub fn deduplicate(candidates: Vec<EnrichedCandidate>) -> Vec<EnrichedCandidate> {
    let mut order: Vec<String> = Vec::new();
    let mut newest: HashMap<String, EnrichedCandidate> = HashMap::new();
    for c in candidates {
        let id = c.alert.object_id.clone();
        let replace = match newest.get(&id) {
            None => {
                order.push(id.clone());
                true
            }
            Some(existing) => existing.alert.candidate.jd < c.alert.candidate.jd,
        };
        if replace {
            newest.insert(id, c);
        }
    }
    order
        .into_iter()
        .filter_map(|id| newest.remove(&id))
        .collect()
}

/// Summarize one catalog's cone-search hits for the report.
fn annotate_matches(catalog: &str, matches: &[Value]) -> Option<String> {
    if matches.is_empty() {
        return None;
    }
    let name = matches[0]
        .get("name")
        .or_else(|| matches[0].get("designation"))
        .and_then(|n| n.as_str());
    Some(match name {
        Some(name) => format!("{catalog}: {} match(es), nearest {name}", matches.len()),
        None => format!("{catalog}: {} match(es)", matches.len()),
    })
}

/// Cone-search every candidate against the reference catalogs.
/// Best-effort per candidate: a failed lookup is logged and leaves the
/// candidate unannotated.
pub async fn crossmatch_candidates<S: AlertSource>(
    source: &S,
    candidates: Vec<EnrichedCandidate>,
) -> Vec<AnnotatedCandidate> {
    let mut annotated = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let mut annotations = Vec::new();
        for catalog in CROSSMATCH_CATALOGS {
            let result = source
                .cone_search(
                    catalog,
                    candidate.alert.candidate.ra,
                    candidate.alert.candidate.dec,
                    CROSSMATCH_RADIUS_ARCSEC,
                )
                .await;
            match result {
                Ok(matches) => {
                    if let Some(note) = annotate_matches(catalog, &matches) {
                        annotations.push(note);
                    }
                }
                Err(e) => warn!(
                    object_id = %candidate.alert.object_id,
                    catalog = %catalog,
                    "cross-match failed: {e}"
                ),
            }
        }
        annotated.push(AnnotatedCandidate { candidate, annotations });
    }
    annotated
}

#[derive(Debug, Serialize)]
struct PhotometryRow<'a> {
    object_id: &'a str,
    mjd: f64,
    magpsf: f64,
}

/// Write light curves under `photometry/`: either one combined CSV or
/// one file per candidate for external per-object plotting.
pub fn write_photometry_files(
    candidates: &[AnnotatedCandidate],
    opts: &ReportOptions,
) -> Result<()> {
    if opts.lightcurves_separately {
        for ac in candidates {
            let path = opts
                .phot_dir
                .join(format!("{}.csv", ac.candidate.alert.object_id));
            let mut writer = csv::Writer::from_path(&path)?;
            for p in &ac.candidate.light_curve {
                writer.serialize(PhotometryRow {
                    object_id: &ac.candidate.alert.object_id,
                    mjd: p.mjd,
                    magpsf: p.magpsf,
                })?;
            }
            writer.flush()?;
        }
    } else {
        let path = opts.phot_dir.join("photometry.csv");
        let mut writer = csv::Writer::from_path(&path)?;
        for ac in candidates {
            for p in &ac.candidate.light_curve {
                writer.serialize(PhotometryRow {
                    object_id: &ac.candidate.alert.object_id,
                    mjd: p.mjd,
                    magpsf: p.magpsf,
                })?;
            }
        }
        writer.flush()?;
    }
    Ok(())
}

/// Cutout payloads arrive either as a bare base64 string or wrapped in a
/// `stampData` field.
fn cutout_bytes(doc: &Value, kind: &str) -> Option<Vec<u8>> {
    let raw = match doc.get(kind)? {
        Value::String(s) => s.as_str(),
        obj => obj.get("stampData")?.as_str()?,
    };
    BASE64.decode(raw).ok()
}

/// Download each candidate's raw cutout triplet (gzipped FITS) into
/// `thumbnails/`. Rendering is left to external tooling. Best-effort:
/// failures are logged per candidate.
pub async fn fetch_thumbnails<S: AlertSource>(
    source: &S,
    instrument: Instrument,
    candidates: &[AnnotatedCandidate],
    opts: &ReportOptions,
) {
    let catalog = instrument.alert_catalog();
    for ac in candidates {
        let alert = &ac.candidate.alert;
        let query = build_cutout_query(&catalog, alert.candid);
        let docs = match source.find_raw(&query).await {
            Ok(docs) => docs,
            Err(e) => {
                warn!(object_id = %alert.object_id, "cutout fetch failed: {e}");
                continue;
            }
        };
        let Some(doc) = docs.first() else {
            warn!(object_id = %alert.object_id, candid = alert.candid, "no cutouts returned");
            continue;
        };
        for kind in CUTOUT_KINDS {
            let Some(bytes) = cutout_bytes(doc, kind) else {
                continue;
            };
            let stem = kind.trim_start_matches("cutout").to_lowercase();
            let path = opts
                .thumbnails_dir
                .join(format!("{}_{}_{stem}.fits.gz", alert.object_id, alert.candid));
            if let Err(e) = std::fs::write(&path, bytes) {
                warn!(path = %path.display(), "cutout write failed: {e}");
            }
        }
    }
}

/// Render the run summary document next to the candidate CSV. PDF
/// assembly from these artifacts is handled by external tooling.
pub fn write_summary(
    path: &Path,
    candidates: &[AnnotatedCandidate],
    run: &RunSummary,
) -> Result<()> {
    let mut doc = String::new();
    doc.push_str("# Candidate summary\n\n");
    doc.push_str(&format!(
        "{} candidate(s) accepted over {} queried window(s).\n\n",
        candidates.len(),
        run.windows_queried,
    ));
    if let Some(from) = run.abandoned_from {
        doc.push_str(&format!(
            "**Partial coverage**: the span from JD {from:.4} was abandoned \
             after repeated query failures and is not represented below.\n\n"
        ));
    }
    doc.push_str("| object | jd | magpsf | deltajd | annotations |\n");
    doc.push_str("|---|---|---|---|---|\n");
    for ac in candidates {
        let m = &ac.candidate.alert.candidate;
        doc.push_str(&format!(
            "| {} | {:.4} | {:.2} | {:.1} | {} |\n",
            ac.candidate.alert.object_id,
            m.jd,
            m.magpsf,
            m.deltajd(),
            ac.annotations.join("; "),
        ));
    }
    std::fs::write(path, doc)?;
    info!(path = %path.display(), "summary written");
    Ok(())
}

/// Post accepted candidates to the external triage service. Best-effort
/// per candidate.
pub async fn post_to_triage(
    triage: &TriageClient,
    candidates: &[AnnotatedCandidate],
    group_ids: &[i64],
) {
    for ac in candidates {
        if let Err(e) = triage.post_candidate(&ac.candidate.alert, group_ids).await {
            warn!(
                object_id = %ac.candidate.alert.object_id,
                "triage post failed: {e}"
            );
        }
    }
}
