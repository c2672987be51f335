use serde_json::Value;
use tracing::debug;

use crate::client::AlertSource;
use crate::error::Result;
use crate::filters::duration_in_bounds;
use crate::query::build_photometry_query;
use crate::types::{mjd_from_jd, Alert, Instrument, PhotometryPoint};

/// A candidate that survived the full cascade, carrying the light curve
/// the authoritative duration check was computed from.
#[derive(Debug, Clone)]
pub struct EnrichedCandidate {
    pub alert: Alert,
    pub light_curve: Vec<PhotometryPoint>,
}

/// Observed duration in days over detected (finite-magnitude) points
/// only. `None` when the curve contains no detections.
pub fn detected_span(points: &[PhotometryPoint]) -> Option<f64> {
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for p in points.iter().filter(|p| p.is_detected()) {
        min = min.min(p.mjd);
        max = max.max(p.mjd);
    }
    (max >= min).then_some(max - min)
}

/// Assemble the full light curve for one candidate: prior detections from
/// the aux catalog merged with the triggering detection, ordered by mjd.
pub async fn fetch_light_curve<S: AlertSource>(
    source: &S,
    instrument: Instrument,
    alert: &Alert,
) -> Result<Vec<PhotometryPoint>> {
    let query = build_photometry_query(&instrument.aux_catalog(), &alert.object_id);
    let docs = source.find_raw(&query).await?;

    let mut points: Vec<PhotometryPoint> = docs
        .iter()
        .flat_map(|doc| {
            doc.get("prv_candidates")
                .and_then(|p| p.as_array())
                .cloned()
                .unwrap_or_default()
        })
        .filter_map(|entry| parse_point(&entry))
        .collect();

    points.push(PhotometryPoint {
        mjd: mjd_from_jd(alert.candidate.jd),
        magpsf: alert.candidate.magpsf,
    });
    points.sort_by(|a, b| a.mjd.total_cmp(&b.mjd));
    Ok(points)
}

/// Upper limits carry a jd but no magnitude; represent them as NaN so the
/// span computation can skip them.
fn parse_point(entry: &Value) -> Option<PhotometryPoint> {
    let jd = entry.get("jd").and_then(|j| j.as_f64())?;
    let magpsf = entry
        .get("magpsf")
        .and_then(|m| m.as_f64())
        .unwrap_or(f64::NAN);
    Some(PhotometryPoint { mjd: mjd_from_jd(jd), magpsf })
}

/// Authoritative duration cut. The packet-level `deltajd` check is a
/// cheap pre-filter; this recomputes the span from actual detections and
/// drops candidates outside the bounds even if they passed it.
pub async fn enrich_and_filter<S: AlertSource>(
    source: &S,
    instrument: Instrument,
    alerts: Vec<Alert>,
) -> Result<Vec<EnrichedCandidate>> {
    let mut survivors = Vec::new();
    for alert in alerts {
        let light_curve = fetch_light_curve(source, instrument, &alert).await?;
        match detected_span(&light_curve) {
            Some(span) if duration_in_bounds(span) => {
                survivors.push(EnrichedCandidate { alert, light_curve });
            }
            span => {
                debug!(
                    object_id = %alert.object_id,
                    span = span.unwrap_or(f64::NAN),
                    "dropped on photometric duration"
                );
            }
        }
    }
    Ok(survivors)
}
