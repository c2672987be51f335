use serde_json::{json, Value};

use crate::config::thresholds;
use crate::types::{SearchProfile, TimeWindow};

/// A fully-specified find query for the alert archive: catalog, filter
/// document, field projection, and free-form query options. Construction
/// is pure; the client serializes it onto the wire unchanged.
#[derive(Debug, Clone)]
pub struct FindQuery {
    pub catalog: String,
    pub filter: Value,
    pub projection: Value,
    pub kwargs: Value,
}

impl FindQuery {
    pub fn new(catalog: impl Into<String>, filter: Value) -> Self {
        Self {
            catalog: catalog.into(),
            filter,
            // Cutout blobs dominate packet size and are not needed until
            // the report stage fetches them separately.
            projection: json!({
                "_id": 0,
                "cutoutScience": 0,
                "cutoutTemplate": 0,
                "cutoutDifference": 0,
            }),
            kwargs: json!({}),
        }
    }

    pub fn with_kwargs(mut self, kwargs: Value) -> Self {
        self.kwargs = kwargs;
        self
    }
}

/// Build the windowed candidate query for the given profile.
pub fn build_window_query(catalog: &str, window: TimeWindow, profile: SearchProfile) -> FindQuery {
    let filter = match profile {
        SearchProfile::GalacticPlane => galactic_plane_filter(window),
        SearchProfile::Hostless => hostless_filter(window),
    };
    FindQuery::new(catalog, filter)
}

/// Primary galactic-plane selection: quality and latitude cuts plus a
/// three-way disjunction keeping candidates that are either clear of any
/// catalog star, or near one but brightening well past it, or near one
/// whose primary reference magnitude is unset and which passes the
/// secondary-source test.
fn galactic_plane_filter(window: TimeWindow) -> Value {
    let t = thresholds::GALACTIC_LATITUDE_DEG;
    json!({
        "candidate.jd": { "$gt": window.jd_start, "$lt": window.jd_end },
        "candidate.drb": { "$gt": thresholds::MIN_DRB },
        "candidate.ndethist": { "$gt": thresholds::MIN_NDETHIST },
        "candidate.isdiffpos": { "$in": ["t", "1", true, 1] },
        "coordinates.b": { "$gt": -t, "$lt": t },
        "$or": [
            { "candidate.distpsnr1": { "$gt": thresholds::STAR_ASSOC_RADIUS_ARCSEC } },
            { "$and": [
                { "candidate.distpsnr1": { "$lt": thresholds::STAR_ASSOC_RADIUS_ARCSEC } },
                { "$expr": { "$gt": [
                    { "$subtract": ["$candidate.srmag1", "$candidate.magpsf"] },
                    thresholds::MIN_STAR_CONTRAST_MAG,
                ] } },
            ] },
            { "$and": [
                { "candidate.distpsnr1": { "$lt": thresholds::STAR_ASSOC_RADIUS_ARCSEC } },
                { "candidate.srmag1": { "$eq": thresholds::SRMAG_UNSET } },
                { "$or": [
                    { "candidate.distpsnr2": { "$lt": thresholds::STAR_ASSOC_RADIUS_ARCSEC } },
                    { "$expr": { "$gt": [
                        { "$subtract": ["$candidate.srmag2", "$candidate.magpsf"] },
                        thresholds::MIN_STAR_CONTRAST_MAG,
                    ] } },
                ] },
            ] },
        ],
    })
}

/// Hostless selection: tighter real/bogus and detection-count cuts, a
/// strict positive-difference sign, and a hard minimum distance to the
/// nearest catalog star in place of the contrast disjunction.
fn hostless_filter(window: TimeWindow) -> Value {
    let t = thresholds::GALACTIC_LATITUDE_DEG;
    json!({
        "candidate.jd": { "$gt": window.jd_start, "$lt": window.jd_end },
        "candidate.drb": { "$gt": thresholds::hostless::MIN_DRB },
        "candidate.ndethist": { "$gt": thresholds::hostless::MIN_NDETHIST },
        "candidate.isdiffpos": { "$in": ["t", "1"] },
        "coordinates.b": { "$gt": -t, "$lt": t },
        "candidate.distpsnr1": { "$gt": thresholds::hostless::MIN_STAR_DISTANCE_ARCSEC },
    })
}

/// History lookup for one object in the aux catalog.
pub fn build_photometry_query(aux_catalog: &str, object_id: &str) -> FindQuery {
    FindQuery {
        catalog: aux_catalog.to_string(),
        filter: json!({ "_id": object_id }),
        projection: json!({ "prv_candidates.jd": 1, "prv_candidates.magpsf": 1 }),
        kwargs: json!({}),
    }
}

/// Cutout triplet lookup for one alert, by candid.
pub fn build_cutout_query(catalog: &str, candid: i64) -> FindQuery {
    FindQuery {
        catalog: catalog.to_string(),
        filter: json!({ "candid": candid }),
        projection: json!({
            "_id": 0,
            "cutoutScience": 1,
            "cutoutTemplate": 1,
            "cutoutDifference": 1,
        }),
        kwargs: json!({ "limit": 1 }),
    }
}
