use tracing::debug;

use crate::config::thresholds;
use crate::types::{Alert, SearchProfile};

/// Detection-history span cut, exclusive on both ends. Applied twice per
/// candidate: first on the packet's `jdstarthist`/`jdendhist` as a cheap
/// pre-filter, then authoritatively on the fetched photometry.
pub fn duration_in_bounds(span_days: f64) -> bool {
    thresholds::MIN_DURATION_DAYS < span_days && span_days < thresholds::MAX_DURATION_DAYS
}

/// Moving-object exclusion. Keeps candidates far from any known
/// solar-system object, plus the sentinel range meaning "no match known".
pub fn clear_of_solar_system(ssdistnr: f64) -> bool {
    ssdistnr > thresholds::SSDIST_MIN_ARCSEC || ssdistnr < thresholds::SSDIST_UNKNOWN_BELOW
}

/// Record-level cascade for one candidate. Predicates are pure and
/// order-independent; a candidate must pass all that the profile applies.
pub fn passes_prefilter(alert: &Alert, profile: SearchProfile) -> bool {
    let duration_ok = duration_in_bounds(alert.candidate.deltajd());
    match profile {
        SearchProfile::GalacticPlane => {
            duration_ok && clear_of_solar_system(alert.candidate.ssdistnr)
        }
        // Hostless candidates were already held to stricter query-side
        // cuts; only the duration bound applies here.
        SearchProfile::Hostless => duration_ok,
    }
}

/// Apply the record-level cascade to one window's worth of candidates.
pub fn apply_prefilter(alerts: Vec<Alert>, profile: SearchProfile) -> Vec<Alert> {
    let before = alerts.len();
    let survivors: Vec<Alert> = alerts
        .into_iter()
        .filter(|a| passes_prefilter(a, profile))
        .collect();
    debug!(
        profile = %profile,
        before,
        after = survivors.len(),
        "record-level cascade applied"
    );
    survivors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Alert, CandidateMetrics, GalacticCoordinates};

    fn alert(jdstarthist: f64, jdendhist: f64, ssdistnr: f64) -> Alert {
        Alert {
            object_id: "ZTF23aaaaaaaa".to_string(),
            candid: 1,
            candidate: CandidateMetrics {
                jd: jdendhist,
                jdstarthist,
                jdendhist,
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
                ssdistnr,
            },
            coordinates: GalacticCoordinates { b: 3.0, l: None },
        }
    }

    #[test]
    fn duration_bounds_are_exclusive() {
        assert!(!duration_in_bounds(20.0));
        assert!(duration_in_bounds(20.01));
        assert!(duration_in_bounds(199.99));
        assert!(!duration_in_bounds(200.0));
    }

    #[test]
    fn solar_system_bounds_are_exclusive() {
        assert!(!clear_of_solar_system(2.0));
        assert!(clear_of_solar_system(2.01));
        assert!(!clear_of_solar_system(-0.5));
        assert!(clear_of_solar_system(-0.51));
        // Kowalski's "no match" sentinel must survive.
        assert!(clear_of_solar_system(-999.0));
    }

    #[test]
    fn moving_object_is_rejected_in_galactic_profile_only() {
        let a = alert(100.0, 150.0, 1.0);
        assert!(!passes_prefilter(&a, SearchProfile::GalacticPlane));
        assert!(passes_prefilter(&a, SearchProfile::Hostless));
    }

    #[test]
    fn good_candidate_passes_both_profiles() {
        let a = alert(100.0, 150.0, 5.0);
        assert!(passes_prefilter(&a, SearchProfile::GalacticPlane));
        assert!(passes_prefilter(&a, SearchProfile::Hostless));
    }

    #[test]
    fn cascade_is_idempotent() {
        let mut batch = vec![
            alert(100.0, 150.0, 5.0),
            alert(100.0, 120.5, -999.0),
            alert(100.0, 119.0, 1.0),
            alert(100.0, 400.0, 5.0),
        ];
        for (i, a) in batch.iter_mut().enumerate() {
            a.candid = i as i64;
        }
        let once = apply_prefilter(batch, SearchProfile::GalacticPlane);
        let ids: Vec<i64> = once.iter().map(|a| a.candid).collect();
        let twice = apply_prefilter(once, SearchProfile::GalacticPlane);
        assert_eq!(ids, twice.iter().map(|a| a.candid).collect::<Vec<_>>());
        assert_eq!(twice.len(), 2);
    }
}
