use std::time::Duration;

use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::{Config, QUERY_TIMEOUT_SECS};
use crate::error::{AppError, Result};
use crate::query::FindQuery;
use crate::types::Alert;

/// Seam between the retrieval loop and the query service. The production
/// implementation is [`KowalskiClient`]; tests substitute a scripted
/// source.
#[allow(async_fn_in_trait)]
pub trait AlertSource {
    /// Run a find query and deserialize the returned documents into
    /// alert packets. A document missing a required field is a
    /// data-quality error, not a silent drop.
    async fn find_alerts(&self, query: &FindQuery) -> Result<Vec<Alert>>;

    /// Run a find query and return the raw documents.
    async fn find_raw(&self, query: &FindQuery) -> Result<Vec<Value>>;

    /// Positional cross-match against a reference catalog.
    async fn cone_search(
        &self,
        catalog: &str,
        ra: f64,
        dec: f64,
        radius_arcsec: f64,
    ) -> Result<Vec<Value>>;
}

/// Token-authenticated client for a Kowalski-style alert archive. The
/// service may parallelize one query internally; `max_n_threads` rides
/// along in the query kwargs as an opaque knob.
pub struct KowalskiClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl KowalskiClient {
    pub fn new(cfg: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(QUERY_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            http,
            base_url: cfg.kowalski_url.trim_end_matches('/').to_string(),
            token: cfg.kowalski_token.clone(),
        })
    }

    async fn api_query(&self, body: Value) -> Result<Value> {
        let url = format!("{}/api/queries", self.base_url);
        let resp: Value = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let status = resp.get("status").and_then(|s| s.as_str()).unwrap_or("");
        if status != "success" {
            let message = resp
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("no message");
            return Err(AppError::Query(format!("service returned {status}: {message}")));
        }
        Ok(resp.get("data").cloned().unwrap_or(Value::Null))
    }

    async fn run_find(&self, query: &FindQuery) -> Result<Vec<Value>> {
        let body = json!({
            "query_type": "find",
            "query": {
                "catalog": query.catalog,
                "filter": query.filter,
                "projection": query.projection,
            },
            "kwargs": query.kwargs,
        });
        debug!(catalog = %query.catalog, "issuing find query");
        let data = self.api_query(body).await?;
        unwrap_documents(data)
    }
}

/// The result payload is either a bare document array or nested under the
/// per-catalog batch structure (`data.default.data`).
fn unwrap_documents(data: Value) -> Result<Vec<Value>> {
    if let Value::Array(docs) = data {
        return Ok(docs);
    }
    if let Some(Value::Array(docs)) = data.pointer("/default/data").cloned() {
        return Ok(docs);
    }
    Err(AppError::Query(format!(
        "unexpected result structure: {}",
        truncate_for_log(&data)
    )))
}

fn truncate_for_log(v: &Value) -> String {
    let s = v.to_string();
    if s.len() > 200 {
        format!("{}…", &s[..200])
    } else {
        s
    }
}

fn parse_alert(doc: Value) -> Result<Alert> {
    let object_id = doc
        .get("objectId")
        .and_then(|o| o.as_str())
        .unwrap_or("<no objectId>")
        .to_string();
    serde_json::from_value(doc).map_err(|e| AppError::MalformedRecord {
        object_id,
        reason: e.to_string(),
    })
}

impl AlertSource for KowalskiClient {
    async fn find_alerts(&self, query: &FindQuery) -> Result<Vec<Alert>> {
        let docs = self.run_find(query).await?;
        docs.into_iter().map(parse_alert).collect()
    }

    async fn find_raw(&self, query: &FindQuery) -> Result<Vec<Value>> {
        self.run_find(query).await
    }

    async fn cone_search(
        &self,
        catalog: &str,
        ra: f64,
        dec: f64,
        radius_arcsec: f64,
    ) -> Result<Vec<Value>> {
        let body = json!({
            "query_type": "cone_search",
            "query": {
                "object_coordinates": {
                    "cone_search_radius": radius_arcsec,
                    "cone_search_unit": "arcsec",
                    "radec": { "query": [ra, dec] },
                },
                "catalogs": {
                    catalog: { "filter": {}, "projection": { "_id": 0 } },
                },
            },
            "kwargs": {},
        });
        let data = self.api_query(body).await?;
        // Matches come back keyed by catalog, then by query position.
        let matches = data
            .get(catalog)
            .and_then(|c| c.as_object())
            .and_then(|c| c.values().next())
            .and_then(|m| m.as_array())
            .cloned()
            .unwrap_or_default();
        Ok(matches)
    }
}

/// Thin client for the external triage service. Posting is best-effort:
/// a failed post is logged and does not fail the run.
pub struct TriageClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl TriageClient {
    pub fn new(cfg: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            base_url: cfg.fritz_url.trim_end_matches('/').to_string(),
            token: cfg.fritz_token.clone(),
        })
    }

    pub async fn post_candidate(&self, alert: &Alert, group_ids: &[i64]) -> Result<()> {
        let Some(token) = &self.token else {
            return Err(AppError::Config(
                "FRITZ_TOKEN must be set to post candidates for triage".to_string(),
            ));
        };
        let url = format!("{}/api/candidates", self.base_url);
        let body = json!({
            "id": alert.object_id,
            "ra": alert.candidate.ra,
            "dec": alert.candidate.dec,
            "filter_ids": group_ids,
            "passed_at": chrono::Utc::now().to_rfc3339(),
        });
        let resp = self
            .http
            .post(&url)
            .header("Authorization", format!("token {token}"))
            .json(&body)
            .send()
            .await?;
        if !resp.status().is_success() {
            warn!(
                object_id = %alert.object_id,
                status = %resp.status(),
                "triage post rejected"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_array_unwraps() {
        let docs = unwrap_documents(json!([{ "a": 1 }, { "a": 2 }])).unwrap();
        assert_eq!(docs.len(), 2);
    }

    #[test]
    fn batch_structure_unwraps() {
        let docs = unwrap_documents(json!({ "default": { "data": [{ "a": 1 }] } })).unwrap();
        assert_eq!(docs.len(), 1);
    }

    #[test]
    fn scalar_payload_is_a_query_error() {
        assert!(unwrap_documents(json!(42)).is_err());
    }

    #[test]
    fn missing_field_surfaces_object_id() {
        // No `candidate` block at all — must fail loudly, not filter.
        let err = parse_alert(json!({ "objectId": "ZTF23aaabbbb", "candid": 1 })).unwrap_err();
        match err {
            AppError::MalformedRecord { object_id, .. } => {
                assert_eq!(object_id, "ZTF23aaabbbb");
            }
            other => panic!("expected MalformedRecord, got {other}"),
        }
    }

    #[test]
    fn complete_packet_parses() {
        let alert = parse_alert(json!({
            "objectId": "ZTF23aaabbbb",
            "candid": 23941234,
            "candidate": {
                "jd": 2_460_150.5,
                "jdstarthist": 2_460_100.5,
                "jdendhist": 2_460_150.5,
                "ra": 281.2, "dec": -1.9,
                "drb": 0.97, "ndethist": 14,
                "isdiffpos": "t",
                "magpsf": 17.2,
                "distpsnr1": 4.0, "distpsnr2": 9.1,
                "srmag1": 21.2, "srmag2": 20.9,
                "ssdistnr": -999.0,
            },
            "coordinates": { "b": 2.4 },
        }))
        .unwrap();
        assert_eq!(alert.object_id, "ZTF23aaabbbb");
        assert!((alert.candidate.deltajd() - 50.0).abs() < 1e-9);
    }
}
