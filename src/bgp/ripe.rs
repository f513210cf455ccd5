//! RIPE Stat data API client.

use crate::config::BgpConfig;
use crate::error::{Result, TerrainError};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::debug;

/// Well-known transit ASes used when no country list can be obtained.
pub const FALLBACK_ASNS: [u32; 7] = [7018, 3356, 174, 1299, 6939, 701, 209];

#[derive(Debug, Deserialize)]
struct RipeResponse<T> {
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct CountryResourceData {
    #[serde(default)]
    resources: Option<CountryResources>,
}

#[derive(Debug, Deserialize)]
struct CountryResources {
    #[serde(default)]
    asn: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct NeighbourData {
    #[serde(default)]
    neighbours: Option<Vec<Neighbour>>,
}

#[derive(Debug, Deserialize)]
struct Neighbour {
    #[serde(default)]
    asn: Option<Value>,
}

/// Accepts integers and digit strings; zero and everything else is dropped.
fn asn_from_value(value: &Value) -> Option<u32> {
    let asn = match value {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) => {
            s.parse().ok()
        }
        _ => None,
    }?;
    (asn != 0).then_some(asn)
}

/// ASNs from a `country-resource-list` response body.
pub fn parse_country_asns(body: &str) -> Result<BTreeSet<u32>> {
    let response: RipeResponse<CountryResourceData> = serde_json::from_str(body)?;
    Ok(response
        .data
        .and_then(|d| d.resources)
        .map(|r| r.asn.iter().filter_map(asn_from_value).collect())
        .unwrap_or_default())
}

/// Neighbour ASNs from an `asn-neighbours` response body.
///
/// `None` when the response carries no neighbour list at all.
pub fn parse_neighbours(body: &str) -> Result<Option<Vec<u32>>> {
    let response: RipeResponse<NeighbourData> = serde_json::from_str(body)?;
    Ok(response.data.and_then(|d| d.neighbours).map(|ns| {
        ns.iter()
            .filter_map(|n| n.asn.as_ref().and_then(asn_from_value))
            .collect()
    }))
}

/// HTTP client for the two RIPE Stat endpoints used by the topology stage.
pub struct RipeStatClient {
    http_client: reqwest::Client,
    base_url: String,
    country_timeout: Duration,
    neighbour_timeout: Duration,
}

impl RipeStatClient {
    pub fn new(config: &BgpConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("influence-terrain/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http_client,
            base_url: config.ripe_url.trim_end_matches('/').to_string(),
            country_timeout: Duration::from_secs(config.country_timeout_seconds),
            neighbour_timeout: Duration::from_secs(config.neighbour_timeout_seconds),
        })
    }

    pub fn country_url(&self, country: &str) -> String {
        format!(
            "{}/data/country-resource-list/data.json?resource={}",
            self.base_url, country
        )
    }

    pub fn neighbours_url(&self, asn: u32) -> String {
        format!(
            "{}/data/asn-neighbours/data.json?resource=AS{}",
            self.base_url, asn
        )
    }

    /// All ASNs registered to `country`.
    pub async fn country_asns(&self, country: &str) -> Result<BTreeSet<u32>> {
        let body = self
            .get(&self.country_url(country), self.country_timeout)
            .await?;
        parse_country_asns(&body)
    }

    /// Neighbours of one AS, `None` when RIPE returned no neighbour list.
    pub async fn neighbours(&self, asn: u32) -> Result<Option<Vec<u32>>> {
        let body = self
            .get(&self.neighbours_url(asn), self.neighbour_timeout)
            .await?;
        parse_neighbours(&body)
    }

    async fn get(&self, url: &str, timeout: Duration) -> Result<String> {
        debug!("GET {}", url);
        let response = self
            .http_client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TerrainError::Request(format!(
                        "timed out after {}s: {}",
                        timeout.as_secs(),
                        url
                    ))
                } else if e.is_connect() {
                    TerrainError::Request(format!("cannot connect to {}", self.base_url))
                } else {
                    TerrainError::Http(e)
                }
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(TerrainError::Api { status, body });
        }

        Ok(response.text().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture(name: &str) -> String {
        let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("fixtures")
            .join(name);
        std::fs::read_to_string(path).unwrap()
    }

    #[test]
    fn test_parse_country_fixture() {
        let asns = parse_country_asns(&fixture("ripe_country_resources.json")).unwrap();
        assert_eq!(asns.into_iter().collect::<Vec<_>>(), vec![174, 701, 3356, 7018]);
    }

    #[test]
    fn test_parse_neighbours_fixture() {
        let ns = parse_neighbours(&fixture("ripe_asn_neighbours.json"))
            .unwrap()
            .unwrap();
        assert_eq!(ns, vec![174, 3356, 1299]);
    }

    #[test]
    fn test_parse_mixed_asn_entries() {
        let body = r#"{"data":{"resources":{"asn":[1, "2", "AS3", null, 0, "", 4.5, "70"]}}}"#;
        let asns = parse_country_asns(body).unwrap();
        assert_eq!(asns.into_iter().collect::<Vec<_>>(), vec![1, 2, 70]);
    }

    #[test]
    fn test_missing_sections() {
        assert!(parse_country_asns(r#"{"data":{}}"#).unwrap().is_empty());
        assert!(parse_country_asns(r#"{}"#).unwrap().is_empty());
        assert!(parse_country_asns(r#"{"data":null}"#).unwrap().is_empty());
        assert_eq!(parse_neighbours(r#"{}"#).unwrap(), None);
        assert_eq!(parse_neighbours(r#"{"status":"ok","data":null}"#).unwrap(), None);
        assert_eq!(parse_neighbours(r#"{"data":{}}"#).unwrap(), None);
        assert_eq!(
            parse_neighbours(r#"{"data":{"neighbours":[]}}"#).unwrap(),
            Some(vec![])
        );
        assert!(parse_neighbours("not json").is_err());
    }

    #[test]
    fn test_urls() {
        let config = BgpConfig {
            ripe_url: "https://stat.example/".to_string(),
            ..Default::default()
        };
        let client = RipeStatClient::new(&config).unwrap();
        assert_eq!(
            client.country_url("SO"),
            "https://stat.example/data/country-resource-list/data.json?resource=SO"
        );
        assert_eq!(
            client.neighbours_url(37371),
            "https://stat.example/data/asn-neighbours/data.json?resource=AS37371"
        );
    }
}
