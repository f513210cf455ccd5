//! Country-level AS topology analysis.
//!
//! Fetches the country's ASNs and their neighbours from RIPE Stat, builds the
//! AS graph, ranks ASes by centrality and flags single points of failure.

use crate::bgp::centrality;
use crate::bgp::graph::{AsGraph, UndirectedGraph};
use crate::bgp::ripe::{RipeStatClient, FALLBACK_ASNS};
use crate::config::BgpConfig;
use crate::error::Result;
use crate::models::{BgpMetadata, BgpResults, CentralityRow, RemovalImpact};
use crate::stats;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// AS topology analysis for one country.
pub struct BgpAnalyzer {
    country: String,
    config: BgpConfig,
    cache_dir: PathBuf,
    show_progress: bool,
    country_asns: BTreeSet<u32>,
    graph: AsGraph,
}

impl BgpAnalyzer {
    pub fn new(config: &BgpConfig) -> Self {
        Self {
            country: config.country.to_ascii_uppercase(),
            cache_dir: PathBuf::from(&config.cache_dir),
            config: config.clone(),
            show_progress: false,
            country_asns: BTreeSet::new(),
            graph: AsGraph::new(),
        }
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    pub fn country(&self) -> &str {
        &self.country
    }

    pub fn graph(&self) -> &AsGraph {
        &self.graph
    }

    pub fn country_asns(&self) -> &BTreeSet<u32> {
        &self.country_asns
    }

    pub fn asn_cache_path(&self) -> PathBuf {
        self.cache_dir.join(format!("{}_asns.json", self.country))
    }

    pub fn graph_cache_path(&self) -> PathBuf {
        self.cache_dir.join(format!("as_graph_{}.json", self.country))
    }

    /// Build the graph from the cache when asked to and possible, else from RIPE.
    pub async fn build_graph(&mut self, client: &RipeStatClient, use_cache: bool) -> Result<()> {
        if use_cache && self.load_cached_graph() {
            return Ok(());
        }
        self.fetch_country_asns(client).await;
        self.fetch_relationships(client, self.config.sample_size)
            .await
    }

    /// Load the cached graph. Returns false when there is no usable cache.
    pub fn load_cached_graph(&mut self) -> bool {
        let path = self.graph_cache_path();
        if !path.exists() {
            info!("No cached graph at {}, fetching instead", path.display());
            return false;
        }
        match AsGraph::load(&path) {
            Ok(graph) if graph.is_empty() => {
                info!("Cached graph at {} is empty, fetching instead", path.display());
                false
            }
            Ok(graph) => {
                info!(
                    "Loaded cached graph: {} nodes, {} edges",
                    graph.node_count(),
                    graph.edge_count()
                );
                self.graph = graph;
                if let Ok(asns) = load_asn_cache(&self.asn_cache_path()) {
                    self.country_asns = asns;
                }
                true
            }
            Err(e) => {
                warn!("Ignoring unreadable graph cache {}: {}", path.display(), e);
                false
            }
        }
    }

    /// Fetch the country's ASNs, falling back to the ASN cache and then to
    /// well-known transit ASes.
    pub async fn fetch_country_asns(&mut self, client: &RipeStatClient) -> &BTreeSet<u32> {
        info!("Fetching ASNs registered to {}", self.country);
        let cache_path = self.asn_cache_path();

        self.country_asns = match client.country_asns(&self.country).await {
            Ok(asns) => {
                info!("Found {} ASNs for {}", asns.len(), self.country);
                if let Err(e) = save_asn_cache(&cache_path, &asns) {
                    warn!("Failed to cache ASN list: {}", e);
                }
                asns
            }
            Err(e) => {
                warn!("Country ASN request failed: {}", e);
                match load_asn_cache(&cache_path) {
                    Ok(asns) => {
                        info!("Using {} cached ASNs", asns.len());
                        asns
                    }
                    Err(_) => {
                        warn!("No ASN cache, using {} fallback ASNs", FALLBACK_ASNS.len());
                        FALLBACK_ASNS.into_iter().collect()
                    }
                }
            }
        };
        &self.country_asns
    }

    /// The first `sample_size` country ASNs in ascending order.
    pub fn sample(&self, sample_size: usize) -> Vec<u32> {
        self.country_asns.iter().copied().take(sample_size).collect()
    }

    /// Fetch neighbours for the sampled ASNs and cache the resulting graph.
    pub async fn fetch_relationships(
        &mut self,
        client: &RipeStatClient,
        sample_size: usize,
    ) -> Result<()> {
        let sample = self.sample(sample_size);
        info!("Fetching neighbours for {} ASes", sample.len());

        let progress_bar = progress_bar(sample.len() as u64, self.show_progress);
        let delay = Duration::from_millis(self.config.request_delay_ms);

        for (i, asn) in sample.iter().copied().enumerate() {
            if i > 0 && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            match client.neighbours(asn).await {
                Ok(Some(neighbours)) => self.add_neighbours(asn, &neighbours),
                Ok(None) => debug!("AS{} has no neighbour data", asn),
                Err(e) => warn!("Skipping AS{}: {}", asn, e),
            }
            progress_bar.inc(1);
        }
        progress_bar.finish_and_clear();

        info!(
            "Graph built: {} nodes, {} edges",
            self.graph.node_count(),
            self.graph.edge_count()
        );

        if self.graph.is_empty() {
            warn!("No neighbour data fetched; not caching an empty graph");
            return Ok(());
        }
        let path = self.graph_cache_path();
        if let Err(e) = self.graph.save(&path) {
            warn!("Failed to cache graph at {}: {}", path.display(), e);
        }
        Ok(())
    }

    /// Record `asn` as a country node with edges to each neighbour.
    pub fn add_neighbours(&mut self, asn: u32, neighbours: &[u32]) {
        self.graph.add_node(asn, Some(self.country.as_str()));
        for &neighbour in neighbours {
            self.graph.add_edge(asn, neighbour);
        }
    }

    /// Cached or fetched ASN list size, else the number of country nodes.
    pub fn total_asns(&self) -> usize {
        if self.country_asns.is_empty() {
            self.graph.tagged_with(&self.country)
        } else {
            self.country_asns.len()
        }
    }

    pub fn centrality(&self) -> Result<Vec<CentralityRow>> {
        centrality::compute(&self.graph)
    }

    /// Assemble the stage output from ranked centrality rows.
    pub fn results(&self, rows: &[CentralityRow], simulate_top: usize) -> BgpResults {
        let spofs = identify_spofs(rows, self.config.spof_percentile);
        info!(
            "{} single points of failure at the {}th percentile",
            spofs.len(),
            self.config.spof_percentile
        );

        let undirected = self.graph.undirected();
        let removal_impacts = spofs
            .iter()
            .take(simulate_top)
            .map(|row| simulate_removal(&undirected, row.asn))
            .collect();

        BgpResults {
            metadata: BgpMetadata {
                target_country: self.country.clone(),
                analysis_date: Some(chrono::Utc::now()),
                total_asns: self.total_asns(),
                graph_nodes: self.graph.node_count(),
                graph_edges: self.graph.edge_count(),
            },
            top_critical_ases: rows.iter().take(self.config.top_n).copied().collect(),
            spof_count: spofs.len(),
            spofs: spofs.iter().map(|r| r.asn).collect(),
            removal_impacts,
        }
    }
}

/// Betweenness value at the given percentile of all rows.
pub fn spof_threshold(rows: &[CentralityRow], percentile: f64) -> Option<f64> {
    let values: Vec<f64> = rows.iter().map(|r| r.betweenness).collect();
    stats::quantile(&values, percentile / 100.0)
}

/// Rows at or above the betweenness threshold, in input order.
pub fn identify_spofs(rows: &[CentralityRow], percentile: f64) -> Vec<CentralityRow> {
    let Some(threshold) = spof_threshold(rows, percentile) else {
        return Vec::new();
    };
    rows.iter()
        .filter(|r| r.betweenness >= threshold)
        .copied()
        .collect()
}

/// Effect of removing one AS on the undirected topology.
pub fn simulate_removal(graph: &UndirectedGraph, asn: u32) -> RemovalImpact {
    if graph.is_empty() {
        return RemovalImpact {
            asn,
            components_created: 0,
            connectivity_loss: 0.0,
            nodes_isolated: 0,
        };
    }
    let remaining = graph.without(asn);

    let old_largest = graph.largest_component();
    let new_largest = remaining.largest_component();
    let nodes_isolated = old_largest.saturating_sub(new_largest);

    RemovalImpact {
        asn,
        components_created: remaining.component_sizes().len() as i64
            - graph.component_sizes().len() as i64,
        connectivity_loss: nodes_isolated as f64 / old_largest as f64,
        nodes_isolated,
    }
}

/// Write results as pretty JSON.
pub fn export_results(results: &BgpResults, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(results)?)?;
    info!("BGP results written to {}", path.display());
    Ok(())
}

/// Read results written by [`export_results`].
pub fn load_results(path: &Path) -> Result<BgpResults> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

fn save_asn_cache(path: &Path, asns: &BTreeSet<u32>) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string(asns)?)?;
    Ok(())
}

fn load_asn_cache(path: &Path) -> Result<BTreeSet<u32>> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

fn progress_bar(len: u64, show: bool) -> ProgressBar {
    if !show {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(len);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
    {
        pb.set_style(style.progress_chars("#>-"));
    }
    pb
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config() -> BgpConfig {
        BgpConfig {
            country: "so".to_string(),
            request_delay_ms: 0,
            country_timeout_seconds: 2,
            neighbour_timeout_seconds: 2,
            ripe_url: "http://127.0.0.1:9".to_string(),
            ..Default::default()
        }
    }

    fn analyzer_in(dir: &TempDir) -> BgpAnalyzer {
        BgpAnalyzer::new(&BgpConfig {
            cache_dir: dir.path().display().to_string(),
            ..config()
        })
    }

    fn row(asn: u32, betweenness: f64) -> CentralityRow {
        CentralityRow {
            asn,
            degree: 0.0,
            betweenness,
            pagerank: 0.0,
        }
    }

    /// Two stars joined through AS 1: 10,11 - 1 - 2 - 20,21
    fn barbell(analyzer: &mut BgpAnalyzer) {
        analyzer.add_neighbours(1, &[10, 11, 2]);
        analyzer.add_neighbours(2, &[20, 21]);
    }

    #[test]
    fn test_cache_paths_use_upper_case_country() {
        let dir = TempDir::new().unwrap();
        let analyzer = analyzer_in(&dir);
        assert_eq!(analyzer.country(), "SO");
        assert_eq!(analyzer.asn_cache_path(), dir.path().join("SO_asns.json"));
        assert_eq!(
            analyzer.graph_cache_path(),
            dir.path().join("as_graph_SO.json")
        );
    }

    #[test]
    fn test_spof_threshold_and_identification() {
        let rows = vec![row(1, 0.9), row(2, 0.5), row(3, 0.1), row(4, 0.0)];
        let threshold = spof_threshold(&rows, 50.0).unwrap();
        assert!((threshold - 0.3).abs() < 1e-12);
        let spofs: Vec<u32> = identify_spofs(&rows, 50.0).iter().map(|r| r.asn).collect();
        assert_eq!(spofs, vec![1, 2]);

        // all zero: every row meets the threshold
        let flat = vec![row(1, 0.0), row(2, 0.0)];
        assert_eq!(identify_spofs(&flat, 95.0).len(), 2);
        assert!(identify_spofs(&[], 95.0).is_empty());
    }

    #[test]
    fn test_simulate_removal() {
        let mut analyzer = BgpAnalyzer::new(&config());
        barbell(&mut analyzer);
        let g = analyzer.graph().undirected();

        let hub = simulate_removal(&g, 1);
        assert_eq!(hub.components_created, 2);
        assert_eq!(hub.nodes_isolated, 3);
        assert!((hub.connectivity_loss - 0.5).abs() < 1e-12);

        let leaf = simulate_removal(&g, 10);
        assert_eq!(leaf.components_created, 0);
        assert_eq!(leaf.nodes_isolated, 1);

        let empty = simulate_removal(&AsGraph::new().undirected(), 1);
        assert_eq!(empty.connectivity_loss, 0.0);
        assert_eq!(empty.nodes_isolated, 0);
    }

    #[test]
    fn test_results_from_built_graph() {
        let mut analyzer = BgpAnalyzer::new(&BgpConfig {
            top_n: 3,
            spof_percentile: 80.0,
            ..config()
        });
        barbell(&mut analyzer);
        let rows = analyzer.centrality().unwrap();
        assert_eq!(rows[0].asn, 1);
        assert_eq!(rows[1].asn, 2);

        let results = analyzer.results(&rows, 1);
        assert_eq!(results.metadata.target_country, "SO");
        assert_eq!(results.metadata.total_asns, 2);
        assert_eq!(results.metadata.graph_nodes, 6);
        assert_eq!(results.metadata.graph_edges, 5);
        assert_eq!(results.top_critical_ases.len(), 3);
        assert_eq!(results.spofs, vec![1, 2]);
        assert_eq!(results.spof_count, 2);
        assert_eq!(results.removal_impacts.len(), 1);
        assert_eq!(results.removal_impacts[0].asn, 1);
    }

    #[test]
    fn test_cached_graph_round_trip() {
        let dir = TempDir::new().unwrap();
        let mut analyzer = analyzer_in(&dir);
        assert!(!analyzer.load_cached_graph());

        barbell(&mut analyzer);
        analyzer.graph().save(&analyzer.graph_cache_path()).unwrap();
        save_asn_cache(&analyzer.asn_cache_path(), &BTreeSet::from([1, 2, 3])).unwrap();

        let mut reloaded = analyzer_in(&dir);
        assert!(reloaded.load_cached_graph());
        assert_eq!(reloaded.graph(), analyzer.graph());
        assert_eq!(reloaded.total_asns(), 3);
    }

    #[test]
    fn test_empty_cached_graph_is_a_miss() {
        let dir = TempDir::new().unwrap();
        let mut analyzer = analyzer_in(&dir);
        AsGraph::new().save(&analyzer.graph_cache_path()).unwrap();
        assert!(!analyzer.load_cached_graph());
    }

    #[test]
    fn test_corrupt_cache_is_ignored() {
        let dir = TempDir::new().unwrap();
        let mut analyzer = analyzer_in(&dir);
        std::fs::write(analyzer.graph_cache_path(), "{ nope").unwrap();
        assert!(!analyzer.load_cached_graph());
        assert!(analyzer.graph().is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_service_falls_back() {
        let dir = TempDir::new().unwrap();
        let mut analyzer = analyzer_in(&dir);
        let client = RipeStatClient::new(&config()).unwrap();

        let asns = analyzer.fetch_country_asns(&client).await.clone();
        assert_eq!(asns, BTreeSet::from(FALLBACK_ASNS));
        assert_eq!(analyzer.sample(3), vec![174, 209, 701]);

        // cached list wins over the fallback
        save_asn_cache(&analyzer.asn_cache_path(), &BTreeSet::from([42])).unwrap();
        let asns = analyzer.fetch_country_asns(&client).await.clone();
        assert_eq!(asns.into_iter().collect::<Vec<_>>(), vec![42]);

        // neighbour failures are skipped and nothing is cached
        analyzer.fetch_relationships(&client, 1).await.unwrap();
        assert!(analyzer.graph().is_empty());
        assert!(!analyzer.graph_cache_path().exists());
        assert_eq!(analyzer.country_asns(), &BTreeSet::from([42]));
    }

    #[test]
    fn test_export_and_load_results() {
        let dir = TempDir::new().unwrap();
        let mut analyzer = BgpAnalyzer::new(&config());
        barbell(&mut analyzer);
        let rows = analyzer.centrality().unwrap();
        let results = analyzer.results(&rows, 2);

        let path = dir.path().join("out").join("bgp_analysis_results.json");
        export_results(&results, &path).unwrap();
        let loaded = load_results(&path).unwrap();
        assert_eq!(loaded.spofs, results.spofs);
        assert_eq!(loaded.metadata.graph_edges, 5);

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert!(raw["top_critical_ases"][0]["ASN"].is_u64());
    }
}
