//! AS relationship graph.
//!
//! Edges are directed (`asn -> neighbour`) as fetched; centrality and removal
//! simulation work on the undirected view.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::Path;

/// Directed AS graph with optional country tags on nodes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AsGraph {
    nodes: BTreeMap<u32, Option<String>>,
    edges: BTreeSet<(u32, u32)>,
}

#[derive(Serialize, Deserialize)]
struct NodeEntry {
    asn: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    country: Option<String>,
}

/// On-disk form of an [`AsGraph`].
#[derive(Serialize, Deserialize)]
struct GraphFile {
    nodes: Vec<NodeEntry>,
    edges: Vec<[u32; 2]>,
}

impl AsGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node, tagging it with `country`. An existing tag is kept.
    pub fn add_node(&mut self, asn: u32, country: Option<&str>) {
        let entry = self.nodes.entry(asn).or_insert(None);
        if entry.is_none() {
            *entry = country.map(str::to_string);
        }
    }

    /// Add `from -> to`, creating untagged endpoints. Self-loops are ignored.
    pub fn add_edge(&mut self, from: u32, to: u32) -> bool {
        if from == to {
            return false;
        }
        self.nodes.entry(from).or_insert(None);
        self.nodes.entry(to).or_insert(None);
        self.edges.insert((from, to))
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// ASNs in ascending order.
    pub fn asns(&self) -> Vec<u32> {
        self.nodes.keys().copied().collect()
    }

    /// Number of nodes tagged with `country`.
    pub fn tagged_with(&self, country: &str) -> usize {
        self.nodes
            .values()
            .filter(|c| c.as_deref() == Some(country))
            .count()
    }

    /// Out-neighbour indices, aligned with [`AsGraph::asns`].
    pub fn out_adjacency(&self) -> Vec<Vec<usize>> {
        let index = self.index();
        let mut adj = vec![Vec::new(); self.nodes.len()];
        for (from, to) in &self.edges {
            adj[index[from]].push(index[to]);
        }
        adj
    }

    /// Undirected view over the same nodes.
    pub fn undirected(&self) -> UndirectedGraph {
        let index = self.index();
        let mut adj = vec![BTreeSet::new(); self.nodes.len()];
        for (from, to) in &self.edges {
            let (a, b) = (index[from], index[to]);
            adj[a].insert(b);
            adj[b].insert(a);
        }
        UndirectedGraph {
            asns: self.asns(),
            adj: adj.into_iter().map(|s| s.into_iter().collect()).collect(),
        }
    }

    fn index(&self) -> BTreeMap<u32, usize> {
        self.nodes.keys().enumerate().map(|(i, a)| (*a, i)).collect()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file = GraphFile {
            nodes: self
                .nodes
                .iter()
                .map(|(asn, country)| NodeEntry {
                    asn: *asn,
                    country: country.clone(),
                })
                .collect(),
            edges: self.edges.iter().map(|(a, b)| [*a, *b]).collect(),
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string(&file)?)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let file: GraphFile = serde_json::from_str(&content)?;

        let mut graph = Self::new();
        for node in file.nodes {
            graph.add_node(node.asn, node.country.as_deref());
        }
        for [a, b] in file.edges {
            graph.add_edge(a, b);
        }
        Ok(graph)
    }
}

/// Index-based undirected graph.
#[derive(Debug, Clone, PartialEq)]
pub struct UndirectedGraph {
    pub asns: Vec<u32>,
    /// Sorted neighbour indices per node.
    pub adj: Vec<Vec<usize>>,
}

impl UndirectedGraph {
    pub fn len(&self) -> usize {
        self.asns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.asns.is_empty()
    }

    pub fn degree(&self, i: usize) -> usize {
        self.adj[i].len()
    }

    /// Sizes of connected components.
    pub fn component_sizes(&self) -> Vec<usize> {
        let n = self.len();
        let mut seen = vec![false; n];
        let mut sizes = Vec::new();

        for start in 0..n {
            if seen[start] {
                continue;
            }
            seen[start] = true;
            let mut queue = VecDeque::from([start]);
            let mut size = 0;
            while let Some(v) = queue.pop_front() {
                size += 1;
                for &w in &self.adj[v] {
                    if !seen[w] {
                        seen[w] = true;
                        queue.push_back(w);
                    }
                }
            }
            sizes.push(size);
        }
        sizes
    }

    /// Size of the largest component; 0 for an empty graph.
    pub fn largest_component(&self) -> usize {
        self.component_sizes().into_iter().max().unwrap_or(0)
    }

    /// Copy of this graph with one AS removed.
    pub fn without(&self, asn: u32) -> Self {
        let Some(removed) = self.asns.iter().position(|&a| a == asn) else {
            return self.clone();
        };
        let remap = |i: usize| if i > removed { i - 1 } else { i };

        let asns = self
            .asns
            .iter()
            .copied()
            .filter(|&a| a != asn)
            .collect();
        let adj = self
            .adj
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != removed)
            .map(|(_, ns)| {
                ns.iter()
                    .copied()
                    .filter(|&j| j != removed)
                    .map(remap)
                    .collect()
            })
            .collect();
        Self { asns, adj }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path_graph() -> AsGraph {
        // 1 - 2 - 3 - 4, plus isolated pair 10 - 11
        let mut g = AsGraph::new();
        g.add_node(1, Some("US"));
        g.add_node(2, Some("US"));
        g.add_edge(1, 2);
        g.add_edge(2, 3);
        g.add_edge(3, 4);
        g.add_edge(10, 11);
        g
    }

    #[test]
    fn test_edges_ignore_loops_and_duplicates() {
        let mut g = AsGraph::new();
        assert!(g.add_edge(1, 2));
        assert!(!g.add_edge(1, 2));
        assert!(!g.add_edge(3, 3));
        assert!(g.add_edge(2, 1));
        assert_eq!(g.edge_count(), 2);
        assert_eq!(g.node_count(), 2);

        let u = g.undirected();
        assert_eq!(u.adj, vec![vec![1], vec![0]]);
    }

    #[test]
    fn test_country_tags() {
        let mut g = path_graph();
        assert_eq!(g.tagged_with("US"), 2);
        g.add_node(1, Some("DE"));
        assert_eq!(g.tagged_with("DE"), 0);
        assert_eq!(g.tagged_with("US"), 2);
        g.add_node(3, Some("US"));
        assert_eq!(g.tagged_with("US"), 3);
    }

    #[test]
    fn test_components_and_removal() {
        let u = path_graph().undirected();
        let mut sizes = u.component_sizes();
        sizes.sort();
        assert_eq!(sizes, vec![2, 4]);
        assert_eq!(u.largest_component(), 4);

        let cut = u.without(2);
        assert_eq!(cut.len(), 5);
        let mut sizes = cut.component_sizes();
        sizes.sort();
        assert_eq!(sizes, vec![1, 2, 2]);

        assert_eq!(u.without(999), u);
    }

    #[test]
    fn test_empty_graph_largest_component() {
        assert_eq!(AsGraph::new().undirected().largest_component(), 0);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("cache").join("as_graph_US.json");
        let g = path_graph();
        g.save(&path).unwrap();
        let loaded = AsGraph::load(&path).unwrap();
        assert_eq!(loaded, g);
    }
}
