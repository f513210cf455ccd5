//! Centrality measures over the AS graph.

use crate::bgp::graph::{AsGraph, UndirectedGraph};
use crate::error::{Result, TerrainError};
use crate::models::CentralityRow;
use std::collections::VecDeque;
use tracing::debug;

/// PageRank damping factor.
pub const DAMPING: f64 = 0.85;

/// PageRank iteration limit.
pub const PAGERANK_MAX_ITER: usize = 100;

/// Per-node PageRank tolerance.
pub const PAGERANK_TOL: f64 = 1e-6;

/// Degree centrality: `deg / (n - 1)`, 1.0 for graphs of at most one node.
pub fn degree(graph: &UndirectedGraph) -> Vec<f64> {
    let n = graph.len();
    if n <= 1 {
        return vec![1.0; n];
    }
    let scale = 1.0 / (n - 1) as f64;
    (0..n).map(|i| graph.degree(i) as f64 * scale).collect()
}

/// Brandes betweenness on unweighted shortest paths.
///
/// Normalised by `1/((n-1)(n-2))` when `n > 2`, otherwise raw.
pub fn betweenness(graph: &UndirectedGraph) -> Vec<f64> {
    let n = graph.len();
    let mut centrality = vec![0.0; n];

    for s in 0..n {
        let mut stack = Vec::with_capacity(n);
        let mut preds: Vec<Vec<usize>> = vec![Vec::new(); n];
        let mut sigma = vec![0.0_f64; n];
        let mut dist = vec![-1_i64; n];
        sigma[s] = 1.0;
        dist[s] = 0;

        let mut queue = VecDeque::from([s]);
        while let Some(v) = queue.pop_front() {
            stack.push(v);
            for &w in &graph.adj[v] {
                if dist[w] < 0 {
                    dist[w] = dist[v] + 1;
                    queue.push_back(w);
                }
                if dist[w] == dist[v] + 1 {
                    sigma[w] += sigma[v];
                    preds[w].push(v);
                }
            }
        }

        let mut delta = vec![0.0; n];
        while let Some(w) = stack.pop() {
            for &v in &preds[w] {
                delta[v] += sigma[v] / sigma[w] * (1.0 + delta[w]);
            }
            if w != s {
                centrality[w] += delta[w];
            }
        }
    }

    if n > 2 {
        let scale = 1.0 / ((n - 1) as f64 * (n - 2) as f64);
        centrality.iter_mut().for_each(|c| *c *= scale);
    }
    centrality
}

/// PageRank by power iteration over out-neighbour lists.
pub fn pagerank(out_adjacency: &[Vec<usize>]) -> Result<Vec<f64>> {
    pagerank_with(out_adjacency, PAGERANK_MAX_ITER, PAGERANK_TOL)
}

fn pagerank_with(out_adjacency: &[Vec<usize>], max_iter: usize, tol: f64) -> Result<Vec<f64>> {
    let n = out_adjacency.len();
    if n == 0 {
        return Ok(Vec::new());
    }
    let uniform = 1.0 / n as f64;
    let mut x = vec![uniform; n];

    for iteration in 0..max_iter {
        let last = x;
        let dangling: f64 = out_adjacency
            .iter()
            .zip(&last)
            .filter(|(out, _)| out.is_empty())
            .map(|(_, r)| r)
            .sum();

        let base = (DAMPING * dangling + (1.0 - DAMPING)) * uniform;
        x = vec![base; n];
        for (v, out) in out_adjacency.iter().enumerate() {
            if out.is_empty() {
                continue;
            }
            let share = DAMPING * last[v] / out.len() as f64;
            for &w in out {
                x[w] += share;
            }
        }

        let err: f64 = x.iter().zip(&last).map(|(a, b)| (a - b).abs()).sum();
        if err < n as f64 * tol {
            debug!("PageRank converged after {} iterations", iteration + 1);
            return Ok(x);
        }
    }

    Err(TerrainError::Convergence {
        algorithm: "PageRank",
        iterations: max_iter,
    })
}

/// All three measures per AS, most central (by betweenness) first.
pub fn compute(graph: &AsGraph) -> Result<Vec<CentralityRow>> {
    if graph.is_empty() {
        return Err(TerrainError::EmptyGraph);
    }

    let undirected = graph.undirected();
    let degree = degree(&undirected);
    let betweenness = betweenness(&undirected);
    let pagerank = pagerank(&graph.out_adjacency())?;

    let mut rows: Vec<CentralityRow> = undirected
        .asns
        .iter()
        .enumerate()
        .map(|(i, &asn)| CentralityRow {
            asn,
            degree: degree[i],
            betweenness: betweenness[i],
            pagerank: pagerank[i],
        })
        .collect();

    rows.sort_by(|a, b| {
        b.betweenness
            .total_cmp(&a.betweenness)
            .then(a.asn.cmp(&b.asn))
    });
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    fn star(leaves: u32) -> AsGraph {
        let mut g = AsGraph::new();
        for leaf in 1..=leaves {
            g.add_edge(100, leaf);
        }
        g
    }

    #[test]
    fn test_degree_centrality() {
        let u = star(4).undirected();
        let d = degree(&u);
        // asns sorted: 1, 2, 3, 4, 100
        assert!(close(d[4], 1.0));
        assert!(close(d[0], 0.25));

        assert!(degree(&AsGraph::new().undirected()).is_empty());

        let mut one = AsGraph::new();
        one.add_node(5, None);
        assert_eq!(degree(&one.undirected()), vec![1.0]);
    }

    #[test]
    fn test_betweenness_star_and_path() {
        let b = betweenness(&star(4).undirected());
        assert!(close(b[4], 1.0));
        assert!(b[..4].iter().all(|v| close(*v, 0.0)));

        // path 1 - 2 - 3: middle node lies on the only 1-3 path
        let mut g = AsGraph::new();
        g.add_edge(1, 2);
        g.add_edge(2, 3);
        let b = betweenness(&g.undirected());
        assert!(close(b[1], 1.0));
        assert!(close(b[0], 0.0));
    }

    #[test]
    fn test_betweenness_splits_equal_paths() {
        // square 1-2-4-3-1: two shortest paths between opposite corners
        let mut g = AsGraph::new();
        g.add_edge(1, 2);
        g.add_edge(2, 4);
        g.add_edge(4, 3);
        g.add_edge(3, 1);
        let b = betweenness(&g.undirected());
        for v in b {
            assert!(close(v, 1.0 / 6.0), "got {}", v);
        }
    }

    #[test]
    fn test_pagerank_sums_to_one() {
        let g = star(3);
        let pr = pagerank(&g.out_adjacency()).unwrap();
        assert!(close(pr.iter().sum::<f64>(), 1.0));
        // leaves are dangling and pointed to by the hub
        assert!(pr[0] > pr[3]);
        assert!(close(pr[0], pr[1]));
    }

    #[test]
    fn test_pagerank_symmetric_cycle_is_uniform() {
        let adj = vec![vec![1], vec![2], vec![0]];
        let pr = pagerank(&adj).unwrap();
        for v in pr {
            assert!(close(v, 1.0 / 3.0));
        }
    }

    #[test]
    fn test_pagerank_reports_non_convergence() {
        let adj = vec![vec![1], vec![], vec![1]];
        let result = pagerank_with(&adj, 1, PAGERANK_TOL);
        assert!(matches!(
            result,
            Err(TerrainError::Convergence {
                algorithm: "PageRank",
                iterations: 1
            })
        ));
        assert!(pagerank_with(&adj, PAGERANK_MAX_ITER, PAGERANK_TOL).is_ok());
    }

    #[test]
    fn test_compute_orders_rows() {
        let rows = compute(&star(3)).unwrap();
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0].asn, 100);
        let rest: Vec<u32> = rows[1..].iter().map(|r| r.asn).collect();
        assert_eq!(rest, vec![1, 2, 3]);
    }

    #[test]
    fn test_compute_empty_graph() {
        assert!(matches!(
            compute(&AsGraph::new()),
            Err(TerrainError::EmptyGraph)
        ));
    }
}
