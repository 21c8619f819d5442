//! Variance-covariance and incidence matrices for trait evolution.
//!
//! Under Brownian motion on a rooted network, the covariance of the trait
//! values at two nodes is the expected shared path length from the root,
//! where a hybrid node averages its parents with the inheritance weights.
//! [`shared_path_matrix`] builds that matrix over all nodes in topological
//! order; [`incidence_matrix`] builds the tip × node matrix of expected edge
//! contributions used for shift regressors and ancestral expectations.

use reticula_core::Result;
use reticula_stats::Matrix;

use crate::network::{Edge, Network};
use crate::traversal::{
    postorder_build, preorder_build, AxisIndexing, PostorderRules, PreorderRules,
    TopologicalMatrix,
};

/// Pre-order rules for the shared path length matrix.
///
/// With `unit_gammas`, every hybrid node follows its major parent with
/// weight 1 (minor weight 0), so the diagonal becomes the major-tree path
/// length from the root, i.e. the node heights.
struct SharedPathRules {
    unit_gammas: bool,
}

impl SharedPathRules {
    fn weights(&self, e1: &Edge, e2: &Edge) -> (f64, f64) {
        if self.unit_gammas {
            if e1.is_major {
                (1.0, 0.0)
            } else {
                (0.0, 1.0)
            }
        } else {
            (e1.gamma, e2.gamma)
        }
    }
}

impl PreorderRules for SharedPathRules {
    fn init(&self, _net: &Network, n: usize) -> Matrix {
        Matrix::zeros(n, n)
    }

    fn at_root(&self, _m: &mut Matrix, _i: usize) {
        // The root shares no path with anything, including itself.
    }

    fn at_tree_node(&self, m: &mut Matrix, i: usize, p: usize, edge: &Edge) {
        for j in 0..i {
            let v = m.get(j, p);
            m.set(i, j, v);
            m.set(j, i, v);
        }
        m.set(i, i, m.get(p, p) + edge.length);
    }

    fn at_hybrid_node(
        &self,
        m: &mut Matrix,
        i: usize,
        (p1, p2): (usize, usize),
        (e1, e2): (&Edge, &Edge),
    ) {
        let (g1, g2) = self.weights(e1, e2);
        for j in 0..i {
            let v = g1 * m.get(j, p1) + g2 * m.get(j, p2);
            m.set(i, j, v);
            m.set(j, i, v);
        }
        let vii = g1 * g1 * (m.get(p1, p1) + e1.length)
            + g2 * g2 * (m.get(p2, p2) + e2.length)
            + 2.0 * g1 * g2 * m.get(p1, p2);
        m.set(i, i, vii);
    }
}

/// Shared path length matrix over all nodes, in topological order.
///
/// Under Brownian motion with rate `sigma2`, `sigma2 * V` is the covariance
/// matrix of the trait values at the nodes. The root row and column are
/// zero; the tip × tip block is extracted with
/// [`TopologicalMatrix::tip_submatrix`].
pub fn shared_path_matrix(net: &Network) -> Result<TopologicalMatrix> {
    preorder_build(net, &SharedPathRules { unit_gammas: false })
}

/// Node heights above the root, in topological order.
///
/// Heights follow the major tree: each hybrid node takes its major parent's
/// path. On a time-consistent network every tip has the same height.
pub fn node_heights(net: &Network) -> Result<Vec<f64>> {
    let tm = preorder_build(net, &SharedPathRules { unit_gammas: true })?;
    let n = tm.n_nodes();
    Ok((0..n).map(|i| tm.values().get(i, i)).collect())
}

/// Post-order rules for the node incidence matrix.
///
/// Column `i` holds the expected contribution of an event on node `i`'s
/// subtending edges to every descendant: identity on the node itself plus
/// the gamma-weighted columns of its children.
struct IncidenceRules;

impl PostorderRules for IncidenceRules {
    fn init(&self, _net: &Network, n: usize) -> Matrix {
        Matrix::identity(n)
    }

    fn at_leaf(&self, _m: &mut Matrix, _i: usize) {
        // Identity seeding already gives the leaf its own unit entry.
    }

    fn at_internal(&self, m: &mut Matrix, i: usize, children: &[(usize, &Edge)]) {
        for &(c, edge) in children {
            for r in 0..m.nrows() {
                let v = m.get(r, i) + edge.gamma * m.get(r, c);
                m.set(r, i, v);
            }
        }
    }
}

/// Tip × node incidence matrix, columns in topological order.
///
/// Entry `(t, i)` is the expected fraction of an effect placed on node `i`
/// (through its parent edges) that reaches tip `t`: 1 on the tree paths,
/// gamma-weighted products through hybrid nodes, 0 off-path. Used to expand
/// shift regressors and ancestral trait expectations.
pub fn incidence_matrix(net: &Network) -> Result<TopologicalMatrix> {
    let full = postorder_build(net, &IncidenceRules)?;
    let tips = full.tip_rows()?;
    Ok(TopologicalMatrix::from_network(
        tips,
        net,
        AxisIndexing::Columns,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOL: f64 = 1e-12;

    const CASE_NETWORK: &str =
        "(A:2.5,((B:1,#H1:0.5::0.1):1,(C:1,(D:0.5)#H1:0.5::0.9):1):0.5);";

    fn tip_pos(tm: &TopologicalMatrix, label: &str) -> usize {
        let k = tm
            .tip_labels()
            .iter()
            .position(|l| l == label)
            .expect("label present");
        tm.tip_positions()[k]
    }

    #[test]
    fn tree_diagonal_is_root_to_tip_depth() {
        let net = Network::from_newick("((A:1,B:2):0.5,C:3);").unwrap();
        let tm = shared_path_matrix(&net).unwrap();
        let v = tm.values();
        let a = tip_pos(&tm, "A");
        let b = tip_pos(&tm, "B");
        let c = tip_pos(&tm, "C");
        assert!((v.get(a, a) - 1.5).abs() < TOL);
        assert!((v.get(b, b) - 2.5).abs() < TOL);
        assert!((v.get(c, c) - 3.0).abs() < TOL);
        assert!((v.get(a, b) - 0.5).abs() < TOL);
        assert!((v.get(a, c) - 0.0).abs() < TOL);
    }

    #[test]
    fn network_tip_covariances() {
        let net = Network::from_newick(CASE_NETWORK).unwrap();
        let tm = shared_path_matrix(&net).unwrap();
        let v = tm.values();
        let a = tip_pos(&tm, "A");
        let b = tip_pos(&tm, "B");
        let c = tip_pos(&tm, "C");
        let d = tip_pos(&tm, "D");
        // Hand-computed from the gamma-weighted path recursion.
        assert!((v.get(a, a) - 2.5).abs() < TOL);
        assert!((v.get(b, b) - 2.5).abs() < TOL);
        assert!((v.get(c, c) - 2.5).abs() < TOL);
        assert!((v.get(d, d) - 2.23).abs() < TOL);
        assert!((v.get(d, b) - 0.6).abs() < TOL);
        assert!((v.get(d, c) - 1.4).abs() < TOL);
        assert!((v.get(d, a) - 0.0).abs() < TOL);
        assert!((v.get(b, c) - 0.5).abs() < TOL);
    }

    #[test]
    fn degenerate_gammas_reduce_to_a_tree() {
        // Gamma 1/0 keeps only the major path, so the network covariances
        // equal those of the displayed major tree.
        let net = Network::from_newick(
            "(A:2.5,((B:1,#H1:0.5::0):1,(C:1,(D:0.5)#H1:0.5::1):1):0.5);",
        )
        .unwrap();
        let tree = Network::from_newick("(A:2.5,((B:1):1,(C:1,(D:0.5):0.5):1):0.5);").unwrap();
        let vn = shared_path_matrix(&net).unwrap();
        let vt = shared_path_matrix(&tree).unwrap();
        for label in ["A", "B", "C", "D"] {
            for other in ["A", "B", "C", "D"] {
                let n_val = vn
                    .values()
                    .get(tip_pos(&vn, label), tip_pos(&vn, other));
                let t_val = vt
                    .values()
                    .get(tip_pos(&vt, label), tip_pos(&vt, other));
                assert!(
                    (n_val - t_val).abs() < TOL,
                    "cov({}, {}) differs: {} vs {}",
                    label,
                    other,
                    n_val,
                    t_val
                );
            }
        }
    }

    #[test]
    fn heights_equalize_on_time_consistent_network() {
        let net = Network::from_newick(CASE_NETWORK).unwrap();
        let h = node_heights(&net).unwrap();
        let tm = shared_path_matrix(&net).unwrap();
        for &t in tm.tip_positions() {
            assert!((h[t] - 2.5).abs() < TOL);
        }
        // Root height is zero.
        assert!(h[0].abs() < TOL);
    }

    #[test]
    fn incidence_rows_are_tip_indexed() {
        let net = Network::from_newick(CASE_NETWORK).unwrap();
        let inc = incidence_matrix(&net).unwrap();
        assert_eq!(inc.indexing(), AxisIndexing::Columns);
        assert_eq!(inc.values().nrows(), 4);
        assert_eq!(inc.values().ncols(), net.node_count());
    }

    #[test]
    fn incidence_root_column_is_ones() {
        let net = Network::from_newick(CASE_NETWORK).unwrap();
        let inc = incidence_matrix(&net).unwrap();
        // Every tip descends from the root with total weight 1.
        for r in 0..inc.values().nrows() {
            assert!((inc.values().get(r, 0) - 1.0).abs() < TOL);
        }
    }

    #[test]
    fn incidence_hybrid_column_carries_gamma() {
        let net = Network::from_newick(CASE_NETWORK).unwrap();
        let inc = incidence_matrix(&net).unwrap();
        let hybrid = net.hybrid_nodes()[0];
        let col = inc.position(hybrid).unwrap();
        let d_row = inc
            .tip_labels()
            .iter()
            .position(|l| l == "D")
            .unwrap();
        // D sits below the hybrid, so it receives the full effect; the other
        // tips receive nothing.
        assert!((inc.values().get(d_row, col) - 1.0).abs() < TOL);
        for (r, label) in inc.tip_labels().iter().enumerate() {
            if label != "D" {
                assert!(inc.values().get(r, col).abs() < TOL);
            }
        }
    }
}
