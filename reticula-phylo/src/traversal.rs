//! Topological-order traversal engine and node-indexed matrices.
//!
//! The engine performs no business logic of its own: callers inject the
//! matrix semantics through a small rule set dispatched on parent count
//! (root / tree node / hybrid node for pre-order, leaf / internal for
//! post-order). The concrete variance-covariance and incidence builders in
//! [`crate::vcv`] are rule-set implementations, and anything else that needs
//! a "visit every node after its ancestors" recursion can plug in the same
//! way.

use reticula_core::{ReticulaError, Result};
use reticula_stats::Matrix;

use crate::network::{Edge, Network, NodeId};

/// Which axes of a [`TopologicalMatrix`] are indexed by the node order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AxisIndexing {
    /// Rows follow the node order; columns mean something else.
    Rows,
    /// Columns follow the node order; rows are restricted to tips.
    Columns,
    /// Square matrix, both axes follow the node order.
    Both,
}

/// A matrix whose node-indexed axes follow a fixed topological order.
///
/// Carries the ordered node ids, which of those positions are tips vs
/// internal nodes, the tip labels, and the indexing flag. The topological
/// order guarantees that when a builder processes position `i`, every
/// ancestor of that node already has a row/column. Instances are immutable
/// after construction except for the explicit, reversible
/// [`TopologicalMatrix::rescale_lambda`] transform.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TopologicalMatrix {
    values: Matrix,
    node_order: Vec<NodeId>,
    node_numbers: Vec<i32>,
    tip_positions: Vec<usize>,
    internal_positions: Vec<usize>,
    tip_labels: Vec<String>,
    indexing: AxisIndexing,
}

impl TopologicalMatrix {
    pub(crate) fn from_network(values: Matrix, net: &Network, indexing: AxisIndexing) -> Self {
        let node_order = net.topological_order().to_vec();
        let node_numbers = node_order
            .iter()
            .map(|&id| net.node(id).expect("finalized network").number)
            .collect();
        let mut tip_positions = Vec::new();
        let mut internal_positions = Vec::new();
        let mut tip_labels = Vec::new();
        for (i, &id) in node_order.iter().enumerate() {
            if net.node(id).expect("finalized network").is_leaf() {
                tip_positions.push(i);
                tip_labels.push(net.display_name(id));
            } else {
                internal_positions.push(i);
            }
        }
        Self {
            values,
            node_order,
            node_numbers,
            tip_positions,
            internal_positions,
            tip_labels,
            indexing,
        }
    }

    /// The underlying matrix.
    pub fn values(&self) -> &Matrix {
        &self.values
    }

    /// Node ids along the node-indexed axis, in topological order.
    pub fn node_order(&self) -> &[NodeId] {
        &self.node_order
    }

    /// Display numbers parallel to [`TopologicalMatrix::node_order`].
    pub fn node_numbers(&self) -> &[i32] {
        &self.node_numbers
    }

    /// Positions (within the node order) that are tips.
    pub fn tip_positions(&self) -> &[usize] {
        &self.tip_positions
    }

    /// Positions (within the node order) that are internal nodes.
    pub fn internal_positions(&self) -> &[usize] {
        &self.internal_positions
    }

    /// Tip labels, parallel to [`TopologicalMatrix::tip_positions`].
    pub fn tip_labels(&self) -> &[String] {
        &self.tip_labels
    }

    /// Which axes are node-indexed.
    pub fn indexing(&self) -> AxisIndexing {
        self.indexing
    }

    /// Number of nodes along the node-indexed axis.
    pub fn n_nodes(&self) -> usize {
        self.node_order.len()
    }

    /// Position of a node id along the node-indexed axis.
    pub fn position(&self, id: NodeId) -> Option<usize> {
        self.node_order.iter().position(|&n| n == id)
    }

    /// The tip × tip submatrix (rows and columns at tip positions).
    ///
    /// Only meaningful for `Both`-indexed matrices.
    pub fn tip_submatrix(&self) -> Result<Matrix> {
        if self.indexing != AxisIndexing::Both {
            return Err(ReticulaError::InvalidInput(
                "tip submatrix requires a node-indexed square matrix".into(),
            ));
        }
        self.values.select(&self.tip_positions, &self.tip_positions)
    }

    /// Rows at tip positions, all columns (e.g. shift-regressor extraction
    /// from a `Both`-indexed matrix).
    pub fn tip_rows(&self) -> Result<Matrix> {
        if self.indexing == AxisIndexing::Columns {
            return Err(ReticulaError::InvalidInput(
                "tip-row extraction requires node-indexed rows".into(),
            ));
        }
        let all: Vec<usize> = (0..self.values.ncols()).collect();
        self.values.select(&self.tip_positions, &all)
    }

    /// In-place Pagel's-lambda rescaling: every entry is multiplied by
    /// `lambda`, then `(1 − lambda)·tip_adjust[k]` is added back to the
    /// diagonal entry of the k-th tip (internal-node diagonals stay purely
    /// scaled). `tip_adjust` is parallel to
    /// [`TopologicalMatrix::tip_positions`].
    ///
    /// The transform is reversible: applying it again with `1/lambda` and
    /// the same adjustments restores the original matrix.
    pub fn rescale_lambda(&mut self, lambda: f64, tip_adjust: &[f64]) -> Result<()> {
        if self.indexing != AxisIndexing::Both {
            return Err(ReticulaError::InvalidInput(
                "lambda rescaling requires a node-indexed square matrix".into(),
            ));
        }
        if tip_adjust.len() != self.tip_positions.len() {
            return Err(ReticulaError::InvalidInput(format!(
                "lambda adjustment has {} entries for {} tips",
                tip_adjust.len(),
                self.tip_positions.len()
            )));
        }
        self.values.scale(lambda);
        for (k, &t) in self.tip_positions.iter().enumerate() {
            let v = self.values.get(t, t);
            self.values.set(t, t, v + (1.0 - lambda) * tip_adjust[k]);
        }
        Ok(())
    }
}

/// Per-node update rules for a pre-order (root first) matrix build.
///
/// The engine dispatches on parent count: 0 parents is the root, 1 a tree
/// node, 2 a hybrid node. Positions passed to the rules are indices into the
/// topological order, so every parent position is already populated.
pub trait PreorderRules {
    /// Allocate and seed the matrix for `n` nodes.
    fn init(&self, net: &Network, n: usize) -> Matrix;

    /// Update for the root at position `i`.
    fn at_root(&self, m: &mut Matrix, i: usize);

    /// Update for a tree node at position `i` under `parent` via `edge`.
    fn at_tree_node(&self, m: &mut Matrix, i: usize, parent: usize, edge: &Edge);

    /// Update for a hybrid node at position `i` under two parents.
    fn at_hybrid_node(
        &self,
        m: &mut Matrix,
        i: usize,
        parents: (usize, usize),
        edges: (&Edge, &Edge),
    );
}

/// Per-node update rules for a post-order (leaves first) matrix build.
pub trait PostorderRules {
    /// Allocate and seed the matrix for `n` nodes.
    fn init(&self, net: &Network, n: usize) -> Matrix;

    /// Update for a leaf at position `i`.
    fn at_leaf(&self, m: &mut Matrix, i: usize);

    /// Update for an internal node at position `i` whose children sit at the
    /// given positions, reached through the given edges.
    fn at_internal(&self, m: &mut Matrix, i: usize, children: &[(usize, &Edge)]);
}

fn check_rooted(net: &Network) -> Result<()> {
    if !net.is_rooted() {
        return Err(ReticulaError::InvalidInput(
            "network must be rooted (finalized) before matrix construction".into(),
        ));
    }
    Ok(())
}

/// Positions of each node id within the topological order.
fn order_positions(net: &Network) -> Vec<usize> {
    let mut pos = vec![0usize; net.node_count()];
    for (i, &id) in net.topological_order().iter().enumerate() {
        pos[id] = i;
    }
    pos
}

/// Drive a pre-order build over the network with the supplied rules.
pub fn preorder_build<R: PreorderRules>(net: &Network, rules: &R) -> Result<TopologicalMatrix> {
    check_rooted(net)?;
    let order = net.topological_order();
    let pos = order_positions(net);
    let mut m = rules.init(net, order.len());

    for (i, &id) in order.iter().enumerate() {
        let node = net.node(id).expect("id from topological order");
        let parent_edges = &node.parent_edges;
        match parent_edges.len() {
            0 => rules.at_root(&mut m, i),
            1 => {
                let edge = net.edge(parent_edges[0]).expect("edge id from node");
                rules.at_tree_node(&mut m, i, pos[edge.parent], edge);
            }
            2 => {
                let e1 = net.edge(parent_edges[0]).expect("edge id from node");
                let e2 = net.edge(parent_edges[1]).expect("edge id from node");
                rules.at_hybrid_node(&mut m, i, (pos[e1.parent], pos[e2.parent]), (e1, e2));
            }
            k => {
                return Err(ReticulaError::InvalidInput(format!(
                    "node {} has {} parents; networks must be resolved at hybrid nodes (max 2)",
                    net.display_name(id),
                    k
                )))
            }
        }
    }

    Ok(TopologicalMatrix::from_network(m, net, AxisIndexing::Both))
}

/// Drive a post-order build over the network with the supplied rules.
pub fn postorder_build<R: PostorderRules>(net: &Network, rules: &R) -> Result<TopologicalMatrix> {
    check_rooted(net)?;
    let order = net.topological_order();
    let pos = order_positions(net);
    let mut m = rules.init(net, order.len());

    for &id in order.iter().rev() {
        let node = net.node(id).expect("id from topological order");
        let i = pos[id];
        if node.is_leaf() {
            rules.at_leaf(&mut m, i);
        } else {
            let children: Vec<(usize, &Edge)> = node
                .child_edges
                .iter()
                .map(|&e| {
                    let edge = net.edge(e).expect("edge id from node");
                    (pos[edge.child], edge)
                })
                .collect();
            rules.at_internal(&mut m, i, &children);
        }
    }

    Ok(TopologicalMatrix::from_network(m, net, AxisIndexing::Both))
}
