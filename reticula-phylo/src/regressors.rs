//! Shift specifications and shift-regressor design columns.
//!
//! A shift is an instantaneous jump in the trait mean on an edge: the child
//! of that edge, and all of its descendants, inherit the ancestral mean plus
//! a constant. Shifts enter simulation through [`Shift`] and enter
//! regression through design-matrix columns extracted from the incidence
//! matrix by [`shift_regressors`].

use reticula_core::{ReticulaError, Result};
use reticula_stats::Matrix;

use crate::network::{EdgeId, Network, NodeId};
use crate::vcv::incidence_matrix;

/// A per-node trait-mean offset (default 0 everywhere), keyed by node id.
///
/// The offset at a node is the shift carried by the edge above it. Offsets
/// on hybrid nodes are disallowed: a jump on a hybrid edge would be
/// inherited only fractionally, so shifts attach to tree edges only.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Shift {
    offsets: Vec<f64>,
}

impl Shift {
    /// The all-zero shift for a network.
    pub fn none(net: &Network) -> Self {
        Self {
            offsets: vec![0.0; net.node_count()],
        }
    }

    /// Shifts on the given edges, one value per edge, stored at each edge's
    /// child node.
    ///
    /// # Errors
    ///
    /// `InvalidInput` if the lengths differ, an edge is a hybrid edge, or
    /// two edges target the same child node with different values.
    pub fn on_edges(net: &Network, edges: &[EdgeId], values: &[f64]) -> Result<Self> {
        if edges.len() != values.len() {
            return Err(ReticulaError::InvalidInput(format!(
                "{} edges but {} shift values",
                edges.len(),
                values.len()
            )));
        }
        let mut shift = Self::none(net);
        for (&e, &v) in edges.iter().zip(values) {
            let edge = net.edge(e).ok_or_else(|| {
                ReticulaError::InvalidInput(format!("edge id {} out of range", e))
            })?;
            if edge.is_hybrid {
                return Err(ReticulaError::InvalidInput(format!(
                    "shift requested on a hybrid edge (into {}); shifts attach to tree edges only",
                    net.display_name(edge.child)
                )));
            }
            shift.set(net, edge.child, v)?;
        }
        Ok(shift)
    }

    /// One shift per hybridization event: for each hybrid node, the value is
    /// placed on the edge to its unique child.
    ///
    /// # Errors
    ///
    /// `InvalidInput` if the value count differs from the hybrid count or a
    /// hybrid node does not have exactly one child.
    pub fn on_hybrids(net: &Network, values: &[f64]) -> Result<Self> {
        let hybrids = net.hybrid_nodes();
        if hybrids.len() != values.len() {
            return Err(ReticulaError::InvalidInput(format!(
                "{} hybrid nodes but {} shift values",
                hybrids.len(),
                values.len()
            )));
        }
        let mut shift = Self::none(net);
        for (&h, &v) in hybrids.iter().zip(values) {
            let child = hybrid_child(net, h)?;
            shift.set(net, child, v)?;
        }
        Ok(shift)
    }

    fn set(&mut self, net: &Network, node: NodeId, value: f64) -> Result<()> {
        let current = self.offsets[node];
        if current != 0.0 && current != value {
            return Err(ReticulaError::InvalidInput(format!(
                "conflicting shift values at node {}: {} vs {}",
                net.display_name(node),
                current,
                value
            )));
        }
        self.offsets[node] = value;
        Ok(())
    }

    /// Combine two shift specifications.
    ///
    /// Valid only if at every node at most one of the two is nonzero, or
    /// both agree.
    pub fn merge(&self, other: &Shift, net: &Network) -> Result<Shift> {
        if self.offsets.len() != other.offsets.len() {
            return Err(ReticulaError::InvalidInput(
                "shift specifications come from different networks".into(),
            ));
        }
        let mut merged = self.clone();
        for (id, &v) in other.offsets.iter().enumerate() {
            if v != 0.0 {
                merged.set(net, id, v)?;
            }
        }
        Ok(merged)
    }

    /// The offset at a node (0 when unshifted).
    pub fn value(&self, node: NodeId) -> f64 {
        self.offsets[node]
    }

    /// All offsets, indexed by node id.
    pub fn offsets(&self) -> &[f64] {
        &self.offsets
    }

    /// True when every offset is zero.
    pub fn is_zero(&self) -> bool {
        self.offsets.iter().all(|&v| v == 0.0)
    }
}

/// The unique child of a hybrid node.
fn hybrid_child(net: &Network, hybrid: NodeId) -> Result<NodeId> {
    let children = net.children(hybrid);
    if children.len() != 1 {
        return Err(ReticulaError::InvalidInput(format!(
            "hybrid node {} has {} children; expected a single child edge",
            net.display_name(hybrid),
            children.len()
        )));
    }
    Ok(children[0])
}

/// Named design-matrix columns for shifted-mean regression, one row per tip.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ShiftRegressors {
    /// One column per shift, tip rows in topological tip order.
    pub columns: Matrix,
    /// Column names, `shift_{number}` with `m` for negative numbers.
    pub labels: Vec<String>,
    /// Tip labels parallel to the rows.
    pub tip_labels: Vec<String>,
}

fn shift_label(number: i32) -> String {
    if number < 0 {
        format!("shift_m{}", -number)
    } else {
        format!("shift_{}", number)
    }
}

fn regressors_for_nodes(net: &Network, nodes: &[NodeId]) -> Result<ShiftRegressors> {
    let inc = incidence_matrix(net)?;
    let mut cols = Vec::with_capacity(nodes.len());
    let mut labels = Vec::with_capacity(nodes.len());
    for &id in nodes {
        let node = net.node(id).ok_or_else(|| {
            ReticulaError::InvalidInput(format!("node id {} out of range", id))
        })?;
        if node.is_hybrid {
            return Err(ReticulaError::InvalidInput(format!(
                "shift regressor requested below a hybrid edge (node {}); shifts attach to tree edges only",
                net.display_name(id)
            )));
        }
        let pos = inc
            .position(id)
            .ok_or_else(|| ReticulaError::InvalidInput(format!("node id {} not in order", id)))?;
        cols.push(inc.values().column(pos));
        labels.push(shift_label(node.number));
    }
    let n_tips = inc.tip_labels().len();
    let columns = Matrix::from_columns(&cols, n_tips)?;
    Ok(ShiftRegressors {
        columns,
        labels,
        tip_labels: inc.tip_labels().to_vec(),
    })
}

/// Design columns for shifts on the given edges: for each edge, the tip-row
/// slice of its child node's incidence column.
///
/// # Errors
///
/// `InvalidInput` if an edge is a hybrid edge (shifts attach to tree edges
/// only) or an edge id is out of range.
pub fn shift_regressors(net: &Network, edges: &[EdgeId]) -> Result<ShiftRegressors> {
    let mut nodes = Vec::with_capacity(edges.len());
    for &e in edges {
        let edge = net
            .edge(e)
            .ok_or_else(|| ReticulaError::InvalidInput(format!("edge id {} out of range", e)))?;
        if edge.is_hybrid {
            return Err(ReticulaError::InvalidInput(format!(
                "shift regressor requested on a hybrid edge (into {}); shifts attach to tree edges only",
                net.display_name(edge.child)
            )));
        }
        nodes.push(edge.child);
    }
    regressors_for_nodes(net, &nodes)
}

/// One design column per hybridization event (on each hybrid node's unique
/// child) plus a `sum` column adding them all, for testing a common
/// transgressive effect.
pub fn hybrid_shift_regressors(net: &Network) -> Result<ShiftRegressors> {
    let mut nodes = Vec::new();
    for h in net.hybrid_nodes() {
        nodes.push(hybrid_child(net, h)?);
    }
    let mut reg = regressors_for_nodes(net, &nodes)?;
    let n_tips = reg.tip_labels.len();
    let mut sum = vec![0.0; n_tips];
    for j in 0..reg.columns.ncols() {
        for (r, s) in sum.iter_mut().enumerate() {
            *s += reg.columns.get(r, j);
        }
    }
    let mut cols: Vec<Vec<f64>> = (0..reg.columns.ncols())
        .map(|j| reg.columns.column(j))
        .collect();
    cols.push(sum);
    reg.columns = Matrix::from_columns(&cols, n_tips)?;
    reg.labels.push("sum".into());
    Ok(reg)
}
