//! Rooted phylogenetic network data structures.
//!
//! Uses arena-style storage: nodes and edges live in flat vectors and are
//! referenced by `NodeId` / `EdgeId` (`usize` indices). A network extends a
//! rooted tree with *hybrid nodes* — nodes with two parent edges, each
//! carrying an inheritance weight γ ∈ [0, 1] describing the fraction of the
//! trait inherited along that path. The two weights into one hybrid node sum
//! to 1, and the edge with γ ≥ 0.5 is flagged *major*.
//!
//! Networks are built (by the Newick parser or programmatically), then
//! [`Network::finalize`] validates the structure, fills default inheritance
//! weights, assigns display numbers, and caches the topological order. After
//! finalization the network is consumed read-only, except for the explicit
//! [`Network::set_gamma`] mutator used by the scaling-hybrid refit (which
//! operates on a clone).

use reticula_core::{ReticulaError, Result, Summarizable};

/// Index into the network's node arena.
pub type NodeId = usize;

/// Index into the network's edge arena.
pub type EdgeId = usize;

/// A single node in a phylogenetic network.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Node {
    /// Index of this node in the arena.
    pub id: NodeId,
    /// Signed display number: tips are positive, internal nodes negative.
    /// Assigned deterministically by [`Network::finalize`].
    pub number: i32,
    /// Taxon label for tips, hybrid tag (e.g. `"H1"`) for hybrid nodes.
    pub name: Option<String>,
    /// True if this node has two parent edges.
    pub is_hybrid: bool,
    /// Edges into this node (0 for the root, 1 for tree nodes, 2 for hybrids).
    pub parent_edges: Vec<EdgeId>,
    /// Edges out of this node.
    pub child_edges: Vec<EdgeId>,
}

impl Node {
    /// True if this node has no children.
    pub fn is_leaf(&self) -> bool {
        self.child_edges.is_empty()
    }

    /// True if this node has no parents.
    pub fn is_root(&self) -> bool {
        self.parent_edges.is_empty()
    }
}

/// A directed edge (parent → child) in a phylogenetic network.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Edge {
    /// Index of this edge in the arena.
    pub id: EdgeId,
    /// Parent (tail) node.
    pub parent: NodeId,
    /// Child (head) node.
    pub child: NodeId,
    /// Branch length (non-negative).
    pub length: f64,
    /// Inheritance weight γ: 1 for tree edges, in [0, 1] for hybrid edges.
    pub gamma: f64,
    /// True if the child is a hybrid node.
    pub is_hybrid: bool,
    /// True if γ ≥ 0.5 (set at finalization).
    pub is_major: bool,
}

/// A rooted phylogenetic network stored as arenas of nodes and edges.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Network {
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    root: NodeId,
    /// Node ids with every node after all of its ancestors (empty until
    /// finalization).
    topo_order: Vec<NodeId>,
    finalized: bool,
}

/// Sentinel for "inheritance weight not yet known" during construction.
pub const GAMMA_UNSET: f64 = f64::NAN;

impl Network {
    /// Create a new network with a single unnamed root node.
    pub fn new() -> Self {
        let root = Node {
            id: 0,
            number: 0,
            name: None,
            is_hybrid: false,
            parent_edges: Vec::new(),
            child_edges: Vec::new(),
        };
        Self {
            nodes: vec![root],
            edges: Vec::new(),
            root: 0,
            topo_order: Vec::new(),
            finalized: false,
        }
    }

    /// Add a fresh, unattached node and return its id.
    pub fn add_node(&mut self, name: Option<String>) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(Node {
            id,
            number: 0,
            name,
            is_hybrid: false,
            parent_edges: Vec::new(),
            child_edges: Vec::new(),
        });
        self.finalized = false;
        id
    }

    /// Set or replace a node's label (construction-time API).
    pub fn set_name(&mut self, id: NodeId, name: Option<String>) -> Result<()> {
        match self.nodes.get_mut(id) {
            Some(node) => {
                node.name = name;
                Ok(())
            }
            None => Err(ReticulaError::InvalidInput(format!(
                "node id {} out of range ({})",
                id,
                self.nodes.len()
            ))),
        }
    }

    /// Add a directed edge from `parent` to `child`.
    ///
    /// `gamma` may be [`GAMMA_UNSET`] for hybrid edges whose weight will be
    /// filled with the 0.9/0.1 default at finalization.
    pub fn add_edge(
        &mut self,
        parent: NodeId,
        child: NodeId,
        length: f64,
        gamma: f64,
    ) -> Result<EdgeId> {
        if parent >= self.nodes.len() || child >= self.nodes.len() {
            return Err(ReticulaError::InvalidInput(format!(
                "edge endpoint out of range: {} -> {} ({} nodes)",
                parent,
                child,
                self.nodes.len()
            )));
        }
        if length < 0.0 {
            return Err(ReticulaError::InvalidInput(format!(
                "negative branch length {} on edge {} -> {}",
                length, parent, child
            )));
        }
        let id = self.edges.len();
        self.edges.push(Edge {
            id,
            parent,
            child,
            length,
            gamma,
            is_hybrid: false,
            is_major: true,
        });
        self.nodes[parent].child_edges.push(id);
        self.nodes[child].parent_edges.push(id);
        self.finalized = false;
        Ok(id)
    }

    /// Validate the structure, fill defaults, and cache the topological order.
    ///
    /// Checks: exactly one parentless node (the root); at most two parents per
    /// node; the graph is acyclic and connected from the root. Hybrid nodes
    /// get their edges flagged, missing inheritance weights filled (first
    /// parent edge 0.9, second 0.1 — a degenerate-but-legal default), weight
    /// sums checked, and major flags set. Tips are numbered 1, 2, … and
    /// internal nodes −1, −2, … in topological order.
    pub fn finalize(&mut self) -> Result<()> {
        // Locate the root.
        let roots: Vec<NodeId> = self
            .nodes
            .iter()
            .filter(|n| n.parent_edges.is_empty())
            .map(|n| n.id)
            .collect();
        if roots.len() != 1 {
            return Err(ReticulaError::InvalidInput(format!(
                "network must have exactly one root, found {}",
                roots.len()
            )));
        }
        self.root = roots[0];

        // Parent arity and hybrid flags.
        for node_id in 0..self.nodes.len() {
            let n_parents = self.nodes[node_id].parent_edges.len();
            if n_parents > 2 {
                return Err(ReticulaError::InvalidInput(format!(
                    "node {} has {} parents; networks must be resolved at hybrid nodes (max 2)",
                    self.display_name(node_id),
                    n_parents
                )));
            }
            let is_hybrid = n_parents == 2;
            self.nodes[node_id].is_hybrid = is_hybrid;
            for k in 0..n_parents {
                let e = self.nodes[node_id].parent_edges[k];
                self.edges[e].is_hybrid = is_hybrid;
            }
        }

        // Inheritance weights.
        for node_id in 0..self.nodes.len() {
            let parent_edges = self.nodes[node_id].parent_edges.clone();
            match parent_edges.len() {
                2 => {
                    let (e1, e2) = (parent_edges[0], parent_edges[1]);
                    let g1 = self.edges[e1].gamma;
                    let g2 = self.edges[e2].gamma;
                    let (g1, g2) = match (g1.is_nan(), g2.is_nan()) {
                        (false, false) => {
                            if (g1 + g2 - 1.0).abs() > 1e-8 {
                                return Err(ReticulaError::InvalidInput(format!(
                                    "inheritance weights into hybrid node {} sum to {}, expected 1",
                                    self.display_name(node_id),
                                    g1 + g2
                                )));
                            }
                            (g1, g2)
                        }
                        (false, true) => (g1, 1.0 - g1),
                        (true, false) => (1.0 - g2, g2),
                        // Default weights when the input carries none.
                        (true, true) => (0.9, 0.1),
                    };
                    if !(0.0..=1.0).contains(&g1) {
                        return Err(ReticulaError::InvalidInput(format!(
                            "inheritance weight {} on edge into node {} outside [0, 1]",
                            g1,
                            self.display_name(node_id)
                        )));
                    }
                    self.edges[e1].gamma = g1;
                    self.edges[e2].gamma = g2;
                    self.edges[e1].is_major = g1 >= 0.5;
                    self.edges[e2].is_major = g2 > 0.5;
                }
                _ => {
                    for &e in &parent_edges {
                        self.edges[e].gamma = 1.0;
                        self.edges[e].is_major = true;
                    }
                }
            }
        }

        self.topo_order = self.compute_topological_order()?;

        // Display numbers: tips positive, internals negative, both in
        // topological order, so numbering is deterministic for a given input.
        let mut next_tip = 1i32;
        let mut next_internal = -1i32;
        for &id in &self.topo_order.clone() {
            if self.nodes[id].is_leaf() {
                self.nodes[id].number = next_tip;
                next_tip += 1;
            } else {
                self.nodes[id].number = next_internal;
                next_internal -= 1;
            }
        }

        self.finalized = true;
        Ok(())
    }

    /// Kahn's algorithm over parent counts; errors on cycles or nodes
    /// unreachable from the root.
    fn compute_topological_order(&self) -> Result<Vec<NodeId>> {
        let n = self.nodes.len();
        let mut remaining: Vec<usize> = self.nodes.iter().map(|nd| nd.parent_edges.len()).collect();
        let mut queue = std::collections::VecDeque::new();
        queue.push_back(self.root);
        let mut order = Vec::with_capacity(n);
        while let Some(id) = queue.pop_front() {
            order.push(id);
            for &e in &self.nodes[id].child_edges {
                let c = self.edges[e].child;
                remaining[c] -= 1;
                if remaining[c] == 0 {
                    queue.push_back(c);
                }
            }
        }
        if order.len() != n {
            return Err(ReticulaError::InvalidInput(format!(
                "network has a cycle or unreachable nodes ({} of {} reached from root)",
                order.len(),
                n
            )));
        }
        Ok(order)
    }

    /// True once the network passed [`Network::finalize`].
    pub fn is_rooted(&self) -> bool {
        self.finalized
    }

    /// The root node id.
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Total number of nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Total number of edges.
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Number of leaf nodes.
    pub fn tip_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_leaf()).count()
    }

    /// Number of hybrid nodes.
    pub fn hybrid_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_hybrid).count()
    }

    /// Access a node by id.
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// Access an edge by id.
    pub fn edge(&self, id: EdgeId) -> Option<&Edge> {
        self.edges.get(id)
    }

    /// Node ids in topological order (ancestors before descendants).
    ///
    /// Empty until the network is finalized.
    pub fn topological_order(&self) -> &[NodeId] {
        &self.topo_order
    }

    /// Parent node ids of `id` (0, 1, or 2 entries).
    pub fn parents(&self, id: NodeId) -> Vec<NodeId> {
        self.nodes[id]
            .parent_edges
            .iter()
            .map(|&e| self.edges[e].parent)
            .collect()
    }

    /// Child node ids of `id`.
    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        self.nodes[id]
            .child_edges
            .iter()
            .map(|&e| self.edges[e].child)
            .collect()
    }

    /// The edge joining `parent` and `child`, if one exists in that direction.
    pub fn edge_between(&self, parent: NodeId, child: NodeId) -> Option<&Edge> {
        self.nodes[child]
            .parent_edges
            .iter()
            .map(|&e| &self.edges[e])
            .find(|e| e.parent == parent)
    }

    /// All leaf node ids, in topological order when finalized.
    pub fn tips(&self) -> Vec<NodeId> {
        if self.finalized {
            self.topo_order
                .iter()
                .copied()
                .filter(|&id| self.nodes[id].is_leaf())
                .collect()
        } else {
            self.nodes
                .iter()
                .filter(|n| n.is_leaf())
                .map(|n| n.id)
                .collect()
        }
    }

    /// Labels of the tips, in the same order as [`Network::tips`]. Unnamed
    /// tips get `"tip_{number}"`.
    pub fn tip_labels(&self) -> Vec<String> {
        self.tips()
            .iter()
            .map(|&id| self.display_name(id))
            .collect()
    }

    /// All hybrid node ids, in topological order when finalized.
    pub fn hybrid_nodes(&self) -> Vec<NodeId> {
        if self.finalized {
            self.topo_order
                .iter()
                .copied()
                .filter(|&id| self.nodes[id].is_hybrid)
                .collect()
        } else {
            self.nodes
                .iter()
                .filter(|n| n.is_hybrid)
                .map(|n| n.id)
                .collect()
        }
    }

    /// Human-readable identifier for a node (label, or `tip_{n}`/`node_{n}`).
    pub fn display_name(&self, id: NodeId) -> String {
        let node = &self.nodes[id];
        match &node.name {
            Some(name) => name.clone(),
            None if node.is_leaf() => format!("tip_{}", node.number),
            None => format!("node_{}", node.number),
        }
    }

    /// Set the inheritance weight of a single edge.
    ///
    /// Used transiently by the scaling-hybrid variance transform, which
    /// rescales every hybrid edge's weight on a cloned network before
    /// rebuilding the shared-path matrix. Does not touch the partner edge:
    /// the transform deliberately produces weights that no longer sum to 1.
    pub fn set_gamma(&mut self, edge: EdgeId, gamma: f64) -> Result<()> {
        if edge >= self.edges.len() {
            return Err(ReticulaError::InvalidInput(format!(
                "edge id {} out of range ({})",
                edge,
                self.edges.len()
            )));
        }
        if !(0.0..=1.0).contains(&gamma) {
            return Err(ReticulaError::InvalidInput(format!(
                "inheritance weight {} outside [0, 1]",
                gamma
            )));
        }
        self.edges[edge].gamma = gamma;
        Ok(())
    }

    /// Ids of all hybrid edges.
    pub fn hybrid_edges(&self) -> Vec<EdgeId> {
        self.edges
            .iter()
            .filter(|e| e.is_hybrid)
            .map(|e| e.id)
            .collect()
    }

    /// Parse an extended Newick string into a finalized network.
    pub fn from_newick(input: &str) -> Result<Self> {
        crate::newick::parse(input)
    }

    /// Serialize the network to an extended Newick string.
    pub fn to_newick(&self) -> String {
        crate::newick::write(self)
    }
}

impl Default for Network {
    fn default() -> Self {
        Self::new()
    }
}

impl Summarizable for Network {
    fn summary(&self) -> String {
        format!(
            "Network: {} nodes ({} tips, {} hybrids), {} edges",
            self.node_count(),
            self.tip_count(),
            self.hybrid_count(),
            self.edge_count()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// ((A:1,B:1):1,C:2); built by hand.
    fn small_tree() -> Network {
        let mut net = Network::new();
        let ab = net.add_node(None);
        let a = net.add_node(Some("A".into()));
        let b = net.add_node(Some("B".into()));
        let c = net.add_node(Some("C".into()));
        net.add_edge(0, ab, 1.0, 1.0).unwrap();
        net.add_edge(ab, a, 1.0, 1.0).unwrap();
        net.add_edge(ab, b, 1.0, 1.0).unwrap();
        net.add_edge(0, c, 2.0, 1.0).unwrap();
        net.finalize().unwrap();
        net
    }

    /// Root -> X, and a hybrid H with parents root and X, child D.
    fn small_network(g1: f64, g2: f64) -> Network {
        let mut net = Network::new();
        let x = net.add_node(None);
        let h = net.add_node(Some("H1".into()));
        let a = net.add_node(Some("A".into()));
        let d = net.add_node(Some("D".into()));
        net.add_edge(0, x, 1.0, 1.0).unwrap();
        net.add_edge(x, a, 1.0, 1.0).unwrap();
        net.add_edge(0, h, 2.0, g1).unwrap();
        net.add_edge(x, h, 1.0, g2).unwrap();
        net.add_edge(h, d, 0.5, 1.0).unwrap();
        net.finalize().unwrap();
        net
    }

    #[test]
    fn tree_finalizes_and_orders() {
        let net = small_tree();
        assert!(net.is_rooted());
        assert_eq!(net.node_count(), 5);
        assert_eq!(net.tip_count(), 3);
        assert_eq!(net.hybrid_count(), 0);
        let order = net.topological_order();
        assert_eq!(order[0], net.root());
        // Every node appears after its parents.
        let pos: Vec<usize> = {
            let mut p = vec![0; net.node_count()];
            for (i, &id) in order.iter().enumerate() {
                p[id] = i;
            }
            p
        };
        for e in 0..net.edge_count() {
            let edge = net.edge(e).unwrap();
            assert!(pos[edge.parent] < pos[edge.child]);
        }
    }

    #[test]
    fn tip_numbers_positive_internal_negative() {
        let net = small_tree();
        for &id in &net.tips() {
            assert!(net.node(id).unwrap().number > 0);
        }
        assert!(net.node(net.root()).unwrap().number < 0);
    }

    #[test]
    fn hybrid_node_detected_with_weights() {
        let net = small_network(0.3, 0.7);
        assert_eq!(net.hybrid_count(), 1);
        let h = net.hybrid_nodes()[0];
        let parent_edges = &net.node(h).unwrap().parent_edges;
        assert_eq!(parent_edges.len(), 2);
        let gammas: Vec<f64> = parent_edges
            .iter()
            .map(|&e| net.edge(e).unwrap().gamma)
            .collect();
        assert!((gammas[0] + gammas[1] - 1.0).abs() < 1e-12);
        let majors: Vec<bool> = parent_edges
            .iter()
            .map(|&e| net.edge(e).unwrap().is_major)
            .collect();
        assert_eq!(majors.iter().filter(|&&m| m).count(), 1);
    }

    #[test]
    fn default_gammas_when_unset() {
        let net = small_network(GAMMA_UNSET, GAMMA_UNSET);
        let h = net.hybrid_nodes()[0];
        let parent_edges = net.node(h).unwrap().parent_edges.clone();
        assert!((net.edge(parent_edges[0]).unwrap().gamma - 0.9).abs() < 1e-12);
        assert!((net.edge(parent_edges[1]).unwrap().gamma - 0.1).abs() < 1e-12);
    }

    #[test]
    fn one_gamma_given_other_complemented() {
        let net = small_network(0.25, GAMMA_UNSET);
        let h = net.hybrid_nodes()[0];
        let parent_edges = net.node(h).unwrap().parent_edges.clone();
        assert!((net.edge(parent_edges[1]).unwrap().gamma - 0.75).abs() < 1e-12);
    }

    #[test]
    fn conflicting_gammas_rejected() {
        let mut net = Network::new();
        let h = net.add_node(None);
        let x = net.add_node(None);
        let d = net.add_node(Some("D".into()));
        net.add_edge(0, x, 1.0, 1.0).unwrap();
        net.add_edge(0, h, 1.0, 0.6).unwrap();
        net.add_edge(x, h, 1.0, 0.6).unwrap();
        net.add_edge(h, d, 1.0, 1.0).unwrap();
        assert!(net.finalize().is_err());
    }

    #[test]
    fn three_parents_rejected() {
        let mut net = Network::new();
        let a = net.add_node(None);
        let b = net.add_node(None);
        let h = net.add_node(None);
        net.add_edge(0, a, 1.0, 1.0).unwrap();
        net.add_edge(0, b, 1.0, 1.0).unwrap();
        net.add_edge(0, h, 1.0, 0.5).unwrap();
        net.add_edge(a, h, 1.0, 0.3).unwrap();
        net.add_edge(b, h, 1.0, 0.2).unwrap();
        assert!(net.finalize().is_err());
    }

    #[test]
    fn two_roots_rejected() {
        let mut net = Network::new();
        let stray = net.add_node(Some("stray".into()));
        let a = net.add_node(Some("A".into()));
        net.add_edge(0, a, 1.0, 1.0).unwrap();
        let _ = stray;
        assert!(net.finalize().is_err());
    }

    #[test]
    fn negative_branch_length_rejected() {
        let mut net = Network::new();
        let a = net.add_node(Some("A".into()));
        assert!(net.add_edge(0, a, -0.5, 1.0).is_err());
    }

    #[test]
    fn edge_between_finds_direction() {
        let net = small_tree();
        let order = net.topological_order().to_vec();
        let root = order[0];
        let first_child = net.children(root)[0];
        assert!(net.edge_between(root, first_child).is_some());
        assert!(net.edge_between(first_child, root).is_none());
    }

    #[test]
    fn summary_counts() {
        let net = small_network(0.3, 0.7);
        assert_eq!(net.summary(), "Network: 5 nodes (2 tips, 1 hybrids), 5 edges");
    }
}
