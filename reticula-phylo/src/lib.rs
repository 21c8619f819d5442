//! Trait evolution on phylogenetic networks for the Reticula ecosystem.
//!
//! Features:
//!
//! - **Rooted networks** — arena-backed topology with hybrid nodes and
//!   inheritance weights, extended Newick reading and writing
//! - **Traversal engine** — generic pre-order and post-order matrix builds
//!   in topological order
//! - **Variance structures** — shared-path covariance, node heights and
//!   incidence matrices under Brownian motion
//! - **Phylogenetic regression** — Cholesky-whitened GLS with Pagel's
//!   lambda and scaling-hybrid transforms, information criteria, ANOVA
//! - **Simulation** — forward Brownian-motion simulation with shifts and
//!   random or fixed root
//! - **Ancestral reconstruction** — BLUP conditional means and prediction
//!   intervals for internal nodes and unobserved tips

pub mod ancestral;
pub mod network;
pub mod newick;
pub mod regression;
pub mod regressors;
pub mod simulate;
pub mod traversal;
pub mod vcv;

pub use ancestral::{reconstruct_from_fit, reconstruct_known, ReconstructedStates};
pub use network::{Edge, EdgeId, Network, Node, NodeId};
pub use regression::{
    anova, fit, AnovaResult, EvolModel, FitOptions, NetworkLm,
};
pub use regressors::{hybrid_shift_regressors, shift_regressors, Shift, ShiftRegressors};
pub use simulate::{node_expectations, simulate, ParamsBM, SimulatedTraits};
pub use traversal::{AxisIndexing, TopologicalMatrix};
pub use vcv::{incidence_matrix, node_heights, shared_path_matrix};
