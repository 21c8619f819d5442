//! Numerical substrate for the Reticula phylogenetic-network ecosystem.
//!
//! - **Dense matrices** — Flat row-major [`Matrix`] with Cholesky
//!   factorization, triangular solves, and SPD inversion
//! - **Whitened least squares** — [`ols`] on a pre-whitened design
//! - **Distributions** — Normal, Student-t, and F with pdf/cdf/quantile
//! - **1-D optimization** — Bounded derivative-free maximization (Brent)

pub mod distribution;
pub mod linalg;
pub mod optimize;

pub use distribution::{Distribution, FDistribution, Normal, StudentT};
pub use linalg::{
    back_solve_transposed, cholesky_lower, forward_solve, forward_solve_matrix, invert_spd,
    log_det_from_cholesky, ols, Matrix, OlsFit,
};
pub use optimize::{maximize_bounded, BrentConfig, BrentResult};
