//! Phylogenetic GLS regression on networks.
//!
//! The trait values at the tips are correlated through shared ancestry:
//! under Brownian motion their covariance is `σ²·V` with `V` the tip block
//! of the shared-path matrix. The fit whitens the design and response by
//! the lower Cholesky factor of `V` and solves an ordinary least squares
//! problem on the whitened system, so all classical regression statistics
//! carry over. Two single-parameter variance transforms are supported:
//! Pagel's lambda, which shrinks covariances toward a star phylogeny, and
//! the scaling-hybrid transform, which fades hybrid edges in and out by
//! rescaling their inheritance weights.

use std::collections::{HashMap, HashSet};
use std::f64::consts::PI;

use reticula_core::{ReticulaError, Result, Summarizable};
use reticula_stats::{
    cholesky_lower, forward_solve, forward_solve_matrix, log_det_from_cholesky, maximize_bounded,
    ols, BrentConfig, FDistribution, Matrix, OlsFit, StudentT,
};

use crate::network::Network;
use crate::traversal::TopologicalMatrix;
use crate::vcv::{node_heights, shared_path_matrix};

/// Evolutionary model for the variance structure of the fit.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum EvolModel {
    /// Plain Brownian motion: the shared-path covariance, untransformed.
    Bm,
    /// Pagel's lambda. `fixed = None` estimates lambda by maximum
    /// likelihood; `Some(value)` evaluates at that value only.
    Lambda { fixed: Option<f64> },
    /// Scaling-hybrid: inheritance weights rescaled toward 1 by
    /// `γ' = 1 − λ(1 − γ)`. `fixed` as for lambda.
    ScalingHybrid { fixed: Option<f64> },
}

impl EvolModel {
    /// Model name as reported by the fit.
    pub fn name(&self) -> &'static str {
        match self {
            EvolModel::Bm => "BM",
            EvolModel::Lambda { .. } => "lambda",
            EvolModel::ScalingHybrid { .. } => "scalingHybrid",
        }
    }
}

/// Options controlling a [`fit`] call.
#[derive(Debug, Clone)]
pub struct FitOptions {
    /// Variance model.
    pub model: EvolModel,
    /// Tip labels of the data rows, for name-based matching. When absent
    /// the data rows must already be in the network's topological tip order.
    pub data_labels: Option<Vec<String>>,
    /// Rows to exclude, parallel to the data rows. NaN responses are
    /// treated as missing regardless.
    pub missing: Option<Vec<bool>>,
    /// Extra candidate for the transformation parameter, evaluated after
    /// the optimizer and kept if it scores a better likelihood.
    pub starting_value: Option<f64>,
    /// Optimizer tolerances for the transformation parameter.
    pub brent: BrentConfig,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            model: EvolModel::Bm,
            data_labels: None,
            missing: None,
            starting_value: None,
            brent: BrentConfig::default(),
        }
    }
}

/// Smallest lambda considered by the optimizer (0 exactly would make the
/// correlation matrix singular).
const LAMBDA_MIN: f64 = 1e-8;

// ── Lambda transform helpers ──

/// Bounds for Pagel's lambda on this network.
///
/// The upper bound sits strictly below `max(tip height) / max(internal
/// height)`, the largest value keeping every variance positive; it falls
/// back to 1 when no internal node has positive height (a star phylogeny).
pub fn lambda_bounds(net: &Network) -> Result<(f64, f64)> {
    let heights = node_heights(net)?;
    let mut max_tip: f64 = 0.0;
    let mut max_internal: f64 = 0.0;
    for (i, &id) in net.topological_order().iter().enumerate() {
        let node = net.node(id).expect("id from topological order");
        if node.is_leaf() {
            max_tip = max_tip.max(heights[i]);
        } else {
            max_internal = max_internal.max(heights[i]);
        }
    }
    let upper = if max_internal > 0.0 {
        (max_tip / max_internal) * (1.0 - 1e-10)
    } else {
        1.0
    };
    Ok((LAMBDA_MIN, upper))
}

/// Per-tip diagonal adjustments for the lambda transform, parallel to the
/// topological tip order: `(γ₁² + γ₂²)·height` for hybrid tips, plain
/// `height` otherwise.
pub fn lambda_tip_adjustments(net: &Network) -> Result<Vec<f64>> {
    let heights = node_heights(net)?;
    let mut adjust = Vec::new();
    for (i, &id) in net.topological_order().iter().enumerate() {
        let node = net.node(id).expect("id from topological order");
        if !node.is_leaf() {
            continue;
        }
        let factor = if node.parent_edges.len() == 2 {
            let g1 = net.edge(node.parent_edges[0]).expect("edge id").gamma;
            let g2 = net.edge(node.parent_edges[1]).expect("edge id").gamma;
            g1 * g1 + g2 * g2
        } else {
            1.0
        };
        adjust.push(factor * heights[i]);
    }
    Ok(adjust)
}

/// Largest scaling-hybrid lambda keeping every rescaled weight inside
/// `[0, 1]`: `min over hybrid edges of 1/(1−γ)`. `None` when no hybrid edge
/// constrains lambda (a tree, or all weights exactly 1).
pub fn scaling_hybrid_upper_bound(net: &Network) -> Option<f64> {
    let mut bound: Option<f64> = None;
    for e in net.hybrid_edges() {
        let gamma = net.edge(e).expect("hybrid edge id").gamma;
        if gamma < 1.0 {
            let b = 1.0 / (1.0 - gamma);
            bound = Some(bound.map_or(b, |x: f64| x.min(b)));
        }
    }
    bound
}

/// Shared-path matrix under weights rescaled by the scaling-hybrid
/// transform, built on a clone of the network.
fn scaling_hybrid_matrix(net: &Network, lambda: f64) -> Result<TopologicalMatrix> {
    let mut scaled = net.clone();
    for e in net.hybrid_edges() {
        let gamma = net.edge(e).expect("hybrid edge id").gamma;
        scaled.set_gamma(e, 1.0 - lambda * (1.0 - gamma))?;
    }
    shared_path_matrix(&scaled)
}

/// Maximize the profile likelihood over the transformation parameter, then
/// give an optional caller-supplied candidate a chance to beat the optimum
/// (guards against the optimizer settling on a local mode).
fn optimize_with_start<F>(
    mut eval_ll: F,
    lo: f64,
    hi: f64,
    start: Option<f64>,
    config: &BrentConfig,
) -> Result<f64>
where
    F: FnMut(f64) -> Result<f64>,
{
    let best = maximize_bounded(&mut eval_ll, lo, hi, config)?;
    let mut lam = best.xmax;
    if let Some(s) = start {
        if s > lo && s < hi && eval_ll(s)? > best.fmax {
            lam = s;
        }
    }
    Ok(lam)
}

// ── Data matching ──

struct DataMap {
    /// Node-order positions of the observed tips, in topological order.
    used_positions: Vec<usize>,
    /// Data row feeding each used tip, parallel to `used_positions`.
    data_rows: Vec<usize>,
    /// Exclusion flag per data row.
    missing: Vec<bool>,
}

fn map_data(base: &TopologicalMatrix, y: &[f64], options: &FitOptions) -> Result<DataMap> {
    let tip_labels = base.tip_labels();
    let n_rows = y.len();

    let mut missing = match &options.missing {
        Some(mask) => {
            if mask.len() != n_rows {
                return Err(ReticulaError::InvalidInput(format!(
                    "missing mask has {} entries for {} data rows",
                    mask.len(),
                    n_rows
                )));
            }
            mask.clone()
        }
        None => vec![false; n_rows],
    };
    for (i, &v) in y.iter().enumerate() {
        if v.is_nan() {
            missing[i] = true;
        }
    }

    // Row feeding each tip, or None for an unobserved tip.
    let row_for_tip: Vec<Option<usize>> = match &options.data_labels {
        Some(labels) => {
            if labels.len() != n_rows {
                return Err(ReticulaError::InvalidInput(format!(
                    "{} data labels for {} data rows",
                    labels.len(),
                    n_rows
                )));
            }
            let mut by_name: HashMap<&str, usize> = HashMap::new();
            for (i, label) in labels.iter().enumerate() {
                if by_name.insert(label.as_str(), i).is_some() {
                    return Err(ReticulaError::InvalidInput(format!(
                        "duplicate data label '{}'; name-based matching is ambiguous",
                        label
                    )));
                }
            }
            let mut seen: HashSet<&str> = HashSet::new();
            for label in tip_labels {
                if !seen.insert(label.as_str()) {
                    return Err(ReticulaError::InvalidInput(format!(
                        "duplicate tip label '{}'; name-based matching is ambiguous",
                        label
                    )));
                }
            }
            for label in labels {
                if !tip_labels.iter().any(|t| t == label) {
                    return Err(ReticulaError::InvalidInput(format!(
                        "data label '{}' does not match any network tip",
                        label
                    )));
                }
            }
            tip_labels
                .iter()
                .map(|t| by_name.get(t.as_str()).copied())
                .collect()
        }
        None => {
            if n_rows != tip_labels.len() {
                return Err(ReticulaError::InvalidInput(format!(
                    "{} data rows for {} tips; supply data labels to match by name",
                    n_rows,
                    tip_labels.len()
                )));
            }
            (0..n_rows).map(Some).collect()
        }
    };

    let mut used_positions = Vec::new();
    let mut data_rows = Vec::new();
    for (k, &pos) in base.tip_positions().iter().enumerate() {
        if let Some(row) = row_for_tip[k] {
            if !missing[row] {
                used_positions.push(pos);
                data_rows.push(row);
            }
        }
    }
    if used_positions.is_empty() {
        return Err(ReticulaError::InvalidInput(
            "no usable observations after matching and missing-row removal".into(),
        ));
    }
    Ok(DataMap {
        used_positions,
        data_rows,
        missing,
    })
}

// ── GLS core ──

struct GlsCore {
    chol: Matrix,
    log_det_vy: f64,
    vy: Matrix,
    wx: Matrix,
    wy: Vec<f64>,
    fit: OlsFit,
    loglik: f64,
}

fn whitened_loglik(n: usize, rss: f64, log_det_vy: f64) -> f64 {
    let nf = n as f64;
    -0.5 * (nf * (2.0 * PI).ln() + nf + nf * (rss / nf).ln() + log_det_vy)
}

fn gls_at(v: &TopologicalMatrix, used: &[usize], x: &Matrix, y: &[f64]) -> Result<GlsCore> {
    let vy = v.values().select(used, used)?;
    let chol = cholesky_lower(&vy).map_err(|_| {
        ReticulaError::Numerical(
            "non-positive-definite tip covariance (zero-length duplicate tips or degenerate network)"
                .into(),
        )
    })?;
    let wx = forward_solve_matrix(&chol, x)?;
    let wy = forward_solve(&chol, y)?;
    let fit = ols(&wx, &wy)?;
    let log_det_vy = log_det_from_cholesky(&chol);
    let loglik = whitened_loglik(y.len(), fit.rss, log_det_vy);
    Ok(GlsCore {
        chol,
        log_det_vy,
        vy,
        wx,
        wy,
        fit,
        loglik,
    })
}

// ── Fitted model ──

/// A fitted phylogenetic regression.
///
/// Holds the whitened linear fit, the (possibly transformed) full variance
/// structure and its tip Cholesky factor, and the data bookkeeping needed
/// by the statistical accessors and by ancestral reconstruction. Immutable
/// after fitting.
#[derive(Debug, Clone)]
pub struct NetworkLm {
    model: EvolModel,
    lambda: f64,
    lambda_estimated: bool,
    full_v: TopologicalMatrix,
    used_positions: Vec<usize>,
    observed_labels: Vec<String>,
    data_rows: Vec<usize>,
    missing: Vec<bool>,
    x: Matrix,
    y: Vec<f64>,
    chol: Matrix,
    log_det_vy: f64,
    vy: Matrix,
    wx: Matrix,
    coefficients: Vec<f64>,
    xtx_inv: Matrix,
    fitted: Vec<f64>,
    residuals: Vec<f64>,
    whitened_residuals: Vec<f64>,
    rss: f64,
    loglik: f64,
    null_rss: f64,
    null_loglik: f64,
}

/// Fit a phylogenetic regression of `y` on the columns of `x` under the
/// trait-covariance structure implied by the network.
///
/// Data rows follow `options.data_labels` when given (any order, matched by
/// tip name) and the network's topological tip order otherwise. Rows flagged
/// missing, or with a NaN response, are dropped from the fit together with
/// the corresponding rows and columns of the covariance.
///
/// # Errors
///
/// `InvalidInput` on shape mismatches, ambiguous or unmatched labels, or no
/// usable rows; `Numerical` if the tip covariance is not positive definite
/// or the design is collinear.
pub fn fit(net: &Network, x: &Matrix, y: &[f64], options: &FitOptions) -> Result<NetworkLm> {
    if !net.is_rooted() {
        return Err(ReticulaError::InvalidInput(
            "network must be rooted (finalized) before fitting".into(),
        ));
    }
    if x.nrows() != y.len() {
        return Err(ReticulaError::InvalidInput(format!(
            "design has {} rows but response has {}",
            x.nrows(),
            y.len()
        )));
    }

    let base = shared_path_matrix(net)?;
    let map = map_data(&base, y, options)?;

    let xs = map
        .data_rows
        .iter()
        .map(|&r| x.row(r).to_vec())
        .collect::<Vec<_>>();
    let x_used = Matrix::from_rows(&xs)?;
    let y_used: Vec<f64> = map.data_rows.iter().map(|&r| y[r]).collect();

    let (full_v, core, lambda, lambda_estimated) = match options.model {
        EvolModel::Bm => {
            let core = gls_at(&base, &map.used_positions, &x_used, &y_used)?;
            (base, core, 1.0, false)
        }
        EvolModel::Lambda { fixed } => {
            let adjust = lambda_tip_adjustments(net)?;
            let transformed = |lam: f64| -> Result<TopologicalMatrix> {
                let mut v = base.clone();
                v.rescale_lambda(lam, &adjust)?;
                Ok(v)
            };
            let eval = |lam: f64| -> Result<GlsCore> {
                gls_at(&transformed(lam)?, &map.used_positions, &x_used, &y_used)
            };
            let (lam, estimated) = match fixed {
                Some(lam) => {
                    if !(lam > 0.0) || !lam.is_finite() {
                        return Err(ReticulaError::InvalidInput(format!(
                            "fixed lambda must be positive and finite, got {}",
                            lam
                        )));
                    }
                    (lam, false)
                }
                None => {
                    let (lo, hi) = lambda_bounds(net)?;
                    let lam = optimize_with_start(
                        |l| Ok(eval(l)?.loglik),
                        lo,
                        hi,
                        options.starting_value,
                        &options.brent,
                    )?;
                    (lam, true)
                }
            };
            let v = transformed(lam)?;
            let core = gls_at(&v, &map.used_positions, &x_used, &y_used)?;
            (v, core, lam, estimated)
        }
        EvolModel::ScalingHybrid { fixed } => {
            let eval = |lam: f64| -> Result<GlsCore> {
                gls_at(
                    &scaling_hybrid_matrix(net, lam)?,
                    &map.used_positions,
                    &x_used,
                    &y_used,
                )
            };
            let (lam, estimated) = match (fixed, scaling_hybrid_upper_bound(net)) {
                (Some(lam), _) => {
                    if !(lam > 0.0) || !lam.is_finite() {
                        return Err(ReticulaError::InvalidInput(format!(
                            "fixed lambda must be positive and finite, got {}",
                            lam
                        )));
                    }
                    (lam, false)
                }
                // Tree input: no hybrid edge to rescale, the transform is
                // the identity at every lambda.
                (None, None) => (1.0, false),
                (None, Some(bound)) => {
                    let lam = optimize_with_start(
                        |l| Ok(eval(l)?.loglik),
                        LAMBDA_MIN,
                        bound - 1e-8,
                        options.starting_value,
                        &options.brent,
                    )?;
                    (lam, true)
                }
            };
            let v = scaling_hybrid_matrix(net, lam)?;
            let core = gls_at(&v, &map.used_positions, &x_used, &y_used)?;
            (v, core, lam, estimated)
        }
    };

    // Null model: intercept only, whitened by the same Cholesky factor.
    let n = y_used.len();
    let w1 = forward_solve_matrix(&core.chol, &Matrix::ones_column(n))?;
    let null_fit = ols(&w1, &core.wy)?;
    let null_loglik = whitened_loglik(n, null_fit.rss, core.log_det_vy);

    let fitted = if core.fit.coefficients.is_empty() {
        vec![0.0; n]
    } else {
        x_used.matvec(&core.fit.coefficients)?
    };
    let residuals: Vec<f64> = y_used.iter().zip(&fitted).map(|(a, b)| a - b).collect();

    let observed_labels = map
        .used_positions
        .iter()
        .map(|&pos| {
            let k = full_v
                .tip_positions()
                .iter()
                .position(|&t| t == pos)
                .expect("used position is a tip");
            full_v.tip_labels()[k].clone()
        })
        .collect();

    Ok(NetworkLm {
        model: options.model,
        lambda,
        lambda_estimated,
        full_v,
        used_positions: map.used_positions,
        observed_labels,
        data_rows: map.data_rows,
        missing: map.missing,
        x: x_used,
        y: y_used,
        chol: core.chol,
        log_det_vy: core.log_det_vy,
        vy: core.vy,
        wx: core.wx,
        coefficients: core.fit.coefficients,
        xtx_inv: core.fit.xtx_inv,
        fitted,
        residuals,
        whitened_residuals: core.fit.residuals,
        rss: core.fit.rss,
        loglik: core.loglik,
        null_rss: null_fit.rss,
        null_loglik,
    })
}

impl NetworkLm {
    fn require_coefficients(&self) -> Result<()> {
        if self.coefficients.is_empty() {
            return Err(ReticulaError::InvalidInput(
                "model has no regressors; coefficient-based statistics are undefined".into(),
            ));
        }
        Ok(())
    }

    /// Number of observations used by the fit.
    pub fn n_observations(&self) -> usize {
        self.y.len()
    }

    /// Number of regression coefficients.
    pub fn n_coefficients(&self) -> usize {
        self.coefficients.len()
    }

    /// Estimated regression coefficients (empty for a zero-column design).
    pub fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }

    /// Coefficient standard errors, from the unbiased dispersion estimate.
    pub fn stderrs(&self) -> Result<Vec<f64>> {
        self.require_coefficients()?;
        let df = self.dof_residual();
        if df <= 0.0 {
            return Err(ReticulaError::InvalidInput(
                "no residual degrees of freedom for standard errors".into(),
            ));
        }
        let s2 = self.rss / df;
        Ok((0..self.coefficients.len())
            .map(|i| (s2 * self.xtx_inv.get(i, i)).sqrt())
            .collect())
    }

    /// Coefficient t statistics against zero.
    pub fn t_statistics(&self) -> Result<Vec<f64>> {
        let se = self.stderrs()?;
        Ok(self
            .coefficients
            .iter()
            .zip(&se)
            .map(|(b, s)| b / s)
            .collect())
    }

    /// Two-sided p-values for the t statistics.
    pub fn p_values(&self) -> Result<Vec<f64>> {
        use reticula_stats::Distribution;
        let t = self.t_statistics()?;
        let dist = StudentT::new(self.dof_residual())?;
        Ok(t.iter().map(|&v| 2.0 * (1.0 - dist.cdf(v.abs()))).collect())
    }

    /// Confidence intervals for the coefficients at the given level
    /// (e.g. 0.95).
    pub fn confidence_intervals(&self, level: f64) -> Result<Vec<(f64, f64)>> {
        if !(0.0 < level && level < 1.0) {
            return Err(ReticulaError::InvalidInput(format!(
                "confidence level must be in (0, 1), got {}",
                level
            )));
        }
        let se = self.stderrs()?;
        let q = StudentT::new(self.dof_residual())?.quantile(0.5 + level / 2.0)?;
        Ok(self
            .coefficients
            .iter()
            .zip(&se)
            .map(|(b, s)| (b - q * s, b + q * s))
            .collect())
    }

    /// Fitted values `X·β̂` on the original (unwhitened) scale.
    pub fn fitted_values(&self) -> &[f64] {
        &self.fitted
    }

    /// Residuals on the original scale.
    pub fn residuals(&self) -> &[f64] {
        &self.residuals
    }

    /// Whitened residuals `L⁻¹·(y − X·β̂)`.
    pub fn whitened_residuals(&self) -> &[f64] {
        &self.whitened_residuals
    }

    /// Residual sum of squares of the whitened fit.
    pub fn deviance(&self) -> f64 {
        self.rss
    }

    /// Deviance of the intercept-only model under the same whitening.
    pub fn null_deviance(&self) -> f64 {
        self.null_rss
    }

    /// Maximized log-likelihood.
    pub fn loglik(&self) -> f64 {
        self.loglik
    }

    /// Log-likelihood of the intercept-only model under the same whitening.
    pub fn null_loglik(&self) -> f64 {
        self.null_loglik
    }

    /// Maximum-likelihood variance-rate estimate `deviance / n`.
    pub fn sigma2(&self) -> f64 {
        self.rss / self.y.len() as f64
    }

    /// Estimated ancestral mean: the intercept coefficient.
    ///
    /// # Errors
    ///
    /// `InvalidInput` if the first design column is not an intercept.
    pub fn mu_hat(&self) -> Result<f64> {
        self.require_coefficients()?;
        for r in 0..self.x.nrows() {
            if self.x.get(r, 0) != 1.0 {
                return Err(ReticulaError::InvalidInput(
                    "first design column is not an intercept; ancestral mean is undefined".into(),
                ));
            }
        }
        Ok(self.coefficients[0])
    }

    /// Model degrees of freedom: coefficients, dispersion, and the
    /// transformation parameter for the lambda and scaling-hybrid models
    /// (counted whether the parameter was estimated or held fixed).
    pub fn dof(&self) -> usize {
        let transform = match self.model {
            EvolModel::Bm => 0,
            EvolModel::Lambda { .. } | EvolModel::ScalingHybrid { .. } => 1,
        };
        self.coefficients.len() + 1 + transform
    }

    /// Residual degrees of freedom `n − p`.
    pub fn dof_residual(&self) -> f64 {
        (self.y.len() - self.coefficients.len()) as f64
    }

    /// Coefficient of determination `1 − deviance/null deviance`.
    pub fn r_squared(&self) -> f64 {
        1.0 - self.rss / self.null_rss
    }

    /// Adjusted R².
    pub fn adj_r_squared(&self) -> f64 {
        let n = self.y.len() as f64;
        1.0 - (1.0 - self.r_squared()) * (n - 1.0) / self.dof_residual()
    }

    /// Akaike information criterion.
    pub fn aic(&self) -> f64 {
        2.0 * self.dof() as f64 - 2.0 * self.loglik
    }

    /// Small-sample corrected AIC.
    ///
    /// # Errors
    ///
    /// `InvalidInput` when `n ≤ dof + 1` (the correction diverges).
    pub fn aicc(&self) -> Result<f64> {
        let n = self.y.len() as f64;
        let k = self.dof() as f64;
        if n - k - 1.0 <= 0.0 {
            return Err(ReticulaError::InvalidInput(format!(
                "AICc undefined for {} observations and {} parameters",
                self.y.len(),
                self.dof()
            )));
        }
        Ok(self.aic() + 2.0 * k * (k + 1.0) / (n - k - 1.0))
    }

    /// Bayesian information criterion.
    pub fn bic(&self) -> f64 {
        let n = self.y.len() as f64;
        self.dof() as f64 * n.ln() - 2.0 * self.loglik
    }

    /// The fitted transformation parameter (1.0 for plain BM).
    pub fn lambda(&self) -> f64 {
        self.lambda
    }

    /// Whether the transformation parameter was estimated (vs fixed).
    pub fn lambda_estimated(&self) -> bool {
        self.lambda_estimated
    }

    /// Variance model of the fit.
    pub fn model(&self) -> EvolModel {
        self.model
    }

    /// The full node × node variance structure at the fitted parameter.
    pub fn variance_structure(&self) -> &TopologicalMatrix {
        &self.full_v
    }

    /// Node-order positions of the observed tips, in topological order.
    pub fn observed_positions(&self) -> &[usize] {
        &self.used_positions
    }

    /// Labels of the observed tips, parallel to
    /// [`NetworkLm::observed_positions`].
    pub fn observed_labels(&self) -> &[String] {
        &self.observed_labels
    }

    /// Data row feeding each observed tip.
    pub fn data_rows(&self) -> &[usize] {
        &self.data_rows
    }

    /// Exclusion flag per original data row.
    pub fn missing(&self) -> &[bool] {
        &self.missing
    }

    /// The design matrix restricted to observed tips, topological order.
    pub fn design(&self) -> &Matrix {
        &self.x
    }

    /// The response restricted to observed tips, topological order.
    pub fn response(&self) -> &[f64] {
        &self.y
    }

    /// Lower Cholesky factor of the observed-tip covariance.
    pub fn cholesky(&self) -> &Matrix {
        &self.chol
    }

    /// The observed-tip covariance (transformed, selected).
    pub fn tip_covariance(&self) -> &Matrix {
        &self.vy
    }

    /// `log |Vy|` of the observed-tip covariance.
    pub fn log_det_vy(&self) -> f64 {
        self.log_det_vy
    }

    /// The whitened design `L⁻¹·X`.
    pub fn whitened_design(&self) -> &Matrix {
        &self.wx
    }

    /// Coefficient covariance `σ̂²·(XᵗVy⁻¹X)⁻¹` (ML dispersion).
    pub fn coefficient_covariance(&self) -> Result<Matrix> {
        self.require_coefficients()?;
        let mut cov = self.xtx_inv.clone();
        cov.scale(self.sigma2());
        Ok(cov)
    }
}

impl Summarizable for NetworkLm {
    fn summary(&self) -> String {
        format!(
            "{} fit: {} observations, {} coefficients, loglik {:.4}, sigma2 {:.6}, lambda {:.6}{}",
            self.model.name(),
            self.n_observations(),
            self.n_coefficients(),
            self.loglik,
            self.sigma2(),
            self.lambda,
            if self.lambda_estimated { " (estimated)" } else { "" }
        )
    }
}

/// F test between two nested fits.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AnovaResult {
    /// F statistic.
    pub f_statistic: f64,
    /// Numerator degrees of freedom (extra coefficients).
    pub df_extra: f64,
    /// Denominator (residual) degrees of freedom of the full model.
    pub df_residual: f64,
    /// Upper-tail p-value.
    pub p_value: f64,
}

/// Compare a reduced fit against a full fit with strictly more regressors.
///
/// Nesting is checked by coefficient count only; both fits must use the
/// same observations.
pub fn anova(reduced: &NetworkLm, full: &NetworkLm) -> Result<AnovaResult> {
    if reduced.n_observations() != full.n_observations() {
        return Err(ReticulaError::InvalidInput(format!(
            "fits use different observation counts ({} vs {})",
            reduced.n_observations(),
            full.n_observations()
        )));
    }
    if full.n_coefficients() <= reduced.n_coefficients() {
        return Err(ReticulaError::InvalidInput(
            "the full model must have strictly more coefficients than the reduced model".into(),
        ));
    }
    let df_extra = (full.n_coefficients() - reduced.n_coefficients()) as f64;
    let df_residual = full.dof_residual();
    if df_residual <= 0.0 {
        return Err(ReticulaError::InvalidInput(
            "no residual degrees of freedom in the full model".into(),
        ));
    }
    let f_statistic =
        ((reduced.deviance() - full.deviance()) / df_extra) / (full.deviance() / df_residual);
    let p_value = FDistribution::new(df_extra, df_residual)?.sf(f_statistic);
    Ok(AnovaResult {
        f_statistic,
        df_extra,
        df_residual,
        p_value,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use reticula_stats::invert_spd;

    const TOL: f64 = 1e-8;

    const CASE_NETWORK: &str =
        "(A:2.5,((B:1,#H1:0.5::0.1):1,(C:1,(D:0.5)#H1:0.5::0.9):1):0.5);";

    fn intercept_fit(net: &Network, y: &[f64], options: &FitOptions) -> NetworkLm {
        let x = Matrix::ones_column(y.len());
        fit(net, &x, y, options).unwrap()
    }

    #[test]
    fn intercept_fit_matches_direct_gls() {
        let net = Network::from_newick(CASE_NETWORK).unwrap();
        let y = vec![9.5, 10.2, 10.9, 10.5];
        let m = intercept_fit(&net, &y, &FitOptions::default());

        // Direct GLS with an explicit inverse.
        let vinv = invert_spd(m.tip_covariance()).unwrap();
        let ones = vec![1.0; 4];
        let vi_y = vinv.matvec(&y).unwrap();
        let vi_1 = vinv.matvec(&ones).unwrap();
        let xtvix: f64 = vi_1.iter().sum();
        let xtviy: f64 = vi_y.iter().sum();
        let beta = xtviy / xtvix;
        assert!((m.coefficients()[0] - beta).abs() < TOL);

        let resid: Vec<f64> = y.iter().map(|v| v - beta).collect();
        let vi_r = vinv.matvec(&resid).unwrap();
        let rss: f64 = resid.iter().zip(&vi_r).map(|(a, b)| a * b).sum();
        assert!((m.deviance() - rss).abs() < TOL);

        let n = 4.0;
        let sigma2 = rss / n;
        let loglik =
            -0.5 * (n + n * (2.0 * PI).ln() + n * sigma2.ln() + m.log_det_vy());
        assert!((m.loglik() - loglik).abs() < TOL);
        assert!((m.sigma2() - sigma2).abs() < TOL);
    }

    #[test]
    fn intercept_only_fit_equals_its_null_model() {
        let net = Network::from_newick(CASE_NETWORK).unwrap();
        let y = vec![9.5, 10.2, 10.9, 10.5];
        let m = intercept_fit(&net, &y, &FitOptions::default());
        assert_eq!(m.loglik(), m.null_loglik());
        assert_eq!(m.deviance(), m.null_deviance());
    }

    #[test]
    fn permuted_rows_with_labels_fit_identically() {
        let net = Network::from_newick(CASE_NETWORK).unwrap();
        let native = intercept_fit(&net, &[9.5, 10.2, 10.9, 10.5], &FitOptions::default());
        let native_labels: Vec<String> = native.observed_labels().to_vec();

        // Rows shuffled, matched back by name.
        let shuffled_labels: Vec<String> = vec![
            native_labels[2].clone(),
            native_labels[0].clone(),
            native_labels[3].clone(),
            native_labels[1].clone(),
        ];
        let shuffled_y = vec![10.9, 9.5, 10.5, 10.2];
        let options = FitOptions {
            data_labels: Some(shuffled_labels),
            ..FitOptions::default()
        };
        let m = intercept_fit(&net, &shuffled_y, &options);
        assert!((m.coefficients()[0] - native.coefficients()[0]).abs() < TOL);
        assert!((m.loglik() - native.loglik()).abs() < TOL);
        assert!((m.deviance() - native.deviance()).abs() < TOL);
        assert!((m.aic() - native.aic()).abs() < TOL);
        assert!((m.bic() - native.bic()).abs() < TOL);
    }

    #[test]
    fn fixed_lambda_one_reproduces_bm() {
        let net = Network::from_newick(CASE_NETWORK).unwrap();
        let y = vec![9.5, 10.2, 10.9, 10.5];
        let bm = intercept_fit(&net, &y, &FitOptions::default());
        let lam = intercept_fit(
            &net,
            &y,
            &FitOptions {
                model: EvolModel::Lambda { fixed: Some(1.0) },
                ..FitOptions::default()
            },
        );
        assert!((lam.loglik() - bm.loglik()).abs() < TOL);
        assert!((lam.deviance() - bm.deviance()).abs() < TOL);
        assert!((lam.coefficients()[0] - bm.coefficients()[0]).abs() < TOL);
        // The transform parameter counts toward the dof even when fixed.
        assert_eq!(lam.dof(), bm.dof() + 1);
        assert!(!lam.lambda_estimated());
    }

    #[test]
    fn estimated_lambda_adds_a_degree_of_freedom() {
        let net = Network::from_newick(CASE_NETWORK).unwrap();
        let y = vec![9.5, 10.2, 10.9, 10.5];
        let bm = intercept_fit(&net, &y, &FitOptions::default());
        let lam = intercept_fit(
            &net,
            &y,
            &FitOptions {
                model: EvolModel::Lambda { fixed: None },
                ..FitOptions::default()
            },
        );
        assert_eq!(lam.dof(), bm.dof() + 1);
        assert!(lam.lambda_estimated());
        let (lo, hi) = lambda_bounds(&net).unwrap();
        assert!(lam.lambda() >= lo && lam.lambda() <= hi);
        // The profiled optimum cannot be worse than any fixed value.
        assert!(lam.loglik() + 1e-6 >= bm.loglik());
    }

    #[test]
    fn missing_rows_agree_with_refit_on_subset() {
        let net = Network::from_newick(CASE_NETWORK).unwrap();
        let full_labels: Vec<String> = {
            let probe = intercept_fit(&net, &[1.0, 2.0, 3.0, 4.0], &FitOptions::default());
            probe.observed_labels().to_vec()
        };

        // Drop the second tip via NaN and refit with only three rows.
        let y_nan = vec![9.5, f64::NAN, 10.9, 10.5];
        let with_nan = intercept_fit(&net, &y_nan, &FitOptions::default());

        let kept_labels = vec![
            full_labels[0].clone(),
            full_labels[2].clone(),
            full_labels[3].clone(),
        ];
        let subset = intercept_fit(
            &net,
            &[9.5, 10.9, 10.5],
            &FitOptions {
                data_labels: Some(kept_labels),
                ..FitOptions::default()
            },
        );
        assert_eq!(with_nan.n_observations(), 3);
        assert!((with_nan.loglik() - subset.loglik()).abs() < TOL);
        assert!((with_nan.deviance() - subset.deviance()).abs() < TOL);
        assert!((with_nan.coefficients()[0] - subset.coefficients()[0]).abs() < TOL);
        assert!(with_nan.missing().iter().filter(|&&m| m).count() == 1);
    }

    #[test]
    fn scaling_hybrid_on_a_tree_is_plain_bm() {
        let net = Network::from_newick("((A:1,B:1):1,C:2);").unwrap();
        let y = vec![1.0, 1.5, 0.2];
        let bm = intercept_fit(&net, &y, &FitOptions::default());
        let sh = intercept_fit(
            &net,
            &y,
            &FitOptions {
                model: EvolModel::ScalingHybrid { fixed: None },
                ..FitOptions::default()
            },
        );
        assert!((sh.loglik() - bm.loglik()).abs() < TOL);
        assert_eq!(sh.lambda(), 1.0);
        assert!(!sh.lambda_estimated());
        // The transform parameter still counts toward the dof.
        assert_eq!(sh.dof(), bm.dof() + 1);
    }

    #[test]
    fn scaling_hybrid_bound_reflects_weights() {
        let net = Network::from_newick(CASE_NETWORK).unwrap();
        // Minor weight 0.1 gives the tighter constraint 1/(1-0.1).
        let bound = scaling_hybrid_upper_bound(&net).unwrap();
        assert!((bound - 1.0 / 0.9).abs() < 1e-12);
        let tree = Network::from_newick("((A:1,B:1):1,C:2);").unwrap();
        assert!(scaling_hybrid_upper_bound(&tree).is_none());
    }

    #[test]
    fn duplicate_and_unknown_labels_rejected() {
        let net = Network::from_newick(CASE_NETWORK).unwrap();
        let x = Matrix::ones_column(4);
        let dup = FitOptions {
            data_labels: Some(vec!["A".into(), "A".into(), "B".into(), "C".into()]),
            ..FitOptions::default()
        };
        assert!(fit(&net, &x, &[1.0, 2.0, 3.0, 4.0], &dup).is_err());
        let unknown = FitOptions {
            data_labels: Some(vec!["A".into(), "B".into(), "C".into(), "Z".into()]),
            ..FitOptions::default()
        };
        assert!(fit(&net, &x, &[1.0, 2.0, 3.0, 4.0], &unknown).is_err());
    }

    #[test]
    fn zero_column_design_is_permitted() {
        let net = Network::from_newick(CASE_NETWORK).unwrap();
        let x = Matrix::zeros(4, 0);
        let m = fit(&net, &x, &[1.0, 2.0, 3.0, 4.0], &FitOptions::default()).unwrap();
        assert!(m.coefficients().is_empty());
        assert!(m.fitted_values().iter().all(|&v| v == 0.0));
        assert!(m.stderrs().is_err());
        assert!(m.mu_hat().is_err());
        assert!(m.loglik().is_finite());
    }

    #[test]
    fn anova_detects_a_real_regressor() {
        let net = Network::from_newick(CASE_NETWORK).unwrap();
        let probe = intercept_fit(&net, &[1.0, 2.0, 3.0, 4.0], &FitOptions::default());
        // A predictor perfectly aligned with the response, up to noise.
        let z: Vec<f64> = probe.response().to_vec();
        let y: Vec<f64> = z.iter().map(|v| 2.0 * v + 0.3).collect();
        let x_full = Matrix::from_columns(&[vec![1.0; 4], z], 4).unwrap();
        let reduced = intercept_fit(&net, &y, &FitOptions::default());
        let full = fit(&net, &x_full, &y, &FitOptions::default()).unwrap();
        let result = anova(&reduced, &full).unwrap();
        assert!(result.f_statistic > 0.0 || full.deviance() < 1e-12);
        assert!(result.p_value <= 1.0);
        assert!(anova(&full, &reduced).is_err());
    }

    #[test]
    fn simulated_intercept_fit_equals_its_null_model() {
        use crate::simulate::{simulate, ParamsBM};
        let net = Network::from_newick(CASE_NETWORK).unwrap();
        let params = ParamsBM::new(10.0, 1.0).unwrap();
        let sim = simulate(&net, &params, 1234).unwrap();
        let y = sim.tip_values();
        let m = intercept_fit(&net, &y, &FitOptions::default());
        assert_eq!(m.loglik(), m.null_loglik());
        assert_eq!(m.deviance(), m.null_deviance());
        // The intercept estimate should sit near the simulated mean.
        assert!((m.mu_hat().unwrap() - 10.0).abs() < 5.0);
    }

    #[test]
    fn lambda_rescale_roundtrip_through_public_helpers() {
        let net = Network::from_newick(CASE_NETWORK).unwrap();
        let base = shared_path_matrix(&net).unwrap();
        let adjust = lambda_tip_adjustments(&net).unwrap();
        let mut v = base.clone();
        v.rescale_lambda(0.6, &adjust).unwrap();
        v.rescale_lambda(1.0 / 0.6, &adjust).unwrap();
        for i in 0..v.n_nodes() {
            for j in 0..v.n_nodes() {
                assert!((v.values().get(i, j) - base.values().get(i, j)).abs() < 1e-10);
            }
        }
    }

    #[test]
    fn stderr_and_intervals_are_consistent() {
        let net = Network::from_newick(CASE_NETWORK).unwrap();
        let y = vec![9.5, 10.2, 10.9, 10.5];
        let m = intercept_fit(&net, &y, &FitOptions::default());
        let se = m.stderrs().unwrap();
        let (lo, hi) = m.confidence_intervals(0.95).unwrap()[0];
        let beta = m.coefficients()[0];
        assert!(lo < beta && beta < hi);
        // Interval half-width equals quantile times stderr.
        let q = StudentT::new(m.dof_residual()).unwrap().quantile(0.975).unwrap();
        assert!(((hi - lo) / 2.0 - q * se[0]).abs() < TOL);
        let mu = m.mu_hat().unwrap();
        assert_eq!(mu, beta);
    }
}
