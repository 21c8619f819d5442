//! Ancestral state reconstruction (best linear unbiased prediction).
//!
//! Given observed tip values, the trait values at the remaining nodes
//! (internal nodes and unobserved tips) are jointly Gaussian with the
//! observations, so their conditional distribution is available in closed
//! form from the shared-path covariance. Two entry points: known process
//! parameters ([`reconstruct_known`]) and a fitted regression
//! ([`reconstruct_from_fit`]), which additionally propagates coefficient
//! uncertainty into the conditional variances.

use reticula_core::{ReticulaError, Result, Summarizable};
use reticula_stats::{
    cholesky_lower, forward_solve, forward_solve_matrix, Matrix, Normal, StudentT,
};

use crate::network::Network;
use crate::regression::NetworkLm;
use crate::simulate::{node_expectations, ParamsBM};
use crate::traversal::TopologicalMatrix;
use crate::vcv::shared_path_matrix;

/// Conditional means and variances for every node without an observation.
///
/// Immutable once created. `residual_dof` is present in fitted-model mode
/// and selects Student-t prediction intervals; known-parameter mode uses
/// the standard normal.
#[derive(Debug, Clone)]
pub struct ReconstructedStates {
    node_numbers: Vec<i32>,
    node_labels: Vec<String>,
    means: Vec<f64>,
    covariance: Matrix,
    observed_values: Vec<f64>,
    observed_labels: Vec<String>,
    residual_dof: Option<f64>,
}

impl ReconstructedStates {
    /// Display numbers of the reconstructed nodes (tips positive,
    /// internal nodes negative), in topological order.
    pub fn node_numbers(&self) -> &[i32] {
        &self.node_numbers
    }

    /// Labels of the reconstructed nodes (tip names where available).
    pub fn node_labels(&self) -> &[String] {
        &self.node_labels
    }

    /// Conditional means, parallel to the node numbers.
    pub fn means(&self) -> &[f64] {
        &self.means
    }

    /// Full conditional covariance of the reconstructed nodes.
    pub fn covariance(&self) -> &Matrix {
        &self.covariance
    }

    /// Conditional standard errors (square root of the covariance
    /// diagonal, clamped at zero against roundoff).
    pub fn stderrs(&self) -> Vec<f64> {
        (0..self.means.len())
            .map(|i| self.covariance.get(i, i).max(0.0).sqrt())
            .collect()
    }

    /// Prediction intervals at the given level (e.g. 0.95): Student-t
    /// quantiles with the fit's residual degrees of freedom in fitted-model
    /// mode, standard normal in known-parameter mode.
    pub fn prediction_intervals(&self, level: f64) -> Result<Vec<(f64, f64)>> {
        if !(0.0 < level && level < 1.0) {
            return Err(ReticulaError::InvalidInput(format!(
                "confidence level must be in (0, 1), got {}",
                level
            )));
        }
        let p = 0.5 + level / 2.0;
        let q = match self.residual_dof {
            Some(df) => StudentT::new(df)?.quantile(p)?,
            None => Normal::standard().quantile(p)?,
        };
        Ok(self
            .means
            .iter()
            .zip(self.stderrs())
            .map(|(m, s)| (m - q * s, m + q * s))
            .collect())
    }

    /// The observed tip values that conditioned the reconstruction.
    pub fn observed_values(&self) -> &[f64] {
        &self.observed_values
    }

    /// Labels of the observed tips.
    pub fn observed_labels(&self) -> &[String] {
        &self.observed_labels
    }

    /// Residual degrees of freedom when reconstructed from a fit.
    pub fn residual_dof(&self) -> Option<f64> {
        self.residual_dof
    }
}

impl Summarizable for ReconstructedStates {
    fn summary(&self) -> String {
        format!(
            "Reconstruction: {} nodes from {} observed tips ({})",
            self.means.len(),
            self.observed_values.len(),
            match self.residual_dof {
                Some(df) => format!("fitted model, {} residual dof", df),
                None => "known parameters".to_string(),
            }
        )
    }
}

/// Node-order positions without an observation: internal nodes plus any
/// tip not in `observed`, ascending (topological) order.
fn missing_positions(v: &TopologicalMatrix, observed: &[usize]) -> Vec<usize> {
    (0..v.n_nodes())
        .filter(|pos| !observed.contains(pos))
        .collect()
}

fn label_for(v: &TopologicalMatrix, pos: usize, number: i32) -> String {
    match v.tip_positions().iter().position(|&t| t == pos) {
        Some(k) => v.tip_labels()[k].clone(),
        None => format!("node_{}", number),
    }
}

/// The conditional-moment core shared by both entry modes.
///
/// `chol` factors the observed-tip block of `v` (in sigma2-free units),
/// `whitened_residual` is `L⁻¹·(y − mean_y)`, and `extra` carries the
/// coefficient-uncertainty term `(U, Cov(β̂))` in fitted-model mode.
#[allow(clippy::too_many_arguments)]
fn condition(
    v: &TopologicalMatrix,
    observed: &[usize],
    missing: &[usize],
    sigma2: f64,
    chol: &Matrix,
    whitened_residual: &[f64],
    mean_z: &[f64],
    extra: Option<(&Matrix, &Matrix)>,
) -> Result<(Vec<f64>, Matrix)> {
    let vyz = v.values().select(observed, missing)?;
    let a = forward_solve_matrix(chol, &vyz)?;
    let at = a.transpose();

    let shift = at.matvec(whitened_residual)?;
    let means: Vec<f64> = mean_z.iter().zip(&shift).map(|(m, s)| m + s).collect();

    let vz = v.values().select(missing, missing)?;
    let ata = at.matmul(&a)?;
    let m = missing.len();
    let mut cov = Matrix::zeros(m, m);
    for i in 0..m {
        for j in 0..m {
            cov.set(i, j, sigma2 * (vz.get(i, j) - ata.get(i, j)));
        }
    }
    if let Some((u, cov_beta)) = extra {
        let ucu = u.matmul(&cov_beta.matmul(&u.transpose())?)?;
        for i in 0..m {
            for j in 0..m {
                cov.set(i, j, cov.get(i, j) + ucu.get(i, j));
            }
        }
    }
    Ok((means, cov))
}

/// Reconstruct ancestral states under known Brownian-motion parameters.
///
/// `values` are the observed tip values, matched by `data_labels` when
/// given and taken in topological tip order otherwise; NaN entries mark
/// unobserved tips, which are reconstructed alongside the internal nodes.
/// Shifts in `params` enter the node means; random-root parameters are not
/// supported here.
pub fn reconstruct_known(
    net: &Network,
    params: &ParamsBM,
    values: &[f64],
    data_labels: Option<&[String]>,
) -> Result<ReconstructedStates> {
    if params.random_root() {
        return Err(ReticulaError::InvalidInput(
            "ancestral reconstruction assumes a fixed root; random-root parameters are not supported"
                .into(),
        ));
    }
    let v = shared_path_matrix(net)?;
    let means_all = node_expectations(net, params)?;

    // Match values to tips.
    let tip_labels = v.tip_labels();
    let row_for_tip: Vec<Option<usize>> = match data_labels {
        Some(labels) => {
            if labels.len() != values.len() {
                return Err(ReticulaError::InvalidInput(format!(
                    "{} data labels for {} values",
                    labels.len(),
                    values.len()
                )));
            }
            for (i, l) in labels.iter().enumerate() {
                if labels[..i].contains(l) {
                    return Err(ReticulaError::InvalidInput(format!(
                        "duplicate data label '{}'; name-based matching is ambiguous",
                        l
                    )));
                }
                if !tip_labels.contains(l) {
                    return Err(ReticulaError::InvalidInput(format!(
                        "data label '{}' does not match any network tip",
                        l
                    )));
                }
            }
            tip_labels
                .iter()
                .map(|t| labels.iter().position(|l| l == t))
                .collect()
        }
        None => {
            if values.len() != tip_labels.len() {
                return Err(ReticulaError::InvalidInput(format!(
                    "{} values for {} tips; supply data labels to match by name",
                    values.len(),
                    tip_labels.len()
                )));
            }
            (0..values.len()).map(Some).collect()
        }
    };

    let mut observed = Vec::new();
    let mut y = Vec::new();
    let mut observed_labels = Vec::new();
    for (k, &pos) in v.tip_positions().iter().enumerate() {
        if let Some(row) = row_for_tip[k] {
            if !values[row].is_nan() {
                observed.push(pos);
                y.push(values[row]);
                observed_labels.push(tip_labels[k].clone());
            }
        }
    }
    if observed.is_empty() {
        return Err(ReticulaError::InvalidInput(
            "no observed tip values to condition on".into(),
        ));
    }

    let vy = v.values().select(&observed, &observed)?;
    let chol = cholesky_lower(&vy).map_err(|_| {
        ReticulaError::Numerical(
            "non-positive-definite tip covariance (zero-length duplicate tips or degenerate network)"
                .into(),
        )
    })?;
    let residual: Vec<f64> = observed
        .iter()
        .zip(&y)
        .map(|(&pos, &val)| val - means_all[pos])
        .collect();
    let whitened = forward_solve(&chol, &residual)?;

    let missing = missing_positions(&v, &observed);
    let mean_z: Vec<f64> = missing.iter().map(|&pos| means_all[pos]).collect();
    let (means, covariance) = condition(
        &v,
        &observed,
        &missing,
        params.sigma2(),
        &chol,
        &whitened,
        &mean_z,
        None,
    )?;

    let node_numbers: Vec<i32> = missing.iter().map(|&pos| v.node_numbers()[pos]).collect();
    let node_labels = missing
        .iter()
        .zip(&node_numbers)
        .map(|(&pos, &num)| label_for(&v, pos, num))
        .collect();

    Ok(ReconstructedStates {
        node_numbers,
        node_labels,
        means,
        covariance,
        observed_values: y,
        observed_labels,
        residual_dof: None,
    })
}

/// Reconstruct ancestral states from a fitted regression.
///
/// For an intercept-only fit the node-level design is implied (a column of
/// ones); any other design requires `node_design`, one row per
/// reconstructed node in topological order, with the same columns as the
/// fit. The conditional variances include the `U·Cov(β̂)·Uᵗ` term for the
/// estimated coefficients, but ignore the uncertainty in the variance-rate
/// estimate itself (an approximation, not an error).
pub fn reconstruct_from_fit(
    fit: &NetworkLm,
    node_design: Option<&Matrix>,
) -> Result<ReconstructedStates> {
    let p = fit.n_coefficients();
    if p == 0 {
        return Err(ReticulaError::InvalidInput(
            "model has no regressors; ancestral reconstruction is undefined".into(),
        ));
    }
    let v = fit.variance_structure();
    let observed = fit.observed_positions();
    let missing = missing_positions(v, observed);

    let x_z = match node_design {
        Some(m) => {
            if m.nrows() != missing.len() || m.ncols() != p {
                return Err(ReticulaError::InvalidInput(format!(
                    "node design is {}x{}, expected {}x{} (one row per reconstructed node)",
                    m.nrows(),
                    m.ncols(),
                    missing.len(),
                    p
                )));
            }
            m.clone()
        }
        None => {
            // Implied intercept column; anything richer must be supplied.
            fit.mu_hat().map_err(|_| {
                ReticulaError::InvalidInput(
                    "fit has non-intercept regressors; supply node-level predictor values".into(),
                )
            })?;
            Matrix::ones_column(missing.len())
        }
    };
    let mean_z = x_z.matvec(fit.coefficients())?;

    let vyz = v.values().select(observed, &missing)?;
    let a = forward_solve_matrix(fit.cholesky(), &vyz)?;
    let at_w = a.transpose().matmul(fit.whitened_design())?;
    let mut u = Matrix::zeros(missing.len(), p);
    for i in 0..missing.len() {
        for j in 0..p {
            u.set(i, j, x_z.get(i, j) - at_w.get(i, j));
        }
    }
    let cov_beta = fit.coefficient_covariance()?;

    let (means, covariance) = condition(
        v,
        observed,
        &missing,
        fit.sigma2(),
        fit.cholesky(),
        fit.whitened_residuals(),
        &mean_z,
        Some((&u, &cov_beta)),
    )?;

    let node_numbers: Vec<i32> = missing.iter().map(|&pos| v.node_numbers()[pos]).collect();
    let node_labels = missing
        .iter()
        .zip(&node_numbers)
        .map(|(&pos, &num)| label_for(v, pos, num))
        .collect();

    Ok(ReconstructedStates {
        node_numbers,
        node_labels,
        means,
        covariance,
        observed_values: fit.response().to_vec(),
        observed_labels: fit.observed_labels().to_vec(),
        residual_dof: Some(fit.dof_residual()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regression::{fit, FitOptions};

    const TOL: f64 = 1e-10;

    #[test]
    fn two_tip_star_root_from_fit() {
        let net = Network::from_newick("(A:1,B:1);").unwrap();
        let x = Matrix::ones_column(2);
        let m = fit(&net, &x, &[3.0, 5.0], &FitOptions::default()).unwrap();
        let rec = reconstruct_from_fit(&m, None).unwrap();
        assert_eq!(rec.means().len(), 1);
        // Root mean equals the intercept, (y1+y2)/2.
        assert!((rec.means()[0] - 4.0).abs() < TOL);
        // Root variance reduces to sigma2 * l / 2 (coefficient uncertainty
        // only; the conditional variance proper vanishes at the root).
        let expected = m.sigma2() * 1.0 / 2.0;
        assert!((rec.covariance().get(0, 0) - expected).abs() < TOL);
        assert_eq!(rec.residual_dof(), Some(1.0));
    }

    #[test]
    fn known_parameters_give_a_zero_variance_root() {
        let net = Network::from_newick("(A:1,B:1);").unwrap();
        let params = ParamsBM::new(4.0, 1.0).unwrap();
        let rec = reconstruct_known(&net, &params, &[3.0, 5.0], None).unwrap();
        // Vyz is zero at the root, so the conditional law is the prior.
        assert!((rec.means()[0] - 4.0).abs() < TOL);
        assert!(rec.covariance().get(0, 0).abs() < TOL);
        assert!(rec.residual_dof().is_none());
    }

    #[test]
    fn missing_tip_is_reconstructed() {
        let net = Network::from_newick("((A:1,B:1):1,C:2);").unwrap();
        let x = Matrix::ones_column(3);
        // Rows matched by name, so the NaN unambiguously marks tip B.
        let y = vec![1.0, f64::NAN, 2.0];
        let options = FitOptions {
            data_labels: Some(vec!["A".into(), "B".into(), "C".into()]),
            ..FitOptions::default()
        };
        let m = fit(&net, &x, &y, &options).unwrap();
        assert!(!m.observed_labels().iter().any(|l| l == "B"));
        let rec = reconstruct_from_fit(&m, None).unwrap();
        // Two internal nodes plus the unobserved tip.
        assert_eq!(rec.means().len(), 3);
        assert!(rec.node_labels().iter().any(|l| l == "B"));
        for (number, label) in rec.node_numbers().iter().zip(rec.node_labels()) {
            if label == "B" {
                assert!(*number > 0);
            } else {
                assert!(*number < 0);
            }
        }
        let intervals = rec.prediction_intervals(0.95).unwrap();
        for ((lo, hi), mean) in intervals.iter().zip(rec.means()) {
            assert!(lo <= mean && mean <= hi);
        }
    }

    #[test]
    fn prediction_intervals_nest_by_level() {
        let net = Network::from_newick("((A:1,B:1):1,(C:1,D:1):1);").unwrap();
        let x = Matrix::ones_column(4);
        let m = fit(&net, &x, &[1.0, 1.4, 2.0, 2.2], &FitOptions::default()).unwrap();
        let rec = reconstruct_from_fit(&m, None).unwrap();
        let wide = rec.prediction_intervals(0.99).unwrap();
        let narrow = rec.prediction_intervals(0.90).unwrap();
        for (w, n) in wide.iter().zip(&narrow) {
            assert!(w.0 <= n.0 && n.1 <= w.1);
        }
    }

    #[test]
    fn non_intercept_design_requires_node_predictors() {
        let net = Network::from_newick("((A:1,B:1):1,C:2);").unwrap();
        let x = Matrix::from_columns(&[vec![1.0, 1.0, 1.0], vec![0.1, 0.5, 0.9]], 3).unwrap();
        let m = fit(&net, &x, &[1.0, 2.0, 3.0], &FitOptions::default()).unwrap();
        assert!(reconstruct_from_fit(&m, None).is_err());
        // Wrong shape rejected, right shape accepted.
        let bad = Matrix::ones_column(2);
        assert!(reconstruct_from_fit(&m, Some(&bad)).is_err());
        let good = Matrix::from_columns(&[vec![1.0, 1.0], vec![0.3, 0.4]], 2).unwrap();
        let rec = reconstruct_from_fit(&m, Some(&good)).unwrap();
        assert_eq!(rec.means().len(), 2);
    }

    #[test]
    fn random_root_parameters_rejected() {
        let net = Network::from_newick("(A:1,B:1);").unwrap();
        let params = ParamsBM::new(0.0, 1.0)
            .unwrap()
            .with_random_root(1.0)
            .unwrap();
        assert!(reconstruct_known(&net, &params, &[1.0, 2.0], None).is_err());
    }

    #[test]
    fn shifted_means_enter_the_reconstruction() {
        use crate::regressors::Shift;
        let net = Network::from_newick("((A:1,B:1):1,C:2);").unwrap();
        let a = net
            .tips()
            .into_iter()
            .find(|&id| net.display_name(id) == "A")
            .unwrap();
        let ab = net.parents(a)[0];
        let edge = net.edge_between(net.root(), ab).unwrap().id;
        let shift = Shift::on_edges(&net, &[edge], &[10.0]).unwrap();
        let params = ParamsBM::new(0.0, 1.0).unwrap().with_shift(shift);
        // All tips observed at their expectations: conditional means follow
        // the shifted prior at internal nodes.
        let labels: Vec<String> = vec!["A".into(), "B".into(), "C".into()];
        let rec =
            reconstruct_known(&net, &params, &[10.0, 10.0, 0.0], Some(&labels)).unwrap();
        // Residuals are all zero, so the conditional means equal the prior
        // means: 10 at the shifted clade's node, 0 at the root.
        let mut means = rec.means().to_vec();
        means.sort_by(f64::total_cmp);
        assert!((means[0] - 0.0).abs() < TOL);
        assert!((means[1] - 10.0).abs() < TOL);
    }
}
