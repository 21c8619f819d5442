//! Bounded derivative-free one-dimensional optimization.
//!
//! Implements Brent's method (golden-section search with parabolic
//! interpolation) for maximizing a scalar function on a closed interval.
//! This is the optimizer behind the Pagel's-lambda and scaling-hybrid
//! profile-likelihood fits, which are one-parameter problems by design.

use reticula_core::{ReticulaError, Result};

/// Golden ratio constant used by the golden-section fallback step.
const GOLDEN: f64 = 0.381_966_011_250_105_1; // (3 - sqrt(5)) / 2

/// Convergence tolerances and evaluation budget for [`maximize_bounded`].
#[derive(Debug, Clone, Copy)]
pub struct BrentConfig {
    /// Relative tolerance on the parameter.
    pub xtol_rel: f64,
    /// Absolute tolerance on the parameter.
    pub xtol_abs: f64,
    /// Relative tolerance on the function value.
    pub ftol_rel: f64,
    /// Absolute tolerance on the function value.
    pub ftol_abs: f64,
    /// Maximum number of function evaluations.
    pub max_evals: usize,
}

impl Default for BrentConfig {
    fn default() -> Self {
        Self {
            xtol_rel: 1e-10,
            xtol_abs: 1e-10,
            ftol_rel: 1e-10,
            ftol_abs: 1e-10,
            max_evals: 1000,
        }
    }
}

/// Outcome of a bounded 1-D maximization.
#[derive(Debug, Clone, Copy)]
pub struct BrentResult {
    /// Argument of the best function value found.
    pub xmax: f64,
    /// Best function value found.
    pub fmax: f64,
    /// Number of function evaluations performed.
    pub n_evals: usize,
    /// Whether the tolerances were met within the evaluation budget.
    pub converged: bool,
}

/// Maximize `f` on `[lower, upper]` with Brent's method.
///
/// The evaluation counter is local to the call and returned in the result;
/// if the budget runs out the best point found so far is returned with
/// `converged = false` rather than an error, since a best-so-far optimum is
/// still a usable fit.
///
/// # Errors
///
/// Returns `InvalidInput` if the interval is empty or not finite, and
/// propagates the first error raised by `f` itself.
pub fn maximize_bounded<F>(mut f: F, lower: f64, upper: f64, config: &BrentConfig) -> Result<BrentResult>
where
    F: FnMut(f64) -> Result<f64>,
{
    if !lower.is_finite() || !upper.is_finite() || lower >= upper {
        return Err(ReticulaError::InvalidInput(format!(
            "maximize_bounded: invalid interval [{}, {}]",
            lower, upper
        )));
    }

    let mut a = lower;
    let mut b = upper;
    let mut x = a + GOLDEN * (b - a);
    let mut w = x;
    let mut v = x;

    let mut n_evals = 0usize;
    let mut eval = |arg: f64, count: &mut usize| -> Result<f64> {
        *count += 1;
        f(arg)
    };

    let mut fx = eval(x, &mut n_evals)?;
    let mut fw = fx;
    let mut fv = fx;

    // Step sizes from the two previous iterations (for the parabolic test).
    let mut d = 0.0_f64;
    let mut e = 0.0_f64;

    let mut converged = false;

    while n_evals < config.max_evals {
        let mid = 0.5 * (a + b);
        let tol1 = config.xtol_rel * x.abs() + config.xtol_abs;
        let tol2 = 2.0 * tol1;

        if (x - mid).abs() <= tol2 - 0.5 * (b - a) {
            converged = true;
            break;
        }

        let mut use_golden = true;
        if e.abs() > tol1 {
            // Try a parabola through x, w, v.
            let r = (x - w) * (fx - fv);
            let q = (x - v) * (fx - fw);
            let mut p = (x - v) * q - (x - w) * r;
            let mut q2 = 2.0 * (q - r);
            if q2 > 0.0 {
                p = -p;
            }
            q2 = q2.abs();
            let e_prev = e;
            e = d;
            // Accept the parabolic step only if it falls inside the interval
            // and improves on half the step before last.
            if p.abs() < (0.5 * q2 * e_prev).abs() && p > q2 * (a - x) && p < q2 * (b - x) {
                d = p / q2;
                let u = x + d;
                if u - a < tol2 || b - u < tol2 {
                    d = if mid > x { tol1 } else { -tol1 };
                }
                use_golden = false;
            }
        }
        if use_golden {
            e = if x < mid { b - x } else { a - x };
            d = GOLDEN * e;
        }

        let u = if d.abs() >= tol1 {
            x + d
        } else if d > 0.0 {
            x + tol1
        } else {
            x - tol1
        };
        let fu = eval(u, &mut n_evals)?;

        // Function-value convergence: the interval has stopped producing
        // meaningfully different values.
        if (fu - fx).abs() <= config.ftol_abs + config.ftol_rel * fx.abs()
            && (b - a) <= tol2 * 4.0
        {
            if fu > fx {
                x = u;
                fx = fu;
            }
            converged = true;
            break;
        }

        if fu >= fx {
            if u >= x {
                a = x;
            } else {
                b = x;
            }
            v = w;
            fv = fw;
            w = x;
            fw = fx;
            x = u;
            fx = fu;
        } else {
            if u < x {
                a = u;
            } else {
                b = u;
            }
            if fu >= fw || w == x {
                v = w;
                fv = fw;
                w = u;
                fw = fu;
            } else if fu >= fv || v == x || v == w {
                v = u;
                fv = fu;
            }
        }
    }

    Ok(BrentResult {
        xmax: x,
        fmax: fx,
        n_evals,
        converged,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maximizes_downward_parabola() {
        let res = maximize_bounded(
            |x| Ok(-(x - 2.0) * (x - 2.0)),
            0.0,
            5.0,
            &BrentConfig::default(),
        )
        .unwrap();
        assert!(res.converged);
        assert!((res.xmax - 2.0).abs() < 1e-8);
        assert!(res.fmax.abs() < 1e-12);
    }

    #[test]
    fn maximum_at_boundary() {
        // Monotone increasing on the interval: maximum at the upper bound.
        let res =
            maximize_bounded(|x| Ok(x), 0.0, 1.0, &BrentConfig::default()).unwrap();
        assert!((res.xmax - 1.0).abs() < 1e-6);
    }

    #[test]
    fn asymmetric_function() {
        // max of x·exp(-x) is at x = 1
        let res = maximize_bounded(
            |x| Ok(x * (-x).exp()),
            0.0,
            10.0,
            &BrentConfig::default(),
        )
        .unwrap();
        assert!((res.xmax - 1.0).abs() < 1e-7);
    }

    #[test]
    fn respects_eval_budget() {
        let config = BrentConfig {
            max_evals: 5,
            ..Default::default()
        };
        let res =
            maximize_bounded(|x| Ok((x * 37.0).sin()), 0.0, 10.0, &config).unwrap();
        assert!(res.n_evals <= 5);
    }

    #[test]
    fn invalid_interval_rejected() {
        assert!(maximize_bounded(|x| Ok(x), 1.0, 0.0, &BrentConfig::default()).is_err());
        assert!(
            maximize_bounded(|x| Ok(x), 0.0, f64::INFINITY, &BrentConfig::default()).is_err()
        );
    }

    #[test]
    fn propagates_inner_error() {
        let res = maximize_bounded(
            |_| {
                Err(reticula_core::ReticulaError::Numerical(
                    "bad evaluation".into(),
                ))
            },
            0.0,
            1.0,
            &BrentConfig::default(),
        );
        assert!(res.is_err());
    }
}
