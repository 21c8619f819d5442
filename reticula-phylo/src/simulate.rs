//! Forward simulation of Brownian-motion trait evolution on a network.
//!
//! A single pre-order pass tracks, per node, the trait expectation and one
//! realized value. Tree nodes add an independent Gaussian increment along
//! their parent edge; hybrid nodes blend the two inherited values with the
//! inheritance weights, with one independent increment per inbound edge.

use reticula_core::{ReticulaError, Result, Summarizable};

use crate::network::Network;
use crate::regressors::Shift;

/// Simple xorshift64 pseudo-random number generator.
struct Xorshift64 {
    state: u64,
}

impl Xorshift64 {
    fn new(seed: u64) -> Self {
        // Ensure state is never zero (xorshift requires nonzero state).
        Self {
            state: if seed == 0 { 1 } else { seed },
        }
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    fn next_f64(&mut self) -> f64 {
        self.next_u64() as f64 / u64::MAX as f64
    }

    /// Standard normal draw via Box-Muller.
    fn next_normal(&mut self) -> f64 {
        let mut u1 = self.next_f64();
        // Guard against log(0).
        while u1 <= f64::MIN_POSITIVE {
            u1 = self.next_f64();
        }
        let u2 = self.next_f64();
        (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
    }
}

/// Parameters of a Brownian-motion trait process.
///
/// The root value is `mu` exactly (fixed root) or drawn from
/// `Normal(mu, var_root)` (random root). An optional [`Shift`] adds
/// per-edge jumps to the mean.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ParamsBM {
    mu: f64,
    sigma2: f64,
    random_root: bool,
    var_root: f64,
    shift: Option<Shift>,
}

impl ParamsBM {
    /// Fixed-root Brownian motion with ancestral mean `mu` and variance
    /// rate `sigma2`.
    ///
    /// # Errors
    ///
    /// `InvalidInput` if `sigma2` is not strictly positive.
    pub fn new(mu: f64, sigma2: f64) -> Result<Self> {
        if !(sigma2 > 0.0) {
            return Err(ReticulaError::InvalidInput(format!(
                "variance rate must be positive, got {}",
                sigma2
            )));
        }
        Ok(Self {
            mu,
            sigma2,
            random_root: false,
            var_root: 0.0,
            shift: None,
        })
    }

    /// Draw the root value from `Normal(mu, var_root)` instead of fixing it.
    pub fn with_random_root(mut self, var_root: f64) -> Result<Self> {
        if !(var_root > 0.0) {
            return Err(ReticulaError::InvalidInput(format!(
                "root variance must be positive, got {}",
                var_root
            )));
        }
        self.random_root = true;
        self.var_root = var_root;
        Ok(self)
    }

    /// Attach a shift specification.
    pub fn with_shift(mut self, shift: Shift) -> Self {
        self.shift = Some(shift);
        self
    }

    /// Ancestral mean.
    pub fn mu(&self) -> f64 {
        self.mu
    }

    /// Variance rate per unit branch length.
    pub fn sigma2(&self) -> f64 {
        self.sigma2
    }

    /// Whether the root value is random.
    pub fn random_root(&self) -> bool {
        self.random_root
    }

    /// Root variance (meaningful only with a random root).
    pub fn var_root(&self) -> f64 {
        self.var_root
    }

    /// The attached shift specification, if any.
    pub fn shift(&self) -> Option<&Shift> {
        self.shift.as_ref()
    }
}

impl Summarizable for ParamsBM {
    fn summary(&self) -> String {
        let root = if self.random_root {
            format!("random root (var {})", self.var_root)
        } else {
            "fixed root".to_string()
        };
        format!(
            "Brownian motion: mu = {}, sigma2 = {}, {}",
            self.mu, self.sigma2, root
        )
    }
}

/// Result of one forward simulation: the trait expectation and one realized
/// value per node, in topological order.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SimulatedTraits {
    expectations: Vec<f64>,
    values: Vec<f64>,
    tip_positions: Vec<usize>,
    internal_positions: Vec<usize>,
    tip_labels: Vec<String>,
}

impl SimulatedTraits {
    /// Expectations for all nodes, in topological order.
    pub fn expectations(&self) -> &[f64] {
        &self.expectations
    }

    /// Realized values for all nodes, in topological order.
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Realized values at the tips, in topological tip order.
    pub fn tip_values(&self) -> Vec<f64> {
        self.tip_positions.iter().map(|&i| self.values[i]).collect()
    }

    /// Expectations at the tips, in topological tip order.
    pub fn tip_expectations(&self) -> Vec<f64> {
        self.tip_positions
            .iter()
            .map(|&i| self.expectations[i])
            .collect()
    }

    /// Realized values at internal nodes, in topological order.
    pub fn internal_values(&self) -> Vec<f64> {
        self.internal_positions
            .iter()
            .map(|&i| self.values[i])
            .collect()
    }

    /// Tip labels parallel to the tip accessors.
    pub fn tip_labels(&self) -> &[String] {
        &self.tip_labels
    }
}

/// Trait expectation at every node, in topological order, without drawing
/// any random values. This is the mean vector of the process, used for
/// known-parameter ancestral reconstruction.
pub fn node_expectations(net: &Network, params: &ParamsBM) -> Result<Vec<f64>> {
    let state = walk(net, params, None)?;
    Ok(state.expectations)
}

/// Simulate one realization of the trait process on the network.
///
/// The same seed always reproduces the same draws; distinct simulations
/// should use distinct seeds.
pub fn simulate(net: &Network, params: &ParamsBM, seed: u64) -> Result<SimulatedTraits> {
    let mut rng = Xorshift64::new(seed);
    walk(net, params, Some(&mut rng))
}

fn walk(
    net: &Network,
    params: &ParamsBM,
    mut rng: Option<&mut Xorshift64>,
) -> Result<SimulatedTraits> {
    if !net.is_rooted() {
        return Err(ReticulaError::InvalidInput(
            "network must be rooted (finalized) before simulation".into(),
        ));
    }
    let order = net.topological_order();
    let mut pos = vec![0usize; net.node_count()];
    for (i, &id) in order.iter().enumerate() {
        pos[id] = i;
    }

    let sigma2 = params.sigma2;
    // Gaussian draw with the given variance; zero in expectation-only mode.
    let mut draw = |var: f64| -> f64 {
        match rng.as_deref_mut() {
            Some(r) => var.sqrt() * r.next_normal(),
            None => 0.0,
        }
    };

    let mut expectations = vec![0.0; order.len()];
    let mut values = vec![0.0; order.len()];
    let mut tip_positions = Vec::new();
    let mut internal_positions = Vec::new();
    let mut tip_labels = Vec::new();

    for (i, &id) in order.iter().enumerate() {
        let node = net.node(id).expect("id from topological order");
        let s = params.shift.as_ref().map_or(0.0, |sh| sh.value(id));
        match node.parent_edges.len() {
            0 => {
                expectations[i] = params.mu;
                values[i] = if params.random_root {
                    params.mu + draw(params.var_root)
                } else {
                    params.mu
                };
            }
            1 => {
                let edge = net.edge(node.parent_edges[0]).expect("edge id from node");
                let p = pos[edge.parent];
                expectations[i] = expectations[p] + s;
                values[i] = values[p] + s + draw(sigma2 * edge.length);
            }
            2 => {
                let e1 = net.edge(node.parent_edges[0]).expect("edge id from node");
                let e2 = net.edge(node.parent_edges[1]).expect("edge id from node");
                let (p1, p2) = (pos[e1.parent], pos[e2.parent]);
                expectations[i] = e1.gamma * expectations[p1] + e2.gamma * expectations[p2];
                // One independent increment per inbound edge.
                values[i] = e1.gamma * (values[p1] + draw(sigma2 * e1.length))
                    + e2.gamma * (values[p2] + draw(sigma2 * e2.length));
            }
            k => {
                return Err(ReticulaError::InvalidInput(format!(
                    "node {} has {} parents; networks must be resolved at hybrid nodes (max 2)",
                    net.display_name(id),
                    k
                )))
            }
        }
        if node.is_leaf() {
            tip_positions.push(i);
            tip_labels.push(net.display_name(id));
        } else {
            internal_positions.push(i);
        }
    }

    Ok(SimulatedTraits {
        expectations,
        values,
        tip_positions,
        internal_positions,
        tip_labels,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const CASE_NETWORK: &str =
        "(A:2.5,((B:1,#H1:0.5::0.1):1,(C:1,(D:0.5)#H1:0.5::0.9):1):0.5);";

    #[test]
    fn rejects_nonpositive_variance_rate() {
        assert!(ParamsBM::new(0.0, 0.0).is_err());
        assert!(ParamsBM::new(0.0, -1.0).is_err());
        assert!(ParamsBM::new(0.0, f64::NAN).is_err());
        assert!(ParamsBM::new(0.0, 1.0).unwrap().with_random_root(0.0).is_err());
    }

    #[test]
    fn same_seed_reproduces_draws() {
        let net = Network::from_newick(CASE_NETWORK).unwrap();
        let params = ParamsBM::new(10.0, 1.0).unwrap();
        let a = simulate(&net, &params, 42).unwrap();
        let b = simulate(&net, &params, 42).unwrap();
        assert_eq!(a.values(), b.values());
        let c = simulate(&net, &params, 43).unwrap();
        assert_ne!(a.values(), c.values());
    }

    #[test]
    fn expectations_ignore_the_seed() {
        let net = Network::from_newick(CASE_NETWORK).unwrap();
        let params = ParamsBM::new(10.0, 1.0).unwrap();
        let a = simulate(&net, &params, 1).unwrap();
        let b = simulate(&net, &params, 99).unwrap();
        assert_eq!(a.expectations(), b.expectations());
        // Without shifts all expectations equal the root mean.
        for &e in a.expectations() {
            assert!((e - 10.0).abs() < 1e-12);
        }
    }

    #[test]
    fn shift_moves_descendant_expectations() {
        let net = Network::from_newick("((A:1,B:1):1,C:2);").unwrap();
        let a = net
            .tips()
            .into_iter()
            .find(|&id| net.display_name(id) == "A")
            .unwrap();
        let ab = net.parents(a)[0];
        let edge = net.edge_between(net.root(), ab).unwrap().id;
        let shift = Shift::on_edges(&net, &[edge], &[3.0]).unwrap();
        let params = ParamsBM::new(0.0, 1.0).unwrap().with_shift(shift);
        let sim = simulate(&net, &params, 7).unwrap();
        for (label, e) in sim.tip_labels().iter().zip(sim.tip_expectations()) {
            let expected = if label == "C" { 0.0 } else { 3.0 };
            assert!((e - expected).abs() < 1e-12, "tip {}: {}", label, e);
        }
    }

    #[test]
    fn degenerate_gamma_follows_major_parent() {
        // With gamma 1/0 the hybrid inherits only the major path, so a shift
        // on the minor side never reaches the hybrid's descendant.
        let net = Network::from_newick(
            "(A:2.5,((B:1,#H1:0.5::0):1,(C:1,(D:0.5)#H1:0.5::1):1):0.5);",
        )
        .unwrap();
        let b = net
            .tips()
            .into_iter()
            .find(|&id| net.display_name(id) == "B")
            .unwrap();
        let minor_parent = net.parents(b)[0];
        let edge = net
            .edge_between(net.parents(minor_parent)[0], minor_parent)
            .unwrap()
            .id;
        let shift = Shift::on_edges(&net, &[edge], &[5.0]).unwrap();
        let params = ParamsBM::new(0.0, 1.0).unwrap().with_shift(shift);
        let sim = simulate(&net, &params, 11).unwrap();
        for (label, e) in sim.tip_labels().iter().zip(sim.tip_expectations()) {
            let expected = if label == "B" { 5.0 } else { 0.0 };
            assert!((e - expected).abs() < 1e-12, "tip {}: {}", label, e);
        }
    }

    #[test]
    fn node_expectations_match_simulation_expectations() {
        let net = Network::from_newick(CASE_NETWORK).unwrap();
        let params = ParamsBM::new(2.0, 0.5).unwrap();
        let means = node_expectations(&net, &params).unwrap();
        let sim = simulate(&net, &params, 5).unwrap();
        assert_eq!(means, sim.expectations().to_vec());
    }

    #[test]
    fn random_root_perturbs_the_root_value() {
        let net = Network::from_newick("((A:1,B:1):1,C:2);").unwrap();
        let fixed = ParamsBM::new(1.0, 1.0).unwrap();
        let random = ParamsBM::new(1.0, 1.0).unwrap().with_random_root(4.0).unwrap();
        let sf = simulate(&net, &fixed, 3).unwrap();
        let sr = simulate(&net, &random, 3).unwrap();
        assert_eq!(sf.values()[0], 1.0);
        assert_ne!(sr.values()[0], 1.0);
        assert_eq!(sr.expectations()[0], 1.0);
    }

    #[test]
    fn tip_accessors_are_consistent() {
        let net = Network::from_newick(CASE_NETWORK).unwrap();
        let params = ParamsBM::new(0.0, 1.0).unwrap();
        let sim = simulate(&net, &params, 19).unwrap();
        assert_eq!(sim.tip_values().len(), 4);
        assert_eq!(sim.tip_labels().len(), 4);
        assert_eq!(sim.internal_values().len(), net.node_count() - 4);
    }
}
