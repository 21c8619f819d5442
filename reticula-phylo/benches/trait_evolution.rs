use criterion::{black_box, criterion_group, criterion_main, Criterion};
use reticula_phylo::regression::{fit, EvolModel, FitOptions};
use reticula_phylo::simulate::{simulate, ParamsBM};
use reticula_phylo::vcv::{incidence_matrix, shared_path_matrix};
use reticula_phylo::Network;
use reticula_stats::Matrix;

/// Balanced binary tree with `2^depth` tips, unit branch lengths.
fn balanced_newick(depth: usize) -> String {
    fn clade(depth: usize, next: &mut usize) -> String {
        if depth == 0 {
            *next += 1;
            format!("t{}:1", next)
        } else {
            let left = clade(depth - 1, next);
            let right = clade(depth - 1, next);
            format!("({},{}):1", left, right)
        }
    }
    let mut next = 0;
    format!("{};", clade(depth, &mut next))
}

const NETWORK: &str = "(A:2.5,((B:1,#H1:0.5::0.1):1,(C:1,(D:0.5)#H1:0.5::0.9):1):0.5);";

fn bench_variance_matrices(c: &mut Criterion) {
    let mut group = c.benchmark_group("variance_matrices");

    let tree = Network::from_newick(&balanced_newick(7)).unwrap();
    group.bench_function("shared_path_128_tips", |b| {
        b.iter(|| shared_path_matrix(black_box(&tree)))
    });
    group.bench_function("incidence_128_tips", |b| {
        b.iter(|| incidence_matrix(black_box(&tree)))
    });

    group.finish();
}

fn bench_fit(c: &mut Criterion) {
    let mut group = c.benchmark_group("fit");

    let tree = Network::from_newick(&balanced_newick(6)).unwrap();
    let params = ParamsBM::new(0.0, 1.0).unwrap();
    let y = simulate(&tree, &params, 42).unwrap().tip_values();
    let x = Matrix::ones_column(y.len());

    group.bench_function("bm_64_tips", |b| {
        b.iter(|| fit(black_box(&tree), &x, &y, &FitOptions::default()))
    });

    let lambda = FitOptions {
        model: EvolModel::Lambda { fixed: None },
        ..FitOptions::default()
    };
    group.bench_function("lambda_64_tips", |b| {
        b.iter(|| fit(black_box(&tree), &x, &y, &lambda))
    });

    group.finish();
}

fn bench_network_fit(c: &mut Criterion) {
    let mut group = c.benchmark_group("network_fit");

    let net = Network::from_newick(NETWORK).unwrap();
    let params = ParamsBM::new(10.0, 1.0).unwrap();
    let y = simulate(&net, &params, 7).unwrap().tip_values();
    let x = Matrix::ones_column(y.len());

    let scaling = FitOptions {
        model: EvolModel::ScalingHybrid { fixed: None },
        ..FitOptions::default()
    };
    group.bench_function("scaling_hybrid", |b| {
        b.iter(|| fit(black_box(&net), &x, &y, &scaling))
    });

    group.finish();
}

criterion_group!(benches, bench_variance_matrices, bench_fit, bench_network_fit);
criterion_main!(benches);
