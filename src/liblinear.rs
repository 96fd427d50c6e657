use crate::{FeatureVec, Index, Weight};
use itertools::Itertools;
use ndarray::Array1;
use rand::prelude::*;
use std::f64::{INFINITY, NEG_INFINITY};

/// Which dual problem to solve for a node classifier.
#[derive(Eq, PartialEq, Copy, Clone, Debug)]
pub enum SolverType {
    /// L2-regularized squared-hinge SVM, dual coordinate descent.
    L2LossSvcDual,
    /// L2-regularized logistic regression, dual coordinate descent.
    LrDual,
}

/// Train a binary linear model on sparse rows.
///
/// `y[i]` marks row `i` positive. The per-example cost is
/// `(cp or cn) * instance_weights[i]`, which matches how liblinear folds its
/// per-class weights and the problem's `W` field into the box constraint.
/// Returns a weight vector indexed directly by feature id.
pub fn train(
    solver: SolverType,
    x: &[&FeatureVec],
    y: &[bool],
    instance_weights: &[Weight],
    w_size: usize,
    eps: Weight,
    cp: Weight,
    cn: Weight,
    max_iter: u32,
) -> Vec<Weight> {
    assert_eq!(x.len(), y.len());
    assert!(instance_weights.len() >= x.len());

    let w = match solver {
        SolverType::L2LossSvcDual => {
            solve_l2r_l2_svc(x, y, instance_weights, w_size, eps, cp, cn, max_iter)
        }
        SolverType::LrDual => {
            solve_l2r_lr_dual(x, y, instance_weights, w_size, eps, cp, cn, max_iter)
        }
    };
    w.into_raw_vec()
}

fn sparse_dot_self(xi: &[(Index, Weight)]) -> Weight {
    xi.iter().map(|&(_, v)| v * v).sum()
}

fn sparse_dot_dense(xi: &[(Index, Weight)], w: &Array1<Weight>) -> Weight {
    xi.iter().map(|&(i, v)| w[i] * v).sum()
}

fn dense_add_assign_sparse_mul_scalar(w: &mut Array1<Weight>, xi: &[(Index, Weight)], scalar: Weight) {
    for &(i, v) in xi {
        w[i] += v * scalar;
    }
}

/// A coordinate descent solver for L2-loss SVM dual problems.
///
/// Pretty much a line-by-line port from liblinear (with some simplification).
///
///  min_\alpha  0.5(\alpha^T (Q + D)\alpha) - e^T \alpha,
///    s.t.      0 <= \alpha_i <= upper_bound_i,
///
///  where Qij = yi yj xi^T xj and D is a diagonal matrix
///
/// In the L2-SVM case:
/// 		upper_bound_i = INF
/// 		D_ii = 1/(2*C_i)
/// with C_i the per-example cost.
///
/// See Algorithm 3 of Hsieh et al., ICML 2008.
#[allow(clippy::many_single_char_names)]
fn solve_l2r_l2_svc(
    x: &[&FeatureVec],
    y: &[bool],
    instance_weights: &[Weight],
    w_size: usize,
    eps: Weight,
    cp: Weight,
    cn: Weight,
    max_iter: u32,
) -> Array1<Weight> {
    let l = x.len();
    let mut w = Array1::<Weight>::zeros(w_size);

    let mut active_size = l;

    // PG: projected gradient, for shrinking and stopping
    let mut pg: Weight;
    let mut pgmax_old = INFINITY;
    let mut pgmax_new: Weight;
    let mut pgmin_new: Weight;

    let diag = y
        .iter()
        .zip(instance_weights.iter())
        .map(|(&yi, &iw)| 0.5 / (if yi { cp } else { cn } * iw))
        .collect_vec();

    // Note that 0 <= alpha[i] <= upper_bound[y[i]]
    let mut alpha = vec![0.; l];

    let mut index = (0..l).collect_vec();
    let qd = x
        .iter()
        .enumerate()
        .map(|(i, xi)| diag[i] + sparse_dot_self(xi))
        .collect_vec();

    let mut iter = 0;
    let mut rng = thread_rng();
    while iter < max_iter {
        pgmax_new = NEG_INFINITY;
        pgmin_new = INFINITY;

        index.shuffle(&mut rng);

        let mut s = 0;
        while s < active_size {
            let i = index[s];
            let yi_sign = if y[i] { 1. } else { -1. };
            let xi = x[i];
            let alpha_i = &mut alpha[i];

            let g = yi_sign * sparse_dot_dense(xi, &w) - 1. + *alpha_i * diag[i];

            pg = 0.;
            if *alpha_i == 0. {
                if g > pgmax_old {
                    active_size -= 1;
                    index.swap(s, active_size);
                    continue;
                } else if g < 0. {
                    pg = g;
                }
            } else {
                pg = g;
            }

            pgmax_new = pgmax_new.max(pg);
            pgmin_new = pgmin_new.min(pg);

            if pg.abs() > 1e-12 {
                let alpha_old = *alpha_i;
                *alpha_i = (*alpha_i - g / qd[i]).max(0.);
                let d = (*alpha_i - alpha_old) * yi_sign;
                dense_add_assign_sparse_mul_scalar(&mut w, xi, d);
            }

            s += 1;
        }

        iter += 1;

        if pgmax_new - pgmin_new <= eps {
            if active_size == l {
                break;
            } else {
                active_size = l;
                pgmax_old = INFINITY;
                continue;
            }
        }
        pgmax_old = pgmax_new;
        if pgmax_old <= 0. {
            pgmax_old = INFINITY;
        }
    }

    w
}

/// A coordinate descent solver for the dual of L2-regularized logistic
/// regression problems.
///
/// Pretty much a line-by-line port from liblinear (with some simplification).
///
///  min_\alpha  0.5(\alpha^T Q \alpha) + \sum \alpha_i log (\alpha_i) + (upper_bound_i - \alpha_i) log (upper_bound_i - \alpha_i),
///    s.t.      0 <= \alpha_i <= upper_bound_i,
///
///  where Qij = yi yj xi^T xj and upper_bound_i is the per-example cost.
///
/// See Algorithm 5 of Yu et al., MLJ 2010.
#[allow(clippy::many_single_char_names)]
fn solve_l2r_lr_dual(
    x: &[&FeatureVec],
    y: &[bool],
    instance_weights: &[Weight],
    w_size: usize,
    eps: Weight,
    cp: Weight,
    cn: Weight,
    max_iter: u32,
) -> Array1<Weight> {
    let l = x.len();

    let max_inner_iter = 100; // for inner Newton
    let mut innereps = 1e-2;
    let innereps_min = eps.min(1e-8);
    let upper_bound = y
        .iter()
        .zip(instance_weights.iter())
        .map(|(&yi, &iw)| if yi { cp } else { cn } * iw)
        .collect_vec();

    // store alpha and C - alpha. Note that
    // 0 < alpha[i] < upper_bound[i]
    // alpha[2*i] + alpha[2*i+1] = upper_bound[i]
    let mut alpha = upper_bound
        .iter()
        .flat_map(|&c| {
            let alpha = (0.001 * c).min(1e-8);
            vec![alpha, c - alpha]
        })
        .collect_vec();

    let xtx = x.iter().map(|xi| sparse_dot_self(xi)).collect_vec();

    let mut w = Array1::<Weight>::zeros(w_size);
    for (i, (xi, &yi)) in x.iter().zip(y.iter()).enumerate() {
        let yi_sign = if yi { 1. } else { -1. };
        dense_add_assign_sparse_mul_scalar(&mut w, xi, yi_sign * alpha[2 * i]);
    }

    let mut index = (0..l).collect_vec();

    let mut iter = 0;
    let mut rng = thread_rng();
    while iter < max_iter {
        index.shuffle(&mut rng);
        let mut newton_iter = 0;
        let mut gmax = 0f64;
        for &i in &index {
            let yi_sign = if y[i] { 1. } else { -1. };
            let c = upper_bound[i];
            let xi = x[i];
            let a = xtx[i];
            let b = yi_sign * sparse_dot_dense(xi, &w);

            // Decide to minimize g_1(z) or g_2(z)
            let (ind1, ind2, sign) = if 0.5 * a * (alpha[2 * i + 1] - alpha[2 * i]) + b < 0. {
                (2 * i + 1, 2 * i, -1.)
            } else {
                (2 * i, 2 * i + 1, 1.)
            };

            //  g_t(z) = z*log(z) + (C-z)*log(C-z) + 0.5a(z-alpha_old)^2 + sign*b(z-alpha_old)
            let alpha_old = alpha[ind1];
            let mut z = if c - alpha_old < 0.5 * c {
                0.1 * alpha_old
            } else {
                alpha_old
            };
            let mut gp = a * (z - alpha_old) + sign * b + (z / (c - z)).ln();
            gmax = gmax.max(gp.abs());

            // Newton method on the sub-problem
            let eta = 0.1; // xi in the paper
            let mut inner_iter = 0;
            while inner_iter <= max_inner_iter {
                if gp.abs() < innereps {
                    break;
                }
                let gpp = a + c / (c - z) / z;
                let tmpz = z - gp / gpp;
                if tmpz <= 0. {
                    z *= eta;
                } else {
                    // tmpz in (0, C)
                    z = tmpz;
                }
                gp = a * (z - alpha_old) + sign * b + (z / (c - z)).ln();
                newton_iter += 1;
                inner_iter += 1;
            }

            if inner_iter > 0 {
                // update w
                alpha[ind1] = z;
                alpha[ind2] = c - z;
                dense_add_assign_sparse_mul_scalar(&mut w, xi, sign * (z - alpha_old) * yi_sign);
            }
        }

        iter += 1;

        if gmax < eps {
            break;
        }

        if newton_iter <= l / 10 {
            innereps = innereps_min.max(0.1 * innereps);
        }
    }

    w
}

#[cfg(test)]
mod tests {
    use super::*;

    fn separable_problem() -> (Vec<FeatureVec>, Vec<bool>) {
        let mut rows = Vec::new();
        let mut labels = Vec::new();
        for i in 0..20 {
            let v = 1. + (i % 5) as Weight / 10.;
            // Positives activate feature 2, negatives feature 3; 1 is the bias.
            if i % 2 == 0 {
                rows.push(vec![(1, 1.), (2, v)]);
                labels.push(true);
            } else {
                rows.push(vec![(1, 1.), (3, v)]);
                labels.push(false);
            }
        }
        (rows, labels)
    }

    #[test]
    fn test_solvers_separate_classes() {
        let (rows, labels) = separable_problem();
        let x: Vec<&FeatureVec> = rows.iter().collect();
        let instance_weights = vec![1.; x.len()];

        for &solver in &[SolverType::L2LossSvcDual, SolverType::LrDual] {
            let w = train(
                solver,
                &x,
                &labels,
                &instance_weights,
                4,
                0.1,
                1.,
                1.,
                100,
            );
            assert_eq!(4, w.len());
            for (xi, &yi) in rows.iter().zip(labels.iter()) {
                let score: Weight = xi.iter().map(|&(i, v)| w[i] * v).sum();
                assert!(
                    (score > 0.) == yi,
                    "solver {:?} misclassified {:?} (score {})",
                    solver,
                    xi,
                    score
                );
            }
        }
    }
}
