use crate::liblinear::{self, SolverType};
use crate::util::{read_bool, read_i32, read_u64, write_bool, write_i32, write_u64};
use crate::vector::{estimate_dense_mem, estimate_map_mem, Representation, WeightVec};
use crate::{FeatureVec, Weight};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::io::{Error, ErrorKind, Read, Result, Write};

/// Loss minimized by a node classifier.
#[derive(Eq, PartialEq, Copy, Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LossType {
    Logistic,
    SquaredHinge,
    /// Logistic loss re-weighted by inverse propensity scores. Only the
    /// gradient is used during online training; loss reporting is disabled.
    PwLogistic,
}

impl LossType {
    fn to_i32(self) -> i32 {
        match self {
            LossType::Logistic => 0,
            LossType::SquaredHinge => 1,
            LossType::PwLogistic => 2,
        }
    }

    fn from_i32(v: i32) -> Result<Self> {
        match v {
            0 => Ok(LossType::Logistic),
            1 => Ok(LossType::SquaredHinge),
            2 => Ok(LossType::PwLogistic),
            _ => Err(Error::new(
                ErrorKind::InvalidData,
                format!("unknown loss type code {}", v),
            )),
        }
    }
}

#[derive(Eq, PartialEq, Copy, Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Optimizer {
    /// Batch dual coordinate descent (liblinear-style).
    Liblinear,
    Sgd,
    Adagrad,
}

/// Hyper-parameter settings for training node classifiers.
#[derive(Copy, Clone, Debug, Serialize, Deserialize)]
pub struct HyperParam {
    pub optimizer: Optimizer,
    pub loss_type: LossType,
    pub epochs: u32,
    pub eta: Weight,
    pub adagrad_eps: Weight,
    /// Upper bound on online training steps; negative means unbounded.
    pub tmax: i64,
    pub cost: Weight,
    pub auto_c_log: bool,
    pub auto_c_lin: bool,
    pub eps: Weight,
    pub max_iter: u32,
    pub weights_threshold: Weight,
    pub inbalance_labels_weighting: bool,
}

impl Default for HyperParam {
    fn default() -> Self {
        Self {
            optimizer: Optimizer::Liblinear,
            loss_type: LossType::Logistic,
            epochs: 1,
            eta: 1.,
            adagrad_eps: 0.001,
            tmax: -1,
            cost: 10.,
            auto_c_log: false,
            auto_c_lin: false,
            eps: 0.1,
            max_iter: 100,
            weights_threshold: 0.1,
            inbalance_labels_weighting: false,
        }
    }
}

impl HyperParam {
    /// Check if the hyper-parameter settings are valid.
    pub fn validate(&self) -> Result<()> {
        let check = |ok: bool, message: String| {
            if ok {
                Ok(())
            } else {
                Err(Error::new(ErrorKind::InvalidInput, message))
            }
        };
        check(self.eps > 0., format!("eps must be positive, but is {}", self.eps))?;
        check(self.cost > 0., format!("cost must be positive, but is {}", self.cost))?;
        check(self.eta > 0., format!("eta must be positive, but is {}", self.eta))?;
        check(
            self.adagrad_eps > 0.,
            format!("adagrad_eps must be positive, but is {}", self.adagrad_eps),
        )?;
        check(
            self.epochs > 0,
            format!("epochs must be positive, but is {}", self.epochs),
        )?;
        check(
            self.max_iter > 0,
            format!("max_iter must be positive, but is {}", self.max_iter),
        )?;
        check(
            self.weights_threshold >= 0.,
            format!(
                "weights_threshold must be non-negative, but is {}",
                self.weights_threshold
            ),
        )
    }
}

/// One binary subproblem handed to `Base::train`.
pub struct ProblemData<'a> {
    /// Number of feature columns.
    pub n: usize,
    /// Per-example binary labels, 0.0 or 1.0.
    pub bin_labels: Vec<f64>,
    pub bin_features: Vec<&'a FeatureVec>,
    pub instance_weights: Vec<Weight>,
    /// Reference example count for auto-C cost scaling, usually the full
    /// training set size.
    pub r: usize,
    /// Inverse propensity score for the pw_logistic gradient.
    pub inv_ps: Weight,
}

impl<'a> ProblemData<'a> {
    pub fn new(n: usize, bin_labels: Vec<f64>, bin_features: Vec<&'a FeatureVec>, r: usize) -> Self {
        let instance_weights = vec![1.; bin_labels.len()];
        Self {
            n,
            bin_labels,
            bin_features,
            instance_weights,
            r,
            inv_ps: 1.,
        }
    }
}

fn sigmoid(x: Weight) -> Weight {
    1. / (1. + (-x).exp())
}

fn logistic_grad(label: f64, pred: Weight, _inv_ps: Weight) -> Weight {
    sigmoid(pred) - label
}

fn squared_hinge_grad(label: f64, pred: Weight, _inv_ps: Weight) -> Weight {
    let y = 2. * label - 1.;
    let margin = 1. - y * pred;
    if margin > 0. {
        -2. * y * margin
    } else {
        0.
    }
}

fn pw_logistic_grad(label: f64, pred: Weight, inv_ps: Weight) -> Weight {
    let s = sigmoid(pred);
    if label > 0.5 {
        inv_ps * (s - 1.)
    } else {
        s
    }
}

fn grad_func(loss_type: LossType) -> fn(f64, Weight, Weight) -> Weight {
    match loss_type {
        LossType::Logistic => logistic_grad,
        LossType::SquaredHinge => squared_hinge_grad,
        LossType::PwLogistic => pw_logistic_grad,
    }
}

fn update_sgd(
    w: &mut WeightVec,
    features: &[(usize, Weight)],
    grad: Weight,
    t: u64,
    hyper: &HyperParam,
) {
    let lr = hyper.eta * (1. / t as Weight).sqrt();
    for &(i, v) in features {
        w.insert(i, w.at(i) - lr * grad * v);
    }
}

fn update_adagrad(
    w: &mut WeightVec,
    g: &mut WeightVec,
    features: &[(usize, Weight)],
    grad: Weight,
    hyper: &HyperParam,
) {
    for &(i, v) in features {
        let gi = g.at(i) + (grad * v).powi(2);
        g.insert(i, gi);
        w.insert(i, w.at(i) - hyper.eta * grad * v / (gi + hyper.adagrad_eps).sqrt());
    }
}

/// The larger class keeps weight 1, the smaller gets `1 + ln(larger/smaller)`.
fn imbalance_class_weights(positive: usize, total: usize) -> [Weight; 2] {
    let negative = total - positive;
    if negative > positive {
        [1., 1. + (negative as Weight / positive as Weight).ln()]
    } else {
        [1. + (positive as Weight / negative as Weight).ln(), 1.]
    }
}

/// One binary linear classifier attached to one tree node.
///
/// `class_count` 2 is a real classifier; 1 collapses to a constant class and
/// 0 marks an empty training set. With fewer than 2 classes the weight
/// vectors may be absent.
#[derive(Clone, Debug)]
pub struct Base {
    pub(crate) class_count: i32,
    pub(crate) first_class: i32,
    pub(crate) loss_type: LossType,
    pub(crate) t: u64,
    pub(crate) first_class_count: u64,
    pub(crate) w: Option<WeightVec>,
    pub(crate) g: Option<WeightVec>,
}

impl Default for Base {
    fn default() -> Self {
        Self::new()
    }
}

impl Base {
    pub fn new() -> Self {
        Self {
            class_count: 0,
            first_class: 0,
            loss_type: LossType::Logistic,
            t: 0,
            first_class_count: 0,
            w: None,
            g: None,
        }
    }

    pub fn class_count(&self) -> i32 {
        self.class_count
    }

    pub fn first_class(&self) -> i32 {
        self.first_class
    }

    pub fn loss_type(&self) -> LossType {
        self.loss_type
    }

    pub fn weights(&self) -> Option<&WeightVec> {
        self.w.as_ref()
    }

    /// Fit the classifier to one binary subproblem. Degenerate inputs (no
    /// examples, or a single class) collapse the classifier instead of
    /// invoking a solver.
    pub fn train(&mut self, problem: &ProblemData, hyper: &HyperParam) {
        if problem.bin_labels.is_empty() {
            self.first_class = 0;
            self.class_count = 0;
            return;
        }

        assert_eq!(problem.bin_labels.len(), problem.bin_features.len());
        assert!(problem.instance_weights.len() >= problem.bin_labels.len());

        let positive = problem.bin_labels.iter().filter(|&&l| l == 1.).count();
        if positive == 0 || positive == problem.bin_labels.len() {
            self.first_class = problem.bin_labels[0] as i32;
            self.class_count = 1;
            return;
        }

        let class_weights = if hyper.inbalance_labels_weighting {
            imbalance_class_weights(positive, problem.bin_labels.len())
        } else {
            [1., 1.]
        };

        match hyper.optimizer {
            Optimizer::Liblinear => self.train_batch(problem, hyper, class_weights),
            _ => self.train_online(problem, hyper),
        }

        self.prune_weights(hyper.weights_threshold);
        if let Some(w) = &mut self.w {
            if w.sparse_mem() < w.dense_mem() {
                w.to(Representation::Sparse);
            }
        }
    }

    fn train_batch(&mut self, problem: &ProblemData, hyper: &HyperParam, class_weights: [Weight; 2]) {
        let m = problem.bin_features.len();
        let mut cost = hyper.cost;
        if hyper.auto_c_log {
            cost *= 1. + (problem.r as Weight / m as Weight).ln();
        }
        if hyper.auto_c_lin {
            cost *= problem.r as Weight / m as Weight;
        }

        let solver = match hyper.loss_type {
            LossType::SquaredHinge => SolverType::L2LossSvcDual,
            _ => SolverType::LrDual,
        };
        self.loss_type = match solver {
            SolverType::L2LossSvcDual => LossType::SquaredHinge,
            SolverType::LrDual => LossType::Logistic,
        };

        let y = problem.bin_labels.iter().map(|&l| l == 1.).collect_vec();
        let mut w = liblinear::train(
            solver,
            &problem.bin_features,
            &y,
            &problem.instance_weights,
            problem.n,
            hyper.eps,
            cost * class_weights[1],
            cost * class_weights[0],
            hyper.max_iter,
        );

        self.first_class = problem.bin_labels[0] as i32;
        self.class_count = 2;

        // The solver orients weights toward class 1; flip them so a positive
        // margin predicts `first_class`, as the external solver convention has it.
        if self.first_class == 0 {
            for v in &mut w {
                *v = -*v;
            }
        }

        self.w = Some(WeightVec::Dense(w));
        self.g = None;
    }

    fn train_online(&mut self, problem: &ProblemData, hyper: &HyperParam) {
        self.loss_type = hyper.loss_type;
        self.class_count = 2;
        self.first_class = 1;
        self.t = 0;
        self.first_class_count = 0;

        let mut w = WeightVec::new_dense(problem.n);
        let mut g = match hyper.optimizer {
            Optimizer::Adagrad => Some(WeightVec::new_dense(problem.n)),
            _ => None,
        };
        let grad_fn = grad_func(hyper.loss_type);

        'epochs: for _ in 0..hyper.epochs {
            for (r, features) in problem.bin_features.iter().enumerate() {
                if hyper.tmax >= 0 && self.t > hyper.tmax as u64 {
                    break 'epochs;
                }

                self.t += 1;
                let label = problem.bin_labels[r];
                if label as i32 == self.first_class {
                    self.first_class_count += 1;
                }

                let pred = w.dot(features);
                let grad = grad_fn(label, pred, problem.inv_ps) * problem.instance_weights[r];
                match (hyper.optimizer, &mut g) {
                    (Optimizer::Adagrad, Some(g)) => {
                        update_adagrad(&mut w, g, features, grad, hyper)
                    }
                    _ => update_sgd(&mut w, features, grad, self.t, hyper),
                }
            }
        }

        self.w = Some(w);
        self.g = g;
    }

    /// Prepare the classifier for incremental `update` calls.
    pub fn setup_online_training(&mut self, hyper: &HyperParam, n: usize, start_with_dense_w: bool) {
        self.loss_type = hyper.loss_type;

        let new_vec = if n != 0 && start_with_dense_w {
            WeightVec::new_dense
        } else {
            WeightVec::new_map
        };
        self.w = Some(new_vec(n));
        self.g = match hyper.optimizer {
            Optimizer::Adagrad => Some(new_vec(n)),
            _ => None,
        };

        self.class_count = 2;
        self.first_class = 1;
        self.t = 0;
        self.first_class_count = 0;
    }

    /// Online update with a single example. Exclusive access via `&mut self`
    /// serializes concurrent callers.
    pub fn update(&mut self, label: f64, features: &FeatureVec, hyper: &HyperParam) {
        if hyper.tmax >= 0 && self.t > hyper.tmax as u64 {
            return;
        }

        self.t += 1;
        if label as i32 == self.first_class {
            self.first_class_count += 1;
        }

        let pred = self.predict_value(features);
        let grad = grad_func(hyper.loss_type)(label, pred, 1.);

        let w = self
            .w
            .as_mut()
            .expect("update called before setup_online_training");
        match (hyper.optimizer, &mut self.g) {
            (Optimizer::Adagrad, Some(g)) => update_adagrad(w, g, features, grad, hyper),
            _ => update_sgd(w, features, grad, self.t, hyper),
        }
    }

    pub fn finalize_online_training(&mut self, hyper: &HyperParam) {
        self.prune_weights(hyper.weights_threshold);
    }

    /// The "class 1" logit. With fewer than two classes the value saturates
    /// at ±10 depending on `first_class`.
    pub fn predict_value(&self, features: &[(usize, Weight)]) -> Weight {
        if self.class_count < 2 {
            return ((1 - 2 * self.first_class) * -10) as Weight;
        }
        let w = self.w.as_ref().expect("two-class classifier without weights");
        let val = w.dot(features);
        if self.first_class == 0 {
            -val
        } else {
            val
        }
    }

    pub fn predict_probability(&self, features: &[(usize, Weight)]) -> Weight {
        let val = self.predict_value(features);
        match self.loss_type {
            LossType::SquaredHinge => (-(1. - val).max(0.).powi(2)).exp(),
            _ => sigmoid(val),
        }
    }

    /// Remove weights below the threshold, keeping the bias at index 1 intact.
    pub fn prune_weights(&mut self, threshold: Weight) {
        if let Some(w) = &mut self.w {
            let bias = w.at(1);
            w.prune(threshold);
            w.insert(1, bias);
        }
    }

    /// Swap which label a positive margin encodes, inverting the weights so
    /// predictions are unchanged.
    pub fn set_first_class(&mut self, first: i32) {
        if self.first_class != first {
            if let Some(w) = &mut self.w {
                w.invert();
            }
            if let Some(g) = &mut self.g {
                g.invert();
            }
            self.first_class = first;
        }
    }

    pub fn copy_inverted(&self) -> Base {
        let mut copy = self.clone();
        if let Some(w) = &mut copy.w {
            w.invert();
        }
        if let Some(g) = &mut copy.g {
            g.invert();
        }
        copy
    }

    /// Convert the weight vectors to the given representation.
    pub fn to(&mut self, repr: Representation) {
        if let Some(w) = &mut self.w {
            w.to(repr);
        }
        if let Some(g) = &mut self.g {
            g.to(repr);
        }
    }

    pub fn mem(&self) -> usize {
        std::mem::size_of::<Self>()
            + self.w.as_ref().map_or(0, WeightVec::mem)
            + self.g.as_ref().map_or(0, WeightVec::mem)
    }

    pub fn save<W: Write>(&self, out: &mut W, save_grads: bool) -> Result<()> {
        write_i32(out, self.class_count)?;
        write_i32(out, self.first_class)?;
        write_i32(out, self.loss_type.to_i32())?;

        if self.class_count > 1 {
            let w = self.w.as_ref().expect("two-class classifier without weights");
            // Size accounting first, so the loader can pick a representation
            // before touching the blob.
            write_u64(out, w.size() as u64)?;
            write_u64(out, w.nonzero() as u64)?;
            w.save_payload(out)?;

            match (&self.g, save_grads) {
                (Some(g), true) => {
                    write_bool(out, true)?;
                    g.save(out)?;
                }
                _ => write_bool(out, false)?,
            }
        }
        Ok(())
    }

    pub fn load<R: Read>(input: &mut R, load_grads: bool, load_as: Representation) -> Result<Base> {
        let class_count = read_i32(input)?;
        let first_class = read_i32(input)?;
        let loss_type = LossType::from_i32(read_i32(input)?)?;

        let mut base = Base::new();
        base.class_count = class_count;
        base.first_class = first_class;
        base.loss_type = loss_type;

        if class_count > 1 {
            let size = read_u64(input)? as usize;
            let nonzero = read_u64(input)? as usize;

            // A map is only worth it when the accounting says so; otherwise
            // fall back to dense. An explicit sparse request always wins.
            let load_sparse = estimate_map_mem(size, nonzero) < estimate_dense_mem(size, nonzero)
                || size == 0;
            let repr = match load_as {
                Representation::Map if load_sparse => Representation::Map,
                Representation::Sparse => Representation::Sparse,
                _ => Representation::Dense,
            };

            base.w = Some(WeightVec::load_payload(input, size, nonzero, repr)?);

            if read_bool(input)? {
                if load_grads {
                    base.g = Some(WeightVec::load(input, repr)?);
                } else {
                    WeightVec::skip_load(input)?;
                }
            }
        }
        Ok(base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Index;
    use std::io::Cursor;

    fn features(pairs: &[(Index, Weight)]) -> FeatureVec {
        pairs.to_vec()
    }

    #[test]
    fn test_empty_problem_collapses() {
        let mut base = Base::new();
        base.train(
            &ProblemData::new(3, Vec::new(), Vec::new(), 0),
            &HyperParam::default(),
        );
        assert_eq!(0, base.class_count());
        assert_eq!(0, base.first_class());
        assert_eq!(-10., base.predict_value(&features(&[(1, 1.)])));
    }

    #[test]
    fn test_single_class_problem_collapses() {
        let rows = vec![features(&[(1, 1.)]), features(&[(1, 1.), (2, 1.)])];
        let mut base = Base::new();
        base.train(
            &ProblemData::new(3, vec![1., 1.], rows.iter().collect(), 2),
            &HyperParam::default(),
        );
        assert_eq!(1, base.class_count());
        assert_eq!(1, base.first_class());
        assert_eq!(10., base.predict_value(&features(&[(1, 1.)])));
        assert!(base.predict_probability(&features(&[(1, 1.)])) > 0.99);
    }

    #[test]
    fn test_online_sgd_fits_constant_negative() {
        // 100 copies of a bias-only negative example.
        let row = features(&[(1, 1.)]);
        let rows: Vec<&FeatureVec> = (0..100).map(|_| &row).collect();
        let hyper = HyperParam {
            optimizer: Optimizer::Sgd,
            loss_type: LossType::Logistic,
            ..HyperParam::default()
        };

        let mut base = Base::new();
        base.train(&ProblemData::new(2, vec![0.; 100], rows, 100), &hyper);

        assert_eq!(2, base.class_count());
        assert_eq!(1, base.first_class());
        // Class 0 probability should dominate.
        assert!(base.predict_probability(&row) < 0.1);
    }

    #[test]
    fn test_online_adagrad_fits_constant_negative() {
        let row = features(&[(1, 1.)]);
        let rows: Vec<&FeatureVec> = (0..100).map(|_| &row).collect();
        let hyper = HyperParam {
            optimizer: Optimizer::Adagrad,
            loss_type: LossType::Logistic,
            epochs: 3,
            ..HyperParam::default()
        };

        let mut base = Base::new();
        base.train(&ProblemData::new(2, vec![0.; 100], rows, 100), &hyper);
        assert!(base.predict_probability(&row) < 0.1);
    }

    #[test]
    fn test_tmax_bounds_online_steps() {
        let row = features(&[(1, 1.)]);
        let rows: Vec<&FeatureVec> = (0..100).map(|_| &row).collect();
        let hyper = HyperParam {
            optimizer: Optimizer::Sgd,
            tmax: 10,
            ..HyperParam::default()
        };

        let mut base = Base::new();
        base.train(&ProblemData::new(2, vec![0.; 100], rows, 100), &hyper);
        assert_eq!(11, base.t);
    }

    #[test]
    fn test_batch_training_separates() {
        let mut rows = Vec::new();
        let mut labels = Vec::new();
        for i in 0..20 {
            if i % 2 == 0 {
                rows.push(features(&[(1, 1.), (2, 1.)]));
                labels.push(0.);
            } else {
                rows.push(features(&[(1, 1.), (3, 1.)]));
                labels.push(1.);
            }
        }

        for loss_type in &[LossType::Logistic, LossType::SquaredHinge] {
            let hyper = HyperParam {
                loss_type: *loss_type,
                weights_threshold: 0.01,
                ..HyperParam::default()
            };
            let mut base = Base::new();
            base.train(
                &ProblemData::new(4, labels.clone(), rows.iter().collect(), 20),
                &hyper,
            );

            assert_eq!(2, base.class_count());
            // First training row is negative.
            assert_eq!(0, base.first_class());
            assert!(base.predict_probability(&features(&[(1, 1.), (3, 1.)])) > 0.5);
            assert!(base.predict_probability(&features(&[(1, 1.), (2, 1.)])) < 0.5);
        }
    }

    #[test]
    fn test_prune_preserves_bias() {
        let mut base = Base::new();
        base.class_count = 2;
        base.first_class = 1;
        base.w = Some(WeightVec::Dense(vec![0., 0.0005, 0.5, 0.0001, -0.2]));

        base.prune_weights(0.001);
        let w = base.weights().unwrap();
        assert_eq!(0.0005, w.at(1));
        assert_eq!(0.5, w.at(2));
        assert_eq!(0., w.at(3));
        assert_eq!(-0.2, w.at(4));
    }

    #[test]
    fn test_set_first_class_keeps_predictions() {
        let mut base = Base::new();
        base.class_count = 2;
        base.first_class = 1;
        base.w = Some(WeightVec::Dense(vec![0., 0.5, -1.5]));

        let row = features(&[(1, 1.), (2, 2.)]);
        let before = base.predict_value(&row);
        base.set_first_class(0);
        assert_eq!(0, base.first_class());
        assert_eq!(before, base.predict_value(&row));
        base.set_first_class(1);
        assert_eq!(before, base.predict_value(&row));
    }

    #[test]
    fn test_squared_hinge_probability_squash() {
        let mut base = Base::new();
        base.class_count = 2;
        base.first_class = 1;
        base.loss_type = LossType::SquaredHinge;
        base.w = Some(WeightVec::Dense(vec![0., 2.]));

        // Margin beyond 1 squashes to certainty.
        assert_eq!(1., base.predict_probability(&features(&[(1, 1.)])));
        let p = base.predict_probability(&features(&[(1, 0.25)]));
        assert!((p - (-0.25f64).exp()).abs() < 1e-12);
    }

    #[test]
    fn test_save_load_round_trip() {
        let mut base = Base::new();
        base.class_count = 2;
        base.first_class = 0;
        base.loss_type = LossType::SquaredHinge;
        base.w = Some(WeightVec::Dense(vec![0., 1., -0.5, 0., 0.25]));
        base.g = Some(WeightVec::Dense(vec![0., 0.1, 0.2, 0., 0.4]));

        for &save_grads in &[false, true] {
            let mut buf = Vec::new();
            base.save(&mut buf, save_grads).unwrap();

            let loaded =
                Base::load(&mut Cursor::new(&buf), save_grads, Representation::Dense).unwrap();
            assert_eq!(base.class_count, loaded.class_count);
            assert_eq!(base.first_class, loaded.first_class);
            assert_eq!(base.loss_type, loaded.loss_type);
            assert_eq!(base.w, loaded.w);
            if save_grads {
                assert_eq!(base.g, loaded.g);
            } else {
                assert!(loaded.g.is_none());
            }
        }
    }

    #[test]
    fn test_skipped_grads_leave_stream_aligned() {
        let mut base = Base::new();
        base.class_count = 2;
        base.first_class = 1;
        base.w = Some(WeightVec::Dense(vec![0., 1., 2.]));
        base.g = Some(WeightVec::Dense(vec![0., 3., 4.]));

        let mut buf = Vec::new();
        base.save(&mut buf, true).unwrap();
        base.save(&mut buf, true).unwrap();

        let mut cursor = Cursor::new(&buf);
        let first = Base::load(&mut cursor, false, Representation::Dense).unwrap();
        let second = Base::load(&mut cursor, true, Representation::Dense).unwrap();
        assert!(first.g.is_none());
        assert_eq!(base.g, second.g);
    }

    #[test]
    fn test_save_load_long_tail_goes_sparse() {
        let mut w = WeightVec::new_dense(10_000);
        for i in 0..10 {
            let tiny = i >= 5;
            w.insert(100 * (i + 1), if tiny { 1e-4 } else { 0.5 + i as Weight });
        }
        let mut base = Base::new();
        base.class_count = 2;
        base.first_class = 1;
        base.w = Some(w);

        base.prune_weights(1e-3);
        assert_eq!(5, base.weights().unwrap().nonzero());

        let mut buf = Vec::new();
        base.save(&mut buf, false).unwrap();
        // Header (12) + size accounting (16) + 5 pairs.
        assert_eq!(12 + 16 + 5 * 12, buf.len());

        let loaded = Base::load(&mut Cursor::new(&buf), false, Representation::Sparse).unwrap();
        let loaded_w = loaded.weights().unwrap();
        assert_eq!(Representation::Sparse, loaded_w.representation());
        for i in 0..10 {
            let index = 100 * (i + 1);
            assert_eq!(base.weights().unwrap().at(index), loaded_w.at(index));
        }
    }

    #[test]
    fn test_incremental_update() {
        let hyper = HyperParam {
            optimizer: Optimizer::Adagrad,
            loss_type: LossType::Logistic,
            ..HyperParam::default()
        };
        let mut base = Base::new();
        base.setup_online_training(&hyper, 0, false);

        let row = features(&[(1, 1.), (4, 2.)]);
        for _ in 0..100 {
            base.update(1., &row, &hyper);
        }
        base.finalize_online_training(&hyper);

        assert_eq!(100, base.t);
        assert_eq!(100, base.first_class_count);
        assert!(base.predict_probability(&row) > 0.9);
    }

    #[test]
    fn test_imbalance_class_weights() {
        let [w0, w1] = imbalance_class_weights(10, 100);
        assert_eq!(1., w0);
        assert!((w1 - (1. + 9f64.ln())).abs() < 1e-12);

        let [w0, w1] = imbalance_class_weights(80, 100);
        assert!((w0 - (1. + 4f64.ln())).abs() < 1e-12);
        assert_eq!(1., w1);
    }
}
