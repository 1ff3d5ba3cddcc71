//! Support-vector classifiers with Platt-scaled probabilities.
//!
//! Three families share one dual coordinate-descent solver:
//!
//! - `C_SVC`: hinge loss with box bound `C`.
//! - `NU_SVC`: hinge loss with box bound `1/ν`, so a larger `ν` tolerates
//!   more margin errors.
//! - `LinearSVC`: squared hinge loss, always with the linear kernel.
//!
//! Two classes train a single machine whose positive side is the second
//! class. More classes train one machine per class against the rest, in
//! parallel, and normalise the per-class sigmoids into a distribution.

mod kernel;
mod platt;
mod solver;

use std::fmt;
use std::str::FromStr;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::ClassifyError;
use crate::classifier::{ClassLabel, Classifier, MarginRow, distinct_classes};

use self::kernel::KernelFunction;
use self::platt::PlattSigmoid;
use self::solver::{DecisionFunction, Loss, SolverSettings, train_binary};

// ── Parameters ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SvmKind {
    #[default]
    #[serde(rename = "C_SVC")]
    CSvc,
    #[serde(rename = "NU_SVC")]
    NuSvc,
    #[serde(rename = "LinearSVC")]
    LinearSvc,
}

impl SvmKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CSvc => "C_SVC",
            Self::NuSvc => "NU_SVC",
            Self::LinearSvc => "LinearSVC",
        }
    }
}

impl fmt::Display for SvmKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SvmKind {
    type Err = ClassifyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "C_SVC" => Ok(Self::CSvc),
            "NU_SVC" => Ok(Self::NuSvc),
            "LINEARSVC" | "LINEAR_SVC" => Ok(Self::LinearSvc),
            _ => Err(ClassifyError::Configuration(format!(
                "unknown SVM type '{s}' (expected C_SVC, NU_SVC or LinearSVC)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Kernel {
    #[default]
    Linear,
    Polynomial,
    Rbf,
    Sigmoid,
}

impl Kernel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Linear => "linear",
            Self::Polynomial => "polynomial",
            Self::Rbf => "rbf",
            Self::Sigmoid => "sigmoid",
        }
    }
}

impl fmt::Display for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Kernel {
    type Err = ClassifyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "linear" => Ok(Self::Linear),
            "polynomial" | "poly" => Ok(Self::Polynomial),
            "rbf" => Ok(Self::Rbf),
            "sigmoid" => Ok(Self::Sigmoid),
            _ => Err(ClassifyError::Configuration(format!(
                "unknown kernel '{s}' (expected linear, polynomial, rbf or sigmoid)"
            ))),
        }
    }
}

/// Hyper-parameters of a [`SupportVectorClassifier`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SvmParams {
    pub kind: SvmKind,
    pub kernel: Kernel,
    /// Penalty `C` for `C_SVC` and `LinearSVC`.
    pub cost: f64,
    /// `ν` for `NU_SVC`, in `(0, 1]`.
    pub nu: f64,
    pub degree: u32,
    /// `None` resolves to `1 / n_features` at fit time.
    pub gamma: Option<f64>,
    pub coef0: f64,
    /// Stopping tolerance on the projected-gradient spread.
    pub tolerance: f64,
    /// Upper bound on solver epochs.
    pub max_iter: usize,
    pub cache_size_mb: usize,
}

impl Default for SvmParams {
    fn default() -> Self {
        Self {
            kind: SvmKind::CSvc,
            kernel: Kernel::Linear,
            cost: 10.0,
            nu: 0.5,
            degree: 4,
            gamma: None,
            coef0: 0.0,
            tolerance: 1e-3,
            max_iter: 1000,
            cache_size_mb: 1024,
        }
    }
}

impl SvmParams {
    pub fn validate(&self) -> Result<(), ClassifyError> {
        let fail = |msg: String| Err(ClassifyError::Configuration(msg));
        if !(self.cost > 0.0) {
            return fail(format!("cost must be positive, got {}", self.cost));
        }
        if !(self.nu > 0.0 && self.nu <= 1.0) {
            return fail(format!("nu must be in (0, 1], got {}", self.nu));
        }
        if self.degree == 0 {
            return fail("degree must be at least 1".into());
        }
        if let Some(gamma) = self.gamma.filter(|g| !(*g > 0.0)) {
            return fail(format!("gamma must be positive, got {gamma}"));
        }
        if !(self.tolerance > 0.0) {
            return fail(format!("tolerance must be positive, got {}", self.tolerance));
        }
        if self.max_iter == 0 {
            return fail("max_iter must be at least 1".into());
        }
        Ok(())
    }

    fn loss(&self) -> Loss {
        match self.kind {
            SvmKind::CSvc => Loss::Hinge { upper: self.cost },
            SvmKind::NuSvc => Loss::Hinge { upper: 1.0 / self.nu },
            SvmKind::LinearSvc => Loss::SquaredHinge {
                diag: 1.0 / (2.0 * self.cost),
            },
        }
    }

    fn settings(&self) -> SolverSettings {
        SolverSettings {
            tolerance: self.tolerance,
            max_iter: self.max_iter,
            cache_bytes: self.cache_size_mb.saturating_mul(1024 * 1024),
        }
    }
}

// ── Classifier ──

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Machine {
    decision: DecisionFunction,
    sigmoid: PlattSigmoid,
}

impl Machine {
    fn train(
        x: &[Vec<f64>],
        positive: &[bool],
        kernel: &KernelFunction,
        loss: Loss,
        settings: SolverSettings,
    ) -> Self {
        let y: Vec<f64> = positive.iter().map(|&p| if p { 1.0 } else { -1.0 }).collect();
        let solution = train_binary(x, &y, kernel, loss, settings);
        debug!(epochs = solution.epochs, converged = solution.converged, "solver finished");
        let sigmoid = PlattSigmoid::fit(&solution.training_margins, positive);
        Self {
            decision: solution.decision,
            sigmoid,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct FittedModel {
    classes: Vec<ClassLabel>,
    n_features: usize,
    kernel: KernelFunction,
    /// One machine for two classes; one per class otherwise.
    machines: Vec<Machine>,
}

/// A support-vector classifier; unfitted until [`Classifier::fit`] succeeds.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SupportVectorClassifier {
    params: SvmParams,
    fitted: Option<FittedModel>,
}

impl SupportVectorClassifier {
    pub fn new(params: SvmParams) -> Self {
        Self {
            params,
            fitted: None,
        }
    }

    pub fn params(&self) -> &SvmParams {
        &self.params
    }

    fn model(&self) -> Result<&FittedModel, ClassifyError> {
        self.fitted.as_ref().ok_or_else(|| {
            ClassifyError::ModelUnavailable(format!(
                "{} classifier has not been trained",
                self.params.kind
            ))
        })
    }

    fn checked_model(&self, x: &[Vec<f64>]) -> Result<&FittedModel, ClassifyError> {
        let model = self.model()?;
        if let Some(row) = x.iter().find(|r| r.len() != model.n_features) {
            return Err(ClassifyError::FeatureSpaceMismatch {
                expected: model.n_features,
                found: row.len(),
            });
        }
        Ok(model)
    }
}

impl Classifier for SupportVectorClassifier {
    fn fit(&mut self, x: &[Vec<f64>], y: &[ClassLabel]) -> Result<(), ClassifyError> {
        self.params.validate()?;
        if x.is_empty() {
            return Err(ClassifyError::EmptyBatch("cannot fit a classifier on zero samples"));
        }
        if x.len() != y.len() {
            return Err(ClassifyError::ShapeMismatch(format!(
                "{} samples but {} targets",
                x.len(),
                y.len()
            )));
        }
        let n_features = x[0].len();
        if let Some(i) = x.iter().position(|r| r.len() != n_features) {
            return Err(ClassifyError::ShapeMismatch(format!(
                "row {i} has {} columns, expected {n_features}",
                x[i].len()
            )));
        }
        let classes = distinct_classes(y);
        if classes.len() < 2 {
            return Err(ClassifyError::SingleClass(classes[0]));
        }

        let kernel = KernelFunction::resolve(&self.params, n_features);
        let loss = self.params.loss();
        let settings = self.params.settings();

        let machines = if classes.len() == 2 {
            let positive: Vec<bool> = y.iter().map(|&c| c == classes[1]).collect();
            vec![Machine::train(x, &positive, &kernel, loss, settings)]
        } else {
            classes
                .par_iter()
                .map(|&class| {
                    let positive: Vec<bool> = y.iter().map(|&c| c == class).collect();
                    Machine::train(x, &positive, &kernel, loss, settings)
                })
                .collect()
        };

        info!(
            kind = %self.params.kind,
            kernel = %kernel.kernel(),
            gamma = kernel.gamma(),
            samples = x.len(),
            features = n_features,
            classes = classes.len(),
            "trained support-vector classifier"
        );
        // A two-class model has one machine, for the second class.
        let machine_classes = &classes[classes.len() - machines.len()..];
        for (class, machine) in machine_classes.iter().zip(&machines) {
            if let Some(count) = machine.decision.support_count() {
                debug!(class, support_vectors = count, "machine");
            }
        }

        self.fitted = Some(FittedModel {
            classes,
            n_features,
            kernel,
            machines,
        });
        Ok(())
    }

    fn is_fitted(&self) -> bool {
        self.fitted.is_some()
    }

    fn classes(&self) -> &[ClassLabel] {
        self.fitted
            .as_ref()
            .map(|m| m.classes.as_slice())
            .unwrap_or_default()
    }

    fn n_features(&self) -> Option<usize> {
        self.fitted.as_ref().map(|m| m.n_features)
    }

    fn decision_margins(&self, x: &[Vec<f64>]) -> Result<Vec<MarginRow>, ClassifyError> {
        let model = self.checked_model(x)?;
        Ok(x.par_iter()
            .map(|row| match model.machines.as_slice() {
                [single] => MarginRow::Binary(single.decision.eval(&model.kernel, row)),
                machines => MarginRow::PerClass(
                    machines
                        .iter()
                        .map(|m| m.decision.eval(&model.kernel, row))
                        .collect(),
                ),
            })
            .collect())
    }

    fn class_probabilities(&self, x: &[Vec<f64>]) -> Result<Vec<Vec<f64>>, ClassifyError> {
        let model = self.checked_model(x)?;
        Ok(x.par_iter()
            .map(|row| match model.machines.as_slice() {
                [single] => {
                    let p = single.sigmoid.probability(single.decision.eval(&model.kernel, row));
                    vec![1.0 - p, p]
                }
                machines => {
                    let raw: Vec<f64> = machines
                        .iter()
                        .map(|m| m.sigmoid.probability(m.decision.eval(&model.kernel, row)))
                        .collect();
                    let total: f64 = raw.iter().sum();
                    if total > 0.0 {
                        raw.into_iter().map(|p| p / total).collect()
                    } else {
                        vec![1.0 / raw.len() as f64; raw.len()]
                    }
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Three well-separated clusters labelled 10, 20, 30.
    fn clusters() -> (Vec<Vec<f64>>, Vec<ClassLabel>) {
        let centres = [(10, [4.0, 0.0]), (20, [-4.0, 0.0]), (30, [0.0, 4.0])];
        let offsets = [[0.3, 0.2], [-0.2, 0.3], [0.1, -0.3], [-0.3, -0.1]];
        let mut x = Vec::new();
        let mut y = Vec::new();
        for (label, c) in centres {
            for o in offsets {
                x.push(vec![c[0] + o[0], c[1] + o[1]]);
                y.push(label);
            }
        }
        (x, y)
    }

    fn binary() -> (Vec<Vec<f64>>, Vec<ClassLabel>) {
        let x = vec![
            vec![2.0, 1.0],
            vec![-2.0, -1.0],
            vec![3.0, 0.5],
            vec![-3.0, -0.5],
            vec![1.5, 2.0],
            vec![-1.5, -2.0],
        ];
        let y = vec![1, 0, 1, 0, 1, 0];
        (x, y)
    }

    fn fit(params: SvmParams, x: &[Vec<f64>], y: &[ClassLabel]) -> SupportVectorClassifier {
        let mut clf = SupportVectorClassifier::new(params);
        clf.fit(x, y).unwrap();
        clf
    }

    #[test]
    fn linear_c_svc_separates_clusters() {
        let (x, y) = clusters();
        let clf = fit(SvmParams::default(), &x, &y);
        assert_eq!(clf.classes(), &[10, 20, 30]);
        assert_eq!(clf.predict(&x).unwrap(), y);
        assert_eq!(clf.predict(&[vec![5.0, 0.5]]).unwrap(), vec![10]);
    }

    #[test]
    fn rbf_kernel_separates_clusters() {
        let (x, y) = clusters();
        let params = SvmParams {
            kernel: Kernel::Rbf,
            ..SvmParams::default()
        };
        let clf = fit(params, &x, &y);
        assert_eq!(clf.predict(&x).unwrap(), y);
    }

    #[test]
    fn linear_svc_separates_clusters() {
        let (x, y) = clusters();
        let params = SvmParams {
            kind: SvmKind::LinearSvc,
            kernel: Kernel::Rbf,
            ..SvmParams::default()
        };
        let clf = fit(params, &x, &y);
        assert_eq!(clf.predict(&x).unwrap(), y);
    }

    #[test]
    fn multi_class_probabilities_form_a_distribution() {
        let (x, y) = clusters();
        let params = SvmParams {
            kind: SvmKind::NuSvc,
            ..SvmParams::default()
        };
        let clf = fit(params, &x, &y);
        let proba = clf.class_probabilities(&x).unwrap();
        assert_eq!(proba.len(), x.len());
        for row in &proba {
            assert_eq!(row.len(), 3);
            assert!((row.iter().sum::<f64>() - 1.0).abs() < 1e-9);
            assert!(row.iter().all(|p| (0.0..=1.0).contains(p)));
        }
        let margins = clf.decision_margins(&x).unwrap();
        assert!(margins.iter().all(|m| matches!(m, MarginRow::PerClass(v) if v.len() == 3)));
    }

    #[test]
    fn binary_problem_yields_single_margin() {
        let (x, y) = binary();
        let clf = fit(SvmParams::default(), &x, &y);
        let margins = clf.decision_margins(&x).unwrap();
        assert!(matches!(margins[0], MarginRow::Binary(m) if m > 0.0));
        assert!(matches!(margins[1], MarginRow::Binary(m) if m < 0.0));

        let proba = clf.class_probabilities(&x).unwrap();
        assert_eq!(proba[0].len(), 2);
        assert!(proba[0][1] > proba[0][0]);
        assert!(proba[1][0] > proba[1][1]);
        assert_eq!(clf.predict(&x).unwrap(), y);
    }

    #[test]
    fn single_class_is_rejected() {
        let mut clf = SupportVectorClassifier::default();
        let result = clf.fit(&[vec![1.0], vec![2.0]], &[5, 5]);
        assert!(matches!(result, Err(ClassifyError::SingleClass(5))));
        assert!(!clf.is_fitted());
    }

    #[test]
    fn unfitted_and_mismatched_inputs_fail() {
        let clf = SupportVectorClassifier::default();
        assert!(matches!(
            clf.decision_margins(&[vec![1.0]]),
            Err(ClassifyError::ModelUnavailable(_))
        ));

        let (x, y) = binary();
        let clf = fit(SvmParams::default(), &x, &y);
        assert!(matches!(
            clf.class_probabilities(&[vec![1.0, 2.0, 3.0]]),
            Err(ClassifyError::FeatureSpaceMismatch { expected: 2, found: 3 })
        ));
    }

    #[test]
    fn fitted_model_survives_json() {
        let (x, y) = binary();
        let clf = fit(SvmParams::default(), &x, &y);
        let json = serde_json::to_string(&clf).unwrap();
        let back: SupportVectorClassifier = serde_json::from_str(&json).unwrap();
        assert_eq!(back.predict(&x).unwrap(), y);
        assert_eq!(back.n_features(), Some(2));
    }

    #[test]
    fn kind_and_kernel_parse() {
        assert_eq!("C_SVC".parse::<SvmKind>().unwrap(), SvmKind::CSvc);
        assert_eq!("nu_svc".parse::<SvmKind>().unwrap(), SvmKind::NuSvc);
        assert_eq!("LinearSVC".parse::<SvmKind>().unwrap(), SvmKind::LinearSvc);
        assert!(matches!("SVR".parse::<SvmKind>(), Err(ClassifyError::Configuration(_))));

        assert_eq!("poly".parse::<Kernel>().unwrap(), Kernel::Polynomial);
        assert_eq!("RBF".parse::<Kernel>().unwrap(), Kernel::Rbf);
        assert!(matches!("precomputed".parse::<Kernel>(), Err(ClassifyError::Configuration(_))));
    }

    #[test]
    fn invalid_params_are_rejected() {
        let params = SvmParams {
            nu: 0.0,
            ..SvmParams::default()
        };
        assert!(matches!(params.validate(), Err(ClassifyError::Configuration(_))));
        let params = SvmParams {
            gamma: Some(-1.0),
            ..SvmParams::default()
        };
        assert!(params.validate().is_err());
        assert!(SvmParams::default().validate().is_ok());
    }
}
