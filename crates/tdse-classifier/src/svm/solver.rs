//! Dual coordinate descent for a single two-class machine.
//!
//! Solves `min ½ αᵀQα − eᵀα` subject to `0 ≤ αᵢ ≤ U`, where
//! `Qᵢⱼ = yᵢyⱼ(K(xᵢ, xⱼ) + 1) + Dᵢᵢ`. The `+ 1` folds the bias into the kernel,
//! which removes the equality constraint of the classic dual. The hinge loss
//! uses `U = C, D = 0`; the squared hinge uses `U = ∞, D = 1/(2C)`.
//!
//! The linear kernel keeps a primal weight vector; other kernels keep the
//! decision value of every training sample and update it one kernel row at a
//! time. Rows come from a precomputed Gram matrix when it fits the cache.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::kernel::{KernelFunction, dot};

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Loss {
    Hinge { upper: f64 },
    SquaredHinge { diag: f64 },
}

impl Loss {
    fn upper(&self) -> f64 {
        match self {
            Self::Hinge { upper } => *upper,
            Self::SquaredHinge { .. } => f64::INFINITY,
        }
    }

    fn diag(&self) -> f64 {
        match self {
            Self::Hinge { .. } => 0.0,
            Self::SquaredHinge { diag } => *diag,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct SolverSettings {
    pub tolerance: f64,
    pub max_iter: usize,
    pub cache_bytes: usize,
}

/// Learned decision function `f(x)`; positive values favour the `+1` side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) enum DecisionFunction {
    Linear {
        weights: Vec<f64>,
        bias: f64,
    },
    Kernel {
        support: Vec<Vec<f64>>,
        /// `αᵢyᵢ` of each support vector.
        coef: Vec<f64>,
        bias: f64,
    },
}

impl DecisionFunction {
    pub fn eval(&self, kernel: &KernelFunction, x: &[f64]) -> f64 {
        match self {
            Self::Linear { weights, bias } => dot(weights, x) + bias,
            Self::Kernel { support, coef, bias } => {
                support
                    .iter()
                    .zip(coef)
                    .map(|(sv, c)| c * kernel.eval(sv, x))
                    .sum::<f64>()
                    + bias
            }
        }
    }

    pub fn support_count(&self) -> Option<usize> {
        match self {
            Self::Linear { .. } => None,
            Self::Kernel { support, .. } => Some(support.len()),
        }
    }
}

pub(crate) struct BinarySolution {
    pub decision: DecisionFunction,
    /// `f(xᵢ)` of every training sample under the final solution.
    pub training_margins: Vec<f64>,
    pub epochs: usize,
    pub converged: bool,
}

/// Train one machine. `y` holds `+1.0` / `−1.0` per row.
pub(crate) fn train_binary(
    x: &[Vec<f64>],
    y: &[f64],
    kernel: &KernelFunction,
    loss: Loss,
    settings: SolverSettings,
) -> BinarySolution {
    if kernel.is_linear() {
        train_linear(x, y, loss, settings)
    } else {
        train_kernel(x, y, kernel, loss, settings)
    }
}

/// Projected gradient of coordinate `i`; zero when the bound is active.
fn projected(g: f64, alpha: f64, upper: f64) -> f64 {
    if alpha <= 0.0 {
        g.min(0.0)
    } else if alpha >= upper {
        g.max(0.0)
    } else {
        g
    }
}

fn train_linear(x: &[Vec<f64>], y: &[f64], loss: Loss, settings: SolverSettings) -> BinarySolution {
    let n = x.len();
    let width = x.first().map_or(0, Vec::len);
    let (upper, diag) = (loss.upper(), loss.diag());

    let qd: Vec<f64> = x.iter().map(|xi| dot(xi, xi) + 1.0 + diag).collect();
    let mut alpha = vec![0.0; n];
    let mut w = vec![0.0; width];
    let mut b = 0.0;

    let mut epochs = 0;
    let mut converged = false;
    while epochs < settings.max_iter {
        epochs += 1;
        let mut pg_max = f64::NEG_INFINITY;
        let mut pg_min = f64::INFINITY;

        for i in 0..n {
            let g = y[i] * (dot(&w, &x[i]) + b) - 1.0 + diag * alpha[i];
            let pg = projected(g, alpha[i], upper);
            pg_max = pg_max.max(pg);
            pg_min = pg_min.min(pg);
            if pg == 0.0 {
                continue;
            }
            let old = alpha[i];
            alpha[i] = (old - g / qd[i]).clamp(0.0, upper);
            let d = (alpha[i] - old) * y[i];
            for (wj, xj) in w.iter_mut().zip(&x[i]) {
                *wj += d * xj;
            }
            b += d;
        }

        if pg_max - pg_min <= settings.tolerance {
            converged = true;
            break;
        }
    }
    if !converged {
        warn!(epochs, "linear solver reached max_iter before converging");
    }

    let training_margins = x.iter().map(|xi| dot(&w, xi) + b).collect();
    BinarySolution {
        decision: DecisionFunction::Linear { weights: w, bias: b },
        training_margins,
        epochs,
        converged,
    }
}

/// Kernel rows either precomputed or evaluated on demand.
enum KernelRows<'a> {
    Gram(Vec<Vec<f64>>),
    OnDemand {
        x: &'a [Vec<f64>],
        kernel: &'a KernelFunction,
    },
}

impl<'a> KernelRows<'a> {
    fn new(x: &'a [Vec<f64>], kernel: &'a KernelFunction, cache_bytes: usize) -> Self {
        let n = x.len();
        let needed = n.saturating_mul(n).saturating_mul(std::mem::size_of::<f64>());
        if needed <= cache_bytes {
            let gram = x
                .iter()
                .map(|a| x.iter().map(|b| kernel.eval(a, b) + 1.0).collect())
                .collect();
            Self::Gram(gram)
        } else {
            debug!(samples = n, cache_bytes, "gram matrix exceeds cache; computing rows on demand");
            Self::OnDemand { x, kernel }
        }
    }

    /// `K(xᵢ, ·) + 1`.
    fn row(&self, i: usize) -> std::borrow::Cow<'_, [f64]> {
        match self {
            Self::Gram(gram) => std::borrow::Cow::Borrowed(&gram[i]),
            Self::OnDemand { x, kernel } => {
                std::borrow::Cow::Owned(x.iter().map(|b| kernel.eval(&x[i], b) + 1.0).collect())
            }
        }
    }

    fn diagonal(&self, i: usize) -> f64 {
        match self {
            Self::Gram(gram) => gram[i][i],
            Self::OnDemand { x, kernel } => kernel.eval(&x[i], &x[i]) + 1.0,
        }
    }
}

fn train_kernel(
    x: &[Vec<f64>],
    y: &[f64],
    kernel: &KernelFunction,
    loss: Loss,
    settings: SolverSettings,
) -> BinarySolution {
    let n = x.len();
    let (upper, diag) = (loss.upper(), loss.diag());
    let rows = KernelRows::new(x, kernel, settings.cache_bytes);

    let qd: Vec<f64> = (0..n).map(|i| rows.diagonal(i) + diag).collect();
    let mut alpha = vec![0.0; n];
    // f[k] = Σ αⱼyⱼ(K(xⱼ, xₖ) + 1)
    let mut f = vec![0.0; n];

    let mut epochs = 0;
    let mut converged = false;
    while epochs < settings.max_iter {
        epochs += 1;
        let mut pg_max = f64::NEG_INFINITY;
        let mut pg_min = f64::INFINITY;

        for i in 0..n {
            let g = y[i] * f[i] - 1.0 + diag * alpha[i];
            let pg = projected(g, alpha[i], upper);
            pg_max = pg_max.max(pg);
            pg_min = pg_min.min(pg);
            if pg == 0.0 || qd[i] <= 0.0 {
                continue;
            }
            let old = alpha[i];
            alpha[i] = (old - g / qd[i]).clamp(0.0, upper);
            let d = (alpha[i] - old) * y[i];
            if d == 0.0 {
                continue;
            }
            for (fk, kik) in f.iter_mut().zip(rows.row(i).iter()) {
                *fk += d * kik;
            }
        }

        if pg_max - pg_min <= settings.tolerance {
            converged = true;
            break;
        }
    }
    if !converged {
        warn!(epochs, "kernel solver reached max_iter before converging");
    }

    let mut support = Vec::new();
    let mut coef = Vec::new();
    for i in 0..n {
        if alpha[i] > 0.0 {
            support.push(x[i].clone());
            coef.push(alpha[i] * y[i]);
        }
    }
    let bias = coef.iter().sum();

    BinarySolution {
        decision: DecisionFunction::Kernel { support, coef, bias },
        training_margins: f,
        epochs,
        converged,
    }
}
