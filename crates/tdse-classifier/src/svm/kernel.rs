use serde::{Deserialize, Serialize};

use super::{Kernel, SvmKind, SvmParams};

/// A kernel with its coefficients resolved against the training width.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub(crate) struct KernelFunction {
    kernel: Kernel,
    gamma: f64,
    coef0: f64,
    degree: u32,
}

impl KernelFunction {
    /// `LinearSVC` always uses the linear kernel. An unset gamma becomes
    /// `1 / n_features`.
    pub fn resolve(params: &SvmParams, n_features: usize) -> Self {
        let kernel = match params.kind {
            SvmKind::LinearSvc => Kernel::Linear,
            _ => params.kernel,
        };
        let gamma = params
            .gamma
            .unwrap_or_else(|| if n_features == 0 { 1.0 } else { 1.0 / n_features as f64 });
        Self {
            kernel,
            gamma,
            coef0: params.coef0,
            degree: params.degree,
        }
    }

    pub fn kernel(&self) -> Kernel {
        self.kernel
    }

    pub fn gamma(&self) -> f64 {
        self.gamma
    }

    pub fn is_linear(&self) -> bool {
        self.kernel == Kernel::Linear
    }

    pub fn eval(&self, a: &[f64], b: &[f64]) -> f64 {
        match self.kernel {
            Kernel::Linear => dot(a, b),
            Kernel::Polynomial => (self.gamma * dot(a, b) + self.coef0).powi(self.degree as i32),
            Kernel::Rbf => {
                let sq: f64 = a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum();
                (-self.gamma * sq).exp()
            }
            Kernel::Sigmoid => (self.gamma * dot(a, b) + self.coef0).tanh(),
        }
    }
}

pub(crate) fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}
