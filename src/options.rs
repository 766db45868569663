use std::fmt;

use clap::ValueEnum;

/// Numerical scheme assigned to sub-systems without a closed-form propagator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, ValueEnum)]
pub enum IntegrationMethod {
    #[default]
    Rkf45,
    Rk4,
    ForwardEuler,
}

impl fmt::Display for IntegrationMethod {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            IntegrationMethod::Rkf45 => write!(f, "rkf45"),
            IntegrationMethod::Rk4 => write!(f, "rk4"),
            IntegrationMethod::ForwardEuler => write!(f, "forward-euler"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompilerOptions {
    pub numeric_method: IntegrationMethod,
    pub abs_tolerance: f64,
    pub rel_tolerance: f64,
    /// Name of the integration step symbol in propagator expressions.
    pub step_size_name: String,
    /// Add the propagator entries to the model's internals after classification.
    pub inject_propagators: bool,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        Self {
            numeric_method: IntegrationMethod::default(),
            abs_tolerance: 1e-3,
            rel_tolerance: 1e-3,
            step_size_name: "__h".to_string(),
            inject_propagators: true,
        }
    }
}
