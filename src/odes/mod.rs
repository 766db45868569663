//! Analysis of a model's equations block: reduction to first order, splitting into independent
//! sub-systems, and closed-form propagators for the ones that are linear with constant
//! coefficients.

pub mod canonical;
pub mod classify;
pub mod plan;
pub mod propagator;
pub mod shapes;
pub mod symbolic;
pub mod system;

pub use classify::{kernel_name, state_name, OdeClassifier, TIME};
pub use plan::{
    EquationAnnotation, ExactIntegration, NumericalIntegration, SolverDirective, SolverPlan,
    SubSystem,
};
pub use propagator::{
    DividedDifferences, Propagator, PropagatorDeriver, PropagatorError, SingularityCondition,
};
pub use shapes::{kernel_ode, KernelOde};
pub use symbolic::{EvalError, SymExpr};
pub use system::{FirstOrderSystem, LinearSystem, StateEquation};
