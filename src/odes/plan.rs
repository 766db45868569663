use std::collections::HashMap;
use std::fmt;

use log::info;
use ndarray::Array1;

use crate::ast::{
    DataType, DataTypeKind, Declaration, Expr, Model, StringSpan, UnitExpr, VarBlockKind,
};
use crate::error::Diagnostic;
use crate::options::IntegrationMethod;
use crate::symbols::SymbolTable;

use super::propagator::Propagator;
use super::symbolic::{EvalError, SymExpr};
use super::system::{LinearSystem, StateEquation};

#[derive(Debug, Clone, PartialEq)]
pub struct ExactIntegration {
    pub system: LinearSystem,
    pub propagator: Propagator,
}

impl ExactIntegration {
    /// One propagator step of length `h` from `state`.
    pub fn advance(
        &self,
        state: &Array1<f64>,
        h: f64,
        env: &HashMap<String, f64>,
    ) -> Result<Array1<f64>, EvalError> {
        let mut env = env.clone();
        env.insert(self.propagator.step.clone(), h);
        self.propagator.advance(state, &env)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NumericalIntegration {
    pub states: Vec<String>,
    pub rhs: Vec<SymExpr>,
    pub method: IntegrationMethod,
    pub abs_tolerance: f64,
    pub rel_tolerance: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SolverDirective {
    Exact(ExactIntegration),
    Numerical(NumericalIntegration),
}

/// A connected group of first-order states and how to integrate it.
#[derive(Debug, Clone, PartialEq)]
pub struct SubSystem {
    pub id: usize,
    pub states: Vec<StateEquation>,
    pub directive: SolverDirective,
}

impl SubSystem {
    pub fn is_exact(&self) -> bool {
        matches!(self.directive, SolverDirective::Exact(_))
    }

    pub fn state_names(&self) -> impl Iterator<Item = &str> {
        self.states.iter().map(|eq| eq.name.as_str())
    }

    pub fn contains(&self, state: &str) -> bool {
        self.state_names().any(|name| name == state)
    }

    /// `d state/dt` at `state`, with everything else taken from `env`.
    pub fn derivative(
        &self,
        state: &Array1<f64>,
        env: &HashMap<String, f64>,
    ) -> Result<Array1<f64>, EvalError> {
        let mut env = env.clone();
        for (eq, value) in self.states.iter().zip(state.iter()) {
            env.insert(eq.name.clone(), *value);
        }
        self.states
            .iter()
            .map(|eq| eq.rhs.evaluate(&env))
            .collect::<Result<Vec<f64>, EvalError>>()
            .map(Array1::from)
    }

    /// The initial values of the states as far as they are known symbolically.
    pub fn initial_state(&self, env: &HashMap<String, f64>) -> Result<Array1<f64>, EvalError> {
        self.states
            .iter()
            .map(|eq| match &eq.initial_value {
                Some(value) => value.evaluate(env),
                None => env
                    .get(&eq.name)
                    .copied()
                    .ok_or_else(|| EvalError::Unbound(eq.name.clone())),
            })
            .collect::<Result<Vec<f64>, EvalError>>()
            .map(Array1::from)
    }
}

/// Where an equation of the model ended up.
#[derive(Debug, Clone, PartialEq)]
pub struct EquationAnnotation {
    /// The equation's left-hand side name without primes; kernel states of shapes use the shape
    /// name.
    pub target: String,
    pub order: u32,
    /// `None` for equations that do not define a state, e.g. order-0 shapes only ever inlined.
    pub subsystem: Option<usize>,
    pub span: Option<StringSpan>,
}

/// The classifier's result for one model.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SolverPlan {
    pub model: String,
    pub subsystems: Vec<SubSystem>,
    pub annotations: Vec<EquationAnnotation>,
    pub step_size_name: String,
}

fn propagator_name(row: &str, col: &str) -> String {
    format!("__P__{}__{}", row, col)
}

impl SolverPlan {
    pub fn exact(&self) -> impl Iterator<Item = &SubSystem> {
        self.subsystems.iter().filter(|s| s.is_exact())
    }

    pub fn numerical(&self) -> impl Iterator<Item = &SubSystem> {
        self.subsystems.iter().filter(|s| !s.is_exact())
    }

    pub fn subsystem_of(&self, state: &str) -> Option<&SubSystem> {
        self.subsystems.iter().find(|s| s.contains(state))
    }

    pub fn annotation(&self, target: &str, order: u32) -> Option<&EquationAnnotation> {
        self.annotations
            .iter()
            .find(|a| a.target == target && a.order == order)
    }

    pub fn num_states(&self) -> usize {
        self.subsystems.iter().map(|s| s.states.len()).sum()
    }

    /// Internal declarations for the step size and every non-zero propagator entry, named
    /// `__P__<row>__<col>` after the states (`1` is the inhomogeneous column).
    pub fn propagator_declarations(&self) -> Vec<Declaration> {
        let mut declarations = Vec::new();
        if self.exact().next().is_none() {
            return declarations;
        }
        let ms = DataType::new(DataTypeKind::Unit(UnitExpr::Name("ms".to_string())));
        declarations.push(Declaration::new(
            &self.step_size_name,
            ms,
            Some(Expr::call("resolution", vec![])),
        ));
        for subsystem in self.exact() {
            let propagator = match &subsystem.directive {
                SolverDirective::Exact(exact) => &exact.propagator,
                SolverDirective::Numerical(_) => continue,
            };
            for (i, row) in propagator.states.iter().enumerate() {
                let columns = propagator
                    .states
                    .iter()
                    .map(String::as_str)
                    .chain(std::iter::once("1"));
                let entries = propagator.matrix[i]
                    .iter()
                    .chain(std::iter::once(&propagator.inhomogeneous[i]));
                for (col, entry) in columns.zip(entries) {
                    if entry.is_zero() {
                        continue;
                    }
                    declarations.push(Declaration::new(
                        &propagator_name(row, col),
                        DataType::new(DataTypeKind::Real),
                        Some(entry.to_ast()),
                    ));
                }
            }
        }
        declarations
    }

    /// Adds [`SolverPlan::propagator_declarations`] to the internals of `model`.
    pub fn inject_propagators(
        &self,
        model: &mut Model,
        symbols: &mut SymbolTable,
    ) -> Vec<Diagnostic> {
        let declarations = self.propagator_declarations();
        let count = declarations.len();
        let mut diagnostics = Vec::new();
        for decl in declarations {
            diagnostics.extend(symbols.add_declaration(model, VarBlockKind::Internals, decl));
        }
        if count > 0 {
            info!("Injected {} propagator declarations into '{}'", count, model.name);
        }
        diagnostics
    }
}

impl fmt::Display for SolverPlan {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "{}: {} sub-systems", self.model, self.subsystems.len())?;
        for subsystem in self.subsystems.iter() {
            let states = subsystem.state_names().collect::<Vec<_>>().join(", ");
            match &subsystem.directive {
                SolverDirective::Exact(exact) => {
                    writeln!(f, "  [{}] exact: {}", subsystem.id, states)?;
                    let p = &exact.propagator;
                    for (i, row) in p.states.iter().enumerate() {
                        for (j, col) in p.states.iter().enumerate() {
                            if !p.matrix[i][j].is_zero() {
                                let name = propagator_name(row, col);
                                writeln!(f, "    {} = {}", name, p.matrix[i][j])?;
                            }
                        }
                        if !p.inhomogeneous[i].is_zero() {
                            let name = propagator_name(row, "1");
                            writeln!(f, "    {} = {}", name, p.inhomogeneous[i])?;
                        }
                    }
                    for condition in p.singularities.iter() {
                        writeln!(f, "    singular if {}", condition)?;
                    }
                }
                SolverDirective::Numerical(numerical) => {
                    writeln!(
                        f,
                        "  [{}] numerical ({}, abs {}, rel {}): {}",
                        subsystem.id,
                        numerical.method,
                        numerical.abs_tolerance,
                        numerical.rel_tolerance,
                        states
                    )?;
                    for (state, rhs) in numerical.states.iter().zip(numerical.rhs.iter()) {
                        writeln!(f, "    {}' = {}", state, rhs)?;
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::odes::propagator::{DividedDifferences, PropagatorDeriver};
    use approx::assert_relative_eq;
    use ndarray::array;

    fn sym(name: &str) -> SymExpr {
        SymExpr::sym(name)
    }

    fn mixed_plan() -> SolverPlan {
        let membrane = vec![StateEquation {
            name: "V_m".to_string(),
            rhs: (sym("E_L") - sym("V_m")) / sym("tau"),
            initial_value: Some(sym("E_L")),
        }];
        let system = LinearSystem::from_equations(&membrane, "__h", "t").unwrap();
        let propagator = DividedDifferences.derive_propagator(&system).unwrap();
        let adaptation = vec![StateEquation {
            name: "w".to_string(),
            rhs: sym("w") * sym("w"),
            initial_value: None,
        }];
        let numerical = NumericalIntegration {
            states: vec!["w".to_string()],
            rhs: vec![sym("w") * sym("w")],
            method: IntegrationMethod::Rk4,
            abs_tolerance: 1e-3,
            rel_tolerance: 1e-6,
        };
        SolverPlan {
            model: "mixed".to_string(),
            subsystems: vec![
                SubSystem {
                    id: 0,
                    states: membrane,
                    directive: SolverDirective::Exact(ExactIntegration { system, propagator }),
                },
                SubSystem {
                    id: 1,
                    states: adaptation,
                    directive: SolverDirective::Numerical(numerical),
                },
            ],
            annotations: Vec::new(),
            step_size_name: "__h".to_string(),
        }
    }

    #[test]
    fn declarations_follow_the_exact_subsystems() {
        let plan = mixed_plan();
        let declarations = plan.propagator_declarations();
        let names: Vec<&str> = declarations
            .iter()
            .map(|decl| decl.names[0].name.as_str())
            .collect();
        assert_eq!(names, vec!["__h", "__P__V_m__V_m", "__P__V_m__1"]);
        assert_eq!(
            declarations[0].expr.as_ref().unwrap().to_string(),
            "resolution()"
        );

        let numerical_only = SolverPlan {
            subsystems: plan.subsystems[1..].to_vec(),
            ..plan
        };
        assert!(numerical_only.propagator_declarations().is_empty());
    }

    #[test]
    fn stepping_and_evaluation() {
        let plan = mixed_plan();
        let env: HashMap<String, f64> =
            [("E_L".to_string(), -70.0), ("tau".to_string(), 10.0)].into();

        let membrane = plan.subsystem_of("V_m").unwrap();
        let exact = match &membrane.directive {
            SolverDirective::Exact(exact) => exact,
            SolverDirective::Numerical(_) => panic!("expected an exact sub-system"),
        };
        let next = exact.advance(&array![-60.0], 0.5, &env).unwrap();
        assert_relative_eq!(next[0], -70.0 + 10.0 * (-0.05f64).exp(), epsilon = 1e-12);
        assert_relative_eq!(membrane.initial_state(&env).unwrap()[0], -70.0);

        let adaptation = plan.subsystem_of("w").unwrap();
        assert!(!adaptation.is_exact());
        assert_relative_eq!(adaptation.derivative(&array![3.0], &env).unwrap()[0], 9.0);
        assert_eq!(
            adaptation.initial_state(&env),
            Err(EvalError::Unbound("w".to_string()))
        );
        assert_eq!(plan.num_states(), 2);
    }

    #[test]
    fn display_lists_every_subsystem() {
        let text = mixed_plan().to_string();
        assert!(text.starts_with("mixed: 2 sub-systems\n"));
        assert!(text.contains("  [0] exact: V_m\n"));
        assert!(text.contains("    __P__V_m__V_m = exp(-__h / tau)\n"));
        assert!(text.contains("  [1] numerical (rk4, abs 0.001, rel 0.000001): w\n"));
    }
}
