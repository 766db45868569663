use std::collections::{BTreeMap, HashMap};

use ndarray::{Array1, Array2};
use petgraph::graph::{NodeIndex, UnGraph};
use petgraph::visit::Dfs;

use super::symbolic::{sum, EvalError, SymExpr};

/// `d name/dt = rhs`, with the state's value at the start of integration when known.
///
/// For kernel states the initial value is the increment applied per unit of incoming spike
/// weight.
#[derive(Debug, Clone, PartialEq)]
pub struct StateEquation {
    pub name: String,
    pub rhs: SymExpr,
    pub initial_value: Option<SymExpr>,
}

/// Every first-order equation of a model, in the order the states were introduced.
#[derive(Debug, Clone, Default)]
pub struct FirstOrderSystem {
    pub equations: Vec<StateEquation>,
}

impl FirstOrderSystem {
    pub fn push(&mut self, equation: StateEquation) {
        if !self.contains(&equation.name) {
            self.equations.push(equation);
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.equations.iter().position(|eq| eq.name == name)
    }

    pub fn len(&self) -> usize {
        self.equations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.equations.is_empty()
    }

    /// Connected components of the undirected dependency graph, each listed in state order and
    /// ordered by their first state.
    pub fn components(&self) -> Vec<Vec<usize>> {
        let mut graph: UnGraph<usize, ()> = UnGraph::new_undirected();
        let nodes: Vec<NodeIndex> = (0..self.len()).map(|i| graph.add_node(i)).collect();
        for (i, equation) in self.equations.iter().enumerate() {
            for symbol in equation.rhs.free_symbols() {
                if let Some(j) = self.position(&symbol) {
                    if i != j {
                        graph.update_edge(nodes[i], nodes[j], ());
                    }
                }
            }
        }

        let mut seen = vec![false; self.len()];
        let mut components = Vec::new();
        for start in 0..self.len() {
            if seen[start] {
                continue;
            }
            let mut members = Vec::new();
            let mut dfs = Dfs::new(&graph, nodes[start]);
            while let Some(node) = dfs.next(&graph) {
                let index = graph[node];
                seen[index] = true;
                members.push(index);
            }
            members.sort_unstable();
            components.push(members);
        }
        components
    }
}

/// `rhs = sum(coefficients[i] * states[i]) + constant`
#[derive(Debug, Clone, PartialEq)]
pub struct AffineForm {
    pub coefficients: Vec<SymExpr>,
    pub constant: SymExpr,
}

type Parts = (BTreeMap<usize, SymExpr>, SymExpr);

fn affine_parts(expr: &SymExpr, states: &HashMap<&str, usize>, time: &str) -> Option<Parts> {
    match expr {
        SymExpr::Num(_) => Some((BTreeMap::new(), expr.clone())),
        SymExpr::Sym(name) if name == time => None,
        SymExpr::Sym(name) => match states.get(name.as_str()) {
            Some(i) => Some((BTreeMap::from([(*i, SymExpr::one())]), SymExpr::zero())),
            None => Some((BTreeMap::new(), expr.clone())),
        },
        SymExpr::Add(terms) => {
            let mut coefficients: BTreeMap<usize, SymExpr> = BTreeMap::new();
            let mut constants = Vec::new();
            for term in terms {
                let (c, k) = affine_parts(term, states, time)?;
                for (i, value) in c {
                    let merged = match coefficients.remove(&i) {
                        Some(existing) => existing + value,
                        None => value,
                    };
                    coefficients.insert(i, merged);
                }
                constants.push(k);
            }
            Some((coefficients, sum(constants)))
        }
        SymExpr::Mul(factors) => {
            let mut coefficients: BTreeMap<usize, SymExpr> = BTreeMap::new();
            let mut constant = SymExpr::one();
            for factor in factors {
                let (c, k) = affine_parts(factor, states, time)?;
                coefficients = match (coefficients.is_empty(), c.is_empty()) {
                    (_, true) => coefficients
                        .into_iter()
                        .map(|(i, v)| (i, v * k.clone()))
                        .collect(),
                    (true, false) => c
                        .into_iter()
                        .map(|(i, v)| (i, v * constant.clone()))
                        .collect(),
                    // a product of two state-dependent factors
                    (false, false) => return None,
                };
                constant = constant * k;
            }
            Some((coefficients, constant))
        }
        SymExpr::Pow(base, exponent) => {
            let (ce, ke) = affine_parts(exponent, states, time)?;
            let (cb, kb) = affine_parts(base, states, time)?;
            match (cb.is_empty(), ce.is_empty()) {
                (true, true) => Some((BTreeMap::new(), kb.pow(ke))),
                (false, true) if ke.is_one() => Some((cb, kb)),
                _ => None,
            }
        }
        SymExpr::Call(_, args) => {
            for arg in args {
                let (c, _) = affine_parts(arg, states, time)?;
                if !c.is_empty() {
                    return None;
                }
            }
            Some((BTreeMap::new(), expr.clone()))
        }
    }
}

/// Decomposes `expr` as an affine function of `states` with coefficients free of the states and
/// of `time`. `None` if it is not one.
pub fn affine_form(expr: &SymExpr, states: &[String], time: &str) -> Option<AffineForm> {
    let index: HashMap<&str, usize> = states
        .iter()
        .enumerate()
        .map(|(i, name)| (name.as_str(), i))
        .collect();
    let (coefficients, constant) = affine_parts(expr, &index, time)?;
    Some(AffineForm {
        coefficients: (0..states.len())
            .map(|i| {
                coefficients
                    .get(&i)
                    .map(SymExpr::simplify)
                    .unwrap_or_else(SymExpr::zero)
            })
            .collect(),
        constant: constant.simplify(),
    })
}

/// `x' = A x + b` over a fixed state ordering.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearSystem {
    pub states: Vec<String>,
    pub matrix: Vec<Vec<SymExpr>>,
    pub constant: Vec<SymExpr>,
    /// Name of the integration step symbol.
    pub step: String,
}

impl LinearSystem {
    /// The linear system of a group of equations, if every right-hand side is affine in the
    /// group's states.
    pub fn from_equations(equations: &[StateEquation], step: &str, time: &str) -> Option<Self> {
        let states: Vec<String> = equations.iter().map(|eq| eq.name.clone()).collect();
        let mut matrix = Vec::with_capacity(states.len());
        let mut constant = Vec::with_capacity(states.len());
        for equation in equations {
            let form = affine_form(&equation.rhs, &states, time)?;
            matrix.push(form.coefficients);
            constant.push(form.constant);
        }
        Some(Self {
            states,
            matrix,
            constant,
            step: step.to_string(),
        })
    }

    pub fn dimension(&self) -> usize {
        self.states.len()
    }

    pub fn is_homogeneous(&self) -> bool {
        self.constant.iter().all(SymExpr::is_zero)
    }

    pub fn evaluate(
        &self,
        env: &HashMap<String, f64>,
    ) -> Result<(Array2<f64>, Array1<f64>), EvalError> {
        let n = self.dimension();
        let mut a = Array2::zeros((n, n));
        let mut b = Array1::zeros(n);
        for i in 0..n {
            for j in 0..n {
                a[[i, j]] = self.matrix[i][j].evaluate(env)?;
            }
            b[i] = self.constant[i].evaluate(env)?;
        }
        Ok((a, b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sym(name: &str) -> SymExpr {
        SymExpr::sym(name)
    }

    fn equation(name: &str, rhs: SymExpr) -> StateEquation {
        StateEquation {
            name: name.to_string(),
            rhs,
            initial_value: None,
        }
    }

    #[test]
    fn components_follow_dependencies() {
        let mut system = FirstOrderSystem::default();
        system.push(equation("V", -sym("V") / sym("tau") + sym("g")));
        system.push(equation("w", -sym("w")));
        system.push(equation("g", -sym("g") / sym("tau_syn")));
        system.push(equation("w", sym("ignored")));
        assert_eq!(system.len(), 3);
        assert_eq!(system.components(), vec![vec![0, 2], vec![1]]);
    }

    #[test]
    fn affine_decomposition() {
        let states = vec!["V".to_string(), "g".to_string()];
        let rhs =
            (sym("E_L") - sym("V")) / sym("tau") + sym("g") / sym("C") + sym("I_e") / sym("C");
        let form = affine_form(&rhs, &states, "t").unwrap();
        assert_eq!(form.coefficients[0], (-sym("tau").recip()).simplify());
        assert_eq!(form.coefficients[1], sym("C").recip().simplify());
        assert_eq!(
            form.constant,
            (sym("E_L") / sym("tau") + sym("I_e") / sym("C")).simplify()
        );

        assert!(affine_form(&(sym("V") * sym("V")), &states, "t").is_none());
        assert!(affine_form(&(sym("V") * sym("t")), &states, "t").is_none());
        assert!(affine_form(&SymExpr::call("exp", vec![sym("V")]), &states, "t").is_none());
        assert!(affine_form(&sym("V").powi(2), &states, "t").is_none());
        let constant = affine_form(&SymExpr::call("exp", vec![sym("a")]), &states, "t").unwrap();
        assert!(constant.coefficients.iter().all(SymExpr::is_zero));
    }

    #[test]
    fn linear_systems() {
        let equations = vec![
            equation("x", sym("x__d")),
            equation(
                "x__d",
                -sym("x") / sym("tau").powi(2) - SymExpr::int(2) * sym("x__d") / sym("tau"),
            ),
        ];
        let system = LinearSystem::from_equations(&equations, "__h", "t").unwrap();
        assert_eq!(system.dimension(), 2);
        assert!(system.is_homogeneous());
        let env: HashMap<String, f64> = [("tau".to_string(), 2.0)].into();
        let (a, b) = system.evaluate(&env).unwrap();
        assert_eq!(a[[0, 1]], 1.0);
        assert_eq!(a[[1, 0]], -0.25);
        assert_eq!(a[[1, 1]], -1.0);
        assert_eq!(b.sum(), 0.0);
    }
}
