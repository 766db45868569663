//! Closed-form propagators `exp(A h)` for linear systems with constant coefficients.
//!
//! The states are split into strongly connected blocks and solved in dependency order. A block's
//! own exponential uses Newton's divided-difference form
//! `exp(B t) = sum_k exp[l_0, .., l_k] * prod_{m<k} (B - l_m I)` over its eigenvalues, which are
//! closed-form for blocks of up to three states. The influence of the blocks it reads from is
//! the convolution of that exponential with their solutions. Entries are kept as sums of
//! `c * h^k * exp(l * h)`, one polynomial in `h` per eigenvalue.

use std::collections::HashMap;
use std::fmt;

use itertools::Itertools;
use log::debug;
use ndarray::{Array1, Array2};
use num_bigint::BigInt;
use num_rational::BigRational;
use num_traits::One;
use petgraph::algo::tarjan_scc;
use petgraph::graph::DiGraph;
use thiserror::Error;

use super::canonical::RationalFunction;
use super::symbolic::{sum, EvalError, SymExpr};
use super::system::LinearSystem;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PropagatorError {
    #[error(
        "The states {} are coupled in a block of size {size}; only blocks up to size 3 have closed-form eigenvalues.",
        .states.join(", ")
    )]
    BlockTooLarge { size: usize, states: Vec<String> },
    #[error(
        "The characteristic polynomial of the block {} has no root in closed form.",
        .states.join(", ")
    )]
    NoClosedForm { states: Vec<String> },
    #[error("Distinct eigenvalues with a vanishing difference.")]
    DegenerateEigenvalues,
}

/// Parameter values for which the propagator divides by zero, `expr == 0`.
#[derive(Debug, Clone, PartialEq)]
pub struct SingularityCondition {
    pub expr: SymExpr,
}

impl fmt::Display for SingularityCondition {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} == 0", self.expr)
    }
}

/// `x(t + h) = matrix * x(t) + inhomogeneous`
#[derive(Debug, Clone, PartialEq)]
pub struct Propagator {
    pub states: Vec<String>,
    pub step: String,
    pub matrix: Vec<Vec<SymExpr>>,
    pub inhomogeneous: Vec<SymExpr>,
    pub singularities: Vec<SingularityCondition>,
}

impl Propagator {
    pub fn dimension(&self) -> usize {
        self.states.len()
    }

    pub fn evaluate(
        &self,
        env: &HashMap<String, f64>,
    ) -> Result<(Array2<f64>, Array1<f64>), EvalError> {
        let n = self.dimension();
        let mut p = Array2::zeros((n, n));
        let mut c = Array1::zeros(n);
        for i in 0..n {
            for j in 0..n {
                p[[i, j]] = self.matrix[i][j].evaluate(env)?;
            }
            c[i] = self.inhomogeneous[i].evaluate(env)?;
        }
        Ok((p, c))
    }

    /// Advances `state` by one step; `env` must bind the step symbol.
    pub fn advance(
        &self,
        state: &Array1<f64>,
        env: &HashMap<String, f64>,
    ) -> Result<Array1<f64>, EvalError> {
        let (p, c) = self.evaluate(env)?;
        Ok(p.dot(state) + c)
    }
}

/// Strategy for deriving propagators of exactly solvable subsystems.
pub trait PropagatorDeriver: Send + Sync {
    fn derive_propagator(&self, system: &LinearSystem) -> Result<Propagator, PropagatorError>;
}

type Matrix = Vec<Vec<RationalFunction>>;

fn identity(n: usize) -> Matrix {
    (0..n)
        .map(|i| {
            (0..n)
                .map(|j| {
                    if i == j {
                        RationalFunction::one()
                    } else {
                        RationalFunction::zero()
                    }
                })
                .collect()
        })
        .collect()
}

fn mat_mul(a: &Matrix, b: &Matrix) -> Matrix {
    let n = a.len();
    (0..n)
        .map(|i| {
            (0..n)
                .map(|j| {
                    (0..n).fold(RationalFunction::zero(), |acc, k| {
                        if a[i][k].is_zero() || b[k][j].is_zero() {
                            acc
                        } else {
                            acc.add(&a[i][k].mul(&b[k][j]))
                        }
                    })
                })
                .collect()
        })
        .collect()
}

fn shifted(a: &Matrix, lambda: &RationalFunction) -> Matrix {
    let mut out = a.clone();
    for (i, row) in out.iter_mut().enumerate() {
        row[i] = row[i].sub(lambda);
    }
    out
}

fn half() -> RationalFunction {
    RationalFunction::constant(BigRational::new(BigInt::one(), BigInt::from(2)))
}

fn factorial(k: usize) -> BigRational {
    BigRational::from_integer((1..=k).map(BigInt::from).product())
}

fn sign(k: usize) -> BigRational {
    if k % 2 == 0 {
        BigRational::one()
    } else {
        -BigRational::one()
    }
}

fn power(base: &RationalFunction, exponent: usize) -> RationalFunction {
    (0..exponent).fold(RationalFunction::one(), |acc, _| acc.mul(base))
}

/// Roots of `l^2 - sum * l + product`.
fn quadratic_roots(sum: &RationalFunction, product: &RationalFunction) -> [RationalFunction; 2] {
    let mean = sum.mul(&half());
    let disc = mean.mul(&mean).sub(product);
    let root = disc.sqrt().unwrap_or_else(|| {
        RationalFunction::from_expr(&disc.to_expr().pow(half().to_expr()))
    });
    [mean.add(&root), mean.sub(&root)]
}

/// `sum_l p_l(t) * exp(l * t)` with one polynomial per distinct rate `l`.
#[derive(Debug, Clone, Default)]
struct ExpPoly {
    terms: Vec<(RationalFunction, Vec<RationalFunction>)>,
}

impl ExpPoly {
    /// `coefficient * t^power * exp(rate * t)`
    fn term(rate: &RationalFunction, power: usize, coefficient: RationalFunction) -> Self {
        let mut out = Self::default();
        out.add_term(rate, power, coefficient);
        out
    }

    fn is_zero(&self) -> bool {
        self.terms.is_empty()
    }

    fn add_term(&mut self, rate: &RationalFunction, power: usize, coefficient: RationalFunction) {
        if coefficient.is_zero() {
            return;
        }
        let index = match self.terms.iter().position(|(l, _)| l.sub(rate).is_zero()) {
            Some(index) => index,
            None => {
                self.terms.push((rate.clone(), Vec::new()));
                self.terms.len() - 1
            }
        };
        let poly = &mut self.terms[index].1;
        if poly.len() <= power {
            poly.resize(power + 1, RationalFunction::zero());
        }
        poly[power] = poly[power].add(&coefficient);
        while poly.last().map_or(false, RationalFunction::is_zero) {
            poly.pop();
        }
        if poly.is_empty() {
            self.terms.remove(index);
        }
    }

    fn add(&self, other: &ExpPoly) -> ExpPoly {
        let mut out = self.clone();
        for (rate, poly) in other.terms.iter() {
            for (power, c) in poly.iter().enumerate() {
                out.add_term(rate, power, c.clone());
            }
        }
        out
    }

    fn sub(&self, other: &ExpPoly) -> ExpPoly {
        self.add(&other.scale(&RationalFunction::constant(-BigRational::one())))
    }

    fn scale(&self, factor: &RationalFunction) -> ExpPoly {
        let mut out = ExpPoly::default();
        if factor.is_zero() {
            return out;
        }
        for (rate, poly) in self.terms.iter() {
            for (power, c) in poly.iter().enumerate() {
                out.add_term(rate, power, c.mul(factor));
            }
        }
        out
    }

    fn to_expr(&self, t: &SymExpr) -> SymExpr {
        sum(self.terms.iter().map(|(rate, poly)| {
            let polynomial = sum(
                poly.iter()
                    .enumerate()
                    .map(|(power, c)| c.to_expr() * t.clone().powi(power as i64)),
            );
            if rate.is_zero() {
                polynomial
            } else {
                polynomial * SymExpr::call("exp", vec![(rate.to_expr() * t.clone()).simplify()])
            }
        }))
    }
}

/// `int_0^t exp(l (t - s)) (t - s)^j * exp(l s) s^k ds`
fn resonant_convolution(l: &RationalFunction, j: usize, k: usize) -> ExpPoly {
    let coefficient = factorial(j) * factorial(k) / factorial(j + k + 1);
    ExpPoly::term(l, j + k + 1, RationalFunction::constant(coefficient))
}

/// `int_0^t exp(l (t - s)) (t - s)^j * exp(m s) s^k ds` for `l != m`, where
/// `inverse = 1 / (m - l)`.
fn mixed_convolution(
    l: &RationalFunction,
    m: &RationalFunction,
    inverse: &RationalFunction,
    j: usize,
    k: usize,
) -> ExpPoly {
    // expand (t - s)^j, then int_0^t s^n exp(d s) ds =
    //   exp(d t) sum_r (-1)^r n! / (n - r)! t^(n - r) / d^(r + 1) - (-1)^n n! / d^(n + 1)
    let mut out = ExpPoly::default();
    for i in 0..=j {
        let n = i + k;
        let outer = factorial(j) / (factorial(i) * factorial(j - i)) * sign(i);
        for r in 0..=n {
            let c = &outer * sign(r) * factorial(n) / factorial(n - r);
            out.add_term(
                m,
                (j - i) + (n - r),
                RationalFunction::constant(c).mul(&power(inverse, r + 1)),
            );
        }
        let c = -(&outer * sign(n) * factorial(n));
        out.add_term(
            l,
            j - i,
            RationalFunction::constant(c).mul(&power(inverse, n + 1)),
        );
    }
    out
}

/// Strongly connected blocks of `a`, each sorted, every block after the blocks it reads from.
fn dependency_blocks(a: &Matrix) -> Vec<Vec<usize>> {
    let n = a.len();
    let mut graph = DiGraph::<usize, ()>::new();
    let nodes: Vec<_> = (0..n).map(|i| graph.add_node(i)).collect();
    for i in 0..n {
        for j in 0..n {
            if i != j && !a[i][j].is_zero() {
                graph.add_edge(nodes[j], nodes[i], ());
            }
        }
    }
    // components come out in reverse topological order
    tarjan_scc(&graph)
        .into_iter()
        .rev()
        .map(|component| {
            let mut block: Vec<usize> = component.iter().map(|node| graph[*node]).collect();
            block.sort_unstable();
            block
        })
        .collect()
}

struct Derivation<'a> {
    a: &'a Matrix,
    names: &'a [String],
    singularities: Vec<SingularityCondition>,
}

impl<'a> Derivation<'a> {
    /// `1 / divisor`, recording the parameter values for which `divisor` vanishes.
    fn inverse(&mut self, divisor: &RationalFunction) -> Result<RationalFunction, PropagatorError> {
        let condition = divisor.numerator().clear_denominators();
        if condition.as_constant().is_none() {
            let condition = SingularityCondition {
                expr: condition.to_expr(),
            };
            if !self.singularities.contains(&condition) {
                self.singularities.push(condition);
            }
        }
        divisor.recip().ok_or(PropagatorError::DegenerateEigenvalues)
    }

    /// Eigenvalues of the block, equal ones next to each other.
    fn eigenvalues(&self, block: &[usize]) -> Result<Vec<RationalFunction>, PropagatorError> {
        let a = self.a;
        let entry =
            move |i: usize, j: usize| -> &'a RationalFunction { &a[block[i]][block[j]] };
        let roots = match block.len() {
            1 => vec![entry(0, 0).clone()],
            2 => {
                let trace = entry(0, 0).add(entry(1, 1));
                let det = entry(0, 0)
                    .mul(entry(1, 1))
                    .sub(&entry(0, 1).mul(entry(1, 0)));
                quadratic_roots(&trace, &det).to_vec()
            }
            3 => {
                let minor = |i: usize, j: usize| {
                    entry(i, i).mul(entry(j, j)).sub(&entry(i, j).mul(entry(j, i)))
                };
                let cofactor = |i: usize, j: usize, k: usize, l: usize| {
                    entry(1, i).mul(entry(2, j)).sub(&entry(1, k).mul(entry(2, l)))
                };
                let trace = entry(0, 0).add(entry(1, 1)).add(entry(2, 2));
                let minors = minor(0, 1).add(&minor(0, 2)).add(&minor(1, 2));
                let det = entry(0, 0)
                    .mul(&cofactor(1, 2, 2, 1))
                    .sub(&entry(0, 1).mul(&cofactor(0, 2, 2, 0)))
                    .add(&entry(0, 2).mul(&cofactor(0, 1, 1, 0)));
                // l^3 - trace l^2 + minors l - det
                let characteristic = |l: &RationalFunction| {
                    power(l, 3)
                        .sub(&trace.mul(&power(l, 2)))
                        .add(&minors.mul(l))
                        .sub(&det)
                };
                let one_third =
                    RationalFunction::constant(BigRational::new(BigInt::one(), BigInt::from(3)));
                let root = std::iter::once(RationalFunction::zero())
                    .chain((0..3).map(|i| entry(i, i).clone()))
                    .chain(std::iter::once(trace.mul(&one_third)))
                    .find(|l| characteristic(l).is_zero())
                    .ok_or_else(|| PropagatorError::NoClosedForm {
                        states: block.iter().map(|i| self.names[*i].clone()).collect(),
                    })?;
                let rest = trace.sub(&root);
                let [second, third] = quadratic_roots(&rest, &minors.sub(&root.mul(&rest)));
                vec![root, second, third]
            }
            size => {
                return Err(PropagatorError::BlockTooLarge {
                    size,
                    states: block.iter().map(|i| self.names[*i].clone()).collect(),
                })
            }
        };
        let mut ordered: Vec<RationalFunction> = Vec::with_capacity(roots.len());
        for lambda in roots {
            match ordered.iter().rposition(|other| other.sub(&lambda).is_zero()) {
                Some(last) => ordered.insert(last + 1, lambda),
                None => ordered.push(lambda),
            }
        }
        Ok(ordered)
    }

    /// `exp(B t)` for the block's own matrix `B`.
    fn block_exp(&mut self, block: &[usize]) -> Result<Vec<Vec<ExpPoly>>, PropagatorError> {
        let lambdas = self.eigenvalues(block)?;
        debug!(
            "eigenvalues of the block {}: {}",
            block.iter().map(|i| &self.names[*i]).join(", "),
            lambdas.iter().map(|l| l.to_expr()).join(", ")
        );
        let local: Matrix = block
            .iter()
            .map(|i| block.iter().map(|j| self.a[*i][*j].clone()).collect())
            .collect();

        // dd[i][j] = exp[l_i, .., l_j] as a function of t
        let m = lambdas.len();
        let mut dd: Vec<Vec<ExpPoly>> = vec![vec![ExpPoly::default(); m]; m];
        for i in 0..m {
            dd[i][i] = ExpPoly::term(&lambdas[i], 0, RationalFunction::one());
        }
        for width in 1..m {
            for i in 0..m - width {
                let j = i + width;
                if lambdas[i].sub(&lambdas[j]).is_zero() {
                    let coefficient = RationalFunction::constant(factorial(width).recip());
                    dd[i][j] = ExpPoly::term(&lambdas[i], width, coefficient);
                    continue;
                }
                let inverse = self.inverse(&lambdas[j].sub(&lambdas[i]))?;
                dd[i][j] = dd[i + 1][j].sub(&dd[i][j - 1]).scale(&inverse);
            }
        }

        let mut term = identity(m);
        let mut exp = vec![vec![ExpPoly::default(); m]; m];
        for k in 0..m {
            for (exp_row, term_row) in exp.iter_mut().zip(term.iter()) {
                for (entry, t) in exp_row.iter_mut().zip(term_row.iter()) {
                    if !t.is_zero() {
                        *entry = entry.add(&dd[0][k].scale(t));
                    }
                }
            }
            if k + 1 < m {
                term = mat_mul(&term, &shifted(&local, &lambdas[k]));
            }
        }
        Ok(exp)
    }

    /// `int_0^t kernel(t - s) * input(s) ds`
    fn convolve(&mut self, kernel: &ExpPoly, input: &ExpPoly) -> Result<ExpPoly, PropagatorError> {
        let mut out = ExpPoly::default();
        for (l, kernel_poly) in kernel.terms.iter() {
            for (m, input_poly) in input.terms.iter() {
                let gap = m.sub(l);
                let inverse = if gap.is_zero() {
                    None
                } else {
                    Some(self.inverse(&gap)?)
                };
                for (j, a) in kernel_poly.iter().enumerate() {
                    for (k, b) in input_poly.iter().enumerate() {
                        if a.is_zero() || b.is_zero() {
                            continue;
                        }
                        let part = match &inverse {
                            None => resonant_convolution(l, j, k),
                            Some(inverse) => mixed_convolution(l, m, inverse, j, k),
                        };
                        out = out.add(&part.scale(&a.mul(b)));
                    }
                }
            }
        }
        Ok(out)
    }
}

/// The default deriver: closed-form eigenvalues per block, combined with divided differences of
/// `exp(l h)` and convolutions between blocks.
#[derive(Debug, Clone, Copy, Default)]
pub struct DividedDifferences;

impl PropagatorDeriver for DividedDifferences {
    fn derive_propagator(&self, system: &LinearSystem) -> Result<Propagator, PropagatorError> {
        let n = system.dimension();
        let inhomogeneous = !system.is_homogeneous();
        // the constant term is a state of its own that stays at one
        let size = if inhomogeneous { n + 1 } else { n };
        let mut names = system.states.clone();
        let mut a: Matrix = vec![vec![RationalFunction::zero(); size]; size];
        for i in 0..n {
            for j in 0..n {
                a[i][j] = RationalFunction::from_expr(&system.matrix[i][j]);
            }
            if inhomogeneous {
                a[i][n] = RationalFunction::from_expr(&system.constant[i]);
            }
        }
        if inhomogeneous {
            names.push("1".to_string());
        }

        let blocks = dependency_blocks(&a);
        let mut derivation = Derivation {
            a: &a,
            names: &names,
            singularities: Vec::new(),
        };
        let exps = blocks
            .iter()
            .map(|block| derivation.block_exp(block))
            .collect::<Result<Vec<_>, _>>()?;
        let mut block_of = vec![0; size];
        let mut position = vec![0; size];
        for (b, block) in blocks.iter().enumerate() {
            for (p, i) in block.iter().enumerate() {
                block_of[*i] = b;
                position[*i] = p;
            }
        }

        // column j of exp(A h) is the solution that starts at the j-th unit vector
        let mut columns: Vec<Vec<ExpPoly>> = Vec::with_capacity(size);
        for j in 0..size {
            let mut x = vec![ExpPoly::default(); size];
            let start = block_of[j];
            for (b, block) in blocks.iter().enumerate().skip(start) {
                if b == start {
                    for (p, i) in block.iter().enumerate() {
                        x[*i] = exps[b][p][position[j]].clone();
                    }
                    continue;
                }
                let forcing: Vec<ExpPoly> = block
                    .iter()
                    .map(|i| {
                        (0..size)
                            .filter(|k| block_of[*k] != b && !a[*i][*k].is_zero())
                            .fold(ExpPoly::default(), |acc, k| acc.add(&x[k].scale(&a[*i][k])))
                    })
                    .collect();
                if forcing.iter().all(ExpPoly::is_zero) {
                    continue;
                }
                for (p, i) in block.iter().enumerate() {
                    let mut response = ExpPoly::default();
                    for (q, f) in forcing.iter().enumerate() {
                        if !f.is_zero() {
                            response = response.add(&derivation.convolve(&exps[b][p][q], f)?);
                        }
                    }
                    x[*i] = response;
                }
            }
            columns.push(x);
        }

        let h = SymExpr::sym(&system.step);
        let matrix = (0..n)
            .map(|i| (0..n).map(|j| columns[j][i].to_expr(&h)).collect())
            .collect();
        let inhomogeneous = (0..n)
            .map(|i| {
                if inhomogeneous {
                    columns[n][i].to_expr(&h)
                } else {
                    SymExpr::zero()
                }
            })
            .collect();
        Ok(Propagator {
            states: system.states.clone(),
            step: system.step.clone(),
            matrix,
            inhomogeneous,
            singularities: derivation.singularities,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::odes::system::StateEquation;
    use approx::assert_abs_diff_eq;
    use ndarray::s;

    fn sym(name: &str) -> SymExpr {
        SymExpr::sym(name)
    }

    fn system(equations: &[(&str, SymExpr)]) -> LinearSystem {
        let equations: Vec<StateEquation> = equations
            .iter()
            .map(|(name, rhs)| StateEquation {
                name: name.to_string(),
                rhs: rhs.clone(),
                initial_value: None,
            })
            .collect();
        LinearSystem::from_equations(&equations, "__h", "t").unwrap()
    }

    fn env(values: &[(&str, f64)]) -> HashMap<String, f64> {
        values.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    fn taylor_exp(a: &Array2<f64>, h: f64) -> Array2<f64> {
        let n = a.nrows();
        let mut total = Array2::eye(n);
        let mut term = Array2::eye(n);
        for k in 1..40 {
            term = term.dot(a) * (h / k as f64);
            total = total + &term;
        }
        total
    }

    /// Compares the propagator against a series expansion of the (augmented) system matrix.
    fn check_numerically(system: &LinearSystem, values: &HashMap<String, f64>) {
        let propagator = DividedDifferences.derive_propagator(system).unwrap();
        let (p, c) = propagator.evaluate(values).unwrap();
        let (a, b) = system.evaluate(values).unwrap();
        let n = system.dimension();
        let mut augmented = Array2::zeros((n + 1, n + 1));
        augmented.slice_mut(s![..n, ..n]).assign(&a);
        augmented.slice_mut(s![..n, n]).assign(&b);
        let expected = taylor_exp(&augmented, values["__h"]);
        assert_abs_diff_eq!(p, expected.slice(s![..n, ..n]), epsilon = 1e-9);
        assert_abs_diff_eq!(c, expected.slice(s![..n, n]), epsilon = 1e-9);
    }

    #[test]
    fn single_decay() {
        let system = system(&[("V_m", -sym("V_m") / sym("tau"))]);
        let propagator = DividedDifferences.derive_propagator(&system).unwrap();
        assert_eq!(propagator.matrix[0][0].to_string(), "exp(-__h / tau)");
        assert!(propagator.inhomogeneous[0].is_zero());
        assert!(propagator.singularities.is_empty());
    }

    #[test]
    fn current_into_membrane() {
        let system = system(&[
            ("V_m", -sym("V_m") / sym("tau_m") + sym("I_syn") / sym("C_m")),
            ("I_syn", -sym("I_syn") / sym("tau_s")),
        ]);
        let propagator = DividedDifferences.derive_propagator(&system).unwrap();
        assert!(propagator.matrix[1][0].is_zero());
        assert_eq!(propagator.singularities.len(), 1);
        let condition = propagator.singularities[0].to_string();
        assert!(condition.contains("tau_m") && condition.contains("tau_s"));
        assert!(condition.ends_with("== 0"));
        let values = env(&[("tau_m", 10.0), ("tau_s", 2.0), ("C_m", 250.0), ("__h", 0.1)]);
        check_numerically(&system, &values);
    }

    #[test]
    fn alpha_kernel_block() {
        let system = system(&[
            ("g", sym("g__d")),
            (
                "g__d",
                -sym("g") / sym("tau").powi(2) - SymExpr::int(2) * sym("g__d") / sym("tau"),
            ),
        ]);
        let propagator = DividedDifferences.derive_propagator(&system).unwrap();
        assert!(propagator.singularities.is_empty());
        check_numerically(&system, &env(&[("tau", 2.0), ("__h", 0.25)]));
    }

    #[test]
    fn coupled_blocks() {
        let rational = system(&[("x", sym("y")), ("y", sym("x"))]);
        check_numerically(&rational, &env(&[("__h", 0.5)]));

        let irrational = system(&[
            ("x", -sym("x") / sym("a") + sym("y")),
            ("y", sym("x") / sym("b")),
        ]);
        check_numerically(&irrational, &env(&[("a", 2.0), ("b", 3.0), ("__h", 0.2)]));
    }

    #[test]
    fn constant_drive() {
        let system = system(&[(
            "V_m",
            (sym("E_L") - sym("V_m")) / sym("tau_m") + sym("I_e") / sym("C_m"),
        )]);
        let values = env(&[
            ("E_L", -70.0),
            ("tau_m", 10.0),
            ("I_e", 376.0),
            ("C_m", 250.0),
            ("__h", 0.1),
        ]);
        check_numerically(&system, &values);
        let propagator = DividedDifferences.derive_propagator(&system).unwrap();
        let next = propagator.advance(&ndarray::arr1(&[-70.0]), &values).unwrap();
        assert!(next[0] > -70.0);
    }

    #[test]
    fn equal_rates_resonate() {
        let system = system(&[
            ("V_m", -sym("V_m") / sym("tau") + sym("I_syn")),
            ("I_syn", -sym("I_syn") / sym("tau")),
        ]);
        let propagator = DividedDifferences.derive_propagator(&system).unwrap();
        assert!(propagator.singularities.is_empty());
        assert_eq!(propagator.matrix[0][1].to_string(), "__h * exp(-__h / tau)");
        check_numerically(&system, &env(&[("tau", 4.0), ("__h", 0.3)]));
    }

    #[test]
    fn two_alpha_kernels_with_drive() {
        let alpha = |g: &str, tau: &str| {
            let derivative = format!("{}__d", g);
            vec![
                (g.to_string(), sym(&derivative)),
                (
                    derivative.clone(),
                    -sym(g) / sym(tau).powi(2) - SymExpr::int(2) * sym(&derivative) / sym(tau),
                ),
            ]
        };
        let mut equations = vec![(
            "V_m".to_string(),
            (sym("E_L") - sym("V_m")) / sym("tau_m")
                + (sym("g_ex") + sym("g_in") + sym("I_e")) / sym("C_m"),
        )];
        equations.extend(alpha("g_ex", "tau_ex"));
        equations.extend(alpha("g_in", "tau_in"));
        let equations: Vec<(&str, SymExpr)> = equations
            .iter()
            .map(|(name, rhs)| (name.as_str(), rhs.clone()))
            .collect();
        let system = system(&equations);

        let values = env(&[
            ("tau_m", 10.0),
            ("tau_ex", 2.0),
            ("tau_in", 3.0),
            ("E_L", -70.0),
            ("C_m", 250.0),
            ("I_e", 376.0),
            ("__h", 0.1),
        ]);
        check_numerically(&system, &values);

        // one exponential per distinct rate keeps every entry small
        let propagator = DividedDifferences.derive_propagator(&system).unwrap();
        for entry in propagator.matrix.iter().flatten().chain(propagator.inhomogeneous.iter()) {
            assert!(entry.to_string().matches("exp(").count() <= 2, "{}", entry);
        }
        assert_eq!(propagator.singularities.len(), 2);
    }

    #[test]
    fn three_state_blocks() {
        let tau = sym("tau");
        let diffusive = system(&[
            ("x", (sym("y") + sym("z") - SymExpr::int(2) * sym("x")) / tau.clone()),
            ("y", (sym("x") + sym("z") - SymExpr::int(2) * sym("y")) / tau.clone()),
            ("z", (sym("x") + sym("y") - SymExpr::int(2) * sym("z")) / tau.clone()),
        ]);
        check_numerically(&diffusive, &env(&[("tau", 2.0), ("__h", 0.1)]));

        let ring = system(&[
            ("x", (sym("y") - sym("x")) / tau.clone()),
            ("y", (sym("z") - sym("y")) / tau.clone()),
            ("z", (sym("x") - sym("z")) / tau),
        ]);
        let propagator = DividedDifferences.derive_propagator(&ring).unwrap();
        assert_eq!(propagator.dimension(), 3);
    }

    #[test]
    fn blocks_without_closed_form_are_rejected() {
        let cubic = system(&[("x", sym("y")), ("y", sym("z")), ("z", sym("x") + sym("y"))]);
        assert_eq!(
            DividedDifferences.derive_propagator(&cubic).unwrap_err(),
            PropagatorError::NoClosedForm {
                states: vec!["x".to_string(), "y".to_string(), "z".to_string()],
            }
        );

        let ring = system(&[("w", sym("x")), ("x", sym("y")), ("y", sym("z")), ("z", sym("w"))]);
        let err = DividedDifferences.derive_propagator(&ring).unwrap_err();
        assert_eq!(
            err,
            PropagatorError::BlockTooLarge {
                size: 4,
                states: ["w", "x", "y", "z"].iter().map(|s| s.to_string()).collect(),
            }
        );
    }
}
