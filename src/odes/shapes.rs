//! Linear ODEs satisfied by kernels given as explicit functions of time.

use std::collections::{BTreeMap, BTreeSet};

use super::canonical::{Monomial, Polynomial, RationalFunction};
use super::symbolic::SymExpr;

/// `f^(n) = sum(coefficients[i] * f^(i))` with `f^(i)(0) = initial_values[i]`, where `n` is the
/// order.
#[derive(Debug, Clone, PartialEq)]
pub struct KernelOde {
    pub coefficients: Vec<SymExpr>,
    pub initial_values: Vec<SymExpr>,
}

impl KernelOde {
    pub fn order(&self) -> usize {
        self.coefficients.len()
    }
}

type TimeParts = BTreeMap<Monomial, RationalFunction>;

/// Groups the terms of `f` by their time-dependent atoms. Each group's coefficient is free of
/// `time`. `None` if the denominator depends on time.
fn split_by_time(f: &SymExpr, time: &str) -> Option<TimeParts> {
    let depends = |name: &str| name == time;
    let rf = RationalFunction::from_expr(f);
    if rf.denominator().mentions(&depends) {
        return None;
    }
    let mut parts = TimeParts::new();
    for (m, c) in rf.numerator().terms() {
        let (timed, rest): (Monomial, Monomial) = m
            .iter()
            .map(|(atom, e)| (atom.clone(), *e))
            .partition(|(atom, _)| atom.mentions(&depends));
        let term =
            RationalFunction::new(Polynomial::monomial(rest, c.clone()), rf.denominator().clone());
        let entry = parts.entry(timed).or_insert_with(RationalFunction::zero);
        *entry = entry.add(&term);
    }
    parts.retain(|_, c| !c.is_zero());
    Some(parts)
}

fn part(parts: &TimeParts, key: &Monomial) -> RationalFunction {
    parts.get(key).cloned().unwrap_or_else(RationalFunction::zero)
}

/// `f' = a f`
fn first_order(
    f: &TimeParts,
    df: &TimeParts,
    keys: &BTreeSet<Monomial>,
) -> Option<Vec<RationalFunction>> {
    let key = keys.iter().find(|k| !part(f, k).is_zero())?;
    let a = part(df, key).div(&part(f, key))?;
    keys.iter()
        .all(|k| part(df, k).sub(&a.mul(&part(f, k))).is_zero())
        .then(|| vec![a])
}

/// `f'' = a f + b f'`, solved by Cramer's rule on the first independent pair of groups.
fn second_order(
    f: &TimeParts,
    df: &TimeParts,
    ddf: &TimeParts,
    keys: &BTreeSet<Monomial>,
) -> Option<Vec<RationalFunction>> {
    let keys: Vec<&Monomial> = keys.iter().collect();
    for (i, k1) in keys.iter().enumerate() {
        for k2 in keys.iter().skip(i + 1) {
            let (f1, f2) = (part(f, k1), part(f, k2));
            let (d1, d2) = (part(df, k1), part(df, k2));
            let (dd1, dd2) = (part(ddf, k1), part(ddf, k2));
            let det = f1.mul(&d2).sub(&f2.mul(&d1));
            if det.is_zero() {
                continue;
            }
            let a = dd1.mul(&d2).sub(&dd2.mul(&d1)).div(&det)?;
            let b = f1.mul(&dd2).sub(&f2.mul(&dd1)).div(&det)?;
            let holds = keys.iter().all(|k| {
                part(ddf, k)
                    .sub(&a.mul(&part(f, k)))
                    .sub(&b.mul(&part(df, k)))
                    .is_zero()
            });
            return holds.then(|| vec![a, b]);
        }
    }
    None
}

/// Finds the lowest-order (at most 2) linear homogeneous ODE with coefficients constant in
/// `time` that `f` satisfies.
pub fn kernel_ode(f: &SymExpr, time: &str) -> Option<KernelOde> {
    let df = f.diff(time)?;
    let ddf = df.diff(time)?;
    let parts = [
        split_by_time(f, time)?,
        split_by_time(&df, time)?,
        split_by_time(&ddf, time)?,
    ];
    let keys: BTreeSet<Monomial> = parts.iter().flat_map(|p| p.keys().cloned()).collect();

    let (coefficients, derivatives) = match first_order(&parts[0], &parts[1], &keys) {
        Some(coefficients) => (coefficients, vec![f.clone()]),
        None => (
            second_order(&parts[0], &parts[1], &parts[2], &keys)?,
            vec![f.clone(), df],
        ),
    };
    let at_zero = |g: &SymExpr| {
        g.substitute(&|name| (name == time).then(SymExpr::zero))
            .simplify()
    };
    Some(KernelOde {
        coefficients: coefficients.iter().map(RationalFunction::to_expr).collect(),
        initial_values: derivatives.iter().map(at_zero).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sym(name: &str) -> SymExpr {
        SymExpr::sym(name)
    }

    fn exp(arg: SymExpr) -> SymExpr {
        SymExpr::call("exp", vec![arg])
    }

    #[test]
    fn alpha_kernel() {
        let (t, tau) = (sym("t"), sym("tau"));
        let alpha = sym("e") / tau.clone() * t.clone() * exp(-t / tau.clone());
        let ode = kernel_ode(&alpha, "t").unwrap();
        assert_eq!(ode.order(), 2);
        assert_eq!(ode.coefficients[0], (-tau.clone().powi(-2)).simplify());
        assert_eq!(ode.coefficients[1], (SymExpr::int(-2) / tau.clone()).simplify());
        assert_eq!(ode.initial_values[0], SymExpr::zero());
        assert_eq!(ode.initial_values[1], (sym("e") / tau).simplify());
    }

    #[test]
    fn exponential_kernel() {
        let (t, tau) = (sym("t"), sym("tau_syn"));
        let ode = kernel_ode(&exp(-t / tau.clone()), "t").unwrap();
        assert_eq!(ode.order(), 1);
        assert_eq!(ode.coefficients[0], (-tau.recip()).simplify());
        assert_eq!(ode.initial_values, vec![SymExpr::one()]);
    }

    #[test]
    fn oscillating_kernel() {
        let ode = kernel_ode(&SymExpr::call("sin", vec![sym("t")]), "t").unwrap();
        assert_eq!(ode.order(), 2);
        assert_eq!(ode.coefficients, vec![SymExpr::int(-1), SymExpr::zero()]);
        assert_eq!(ode.initial_values, vec![SymExpr::zero(), SymExpr::one()]);
    }

    #[test]
    fn kernels_without_a_low_order_ode() {
        assert!(kernel_ode(&sym("t").powi(3), "t").is_none());
        assert!(kernel_ode(&(sym("t") + sym("tau")).recip(), "t").is_none());
        assert!(kernel_ode(&SymExpr::call("erf", vec![sym("t")]), "t").is_none());
    }
}
