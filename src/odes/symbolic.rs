use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::ops::{Add, Div, Mul, Neg, Sub};

use itertools::Itertools;
use num_bigint::BigInt;
use num_rational::BigRational;
use num_traits::{One, Signed, ToPrimitive, Zero};
use thiserror::Error;

use crate::ast::{BinaryOp, Expr, ExprKind, UnaryOp};

use super::canonical::RationalFunction;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum EvalError {
    #[error("No value for '{0}'.")]
    Unbound(String),
    #[error("The function '{0}' cannot be evaluated numerically.")]
    Unsupported(String),
}

/// An expression over exact rational numbers, named symbols and function calls.
///
/// Sums and products are kept flat with their numeric parts folded; anything more is left to
/// [`SymExpr::simplify`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SymExpr {
    Num(BigRational),
    Sym(String),
    Add(Vec<SymExpr>),
    Mul(Vec<SymExpr>),
    Pow(Box<SymExpr>, Box<SymExpr>),
    Call(String, Vec<SymExpr>),
}

/// Reads a number in scientific notation (`-7.25e-1`) exactly.
pub fn parse_decimal(text: &str) -> Option<BigRational> {
    let (mantissa, exponent) = text.split_once('e')?;
    let exponent: i32 = exponent.parse().ok()?;
    let (negative, mantissa) = match mantissa.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, mantissa),
    };
    let (whole, fraction) = mantissa.split_once('.').unwrap_or((mantissa, ""));
    let digits: BigInt = format!("{}{}", whole, fraction).parse().ok()?;
    let scale = exponent - fraction.len() as i32;
    let ten = BigInt::from(10);
    let value = if scale >= 0 {
        BigRational::from_integer(digits * ten.pow(scale as u32))
    } else {
        BigRational::new(digits, ten.pow(scale.unsigned_abs()))
    };
    Some(if negative { -value } else { value })
}

fn to_f64(value: &BigRational) -> f64 {
    value.to_f64().unwrap_or(f64::NAN)
}

/// Flattened, constant-folded sum.
pub fn sum(terms: impl IntoIterator<Item = SymExpr>) -> SymExpr {
    let mut constant = BigRational::zero();
    let mut rest = Vec::new();
    for term in terms {
        match term {
            SymExpr::Num(value) => constant += value,
            SymExpr::Add(inner) => {
                for term in inner {
                    match term {
                        SymExpr::Num(value) => constant += value,
                        other => rest.push(other),
                    }
                }
            }
            other => rest.push(other),
        }
    }
    if !constant.is_zero() {
        rest.push(SymExpr::Num(constant));
    }
    match rest.len() {
        0 => SymExpr::zero(),
        1 => rest.remove(0),
        _ => SymExpr::Add(rest),
    }
}

/// Flattened, constant-folded product with the coefficient first.
pub fn product(factors: impl IntoIterator<Item = SymExpr>) -> SymExpr {
    let mut coefficient = BigRational::one();
    let mut rest = Vec::new();
    for factor in factors {
        match factor {
            SymExpr::Num(value) => coefficient *= value,
            SymExpr::Mul(inner) => {
                for factor in inner {
                    match factor {
                        SymExpr::Num(value) => coefficient *= value,
                        other => rest.push(other),
                    }
                }
            }
            other => rest.push(other),
        }
    }
    if coefficient.is_zero() {
        return SymExpr::zero();
    }
    if rest.is_empty() {
        return SymExpr::Num(coefficient);
    }
    if !coefficient.is_one() {
        rest.insert(0, SymExpr::Num(coefficient));
    }
    if rest.len() == 1 {
        rest.remove(0)
    } else {
        SymExpr::Mul(rest)
    }
}

impl SymExpr {
    pub fn zero() -> Self {
        SymExpr::Num(BigRational::zero())
    }

    pub fn one() -> Self {
        SymExpr::Num(BigRational::one())
    }

    pub fn int(value: i64) -> Self {
        SymExpr::Num(BigRational::from_integer(BigInt::from(value)))
    }

    pub fn sym(name: &str) -> Self {
        SymExpr::Sym(name.to_string())
    }

    pub fn call(name: &str, args: Vec<SymExpr>) -> Self {
        SymExpr::Call(name.to_string(), args)
    }

    /// The exact value of the shortest decimal that prints as `value`; `None` if not finite.
    pub fn from_f64(value: f64) -> Option<Self> {
        parse_decimal(&format!("{:e}", value)).map(SymExpr::Num)
    }

    pub fn as_num(&self) -> Option<&BigRational> {
        match self {
            SymExpr::Num(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.as_num().map_or(false, |v| v.is_zero())
    }

    pub fn is_one(&self) -> bool {
        self.as_num().map_or(false, |v| v.is_one())
    }

    pub fn pow(self, exponent: SymExpr) -> SymExpr {
        if exponent.is_one() {
            return self;
        }
        if exponent.is_zero() {
            return SymExpr::one();
        }
        if let (SymExpr::Num(base), SymExpr::Num(power)) = (&self, &exponent) {
            if power.is_integer() {
                if let Some(n) = power.to_integer().to_i32() {
                    if !(base.is_zero() && n < 0) {
                        return SymExpr::Num(base.pow(n));
                    }
                }
            }
        }
        SymExpr::Pow(Box::new(self), Box::new(exponent))
    }

    pub fn powi(self, exponent: i64) -> SymExpr {
        self.pow(SymExpr::int(exponent))
    }

    pub fn recip(self) -> SymExpr {
        self.powi(-1)
    }

    /// Whether any symbol in the expression satisfies `pred`.
    pub fn mentions(&self, pred: &dyn Fn(&str) -> bool) -> bool {
        match self {
            SymExpr::Num(_) => false,
            SymExpr::Sym(name) => pred(name),
            SymExpr::Add(items) | SymExpr::Mul(items) | SymExpr::Call(_, items) => {
                items.iter().any(|item| item.mentions(pred))
            }
            SymExpr::Pow(base, exponent) => base.mentions(pred) || exponent.mentions(pred),
        }
    }

    pub fn free_symbols(&self) -> BTreeSet<String> {
        let mut symbols = BTreeSet::new();
        self.collect_symbols(&mut symbols);
        symbols
    }

    fn collect_symbols(&self, symbols: &mut BTreeSet<String>) {
        match self {
            SymExpr::Num(_) => {}
            SymExpr::Sym(name) => {
                symbols.insert(name.clone());
            }
            SymExpr::Add(items) | SymExpr::Mul(items) | SymExpr::Call(_, items) => {
                items.iter().for_each(|item| item.collect_symbols(symbols))
            }
            SymExpr::Pow(base, exponent) => {
                base.collect_symbols(symbols);
                exponent.collect_symbols(symbols);
            }
        }
    }

    /// Replaces every symbol for which `f` returns a value.
    pub fn substitute(&self, f: &dyn Fn(&str) -> Option<SymExpr>) -> SymExpr {
        match self {
            SymExpr::Num(_) => self.clone(),
            SymExpr::Sym(name) => f(name).unwrap_or_else(|| self.clone()),
            SymExpr::Add(terms) => sum(terms.iter().map(|t| t.substitute(f))),
            SymExpr::Mul(factors) => product(factors.iter().map(|t| t.substitute(f))),
            SymExpr::Pow(base, exponent) => base.substitute(f).pow(exponent.substitute(f)),
            SymExpr::Call(name, args) => {
                SymExpr::Call(name.clone(), args.iter().map(|a| a.substitute(f)).collect())
            }
        }
    }

    /// Derivative with respect to the symbol `var`, or `None` for calls with no known derivative.
    pub fn diff(&self, var: &str) -> Option<SymExpr> {
        let depends = |e: &SymExpr| e.mentions(&|name| name == var);
        match self {
            SymExpr::Num(_) => Some(SymExpr::zero()),
            SymExpr::Sym(name) if name == var => Some(SymExpr::one()),
            SymExpr::Sym(_) => Some(SymExpr::zero()),
            SymExpr::Add(terms) => terms
                .iter()
                .map(|t| t.diff(var))
                .collect::<Option<Vec<_>>>()
                .map(sum),
            SymExpr::Mul(factors) => {
                let mut terms = Vec::new();
                for (i, factor) in factors.iter().enumerate() {
                    let derivative = factor.diff(var)?;
                    if derivative.is_zero() {
                        continue;
                    }
                    terms.push(product(factors.iter().enumerate().map(|(j, other)| {
                        if i == j {
                            derivative.clone()
                        } else {
                            other.clone()
                        }
                    })));
                }
                Some(sum(terms))
            }
            SymExpr::Pow(base, exponent) => {
                let base_diff = base.diff(var)?;
                let (base, exponent) = (base.as_ref().clone(), exponent.as_ref().clone());
                if !depends(&exponent) {
                    let lowered = base.pow(exponent.clone() - SymExpr::one());
                    return Some(product([exponent, lowered, base_diff]));
                }
                // d(b^e) = b^e (e' ln b + e b' / b)
                let exponent_diff = exponent.diff(var)?;
                let log = SymExpr::call("ln", vec![base.clone()]);
                Some(self.clone() * (exponent_diff * log + exponent * base_diff / base))
            }
            SymExpr::Call(_, _) if !depends(self) => Some(SymExpr::zero()),
            SymExpr::Call(name, args) => {
                let arg = match args.as_slice() {
                    [arg] => arg.clone(),
                    _ => return None,
                };
                let inner = arg.diff(var)?;
                let call = |f: &str| SymExpr::call(f, vec![arg.clone()]);
                let outer = match name.as_str() {
                    "exp" | "expm1" => call("exp"),
                    "ln" | "log" => arg.clone().recip(),
                    "log10" => (arg.clone() * SymExpr::call("ln", vec![SymExpr::int(10)])).recip(),
                    "sin" => call("cos"),
                    "cos" => -call("sin"),
                    "tan" => call("cos").powi(-2),
                    "sinh" => call("cosh"),
                    "cosh" => call("sinh"),
                    "tanh" => SymExpr::one() - call("tanh").powi(2),
                    "sqrt" => (SymExpr::int(2) * call("sqrt")).recip(),
                    _ => return None,
                };
                Some(outer * inner)
            }
        }
    }

    /// Canonical form: expanded, with like terms collected and exact cancellations applied.
    pub fn simplify(&self) -> SymExpr {
        RationalFunction::from_expr(self).to_expr()
    }

    /// Evaluates numerically. `e` is Euler's number unless `env` says otherwise.
    pub fn evaluate(&self, env: &HashMap<String, f64>) -> Result<f64, EvalError> {
        match self {
            SymExpr::Num(value) => Ok(to_f64(value)),
            SymExpr::Sym(name) => env
                .get(name)
                .copied()
                .or_else(|| (name == "e").then_some(std::f64::consts::E))
                .ok_or_else(|| EvalError::Unbound(name.clone())),
            SymExpr::Add(terms) => terms.iter().map(|t| t.evaluate(env)).sum(),
            SymExpr::Mul(factors) => factors.iter().map(|t| t.evaluate(env)).product(),
            SymExpr::Pow(base, exponent) => Ok(base.evaluate(env)?.powf(exponent.evaluate(env)?)),
            SymExpr::Call(name, args) => {
                let values = args
                    .iter()
                    .map(|a| a.evaluate(env))
                    .collect::<Result<Vec<f64>, EvalError>>()?;
                apply(name, &values)
            }
        }
    }

    /// `(true, -self)` when the expression prints with a leading minus sign.
    fn split_sign(&self) -> (bool, SymExpr) {
        let negative = match self {
            SymExpr::Num(value) => value.is_negative(),
            SymExpr::Mul(factors) => fraction(factors).0,
            _ => false,
        };
        if negative {
            (true, -self.clone())
        } else {
            (false, self.clone())
        }
    }

    fn precedence(&self) -> u8 {
        match self {
            SymExpr::Add(_) => 1,
            SymExpr::Mul(_) => 2,
            SymExpr::Num(value) if value.is_negative() || !value.is_integer() => 2,
            SymExpr::Pow(_, exponent) if is_negative(exponent) => 2,
            SymExpr::Pow(_, _) => 4,
            _ => 5,
        }
    }

    /// Converts back into a model expression, e.g. for injecting propagator declarations.
    pub fn to_ast(&self) -> Expr {
        match self {
            SymExpr::Num(value) => number_ast(value),
            SymExpr::Sym(name) => Expr::variable(name, 0),
            SymExpr::Add(terms) => {
                let mut iter = terms.iter();
                let first = match iter.next() {
                    Some(first) => first.to_ast(),
                    None => return number_ast(&BigRational::zero()),
                };
                iter.fold(first, |acc, term| {
                    let (negative, magnitude) = term.split_sign();
                    let op = if negative { BinaryOp::Sub } else { BinaryOp::Add };
                    Expr::binary(op, acc, magnitude.to_ast())
                })
            }
            SymExpr::Mul(factors) => {
                let (negative, numerator, denominator) = fraction(factors);
                let mut ast = numerator
                    .iter()
                    .map(SymExpr::to_ast)
                    .reduce(|acc, f| Expr::binary(BinaryOp::Mul, acc, f))
                    .unwrap_or_else(|| number_ast(&BigRational::one()));
                if let Some(den) = denominator
                    .iter()
                    .map(SymExpr::to_ast)
                    .reduce(|acc, f| Expr::binary(BinaryOp::Mul, acc, f))
                {
                    ast = Expr::binary(BinaryOp::Div, ast, den);
                }
                if negative {
                    negate(ast)
                } else {
                    ast
                }
            }
            SymExpr::Pow(base, exponent) if is_negative(exponent) => {
                let positive = base.as_ref().clone().pow(-exponent.as_ref().clone());
                Expr::binary(BinaryOp::Div, number_ast(&BigRational::one()), positive.to_ast())
            }
            SymExpr::Pow(base, exponent) => {
                Expr::binary(BinaryOp::Pow, base.to_ast(), exponent.to_ast())
            }
            SymExpr::Call(name, args) => {
                Expr::call(name, args.iter().map(SymExpr::to_ast).collect())
            }
        }
    }
}

fn is_negative(expr: &SymExpr) -> bool {
    expr.as_num().map_or(false, |v| v.is_negative())
}

fn negate(expr: Expr) -> Expr {
    Expr::new(
        ExprKind::Unary {
            op: UnaryOp::Neg,
            operand: Box::new(expr),
        },
        None,
    )
}

fn number_ast(value: &BigRational) -> Expr {
    if value.is_negative() {
        return negate(number_ast(&-value));
    }
    Expr::new(
        ExprKind::Number {
            value: to_f64(value),
            is_integer: value.is_integer(),
        },
        None,
    )
}

/// Splits a product into its sign, numerator factors and denominator factors.
fn fraction(factors: &[SymExpr]) -> (bool, Vec<SymExpr>, Vec<SymExpr>) {
    let mut negative = false;
    let mut numerator = Vec::new();
    let mut denominator = Vec::new();
    for factor in factors {
        match factor {
            SymExpr::Num(value) => {
                negative ^= value.is_negative();
                let value = value.abs();
                if !value.numer().is_one() {
                    numerator.push(SymExpr::Num(BigRational::from_integer(value.numer().clone())));
                }
                if !value.denom().is_one() {
                    denominator.push(SymExpr::Num(BigRational::from_integer(
                        value.denom().clone(),
                    )));
                }
            }
            SymExpr::Pow(base, exponent) if is_negative(exponent) => {
                denominator.push(base.as_ref().clone().pow(-exponent.as_ref().clone()));
            }
            other => numerator.push(other.clone()),
        }
    }
    (negative, numerator, denominator)
}

fn truth(value: bool) -> f64 {
    if value {
        1.0
    } else {
        0.0
    }
}

fn apply(name: &str, values: &[f64]) -> Result<f64, EvalError> {
    let value = match (name, values) {
        ("exp", [x]) => x.exp(),
        ("expm1", [x]) => x.exp_m1(),
        ("ln" | "log", [x]) => x.ln(),
        ("log10", [x]) => x.log10(),
        ("sqrt", [x]) => x.sqrt(),
        ("sin", [x]) => x.sin(),
        ("cos", [x]) => x.cos(),
        ("tan", [x]) => x.tan(),
        ("sinh", [x]) => x.sinh(),
        ("cosh", [x]) => x.cosh(),
        ("tanh", [x]) => x.tanh(),
        ("abs", [x]) => x.abs(),
        ("min", [a, b]) => a.min(*b),
        ("max", [a, b]) => a.max(*b),
        ("pow", [a, b]) => a.powf(*b),
        ("mod", [a, b]) => a % b,
        ("lt", [a, b]) => truth(a < b),
        ("le", [a, b]) => truth(a <= b),
        ("gt", [a, b]) => truth(a > b),
        ("ge", [a, b]) => truth(a >= b),
        ("eq", [a, b]) => truth(a == b),
        ("ne", [a, b]) => truth(a != b),
        ("and", [a, b]) => truth(*a != 0.0 && *b != 0.0),
        ("or", [a, b]) => truth(*a != 0.0 || *b != 0.0),
        ("not", [a]) => truth(*a == 0.0),
        ("ite", [cond, then, otherwise]) => {
            if *cond != 0.0 {
                *then
            } else {
                *otherwise
            }
        }
        _ => return Err(EvalError::Unsupported(name.to_string())),
    };
    Ok(value)
}

impl Add for SymExpr {
    type Output = SymExpr;
    fn add(self, rhs: SymExpr) -> SymExpr {
        sum([self, rhs])
    }
}

impl Sub for SymExpr {
    type Output = SymExpr;
    fn sub(self, rhs: SymExpr) -> SymExpr {
        sum([self, -rhs])
    }
}

impl Mul for SymExpr {
    type Output = SymExpr;
    fn mul(self, rhs: SymExpr) -> SymExpr {
        product([self, rhs])
    }
}

impl Div for SymExpr {
    type Output = SymExpr;
    fn div(self, rhs: SymExpr) -> SymExpr {
        product([self, rhs.recip()])
    }
}

impl Neg for SymExpr {
    type Output = SymExpr;
    fn neg(self) -> SymExpr {
        product([SymExpr::int(-1), self])
    }
}

/// Finite decimal expansion of `value`, if its denominator has no prime factors but 2 and 5.
fn decimal_string(value: &BigRational) -> Option<String> {
    let mut denom = value.denom().clone();
    let (mut twos, mut fives) = (0u32, 0u32);
    while (&denom % 2u32).is_zero() {
        denom /= 2u32;
        twos += 1;
    }
    while (&denom % 5u32).is_zero() {
        denom /= 5u32;
        fives += 1;
    }
    if !denom.is_one() {
        return None;
    }
    let digits = twos.max(fives) as usize;
    let scaled = (value.abs() * BigRational::from_integer(BigInt::from(10).pow(digits as u32)))
        .to_integer()
        .to_string();
    let padded = format!("{:0>width$}", scaled, width = digits + 1);
    let (whole, fraction) = padded.split_at(padded.len() - digits);
    let sign = if value.is_negative() { "-" } else { "" };
    Some(format!("{}{}.{}", sign, whole, fraction))
}

fn fmt_operand(f: &mut fmt::Formatter, expr: &SymExpr, min: u8) -> fmt::Result {
    if expr.precedence() < min {
        write!(f, "({})", expr)
    } else {
        write!(f, "{}", expr)
    }
}

fn fmt_factors(f: &mut fmt::Formatter, factors: &[SymExpr]) -> fmt::Result {
    for (i, factor) in factors.iter().enumerate() {
        if i > 0 {
            write!(f, " * ")?;
        }
        fmt_operand(f, factor, 3)?;
    }
    Ok(())
}

impl fmt::Display for SymExpr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SymExpr::Num(value) if value.is_integer() => write!(f, "{}", value.numer()),
            SymExpr::Num(value) => match decimal_string(value) {
                Some(text) => write!(f, "{}", text),
                None => write!(f, "{}/{}", value.numer(), value.denom()),
            },
            SymExpr::Sym(name) => write!(f, "{}", name),
            SymExpr::Add(terms) => {
                for (i, term) in terms.iter().enumerate() {
                    let (negative, magnitude) = term.split_sign();
                    match (i, negative) {
                        (0, true) => write!(f, "-")?,
                        (0, false) => {}
                        (_, true) => write!(f, " - ")?,
                        (_, false) => write!(f, " + ")?,
                    }
                    fmt_operand(f, &magnitude, 2)?;
                }
                Ok(())
            }
            SymExpr::Mul(factors) => {
                let (negative, numerator, denominator) = fraction(factors);
                if negative {
                    write!(f, "-")?;
                }
                if numerator.is_empty() {
                    write!(f, "1")?;
                } else {
                    fmt_factors(f, &numerator)?;
                }
                match denominator.as_slice() {
                    [] => Ok(()),
                    [single] => {
                        write!(f, " / ")?;
                        fmt_operand(f, single, 3)
                    }
                    _ => {
                        write!(f, " / (")?;
                        fmt_factors(f, &denominator)?;
                        write!(f, ")")
                    }
                }
            }
            SymExpr::Pow(base, exponent) if is_negative(exponent) => {
                write!(f, "1 / ")?;
                fmt_operand(f, &base.as_ref().clone().pow(-exponent.as_ref().clone()), 3)
            }
            SymExpr::Pow(base, exponent) => {
                fmt_operand(f, base, 5)?;
                write!(f, "**")?;
                fmt_operand(f, exponent, 5)
            }
            SymExpr::Call(name, args) => write!(f, "{}({})", name, args.iter().join(", ")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn x() -> SymExpr {
        SymExpr::sym("x")
    }

    fn tau() -> SymExpr {
        SymExpr::sym("tau")
    }

    #[test]
    fn decimals_are_exact() {
        assert_eq!(
            SymExpr::from_f64(0.07),
            Some(SymExpr::Num(BigRational::new(7.into(), 100.into())))
        );
        assert_eq!(SymExpr::from_f64(-70.0), Some(SymExpr::int(-70)));
        assert_eq!(SymExpr::from_f64(f64::INFINITY), None);
        assert_eq!(parse_decimal("1.000000000000e0"), Some(BigRational::one()));
        assert_eq!(SymExpr::from_f64(0.25).unwrap().to_string(), "0.25");
    }

    #[test]
    fn folding_and_display() {
        let expr = -x() / tau() + SymExpr::int(2) * SymExpr::int(3);
        assert_eq!(expr.to_string(), "-x / tau + 6");
        assert_eq!((x() * SymExpr::zero() + x()).to_string(), "x");
        assert_eq!((x() - (x() + tau())).to_string(), "x - (x + tau)");
        assert_eq!(x().powi(2).to_string(), "x**2");
        let half = SymExpr::Num(BigRational::new(1.into(), 2.into()));
        assert_eq!((half * x()).to_string(), "x / 2");
    }

    #[test]
    fn derivatives() {
        let t = SymExpr::sym("t");
        let kernel = t.clone() * SymExpr::call("exp", vec![-t.clone() / tau()]);
        let derivative = kernel.diff("t").unwrap();
        let env: HashMap<String, f64> = [("t".to_string(), 2.0), ("tau".to_string(), 4.0)].into();
        let expected = (-0.5f64).exp() * (1.0 - 2.0 / 4.0);
        assert_relative_eq!(derivative.evaluate(&env).unwrap(), expected, epsilon = 1e-12);
        assert_eq!(x().powi(3).diff("x").unwrap().simplify(), SymExpr::int(3) * x().powi(2));
        assert!(SymExpr::call("erf", vec![t]).diff("t").is_none());
    }

    #[test]
    fn evaluation() {
        let env: HashMap<String, f64> = [("x".to_string(), 3.0)].into();
        let condition = SymExpr::call("gt", vec![x(), SymExpr::int(1)]);
        let expr = SymExpr::call("ite", vec![condition, x(), SymExpr::zero()]);
        assert_relative_eq!(expr.evaluate(&env).unwrap(), 3.0);
        assert_eq!(tau().evaluate(&env), Err(EvalError::Unbound("tau".to_string())));
        assert_relative_eq!(SymExpr::sym("e").evaluate(&env).unwrap(), std::f64::consts::E);
    }

    #[test]
    fn back_to_model_expressions() {
        let expr = SymExpr::call("exp", vec![-SymExpr::sym("__h") / tau()]);
        assert_eq!(expr.to_ast().to_string(), "exp(-(__h / tau))");
    }
}
