use std::collections::HashMap;

use itertools::Itertools;
use log::{debug, info};
use num_rational::Rational32;

use crate::ast::{BinaryOp, Expr, ExprId, ExprKind, Model, UnaryOp, VariableRef};
use crate::symbols::{ScopeId, SymbolRef, SymbolTable, TypeSymbol};
use crate::units::UnitType;

use super::TypeError;

/// Inferred type (or type error) of every expression node, keyed by `ExprId`.
#[derive(Debug, Clone, Default)]
pub struct TypeTable {
    types: HashMap<ExprId, Result<TypeSymbol, TypeError>>,
}

impl TypeTable {
    pub fn get(&self, id: ExprId) -> Option<&Result<TypeSymbol, TypeError>> {
        self.types.get(&id)
    }

    /// The type of `expr`, or the error sentinel if it failed to type or was never inferred.
    pub fn type_of(&self, expr: &Expr) -> TypeSymbol {
        match self.types.get(&expr.id) {
            Some(Ok(ty)) => ty.clone(),
            _ => TypeSymbol::Error,
        }
    }

    /// All recorded type errors, ordered by expression id.
    pub fn errors(&self) -> Vec<(ExprId, &TypeError)> {
        self.types
            .iter()
            .filter_map(|(id, result)| result.as_ref().err().map(|err| (*id, err)))
            .sorted_by_key(|(id, _)| *id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    fn insert(&mut self, id: ExprId, result: Result<TypeSymbol, TypeError>) {
        self.types.insert(id, result);
    }
}

/// Bottom-up type inference over expressions, resolving names through a symbol table.
///
/// Only the innermost failing node records an error; its parents see the error sentinel,
/// which is compatible with everything, so one mistake produces one diagnostic.
pub struct TypeChecker<'a> {
    symbols: &'a SymbolTable,
    types: TypeTable,
}

impl<'a> TypeChecker<'a> {
    pub fn new(symbols: &'a SymbolTable) -> Self {
        Self {
            symbols,
            types: TypeTable::default(),
        }
    }

    /// Types every expression of `model`, each in the scope it was declared in.
    pub fn check_model(model: &Model, symbols: &'a SymbolTable) -> TypeTable {
        let mut checker = TypeChecker::new(symbols);
        model.for_each_root_expr(&mut |expr| {
            let scope = symbols.scope_of(expr.id);
            let _ = checker.infer_type(expr, scope);
        });
        let types = checker.into_table();
        info!(
            "Inferred types for '{}': {} expressions, {} type errors",
            model.name,
            types.len(),
            types.errors().len()
        );
        types
    }

    pub fn types(&self) -> &TypeTable {
        &self.types
    }

    pub fn into_table(self) -> TypeTable {
        self.types
    }

    /// Infers the type of `expr` and of all its sub-expressions, recording each result.
    pub fn infer_type(&mut self, expr: &Expr, scope: ScopeId) -> Result<TypeSymbol, TypeError> {
        let result = self.compute(expr, scope);
        if let Err(err) = &result {
            debug!("Type error in '{}': {}", expr, err);
        }
        self.types.insert(expr.id, result.clone());
        result
    }

    /// Like `infer_type`, with failures replaced by the error sentinel.
    fn operand(&mut self, expr: &Expr, scope: ScopeId) -> TypeSymbol {
        self.infer_type(expr, scope).unwrap_or(TypeSymbol::Error)
    }

    fn compute(&mut self, expr: &Expr, scope: ScopeId) -> Result<TypeSymbol, TypeError> {
        match &expr.kind {
            ExprKind::Number { is_integer, .. } => Ok(if *is_integer {
                TypeSymbol::Integer
            } else {
                TypeSymbol::Real
            }),
            ExprKind::Boolean(_) => Ok(TypeSymbol::Boolean),
            ExprKind::String(_) => Ok(TypeSymbol::String),
            ExprKind::Variable(var) => self.variable(var, scope),
            ExprKind::Call { name, args } => self.call(name, args, scope),
            ExprKind::Unary { op, operand } => {
                let ty = self.operand(operand, scope);
                unary(*op, ty)
            }
            ExprKind::Binary { op, lhs, rhs } => {
                let lhs_type = self.operand(lhs, scope);
                let rhs_type = self.operand(rhs, scope);
                binary(*op, lhs_type, rhs_type, rhs)
            }
            ExprKind::Ternary {
                cond,
                then,
                otherwise,
            } => {
                let cond_type = self.operand(cond, scope);
                let then_type = self.operand(then, scope);
                let else_type = self.operand(otherwise, scope);
                if !cond_type.is_boolean() {
                    return Err(TypeError::NonBooleanCondition(format!(
                        "Ternary condition must be boolean, found '{}'.",
                        cond_type
                    )));
                }
                unify(then_type, else_type, "the branches of a ternary")
            }
        }
    }

    fn variable(&mut self, var: &VariableRef, scope: ScopeId) -> Result<TypeSymbol, TypeError> {
        if let Some(index) = &var.index {
            let index_type = self.operand(index, scope);
            if !index_type.is_error() && !index_type.is_integer() {
                return Err(TypeError::IncompatibleTypes(format!(
                    "Vector index of '{}' must be an integer, found '{}'.",
                    var.full_name(),
                    index_type
                )));
            }
        }
        match self.symbols.resolve_variable(var, scope) {
            Ok((SymbolRef::Variable(symbol), remaining)) => {
                let ty = match &var.index {
                    Some(_) => symbol.type_symbol.element().clone(),
                    None => symbol.type_symbol.clone(),
                };
                Ok(self.symbols.derivative_type(&ty, remaining))
            }
            Ok((SymbolRef::Type(unit), 0)) => Ok(TypeSymbol::unit(unit)),
            Ok((SymbolRef::Type(unit), _)) => Err(TypeError::IncompatibleTypes(format!(
                "The unit '{}' cannot be differentiated.",
                unit
            ))),
            Ok((SymbolRef::Function(func), _)) => Err(TypeError::IncompatibleTypes(format!(
                "The function '{}' cannot be used as a value.",
                func.name
            ))),
            // reported by the name resolution checks
            Err(_) => Ok(TypeSymbol::Error),
        }
    }

    fn call(&mut self, name: &str, args: &[Expr], scope: ScopeId) -> Result<TypeSymbol, TypeError> {
        let arg_types: Vec<TypeSymbol> = args.iter().map(|arg| self.operand(arg, scope)).collect();
        let signature = format!("({})", arg_types.iter().join(", "));
        let func = match self.symbols.resolve(name, scope) {
            Ok(SymbolRef::Function(func)) => func,
            _ => {
                return Err(TypeError::FunctionDoesNotExist {
                    name: name.to_string(),
                    signature,
                })
            }
        };
        if func.is_builtin() && func.name == "convolve" && arg_types.len() == 2 {
            return multiply(&arg_types[0], &arg_types[1]);
        }
        if !func.accepts(&arg_types) {
            return Err(TypeError::FunctionDoesNotExist {
                name: name.to_string(),
                signature,
            });
        }
        Ok(func.return_type(&arg_types))
    }
}

fn unary(op: UnaryOp, ty: TypeSymbol) -> Result<TypeSymbol, TypeError> {
    if ty.is_error() {
        return Ok(TypeSymbol::Error);
    }
    match op {
        UnaryOp::Not if ty.is_boolean() => Ok(TypeSymbol::Boolean),
        UnaryOp::Not => Err(TypeError::NonBooleanCondition(format!(
            "Operand of 'not' must be boolean, found '{}'.",
            ty
        ))),
        UnaryOp::Neg | UnaryOp::Plus if ty.is_numeric() => Ok(ty.element().clone()),
        UnaryOp::Neg | UnaryOp::Plus => Err(TypeError::IncompatibleTypes(format!(
            "Unary sign applied to non-numeric type '{}'.",
            ty
        ))),
    }
}

fn binary(
    op: BinaryOp,
    lhs: TypeSymbol,
    rhs: TypeSymbol,
    rhs_expr: &Expr,
) -> Result<TypeSymbol, TypeError> {
    match op {
        BinaryOp::And | BinaryOp::Or => {
            if lhs.is_boolean() && rhs.is_boolean() {
                Ok(TypeSymbol::Boolean)
            } else {
                Err(TypeError::NonBooleanCondition(format!(
                    "Operands of '{}' must be boolean, found '{}' and '{}'.",
                    op.symbol(),
                    lhs,
                    rhs
                )))
            }
        }
        _ if lhs.is_error() || rhs.is_error() => Ok(if op.is_comparison() {
            TypeSymbol::Boolean
        } else {
            TypeSymbol::Error
        }),
        BinaryOp::Add | BinaryOp::Sub => {
            if op == BinaryOp::Add && lhs == TypeSymbol::String && rhs == TypeSymbol::String {
                return Ok(TypeSymbol::String);
            }
            unify(lhs, rhs, &format!("'{}'", op.symbol()))
        }
        BinaryOp::Mul => multiply(&lhs, &rhs),
        BinaryOp::Div => {
            let (lhs_unit, rhs_unit) = numeric_units(op, &lhs, &rhs)?;
            if lhs.is_integer() && rhs.is_integer() {
                return Ok(TypeSymbol::Integer);
            }
            Ok(TypeSymbol::unit(lhs_unit.div(&rhs_unit)))
        }
        BinaryOp::Mod => {
            if lhs.is_integer() && rhs.is_integer() {
                Ok(TypeSymbol::Integer)
            } else {
                Err(TypeError::IncompatibleTypes(format!(
                    "Operands of '%' must be integers, found '{}' and '{}'.",
                    lhs, rhs
                )))
            }
        }
        BinaryOp::Pow => {
            let (base_unit, exponent_unit) = numeric_units(op, &lhs, &rhs)?;
            if !exponent_unit.is_dimensionless() {
                return Err(TypeError::IncompatibleUnits(format!(
                    "Exponent must be dimensionless, found '{}'.",
                    rhs
                )));
            }
            if base_unit.is_plain_number() {
                return Ok(if lhs.is_integer() && rhs.is_integer() {
                    TypeSymbol::Integer
                } else {
                    TypeSymbol::Real
                });
            }
            let exponent = rhs_expr
                .literal_value()
                .and_then(Rational32::approximate_float)
                .ok_or_else(|| {
                    TypeError::IncompatibleUnits(format!(
                        "Exponent of a base in '{}' must be a numeric literal.",
                        lhs
                    ))
                })?;
            Ok(TypeSymbol::unit(base_unit.pow(exponent)))
        }
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge | BinaryOp::Eq | BinaryOp::Ne => {
            let comparable = (lhs.is_numeric() && rhs.is_numeric())
                || (lhs.is_boolean() && rhs.is_boolean())
                || (lhs == TypeSymbol::String && rhs == TypeSymbol::String);
            if !comparable {
                Err(TypeError::IncompatibleTypes(format!(
                    "Cannot compare '{}' with '{}'.",
                    lhs, rhs
                )))
            } else if !lhs.is_compatible(&rhs) {
                Err(TypeError::IncompatibleUnits(format!(
                    "Cannot compare '{}' with '{}'.",
                    lhs, rhs
                )))
            } else {
                Ok(TypeSymbol::Boolean)
            }
        }
    }
}

fn numeric_units(
    op: BinaryOp,
    lhs: &TypeSymbol,
    rhs: &TypeSymbol,
) -> Result<(UnitType, UnitType), TypeError> {
    match (lhs.as_unit(), rhs.as_unit()) {
        (Some(l), Some(r)) => Ok((l, r)),
        _ => Err(TypeError::IncompatibleTypes(format!(
            "Operands of '{}' must be numeric, found '{}' and '{}'.",
            op.symbol(),
            lhs,
            rhs
        ))),
    }
}

/// Exponents add and scales multiply.
fn multiply(lhs: &TypeSymbol, rhs: &TypeSymbol) -> Result<TypeSymbol, TypeError> {
    if lhs.is_error() || rhs.is_error() {
        return Ok(TypeSymbol::Error);
    }
    let (lhs_unit, rhs_unit) = numeric_units(BinaryOp::Mul, lhs, rhs)?;
    if lhs.is_integer() && rhs.is_integer() {
        return Ok(TypeSymbol::Integer);
    }
    Ok(TypeSymbol::unit(lhs_unit.mul(&rhs_unit)))
}

/// The common type of two values that must agree in dimension; the left scale wins.
fn unify(lhs: TypeSymbol, rhs: TypeSymbol, context: &str) -> Result<TypeSymbol, TypeError> {
    if lhs.is_error() {
        return Ok(rhs.element().clone());
    }
    if rhs.is_error() {
        return Ok(lhs.element().clone());
    }
    let lhs = lhs.element().clone();
    let rhs = rhs.element().clone();
    if lhs.is_numeric() && rhs.is_numeric() {
        if !lhs.is_compatible(&rhs) {
            return Err(TypeError::IncompatibleUnits(format!(
                "Incompatible units in {}: '{}' and '{}'.",
                context, lhs, rhs
            )));
        }
        return Ok(match (&lhs, &rhs) {
            (TypeSymbol::Integer, TypeSymbol::Integer) => TypeSymbol::Integer,
            (TypeSymbol::Integer, _) => TypeSymbol::Real,
            _ => lhs,
        });
    }
    if lhs == rhs {
        Ok(lhs)
    } else {
        Err(TypeError::IncompatibleTypes(format!(
            "Incompatible types in {}: '{}' and '{}'.",
            context, lhs, rhs
        )))
    }
}
