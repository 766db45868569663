use std::collections::HashMap;

use crate::ast::{BlockKind, Expr, StringSpan, VariableName};
use crate::error::{Diagnostic, ErrorCode};
use crate::symbols::{TypeSymbol, VariableBlock};

use super::CheckContext;

/// Each kind of block occurs at most once per model.
pub fn unique_blocks(ctx: &CheckContext) -> Vec<Diagnostic> {
    let mut seen: HashMap<BlockKind, usize> = HashMap::new();
    let mut diagnostics = Vec::new();
    for element in ctx.model.body.iter() {
        let kind = match element.block_kind() {
            Some(kind) => kind,
            None => continue,
        };
        let count = seen.entry(kind).or_insert(0);
        *count += 1;
        if *count == 2 {
            diagnostics.push(Diagnostic::error(
                ErrorCode::MultipleBlocks,
                format!(
                    "The {} block is defined more than once in '{}'.",
                    kind, ctx.model.name
                ),
                element.span(),
            ));
        }
    }
    diagnostics
}

fn uses_itself(lhs: &VariableName, rhs: &Expr) -> bool {
    rhs.variables().iter().any(|e| {
        e.as_variable()
            .map(|var| var.name == lhs.name && var.order == 0)
            .unwrap_or(false)
    })
}

/// Checks the right-hand side type of an equation against `type(lhs) / s^order`.
fn check_units(
    ctx: &CheckContext,
    lhs: &VariableName,
    base: &TypeSymbol,
    rhs: &Expr,
    span: Option<StringSpan>,
) -> Option<Diagnostic> {
    let expected = ctx.symbols.derivative_type(base, lhs.order);
    match ctx.types.get(rhs.id) {
        Some(Ok(found)) if !found.is_compatible(&expected) => Some(Diagnostic::error(
            ErrorCode::IncompatibleUnits,
            format!(
                "The right-hand side of '{}' has type '{}', which is not compatible with '{}'.",
                lhs, found, expected
            ),
            span,
        )),
        _ => None,
    }
}

/// Equation targets are state variables of order at most two, the right-hand side has
/// the unit of the left-hand side, and order-0 equations do not refer to themselves.
pub fn equations(ctx: &CheckContext) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    for ode in ctx.model.odes() {
        if ode.lhs.order > 2 {
            diagnostics.push(Diagnostic::error(
                ErrorCode::DerivativeOrderTooHigh,
                format!(
                    "The equation for '{}' has order {}; at most 2 is supported.",
                    ode.lhs, ode.lhs.order
                ),
                ode.span,
            ));
            continue;
        }
        let target = ctx
            .symbols
            .variable(&ode.lhs.name)
            .filter(|var| var.block == VariableBlock::State && !var.is_implicit);
        let target = match target {
            Some(target) => target,
            None => {
                diagnostics.push(Diagnostic::error(
                    ErrorCode::IllegalEquationTarget,
                    format!(
                        "The equation target '{}' is not declared in the state block.",
                        ode.lhs.name
                    ),
                    ode.span,
                ));
                continue;
            }
        };
        if ode.lhs.order == 0 && uses_itself(&ode.lhs, &ode.rhs) {
            diagnostics.push(Diagnostic::error(
                ErrorCode::SelfReferentialInitializer,
                format!("The equation for '{}' refers to itself.", ode.lhs),
                ode.span,
            ));
            continue;
        }
        diagnostics.extend(check_units(ctx, &ode.lhs, &target.type_symbol, &ode.rhs, ode.span));
    }

    for shape in ctx.model.shapes() {
        if shape.lhs.order > 2 {
            diagnostics.push(Diagnostic::error(
                ErrorCode::DerivativeOrderTooHigh,
                format!(
                    "The shape '{}' has order {}; at most 2 is supported.",
                    shape.lhs, shape.lhs.order
                ),
                shape.span,
            ));
            continue;
        }
        if shape.lhs.order == 0 && uses_itself(&shape.lhs, &shape.rhs) {
            diagnostics.push(Diagnostic::error(
                ErrorCode::SelfReferentialInitializer,
                format!("The shape '{}' refers to itself.", shape.lhs),
                shape.span,
            ));
            continue;
        }
        diagnostics.extend(check_units(ctx, &shape.lhs, &TypeSymbol::Real, &shape.rhs, shape.span));
    }
    diagnostics
}
