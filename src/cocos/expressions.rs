use itertools::Itertools;

use crate::ast::{Declaration, ExprKind, StmtKind};
use crate::error::{Diagnostic, ErrorCode};
use crate::symbols::SymbolRef;
use crate::typing::TypeError;

use super::{all_exprs, statement_blocks, walk_stmts, CheckContext};

/// Declarations of the variable blocks, the equation aliases and the statement locals.
fn declarations<'a>(ctx: &CheckContext<'a>) -> Vec<&'a Declaration> {
    let mut decls: Vec<&Declaration> = ctx
        .model
        .var_blocks()
        .flat_map(|(_, block)| block.declarations.iter())
        .collect();
    decls.extend(ctx.model.aliases());
    for (block, _) in statement_blocks(ctx.model) {
        walk_stmts(block, &mut |stmt| {
            if let StmtKind::Declaration(decl) = &stmt.kind {
                decls.push(decl);
            }
        });
    }
    decls
}

fn names_of(decl: &Declaration) -> String {
    decl.names.iter().map(|n| n.full_name()).join(", ")
}

/// Initializers must be assignable to the declared type and invariants must be boolean.
pub fn declaration_types(ctx: &CheckContext) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    for decl in declarations(ctx) {
        let declared = match ctx.symbols.type_of(&decl.datatype) {
            Ok(ty) => ty,
            Err(_) => continue,
        };
        if let Some(expr) = &decl.expr {
            if let Some(Ok(ty)) = ctx.types.get(expr.id) {
                if let Err(err) = ty.check_assignable(&declared) {
                    diagnostics.push(Diagnostic::error(
                        err.code(),
                        format!("{} In the declaration of '{}'.", err, names_of(decl)),
                        expr.span.or(decl.span),
                    ));
                }
            }
        }
        if let Some(invariant) = &decl.invariant {
            if let Some(Ok(ty)) = ctx.types.get(invariant.id) {
                if !ty.is_boolean() {
                    diagnostics.push(Diagnostic::error(
                        ErrorCode::NonBooleanCondition,
                        format!(
                            "The invariant of '{}' must be boolean, found '{}'.",
                            names_of(decl),
                            ty
                        ),
                        invariant.span,
                    ));
                }
            }
        }
    }
    diagnostics
}

fn type_errors(ctx: &CheckContext, select: fn(&TypeError) -> bool) -> Vec<Diagnostic> {
    all_exprs(ctx.model)
        .into_iter()
        .filter_map(|expr| match ctx.types.get(expr.id) {
            Some(Err(err)) if select(err) => Some(Diagnostic::error(
                err.code(),
                err.to_string(),
                expr.span,
            )),
            _ => None,
        })
        .collect()
}

/// Operator errors found while inferring types.
pub fn expression_types(ctx: &CheckContext) -> Vec<Diagnostic> {
    type_errors(ctx, |err| !matches!(err, TypeError::FunctionDoesNotExist { .. }))
}

/// Calls to unknown functions or with arguments that match no signature.
pub fn functions_exist(ctx: &CheckContext) -> Vec<Diagnostic> {
    type_errors(ctx, |err| matches!(err, TypeError::FunctionDoesNotExist { .. }))
}

/// A vector may only be used whole in the declaration of another vector.
pub fn vector_declarations(ctx: &CheckContext) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    for decl in declarations(ctx).into_iter().filter(|decl| decl.size.is_none()) {
        let expr = match &decl.expr {
            Some(expr) => expr,
            None => continue,
        };
        for used in expr.variables() {
            let var = match &used.kind {
                ExprKind::Variable(var) if var.index.is_none() => var,
                _ => continue,
            };
            let scope = ctx.symbols.scope_of(used.id);
            if let Ok((SymbolRef::Variable(symbol), _)) = ctx.symbols.resolve_variable(var, scope) {
                if symbol.is_vector() {
                    diagnostics.push(Diagnostic::error(
                        ErrorCode::VectorVariableInNonVectorDeclaration,
                        format!(
                            "Vector variable '{}' is used in the declaration of the non-vector variable '{}'.",
                            symbol.name,
                            names_of(decl)
                        ),
                        used.span,
                    ));
                }
            }
        }
    }
    diagnostics
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cocos::test_utils::{codes, run_check};

    #[test]
    fn initializers_match_declared_types() {
        const TEXT: &str = "
neuron declarations:
    parameters:
        tau ms = 10 ms
        C_m pF = 250 pF
        E_L mV = -70 mV
        bad_unit mV = 10 ms
        bad_cast mV = 10
        ok_widen real = 1
        bad_narrow integer = 1.5
        scaled mV = 0.07 V
        bounded mV = -55 mV [[bounded < 0 mV]]
        strange mV = -55 mV [[bounded + 1 mV]]
    end
end
";
        let diagnostics = run_check(TEXT, declaration_types);
        assert_eq!(
            codes(&diagnostics),
            vec![
                ErrorCode::IncompatibleUnits,
                ErrorCode::IncompatibleUnits,
                ErrorCode::IncompatibleTypes,
                ErrorCode::NonBooleanCondition
            ]
        );
        assert!(diagnostics[0].message.contains("bad_unit"));
        assert!(diagnostics[1].message.contains("Implicit cast"));
    }

    #[test]
    fn operator_and_call_errors_are_split() {
        const TEXT: &str = "
neuron operators:
    state:
        V_m mV = 0 mV
    end
    update:
        a mV = V_m + 1 ms
        b real = exp(V_m)
        c real = unknown_function(1)
        d boolean = V_m > 1 ms
    end
end
";
        let operators = run_check(TEXT, expression_types);
        assert_eq!(
            codes(&operators),
            vec![ErrorCode::IncompatibleUnits, ErrorCode::IncompatibleUnits]
        );
        let calls = run_check(TEXT, functions_exist);
        assert_eq!(
            codes(&calls),
            vec![ErrorCode::FunctionDoesNotExist, ErrorCode::FunctionDoesNotExist]
        );
        assert!(calls[0].message.contains("exp"));
        assert!(calls[0].message.contains("(mV)"));
        // the failing initializers are not reported again
        assert!(run_check(TEXT, declaration_types).is_empty());
    }

    #[test]
    fn vectors_in_scalar_declarations() {
        const TEXT: &str = "
neuron vectors:
    parameters:
        n_receptors integer = 2
        tau_syn ms [n_receptors] = 2 ms
        first ms = tau_syn[0]
        whole ms = tau_syn
        copy ms [n_receptors] = tau_syn
    end
    input:
        spikes [n_receptors] pA <- spike
    end
    update:
        x pA = spikes
    end
end
";
        let diagnostics = run_check(TEXT, vector_declarations);
        assert_eq!(
            codes(&diagnostics),
            vec![
                ErrorCode::VectorVariableInNonVectorDeclaration,
                ErrorCode::VectorVariableInNonVectorDeclaration
            ]
        );
        assert!(diagnostics[0].message.contains("whole"));
        assert!(diagnostics[1].message.contains("'x'"));
    }
}
