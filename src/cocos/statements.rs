use crate::ast::{AssignOp, Block, FunctionDef, Stmt, StmtKind};
use crate::error::{Diagnostic, ErrorCode};
use crate::symbols::{SymbolRef, TypeSymbol, VariableBlock};

use super::{statement_blocks, walk_stmts, CheckContext};

/// Assignments target a writable variable with a value of a compatible type.
pub fn assignment_types(ctx: &CheckContext) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    for (block, _) in statement_blocks(ctx.model) {
        walk_stmts(block, &mut |stmt| {
            let (target, op, expr) = match &stmt.kind {
                StmtKind::Assignment { target, op, expr } => (target, *op, expr),
                _ => return,
            };
            let scope = ctx.symbols.scope_of(expr.id);
            let (symbol, remaining) = match ctx.symbols.resolve_variable(target, scope) {
                Ok((SymbolRef::Variable(symbol), remaining)) => (symbol, remaining),
                Ok((other, _)) => {
                    let what = match other {
                        SymbolRef::Function(_) => "function",
                        _ => "unit",
                    };
                    diagnostics.push(Diagnostic::error(
                        ErrorCode::IllegalAssignment,
                        format!("Cannot assign to the {} '{}'.", what, target.full_name()),
                        stmt.span,
                    ));
                    return;
                }
                // reported as undefined
                Err(_) => return,
            };
            let read_only = match symbol.block {
                VariableBlock::Predefined => Some("predefined variable"),
                VariableBlock::Alias => Some("equation alias"),
                VariableBlock::InputBuffer(_) => Some("input buffer"),
                VariableBlock::Shape => Some("shape"),
                _ => None,
            };
            if let Some(what) = read_only {
                diagnostics.push(Diagnostic::error(
                    ErrorCode::IllegalAssignment,
                    format!("Cannot assign to the {} '{}'.", what, symbol.name),
                    stmt.span,
                ));
                return;
            }
            let target_type = match &target.index {
                Some(_) => symbol.type_symbol.element().clone(),
                None => symbol.type_symbol.clone(),
            };
            let target_type = ctx.symbols.derivative_type(&target_type, remaining);
            let value_type = match ctx.types.get(expr.id) {
                Some(Ok(ty)) => ty.clone(),
                _ => return,
            };
            let problem = match op {
                AssignOp::Assign | AssignOp::Add | AssignOp::Sub => value_type
                    .check_assignable(&target_type)
                    .err()
                    .map(|err| (err.code(), err.to_string())),
                AssignOp::Mul | AssignOp::Div
                    if !value_type.is_error() && !value_type.is_numeric_primitive() =>
                {
                    Some((
                        ErrorCode::IncompatibleUnits,
                        format!(
                            "Compound assignment '{}' needs a dimensionless factor, found '{}'.",
                            op.symbol(),
                            value_type
                        ),
                    ))
                }
                AssignOp::Mul | AssignOp::Div
                    if target_type.is_integer() && !value_type.is_integer() =>
                {
                    Some((
                        ErrorCode::IncompatibleTypes,
                        format!(
                            "Compound assignment '{}' of '{}' to the integer '{}'.",
                            op.symbol(),
                            value_type,
                            symbol.name
                        ),
                    ))
                }
                AssignOp::Mul | AssignOp::Div => None,
            };
            if let Some((code, message)) = problem {
                diagnostics.push(Diagnostic::error(
                    code,
                    format!("{} In the assignment to '{}'.", message, target.full_name()),
                    stmt.span,
                ));
            }
        });
    }
    diagnostics
}

/// `if`, `elif` and `while` conditions are boolean.
pub fn boolean_conditions(ctx: &CheckContext) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    for (block, _) in statement_blocks(ctx.model) {
        walk_stmts(block, &mut |stmt| {
            let conditions: Vec<_> = match &stmt.kind {
                StmtKind::If { branches, .. } => branches.iter().map(|(cond, _)| cond).collect(),
                StmtKind::While { cond, .. } => vec![cond],
                _ => return,
            };
            for cond in conditions {
                if let Some(Ok(ty)) = ctx.types.get(cond.id) {
                    if !ty.is_boolean() {
                        diagnostics.push(Diagnostic::error(
                            ErrorCode::NonBooleanCondition,
                            format!("The condition '{}' must be boolean, found '{}'.", cond, ty),
                            cond.span,
                        ));
                    }
                }
            }
        });
    }
    diagnostics
}

/// The loop variable is declared and numeric, the bounds are numeric in the variable's unit and
/// the step is non-zero.
pub fn for_loops(ctx: &CheckContext) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    for (block, _) in statement_blocks(ctx.model) {
        walk_stmts(block, &mut |stmt| {
            let (var, from, to, step) = match &stmt.kind {
                StmtKind::For {
                    var, from, to, step, ..
                } => (var, from, to, *step),
                _ => return,
            };
            let mut illegal = |message: String| {
                diagnostics.push(Diagnostic::error(ErrorCode::IllegalForLoop, message, stmt.span))
            };
            let scope = ctx.symbols.scope_of(from.id);
            let var_type = match ctx.symbols.resolve(var, scope) {
                Ok(SymbolRef::Variable(symbol)) if symbol.type_symbol.is_numeric() => {
                    Some(&symbol.type_symbol)
                }
                Ok(SymbolRef::Variable(symbol)) => {
                    illegal(format!(
                        "The loop variable '{}' must be numeric, found '{}'.",
                        var, symbol.type_symbol
                    ));
                    None
                }
                _ => {
                    illegal(format!("The loop variable '{}' is not declared.", var));
                    None
                }
            };
            for bound in [from, to] {
                let ty = match ctx.types.get(bound.id) {
                    Some(Ok(ty)) => ty,
                    _ => continue,
                };
                if !ty.is_numeric() {
                    illegal(format!(
                        "The loop bound '{}' must be numeric, found '{}'.",
                        bound, ty
                    ));
                } else if let Some(var_type) = var_type.filter(|v| !v.is_compatible(ty)) {
                    illegal(format!(
                        "The loop bound '{}' in '{}' does not match the loop variable '{}' in '{}'.",
                        bound, ty, var, var_type
                    ));
                }
            }
            if step == 0.0 {
                illegal(format!("The step of the loop over '{}' must not be zero.", var));
            }
        });
    }
    diagnostics
}

/// Whether every path through `block` reaches a `return`.
fn always_returns(block: &Block) -> bool {
    block.stmts.iter().any(|stmt| match &stmt.kind {
        StmtKind::Return(_) => true,
        StmtKind::If {
            branches,
            otherwise: Some(otherwise),
        } => branches.iter().all(|(_, body)| always_returns(body)) && always_returns(otherwise),
        _ => false,
    })
}

fn code_after_return(block: &Block, diagnostics: &mut Vec<Diagnostic>) {
    let mut returned = false;
    for stmt in block.stmts.iter() {
        if returned {
            diagnostics.push(Diagnostic::error(
                ErrorCode::CodeAfterReturn,
                "Unreachable code after a return statement.".to_string(),
                stmt.span,
            ));
            break;
        }
        match &stmt.kind {
            StmtKind::Return(_) => returned = true,
            StmtKind::If {
                branches,
                otherwise,
            } => {
                branches
                    .iter()
                    .for_each(|(_, body)| code_after_return(body, diagnostics));
                if let Some(body) = otherwise {
                    code_after_return(body, diagnostics);
                }
            }
            StmtKind::For { body, .. } | StmtKind::While { body, .. } => {
                code_after_return(body, diagnostics)
            }
            _ => {}
        }
    }
}

fn check_return(
    ctx: &CheckContext,
    stmt: &Stmt,
    func: Option<&FunctionDef>,
    expected: &TypeSymbol,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let value = match &stmt.kind {
        StmtKind::Return(value) => value,
        _ => return,
    };
    let owner = match func {
        Some(func) => format!("function '{}'", func.name),
        None => "update block".to_string(),
    };
    match value {
        Some(expr) if *expected == TypeSymbol::Void => diagnostics.push(Diagnostic::error(
            ErrorCode::IncompatibleTypes,
            format!("The {} does not return a value, but '{}' is returned.", owner, expr),
            stmt.span,
        )),
        Some(expr) => {
            if let Some(Ok(ty)) = ctx.types.get(expr.id) {
                if let Err(err) = ty.check_assignable(expected) {
                    diagnostics.push(Diagnostic::error(
                        err.code(),
                        format!("{} In the return value of the {}.", err, owner),
                        expr.span,
                    ));
                }
            }
        }
        None if *expected != TypeSymbol::Void && !expected.is_error() => {
            diagnostics.push(Diagnostic::error(
                ErrorCode::IncompatibleTypes,
                format!("The {} must return a value of type '{}'.", owner, expected),
                stmt.span,
            ))
        }
        None => {}
    }
}

/// Return statements match the declared return type, nothing follows a return, and
/// functions with a return type return on every path.
pub fn function_bodies(ctx: &CheckContext) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    for (block, func) in statement_blocks(ctx.model) {
        let expected = match func.and_then(|func| func.return_type.as_ref()) {
            Some(datatype) => ctx.symbols.type_of(datatype).unwrap_or(TypeSymbol::Error),
            None => TypeSymbol::Void,
        };
        code_after_return(block, &mut diagnostics);
        walk_stmts(block, &mut |stmt| {
            check_return(ctx, stmt, func, &expected, &mut diagnostics)
        });
        if let Some(func) = func {
            if expected != TypeSymbol::Void && !always_returns(block) {
                diagnostics.push(Diagnostic::error(
                    ErrorCode::MissingReturn,
                    format!(
                        "The function '{}' must return a value of type '{}' on every path.",
                        func.name, expected
                    ),
                    func.span,
                ));
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
    fn assignments() {
        const TEXT: &str = "
neuron assignments:
    state:
        V_m mV = 0 mV
        count integer = 0
    end
    equations:
        function I_total pA = 1 pA
    end
    input:
        spikes pA <- spike
    end
    update:
        V_m = -70 mV
        V_m += 1 ms
        V_m *= 2
        V_m *= 2 ms
        count = 1.5
        count *= 0.5
        t = 1 ms
        I_total = 2 pA
        spikes = 0 pA
        exp = 1
    end
end
";
        let diagnostics = run_check(TEXT, assignment_types);
        assert_eq!(
            codes(&diagnostics),
            vec![
                ErrorCode::IncompatibleUnits,
                ErrorCode::IncompatibleUnits,
                ErrorCode::IncompatibleTypes,
                ErrorCode::IncompatibleTypes,
                ErrorCode::IllegalAssignment,
                ErrorCode::IllegalAssignment,
                ErrorCode::IllegalAssignment,
                ErrorCode::IllegalAssignment,
            ]
        );
    }

    #[test]
    fn conditions() {
        const TEXT: &str = "
neuron conditions:
    state:
        V_m mV = 0 mV
        r integer = 0
    end
    update:
        if V_m > 10 mV:
            r = 1
        elif V_m:
            r = 2
        end
        while r:
            r -= 1
        end
        while r > 0 and r < 10:
            r -= 1
        end
    end
end
";
        let diagnostics = run_check(TEXT, boolean_conditions);
        assert_eq!(
            codes(&diagnostics),
            vec![ErrorCode::NonBooleanCondition, ErrorCode::NonBooleanCondition]
        );
        assert!(diagnostics[0].message.contains("V_m"));
    }

    #[test]
    fn loops() {
        const TEXT: &str = "
neuron loops:
    state:
        i integer = 0
        flag boolean = false
    end
    update:
        for i in 0 ... 10:
            flag = true
        end
        for j in 0 ... 10:
            flag = false
        end
        for flag in 0 ... 10:
            i = 1
        end
        for i in 0 ... 10 step 0:
            i = 1
        end
    end
end
";
        let diagnostics = run_check(TEXT, for_loops);
        assert_eq!(
            codes(&diagnostics),
            vec![
                ErrorCode::IllegalForLoop,
                ErrorCode::IllegalForLoop,
                ErrorCode::IllegalForLoop
            ]
        );
        assert!(diagnostics[0].message.contains("'j'"));
        assert!(diagnostics[2].message.contains("zero"));
    }

    #[test]
    fn loop_bounds_match_the_variable() {
        const TEXT: &str = "
neuron loop_units:
    state:
        V_m mV = 0 mV
        x real = 0
    end
    update:
        for V_m in 0 ... 5:
            x = 1
        end
        for V_m in 0 mV ... 5 mV:
            x = 2
        end
        for x in 0 ... 5:
            V_m = 1 mV
        end
    end
end
";
        let diagnostics = run_check(TEXT, for_loops);
        assert_eq!(
            codes(&diagnostics),
            vec![ErrorCode::IllegalForLoop, ErrorCode::IllegalForLoop]
        );
        assert!(diagnostics[0].message.contains("'0'"));
        assert!(diagnostics[0].message.contains("'V_m' in 'mV'"));
        assert!(diagnostics[1].message.contains("'5'"));
    }

    #[test]
    fn function_returns() {
        const TEXT: &str = "
neuron functions:
    update:
        x real = 1
        return
    end
    function good(a real) real:
        if a > 0:
            return a
        else:
            return -a
        end
    end
    function missing(a real) real:
        if a > 0:
            return a
        end
    end
    function unreachable(a mV) mV:
        return a
        a = 2 mV
    end
    function wrong(a mV) ms:
        return a
    end
    function nothing():
        return 1
    end
end
";
        let diagnostics = run_check(TEXT, function_bodies);
        assert_eq!(
            codes(&diagnostics),
            vec![
                ErrorCode::MissingReturn,
                ErrorCode::CodeAfterReturn,
                ErrorCode::IncompatibleUnits,
                ErrorCode::IncompatibleTypes,
            ]
        );
    }
}
