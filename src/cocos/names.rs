use std::collections::HashMap;

use log::debug;

use crate::ast::{
    BodyElement, Declaration, EquationItem, Expr, ExprKind, Stmt, StmtKind, StringSpan,
    VariableRef,
};
use crate::error::{Diagnostic, ErrorCode};
use crate::symbols::{DeclSite, ScopeId, SymbolRef, VariableBlock, VariableSymbol};

use super::{statement_blocks, walk_stmts, CheckContext};

pub fn unique_names(ctx: &CheckContext) -> Vec<Diagnostic> {
    ctx.symbols
        .duplicates()
        .iter()
        .map(|issue| issue.error.clone().into_diagnostic(issue.span))
        .collect()
}

/// Warns about variables that shadow a physical unit, e.g. a state called `m` (metre).
pub fn variable_has_type_name(ctx: &CheckContext) -> Vec<Diagnostic> {
    let registry = ctx.symbols.registry();
    let mut diagnostics = Vec::new();
    for id in 0..ctx.symbols.num_scopes() {
        for symbol in ctx.symbols.scope(ScopeId(id)).symbols() {
            let var = match symbol.as_ref() {
                SymbolRef::Variable(var)
                    if !var.is_implicit && var.block != VariableBlock::Shape =>
                {
                    var
                }
                _ => continue,
            };
            if registry.lookup_unit(&var.name).is_some() {
                diagnostics.push(Diagnostic::warning(
                    ErrorCode::VariableHasTypeName,
                    format!("Variable '{}' has the same name as a physical unit.", var.name),
                    var.span,
                ));
            }
        }
    }
    diagnostics
}

/// Where a use sits relative to the declarations it may see.
#[derive(Clone, Copy)]
enum UseSite<'a> {
    /// Initializer of the declaration at `position` in the variable block at `block`.
    VarBlock {
        block: usize,
        position: usize,
        decl: &'a Declaration,
    },
    /// An equation alias.
    Alias(&'a Declaration),
    /// An invariant, which may mention the variable it constrains.
    Invariant,
    /// Inside the update block or a function body.
    Statement,
    Equations,
}

struct Resolver<'c, 'a> {
    ctx: &'c CheckContext<'a>,
    /// For each variable block, the position of the declaration that introduces each name.
    positions: HashMap<usize, HashMap<String, usize>>,
    diagnostics: Vec<Diagnostic>,
}

impl<'c, 'a> Resolver<'c, 'a> {
    fn check_use(
        &mut self,
        var: &VariableRef,
        scope: ScopeId,
        span: Option<StringSpan>,
        site: UseSite,
    ) {
        let symbol = match self.ctx.symbols.resolve_variable(var, scope) {
            Ok((SymbolRef::Variable(symbol), _)) => symbol,
            Ok(_) => return,
            Err(err) => {
                self.diagnostics.push(Diagnostic::error(
                    ErrorCode::UndefinedSymbol,
                    format!("Variable '{}' is not defined.", var.full_name()),
                    span,
                ));
                debug!("{}", err);
                return;
            }
        };
        let message = match site {
            UseSite::VarBlock {
                block,
                position,
                decl,
            } if symbol.site == DeclSite::VarBlock(block) => {
                let declared_at = self
                    .positions
                    .get(&block)
                    .and_then(|names| names.get(&symbol.name))
                    .copied();
                match declared_at {
                    Some(p) if p == position && var.order == 0 => {
                        Some(self_reference(symbol, decl))
                    }
                    Some(p) if p > position => Some(used_before_definition(symbol)),
                    _ => None,
                }
            }
            UseSite::Alias(decl)
                if symbol.block == VariableBlock::Alias && symbol.span == decl.span =>
            {
                Some(self_reference(symbol, decl))
            }
            UseSite::Statement if symbol.site == DeclSite::Statement => {
                match (symbol.span, span) {
                    (Some(declared), Some(used)) if declared.contains(&used) => Some((
                        ErrorCode::SelfReferentialInitializer,
                        format!("Variable '{}' is used in its own initializer.", symbol.name),
                    )),
                    (Some(declared), Some(used)) if declared.pos_start > used.pos_start => {
                        Some(used_before_definition(symbol))
                    }
                    _ => None,
                }
            }
            _ => None,
        };
        if let Some((code, message)) = message {
            self.diagnostics.push(Diagnostic::error(code, message, span));
        }
    }

    fn check_expr(&mut self, expr: &Expr, site: UseSite) {
        expr.visit(&mut |e| {
            if let ExprKind::Variable(var) = &e.kind {
                let scope = self.ctx.symbols.scope_of(e.id);
                self.check_use(var, scope, e.span, site);
            }
        });
    }
}

fn self_reference(symbol: &VariableSymbol, decl: &Declaration) -> (ErrorCode, String) {
    (
        ErrorCode::SelfReferentialInitializer,
        format!(
            "Variable '{}' is used in its own declaration '{}'.",
            symbol.name, decl
        ),
    )
}

fn used_before_definition(symbol: &VariableSymbol) -> (ErrorCode, String) {
    (
        ErrorCode::VariableNotDefinedBeforeUse,
        format!("Variable '{}' is used before it is defined.", symbol.name),
    )
}

/// Every used name resolves; uses follow their declaration within a block; no variable
/// appears in its own initializer. Also reports data types naming unknown units.
pub fn variables_defined(ctx: &CheckContext) -> Vec<Diagnostic> {
    let mut positions: HashMap<usize, HashMap<String, usize>> = HashMap::new();
    for (index, block) in ctx.model.var_blocks() {
        let names = positions.entry(index).or_default();
        for (position, decl) in block.declarations.iter().enumerate() {
            for name in decl.names.iter() {
                names.entry(name.full_name()).or_insert(position);
            }
        }
    }
    let mut resolver = Resolver {
        ctx,
        positions,
        diagnostics: ctx
            .symbols
            .unresolved_types()
            .iter()
            .map(|issue| issue.error.clone().into_diagnostic(issue.span))
            .collect(),
    };

    for (index, element) in ctx.model.body.iter().enumerate() {
        match element {
            BodyElement::Variables(block) => {
                for (position, decl) in block.declarations.iter().enumerate() {
                    let site = UseSite::VarBlock {
                        block: index,
                        position,
                        decl,
                    };
                    if let Some(expr) = &decl.expr {
                        resolver.check_expr(expr, site);
                    }
                    if let Some(invariant) = &decl.invariant {
                        resolver.check_expr(invariant, UseSite::Invariant);
                    }
                }
            }
            BodyElement::Equations(block) => {
                for item in block.items.iter() {
                    match item {
                        EquationItem::Alias(decl) => {
                            if let Some(expr) = &decl.expr {
                                resolver.check_expr(expr, UseSite::Alias(decl));
                            }
                            if let Some(invariant) = &decl.invariant {
                                resolver.check_expr(invariant, UseSite::Invariant);
                            }
                        }
                        EquationItem::Ode(ode) => resolver.check_expr(&ode.rhs, UseSite::Equations),
                        EquationItem::Shape(shape) => {
                            resolver.check_expr(&shape.rhs, UseSite::Equations)
                        }
                    }
                }
            }
            _ => {}
        }
    }

    for (block, _) in statement_blocks(ctx.model) {
        walk_stmts(block, &mut |stmt| {
            if let StmtKind::Assignment { target, .. } = &stmt.kind {
                let scope = match target.index.as_ref() {
                    Some(index) => ctx.symbols.scope_of(index.id),
                    None => stmt_scope(ctx, stmt),
                };
                resolver.check_use(target, scope, stmt.span, UseSite::Statement);
            }
            match &stmt.kind {
                StmtKind::Declaration(decl) => {
                    if let Some(expr) = &decl.expr {
                        resolver.check_expr(expr, UseSite::Statement);
                    }
                    if let Some(invariant) = &decl.invariant {
                        resolver.check_expr(invariant, UseSite::Invariant);
                    }
                }
                _ => for_each_stmt_expr(stmt, &mut |expr| {
                    resolver.check_expr(expr, UseSite::Statement)
                }),
            }
        });
    }
    resolver.diagnostics
}

/// The scope of a statement, found through the first expression it holds.
fn stmt_scope(ctx: &CheckContext, stmt: &Stmt) -> ScopeId {
    let mut scope = None;
    for_each_stmt_expr(stmt, &mut |expr| {
        scope.get_or_insert(ctx.symbols.scope_of(expr.id));
    });
    scope.unwrap_or_else(|| ctx.symbols.model_scope())
}

/// The outermost expressions held directly by `stmt`, not those of nested blocks.
pub(crate) fn for_each_stmt_expr<'a>(stmt: &'a Stmt, f: &mut dyn FnMut(&'a Expr)) {
    match &stmt.kind {
        StmtKind::Declaration(decl) => decl.exprs().for_each(f),
        StmtKind::Assignment { target, expr, .. } => {
            if let Some(index) = &target.index {
                f(index);
            }
            f(expr);
        }
        StmtKind::Call(expr) => f(expr),
        StmtKind::If { branches, .. } => branches.iter().for_each(|(cond, _)| f(cond)),
        StmtKind::For { from, to, .. } => {
            f(from);
            f(to);
        }
        StmtKind::While { cond, .. } => f(cond),
        StmtKind::Return(expr) => {
            if let Some(expr) = expr {
                f(expr);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cocos::test_utils::{codes, run_check};

    #[test]
    fn undefined_and_unknown_units() {
        const TEXT: &str = "
neuron undefined:
    parameters:
        tau ms = 10 ms
        E_L mV = E_x
        bad parsec = 1
        V_th mV = -55 mV [[V_th < 0 mV]]
    end
    update:
        y real = z
        w = 1
    end
end
";
        let diagnostics = run_check(TEXT, variables_defined);
        assert_eq!(
            codes(&diagnostics),
            vec![
                ErrorCode::UndefinedSymbol,
                ErrorCode::UndefinedSymbol,
                ErrorCode::UndefinedSymbol,
                ErrorCode::UndefinedSymbol
            ]
        );
        assert!(diagnostics[0].message.contains("parsec"));
        assert!(diagnostics[1].message.contains("E_x"));
        assert!(diagnostics[2].message.contains("'z'"));
        assert!(diagnostics[3].message.contains("'w'"));
    }

    #[test]
    fn definition_order_within_a_block() {
        const TEXT: &str = "
neuron ordering:
    parameters:
        a mV = b
        b mV = 1 mV
        c mV = c + 1 mV
    end
    internals:
        d mV = e_int
        e_int mV = a
    end
    state:
        x mV = d
    end
    update:
        p real = q
        q real = 1.0
        r real = r
    end
end
";
        let diagnostics = run_check(TEXT, variables_defined);
        assert_eq!(
            codes(&diagnostics),
            vec![
                ErrorCode::VariableNotDefinedBeforeUse,
                ErrorCode::SelfReferentialInitializer,
                ErrorCode::VariableNotDefinedBeforeUse,
                ErrorCode::VariableNotDefinedBeforeUse,
                ErrorCode::SelfReferentialInitializer,
            ]
        );
    }

    #[test]
    fn equations_are_mutually_visible() {
        const TEXT: &str = "
neuron mutual_equations:
    state:
        V_m mV = 0 mV
    end
    equations:
        function I_total pA = I_leak + 1 pA
        function I_leak pA = V_m / (1 GOhm)
        function I_self pA = I_self
        V_m' = I_total / (1 pF)
    end
end
";
        let diagnostics = run_check(TEXT, variables_defined);
        assert_eq!(codes(&diagnostics), vec![ErrorCode::SelfReferentialInitializer]);
    }

    #[test]
    fn shadowing_and_duplicates() {
        const TEXT: &str = "
neuron names:
    state:
        m real = 0
        h real = 0
        x real = 0
    end
    parameters:
        x real = 1
    end
    update:
        m integer = 1
    end
end
";
        let diagnostics = run_check(TEXT, unique_names);
        assert_eq!(codes(&diagnostics), vec![ErrorCode::DuplicateSymbol]);
        assert!(diagnostics[0].message.contains("'x'"));

        let warnings = run_check(TEXT, variable_has_type_name);
        assert_eq!(warnings.len(), 3);
        assert!(warnings.iter().all(|w| !w.is_error()));
    }
}
