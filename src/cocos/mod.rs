//! Context conditions: independent semantic checks over a model that has a symbol table
//! and a type table.
//!
//! Every check is a plain function from a read-only [`CheckContext`] to the diagnostics it
//! finds. Checks never stop at the first problem and never touch each other's codes, so the
//! registry can run them in parallel and still report in a fixed order.

use log::{debug, info};
use rayon::prelude::*;

use crate::ast::{Block, Expr, FunctionDef, Model, Stmt, StmtKind};
use crate::error::Diagnostic;
use crate::symbols::SymbolTable;
use crate::typing::TypeTable;

pub mod blocks;
pub mod expressions;
pub mod names;
pub mod statements;

pub struct CheckContext<'a> {
    pub model: &'a Model,
    pub symbols: &'a SymbolTable,
    pub types: &'a TypeTable,
}

impl<'a> CheckContext<'a> {
    pub fn new(model: &'a Model, symbols: &'a SymbolTable, types: &'a TypeTable) -> Self {
        Self {
            model,
            symbols,
            types,
        }
    }
}

pub type CheckFn = fn(&CheckContext) -> Vec<Diagnostic>;

#[derive(Clone, Copy)]
pub struct ContextCondition {
    pub name: &'static str,
    pub check: CheckFn,
}

impl ContextCondition {
    pub const fn new(name: &'static str, check: CheckFn) -> Self {
        Self { name, check }
    }
}

/// An ordered set of checks.
#[derive(Clone)]
pub struct ContextConditions {
    conditions: Vec<ContextCondition>,
}

impl Default for ContextConditions {
    fn default() -> Self {
        let mut conditions = Self::empty();
        for condition in [
            ContextCondition::new("unique_blocks", blocks::unique_blocks),
            ContextCondition::new("unique_names", names::unique_names),
            ContextCondition::new("variable_has_type_name", names::variable_has_type_name),
            ContextCondition::new("variables_defined", names::variables_defined),
            ContextCondition::new("declaration_types", expressions::declaration_types),
            ContextCondition::new("assignment_types", statements::assignment_types),
            ContextCondition::new("boolean_conditions", statements::boolean_conditions),
            ContextCondition::new("expression_types", expressions::expression_types),
            ContextCondition::new("functions_exist", expressions::functions_exist),
            ContextCondition::new("for_loops", statements::for_loops),
            ContextCondition::new("vector_declarations", expressions::vector_declarations),
            ContextCondition::new("function_bodies", statements::function_bodies),
            ContextCondition::new("equations", blocks::equations),
        ] {
            conditions.register(condition);
        }
        conditions
    }
}

impl ContextConditions {
    pub fn empty() -> Self {
        Self {
            conditions: Vec::new(),
        }
    }

    pub fn register(&mut self, condition: ContextCondition) {
        self.conditions.push(condition);
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.conditions.iter().map(|c| c.name)
    }

    pub fn len(&self) -> usize {
        self.conditions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Runs every check and concatenates the results in registration order.
    pub fn run(&self, ctx: &CheckContext) -> Vec<Diagnostic> {
        let per_check: Vec<Vec<Diagnostic>> = self
            .conditions
            .par_iter()
            .map(|condition| {
                let found = (condition.check)(ctx);
                if !found.is_empty() {
                    debug!("{}: {} diagnostics", condition.name, found.len());
                }
                found
            })
            .collect();
        let diagnostics: Vec<Diagnostic> = per_check.into_iter().flatten().collect();
        info!(
            "Ran {} context conditions on '{}': {} diagnostics",
            self.conditions.len(),
            ctx.model.name,
            diagnostics.len()
        );
        diagnostics
    }
}

/// The statement blocks of a model: the update block(s) and each function body.
pub(crate) fn statement_blocks(model: &Model) -> Vec<(&Block, Option<&FunctionDef>)> {
    let mut blocks: Vec<(&Block, Option<&FunctionDef>)> = model
        .update_blocks()
        .map(|update| (&update.block, None))
        .collect();
    blocks.extend(model.functions().map(|func| (&func.body, Some(func))));
    blocks
}

/// Calls `f` on every statement in `block`, nested ones included, in source order.
pub(crate) fn walk_stmts<'a>(block: &'a Block, f: &mut dyn FnMut(&'a Stmt)) {
    for stmt in block.stmts.iter() {
        f(stmt);
        match &stmt.kind {
            StmtKind::If {
                branches,
                otherwise,
            } => {
                for (_, body) in branches.iter() {
                    walk_stmts(body, f);
                }
                if let Some(body) = otherwise {
                    walk_stmts(body, f);
                }
            }
            StmtKind::For { body, .. } | StmtKind::While { body, .. } => walk_stmts(body, f),
            _ => {}
        }
    }
}

/// Every expression node in the model, in source order.
pub(crate) fn all_exprs(model: &Model) -> Vec<&Expr> {
    let mut exprs = Vec::new();
    model.for_each_root_expr(&mut |root| root.visit(&mut |e| exprs.push(e)));
    exprs
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::parser::parse_nestml_string;
    use crate::registry::Registry;
    use crate::typing::TypeChecker;

    #[test]
    fn results_follow_registry_order() {
        const TEXT: &str = "
neuron ordering:
    state:
        V_m mV = 0 mV
        V_m mV = 1 mV
    end
    update:
        if V_m:
            V_m = 1 ms
        end
    end
end
";
        let mut model = parse_nestml_string(TEXT).unwrap().remove(0);
        let symbols = SymbolTable::build(&mut model, Registry::new_shared());
        let types = TypeChecker::check_model(&model, &symbols);
        let ctx = CheckContext::new(&model, &symbols, &types);
        let conditions = ContextConditions::default();
        assert_eq!(conditions.names().next(), Some("unique_blocks"));
        let diagnostics = conditions.run(&ctx);
        let codes: Vec<ErrorCode> = diagnostics.iter().map(|d| d.code).collect();
        assert_eq!(
            codes,
            vec![
                ErrorCode::DuplicateSymbol,
                ErrorCode::IncompatibleUnits,
                ErrorCode::NonBooleanCondition
            ]
        );
        // running again gives the same answer
        assert_eq!(conditions.run(&ctx), diagnostics);
    }

    #[test]
    fn custom_registry() {
        fn always(_: &CheckContext) -> Vec<Diagnostic> {
            vec![Diagnostic::warning(
                ErrorCode::MissingEquation,
                "custom".to_string(),
                None,
            )]
        }
        let mut model = parse_nestml_string("neuron empty:\nend\n").unwrap().remove(0);
        let symbols = SymbolTable::build(&mut model, Registry::new_shared());
        let types = TypeChecker::check_model(&model, &symbols);
        let ctx = CheckContext::new(&model, &symbols, &types);
        let mut conditions = ContextConditions::empty();
        assert!(conditions.is_empty());
        conditions.register(ContextCondition::new("always", always));
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions.run(&ctx).len(), 1);
    }
}
