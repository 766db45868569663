use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, info};
use thiserror::Error;

use crate::ast::{
    with_primes, Block, BodyElement, BufferKind, DataType, DataTypeKind, Declaration,
    EquationItem, Expr, ExprId, ExprKind, Model, StmtKind, StringSpan, VarBlockKind, VariableRef,
};
use crate::error::{Diagnostic, ErrorCode};
use crate::registry::Registry;
use crate::units::UnitType;

use super::{
    DeclSite, FunctionSymbol, ParamKind, ReturnKind, Scope, ScopeId, ScopeKind, Symbol,
    SymbolRef, TypeSymbol, VariableBlock, VariableSymbol,
};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SymbolError {
    #[error("The symbol '{0}' is not defined.")]
    UndefinedSymbol(String),
    #[error("The unit '{0}' is not defined.")]
    UndefinedUnit(String),
    #[error("Variable '{name}' defined multiple times in the {block} block.")]
    DuplicateSymbol { name: String, block: String },
}

impl SymbolError {
    pub fn code(&self) -> ErrorCode {
        match self {
            SymbolError::UndefinedSymbol(_) | SymbolError::UndefinedUnit(_) => {
                ErrorCode::UndefinedSymbol
            }
            SymbolError::DuplicateSymbol { .. } => ErrorCode::DuplicateSymbol,
        }
    }

    pub fn into_diagnostic(self, span: Option<StringSpan>) -> Diagnostic {
        Diagnostic::error(self.code(), self.to_string(), span)
    }
}

/// A declaration problem found while building the table; reported later by the checks.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildIssue {
    pub error: SymbolError,
    pub span: Option<StringSpan>,
}

impl From<VarBlockKind> for VariableBlock {
    fn from(kind: VarBlockKind) -> Self {
        match kind {
            VarBlockKind::State => VariableBlock::State,
            VarBlockKind::Parameters => VariableBlock::Parameter,
            VarBlockKind::Internals => VariableBlock::Internal,
        }
    }
}

/// Scope tree and symbols of one model.
pub struct SymbolTable {
    registry: Arc<Registry>,
    scopes: Vec<Scope>,
    model_scope: ScopeId,
    expr_scopes: HashMap<ExprId, ScopeId>,
    next_expr_id: usize,
    duplicates: Vec<BuildIssue>,
    unresolved_types: Vec<BuildIssue>,
}

impl SymbolTable {
    fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            scopes: vec![Scope::new(None, ScopeKind::Model)],
            model_scope: ScopeId(0),
            expr_scopes: HashMap::new(),
            next_expr_id: 0,
            duplicates: Vec::new(),
            unresolved_types: Vec::new(),
        }
    }

    /// Builds the scope tree for `model`, numbering its expressions and storing scope ids in its
    /// blocks.
    ///
    /// Never fails: duplicate declarations and unknown units are recorded and surface as
    /// diagnostics when the context conditions run.
    pub fn build(model: &mut Model, registry: Arc<Registry>) -> SymbolTable {
        let mut table = SymbolTable::new(registry);
        let model_scope = table.model_scope;
        model.scope = Some(model_scope);

        let mut next = 0;
        model.for_each_expr_mut(&mut |expr| {
            expr.id = ExprId(next);
            next += 1;
        });
        table.next_expr_id = next;

        for index in 0..model.body.len() {
            table.declare_element(&model.body[index], index);
        }
        table.declare_implicit_derivatives(model);
        for element in model.body.iter_mut() {
            match element {
                BodyElement::Update(update) => {
                    let scope = table.new_scope(model_scope, ScopeKind::Update);
                    table.walk_block(&mut update.block, scope);
                }
                BodyElement::Function(def) => {
                    let scope = table.new_scope(model_scope, ScopeKind::Function(def.name.clone()));
                    for param in def.params.iter() {
                        let ty = table.declared_type(&param.datatype);
                        let mut symbol = VariableSymbol::new(
                            &param.name,
                            ty,
                            VariableBlock::Local,
                            DeclSite::Statement,
                        );
                        symbol.span = param.span;
                        table.insert(scope, Symbol::Variable(symbol), "function parameter");
                    }
                    table.walk_block(&mut def.body, scope);
                }
                _ => {}
            }
        }

        info!(
            "Built symbol table for '{}': {} scopes, {} model symbols, {} expressions",
            model.name,
            table.scopes.len(),
            table.scopes[model_scope.0].len(),
            table.next_expr_id
        );
        table
    }

    fn new_scope(&mut self, parent: ScopeId, kind: ScopeKind) -> ScopeId {
        self.scopes.push(Scope::new(Some(parent), kind));
        ScopeId(self.scopes.len() - 1)
    }

    fn insert(&mut self, scope: ScopeId, symbol: Symbol, block: &str) {
        if let Err(symbol) = self.scopes[scope.0].insert(symbol) {
            debug!("Duplicate declaration of '{}'", symbol.name());
            self.duplicates.push(BuildIssue {
                error: SymbolError::DuplicateSymbol {
                    name: symbol.name().to_string(),
                    block: block.to_string(),
                },
                span: symbol.span(),
            });
        }
    }

    fn record_expr(&mut self, expr: &Expr, scope: ScopeId) {
        expr.visit(&mut |e| {
            self.expr_scopes.insert(e.id, scope);
        });
    }

    /// Resolves a data type without recording unknown units.
    pub fn type_of(&self, datatype: &DataType) -> Result<TypeSymbol, SymbolError> {
        match &datatype.kind {
            DataTypeKind::Integer => Ok(TypeSymbol::Integer),
            DataTypeKind::Real => Ok(TypeSymbol::Real),
            DataTypeKind::Boolean => Ok(TypeSymbol::Boolean),
            DataTypeKind::String => Ok(TypeSymbol::String),
            DataTypeKind::Void => Ok(TypeSymbol::Void),
            DataTypeKind::Unit(unit) => self
                .registry
                .unit_of(unit)
                .map(TypeSymbol::unit)
                .map_err(SymbolError::UndefinedUnit),
        }
    }

    fn declared_type(&mut self, datatype: &DataType) -> TypeSymbol {
        match self.type_of(datatype) {
            Ok(ty) => ty,
            Err(error) => {
                self.unresolved_types.push(BuildIssue {
                    error,
                    span: datatype.span,
                });
                TypeSymbol::Error
            }
        }
    }

    fn declare_variables(
        &mut self,
        scope: ScopeId,
        decl: &Declaration,
        block: VariableBlock,
        site: DeclSite,
    ) {
        let mut ty = self.declared_type(&decl.datatype);
        if let Some(size) = &decl.size {
            ty = TypeSymbol::vector(ty, size);
        }
        for name in decl.names.iter() {
            let symbol = VariableSymbol {
                name: name.full_name(),
                type_symbol: ty.clone(),
                block,
                initializer: decl.expr.clone(),
                invariant: decl.invariant.clone(),
                vector_size: decl.size.clone(),
                site,
                is_recordable: decl.is_recordable,
                is_implicit: false,
                span: decl.span,
            };
            self.insert(scope, Symbol::Variable(symbol), &block.to_string());
        }
    }

    fn declare_element(&mut self, element: &BodyElement, index: usize) {
        let scope = self.model_scope;
        match element {
            BodyElement::Variables(block) => {
                for decl in block.declarations.iter() {
                    decl.exprs().for_each(|e| self.record_expr(e, scope));
                    let site = DeclSite::VarBlock(index);
                    self.declare_variables(scope, decl, block.kind.into(), site);
                }
            }
            BodyElement::Equations(block) => {
                let mut shape_orders: HashMap<String, Vec<u32>> = HashMap::new();
                for item in block.items.iter() {
                    match item {
                        EquationItem::Alias(decl) => {
                            decl.exprs().for_each(|e| self.record_expr(e, scope));
                            self.declare_variables(
                                scope,
                                decl,
                                VariableBlock::Alias,
                                DeclSite::Equations,
                            );
                        }
                        EquationItem::Ode(ode) => self.record_expr(&ode.rhs, scope),
                        EquationItem::Shape(shape) => {
                            self.record_expr(&shape.rhs, scope);
                            let orders = shape_orders.entry(shape.lhs.name.clone()).or_default();
                            let order = shape.lhs.order;
                            let clash = orders.contains(&order)
                                || (order == 0 && !orders.is_empty())
                                || (order > 0 && orders.contains(&0));
                            if clash {
                                self.duplicates.push(BuildIssue {
                                    error: SymbolError::DuplicateSymbol {
                                        name: shape.lhs.full_name(),
                                        block: "equations".to_string(),
                                    },
                                    span: shape.span,
                                });
                                continue;
                            }
                            orders.push(order);
                            for i in 0..order.max(1) {
                                let name = with_primes(&shape.lhs.name, i);
                                if i > 0 && self.scopes[scope.0].contains(&name) {
                                    continue;
                                }
                                let mut symbol = VariableSymbol::new(
                                    &name,
                                    self.per_time(&TypeSymbol::Real, i),
                                    VariableBlock::Shape,
                                    DeclSite::Equations,
                                );
                                symbol.is_implicit = i > 0;
                                symbol.span = shape.span;
                                self.insert(scope, Symbol::Variable(symbol), "equations");
                            }
                        }
                    }
                }
            }
            BodyElement::Input(block) => {
                for port in block.ports.iter() {
                    let mut ty = match (&port.datatype, port.kind) {
                        (Some(datatype), _) => self.declared_type(datatype),
                        (None, BufferKind::Spike) => TypeSymbol::Real,
                        (None, BufferKind::Current) => self
                            .registry
                            .lookup_unit("pA")
                            .map(TypeSymbol::unit)
                            .unwrap_or(TypeSymbol::Error),
                    };
                    if let Some(size) = &port.size {
                        ty = TypeSymbol::vector(ty, size);
                    }
                    let mut symbol = VariableSymbol::new(
                        &port.name,
                        ty,
                        VariableBlock::InputBuffer(port.kind),
                        DeclSite::Input,
                    );
                    symbol.vector_size = port.size.clone();
                    symbol.span = port.span;
                    self.insert(scope, Symbol::Variable(symbol), "input");
                }
            }
            BodyElement::Function(def) => {
                let params = def
                    .params
                    .iter()
                    .map(|p| {
                        ParamKind::Exact(self.type_of(&p.datatype).unwrap_or(TypeSymbol::Error))
                    })
                    .collect();
                let return_type = match &def.return_type {
                    Some(datatype) => self.declared_type(datatype),
                    None => TypeSymbol::Void,
                };
                let symbol = FunctionSymbol {
                    name: def.name.clone(),
                    params,
                    return_kind: ReturnKind::Fixed(return_type),
                    body: Some(def.body.clone()),
                    span: def.span,
                };
                self.insert(scope, Symbol::Function(symbol), "function");
            }
            BodyElement::Output(_) | BodyElement::Update(_) => {}
        }
    }

    /// `ty / s^order`
    fn per_time(&self, ty: &TypeSymbol, order: u32) -> TypeSymbol {
        if order == 0 {
            return ty.clone();
        }
        match ty.as_unit() {
            Some(unit) => {
                TypeSymbol::unit(unit.div(&self.registry.second().powi(order as i32)))
            }
            None => TypeSymbol::Error,
        }
    }

    /// Adds the lower-order states `x'`, ... implied by equations such as `x'' = ...`.
    fn declare_implicit_derivatives(&mut self, model: &Model) {
        let scope = self.model_scope;
        for ode in model.odes() {
            if ode.lhs.order < 2 {
                continue;
            }
            let base = match self.scopes[scope.0].get(&ode.lhs.name) {
                Some(Symbol::Variable(var)) if var.block == VariableBlock::State => var.clone(),
                _ => continue,
            };
            for i in 1..ode.lhs.order {
                let name = with_primes(&ode.lhs.name, i);
                if self.scopes[scope.0].contains(&name) {
                    continue;
                }
                let mut symbol = VariableSymbol::new(
                    &name,
                    self.per_time(&base.type_symbol, i),
                    VariableBlock::State,
                    base.site,
                );
                symbol.is_implicit = true;
                symbol.span = ode.span;
                debug!("Implicit state '{}' for '{}'", name, ode.lhs.full_name());
                self.insert(scope, Symbol::Variable(symbol), "state");
            }
        }
    }

    fn walk_block(&mut self, block: &mut Block, scope: ScopeId) {
        block.scope = Some(scope);
        for stmt in block.stmts.iter_mut() {
            match &mut stmt.kind {
                StmtKind::Declaration(decl) => {
                    decl.exprs().for_each(|e| self.record_expr(e, scope));
                    self.declare_variables(scope, decl, VariableBlock::Local, DeclSite::Statement);
                }
                StmtKind::Assignment { target, expr, .. } => {
                    if let Some(index) = &target.index {
                        self.record_expr(index, scope);
                    }
                    self.record_expr(expr, scope);
                }
                StmtKind::Call(expr) => self.record_expr(expr, scope),
                StmtKind::Return(expr) => {
                    if let Some(expr) = expr {
                        self.record_expr(expr, scope);
                    }
                }
                StmtKind::If {
                    branches,
                    otherwise,
                } => {
                    for (cond, body) in branches.iter_mut() {
                        self.record_expr(cond, scope);
                        let child = self.new_scope(scope, ScopeKind::Block);
                        self.walk_block(body, child);
                    }
                    if let Some(body) = otherwise {
                        let child = self.new_scope(scope, ScopeKind::Block);
                        self.walk_block(body, child);
                    }
                }
                StmtKind::For { from, to, body, .. } => {
                    self.record_expr(from, scope);
                    self.record_expr(to, scope);
                    let child = self.new_scope(scope, ScopeKind::Block);
                    self.walk_block(body, child);
                }
                StmtKind::While { cond, body } => {
                    self.record_expr(cond, scope);
                    let child = self.new_scope(scope, ScopeKind::Block);
                    self.walk_block(body, child);
                }
            }
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn model_scope(&self) -> ScopeId {
        self.model_scope
    }

    pub fn scope(&self, id: ScopeId) -> &Scope {
        &self.scopes[id.0]
    }

    pub fn num_scopes(&self) -> usize {
        self.scopes.len()
    }

    /// The scope an expression was declared in; the model scope for expressions added after the
    /// build.
    pub fn scope_of(&self, expr: ExprId) -> ScopeId {
        self.expr_scopes
            .get(&expr)
            .copied()
            .unwrap_or(self.model_scope)
    }

    pub fn duplicates(&self) -> &[BuildIssue] {
        &self.duplicates
    }

    pub fn unresolved_types(&self) -> &[BuildIssue] {
        &self.unresolved_types
    }

    /// Finds the innermost symbol called `name` visible from `scope`, falling back to the registry.
    pub fn resolve(&self, name: &str, scope: ScopeId) -> Result<SymbolRef<'_>, SymbolError> {
        let mut current = Some(scope);
        while let Some(id) = current {
            let scope = &self.scopes[id.0];
            if let Some(symbol) = scope.get(name) {
                return Ok(symbol.as_ref());
            }
            current = scope.parent();
        }
        self.registry
            .resolve(name)
            .ok_or_else(|| SymbolError::UndefinedSymbol(name.to_string()))
    }

    /// Resolves a possibly differentiated variable reference.
    ///
    /// `x''` resolves to a symbol named `x''` if there is one, then `x'`, then `x`. The second
    /// element of the result is the number of derivatives still to apply to the symbol found.
    pub fn resolve_variable(
        &self,
        var: &VariableRef,
        scope: ScopeId,
    ) -> Result<(SymbolRef<'_>, u32), SymbolError> {
        for primes in (0..=var.order).rev() {
            if let Ok(symbol) = self.resolve(&with_primes(&var.name, primes), scope) {
                return Ok((symbol, var.order - primes));
            }
        }
        Err(SymbolError::UndefinedSymbol(var.full_name()))
    }

    /// A variable declared at model level.
    pub fn variable(&self, name: &str) -> Option<&VariableSymbol> {
        match self.scopes[self.model_scope.0].get(name) {
            Some(Symbol::Variable(var)) => Some(var),
            _ => None,
        }
    }

    /// Model-level variables in declaration order.
    pub fn model_variables(&self) -> impl Iterator<Item = &VariableSymbol> {
        self.scopes[self.model_scope.0]
            .symbols()
            .filter_map(|symbol| match symbol {
                Symbol::Variable(var) => Some(var),
                _ => None,
            })
    }

    /// Unit type of `ty / s^order`, for derivatives.
    pub fn derivative_type(&self, ty: &TypeSymbol, order: u32) -> TypeSymbol {
        self.per_time(ty, order)
    }

    pub fn second(&self) -> UnitType {
        self.registry.second()
    }

    /// Appends `decl` to the first `kind` block of `model`, then re-resolves the names in that
    /// block only.
    pub fn add_declaration(
        &mut self,
        model: &mut Model,
        kind: VarBlockKind,
        mut decl: Declaration,
    ) -> Vec<Diagnostic> {
        let index = model.ensure_var_block(kind);
        let scope = self.model_scope;

        let mut next = self.next_expr_id;
        decl.for_each_expr_mut(&mut |expr| {
            expr.id = ExprId(next);
            next += 1;
        });
        self.next_expr_id = next;
        decl.exprs().for_each(|e| self.record_expr(e, scope));

        let known_duplicates = self.duplicates.len();
        self.declare_variables(scope, &decl, kind.into(), DeclSite::VarBlock(index));
        debug!("Added declaration '{}' to the {} block", decl, kind);
        if let BodyElement::Variables(block) = &mut model.body[index] {
            block.declarations.push(decl);
        }

        let mut diagnostics: Vec<Diagnostic> = self.duplicates[known_duplicates..]
            .iter()
            .map(|issue| issue.error.clone().into_diagnostic(issue.span))
            .collect();
        diagnostics.extend(self.resolve_block(model, index));
        diagnostics
    }

    /// Checks that every name used in the body element at `index` resolves.
    pub fn resolve_block(&self, model: &Model, index: usize) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();
        let mut check = |expr: &Expr| {
            expr.visit(&mut |e| {
                let scope = self.scope_of(e.id);
                let result = match &e.kind {
                    ExprKind::Variable(var) => self.resolve_variable(var, scope).map(|_| ()),
                    ExprKind::Call { name, .. } => self.resolve(name, scope).map(|_| ()),
                    _ => Ok(()),
                };
                if let Err(error) = result {
                    diagnostics.push(error.into_diagnostic(e.span));
                }
            })
        };
        if let Some(BodyElement::Variables(block)) = model.body.get(index) {
            for decl in block.declarations.iter() {
                decl.exprs().for_each(&mut check);
            }
        }
        diagnostics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{DataTypeKind, UnitExpr};
    use crate::parser::parse_nestml_string;

    fn build(text: &str) -> (Model, SymbolTable) {
        let mut model = parse_nestml_string(text).unwrap().remove(0);
        let table = SymbolTable::build(&mut model, Registry::new_shared());
        (model, table)
    }

    #[test]
    fn innermost_scope_wins() {
        const TEXT: &str = "
neuron shadowing:
    state:
        x mV = 0 mV
    end
    update:
        x integer = 1
        if x > 0:
            x real = 2.5
            y real = x
        end
        z integer = x
    end
end
";
        let (model, table) = build(TEXT);
        let update = model.update_blocks().next().unwrap();
        let update_scope = update.block.scope.unwrap();
        let inner_scope = match &update.block.stmts[1].kind {
            StmtKind::If { branches, .. } => branches[0].1.scope.unwrap(),
            _ => panic!("expected if"),
        };
        let model_x = table.resolve("x", table.model_scope()).unwrap();
        assert!(matches!(
            model_x.as_variable().unwrap().type_symbol,
            TypeSymbol::Unit(_)
        ));
        let update_x = table.resolve("x", update_scope).unwrap();
        assert_eq!(update_x.as_variable().unwrap().type_symbol, TypeSymbol::Integer);
        let inner_x = table.resolve("x", inner_scope).unwrap();
        assert_eq!(inner_x.as_variable().unwrap().type_symbol, TypeSymbol::Real);
        assert!(table.resolve("y", update_scope).is_err());
        assert!(table.duplicates().is_empty());
    }

    #[test]
    fn duplicates_are_recorded_once() {
        const TEXT: &str = "
neuron dup:
    state:
        V mV = 0 mV
    end
    parameters:
        V mV = 1 mV
    end
end
";
        let (_, table) = build(TEXT);
        assert_eq!(table.duplicates().len(), 1);
        assert_eq!(table.duplicates()[0].error.code(), ErrorCode::DuplicateSymbol);
        // first declaration wins
        let v = table.variable("V").unwrap();
        assert_eq!(v.block, VariableBlock::State);
    }

    #[test]
    fn second_order_equations_imply_shadow_states() {
        const TEXT: &str = "
neuron second_order:
    state:
        x mV = 0 mV
    end
    equations:
        shape g'' = -g' / (1 ms)
        x'' = -x / (1 ms**2)
    end
end
";
        let (_, table) = build(TEXT);
        let shadow = table.variable("x'").unwrap();
        assert!(shadow.is_implicit);
        assert_eq!(shadow.block, VariableBlock::State);
        let mv_per_ms = table
            .registry()
            .unit_of(&UnitExpr::Div(
                Box::new(UnitExpr::Name("mV".to_string())),
                Box::new(UnitExpr::Name("ms".to_string())),
            ))
            .unwrap();
        assert!(shadow.type_symbol.is_compatible(&TypeSymbol::unit(mv_per_ms)));
        assert_eq!(table.variable("g").unwrap().block, VariableBlock::Shape);
        assert!(table.variable("g'").unwrap().is_implicit);

        let (symbol, remaining) = table
            .resolve_variable(&VariableRef::new("x", 2), table.model_scope())
            .unwrap();
        assert_eq!(symbol.as_variable().unwrap().name, "x'");
        assert_eq!(remaining, 1);
    }

    #[test]
    fn registry_fallback_and_units() {
        const TEXT: &str = "
neuron fallback:
    parameters:
        tau ms = 10 ms
        bad parsec = 1
    end
end
";
        let (_, table) = build(TEXT);
        let scope = table.model_scope();
        assert!(table.resolve("t", scope).unwrap().as_variable().is_some());
        assert!(table.resolve("exp", scope).unwrap().as_function().is_some());
        assert!(matches!(table.resolve("mV", scope).unwrap(), SymbolRef::Type(_)));
        assert_eq!(
            table.resolve("nothing", scope).unwrap_err(),
            SymbolError::UndefinedSymbol("nothing".to_string())
        );
        assert_eq!(table.unresolved_types().len(), 1);
        assert_eq!(table.variable("bad").unwrap().type_symbol, TypeSymbol::Error);
    }

    #[test]
    fn add_declaration_resolves_only_its_block() {
        const TEXT: &str = "
neuron inject:
    parameters:
        tau ms = 10 ms
    end
    update:
        y real = undefined_thing
    end
end
";
        let (mut model, mut table) = build(TEXT);
        let decl = Declaration::new(
            "h",
            DataType::new(DataTypeKind::Unit(UnitExpr::Name("ms".to_string()))),
            Some(Expr::call("resolution", vec![])),
        );
        let diagnostics = table.add_declaration(&mut model, VarBlockKind::Internals, decl);
        assert!(diagnostics.is_empty());
        assert!(table.variable("h").is_some());
        assert_eq!(model.declarations_of(VarBlockKind::Internals).count(), 1);

        let decl = Declaration::new(
            "p",
            DataType::new(DataTypeKind::Real),
            Some(Expr::variable("q", 0)),
        );
        let diagnostics = table.add_declaration(&mut model, VarBlockKind::Internals, decl);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].code, ErrorCode::UndefinedSymbol);
    }
}
