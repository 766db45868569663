use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use itertools::Itertools;
use log::{debug, info, warn};

use crate::ast::{
    with_primes, BinaryOp, BufferKind, Declaration, EquationItem, Expr, ExprKind, Model,
    OdeEquation, ShapeDecl, StringSpan, UnaryOp, VariableRef,
};
use crate::error::{Diagnostic, ErrorCode};
use crate::options::CompilerOptions;
use crate::registry::internal_unit_factor;
use crate::symbols::{ScopeId, SymbolRef, SymbolTable, VariableBlock};
use crate::units::UnitType;

use super::plan::{
    EquationAnnotation, ExactIntegration, NumericalIntegration, SolverDirective, SolverPlan,
    SubSystem,
};
use super::propagator::{DividedDifferences, PropagatorDeriver};
use super::shapes::kernel_ode;
use super::symbolic::{parse_decimal, sum, SymExpr};
use super::system::{FirstOrderSystem, LinearSystem, StateEquation};

/// The predefined simulation time.
pub const TIME: &str = "t";

/// Name of the first-order state holding the `order`-th derivative of `name`.
pub fn state_name(name: &str, order: u32) -> String {
    let mut full = name.to_string();
    for _ in 0..order {
        full.push_str("__d");
    }
    full
}

/// Name of the state holding `convolve(shape, buffer)`.
pub fn kernel_name(shape: &str, buffer: &str) -> String {
    format!("{}__X__{}", shape, buffer)
}

/// Value of one `unit` in the simulator's internal units, rounded to 13 significant digits so
/// that e.g. `mV` is exactly 1.
fn unit_factor(unit: &UnitType) -> SymExpr {
    let ratio = unit.scale() / internal_unit_factor(unit.dimension());
    parse_decimal(&format!("{:.12e}", ratio))
        .map(SymExpr::Num)
        .unwrap_or_else(SymExpr::one)
}

/// Converts the right-hand sides of an equations block into [`SymExpr`]s, inlining aliases,
/// order-0 equations and function-of-time shapes, and collecting the kernels and shape states
/// the equations need.
struct Lowering<'a> {
    symbols: &'a SymbolTable,
    scope: ScopeId,
    odes: HashMap<&'a str, BTreeMap<u32, &'a OdeEquation>>,
    shapes: HashMap<&'a str, &'a ShapeDecl>,
    aliases: HashMap<&'a str, &'a Declaration>,
    aliases_done: HashMap<String, SymExpr>,
    shapes_done: HashMap<String, SymExpr>,
    expanding: HashSet<String>,
    /// `(shape, buffer)` pairs in the order they were first convolved.
    kernels: Vec<(String, String)>,
    /// ODE-form shapes referenced without `convolve`.
    direct_shapes: Vec<String>,
    defining_shape: Option<String>,
    diagnostics: Vec<Diagnostic>,
    reported: HashSet<(ErrorCode, String)>,
}

impl<'a> Lowering<'a> {
    fn new(model: &'a Model, symbols: &'a SymbolTable) -> Self {
        let mut odes: HashMap<&str, BTreeMap<u32, &OdeEquation>> = HashMap::new();
        for ode in model.odes().filter(|ode| ode.lhs.order <= 2) {
            odes.entry(ode.lhs.name.as_str())
                .or_default()
                .entry(ode.lhs.order)
                .or_insert(ode);
        }
        let mut shapes: HashMap<&str, &ShapeDecl> = HashMap::new();
        for shape in model.shapes().filter(|shape| shape.lhs.order <= 2) {
            let entry = shapes.entry(shape.lhs.name.as_str()).or_insert(shape);
            if shape.lhs.order > entry.lhs.order {
                *entry = shape;
            }
        }
        let aliases = model
            .aliases()
            .flat_map(|decl| decl.names.iter().map(move |name| (name.name.as_str(), decl)))
            .collect();
        Self {
            symbols,
            scope: symbols.model_scope(),
            odes,
            shapes,
            aliases,
            aliases_done: HashMap::new(),
            shapes_done: HashMap::new(),
            expanding: HashSet::new(),
            kernels: Vec::new(),
            direct_shapes: Vec::new(),
            defining_shape: None,
            diagnostics: Vec::new(),
            reported: HashSet::new(),
        }
    }

    fn report(&mut self, diagnostic: Diagnostic) {
        if self.reported.insert((diagnostic.code, diagnostic.message.clone())) {
            debug!("{}", diagnostic);
            self.diagnostics.push(diagnostic);
        }
    }

    /// The highest derivative of `name` with an equation, if it has any of order at least one.
    fn highest_order(&self, name: &str) -> Option<u32> {
        self.odes
            .get(name)
            .and_then(|orders| orders.keys().next_back().copied())
            .filter(|order| *order > 0)
    }

    fn ode(&self, name: &str, order: u32) -> Option<&'a OdeEquation> {
        self.odes.get(name).and_then(|orders| orders.get(&order)).copied()
    }

    /// Lowers `expr`, or returns `fallback` if `key` is already being expanded.
    fn expand(&mut self, key: String, expr: &Expr, fallback: SymExpr) -> SymExpr {
        if !self.expanding.insert(key.clone()) {
            return fallback;
        }
        let lowered = self.lower(expr);
        self.expanding.remove(&key);
        lowered
    }

    fn lower(&mut self, expr: &Expr) -> SymExpr {
        match &expr.kind {
            ExprKind::Number { value, .. } => match SymExpr::from_f64(*value) {
                Some(number) => number,
                None => {
                    self.report(Diagnostic::error(
                        ErrorCode::IncompatibleTypes,
                        format!(
                            "The value '{}' is not finite and cannot enter the equations.",
                            expr
                        ),
                        expr.span,
                    ));
                    SymExpr::zero()
                }
            },
            ExprKind::Boolean(value) => SymExpr::int(i64::from(*value)),
            ExprKind::String(_) => SymExpr::zero(),
            ExprKind::Variable(var) => self.lower_variable(var, expr.span),
            ExprKind::Call { name, args } if name == "convolve" => {
                self.lower_convolve(args, expr.span)
            }
            ExprKind::Call { name, args } => {
                let args = args.iter().map(|arg| self.lower(arg)).collect();
                SymExpr::Call(name.clone(), args)
            }
            ExprKind::Unary { op, operand } => {
                let operand = self.lower(operand);
                match op {
                    UnaryOp::Neg => -operand,
                    UnaryOp::Plus => operand,
                    UnaryOp::Not => SymExpr::call("not", vec![operand]),
                }
            }
            ExprKind::Binary { op, lhs, rhs } => {
                let (lhs, rhs) = (self.lower(lhs), self.lower(rhs));
                let call = |name: &str, lhs: SymExpr, rhs: SymExpr| {
                    SymExpr::call(name, vec![lhs, rhs])
                };
                match op {
                    BinaryOp::Add => lhs + rhs,
                    BinaryOp::Sub => lhs - rhs,
                    BinaryOp::Mul => lhs * rhs,
                    BinaryOp::Div => lhs / rhs,
                    BinaryOp::Pow => lhs.pow(rhs),
                    BinaryOp::Mod => call("mod", lhs, rhs),
                    BinaryOp::Lt => call("lt", lhs, rhs),
                    BinaryOp::Le => call("le", lhs, rhs),
                    BinaryOp::Gt => call("gt", lhs, rhs),
                    BinaryOp::Ge => call("ge", lhs, rhs),
                    BinaryOp::Eq => call("eq", lhs, rhs),
                    BinaryOp::Ne => call("ne", lhs, rhs),
                    BinaryOp::And => call("and", lhs, rhs),
                    BinaryOp::Or => call("or", lhs, rhs),
                }
            }
            ExprKind::Ternary {
                cond,
                then,
                otherwise,
            } => {
                let args = vec![self.lower(cond), self.lower(then), self.lower(otherwise)];
                SymExpr::call("ite", args)
            }
        }
    }

    fn lower_variable(&mut self, var: &VariableRef, span: Option<StringSpan>) -> SymExpr {
        let symbols = self.symbols;
        let symbol = match symbols.resolve(&var.name, self.scope) {
            Ok(symbol) => symbol,
            // reported by the name checks
            Err(_) => return SymExpr::sym(&state_name(&var.name, var.order)),
        };
        match symbol {
            SymbolRef::Type(unit) => unit_factor(&unit),
            SymbolRef::Function(_) => SymExpr::sym(&var.name),
            SymbolRef::Variable(variable) => match variable.block {
                VariableBlock::State => self.state_reference(&var.name, var.order, span),
                VariableBlock::Shape => self.shape_reference(&var.name, var.order, span),
                VariableBlock::Alias if var.order == 0 => self.alias(&var.name),
                _ if var.order == 0 => SymExpr::sym(&var.name),
                _ if var.name == TIME && var.order == 1 => SymExpr::one(),
                _ => SymExpr::zero(),
            },
        }
    }

    fn state_reference(&mut self, name: &str, order: u32, span: Option<StringSpan>) -> SymExpr {
        let highest = match self.highest_order(name) {
            Some(highest) => highest,
            None => {
                if let (0, Some(algebraic)) = (order, self.ode(name, 0)) {
                    return self.expand(name.to_string(), &algebraic.rhs, SymExpr::sym(name));
                }
                self.report(Diagnostic::error(
                    ErrorCode::MissingEquation,
                    format!(
                        "The state '{}' is used in the equations but has no differential equation.",
                        with_primes(name, order)
                    ),
                    span,
                ));
                return SymExpr::sym(&state_name(name, order));
            }
        };
        let state = SymExpr::sym(&state_name(name, order));
        if order < highest {
            return state;
        }
        match self.ode(name, order) {
            Some(ode) => self.expand(with_primes(name, order), &ode.rhs, state),
            None => {
                self.report(Diagnostic::error(
                    ErrorCode::MissingEquation,
                    format!(
                        "'{}' is used but '{}' only has equations up to order {}.",
                        with_primes(name, order),
                        name,
                        highest
                    ),
                    span,
                ));
                state
            }
        }
    }

    fn shape_reference(&mut self, name: &str, order: u32, span: Option<StringSpan>) -> SymExpr {
        let shape = match self.shapes.get(name) {
            Some(shape) => *shape,
            None => return SymExpr::sym(&state_name(name, order)),
        };
        if shape.lhs.order == 0 {
            let mut kernel = self.shape_rhs(shape);
            for _ in 0..order {
                kernel = match kernel.diff(TIME) {
                    Some(derivative) => derivative,
                    None => return SymExpr::sym(&state_name(name, order)),
                };
            }
            return kernel;
        }

        if self.defining_shape.as_deref() != Some(name)
            && !self.direct_shapes.iter().any(|direct| direct == name)
        {
            self.direct_shapes.push(name.to_string());
        }
        let state = SymExpr::sym(&state_name(name, order));
        if order < shape.lhs.order {
            state
        } else if order == shape.lhs.order {
            self.expand(with_primes(name, order), &shape.rhs, state)
        } else {
            self.report(Diagnostic::error(
                ErrorCode::MissingEquation,
                format!(
                    "'{}' is used but the shape '{}' is only defined up to order {}.",
                    with_primes(name, order),
                    name,
                    shape.lhs.order
                ),
                span,
            ));
            state
        }
    }

    /// The right-hand side of a shape with its own derivatives left as state symbols.
    fn shape_rhs(&mut self, shape: &ShapeDecl) -> SymExpr {
        let name = shape.lhs.name.clone();
        if let Some(done) = self.shapes_done.get(&name) {
            return done.clone();
        }
        let outer = self.defining_shape.replace(name.clone());
        let fallback = SymExpr::sym(&name);
        let lowered = self.expand(format!("shape {}", name), &shape.rhs, fallback);
        self.defining_shape = outer;
        self.shapes_done.insert(name, lowered.clone());
        lowered
    }

    fn alias(&mut self, name: &str) -> SymExpr {
        if let Some(done) = self.aliases_done.get(name) {
            return done.clone();
        }
        let expr = match self.aliases.get(name).copied().and_then(|decl| decl.expr.as_ref()) {
            Some(expr) => expr,
            None => return SymExpr::sym(name),
        };
        let lowered = self.expand(name.to_string(), expr, SymExpr::sym(name));
        self.aliases_done.insert(name.to_string(), lowered.clone());
        lowered
    }

    fn lower_convolve(&mut self, args: &[Expr], span: Option<StringSpan>) -> SymExpr {
        let (shape, buffer) = match args {
            [shape, buffer] => (shape.as_variable(), buffer.as_variable()),
            _ => (None, None),
        };
        let symbols = self.symbols;
        let block_of = |var: Option<&VariableRef>| {
            var.and_then(|var| symbols.resolve(&var.name, self.scope).ok())
                .and_then(|symbol| symbol.as_variable())
                .map(|variable| variable.block)
        };
        let (shape_block, buffer_block) = (block_of(shape), block_of(buffer));
        let (shape, buffer) = match (shape, buffer) {
            (Some(shape), Some(buffer)) => (shape.name.clone(), buffer.name.clone()),
            _ => {
                self.report(Diagnostic::error(
                    ErrorCode::UnsupportedShape,
                    "convolve expects a shape and an input buffer by name.".to_string(),
                    span,
                ));
                return SymExpr::zero();
            }
        };
        if shape_block != Some(VariableBlock::Shape) {
            self.report(Diagnostic::error(
                ErrorCode::UnsupportedShape,
                format!("'{}' is convolved with '{}' but is not a shape.", shape, buffer),
                span,
            ));
            return SymExpr::zero();
        }
        if buffer_block != Some(VariableBlock::InputBuffer(BufferKind::Spike)) {
            self.report(Diagnostic::error(
                ErrorCode::IncompatibleBufferType,
                format!(
                    "The shape '{}' is convolved with '{}', which is not a spike input buffer.",
                    shape, buffer
                ),
                span,
            ));
            return SymExpr::zero();
        }
        let kernel = kernel_name(&shape, &buffer);
        if !self.kernels.contains(&(shape.clone(), buffer.clone())) {
            self.kernels.push((shape, buffer));
        }
        SymExpr::sym(&kernel)
    }

    /// States `prefix, prefix__d, ..` for an ODE-form shape, with `rhs` defining the highest one.
    /// Starts from the impulse response: everything zero but the highest derivative.
    fn push_shape_states(
        &self,
        system: &mut FirstOrderSystem,
        prefix: &str,
        order: u32,
        rhs: SymExpr,
    ) {
        let mut rhs = Some(rhs);
        for k in 0..order {
            let last = k + 1 == order;
            system.push(StateEquation {
                name: state_name(prefix, k),
                rhs: if last {
                    rhs.take().unwrap_or_else(SymExpr::zero)
                } else {
                    SymExpr::sym(&state_name(prefix, k + 1))
                },
                initial_value: Some(if last { SymExpr::one() } else { SymExpr::zero() }),
            });
        }
    }

    fn add_kernel(&mut self, system: &mut FirstOrderSystem, shape: &str, buffer: &str) {
        let decl = match self.shapes.get(shape) {
            Some(decl) => *decl,
            None => return,
        };
        let kernel = kernel_name(shape, buffer);
        let rhs = self.shape_rhs(decl);
        if decl.lhs.order > 0 {
            let order = decl.lhs.order;
            let renamed = rhs.substitute(&|name| {
                (0..order)
                    .find(|k| state_name(shape, *k) == name)
                    .map(|k| SymExpr::sym(&state_name(&kernel, k)))
            });
            self.push_shape_states(system, &kernel, order, renamed);
            return;
        }

        match kernel_ode(&rhs, TIME) {
            Some(ode) => {
                debug!("'{}' satisfies an ODE of order {}", shape, ode.order());
                let order = ode.order() as u32;
                for k in 0..order {
                    let rhs = if k + 1 < order {
                        SymExpr::sym(&state_name(&kernel, k + 1))
                    } else {
                        sum(ode
                            .coefficients
                            .iter()
                            .enumerate()
                            .map(|(i, c)| c.clone() * SymExpr::sym(&state_name(&kernel, i as u32))))
                    };
                    system.push(StateEquation {
                        name: state_name(&kernel, k),
                        rhs,
                        initial_value: Some(ode.initial_values[k as usize].clone()),
                    });
                }
            }
            None => self.report(Diagnostic::error(
                ErrorCode::UnsupportedShape,
                format!(
                    "The shape '{}' does not satisfy a linear differential equation of order at most 2 in t.",
                    shape
                ),
                decl.span,
            )),
        }
    }

    fn add_direct_shape(&mut self, system: &mut FirstOrderSystem, shape: &str) {
        if let Some(decl) = self.shapes.get(shape).copied() {
            let rhs = self.shape_rhs(decl);
            self.push_shape_states(system, shape, decl.lhs.order, rhs);
        }
    }
}

/// Decides how every differential equation of a model is integrated.
#[derive(Clone)]
pub struct OdeClassifier {
    options: CompilerOptions,
    deriver: Arc<dyn PropagatorDeriver>,
}

impl OdeClassifier {
    pub fn new(options: &CompilerOptions) -> Self {
        Self {
            options: options.clone(),
            deriver: Arc::new(DividedDifferences),
        }
    }

    pub fn with_deriver(mut self, deriver: Arc<dyn PropagatorDeriver>) -> Self {
        self.deriver = deriver;
        self
    }

    /// Builds the first-order system of `model`, splits it into connected sub-systems and
    /// assigns each an exact propagator or a numerical method.
    pub fn classify(&self, model: &Model, symbols: &SymbolTable) -> (SolverPlan, Vec<Diagnostic>) {
        let mut lowering = Lowering::new(model, symbols);
        let mut system = FirstOrderSystem::default();

        let targets: Vec<&str> = model
            .odes()
            .filter(|ode| (1..=2).contains(&ode.lhs.order))
            .map(|ode| ode.lhs.name.as_str())
            .filter(|name| {
                symbols
                    .variable(name)
                    .map_or(false, |var| var.block == VariableBlock::State)
            })
            .unique()
            .collect();
        for target in targets {
            let highest = match lowering.highest_order(target) {
                Some(highest) => highest,
                None => continue,
            };
            for k in 0..highest {
                let rhs = if k + 1 == highest {
                    match lowering.ode(target, highest) {
                        Some(ode) => lowering.expand(
                            with_primes(target, highest),
                            &ode.rhs,
                            SymExpr::zero(),
                        ),
                        None => SymExpr::zero(),
                    }
                } else {
                    match lowering.ode(target, k + 1) {
                        Some(ode) => lowering.expand(
                            with_primes(target, k + 1),
                            &ode.rhs,
                            SymExpr::zero(),
                        ),
                        None => SymExpr::sym(&state_name(target, k + 1)),
                    }
                };
                let initial_value = symbols
                    .variable(&with_primes(target, k))
                    .and_then(|var| var.initializer.as_ref())
                    .map(|init| lowering.lower(init));
                system.push(StateEquation {
                    name: state_name(target, k),
                    rhs,
                    initial_value,
                });
            }
        }

        // aliases and order-0 equations only matter through their uses, but their defects are
        // reported even when nothing uses them
        for decl in model.aliases() {
            for name in decl.names.iter() {
                lowering.alias(&name.name);
            }
        }
        for ode in model.odes().filter(|ode| ode.lhs.order == 0) {
            lowering.lower(&ode.rhs);
        }

        let (mut next_kernel, mut next_shape) = (0, 0);
        loop {
            if let Some((shape, buffer)) = lowering.kernels.get(next_kernel).cloned() {
                next_kernel += 1;
                lowering.add_kernel(&mut system, &shape, &buffer);
            } else if let Some(shape) = lowering.direct_shapes.get(next_shape).cloned() {
                next_shape += 1;
                lowering.add_direct_shape(&mut system, &shape);
            } else {
                break;
            }
        }

        let mut diagnostics = std::mem::take(&mut lowering.diagnostics);
        let subsystems: Vec<SubSystem> = system
            .components()
            .into_iter()
            .enumerate()
            .map(|(id, members)| {
                let states: Vec<StateEquation> = members
                    .iter()
                    .map(|i| system.equations[*i].clone())
                    .collect();
                let directive = self.directive(&states, &mut diagnostics);
                SubSystem {
                    id,
                    states,
                    directive,
                }
            })
            .collect();

        let mut plan = SolverPlan {
            model: model.name.clone(),
            subsystems,
            annotations: Vec::new(),
            step_size_name: self.options.step_size_name.clone(),
        };
        plan.annotations = annotate(model, &plan, &lowering.kernels);
        info!(
            "Classified '{}': {} states in {} sub-systems ({} exact)",
            model.name,
            plan.num_states(),
            plan.subsystems.len(),
            plan.exact().count()
        );
        (plan, diagnostics)
    }

    fn directive(
        &self,
        states: &[StateEquation],
        diagnostics: &mut Vec<Diagnostic>,
    ) -> SolverDirective {
        let names = states.iter().map(|eq| eq.name.as_str()).join(", ");
        if let Some(system) =
            LinearSystem::from_equations(states, &self.options.step_size_name, TIME)
        {
            match self.deriver.derive_propagator(&system) {
                Ok(propagator) => {
                    debug!("{} is linear with constant coefficients", names);
                    return SolverDirective::Exact(ExactIntegration { system, propagator });
                }
                Err(err) => {
                    warn!("No propagator for {}: {}", names, err);
                    diagnostics.push(Diagnostic::warning(
                        ErrorCode::PropagatorUnavailable,
                        format!(
                            "{} Falling back to numerical integration for {}.",
                            err, names
                        ),
                        None,
                    ));
                }
            }
        } else {
            debug!("{} needs numerical integration", names);
        }
        SolverDirective::Numerical(NumericalIntegration {
            states: states.iter().map(|eq| eq.name.clone()).collect(),
            rhs: states.iter().map(|eq| eq.rhs.clone()).collect(),
            method: self.options.numeric_method,
            abs_tolerance: self.options.abs_tolerance,
            rel_tolerance: self.options.rel_tolerance,
        })
    }
}

fn annotate(
    model: &Model,
    plan: &SolverPlan,
    kernels: &[(String, String)],
) -> Vec<EquationAnnotation> {
    let subsystem_of = |state: &str| plan.subsystem_of(state).map(|s| s.id);
    model
        .equation_items()
        .filter_map(|item| match item {
            EquationItem::Ode(ode) => Some(EquationAnnotation {
                target: ode.lhs.name.clone(),
                order: ode.lhs.order,
                subsystem: ode
                    .lhs
                    .order
                    .checked_sub(1)
                    .and_then(|k| subsystem_of(&state_name(&ode.lhs.name, k))),
                span: ode.span,
            }),
            EquationItem::Shape(shape) => {
                let k = shape.lhs.order.saturating_sub(1);
                let name = &shape.lhs.name;
                let subsystem = kernels
                    .iter()
                    .filter(|(s, _)| s == name)
                    .find_map(|(s, buffer)| subsystem_of(&state_name(&kernel_name(s, buffer), k)))
                    .or_else(|| subsystem_of(&state_name(name, k)));
                Some(EquationAnnotation {
                    target: name.clone(),
                    order: shape.lhs.order,
                    subsystem,
                    span: shape.span,
                })
            }
            EquationItem::Alias(_) => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_nestml_string;
    use crate::registry::Registry;
    use crate::odes::propagator::{Propagator, PropagatorError};
    use approx::assert_relative_eq;

    fn classify_with(text: &str, options: &CompilerOptions) -> (SolverPlan, Vec<Diagnostic>) {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut model = parse_nestml_string(text).unwrap().remove(0);
        let symbols = SymbolTable::build(&mut model, Registry::new_shared());
        OdeClassifier::new(options).classify(&model, &symbols)
    }

    fn classify(text: &str) -> (SolverPlan, Vec<Diagnostic>) {
        classify_with(text, &CompilerOptions::default())
    }

    fn codes(diagnostics: &[Diagnostic]) -> Vec<ErrorCode> {
        diagnostics.iter().map(|d| d.code).collect()
    }

    fn exact(subsystem: &SubSystem) -> &ExactIntegration {
        match &subsystem.directive {
            SolverDirective::Exact(exact) => exact,
            SolverDirective::Numerical(_) => panic!("sub-system {} is numerical", subsystem.id),
        }
    }

    #[test]
    fn passive_membrane_is_exact() {
        let (plan, diagnostics) = classify(
            "
neuron passive:
    state:
        V_m mV = 0 mV
    end
    parameters:
        tau ms = 10 ms
    end
    equations:
        V_m' = -V_m / tau
    end
end
",
        );
        assert!(diagnostics.is_empty(), "{:?}", diagnostics);
        assert_eq!(plan.subsystems.len(), 1);
        let exact = exact(&plan.subsystems[0]);
        assert_eq!(exact.system.dimension(), 1);
        assert_eq!(exact.propagator.matrix[0][0].to_string(), "exp(-__h / tau)");
        assert_eq!(plan.annotation("V_m", 1).unwrap().subsystem, Some(0));
        assert_eq!(plan.subsystems[0].states[0].initial_value, Some(SymExpr::zero()));
    }

    #[test]
    fn quadratic_term_needs_a_solver() {
        let options = CompilerOptions {
            abs_tolerance: 1e-6,
            ..CompilerOptions::default()
        };
        let (plan, diagnostics) = classify_with(
            "
neuron quadratic:
    state:
        V_m mV = 0 mV
    end
    parameters:
        tau ms = 10 ms
    end
    equations:
        V_m' = -V_m / tau + V_m * V_m / (1 mV * 1 ms)
    end
end
",
            &options,
        );
        assert!(diagnostics.is_empty(), "{:?}", diagnostics);
        assert_eq!(plan.exact().count(), 0);
        match &plan.subsystems[0].directive {
            SolverDirective::Numerical(numerical) => {
                assert_eq!(numerical.states, vec!["V_m".to_string()]);
                assert_eq!(numerical.method, crate::options::IntegrationMethod::Rkf45);
                assert_relative_eq!(numerical.abs_tolerance, 1e-6);
                assert_relative_eq!(numerical.rel_tolerance, 1e-3);
            }
            SolverDirective::Exact(_) => panic!("expected numerical integration"),
        }
    }

    #[test]
    fn second_order_chain() {
        let (plan, diagnostics) = classify(
            "
neuron chained:
    state:
        g real = 0
    end
    parameters:
        tau ms = 2 ms
    end
    equations:
        g'' = -g' / tau
        g' = g' - g / tau
    end
end
",
        );
        assert!(diagnostics.is_empty(), "{:?}", diagnostics);
        assert_eq!(plan.subsystems.len(), 1);
        let exact = exact(&plan.subsystems[0]);
        assert_eq!(exact.system.states, vec!["g".to_string(), "g__d".to_string()]);
        assert_eq!(plan.annotation("g", 2).unwrap().subsystem, Some(0));
        assert_eq!(plan.annotation("g", 1).unwrap().subsystem, Some(0));
    }

    #[test]
    fn alpha_shape_through_an_alias() {
        let (plan, diagnostics) = classify(
            "
neuron alpha:
    state:
        V_m mV = -70 mV
    end
    parameters:
        tau_m ms = 10 ms
        tau_syn ms = 2 ms
        C_m pF = 250 pF
    end
    equations:
        shape g_in = (e / tau_syn) * t * exp(-t / tau_syn)
        function I_syn pA = convolve(g_in, spikes) * 1 pA
        V_m' = -V_m / tau_m + I_syn / C_m
    end
    input:
        spikes real <- spike
    end
end
",
        );
        assert!(diagnostics.is_empty(), "{:?}", diagnostics);
        assert_eq!(plan.subsystems.len(), 1);
        let exact = exact(&plan.subsystems[0]);
        assert_eq!(
            exact.system.states,
            vec!["V_m", "g_in__X__spikes", "g_in__X__spikes__d"]
        );
        let kernel = &plan.subsystems[0].states[1];
        assert_eq!(kernel.initial_value, Some(SymExpr::zero()));
        assert_eq!(plan.annotation("g_in", 0).unwrap().subsystem, Some(0));
        assert!(!exact.propagator.singularities.is_empty());
    }

    #[test]
    fn shape_in_ode_form_forms_one_block() {
        let (plan, diagnostics) = classify(
            "
neuron kernel_only:
    state:
        w real = 0
    end
    parameters:
        tau ms = 2 ms
    end
    equations:
        shape g'' = -g / tau**2 - 2 * g' / tau
        w' = convolve(g, spikes) / (1 ms)
    end
    input:
        spikes real <- spike
    end
end
",
        );
        assert!(diagnostics.is_empty(), "{:?}", diagnostics);
        let kernel = plan.subsystem_of("g__X__spikes").unwrap();
        assert_eq!(kernel.states.len(), 3);
        assert_eq!(kernel.states[2].initial_value, Some(SymExpr::one()));
        assert_eq!(plan.subsystem_of("w").map(|s| s.id), Some(kernel.id));
        assert!(plan.subsystem_of("g").is_none());
    }

    #[test]
    fn missing_equations() {
        let (_, diagnostics) = classify(
            "
neuron missing:
    state:
        V_m mV = 0 mV
        w mV = 0 mV
    end
    parameters:
        tau ms = 10 ms
    end
    equations:
        V_m' = (w - V_m) / tau + V_m'' * 1 ms
    end
end
",
        );
        assert_eq!(
            codes(&diagnostics),
            vec![ErrorCode::MissingEquation, ErrorCode::MissingEquation]
        );
        assert!(diagnostics[0].message.contains("'w'"));
        assert!(diagnostics[1].message.contains("V_m''"));
    }

    #[test]
    fn infinite_literals_are_reported() {
        let (_, diagnostics) = classify(
            "
neuron unbounded:
    state:
        V_m mV = 0 mV
    end
    parameters:
        tau ms = 10 ms
    end
    equations:
        V_m' = (inf * 1 mV - V_m) / tau
    end
end
",
        );
        assert_eq!(codes(&diagnostics), vec![ErrorCode::IncompatibleTypes]);
        assert!(diagnostics[0].message.contains("'inf'"));
        assert!(diagnostics[0].span.is_some());
    }

    #[test]
    fn buffers_and_unsupported_shapes() {
        let (plan, diagnostics) = classify(
            "
neuron buffers:
    state:
        V_m mV = 0 mV
    end
    parameters:
        tau ms = 10 ms
    end
    equations:
        shape g = exp(-t / tau)
        shape h = (t / tau)**3
        V_m' = -V_m / tau + convolve(g, currents) * 1 mV / (1 ms * 1 pA) + convolve(h, spikes) * 1 mV / 1 ms + convolve(g, spikes) * 1 mV / 1 ms
    end
    input:
        spikes real <- spike
        currents pA <- current
    end
end
",
        );
        assert_eq!(
            codes(&diagnostics),
            vec![ErrorCode::IncompatibleBufferType, ErrorCode::UnsupportedShape]
        );
        assert!(plan.subsystem_of("g__X__spikes").is_some());
        assert!(plan.subsystem_of("h__X__spikes").is_none());
    }

    struct NoPropagators;

    impl PropagatorDeriver for NoPropagators {
        fn derive_propagator(&self, system: &LinearSystem) -> Result<Propagator, PropagatorError> {
            Err(PropagatorError::BlockTooLarge {
                size: system.dimension(),
                states: system.states.clone(),
            })
        }
    }

    #[test]
    fn fallback_when_no_propagator() {
        let text = "
neuron fallback:
    state:
        V_m mV = 0 mV
    end
    parameters:
        tau ms = 10 ms
    end
    equations:
        V_m' = -V_m / tau
    end
end
";
        let mut model = parse_nestml_string(text).unwrap().remove(0);
        let symbols = SymbolTable::build(&mut model, Registry::new_shared());
        let classifier =
            OdeClassifier::new(&CompilerOptions::default()).with_deriver(Arc::new(NoPropagators));
        let (plan, diagnostics) = classifier.classify(&model, &symbols);
        assert_eq!(codes(&diagnostics), vec![ErrorCode::PropagatorUnavailable]);
        assert!(!diagnostics[0].is_error());
        assert_eq!(plan.numerical().count(), 1);
    }

    #[test]
    fn unit_literals_use_internal_units() {
        let (plan, diagnostics) = classify(
            "
neuron units:
    state:
        V_m mV = 0 mV
    end
    equations:
        V_m' = -V_m / (0.01 s) + 2 V / (1 s)
    end
end
",
        );
        assert!(diagnostics.is_empty(), "{:?}", diagnostics);
        let exact = exact(&plan.subsystems[0]);
        let env = HashMap::new();
        let (a, b) = exact.system.evaluate(&env).unwrap();
        assert_relative_eq!(a[[0, 0]], -0.1);
        assert_relative_eq!(b[0], 2.0);
    }
}
