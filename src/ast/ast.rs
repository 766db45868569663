use std::fmt;

use itertools::Itertools;

use crate::symbols::ScopeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct StringSpan {
    pub pos_start: usize,
    pub pos_end: usize,
}

impl StringSpan {
    pub fn join(self, other: StringSpan) -> StringSpan {
        StringSpan {
            pos_start: self.pos_start.min(other.pos_start),
            pos_end: self.pos_end.max(other.pos_end),
        }
    }

    pub fn contains(&self, other: &StringSpan) -> bool {
        self.pos_start <= other.pos_start && other.pos_end <= self.pos_end
    }
}

impl fmt::Display for StringSpan {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}..{}", self.pos_start, self.pos_end)
    }
}

/// Identity of an expression node. Numbered in textual order when the symbol table is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExprId(pub usize);

impl ExprId {
    pub const UNASSIGNED: ExprId = ExprId(usize::MAX);
}

/// A declared or referenced variable name together with its derivative order, e.g. `V_m''`.
#[derive(Debug, Clone, PartialEq)]
pub struct VariableName {
    pub name: String,
    pub order: u32,
    pub span: Option<StringSpan>,
}

impl VariableName {
    pub fn new(name: &str, order: u32) -> Self {
        Self {
            name: name.to_string(),
            order,
            span: None,
        }
    }

    pub fn full_name(&self) -> String {
        with_primes(&self.name, self.order)
    }
}

impl fmt::Display for VariableName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.full_name())
    }
}

pub fn with_primes(name: &str, order: u32) -> String {
    let mut full = name.to_string();
    for _ in 0..order {
        full.push('\'');
    }
    full
}

#[derive(Debug, Clone, PartialEq)]
pub enum UnitExpr {
    One,
    Name(String),
    Mul(Box<UnitExpr>, Box<UnitExpr>),
    Div(Box<UnitExpr>, Box<UnitExpr>),
    Pow(Box<UnitExpr>, i32),
}

impl fmt::Display for UnitExpr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            UnitExpr::One => write!(f, "1"),
            UnitExpr::Name(name) => write!(f, "{}", name),
            UnitExpr::Mul(lhs, rhs) => write!(f, "{}*{}", lhs, rhs),
            UnitExpr::Div(lhs, rhs) => match rhs.as_ref() {
                UnitExpr::Mul(_, _) | UnitExpr::Div(_, _) => write!(f, "{}/({})", lhs, rhs),
                _ => write!(f, "{}/{}", lhs, rhs),
            },
            UnitExpr::Pow(base, exp) => match base.as_ref() {
                UnitExpr::Name(_) | UnitExpr::One => write!(f, "{}**{}", base, exp),
                _ => write!(f, "({})**{}", base, exp),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DataTypeKind {
    Integer,
    Real,
    Boolean,
    String,
    Void,
    Unit(UnitExpr),
}

#[derive(Debug, Clone, PartialEq)]
pub struct DataType {
    pub kind: DataTypeKind,
    pub span: Option<StringSpan>,
}

impl DataType {
    pub fn new(kind: DataTypeKind) -> Self {
        Self { kind, span: None }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.kind {
            DataTypeKind::Integer => write!(f, "integer"),
            DataTypeKind::Real => write!(f, "real"),
            DataTypeKind::Boolean => write!(f, "boolean"),
            DataTypeKind::String => write!(f, "string"),
            DataTypeKind::Void => write!(f, "void"),
            DataTypeKind::Unit(unit) => write!(f, "{}", unit),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
    Plus,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Pow,
    Mul,
    Div,
    Mod,
    Add,
    Sub,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    And,
    Or,
}

impl BinaryOp {
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge | BinaryOp::Eq | BinaryOp::Ne
        )
    }

    pub fn is_logical(&self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Pow => "**",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
        }
    }

    fn precedence(&self) -> u8 {
        match self {
            BinaryOp::Or => 2,
            BinaryOp::And => 3,
            BinaryOp::Lt
            | BinaryOp::Le
            | BinaryOp::Gt
            | BinaryOp::Ge
            | BinaryOp::Eq
            | BinaryOp::Ne => 5,
            BinaryOp::Add | BinaryOp::Sub => 6,
            BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => 7,
            BinaryOp::Pow => 9,
        }
    }
}

/// A reference to a variable inside an expression or on the left of an assignment.
#[derive(Debug, Clone, PartialEq)]
pub struct VariableRef {
    pub name: String,
    pub order: u32,
    pub index: Option<Box<Expr>>,
}

impl VariableRef {
    pub fn new(name: &str, order: u32) -> Self {
        Self {
            name: name.to_string(),
            order,
            index: None,
        }
    }

    pub fn full_name(&self) -> String {
        with_primes(&self.name, self.order)
    }
}

impl fmt::Display for VariableRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.full_name())?;
        if let Some(index) = &self.index {
            write!(f, "[{}]", index)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Number { value: f64, is_integer: bool },
    Boolean(bool),
    String(String),
    Variable(VariableRef),
    Call { name: String, args: Vec<Expr> },
    Unary { op: UnaryOp, operand: Box<Expr> },
    Binary { op: BinaryOp, lhs: Box<Expr>, rhs: Box<Expr> },
    Ternary {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub id: ExprId,
    pub kind: ExprKind,
    pub span: Option<StringSpan>,
}

impl Expr {
    pub fn new(kind: ExprKind, span: Option<StringSpan>) -> Self {
        Self {
            id: ExprId::UNASSIGNED,
            kind,
            span,
        }
    }

    pub fn number(value: f64) -> Self {
        Self::new(
            ExprKind::Number {
                value,
                is_integer: false,
            },
            None,
        )
    }

    pub fn variable(name: &str, order: u32) -> Self {
        Self::new(ExprKind::Variable(VariableRef::new(name, order)), None)
    }

    pub fn call(name: &str, args: Vec<Expr>) -> Self {
        Self::new(
            ExprKind::Call {
                name: name.to_string(),
                args,
            },
            None,
        )
    }

    pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Self {
        let span = match (lhs.span, rhs.span) {
            (Some(l), Some(r)) => Some(l.join(r)),
            _ => None,
        };
        Self::new(
            ExprKind::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
            span,
        )
    }

    pub fn children(&self) -> Vec<&Expr> {
        match &self.kind {
            ExprKind::Number { .. } | ExprKind::Boolean(_) | ExprKind::String(_) => vec![],
            ExprKind::Variable(var) => var.index.iter().map(|i| i.as_ref()).collect(),
            ExprKind::Call { args, .. } => args.iter().collect(),
            ExprKind::Unary { operand, .. } => vec![operand.as_ref()],
            ExprKind::Binary { lhs, rhs, .. } => vec![lhs.as_ref(), rhs.as_ref()],
            ExprKind::Ternary {
                cond,
                then,
                otherwise,
            } => vec![cond.as_ref(), then.as_ref(), otherwise.as_ref()],
        }
    }

    /// Visits this node and all of its descendants in source order, parents first.
    pub fn visit<'a>(&'a self, f: &mut dyn FnMut(&'a Expr)) {
        f(self);
        for child in self.children() {
            child.visit(f);
        }
    }

    pub fn visit_mut(&mut self, f: &mut dyn FnMut(&mut Expr)) {
        f(self);
        match &mut self.kind {
            ExprKind::Number { .. } | ExprKind::Boolean(_) | ExprKind::String(_) => {}
            ExprKind::Variable(var) => {
                if let Some(index) = var.index.as_mut() {
                    index.visit_mut(f);
                }
            }
            ExprKind::Call { args, .. } => args.iter_mut().for_each(|arg| arg.visit_mut(f)),
            ExprKind::Unary { operand, .. } => operand.visit_mut(f),
            ExprKind::Binary { lhs, rhs, .. } => {
                lhs.visit_mut(f);
                rhs.visit_mut(f);
            }
            ExprKind::Ternary {
                cond,
                then,
                otherwise,
            } => {
                cond.visit_mut(f);
                then.visit_mut(f);
                otherwise.visit_mut(f);
            }
        }
    }

    /// All variable reference nodes in this expression.
    pub fn variables(&self) -> Vec<&Expr> {
        let mut vars = Vec::new();
        self.visit(&mut |e| {
            if matches!(e.kind, ExprKind::Variable(_)) {
                vars.push(e);
            }
        });
        vars
    }

    pub fn as_variable(&self) -> Option<&VariableRef> {
        match &self.kind {
            ExprKind::Variable(var) => Some(var),
            _ => None,
        }
    }

    pub fn is_numeric_literal(&self) -> bool {
        match &self.kind {
            ExprKind::Number { .. } => true,
            ExprKind::Unary {
                op: UnaryOp::Neg | UnaryOp::Plus,
                operand,
            } => operand.is_numeric_literal(),
            _ => false,
        }
    }

    /// Value of a (possibly signed) numeric literal.
    pub fn literal_value(&self) -> Option<f64> {
        match &self.kind {
            ExprKind::Number { value, .. } => Some(*value),
            ExprKind::Unary {
                op: UnaryOp::Neg,
                operand,
            } => operand.literal_value().map(|v| -v),
            ExprKind::Unary {
                op: UnaryOp::Plus,
                operand,
            } => operand.literal_value(),
            _ => None,
        }
    }

    fn precedence(&self) -> u8 {
        match &self.kind {
            ExprKind::Ternary { .. } => 1,
            ExprKind::Binary { op, .. } => op.precedence(),
            ExprKind::Unary { op: UnaryOp::Not, .. } => 4,
            ExprKind::Unary { .. } => 8,
            ExprKind::Number { value, .. } if *value < 0.0 => 8,
            _ => 10,
        }
    }

    fn fmt_child(&self, f: &mut fmt::Formatter, child: &Expr, min: u8) -> fmt::Result {
        if child.precedence() < min {
            write!(f, "({})", child)
        } else {
            write!(f, "{}", child)
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.kind {
            ExprKind::Number { value, is_integer } => {
                if *is_integer {
                    write!(f, "{}", *value as i64)
                } else {
                    write!(f, "{}", value)
                }
            }
            ExprKind::Boolean(b) => write!(f, "{}", b),
            ExprKind::String(s) => write!(f, "\"{}\"", s),
            ExprKind::Variable(var) => write!(f, "{}", var),
            ExprKind::Call { name, args } => {
                write!(f, "{}({})", name, args.iter().map(|a| a.to_string()).join(", "))
            }
            ExprKind::Unary { op, operand } => {
                match op {
                    UnaryOp::Neg => write!(f, "-")?,
                    UnaryOp::Plus => write!(f, "+")?,
                    UnaryOp::Not => write!(f, "not ")?,
                }
                let min = if *op == UnaryOp::Not { 4 } else { 9 };
                self.fmt_child(f, operand, min)
            }
            ExprKind::Binary { op, lhs, rhs } => {
                let prec = op.precedence();
                let (left_min, right_min) = match op {
                    BinaryOp::Pow => (prec + 1, prec),
                    _ if op.is_comparison() => (prec + 1, prec + 1),
                    _ => (prec, prec + 1),
                };
                self.fmt_child(f, lhs, left_min)?;
                match op {
                    BinaryOp::Pow => write!(f, "**")?,
                    _ => write!(f, " {} ", op.symbol())?,
                }
                self.fmt_child(f, rhs, right_min)
            }
            ExprKind::Ternary {
                cond,
                then,
                otherwise,
            } => {
                self.fmt_child(f, cond, 2)?;
                write!(f, " ? ")?;
                self.fmt_child(f, then, 2)?;
                write!(f, " : ")?;
                self.fmt_child(f, otherwise, 1)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VarBlockKind {
    State,
    Parameters,
    Internals,
}

impl fmt::Display for VarBlockKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            VarBlockKind::State => write!(f, "state"),
            VarBlockKind::Parameters => write!(f, "parameters"),
            VarBlockKind::Internals => write!(f, "internals"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockKind {
    State,
    Parameters,
    Internals,
    Equations,
    Input,
    Output,
    Update,
}

impl From<VarBlockKind> for BlockKind {
    fn from(kind: VarBlockKind) -> Self {
        match kind {
            VarBlockKind::State => BlockKind::State,
            VarBlockKind::Parameters => BlockKind::Parameters,
            VarBlockKind::Internals => BlockKind::Internals,
        }
    }
}

impl fmt::Display for BlockKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            BlockKind::State => "state",
            BlockKind::Parameters => "parameters",
            BlockKind::Internals => "internals",
            BlockKind::Equations => "equations",
            BlockKind::Input => "input",
            BlockKind::Output => "output",
            BlockKind::Update => "update",
        };
        write!(f, "{}", name)
    }
}

/// `recordable function a, b mV [n] = expr [[invariant]]`
#[derive(Debug, Clone, PartialEq)]
pub struct Declaration {
    pub names: Vec<VariableName>,
    pub datatype: DataType,
    pub size: Option<String>,
    pub expr: Option<Expr>,
    pub invariant: Option<Expr>,
    pub is_alias: bool,
    pub is_recordable: bool,
    pub span: Option<StringSpan>,
}

impl Declaration {
    pub fn new(name: &str, datatype: DataType, expr: Option<Expr>) -> Self {
        Self {
            names: vec![VariableName::new(name, 0)],
            datatype,
            size: None,
            expr,
            invariant: None,
            is_alias: false,
            is_recordable: false,
            span: None,
        }
    }

    /// The initializer and invariant, whichever are present.
    pub fn exprs(&self) -> impl Iterator<Item = &Expr> {
        self.expr.iter().chain(self.invariant.iter())
    }

    pub fn for_each_expr_mut(&mut self, f: &mut dyn FnMut(&mut Expr)) {
        if let Some(expr) = self.expr.as_mut() {
            expr.visit_mut(f);
        }
        if let Some(invariant) = self.invariant.as_mut() {
            invariant.visit_mut(f);
        }
    }
}

impl fmt::Display for Declaration {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_recordable {
            write!(f, "recordable ")?;
        }
        if self.is_alias {
            write!(f, "function ")?;
        }
        write!(
            f,
            "{} {}",
            self.names.iter().map(|n| n.full_name()).join(", "),
            self.datatype
        )?;
        if let Some(size) = &self.size {
            write!(f, " [{}]", size)?;
        }
        if let Some(expr) = &self.expr {
            write!(f, " = {}", expr)?;
        }
        if let Some(invariant) = &self.invariant {
            write!(f, " [[{}]]", invariant)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VarBlock {
    pub kind: VarBlockKind,
    pub declarations: Vec<Declaration>,
    pub span: Option<StringSpan>,
}

/// `shape g = expr` or `shape g'' = expr`
#[derive(Debug, Clone, PartialEq)]
pub struct ShapeDecl {
    pub lhs: VariableName,
    pub rhs: Expr,
    pub span: Option<StringSpan>,
}

/// `x' = expr`
#[derive(Debug, Clone, PartialEq)]
pub struct OdeEquation {
    pub lhs: VariableName,
    pub rhs: Expr,
    pub span: Option<StringSpan>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EquationItem {
    Shape(ShapeDecl),
    Ode(OdeEquation),
    Alias(Declaration),
}

#[derive(Debug, Clone, PartialEq)]
pub struct EquationsBlock {
    pub items: Vec<EquationItem>,
    pub span: Option<StringSpan>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputQualifier {
    Inhibitory,
    Excitatory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferKind {
    Spike,
    Current,
}

impl fmt::Display for BufferKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            BufferKind::Spike => write!(f, "spike"),
            BufferKind::Current => write!(f, "current"),
        }
    }
}

/// `spikes_in [n] pA <- inhibitory spike`
#[derive(Debug, Clone, PartialEq)]
pub struct InputPort {
    pub name: String,
    pub size: Option<String>,
    pub datatype: Option<DataType>,
    pub qualifiers: Vec<InputQualifier>,
    pub kind: BufferKind,
    pub span: Option<StringSpan>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InputBlock {
    pub ports: Vec<InputPort>,
    pub span: Option<StringSpan>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutputBlock {
    pub kind: BufferKind,
    pub span: Option<StringSpan>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssignOp {
    Assign,
    Add,
    Sub,
    Mul,
    Div,
}

impl AssignOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            AssignOp::Assign => "=",
            AssignOp::Add => "+=",
            AssignOp::Sub => "-=",
            AssignOp::Mul => "*=",
            AssignOp::Div => "/=",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    Declaration(Declaration),
    Assignment {
        target: VariableRef,
        op: AssignOp,
        expr: Expr,
    },
    Call(Expr),
    If {
        branches: Vec<(Expr, Block)>,
        otherwise: Option<Block>,
    },
    For {
        var: String,
        from: Expr,
        to: Expr,
        step: f64,
        body: Block,
    },
    While {
        cond: Expr,
        body: Block,
    },
    Return(Option<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Option<StringSpan>,
}

impl Stmt {
    /// Calls `f` on each outermost expression of this statement, nested blocks included.
    pub fn for_each_root_expr<'a>(&'a self, f: &mut dyn FnMut(&'a Expr)) {
        match &self.kind {
            StmtKind::Declaration(decl) => decl.exprs().for_each(&mut *f),
            StmtKind::Assignment { target, expr, .. } => {
                if let Some(index) = &target.index {
                    f(index);
                }
                f(expr);
            }
            StmtKind::Call(expr) => f(expr),
            StmtKind::If {
                branches,
                otherwise,
            } => {
                for (cond, block) in branches.iter() {
                    f(cond);
                    block.for_each_root_expr(f);
                }
                if let Some(block) = otherwise {
                    block.for_each_root_expr(f);
                }
            }
            StmtKind::For { from, to, body, .. } => {
                f(from);
                f(to);
                body.for_each_root_expr(f);
            }
            StmtKind::While { cond, body } => {
                f(cond);
                body.for_each_root_expr(f);
            }
            StmtKind::Return(expr) => {
                if let Some(expr) = expr {
                    f(expr);
                }
            }
        }
    }

    fn for_each_expr_mut(&mut self, f: &mut dyn FnMut(&mut Expr)) {
        match &mut self.kind {
            StmtKind::Declaration(decl) => decl.for_each_expr_mut(f),
            StmtKind::Assignment { target, expr, .. } => {
                if let Some(index) = target.index.as_mut() {
                    index.visit_mut(f);
                }
                expr.visit_mut(f);
            }
            StmtKind::Call(expr) => expr.visit_mut(f),
            StmtKind::If {
                branches,
                otherwise,
            } => {
                for (cond, block) in branches.iter_mut() {
                    cond.visit_mut(f);
                    block.for_each_expr_mut(f);
                }
                if let Some(block) = otherwise.as_mut() {
                    block.for_each_expr_mut(f);
                }
            }
            StmtKind::For { from, to, body, .. } => {
                from.visit_mut(f);
                to.visit_mut(f);
                body.for_each_expr_mut(f);
            }
            StmtKind::While { cond, body } => {
                cond.visit_mut(f);
                body.for_each_expr_mut(f);
            }
            StmtKind::Return(expr) => {
                if let Some(expr) = expr.as_mut() {
                    expr.visit_mut(f);
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub stmts: Vec<Stmt>,
    pub scope: Option<ScopeId>,
    pub span: Option<StringSpan>,
}

impl Block {
    pub fn new(stmts: Vec<Stmt>) -> Self {
        Self {
            stmts,
            scope: None,
            span: None,
        }
    }

    pub fn for_each_root_expr<'a>(&'a self, f: &mut dyn FnMut(&'a Expr)) {
        for stmt in self.stmts.iter() {
            stmt.for_each_root_expr(f);
        }
    }

    pub fn for_each_expr_mut(&mut self, f: &mut dyn FnMut(&mut Expr)) {
        for stmt in self.stmts.iter_mut() {
            stmt.for_each_expr_mut(f);
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateBlock {
    pub block: Block,
    pub span: Option<StringSpan>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub datatype: DataType,
    pub span: Option<StringSpan>,
}

/// `function name(a mV, b ms) real: ... end`
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDef {
    pub name: String,
    pub params: Vec<Param>,
    pub return_type: Option<DataType>,
    pub body: Block,
    pub span: Option<StringSpan>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BodyElement {
    Variables(VarBlock),
    Equations(EquationsBlock),
    Input(InputBlock),
    Output(OutputBlock),
    Update(UpdateBlock),
    Function(FunctionDef),
}

impl BodyElement {
    /// The block kind, or `None` for function definitions (which may repeat).
    pub fn block_kind(&self) -> Option<BlockKind> {
        match self {
            BodyElement::Variables(block) => Some(block.kind.into()),
            BodyElement::Equations(_) => Some(BlockKind::Equations),
            BodyElement::Input(_) => Some(BlockKind::Input),
            BodyElement::Output(_) => Some(BlockKind::Output),
            BodyElement::Update(_) => Some(BlockKind::Update),
            BodyElement::Function(_) => None,
        }
    }

    pub fn span(&self) -> Option<StringSpan> {
        match self {
            BodyElement::Variables(block) => block.span,
            BodyElement::Equations(block) => block.span,
            BodyElement::Input(block) => block.span,
            BodyElement::Output(block) => block.span,
            BodyElement::Update(block) => block.span,
            BodyElement::Function(func) => func.span,
        }
    }
}

/// A single `neuron` compilation unit.
#[derive(Debug, Clone, PartialEq)]
pub struct Model {
    pub name: String,
    pub body: Vec<BodyElement>,
    pub scope: Option<ScopeId>,
    pub span: Option<StringSpan>,
}

impl Model {
    pub fn new(name: &str, body: Vec<BodyElement>) -> Self {
        Self {
            name: name.to_string(),
            body,
            scope: None,
            span: None,
        }
    }

    /// Variable blocks paired with their position in the model body.
    pub fn var_blocks(&self) -> impl Iterator<Item = (usize, &VarBlock)> {
        self.body.iter().enumerate().filter_map(|(i, e)| match e {
            BodyElement::Variables(block) => Some((i, block)),
            _ => None,
        })
    }

    pub fn var_blocks_of(&self, kind: VarBlockKind) -> impl Iterator<Item = &VarBlock> {
        self.var_blocks()
            .map(|(_, block)| block)
            .filter(move |block| block.kind == kind)
    }

    pub fn declarations_of(&self, kind: VarBlockKind) -> impl Iterator<Item = &Declaration> {
        self.var_blocks_of(kind)
            .flat_map(|block| block.declarations.iter())
    }

    pub fn equations_blocks(&self) -> impl Iterator<Item = &EquationsBlock> {
        self.body.iter().filter_map(|e| match e {
            BodyElement::Equations(block) => Some(block),
            _ => None,
        })
    }

    pub fn equation_items(&self) -> impl Iterator<Item = &EquationItem> {
        self.equations_blocks().flat_map(|block| block.items.iter())
    }

    pub fn odes(&self) -> impl Iterator<Item = &OdeEquation> {
        self.equation_items().filter_map(|item| match item {
            EquationItem::Ode(ode) => Some(ode),
            _ => None,
        })
    }

    pub fn shapes(&self) -> impl Iterator<Item = &ShapeDecl> {
        self.equation_items().filter_map(|item| match item {
            EquationItem::Shape(shape) => Some(shape),
            _ => None,
        })
    }

    pub fn aliases(&self) -> impl Iterator<Item = &Declaration> {
        self.equation_items().filter_map(|item| match item {
            EquationItem::Alias(decl) => Some(decl),
            _ => None,
        })
    }

    pub fn input_ports(&self) -> impl Iterator<Item = &InputPort> {
        self.body
            .iter()
            .filter_map(|e| match e {
                BodyElement::Input(block) => Some(block),
                _ => None,
            })
            .flat_map(|block| block.ports.iter())
    }

    pub fn outputs(&self) -> impl Iterator<Item = &OutputBlock> {
        self.body.iter().filter_map(|e| match e {
            BodyElement::Output(block) => Some(block),
            _ => None,
        })
    }

    pub fn update_blocks(&self) -> impl Iterator<Item = &UpdateBlock> {
        self.body.iter().filter_map(|e| match e {
            BodyElement::Update(block) => Some(block),
            _ => None,
        })
    }

    pub fn functions(&self) -> impl Iterator<Item = &FunctionDef> {
        self.body.iter().filter_map(|e| match e {
            BodyElement::Function(func) => Some(func),
            _ => None,
        })
    }

    /// Index of the first variable block of `kind`, creating an empty one at the end if needed.
    pub fn ensure_var_block(&mut self, kind: VarBlockKind) -> usize {
        let existing = self.body.iter().position(|e| match e {
            BodyElement::Variables(block) => block.kind == kind,
            _ => false,
        });
        match existing {
            Some(index) => index,
            None => {
                self.body.push(BodyElement::Variables(VarBlock {
                    kind,
                    declarations: vec![],
                    span: None,
                }));
                self.body.len() - 1
            }
        }
    }

    /// Calls `f` on each outermost expression in the model, in source order.
    pub fn for_each_root_expr<'a>(&'a self, f: &mut dyn FnMut(&'a Expr)) {
        for element in self.body.iter() {
            match element {
                BodyElement::Variables(block) => {
                    for decl in block.declarations.iter() {
                        decl.exprs().for_each(&mut *f);
                    }
                }
                BodyElement::Equations(block) => {
                    for item in block.items.iter() {
                        match item {
                            EquationItem::Shape(shape) => f(&shape.rhs),
                            EquationItem::Ode(ode) => f(&ode.rhs),
                            EquationItem::Alias(decl) => decl.exprs().for_each(&mut *f),
                        }
                    }
                }
                BodyElement::Input(_) | BodyElement::Output(_) => {}
                BodyElement::Update(update) => update.block.for_each_root_expr(f),
                BodyElement::Function(func) => func.body.for_each_root_expr(f),
            }
        }
    }

    /// Visits every expression node of the body element at `index`, in source order.
    pub fn for_each_expr_in_element_mut(&mut self, index: usize, f: &mut dyn FnMut(&mut Expr)) {
        match &mut self.body[index] {
            BodyElement::Variables(block) => {
                for decl in block.declarations.iter_mut() {
                    decl.for_each_expr_mut(f);
                }
            }
            BodyElement::Equations(block) => {
                for item in block.items.iter_mut() {
                    match item {
                        EquationItem::Shape(shape) => shape.rhs.visit_mut(f),
                        EquationItem::Ode(ode) => ode.rhs.visit_mut(f),
                        EquationItem::Alias(decl) => decl.for_each_expr_mut(f),
                    }
                }
            }
            BodyElement::Input(_) | BodyElement::Output(_) => {}
            BodyElement::Update(update) => update.block.for_each_expr_mut(f),
            BodyElement::Function(func) => func.body.for_each_expr_mut(f),
        }
    }

    /// Visits every expression node in the model, in source order.
    pub fn for_each_expr_mut(&mut self, f: &mut dyn FnMut(&mut Expr)) {
        for index in 0..self.body.len() {
            self.for_each_expr_in_element_mut(index, f);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(name: &str) -> Expr {
        Expr::variable(name, 0)
    }

    #[test]
    fn display_respects_precedence() {
        let sum = Expr::binary(BinaryOp::Add, var("a"), var("b"));
        let product = Expr::binary(BinaryOp::Mul, sum.clone(), var("c"));
        assert_eq!(product.to_string(), "(a + b) * c");

        let diff = Expr::binary(
            BinaryOp::Sub,
            var("a"),
            Expr::binary(BinaryOp::Sub, var("b"), var("c")),
        );
        assert_eq!(diff.to_string(), "a - (b - c)");

        let pow = Expr::binary(
            BinaryOp::Pow,
            var("a"),
            Expr::binary(BinaryOp::Pow, var("b"), var("c")),
        );
        assert_eq!(pow.to_string(), "a**b**c");

        let neg = Expr::new(
            ExprKind::Unary {
                op: UnaryOp::Neg,
                operand: Box::new(sum),
            },
            None,
        );
        assert_eq!(neg.to_string(), "-(a + b)");
    }

    #[test]
    fn visit_order_is_source_order() {
        let expr = Expr::binary(
            BinaryOp::Add,
            Expr::call("exp", vec![var("x")]),
            Expr::variable("y", 1),
        );
        let names: Vec<String> = expr
            .variables()
            .iter()
            .filter_map(|e| e.as_variable().map(|v| v.full_name()))
            .collect();
        assert_eq!(names, vec!["x".to_string(), "y'".to_string()]);
    }

    #[test]
    fn ensure_var_block_reuses_existing() {
        let mut model = Model::new(
            "m",
            vec![BodyElement::Variables(VarBlock {
                kind: VarBlockKind::Internals,
                declarations: vec![],
                span: None,
            })],
        );
        assert_eq!(model.ensure_var_block(VarBlockKind::Internals), 0);
        assert_eq!(model.ensure_var_block(VarBlockKind::State), 1);
        assert_eq!(model.body.len(), 2);
    }
}
