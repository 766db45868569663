use std::fmt;

use itertools::Itertools;

use crate::ast::{Block, BufferKind, Expr, StringSpan};
use crate::units::UnitType;

use super::TypeSymbol;

/// Which part of the model a variable was declared in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VariableBlock {
    State,
    Parameter,
    Internal,
    Shape,
    InputBuffer(BufferKind),
    Alias,
    Local,
    Predefined,
}

impl fmt::Display for VariableBlock {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            VariableBlock::State => write!(f, "state"),
            VariableBlock::Parameter => write!(f, "parameters"),
            VariableBlock::Internal => write!(f, "internals"),
            VariableBlock::Shape => write!(f, "shape"),
            VariableBlock::InputBuffer(kind) => write!(f, "{} input", kind),
            VariableBlock::Alias => write!(f, "equations"),
            VariableBlock::Local => write!(f, "local"),
            VariableBlock::Predefined => write!(f, "predefined"),
        }
    }
}

/// Where a declaration sits, used for the defined-before-use rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeclSite {
    /// A state/parameters/internals block, by position in the model body.
    VarBlock(usize),
    Equations,
    Input,
    Statement,
    Builtin,
}

#[derive(Debug, Clone)]
pub struct VariableSymbol {
    /// Full name including derivative primes, e.g. `V_m'`.
    pub name: String,
    pub type_symbol: TypeSymbol,
    pub block: VariableBlock,
    pub initializer: Option<Expr>,
    pub invariant: Option<Expr>,
    pub vector_size: Option<String>,
    pub site: DeclSite,
    pub is_recordable: bool,
    /// Added by the table itself, e.g. the `x'` state implied by an equation for `x''`.
    pub is_implicit: bool,
    pub span: Option<StringSpan>,
}

impl VariableSymbol {
    pub fn new(name: &str, type_symbol: TypeSymbol, block: VariableBlock, site: DeclSite) -> Self {
        Self {
            name: name.to_string(),
            type_symbol,
            block,
            initializer: None,
            invariant: None,
            vector_size: None,
            site,
            is_recordable: false,
            is_implicit: false,
            span: None,
        }
    }

    pub fn is_vector(&self) -> bool {
        self.vector_size.is_some()
    }

    pub fn is_buffer(&self) -> bool {
        matches!(self.block, VariableBlock::InputBuffer(_))
    }
}

/// Accepted argument type for one function parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamKind {
    Exact(TypeSymbol),
    AnyNumeric,
    /// Must be compatible with the argument at the given position.
    SameAs(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReturnKind {
    Fixed(TypeSymbol),
    /// The (vector-stripped) type of the argument at the given position.
    SameAs(usize),
}

#[derive(Debug, Clone)]
pub struct FunctionSymbol {
    pub name: String,
    pub params: Vec<ParamKind>,
    pub return_kind: ReturnKind,
    /// Absent for built-in functions.
    pub body: Option<Block>,
    pub span: Option<StringSpan>,
}

impl FunctionSymbol {
    pub fn builtin(name: &str, params: Vec<ParamKind>, return_kind: ReturnKind) -> Self {
        Self {
            name: name.to_string(),
            params,
            return_kind,
            body: None,
            span: None,
        }
    }

    pub fn is_builtin(&self) -> bool {
        self.body.is_none()
    }

    /// Whether the argument types satisfy this signature.
    pub fn accepts(&self, args: &[TypeSymbol]) -> bool {
        if args.len() != self.params.len() {
            return false;
        }
        self.params.iter().zip(args.iter()).all(|(param, arg)| match param {
            ParamKind::Exact(expected) => arg.check_assignable(expected).is_ok(),
            ParamKind::AnyNumeric => arg.is_error() || arg.is_numeric(),
            ParamKind::SameAs(index) => {
                (arg.is_error() || arg.is_numeric()) && arg.is_compatible(&args[*index])
            }
        })
    }

    pub fn return_type(&self, args: &[TypeSymbol]) -> TypeSymbol {
        match &self.return_kind {
            ReturnKind::Fixed(ty) => ty.clone(),
            ReturnKind::SameAs(index) => args
                .get(*index)
                .map(|ty| ty.element().clone())
                .unwrap_or(TypeSymbol::Error),
        }
    }
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ParamKind::Exact(ty) => write!(f, "{}", ty),
            ParamKind::AnyNumeric => write!(f, "numeric"),
            ParamKind::SameAs(index) => write!(f, "same as #{}", index + 1),
        }
    }
}

impl fmt::Display for FunctionSymbol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}({})",
            self.name,
            self.params.iter().map(|p| p.to_string()).join(", ")
        )
    }
}

#[derive(Debug, Clone)]
pub enum Symbol {
    Variable(VariableSymbol),
    Function(FunctionSymbol),
}

impl Symbol {
    pub fn name(&self) -> &str {
        match self {
            Symbol::Variable(var) => &var.name,
            Symbol::Function(func) => &func.name,
        }
    }

    pub fn span(&self) -> Option<StringSpan> {
        match self {
            Symbol::Variable(var) => var.span,
            Symbol::Function(func) => func.span,
        }
    }

    pub fn as_ref(&self) -> SymbolRef<'_> {
        match self {
            Symbol::Variable(var) => SymbolRef::Variable(var),
            Symbol::Function(func) => SymbolRef::Function(func),
        }
    }
}

/// The result of resolving a name. Unit names resolve to a `Type` that is built on demand.
#[derive(Debug, Clone)]
pub enum SymbolRef<'a> {
    Variable(&'a VariableSymbol),
    Function(&'a FunctionSymbol),
    Type(UnitType),
}

impl<'a> SymbolRef<'a> {
    pub fn as_variable(&self) -> Option<&'a VariableSymbol> {
        match self {
            SymbolRef::Variable(var) => Some(*var),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&'a FunctionSymbol> {
        match self {
            SymbolRef::Function(func) => Some(*func),
            _ => None,
        }
    }
}
