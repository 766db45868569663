pub mod scope;
pub mod symbol;
pub mod table;
pub mod types;

pub use scope::{Scope, ScopeId, ScopeKind};
pub use symbol::{
    DeclSite, FunctionSymbol, ParamKind, ReturnKind, Symbol, SymbolRef, VariableBlock,
    VariableSymbol,
};
pub use table::{BuildIssue, SymbolError, SymbolTable};
pub use types::TypeSymbol;
