#[allow(clippy::module_inception)]
pub mod ast;

pub use ast::{
    AssignOp, BinaryOp, Block, BlockKind, BodyElement, BufferKind, DataType, DataTypeKind,
    Declaration, EquationItem, EquationsBlock, Expr, ExprId, ExprKind, FunctionDef, InputBlock,
    InputPort, InputQualifier, Model, OdeEquation, OutputBlock, Param, ShapeDecl, Stmt, StmtKind,
    StringSpan, UnaryOp, UnitExpr, UpdateBlock, VarBlock, VarBlockKind, VariableName,
    VariableRef,
};
pub use ast::with_primes;
