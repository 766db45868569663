use thiserror::Error;

use crate::error::ErrorCode;

pub mod checker;

pub use checker::{TypeChecker, TypeTable};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TypeError {
    #[error("{0}")]
    IncompatibleUnits(String),
    #[error("{0}")]
    IncompatibleTypes(String),
    #[error("{0}")]
    NonBooleanCondition(String),
    #[error("The function '{name}' with the signature '{signature}' does not exist.")]
    FunctionDoesNotExist { name: String, signature: String },
}

impl TypeError {
    pub fn code(&self) -> ErrorCode {
        match self {
            TypeError::IncompatibleUnits(_) => ErrorCode::IncompatibleUnits,
            TypeError::IncompatibleTypes(_) => ErrorCode::IncompatibleTypes,
            TypeError::NonBooleanCondition(_) => ErrorCode::NonBooleanCondition,
            TypeError::FunctionDoesNotExist { .. } => ErrorCode::FunctionDoesNotExist,
        }
    }
}
