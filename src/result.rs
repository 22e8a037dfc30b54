use crate::compiler::error::CompilerError;

pub type Result<T> = std::result::Result<T, CompilerError>;
