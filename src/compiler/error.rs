//! Defines the error types which are used by the backend.
//!
//! Every error here is a contract violation: malformed program data reaching
//! a backend stage is a defect in an earlier stage, not a recoverable user
//! error. Advisory conditions (narrowing assignments, signedness mismatches)
//! are not errors; they are logged and generation continues.

use std::fmt::{self, Display};

use super::obj::StorageClass;

/// Errors raised while building or mutating a storage object.
#[derive(Debug, Clone, PartialEq)]
pub enum ObjectError {
    /// The storage class is assigned exactly once.
    ClassAlreadySet(String),
    /// The element count of an array is assigned exactly once and must not be zero.
    ZeroCount(String),
    /// The object is not of the kind the operation requires.
    WrongKind { label: String, expected: &'static str },
}

impl Display for ObjectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectError::ClassAlreadySet(lbl) => {
                write!(f, "storage class of {} is already set", lbl)
            }
            ObjectError::ZeroCount(lbl) => {
                write!(f, "array {} cannot have a count of 0", lbl)
            }
            ObjectError::WrongKind { label, expected } => {
                write!(f, "{} is not a {}", label, expected)
            }
        }
    }
}

/// Errors raised by the program registry.
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryError {
    /// An object with this label is already registered.
    Duplicate(String),
    /// No object with this label is registered.
    NotFound(String),
    /// Only temporaries may be registered without a label.
    Unnamed,
}

impl Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::Duplicate(lbl) => write!(f, "{} already exists", lbl),
            RegistryError::NotFound(lbl) => write!(f, "{} is not registered", lbl),
            RegistryError::Unnamed => f.write_str("only temporaries may be unnamed"),
        }
    }
}

/// Errors raised by the instruction and block layer.
#[derive(Debug, Clone, PartialEq)]
pub enum IrError {
    /// A routine must contain at least one instruction.
    EmptyStream,
    /// An instruction is missing an operand its opcode requires.
    MalformedQuad(&'static str),
}

impl Display for IrError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IrError::EmptyStream => f.write_str("routine has no instructions"),
            IrError::MalformedQuad(op) => {
                write!(f, "{} quad is missing a required operand", op)
            }
        }
    }
}

/// Errors raised while computing sizes and offsets.
#[derive(Debug, Clone, PartialEq)]
pub enum LayoutError {
    /// An array whose element type was never supplied cannot be sized.
    MissingChild(String),
    /// An 8-byte width is only valid in 64-bit mode.
    BadWidth(String),
    /// The object kind carries no size at all (labels, routines).
    Unsizable(String),
}

impl Display for LayoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayoutError::MissingChild(lbl) => {
                write!(f, "array {} has no element type", lbl)
            }
            LayoutError::BadWidth(lbl) => {
                write!(f, "{}: 8-byte width is only valid in 64-bit mode", lbl)
            }
            LayoutError::Unsizable(lbl) => write!(f, "{} has no size", lbl),
        }
    }
}

/// Errors raised during code generation.
#[derive(Debug, Clone, PartialEq)]
pub enum GenError {
    /// Only protected and long mode are supported.
    UnsupportedMode(&'static str),
    /// An operand slot the opcode requires is empty.
    NullOperand { routine: String, op: &'static str },
    /// The object has the wrong storage class for this position.
    WrongClass {
        label: String,
        class: Option<StorageClass>,
    },
    /// The object was never sized; the layout resolver must run first.
    Unsized(String),
    /// A member operand was reached without a resolved base address.
    NoBase(String),
    /// A routine needed more spill slots than the liveness pass reported.
    SpillOverflow(String),
    /// All of a routine's blocks were eliminated.
    EmptyRoutine(String),
}

impl Display for GenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GenError::UnsupportedMode(m) => write!(f, "{} mode is not supported", m),
            GenError::NullOperand { routine, op } => {
                write!(f, "in {}: {} quad is missing a required operand", routine, op)
            }
            GenError::WrongClass { label, class } => {
                write!(f, "{} has the wrong storage class ({:?})", label, class)
            }
            GenError::Unsized(lbl) => write!(f, "{} reached the generator unsized", lbl),
            GenError::NoBase(lbl) => {
                write!(f, "member {} reached without a base address", lbl)
            }
            GenError::SpillOverflow(r) => {
                write!(f, "routine {} ran out of temporary spill slots", r)
            }
            GenError::EmptyRoutine(r) => write!(f, "routine {} has no code", r),
        }
    }
}

/// Represents all errors that are generated from within the backend and its
/// submodules. Submodule errors are stored in the corresponding variant and
/// convert up with `?`.
#[derive(Debug)]
pub enum CompilerError {
    Object(ObjectError),
    Registry(RegistryError),
    Ir(IrError),
    Layout(LayoutError),
    Gen(GenError),
    Io(std::io::Error),
}

impl Display for CompilerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompilerError::Object(e) => write!(f, "object: {}", e),
            CompilerError::Registry(e) => write!(f, "registry: {}", e),
            CompilerError::Ir(e) => write!(f, "ir: {}", e),
            CompilerError::Layout(e) => write!(f, "layout: {}", e),
            CompilerError::Gen(e) => write!(f, "codegen: {}", e),
            CompilerError::Io(e) => write!(f, "io: {}", e),
        }
    }
}

impl From<ObjectError> for CompilerError {
    fn from(e: ObjectError) -> Self {
        CompilerError::Object(e)
    }
}

impl From<RegistryError> for CompilerError {
    fn from(e: RegistryError) -> Self {
        CompilerError::Registry(e)
    }
}

impl From<IrError> for CompilerError {
    fn from(e: IrError) -> Self {
        CompilerError::Ir(e)
    }
}

impl From<LayoutError> for CompilerError {
    fn from(e: LayoutError) -> Self {
        CompilerError::Layout(e)
    }
}

impl From<GenError> for CompilerError {
    fn from(e: GenError) -> Self {
        CompilerError::Gen(e)
    }
}

impl From<std::io::Error> for CompilerError {
    fn from(e: std::io::Error) -> Self {
        CompilerError::Io(e)
    }
}
