use thiserror::Error;

use crate::instrument::MethodSignature;
use crate::registry::{DecoratorKind, TypeDescriptor};

#[derive(Debug, Error)]
pub enum BatonError {
    #[error("worker entry point not found on {target}: neither {primary} nor {fallback} is declared")]
    EntryPointNotFound {
        target: TypeDescriptor,
        primary: MethodSignature,
        fallback: String,
    },

    #[error("found the wrong worker entry point {found} of {target}")]
    StructuralMismatch {
        target: TypeDescriptor,
        found: MethodSignature,
    },

    #[error("duplicate decorator for role={0}")]
    DuplicateRole(TypeDescriptor),

    #[error("duplicate supported pool type={0}")]
    DuplicatePool(TypeDescriptor),

    #[error("context snapshot of the decorated task was released after run")]
    SnapshotReleased,

    #[error(transparent)]
    Injection(#[from] InjectionError),

    #[error("invalid config: {0}")]
    Config(String),
}

/// Errors raised by a [`CodeInjector`](crate::ports::CodeInjector).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InjectionError {
    #[error("type {0} is not known to the injector")]
    UnknownType(TypeDescriptor),

    #[error("method {method} is not declared on {target}")]
    NoSuchMethod {
        target: TypeDescriptor,
        method: MethodSignature,
    },

    #[error("argument index {index} is out of range for {method}")]
    ArgumentOutOfRange { method: MethodSignature, index: usize },

    #[error("argument {index} of {method} is {found}, cannot apply the {kind} decorator")]
    ArgumentKindMismatch {
        method: MethodSignature,
        index: usize,
        found: TypeDescriptor,
        kind: DecoratorKind,
    },

    #[error("type {0} was already emitted")]
    AlreadyEmitted(TypeDescriptor),
}
