use thiserror::Error;

/// Errors raised while reading or evaluating.
///
/// The display string of every catchable variant starts with the kind's
/// name; `trap` stores exactly that string as its failure description.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    /// Wrong arity, wrong operand shape, or a non-symbol where a symbol is required.
    #[error("malformed-form: {0}")]
    Malformed(String),

    /// A variable (or environment ancestor) that does not exist.
    #[error("unbound-variable: {0}")]
    Unbound(String),

    /// An operand failed a required-type check.
    #[error("type-mismatch: {0}")]
    Type(String),

    /// Unknown foreign group or function.
    #[error("name-lookup: {0}")]
    NameLookup(String),

    /// Raised by the `error` primitive.
    #[error("user-error: {0}")]
    User(String),

    /// Division by zero, integer overflow.
    #[error("arithmetic-error: {0}")]
    Arithmetic(String),

    /// Reader error.
    #[error("read-error: {0}")]
    Read(String),

    /// Cell capacity exceeded.
    #[error("heap-exhausted: {0} cells in use")]
    HeapExhausted(usize),

    /// Step budget exceeded.
    #[error("step-limit: exceeded {0} steps")]
    StepLimit(u64),

    /// Raised by `exit`. Never caught by `trap`.
    #[error("exit {status}")]
    Exit { status: i32, message: Option<String> },

    /// Internal interpreter error (should not happen in correct code).
    #[error("internal-error: {0}")]
    Internal(String),
}

impl EvalError {
    /// Whether `trap` may convert this error into a failure pair.
    pub fn is_catchable(&self) -> bool {
        !matches!(self, EvalError::Exit { .. } | EvalError::StepLimit(_))
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        EvalError::Malformed(msg.into())
    }

    pub fn mistype(msg: impl Into<String>) -> Self {
        EvalError::Type(msg.into())
    }
}

pub type EvalResult<T> = Result<T, EvalError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_starts_with_kind() {
        assert_eq!(EvalError::User("boom".into()).to_string(), "user-error: boom");
        assert_eq!(
            EvalError::Unbound("x".into()).to_string(),
            "unbound-variable: x"
        );
        assert_eq!(
            EvalError::malformed("expected two args").to_string(),
            "malformed-form: expected two args"
        );
    }

    #[test]
    fn exit_and_step_limit_escape_trap() {
        assert!(!EvalError::Exit { status: 3, message: None }.is_catchable());
        assert!(!EvalError::StepLimit(10).is_catchable());
        assert!(EvalError::mistype("nand").is_catchable());
        assert!(EvalError::HeapExhausted(4).is_catchable());
    }
}
