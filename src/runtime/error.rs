use thiserror::Error;

pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Every failure the parser, evaluator or a built-in can produce. `catch`
/// stores the `Display` form of whichever variant reaches it.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Undefined variable: {name}")]
    UndefinedVariable { name: String },
    #[error("Not enough arguments to {name}")]
    NotEnoughArguments { name: String },
    #[error("{received} arguments passed to function expecting {expected}")]
    ArityMismatch { expected: usize, received: usize },
    #[error("Unclosed list at end of line")]
    UnclosedList,
    #[error("Unexpected end of input in block")]
    UnexpectedEndOfInput,
    #[error("You don't say what to do with: {value}")]
    UnconsumedValue { value: String },
    #[error("Type mismatch: {message}")]
    TypeMismatch { message: String },
    #[error("Cannot compare {left} with {right}")]
    IncomparableTypes {
        left: &'static str,
        right: &'static str,
    },
    #[error("Expected true or false, got: {value}")]
    NonBoolean { value: String },
    #[error("iftrue/iffalse without a preceding test")]
    TestNotSet,
    #[error("Missing dictionary key: {key}")]
    MissingKey { key: String },
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
    #[error("{message}")]
    UserThrown { message: String },
}
