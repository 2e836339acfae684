use derive_more::{Display, Error};

pub type EvalResult<T> = Result<T, EvalError>;

/// Why a kernel could not be executed.
#[derive(Clone, Debug, PartialEq, Eq, Display, Error)]
pub enum EvalError {
    #[display("no value given for size `{name}`")]
    MissingSize { name: String },

    #[display("no tensor given for buffer `{name}`")]
    MissingBuffer { name: String },

    #[display("size `{name}` must be at least 1, got {value}")]
    InvalidSize { name: String, value: i64 },

    #[display("`{buffer}` expects {expected}, got {found}")]
    ShapeMismatch {
        buffer: String,
        expected: String,
        found: String,
    },

    #[display("unknown name `{name}`")]
    UnknownName { name: String },

    #[display("index {index} is out of bounds for `{buffer}`")]
    OutOfBounds { buffer: String, index: String },

    #[display("division by zero in `{expr}`")]
    DivisionByZero { expr: String },

    #[display("unknown template `{name}`")]
    UnknownTemplate { name: String },

    #[display("unsupported: {what}")]
    Unsupported { what: String },
}

impl EvalError {
    pub fn unsupported(what: impl std::fmt::Display) -> Self {
        EvalError::Unsupported {
            what: what.to_string(),
        }
    }
}
