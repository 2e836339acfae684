//! Error types for scheduling primitives.

use derive_more::{Display, Error};
use loopcraft_ir::{SelectError, ValidationError, ValidationKind};

pub type ScheduleResult<T> = Result<T, ScheduleError>;

/// Why a primitive refused to rewrite a kernel.
///
/// A failed primitive never yields a partially rewritten kernel; the caller
/// still holds its unchanged input.
#[derive(Clone, Debug, PartialEq, Eq, Display, Error)]
pub enum ScheduleError {
    #[display("no match for `{pattern}`")]
    NotFound { pattern: String },

    #[display("`{pattern}` matches {count} locations; add `#k` to pick one")]
    Ambiguous { pattern: String, count: usize },

    #[display("malformed selector `{selector}`: {message}")]
    InvalidSelector { selector: String, message: String },

    #[display("shape mismatch: {reason}")]
    ShapeMismatch { reason: String },

    #[display("alias violation: {reason}")]
    AliasViolation { reason: String },

    #[display("dependency violation: {reason}")]
    DependencyViolation { reason: String },

    #[display("invalid memory space: {reason}")]
    InvalidMemorySpace { reason: String },

    #[display("invalid state: {reason}")]
    InvalidState { reason: String },

    #[display("`{template}` does not match: {reason}")]
    TemplateMismatch { template: String, reason: String },

    #[display("`{what}` needs a constant bound")]
    NotConstantBound { what: String },

    #[display("name `{name}` is already in use")]
    NameCollision { name: String },

    #[display("unknown template `{name}`")]
    UnknownTemplate { name: String },
}

impl ScheduleError {
    pub fn shape(reason: impl std::fmt::Display) -> Self {
        ScheduleError::ShapeMismatch {
            reason: reason.to_string(),
        }
    }

    pub fn alias(reason: impl std::fmt::Display) -> Self {
        ScheduleError::AliasViolation {
            reason: reason.to_string(),
        }
    }

    pub fn dependency(reason: impl std::fmt::Display) -> Self {
        ScheduleError::DependencyViolation {
            reason: reason.to_string(),
        }
    }

    pub fn memory(reason: impl std::fmt::Display) -> Self {
        ScheduleError::InvalidMemorySpace {
            reason: reason.to_string(),
        }
    }

    pub fn state(reason: impl std::fmt::Display) -> Self {
        ScheduleError::InvalidState {
            reason: reason.to_string(),
        }
    }

    pub fn template(template: &str, reason: impl std::fmt::Display) -> Self {
        ScheduleError::TemplateMismatch {
            template: template.to_owned(),
            reason: reason.to_string(),
        }
    }

    pub fn not_constant(what: impl std::fmt::Display) -> Self {
        ScheduleError::NotConstantBound {
            what: what.to_string(),
        }
    }

    pub fn collision(name: &str) -> Self {
        ScheduleError::NameCollision {
            name: name.to_owned(),
        }
    }

    /// Stable variant name, used as a diagnostic code.
    pub fn kind_name(&self) -> &'static str {
        match self {
            ScheduleError::NotFound { .. } => "NotFound",
            ScheduleError::Ambiguous { .. } => "Ambiguous",
            ScheduleError::InvalidSelector { .. } => "InvalidSelector",
            ScheduleError::ShapeMismatch { .. } => "ShapeMismatch",
            ScheduleError::AliasViolation { .. } => "AliasViolation",
            ScheduleError::DependencyViolation { .. } => "DependencyViolation",
            ScheduleError::InvalidMemorySpace { .. } => "InvalidMemorySpace",
            ScheduleError::InvalidState { .. } => "InvalidState",
            ScheduleError::TemplateMismatch { .. } => "TemplateMismatch",
            ScheduleError::NotConstantBound { .. } => "NotConstantBound",
            ScheduleError::NameCollision { .. } => "NameCollision",
            ScheduleError::UnknownTemplate { .. } => "UnknownTemplate",
        }
    }
}

impl From<SelectError> for ScheduleError {
    fn from(error: SelectError) -> Self {
        match error {
            SelectError::NotFound { pattern } => ScheduleError::NotFound { pattern },
            SelectError::Ambiguous { pattern, count } => ScheduleError::Ambiguous { pattern, count },
        }
    }
}

impl From<ValidationError> for ScheduleError {
    fn from(error: ValidationError) -> Self {
        let reason = error.to_string();
        match error.kind {
            ValidationKind::Scope => ScheduleError::alias(reason),
            ValidationKind::Rank | ValidationKind::Type => ScheduleError::shape(reason),
            ValidationKind::Memory => ScheduleError::memory(reason),
            ValidationKind::Template => ScheduleError::TemplateMismatch {
                template: String::new(),
                reason,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_error_conversion() {
        let err: ScheduleError = SelectError::Ambiguous {
            pattern: "for i in _:_".into(),
            count: 2,
        }
        .into();
        assert_eq!(err.kind_name(), "Ambiguous");
        assert_eq!(
            err.to_string(),
            "`for i in _:_` matches 2 locations; add `#k` to pick one"
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(
            ScheduleError::not_constant("for k in _:_").to_string(),
            "`for k in _:_` needs a constant bound"
        );
        assert_eq!(
            ScheduleError::collision("jo").to_string(),
            "name `jo` is already in use"
        );
    }
}
