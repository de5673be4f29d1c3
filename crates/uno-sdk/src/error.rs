//! Error types for the type library

/// Result type for type library operations
pub type TypelibResult<T> = Result<T, TypelibError>;

/// Type library error types
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TypelibError {
    /// A referenced type has not been registered
    #[error("Unknown type: {0}")]
    UnknownType(String),

    /// A type with this name is already registered
    #[error("Duplicate type: {0}")]
    DuplicateType(String),

    /// The named type exists but has the wrong class
    #[error("Type {name} is not {expected}")]
    WrongClass {
        /// Type name
        name: String,
        /// What the caller needed
        expected: &'static str,
    },

    /// A member was declared twice on one interface or compound
    #[error("Duplicate member {member} in {owner}")]
    DuplicateMember {
        /// Declaring type
        owner: String,
        /// Member name
        member: String,
    },
}
