//! Errors raised while decoding session data

/// Extension trait for adding context to errors consistently across crates
pub trait ErrorContext<T> {
    /// Add operation context to an error result
    fn with_context<F>(self, f: F) -> Result<T, String>
    where
        F: FnOnce() -> String;

    /// Add operation context with a static string
    fn with_context_str(self, context: &'static str) -> Result<T, String>;
}

impl<T, E> ErrorContext<T> for Result<T, E>
where
    E: std::fmt::Display,
{
    fn with_context<F>(self, f: F) -> Result<T, String>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|err| format!("{}: {err}", f()))
    }

    fn with_context_str(self, context: &'static str) -> Result<T, String> {
        self.with_context(|| context.to_string())
    }
}

pub type CoreResult<T> = std::result::Result<T, CoreError>;

/// A stored or received session value that cannot be used
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    /// The value does not parse
    #[error("Malformed {field}: {message}")]
    Malformed { field: &'static str, message: String },

    /// The value parses but no timestamp can represent it
    #[error("{field} out of range: {value}")]
    OutOfRange { field: &'static str, value: i64 },
}

impl CoreError {
    pub fn malformed(field: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Malformed {
            field,
            message: err.to_string(),
        }
    }
}
