use thiserror::Error;

/// A malformed function declaration. The function is left unregistered.
#[derive(Debug, Error)]
pub enum DeclarationError {
    #[error("unsupported signature for '{function}': {reason}")]
    UnsupportedSignature { function: String, reason: String },

    #[error("argument override '{arg}' does not match any parameter of '{function}'")]
    UnknownArgOverride { function: String, arg: String },

    #[error("keywords parameter '{arg}' of '{function}' must be the last parameter")]
    MisplacedKeywords { function: String, arg: String },

    #[error("'{function}': threaded, command or async functions cannot be local")]
    LocalConflict { function: String },

    #[error("'{function}': commands cannot return a value")]
    CommandReturnsValue { function: String },

    #[error("'{function}': commands cannot be async")]
    AsyncCommand { function: String },

    #[error("'{function}' is not a coroutine or async generator")]
    NotAsync { function: String },
}

/// Raised by a converter while converting a call argument or return value.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConversionError {
    #[error("expected {expected}, got {found}")]
    Mismatch {
        expected: &'static str,
        found: String,
    },

    #[error("argument '{arg}': {source}")]
    Argument {
        arg: String,
        #[source]
        source: Box<ConversionError>,
    },

    #[error("keywords argument '{arg}' must be a two-column table of key/value pairs")]
    KeywordTable { arg: String },

    #[error("no cached object for reference '{0}'")]
    CacheMiss(String),

    #[error("expected at most {expected} arguments, got {got}")]
    TooManyArgs { expected: usize, got: usize },
}

impl ConversionError {
    pub(crate) fn mismatch(expected: &'static str, found: &crate::value::Value) -> Self {
        ConversionError::Mismatch {
            expected,
            found: found.type_name().to_string(),
        }
    }
}

/// Failure reported by the host while registering descriptors.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("function '{name}' is already registered by module '{owner}'")]
    NameConflict { name: String, owner: String },
}
