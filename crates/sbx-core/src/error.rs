use thiserror::Error;

pub type SbxResult<T> = Result<T, SbxError>;

/// Behavioural error taxonomy for the whole suite.
///
/// Every failure a caller can act on differently gets its own variant;
/// `kind()` yields the stable name that command-line wrappers put in their
/// failure text so scripts can tell an `IntegrityFailure` from a `Transient`
/// backend hiccup.
#[derive(Debug, Error)]
pub enum SbxError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("malformed ciphertext: {0}")]
    MalformedCiphertext(String),

    #[error("malformed padding")]
    MalformedPadding,

    #[error("malformed reference: {0}")]
    MalformedReference(String),

    #[error("integrity failure: {0}")]
    IntegrityFailure(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("transient backend error: {0}")]
    Transient(String),

    #[error("permanent backend error: {0}")]
    Permanent(String),

    #[error("upload failed: {reason}; {} chunk(s) may have leaked", leaked.len())]
    UploadFailed { reason: String, leaked: Vec<String> },

    #[error("partial delete: {} chunk(s) survive", surviving.len())]
    PartialDelete { surviving: Vec<String> },

    #[error("authentication failure: {0}")]
    AuthFailure(String),

    #[error("pgp error: {0}")]
    Pgp(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SbxError {
    /// Stable behavioural name, used verbatim in CLI failure output.
    pub fn kind(&self) -> &'static str {
        match self {
            SbxError::InvalidArgument(_) => "InvalidArgument",
            SbxError::MalformedCiphertext(_) => "MalformedCiphertext",
            SbxError::MalformedPadding => "MalformedPadding",
            SbxError::MalformedReference(_) => "MalformedReference",
            SbxError::IntegrityFailure(_) => "IntegrityFailure",
            SbxError::NotFound(_) => "NotFound",
            SbxError::AlreadyExists(_) => "AlreadyExists",
            SbxError::Transient(_) => "Transient",
            SbxError::Permanent(_) => "Permanent",
            SbxError::UploadFailed { .. } => "UploadFailed",
            SbxError::PartialDelete { .. } => "PartialDelete",
            SbxError::AuthFailure(_) => "AuthFailure",
            SbxError::Pgp(_) => "Pgp",
            SbxError::Io(_) => "Io",
        }
    }

    /// Whether a bounded retry is worth attempting.
    pub fn is_transient(&self) -> bool {
        matches!(self, SbxError::Transient(_))
    }
}
