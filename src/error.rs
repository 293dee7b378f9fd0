use thiserror::Error;

/// Everything that can abort the instrumentation pass. The pass never
/// recovers locally; callers get either a fully instrumented module or one of
/// these.
#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to parse the input module: {0}")]
    Parse(String),

    /// One of the reserved names is already taken, which usually means the
    /// module went through the pass before.
    #[error("module is already instrumented: {0}")]
    AlreadyInstrumented(String),

    #[error("missing entry export: {0}")]
    MissingEntry(String),

    #[error("missing host import: {0}")]
    MissingImport(String),

    #[error("malformed branch: {0}")]
    MalformedBranch(String),

    #[error("unsupported instruction `{0}`")]
    UnsupportedFeature(&'static str),

    #[error("instrumented module failed validation: {0}")]
    PostValidation(String),

    #[error("internal invariant violated: {0}")]
    InvariantViolation(String),
}

pub type Result<T> = std::result::Result<T, Error>;
