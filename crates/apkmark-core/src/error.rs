use thiserror::Error;

pub type ApkmarkResult<T> = Result<T, ApkmarkError>;

#[derive(Debug, Error)]
pub enum ApkmarkError {
    /// ZIP64 archives, or a trailer with no usable end-of-directory record.
    #[error("unsupported container format: {0}")]
    UnsupportedContainerFormat(String),

    #[error("APK signing block not found (directory offset {offset}): {reason}")]
    SignatureBlockNotFound { offset: u64, reason: String },

    #[error("malformed APK signing block at offset {offset}: {reason}")]
    MalformedSigningBlock { offset: u64, reason: String },

    /// A digester was finished while part of a chunk was still buffered.
    #[error("digester holds {pending} bytes of an unfinished chunk")]
    IncompleteDigestState { pending: usize },

    #[error("invalid verity header: {0}")]
    InvalidVerityHeader(String),

    #[error("range {offset}+{length} is out of bounds for a region of {size} bytes")]
    OutOfBounds { offset: u64, length: u64, size: u64 },

    #[error("offset overflow: {0}")]
    OffsetOverflow(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ApkmarkError {
    pub(crate) fn out_of_bounds(offset: u64, length: u64, size: u64) -> Self {
        Self::OutOfBounds {
            offset,
            length,
            size,
        }
    }
}
