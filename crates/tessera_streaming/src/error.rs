//! # Streaming Error Types
//!
//! All errors that can occur in the streaming service and the replication
//! codec.

use thiserror::Error;

/// Errors produced by the authoritative streaming service.
#[derive(Error, Debug)]
pub enum StreamingError {
    /// A background worker panicked; the service cannot continue.
    #[error("worker '{worker}' panicked")]
    WorkerPanicked {
        /// Thread name of the worker.
        worker: &'static str,
    },

    /// A worker thread could not be started.
    #[error("failed to spawn worker '{worker}': {source}")]
    Spawn {
        /// Thread name of the worker.
        worker: &'static str,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// A pipeline channel was closed while the service was running.
    #[error("pipeline channel '{0}' closed")]
    ChannelClosed(&'static str),

    /// The terrain config failed validation.
    #[error(transparent)]
    Config(#[from] tessera_shared::ConfigError),
}

/// Result type for streaming operations.
pub type StreamingResult<T> = Result<T, StreamingError>;

/// Errors produced when decoding a replicated tile payload.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The payload ended before a field could be read.
    #[error("payload truncated: needed {needed} bytes at offset {offset}, {available} available")]
    Truncated {
        /// Read offset.
        offset: usize,
        /// Bytes requested.
        needed: usize,
        /// Bytes left.
        available: usize,
    },

    /// The payload does not start with the expected magic number.
    #[error("bad payload magic {0:#010x}")]
    BadMagic(u32),

    /// The payload was produced by an incompatible format version.
    #[error("unsupported payload version {0}")]
    UnsupportedVersion(u16),

    /// The compressed body could not be decompressed.
    #[error("decompression failed: {0}")]
    Decompress(String),

    /// A field holds a value outside its domain.
    #[error("invalid field '{field}'")]
    InvalidField {
        /// Name of the field.
        field: &'static str,
    },

    /// Buffer sizes do not match the declared tile layout.
    #[error("inconsistent dimensions: {0}")]
    InconsistentDimensions(&'static str),

    /// Bytes were left over after the last field.
    #[error("{0} trailing bytes after payload")]
    TrailingBytes(usize),
}

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;
