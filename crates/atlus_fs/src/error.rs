//! Error types that can be emitted from this library

use miette::Diagnostic;
use thiserror::Error;

/// Error type for library
#[derive(Error, Diagnostic, Debug)]
pub enum Error {
    /// Transparent wrapper for [`std::io::Error`]
    #[error(transparent)]
    IOError(#[from] std::io::Error),

    /// Transparent wrapper for [`binrw::Error`]
    #[error(transparent)]
    BinRWError(#[from] binrw::Error),

    /// stream does not match any known layout of the archive format
    #[error("stream is not a recognised archive")]
    #[diagnostic(help("check that the file is of the format you selected"))]
    InvalidArchive,

    /// archive structure failed validation
    #[error("malformed archive: {0}")]
    MalformedArchive(String),

    /// compressed payload could not be decoded
    #[error("corrupt compressed data: {0}")]
    CorruptData(String),

    /// unable to find requested file
    #[error("unable to find requested file {0}")]
    FileNotFound(#[from] FileNotFoundError),

    /// a file already exists under the handle
    #[error("file already exists {0}")]
    #[diagnostic(help("use a replace or ignore conflict policy to resolve this"))]
    FileExists(#[from] FileExistsError),

    /// the archive does not offer this capability
    #[error("operation is not supported: {0}")]
    Unsupported(&'static str),

    /// name cannot be stored by the archive format
    #[error("invalid entry name: {0}")]
    InvalidName(String),
}

/// Error type to provide further information when a file has not been found
#[derive(Error, Diagnostic, Debug)]
pub enum FileNotFoundError {
    /// at index {0}
    #[error("at index {0}")]
    Index(usize),

    /// by name {0}
    #[error("by name {0}")]
    Name(String),
}

/// Error type to provide further information when adding over an existing file
#[derive(Error, Diagnostic, Debug)]
pub enum FileExistsError {
    /// at index {0}
    #[error("at index {0}")]
    Index(usize),

    /// by name {0}
    #[error("by name {0}")]
    Name(String),
}

/// Generic result type with crate's Error as its error variant
pub type Result<T> = core::result::Result<T, Error>;
