use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

use crate::path::PathSegment;

#[derive(Debug, Error, Diagnostic)]
pub enum StudyError {
    #[error("account has neither a username nor an account_name")]
    InvalidAccount,

    #[error("no {0} selected")]
    #[diagnostic(help("select an account, a project and a study before requesting artifacts"))]
    MissingSelection(PathSegment),

    #[error("Pollination request failed: {0}")]
    ApiHttp(String),

    #[error("Pollination returned status {status}: {message}")]
    ApiStatus { status: u16, message: String },

    #[error("artifact download returned status {status}")]
    RetrievalFailed { status: u16 },

    #[error("cannot derive a file extension from {0:?}")]
    UnknownExtension(String),

    #[error("unexpected payload from Pollination: {0}")]
    UnexpectedPayload(String),

    #[error("no API key configured")]
    #[diagnostic(help("set POLLINATION_API_KEY or add \"api_key\" to pstudy.json"))]
    MissingApiKey,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("failed to read recipe file at {0}")]
    RecipeRead(PathBuf),

    #[error("failed to parse recipe file: {0}")]
    RecipeParse(String),

    #[error("invalid file name pattern: {0}")]
    InvalidPattern(String),

    #[error("invalid recipe input: {0}")]
    InvalidInput(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("nothing to download: select an artifact first")]
    NothingToDownload,
}
