use thiserror::Error;

use crate::PATH_NAME_MAX_LEN;

/// Failure kinds surfaced by file-system operations. The syscall shim and
/// the shell flatten these back to the classic boolean / `-1` contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FsError {
    #[error("no free sectors left for the request")]
    NoSpace,
    #[error("no such file or directory")]
    NotFound,
    #[error("name already exists in the target directory")]
    Exists,
    #[error("path longer than {PATH_NAME_MAX_LEN} bytes")]
    PathTooLong,
    #[error("target directory has no free entry")]
    DirFull,
    #[error("file size exceeds the deepest header level")]
    TooLarge,
    #[error("invalid open-file id")]
    BadHandle,
}

pub type Result<T> = core::result::Result<T, FsError>;
