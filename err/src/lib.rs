#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] IoError),
    #[error("FS: {0}")]
    Fs(#[from] FsError),
}

#[derive(thiserror::Error, Debug)]
pub enum IoError {
    #[error("Cluster {0} out of range")]
    OutOfRange(u16),
    #[error("Buffer of {0} bytes is not a whole cluster")]
    BufferSize(usize),
    #[error("Backing file: {0}")]
    Backing(#[from] std::io::Error),
}

#[derive(thiserror::Error, Debug)]
pub enum FsError {
    #[error("Invalid path")]
    InvalidPath,
    #[error("Name too long")]
    NameTooLong,
    #[error("No such file or directory")]
    NotFound,
    #[error("Not a directory")]
    NotADirectory,
    #[error("Not a file")]
    NotAFile,
    #[error("Directory full")]
    DirectoryFull,
    #[error("No space left on partition")]
    NoSpace,
    #[error("Directory not empty")]
    NotEmpty,
    #[error("Root directory cannot be removed")]
    RootUnlink,
    #[error("File system not loaded")]
    NotLoaded,
    #[error("Inconsistent")]
    Inconsistent,
}

pub type Result<T> = core::result::Result<T, Error>;
