use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("walkdir error: {0}")]
    WalkDir(#[from] walkdir::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("failed to replace {}: {source}", .path.display())]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("photo root does not exist: {}", .0.display())]
    RootNotFound(PathBuf),

    #[error("photo root is not a directory: {}", .0.display())]
    RootNotDirectory(PathBuf),

    #[error("folder does not exist: {}", .0.display())]
    FolderNotFound(PathBuf),

    #[error("folder {} is outside the photo root {}", .folder.display(), .root.display())]
    FolderOutsideRoot { folder: PathBuf, root: PathBuf },

    #[error("analysis already running for {}", .0.display())]
    AnalysisInProgress(PathBuf),

    #[error("record {} does not belong to folder {}", .path.display(), .folder.display())]
    ForeignRecord { path: PathBuf, folder: PathBuf },

    #[error("cache schema version {db} is newer than supported version {code}")]
    SchemaTooNew { db: u32, code: u32 },

    #[error("cache has schema version {found:?}, expected {expected}")]
    SchemaMismatch { found: Option<u32>, expected: u32 },

    #[error("no group labelled `{0}`")]
    GroupNotFound(String),

    #[error("invalid setting `{key}`: {message}")]
    InvalidSetting { key: String, message: String },

    #[error("unknown setting `{0}`")]
    UnknownSetting(String),
}

pub type Result<T> = std::result::Result<T, Error>;
