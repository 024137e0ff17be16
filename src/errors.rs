use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, EnsembleError>;

/// Coarse classification used by the orchestrator to decide
/// whether an error aborts the run or only the current unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Config,
    Discovery,
    GridMismatch,
    Compute,
    Io,
}

#[derive(thiserror::Error, Debug)]
pub enum EnsembleError {
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("no input files for {0}")]
    Discovery(String),
    #[error("grid mismatch: {0}")]
    GridMismatch(String),
    #[error("cannot compute: {0}")]
    Compute(String),
    #[error("io error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    TomlError(#[from] toml::de::Error),
    #[error(transparent)]
    TomlSerError(#[from] toml::ser::Error),
    #[error(transparent)]
    NdarrayError(#[from] ndarray::ShapeError),
    #[cfg(feature = "gdal")]
    #[error(transparent)]
    GdalError(#[from] gdal::errors::GdalError),
    #[cfg(feature = "proj")]
    #[error(transparent)]
    ProjError(#[from] proj::ProjError),
    #[cfg(feature = "proj")]
    #[error(transparent)]
    ProjCreateError(#[from] proj::ProjCreateError),
}

impl EnsembleError {
    pub fn grid_mismatch(msg: impl Into<String>) -> Self {
        Self::GridMismatch(msg.into())
    }

    pub fn compute(msg: impl Into<String>) -> Self {
        Self::Compute(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) | Self::TomlError(_) | Self::TomlSerError(_) => ErrorKind::Config,
            Self::Discovery(_) => ErrorKind::Discovery,
            Self::GridMismatch(_) | Self::NdarrayError(_) => ErrorKind::GridMismatch,
            Self::Compute(_) => ErrorKind::Compute,
            Self::Io { .. } => ErrorKind::Io,
            #[cfg(feature = "gdal")]
            Self::GdalError(_) => ErrorKind::Io,
            // A polygon that cannot be brought into the grid crs can't be masked.
            #[cfg(feature = "proj")]
            Self::ProjError(_) | Self::ProjCreateError(_) => ErrorKind::GridMismatch,
        }
    }

    /// Whether this error must abort the whole run instead of a single unit.
    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::Config
    }
}
