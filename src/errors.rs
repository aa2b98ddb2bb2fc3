use std::path::PathBuf;
use thiserror::Error;

/// Main error type for bundt
#[derive(Error, Debug)]
pub enum BundtError {
    #[error("Missing `package.json` file in {}", dir.display())]
    MissingManifest { dir: PathBuf },

    #[error("Invalid `package.json` file: {}", path.display())]
    ManifestParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Missing \"{field}\" in `package.json` file")]
    MissingField { field: &'static str },

    #[error("Missing `{basename}.([cm]?[tj]sx?)` file for \"{export}\" entry")]
    MissingEntry { basename: String, export: String },

    #[error("Generating \"{output}\" output using different configurations!")]
    ConfigConflict { output: String },

    #[error("Unknown \"{condition}\" condition for \"{export}\" entry")]
    UnknownCondition { condition: String, export: String },

    #[error("Failed to compile {}: {message}", entry.display())]
    Compile {
        entry: PathBuf,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Customization hook failed for \"{export}\" ({condition}): {message}")]
    Hook {
        export: String,
        condition: String,
        message: String,
    },

    #[error("File system error: {message}")]
    FileSystem {
        message: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, BundtError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Manifest,
    Resolution,
    Configuration,
    Compile,
    FileSystem,
    Internal,
}

impl BundtError {
    pub fn file_system_error(
        message: impl Into<String>,
        path: impl Into<PathBuf>,
        source: std::io::Error,
    ) -> Self {
        Self::FileSystem {
            message: message.into(),
            path: path.into(),
            source,
        }
    }

    pub fn compile_error(entry: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Compile {
            entry: entry.into(),
            message: message.into(),
            source: None,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Compile failures degrade a single output; everything else aborts the build.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Compile { .. })
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::MissingManifest { .. }
            | Self::ManifestParse { .. }
            | Self::MissingField { .. } => ErrorCategory::Manifest,

            Self::MissingEntry { .. } => ErrorCategory::Resolution,

            Self::ConfigConflict { .. }
            | Self::UnknownCondition { .. }
            | Self::Hook { .. } => ErrorCategory::Configuration,

            Self::Compile { .. } => ErrorCategory::Compile,

            Self::FileSystem { .. } => ErrorCategory::FileSystem,

            Self::Internal { .. } => ErrorCategory::Internal,
        }
    }
}

impl From<std::io::Error> for BundtError {
    fn from(err: std::io::Error) -> Self {
        Self::FileSystem {
            message: err.to_string(),
            path: PathBuf::new(),
            source: err,
        }
    }
}
