//! Error types for native module hosting

use crate::ffi::FfiStatus;
use crate::loader::ModuleHandle;
use crate::version::VersionRange;
use std::path::PathBuf;
use thiserror::Error;

pub use luden_core::RegistryError;

/// Result type for module operations
pub type Result<T> = std::result::Result<T, ModuleError>;

/// Failures while bringing a module binary up to `Active`
#[derive(Debug, Error)]
pub enum LoadError {
    /// Path does not exist
    #[error("Module binary '{0}' does not exist")]
    FileNotFound(PathBuf),

    /// The OS loader rejected the binary
    #[error("Failed to open module binary '{path}': {message}")]
    OpenFailed { path: PathBuf, message: String },

    /// A required entry point is missing
    #[error("Symbol '{symbol}' not found in module '{module}'")]
    SymbolNotFound { module: String, symbol: String },

    /// Module version outside the accepted range
    #[error("Module '{module}' reports version {found}, accepted range is {accepted}")]
    VersionMismatch {
        module: String,
        found: u32,
        accepted: VersionRange,
    },

    /// Factory returned null or an incomplete object
    #[error("Module '{module}' failed to construct: {reason}")]
    ConstructionFailed { module: String, reason: String },

    /// `on_load` reported failure
    #[error("OnLoad of module '{module}' failed with {status}")]
    OnLoadFailed { module: String, status: FfiStatus },

    /// `register_scripts` reported failure
    #[error("RegisterScripts of module '{module}' failed with {status}")]
    RegisterScriptsFailed { module: String, status: FfiStatus },

    /// Could not create the shadow copy of a binary
    #[error("Failed to shadow-copy '{path}': {source}")]
    ShadowCopy {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The hot-reload watcher could not be set up
    #[error("Failed to watch '{path}' for changes: {message}")]
    WatchFailed { path: PathBuf, message: String },
}

impl LoadError {
    /// Create an open failure
    pub fn open_failed(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        LoadError::OpenFailed {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a symbol not found error
    pub fn symbol_not_found(module: impl Into<String>, symbol: impl Into<String>) -> Self {
        LoadError::SymbolNotFound {
            module: module.into(),
            symbol: symbol.into(),
        }
    }

    /// Create a construction failure
    pub fn construction_failed(module: impl Into<String>, reason: impl Into<String>) -> Self {
        LoadError::ConstructionFailed {
            module: module.into(),
            reason: reason.into(),
        }
    }
}

/// Misuse of the module lifecycle
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LifecycleError {
    /// The handle was valid once but its module is already unloaded
    #[error("Module {0} has already been unloaded")]
    DoubleUnload(ModuleHandle),

    /// The handle was never issued by this loader
    #[error("Module handle {0} was never issued by this loader")]
    UnloadUnknownHandle(ModuleHandle),

    /// Operation needs a loaded or active module
    #[error("Module '{0}' is no longer active")]
    OperationOnInactiveModule(String),

    /// No live module behind this handle
    #[error("Unknown module handle {0}")]
    UnknownHandle(ModuleHandle),

    /// The runtime application is single-shot
    #[error("The runtime application has already been created")]
    ApplicationAlreadyCreated,

    /// Reload refused while the module's application is running
    #[error("Module '{0}' owns the running application and cannot be reloaded")]
    ModuleOwnsApplication(String),

    /// No script registered under this name
    #[error("No script named '{0}' is registered")]
    UnknownScript(String),

    /// No such slot in the host
    #[error("No module slot named '{0}'")]
    UnknownSlot(String),
}

/// Module manifest failures
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("Failed to read manifest '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse manifest: {0}")]
    Parse(#[from] toml::de::Error),

    /// Parsed but semantically wrong (missing library, duplicate slot)
    #[error("Invalid manifest: {0}")]
    Invalid(String),
}

/// Any failure of the native module layer
#[derive(Debug, Error)]
pub enum ModuleError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),
}
