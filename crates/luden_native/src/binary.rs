//! Module binaries: where the two entry points come from
//!
//! A [`DynamicBinary`] is a shared library opened through `libloading`,
//! optionally from a shadow copy so the original file can be rebuilt while
//! the module is loaded. A [`StaticBinary`] carries entry points linked into
//! the host itself.

use crate::error::LoadError;
use crate::ffi::*;
use crate::sdk::{self, GameModule};
use libloading::{Library, Symbol};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Both resolved entry points of a module binary
#[derive(Clone, Copy)]
pub struct EntryPoints {
    pub create: CreateScriptModuleFn,
    pub destroy: DestroyScriptModuleFn,
}

/// Source of a module's entry points
pub trait ModuleBinary: Send + Sync {
    /// Display name of the module
    fn name(&self) -> &str;

    /// File the module was loaded from, if any
    fn path(&self) -> Option<&Path>;

    /// Resolve `CreateScriptModule` and `DestroyScriptModule`.
    ///
    /// Must not run any module code.
    fn entry_points(&self) -> Result<EntryPoints, LoadError>;
}

/// A shared library opened from disk
pub struct DynamicBinary {
    name: String,
    path: PathBuf,
    shadow: Option<PathBuf>,
    library: Option<Library>,
}

impl DynamicBinary {
    /// Open `path` in place
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LoadError> {
        Self::open_with(path, None)
    }

    /// Open `path`, through a shadow copy in `shadow_directory` if given
    pub fn open_with(
        path: impl AsRef<Path>,
        shadow_directory: Option<&Path>,
    ) -> Result<Self, LoadError> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(LoadError::FileNotFound(path.to_path_buf()));
        }

        let shadow = match shadow_directory {
            Some(dir) => Some(shadow_copy(path, dir)?),
            None => None,
        };
        let open_path = shadow.as_deref().unwrap_or(path);

        let library = match unsafe { Library::new(open_path) } {
            Ok(library) => library,
            Err(e) => {
                if let Some(copy) = &shadow {
                    remove_shadow_copy(copy);
                }
                return Err(LoadError::open_failed(path, e.to_string()));
            }
        };

        log::debug!(
            "Opened module binary {}{}",
            path.display(),
            shadow
                .as_ref()
                .map(|s| format!(" (shadow copy {})", s.display()))
                .unwrap_or_default()
        );

        Ok(Self {
            name: module_name_from_path(path),
            path: path.to_path_buf(),
            shadow,
            library: Some(library),
        })
    }

    /// Path of the shadow copy actually opened
    pub fn shadow_path(&self) -> Option<&Path> {
        self.shadow.as_deref()
    }
}

impl ModuleBinary for DynamicBinary {
    fn name(&self) -> &str {
        &self.name
    }

    fn path(&self) -> Option<&Path> {
        Some(&self.path)
    }

    fn entry_points(&self) -> Result<EntryPoints, LoadError> {
        let library = self
            .library
            .as_ref()
            .ok_or_else(|| LoadError::open_failed(&self.path, "library already closed"))?;

        let create: Symbol<CreateScriptModuleFn> = unsafe {
            library
                .get(CREATE_MODULE_SYMBOL)
                .map_err(|_| LoadError::symbol_not_found(&self.name, CREATE_MODULE_NAME))?
        };
        let destroy: Symbol<DestroyScriptModuleFn> = unsafe {
            library
                .get(DESTROY_MODULE_SYMBOL)
                .map_err(|_| LoadError::symbol_not_found(&self.name, DESTROY_MODULE_NAME))?
        };

        Ok(EntryPoints {
            create: *create,
            destroy: *destroy,
        })
    }
}

impl Drop for DynamicBinary {
    fn drop(&mut self) {
        // Close before deleting the file it maps
        drop(self.library.take());

        if let Some(copy) = self.shadow.take() {
            remove_shadow_copy(&copy);
        }
    }
}

/// Copy `path` to `<dir>/<stem>_<millis>.<ext>`
fn shadow_copy(path: &Path, dir: &Path) -> Result<PathBuf, LoadError> {
    let to_error = |source: std::io::Error| LoadError::ShadowCopy {
        path: path.to_path_buf(),
        source,
    };

    fs::create_dir_all(dir).map_err(to_error)?;

    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("module");
    let extension = path.extension().and_then(|e| e.to_str());
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);

    let file_name = |suffix: u32| {
        let base = if suffix == 0 {
            format!("{}_{}", stem, millis)
        } else {
            format!("{}_{}_{}", stem, millis, suffix)
        };
        match extension {
            Some(ext) => format!("{}.{}", base, ext),
            None => base,
        }
    };

    let mut suffix = 0;
    let mut target = dir.join(file_name(suffix));
    while target.exists() {
        suffix += 1;
        target = dir.join(file_name(suffix));
    }

    fs::copy(path, &target).map_err(to_error)?;
    Ok(target)
}

fn remove_shadow_copy(copy: &Path) {
    if let Err(e) = fs::remove_file(copy) {
        log::warn!("Failed to remove shadow copy {}: {}", copy.display(), e);
    }
}

/// `libpaddle_game.so` -> `paddle_game`
fn module_name_from_path(path: &Path) -> String {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("unknown");
    match stem.strip_prefix(std::env::consts::DLL_PREFIX) {
        Some(stripped) if !stripped.is_empty() => stripped.to_string(),
        _ => stem.to_string(),
    }
}

/// Entry points linked into the host executable
#[derive(Clone)]
pub struct StaticBinary {
    name: String,
    create: Option<CreateScriptModuleFn>,
    destroy: Option<DestroyScriptModuleFn>,
}

impl StaticBinary {
    pub fn new(
        name: impl Into<String>,
        create: CreateScriptModuleFn,
        destroy: DestroyScriptModuleFn,
    ) -> Self {
        Self::with_entry_points(name, Some(create), Some(destroy))
    }

    /// Entry points of a Rust module type, through the SDK thunks
    pub fn of<M: GameModule + Default>(name: impl Into<String>) -> Self {
        Self::new(name, sdk::create_module::<M>, sdk::destroy_module::<M>)
    }

    /// Possibly incomplete entry points, as a binary that lacks an export
    pub fn with_entry_points(
        name: impl Into<String>,
        create: Option<CreateScriptModuleFn>,
        destroy: Option<DestroyScriptModuleFn>,
    ) -> Self {
        Self {
            name: name.into(),
            create,
            destroy,
        }
    }
}

impl ModuleBinary for StaticBinary {
    fn name(&self) -> &str {
        &self.name
    }

    fn path(&self) -> Option<&Path> {
        None
    }

    fn entry_points(&self) -> Result<EntryPoints, LoadError> {
        let create = self
            .create
            .ok_or_else(|| LoadError::symbol_not_found(&self.name, CREATE_MODULE_NAME))?;
        let destroy = self
            .destroy
            .ok_or_else(|| LoadError::symbol_not_found(&self.name, DESTROY_MODULE_NAME))?;
        Ok(EntryPoints { create, destroy })
    }
}

/// A module binary shared by everything the module created.
///
/// Foreign objects hold an `Arc` to it so the code stays mapped until they
/// are destroyed. `is_active` turns false when the loader starts unloading
/// the module; from then on foreign objects refuse calls.
pub struct ModuleLibrary {
    binary: Box<dyn ModuleBinary>,
    active: AtomicBool,
}

impl ModuleLibrary {
    pub(crate) fn new(binary: Box<dyn ModuleBinary>) -> Self {
        Self {
            binary,
            active: AtomicBool::new(true),
        }
    }

    pub fn name(&self) -> &str {
        self.binary.name()
    }

    pub fn path(&self) -> Option<&Path> {
        self.binary.path()
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub(crate) fn entry_points(&self) -> Result<EntryPoints, LoadError> {
        self.binary.entry_points()
    }

    pub(crate) fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }
}
