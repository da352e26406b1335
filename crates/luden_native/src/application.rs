//! Runtime application: the object that drives the frame loop
//!
//! A module may supply its own application; otherwise the host falls back to
//! [`DefaultApplication`]. The choice is made once per session by
//! [`ApplicationFactory`].

use crate::binary::ModuleLibrary;
use crate::error::{LifecycleError, LoadError, Result};
use crate::ffi::{FfiApplication, FfiApplicationSpec, FfiApplicationVTable};
use crate::foreign::Foreign;
use crate::loader::{ModuleHandle, ModuleLoader};
use serde::{Deserialize, Serialize};
use std::ffi::{c_char, CStr, CString};
use std::path::PathBuf;
use std::sync::Arc;

/// Window and session settings handed to the application
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationSpec {
    pub name: String,
    pub window_width: u32,
    pub window_height: u32,
    pub vsync: bool,
    pub fullscreen: bool,
    pub headless: bool,
    pub working_directory: PathBuf,
}

impl Default for ApplicationSpec {
    fn default() -> Self {
        Self {
            name: "Luden".to_string(),
            window_width: 1600,
            window_height: 900,
            vsync: true,
            fullscreen: false,
            headless: false,
            working_directory: PathBuf::new(),
        }
    }
}

/// C view of an [`ApplicationSpec`]; owns the strings it points to
pub(crate) struct OwnedFfiSpec {
    _name: CString,
    _working_directory: CString,
    raw: FfiApplicationSpec,
}

impl OwnedFfiSpec {
    pub(crate) fn as_ptr(&self) -> *const FfiApplicationSpec {
        &self.raw
    }
}

impl ApplicationSpec {
    pub(crate) fn to_ffi(&self) -> OwnedFfiSpec {
        let name = c_string(&self.name);
        let working_directory = c_string(&self.working_directory.to_string_lossy());
        let raw = FfiApplicationSpec {
            name: name.as_ptr(),
            working_directory: working_directory.as_ptr(),
            window_width: self.window_width,
            window_height: self.window_height,
            vsync: self.vsync,
            fullscreen: self.fullscreen,
            headless: self.headless,
        };
        OwnedFfiSpec {
            _name: name,
            _working_directory: working_directory,
            raw,
        }
    }

    /// Copy out of the C view.
    ///
    /// # Safety
    ///
    /// Both string pointers must be null or point to NUL-terminated strings.
    pub unsafe fn from_ffi(raw: &FfiApplicationSpec) -> Self {
        Self {
            name: borrowed_str(raw.name),
            window_width: raw.window_width,
            window_height: raw.window_height,
            vsync: raw.vsync,
            fullscreen: raw.fullscreen,
            headless: raw.headless,
            working_directory: PathBuf::from(borrowed_str(raw.working_directory)),
        }
    }
}

fn c_string(value: &str) -> CString {
    CString::new(value.replace('\0', "")).unwrap_or_default()
}

unsafe fn borrowed_str(ptr: *const c_char) -> String {
    if ptr.is_null() {
        String::new()
    } else {
        CStr::from_ptr(ptr).to_string_lossy().into_owned()
    }
}

/// The object that owns the frame loop
pub trait RuntimeApplication {
    fn on_init(&mut self) {}

    /// Advance one frame; return false to stop the loop
    fn on_update(&mut self, delta_time: f32) -> bool;

    fn on_shutdown(&mut self) {}
}

/// Built-in application used when no module supplies one
pub struct DefaultApplication {
    spec: ApplicationSpec,
    frames: u64,
}

impl DefaultApplication {
    pub fn new(spec: ApplicationSpec) -> Self {
        Self { spec, frames: 0 }
    }

    pub fn spec(&self) -> &ApplicationSpec {
        &self.spec
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }
}

impl RuntimeApplication for DefaultApplication {
    fn on_init(&mut self) {
        log::info!(
            "Starting default application '{}' ({}x{}{})",
            self.spec.name,
            self.spec.window_width,
            self.spec.window_height,
            if self.spec.headless { ", headless" } else { "" }
        );
    }

    fn on_update(&mut self, _delta_time: f32) -> bool {
        self.frames += 1;
        true
    }

    fn on_shutdown(&mut self) {
        log::info!("Default application ran {} frames", self.frames);
    }
}

/// An application object created by a module
pub struct ForeignApplication {
    object: Foreign<FfiApplication>,
    vtable: FfiApplicationVTable,
    stopped: bool,
}

impl ForeignApplication {
    /// Take ownership of a module-created application
    ///
    /// # Safety
    ///
    /// `raw` must be a non-null application created by the module behind
    /// `library`.
    pub(crate) unsafe fn from_raw(
        raw: *mut FfiApplication,
        library: Arc<ModuleLibrary>,
    ) -> std::result::Result<Self, LoadError> {
        let module = library.name().to_string();
        let vtable = (*raw).vtable;
        let Some(destroy) = vtable.destroy else {
            // Leaks the object: without a destructor it cannot be freed on the module side
            return Err(LoadError::construction_failed(
                module,
                "runtime application has no destroy entry",
            ));
        };
        let object = Foreign::from_raw(raw, destroy, library)
            .ok_or_else(|| LoadError::construction_failed(module, "runtime application is null"))?;

        Ok(Self {
            object,
            vtable,
            stopped: false,
        })
    }

    pub fn module_name(&self) -> &str {
        self.object.module_name()
    }

    fn live(&mut self) -> bool {
        if self.object.is_live() {
            return true;
        }
        if !self.stopped {
            log::warn!(
                "Module '{}' was unloaded; its runtime application refuses further calls",
                self.object.module_name()
            );
            self.stopped = true;
        }
        false
    }
}

impl RuntimeApplication for ForeignApplication {
    fn on_init(&mut self) {
        if !self.live() {
            return;
        }
        if let Some(on_init) = self.vtable.on_init {
            unsafe { on_init(self.object.as_ptr()) };
        }
    }

    fn on_update(&mut self, delta_time: f32) -> bool {
        if !self.live() {
            return false;
        }
        match self.vtable.on_update {
            Some(on_update) => unsafe { on_update(self.object.as_ptr(), delta_time) },
            None => true,
        }
    }

    fn on_shutdown(&mut self) {
        if !self.live() {
            return;
        }
        if let Some(on_shutdown) = self.vtable.on_shutdown {
            unsafe { on_shutdown(self.object.as_ptr()) };
        }
    }
}

/// Picks the session's runtime application, once
#[derive(Debug, Default)]
pub struct ApplicationFactory {
    created: bool,
    owner: Option<ModuleHandle>,
}

impl ApplicationFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask active modules in activation order; the first one that supplies
    /// an application wins. Falls back to [`DefaultApplication`].
    pub fn create(
        &mut self,
        loader: &ModuleLoader,
        spec: &ApplicationSpec,
    ) -> Result<Box<dyn RuntimeApplication>> {
        if self.created {
            return Err(LifecycleError::ApplicationAlreadyCreated.into());
        }
        self.created = true;

        let order = loader.activation_order();
        for (position, &handle) in order.iter().enumerate() {
            match loader.create_runtime_application(handle, spec) {
                Ok(Some(app)) => {
                    log::info!("Using runtime application from module '{}'", app.module_name());
                    let skipped = order.len() - position - 1;
                    if skipped > 0 {
                        log::debug!(
                            "{} later modules were not consulted for an application",
                            skipped
                        );
                    }
                    self.owner = Some(handle);
                    return Ok(Box::new(app));
                }
                Ok(None) => {}
                Err(e) => log::warn!("Module {} failed to create an application: {}", handle, e),
            }
        }

        log::info!("No module supplied a runtime application, using the default");
        Ok(Box::new(DefaultApplication::new(spec.clone())))
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    /// Module that supplied the application, if any
    pub fn owner(&self) -> Option<ModuleHandle> {
        self.owner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_ffi_round_trip() {
        let spec = ApplicationSpec {
            name: "Paddle".to_string(),
            window_width: 800,
            window_height: 600,
            vsync: false,
            fullscreen: true,
            headless: true,
            working_directory: PathBuf::from("/tmp/game"),
        };

        let owned = spec.to_ffi();
        let back = unsafe { ApplicationSpec::from_ffi(&*owned.as_ptr()) };
        assert_eq!(back, spec);
    }

    #[test]
    fn test_spec_from_partial_toml() {
        let spec: ApplicationSpec = toml::from_str("name = \"Tetris\"\nheadless = true").unwrap();
        assert_eq!(spec.name, "Tetris");
        assert!(spec.headless);
        assert_eq!(spec.window_width, 1600);
    }

    #[test]
    fn test_interior_nul_is_dropped() {
        let spec = ApplicationSpec {
            name: "bad\0name".to_string(),
            ..ApplicationSpec::default()
        };
        let owned = spec.to_ffi();
        let back = unsafe { ApplicationSpec::from_ffi(&*owned.as_ptr()) };
        assert_eq!(back.name, "badname");
    }

    #[test]
    fn test_default_application_counts_frames() {
        let mut app = DefaultApplication::new(ApplicationSpec::default());
        app.on_init();
        assert!(app.on_update(0.016));
        assert!(app.on_update(0.016));
        app.on_shutdown();
        assert_eq!(app.frames(), 2);
    }

    #[test]
    fn test_factory_is_single_shot() {
        let loader = ModuleLoader::default();
        let mut factory = ApplicationFactory::new();

        assert!(factory.create(&loader, &ApplicationSpec::default()).is_ok());
        assert!(factory.owner().is_none());
        assert!(matches!(
            factory.create(&loader, &ApplicationSpec::default()),
            Err(crate::error::ModuleError::Lifecycle(
                LifecycleError::ApplicationAlreadyCreated
            ))
        ));
    }
}
