//! Module author side of the ABI
//!
//! Implement [`GameModule`] (and [`ScriptableBehavior`] for each script) and
//! export the entry points with [`export_game_module!`](crate::export_game_module):
//!
//! ```ignore
//! use luden_native::sdk::*;
//!
//! #[derive(Default)]
//! struct Paddle;
//!
//! impl ScriptableBehavior for Paddle {
//!     fn on_update(&mut self, delta_time: f32) { /* ... */ }
//! }
//!
//! #[derive(Default)]
//! struct Game;
//!
//! impl GameModule for Game {
//!     fn register_scripts(
//!         &mut self,
//!         registrar: &mut ScriptRegistrar<'_>,
//!     ) -> Result<(), SdkError> {
//!         registrar.register::<Paddle>("Paddle")
//!     }
//!
//!     fn version(&self) -> u32 {
//!         1
//!     }
//! }
//!
//! luden_native::export_game_module!(Game);
//! ```
//!
//! Every thunk below catches panics so that module code never unwinds into
//! the host.

use crate::ffi::*;
use std::any::Any;
use std::ffi::CString;
use std::panic::{self, AssertUnwindSafe};
use std::ptr;
use thiserror::Error;

pub use crate::application::{ApplicationSpec, RuntimeApplication};
pub use luden_core::EntityId;

/// Errors reported by module code
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SdkError {
    #[error("{0}")]
    Failed(String),

    #[error("Script '{0}' is already registered")]
    DuplicateScript(String),

    #[error("Invalid script name '{0}'")]
    InvalidName(String),

    #[error("Host rejected script '{name}' with {status}")]
    Rejected { name: String, status: FfiStatus },

    #[error("Script registrar is not available")]
    RegistrarUnavailable,
}

impl SdkError {
    pub fn failed(message: impl Into<String>) -> Self {
        SdkError::Failed(message.into())
    }
}

/// A game module: the unit a binary exports
pub trait GameModule: 'static {
    fn on_load(&mut self) -> Result<(), SdkError> {
        Ok(())
    }

    fn on_unload(&mut self) {}

    /// Register every script this module provides
    fn register_scripts(&mut self, registrar: &mut ScriptRegistrar<'_>) -> Result<(), SdkError>;

    fn version(&self) -> u32;

    /// Supply a custom runtime application; `None` lets the host decide
    fn create_runtime_application(
        &mut self,
        _spec: &ApplicationSpec,
    ) -> Option<Box<dyn RuntimeApplication>> {
        None
    }
}

/// Per-entity script behavior
pub trait ScriptableBehavior: 'static {
    fn on_create(&mut self, _entity: EntityId) {}

    fn on_update(&mut self, _delta_time: f32) {}

    fn on_destroy(&mut self) {}
}

/// Host registration callback, valid during `register_scripts` only
pub struct ScriptRegistrar<'a> {
    raw: &'a mut FfiScriptRegistrar,
}

impl<'a> ScriptRegistrar<'a> {
    /// Wrap the raw registrar passed by the host
    pub fn from_raw(raw: &'a mut FfiScriptRegistrar) -> Self {
        Self { raw }
    }

    /// Register `S` under `name`
    pub fn register<S: ScriptableBehavior + Default>(
        &mut self,
        name: &str,
    ) -> Result<(), SdkError> {
        self.register_factory(name, script_factory::<S>())
    }

    /// Register a hand-built factory
    pub fn register_factory(
        &mut self,
        name: &str,
        factory: FfiScriptFactory,
    ) -> Result<(), SdkError> {
        let register = self.raw.register.ok_or(SdkError::RegistrarUnavailable)?;
        if name.is_empty() {
            return Err(SdkError::InvalidName(name.to_string()));
        }
        let c_name = CString::new(name).map_err(|_| SdkError::InvalidName(name.to_string()))?;

        let status = unsafe { register(self.raw.context, c_name.as_ptr(), factory) };
        match status {
            FfiStatus::OK => Ok(()),
            FfiStatus::DUPLICATE_SCRIPT => Err(SdkError::DuplicateScript(name.to_string())),
            FfiStatus::INVALID_ARGUMENT => Err(SdkError::InvalidName(name.to_string())),
            status => Err(SdkError::Rejected {
                name: name.to_string(),
                status,
            }),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}

/// Run module code, turning a panic into `on_panic`
fn fenced<R>(callback: &str, on_panic: R, f: impl FnOnce() -> R) -> R {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => {
            log::error!("Module panicked in '{}': {}", callback, panic_message(&*payload));
            on_panic
        }
    }
}

// ============================================================================
// Module thunks
// ============================================================================

#[repr(C)]
struct ModuleBox<M> {
    header: FfiScriptModule,
    module: M,
}

/// Recover the module behind a header pointer
unsafe fn module_mut<'a, M>(module: *mut FfiScriptModule) -> Option<&'a mut M> {
    (module as *mut ModuleBox<M>).as_mut().map(|boxed| &mut boxed.module)
}

/// `CreateScriptModule` for a Rust module type
pub extern "C" fn create_module<M: GameModule + Default>() -> *mut FfiScriptModule {
    fenced("CreateScriptModule", ptr::null_mut(), || {
        let boxed = Box::new(ModuleBox {
            header: FfiScriptModule {
                vtable: FfiModuleVTable {
                    on_load: Some(module_on_load::<M>),
                    on_unload: Some(module_on_unload::<M>),
                    register_scripts: Some(module_register_scripts::<M>),
                    get_version: Some(module_get_version::<M>),
                    create_runtime_application: Some(module_create_application::<M>),
                },
            },
            module: M::default(),
        });
        Box::into_raw(boxed) as *mut FfiScriptModule
    })
}

/// `DestroyScriptModule` for a Rust module type
///
/// # Safety
///
/// `module` must come from [`create_module::<M>`] and not be used afterwards.
pub unsafe extern "C" fn destroy_module<M: GameModule>(module: *mut FfiScriptModule) {
    if module.is_null() {
        return;
    }
    let boxed = Box::from_raw(module as *mut ModuleBox<M>);
    fenced("DestroyScriptModule", (), move || drop(boxed));
}

unsafe extern "C" fn module_on_load<M: GameModule>(module: *mut FfiScriptModule) -> FfiStatus {
    let Some(module) = module_mut::<M>(module) else {
        return FfiStatus::INVALID_ARGUMENT;
    };
    fenced("OnLoad", FfiStatus::PANICKED, || match module.on_load() {
        Ok(()) => FfiStatus::OK,
        Err(e) => {
            log::error!("OnLoad failed: {}", e);
            FfiStatus::FAILED
        }
    })
}

unsafe extern "C" fn module_on_unload<M: GameModule>(module: *mut FfiScriptModule) {
    if let Some(module) = module_mut::<M>(module) {
        fenced("OnUnload", (), || module.on_unload());
    }
}

unsafe extern "C" fn module_register_scripts<M: GameModule>(
    module: *mut FfiScriptModule,
    registrar: *mut FfiScriptRegistrar,
) -> FfiStatus {
    let (Some(module), Some(registrar)) = (module_mut::<M>(module), registrar.as_mut()) else {
        return FfiStatus::INVALID_ARGUMENT;
    };
    fenced("RegisterScripts", FfiStatus::PANICKED, || {
        let mut registrar = ScriptRegistrar::from_raw(registrar);
        match module.register_scripts(&mut registrar) {
            Ok(()) => FfiStatus::OK,
            Err(SdkError::DuplicateScript(name)) => {
                log::error!("Script '{}' is already registered by another module", name);
                FfiStatus::DUPLICATE_SCRIPT
            }
            Err(e) => {
                log::error!("RegisterScripts failed: {}", e);
                FfiStatus::FAILED
            }
        }
    })
}

unsafe extern "C" fn module_get_version<M: GameModule>(module: *const FfiScriptModule) -> u32 {
    match (module as *const ModuleBox<M>).as_ref() {
        Some(boxed) => fenced("GetVersion", 0, || boxed.module.version()),
        None => 0,
    }
}

unsafe extern "C" fn module_create_application<M: GameModule>(
    module: *mut FfiScriptModule,
    spec: *const FfiApplicationSpec,
) -> *mut FfiApplication {
    let (Some(module), Some(spec)) = (module_mut::<M>(module), spec.as_ref()) else {
        return ptr::null_mut();
    };
    let spec = ApplicationSpec::from_ffi(spec);
    fenced("CreateRuntimeApplication", ptr::null_mut(), || {
        match module.create_runtime_application(&spec) {
            Some(app) => application_into_raw(app),
            None => ptr::null_mut(),
        }
    })
}

// ============================================================================
// Script thunks
// ============================================================================

#[repr(C)]
struct ScriptBox<S> {
    header: FfiScript,
    behavior: S,
}

unsafe fn script_mut<'a, S>(script: *mut FfiScript) -> Option<&'a mut S> {
    (script as *mut ScriptBox<S>).as_mut().map(|boxed| &mut boxed.behavior)
}

/// Factory thunks for a behavior type
pub fn script_factory<S: ScriptableBehavior + Default>() -> FfiScriptFactory {
    FfiScriptFactory {
        create: Some(create_script::<S>),
        destroy: Some(destroy_script::<S>),
    }
}

unsafe extern "C" fn create_script<S: ScriptableBehavior + Default>() -> *mut FfiScript {
    fenced("CreateScript", ptr::null_mut(), || {
        let boxed = Box::new(ScriptBox {
            header: FfiScript {
                vtable: FfiScriptVTable {
                    on_create: Some(script_on_create::<S>),
                    on_update: Some(script_on_update::<S>),
                    on_destroy: Some(script_on_destroy::<S>),
                },
            },
            behavior: S::default(),
        });
        Box::into_raw(boxed) as *mut FfiScript
    })
}

unsafe extern "C" fn destroy_script<S: ScriptableBehavior>(script: *mut FfiScript) {
    if script.is_null() {
        return;
    }
    let boxed = Box::from_raw(script as *mut ScriptBox<S>);
    fenced("DestroyScript", (), move || drop(boxed));
}

unsafe extern "C" fn script_on_create<S: ScriptableBehavior>(
    script: *mut FfiScript,
    entity: FfiEntityId,
) {
    if let Some(behavior) = script_mut::<S>(script) {
        fenced("OnCreate", (), || behavior.on_create(entity.into()));
    }
}

unsafe extern "C" fn script_on_update<S: ScriptableBehavior>(
    script: *mut FfiScript,
    delta_time: f32,
) {
    if let Some(behavior) = script_mut::<S>(script) {
        fenced("OnUpdate", (), || behavior.on_update(delta_time));
    }
}

unsafe extern "C" fn script_on_destroy<S: ScriptableBehavior>(script: *mut FfiScript) {
    if let Some(behavior) = script_mut::<S>(script) {
        fenced("OnDestroy", (), || behavior.on_destroy());
    }
}

// ============================================================================
// Application thunks
// ============================================================================

#[repr(C)]
struct ApplicationBox {
    header: FfiApplication,
    app: Box<dyn RuntimeApplication>,
}

unsafe fn app_mut<'a>(
    app: *mut FfiApplication,
) -> Option<&'a mut (dyn RuntimeApplication + 'static)> {
    (app as *mut ApplicationBox).as_mut().map(|boxed| boxed.app.as_mut())
}

fn application_into_raw(app: Box<dyn RuntimeApplication>) -> *mut FfiApplication {
    let boxed = Box::new(ApplicationBox {
        header: FfiApplication {
            vtable: FfiApplicationVTable {
                on_init: Some(app_on_init),
                on_update: Some(app_on_update),
                on_shutdown: Some(app_on_shutdown),
                destroy: Some(app_destroy),
            },
        },
        app,
    });
    Box::into_raw(boxed) as *mut FfiApplication
}

unsafe extern "C" fn app_on_init(app: *mut FfiApplication) {
    if let Some(app) = app_mut(app) {
        fenced("Application::OnInit", (), || app.on_init());
    }
}

unsafe extern "C" fn app_on_update(app: *mut FfiApplication, delta_time: f32) -> bool {
    match app_mut(app) {
        Some(app) => fenced("Application::OnUpdate", false, || app.on_update(delta_time)),
        None => false,
    }
}

unsafe extern "C" fn app_on_shutdown(app: *mut FfiApplication) {
    if let Some(app) = app_mut(app) {
        fenced("Application::OnShutdown", (), || app.on_shutdown());
    }
}

unsafe extern "C" fn app_destroy(app: *mut FfiApplication) {
    if app.is_null() {
        return;
    }
    let boxed = Box::from_raw(app as *mut ApplicationBox);
    fenced("Application::Destroy", (), move || drop(boxed));
}

/// Export `CreateScriptModule` and `DestroyScriptModule` for a
/// [`GameModule`](crate::sdk::GameModule) type implementing `Default`
#[macro_export]
macro_rules! export_game_module {
    ($module:ty) => {
        #[no_mangle]
        #[allow(non_snake_case)]
        pub extern "C" fn CreateScriptModule() -> *mut $crate::ffi::FfiScriptModule {
            $crate::sdk::create_module::<$module>()
        }

        /// # Safety
        ///
        /// `module` must come from `CreateScriptModule`.
        #[no_mangle]
        #[allow(non_snake_case)]
        pub unsafe extern "C" fn DestroyScriptModule(module: *mut $crate::ffi::FfiScriptModule) {
            $crate::sdk::destroy_module::<$module>(module)
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::{c_char, c_void, CStr};

    #[derive(Default)]
    struct Panicky;

    impl GameModule for Panicky {
        fn on_load(&mut self) -> Result<(), SdkError> {
            panic!("boom");
        }

        fn register_scripts(
            &mut self,
            _registrar: &mut ScriptRegistrar<'_>,
        ) -> Result<(), SdkError> {
            Err(SdkError::failed("nothing to register"))
        }

        fn version(&self) -> u32 {
            7
        }
    }

    #[test]
    fn test_module_thunks() {
        let module = create_module::<Panicky>();
        assert!(!module.is_null());

        unsafe {
            let vtable = (*module).vtable;
            assert!(vtable.is_complete());
            assert_eq!(vtable.get_version.unwrap()(module), 7);
            assert_eq!(vtable.on_load.unwrap()(module), FfiStatus::PANICKED);

            let mut registrar = FfiScriptRegistrar {
                context: ptr::null_mut(),
                register: None,
            };
            assert_eq!(
                vtable.register_scripts.unwrap()(module, &mut registrar),
                FfiStatus::FAILED
            );

            // Default create_runtime_application returns nothing
            let spec = ApplicationSpec::default().to_ffi();
            let app = vtable.create_runtime_application.unwrap()(module, spec.as_ptr());
            assert!(app.is_null());

            destroy_module::<Panicky>(module);
        }
    }

    #[derive(Default)]
    struct Noop;

    impl ScriptableBehavior for Noop {}

    unsafe extern "C" fn record_name(
        context: *mut c_void,
        name: *const c_char,
        factory: FfiScriptFactory,
    ) -> FfiStatus {
        let names = &mut *(context as *mut Vec<String>);
        names.push(CStr::from_ptr(name).to_string_lossy().into_owned());
        if factory.is_complete() {
            FfiStatus::OK
        } else {
            FfiStatus::INVALID_ARGUMENT
        }
    }

    unsafe extern "C" fn reject_all(
        _context: *mut c_void,
        _name: *const c_char,
        _factory: FfiScriptFactory,
    ) -> FfiStatus {
        FfiStatus::DUPLICATE_SCRIPT
    }

    #[test]
    fn test_registrar() {
        let mut names: Vec<String> = Vec::new();
        let mut raw = FfiScriptRegistrar {
            context: &mut names as *mut Vec<String> as *mut c_void,
            register: Some(record_name),
        };

        let mut registrar = ScriptRegistrar::from_raw(&mut raw);
        registrar.register::<Noop>("Noop").unwrap();
        assert_eq!(
            registrar.register::<Noop>(""),
            Err(SdkError::InvalidName(String::new()))
        );
        assert_eq!(
            registrar.register::<Noop>("bad\0name"),
            Err(SdkError::InvalidName("bad\0name".to_string()))
        );
        drop(registrar);
        assert_eq!(names, vec!["Noop".to_string()]);

        let mut raw = FfiScriptRegistrar {
            context: ptr::null_mut(),
            register: Some(reject_all),
        };
        let mut registrar = ScriptRegistrar::from_raw(&mut raw);
        assert_eq!(
            registrar.register::<Noop>("Noop"),
            Err(SdkError::DuplicateScript("Noop".to_string()))
        );

        let mut raw = FfiScriptRegistrar {
            context: ptr::null_mut(),
            register: None,
        };
        let mut registrar = ScriptRegistrar::from_raw(&mut raw);
        assert_eq!(
            registrar.register::<Noop>("Noop"),
            Err(SdkError::RegistrarUnavailable)
        );
    }

    struct Counter {
        remaining: u32,
    }

    impl RuntimeApplication for Counter {
        fn on_update(&mut self, _delta_time: f32) -> bool {
            if self.remaining == 0 {
                panic!("updated past the end");
            }
            self.remaining -= 1;
            self.remaining > 0
        }
    }

    #[test]
    fn test_application_thunks() {
        let raw = application_into_raw(Box::new(Counter { remaining: 2 }));
        unsafe {
            let vtable = (*raw).vtable;
            let update = vtable.on_update.unwrap();
            vtable.on_init.unwrap()(raw);
            assert!(update(raw, 0.1));
            assert!(!update(raw, 0.1));
            // Panic is contained and reported as "stop"
            assert!(!update(raw, 0.1));
            vtable.destroy.unwrap()(raw);
        }
    }
}
