//! C ABI types shared by the host and game modules
//!
//! Every object that crosses the module boundary is a `#[repr(C)]` header
//! whose first field is a vtable of `extern "C"` function pointers. The side
//! that creates an object is the only side allowed to destroy it, through a
//! function it supplies.

use luden_core::EntityId;
use std::ffi::{c_char, c_void};
use std::fmt;

/// Exported module factory
pub const CREATE_MODULE_SYMBOL: &[u8] = b"CreateScriptModule\0";
/// Exported module destructor
pub const DESTROY_MODULE_SYMBOL: &[u8] = b"DestroyScriptModule\0";

pub(crate) const CREATE_MODULE_NAME: &str = "CreateScriptModule";
pub(crate) const DESTROY_MODULE_NAME: &str = "DestroyScriptModule";

/// Status code returned across the boundary
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FfiStatus(pub u32);

impl FfiStatus {
    pub const OK: Self = Self(0);
    pub const FAILED: Self = Self(1);
    pub const DUPLICATE_SCRIPT: Self = Self(2);
    pub const INVALID_ARGUMENT: Self = Self(3);
    /// Module code panicked and the panic was caught at the boundary
    pub const PANICKED: Self = Self(4);

    #[inline]
    pub fn is_ok(self) -> bool {
        self == Self::OK
    }
}

impl fmt::Display for FfiStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::OK => write!(f, "OK"),
            Self::FAILED => write!(f, "FAILED"),
            Self::DUPLICATE_SCRIPT => write!(f, "DUPLICATE_SCRIPT"),
            Self::INVALID_ARGUMENT => write!(f, "INVALID_ARGUMENT"),
            Self::PANICKED => write!(f, "PANICKED"),
            Self(code) => write!(f, "status {}", code),
        }
    }
}

/// Entity ID for FFI
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FfiEntityId {
    pub id: u64,
}

impl From<EntityId> for FfiEntityId {
    fn from(entity: EntityId) -> Self {
        Self {
            id: entity.to_raw(),
        }
    }
}

impl From<FfiEntityId> for EntityId {
    fn from(entity: FfiEntityId) -> Self {
        EntityId::from_raw(entity.id)
    }
}

// ============================================================================
// Module
// ============================================================================

/// `CreateScriptModule` signature; null means construction failed
pub type CreateScriptModuleFn = unsafe extern "C" fn() -> *mut FfiScriptModule;

/// `DestroyScriptModule` signature
pub type DestroyScriptModuleFn = unsafe extern "C" fn(module: *mut FfiScriptModule);

/// Module vtable
#[repr(C)]
#[derive(Clone, Copy)]
pub struct FfiModuleVTable {
    pub on_load: Option<unsafe extern "C" fn(module: *mut FfiScriptModule) -> FfiStatus>,
    pub on_unload: Option<unsafe extern "C" fn(module: *mut FfiScriptModule)>,
    pub register_scripts: Option<
        unsafe extern "C" fn(
            module: *mut FfiScriptModule,
            registrar: *mut FfiScriptRegistrar,
        ) -> FfiStatus,
    >,
    pub get_version: Option<unsafe extern "C" fn(module: *const FfiScriptModule) -> u32>,
    /// Optional; a null entry means the module never supplies an application
    pub create_runtime_application: Option<
        unsafe extern "C" fn(
            module: *mut FfiScriptModule,
            spec: *const FfiApplicationSpec,
        ) -> *mut FfiApplication,
    >,
}

impl FfiModuleVTable {
    /// All mandatory entries are present
    pub fn is_complete(&self) -> bool {
        self.on_load.is_some()
            && self.on_unload.is_some()
            && self.register_scripts.is_some()
            && self.get_version.is_some()
    }
}

/// Module object header
#[repr(C)]
pub struct FfiScriptModule {
    pub vtable: FfiModuleVTable,
}

// ============================================================================
// Scripts
// ============================================================================

/// Registration callback handed to `register_scripts`.
///
/// `context` is owned by the host and only valid for the duration of the
/// `register_scripts` call.
#[repr(C)]
pub struct FfiScriptRegistrar {
    pub context: *mut c_void,
    pub register: Option<
        unsafe extern "C" fn(
            context: *mut c_void,
            name: *const c_char,
            factory: FfiScriptFactory,
        ) -> FfiStatus,
    >,
}

/// Script factory: creates and destroys instances of one behavior
#[repr(C)]
#[derive(Clone, Copy)]
pub struct FfiScriptFactory {
    pub create: Option<unsafe extern "C" fn() -> *mut FfiScript>,
    pub destroy: Option<unsafe extern "C" fn(script: *mut FfiScript)>,
}

impl FfiScriptFactory {
    pub fn is_complete(&self) -> bool {
        self.create.is_some() && self.destroy.is_some()
    }
}

/// Script vtable
#[repr(C)]
#[derive(Clone, Copy)]
pub struct FfiScriptVTable {
    pub on_create: Option<unsafe extern "C" fn(script: *mut FfiScript, entity: FfiEntityId)>,
    pub on_update: Option<unsafe extern "C" fn(script: *mut FfiScript, delta_time: f32)>,
    pub on_destroy: Option<unsafe extern "C" fn(script: *mut FfiScript)>,
}

/// Script object header
#[repr(C)]
pub struct FfiScript {
    pub vtable: FfiScriptVTable,
}

// ============================================================================
// Runtime application
// ============================================================================

/// Application specification passed to the module.
///
/// Strings are borrowed, NUL-terminated and only valid for the duration of
/// the call.
#[repr(C)]
pub struct FfiApplicationSpec {
    pub name: *const c_char,
    pub working_directory: *const c_char,
    pub window_width: u32,
    pub window_height: u32,
    pub vsync: bool,
    pub fullscreen: bool,
    pub headless: bool,
}

/// Application vtable; `destroy` frees the object on the module side
#[repr(C)]
#[derive(Clone, Copy)]
pub struct FfiApplicationVTable {
    pub on_init: Option<unsafe extern "C" fn(app: *mut FfiApplication)>,
    /// Returns false to stop the frame loop
    pub on_update: Option<unsafe extern "C" fn(app: *mut FfiApplication, delta_time: f32) -> bool>,
    pub on_shutdown: Option<unsafe extern "C" fn(app: *mut FfiApplication)>,
    pub destroy: Option<unsafe extern "C" fn(app: *mut FfiApplication)>,
}

/// Application object header
#[repr(C)]
pub struct FfiApplication {
    pub vtable: FfiApplicationVTable,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_layout() {
        assert_eq!(std::mem::size_of::<FfiStatus>(), std::mem::size_of::<u32>());
        assert!(FfiStatus::OK.is_ok());
        assert!(!FfiStatus::PANICKED.is_ok());
        assert_eq!(FfiStatus(42).to_string(), "status 42");
        assert_eq!(FfiStatus::DUPLICATE_SCRIPT.to_string(), "DUPLICATE_SCRIPT");
    }

    #[test]
    fn test_entity_id_conversion() {
        let entity = EntityId::from_raw(99);
        let ffi: FfiEntityId = entity.into();
        assert_eq!(ffi.id, 99);
        assert_eq!(EntityId::from(ffi), entity);
    }

    #[test]
    fn test_symbols_are_nul_terminated() {
        assert_eq!(CREATE_MODULE_SYMBOL.last(), Some(&0));
        assert_eq!(DESTROY_MODULE_SYMBOL.last(), Some(&0));
        assert_eq!(
            &CREATE_MODULE_SYMBOL[..CREATE_MODULE_SYMBOL.len() - 1],
            CREATE_MODULE_NAME.as_bytes()
        );
        assert_eq!(
            &DESTROY_MODULE_SYMBOL[..DESTROY_MODULE_SYMBOL.len() - 1],
            DESTROY_MODULE_NAME.as_bytes()
        );
    }

    #[test]
    fn test_vtable_completeness() {
        let empty = FfiModuleVTable {
            on_load: None,
            on_unload: None,
            register_scripts: None,
            get_version: None,
            create_runtime_application: None,
        };
        assert!(!empty.is_complete());

        let factory = FfiScriptFactory {
            create: None,
            destroy: None,
        };
        assert!(!factory.is_complete());
    }
}
