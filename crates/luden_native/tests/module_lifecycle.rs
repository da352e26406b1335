// Integration tests for the module loader state machine
//
// Modules are linked statically through `StaticBinary::of`, which goes
// through the same SDK thunks and C ABI a dynamic library exports.

use luden_native::error::{LifecycleError, LoadError, ModuleError, RegistryError};
use luden_native::ffi::{FfiScriptModule, FfiStatus};
use luden_native::sdk::{GameModule, ScriptRegistrar, ScriptableBehavior, SdkError};
use luden_native::{LoaderConfig, ModuleLoader, ModuleState, StaticBinary, VersionRange};
use luden_core::EntityId;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Counters for one test module type
struct Counters {
    created: AtomicUsize,
    dropped: AtomicUsize,
    loaded: AtomicUsize,
    unloaded: AtomicUsize,
}

impl Counters {
    const fn new() -> Self {
        Self {
            created: AtomicUsize::new(0),
            dropped: AtomicUsize::new(0),
            loaded: AtomicUsize::new(0),
            unloaded: AtomicUsize::new(0),
        }
    }

    fn get(&self) -> (usize, usize, usize, usize) {
        (
            self.created.load(Ordering::SeqCst),
            self.dropped.load(Ordering::SeqCst),
            self.loaded.load(Ordering::SeqCst),
            self.unloaded.load(Ordering::SeqCst),
        )
    }
}

macro_rules! counted_module {
    ($name:ident, $counters:ident, version = $version:expr, scripts = [$($script:literal),*]) => {
        static $counters: Counters = Counters::new();

        struct $name;

        impl Default for $name {
            fn default() -> Self {
                $counters.created.fetch_add(1, Ordering::SeqCst);
                $name
            }
        }

        impl Drop for $name {
            fn drop(&mut self) {
                $counters.dropped.fetch_add(1, Ordering::SeqCst);
            }
        }

        impl GameModule for $name {
            fn on_load(&mut self) -> Result<(), SdkError> {
                $counters.loaded.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }

            fn on_unload(&mut self) {
                $counters.unloaded.fetch_add(1, Ordering::SeqCst);
            }

            fn register_scripts(
                &mut self,
                _registrar: &mut ScriptRegistrar<'_>,
            ) -> Result<(), SdkError> {
                $(_registrar.register::<Behavior>($script)?;)*
                Ok(())
            }

            fn version(&self) -> u32 {
                $version
            }
        }
    };
}

#[derive(Default)]
struct Behavior;

impl ScriptableBehavior for Behavior {}

counted_module!(Plain, PLAIN, version = 1, scripts = ["Player", "Enemy"]);
counted_module!(Future, FUTURE, version = 9, scripts = ["FutureScript"]);
counted_module!(First, FIRST, version = 1, scripts = ["Shared"]);
counted_module!(Second, SECOND, version = 1, scripts = ["Own", "Shared"]);

static NEVER_CALLED: AtomicUsize = AtomicUsize::new(0);

unsafe extern "C" fn counting_create() -> *mut FfiScriptModule {
    NEVER_CALLED.fetch_add(1, Ordering::SeqCst);
    std::ptr::null_mut()
}

#[test]
fn missing_entry_point_constructs_nothing() {
    let mut loader = ModuleLoader::default();

    let binary = StaticBinary::with_entry_points("broken", Some(counting_create), None);
    match loader.load_binary(binary) {
        Err(ModuleError::Load(LoadError::SymbolNotFound { symbol, .. })) => {
            assert_eq!(symbol, "DestroyScriptModule")
        }
        other => panic!("expected SymbolNotFound, got {:?}", other.map(|h| h.to_string())),
    }

    let binary = StaticBinary::with_entry_points("broken", None, None);
    assert!(matches!(
        loader.load_binary(binary),
        Err(ModuleError::Load(LoadError::SymbolNotFound { .. }))
    ));

    assert_eq!(NEVER_CALLED.load(Ordering::SeqCst), 0);
    assert!(loader.is_empty());
    assert!(loader.scripts().is_empty());
}

#[test]
fn null_module_is_construction_failure() {
    static DESTROYED: AtomicUsize = AtomicUsize::new(0);

    unsafe extern "C" fn create_null() -> *mut FfiScriptModule {
        std::ptr::null_mut()
    }
    unsafe extern "C" fn destroy(_module: *mut FfiScriptModule) {
        DESTROYED.fetch_add(1, Ordering::SeqCst);
    }

    let mut loader = ModuleLoader::default();
    let binary = StaticBinary::new("null", create_null, destroy);
    assert!(matches!(
        loader.load_binary(binary),
        Err(ModuleError::Load(LoadError::ConstructionFailed { .. }))
    ));
    assert_eq!(DESTROYED.load(Ordering::SeqCst), 0);
    assert!(loader.is_empty());
}

#[test]
fn full_lifecycle_destroys_exactly_once() {
    let mut loader = ModuleLoader::default();
    let handle = loader.load_binary(StaticBinary::of::<Plain>("plain")).unwrap();
    assert_eq!(PLAIN.get(), (1, 0, 0, 0));

    loader.activate(handle).unwrap();
    assert_eq!(PLAIN.get(), (1, 0, 1, 0));
    assert_eq!(loader.scripts().scripts_of(handle), vec!["Enemy", "Player"]);

    // Activating again is a no-op
    loader.activate(handle).unwrap();
    assert_eq!(PLAIN.get(), (1, 0, 1, 0));

    loader.unload(handle).unwrap();
    assert_eq!(PLAIN.get(), (1, 1, 1, 1));
    assert_eq!(loader.state(handle), Some(ModuleState::Unloaded));
    assert!(loader.scripts().resolve("Player").is_none());
    assert!(loader.scripts().resolve("Enemy").is_none());

    assert!(matches!(
        loader.unload(handle),
        Err(ModuleError::Lifecycle(LifecycleError::DoubleUnload(h))) if h == handle
    ));
    assert!(matches!(
        loader.activate(handle),
        Err(ModuleError::Lifecycle(LifecycleError::OperationOnInactiveModule(_)))
    ));
    assert_eq!(PLAIN.get(), (1, 1, 1, 1));
}

#[test]
fn out_of_range_version_never_loads() {
    let mut loader = ModuleLoader::new(LoaderConfig {
        accepted_versions: VersionRange::new(1, 2),
        ..LoaderConfig::default()
    });

    match loader.load_binary(StaticBinary::of::<Future>("future")) {
        Err(ModuleError::Load(LoadError::VersionMismatch { found, accepted, .. })) => {
            assert_eq!(found, 9);
            assert_eq!(accepted, VersionRange::new(1, 2));
        }
        other => panic!("expected VersionMismatch, got {:?}", other.map(|h| h.to_string())),
    }

    // Constructed to ask the version, destroyed through the module, never loaded
    assert_eq!(FUTURE.get(), (1, 1, 0, 0));
    assert!(loader.is_empty());
    assert!(!loader.scripts().contains("FutureScript"));
}

#[test]
fn duplicate_script_fails_second_module_only() {
    let mut loader = ModuleLoader::default();
    let first = loader.load_binary(StaticBinary::of::<First>("first")).unwrap();
    loader.activate(first).unwrap();

    let second = loader.load_binary(StaticBinary::of::<Second>("second")).unwrap();
    match loader.activate(second) {
        Err(ModuleError::Registry(RegistryError::DuplicateScript(name))) => {
            assert_eq!(name, "Shared")
        }
        Err(e) => panic!("expected DuplicateScript, got {}", e),
        Ok(()) => panic!("expected DuplicateScript"),
    }

    // The second module is rolled back and destroyed
    assert_eq!(SECOND.get(), (1, 1, 1, 1));
    assert_eq!(loader.state(second), Some(ModuleState::Unloaded));
    assert!(!loader.scripts().contains("Own"));

    // The first one is untouched
    assert_eq!(loader.scripts().module_of("Shared"), Some(first));
    assert_eq!(loader.state(first), Some(ModuleState::Active));
    assert_eq!(loader.activation_order(), &[first]);
}

#[test]
fn failing_on_load_is_rolled_back() {
    static UNLOADED: AtomicUsize = AtomicUsize::new(0);

    #[derive(Default)]
    struct Refuses;

    impl GameModule for Refuses {
        fn on_load(&mut self) -> Result<(), SdkError> {
            Err(SdkError::failed("missing assets"))
        }

        fn on_unload(&mut self) {
            UNLOADED.fetch_add(1, Ordering::SeqCst);
        }

        fn register_scripts(
            &mut self,
            registrar: &mut ScriptRegistrar<'_>,
        ) -> Result<(), SdkError> {
            registrar.register::<Behavior>("Refused")
        }

        fn version(&self) -> u32 {
            1
        }
    }

    let mut loader = ModuleLoader::default();
    let handle = loader.load_binary(StaticBinary::of::<Refuses>("refuses")).unwrap();
    match loader.activate(handle) {
        Err(ModuleError::Load(LoadError::OnLoadFailed { status, .. })) => {
            assert_eq!(status, FfiStatus::FAILED)
        }
        Err(e) => panic!("expected OnLoadFailed, got {}", e),
        Ok(()) => panic!("expected OnLoadFailed"),
    }

    // on_load never succeeded, so on_unload does not run
    assert_eq!(UNLOADED.load(Ordering::SeqCst), 0);
    assert!(!loader.scripts().contains("Refused"));
    assert_eq!(loader.state(handle), Some(ModuleState::Unloaded));
}

#[test]
fn failing_register_scripts_is_rolled_back() {
    static UNLOADED: AtomicUsize = AtomicUsize::new(0);

    #[derive(Default)]
    struct HalfRegistered;

    impl GameModule for HalfRegistered {
        fn on_unload(&mut self) {
            UNLOADED.fetch_add(1, Ordering::SeqCst);
        }

        fn register_scripts(
            &mut self,
            registrar: &mut ScriptRegistrar<'_>,
        ) -> Result<(), SdkError> {
            registrar.register::<Behavior>("Registered")?;
            Err(SdkError::failed("second script unavailable"))
        }

        fn version(&self) -> u32 {
            1
        }
    }

    let mut loader = ModuleLoader::default();
    let handle = loader.load_binary(StaticBinary::of::<HalfRegistered>("half")).unwrap();
    assert!(matches!(
        loader.activate(handle),
        Err(ModuleError::Load(LoadError::RegisterScriptsFailed { .. }))
    ));

    assert_eq!(UNLOADED.load(Ordering::SeqCst), 1);
    assert!(loader.scripts().is_empty());
    assert!(loader.activation_order().is_empty());
}

#[test]
fn panicking_module_is_contained() {
    #[derive(Default)]
    struct Panics;

    impl GameModule for Panics {
        fn on_load(&mut self) -> Result<(), SdkError> {
            panic!("on_load exploded");
        }

        fn register_scripts(
            &mut self,
            _registrar: &mut ScriptRegistrar<'_>,
        ) -> Result<(), SdkError> {
            Ok(())
        }

        fn version(&self) -> u32 {
            1
        }
    }

    let mut loader = ModuleLoader::default();
    let handle = loader.load_binary(StaticBinary::of::<Panics>("panics")).unwrap();
    assert!(matches!(
        loader.activate(handle),
        Err(ModuleError::Load(LoadError::OnLoadFailed { status: FfiStatus::PANICKED, .. }))
    ));
}

#[test]
fn garbage_file_fails_to_open() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(libloading::library_filename("garbage"));
    std::fs::write(&path, b"definitely not a shared library").unwrap();

    let mut loader = ModuleLoader::default();
    assert!(matches!(
        loader.load(&path),
        Err(ModuleError::Load(LoadError::OpenFailed { .. }))
    ));

    let mut shadowed = ModuleLoader::new(LoaderConfig {
        shadow_copy: true,
        shadow_directory: dir.path().join("shadow"),
        ..LoaderConfig::default()
    });
    assert!(matches!(
        shadowed.load(&path),
        Err(ModuleError::Load(LoadError::OpenFailed { .. }))
    ));
    // The failed shadow copy is cleaned up
    let leftovers = std::fs::read_dir(dir.path().join("shadow")).unwrap().count();
    assert_eq!(leftovers, 0);
}

/// A real shared library that exports neither entry point
fn system_library() -> Option<std::path::PathBuf> {
    let candidates: &[&str] = if cfg!(target_os = "linux") {
        &[
            "/lib/x86_64-linux-gnu/libc.so.6",
            "/lib/aarch64-linux-gnu/libc.so.6",
            "/usr/lib/x86_64-linux-gnu/libc.so.6",
            "/usr/lib64/libc.so.6",
            "/lib64/libc.so.6",
            "/usr/lib/libc.so.6",
            "/lib/libc.so.6",
        ]
    } else if cfg!(windows) {
        &["C:\\Windows\\System32\\kernel32.dll"]
    } else {
        &[]
    };
    candidates
        .iter()
        .map(std::path::PathBuf::from)
        .find(|path| path.is_file())
}

#[test]
fn dynamic_library_without_entry_points() {
    let Some(path) = system_library() else {
        eprintln!("no system library found, skipping");
        return;
    };

    let mut loader = ModuleLoader::default();
    match loader.load(&path) {
        Err(ModuleError::Load(LoadError::SymbolNotFound { symbol, .. })) => {
            assert_eq!(symbol, "CreateScriptModule");
        }
        other => panic!("expected SymbolNotFound, got {:?}", other.map(|h| h.to_raw())),
    }
    assert!(loader.is_empty());
    assert!(loader.scripts().is_empty());
    assert!(loader.activation_order().is_empty());
}

#[test]
fn unload_all_runs_in_reverse_activation_order() {
    static ORDER: parking_lot::Mutex<Vec<&'static str>> = parking_lot::const_mutex(Vec::new());

    macro_rules! ordered {
        ($name:ident, $label:literal) => {
            #[derive(Default)]
            struct $name;

            impl GameModule for $name {
                fn on_unload(&mut self) {
                    ORDER.lock().push($label);
                }

                fn register_scripts(
                    &mut self,
                    _registrar: &mut ScriptRegistrar<'_>,
                ) -> Result<(), SdkError> {
                    Ok(())
                }

                fn version(&self) -> u32 {
                    1
                }
            }
        };
    }

    ordered!(Alpha, "alpha");
    ordered!(Beta, "beta");
    ordered!(Gamma, "gamma");

    {
        let mut loader = ModuleLoader::default();
        let gamma = loader.load_binary(StaticBinary::of::<Gamma>("gamma")).unwrap();
        let alpha = loader.load_binary(StaticBinary::of::<Alpha>("alpha")).unwrap();
        let beta = loader.load_binary(StaticBinary::of::<Beta>("beta")).unwrap();

        loader.activate(alpha).unwrap();
        loader.activate(beta).unwrap();
        loader.activate(gamma).unwrap();
        assert_eq!(loader.activation_order(), &[alpha, beta, gamma]);
        // Dropping the loader unloads everything
    }

    assert_eq!(*ORDER.lock(), vec!["gamma", "beta", "alpha"]);
}

#[test]
fn script_instances_follow_their_module() {
    static EVENTS: parking_lot::Mutex<Vec<String>> = parking_lot::const_mutex(Vec::new());

    #[derive(Default)]
    struct Recorder {
        entity: EntityId,
    }

    impl ScriptableBehavior for Recorder {
        fn on_create(&mut self, entity: EntityId) {
            self.entity = entity;
            EVENTS.lock().push(format!("create {}", entity.to_raw()));
        }

        fn on_update(&mut self, _delta_time: f32) {
            EVENTS.lock().push(format!("update {}", self.entity.to_raw()));
        }

        fn on_destroy(&mut self) {
            EVENTS.lock().push(format!("destroy {}", self.entity.to_raw()));
        }
    }

    impl Drop for Recorder {
        fn drop(&mut self) {
            EVENTS.lock().push(format!("drop {}", self.entity.to_raw()));
        }
    }

    #[derive(Default)]
    struct Recording;

    impl GameModule for Recording {
        fn register_scripts(
            &mut self,
            registrar: &mut ScriptRegistrar<'_>,
        ) -> Result<(), SdkError> {
            registrar.register::<Recorder>("Recorder")
        }

        fn version(&self) -> u32 {
            1
        }
    }

    let mut loader = ModuleLoader::default();
    let handle = loader.load_binary(StaticBinary::of::<Recording>("recording")).unwrap();
    loader.activate(handle).unwrap();

    let factory = loader.scripts().resolve("Recorder").unwrap();
    let mut first = factory.instantiate().unwrap();
    first.on_create(EntityId::from_raw(1)).unwrap();
    first.on_update(0.5).unwrap();
    drop(first);

    let mut second = factory.instantiate().unwrap();
    second.on_create(EntityId::from_raw(2)).unwrap();

    loader.unload(handle).unwrap();
    assert!(!factory.is_available());
    assert!(matches!(
        factory.instantiate(),
        Err(ModuleError::Lifecycle(LifecycleError::OperationOnInactiveModule(_)))
    ));
    assert!(matches!(
        second.on_update(0.5),
        Err(ModuleError::Lifecycle(LifecycleError::OperationOnInactiveModule(_)))
    ));
    // Still freed by the module, without on_destroy
    drop(second);

    assert_eq!(
        *EVENTS.lock(),
        vec!["create 1", "update 1", "destroy 1", "drop 1", "create 2", "drop 2"]
    );
}
