//! The runtime: brings modules up, drives the frame loop, tears down
//!
//! Teardown order: frame loop stops, scripts detach, the application shuts
//! down and is destroyed, modules unload in reverse activation order and
//! the reflection registry goes last.

use crate::config::RuntimeConfig;
use crate::scene::{self, Entity};
use luden_core::{register_builtin_components, RegistryError, TypeRegistry};
use luden_native::{ModuleError, ModuleHost, RuntimeApplication};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

#[cfg(feature = "hot-reload")]
use luden_native::{HotReloadConfig, ModuleWatcher};

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Failed to register built-in components: {0}")]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Module(#[from] ModuleError),
}

/// Why the frame loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The application returned false
    Application,
    FrameLimit,
    /// Ctrl-C or [`Runtime::stop_handle`]
    Interrupted,
}

pub struct Runtime {
    config: RuntimeConfig,
    // Field order is drop order
    entities: Vec<Entity>,
    app: Option<Box<dyn RuntimeApplication>>,
    #[cfg(feature = "hot-reload")]
    watcher: Option<ModuleWatcher>,
    host: ModuleHost,
    registry: Arc<TypeRegistry>,
    running: Arc<AtomicBool>,
    frame: u64,
    shut_down: bool,
}

impl Runtime {
    /// Start the modules named in the config
    pub fn new(config: RuntimeConfig) -> Result<Self, RuntimeError> {
        let host = ModuleHost::from_manifest(&config.manifest)?;
        Self::with_host(config, host)
    }

    /// Start with a prepared host, e.g. one with static modules
    pub fn with_host(config: RuntimeConfig, mut host: ModuleHost) -> Result<Self, RuntimeError> {
        let mut registry = TypeRegistry::new();
        register_builtin_components(&mut registry)?;
        let registry = Arc::new(registry);
        log::info!("Registered {} component types", registry.len());

        let report = host.start();
        if !report.is_complete() {
            log::warn!(
                "{} of {} modules failed to start",
                report.failed.len(),
                report.failed.len() + report.activated.len()
            );
        }

        let app = host.create_application(&config.application)?;

        let mut entities = scene::build_entities(&registry, &config.entities);
        let attached = scene::attach_scripts(&mut entities, host.scripts());
        log::info!("Built {} entities, {} with scripts", entities.len(), attached);

        #[cfg(feature = "hot-reload")]
        let watcher = if config.runtime.hot_reload {
            Self::start_watcher(&host)
        } else {
            None
        };

        Ok(Self {
            config,
            entities,
            app: Some(app),
            #[cfg(feature = "hot-reload")]
            watcher,
            host,
            registry,
            running: Arc::new(AtomicBool::new(true)),
            frame: 0,
            shut_down: false,
        })
    }

    #[cfg(feature = "hot-reload")]
    fn start_watcher(host: &ModuleHost) -> Option<ModuleWatcher> {
        let targets = host.hot_reload_targets();
        if targets.is_empty() {
            return None;
        }

        let mut watcher = match ModuleWatcher::new(HotReloadConfig::default()) {
            Ok(watcher) => watcher,
            Err(e) => {
                log::warn!("Hot reload disabled: {}", e);
                return None;
            }
        };
        for (slot, path) in targets {
            if let Err(e) = watcher.watch(slot, path) {
                log::warn!("Cannot watch module '{}': {}", slot, e);
            }
        }
        Some(watcher)
    }

    /// Flag that keeps the frame loop running; clear it to stop
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    pub fn host(&self) -> &ModuleHost {
        &self.host
    }

    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Run until the application stops, the frame limit or an interrupt
    pub fn run(&mut self) -> StopReason {
        if let Some(app) = self.app.as_mut() {
            app.on_init();
        }

        let mut last = Instant::now();
        let reason = loop {
            if !self.running.load(Ordering::SeqCst) {
                break StopReason::Interrupted;
            }
            if self.config.runtime.frame_limit.is_some_and(|limit| self.frame >= limit) {
                break StopReason::FrameLimit;
            }

            let now = Instant::now();
            let delta = match self.config.runtime.fixed_delta {
                Some(fixed) => fixed,
                None => now
                    .duration_since(last)
                    .as_secs_f32()
                    .min(self.config.runtime.max_delta),
            };
            last = now;

            if !self.step(delta) {
                break StopReason::Application;
            }
            self.poll_hot_reload();
        };

        log::info!("Frame loop stopped after {} frames ({:?})", self.frame, reason);
        self.shutdown();
        reason
    }

    /// One frame: scripts first, then the application
    fn step(&mut self, delta: f32) -> bool {
        self.frame += 1;

        scene::update_scripts(&mut self.entities, delta);

        match self.app.as_mut() {
            Some(app) => app.on_update(delta),
            None => false,
        }
    }

    #[cfg(feature = "hot-reload")]
    fn poll_hot_reload(&mut self) {
        let slots = match &self.watcher {
            Some(watcher) => watcher.poll(),
            None => return,
        };
        for slot in slots {
            self.reload(&slot);
        }
    }

    #[cfg(not(feature = "hot-reload"))]
    fn poll_hot_reload(&mut self) {}

    /// Swap the module in a slot between frames
    pub fn reload(&mut self, slot: &str) -> bool {
        // Instances must not outlive the module that created them
        scene::detach_scripts(&mut self.entities);

        let reloaded = match self.host.reload(slot) {
            Ok(handle) => {
                log::info!("Hot-reloaded module '{}' as {}", slot, handle);
                true
            }
            Err(e) => {
                log::error!("Failed to reload module '{}': {}", slot, e);
                false
            }
        };

        scene::attach_scripts(&mut self.entities, self.host.scripts());
        reloaded
    }

    /// Tear down in order; idempotent
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;

        scene::detach_scripts(&mut self.entities);
        if let Some(mut app) = self.app.take() {
            app.on_shutdown();
        }
        #[cfg(feature = "hot-reload")]
        {
            self.watcher = None;
        }
        self.host.shutdown();
        log::info!("Runtime shut down");
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use luden_native::sdk::{
        ApplicationSpec, GameModule, ScriptRegistrar, ScriptableBehavior, SdkError,
    };
    use luden_native::StaticBinary;
    use std::sync::atomic::AtomicUsize;

    static TICKS: AtomicUsize = AtomicUsize::new(0);
    static SHUTDOWNS: AtomicUsize = AtomicUsize::new(0);

    #[derive(Default)]
    struct Ticker;

    impl ScriptableBehavior for Ticker {
        fn on_update(&mut self, _delta_time: f32) {
            TICKS.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct StopsAfter(u32);

    impl RuntimeApplication for StopsAfter {
        fn on_update(&mut self, _delta_time: f32) -> bool {
            self.0 = self.0.saturating_sub(1);
            self.0 > 0
        }

        fn on_shutdown(&mut self) {
            SHUTDOWNS.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct Game;

    impl GameModule for Game {
        fn register_scripts(
            &mut self,
            registrar: &mut ScriptRegistrar<'_>,
        ) -> Result<(), SdkError> {
            registrar.register::<Ticker>("Ticker")
        }

        fn version(&self) -> u32 {
            1
        }

        fn create_runtime_application(
            &mut self,
            _spec: &ApplicationSpec,
        ) -> Option<Box<dyn RuntimeApplication>> {
            Some(Box::new(StopsAfter(4)))
        }
    }

    #[derive(Default)]
    struct Idle;

    impl ScriptableBehavior for Idle {}

    #[derive(Default)]
    struct Scripts;

    impl GameModule for Scripts {
        fn register_scripts(
            &mut self,
            registrar: &mut ScriptRegistrar<'_>,
        ) -> Result<(), SdkError> {
            registrar.register::<Idle>("Idle")
        }

        fn version(&self) -> u32 {
            1
        }
    }

    fn config(source: &str) -> RuntimeConfig {
        RuntimeConfig::from_toml(source).unwrap()
    }

    #[test]
    fn test_application_stops_the_loop() {
        let mut host = ModuleHost::default();
        host.add_static("game", StaticBinary::of::<Game>("game"));
        let mut runtime = Runtime::with_host(
            config("[runtime]\nfixed_delta = 0.1\n[[entity]]\nname = \"a\"\nscript = \"Ticker\""),
            host,
        )
        .unwrap();

        let before = TICKS.load(Ordering::SeqCst);
        assert_eq!(runtime.run(), StopReason::Application);
        assert_eq!(runtime.frame(), 4);
        assert_eq!(TICKS.load(Ordering::SeqCst) - before, 4);
        assert_eq!(SHUTDOWNS.load(Ordering::SeqCst), 1);
        assert!(runtime.host().loader().is_empty());

        // Second shutdown is a no-op
        runtime.shutdown();
        assert_eq!(SHUTDOWNS.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_frame_limit_and_interrupt() {
        let mut runtime = Runtime::with_host(
            config("[runtime]\nframe_limit = 3\nfixed_delta = 0.1"),
            ModuleHost::default(),
        )
        .unwrap();
        assert_eq!(runtime.run(), StopReason::FrameLimit);
        assert_eq!(runtime.frame(), 3);

        let mut runtime =
            Runtime::with_host(RuntimeConfig::default(), ModuleHost::default()).unwrap();
        runtime.stop_handle().store(false, Ordering::SeqCst);
        assert_eq!(runtime.run(), StopReason::Interrupted);
        assert_eq!(runtime.frame(), 0);
    }

    #[test]
    fn test_reload_reattaches_scripts() {
        let mut host = ModuleHost::default();
        host.add_static("scripts", StaticBinary::of::<Scripts>("scripts"));
        let mut runtime = Runtime::with_host(
            config("[runtime]\nframe_limit = 2\n[[entity]]\nname = \"a\"\nscript = \"Idle\""),
            host,
        )
        .unwrap();
        assert_eq!(runtime.registry().len(), 12);
        let first = runtime.host().scripts().module_of("Idle");

        assert!(runtime.reload("scripts"));
        let second = runtime.host().scripts().module_of("Idle");
        assert_ne!(first, second);
        assert!(runtime.entities()[0].script().unwrap().is_attached());

        assert!(!runtime.reload("missing"));
        assert!(runtime.entities()[0].script().unwrap().is_attached());
        assert_eq!(runtime.run(), StopReason::FrameLimit);
    }
}
