//! # luden_native - Native Game Modules
//!
//! Loads externally compiled game modules through a fixed C ABI, keeps the
//! registry of the script behaviors they provide and lets one of them supply
//! the runtime application that drives the frame loop.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐
//! │   GameModule    │────▶│  Dynamic Lib    │
//! │  (Rust + sdk)   │     │  (game.so)      │
//! └─────────────────┘     └────────┬────────┘
//!                                  │ CreateScriptModule / DestroyScriptModule
//!                                  ▼
//! ┌─────────────────┐     ┌─────────────────┐
//! │  ModuleLoader   │◀────│ ModuleBinary    │
//! │ (state machine) │     │ (libloading)    │
//! └────────┬────────┘     └─────────────────┘
//!          │ RegisterScripts
//!          ▼
//! ┌─────────────────┐     ┌─────────────────┐
//! │ ScriptRegistry  │────▶│ ScriptInstance  │
//! │ (name→factory)  │     │ (module-owned)  │
//! └────────┬────────┘     └─────────────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ ScriptComponent │ ◀── per entity
//! └─────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use luden_native::prelude::*;
//!
//! let mut loader = ModuleLoader::new(LoaderConfig::default());
//! let handle = loader.load("target/debug/libpaddle_game.so")?;
//! loader.activate(handle)?;
//!
//! let mut paddle = ScriptComponent::new(EntityId::from_name("paddle"), "PaddleController");
//! paddle.attach(loader.scripts())?;
//! paddle.update(1.0 / 60.0)?;
//! ```
//!
//! ## Module Side
//!
//! ```ignore
//! use luden_native::sdk::*;
//!
//! #[derive(Default)]
//! struct Game;
//!
//! impl GameModule for Game {
//!     fn register_scripts(
//!         &mut self,
//!         registrar: &mut ScriptRegistrar<'_>,
//!     ) -> Result<(), SdkError> {
//!         registrar.register::<PaddleController>("PaddleController")
//!     }
//!
//!     fn version(&self) -> u32 {
//!         1
//!     }
//! }
//!
//! luden_native::export_game_module!(Game);
//! ```

pub mod application;
pub mod binary;
pub mod component;
pub mod error;
pub mod ffi;
pub mod foreign;
pub mod host;
pub mod loader;
pub mod manifest;
pub mod script;
pub mod sdk;
pub mod version;

#[cfg(feature = "hot-reload")]
pub mod hot_reload;

pub use application::{
    ApplicationFactory, ApplicationSpec, DefaultApplication, ForeignApplication, RuntimeApplication,
};
pub use binary::{DynamicBinary, ModuleBinary, ModuleLibrary, StaticBinary};
pub use component::{ScriptComponent, ScriptComponentConfig};
pub use error::{LifecycleError, LoadError, ManifestError, ModuleError, RegistryError, Result};
pub use ffi::FfiStatus;
pub use host::{ModuleHost, ModuleSlot, ModuleSource, StartupReport};
pub use loader::{LoaderConfig, ModuleDescriptor, ModuleHandle, ModuleLoader, ModuleState};
pub use manifest::{ModuleEntry, ModuleManifest};
pub use script::{ScriptFactory, ScriptInstance, ScriptRegistry};
pub use version::VersionRange;

#[cfg(feature = "hot-reload")]
pub use hot_reload::{HotReloadConfig, ModuleWatcher};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::application::{ApplicationSpec, RuntimeApplication};
    pub use crate::component::ScriptComponent;
    pub use crate::error::{ModuleError, Result};
    pub use crate::host::ModuleHost;
    pub use crate::loader::{LoaderConfig, ModuleHandle, ModuleLoader, ModuleState};
    pub use crate::script::ScriptRegistry;
    pub use luden_core::EntityId;
}
