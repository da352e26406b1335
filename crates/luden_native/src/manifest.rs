//! Module manifest: which game modules to load, in what order
//!
//! ```toml
//! [loader]
//! accepted_versions = { min = 1, max = 1 }
//! shadow_copy = true
//! search_paths = ["target/debug"]
//!
//! [[module]]
//! name = "paddle_game"
//! library = "paddle_game"
//! hot_reload = true
//! ```

use crate::error::ManifestError;
use crate::loader::LoaderConfig;
use crate::version::VersionRange;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Loader section of a manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderSection {
    pub accepted_versions: VersionRange,
    pub shadow_copy: bool,
    /// Overrides the default shadow directory
    pub shadow_directory: Option<PathBuf>,
    /// Directories searched for `library` entries, in order
    pub search_paths: Vec<PathBuf>,
}

impl Default for LoaderSection {
    fn default() -> Self {
        Self {
            accepted_versions: VersionRange::default(),
            shadow_copy: false,
            shadow_directory: None,
            search_paths: vec![PathBuf::from(".")],
        }
    }
}

/// One `[[module]]` entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleEntry {
    /// Slot name
    pub name: String,
    /// Platform-independent library name, e.g. `paddle_game`
    #[serde(default)]
    pub library: Option<String>,
    /// Explicit path to the binary
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub hot_reload: bool,
}

/// Parsed module manifest
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModuleManifest {
    #[serde(default)]
    pub loader: LoaderSection,
    #[serde(default, rename = "module")]
    pub modules: Vec<ModuleEntry>,
}

impl ModuleManifest {
    /// Parse and validate a manifest
    pub fn from_toml(source: &str) -> Result<Self, ManifestError> {
        let manifest: ModuleManifest = toml::from_str(source)?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Read a manifest file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ManifestError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| ManifestError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut manifest = Self::from_toml(&source)?;

        // Relative search paths are relative to the manifest
        if let Some(base) = path.parent() {
            manifest.rebase(base);
        }
        Ok(manifest)
    }

    pub fn validate(&self) -> Result<(), ManifestError> {
        let mut names = HashSet::new();
        for entry in &self.modules {
            if entry.name.is_empty() {
                return Err(ManifestError::Invalid("module entry without a name".to_string()));
            }
            if !names.insert(entry.name.as_str()) {
                return Err(ManifestError::Invalid(format!(
                    "module '{}' is listed twice",
                    entry.name
                )));
            }
            match (&entry.library, &entry.path) {
                (None, None) => {
                    return Err(ManifestError::Invalid(format!(
                        "module '{}' needs either `library` or `path`",
                        entry.name
                    )))
                }
                (Some(_), Some(_)) => {
                    return Err(ManifestError::Invalid(format!(
                        "module '{}' sets both `library` and `path`",
                        entry.name
                    )))
                }
                _ => {}
            }
        }
        if self.loader.accepted_versions.min > self.loader.accepted_versions.max {
            return Err(ManifestError::Invalid(format!(
                "accepted version range {} is empty",
                self.loader.accepted_versions
            )));
        }
        Ok(())
    }

    /// Make relative paths relative to `base`
    pub fn rebase(&mut self, base: &Path) {
        for dir in &mut self.loader.search_paths {
            if dir.is_relative() {
                *dir = base.join(&*dir);
            }
        }
        for entry in &mut self.modules {
            if let Some(path) = entry.path.as_mut().filter(|p| p.is_relative()) {
                *path = base.join(&*path);
            }
        }
    }

    /// Binary path of an entry.
    ///
    /// A `library` name is mapped to the platform file name and looked up
    /// in the search paths; the first existing file wins, otherwise the
    /// first search path is assumed.
    pub fn resolve_path(&self, entry: &ModuleEntry) -> PathBuf {
        if let Some(path) = &entry.path {
            return path.clone();
        }
        let file_name =
            libloading::library_filename(entry.library.as_deref().unwrap_or(entry.name.as_str()));

        let candidates: Vec<PathBuf> = self
            .loader
            .search_paths
            .iter()
            .map(|dir| dir.join(&file_name))
            .collect();
        candidates
            .iter()
            .find(|candidate| candidate.is_file())
            .or_else(|| candidates.first())
            .cloned()
            .unwrap_or_else(|| PathBuf::from(file_name))
    }

    pub fn loader_config(&self) -> LoaderConfig {
        let mut config = LoaderConfig {
            accepted_versions: self.loader.accepted_versions,
            shadow_copy: self.loader.shadow_copy,
            ..LoaderConfig::default()
        };
        if let Some(dir) = &self.loader.shadow_directory {
            config.shadow_directory = dir.clone();
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_manifest() {
        let manifest = ModuleManifest::from_toml(
            r#"
            [loader]
            accepted_versions = { min = 1, max = 2 }
            shadow_copy = true
            search_paths = ["target/debug"]

            [[module]]
            name = "paddle_game"
            library = "paddle_game"
            hot_reload = true

            [[module]]
            name = "tools"
            path = "/opt/game/libtools.so"
            "#,
        )
        .unwrap();

        assert_eq!(manifest.loader.accepted_versions, VersionRange::new(1, 2));
        assert!(manifest.loader.shadow_copy);
        assert_eq!(manifest.modules.len(), 2);
        assert!(manifest.modules[0].hot_reload);
        assert!(!manifest.modules[1].hot_reload);

        let path = manifest.resolve_path(&manifest.modules[0]);
        assert_eq!(
            path,
            Path::new("target/debug").join(libloading::library_filename("paddle_game"))
        );
        assert_eq!(
            manifest.resolve_path(&manifest.modules[1]),
            PathBuf::from("/opt/game/libtools.so")
        );

        let config = manifest.loader_config();
        assert!(config.shadow_copy);
        assert!(config.accepted_versions.contains(2));
    }

    #[test]
    fn test_empty_manifest_defaults() {
        let manifest = ModuleManifest::from_toml("").unwrap();
        assert!(manifest.modules.is_empty());
        assert_eq!(manifest.loader.accepted_versions, VersionRange::exactly(1));
        assert!(!manifest.loader.shadow_copy);
    }

    #[test]
    fn test_invalid_manifests() {
        let missing = "[[module]]\nname = \"game\"";
        assert!(matches!(
            ModuleManifest::from_toml(missing),
            Err(ManifestError::Invalid(_))
        ));

        let duplicate =
            "[[module]]\nname = \"a\"\nlibrary = \"a\"\n[[module]]\nname = \"a\"\nlibrary = \"b\"";
        assert!(matches!(
            ModuleManifest::from_toml(duplicate),
            Err(ManifestError::Invalid(_))
        ));

        let range = "[loader]\naccepted_versions = { min = 3, max = 1 }";
        assert!(matches!(
            ModuleManifest::from_toml(range),
            Err(ManifestError::Invalid(_))
        ));

        assert!(matches!(
            ModuleManifest::from_toml("[[module]]\nname = 3"),
            Err(ManifestError::Parse(_))
        ));
    }

    #[test]
    fn test_load_rebases_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("modules.toml");
        std::fs::write(
            &file,
            "[loader]\nsearch_paths = [\"bin\"]\n[[module]]\nname = \"g\"\npath = \"bin/libg.so\"",
        )
        .unwrap();

        let manifest = ModuleManifest::load(&file).unwrap();
        assert_eq!(manifest.loader.search_paths, vec![dir.path().join("bin")]);
        assert_eq!(manifest.modules[0].path, Some(dir.path().join("bin/libg.so")));

        assert!(matches!(
            ModuleManifest::load(dir.path().join("missing.toml")),
            Err(ManifestError::Io { .. })
        ));
    }
}
