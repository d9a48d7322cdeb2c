//! The character registry.
//!
//! Loads persona files from a directory into an immutable `Snapshot`.
//! Loading is all-or-nothing per file: a malformed file is skipped and
//! counted, never aborting the scan. A reload builds a complete new
//! snapshot before the caller swaps it in, so readers never observe a
//! partially loaded state.

use crate::character::Character;
use crate::tools;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Reload target that resolves to the directory configured at startup.
pub const DEFAULT_DIRECTORY_KEYWORD: &str = "default";

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("character directory not found: {0}")]
    DirectoryNotFound(PathBuf),
    #[error("character directory not readable: {path}: {source}")]
    DirectoryUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("no valid character files in: {0}")]
    NoValidCharacters(PathBuf),
    #[error("invalid character directory: {0}")]
    InvalidFormat(String),
}

impl RegistryError {
    /// Stable machine-readable code carried on wire-protocol error events.
    pub fn code(&self) -> &'static str {
        match self {
            RegistryError::DirectoryNotFound(_) => "directory_not_found",
            RegistryError::DirectoryUnreadable { .. } => "directory_not_readable",
            RegistryError::NoValidCharacters(_) => "no_valid_characters",
            RegistryError::InvalidFormat(_) => "invalid_directory_format",
        }
    }
}

/// An immutable view of one directory scan. Lookup is by name; `list`
/// preserves load order (lexicographic by filename).
#[derive(Debug, Default)]
pub struct Snapshot {
    by_name: HashMap<String, Arc<Character>>,
    order: Vec<String>,
    directory: PathBuf,
}

impl Snapshot {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<Character>> {
        self.by_name.get(name).cloned()
    }

    /// Characters in load order.
    pub fn list(&self) -> impl Iterator<Item = &Arc<Character>> {
        self.order.iter().filter_map(|name| self.by_name.get(name))
    }

    /// The first character in load order, used as the session default.
    pub fn first(&self) -> Option<Arc<Character>> {
        self.order.first().and_then(|name| self.lookup(name))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }
}

/// The result of one directory load. `loaded_count + error_count` always
/// equals `total_files`.
#[derive(Debug)]
pub struct LoadOutcome {
    pub snapshot: Arc<Snapshot>,
    pub loaded_count: usize,
    pub error_count: usize,
    pub total_files: usize,
}

/// Loads character directories and validates reload targets.
#[derive(Debug)]
pub struct Registry {
    default_dir: PathBuf,
}

impl Registry {
    pub fn new(default_dir: PathBuf) -> Self {
        Self { default_dir }
    }

    pub fn default_dir(&self) -> &Path {
        &self.default_dir
    }

    /// Resolves a reload target. Only the `"default"` keyword and absolute
    /// paths are accepted.
    pub fn resolve_target(&self, target: &str) -> Result<PathBuf, RegistryError> {
        if target == DEFAULT_DIRECTORY_KEYWORD {
            return Ok(self.default_dir.clone());
        }
        let path = PathBuf::from(target);
        if !path.is_absolute() {
            return Err(RegistryError::InvalidFormat(format!(
                "\"{target}\" is neither \"{DEFAULT_DIRECTORY_KEYWORD}\" nor an absolute path"
            )));
        }
        Ok(path)
    }

    /// Initial load of the default directory. An empty directory is valid
    /// here; it is reported with a warning, not an error.
    pub fn load_default(&self) -> Result<LoadOutcome, RegistryError> {
        let outcome = self.load_dir(&self.default_dir)?;
        if outcome.snapshot.is_empty() {
            warn!(directory = %self.default_dir.display(), "no usable characters in default directory");
        }
        Ok(outcome)
    }

    /// Loads a reload target. A scan that yields zero characters is an
    /// error so that callers keep their previous snapshot.
    pub fn reload(&self, target: &str) -> Result<LoadOutcome, RegistryError> {
        let dir = self.resolve_target(target)?;
        let outcome = self.load_dir(&dir)?;
        if outcome.snapshot.is_empty() {
            return Err(RegistryError::NoValidCharacters(dir));
        }
        Ok(outcome)
    }

    fn load_dir(&self, dir: &Path) -> Result<LoadOutcome, RegistryError> {
        if !dir.exists() {
            return Err(RegistryError::DirectoryNotFound(dir.to_path_buf()));
        }
        if !dir.is_dir() {
            return Err(RegistryError::InvalidFormat(format!(
                "{} is not a directory",
                dir.display()
            )));
        }
        let entries = fs::read_dir(dir).map_err(|source| RegistryError::DirectoryUnreadable {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.is_file() && path.extension().and_then(|s| s.to_str()) == Some("json")
            })
            .collect();
        files.sort();

        let mut snapshot = Snapshot {
            directory: dir.to_path_buf(),
            ..Snapshot::default()
        };
        let total_files = files.len();
        let mut error_count = 0;

        for path in &files {
            match load_file(path) {
                Ok(character) => {
                    if snapshot.by_name.contains_key(&character.name) {
                        warn!(
                            file = %path.display(),
                            name = %character.name,
                            "duplicate character name, keeping the first occurrence"
                        );
                        error_count += 1;
                        continue;
                    }
                    snapshot.order.push(character.name.clone());
                    snapshot
                        .by_name
                        .insert(character.name.clone(), Arc::new(character));
                }
                Err(reason) => {
                    warn!(file = %path.display(), %reason, "skipping character file");
                    error_count += 1;
                }
            }
        }

        let loaded_count = snapshot.len();
        info!(
            directory = %dir.display(),
            loaded_count, error_count, total_files,
            "character directory loaded"
        );
        Ok(LoadOutcome {
            snapshot: Arc::new(snapshot),
            loaded_count,
            error_count,
            total_files,
        })
    }
}

fn load_file(path: &Path) -> Result<Character, String> {
    let contents = fs::read_to_string(path).map_err(|e| e.to_string())?;
    let character: Character = serde_json::from_str(&contents).map_err(|e| e.to_string())?;
    validate(&character)?;
    Ok(character)
}

fn validate(character: &Character) -> Result<(), String> {
    if character.name.trim().is_empty() {
        return Err("character name must not be empty".into());
    }
    let mut seen = std::collections::HashSet::new();
    for tool in &character.tools {
        if !seen.insert(tool.name.as_str()) {
            return Err(format!("duplicate tool name \"{}\"", tool.name));
        }
        if tools::lookup_handler(&tool.handler).is_none() {
            return Err(format!(
                "tool \"{}\" references unknown handler \"{}\"",
                tool.name, tool.handler
            ));
        }
    }
    Ok(())
}
