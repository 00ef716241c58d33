//! Access to the resctrl pseudo filesystem.
//!
//! [`ResctrlProvider`] is the seam between the parser and the kernel: the
//! real [`FsProvider`] reads a mounted resctrl tree, [`MemoryProvider`] serves
//! the same data from memory so the parsing layer can be tested without RDT
//! hardware.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use regex::Regex;
use tracing::debug;

use crate::error::{ResctrlError, ResctrlResult};
use crate::{DEFAULT_CLASS, SCHEMATA_FILE};

/// Cache allocation line, e.g. `L3:0=00003;1=00003`.
static CAT_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*L\d:.+").expect("valid regex"));

/// Memory bandwidth allocation line, e.g. `MB:0=100`.
static MBA_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*MB:.+").expect("valid regex"));

/// Directories in the resctrl root that are not classes.
const CONTROL_DIRS: &[&str] = &["info", "mon_groups", "mon_data"];

/// Capability to enumerate classes and read resctrl pseudo files.
pub trait ResctrlProvider: Send + Sync {
    /// Returns the names of all configured classes, default class included.
    fn class_names(&self) -> ResctrlResult<Vec<String>>;

    /// Reads a pseudo file and returns its normalized lines.
    ///
    /// With `schemata` set, the content is validated with [`parse_lines`].
    fn read_file(&self, path: &Path, schemata: bool) -> ResctrlResult<Vec<String>>;
}

/// Validates and normalizes the lines of a resctrl pseudo file.
///
/// In schemata mode every line must either define one cache level
/// (`L<n>:<id>=<value>[;<id>=<value>...]`) or a memory bandwidth limit
/// (`MB:...`, dropped). A second cache level line fails the whole file, as
/// only one cache level per class is supported. Anything else is a format
/// error.
///
/// Outside schemata mode (tasks files) every line is kept. Blank lines are
/// skipped and all whitespace is removed from retained lines in both modes.
pub fn parse_lines(path: &Path, content: &str, schemata: bool) -> ResctrlResult<Vec<String>> {
    let mut lines = Vec::new();
    let mut cat_defined = false;

    for line in content.lines() {
        if line.trim().is_empty() {
            continue;
        }

        if schemata {
            if CAT_LINE.is_match(line) {
                if cat_defined {
                    return Err(ResctrlError::format(
                        path,
                        "several definitions detected: only one cache level definition supported per class",
                    ));
                }
                cat_defined = true;
            } else if MBA_LINE.is_match(line) {
                continue;
            } else {
                return Err(ResctrlError::format(
                    path,
                    format!("unknown format of line '{}'", line.trim()),
                ));
            }
        }

        lines.push(line.chars().filter(|c| !c.is_whitespace()).collect());
    }

    Ok(lines)
}

/// Provider backed by a mounted resctrl filesystem.
#[derive(Debug, Clone)]
pub struct FsProvider {
    root: PathBuf,
}

impl FsProvider {
    /// Creates a provider for the resctrl tree mounted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the resctrl mount point.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Fails unless resctrl is mounted and exposes an L2 or L3 allocation resource.
    fn check_available(&self) -> ResctrlResult<()> {
        if !self.root.join(SCHEMATA_FILE).is_file() {
            return Err(ResctrlError::unavailable(
                &self.root,
                "resctrl filesystem is not mounted",
            ));
        }

        let info = self.root.join("info");
        if info.is_dir() {
            let entries = fs::read_dir(&info).map_err(|e| ResctrlError::io(&info, e))?;
            let mut has_cat = false;
            for entry in entries {
                let entry = entry.map_err(|e| ResctrlError::io(&info, e))?;
                let name = entry.file_name();
                let name = name.to_string_lossy();
                if name.starts_with("L2") || name.starts_with("L3") {
                    has_cat = true;
                    break;
                }
            }
            if !has_cat {
                return Err(ResctrlError::unavailable(
                    &self.root,
                    "no L2 or L3 cache allocation resource reported",
                ));
            }
        }

        Ok(())
    }
}

impl ResctrlProvider for FsProvider {
    fn class_names(&self) -> ResctrlResult<Vec<String>> {
        self.check_available()?;

        let entries = fs::read_dir(&self.root).map_err(|e| ResctrlError::io(&self.root, e))?;
        let mut names = Vec::new();

        for entry in entries {
            let entry = entry.map_err(|e| ResctrlError::io(&self.root, e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if CONTROL_DIRS.contains(&name.as_str()) {
                continue;
            }

            let path = entry.path();
            if path.is_dir() && path.join(SCHEMATA_FILE).is_file() {
                names.push(name);
            }
        }

        names.sort();
        names.push(DEFAULT_CLASS.to_string());

        debug!("Detected {} classes in {}", names.len(), self.root.display());
        Ok(names)
    }

    fn read_file(&self, path: &Path, schemata: bool) -> ResctrlResult<Vec<String>> {
        let content = fs::read_to_string(path).map_err(|e| ResctrlError::io(path, e))?;
        parse_lines(path, &content, schemata)
    }
}

/// In-memory provider for tests and dry runs.
///
/// Classes and file contents can be changed at any time through a shared
/// reference, which lets tests simulate resctrl reconfiguration.
#[derive(Debug, Default)]
pub struct MemoryProvider {
    classes: RwLock<Option<Vec<String>>>,
    files: RwLock<HashMap<PathBuf, String>>,
}

impl MemoryProvider {
    /// Creates a provider reporting the given class names.
    pub fn new<S: Into<String>>(classes: impl IntoIterator<Item = S>) -> Self {
        Self {
            classes: RwLock::new(Some(classes.into_iter().map(Into::into).collect())),
            files: RwLock::new(HashMap::new()),
        }
    }

    /// Creates a provider behaving like a host without RDT CAT support.
    pub fn unavailable() -> Self {
        Self::default()
    }

    /// Adds a file, builder style.
    pub fn with_file(self, path: impl Into<PathBuf>, content: impl Into<String>) -> Self {
        self.set_file(path, content);
        self
    }

    /// Adds or replaces a file.
    pub fn set_file(&self, path: impl Into<PathBuf>, content: impl Into<String>) {
        self.files.write().insert(path.into(), content.into());
    }

    /// Removes a file.
    pub fn remove_file(&self, path: impl AsRef<Path>) {
        self.files.write().remove(path.as_ref());
    }

    /// Replaces the reported class names.
    pub fn set_classes<S: Into<String>>(&self, classes: impl IntoIterator<Item = S>) {
        *self.classes.write() = Some(classes.into_iter().map(Into::into).collect());
    }
}

impl ResctrlProvider for MemoryProvider {
    fn class_names(&self) -> ResctrlResult<Vec<String>> {
        self.classes
            .read()
            .clone()
            .ok_or_else(|| ResctrlError::unavailable("memory", "RDT CAT not supported"))
    }

    fn read_file(&self, path: &Path, schemata: bool) -> ResctrlResult<Vec<String>> {
        let files = self.files.read();
        let content = files.get(path).ok_or_else(|| ResctrlError::NotFound {
            path: path.to_path_buf(),
        })?;
        parse_lines(path, content, schemata)
    }
}
