//! Snapshot of all classes configured in resctrl.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, Span};

use crate::buffers::{extract_details, CacheLevel};
use crate::error::{ResctrlError, ResctrlResult};
use crate::provider::ResctrlProvider;
use crate::{DEFAULT_CLASS, SCHEMATA_FILE, SIZE_FILE};

/// One configured class at the time it was read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassSnapshot {
    /// Class name, [`DEFAULT_CLASS`] for the root group.
    pub name: String,
    /// Class directory.
    pub path: PathBuf,
    /// The single cache level line of the `schemata` file.
    pub bitmask_schema: String,
    /// The single cache level line of the `size` file.
    pub size_schema: String,
    /// Derived from `size_schema` by [`extract_details`].
    pub cache_level: Option<CacheLevel>,
    /// Derived from `size_schema` by [`extract_details`].
    pub size_kib: u64,
}

impl ClassSnapshot {
    /// Returns true for the group holding all unassigned tasks.
    pub fn is_default(&self) -> bool {
        self.name == DEFAULT_CLASS
    }
}

/// Reader for the resctrl tree rooted at `root`.
///
/// Stateless: every call reads the pseudo filesystem again.
#[derive(Clone)]
pub struct Resctrl {
    provider: Arc<dyn ResctrlProvider>,
    root: PathBuf,
    span: Span,
}

impl Resctrl {
    pub fn new(provider: Arc<dyn ResctrlProvider>, root: impl Into<PathBuf>, span: Span) -> Self {
        Self {
            provider,
            root: root.into(),
            span,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of a class; the default class lives in the root itself.
    pub fn class_path(&self, name: &str) -> PathBuf {
        if name == DEFAULT_CLASS {
            self.root.clone()
        } else {
            self.root.join(name)
        }
    }

    /// Lists the names of all configured classes.
    pub fn class_names(&self) -> ResctrlResult<Vec<String>> {
        self.provider.class_names()
    }

    /// Reads name, path and both schemata of every class.
    ///
    /// A single malformed class fails the whole snapshot.
    pub fn snapshot(&self) -> ResctrlResult<Vec<ClassSnapshot>> {
        let _enter = self.span.enter();
        debug!("Reading classes from {}", self.root.display());

        let names = self.provider.class_names()?;
        let mut classes = Vec::with_capacity(names.len());

        for name in names {
            let path = self.class_path(&name);
            let bitmask_schema = self.read_single_line(&path.join(SCHEMATA_FILE))?;
            let size_schema = self.read_single_line(&path.join(SIZE_FILE))?;

            classes.push(ClassSnapshot {
                name,
                path,
                bitmask_schema,
                size_schema,
                cache_level: None,
                size_kib: 0,
            });
        }

        Ok(classes)
    }

    /// Reads all classes and extracts their cache level and size.
    pub fn load_buffers(&self) -> ResctrlResult<Vec<ClassSnapshot>> {
        let classes = self.snapshot()?;

        let _enter = self.span.enter();
        debug!("Extracting buffer details of {} classes", classes.len());
        extract_details(classes)
    }

    /// Reads the PIDs assigned to a class from its `tasks` file.
    pub fn task_pids(&self, tasks_file: &Path) -> ResctrlResult<Vec<String>> {
        let _enter = self.span.enter();
        debug!("Get PIDs in {}", tasks_file.display());
        self.provider.read_file(tasks_file, false)
    }

    fn read_single_line(&self, path: &Path) -> ResctrlResult<String> {
        let mut lines = self.provider.read_file(path, true)?;
        match lines.len() {
            1 => Ok(lines.remove(0)),
            0 => Err(ResctrlError::format(path, "no cache level definition found")),
            _ => Err(ResctrlError::format(
                path,
                "multiple definitions, just one cache level allowed per buffer",
            )),
        }
    }
}

impl std::fmt::Debug for Resctrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resctrl").field("root", &self.root).finish()
    }
}
