//! RDT cache allocation classes as configured in resctrl.
//!
//! Classes configured in `/sys/fs/resctrl` are read and the size as well as
//! the cache level of the cache slice each one allocates are extracted:
//!
//! - [`provider`]: class enumeration and pseudo file reading behind the
//!   [`ResctrlProvider`] trait
//! - [`model`]: full snapshot of all classes ([`Resctrl::snapshot`])
//! - [`buffers`]: cache level and size extraction, level filtering and size
//!   labels
//! - [`error`]: error types
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use excat_resctrl::{derive_labels, filter_by_level, CacheLevel, FsProvider, Resctrl};
//!
//! let resctrl = Resctrl::new(
//!     Arc::new(FsProvider::new(RESCTRL_ROOT)),
//!     RESCTRL_ROOT,
//!     tracing::info_span!("resctrl"),
//! );
//! let classes = resctrl.load_buffers()?;
//! let labels = derive_labels(&classes)?;
//! let l3 = filter_by_level(&classes, CacheLevel::L3);
//! ```

pub mod buffers;
pub mod error;
pub mod model;
pub mod provider;

pub use buffers::{
    bytes_to_kib, derive_labels, extract_details, filter_by_level, parse_size_schemata,
    BufferSet, CacheLevel, SizeLabels,
};
pub use error::{ResctrlError, ResctrlResult};
pub use model::{ClassSnapshot, Resctrl};
pub use provider::{parse_lines, FsProvider, MemoryProvider, ResctrlProvider};

/// Mount point of the resctrl pseudo filesystem.
pub const RESCTRL_ROOT: &str = "/sys/fs/resctrl";

/// Name of the group holding every task not assigned to another class.
pub const DEFAULT_CLASS: &str = "system/default";

/// Cache way bitmask per cache ID.
pub const SCHEMATA_FILE: &str = "schemata";

/// Cache slice size in bytes per cache ID.
pub const SIZE_FILE: &str = "size";

/// PIDs assigned to a class.
pub const TASKS_FILE: &str = "tasks";
