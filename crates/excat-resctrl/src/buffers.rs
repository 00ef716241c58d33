//! Buffer extraction from size schemata.
//!
//! A class configures exactly one cache level; its `size` file reports the
//! byte size of the slice per cache ID, e.g. `L3:0=2621440;1=2621440`. This
//! module turns that line into a cache level and a size in KiB, filters
//! classes by cache level and derives the per-level size labels advertised on
//! the node.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

use crate::error::{ResctrlError, ResctrlResult};
use crate::model::ClassSnapshot;

/// Trailing decimal digits of a `<id>=<bytes>` entry.
static SIZE_SUFFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+$").expect("valid regex"));

/// Cache level a class allocates from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheLevel(u8);

impl CacheLevel {
    pub const L2: CacheLevel = CacheLevel(2);
    pub const L3: CacheLevel = CacheLevel(3);

    /// Levels buffers are advertised for.
    pub const SUPPORTED: [CacheLevel; 2] = [CacheLevel::L2, CacheLevel::L3];

    pub fn new(level: u8) -> Self {
        Self(level)
    }

    /// Returns the numeric level (2 for `L2`).
    pub fn number(self) -> u8 {
        self.0
    }
}

impl fmt::Display for CacheLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

impl FromStr for CacheLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.strip_prefix('L')
            .and_then(|n| n.parse::<u8>().ok())
            .map(CacheLevel)
            .ok_or_else(|| format!("invalid cache level '{}'", s))
    }
}

/// Converts bytes into kibibytes, rounding down.
pub fn bytes_to_kib(bytes: u64) -> u64 {
    bytes / 1024
}

/// Parses a size schemata line into its cache level and size in KiB.
///
/// All cache IDs are expected to carry the same size so that every CPU sees
/// the same buffer. A mismatch is only logged; the first entry's size is
/// used.
pub fn parse_size_schemata(path: &Path, line: &str) -> ResctrlResult<(CacheLevel, u64)> {
    let parts: Vec<&str> = line.split(':').collect();
    if parts.len() != 2 {
        return Err(ResctrlError::format(path, format!("malformed size schemata '{}'", line)));
    }

    let level: CacheLevel = parts[0]
        .parse()
        .map_err(|e: String| ResctrlError::format(path, e))?;

    let mut sizes: Vec<&str> = Vec::new();
    for entry in parts[1].split(';') {
        let size = SIZE_SUFFIX
            .find(entry)
            .map(|m| m.as_str())
            .ok_or_else(|| {
                ResctrlError::format(path, format!("missing size in cache ID entry '{}'", entry))
            })?;

        if let Some(prev) = sizes.last() {
            if *prev != size {
                warn!(
                    "Different buffer sizes ({} and {}) detected for cache level {}. \
                     The first size is used and the difference is wasted. One root cause \
                     can be a software SRAM buffer allocated on one of the {} caches.",
                    size, prev, level, level
                );
            }
        }
        sizes.push(size);
    }

    let first = sizes
        .first()
        .ok_or_else(|| ResctrlError::format(path, "missing size info"))?;
    let bytes: u64 = first
        .parse()
        .map_err(|e| ResctrlError::format(path, format!("invalid size '{}': {}", first, e)))?;

    Ok((level, bytes_to_kib(bytes)))
}

/// Fills in cache level and size of every class.
///
/// Fails on the first class whose size schemata cannot be interpreted.
pub fn extract_details(mut classes: Vec<ClassSnapshot>) -> ResctrlResult<Vec<ClassSnapshot>> {
    for class in classes.iter_mut() {
        let (level, size_kib) = parse_size_schemata(&class.path, &class.size_schema)?;
        class.cache_level = Some(level);
        class.size_kib = size_kib;
    }
    Ok(classes)
}

/// Classes allocating from one cache level, in resctrl order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferSet {
    level: CacheLevel,
    classes: Vec<ClassSnapshot>,
}

impl BufferSet {
    pub fn level(&self) -> CacheLevel {
        self.level
    }

    pub fn classes(&self) -> &[ClassSnapshot] {
        &self.classes
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    /// Names of all classes in the set.
    pub fn class_names(&self) -> impl Iterator<Item = &str> {
        self.classes.iter().map(|c| c.name.as_str())
    }
}

/// Keeps the classes configuring `level`.
///
/// An empty result is normal: many hosts only partition one cache level.
pub fn filter_by_level(classes: &[ClassSnapshot], level: CacheLevel) -> BufferSet {
    debug!("Filter buffers based on cache level {}", level);
    BufferSet {
        level,
        classes: classes
            .iter()
            .filter(|c| c.cache_level == Some(level))
            .cloned()
            .collect(),
    }
}

/// Smallest buffer size in KiB per supported cache level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SizeLabels {
    l2: Option<u64>,
    l3: Option<u64>,
}

impl SizeLabels {
    pub fn get(&self, level: CacheLevel) -> Option<u64> {
        match level {
            CacheLevel::L2 => self.l2,
            CacheLevel::L3 => self.l3,
            _ => None,
        }
    }

    /// Label value for `level`: the size in KiB, or empty if no buffer exists.
    pub fn value(&self, level: CacheLevel) -> String {
        self.get(level).map(|v| v.to_string()).unwrap_or_default()
    }

    fn observe(&mut self, level: CacheLevel, size_kib: u64) {
        let slot = match level {
            CacheLevel::L2 => &mut self.l2,
            CacheLevel::L3 => &mut self.l3,
            _ => return,
        };
        *slot = Some(slot.map_or(size_kib, |cur| cur.min(size_kib)));
    }
}

/// Derives one size label per cache level from all non-default classes.
///
/// Classes with different sizes on the same level are possible; the smallest
/// one is advertised so that every buffer satisfies the label.
pub fn derive_labels(classes: &[ClassSnapshot]) -> ResctrlResult<SizeLabels> {
    let mut labels = SizeLabels::default();

    for class in classes.iter().filter(|c| !c.is_default()) {
        if let Some(level) = class.cache_level {
            labels.observe(level, class.size_kib);
        }
    }

    if labels.l2.is_none() && labels.l3.is_none() {
        return Err(ResctrlError::NoLabels);
    }

    debug!("L2 label: {:?}", labels.l2);
    debug!("L3 label: {:?}", labels.l3);
    Ok(labels)
}
