//! Resource, annotation and label name constants for the device plugin

use excat_resctrl::CacheLevel;

/// Vendor prefix of extended resources, device IDs and node labels.
pub const RESOURCE_PREFIX: &str = "intel.com/";

/// Base name of the extended resources (`excat-l2`, `excat-l3`).
pub const RESOURCE_BASE_NAME: &str = "excat";

/// Socket name prefix inside the device plugin directory.
pub const SOCKET_PREFIX: &str = "intel-excat";

// Container annotations set on allocation
/// RDT class annotation understood by containerd and CRI-O.
pub const RDT_ANNOTATION: &str = "io.kubernetes.cri.rdt-class";
/// RDT class annotation understood by CRI Resource Manager.
pub const RDT_CRIRM_ANNOTATION: &str = "rdtclass.cri-resource-manager.intel.com/pod";

/// Resource name of a cache level without vendor prefix, e.g. `excat-l3`.
pub fn resource_name(base: &str, level: CacheLevel) -> String {
    format!("{}-l{}", base, level.number())
}

/// Socket file name of a cache level, e.g. `intel-excat-l3`.
pub fn socket_name(level: CacheLevel) -> String {
    format!("{}-l{}", SOCKET_PREFIX, level.number())
}
