//! ExCAT device plugin - RDT cache buffers as Kubernetes extended resources
//!
//! Every non-default resctrl class allocating a slice of L2 or L3 cache is
//! advertised to the kubelet as one device of `intel.com/excat-l2` or
//! `intel.com/excat-l3`. A container requesting such a device is annotated
//! with the class name, and the container runtime assigns it to the class.
//!
//! Key features:
//! - One device plugin per cache level, each on its own socket
//! - resctrl change notifications trigger a rebuild of the device list
//! - Node labels carrying the buffer size per cache level
//! - One buffer per container, enforced on allocation

pub mod api;
pub mod config;
pub mod consts;
pub mod device;
pub mod error;
pub mod labels;
pub mod logging;
pub mod plugin;
pub mod server;
pub mod watcher;

pub use config::PluginConfig;
pub use device::{Buffer, DeviceTable};
pub use error::{PluginError, Result};
pub use labels::{KubeNodeLabeler, NodeLabeler, NoopLabeler};
pub use plugin::{ExcatDevicePlugin, PluginSettings, PluginState};
pub use server::{start_and_register, PluginServer};
pub use watcher::{ResctrlWatcher, WatchEvent};
