//! Advertised devices: one per non-default class of a cache level.

use excat_resctrl::BufferSet;

use crate::api::{self, Device};

/// An advertised device and the class it maps back to.
#[derive(Debug, Clone, PartialEq)]
pub struct Buffer {
    pub device: Device,
    pub class_name: String,
}

/// Device ID of a class: `<prefix><resource>-<class>`.
pub fn device_id(prefix: &str, resource: &str, class_name: &str) -> String {
    format!("{}{}-{}", prefix, resource, class_name)
}

/// Devices of one cache level, replaced as a whole on every reconciliation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceTable {
    buffers: Vec<Buffer>,
}

impl DeviceTable {
    /// Builds the device list for a buffer set, skipping the default class.
    pub fn from_buffer_set(set: &BufferSet, prefix: &str, resource: &str) -> Self {
        let buffers = set
            .classes()
            .iter()
            .filter(|class| !class.is_default())
            .map(|class| Buffer {
                device: Device {
                    id: device_id(prefix, resource, &class.name),
                    health: api::HEALTHY.to_string(),
                    topology: None,
                },
                class_name: class.name.clone(),
            })
            .collect();

        Self { buffers }
    }

    pub fn buffers(&self) -> &[Buffer] {
        &self.buffers
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Devices in the form sent to the kubelet.
    pub fn devices(&self) -> Vec<Device> {
        self.buffers.iter().map(|b| b.device.clone()).collect()
    }

    /// Class names of all devices.
    pub fn class_names(&self) -> impl Iterator<Item = &str> {
        self.buffers.iter().map(|b| b.class_name.as_str())
    }

    /// Resolves a device ID to the class it was created for.
    pub fn class_for(&self, id: &str) -> Option<&str> {
        self.buffers
            .iter()
            .find(|b| b.device.id == id)
            .map(|b| b.class_name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use excat_resctrl::{filter_by_level, CacheLevel, ClassSnapshot, DEFAULT_CLASS};
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;

    fn class(name: &str) -> ClassSnapshot {
        ClassSnapshot {
            name: name.to_string(),
            path: PathBuf::from("/sys/fs/resctrl").join(name),
            bitmask_schema: "L3:0=00003".to_string(),
            size_schema: "L3:0=2621440".to_string(),
            cache_level: Some(CacheLevel::L3),
            size_kib: 2560,
        }
    }

    #[test]
    fn test_device_id() {
        assert_eq!(
            device_id("intel.com/", "excat-l3", "class0"),
            "intel.com/excat-l3-class0"
        );
    }

    #[test]
    fn test_table_skips_default_class() {
        let classes = vec![class("class0"), class("class1"), class(DEFAULT_CLASS)];
        let set = filter_by_level(&classes, CacheLevel::L3);

        let table = DeviceTable::from_buffer_set(&set, "intel.com/", "excat-l3");
        assert_eq!(table.len(), 2);
        assert_eq!(table.class_names().collect::<Vec<_>>(), vec!["class0", "class1"]);
        assert!(table.devices().iter().all(|d| d.health == api::HEALTHY));
        assert_eq!(table.class_for("intel.com/excat-l3-class1"), Some("class1"));
        assert_eq!(table.class_for("intel.com/excat-l3-class9"), None);
    }
}
