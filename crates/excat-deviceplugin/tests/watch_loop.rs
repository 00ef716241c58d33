//! Integration tests for the resctrl watch loop
//!
//! Runs a level's watch loop against a resctrl-like tree in a temporary
//! directory and edits the tree the way an administrator would.

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;

    use excat_deviceplugin::device::DeviceTable;
    use excat_deviceplugin::{ExcatDevicePlugin, NoopLabeler, PluginSettings, PluginState};
    use excat_resctrl::{filter_by_level, CacheLevel, FsProvider, Resctrl};
    use tempfile::TempDir;
    use tokio::sync::watch;
    use tracing::Span;

    const TIMEOUT: Duration = Duration::from_secs(5);
    const QUIET: Duration = Duration::from_millis(500);

    fn write_class(dir: &Path, schemata: &str, size: &str) {
        fs::create_dir_all(dir).unwrap();
        fs::write(dir.join("schemata"), schemata).unwrap();
        fs::write(dir.join("size"), size).unwrap();
        fs::write(dir.join("tasks"), "").unwrap();
    }

    fn ids(table: &DeviceTable) -> Vec<String> {
        table.devices().into_iter().map(|d| d.id).collect()
    }

    async fn wait_for_ids(rx: &mut watch::Receiver<DeviceTable>, expected: &[&str]) {
        let expected: Vec<String> = expected.iter().map(|id| id.to_string()).collect();
        tokio::time::timeout(TIMEOUT, rx.wait_for(|table| ids(table) == expected))
            .await
            .unwrap()
            .unwrap();
    }

    async fn wait_for_state(plugin: &ExcatDevicePlugin, state: PluginState) {
        tokio::time::timeout(TIMEOUT, async {
            while plugin.state() != state {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_watch_loop_follows_resctrl() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("resctrl");
        let staging = tmp.path().join("staging");
        write_class(&root, "L3:0=f0000\n", "L3:0=5242880\n");
        write_class(&root.join("class0"), "L3:0=00003\n", "L3:0=2621440\n");

        let resctrl = Resctrl::new(Arc::new(FsProvider::new(&root)), &root, Span::none());
        let initial = filter_by_level(&resctrl.load_buffers().unwrap(), CacheLevel::L3);
        let settings = PluginSettings {
            task_settle_delay: Duration::ZERO,
            ..PluginSettings::default()
        };
        let plugin = Arc::new(ExcatDevicePlugin::new(
            CacheLevel::L3,
            resctrl,
            Arc::new(NoopLabeler),
            settings,
            Span::none(),
        ));
        plugin.advertise(&initial);

        let mut rx = plugin.subscribe();
        rx.mark_unchanged();
        assert_eq!(ids(&rx.borrow()), vec!["intel.com/excat-l3-class0"]);

        let task = tokio::spawn(plugin.clone().run_watch_loop(initial));
        wait_for_state(&plugin, PluginState::Watching).await;

        // Task assignments are only logged.
        fs::write(root.join("class0/tasks"), "42\n").unwrap();
        tokio::time::sleep(QUIET).await;
        assert!(!rx.has_changed().unwrap());

        // A class moved in complete is picked up.
        write_class(&staging.join("class1"), "L3:0=0001c\n", "L3:0=3932160\n");
        fs::rename(staging.join("class1"), root.join("class1")).unwrap();
        wait_for_ids(
            &mut rx,
            &["intel.com/excat-l3-class0", "intel.com/excat-l3-class1"],
        )
        .await;
        wait_for_state(&plugin, PluginState::Watching).await;

        // A malformed edit leaves the advertised list alone.
        rx.mark_unchanged();
        fs::write(root.join("class1/size"), "L2:0=262144\nL3:0=3932160\n").unwrap();
        tokio::time::sleep(QUIET).await;
        assert!(!rx.has_changed().unwrap());
        assert_eq!(
            ids(&rx.borrow()),
            vec!["intel.com/excat-l3-class0", "intel.com/excat-l3-class1"]
        );

        // Removing the class drops its device.
        fs::remove_dir_all(root.join("class1")).unwrap();
        wait_for_ids(&mut rx, &["intel.com/excat-l3-class0"]).await;

        plugin.stop();
        let result = tokio::time::timeout(TIMEOUT, task).await.unwrap().unwrap();
        assert!(result.is_ok());
        assert_eq!(plugin.state(), PluginState::Terminated);
    }
}
