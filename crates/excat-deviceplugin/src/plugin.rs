//! Buffer lifecycle manager of one cache level.
//!
//! Holds the advertised device list, serves it to the kubelet and keeps it
//! in line with resctrl. One instance runs per cache level; instances share
//! nothing but the read-only resctrl handle.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use excat_resctrl::{
    derive_labels, filter_by_level, BufferSet, CacheLevel, Resctrl, ResctrlError, SizeLabels,
    DEFAULT_CLASS,
};
use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tonic::{Request, Response, Status};
use tracing::{debug, error, info, warn, Instrument, Span};

use crate::api::device_plugin_server::DevicePlugin;
use crate::api::{
    AllocateRequest, AllocateResponse, ContainerAllocateResponse, Device, DevicePluginOptions,
    Empty, ListAndWatchResponse, PreStartContainerRequest, PreStartContainerResponse,
    PreferredAllocationRequest, PreferredAllocationResponse,
};
use crate::config::PluginConfig;
use crate::consts::{self, RDT_ANNOTATION, RDT_CRIRM_ANNOTATION};
use crate::device::DeviceTable;
use crate::error::{PluginError, Result};
use crate::labels::{self, NodeLabeler};
use crate::watcher::{classify, ResctrlWatcher, WatchEvent};

/// Stream type of `ListAndWatch`.
pub type DeviceListStream =
    Pin<Box<dyn Stream<Item = std::result::Result<ListAndWatchResponse, Status>> + Send>>;

/// Lifecycle of a cache level's plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginState {
    Uninitialized,
    Advertising,
    Watching,
    Reconciling,
    Terminated,
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PluginState::Uninitialized => "uninitialized",
            PluginState::Advertising => "advertising",
            PluginState::Watching => "watching",
            PluginState::Reconciling => "reconciling",
            PluginState::Terminated => "terminated",
        };
        write!(f, "{}", s)
    }
}

/// Per-level settings taken from the configuration.
#[derive(Debug, Clone)]
pub struct PluginSettings {
    pub prefix: String,
    pub base_name: String,
    pub task_settle_delay: Duration,
    pub task_read_timeout: Duration,
}

impl PluginSettings {
    pub fn from_config(config: &PluginConfig) -> Self {
        Self {
            prefix: config.resource.prefix.clone(),
            base_name: config.resource.base_name.clone(),
            task_settle_delay: config.task_settle_delay(),
            task_read_timeout: config.task_read_timeout(),
        }
    }
}

impl Default for PluginSettings {
    fn default() -> Self {
        Self::from_config(&PluginConfig::default())
    }
}

/// Device plugin of one cache level.
pub struct ExcatDevicePlugin {
    level: CacheLevel,
    settings: PluginSettings,
    resctrl: Resctrl,
    labeler: Arc<dyn NodeLabeler>,
    devices: watch::Sender<DeviceTable>,
    shutdown: watch::Sender<bool>,
    state: Mutex<PluginState>,
    span: Span,
}

impl ExcatDevicePlugin {
    pub fn new(
        level: CacheLevel,
        resctrl: Resctrl,
        labeler: Arc<dyn NodeLabeler>,
        settings: PluginSettings,
        span: Span,
    ) -> Self {
        let (devices, _) = watch::channel(DeviceTable::default());
        let (shutdown, _) = watch::channel(false);

        Self {
            level,
            settings,
            resctrl,
            labeler,
            devices,
            shutdown,
            state: Mutex::new(PluginState::Uninitialized),
            span,
        }
    }

    pub fn level(&self) -> CacheLevel {
        self.level
    }

    /// Resource name without vendor prefix, e.g. `excat-l3`.
    pub fn resource_name(&self) -> String {
        consts::resource_name(&self.settings.base_name, self.level)
    }

    /// Extended resource name registered with the kubelet, e.g. `intel.com/excat-l3`.
    pub fn full_resource_name(&self) -> String {
        format!("{}{}", self.settings.prefix, self.resource_name())
    }

    /// Socket file name inside the device plugin directory.
    pub fn socket_name(&self) -> String {
        consts::socket_name(self.level)
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn state(&self) -> PluginState {
        *self.state.lock()
    }

    fn set_state(&self, state: PluginState) {
        let mut current = self.state.lock();
        if *current != state {
            debug!(parent: &self.span, "State {} -> {}", *current, state);
            *current = state;
        }
    }

    /// Currently advertised devices.
    pub fn devices(&self) -> Vec<Device> {
        self.devices.borrow().devices()
    }

    /// Receiver observing every replacement of the device list.
    pub fn subscribe(&self) -> watch::Receiver<DeviceTable> {
        self.devices.subscribe()
    }

    /// Publishes the initial device list.
    pub fn advertise(&self, set: &BufferSet) {
        self.set_state(PluginState::Advertising);
        self.publish(set);
    }

    /// Replaces the device list with the buffers of `set`.
    ///
    /// Returns false, and notifies nobody, when the list is unchanged.
    pub fn publish(&self, set: &BufferSet) -> bool {
        let table = DeviceTable::from_buffer_set(set, &self.settings.prefix, &self.resource_name());
        let names: Vec<String> = table.class_names().map(str::to_string).collect();

        let changed = self.devices.send_if_modified(|current| {
            if *current == table {
                false
            } else {
                *current = table;
                true
            }
        });

        if changed {
            info!(parent: &self.span, "Advertising {} buffers: {:?}", names.len(), names);
        } else {
            debug!(parent: &self.span, "Device list unchanged");
        }
        changed
    }

    /// Rebuilds the model, refreshes the node label and republishes the
    /// devices of this level.
    ///
    /// On failure the previous device list stays in effect.
    pub async fn reconcile(&self) -> Result<BufferSet> {
        self.set_state(PluginState::Reconciling);
        let result = self.rebuild().instrument(self.span.clone()).await;
        self.set_state(PluginState::Watching);
        result
    }

    async fn rebuild(&self) -> Result<BufferSet> {
        let resctrl = self.resctrl.clone();
        let classes = tokio::task::spawn_blocking(move || resctrl.load_buffers())
            .await
            .map_err(|e| PluginError::Io(std::io::Error::other(e)))??;

        let labels = derive_labels(&classes)?;
        self.update_label(&labels).await;

        let set = filter_by_level(&classes, self.level);
        if set.classes().iter().all(|class| class.is_default()) {
            info!("No buffers of cache level {} left", self.level);
        }
        self.publish(&set);
        Ok(set)
    }

    async fn update_label(&self, labels: &SizeLabels) {
        labels::remove_quietly(self.labeler.as_ref(), self.level).await;

        if let Some(size) = labels.get(self.level) {
            if let Err(e) = self.labeler.add(self.level, &size.to_string()).await {
                warn!("Couldn't set label of cache level {}: {}", self.level, e);
            }
        }
    }

    /// Processes one watch event.
    ///
    /// Returns the new buffer set when the event led to a successful
    /// reconciliation.
    pub async fn handle_event(&self, event: WatchEvent) -> Option<BufferSet> {
        match event {
            WatchEvent::Tasks(path) => {
                self.log_tasks(&path).instrument(self.span.clone()).await;
                None
            }
            WatchEvent::Buffers(paths) => {
                debug!(parent: &self.span, "Buffers changed: {:?}", paths);
                match self.reconcile().await {
                    Ok(set) => Some(set),
                    Err(e) => {
                        self.log_reconcile_failure(&e);
                        None
                    }
                }
            }
        }
    }

    fn log_reconcile_failure(&self, e: &PluginError) {
        match e {
            PluginError::Resctrl(err) if err.is_unavailable() => error!(
                parent: &self.span,
                "resctrl unavailable, keeping the previous device list: {}", err
            ),
            PluginError::Resctrl(err) if err.is_format() => warn!(
                parent: &self.span,
                "Malformed buffer configuration, keeping the previous device list: {}", err
            ),
            PluginError::Resctrl(ResctrlError::NoLabels) => warn!(
                parent: &self.span,
                "No buffers configured on any cache level, keeping the previous device list"
            ),
            _ => warn!(
                parent: &self.span,
                "Reconciliation failed, keeping the previous device list: {}", e
            ),
        }
    }

    async fn log_tasks(&self, tasks_file: &Path) {
        // Give the assignment time to land before reading.
        tokio::time::sleep(self.settings.task_settle_delay).await;

        let resctrl = self.resctrl.clone();
        let file = tasks_file.to_path_buf();
        let read = tokio::task::spawn_blocking(move || resctrl.task_pids(&file));
        let class = self.class_of(tasks_file);

        match tokio::time::timeout(self.settings.task_read_timeout, read).await {
            Err(_) => warn!("Timed out reading tasks of class {}", class),
            Ok(Err(e)) => warn!("Reading tasks of class {} panicked: {}", class, e),
            Ok(Ok(Err(e))) => warn!("Couldn't read tasks of class {}: {}", class, e),
            Ok(Ok(Ok(pids))) if pids.is_empty() => {
                info!("No tasks assigned to class {}, buffer available", class)
            }
            Ok(Ok(Ok(pids))) => info!("Tasks {:?} assigned to class {}", pids, class),
        }
    }

    fn class_of(&self, tasks_file: &Path) -> String {
        let dir = tasks_file.parent().unwrap_or(tasks_file);
        if dir == self.resctrl.root() {
            return DEFAULT_CLASS.to_string();
        }
        dir.strip_prefix(self.resctrl.root())
            .unwrap_or(dir)
            .to_string_lossy()
            .into_owned()
    }

    fn watch_dirs(&self, set: &BufferSet) -> Vec<PathBuf> {
        std::iter::once(self.resctrl.root().to_path_buf())
            .chain(set.classes().iter().map(|class| class.path.clone()))
            .collect()
    }

    /// Watches resctrl and reconciles on every change until [`stop`] is
    /// called or the watcher fails.
    ///
    /// Events are handled one after the other, the next event is only
    /// looked at once the previous reconciliation has been published.
    ///
    /// [`stop`]: Self::stop
    pub async fn run_watch_loop(self: Arc<Self>, initial: BufferSet) -> Result<()> {
        let span = self.span.clone();
        let result = self.watch_loop(initial).instrument(span).await;
        if let Err(e) = &result {
            error!(parent: &self.span, "Watcher terminated: {}", e);
        }
        self.set_state(PluginState::Terminated);
        result
    }

    async fn watch_loop(&self, initial: BufferSet) -> Result<()> {
        let (mut watcher, mut events) = ResctrlWatcher::new(self.span.clone())?;
        watcher.rearm(self.watch_dirs(&initial))?;
        self.set_state(PluginState::Watching);
        info!("Watching {} directories", watcher.watched().count());

        let mut stop = self.shutdown.subscribe();
        loop {
            let event = tokio::select! {
                _ = wait_stopped(&mut stop) => {
                    info!("Watcher stopped");
                    return Ok(());
                }
                event = events.recv() => event,
            };

            let event = match event {
                Some(Ok(event)) => event,
                Some(Err(e)) => {
                    warn!("Watch error: {}", e);
                    continue;
                }
                None => {
                    return Err(PluginError::Watch(notify::Error::generic(
                        "watch event channel closed",
                    )))
                }
            };

            let Some(event) = classify(&event) else {
                continue;
            };
            if let Some(set) = self.handle_event(event).await {
                watcher.rearm(self.watch_dirs(&set))?;
            }
        }
    }

    /// Ends the watch loop, the gRPC server and every open `ListAndWatch`
    /// stream.
    pub fn stop(&self) {
        self.shutdown.send_replace(true);
    }

    /// Completes once [`stop`](Self::stop) has been called.
    pub async fn stopped(&self) {
        wait_stopped(&mut self.shutdown.subscribe()).await;
    }

    /// Resolves each container request to the class of its device.
    pub fn allocate_buffers(&self, request: &AllocateRequest) -> Result<AllocateResponse> {
        let _enter = self.span.enter();
        let table = self.devices.borrow();
        let mut container_responses = Vec::with_capacity(request.container_requests.len());

        for container in &request.container_requests {
            info!("Received allocation request for {:?}", container.devices_ids);

            let id = match container.devices_ids.as_slice() {
                [id] => id,
                ids => {
                    warn!("Rejecting request for {} buffers", ids.len());
                    return Err(PluginError::AllocationConstraint(ids.to_vec()));
                }
            };

            let class = table
                .class_for(id)
                .ok_or_else(|| PluginError::UnknownDevice(id.clone()))?;

            let annotations = HashMap::from([
                (RDT_ANNOTATION.to_string(), class.to_string()),
                (RDT_CRIRM_ANNOTATION.to_string(), class.to_string()),
            ]);
            debug!("Allocated {} from class {}", id, class);

            container_responses.push(ContainerAllocateResponse {
                annotations,
                ..Default::default()
            });
        }

        Ok(AllocateResponse {
            container_responses,
        })
    }
}

async fn wait_stopped(stop: &mut watch::Receiver<bool>) {
    // An error means the sender is gone, which counts as stopped too.
    let _ = stop.wait_for(|stopped| *stopped).await;
}

#[tonic::async_trait]
impl DevicePlugin for ExcatDevicePlugin {
    async fn get_device_plugin_options(
        &self,
        _request: Request<Empty>,
    ) -> std::result::Result<Response<DevicePluginOptions>, Status> {
        Ok(Response::new(DevicePluginOptions::default()))
    }

    type ListAndWatchStream = DeviceListStream;

    async fn list_and_watch(
        &self,
        _request: Request<Empty>,
    ) -> std::result::Result<Response<Self::ListAndWatchStream>, Status> {
        info!(parent: &self.span, "ListAndWatch stream opened");

        let mut stop = self.shutdown.subscribe();
        let stream = WatchStream::new(self.devices.subscribe())
            .map(|table| {
                Ok::<_, Status>(ListAndWatchResponse {
                    devices: table.devices(),
                })
            })
            .take_until(async move { wait_stopped(&mut stop).await });

        Ok(Response::new(Box::pin(stream)))
    }

    async fn get_preferred_allocation(
        &self,
        _request: Request<PreferredAllocationRequest>,
    ) -> std::result::Result<Response<PreferredAllocationResponse>, Status> {
        Ok(Response::new(PreferredAllocationResponse::default()))
    }

    async fn allocate(
        &self,
        request: Request<AllocateRequest>,
    ) -> std::result::Result<Response<AllocateResponse>, Status> {
        let response = self.allocate_buffers(request.get_ref())?;
        Ok(Response::new(response))
    }

    async fn pre_start_container(
        &self,
        _request: Request<PreStartContainerRequest>,
    ) -> std::result::Result<Response<PreStartContainerResponse>, Status> {
        Ok(Response::new(PreStartContainerResponse::default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ContainerAllocateRequest;
    use async_trait::async_trait;
    use excat_resctrl::{MemoryProvider, RESCTRL_ROOT};
    use pretty_assertions::assert_eq;

    #[derive(Default)]
    struct RecordingLabeler {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl NodeLabeler for RecordingLabeler {
        async fn add(&self, level: CacheLevel, value: &str) -> Result<()> {
            self.calls.lock().push(format!("add {}={}", level, value));
            Ok(())
        }

        async fn remove(&self, level: CacheLevel) -> Result<()> {
            self.calls.lock().push(format!("remove {}", level));
            Ok(())
        }
    }

    fn three_classes() -> Arc<MemoryProvider> {
        let root = Path::new(RESCTRL_ROOT);
        Arc::new(
            MemoryProvider::new(["class0", "class1", DEFAULT_CLASS])
                .with_file(root.join("schemata"), "L3:0=f0000\n")
                .with_file(root.join("size"), "L3:0=5242880\n")
                .with_file(root.join("tasks"), "1\n2\n")
                .with_file(root.join("class0/schemata"), "L3:0=00003\n")
                .with_file(root.join("class0/size"), "L3:0=2621440\n")
                .with_file(root.join("class0/tasks"), "")
                .with_file(root.join("class1/schemata"), "L3:0=0001c\n")
                .with_file(root.join("class1/size"), "L3:0=3932160\n")
                .with_file(root.join("class1/tasks"), "77\n"),
        )
    }

    fn settings() -> PluginSettings {
        PluginSettings {
            task_settle_delay: Duration::ZERO,
            ..PluginSettings::default()
        }
    }

    fn plugin(
        provider: Arc<MemoryProvider>,
        level: CacheLevel,
        labeler: Arc<dyn NodeLabeler>,
    ) -> ExcatDevicePlugin {
        let resctrl = Resctrl::new(provider, RESCTRL_ROOT, Span::none());
        ExcatDevicePlugin::new(level, resctrl, labeler, settings(), Span::none())
    }

    fn request(ids: &[&str]) -> AllocateRequest {
        AllocateRequest {
            container_requests: vec![ContainerAllocateRequest {
                devices_ids: ids.iter().map(|id| id.to_string()).collect(),
            }],
        }
    }

    fn ids(plugin: &ExcatDevicePlugin) -> Vec<String> {
        plugin.devices().into_iter().map(|d| d.id).collect()
    }

    #[test]
    fn test_names() {
        let plugin = plugin(three_classes(), CacheLevel::L3, Arc::new(RecordingLabeler::default()));
        assert_eq!(plugin.resource_name(), "excat-l3");
        assert_eq!(plugin.full_resource_name(), "intel.com/excat-l3");
        assert_eq!(plugin.socket_name(), "intel-excat-l3");
        assert_eq!(plugin.state(), PluginState::Uninitialized);
    }

    #[tokio::test]
    async fn test_reconcile_publishes_devices_and_label() {
        let labeler = Arc::new(RecordingLabeler::default());
        let plugin = plugin(three_classes(), CacheLevel::L3, labeler.clone());

        let set = plugin.reconcile().await.unwrap();
        assert_eq!(set.len(), 3);
        assert_eq!(
            ids(&plugin),
            vec!["intel.com/excat-l3-class0", "intel.com/excat-l3-class1"]
        );
        assert_eq!(plugin.state(), PluginState::Watching);
        assert_eq!(
            *labeler.calls.lock(),
            vec!["remove L3".to_string(), "add L3=2560".to_string()]
        );
    }

    #[tokio::test]
    async fn test_reconcile_is_idempotent() {
        let plugin = plugin(three_classes(), CacheLevel::L3, Arc::new(RecordingLabeler::default()));
        let mut rx = plugin.subscribe();

        plugin.reconcile().await.unwrap();
        assert!(rx.has_changed().unwrap());
        let first = rx.borrow_and_update().clone();

        plugin.reconcile().await.unwrap();
        assert!(!rx.has_changed().unwrap());
        assert_eq!(*rx.borrow(), first);
    }

    #[tokio::test]
    async fn test_task_event_keeps_devices() {
        let plugin = plugin(three_classes(), CacheLevel::L3, Arc::new(RecordingLabeler::default()));
        plugin.reconcile().await.unwrap();
        let mut rx = plugin.subscribe();
        let before = ids(&plugin);

        let event = WatchEvent::Tasks(PathBuf::from("/sys/fs/resctrl/class1/tasks"));
        assert!(plugin.handle_event(event).await.is_none());

        let event = WatchEvent::Tasks(PathBuf::from("/sys/fs/resctrl/tasks"));
        assert!(plugin.handle_event(event).await.is_none());

        assert!(!rx.has_changed().unwrap());
        assert_eq!(ids(&plugin), before);
    }

    #[tokio::test]
    async fn test_buffer_event_reconciles() {
        let provider = three_classes();
        let plugin = plugin(provider.clone(), CacheLevel::L3, Arc::new(RecordingLabeler::default()));
        plugin.reconcile().await.unwrap();

        let root = Path::new(RESCTRL_ROOT);
        provider.set_classes(["class0", "class1", "class2", DEFAULT_CLASS]);
        provider.set_file(root.join("class2/schemata"), "L3:0=00c00\n");
        provider.set_file(root.join("class2/size"), "L3:0=1310720\n");

        let event = WatchEvent::Buffers(vec![root.join("class2")]);
        let set = plugin.handle_event(event).await.unwrap();
        assert_eq!(set.len(), 4);
        assert_eq!(
            ids(&plugin),
            vec![
                "intel.com/excat-l3-class0",
                "intel.com/excat-l3-class1",
                "intel.com/excat-l3-class2"
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_reconcile_keeps_previous_devices() {
        let provider = three_classes();
        let plugin = plugin(provider.clone(), CacheLevel::L3, Arc::new(RecordingLabeler::default()));
        plugin.reconcile().await.unwrap();
        let before = ids(&plugin);

        provider.set_file("/sys/fs/resctrl/class1/size", "L2:0=262144\nL3:0=3932160\n");
        let event = WatchEvent::Buffers(vec![PathBuf::from("/sys/fs/resctrl/class1/size")]);
        assert!(plugin.handle_event(event).await.is_none());

        assert_eq!(ids(&plugin), before);
        assert_eq!(plugin.state(), PluginState::Watching);
    }

    #[tokio::test]
    async fn test_no_buffers_on_any_level_keeps_previous_devices() {
        let provider = three_classes();
        let labeler = Arc::new(RecordingLabeler::default());
        let plugin = plugin(provider.clone(), CacheLevel::L3, labeler.clone());
        plugin.reconcile().await.unwrap();
        let before = ids(&plugin);
        let calls = labeler.calls.lock().len();

        provider.set_classes([DEFAULT_CLASS]);
        let err = plugin.reconcile().await.unwrap_err();
        assert!(matches!(err, PluginError::Resctrl(ResctrlError::NoLabels)));
        assert_eq!(ids(&plugin), before);
        assert_eq!(labeler.calls.lock().len(), calls);

        let event = WatchEvent::Buffers(vec![PathBuf::from("/sys/fs/resctrl/class0")]);
        assert!(plugin.handle_event(event).await.is_none());
        assert_eq!(ids(&plugin), before);
        assert_eq!(plugin.state(), PluginState::Watching);
    }

    #[tokio::test]
    async fn test_level_emptied_while_other_level_has_buffers() {
        let root = Path::new(RESCTRL_ROOT);
        let provider = three_classes();
        let labeler = Arc::new(RecordingLabeler::default());
        let plugin = plugin(provider.clone(), CacheLevel::L3, labeler.clone());
        plugin.reconcile().await.unwrap();
        assert_eq!(plugin.devices().len(), 2);

        provider.set_classes(["class4", DEFAULT_CLASS]);
        provider.set_file(root.join("class4/schemata"), "L2:0=000f\n");
        provider.set_file(root.join("class4/size"), "L2:0=262144\n");

        let set = plugin.reconcile().await.unwrap();
        assert!(set.classes().iter().all(|class| class.is_default()));
        assert!(plugin.devices().is_empty());
        // No L3 buffer is left, so the label is not added back.
        assert_eq!(labeler.calls.lock().last().unwrap(), "remove L3");
    }

    #[tokio::test]
    async fn test_other_level_is_empty() {
        let plugin = plugin(three_classes(), CacheLevel::L2, Arc::new(RecordingLabeler::default()));
        let set = plugin.reconcile().await.unwrap();
        assert!(set.is_empty());
        assert!(plugin.devices().is_empty());
    }

    #[tokio::test]
    async fn test_allocate_single_buffer() {
        let plugin = plugin(three_classes(), CacheLevel::L3, Arc::new(RecordingLabeler::default()));
        plugin.reconcile().await.unwrap();

        let response = plugin
            .allocate_buffers(&request(&["intel.com/excat-l3-class1"]))
            .unwrap();
        assert_eq!(response.container_responses.len(), 1);

        let annotations = &response.container_responses[0].annotations;
        assert_eq!(annotations.len(), 2);
        assert_eq!(annotations[RDT_ANNOTATION], "class1");
        assert_eq!(annotations[RDT_CRIRM_ANNOTATION], "class1");
    }

    #[tokio::test]
    async fn test_allocate_rejects_two_buffers() {
        let plugin = plugin(three_classes(), CacheLevel::L3, Arc::new(RecordingLabeler::default()));
        plugin.reconcile().await.unwrap();

        let err = plugin
            .allocate_buffers(&request(&[
                "intel.com/excat-l3-class0",
                "intel.com/excat-l3-class1",
            ]))
            .unwrap_err();
        assert!(matches!(err, PluginError::AllocationConstraint(ref ids) if ids.len() == 2));
        assert_eq!(Status::from(err).code(), tonic::Code::InvalidArgument);
    }

    #[tokio::test]
    async fn test_allocate_unknown_buffer() {
        let plugin = plugin(three_classes(), CacheLevel::L3, Arc::new(RecordingLabeler::default()));
        plugin.reconcile().await.unwrap();

        let err = plugin
            .allocate_buffers(&request(&["intel.com/excat-l3-system/default"]))
            .unwrap_err();
        assert!(matches!(err, PluginError::UnknownDevice(_)));
    }

    #[tokio::test]
    async fn test_list_and_watch_streams_replacements() {
        let provider = three_classes();
        let plugin = plugin(provider.clone(), CacheLevel::L3, Arc::new(RecordingLabeler::default()));
        plugin.reconcile().await.unwrap();

        let mut stream = plugin
            .list_and_watch(Request::new(Empty {}))
            .await
            .unwrap()
            .into_inner();

        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.devices.len(), 2);

        provider.set_classes(["class0", DEFAULT_CLASS]);
        plugin.reconcile().await.unwrap();
        let second = stream.next().await.unwrap().unwrap();
        assert_eq!(second.devices.len(), 1);
        assert_eq!(second.devices[0].id, "intel.com/excat-l3-class0");

        plugin.stop();
        assert!(stream.next().await.is_none());
    }
}
