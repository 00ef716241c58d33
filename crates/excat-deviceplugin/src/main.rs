//! ExCAT device plugin entry point.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use excat_deviceplugin::config::DEFAULT_CONFIG_PATH;
use excat_deviceplugin::logging::{self, component_span};
use excat_deviceplugin::{
    consts, labels, start_and_register, ExcatDevicePlugin, KubeNodeLabeler, NodeLabeler,
    NoopLabeler, PluginConfig, PluginError, PluginServer, PluginSettings,
};
use excat_resctrl::{derive_labels, filter_by_level, BufferSet, CacheLevel, FsProvider, Resctrl};
use tokio::signal;
use tokio::signal::unix::SignalKind;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Kubernetes device plugin advertising RDT CAT cache buffers
#[derive(Parser, Debug)]
#[command(name = "excat-deviceplugin")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short = 'c', long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error), RUST_LOG takes precedence
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,

    /// resctrl mount point
    #[arg(long)]
    resctrl_root: Option<PathBuf>,

    /// Directory holding the kubelet and device plugin sockets
    #[arg(long)]
    device_plugin_path: Option<PathBuf>,

    /// Node whose labels are patched, defaults to NODE_NAME
    #[arg(long)]
    node_name: Option<String>,

    /// Do not patch node labels
    #[arg(long)]
    no_labels: bool,
}

impl Args {
    /// Command line flags override the configuration file.
    fn apply(&self, config: &mut PluginConfig) {
        if let Some(root) = &self.resctrl_root {
            config.resctrl.root = root.clone();
        }
        if let Some(dir) = &self.device_plugin_path {
            config.kubelet.device_plugin_path = dir.clone();
        }
        if let Some(node) = &self.node_name {
            config.labels.node_name = Some(node.clone());
        }
        if self.no_labels {
            config.labels.enabled = false;
        }
    }
}

/// A started cache level.
struct Level {
    plugin: Arc<ExcatDevicePlugin>,
    task: JoinHandle<()>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = logging::init(&args.log_level) {
        eprintln!("{}", e);
        return ExitCode::FAILURE;
    }

    info!("Starting excat-deviceplugin");

    match run(args).await {
        Ok(()) => {
            info!("excat-deviceplugin exiting normally");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("excat-deviceplugin exiting with error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let mut config = PluginConfig::load_or_default(&args.config)?;
    args.apply(&mut config);
    config.validate()?;

    info!("resctrl root: {}", config.resctrl.root.display());
    info!(
        "Device plugin directory: {}",
        config.kubelet.device_plugin_path.display()
    );

    let resctrl = Resctrl::new(
        Arc::new(FsProvider::new(&config.resctrl.root)),
        &config.resctrl.root,
        component_span("resctrl"),
    );
    let labeler = build_labeler(&config).await?;

    let reader = resctrl.clone();
    let classes = tokio::task::spawn_blocking(move || reader.load_buffers())
        .await?
        .context("Reading resctrl classes failed")?;
    let size_labels = derive_labels(&classes).context("No buffers to advertise")?;

    for level in CacheLevel::SUPPORTED {
        labels::remove_quietly(labeler.as_ref(), level).await;
    }

    let (fatal_tx, mut fatal_rx) = mpsc::unbounded_channel::<PluginError>();
    let mut levels = Vec::new();

    for level in CacheLevel::SUPPORTED {
        let set = filter_by_level(&classes, level);
        if set.classes().iter().all(|class| class.is_default()) {
            info!("No buffers of cache level {} configured", level);
            continue;
        }

        if let Err(e) = labels::label_level(labeler.as_ref(), level, &size_labels).await {
            stop_all(levels).await;
            return Err(e.into());
        }

        let span = component_span(&consts::resource_name(&config.resource.base_name, level));
        let plugin = Arc::new(ExcatDevicePlugin::new(
            level,
            resctrl.clone(),
            labeler.clone(),
            PluginSettings::from_config(&config),
            span,
        ));
        plugin.advertise(&set);

        let server = match start_and_register(
            plugin.clone(),
            &config.kubelet.device_plugin_path,
            &config.kubelet_socket_path(),
            config.dial_timeout(),
        )
        .await
        {
            Ok(server) => server,
            Err(e) => {
                stop_all(levels).await;
                return Err(e.into());
            }
        };

        let fatal = fatal_tx.clone();
        let task = tokio::spawn({
            let plugin = plugin.clone();
            async move {
                if let Err(e) = run_level(plugin, server, set).await {
                    let _ = fatal.send(e);
                }
            }
        });
        levels.push(Level { plugin, task });
    }
    drop(fatal_tx);

    let result = tokio::select! {
        res = shutdown_signal() => {
            res.context("Installing signal handlers failed")?;
            info!("Received shutdown signal");
            Ok(())
        }
        Some(e) = fatal_rx.recv() => Err(e),
    };

    stop_all(levels).await;
    result.map_err(Into::into)
}

/// Serves and watches one cache level until it is stopped or fails.
async fn run_level(
    plugin: Arc<ExcatDevicePlugin>,
    server: PluginServer,
    initial: BufferSet,
) -> excat_deviceplugin::Result<()> {
    let watching = async {
        let result = plugin.clone().run_watch_loop(initial).await;
        plugin.stop();
        result
    };
    let serving = async {
        let result = server.wait().await;
        plugin.stop();
        result
    };

    let (watched, served) = tokio::join!(watching, serving);
    watched.and(served)
}

async fn stop_all(levels: Vec<Level>) {
    for level in &levels {
        level.plugin.stop();
    }
    for level in levels {
        if let Err(e) = level.task.await {
            warn!("Level task failed: {}", e);
        }
    }
}

async fn build_labeler(config: &PluginConfig) -> anyhow::Result<Arc<dyn NodeLabeler>> {
    if !config.labels.enabled {
        info!("Node label patching disabled");
        return Ok(Arc::new(NoopLabeler));
    }

    let node_name = config
        .labels
        .node_name
        .clone()
        .or_else(|| std::env::var("NODE_NAME").ok())
        .context("Node name unknown, set NODE_NAME or --node-name")?;
    info!("Patching labels of node {}", node_name);

    Ok(Arc::new(
        KubeNodeLabeler::connect(node_name, &config.resource.prefix, &config.resource.base_name)
            .await?,
    ))
}

async fn shutdown_signal() -> std::io::Result<()> {
    let mut terminate = signal::unix::signal(SignalKind::terminate())?;
    tokio::select! {
        res = signal::ctrl_c() => res,
        _ = terminate.recv() => Ok(()),
    }
}
