//! Device plugin socket and kubelet registration.
//!
//! Each cache level serves the `DevicePlugin` service on its own Unix socket
//! in the device plugin directory and then registers that socket with the
//! kubelet.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use hyper_util::rt::TokioIo;
use tokio::net::{UnixListener, UnixStream};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnixListenerStream;
use tonic::transport::{Channel, Endpoint, Server, Uri};
use tower::service_fn;
use tracing::{debug, info, Instrument};

use crate::api::device_plugin_server::DevicePluginServer;
use crate::api::registration_client::RegistrationClient;
use crate::api::{RegisterRequest, VERSION};
use crate::error::{PluginError, Result};
use crate::plugin::ExcatDevicePlugin;

/// Placeholder authority, the connector ignores it and dials the socket.
const UDS_ENDPOINT: &str = "http://[::]:50051";

/// Opens a gRPC channel over the Unix socket at `path`.
pub async fn dial(path: &Path, timeout: Duration) -> Result<Channel> {
    let socket = path.to_path_buf();
    let endpoint = Endpoint::try_from(UDS_ENDPOINT)
        .map_err(|e| PluginError::socket(path, e))?
        .connect_timeout(timeout);

    let connect = endpoint.connect_with_connector(service_fn(move |_: Uri| {
        let socket = socket.clone();
        async move { Ok::<_, io::Error>(TokioIo::new(UnixStream::connect(socket).await?)) }
    }));

    match tokio::time::timeout(timeout, connect).await {
        Ok(Ok(channel)) => Ok(channel),
        Ok(Err(e)) => Err(PluginError::socket(path, e)),
        Err(_) => Err(PluginError::socket(
            path,
            format!("no connection within {:?}", timeout),
        )),
    }
}

/// Registers the plugin's resource and socket with the kubelet.
pub async fn register(
    kubelet_socket: &Path,
    plugin: &ExcatDevicePlugin,
    timeout: Duration,
) -> Result<()> {
    let resource = plugin.full_resource_name();
    let channel = dial(kubelet_socket, timeout)
        .await
        .map_err(|e| PluginError::registration(&resource, e))?;

    let request = RegisterRequest {
        version: VERSION.to_string(),
        endpoint: plugin.socket_name(),
        resource_name: resource.clone(),
        options: None,
    };
    debug!(parent: plugin.span(), "Registering {:?}", request);

    RegistrationClient::new(channel)
        .register(request)
        .await
        .map_err(|status| PluginError::registration(&resource, status.message()))?;

    info!(parent: plugin.span(), "Registered {} with the kubelet", resource);
    Ok(())
}

/// A running device plugin gRPC server.
pub struct PluginServer {
    socket_path: PathBuf,
    task: JoinHandle<std::result::Result<(), tonic::transport::Error>>,
}

impl PluginServer {
    /// Serves `plugin` on `<socket_dir>/<socket name>` until the plugin is
    /// stopped. A stale socket from a previous run is removed first.
    ///
    /// Returns once the socket accepts connections.
    pub async fn start(
        plugin: Arc<ExcatDevicePlugin>,
        socket_dir: &Path,
        timeout: Duration,
    ) -> Result<Self> {
        let socket_path = socket_dir.join(plugin.socket_name());
        match std::fs::remove_file(&socket_path) {
            Ok(()) => debug!(parent: plugin.span(), "Removed stale socket {}", socket_path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(PluginError::socket(&socket_path, e)),
        }

        let listener =
            UnixListener::bind(&socket_path).map_err(|e| PluginError::socket(&socket_path, e))?;
        let incoming = UnixListenerStream::new(listener);

        let service = DevicePluginServer::from_arc(plugin.clone());
        let stopping = plugin.clone();
        let task = tokio::spawn(
            Server::builder()
                .add_service(service)
                .serve_with_incoming_shutdown(incoming, async move { stopping.stopped().await })
                .instrument(plugin.span().clone()),
        );

        // Make sure the kubelet can reach us before registering.
        dial(&socket_path, timeout).await?;
        info!(parent: plugin.span(), "Serving on {}", socket_path.display());

        Ok(Self { socket_path, task })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Waits for the server to exit and removes its socket.
    pub async fn wait(self) -> Result<()> {
        let result = self.task.await;
        let _ = std::fs::remove_file(&self.socket_path);

        match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(PluginError::socket(&self.socket_path, e)),
            Err(e) => Err(PluginError::socket(&self.socket_path, e)),
        }
    }
}

/// Starts serving `plugin` and registers it with the kubelet.
pub async fn start_and_register(
    plugin: Arc<ExcatDevicePlugin>,
    socket_dir: &Path,
    kubelet_socket: &Path,
    timeout: Duration,
) -> Result<PluginServer> {
    let server = PluginServer::start(plugin.clone(), socket_dir, timeout).await?;
    if let Err(e) = register(kubelet_socket, &plugin, timeout).await {
        plugin.stop();
        let _ = server.wait().await;
        return Err(e);
    }
    Ok(server)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_dial_missing_socket_fails() {
        let dir = TempDir::new().unwrap();
        let err = dial(&dir.path().join("missing.sock"), Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, PluginError::Socket { .. }));
    }
}
