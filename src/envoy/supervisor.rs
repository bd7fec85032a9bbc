//! Proxy process supervision with hot restarts.
//!
//! # State Machine
//! ```text
//! Idle ──reload──→ Starting ──survives window──→ Running (epoch += 1)
//!                     │                             │  reload → Starting (old generation keeps serving)
//!                     └─exits in window→ error      │  instance exit → removed from active set
//!                                                   └─ active set empty → Terminal
//! ```
//!
//! # Design Decisions
//! - All state lives in one task; callers talk to it through [`SupervisorHandle`]
//! - An instance that dies after its window is not relaunched here
//! - Every instance receives SIGTERM at most once

use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::config::{BridgeConfig, TlsSource};
use crate::envoy::bootstrap::{self, BootstrapParams, NodeIdentity, TlsFiles, XdsAddress};
use crate::lifecycle::Shutdown;
use crate::model::{CertificateBundle, ProxyDescriptor};
use crate::observability::metrics;

pub const BOOTSTRAP_FILE: &str = "bootstrap.json";

const COMMAND_BUFFER: usize = 16;

#[derive(Debug, Error)]
pub enum EnvoyError {
    #[error("no bootstrap configuration has been written")]
    NotConfigured,

    #[error("failed to launch {binary}: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: io::Error,
    },

    #[error("proxy (restart epoch {epoch}) exited during startup: {status}")]
    PrematureExit { epoch: u32, status: String },

    #[error("launch cancelled by shutdown")]
    Cancelled,

    #[error("failed to render bootstrap: {0}")]
    Render(#[from] serde_json::Error),

    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("proxy supervisor is no longer running")]
    SupervisorGone,
}

/// How the supervisor launches and stops the proxy.
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub binary: String,
    pub config_dir: PathBuf,
    pub admin_address: String,
    pub admin_port: u16,
    pub stabilization_window: Duration,
    pub shutdown_grace: Duration,
    pub inline_bootstrap: bool,
    pub extra_args: Vec<String>,
    pub tls_source: TlsSource,
    pub secret_name: String,
}

impl SupervisorSettings {
    pub fn from_config(config: &BridgeConfig, config_dir: PathBuf) -> Self {
        Self {
            binary: config.envoy.binary.clone(),
            config_dir,
            admin_address: config.envoy.admin_address.clone(),
            admin_port: config.envoy.admin_port,
            stabilization_window: Duration::from_millis(config.envoy.stabilization_window_ms),
            shutdown_grace: Duration::from_secs(config.envoy.shutdown_grace_secs),
            inline_bootstrap: config.envoy.inline_bootstrap,
            extra_args: config.envoy.extra_args.clone(),
            tls_source: config.tls.source,
            secret_name: config.tls.secret_name.clone(),
        }
    }

    pub fn bootstrap_path(&self) -> PathBuf {
        self.config_dir.join(BOOTSTRAP_FILE)
    }
}

/// One running (or exiting) proxy generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvoyInstance {
    pub epoch: u32,
    pub pid: Option<u32>,
    terminated: bool,
}

/// Restart epoch, live generations and the current bootstrap.
#[derive(Debug, Default)]
pub struct SupervisorState {
    restart_epoch: u32,
    instances: Vec<EnvoyInstance>,
    rendered: Option<String>,
}

impl SupervisorState {
    /// Epoch the next launch will use.
    pub fn restart_epoch(&self) -> u32 {
        self.restart_epoch
    }

    pub fn instances(&self) -> &[EnvoyInstance] {
        &self.instances
    }

    pub fn rendered(&self) -> Option<&str> {
        self.rendered.as_deref()
    }
}

/// Snapshot reported through [`SupervisorHandle::status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorStatus {
    pub restart_epoch: u32,
    pub active_instances: usize,
}

#[derive(Debug)]
struct InstanceExit {
    epoch: u32,
    status: String,
}

pub enum SupervisorCommand {
    WriteConfig {
        bundle: CertificateBundle,
        reply: oneshot::Sender<Result<(), EnvoyError>>,
    },
    Reload {
        reply: oneshot::Sender<Result<u32, EnvoyError>>,
    },
    Status {
        reply: oneshot::Sender<SupervisorStatus>,
    },
    Exit,
}

pub struct EnvoySupervisor {
    settings: SupervisorSettings,
    node: NodeIdentity,
    xds: XdsAddress,
    descriptor: Option<Arc<ArcSwapOption<ProxyDescriptor>>>,
    state: SupervisorState,
    started: bool,
    exits_tx: mpsc::UnboundedSender<InstanceExit>,
    exits_rx: mpsc::UnboundedReceiver<InstanceExit>,
}

impl EnvoySupervisor {
    pub fn new(settings: SupervisorSettings, node: NodeIdentity, xds: XdsAddress) -> Self {
        let (exits_tx, exits_rx) = mpsc::unbounded_channel();
        Self {
            settings,
            node,
            xds,
            descriptor: None,
            state: SupervisorState::default(),
            started: false,
            exits_tx,
            exits_rx,
        }
    }

    /// Attach node metadata from the latest decoded descriptor.
    pub fn with_descriptor(mut self, descriptor: Arc<ArcSwapOption<ProxyDescriptor>>) -> Self {
        self.descriptor = Some(descriptor);
        self
    }

    pub fn state(&self) -> &SupervisorState {
        &self.state
    }

    /// Run the supervisor in its own task.
    pub fn start(self, shutdown: &Shutdown) -> (SupervisorHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let task = tokio::spawn(self.run(rx, shutdown.clone()));
        (SupervisorHandle { tx }, task)
    }

    /// Regenerate the bootstrap (and TLS files, in file mode).
    ///
    /// Does not restart anything; call [`EnvoySupervisor::reload`] afterwards.
    pub async fn write_config(&mut self, bundle: &CertificateBundle) -> Result<(), EnvoyError> {
        let tls_files = match self.settings.tls_source {
            TlsSource::Files => {
                let files = TlsFiles::in_dir(&self.settings.config_dir);
                write_file(&files.certificate_chain, &bundle.leaf.certificate, 0o644).await?;
                write_file(&files.private_key, &bundle.leaf.private_key, 0o600).await?;
                write_file(&files.root_cas, &bundle.root_cas.to_pem_bundle(), 0o644).await?;
                Some(files)
            }
            TlsSource::Secret => None,
        };

        let descriptor = self.descriptor.as_ref().and_then(|d| d.load_full());
        let document = bootstrap::render(&BootstrapParams {
            node: &self.node,
            xds: &self.xds,
            admin_address: &self.settings.admin_address,
            admin_port: self.settings.admin_port,
            secret_name: &self.settings.secret_name,
            tls_files: tls_files.as_ref(),
            descriptor: descriptor.as_deref(),
        });
        let rendered = serde_json::to_string_pretty(&document)?;
        write_file(&self.settings.bootstrap_path(), &rendered, 0o644).await?;

        tracing::info!(
            path = %self.settings.bootstrap_path().display(),
            xds = %self.xds,
            "Proxy bootstrap written"
        );
        self.state.rendered = Some(rendered);
        Ok(())
    }

    /// Launch a new generation with the current bootstrap.
    ///
    /// Returns the epoch the new instance runs with once it has survived the
    /// stabilization window. An exit inside the window is an error and leaves
    /// the epoch and the active set unchanged.
    pub async fn reload(&mut self, shutdown: &Shutdown) -> Result<u32, EnvoyError> {
        let rendered = self.state.rendered.as_deref().ok_or(EnvoyError::NotConfigured)?;
        let epoch = self.state.restart_epoch;

        let mut command = Command::new(&self.settings.binary);
        command.arg("--restart-epoch").arg(epoch.to_string());
        if self.settings.inline_bootstrap {
            command.arg("--config-yaml").arg(rendered);
        } else {
            command.arg("--config-path").arg(self.settings.bootstrap_path());
        }
        command.args(&self.settings.extra_args).stdin(Stdio::null());

        let mut child = command.spawn().map_err(|source| {
            metrics::record_proxy_launch("spawn_failed");
            EnvoyError::Spawn {
                binary: self.settings.binary.clone(),
                source,
            }
        })?;
        let pid = child.id();
        tracing::info!(epoch, pid, binary = %self.settings.binary, "Proxy launched");

        let (done_tx, mut done_rx) = oneshot::channel();
        tokio::spawn(async move {
            let _ = done_tx.send(describe_exit(child.wait().await));
        });

        tokio::select! {
            biased;
            exited = &mut done_rx => {
                let status = exited.unwrap_or_else(|_| "unknown".to_string());
                metrics::record_proxy_launch("premature_exit");
                tracing::error!(epoch, status = %status, "Proxy exited during stabilization window");
                return Err(EnvoyError::PrematureExit { epoch, status });
            }
            _ = shutdown.cancelled() => {
                if let Some(pid) = pid {
                    send_signal(pid, Signal::SIGTERM);
                }
                return Err(EnvoyError::Cancelled);
            }
            _ = tokio::time::sleep(self.settings.stabilization_window) => {}
        }

        self.state.restart_epoch += 1;
        self.state.instances.push(EnvoyInstance {
            epoch,
            pid,
            terminated: false,
        });
        self.started = true;

        let exits = self.exits_tx.clone();
        tokio::spawn(async move {
            let status = done_rx.await.unwrap_or_else(|_| "unknown".to_string());
            let _ = exits.send(InstanceExit { epoch, status });
        });

        metrics::record_proxy_launch("accepted");
        metrics::set_restart_epoch(self.state.restart_epoch);
        metrics::set_active_instances(self.state.instances.len());
        tracing::info!(
            epoch,
            active = self.state.instances.len(),
            "Proxy survived stabilization window"
        );
        Ok(epoch)
    }

    /// Ask every active instance to terminate gracefully.
    ///
    /// Exits already reported are applied first so a reaped pid is never
    /// signalled.
    pub fn exit(&mut self) {
        self.drain_exits();
        for instance in self.state.instances.iter_mut().filter(|i| !i.terminated) {
            instance.terminated = true;
            if let Some(pid) = instance.pid {
                tracing::info!(epoch = instance.epoch, pid, "Sending SIGTERM to proxy");
                send_signal(pid, Signal::SIGTERM);
            }
        }
    }

    /// Serve commands until the active set empties after a successful
    /// launch, the command channel closes, or shutdown fires.
    pub async fn run(mut self, mut commands: mpsc::Receiver<SupervisorCommand>, shutdown: Shutdown) {
        loop {
            if self.started && self.state.instances.is_empty() {
                tracing::warn!("No proxy instances left, supervisor stopping");
                return;
            }

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                Some(exit) = self.exits_rx.recv() => self.remove(exit),
                command = commands.recv() => match command {
                    Some(command) => self.handle(command, &shutdown).await,
                    None => break,
                },
            }
        }
        self.terminate_all().await;
    }

    async fn handle(&mut self, command: SupervisorCommand, shutdown: &Shutdown) {
        match command {
            SupervisorCommand::WriteConfig { bundle, reply } => {
                let _ = reply.send(self.write_config(&bundle).await);
            }
            SupervisorCommand::Reload { reply } => {
                let _ = reply.send(self.reload(shutdown).await);
            }
            SupervisorCommand::Status { reply } => {
                let _ = reply.send(SupervisorStatus {
                    restart_epoch: self.state.restart_epoch,
                    active_instances: self.state.instances.len(),
                });
            }
            SupervisorCommand::Exit => self.exit(),
        }
    }

    fn drain_exits(&mut self) {
        while let Ok(exit) = self.exits_rx.try_recv() {
            self.remove(exit);
        }
    }

    fn remove(&mut self, exit: InstanceExit) {
        self.state.instances.retain(|i| i.epoch != exit.epoch);
        metrics::set_active_instances(self.state.instances.len());
        tracing::warn!(
            epoch = exit.epoch,
            status = %exit.status,
            active = self.state.instances.len(),
            "Proxy instance exited"
        );
    }

    /// SIGTERM everything, wait out the grace period, SIGKILL the rest.
    async fn terminate_all(&mut self) {
        self.exit();
        let deadline = tokio::time::sleep(self.settings.shutdown_grace);
        tokio::pin!(deadline);

        while !self.state.instances.is_empty() {
            tokio::select! {
                _ = &mut deadline => {
                    self.drain_exits();
                    for instance in &self.state.instances {
                        if let Some(pid) = instance.pid {
                            tracing::warn!(epoch = instance.epoch, pid, "Proxy ignored SIGTERM, killing");
                            send_signal(pid, Signal::SIGKILL);
                        }
                    }
                    break;
                }
                Some(exit) = self.exits_rx.recv() => self.remove(exit),
            }
        }
    }
}

/// Cloneable front end of a running [`EnvoySupervisor`].
#[derive(Clone)]
pub struct SupervisorHandle {
    tx: mpsc::Sender<SupervisorCommand>,
}

impl SupervisorHandle {
    pub async fn write_config(&self, bundle: CertificateBundle) -> Result<(), EnvoyError> {
        let (reply, rx) = oneshot::channel();
        self.send(SupervisorCommand::WriteConfig { bundle, reply }).await?;
        rx.await.map_err(|_| EnvoyError::SupervisorGone)?
    }

    /// Launch a new generation; resolves after the stabilization window.
    pub async fn reload(&self) -> Result<u32, EnvoyError> {
        let (reply, rx) = oneshot::channel();
        self.send(SupervisorCommand::Reload { reply }).await?;
        rx.await.map_err(|_| EnvoyError::SupervisorGone)?
    }

    pub async fn status(&self) -> Result<SupervisorStatus, EnvoyError> {
        let (reply, rx) = oneshot::channel();
        self.send(SupervisorCommand::Status { reply }).await?;
        rx.await.map_err(|_| EnvoyError::SupervisorGone)
    }

    /// Send SIGTERM to every active instance.
    pub async fn exit(&self) -> Result<(), EnvoyError> {
        self.send(SupervisorCommand::Exit).await
    }

    async fn send(&self, command: SupervisorCommand) -> Result<(), EnvoyError> {
        self.tx
            .send(command)
            .await
            .map_err(|_| EnvoyError::SupervisorGone)
    }
}

async fn write_file(path: &Path, contents: &str, mode: u32) -> Result<(), EnvoyError> {
    let io_error = |source| EnvoyError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(mode)
        .open(path)
        .await
        .map_err(io_error)?;
    // `mode` only applies on create.
    file.set_permissions(std::fs::Permissions::from_mode(mode))
        .await
        .map_err(io_error)?;
    file.write_all(contents.as_bytes()).await.map_err(io_error)?;
    file.flush().await.map_err(io_error)
}

fn send_signal(pid: u32, signal: Signal) {
    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    if let Err(e) = kill(Pid::from_raw(raw), signal) {
        tracing::debug!(pid, signal = signal.as_str(), error = %e, "Failed to signal proxy");
    }
}

fn describe_exit(result: io::Result<ExitStatus>) -> String {
    match result {
        Ok(status) => status.to_string(),
        Err(e) => format!("wait failed: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CertificateAndKey, CertificateSet};
    use tempfile::TempDir;

    const WINDOW: Duration = Duration::from_millis(300);

    /// A stand-in proxy binary that records its arguments and signals.
    fn script(dir: &TempDir, body: &str) -> String {
        let path = dir.path().join("fake-envoy.sh");
        let log = dir.path().join("args.log");
        let signals = dir.path().join("signals.log");
        let contents = format!(
            "#!/bin/sh\nARGS=\"{}\"\nSIGNALS=\"{}\"\necho \"$1 $2 $3\" >> \"$ARGS\"\n{}\n",
            log.display(),
            signals.display(),
            body
        );
        std::fs::write(&path, contents).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    const SERVE: &str = "trap 'echo TERM >> \"$SIGNALS\"; exit 0' TERM\nwhile true; do sleep 1 & wait $!; done";

    fn settings(dir: &TempDir, binary: String) -> SupervisorSettings {
        SupervisorSettings {
            binary,
            config_dir: dir.path().to_path_buf(),
            admin_address: "127.0.0.1".into(),
            admin_port: 0,
            stabilization_window: WINDOW,
            shutdown_grace: Duration::from_secs(5),
            inline_bootstrap: true,
            extra_args: Vec::new(),
            tls_source: TlsSource::Secret,
            secret_name: "connect-leaf-certificate".into(),
        }
    }

    fn supervisor(dir: &TempDir, body: &str) -> EnvoySupervisor {
        let binary = script(dir, body);
        EnvoySupervisor::new(
            settings(dir, binary),
            NodeIdentity::new("web-proxy", "node-1", "web-proxy"),
            XdsAddress::tcp("127.0.0.1", 8081),
        )
    }

    fn bundle() -> CertificateBundle {
        CertificateBundle::new(
            CertificateSet(vec!["ROOT-A\n".into(), "ROOT-B\n".into()]),
            CertificateAndKey {
                certificate: "LEAF\n".into(),
                private_key: "KEY\n".into(),
            },
        )
    }

    fn lines(dir: &TempDir, file: &str) -> Vec<String> {
        std::fs::read_to_string(dir.path().join(file))
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[tokio::test]
    async fn test_reload_requires_config() {
        let dir = TempDir::new().unwrap();
        let mut sup = supervisor(&dir, SERVE);
        assert!(matches!(
            sup.reload(&Shutdown::new()).await,
            Err(EnvoyError::NotConfigured)
        ));
    }

    #[tokio::test]
    async fn test_surviving_launch_increments_epoch() {
        let dir = TempDir::new().unwrap();
        let mut sup = supervisor(&dir, SERVE);
        let shutdown = Shutdown::new();
        sup.write_config(&bundle()).await.unwrap();

        assert_eq!(sup.reload(&shutdown).await.unwrap(), 0);
        assert_eq!(sup.state().restart_epoch(), 1);
        assert_eq!(sup.state().instances().len(), 1);

        assert_eq!(sup.reload(&shutdown).await.unwrap(), 1);
        assert_eq!(sup.state().restart_epoch(), 2);
        assert_eq!(sup.state().instances().len(), 2);

        let args = lines(&dir, "args.log");
        assert_eq!(args[0], "--restart-epoch 0 --config-yaml");
        assert_eq!(args[1], "--restart-epoch 1 --config-yaml");

        sup.terminate_all().await;
        assert!(sup.state().instances().is_empty());
    }

    #[tokio::test]
    async fn test_premature_exit_is_an_error() {
        let dir = TempDir::new().unwrap();
        let mut sup = supervisor(&dir, "exit 3");
        sup.write_config(&bundle()).await.unwrap();

        let err = sup.reload(&Shutdown::new()).await.unwrap_err();
        assert!(matches!(err, EnvoyError::PrematureExit { epoch: 0, .. }));
        assert_eq!(sup.state().restart_epoch(), 0);
        assert!(sup.state().instances().is_empty());

        // The supervisor stays usable; the next attempt reuses epoch 0.
        let err = sup.reload(&Shutdown::new()).await.unwrap_err();
        assert!(matches!(err, EnvoyError::PrematureExit { epoch: 0, .. }));
    }

    #[tokio::test]
    async fn test_missing_binary_is_a_spawn_error() {
        let dir = TempDir::new().unwrap();
        let mut sup = EnvoySupervisor::new(
            settings(&dir, dir.path().join("missing").to_string_lossy().into_owned()),
            NodeIdentity::new("web-proxy", "node-1", "web-proxy"),
            XdsAddress::tcp("127.0.0.1", 8081),
        );
        sup.write_config(&bundle()).await.unwrap();
        assert!(matches!(
            sup.reload(&Shutdown::new()).await,
            Err(EnvoyError::Spawn { .. })
        ));
    }

    #[tokio::test]
    async fn test_file_mode_writes_tls_material() {
        let dir = TempDir::new().unwrap();
        let binary = script(&dir, SERVE);
        let mut settings = settings(&dir, binary);
        settings.tls_source = TlsSource::Files;
        settings.inline_bootstrap = false;
        let mut sup = EnvoySupervisor::new(
            settings,
            NodeIdentity::new("web-proxy", "node-1", "web-proxy"),
            XdsAddress::tcp("127.0.0.1", 8081),
        );
        sup.write_config(&bundle()).await.unwrap();

        let read = |name: &str| std::fs::read_to_string(dir.path().join(name)).unwrap();
        assert_eq!(read("leaf.crt"), "LEAF\n");
        assert_eq!(read("leaf.key"), "KEY\n");
        assert_eq!(read("rootcas.crt"), "ROOT-A\nROOT-B\n");
        let mode = std::fs::metadata(dir.path().join("leaf.key"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);

        let doc: serde_json::Value = serde_json::from_str(&read(BOOTSTRAP_FILE)).unwrap();
        assert_eq!(doc["static_resources"]["secrets"][0]["name"], "connect-leaf-certificate");
        assert_eq!(sup.state().rendered(), Some(read(BOOTSTRAP_FILE).as_str()));

        sup.reload(&Shutdown::new()).await.unwrap();
        let args = lines(&dir, "args.log");
        assert_eq!(args[0], "--restart-epoch 0 --config-path");
        sup.terminate_all().await;
    }

    #[tokio::test]
    async fn test_rewrite_tightens_existing_key_permissions() {
        let dir = TempDir::new().unwrap();
        let key = dir.path().join("leaf.key");
        std::fs::write(&key, "OLD-KEY\n").unwrap();
        std::fs::set_permissions(&key, std::fs::Permissions::from_mode(0o644)).unwrap();

        let binary = script(&dir, SERVE);
        let mut settings = settings(&dir, binary);
        settings.tls_source = TlsSource::Files;
        let mut sup = EnvoySupervisor::new(
            settings,
            NodeIdentity::new("web-proxy", "node-1", "web-proxy"),
            XdsAddress::tcp("127.0.0.1", 8081),
        );
        sup.write_config(&bundle()).await.unwrap();

        assert_eq!(std::fs::read_to_string(&key).unwrap(), "KEY\n");
        let mode = std::fs::metadata(&key).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn test_exit_skips_instances_already_reaped() {
        let dir = TempDir::new().unwrap();
        let mut sup = supervisor(&dir, "sleep 0.6\nexit 0");
        sup.write_config(&bundle()).await.unwrap();
        sup.reload(&Shutdown::new()).await.unwrap();
        assert_eq!(sup.state().instances().len(), 1);

        // The exit is queued but the run loop never saw it.
        tokio::time::sleep(Duration::from_millis(1500)).await;
        sup.exit();
        assert!(sup.state().instances().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_sends_sigterm_once_per_instance() {
        let dir = TempDir::new().unwrap();
        let mut sup = supervisor(&dir, SERVE);
        let shutdown = Shutdown::new();
        sup.write_config(&bundle()).await.unwrap();
        sup.reload(&shutdown).await.unwrap();
        sup.reload(&shutdown).await.unwrap();

        // An explicit exit followed by shutdown must not signal twice.
        sup.exit();
        sup.terminate_all().await;
        assert!(sup.state().instances().is_empty());
        assert_eq!(lines(&dir, "signals.log"), vec!["TERM", "TERM"]);
    }

    #[tokio::test]
    async fn test_crash_after_window_is_not_relaunched() {
        let dir = TempDir::new().unwrap();
        let sup = supervisor(&dir, "sleep 1\nexit 0");
        let shutdown = Shutdown::new();
        let (handle, task) = sup.start(&shutdown);

        handle.write_config(bundle()).await.unwrap();
        assert_eq!(handle.reload().await.unwrap(), 0);
        assert_eq!(
            handle.status().await.unwrap(),
            SupervisorStatus {
                restart_epoch: 1,
                active_instances: 1
            }
        );

        // The instance exits on its own; the loop ends instead of relaunching.
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(lines(&dir, "args.log").len(), 1);
        assert!(matches!(handle.status().await, Err(EnvoyError::SupervisorGone)));
    }

    #[tokio::test]
    async fn test_handle_shutdown_terminates_instances() {
        let dir = TempDir::new().unwrap();
        let sup = supervisor(&dir, SERVE);
        let shutdown = Shutdown::new();
        let (handle, task) = sup.start(&shutdown);

        handle.write_config(bundle()).await.unwrap();
        handle.reload().await.unwrap();
        shutdown.trigger();

        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(lines(&dir, "signals.log"), vec!["TERM"]);
    }
}
