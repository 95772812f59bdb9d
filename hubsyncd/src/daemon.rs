use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Context;
use hubsync_core::HubError;
use hubsync_integrations::DaemonState;
use hubsync_integrations::ids::{DBUS_NAME_CONTROL, DBUS_OBJECT_PATH_CONTROL};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use zbus::connection::Builder as ConnectionBuilder;
use zbus::object_server::SignalEmitter;

use crate::config::{ConfigError, DaemonConfig};
use crate::dbus_api::ControlDbusService;
use crate::logging::LogQueue;
use crate::notifier::{self, Notifier};
use crate::sync::engine::UploadEngine;
use crate::sync::remote::{HubRemote, RemoteRepository};

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("upload service is already {0}")]
    Busy(&'static str),
    #[error("settings cannot change while the upload service is {0}")]
    ConfigLocked(&'static str),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to create hub client: {0}")]
    Client(#[from] HubError),
}

/// Builds the collaborators of one run from its configuration.
pub trait RemoteFactory: Send + Sync + 'static {
    type Remote: RemoteRepository + 'static;

    fn connect(&self, config: &DaemonConfig) -> Result<Self::Remote, DaemonError>;

    fn notifier(&self, config: &DaemonConfig) -> Arc<dyn Notifier> {
        notifier::from_config(config)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct HubRemoteFactory;

impl RemoteFactory for HubRemoteFactory {
    type Remote = HubRemote;

    fn connect(&self, config: &DaemonConfig) -> Result<HubRemote, DaemonError> {
        Ok(HubRemote::new(
            &config.endpoint,
            config.token.expose(),
            config.repo.clone(),
        )?)
    }
}

struct Lifecycle {
    state: DaemonState,
    cancel: Option<CancellationToken>,
    task: Option<JoinHandle<()>>,
}

struct HandleInner<F> {
    factory: F,
    config: Mutex<DaemonConfig>,
    lifecycle: Mutex<Lifecycle>,
    status: watch::Sender<DaemonState>,
}

/// Owns the upload loop's lifecycle. At most one loop runs at a time and the
/// configuration is frozen while it does.
pub struct DaemonHandle<F> {
    inner: Arc<HandleInner<F>>,
}

impl<F> Clone for DaemonHandle<F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<F: RemoteFactory> DaemonHandle<F> {
    pub fn new(factory: F, config: DaemonConfig) -> Self {
        let (status, _) = watch::channel(DaemonState::Stopped);
        Self {
            inner: Arc::new(HandleInner {
                factory,
                config: Mutex::new(config),
                lifecycle: Mutex::new(Lifecycle {
                    state: DaemonState::Stopped,
                    cancel: None,
                    task: None,
                }),
                status,
            }),
        }
    }

    pub fn status(&self) -> DaemonState {
        lock(&self.inner.lifecycle).state
    }

    pub fn subscribe(&self) -> watch::Receiver<DaemonState> {
        self.inner.status.subscribe()
    }

    pub fn config(&self) -> DaemonConfig {
        lock(&self.inner.config).clone()
    }

    pub fn start(&self) -> Result<(), DaemonError> {
        let mut lifecycle = lock(&self.inner.lifecycle);
        if lifecycle.state != DaemonState::Stopped {
            return Err(DaemonError::Busy(lifecycle.state.as_str()));
        }
        let config = lock(&self.inner.config).clone();
        let remote = self.inner.factory.connect(&config)?;
        let notifier = self.inner.factory.notifier(&config);
        let cancel = CancellationToken::new();

        self.set_state(&mut lifecycle, DaemonState::Starting);
        let handle = self.clone();
        let token = cancel.clone();
        lifecycle.task = Some(tokio::spawn(async move {
            let _reset = StoppedOnExit(handle.clone());
            handle.run_session(remote, notifier, config, token).await;
        }));
        lifecycle.cancel = Some(cancel);
        Ok(())
    }

    /// Requests a cooperative stop. Returns `false` when nothing was running.
    pub fn stop(&self) -> bool {
        let mut lifecycle = lock(&self.inner.lifecycle);
        match lifecycle.state {
            DaemonState::Starting | DaemonState::Running => {
                if let Some(cancel) = &lifecycle.cancel {
                    cancel.cancel();
                }
                self.set_state(&mut lifecycle, DaemonState::Stopping);
                info!("stop requested");
                true
            }
            DaemonState::Stopping => true,
            DaemonState::Stopped => false,
        }
    }

    /// Stops the loop and waits for it to finish.
    pub async fn shutdown(&self) {
        self.stop();
        let task = lock(&self.inner.lifecycle).task.take();
        if let Some(task) = task
            && let Err(err) = task.await
        {
            error!(error = %err, "upload task ended abnormally");
            self.mark_stopped();
        }
    }

    pub fn update_config(&self, config: DaemonConfig) -> Result<(), DaemonError> {
        let lifecycle = lock(&self.inner.lifecycle);
        if lifecycle.state != DaemonState::Stopped {
            return Err(DaemonError::ConfigLocked(lifecycle.state.as_str()));
        }
        *lock(&self.inner.config) = config;
        info!("settings updated");
        Ok(())
    }

    /// Re-reads the settings document and environment.
    pub fn reload_config(&self) -> Result<(), DaemonError> {
        let state = self.status();
        if state != DaemonState::Stopped {
            return Err(DaemonError::ConfigLocked(state.as_str()));
        }
        self.update_config(DaemonConfig::load()?)
    }

    async fn run_session(
        self,
        remote: F::Remote,
        notifier: Arc<dyn Notifier>,
        config: DaemonConfig,
        cancel: CancellationToken,
    ) {
        info!(
            endpoint = %config.endpoint,
            repo = %config.repo,
            remote_folder = %config.remote_folder,
            root = %config.watch_root.display(),
            "starting upload service"
        );
        let login = tokio::select! {
            _ = cancel.cancelled() => None,
            result = remote.authenticate() => Some(result),
        };
        match login {
            Some(Ok(account)) => {
                info!(account = %account, "logged in");
                self.advance(DaemonState::Starting, DaemonState::Running);
                UploadEngine::new(remote, config, notifier).run(cancel).await;
            }
            Some(Err(err)) => error!(error = %err, "login failed, upload service not started"),
            None => info!("start cancelled before login completed"),
        }
    }

    fn advance(&self, from: DaemonState, to: DaemonState) {
        let mut lifecycle = lock(&self.inner.lifecycle);
        if lifecycle.state == from {
            self.set_state(&mut lifecycle, to);
        }
    }

}

impl<F> DaemonHandle<F> {
    fn set_state(&self, lifecycle: &mut Lifecycle, state: DaemonState) {
        lifecycle.state = state;
        self.inner.status.send_replace(state);
    }

    fn mark_stopped(&self) {
        let mut lifecycle = lock(&self.inner.lifecycle);
        lifecycle.cancel = None;
        self.set_state(&mut lifecycle, DaemonState::Stopped);
    }
}

/// Returns the handle to `Stopped` however the session task ends, panics included.
struct StoppedOnExit<F>(DaemonHandle<F>);

impl<F> Drop for StoppedOnExit<F> {
    fn drop(&mut self) {
        self.0.mark_stopped();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

pub struct DaemonRuntime {
    handle: DaemonHandle<HubRemoteFactory>,
    logs: LogQueue,
}

impl DaemonRuntime {
    pub fn bootstrap(config: DaemonConfig, logs: LogQueue) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&config.state_dir).with_context(|| {
            format!("failed to create state dir at {}", config.state_dir.display())
        })?;
        Ok(Self {
            handle: DaemonHandle::new(HubRemoteFactory, config),
            logs,
        })
    }

    pub fn handle(&self) -> &DaemonHandle<HubRemoteFactory> {
        &self.handle
    }

    pub async fn run(self, autostart: bool) -> anyhow::Result<()> {
        let config = self.handle.config();
        info!(
            root = %config.watch_root.display(),
            repo = %config.repo,
            autostart,
            "hubsyncd started"
        );

        let dbus = match serve_control(&self.handle, &self.logs).await {
            Ok(connection) => Some(connection),
            Err(err) => {
                warn!(error = %err, "D-Bus control unavailable, running without it");
                None
            }
        };
        let signal_task = match &dbus {
            Some(connection) => Some(spawn_status_signals(connection, self.handle.subscribe())?),
            None => None,
        };

        if autostart && let Err(err) = self.handle.start() {
            error!(error = %err, "failed to start upload service");
        }

        tokio::signal::ctrl_c()
            .await
            .context("failed waiting for shutdown signal")?;
        info!("shutdown requested");
        self.handle.shutdown().await;
        if let Some(task) = signal_task {
            task.abort();
        }
        Ok(())
    }
}

async fn serve_control(
    handle: &DaemonHandle<HubRemoteFactory>,
    logs: &LogQueue,
) -> anyhow::Result<zbus::Connection> {
    ConnectionBuilder::session()?
        .name(DBUS_NAME_CONTROL)?
        .serve_at(
            DBUS_OBJECT_PATH_CONTROL,
            ControlDbusService::new(handle.clone(), logs.clone()),
        )?
        .build()
        .await
        .context("failed to start D-Bus object server")
}

fn spawn_status_signals(
    connection: &zbus::Connection,
    mut status: watch::Receiver<DaemonState>,
) -> anyhow::Result<JoinHandle<()>> {
    let emitter = SignalEmitter::new(connection, DBUS_OBJECT_PATH_CONTROL)
        .context("failed to create D-Bus signal emitter")?
        .into_owned();
    Ok(tokio::spawn(async move {
        while status.changed().await.is_ok() {
            let state = *status.borrow_and_update();
            if let Err(err) = ControlDbusService::status_changed(&emitter, state.as_str()).await {
                warn!(error = %err, "failed to emit status signal");
            }
        }
    }))
}

#[cfg(test)]
#[path = "daemon_tests.rs"]
mod tests;
