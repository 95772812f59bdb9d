use std::sync::Arc;

use hubsync_integrations::DaemonState;
use hubsync_integrations::ids::{DBUS_ERROR_BUSY, DBUS_ERROR_FAILED, DBUS_ERROR_INVALID_CONFIG};
use thiserror::Error;
use tracing::info;
use zbus::{interface, object_server::SignalEmitter};

use crate::daemon::{DaemonError, DaemonHandle, RemoteFactory};
use crate::logging::LogQueue;

/// Upper bound for a single `RecentLogs` call.
pub const MAX_LOG_LINES: u32 = 500;

#[derive(Debug, Error)]
pub enum DbusServiceError {
    #[error("{0}")]
    Busy(String),
    #[error("{0}")]
    InvalidConfig(String),
    #[error("{0}")]
    Failed(String),
}

impl From<DaemonError> for DbusServiceError {
    fn from(err: DaemonError) -> Self {
        match err {
            DaemonError::Busy(_) | DaemonError::ConfigLocked(_) => Self::Busy(err.to_string()),
            DaemonError::Config(_) => Self::InvalidConfig(err.to_string()),
            DaemonError::Client(_) => Self::Failed(err.to_string()),
        }
    }
}

pub fn dbus_error_name(err: &DbusServiceError) -> &'static str {
    match err {
        DbusServiceError::Busy(_) => DBUS_ERROR_BUSY,
        DbusServiceError::InvalidConfig(_) => DBUS_ERROR_INVALID_CONFIG,
        DbusServiceError::Failed(_) => DBUS_ERROR_FAILED,
    }
}

fn map_to_fdo(err: impl Into<DbusServiceError>) -> zbus::fdo::Error {
    let err = err.into();
    zbus::fdo::Error::Failed(format!("{}: {}", dbus_error_name(&err), err))
}

/// Lifecycle operations exposed over the bus.
pub trait DaemonControl: Send + Sync {
    fn start(&self) -> Result<(), DaemonError>;
    fn stop(&self) -> bool;
    fn status(&self) -> DaemonState;
    fn reload_config(&self) -> Result<(), DaemonError>;
}

impl<F: RemoteFactory> DaemonControl for DaemonHandle<F> {
    fn start(&self) -> Result<(), DaemonError> {
        DaemonHandle::start(self)
    }

    fn stop(&self) -> bool {
        DaemonHandle::stop(self)
    }

    fn status(&self) -> DaemonState {
        DaemonHandle::status(self)
    }

    fn reload_config(&self) -> Result<(), DaemonError> {
        DaemonHandle::reload_config(self)
    }
}

pub struct ControlDbusService {
    daemon: Arc<dyn DaemonControl>,
    logs: LogQueue,
}

impl ControlDbusService {
    pub fn new(daemon: impl DaemonControl + 'static, logs: LogQueue) -> Self {
        Self {
            daemon: Arc::new(daemon),
            logs,
        }
    }
}

#[interface(name = "io.github.hubsync.Control1")]
impl ControlDbusService {
    async fn start(&self) -> zbus::fdo::Result<()> {
        info!("start requested over D-Bus");
        self.daemon.start().map_err(map_to_fdo)
    }

    /// Returns `false` when the loop was already stopped.
    async fn stop(&self) -> zbus::fdo::Result<bool> {
        Ok(self.daemon.stop())
    }

    async fn get_status(&self) -> zbus::fdo::Result<String> {
        Ok(self.daemon.status().as_str().to_string())
    }

    async fn reload_config(&self) -> zbus::fdo::Result<()> {
        self.daemon.reload_config().map_err(map_to_fdo)
    }

    async fn recent_logs(&self, max: u32) -> zbus::fdo::Result<Vec<String>> {
        Ok(self.logs.drain(max.min(MAX_LOG_LINES) as usize))
    }

    #[zbus(signal)]
    pub async fn status_changed(ctxt: &SignalEmitter<'_>, state: &str) -> zbus::Result<()>;
}
