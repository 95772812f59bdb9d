use anyhow::{Context, Result};
use hubsync_integrations::DaemonState;
use hubsync_integrations::ids::{
    DBUS_INTERFACE_CONTROL, DBUS_NAME_CONTROL, DBUS_OBJECT_PATH_CONTROL,
};
use zbus::blocking::{Connection, Proxy};

pub struct ControlClient {
    connection: Connection,
}

impl ControlClient {
    pub fn connect() -> Result<Self> {
        let connection =
            Connection::session().context("failed to connect to session D-Bus for Control1")?;
        Ok(Self { connection })
    }

    pub fn status(&self) -> Result<DaemonState> {
        let state: String = self
            .proxy()?
            .call("GetStatus", &())
            .context("GetStatus failed")?;
        DaemonState::parse(&state).with_context(|| format!("unknown daemon state: {state}"))
    }

    pub fn start(&self) -> Result<()> {
        self.proxy()?
            .call::<_, _, ()>("Start", &())
            .context("Start failed")
    }

    /// `false` when the upload loop was not running.
    pub fn stop(&self) -> Result<bool> {
        self.proxy()?.call("Stop", &()).context("Stop failed")
    }

    pub fn reload_config(&self) -> Result<()> {
        self.proxy()?
            .call::<_, _, ()>("ReloadConfig", &())
            .context("ReloadConfig failed")
    }

    pub fn recent_logs(&self, max: u32) -> Result<Vec<String>> {
        self.proxy()?
            .call("RecentLogs", &(max,))
            .context("RecentLogs failed")
    }

    fn proxy(&self) -> Result<Proxy<'_>> {
        Proxy::new(
            &self.connection,
            DBUS_NAME_CONTROL,
            DBUS_OBJECT_PATH_CONTROL,
            DBUS_INTERFACE_CONTROL,
        )
        .context("failed to create Control1 proxy")
    }
}
