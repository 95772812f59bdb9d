pub mod config;
pub mod daemon;
pub mod dbus_api;
pub mod logging;
pub mod notifier;
pub mod sync;
