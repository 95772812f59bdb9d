pub const DBUS_NAME_CONTROL: &str = "io.github.hubsync.Control1";
pub const DBUS_INTERFACE_CONTROL: &str = "io.github.hubsync.Control1";
pub const DBUS_OBJECT_PATH_CONTROL: &str = "/io/github/hubsync/Control1";

pub const DBUS_ERROR_BUSY: &str = "io.github.hubsync.Control1.Error.Busy";
pub const DBUS_ERROR_INVALID_CONFIG: &str = "io.github.hubsync.Control1.Error.InvalidConfig";
pub const DBUS_ERROR_FAILED: &str = "io.github.hubsync.Control1.Error.Failed";
