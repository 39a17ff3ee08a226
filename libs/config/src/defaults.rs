//! Default configuration values
//!
//! Used when neither the config file nor the environment sets a value.

/// Server connection defaults
pub mod server {
    pub const ADDRESS: &str = "127.0.0.1";

    pub const PORT: u16 = 8888;

    /// TCP handshake deadline (seconds)
    pub const CONNECT_TIMEOUT_SECS: u64 = 3;

    /// Single write deadline (seconds)
    pub const SEND_TIMEOUT_SECS: u64 = 10;
}

/// Device identity defaults
pub mod device {
    pub const NAME: &str = "KIOSK-01";

    pub const PROTOCOL_VERSION: &str = "1.0";
}

/// Sync transport defaults
pub mod sync {
    pub const HEARTBEAT_INTERVAL_SECS: u64 = 30;

    pub const MAX_HEARTBEAT_FAILURES: u32 = 5;

    pub const RECONNECT_ENABLED: bool = true;

    pub const RECONNECT_INTERVAL_SECS: u64 = 5;

    /// 0 = retry forever
    pub const MAX_RECONNECT_ATTEMPTS: u32 = 0;

    pub const READ_BUFFER_SIZE: usize = 8192;

    /// Receive buffer limit as a multiple of the read size
    pub const MAX_BUFFER_MULTIPLE: usize = 10;

    pub const DEDUP_CAPACITY: usize = 1000;

    pub const EVENT_CAPACITY: usize = 256;

    pub const COMMAND_QUEUE_CAPACITY: usize = 64;
}

/// Logging defaults
pub mod logging {
    pub const LEVEL: &str = "info";
}
