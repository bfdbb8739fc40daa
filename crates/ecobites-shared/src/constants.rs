/// Application name
pub const APP_NAME: &str = "Ecobites";

/// Default HTTP port (server)
pub const DEFAULT_HTTP_PORT: u16 = 6001;

/// Maximum message length in characters
pub const MAX_MESSAGE_LEN: usize = 2048;

/// Maximum length of an opaque user / item identifier
pub const MAX_ID_LEN: usize = 128;

/// Capacity of the per-connection push queue
pub const DEFAULT_PUSH_CAPACITY: usize = 64;

/// Upper bound for a suggestion-service round trip, in seconds
pub const DEFAULT_SUGGESTION_TIMEOUT_SECS: u64 = 10;
