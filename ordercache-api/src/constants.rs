//! Constants for the ordercache API

use std::time::Duration;

// ============================================================================
// SERVER
// ============================================================================

/// Default bind host
pub const DEFAULT_BIND_HOST: &str = "0.0.0.0";

/// Default HTTP port
pub const DEFAULT_PORT: u16 = 8081;

/// Default request body limit (1 MiB)
pub const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;

/// Default CORS max age in seconds (24 hours)
pub const DEFAULT_CORS_MAX_AGE_SECS: u64 = 86400;

// ============================================================================
// ENGINE
// ============================================================================

/// Default bound for a single store call
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default delay before the first persist retry
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(200);

/// Default pause after an event stream error
pub const DEFAULT_STREAM_ERROR_BACKOFF: Duration = Duration::from_millis(500);

// ============================================================================
// HTTP
// ============================================================================

/// Response header reporting whether a read was served from the cache
pub const CACHE_STATUS_HEADER: &str = "x-cache";
