//! Capacity and size constants for the bridge
//!
//! The session lists are intentionally small: they only need to remember the
//! most recent conversations served by one model instance, and a miss degrades
//! to sending the full prompt rather than failing.

/// Session list capacities
pub mod sessions {
    /// Default number of prompt session states remembered per model instance
    pub const PROMPT_SESSION_CAPACITY: usize = 32;

    /// Default number of incoming (keyed) session states remembered per model instance
    pub const INCOMING_SESSION_CAPACITY: usize = 256;
}

/// Durable cache limits
pub mod cache {
    /// Version written into every durable session record
    pub const RECORD_VERSION: u32 = 1;

    /// Number of leading characters of the encoded key used as the bucket directory
    pub const BUCKET_PREFIX_LEN: usize = 2;

    /// Records larger than this are treated as corrupt and ignored (64KB)
    pub const MAX_RECORD_BYTES: u64 = 64 * 1024;
}

/// Logging limits
pub mod logging {
    /// Maximum characters of a raw line echoed into a log or error message
    pub const MAX_LOGGED_LINE_CHARS: usize = 200;
}
