//! Configuration options for protocol envelopes.

/// Tunables carried by each [`crate::Protocol`].
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Config {
    /// Upper bound on one framed message, applied to encoded output and to
    /// per-source reassembly buffers (default: 64 KiB). Oversized input is
    /// quarantined instead of buffered forever.
    pub max_message_size: usize,

    /// Body decode failures on inputs shorter than this are treated as
    /// fragments and buffered rather than quarantined (default: 10).
    pub incomplete_threshold: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_message_size: 64 * 1024,
            incomplete_threshold: 10,
        }
    }
}

impl Config {
    /// Creates a configuration with the given message size cap.
    #[must_use]
    pub fn with_max_message_size(max_message_size: usize) -> Self {
        Self {
            max_message_size,
            ..Self::default()
        }
    }
}
