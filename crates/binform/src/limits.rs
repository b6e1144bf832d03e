//! Security limits for decoding untrusted input.

/// Default maximum container nesting depth.
///
/// Nesting depth is attacker-controlled input; parsers track it with an
/// explicit heap stack and fail with [`MaxDepthExceeded`] past this ceiling.
///
/// [`MaxDepthExceeded`]: crate::error::ErrorKind::MaxDepthExceeded
pub const DEFAULT_MAX_NESTING_DEPTH: usize = 1024;

/// Default maximum declared item count for a single container.
pub const DEFAULT_MAX_ITEMS: usize = 1 << 24;

/// Default buffer size for stream-backed sources.
pub const DEFAULT_BUFFER_SIZE: usize = 16384;

/// Growth step when reading length-prefixed payloads.
///
/// A declared length never pre-allocates more than one step ahead of the
/// bytes actually read, so a forged huge length hits end-of-input long
/// before it can exhaust memory.
pub const READ_CHUNK: usize = 16384;

/// Decode limits shared by all format parsers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeOptions {
    /// Maximum container nesting depth.
    pub max_nesting_depth: usize,
    /// Maximum declared item count for a single container.
    pub max_items: usize,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            max_nesting_depth: DEFAULT_MAX_NESTING_DEPTH,
            max_items: DEFAULT_MAX_ITEMS,
        }
    }
}

impl DecodeOptions {
    /// Creates options with the default limits.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum nesting depth.
    pub fn with_max_nesting_depth(mut self, max: usize) -> Self {
        self.max_nesting_depth = max;
        self
    }

    /// Sets the maximum declared item count per container.
    pub fn with_max_items(mut self, max: usize) -> Self {
        self.max_items = max;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = DecodeOptions::default();
        assert_eq!(options.max_nesting_depth, DEFAULT_MAX_NESTING_DEPTH);
        assert_eq!(options.max_items, DEFAULT_MAX_ITEMS);
    }

    #[test]
    fn test_builder_setters() {
        let options = DecodeOptions::new()
            .with_max_nesting_depth(4)
            .with_max_items(100);
        assert_eq!(options.max_nesting_depth, 4);
        assert_eq!(options.max_items, 100);
    }
}
