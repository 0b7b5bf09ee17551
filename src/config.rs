//! Build configuration.

/// Alignment every fixed block is padded to, and the largest element
/// alignment fixed storage accepts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockAlign(usize);

impl BlockAlign {
    /// `None` unless `bytes` is a power of two.
    pub fn from_bytes(bytes: usize) -> Option<Self> {
        bytes.is_power_of_two().then_some(BlockAlign(bytes))
    }

    /// The alignment in bytes.
    pub fn bytes(self) -> usize {
        self.0
    }
}

impl Default for BlockAlign {
    fn default() -> Self {
        BlockAlign(16)
    }
}

/// Knobs of a [Builder](crate::builder::Builder).
///
/// # Examples
///
/// ```rust
/// # use script_allocators::config::{BlockAlign, BuildConfig};
///
/// let config = BuildConfig::default()
///     .with_align(BlockAlign::from_bytes(32).unwrap())
///     .strict();
///
/// assert_eq!(config.align.bytes(), 32);
/// assert!(config.strict_deallocation);
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BuildConfig {
    /// Alignment of fixed blocks.
    pub align: BlockAlign,
    /// Fail the build when replay sees a deallocation it cannot match.
    pub strict_deallocation: bool,
}

impl BuildConfig {
    /// Same config with fixed blocks aligned to `align`.
    pub fn with_align(mut self, align: BlockAlign) -> Self {
        self.align = align;
        self
    }

    /// Same config with strict deallocation checks.
    pub fn strict(mut self) -> Self {
        self.strict_deallocation = true;
        self
    }
}
