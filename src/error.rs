//! Error kinds returned by pack setup entry points.
//!
//! Runtime mutators never return `CoreError` — per spec they silently
//! become no-ops on bad input (dropped request, `NotReady`, full queue).
//! Only the `*_setup` family returns this enum, and on error leaves the
//! engine in its pre-call state.

/// Reasons a setup call or pack validation can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    #[error("pack header magic did not match")]
    InvalidMagic,
    #[error("pack is not 4-byte aligned")]
    Misaligned,
    #[error("sample pack exceeds SAMPLES_MAXENTRIES")]
    TooManyEntries,
    #[error("pack too small to hold its declared directory")]
    Truncated,
    #[error("core not ready: init has not succeeded")]
    NotReady,
    #[error("mutex stub: host must supply synchronisation")]
    Unimplemented,
}

impl CoreError {
    /// Maps back onto the integer status the language-neutral API describes.
    ///
    /// Zero is reserved for success by every setup entry point, so these
    /// start at 1.
    pub fn status_code(self) -> i32 {
        match self {
            CoreError::InvalidMagic => 1,
            CoreError::Misaligned => 2,
            CoreError::TooManyEntries => 3,
            CoreError::Truncated => 4,
            CoreError::NotReady => 5,
            CoreError::Unimplemented => 6,
        }
    }
}
