use std::fmt;

/// Errors surfaced when validating a configuration, building a [`Context`],
/// or running a codec pass.
///
/// All configuration problems are reported synchronously before any work is
/// started. Malformed *block data* is never an error: decoding arbitrary
/// bytes always succeeds and yields error-colored blocks instead.
///
/// [`Context`]: crate::Context
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// A configuration parameter was out of range or contradictory.
    BadParam(&'static str),
    /// The requested block size is not a legal ASTC footprint.
    BadBlockSize(u32, u32, u32),
    /// The color profile is not supported by this build.
    BadProfile,
    /// The component swizzle requests a source this profile cannot provide.
    BadSwizzle,
    /// An input or output buffer was smaller than the image requires.
    BufferTooSmall {
        /// The number of bytes the operation needs.
        needed: usize,
        /// The number of bytes the caller provided.
        provided: usize,
    },
    /// The requested feature is recognized but not implemented.
    NotImplemented(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::BadParam(what) => write!(f, "invalid parameter: {what}"),
            Error::BadBlockSize(x, y, z) => {
                write!(f, "{x}x{y}x{z} is not a legal ASTC block size")
            }
            Error::BadProfile => write!(f, "unsupported color profile"),
            Error::BadSwizzle => write!(f, "unsupported component swizzle"),
            Error::BufferTooSmall { needed, provided } => {
                write!(f, "buffer too small: needed {needed} bytes, got {provided}")
            }
            Error::NotImplemented(what) => write!(f, "not implemented: {what}"),
        }
    }
}

impl std::error::Error for Error {}
