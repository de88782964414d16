use crate::{Codec, Role};
use std::fmt::{Display, Formatter, Result as FmtResult};

impl Display for Codec {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.as_str())
    }
}

impl AsRef<str> for Codec {
    fn as_ref(&self) -> &'static str {
        self.as_str()
    }
}

impl Display for Role {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(match self {
            Role::Thumbnail => "thumbnail",
            Role::Lossy => "lossy",
        })
    }
}

impl Codec {
    /// Returns the canonical file extension (without the leading dot) of
    /// artifacts produced by this codec.
    #[inline]
    #[must_use]
    pub fn extension(&self) -> &'static str {
        match self {
            Codec::Avif => "avif",
            Codec::Jpeg => "jpg",
            Codec::Webp => "webp",
        }
    }

    /// Returns the short name for configuration (and lossy cache directory names).
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Codec::Avif => "avif",
            Codec::Jpeg => "jpeg",
            Codec::Webp => "webp",
        }
    }

    /// Returns the `Content-Type` of artifacts produced by this codec.
    #[inline]
    #[must_use]
    pub fn mime(&self) -> &'static str {
        match self {
            Codec::Avif => "image/avif",
            Codec::Jpeg => "image/jpeg",
            Codec::Webp => "image/webp",
        }
    }
}
