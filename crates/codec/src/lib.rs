//! Image derivation profiles and encoders.
//!
//! This crate wraps the image encoders behind a unified [`Codec`] enum and
//! the [`Encoder`] trait, providing:
//!
//! - **Codec selection** from configuration or request hints
//!   ([`Codec::from_str`](std::str::FromStr)), with the canonical file
//!   extension and MIME type of every output ([`Codec::extension`],
//!   [`Codec::mime`])
//! - **Profiles**: a [`Role`] (thumbnail or lossy re-encode), a codec and its
//!   quality/effort [`Params`], looked up from a static [`Profiles`] table
//! - **Encoding** of a source image into a derived artifact via
//!   [`ImageEncoder`], which also performs the thumbnail resize
//!
//! Encoding is CPU-bound and synchronous; callers are expected to run it
//! inside [`spawn_blocking`](https://docs.rs/tokio/latest/tokio/task/fn.spawn_blocking.html).

mod construct;
mod encode;
pub mod error;
#[cfg(feature = "mock")]
mod mock;
mod profile;
mod util;

pub use crate::encode::{Encoder, ImageEncoder, THUMBNAIL_BOX};
#[cfg(feature = "mock")]
pub use crate::mock::MockEncoder;
pub use crate::profile::{CodecParams, Params, Profile, Profiles};

/// An output codec for derived artifacts.
///
/// JPEG XL is recognised when parsing (so configuration and request hints
/// naming it produce a [`DisabledFormat`](error::ErrorKind::DisabledFormat)
/// error rather than an unknown-format error) but cannot be produced.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Codec {
    /// AV1 Image File Format (.avif)
    Avif,
    /// JPEG (.jpg)
    #[cfg_attr(feature = "serde", serde(alias = "jpg"))]
    Jpeg,
    /// WebP (.webp)
    Webp,
}

/// What a derived artifact is for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Role {
    /// Downscaled preview fitting inside a [`THUMBNAIL_BOX`] square.
    Thumbnail,
    /// Full-size re-encode.
    Lossy,
}

impl Codec {
    /// Every codec this build can produce.
    pub const ALL: [Codec; 3] = [Codec::Avif, Codec::Jpeg, Codec::Webp];
}

#[cfg(test)]
mod tests {
    use crate::Codec;

    #[test]
    fn all_codecs_are_distinct() {
        let mut all = Codec::ALL.to_vec();
        all.dedup();
        assert_eq!(all.len(), Codec::ALL.len());
    }
}
