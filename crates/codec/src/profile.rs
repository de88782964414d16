//! Derivation profiles.
//!
//! A [`Profile`] is static configuration: which [`Role`] an artifact plays,
//! which [`Codec`] produces it, and the quality/effort knobs handed to the
//! encoder. Nothing about a profile is persisted beside the artifact; the
//! output path alone identifies it.

use crate::{Codec, Role};

/// Encoder knobs for one (codec, role) pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Params {
    /// Perceptual quality, `1..=100`.
    pub quality: u8,
    /// How hard the encoder should try, `0..=9` (higher is slower and smaller).
    pub effort: u8,
}
impl Params {
    pub const fn new(quality: u8, effort: u8) -> Self {
        Self { quality, effort }
    }

    /// Quality clamped into the range every encoder accepts.
    #[must_use]
    pub fn clamped_quality(&self) -> u8 {
        self.quality.clamp(1, 100)
    }

    /// Effort translated into an AVIF encoder speed (`1` slowest, `10` fastest).
    #[must_use]
    pub fn avif_speed(&self) -> u8 {
        10u8.saturating_sub(self.effort.min(9))
    }
}

/// Lossy and thumbnail knobs for a single codec.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CodecParams {
    pub lossy: Params,
    pub thumbnail: Params,
}
impl CodecParams {
    pub fn for_role(&self, role: Role) -> Params {
        match role {
            Role::Lossy => self.lossy,
            Role::Thumbnail => self.thumbnail,
        }
    }
}

/// The fixed table of profiles, one [`CodecParams`] per [`Codec`].
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Profiles {
    pub avif: CodecParams,
    pub jpeg: CodecParams,
    pub webp: CodecParams,
}
impl Default for Profiles {
    fn default() -> Self {
        Self {
            avif: CodecParams {
                lossy: Params::new(65, 9),
                thumbnail: Params::new(50, 9),
            },
            jpeg: CodecParams {
                lossy: Params::new(80, 0),
                thumbnail: Params::new(60, 0),
            },
            webp: CodecParams {
                lossy: Params::new(80, 6),
                thumbnail: Params::new(65, 6),
            },
        }
    }
}
impl Profiles {
    /// Look up the profile for producing `codec` output in `role`.
    #[must_use]
    pub fn get(&self, role: Role, codec: Codec) -> Profile {
        let params = match codec {
            Codec::Avif => self.avif,
            Codec::Jpeg => self.jpeg,
            Codec::Webp => self.webp,
        };
        Profile { role, codec, params: params.for_role(role) }
    }
}

/// A named output kind: role, codec and encoder parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Profile {
    pub role: Role,
    pub codec: Codec,
    pub params: Params,
}
impl Profile {
    #[must_use]
    pub fn mime(&self) -> &'static str {
        self.codec.mime()
    }
}
