//! Counting encoder for testing.

use crate::error::{ErrorKind, Result};
use crate::{Encoder, Profile};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Encoder that never touches pixels.
///
/// Every call is counted, which makes "was the encoder invoked again?"
/// observable from tests. Output is a short deterministic description of the
/// request. Sources starting with [`MockEncoder::CORRUPT`] fail with
/// [`Decode`](ErrorKind::Decode).
///
/// # Examples
///
/// ```
/// use trove_codec::{Codec, Encoder, MockEncoder, Profiles, Role};
///
/// let encoder = MockEncoder::default();
/// let profile = Profiles::default().get(Role::Thumbnail, Codec::Webp);
/// let output = encoder.encode(b"pixels", &profile).unwrap();
/// assert_eq!(output, b"thumbnail:webp:6");
/// assert_eq!(encoder.calls(), 1);
/// assert!(encoder.encode(MockEncoder::CORRUPT, &profile).is_err());
/// assert_eq!(encoder.calls(), 2);
/// ```
#[derive(Debug, Default)]
pub struct MockEncoder {
    calls: AtomicUsize,
}

impl MockEncoder {
    /// Prefix marking a source as undecodable.
    pub const CORRUPT: &'static [u8] = b"corrupt";

    /// Number of times [`encode`](Encoder::encode) has been called, failed calls included.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Encoder for MockEncoder {
    fn encode(&self, source: &[u8], profile: &Profile) -> Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if source.starts_with(Self::CORRUPT) {
            exn::bail!(ErrorKind::Decode);
        }
        Ok(format!("{}:{}:{}", profile.role, profile.codec, source.len()).into_bytes())
    }
}
