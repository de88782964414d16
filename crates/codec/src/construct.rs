use crate::error::{Error, ErrorKind};
use crate::{Codec, Role};
use std::str::FromStr;

impl FromStr for Codec {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "avif" => Ok(Codec::Avif),
            "jpg" | "jpeg" => Ok(Codec::Jpeg),
            "webp" => Ok(Codec::Webp),
            // Recognised, but the image encoders shipped with this build
            // cannot write it.
            "jxl" => exn::bail!(ErrorKind::DisabledFormat(s.to_string())),
            _ => exn::bail!(ErrorKind::UnsupportedFormat(s.to_string())),
        }
    }
}

impl FromStr for Role {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "thumbnail" | "thumbnails" => Ok(Role::Thumbnail),
            "lossy" => Ok(Role::Lossy),
            _ => exn::bail!(ErrorKind::UnsupportedFormat(s.to_string())),
        }
    }
}

impl Codec {
    /// Resolve an optional request hint, falling back to `default` when the
    /// hint is missing or names a codec that can't be produced.
    #[must_use]
    pub fn from_hint(hint: Option<&str>, default: Codec) -> Codec {
        hint.and_then(|h| h.parse().ok()).unwrap_or(default)
    }
}

#[cfg(test)]
mod tests {
    use crate::error::ErrorKind;
    use crate::{Codec, Role};
    use rstest::rstest;

    #[rstest]
    #[case("avif", Codec::Avif)]
    #[case("AVIF", Codec::Avif)]
    #[case("jpg", Codec::Jpeg)]
    #[case("jpeg", Codec::Jpeg)]
    #[case("webp", Codec::Webp)]
    #[case(" webp ", Codec::Webp)]
    fn test_from_str(#[case] test: &str, #[case] expected: Codec) {
        assert_eq!(test.parse::<Codec>().unwrap(), expected);
    }

    #[rstest]
    #[case("png")]
    #[case("definitely not valid")]
    #[case("")]
    fn test_from_str_unsupported(#[case] test: &str) {
        let err = test.parse::<Codec>().unwrap_err();
        assert!(matches!(&*err, ErrorKind::UnsupportedFormat(_)));
    }

    #[test]
    fn test_jxl_is_disabled() {
        let err = "jxl".parse::<Codec>().unwrap_err();
        assert!(matches!(&*err, ErrorKind::DisabledFormat(_)));
    }

    #[rstest]
    #[case(None, Codec::Avif)]
    #[case(Some("jpg"), Codec::Jpeg)]
    #[case(Some("jxl"), Codec::Avif)]
    #[case(Some("nonsense"), Codec::Avif)]
    fn test_from_hint(#[case] hint: Option<&str>, #[case] expected: Codec) {
        assert_eq!(Codec::from_hint(hint, Codec::Avif), expected);
    }

    #[rstest]
    #[case("thumbnail", Role::Thumbnail)]
    #[case("thumbnails", Role::Thumbnail)]
    #[case("lossy", Role::Lossy)]
    fn test_role_from_str(#[case] test: &str, #[case] expected: Role) {
        assert_eq!(test.parse::<Role>().unwrap(), expected);
    }
}
