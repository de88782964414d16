//! Encoding Operations

use crate::error::{ErrorKind, Result};
use crate::{Codec, Profile, Role};
use exn::ResultExt;
use image::codecs::avif::AvifEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::webp::WebPEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView};
use tracing::instrument;

/// Edge length of the square every thumbnail must fit inside.
pub const THUMBNAIL_BOX: u32 = 256;

/// Turns source image bytes into a derived artifact.
///
/// Implementations are synchronous and CPU-bound. The trait exists so the
/// cache can be exercised without a real transcoder (see `MockEncoder`
/// behind the `mock` feature).
pub trait Encoder: Send + Sync {
    /// Encode `source` according to `profile`.
    ///
    /// For [`Role::Thumbnail`] the output must fit within
    /// [`THUMBNAIL_BOX`]×[`THUMBNAIL_BOX`] without ever being enlarged.
    fn encode(&self, source: &[u8], profile: &Profile) -> Result<Vec<u8>>;
}

/// [`Encoder`] backed by the `image` crate.
///
/// # Notes
/// - WebP output is always lossless; the `image` crate has no lossy WebP
///   encoder, so the profile's quality is ignored for that codec.
/// - Source decoding is limited to the formats enabled on the `image`
///   dependency (JPEG, PNG, WebP). Anything else fails with
///   [`Decode`](ErrorKind::Decode), which callers treat as "serve the original".
///   With the default eligible list that means AVIF, JPEG XL, DNG and HEIC
///   sources always fall back to the original file.
#[derive(Clone, Copy, Debug, Default)]
pub struct ImageEncoder;

impl Encoder for ImageEncoder {
    #[instrument(skip(self, source), fields(
        role = %profile.role,
        codec = %profile.codec,
        input_size = source.len(),
        output_size
    ))]
    fn encode(&self, source: &[u8], profile: &Profile) -> Result<Vec<u8>> {
        let image = image::load_from_memory(source).or_raise(|| ErrorKind::Decode)?;
        let image = match profile.role {
            Role::Thumbnail => fit_within(image, THUMBNAIL_BOX),
            Role::Lossy => image,
        };
        let mut output = Vec::new();
        let quality = profile.params.clamped_quality();
        match profile.codec {
            Codec::Jpeg => {
                // JPEG has no alpha channel.
                let rgb = DynamicImage::ImageRgb8(image.to_rgb8());
                rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut output, quality))
                    .or_raise(|| ErrorKind::Encoder)?;
            },
            Codec::Webp => {
                let rgba = DynamicImage::ImageRgba8(image.to_rgba8());
                rgba.write_with_encoder(WebPEncoder::new_lossless(&mut output)).or_raise(|| ErrorKind::Encoder)?;
            },
            Codec::Avif => {
                let rgba = DynamicImage::ImageRgba8(image.to_rgba8());
                let encoder = AvifEncoder::new_with_speed_quality(&mut output, profile.params.avif_speed(), quality);
                rgba.write_with_encoder(encoder).or_raise(|| ErrorKind::Encoder)?;
            },
        }
        tracing::Span::current().record("output_size", output.len());
        Ok(output)
    }
}

/// Shrink `image` so both sides fit inside a `edge`×`edge` box, keeping the
/// aspect ratio. Images already inside the box are returned untouched.
fn fit_within(image: DynamicImage, edge: u32) -> DynamicImage {
    let (width, height) = image.dimensions();
    if width <= edge && height <= edge {
        return image;
    }
    image.resize(edge, edge, FilterType::Lanczos3)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Params, Profiles};
    use image::{ImageFormat, RgbImage};
    use rstest::rstest;
    use std::io::Cursor;

    fn png(width: u32, height: u32) -> Vec<u8> {
        let image = RgbImage::from_fn(width, height, |x, y| image::Rgb([(x % 256) as u8, (y % 256) as u8, 128]));
        let mut buffer = Cursor::new(Vec::new());
        image.write_to(&mut buffer, ImageFormat::Png).unwrap();
        buffer.into_inner()
    }

    fn thumbnail(codec: Codec) -> Profile {
        Profiles::default().get(Role::Thumbnail, codec)
    }

    #[rstest]
    #[case(800, 400, 256, 128)]
    #[case(400, 800, 128, 256)]
    #[case(1024, 1024, 256, 256)]
    #[case(300, 100, 256, 85)]
    fn test_thumbnail_fits_box(#[case] width: u32, #[case] height: u32, #[case] w: u32, #[case] h: u32) {
        let output = ImageEncoder.encode(&png(width, height), &thumbnail(Codec::Jpeg)).unwrap();
        let decoded = image::load_from_memory(&output).unwrap();
        assert!(decoded.width() <= THUMBNAIL_BOX && decoded.height() <= THUMBNAIL_BOX);
        // Resize rounding may differ by a pixel on the short side.
        assert!(decoded.width().abs_diff(w) <= 1, "width {} != {w}", decoded.width());
        assert!(decoded.height().abs_diff(h) <= 1, "height {} != {h}", decoded.height());
    }

    #[rstest]
    #[case(64, 32)]
    #[case(256, 10)]
    #[case(1, 1)]
    fn test_thumbnail_never_upscales(#[case] width: u32, #[case] height: u32) {
        let output = ImageEncoder.encode(&png(width, height), &thumbnail(Codec::Jpeg)).unwrap();
        let decoded = image::load_from_memory(&output).unwrap();
        assert_eq!(decoded.dimensions(), (width, height));
    }

    #[test]
    fn test_lossy_keeps_dimensions() {
        let profile = Profiles::default().get(Role::Lossy, Codec::Jpeg);
        let output = ImageEncoder.encode(&png(640, 480), &profile).unwrap();
        let decoded = image::load_from_memory(&output).unwrap();
        assert_eq!(decoded.dimensions(), (640, 480));
        assert_eq!(image::guess_format(&output).unwrap(), ImageFormat::Jpeg);
    }

    #[test]
    fn test_webp_output() {
        let profile = Profiles::default().get(Role::Lossy, Codec::Webp);
        let output = ImageEncoder.encode(&png(32, 32), &profile).unwrap();
        assert_eq!(image::guess_format(&output).unwrap(), ImageFormat::WebP);
    }

    #[test]
    fn test_undecodable_source() {
        let err = ImageEncoder.encode(b"definitely not an image", &thumbnail(Codec::Jpeg)).unwrap_err();
        assert_eq!(*err, ErrorKind::Decode);
    }

    #[test]
    fn test_avif_sources_are_not_decoded() {
        let avif = ImageEncoder.encode(&png(16, 16), &thumbnail(Codec::Avif)).unwrap();
        assert_eq!(image::guess_format(&avif).unwrap(), ImageFormat::Avif);
        let err = ImageEncoder.encode(&avif, &thumbnail(Codec::Jpeg)).unwrap_err();
        assert_eq!(*err, ErrorKind::Decode);
    }

    #[test]
    fn test_quality_is_clamped() {
        let profile = Profile {
            role: Role::Lossy,
            codec: Codec::Jpeg,
            params: Params::new(0, 0),
        };
        assert!(ImageEncoder.encode(&png(16, 16), &profile).is_ok());
    }
}
