//! Codec boundary: raw request bytes in, frame sequences out, and back
//!
//! Decoding refuses images whose declared size exceeds the pixel budget
//! before any pixel data is allocated. Animated GIF, APNG and animated WebP
//! sources are decoded frame by frame with their timing. GIF and APNG
//! animations are re-encoded in their own format; animated WebP comes back as
//! GIF since no animated WebP encoder is available.

use crate::io::configuration::{DEFAULT_FRAME_DURATION_MS, DEFAULT_LOOP_COUNT, GIF_ENCODER_SPEED};
use crate::io::error::{MosaicError, Result, invalid_request};
use image::codecs::gif::{GifDecoder, GifEncoder, Repeat};
use image::codecs::png::PngDecoder;
use image::codecs::webp::WebPDecoder;
use image::error::{EncodingError, ImageFormatHint};
use image::{
    AnimationDecoder, Delay, DynamicImage, Frame, ImageError, ImageFormat, ImageReader, Limits,
    RgbImage,
};
use std::io::Cursor;

/// One decoded frame of a source image
#[derive(Debug, Clone)]
pub struct SourceFrame {
    /// Pixels as decoded (any colour type)
    pub image: DynamicImage,
    /// Display duration, when the source carries one
    pub delay_ms: Option<u32>,
}

/// A decoded request payload
#[derive(Debug, Clone)]
pub struct SourceImage {
    /// Container format the payload was recognised as
    pub format: ImageFormat,
    /// Frames in display order
    pub frames: Vec<SourceFrame>,
    /// Loop count from the animation header (0 loops forever)
    pub loop_count: Option<u16>,
}

impl SourceImage {
    /// Whether the payload holds more than one frame
    pub fn is_animated(&self) -> bool {
        self.frames.len() > 1
    }
}

/// A composed frame ready for encoding
#[derive(Debug, Clone)]
pub struct OutputFrame {
    /// Frame pixels
    pub image: RgbImage,
    /// Display duration in milliseconds
    pub delay_ms: u32,
}

/// Encoded response payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    /// Encoded bytes
    pub bytes: Vec<u8>,
    /// Format of `bytes`
    pub format: ImageFormat,
}

impl EncodedImage {
    /// MIME type of the payload (for example `image/gif`)
    pub fn mime_type(&self) -> &'static str {
        self.format.to_mime_type()
    }

    /// Upper-case format name (for example `GIF`)
    pub fn format_name(&self) -> String {
        format_name(self.format)
    }
}

/// Upper-case name of an image format
pub fn format_name(format: ImageFormat) -> String {
    format!("{format:?}").to_uppercase()
}

/// Decode a request payload into frames
///
/// # Errors
///
/// Returns an invalid request error for an empty or unrecognised payload,
/// [`MosaicError::DecodeBombGuard`] if the declared dimensions (or the total
/// size of all animation frames) exceed `max_pixels`, and
/// [`MosaicError::ImageDecode`] if the codec rejects the data.
pub fn decode_image(bytes: &[u8], max_pixels: u64) -> Result<SourceImage> {
    if bytes.is_empty() {
        return Err(invalid_request(&"image payload is empty"));
    }

    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| invalid_request(&format!("unreadable image payload: {e}")))?;
    let format = reader
        .format()
        .ok_or_else(|| invalid_request(&"unrecognised image format"))?;

    let (width, height) = reader.into_dimensions()?;
    check_pixel_budget(width, height, max_pixels)?;

    let animated = match format {
        ImageFormat::Gif => Some(gif_frames(bytes, max_pixels)?),
        ImageFormat::Png => apng_frames(bytes, max_pixels)?,
        ImageFormat::WebP => webp_frames(bytes, max_pixels)?,
        _ => None,
    };

    if let Some((frames, loop_count)) = animated {
        return Ok(SourceImage {
            format,
            frames,
            loop_count,
        });
    }

    let mut reader = ImageReader::with_format(Cursor::new(bytes), format);
    reader.limits(decode_limits(max_pixels));
    let image = reader.decode()?;

    Ok(SourceImage {
        format,
        frames: vec![SourceFrame {
            image,
            delay_ms: None,
        }],
        loop_count: None,
    })
}

/// Format an animation decoded from `format` is written back in, or `None`
/// for formats that cannot carry an animation
pub const fn animated_output_format(format: ImageFormat) -> Option<ImageFormat> {
    match format {
        ImageFormat::Png => Some(ImageFormat::Png),
        ImageFormat::Gif | ImageFormat::WebP => Some(ImageFormat::Gif),
        _ => None,
    }
}

/// Encode composed frames as an animation for a source in `source_format`
///
/// APNG sources are written as APNG; everything else is written as GIF.
///
/// # Errors
///
/// Returns [`MosaicError::ImageEncode`] if the encoder fails or the frames
/// differ in size.
pub fn encode_animation(
    frames: &[OutputFrame],
    loop_count: u16,
    source_format: ImageFormat,
) -> Result<EncodedImage> {
    match animated_output_format(source_format) {
        Some(ImageFormat::Png) => encode_apng(frames, loop_count),
        _ => encode_gif(frames, loop_count),
    }
}

fn encode_gif(frames: &[OutputFrame], loop_count: u16) -> Result<EncodedImage> {
    let encode_error = |source| MosaicError::ImageEncode {
        format: ImageFormat::Gif,
        source,
    };

    let mut bytes = Vec::new();
    {
        let mut encoder = GifEncoder::new_with_speed(&mut bytes, GIF_ENCODER_SPEED);
        let repeat = if loop_count == 0 {
            Repeat::Infinite
        } else {
            Repeat::Finite(loop_count)
        };
        encoder.set_repeat(repeat).map_err(encode_error)?;

        for frame in frames {
            let rgba = DynamicImage::ImageRgb8(frame.image.clone()).into_rgba8();
            let delay = Delay::from_numer_denom_ms(frame.delay_ms, 1);
            encoder
                .encode_frame(Frame::from_parts(rgba, 0, 0, delay))
                .map_err(encode_error)?;
        }
    }

    Ok(EncodedImage {
        bytes,
        format: ImageFormat::Gif,
    })
}

fn apng_error(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> MosaicError {
    MosaicError::ImageEncode {
        format: ImageFormat::Png,
        source: ImageError::Encoding(EncodingError::new(
            ImageFormatHint::Exact(ImageFormat::Png),
            err,
        )),
    }
}

/// APNG frame delay as a `(numerator, denominator)` fraction of a second
fn apng_delay(delay_ms: u32) -> (u16, u16) {
    u16::try_from(delay_ms).map_or_else(
        |_| (u16::try_from(delay_ms / 10).unwrap_or(u16::MAX), 100),
        |ms| (ms, 1000),
    )
}

fn encode_apng(frames: &[OutputFrame], loop_count: u16) -> Result<EncodedImage> {
    let Some(first) = frames.first() else {
        return Err(apng_error("animation has no frames"));
    };
    let (width, height) = first.image.dimensions();
    let frame_count = u32::try_from(frames.len()).map_err(apng_error)?;

    let mut bytes = Vec::new();
    {
        let mut encoder = png::Encoder::new(&mut bytes, width, height);
        encoder.set_color(png::ColorType::Rgb);
        encoder.set_depth(png::BitDepth::Eight);
        encoder
            .set_animated(frame_count, u32::from(loop_count))
            .map_err(apng_error)?;

        let mut writer = encoder.write_header().map_err(apng_error)?;
        for frame in frames {
            if frame.image.dimensions() != (width, height) {
                return Err(apng_error(format!(
                    "frame of {}x{} in a {width}x{height} animation",
                    frame.image.width(),
                    frame.image.height()
                )));
            }
            let (numerator, denominator) = apng_delay(frame.delay_ms);
            writer
                .set_frame_delay(numerator, denominator)
                .map_err(apng_error)?;
            writer
                .write_image_data(frame.image.as_raw())
                .map_err(apng_error)?;
        }
        writer.finish().map_err(apng_error)?;
    }

    Ok(EncodedImage {
        bytes,
        format: ImageFormat::Png,
    })
}

/// Encode a single composed frame in `format`
///
/// # Errors
///
/// Returns [`MosaicError::ImageEncode`] if the format cannot be written.
pub fn encode_static(image: &RgbImage, format: ImageFormat) -> Result<EncodedImage> {
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), format)
        .map_err(|source| MosaicError::ImageEncode { format, source })?;

    Ok(EncodedImage { bytes, format })
}

/// Duration to use for a frame, falling back when absent
///
/// An explicit zero delay is kept. GIF frames without a graphic control
/// extension decode with a zero delay too, so they keep zero as well.
pub fn frame_duration(delay_ms: Option<u32>) -> u32 {
    delay_ms.unwrap_or(DEFAULT_FRAME_DURATION_MS)
}

/// Loop count to use for an animation, falling back when absent
pub fn loop_count_or_default(loop_count: Option<u16>) -> u16 {
    loop_count.unwrap_or(DEFAULT_LOOP_COUNT)
}

fn check_pixel_budget(width: u32, height: u32, max_pixels: u64) -> Result<()> {
    if u64::from(width) * u64::from(height) > max_pixels {
        return Err(MosaicError::DecodeBombGuard {
            width,
            height,
            limit: max_pixels,
        });
    }
    Ok(())
}

fn decode_limits(max_pixels: u64) -> Limits {
    let mut limits = Limits::default();
    // Room for a 16-bit RGBA buffer of the largest accepted image
    limits.max_alloc = Some(max_pixels.saturating_mul(8));
    limits
}

type AnimationFrames = (Vec<SourceFrame>, Option<u16>);

fn collect_frames<'a>(
    decoder: impl AnimationDecoder<'a>,
    max_pixels: u64,
) -> Result<Vec<SourceFrame>> {
    let mut frames = Vec::new();
    let mut total_pixels = 0_u64;

    for frame in decoder.into_frames() {
        let frame = frame?;
        let (numer, denom) = frame.delay().numer_denom_ms();
        let buffer = frame.into_buffer();

        total_pixels += u64::from(buffer.width()) * u64::from(buffer.height());
        if total_pixels > max_pixels {
            return Err(MosaicError::DecodeBombGuard {
                width: buffer.width(),
                height: buffer.height(),
                limit: max_pixels,
            });
        }

        frames.push(SourceFrame {
            image: DynamicImage::ImageRgba8(buffer),
            delay_ms: numer.checked_div(denom),
        });
    }

    if frames.is_empty() {
        return Err(invalid_request(&"animation contains no frames"));
    }
    Ok(frames)
}

fn gif_frames(bytes: &[u8], max_pixels: u64) -> Result<AnimationFrames> {
    let decoder = GifDecoder::new(Cursor::new(bytes))?;
    let frames = collect_frames(decoder, max_pixels)?;
    Ok((frames, gif_loop_count(bytes)))
}

fn apng_frames(bytes: &[u8], max_pixels: u64) -> Result<Option<AnimationFrames>> {
    let decoder = PngDecoder::new(Cursor::new(bytes))?;
    if !decoder.is_apng()? {
        return Ok(None);
    }
    let frames = collect_frames(decoder.apng()?, max_pixels)?;
    Ok(Some((frames, apng_loop_count(bytes))))
}

fn webp_frames(bytes: &[u8], max_pixels: u64) -> Result<Option<AnimationFrames>> {
    let decoder = WebPDecoder::new(Cursor::new(bytes))?;
    if !decoder.has_animation() {
        return Ok(None);
    }
    let frames = collect_frames(decoder, max_pixels)?;
    Ok(Some((frames, webp_loop_count(bytes))))
}

/// Position just past the first occurrence of `marker`
fn find_after(bytes: &[u8], marker: &[u8]) -> Option<usize> {
    bytes
        .windows(marker.len())
        .position(|window| window == marker)
        .map(|start| start + marker.len())
}

fn read_u16_le(bytes: &[u8], at: usize) -> Option<u16> {
    bytes
        .get(at..at + 2)
        .and_then(|b| <[u8; 2]>::try_from(b).ok())
        .map(u16::from_le_bytes)
}

/// Loop count from the GIF `NETSCAPE2.0` application extension
pub fn gif_loop_count(bytes: &[u8]) -> Option<u16> {
    // Sub-block: size 3, id 1, little-endian count
    let start = find_after(bytes, b"NETSCAPE2.0")?;
    match bytes.get(start..start + 2) {
        Some([3, 1]) => read_u16_le(bytes, start + 2),
        _ => None,
    }
}

/// Loop count from the APNG `acTL` chunk, saturated to 16 bits
pub fn apng_loop_count(bytes: &[u8]) -> Option<u16> {
    // num_frames then num_plays, both big-endian
    let start = find_after(bytes, b"acTL")?;
    let plays = bytes
        .get(start + 4..start + 8)
        .and_then(|b| <[u8; 4]>::try_from(b).ok())
        .map(u32::from_be_bytes)?;
    Some(u16::try_from(plays).unwrap_or(u16::MAX))
}

/// Loop count from the WebP `ANIM` chunk
pub fn webp_loop_count(bytes: &[u8]) -> Option<u16> {
    // Chunk size, then a 4-byte background colour
    let start = find_after(bytes, b"ANIM")?;
    read_u16_le(bytes, start + 8)
}
