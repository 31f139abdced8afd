//! Tests for decoding, the decode bomb guard, animation timing and encoding

#[cfg(test)]
mod tests {
    use crate::support::{checker_image, encode_apng, encode_gif, encode_png};
    use image::{ImageFormat, Rgb, RgbImage};
    use patchmosaic::io::configuration::MAX_IMAGE_PIXELS;
    use patchmosaic::io::error::{ErrorKind, MosaicError};
    use patchmosaic::io::image::{
        OutputFrame, animated_output_format, apng_loop_count, decode_image, encode_animation,
        encode_static, format_name, frame_duration, gif_loop_count, loop_count_or_default,
        webp_loop_count,
    };

    // Tests a static PNG decodes to one untimed frame
    // Verified by attaching the default delay to static frames
    #[test]
    fn test_decode_static_png() {
        let bytes = encode_png(&checker_image(12, 9, 4, 0));

        let source = decode_image(&bytes, MAX_IMAGE_PIXELS).expect("decode");

        assert_eq!(source.format, ImageFormat::Png);
        assert!(!source.is_animated());
        assert_eq!(source.frames.len(), 1);
        let frame = source.frames.first().expect("frame");
        assert_eq!((frame.image.width(), frame.image.height()), (12, 9));
        assert_eq!(frame.delay_ms, None);
        assert_eq!(source.loop_count, None);
    }

    // Tests GIF frames keep their delays and loop count
    // Verified by dropping the per-frame delay
    #[test]
    fn test_decode_gif_timing() {
        let frames = vec![checker_image(8, 8, 4, 0); 3];
        let bytes = encode_gif(&frames, &[100, 150, 100], 3);

        let source = decode_image(&bytes, MAX_IMAGE_PIXELS).expect("decode");

        assert!(source.is_animated());
        let delays: Vec<_> = source.frames.iter().map(|f| f.delay_ms).collect();
        assert_eq!(delays, vec![Some(100), Some(150), Some(100)]);
        assert_eq!(source.loop_count, Some(3));
    }

    // Tests declared dimensions over the budget are refused before decoding
    // Verified by checking the budget after decode
    #[test]
    fn test_decode_bomb_guard() {
        let bytes = encode_png(&RgbImage::from_pixel(64, 64, Rgb([1, 2, 3])));

        let error = decode_image(&bytes, 1_000).expect_err("over budget");

        assert!(matches!(
            error,
            MosaicError::DecodeBombGuard {
                width: 64,
                height: 64,
                limit: 1_000
            }
        ));
    }

    // Tests the cumulative frame budget for animations
    // Verified by checking only the first frame against the budget
    #[test]
    fn test_animation_total_pixels_guarded() {
        let frames = vec![checker_image(10, 10, 5, 0); 4];
        let bytes = encode_gif(&frames, &[50, 50, 50, 50], 0);

        let error = decode_image(&bytes, 250).expect_err("too many frame pixels");

        assert_eq!(error.kind(), ErrorKind::DecodeBombGuard);
    }

    // Tests empty and unrecognised payloads are caller errors
    // Verified by passing unknown formats to the codec
    #[test]
    fn test_rejects_unrecognised_payloads() {
        assert_eq!(
            decode_image(b"", MAX_IMAGE_PIXELS).expect_err("empty").kind(),
            ErrorKind::InvalidRequest
        );
        assert_eq!(
            decode_image(b"plain text, not pixels", MAX_IMAGE_PIXELS)
                .expect_err("text")
                .kind(),
            ErrorKind::InvalidRequest
        );
    }

    // Tests missing delays fall back to the default duration while explicit zeros stay
    // Verified by replacing zero delays with the default
    #[test]
    fn test_frame_duration_defaults() {
        assert_eq!(frame_duration(None), 200);
        assert_eq!(frame_duration(Some(0)), 0);
        assert_eq!(frame_duration(Some(40)), 40);
        assert_eq!(loop_count_or_default(None), 0);
        assert_eq!(loop_count_or_default(Some(5)), 5);
    }

    // Tests encoded animations carry frame delays and the loop count
    // Verified by encoding every frame with the default delay
    #[test]
    fn test_encode_animation_keeps_timing() {
        let frames: Vec<_> = [120, 80]
            .iter()
            .map(|&delay_ms| OutputFrame {
                image: checker_image(8, 8, 4, 0),
                delay_ms,
            })
            .collect();

        let encoded = encode_animation(&frames, 0, ImageFormat::Gif).expect("encode");

        assert_eq!(encoded.format, ImageFormat::Gif);
        assert_eq!(encoded.mime_type(), "image/gif");
        assert_eq!(gif_loop_count(&encoded.bytes), Some(0));
        let decoded = decode_image(&encoded.bytes, MAX_IMAGE_PIXELS).expect("decode output");
        let delays: Vec<_> = decoded.frames.iter().map(|f| f.delay_ms).collect();
        assert_eq!(delays, vec![Some(120), Some(80)]);
    }

    // Tests zero GIF delays survive a decode and encode cycle
    // Verified by substituting the default for zero delays
    #[test]
    fn test_zero_gif_delays_are_kept() {
        let frames = vec![checker_image(8, 8, 4, 0); 2];
        let source =
            decode_image(&encode_gif(&frames, &[0, 0], 0), MAX_IMAGE_PIXELS).expect("decode");
        let outputs: Vec<_> = source
            .frames
            .iter()
            .map(|frame| OutputFrame {
                image: frame.image.to_rgb8(),
                delay_ms: frame_duration(frame.delay_ms),
            })
            .collect();

        let encoded = encode_animation(&outputs, 0, ImageFormat::Gif).expect("encode");

        let decoded = decode_image(&encoded.bytes, MAX_IMAGE_PIXELS).expect("decode output");
        let delays: Vec<_> = decoded.frames.iter().map(|f| f.delay_ms).collect();
        assert_eq!(delays, vec![Some(0), Some(0)]);
    }

    // Tests APNG sources decode with timing and re-encode as APNG
    // Verified by encoding every animation as GIF
    #[test]
    fn test_apng_round_trip() {
        let frames = vec![checker_image(8, 8, 4, 0); 3];
        let bytes = encode_apng(&frames, &[100, 150, 100], 2);

        let source = decode_image(&bytes, MAX_IMAGE_PIXELS).expect("decode");
        assert_eq!(source.format, ImageFormat::Png);
        assert!(source.is_animated());
        assert_eq!(source.loop_count, Some(2));
        let outputs: Vec<_> = source
            .frames
            .iter()
            .map(|frame| OutputFrame {
                image: frame.image.to_rgb8(),
                delay_ms: frame_duration(frame.delay_ms),
            })
            .collect();

        let encoded = encode_animation(&outputs, 2, source.format).expect("encode");

        assert_eq!(encoded.format, ImageFormat::Png);
        assert_eq!(encoded.mime_type(), "image/png");
        assert_eq!(apng_loop_count(&encoded.bytes), Some(2));
        let decoded = decode_image(&encoded.bytes, MAX_IMAGE_PIXELS).expect("decode output");
        let delays: Vec<_> = decoded.frames.iter().map(|f| f.delay_ms).collect();
        assert_eq!(delays, vec![Some(100), Some(150), Some(100)]);
    }

    // Tests which format each animated source is written back in
    // Verified by mapping APNG sources to GIF
    #[test]
    fn test_animated_output_format() {
        assert_eq!(animated_output_format(ImageFormat::Png), Some(ImageFormat::Png));
        assert_eq!(animated_output_format(ImageFormat::Gif), Some(ImageFormat::Gif));
        assert_eq!(animated_output_format(ImageFormat::WebP), Some(ImageFormat::Gif));
        assert_eq!(animated_output_format(ImageFormat::Jpeg), None);
    }

    // Tests APNG frames of different sizes are refused
    // Verified by writing each frame with its own dimensions
    #[test]
    fn test_apng_rejects_mixed_frame_sizes() {
        let frames = [
            OutputFrame {
                image: checker_image(8, 8, 4, 0),
                delay_ms: 100,
            },
            OutputFrame {
                image: checker_image(4, 8, 4, 0),
                delay_ms: 100,
            },
        ];

        let error = encode_animation(&frames, 0, ImageFormat::Png).expect_err("mixed sizes");

        assert!(matches!(
            error,
            MosaicError::ImageEncode {
                format: ImageFormat::Png,
                ..
            }
        ));
    }

    // Tests a static frame is encoded in the requested format
    // Verified by always encoding PNG
    #[test]
    fn test_encode_static_format() {
        let encoded =
            encode_static(&checker_image(8, 8, 4, 0), ImageFormat::Jpeg).expect("encode");

        assert_eq!(encoded.format, ImageFormat::Jpeg);
        assert_eq!(encoded.format_name(), "JPEG");
        assert_eq!(encoded.mime_type(), "image/jpeg");
        assert_eq!(format_name(ImageFormat::Gif), "GIF");
    }

    // Tests the loop count scanners on hand-built headers
    // Verified by reading the APNG count little-endian
    #[test]
    fn test_loop_count_scanners() {
        let mut gif = b"GIF89a....!\xff\x0bNETSCAPE2.0".to_vec();
        gif.extend_from_slice(&[3, 1, 7, 0, 0]);
        assert_eq!(gif_loop_count(&gif), Some(7));
        assert_eq!(gif_loop_count(b"GIF89a without extension"), None);

        let mut png = b"\x89PNG....acTL".to_vec();
        png.extend_from_slice(&[0, 0, 0, 4, 0, 0, 0, 2]);
        assert_eq!(apng_loop_count(&png), Some(2));
        let mut huge = b"acTL".to_vec();
        huge.extend_from_slice(&[0, 0, 0, 1, 0, 1, 0, 0]);
        assert_eq!(apng_loop_count(&huge), Some(u16::MAX));

        let mut webp = b"RIFF....WEBPANIM".to_vec();
        webp.extend_from_slice(&[6, 0, 0, 0, 0, 0, 0, 0, 9, 0]);
        assert_eq!(webp_loop_count(&webp), Some(9));
    }
}
