//! Tests for the JSON request envelope

#[cfg(test)]
mod tests {
    use crate::support::{CountingProvisioner, checker_image, encode_png};
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use image::ImageFormat;
    use patchmosaic::algorithm::cache::IndexCache;
    use patchmosaic::algorithm::executor::{FramePipeline, RequestContext};
    use patchmosaic::index::{ExactIndex, LevelProvisioner};
    use patchmosaic::io::configuration::MAX_IMAGE_PIXELS;
    use patchmosaic::io::envelope::{
        ErrorResponse, MosaicRequest, MosaicResponse, decode_contents, handle_json,
        handle_request,
    };
    use patchmosaic::io::image::EncodedImage;
    use std::sync::Arc;
    use std::time::Duration;

    fn pipeline() -> FramePipeline<ExactIndex> {
        let provisioner: Arc<dyn LevelProvisioner<ExactIndex>> =
            Arc::new(CountingProvisioner::new(Duration::ZERO));
        FramePipeline::new(Arc::new(IndexCache::new(&[4], provisioner)), MAX_IMAGE_PIXELS)
    }

    // Tests contents decode with and without a data URL prefix
    // Verified by decoding the prefix as base64
    #[test]
    fn test_decode_contents_prefixes() {
        let encoded = STANDARD.encode(b"pixels");

        assert_eq!(decode_contents(&encoded).expect("plain"), b"pixels");
        assert_eq!(
            decode_contents(&format!("data:image/png;base64,{encoded}")).expect("data url"),
            b"pixels"
        );
        assert!(decode_contents("%%% not base64").is_err());
    }

    // Tests patch_size defaults when absent from the request body
    // Verified by removing the serde default
    #[test]
    fn test_request_default_patch_size() {
        let request: MosaicRequest =
            serde_json::from_str(r#"{"contents":"AAAA"}"#).expect("parse");

        assert_eq!(request.patch_size, 32);
    }

    // Tests unpadded and line-wrapped payloads still decode
    // Verified by decoding with the strict standard engine
    #[test]
    fn test_decode_contents_is_lenient() {
        assert_eq!(STANDARD.encode(b"pixel"), "cGl4ZWw=");

        assert_eq!(decode_contents("cGl4ZWw").expect("unpadded"), b"pixel");
        assert_eq!(decode_contents("cGl4\r\nZWw=\n").expect("wrapped"), b"pixel");
        assert!(decode_contents("abcde").is_err());
    }

    // Tests patch_size accepts a decimal string as well as a number
    // Verified by deserializing patch_size as a plain integer
    #[test]
    fn test_request_patch_size_as_text() {
        let request: MosaicRequest =
            serde_json::from_str(r#"{"contents":"AAAA","patch_size":" 16 "}"#).expect("parse");
        assert_eq!(request.patch_size, 16);

        let request: MosaicRequest =
            serde_json::from_str(r#"{"contents":"AAAA","patch_size":8}"#).expect("parse");
        assert_eq!(request.patch_size, 8);

        assert!(
            serde_json::from_str::<MosaicRequest>(r#"{"contents":"AAAA","patch_size":"big"}"#)
                .is_err()
        );
    }

    // Tests the response data URL and format metadata
    // Verified by using the upper-case name in the data URL
    #[test]
    fn test_response_from_image() {
        let response = MosaicResponse::from_image(&EncodedImage {
            bytes: vec![1, 2, 3],
            format: ImageFormat::Gif,
        });

        assert_eq!(response.contents, "data:image/gif;charset=utf-8;base64,AQID");
        assert_eq!(response.filename, "GIF");
        assert_eq!(response.mime_type, "image/gif");
    }

    // Tests a full request produces a decodable mosaic
    // Verified by returning the source bytes unchanged
    #[test]
    fn test_handle_request_round_trip() {
        let pipeline = pipeline();
        let request = MosaicRequest {
            contents: STANDARD.encode(encode_png(&checker_image(9, 9, 4, 0))),
            patch_size: 4,
        };

        let response =
            handle_request(&pipeline, &request, &RequestContext::new()).expect("response");

        assert_eq!(response.filename, "PNG");
        let bytes = decode_contents(&response.contents).expect("payload");
        let image = image::load_from_memory(&bytes).expect("mosaic");
        assert_eq!((image.width(), image.height()), (8, 8));
    }

    // Tests failures are reported in the body with their kind
    // Verified by returning success for malformed bodies
    #[test]
    fn test_handle_json_errors() {
        let pipeline = pipeline();

        let (body, ok) = handle_json(&pipeline, "{not json", &RequestContext::new());
        assert!(!ok);
        let error: ErrorResponse = serde_json::from_str(&body).expect("error body");
        assert_eq!(error.kind, "invalid_request");

        let request = format!(r#"{{"contents":"{}","patch_size":7}}"#, STANDARD.encode(b"x"));
        let (body, ok) = handle_json(&pipeline, &request, &RequestContext::new());
        assert!(!ok);
        let error: ErrorResponse = serde_json::from_str(&body).expect("error body");
        assert_eq!(error.kind, "invalid_request");
        assert!(error.message.contains('7'));
    }
}
