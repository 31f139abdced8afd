//! JSON envelope carried by the request layer around `caterise`
//!
//! Requests carry the image as base64 (optionally as a `data:` URL) in
//! `contents` and the block size in `patch_size`. Responses return the mosaic
//! as a `data:` URL with its format name and MIME type.

use crate::algorithm::executor::{FramePipeline, RequestContext};
use crate::index::NearestNeighborIndex;
use crate::io::configuration::DEFAULT_PATCH_SIZE;
use crate::io::error::{MosaicError, Result, invalid_request};
use crate::io::image::EncodedImage;
use base64::Engine as _;
use base64::alphabet;
use base64::engine::general_purpose::STANDARD;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::warn;

/// Standard alphabet, padding optional on decode
const LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Inbound mosaic request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MosaicRequest {
    /// Base64 image payload, with or without a `data:image/...;base64,` prefix
    pub contents: String,
    /// Block size in pixels, as a number or a decimal string
    #[serde(
        default = "default_patch_size",
        deserialize_with = "deserialize_patch_size"
    )]
    pub patch_size: u32,
}

const fn default_patch_size() -> u32 {
    DEFAULT_PATCH_SIZE
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PatchSizeField {
    Number(u32),
    Text(String),
}

fn deserialize_patch_size<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<u32, D::Error> {
    match PatchSizeField::deserialize(deserializer)? {
        PatchSizeField::Number(size) => Ok(size),
        PatchSizeField::Text(text) => text.trim().parse().map_err(|e| {
            serde::de::Error::custom(format!("patch_size '{text}' is not a block size: {e}"))
        }),
    }
}

/// Successful mosaic response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MosaicResponse {
    /// `data:image/<fmt>;charset=utf-8;base64,<payload>`
    pub contents: String,
    /// Upper-case format name of the payload
    pub filename: String,
    /// MIME type of the payload
    pub mime_type: String,
}

/// Failed request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Human-readable description
    pub message: String,
    /// Stable error class (see [`crate::io::error::ErrorKind::as_str`])
    pub kind: String,
}

impl From<&MosaicError> for ErrorResponse {
    fn from(err: &MosaicError) -> Self {
        Self {
            message: err.to_string(),
            kind: err.kind().as_str().to_string(),
        }
    }
}

impl MosaicResponse {
    /// Wrap an encoded mosaic
    pub fn from_image(image: &EncodedImage) -> Self {
        let name = image.format_name();
        Self {
            contents: format!(
                "data:image/{};charset=utf-8;base64,{}",
                name.to_lowercase(),
                STANDARD.encode(&image.bytes)
            ),
            filename: name,
            mime_type: image.mime_type().to_string(),
        }
    }
}

/// Decode request contents, stripping a `data:` URL prefix when present
///
/// Characters outside the base64 alphabet (line breaks, spaces) are skipped
/// and padding is optional.
///
/// # Errors
///
/// Returns an invalid request error if the payload is not valid base64.
pub fn decode_contents(contents: &str) -> Result<Vec<u8>> {
    let payload = contents.trim();
    let payload = if payload.starts_with("data:") {
        payload
            .split_once("base64,")
            .map_or(payload, |(_, data)| data)
    } else {
        payload
    };

    let cleaned: Vec<u8> = payload
        .bytes()
        .filter(|b| b.is_ascii_alphanumeric() || matches!(b, b'+' | b'/' | b'='))
        .collect();

    LENIENT
        .decode(cleaned)
        .map_err(|e| invalid_request(&format!("contents are not valid base64: {e}")))
}

/// Run one decoded request through the pipeline
///
/// # Errors
///
/// Returns an invalid request error for undecodable contents or any error
/// from [`FramePipeline::caterise_with`].
pub fn handle_request<I: NearestNeighborIndex + 'static>(
    pipeline: &FramePipeline<I>,
    request: &MosaicRequest,
    context: &RequestContext<'_>,
) -> Result<MosaicResponse> {
    let bytes = decode_contents(&request.contents)?;
    let image = pipeline.caterise_with(&bytes, request.patch_size, context)?;
    Ok(MosaicResponse::from_image(&image))
}

/// Handle a raw JSON request body and produce a JSON response body
///
/// Failures are reported in the body as an [`ErrorResponse`]; the returned
/// flag is `true` on success.
pub fn handle_json<I: NearestNeighborIndex + 'static>(
    pipeline: &FramePipeline<I>,
    body: &str,
    context: &RequestContext<'_>,
) -> (String, bool) {
    let outcome = serde_json::from_str::<MosaicRequest>(body)
        .map_err(|e| invalid_request(&format!("malformed request body: {e}")))
        .and_then(|request| handle_request(pipeline, &request, context));

    let (encoded, success) = match outcome {
        Ok(response) => (serde_json::to_string(&response), true),
        Err(err) => {
            warn!(kind = err.kind().as_str(), error = %err, "request failed");
            (serde_json::to_string(&ErrorResponse::from(&err)), false)
        }
    };

    match encoded {
        Ok(json) => (json, success),
        Err(_) => (
            r#"{"message":"response serialization failed","kind":"internal"}"#.to_string(),
            false,
        ),
    }
}
