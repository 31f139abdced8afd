//! NumPy `.npy` reader and writer for unsigned byte arrays
//!
//! Patch libraries are stored as C-ordered `uint8` arrays of shape
//! `(N, level, level, 3)`. Only that element type is supported; anything else
//! is rejected rather than converted.

use std::fmt;

const MAGIC: &[u8; 6] = b"\x93NUMPY";
const HEADER_ALIGNMENT: usize = 64;

/// Reasons a `.npy` payload cannot be used
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NpyError {
    /// Payload does not start with the `.npy` magic string
    BadMagic,
    /// Format major version other than 1, 2 or 3
    UnsupportedVersion(u8),
    /// Header dictionary is missing or malformed
    Header(String),
    /// Element type other than unsigned bytes
    UnsupportedDtype(String),
    /// Column-major arrays are not supported
    FortranOrder,
    /// Data section is shorter than the declared shape requires
    Truncated {
        /// Bytes required by the shape
        expected: usize,
        /// Bytes present after the header
        received: usize,
    },
}

impl fmt::Display for NpyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadMagic => write!(f, "not an .npy payload"),
            Self::UnsupportedVersion(major) => write!(f, "unsupported .npy version {major}"),
            Self::Header(reason) => write!(f, "malformed .npy header: {reason}"),
            Self::UnsupportedDtype(dtype) => write!(f, "unsupported element type '{dtype}'"),
            Self::FortranOrder => write!(f, "column-major arrays are not supported"),
            Self::Truncated { expected, received } => {
                write!(f, "array data truncated ({received} of {expected} bytes)")
            }
        }
    }
}

impl std::error::Error for NpyError {}

/// A decoded C-ordered byte array
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NpyArray {
    /// Array dimensions, outermost first
    pub shape: Vec<usize>,
    /// Elements in row-major order
    pub data: Vec<u8>,
}

/// Decode a `.npy` payload holding `uint8` elements
///
/// # Errors
///
/// Returns an [`NpyError`] if the magic, version, header or element type is
/// unsupported, or the data section is shorter than the shape requires.
/// Trailing bytes beyond the declared shape are ignored.
pub fn decode_npy(bytes: &[u8]) -> Result<NpyArray, NpyError> {
    if bytes.get(..MAGIC.len()) != Some(MAGIC.as_slice()) {
        return Err(NpyError::BadMagic);
    }

    let major = bytes
        .get(6)
        .copied()
        .ok_or_else(|| NpyError::Header("missing version".to_string()))?;
    let (header_len, header_start) = match major {
        1 => {
            let len = bytes
                .get(8..10)
                .and_then(|b| <[u8; 2]>::try_from(b).ok())
                .map(|b| u16::from_le_bytes(b) as usize)
                .ok_or_else(|| NpyError::Header("missing header length".to_string()))?;
            (len, 10)
        }
        2 | 3 => {
            let len = bytes
                .get(8..12)
                .and_then(|b| <[u8; 4]>::try_from(b).ok())
                .map(|b| u32::from_le_bytes(b) as usize)
                .ok_or_else(|| NpyError::Header("missing header length".to_string()))?;
            (len, 12)
        }
        other => return Err(NpyError::UnsupportedVersion(other)),
    };

    let header_bytes = bytes
        .get(header_start..header_start + header_len)
        .ok_or_else(|| NpyError::Header("header extends past end of payload".to_string()))?;
    let header = std::str::from_utf8(header_bytes)
        .map_err(|e| NpyError::Header(e.to_string()))?;

    let dtype = quoted_value(header, "descr")?;
    if !matches!(dtype.as_str(), "|u1" | "<u1" | ">u1" | "u1") {
        return Err(NpyError::UnsupportedDtype(dtype));
    }
    if raw_value(header, "fortran_order")?.starts_with("True") {
        return Err(NpyError::FortranOrder);
    }
    let shape = parse_shape(header)?;

    let expected = shape.iter().product::<usize>();
    let data = bytes.get(header_start + header_len..).unwrap_or(&[]);
    if data.len() < expected {
        return Err(NpyError::Truncated {
            expected,
            received: data.len(),
        });
    }

    Ok(NpyArray {
        shape,
        data: data.get(..expected).unwrap_or(&[]).to_vec(),
    })
}

/// Encode a C-ordered `uint8` array as a version 1.0 `.npy` payload
pub fn encode_npy(shape: &[usize], data: &[u8]) -> Vec<u8> {
    let dims = match shape {
        [single] => format!("({single},)"),
        _ => format!(
            "({})",
            shape
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        ),
    };
    let mut header = format!("{{'descr': '|u1', 'fortran_order': False, 'shape': {dims}, }}");

    // Pad so the data section starts on an aligned offset; the header ends in a newline
    let unpadded = MAGIC.len() + 2 + 2 + header.len() + 1;
    let padding = (HEADER_ALIGNMENT - unpadded % HEADER_ALIGNMENT) % HEADER_ALIGNMENT;
    header.push_str(&" ".repeat(padding));
    header.push('\n');

    let mut out = Vec::with_capacity(MAGIC.len() + 4 + header.len() + data.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&[1, 0]);
    out.extend_from_slice(&(header.len() as u16).to_le_bytes());
    out.extend_from_slice(header.as_bytes());
    out.extend_from_slice(data);
    out
}

fn raw_value<'a>(header: &'a str, key: &str) -> Result<&'a str, NpyError> {
    let needle = format!("'{key}':");
    let start = header
        .find(&needle)
        .ok_or_else(|| NpyError::Header(format!("missing '{key}'")))?;
    Ok(header.get(start + needle.len()..).unwrap_or("").trim_start())
}

fn quoted_value(header: &str, key: &str) -> Result<String, NpyError> {
    let rest = raw_value(header, key)?;
    let quote = rest
        .chars()
        .next()
        .filter(|c| *c == '\'' || *c == '"')
        .ok_or_else(|| NpyError::Header(format!("'{key}' is not a string")))?;
    let body = rest.get(1..).unwrap_or("");
    let end = body
        .find(quote)
        .ok_or_else(|| NpyError::Header(format!("unterminated '{key}'")))?;
    Ok(body.get(..end).unwrap_or("").to_string())
}

fn parse_shape(header: &str) -> Result<Vec<usize>, NpyError> {
    let rest = raw_value(header, "shape")?;
    let inner = rest
        .strip_prefix('(')
        .and_then(|r| r.find(')').and_then(|end| r.get(..end)))
        .ok_or_else(|| NpyError::Header("shape is not a tuple".to_string()))?;

    inner
        .split(',')
        .map(str::trim)
        .filter(|dim| !dim.is_empty())
        .map(|dim| {
            dim.trim_end_matches('L')
                .parse::<usize>()
                .map_err(|e| NpyError::Header(format!("shape entry '{dim}': {e}")))
        })
        .collect()
}
