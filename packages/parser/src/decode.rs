//! Body decoding with a fixed encoding fallback chain.
//!
//! The fixed-station feed does not reliably declare its charset. Bodies are
//! tried as UTF-8 (BOM stripped), then Big5, then GB2312 (decoded with the
//! GBK superset). If none decodes cleanly the UTF-8 lossy form is used, so
//! decoding never fails.

use encoding_rs::{BIG5, Encoding, GBK};

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Legacy encodings tried after UTF-8, in order.
pub const LEGACY_ENCODINGS: &[&Encoding] = &[BIG5, GBK];

/// A decoded response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded {
    pub text: String,
    /// Name of the encoding that succeeded (e.g. `"UTF-8"`, `"Big5"`).
    pub encoding: &'static str,
    /// `true` if undecodable bytes were replaced with U+FFFD.
    pub lossy: bool,
}

/// Decodes `bytes` with the fallback chain described in the module docs.
#[must_use]
pub fn decode_body(bytes: &[u8]) -> Decoded {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);

    if let Ok(text) = std::str::from_utf8(bytes) {
        return Decoded {
            text: text.to_owned(),
            encoding: encoding_rs::UTF_8.name(),
            lossy: false,
        };
    }

    for encoding in LEGACY_ENCODINGS {
        if let Some(text) = decode_as(bytes, encoding) {
            log::debug!("Decoded response body as {}", encoding.name());
            return Decoded {
                text,
                encoding: encoding.name(),
                lossy: false,
            };
        }
    }

    log::warn!("Used fallback encoding with character replacement");
    Decoded {
        text: String::from_utf8_lossy(bytes).into_owned(),
        encoding: encoding_rs::UTF_8.name(),
        lossy: true,
    }
}

/// Strictly decodes `bytes` as `encoding`, returning `None` on any
/// malformed sequence.
#[must_use]
pub fn decode_as(bytes: &[u8], encoding: &'static Encoding) -> Option<String> {
    encoding
        .decode_without_bom_handling_and_without_replacement(bytes)
        .map(std::borrow::Cow::into_owned)
}
