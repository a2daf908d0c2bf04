// Base64 text transform shared by subscription parsing and batch output

use base64::Engine;
use base64::alphabet;
use base64::engine::general_purpose::STANDARD;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};

/// Subscriptions in the wild drop padding and leave stray trailing bits,
/// so decoding accepts both.
const LENIENT: GeneralPurposeConfig = GeneralPurposeConfig::new()
    .with_decode_padding_mode(DecodePaddingMode::Indifferent)
    .with_decode_allow_trailing_bits(true);

const STANDARD_LENIENT: GeneralPurpose = GeneralPurpose::new(&alphabet::STANDARD, LENIENT);
const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(&alphabet::URL_SAFE, LENIENT);

/// Decode base64 text (standard or URL-safe alphabet, padded or not).
///
/// ASCII whitespace anywhere in the input is ignored, so bodies wrapped at
/// 76 columns decode as a whole. Returns `None` when the input is not
/// base64 or the decoded bytes are not UTF-8.
pub fn decode_base64_text(input: &str) -> Option<String> {
    let compact: String = input
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();

    let bytes = STANDARD_LENIENT
        .decode(compact.as_bytes())
        .or_else(|_| URL_SAFE_LENIENT.decode(compact.as_bytes()))
        .ok()?;

    String::from_utf8(bytes).ok()
}

/// Encode text as padded standard base64, the inverse of [`decode_base64_text`].
pub fn encode_base64_text(text: &str) -> String {
    STANDARD.encode(text.as_bytes())
}
