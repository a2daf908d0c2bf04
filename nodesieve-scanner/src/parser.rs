use crate::codec::decode_base64_text;
use crate::descriptor::NodeDescriptor;

/// The decoded text of one subscription document.
///
/// Bodies that decode as base64 text are stored decoded; anything else is
/// kept as-is and treated as line-oriented text.
#[derive(Debug, Clone)]
pub struct Subscription {
    text: String,
    encoded: bool,
}

impl Subscription {
    pub fn parse(body: &str) -> Self {
        match decode_base64_text(body) {
            Some(text) => Self {
                text,
                encoded: true,
            },
            None => Self {
                text: body.to_string(),
                encoded: false,
            },
        }
    }

    /// Whether the body was base64 encoded
    pub fn was_encoded(&self) -> bool {
        self.encoded
    }

    /// Iterate the supported node lines. Each call starts over from the
    /// first line.
    pub fn descriptors(&self) -> impl Iterator<Item = NodeDescriptor> + '_ {
        self.text
            .lines()
            .map(str::trim)
            .filter_map(NodeDescriptor::parse)
    }
}
