use memex_core::SchemaType;

const ANTHROPIC_SUFFIX: &str = "/v1/messages";
const OPENAI_SUFFIX: &str = "/v1/chat/completions";

/// Classifies a request path by provider API shape.
///
/// Matching is a case-sensitive suffix check, so gateway prefixes such as
/// `/anthropic/v1/messages` still classify.
#[derive(Debug, Clone, Copy, Default)]
pub struct SchemaDetector;

impl SchemaDetector {
    pub fn new() -> Self {
        Self
    }

    pub fn detect(&self, path: &str) -> SchemaType {
        if path.ends_with(ANTHROPIC_SUFFIX) {
            SchemaType::Anthropic
        } else if path.ends_with(OPENAI_SUFFIX) {
            SchemaType::OpenAI
        } else {
            SchemaType::Unknown
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect() {
        let detector = SchemaDetector::new();
        let cases = [
            ("/v1/messages", SchemaType::Anthropic),
            ("/anthropic/v1/messages", SchemaType::Anthropic),
            ("/v1/chat/completions", SchemaType::OpenAI),
            ("/openai/v1/chat/completions", SchemaType::OpenAI),
            ("/", SchemaType::Unknown),
            ("", SchemaType::Unknown),
            ("/v1/models", SchemaType::Unknown),
            ("/v1/messages/count_tokens", SchemaType::Unknown),
            ("/V1/MESSAGES", SchemaType::Unknown),
        ];
        for (path, expected) in cases {
            assert_eq!(detector.detect(path), expected, "path {path:?}");
        }
    }
}
