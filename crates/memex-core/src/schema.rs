use serde::{Deserialize, Serialize};
use std::fmt;

/// AI-provider request format, inferred from the request path.
///
/// Lives only for the duration of a single request; never persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SchemaType {
    #[default]
    Unknown,
    Anthropic,
    OpenAI,
}

impl SchemaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchemaType::Unknown => "Unknown",
            SchemaType::Anthropic => "Anthropic",
            SchemaType::OpenAI => "OpenAI",
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, SchemaType::Unknown)
    }
}

impl fmt::Display for SchemaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
