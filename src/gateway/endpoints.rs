use std::fmt;

use crate::error::GatewayError;
use crate::util::normalize_endpoint;

/// Every endpoint the gateway knows how to serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    GetModels,
    NextEditLoc,
    Completion,
    ChatInputCompletion,
    Edit,
    Chat,
    ChatStream,
    NextEditStream,
    PromptEnhancer,
    InstructionStream,
    SmartPasteStream,
    GenerateCommitMessageStream,
    GenerateConversationTitle,
}

impl Endpoint {
    pub const ALL: [Endpoint; 13] = [
        Endpoint::GetModels,
        Endpoint::NextEditLoc,
        Endpoint::Completion,
        Endpoint::ChatInputCompletion,
        Endpoint::Edit,
        Endpoint::Chat,
        Endpoint::ChatStream,
        Endpoint::NextEditStream,
        Endpoint::PromptEnhancer,
        Endpoint::InstructionStream,
        Endpoint::SmartPasteStream,
        Endpoint::GenerateCommitMessageStream,
        Endpoint::GenerateConversationTitle,
    ];

    /// Parse a raw endpoint name; leading slashes and whitespace are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::UnimplementedEndpoint`] for names outside the catalogue.
    pub fn parse(raw: &str) -> Result<Self, GatewayError> {
        let name = normalize_endpoint(raw);
        Self::ALL
            .into_iter()
            .find(|endpoint| endpoint.as_str() == name)
            .ok_or(GatewayError::UnimplementedEndpoint(name))
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Endpoint::GetModels => "get-models",
            Endpoint::NextEditLoc => "next_edit_loc",
            Endpoint::Completion => "completion",
            Endpoint::ChatInputCompletion => "chat-input-completion",
            Endpoint::Edit => "edit",
            Endpoint::Chat => "chat",
            Endpoint::ChatStream => "chat-stream",
            Endpoint::NextEditStream => "next-edit-stream",
            Endpoint::PromptEnhancer => "prompt-enhancer",
            Endpoint::InstructionStream => "instruction-stream",
            Endpoint::SmartPasteStream => "smart-paste-stream",
            Endpoint::GenerateCommitMessageStream => "generate-commit-message-stream",
            Endpoint::GenerateConversationTitle => "generate-conversation-title",
        }
    }

    /// Served by `Gateway::stream` rather than `Gateway::complete`.
    #[must_use]
    pub fn is_stream(self) -> bool {
        matches!(
            self,
            Endpoint::ChatStream
                | Endpoint::NextEditStream
                | Endpoint::PromptEnhancer
                | Endpoint::InstructionStream
                | Endpoint::SmartPasteStream
                | Endpoint::GenerateCommitMessageStream
                | Endpoint::GenerateConversationTitle
        )
    }

    /// Chat endpoints replay history and structured nodes; the rest get a
    /// single flattened user prompt.
    #[must_use]
    pub fn is_chat(self) -> bool {
        matches!(self, Endpoint::Chat | Endpoint::ChatStream)
    }

    /// Auxiliary streams whose chunks carry only `{text}`.
    #[must_use]
    pub fn emits_bare_text(self) -> bool {
        matches!(self, Endpoint::InstructionStream | Endpoint::SmartPasteStream)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_strips_slashes() {
        assert_eq!(Endpoint::parse("/chat-stream").unwrap(), Endpoint::ChatStream);
        assert_eq!(Endpoint::parse("  //next_edit_loc ").unwrap(), Endpoint::NextEditLoc);
    }

    #[test]
    fn test_unknown_endpoint_is_unimplemented() {
        let err = Endpoint::parse("/find-missing").unwrap_err();
        assert!(matches!(err, GatewayError::UnimplementedEndpoint(ref name) if name == "find-missing"));
    }

    #[test]
    fn test_names_round_trip_through_parse() {
        for endpoint in Endpoint::ALL {
            assert_eq!(Endpoint::parse(endpoint.as_str()).unwrap(), endpoint);
        }
        assert_eq!(Endpoint::ALL.iter().filter(|e| e.is_stream()).count(), 7);
    }
}
