//! Request and streamed-response payloads for the Gemini-style
//! `streamGenerateContent` endpoint.

use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Part {
    pub text: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    pub parts: Vec<Part>,
}

impl Content {
    pub fn turn(role: &str, text: impl Into<String>) -> Self {
        Self {
            role: Some(role.to_string()),
            parts: vec![Part { text: text.into() }],
        }
    }

    /// System instructions carry parts only; the endpoint rejects a role.
    pub fn instruction(text: impl Into<String>) -> Self {
        Self {
            role: None,
            parts: vec![Part { text: text.into() }],
        }
    }
}

#[derive(Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GoogleSearch {}

#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolDeclaration {
    pub google_search: GoogleSearch,
}

impl ToolDeclaration {
    pub fn web_search() -> Self {
        Self {
            google_search: GoogleSearch::default(),
        }
    }
}

#[derive(Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ThinkingConfig {
    pub thinking_budget: u32,
}

#[derive(Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking_config: Option<ThinkingConfig>,
}

#[derive(Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    pub contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDeclaration>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<GenerationConfig>,
}

/// One SSE fragment of a streamed reply. Fields the engine does not consume
/// are left to serde's unknown-field handling.
#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct StreamFragment {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    #[serde(default)]
    pub content: Option<FragmentContent>,
    #[serde(default)]
    pub grounding_metadata: Option<GroundingMetadata>,
}

#[derive(Deserialize, Debug, Default)]
pub struct FragmentContent {
    #[serde(default)]
    pub parts: Vec<FragmentPart>,
}

#[derive(Deserialize, Debug, Default)]
pub struct FragmentPart {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub thought: Option<bool>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct GroundingMetadata {
    #[serde(default)]
    pub grounding_chunks: Vec<GroundingChunk>,
}

#[derive(Deserialize, Debug, Default)]
pub struct GroundingChunk {
    #[serde(default)]
    pub web: Option<WebSource>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct WebSource {
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

impl StreamFragment {
    /// Concatenated answer text carried by this fragment, excluding thought
    /// parts. `None` when the fragment carried no text.
    pub fn reply_text(&self) -> Option<String> {
        let text: String = self
            .candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter(|part| !part.thought.unwrap_or(false))
                    .filter_map(|part| part.text.as_deref())
                    .collect()
            })
            .unwrap_or_default();
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }

    /// Thought-summary text, kept separate from the reply.
    pub fn thought_text(&self) -> Option<String> {
        let text: String = self
            .candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter(|part| part.thought.unwrap_or(false))
                    .filter_map(|part| part.text.as_deref())
                    .collect()
            })
            .unwrap_or_default();
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }

    /// Web citations carried by this fragment. Entries missing a uri or a
    /// title are dropped, matching what the transcript can render.
    pub fn web_sources(&self) -> Vec<WebSource> {
        self.candidates
            .first()
            .and_then(|c| c.grounding_metadata.as_ref())
            .map(|metadata| {
                metadata
                    .grounding_chunks
                    .iter()
                    .filter_map(|chunk| chunk.web.clone())
                    .filter(|web| web.uri.is_some() && web.title.is_some())
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serializes_camel_case_and_omits_absent_fields() {
        let request = GenerateRequest {
            contents: vec![Content::turn("user", "hello")],
            system_instruction: Some(Content::instruction("be brief")),
            tools: None,
            generation_config: Some(GenerationConfig {
                thinking_config: Some(ThinkingConfig {
                    thinking_budget: 4096,
                }),
            }),
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["contents"][0]["role"], "user");
        assert_eq!(json["systemInstruction"]["parts"][0]["text"], "be brief");
        assert!(json["systemInstruction"].get("role").is_none());
        assert!(json.get("tools").is_none());
        assert_eq!(
            json["generationConfig"]["thinkingConfig"]["thinkingBudget"],
            4096
        );
    }

    #[test]
    fn search_tool_serializes_as_google_search() {
        let json = serde_json::to_value(vec![ToolDeclaration::web_search()]).unwrap();
        assert!(json[0]["googleSearch"].is_object());
    }

    #[test]
    fn fragment_text_concatenates_non_thought_parts() {
        let fragment: StreamFragment = serde_json::from_str(
            r#"{"candidates":[{"content":{"parts":[
                {"text":"Hel"},
                {"text":"internal","thought":true},
                {"text":"lo"}
            ]}}]}"#,
        )
        .unwrap();

        assert_eq!(fragment.reply_text().as_deref(), Some("Hello"));
        assert_eq!(fragment.thought_text().as_deref(), Some("internal"));
    }

    #[test]
    fn fragment_without_text_yields_none() {
        let fragment: StreamFragment =
            serde_json::from_str(r#"{"candidates":[{"content":{"parts":[]}}]}"#).unwrap();
        assert_eq!(fragment.reply_text(), None);

        let empty: StreamFragment = serde_json::from_str(r#"{}"#).unwrap();
        assert_eq!(empty.reply_text(), None);
    }

    #[test]
    fn web_sources_drop_incomplete_entries() {
        let fragment: StreamFragment = serde_json::from_str(
            r#"{"candidates":[{"groundingMetadata":{"groundingChunks":[
                {"web":{"uri":"https://a.example","title":"A"}},
                {"web":{"uri":"https://b.example"}},
                {"web":{"title":"no uri"}},
                {}
            ]}}]}"#,
        )
        .unwrap();

        let sources = fragment.web_sources();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].uri.as_deref(), Some("https://a.example"));
        assert_eq!(sources[0].title.as_deref(), Some("A"));
    }

    #[test]
    fn unknown_fragment_fields_are_tolerated() {
        let fragment: StreamFragment = serde_json::from_str(
            r#"{"candidates":[{"content":{"parts":[{"text":"ok"}],"role":"model"},
                "finishReason":"STOP","index":0}],
                "usageMetadata":{"promptTokenCount":3}}"#,
        )
        .unwrap();
        assert_eq!(fragment.reply_text().as_deref(), Some("ok"));
    }
}
