// Copyright (c) 2025 Chetan Conikee <conikee@gmail.com>
// Licensed under the MIT License

//! Canonical message and content-block types, and normalization of legacy
//! message shapes into the canonical form.
//!
//! A [`Message`] is a role-tagged enum, but the tag alone does not rule out
//! a user message carrying a tool-use block — `content` is the same
//! `Vec<ContentBlock>` on every variant. That constraint, along with
//! non-empty trimmed text and a plain-object parameters map, is enforced
//! only at runtime by [`Message::validate`], which the write path must
//! call before a message reaches the Store.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ForestError, Result};

/// A single block of message content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ContentBlock {
    /// Plain text content.
    Text {
        /// The text itself.
        text: String,
    },
    /// A tool invocation requested by the model.
    ToolUse {
        /// The id correlating this invocation with its eventual result.
        id: String,
        /// The tool name.
        name: String,
        /// The tool's arguments, as a plain JSON object.
        parameters: Map<String, Value>,
    },
}

impl ContentBlock {
    /// Returns `true` if this block is [`ContentBlock::Text`].
    #[must_use]
    pub fn is_text(&self) -> bool {
        matches!(self, Self::Text { .. })
    }

    /// Returns `true` if this block is [`ContentBlock::ToolUse`].
    #[must_use]
    pub fn is_tool_use(&self) -> bool {
        matches!(self, Self::ToolUse { .. })
    }

    /// Returns the text of a [`ContentBlock::Text`] block, if this is one.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            Self::ToolUse { .. } => None,
        }
    }

    fn validate(&self, context: &str) -> Result<()> {
        match self {
            Self::Text { text } => {
                if text.trim().is_empty() {
                    return Err(ForestError::empty_content(context));
                }
            }
            Self::ToolUse { id, name, .. } => {
                if id.trim().is_empty() || name.trim().is_empty() {
                    return Err(ForestError::empty_content(format!(
                        "{context} (tool-use id/name)"
                    )));
                }
            }
        }
        Ok(())
    }
}

/// A canonical message, tagged by role.
///
/// Each variant constrains, at the type level, which content blocks it may
/// carry: only assistant messages may contain [`ContentBlock::ToolUse`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Message {
    /// A message authored by the human user. Text only.
    User {
        /// The message's content blocks; never empty.
        content: Vec<ContentBlock>,
    },
    /// A message authored by the model. Text and/or tool-use blocks.
    Assistant {
        /// The message's content blocks; never empty.
        content: Vec<ContentBlock>,
    },
    /// The result of executing a tool the model requested.
    Tool {
        /// The id of the [`ContentBlock::ToolUse`] this result answers.
        tool_call_id: String,
        /// The message's content blocks; never empty, text only.
        content: Vec<ContentBlock>,
    },
}

impl Message {
    /// Returns this message's content blocks.
    #[must_use]
    pub fn content(&self) -> &[ContentBlock] {
        match self {
            Self::User { content } | Self::Assistant { content } | Self::Tool { content, .. } => {
                content
            }
        }
    }

    /// Returns the tool-use blocks in this message, in declaration order.
    #[must_use]
    pub fn tool_uses(&self) -> Vec<&ContentBlock> {
        self.content()
            .iter()
            .filter(|b| b.is_tool_use())
            .collect()
    }

    /// Checks every invariant of the message model, failing loudly on the
    /// first violation found.
    pub fn validate(&self) -> Result<()> {
        let context = match self {
            Self::User { .. } => "user message",
            Self::Assistant { .. } => "assistant message",
            Self::Tool { .. } => "tool message",
        };
        if self.content().is_empty() {
            return Err(ForestError::empty_content(context));
        }
        match self {
            Self::User { content } => {
                for block in content {
                    if !block.is_text() {
                        return Err(ForestError::empty_content(format!(
                            "{context}: user content must be text-only"
                        )));
                    }
                    block.validate(context)?;
                }
            }
            Self::Tool { tool_call_id, content } => {
                if tool_call_id.trim().is_empty() {
                    return Err(ForestError::empty_content(format!(
                        "{context}: tool_call_id must be non-empty"
                    )));
                }
                for block in content {
                    if !block.is_text() {
                        return Err(ForestError::empty_content(format!(
                            "{context}: tool content must be text-only"
                        )));
                    }
                    block.validate(context)?;
                }
            }
            Self::Assistant { content } => {
                for block in content {
                    block.validate(context)?;
                }
            }
        }
        Ok(())
    }

    /// Returns `true` if this message satisfies every invariant.
    #[must_use]
    pub fn is_canonical(&self) -> bool {
        self.validate().is_ok()
    }
}

/// A single legacy tool call, as carried by pre-V2 assistant messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegacyToolCall {
    /// The tool call's correlation id.
    pub id: String,
    /// The tool name.
    pub name: String,
    /// The arguments, JSON-encoded as a string (legacy wire shape).
    pub arguments: String,
}

/// An input to [`normalize`]: either an already-canonical message, or one
/// of the legacy single-string-content shapes this engine migrates forward.
///
/// This type is constructed by callers that already know which shape they
/// hold (a provider SDK's response type, a pre-V2 stored record, and so on);
/// it deliberately has no `Deserialize` impl of its own; callers that need
/// to parse an external wire shape into it should do so explicitly, since a
/// single role string cannot be dispatched through an untagged enum without
/// ambiguity between the user and assistant shapes.
#[derive(Debug, Clone)]
pub enum RawMessage {
    /// A message already in canonical form.
    Canonical(Message),
    /// A legacy user message: a bare content string.
    LegacyUser {
        /// The raw content string.
        content: String,
    },
    /// A legacy assistant message: a content string plus string-encoded tool calls.
    LegacyAssistant {
        /// The raw content string; empty string means "no text block".
        content: String,
        /// Tool calls requested alongside the text, in declaration order.
        tool_calls: Vec<LegacyToolCall>,
    },
    /// A legacy tool-result message: a bare content string plus a call id.
    LegacyTool {
        /// The tool call id this result answers.
        tool_call_id: String,
        /// The raw content string.
        content: String,
    },
}

/// Migrates a legacy or canonical message shape into canonical [`Message`] form.
///
/// An already-canonical message is validated and returned unchanged. Legacy
/// shapes are migrated per the forward-migration rules: string content
/// becomes a single text block, and a legacy assistant's `tool_calls` become
/// `ToolUse` blocks appended after the text block, in declaration order.
pub fn normalize(raw: RawMessage) -> Result<Message> {
    match raw {
        RawMessage::Canonical(message) => {
            message.validate()?;
            Ok(message)
        }
        RawMessage::LegacyUser { content, .. } => {
            if content.trim().is_empty() {
                return Err(ForestError::empty_content("legacy user message"));
            }
            Ok(Message::User {
                content: vec![ContentBlock::Text { text: content }],
            })
        }
        RawMessage::LegacyAssistant {
            content,
            tool_calls,
            ..
        } => {
            let mut blocks = Vec::new();
            if !content.trim().is_empty() {
                blocks.push(ContentBlock::Text { text: content });
            }
            for call in tool_calls {
                if call.id.trim().is_empty() || call.name.trim().is_empty() {
                    return Err(ForestError::empty_content(format!(
                        "legacy assistant tool call '{}'",
                        call.name
                    )));
                }
                let trimmed = call.arguments.trim();
                let parameters = if trimmed.is_empty() {
                    Map::new()
                } else {
                    serde_json::from_str::<Map<String, Value>>(trimmed).map_err(|source| {
                        ForestError::tool_argument_parse(
                            call.id.clone(),
                            call.name.clone(),
                            call.arguments.clone(),
                            source,
                        )
                    })?
                };
                blocks.push(ContentBlock::ToolUse {
                    id: call.id,
                    name: call.name,
                    parameters,
                });
            }
            if blocks.is_empty() {
                return Err(ForestError::empty_content("legacy assistant message"));
            }
            Ok(Message::Assistant { content: blocks })
        }
        RawMessage::LegacyTool {
            tool_call_id,
            content,
            ..
        } => {
            if tool_call_id.trim().is_empty() || content.trim().is_empty() {
                return Err(ForestError::empty_content("legacy tool message"));
            }
            Ok(Message::Tool {
                tool_call_id,
                content: vec![ContentBlock::Text { text: content }],
            })
        }
    }
}

/// A content block in [`compare_normal`] form: trimmed and, for tool-use
/// blocks, structurally comparable regardless of parameter key order.
#[derive(Debug, Clone, PartialEq)]
pub enum NormalBlock {
    /// A non-empty, trimmed text block.
    Text(String),
    /// A tool-use block with its parameters as a bare JSON value.
    ToolUse {
        /// The correlation id.
        id: String,
        /// The tool name.
        name: String,
        /// The parameters, compared via [`stable_deep_eq`].
        parameters: Value,
    },
}

/// The comparison-normal form of a message, used for prefix-matching and
/// idempotence checks. `None` means the message normalized to nothing (all
/// blocks were empty text) and should be skipped entirely.
pub type NormalForm = Option<Vec<NormalBlock>>;

/// Reduces a message to its comparison-normal form.
///
/// Text blocks are trimmed; blocks that become empty are dropped. If no
/// blocks remain, returns `None` ("absent" per the specification). Tool-use
/// parameter equality is evaluated with [`stable_deep_eq`], which ignores
/// object key order.
#[must_use]
pub fn compare_normal(message: &Message) -> NormalForm {
    let blocks: Vec<NormalBlock> = message
        .content()
        .iter()
        .filter_map(|block| match block {
            ContentBlock::Text { text } => {
                let trimmed = text.trim();
                if trimmed.is_empty() {
                    None
                } else {
                    Some(NormalBlock::Text(trimmed.to_string()))
                }
            }
            ContentBlock::ToolUse { id, name, parameters } => Some(NormalBlock::ToolUse {
                id: id.clone(),
                name: name.clone(),
                parameters: Value::Object(parameters.clone()),
            }),
        })
        .collect();
    if blocks.is_empty() {
        None
    } else {
        Some(blocks)
    }
}

/// Returns `true` if two normal-form block sequences are equal under
/// [`stable_deep_eq`] on their tool-use parameters.
#[must_use]
pub fn normal_forms_equal(a: &[NormalBlock], b: &[NormalBlock]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).all(|(x, y)| match (x, y) {
        (NormalBlock::Text(t1), NormalBlock::Text(t2)) => t1 == t2,
        (
            NormalBlock::ToolUse { id: id1, name: n1, parameters: p1 },
            NormalBlock::ToolUse { id: id2, name: n2, parameters: p2 },
        ) => id1 == id2 && n1 == n2 && stable_deep_eq(p1, p2),
        _ => false,
    })
}

/// Structural equality over JSON values where object key order is
/// irrelevant and arrays compare positionally.
///
/// `serde_json::Value`'s default map representation already ignores
/// insertion order, but this function is kept explicit so the comparison
/// rule the forest relies on is named and independently testable rather
/// than an incidental property of the JSON crate's internals.
#[must_use]
pub fn stable_deep_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Object(m1), Value::Object(m2)) => {
            if m1.len() != m2.len() {
                return false;
            }
            m1.iter()
                .all(|(k, v1)| m2.get(k).is_some_and(|v2| stable_deep_eq(v1, v2)))
        }
        (Value::Array(a1), Value::Array(a2)) => {
            a1.len() == a2.len() && a1.iter().zip(a2.iter()).all(|(x, y)| stable_deep_eq(x, y))
        }
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn legacy_user(content: &str) -> RawMessage {
        RawMessage::LegacyUser {
            content: content.to_string(),
        }
    }

    #[test]
    fn normalize_legacy_user_message() {
        let message = normalize(legacy_user("hello")).unwrap();
        assert_eq!(
            message,
            Message::User {
                content: vec![ContentBlock::Text { text: "hello".into() }]
            }
        );
    }

    #[test]
    fn normalize_rejects_empty_user_message() {
        assert!(normalize(legacy_user("   ")).is_err());
    }

    #[test]
    fn normalize_legacy_assistant_with_tool_calls() {
        let raw = RawMessage::LegacyAssistant {
            content: "checking".into(),
            tool_calls: vec![LegacyToolCall {
                id: "call_1".into(),
                name: "lookup".into(),
                arguments: r#"{"query":"rust"}"#.into(),
            }],
        };
        let message = normalize(raw).unwrap();
        match message {
            Message::Assistant { content } => {
                assert_eq!(content.len(), 2);
                assert!(content[0].is_text());
                assert!(content[1].is_tool_use());
            }
            _ => panic!("expected assistant message"),
        }
    }

    #[test]
    fn normalize_legacy_assistant_with_blank_arguments_string() {
        let raw = RawMessage::LegacyAssistant {
            content: String::new(),
            tool_calls: vec![LegacyToolCall {
                id: "call_1".into(),
                name: "ping".into(),
                arguments: "  ".into(),
            }],
        };
        let message = normalize(raw).unwrap();
        match message {
            Message::Assistant { content } => match &content[0] {
                ContentBlock::ToolUse { parameters, .. } => assert!(parameters.is_empty()),
                ContentBlock::Text { .. } => panic!("expected tool-use block"),
            },
            _ => panic!("expected assistant message"),
        }
    }

    #[test]
    fn normalize_legacy_assistant_rejects_non_object_arguments() {
        let raw = RawMessage::LegacyAssistant {
            content: String::new(),
            tool_calls: vec![LegacyToolCall {
                id: "call_1".into(),
                name: "ping".into(),
                arguments: "[1,2,3]".into(),
            }],
        };
        assert!(normalize(raw).is_err());
    }

    #[test]
    fn canonical_message_roundtrips_through_normalize() {
        let message = Message::Tool {
            tool_call_id: "call_1".into(),
            content: vec![ContentBlock::Text { text: "42".into() }],
        };
        let normalized = normalize(RawMessage::Canonical(message.clone())).unwrap();
        assert_eq!(normalized, message);
    }

    #[test]
    fn compare_normal_drops_empty_text_and_trims() {
        let message = Message::User {
            content: vec![
                ContentBlock::Text { text: "  ".into() },
                ContentBlock::Text { text: "  hi  ".into() },
            ],
        };
        let normal = compare_normal(&message).unwrap();
        assert_eq!(normal, vec![NormalBlock::Text("hi".into())]);
    }

    #[test]
    fn compare_normal_all_empty_is_absent() {
        let message = Message::User {
            content: vec![ContentBlock::Text { text: "   ".into() }],
        };
        assert!(compare_normal(&message).is_none());
    }

    #[test]
    fn stable_deep_eq_ignores_key_order() {
        let a = json!({"a": 1, "b": 2});
        let b = json!({"b": 2, "a": 1});
        assert!(stable_deep_eq(&a, &b));
    }

    #[test]
    fn normal_forms_equal_ignores_tool_use_parameter_key_order() {
        let a = vec![NormalBlock::ToolUse {
            id: "c1".into(),
            name: "sum".into(),
            parameters: json!({"a": 1, "b": 2}),
        }];
        let b = vec![NormalBlock::ToolUse {
            id: "c1".into(),
            name: "sum".into(),
            parameters: json!({"b": 2, "a": 1}),
        }];
        assert!(normal_forms_equal(&a, &b));
    }
}
