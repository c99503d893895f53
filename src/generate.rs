// Copyright (c) 2025 Chetan Conikee <conikee@gmail.com>
// Licensed under the MIT License

//! The Generation Driver: turns provider completions into persisted tree
//! nodes, optionally looping through tool calls.
//!
//! A generation session is a spawned task pushing [`GenerationEvent`]s into
//! an unbounded channel, the same producer/consumer shape the teacher uses
//! for its file-watch events. Cancellation is a shared `AtomicBool` polled
//! at the suspension points the specification names: before each provider
//! request, before persisting an assistant node, and before persisting a
//! tool result.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::{json, Map, Value};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{ForestError, Result};
use crate::forest::{Forest, MetadataSeed};
use crate::ids::{NodeId, RootId};
use crate::message::{ContentBlock, Message};
use crate::provider::{ModelCapabilities, Provider, ProviderRequest, ProviderResponse, ToolSpec};
use crate::tools::ToolRegistry;
use crate::types::{Node, NodeData, SourceInfo};

/// Options controlling a single generation call.
#[derive(Debug, Clone)]
pub struct GenerateOptions {
    /// Number of completions to request (tool-free branch only).
    pub n: usize,
    /// Requested generation bound, before clamping.
    pub max_tokens: u64,
    /// Sampling temperature.
    pub temperature: f64,
    /// Cap on tool-use loop iterations.
    pub max_tool_iterations: usize,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            n: 1,
            max_tokens: 1024,
            temperature: 0.0,
            max_tool_iterations: 5,
        }
    }
}

/// One event in a generation session's stream.
#[derive(Debug, Clone)]
pub enum GenerationEvent {
    /// Emitted before each provider call.
    ProviderRequest(ProviderRequest),
    /// Emitted after each provider call.
    ProviderResponse(ProviderResponse),
    /// Emitted after persisting an assistant response.
    AssistantNode(NodeData),
    /// Emitted after persisting a tool result.
    ToolResultNode(NodeData),
    /// Terminal: the leaf nodes to return.
    Done(Vec<NodeData>),
    /// Terminal: the session failed.
    Error(String),
}

/// A cooperative cancellation flag shared between a session and its caller.
#[derive(Clone, Default)]
pub struct AbortHandle {
    flag: Arc<AtomicBool>,
    reason: Arc<std::sync::Mutex<Option<String>>>,
}

impl AbortHandle {
    /// Creates a fresh, not-yet-aborted handle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Idempotent; a second call is a no-op, and
    /// aborting an already-finished session has no observable effect.
    pub fn abort(&self, reason: Option<String>) {
        if !self.flag.swap(true, Ordering::SeqCst) {
            *self.reason.lock().unwrap_or_else(|e| e.into_inner()) = reason;
        }
    }

    /// Returns `true` if cancellation has been requested.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<()> {
        if self.is_aborted() {
            let reason = self.reason.lock().unwrap_or_else(|e| e.into_inner()).clone();
            return Err(ForestError::generation_aborted(reason));
        }
        Ok(())
    }
}

/// An in-flight generation session: a receiver of [`GenerationEvent`]s fed
/// by a spawned task, plus the [`AbortHandle`] that cancels it.
///
/// A session is iterated at most once.
pub struct GenerateSession {
    events: mpsc::UnboundedReceiver<GenerationEvent>,
    abort: AbortHandle,
}

impl GenerateSession {
    /// Returns a handle that can cancel this session from any task.
    #[must_use]
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    /// Receives the next event, or `None` once the session has terminated.
    pub async fn next(&mut self) -> Option<GenerationEvent> {
        self.events.recv().await
    }

    /// Drains the session to completion, returning the final leaf nodes or
    /// propagating the terminal error.
    pub async fn collect(mut self) -> Result<Vec<NodeData>> {
        while let Some(event) = self.next().await {
            match event {
                GenerationEvent::Done(nodes) => return Ok(nodes),
                GenerationEvent::Error(message) => return Err(ForestError::provider(message, None)),
                _ => {}
            }
        }
        Err(ForestError::provider(
            "generation session ended without a terminal event",
            None,
        ))
    }
}

/// Estimates input tokens as `floor((sys_len + sum(json_len(m))) * 0.3)`.
fn estimate_input_tokens(system_message: Option<&str>, messages: &[Message]) -> u64 {
    let sys_len = system_message.map_or(0, str::len);
    let messages_len: usize = messages
        .iter()
        .map(|m| serde_json::to_string(m).map(|s| s.len()).unwrap_or(0))
        .sum();
    (((sys_len + messages_len) as f64) * 0.3).floor() as u64
}

/// Clamps a requested token count against a model's known (or fallback)
/// capabilities and the estimated input size.
fn clamp_max_tokens(requested: u64, estimated_input: u64, capabilities: ModelCapabilities) -> u64 {
    let bound_by_output = capabilities.max_output_tokens;
    let bound_by_input = capabilities.max_input_tokens.saturating_sub(estimated_input);
    let bound_by_total = capabilities.max_total_tokens.saturating_sub(estimated_input);
    requested
        .min(bound_by_output)
        .min(bound_by_input)
        .min(bound_by_total)
        .max(1)
}

/// Merges adjacent messages that share a role and carry only Text blocks.
/// Tool messages are never coalesced. The result is what the provider sees;
/// it is never what is persisted in the Forest.
#[must_use]
pub fn coalesce_text_only_adjacent(messages: &[Message]) -> Vec<Message> {
    let mut out: Vec<Message> = Vec::new();
    for message in messages {
        if !matches!(message, Message::Tool { .. }) && message.content().iter().all(ContentBlock::is_text) {
            if let Some(last) = out.last_mut() {
                let same_role = std::mem::discriminant(last) == std::mem::discriminant(message);
                let last_coalescable =
                    !matches!(last, Message::Tool { .. }) && last.content().iter().all(ContentBlock::is_text);
                if same_role && last_coalescable {
                    merge_text_only(last, message);
                    continue;
                }
            }
        }
        out.push(message.clone());
    }
    out
}

fn merge_text_only(target: &mut Message, next: &Message) {
    let next_content = next.content().to_vec();
    let target_content = match target {
        Message::User { content } | Message::Assistant { content } => content,
        Message::Tool { .. } => return,
    };
    match (target_content.first().cloned(), next_content.first()) {
        (Some(ContentBlock::Text { text: a }), Some(ContentBlock::Text { text: b })) => {
            target_content[0] = ContentBlock::Text { text: format!("{a}{b}") };
            target_content.extend(next_content.into_iter().skip(1));
        }
        _ => target_content.extend(next_content),
    }
}

fn as_node_data(node: Node) -> Result<NodeData> {
    match node {
        Node::Node(n) => Ok(n),
        Node::Root(r) => Err(ForestError::node_not_found_or_root(r.id.to_string())),
    }
}

/// Drives generation: builds provider requests, invokes the provider,
/// persists results through a [`Forest`], and loops through tool calls.
pub struct GenerationDriver {
    forest: Forest,
    tools: Arc<ToolRegistry>,
}

impl GenerationDriver {
    /// Builds a driver over the given forest and tool registry.
    #[must_use]
    pub fn new(forest: Forest, tools: Arc<ToolRegistry>) -> Self {
        Self { forest, tools }
    }

    /// Starts a streaming generation session.
    #[must_use]
    pub fn generate_stream(
        &self,
        root_id: RootId,
        provider: Arc<dyn Provider>,
        model: String,
        context_messages: Vec<Message>,
        options: GenerateOptions,
        active_tools: Vec<String>,
    ) -> GenerateSession {
        let (sender, receiver) = mpsc::unbounded_channel();
        let abort = AbortHandle::new();
        let task_abort = abort.clone();
        let forest = self.forest.clone();
        let tools = Arc::clone(&self.tools);

        tokio::spawn(async move {
            let outcome = if active_tools.is_empty() {
                run_without_tools(&forest, provider.as_ref(), &model, root_id, context_messages, &options, &task_abort, &sender).await
            } else {
                run_with_tools(
                    &forest,
                    provider.as_ref(),
                    &tools,
                    &model,
                    root_id,
                    context_messages,
                    &options,
                    &active_tools,
                    &task_abort,
                    &sender,
                )
                .await
            };
            if let Err(e) = outcome {
                debug!(error = %e, "generation session terminated with error");
                let _ = sender.send(GenerationEvent::Error(e.to_string()));
            }
        });

        GenerateSession { events: receiver, abort }
    }

    /// Non-streaming convenience: drains a session to its final nodes.
    pub async fn generate(
        &self,
        root_id: RootId,
        provider: Arc<dyn Provider>,
        model: String,
        context_messages: Vec<Message>,
        options: GenerateOptions,
        active_tools: Vec<String>,
    ) -> Result<Vec<NodeData>> {
        self.generate_stream(root_id, provider, model, context_messages, options, active_tools)
            .collect()
            .await
    }
}

fn build_parameters(max_tokens: u64, temperature: f64) -> BTreeMap<String, Value> {
    let mut parameters = BTreeMap::new();
    parameters.insert("max_tokens".to_string(), json!(max_tokens));
    parameters.insert("temperature".to_string(), json!(temperature));
    parameters
}

async fn run_without_tools(
    forest: &Forest,
    provider: &dyn Provider,
    model: &str,
    root_id: RootId,
    context_messages: Vec<Message>,
    options: &GenerateOptions,
    abort: &AbortHandle,
    sender: &mpsc::UnboundedSender<GenerationEvent>,
) -> Result<()> {
    let root = forest.get_root(&root_id).await?;
    let parent_ref = NodeId::from_raw(root_id.to_string());
    let capabilities = provider.capabilities(model).unwrap_or(ModelCapabilities::FALLBACK);
    let mut collected = Vec::with_capacity(options.n);

    for _ in 0..options.n {
        abort.check()?;

        let coalesced = coalesce_text_only_adjacent(&context_messages);
        let estimated = estimate_input_tokens(root.config.system_prompt.as_deref(), &coalesced);
        let max_tokens = clamp_max_tokens(options.max_tokens, estimated, capabilities);

        let request = ProviderRequest {
            system_message: root.config.system_prompt.clone(),
            messages: coalesced,
            model: model.to_string(),
            parameters: build_parameters(max_tokens, options.temperature),
            tools: None,
            tool_choice: None,
        };
        let _ = sender.send(GenerationEvent::ProviderRequest(request.clone()));
        let response = provider.complete(request).await?;
        let _ = sender.send(GenerationEvent::ProviderResponse(response.clone()));

        abort.check()?;
        let mut to_append = context_messages.clone();
        to_append.push(response.message.clone());
        let seed = MetadataSeed::new(SourceInfo::Model {
            provider: provider.name().to_string(),
            model_name: model.to_string(),
            parameters: build_parameters(max_tokens, options.temperature),
            tools: None,
            tool_choice: None,
            finish_reason: response.finish_reason.clone(),
            usage: response.usage.clone(),
        });
        let node = as_node_data(forest.append(&parent_ref, to_append, seed).await?)?;
        let _ = sender.send(GenerationEvent::AssistantNode(node.clone()));
        collected.push(node);
    }

    let _ = sender.send(GenerationEvent::Done(collected));
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn run_with_tools(
    forest: &Forest,
    provider: &dyn Provider,
    tools: &ToolRegistry,
    model: &str,
    root_id: RootId,
    context_messages: Vec<Message>,
    options: &GenerateOptions,
    active_tools: &[String],
    abort: &AbortHandle,
    sender: &mpsc::UnboundedSender<GenerationEvent>,
) -> Result<()> {
    if options.n != 1 {
        return Err(ForestError::tools_only_support_n_singleton(options.n));
    }

    let root = forest.get_root(&root_id).await?;
    let parent_ref = NodeId::from_raw(root_id.to_string());
    let capabilities = provider.capabilities(model).unwrap_or(ModelCapabilities::FALLBACK);
    let tool_specs: Vec<ToolSpec> = tools.subset(active_tools);
    let mut messages = context_messages;
    let mut iteration = 0usize;

    loop {
        abort.check()?;

        let coalesced = coalesce_text_only_adjacent(&messages);
        let estimated = estimate_input_tokens(root.config.system_prompt.as_deref(), &coalesced);
        let max_tokens = clamp_max_tokens(options.max_tokens, estimated, capabilities);

        let request = ProviderRequest {
            system_message: root.config.system_prompt.clone(),
            messages: coalesced,
            model: model.to_string(),
            parameters: build_parameters(max_tokens, options.temperature),
            tools: Some(tool_specs.clone()),
            tool_choice: Some("auto".to_string()),
        };
        let _ = sender.send(GenerationEvent::ProviderRequest(request.clone()));
        let response = provider.complete(request).await?;
        let _ = sender.send(GenerationEvent::ProviderResponse(response.clone()));

        abort.check()?;
        let mut assistant_append = messages.clone();
        assistant_append.push(response.message.clone());
        let seed = MetadataSeed::new(SourceInfo::Model {
            provider: provider.name().to_string(),
            model_name: model.to_string(),
            parameters: build_parameters(max_tokens, options.temperature),
            tools: Some(active_tools.to_vec()),
            tool_choice: Some("auto".to_string()),
            finish_reason: response.finish_reason.clone(),
            usage: response.usage.clone(),
        });
        let assistant_node = as_node_data(forest.append(&parent_ref, assistant_append, seed).await?)?;
        let _ = sender.send(GenerationEvent::AssistantNode(assistant_node.clone()));
        messages.push(response.message.clone());

        let tool_uses: Vec<(String, String, Map<String, Value>)> = response
            .message
            .content()
            .iter()
            .filter_map(|block| match block {
                ContentBlock::ToolUse { id, name, parameters } => {
                    Some((id.clone(), name.clone(), parameters.clone()))
                }
                ContentBlock::Text { .. } => None,
            })
            .collect();

        if tool_uses.is_empty() {
            let _ = sender.send(GenerationEvent::Done(vec![assistant_node]));
            return Ok(());
        }

        for (tool_call_id, tool_name, parameters) in tool_uses {
            let result_text = match tools.execute(&tool_name, &parameters).await {
                Ok(text) => text,
                Err(e) => {
                    warn!(tool = %tool_name, error = %e, "tool execution failed");
                    json!({ "error": e.to_string() }).to_string()
                }
            };
            let tool_message = Message::Tool {
                tool_call_id: tool_call_id.clone(),
                content: vec![ContentBlock::Text { text: result_text }],
            };

            abort.check()?;
            let mut tool_append = messages.clone();
            tool_append.push(tool_message.clone());
            let tool_seed = MetadataSeed::new(SourceInfo::ToolResult { tool_name: tool_name.clone() });
            let tool_node = as_node_data(forest.append(&parent_ref, tool_append, tool_seed).await?)?;
            let _ = sender.send(GenerationEvent::ToolResultNode(tool_node));
            messages.push(tool_message);
        }

        iteration += 1;
        if iteration >= options.max_tool_iterations {
            return Err(ForestError::tool_iteration_limit_exceeded(options.max_tool_iterations));
        }
    }
}
