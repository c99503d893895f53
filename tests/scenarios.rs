// Copyright (c) 2025 Chetan Conikee <conikee@gmail.com>
// Licensed under the MIT License

//! Black-box end-to-end scenarios (S1-S8), exercising the library only
//! through its public surface.

use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use forest_engine::{
    AbortHandle, Config, ContentBlock, FileBookmarkStore, FileStore, Forest, GenerateOptions,
    GenerationDriver, Message, MetadataSeed, Node, NodeId, Provider, ProviderRequest,
    ProviderResponse, Result, RootConfig, SourceInfo, ToolRegistry,
};
use serde_json::{json, Map, Value};
use tempfile::TempDir;

async fn new_forest() -> (TempDir, Forest, Arc<FileBookmarkStore>) {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(FileStore::open(dir.path().join("store")).await.unwrap());
    let bookmarks = Arc::new(
        FileBookmarkStore::open(dir.path().join("bookmarks.json"))
            .await
            .unwrap(),
    );
    let forest = Forest::new(store, bookmarks.clone());
    (dir, forest, bookmarks)
}

fn user(text: &str) -> Message {
    Message::User {
        content: vec![ContentBlock::Text { text: text.to_string() }],
    }
}

fn assistant(text: &str) -> Message {
    Message::Assistant {
        content: vec![ContentBlock::Text { text: text.to_string() }],
    }
}

fn as_node_data(node: Node) -> forest_engine::NodeData {
    match node {
        Node::Node(n) => n,
        Node::Root(_) => panic!("expected a node"),
    }
}

fn single_text(message: &Message) -> &str {
    match message.content() {
        [ContentBlock::Text { text }] => text.as_str(),
        _ => panic!("expected a single text block"),
    }
}

struct StubProvider {
    responses: StdMutex<std::collections::VecDeque<Message>>,
}

impl StubProvider {
    fn new(responses: Vec<Message>) -> Self {
        Self {
            responses: StdMutex::new(responses.into()),
        }
    }
}

#[async_trait]
impl Provider for StubProvider {
    fn name(&self) -> &str {
        "stub"
    }

    async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse> {
        let mut queue = self.responses.lock().unwrap();
        let message = queue.pop_front().expect("provider script exhausted");
        Ok(ProviderResponse {
            message,
            usage: None,
            finish_reason: Some("stop".to_string()),
        })
    }
}

/// S1: simple generation, n=1, appends one assistant node on top of the
/// persisted user turn.
#[tokio::test]
async fn s1_simple_generation_appends_user_and_assistant() {
    let (_dir, forest, _bookmarks) = new_forest().await;
    let root = forest
        .get_or_create_root(RootConfig {
            system_prompt: Some("be brief".into()),
        })
        .await
        .unwrap();

    let provider: Arc<dyn Provider> = Arc::new(StubProvider::new(vec![assistant("hello")]));
    let driver = GenerationDriver::new(forest.clone(), Arc::new(ToolRegistry::new()));

    let nodes = driver
        .generate(
            root.id.clone(),
            provider,
            "gpt-x".to_string(),
            vec![user("hi")],
            GenerateOptions::default(),
            vec![],
        )
        .await
        .unwrap();

    assert_eq!(nodes.len(), 1);
    let assistant_node = &nodes[0];
    assert_eq!(assistant_node.message, assistant("hello"));
    assert!(matches!(assistant_node.metadata.source_info, SourceInfo::Model { .. }));

    let (_root, messages) = forest.get_messages(&assistant_node.id).await.unwrap();
    assert_eq!(messages, vec![user("hi"), assistant("hello")]);
}

/// S2: prefix match reuse — appending the same messages twice does not
/// create new nodes.
#[tokio::test]
async fn s2_prefix_match_reuses_existing_chain_without_creating_nodes() {
    let (_dir, forest, _bookmarks) = new_forest().await;
    let root = forest.get_or_create_root(RootConfig::default()).await.unwrap();
    let parent_ref = NodeId::from_raw(root.id.to_string());

    let first = as_node_data(
        forest
            .append(&parent_ref, vec![user("hi"), assistant("world")], MetadataSeed::new(SourceInfo::User))
            .await
            .unwrap(),
    );

    let before = forest.list_recent_leaves(100).await.unwrap().len();
    let second = as_node_data(
        forest
            .append(&parent_ref, vec![user("hi"), assistant("world")], MetadataSeed::new(SourceInfo::User))
            .await
            .unwrap(),
    );
    let after = forest.list_recent_leaves(100).await.unwrap().len();

    assert_eq!(first.id, second.id);
    assert_eq!(before, after);
}

/// S3: tool-use parameter key order is irrelevant for prefix matching.
#[tokio::test]
async fn s3_tool_use_param_key_order_irrelevance_reuses_node() {
    let (_dir, forest, _bookmarks) = new_forest().await;
    let root = forest.get_or_create_root(RootConfig::default()).await.unwrap();
    let parent_ref = NodeId::from_raw(root.id.to_string());

    let mut params_a = Map::new();
    params_a.insert("a".into(), json!(1));
    params_a.insert("b".into(), json!(2));
    let first = as_node_data(
        forest
            .append(
                &parent_ref,
                vec![Message::Assistant {
                    content: vec![ContentBlock::ToolUse {
                        id: "c1".into(),
                        name: "sum".into(),
                        parameters: params_a,
                    }],
                }],
                MetadataSeed::new(SourceInfo::User),
            )
            .await
            .unwrap(),
    );

    let mut params_b = Map::new();
    params_b.insert("b".into(), json!(2));
    params_b.insert("a".into(), json!(1));
    let second = as_node_data(
        forest
            .append(
                &parent_ref,
                vec![Message::Assistant {
                    content: vec![ContentBlock::ToolUse {
                        id: "c1".into(),
                        name: "sum".into(),
                        parameters: params_b,
                    }],
                }],
                MetadataSeed::new(SourceInfo::User),
            )
            .await
            .unwrap(),
    );

    assert_eq!(first.id, second.id);
}

/// S4: split preserves content — the concatenation of the left and suffix
/// nodes equals the original text, and linkage is rewired correctly.
#[tokio::test]
async fn s4_split_node_preserves_content_and_metadata() {
    let (_dir, forest, _bookmarks) = new_forest().await;
    let root = forest.get_or_create_root(RootConfig::default()).await.unwrap();
    let parent_ref = NodeId::from_raw(root.id.to_string());

    let n = as_node_data(
        forest
            .append(&parent_ref, vec![user("This is a long message")], MetadataSeed::new(SourceInfo::User))
            .await
            .unwrap(),
    );

    let left = forest.split_node(&n.id, 15).await.unwrap();
    let suffix_node = forest.get_node(&n.id).await.unwrap();

    let left_text = single_text(&left.message);
    let suffix_text = single_text(&suffix_node.message);
    assert_eq!(left_text, "This is a long ");
    assert_eq!(suffix_text, "message");
    assert_eq!(format!("{left_text}{suffix_text}"), "This is a long message");
    assert_eq!(left.parent_id, parent_ref);
    assert_eq!(left.child_ids, vec![n.id.clone()]);
    assert_eq!(suffix_node.parent_id, left.id);
    assert_eq!(left.metadata.split_source, Some(n.id));
}

/// S5: edit with children creates a branch and moves any bookmark that
/// pointed at the edited node.
#[tokio::test]
async fn s5_edit_with_children_branches_and_moves_bookmark() {
    let (_dir, forest, bookmarks) = new_forest().await;
    let root = forest.get_or_create_root(RootConfig::default()).await.unwrap();
    let parent_ref = NodeId::from_raw(root.id.to_string());

    let n1 = as_node_data(
        forest
            .append(&parent_ref, vec![user("Original message content")], MetadataSeed::new(SourceInfo::User))
            .await
            .unwrap(),
    );
    forest
        .append(&n1.id, vec![assistant("response")], MetadataSeed::new(SourceInfo::User))
        .await
        .unwrap();

    let bookmark = bookmarks
        .add("checkpoint".to_string(), root.id.clone(), n1.id.clone())
        .await
        .unwrap();

    let edited = forest
        .edit_node_content(&n1.id, "Original message with new ending")
        .await
        .unwrap();

    assert_ne!(edited.id, n1.id);
    assert_eq!(single_text(&edited.message), "with new ending");

    let moved = bookmarks.find_by_node(&edited.id).await.unwrap().unwrap();
    assert_eq!(moved.title, "checkpoint");
    assert_eq!(moved.created_at, bookmark.created_at);
    assert!(moved.updated_at >= bookmark.updated_at);
    assert!(bookmarks.find_by_node(&n1.id).await.unwrap().is_none());

    let original = forest.get_node(&n1.id).await.unwrap();
    assert_eq!(single_text(&original.message), "content");
}

/// S6: tool-use loop with two tool calls in a single assistant turn, then
/// a final text-only completion.
#[tokio::test]
async fn s6_tool_use_loop_runs_two_calls_then_finishes() {
    let (_dir, forest, _bookmarks) = new_forest().await;
    let root = forest.get_or_create_root(RootConfig::default()).await.unwrap();

    let mut registry = ToolRegistry::new();
    registry
        .register(
            "echo",
            "echoes msg",
            json!({"type": "object", "properties": {"msg": {"type": "string"}}}),
            Arc::new(|args: Map<String, Value>| async move {
                Ok(args.get("msg").and_then(Value::as_str).unwrap_or("").to_string())
            }),
            None,
        )
        .unwrap();

    let two_tool_uses = Message::Assistant {
        content: vec![
            ContentBlock::ToolUse {
                id: "c1".into(),
                name: "echo".into(),
                parameters: {
                    let mut m = Map::new();
                    m.insert("msg".into(), json!("one"));
                    m
                },
            },
            ContentBlock::ToolUse {
                id: "c2".into(),
                name: "echo".into(),
                parameters: {
                    let mut m = Map::new();
                    m.insert("msg".into(), json!("two"));
                    m
                },
            },
        ],
    };
    let provider: Arc<dyn Provider> = Arc::new(StubProvider::new(vec![two_tool_uses, assistant("both done")]));
    let driver = GenerationDriver::new(forest.clone(), Arc::new(registry));

    let nodes = driver
        .generate(
            root.id.clone(),
            provider,
            "gpt-x".to_string(),
            vec![user("start")],
            GenerateOptions::default(),
            vec!["echo".to_string()],
        )
        .await
        .unwrap();

    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes[0].message, assistant("both done"));

    let (_root, messages) = forest.get_messages(&nodes[0].id).await.unwrap();
    assert_eq!(messages.len(), 5);
    assert_eq!(messages[0], user("start"));
    match &messages[2] {
        Message::Tool { tool_call_id, .. } => assert_eq!(tool_call_id, "c1"),
        _ => panic!("expected tool message"),
    }
    match &messages[3] {
        Message::Tool { tool_call_id, .. } => assert_eq!(tool_call_id, "c2"),
        _ => panic!("expected tool message"),
    }
}

/// S7: a node whose on-disk digest no longer matches its content fails
/// loudly on read rather than silently serving tampered data.
#[tokio::test]
async fn s7_corrupted_node_digest_fails_loudly() {
    let dir = TempDir::new().unwrap();
    let store_path = dir.path().join("store");
    let store = Arc::new(FileStore::open(&store_path).await.unwrap());
    let bookmarks = Arc::new(FileBookmarkStore::open(dir.path().join("bookmarks.json")).await.unwrap());
    let forest = Forest::new(store, bookmarks);

    let root = forest.get_or_create_root(RootConfig::default()).await.unwrap();
    let parent_ref = NodeId::from_raw(root.id.to_string());
    let node = as_node_data(
        forest
            .append(&parent_ref, vec![user("hi")], MetadataSeed::new(SourceInfo::User))
            .await
            .unwrap(),
    );

    let file_name = node.id.as_str().rsplit('/').next().unwrap().to_string();
    let node_path = store_path
        .join(root.id.to_string())
        .join("nodes")
        .join(format!("{file_name}.json"));
    let mut record: Value = serde_json::from_slice(&tokio::fs::read(&node_path).await.unwrap()).unwrap();
    record["message"]["content"][0]["text"] = json!("tampered");
    tokio::fs::write(&node_path, serde_json::to_vec(&record).unwrap()).await.unwrap();

    let err = forest.get_node(&node.id).await.unwrap_err();
    assert!(matches!(err, forest_engine::ForestError::Consistency { .. }));
}

/// S8: a fresh deployment with no config file and no bookmark file on disk
/// boots cleanly rather than erroring.
#[tokio::test]
async fn s8_config_and_bookmarks_absent_boot_without_erroring() {
    let dir = TempDir::new().unwrap();
    let config_path = dir.path().join("config.toml");
    let bookmarks_path = dir.path().join("bookmarks.json");

    assert!(!config_path.exists());
    assert!(!bookmarks_path.exists());

    let config = Config::load(Some(&config_path));
    assert!(config.store_root.is_none());
    assert!(config.default_provider.is_none());

    let bookmark_store = FileBookmarkStore::open(&bookmarks_path).await.unwrap();
    assert!(bookmark_store.list().await.unwrap().is_empty());
    assert!(!bookmarks_path.exists());

    bookmark_store
        .add(
            "first".to_string(),
            forest_engine::RootId::from_raw("root-0".to_string()),
            NodeId::from_raw("root-0/node-0"),
        )
        .await
        .unwrap();
    assert!(bookmarks_path.exists());
}

/// Cancellation safety: aborting a session before its provider call has a
/// chance to run yields a terminal error without persisting an assistant
/// node for that turn.
#[tokio::test]
async fn cancellation_safety_no_persistence_past_abort_point() {
    let (_dir, forest, _bookmarks) = new_forest().await;
    let root = forest.get_or_create_root(RootConfig::default()).await.unwrap();
    let provider: Arc<dyn Provider> = Arc::new(StubProvider::new(vec![assistant("should not be reached")]));
    let driver = GenerationDriver::new(forest.clone(), Arc::new(ToolRegistry::new()));

    let session = driver.generate_stream(
        root.id.clone(),
        provider,
        "gpt-x".to_string(),
        vec![user("hello")],
        GenerateOptions::default(),
        vec![],
    );
    let handle: AbortHandle = session.abort_handle();
    handle.abort(Some("test cancellation".to_string()));

    let result = session.collect().await;
    assert!(result.is_err());

    let leaves = forest.list_recent_leaves(10).await.unwrap();
    assert!(leaves.is_empty());
}
