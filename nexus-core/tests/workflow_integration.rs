//! End-to-end workflow tests with scripted collaborators.

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use nexus_core::config::{NexusConfig, ServerTransport, ValidatedConfig};
use nexus_core::gateway::{ConnectStrategy, SessionConnector, ToolSession};
use nexus_core::llm::{ChatModel, ModelReply, SearchClient, ToolCall, WorkerRequest, WorkerRunner};
use nexus_core::plan::CurrentPlan;
use nexus_core::tools::{AgentTool, DefaultToolSets, FnInvoker, ToolDescriptor, ToolSpec};
use nexus_core::workflow::{CheckpointStore, Node, RunOutcome, WorkflowController};
use nexus_core::{
    AgentRole, ChatMessage, GatewayError, LlmError, NexusError, ToolServerConfig, WorkflowError,
};

// --- Mock collaborators ---

/// Replays queued completions in order.
struct MockChatModel {
    completions: Mutex<VecDeque<String>>,
    handoff_locale: Option<String>,
    seen: Mutex<Vec<Vec<ChatMessage>>>,
}

impl MockChatModel {
    fn new(handoff_locale: Option<&str>, completions: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            completions: Mutex::new(completions.iter().map(|s| s.to_string()).collect()),
            handoff_locale: handoff_locale.map(String::from),
            seen: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl ChatModel for MockChatModel {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
        self.seen.lock().unwrap().push(messages.to_vec());
        self.completions
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| LlmError::ApiRequest {
                message: "no scripted completion left".into(),
            })
    }

    async fn invoke_with_tools(
        &self,
        _messages: &[ChatMessage],
        tools: &[ToolSpec],
    ) -> Result<ModelReply, LlmError> {
        assert_eq!(tools[0].name, "handoff_to_planner");
        Ok(match &self.handoff_locale {
            Some(locale) => ModelReply {
                content: String::new(),
                tool_calls: vec![ToolCall {
                    name: "handoff_to_planner".into(),
                    args: json!({"task_title": "t", "locale": locale}),
                }],
            },
            None => ModelReply {
                content: "Hello there!".into(),
                tool_calls: vec![],
            },
        })
    }
}

/// Records each worker request and answers with a fixed string.
#[derive(Default)]
struct RecordingWorker {
    requests: Mutex<Vec<WorkerRequest>>,
}

#[async_trait]
impl WorkerRunner for RecordingWorker {
    async fn run(&self, request: WorkerRequest) -> Result<String, LlmError> {
        let mut requests = self.requests.lock().unwrap();
        let answer = format!("{} result {}", request.agent, requests.len() + 1);
        requests.push(request);
        Ok(answer)
    }
}

struct StaticSearch(Value);

#[async_trait]
impl SearchClient for StaticSearch {
    async fn search(&self, _query: &str, _max_results: usize) -> Result<Value, LlmError> {
        Ok(self.0.clone())
    }
}

struct HangingConnector;

#[async_trait]
impl SessionConnector for HangingConnector {
    async fn connect(
        &self,
        _servers: &[ToolServerConfig],
        _strategy: ConnectStrategy,
    ) -> Result<Box<dyn ToolSession>, GatewayError> {
        std::future::pending().await
    }
}

struct MemorySession;

#[async_trait]
impl ToolSession for MemorySession {
    fn tools(&self) -> Vec<AgentTool> {
        vec![tool("create_entities"), tool("read_graph")]
    }

    async fn close(self: Box<Self>) {}
}

struct MemoryConnector;

#[async_trait]
impl SessionConnector for MemoryConnector {
    async fn connect(
        &self,
        _servers: &[ToolServerConfig],
        _strategy: ConnectStrategy,
    ) -> Result<Box<dyn ToolSession>, GatewayError> {
        Ok(Box::new(MemorySession))
    }
}

fn tool(name: &str) -> AgentTool {
    AgentTool::new(
        name,
        format!("{name} tool"),
        Arc::new(FnInvoker(|args: Value| Ok::<_, GatewayError>(args))),
    )
}

fn defaults() -> DefaultToolSets {
    DefaultToolSets {
        researcher: vec![tool("web_search"), tool("crawl")],
        coder: vec![tool("python_repl")],
        reporter: vec![tool("web_search"), tool("crawl")],
    }
}

fn config(auto_accept: bool, background: bool) -> ValidatedConfig {
    let mut raw = NexusConfig::default();
    raw.workflow.auto_accepted_plan = auto_accept;
    raw.workflow.enable_background_investigation = background;
    raw.validate()
}

fn memory_server() -> ToolServerConfig {
    ToolServerConfig {
        name: "memory".into(),
        transport: ServerTransport::Stdio {
            command: "npx".into(),
            args: vec!["-y".into(), "@modelcontextprotocol/server-memory".into()],
            env: Default::default(),
        },
        enabled_tools: ["create_entities".to_string()].into(),
        agent_bindings: Some([AgentRole::Researcher].into()),
    }
}

const TWO_STEP_PLAN: &str = r#"```json
{
  "locale": "zh-CN",
  "has_enough_context": false,
  "thought": "Need data first",
  "title": "Knowledge graph of EV makers",
  "steps": [
    {"title": "Search sources", "description": "Find papers on EV makers", "step_type": "research", "need_web_search": true},
    {"title": "Compute share", "description": "Calculate market share", "step_type": "processing", "need_web_search": false},
  ]
}
```"#;

struct Harness {
    model: Arc<MockChatModel>,
    worker: Arc<RecordingWorker>,
    controller: WorkflowController,
}

fn harness(
    config: ValidatedConfig,
    model: Arc<MockChatModel>,
    connector: Arc<dyn SessionConnector>,
    search: Value,
) -> Harness {
    let worker = Arc::new(RecordingWorker::default());
    let controller = WorkflowController::new(
        &config,
        model.clone(),
        worker.clone(),
        Arc::new(StaticSearch(search)),
        connector,
        defaults(),
    );
    Harness {
        model,
        worker,
        controller,
    }
}

// --- Tests ---

#[tokio::test]
async fn test_coordinator_without_handoff_ends() {
    let h = harness(
        config(false, true),
        MockChatModel::new(None, &[]),
        Arc::new(HangingConnector),
        json!([]),
    );
    let outcome = h.controller.run("hi").await.unwrap();
    assert!(matches!(outcome, RunOutcome::Finished { .. }));
    assert!(outcome.final_report().is_none());
    assert!(h.worker.requests.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_plan_suspends_for_review_then_accepts() {
    let h = harness(
        config(false, false),
        MockChatModel::new(Some("en-US"), &[TWO_STEP_PLAN, "Final report"]),
        Arc::new(HangingConnector),
        json!([]),
    );

    let outcome = h.controller.run("Map the EV industry").await.unwrap();
    let RunOutcome::AwaitingFeedback(checkpoint) = outcome else {
        panic!("expected the plan to wait for review");
    };
    assert_eq!(checkpoint.next_node, Node::HumanFeedback);
    assert!(matches!(checkpoint.state.current_plan, CurrentPlan::Draft(_)));
    assert_eq!(checkpoint.state.plan_iterations(), 0);
    let planner_msg = checkpoint.state.messages.last().unwrap();
    assert_eq!(planner_msg.name.as_deref(), Some("planner"));

    let outcome = h
        .controller
        .resume(&checkpoint, "[ACCEPTED] looks good")
        .await
        .unwrap();
    let state = outcome.state();
    assert_eq!(state.plan_iterations(), 1);
    assert_eq!(state.locale, "zh-CN");
    assert_eq!(state.observations().len(), 2);
    assert_eq!(outcome.final_report(), Some("Final report"));

    let requests = h.worker.requests.lock().unwrap();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].role, AgentRole::Researcher);
    assert_eq!(requests[1].role, AgentRole::Coder);
    assert_eq!(requests[0].recursion_limit.get(), 25);
    assert!(requests[1].messages[0].content.contains("## Existing Finding 1: Search sources"));
}

#[tokio::test]
async fn test_unsupported_feedback_is_fatal_and_leaves_state() {
    let h = harness(
        config(false, false),
        MockChatModel::new(Some("en-US"), &[TWO_STEP_PLAN]),
        Arc::new(HangingConnector),
        json!([]),
    );
    let RunOutcome::AwaitingFeedback(checkpoint) = h.controller.run("q").await.unwrap() else {
        panic!("expected review");
    };
    let before = checkpoint.clone();

    let err = h.controller.resume(&checkpoint, "maybe").await.unwrap_err();
    assert!(matches!(
        err,
        NexusError::Workflow(WorkflowError::UnsupportedFeedback { .. })
    ));
    assert_eq!(checkpoint, before);
    assert!(h.worker.requests.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_edit_plan_returns_to_planner() {
    let h = harness(
        config(false, false),
        MockChatModel::new(Some("en-US"), &[TWO_STEP_PLAN, TWO_STEP_PLAN]),
        Arc::new(HangingConnector),
        json!([]),
    );
    let RunOutcome::AwaitingFeedback(checkpoint) = h.controller.run("q").await.unwrap() else {
        panic!("expected review");
    };

    let outcome = h
        .controller
        .resume(&checkpoint, "[EDIT_PLAN] add a pricing step")
        .await
        .unwrap();
    let RunOutcome::AwaitingFeedback(second) = outcome else {
        panic!("expected a second review");
    };
    assert_eq!(second.state.plan_iterations(), 0);
    assert!(second.state.messages.iter().any(|m| {
        m.name.as_deref() == Some("feedback") && m.content.starts_with("[EDIT_PLAN]")
    }));
}

#[tokio::test]
async fn test_invalid_first_plan_terminates() {
    let h = harness(
        config(true, false),
        MockChatModel::new(Some("en-US"), &["I cannot plan this"]),
        Arc::new(HangingConnector),
        json!([]),
    );
    let outcome = h.controller.run("q").await.unwrap();
    assert!(matches!(outcome, RunOutcome::Finished { .. }));
    assert!(outcome.final_report().is_none());
}

#[tokio::test]
async fn test_enough_context_goes_straight_to_reporter() {
    let plan = r#"{"locale": "en-US", "has_enough_context": true, "thought": "Known", "title": "Rust history", "steps": []}"#;
    let h = harness(
        config(false, false),
        MockChatModel::new(Some("en-US"), &[plan, "Report on Rust"]),
        Arc::new(HangingConnector),
        json!([]),
    );
    let outcome = h.controller.run("History of Rust").await.unwrap();
    assert_eq!(outcome.final_report(), Some("Report on Rust"));
    assert!(outcome.state().current_plan.approved().is_some());

    let seen = h.model.seen.lock().unwrap();
    let reporter_input = seen.last().unwrap();
    assert!(reporter_input.iter().any(|m| m.content.contains("## Task\n\nRust history")));
}

#[tokio::test]
async fn test_background_results_reach_planner() {
    let h = harness(
        config(true, true),
        MockChatModel::new(Some("en-US"), &["not json"]),
        Arc::new(HangingConnector),
        json!([{"title": "EV sales", "content": "Up 30%", "url": "https://example.com"}]),
    );
    let outcome = h.controller.run("EV sales").await.unwrap();
    assert_eq!(
        outcome.state().background_investigation_results,
        Some(json!([{"title": "EV sales", "content": "Up 30%"}]))
    );
    let seen = h.model.seen.lock().unwrap();
    let planner_input = &seen[0];
    assert!(planner_input
        .last()
        .unwrap()
        .content
        .starts_with("background investigation results of user query:\n"));
}

#[tokio::test]
async fn test_malformed_search_is_stored_as_null() {
    let h = harness(
        config(true, true),
        MockChatModel::new(Some("en-US"), &["not json"]),
        Arc::new(HangingConnector),
        json!({"error": "quota"}),
    );
    let outcome = h.controller.run("EV sales").await.unwrap();
    assert_eq!(outcome.state().background_investigation_results, Some(Value::Null));
}

#[tokio::test(start_paused = true)]
async fn test_gateway_timeout_falls_back_to_default_tools() {
    let mut cfg = config(true, false);
    cfg.servers = vec![memory_server()];
    let plan = r#"{"locale": "en-US", "has_enough_context": false, "thought": "", "title": "KG",
        "steps": [{"title": "Store findings", "description": "Record entities", "step_type": "research"}]}"#;
    let h = harness(
        cfg,
        MockChatModel::new(Some("en-US"), &[plan, "report"]),
        Arc::new(HangingConnector),
        json!([]),
    );
    let outcome = h.controller.run("q").await.unwrap();
    assert_eq!(outcome.final_report(), Some("report"));

    let requests = h.worker.requests.lock().unwrap();
    let names: Vec<&str> = requests[0].tools.iter().map(AgentTool::name).collect();
    assert_eq!(names, vec!["web_search", "crawl"]);
}

#[tokio::test]
async fn test_relevant_server_tools_are_attached() {
    let mut cfg = config(true, false);
    cfg.servers = vec![memory_server()];
    let plan = r#"{"locale": "en-US", "has_enough_context": false, "thought": "", "title": "KG",
        "steps": [{"title": "Store findings", "description": "Record entities", "step_type": "research"}]}"#;
    let h = harness(
        cfg,
        MockChatModel::new(Some("en-US"), &[plan, "report"]),
        Arc::new(MemoryConnector),
        json!([]),
    );
    h.controller.run("q").await.unwrap();

    let requests = h.worker.requests.lock().unwrap();
    let tools = &requests[0].tools;
    let names: Vec<&str> = tools.iter().map(AgentTool::name).collect();
    assert_eq!(names, vec!["web_search", "crawl", "create_entities"]);
    assert_eq!(tools[2].description(), "Powered by 'memory'.\ncreate_entities tool");
}

#[tokio::test]
async fn test_enhanced_reporter_uses_worker() {
    let mut raw = NexusConfig::default();
    raw.workflow.use_enhanced_reporter = true;
    raw.workflow.enable_background_investigation = false;
    let plan = r#"{"locale": "en-US", "has_enough_context": true, "thought": "t", "title": "Topic", "steps": []}"#;
    let h = harness(
        raw.validate(),
        MockChatModel::new(Some("en-US"), &[plan]),
        Arc::new(HangingConnector),
        json!([]),
    );
    let outcome = h.controller.run("q").await.unwrap();
    assert_eq!(outcome.final_report(), Some("enhanced_reporter result 1"));

    let requests = h.worker.requests.lock().unwrap();
    assert_eq!(requests[0].role, AgentRole::Reporter);
    assert!(requests[0].messages[0].content.starts_with("# Report Generation Task"));
}

#[tokio::test]
async fn test_checkpoint_store_resume_by_thread() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(
        config(false, false),
        MockChatModel::new(Some("en-US"), &[TWO_STEP_PLAN, "Final"]),
        Arc::new(HangingConnector),
        json!([]),
    );
    let controller = h.controller.with_checkpoints(CheckpointStore::new(dir.path()));

    let outcome = controller.run("q").await.unwrap();
    let thread_id = outcome.thread_id();
    assert!(dir.path().join(format!("{thread_id}.json")).exists());

    let outcome = controller.resume_thread(thread_id, "[accepted]").await.unwrap();
    assert_eq!(outcome.final_report(), Some("Final"));
    assert!(!dir.path().join(format!("{thread_id}.json")).exists());
}

#[tokio::test]
async fn test_installed_tools_reach_planner_prompt() {
    let h = harness(
        config(true, false),
        MockChatModel::new(Some("en-US"), &["not json"]),
        Arc::new(HangingConnector),
        json!([]),
    );
    let controller = h.controller.with_installed_tools(&[ToolDescriptor {
        server: "papers".into(),
        name: "search_papers".into(),
        description: "Search arXiv".into(),
        input_schema: Value::Null,
    }]);
    controller.run("q").await.unwrap();

    let seen = h.model.seen.lock().unwrap();
    assert!(seen[0][0].content.contains("- `search_papers` (papers): Search arXiv"));
}

/// Fails whenever an external tool is attached; answers otherwise.
#[derive(Default)]
struct ExternalToolFailingWorker {
    requests: Mutex<Vec<Vec<String>>>,
}

#[async_trait]
impl WorkerRunner for ExternalToolFailingWorker {
    async fn run(&self, request: WorkerRequest) -> Result<String, LlmError> {
        let names: Vec<String> = request.tools.iter().map(|t| t.name().to_string()).collect();
        let failing = names.iter().any(|n| n == "create_entities");
        self.requests.lock().unwrap().push(names);
        if failing {
            Err(LlmError::ApiRequest {
                message: "external tool crashed".into(),
            })
        } else {
            Ok(format!("{} done with defaults", request.agent))
        }
    }
}

fn failing_worker_controller(
    cfg: ValidatedConfig,
    completions: &[&str],
) -> (WorkflowController, Arc<ExternalToolFailingWorker>) {
    let worker = Arc::new(ExternalToolFailingWorker::default());
    let controller = WorkflowController::new(
        &cfg,
        MockChatModel::new(Some("en-US"), completions),
        worker.clone(),
        Arc::new(StaticSearch(json!([]))),
        Arc::new(MemoryConnector),
        defaults(),
    );
    (controller, worker)
}

#[tokio::test]
async fn test_worker_failure_with_external_tools_retries_with_defaults() {
    let mut cfg = config(true, false);
    cfg.servers = vec![memory_server()];
    let plan = r#"{"locale": "en-US", "has_enough_context": false, "thought": "", "title": "KG",
        "steps": [{"title": "Store findings", "description": "Record entities", "step_type": "research"}]}"#;
    let (controller, worker) = failing_worker_controller(cfg, &[plan, "report"]);

    let outcome = controller.run("q").await.unwrap();
    assert_eq!(outcome.final_report(), Some("report"));
    assert_eq!(outcome.state().observations(), ["researcher done with defaults"]);

    let requests = worker.requests.lock().unwrap();
    assert_eq!(
        *requests,
        vec![
            vec!["web_search".to_string(), "crawl".into(), "create_entities".into()],
            vec!["web_search".to_string(), "crawl".into()],
        ]
    );
}

#[tokio::test]
async fn test_enhanced_reporter_failure_with_external_tools_retries_with_defaults() {
    let mut raw = NexusConfig::default();
    raw.workflow.use_enhanced_reporter = true;
    raw.workflow.enable_background_investigation = false;
    let mut cfg = raw.validate();
    let mut server = memory_server();
    server.agent_bindings = Some([AgentRole::Reporter].into());
    cfg.servers = vec![server];
    let plan = r#"{"locale": "en-US", "has_enough_context": true, "thought": "t", "title": "Topic", "steps": []}"#;
    let (controller, worker) = failing_worker_controller(cfg, &[plan]);

    let outcome = controller.run("q").await.unwrap();
    assert_eq!(outcome.final_report(), Some("enhanced_reporter done with defaults"));
    assert_eq!(worker.requests.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn test_invalid_revision_goes_to_reporter_and_keeps_observations() {
    let mut raw = NexusConfig::default();
    raw.workflow.auto_accepted_plan = true;
    raw.workflow.enable_background_investigation = false;
    raw.workflow.max_plan_iterations = 2;
    let plan = r#"{"locale": "en-US", "has_enough_context": false, "thought": "", "title": "EV",
        "steps": [{"title": "Collect", "description": "Gather sales", "step_type": "research"}]}"#;
    let h = harness(
        raw.validate(),
        MockChatModel::new(Some("en-US"), &[plan, "garbage revision", "Final"]),
        Arc::new(HangingConnector),
        json!([]),
    );

    let outcome = h.controller.run("EV sales").await.unwrap();
    assert_eq!(outcome.final_report(), Some("Final"));
    let state = outcome.state();
    assert_eq!(state.plan_iterations(), 1);
    assert_eq!(state.observations(), ["researcher result 1"]);
    assert_eq!(h.model.seen.lock().unwrap().len(), 3);
}

#[tokio::test]
async fn test_accepted_draft_that_fails_validation_goes_to_reporter() {
    let draft = r#"{"locale": "en-US", "thought": "t", "title": "No context flag",
        "steps": [{"title": "Collect", "description": "d", "step_type": "research"}]}"#;
    let h = harness(
        config(false, false),
        MockChatModel::new(Some("en-US"), &[draft, "Report from request"]),
        Arc::new(HangingConnector),
        json!([]),
    );
    let RunOutcome::AwaitingFeedback(checkpoint) = h.controller.run("q").await.unwrap() else {
        panic!("expected review");
    };

    let outcome = h.controller.resume(&checkpoint, "[ACCEPTED]").await.unwrap();
    assert_eq!(outcome.final_report(), Some("Report from request"));
    let state = outcome.state();
    assert_eq!(state.plan_iterations(), 0);
    assert!(matches!(state.current_plan, CurrentPlan::Draft(_)));
    assert!(h.worker.requests.lock().unwrap().is_empty());
}
