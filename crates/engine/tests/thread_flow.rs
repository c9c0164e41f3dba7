//! End-to-end thread execution scenarios driven through `run_thread`
//! with a scripted model, a collecting sink, and condensed in-memory
//! logs.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use chimera_domain::blueprint::{AgentConfig, Blueprint, ComponentConfig, SpaceConfig};
use chimera_domain::error::{Error, Result};
use chimera_domain::event::{event_type, Event};
use chimera_domain::input::{ApprovalDecision, UserInput};
use chimera_domain::message::{ModelMessage, RequestPart};
use chimera_domain::stream::ModelEvent;
use chimera_domain::tool::ToolDefinition;
use chimera_engine::agent::WidgetRegistry;
use chimera_engine::plugin::{HookContext, Hooks, Plugin};
use chimera_engine::space::hydrate_space;
use chimera_engine::state::{SharedThreadLog, ThreadState};
use chimera_engine::streaming::CollectingSink;
use chimera_engine::thread::{run_thread, ThreadDeps};
use chimera_engine::toolset::Toolset;
use chimera_providers::scripted::{ScriptedModel, ScriptedResolver};

// ── Test widgets ───────────────────────────────────────────────────

struct EchoWidget {
    instance_id: String,
}

#[async_trait::async_trait]
impl Plugin for EchoWidget {
    fn class_name(&self) -> &str {
        "EchoWidget"
    }
    fn instance_id(&self) -> &str {
        &self.instance_id
    }
    fn hooks(&self) -> Hooks {
        Hooks::NONE.toolset()
    }
    fn get_toolset(&self, _ctx: &HookContext) -> Option<Toolset> {
        let definition = ToolDefinition::new(
            "echo",
            "Echo a string back",
            serde_json::json!({
                "type": "object",
                "properties": {"s": {"type": "string"}},
                "required": ["s"],
            }),
        );
        Some(Toolset::new().tool(definition, |args, _ctx| async move {
            args.get("s")
                .cloned()
                .ok_or_else(|| Error::Other("missing s".into()))
        }))
    }
}

/// A widget whose only tool is approval-gated.
struct DeployWidget {
    instance_id: String,
}

#[async_trait::async_trait]
impl Plugin for DeployWidget {
    fn class_name(&self) -> &str {
        "DeployWidget"
    }
    fn instance_id(&self) -> &str {
        &self.instance_id
    }
    fn hooks(&self) -> Hooks {
        Hooks::NONE.toolset()
    }
    fn get_toolset(&self, _ctx: &HookContext) -> Option<Toolset> {
        let definition = ToolDefinition::new(
            "deploy",
            "Deploy the current build",
            serde_json::json!({
                "type": "object",
                "properties": {"env": {"type": "string"}},
                "required": ["env"],
            }),
        );
        Some(
            Toolset::new().tool_requiring_approval(definition, |args, _ctx| async move {
                let env = args.get("env").and_then(serde_json::Value::as_str).unwrap_or("?");
                Ok(serde_json::json!(format!("deployed to {env}")))
            }),
        )
    }
}

// ── Harness ────────────────────────────────────────────────────────

fn widget_registry() -> WidgetRegistry {
    let mut registry = WidgetRegistry::new();
    registry.register("EchoWidget", |config| {
        Ok(Arc::new(EchoWidget { instance_id: config.instance_id.clone() }) as Arc<dyn Plugin>)
    });
    registry.register("DeployWidget", |config| {
        Ok(Arc::new(DeployWidget { instance_id: config.instance_id.clone() }) as Arc<dyn Plugin>)
    });
    registry
}

fn inline_agent(id: &str, name: &str, widgets: Vec<ComponentConfig>) -> AgentConfig {
    AgentConfig::Inline {
        id: id.into(),
        name: name.into(),
        identifier: None,
        description: format!("{name}, a test agent"),
        base_prompt: "You are helpful.".into(),
        model_string: None,
        widgets,
        metadata: serde_json::Value::Null,
    }
}

fn widget_config(class_name: &str, instance_id: &str) -> ComponentConfig {
    ComponentConfig {
        class_name: class_name.into(),
        version: "1.0.0".into(),
        instance_id: instance_id.into(),
        config: serde_json::json!({}),
    }
}

struct Harness {
    blueprint: Blueprint,
    sink: Arc<CollectingSink>,
    model: Arc<ScriptedModel>,
    deps: ThreadDeps,
    space: Arc<dyn chimera_engine::space::Space>,
}

impl Harness {
    fn new(blueprint: Blueprint, history: Vec<Event>) -> Self {
        Self::with_registry(blueprint, history, widget_registry())
    }

    fn with_registry(blueprint: Blueprint, history: Vec<Event>, registry: WidgetRegistry) -> Self {
        let log = Arc::new(SharedThreadLog::seeded(history));
        let sink = CollectingSink::with_log(log.clone());
        let state = Arc::new(ThreadState::new(&blueprint, log));
        let model = ScriptedModel::new();
        let deps = ThreadDeps {
            state,
            sink: sink.clone(),
            resolver: ScriptedResolver::new(model.clone()),
            cancel: CancellationToken::new(),
            client_context: None,
        };
        let space = hydrate_space(&blueprint, &registry).unwrap();
        Self { blueprint, sink, model, deps, space }
    }

    async fn run(&self, input: UserInput) -> Result<()> {
        run_thread(self.space.clone(), self.deps.clone(), input).await
    }

    fn log_types(&self) -> Vec<String> {
        self.sink
            .protocol_events()
            .iter()
            .map(|e| e.event_type().to_string())
            .collect()
    }
}

fn simple_blueprint() -> Blueprint {
    Blueprint::new(
        Uuid::new_v4(),
        SpaceConfig::Default {
            agents: vec![inline_agent("helper", "Helper", vec![])],
            widgets: vec![],
        },
    )
}

fn count(types: &[String], wanted: &str) -> usize {
    types.iter().filter(|t| t.as_str() == wanted).count()
}

// ── S1: simple text turn ───────────────────────────────────────────

#[tokio::test]
async fn simple_text_turn_streams_and_logs() {
    let harness = Harness::new(simple_blueprint(), vec![]);
    harness.model.push_script(ScriptedModel::text_script("pong"));

    harness.run(UserInput::message("ping")).await.unwrap();

    let vsp = harness.sink.vsp_types();
    let expected_order = [
        "data-user-turn-start",
        "data-user-message",
        "data-user-turn-end",
        "data-agent-start",
        "start-step",
        "text-start",
        "text-delta",
        "text-delta",
        "text-end",
        "chimera-app-usage",
        "finish-step",
        "data-agent-finish",
    ];
    assert_eq!(vsp, expected_order, "unexpected stream order: {vsp:?}");

    // Deltas never carry threadId; boundaries always do.
    for event in harness.sink.vsp_events() {
        if event.is_delta() {
            assert!(!event.has("threadId"), "delta with threadId: {event:?}");
        } else {
            assert!(event.has("threadId"), "boundary without threadId: {event:?}");
        }
    }

    // The log is the condensed stream: deltas collapse to one complete.
    let log = harness.sink.protocol_events();
    let types = harness.log_types();
    assert_eq!(count(&types, "data-agent-start"), 1);
    assert_eq!(count(&types, "data-agent-finish"), 1);
    assert_eq!(count(&types, "text-complete"), 1);
    assert_eq!(count(&types, "text-delta"), 0);
    let complete = log.iter().find(|e| e.is(event_type::TEXT_COMPLETE)).unwrap();
    assert_eq!(complete.str_field("content"), Some("pong"));

    // The model saw the user prompt with no prior history.
    let requests = harness.model.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].system_prompt, "You are helpful.");
    assert_eq!(requests[0].messages.len(), 1);
}

// ── S2: tool round-trip ────────────────────────────────────────────

#[tokio::test]
async fn tool_round_trip() {
    let blueprint = Blueprint::new(
        Uuid::new_v4(),
        SpaceConfig::Default {
            agents: vec![inline_agent(
                "helper",
                "Helper",
                vec![widget_config("EchoWidget", "echo-1")],
            )],
            widgets: vec![],
        },
    );
    let harness = Harness::new(blueprint, vec![]);
    harness
        .model
        .push_script(ScriptedModel::tool_call_script("call_1", "echo", serde_json::json!({"s": "hi"})));
    harness.model.push_script(ScriptedModel::text_script("it said hi"));

    harness.run(UserInput::message("echo hi please")).await.unwrap();

    let vsp = harness.sink.vsp_types();
    let positions: Vec<usize> = [
        "tool-input-start",
        "tool-input-delta",
        "tool-input-available",
        "tool-output-available",
        "text-start",
        "text-end",
        "data-agent-finish",
    ]
    .iter()
    .map(|t| vsp.iter().position(|v| v == t).unwrap_or_else(|| panic!("missing {t}")))
    .collect();
    assert!(positions.windows(2).all(|w| w[0] < w[1]), "order wrong: {vsp:?}");

    let log = harness.sink.protocol_events();
    let input = log.iter().find(|e| e.is(event_type::TOOL_INPUT_AVAILABLE)).unwrap();
    assert_eq!(input.get("input"), Some(&serde_json::json!({"s": "hi"})));
    let output = log.iter().find(|e| e.is(event_type::TOOL_OUTPUT_AVAILABLE)).unwrap();
    assert_eq!(output.get("output"), Some(&serde_json::json!("hi")));

    // Second model call saw the tool result.
    let requests = harness.model.requests();
    assert_eq!(requests.len(), 2);
    let last = requests[1].messages.last().unwrap();
    assert!(matches!(
        last,
        ModelMessage::Request { parts }
            if matches!(&parts[0], RequestPart::ToolReturn { tool_call_id, .. } if tool_call_id == "call_1")
    ));
}

// ── S3: cancellation ───────────────────────────────────────────────

#[tokio::test]
async fn cancellation_before_first_turn_emits_nothing() {
    let harness = Harness::new(simple_blueprint(), vec![]);
    harness.model.push_script(ScriptedModel::text_script("never sent"));
    harness.deps.cancel.cancel();

    let result = harness.run(UserInput::message("go")).await;
    assert!(matches!(result, Err(Error::Cancelled)));

    let types = harness.log_types();
    assert_eq!(count(&types, "data-agent-start"), 0);
    assert_eq!(count(&types, "data-agent-finish"), 0);
}

#[tokio::test]
async fn cancellation_mid_turn_skips_agent_finish() {
    // A tool that cancels the thread while the turn is running; the
    // cancellation lands before the next model step.
    let cancel = CancellationToken::new();
    let mut registry = widget_registry();
    let cancel_for_tool = cancel.clone();
    registry.register("HaltWidget", move |config| {
        let cancel = cancel_for_tool.clone();
        let instance_id = config.instance_id.clone();
        Ok(Arc::new(HaltWidget { instance_id, cancel }) as Arc<dyn Plugin>)
    });

    let blueprint = Blueprint::new(
        Uuid::new_v4(),
        SpaceConfig::Default {
            agents: vec![inline_agent(
                "helper",
                "Helper",
                vec![widget_config("HaltWidget", "halt-1")],
            )],
            widgets: vec![],
        },
    );
    let mut harness = Harness::with_registry(blueprint, vec![], registry);
    harness.deps.cancel = cancel.clone();
    harness
        .model
        .push_script(ScriptedModel::tool_call_script("call_1", "halt", serde_json::json!({})));

    let result = harness.run(UserInput::message("go")).await;
    assert!(matches!(result, Err(Error::Cancelled)));

    // The turn started and the tool ran, but no data-agent-finish was
    // written for the cancelled turn.
    let types = harness.log_types();
    assert_eq!(count(&types, "data-agent-start"), 1);
    assert_eq!(count(&types, "tool-output-available"), 1);
    assert_eq!(count(&types, "data-agent-finish"), 0);
}

struct HaltWidget {
    instance_id: String,
    cancel: CancellationToken,
}

#[async_trait::async_trait]
impl Plugin for HaltWidget {
    fn class_name(&self) -> &str {
        "HaltWidget"
    }
    fn instance_id(&self) -> &str {
        &self.instance_id
    }
    fn hooks(&self) -> Hooks {
        Hooks::NONE.toolset()
    }
    fn get_toolset(&self, _ctx: &HookContext) -> Option<Toolset> {
        let cancel = self.cancel.clone();
        let definition = ToolDefinition::new(
            "halt",
            "Stop execution",
            serde_json::json!({"type": "object", "properties": {}}),
        );
        Some(Toolset::new().tool(definition, move |_args, _ctx| {
            let cancel = cancel.clone();
            async move {
                cancel.cancel();
                Ok(serde_json::json!("halting"))
            }
        }))
    }
}

// ── S4: approval flow ──────────────────────────────────────────────

fn deploy_blueprint() -> Blueprint {
    Blueprint::new(
        Uuid::new_v4(),
        SpaceConfig::Default {
            agents: vec![inline_agent(
                "helper",
                "Helper",
                vec![widget_config("DeployWidget", "deploy-1")],
            )],
            widgets: vec![],
        },
    )
}

#[tokio::test]
async fn approval_flow_pauses_then_resumes() {
    // ── Request 1: the model asks for a gated tool ─────────────────
    let blueprint = deploy_blueprint();
    let first = Harness::new(blueprint.clone(), vec![]);
    first.model.push_script(ScriptedModel::tool_call_script(
        "call_9",
        "deploy",
        serde_json::json!({"env": "prod"}),
    ));
    first.run(UserInput::message("deploy to prod")).await.unwrap();

    let types = first.log_types();
    assert_eq!(count(&types, "tool-approval-request"), 1);
    assert_eq!(count(&types, "tool-output-available"), 0);
    // The turn finished cleanly; the thread is paused, not crashed.
    assert_eq!(count(&types, "data-agent-finish"), 1);

    let approval = first
        .sink
        .protocol_events()
        .into_iter()
        .find(|e| e.is(event_type::TOOL_APPROVAL_REQUEST))
        .unwrap();
    assert_eq!(approval.str_field("toolCallId"), Some("call_9"));
    assert!(approval.str_field("approvalId").unwrap().starts_with("appr_"));

    // ── Request 2: resume with approval ────────────────────────────
    let history = first.sink.protocol_events();
    let second = Harness::new(blueprint, history.clone());
    second.model.push_script(ScriptedModel::text_script("deployed"));

    let mut approvals = std::collections::BTreeMap::new();
    approvals.insert("call_9".to_string(), ApprovalDecision::Simple(true));
    second
        .run(UserInput::DeferredTools {
            approvals,
            calls: Default::default(),
            client_context: None,
        })
        .await
        .unwrap();

    // The approved tool executed and the model continued.
    let types = second.log_types();
    assert!(types.iter().any(|t| t == "tool-output-available"));
    let output = second
        .sink
        .protocol_events()
        .into_iter()
        .find(|e| e.is(event_type::TOOL_OUTPUT_AVAILABLE))
        .unwrap();
    assert_eq!(output.get("output"), Some(&serde_json::json!("deployed to prod")));

    // Resume history == pause-point history: the projection of the
    // stored log, with only the tool result appended. No new user
    // message, no synthetic retry.
    let requests = second.model.requests();
    assert_eq!(requests.len(), 1);
    let messages = &requests[0].messages;
    let expected_prefix = chimera_engine::transform::Transformer::transform(
        &chimera_engine::transform::GenericTransformer,
        &history,
        Some("helper"),
    );
    assert_eq!(&messages[..messages.len() - 1], &expected_prefix[..]);
    assert!(matches!(
        messages.last().unwrap(),
        ModelMessage::Request { parts }
            if matches!(&parts[0], RequestPart::ToolReturn { tool_call_id, .. } if tool_call_id == "call_9")
    ));
    assert!(!messages.iter().any(|m| matches!(
        m,
        ModelMessage::Request { parts }
            if parts.iter().any(|p| matches!(p, RequestPart::RetryPrompt { .. }))
    )));
}

// ── S5: denial ─────────────────────────────────────────────────────

#[tokio::test]
async fn denied_tool_surfaces_denial() {
    let blueprint = deploy_blueprint();
    let first = Harness::new(blueprint.clone(), vec![]);
    first.model.push_script(ScriptedModel::tool_call_script(
        "call_9",
        "deploy",
        serde_json::json!({"env": "prod"}),
    ));
    first.run(UserInput::message("deploy to prod")).await.unwrap();

    let second = Harness::new(blueprint, first.sink.protocol_events());
    second.model.push_script(ScriptedModel::text_script("understood, standing down"));

    let mut approvals = std::collections::BTreeMap::new();
    approvals.insert(
        "call_9".to_string(),
        ApprovalDecision::Detailed {
            approved: false,
            override_args: None,
            message: Some("no".into()),
        },
    );
    second
        .run(UserInput::DeferredTools {
            approvals,
            calls: Default::default(),
            client_context: None,
        })
        .await
        .unwrap();

    let types = second.log_types();
    assert!(types.iter().any(|t| t == "tool-output-denied"));
    assert!(second.sink.vsp_types().iter().any(|t| t == "tool-output-denied"));
    assert!(!types.iter().any(|t| t == "tool-output-available"));

    // The model saw the denial text.
    let requests = second.model.requests();
    let saw_denial = requests[0].messages.iter().any(|m| matches!(
        m,
        ModelMessage::Request { parts }
            if parts.iter().any(|p| matches!(
                p,
                RequestPart::RetryPrompt { content, .. } if content.contains("denied") && content.contains("no")
            ))
    ));
    assert!(saw_denial);
}

// ── S6: crash recovery ─────────────────────────────────────────────

#[tokio::test]
async fn dangling_tool_call_gets_retry_prompt_on_next_request() {
    // A previous run died after the tool call was recorded but before
    // any output landed; no approval request was involved.
    let history = vec![
        Event::user_turn_start(),
        Event::user_message("first request"),
        Event::user_turn_end(),
        Event::agent_start("helper", "Helper", "msg_old"),
        Event::start_step(),
        Event::tool_input_available("call_lost", "echo", serde_json::json!({"s": "gone"})),
    ];

    let blueprint = Blueprint::new(
        Uuid::new_v4(),
        SpaceConfig::Default {
            agents: vec![inline_agent(
                "helper",
                "Helper",
                vec![widget_config("EchoWidget", "echo-1")],
            )],
            widgets: vec![],
        },
    );
    let harness = Harness::new(blueprint, history);
    harness.model.push_script(ScriptedModel::text_script("picking up where we left off"));

    harness.run(UserInput::message("are you still there?")).await.unwrap();

    let requests = harness.model.requests();
    let retry = requests[0].messages.iter().find_map(|m| match m {
        ModelMessage::Request { parts } => parts.iter().find_map(|p| match p {
            RequestPart::RetryPrompt { content, tool_call_id, .. } => {
                Some((content.clone(), tool_call_id.clone()))
            }
            _ => None,
        }),
        _ => None,
    });
    let (content, tool_call_id) = retry.expect("expected a synthetic retry prompt");
    assert!(content.contains("did not complete"));
    assert_eq!(tool_call_id.as_deref(), Some("call_lost"));
}

// ── Roster: agent switching via durable mutation ───────────────────

#[tokio::test]
async fn roster_switch_persists_and_replays() {
    let blueprint = Blueprint::new(
        Uuid::new_v4(),
        SpaceConfig::Default {
            agents: vec![
                inline_agent("alice", "Alice", vec![]),
                inline_agent("bob", "Bob", vec![]),
            ],
            widgets: vec![],
        },
    );

    let first = Harness::new(blueprint.clone(), vec![]);
    first.model.push_script(ScriptedModel::tool_call_script(
        "call_sw",
        "switch_agent",
        serde_json::json!({"identifier": "bob"}),
    ));
    first.model.push_script(ScriptedModel::text_script("handing off to Bob"));
    first.run(UserInput::message("please switch to bob")).await.unwrap();

    // The mutation is in the log and mirrored on the live stream.
    let mutation = first
        .sink
        .protocol_events()
        .into_iter()
        .find(|e| e.is(event_type::APP_MUTATION))
        .expect("agent-selection mutation persisted");
    assert_eq!(mutation.data_str("source"), Some("space:RosterSpace:space"));
    assert!(first.sink.vsp_types().iter().any(|t| t == "data-app-chimera"));

    // A new request reconstructs state by replay: Bob is now active.
    let second = Harness::new(blueprint, first.sink.protocol_events());
    second.model.push_script(ScriptedModel::text_script("Bob here"));
    second.run(UserInput::message("who am I talking to?")).await.unwrap();

    let agent_start = second
        .sink
        .protocol_events()
        .into_iter()
        .filter(|e| e.is(event_type::AGENT_START))
        .last()
        .unwrap();
    assert_eq!(agent_start.data_str("agentId"), Some("bob"));
}

// ── Graph: one node per turn, output fed forward ───────────────────

#[tokio::test]
async fn graph_space_runs_nodes_sequentially() {
    let blueprint = Blueprint::new(
        Uuid::new_v4(),
        SpaceConfig::Referenced {
            class_name: "GraphSpace".into(),
            version: "1.0.0".into(),
            config: serde_json::json!({
                "nodes": [
                    {"id": "pick", "instructions": "Pick a number between 1 and 10."},
                    {"id": "double", "instructions": "Double {output} and reply with just the number."},
                ],
            }),
            agents: vec![inline_agent("worker", "Worker", vec![])],
            widgets: vec![],
        },
    );

    let harness = Harness::new(blueprint, vec![]);
    harness.model.push_script(ScriptedModel::text_script("7"));
    harness.model.push_script(ScriptedModel::text_script("14"));

    harness.run(UserInput::message("go")).await.unwrap();

    // Two agent turns, properly bracketed.
    let types = harness.log_types();
    assert_eq!(count(&types, "data-agent-start"), 2);
    assert_eq!(count(&types, "data-agent-finish"), 2);

    let requests = harness.model.requests();
    assert_eq!(requests.len(), 2);

    // Node 1: instructions + user message, no history (empty transformer).
    assert_eq!(requests[0].messages.len(), 1);
    assert!(matches!(
        &requests[0].messages[0],
        ModelMessage::Request { parts }
            if matches!(&parts[0], RequestPart::UserPrompt { content, .. }
                if content.starts_with("Pick a number") && content.ends_with("go"))
    ));

    // Node 2: templated prompt with node 1's output, still no history.
    assert_eq!(requests[1].messages.len(), 1);
    assert!(matches!(
        &requests[1].messages[0],
        ModelMessage::Request { parts }
            if matches!(&parts[0], RequestPart::UserPrompt { content, .. }
                if content.contains("Double 7"))
    ));
}

// ── Scheduled input runs like a message ────────────────────────────

#[tokio::test]
async fn scheduled_input_records_user_turn() {
    let harness = Harness::new(simple_blueprint(), vec![]);
    harness.model.push_script(ScriptedModel::text_script("summary done"));

    harness
        .run(UserInput::Scheduled {
            prompt: "write the daily summary".into(),
            trigger_context: Some(serde_json::json!({"schedule_id": "s1"})),
        })
        .await
        .unwrap();

    let log = harness.sink.protocol_events();
    let user_message = log.iter().find(|e| e.is(event_type::USER_MESSAGE)).unwrap();
    assert_eq!(user_message.data_str("content"), Some("write the daily summary"));
    assert_eq!(count(&harness.log_types(), "data-agent-finish"), 1);
}

// ── Multi-turn history visibility ──────────────────────────────────

#[tokio::test]
async fn second_request_sees_first_turn_in_history() {
    let blueprint = simple_blueprint();
    let first = Harness::new(blueprint.clone(), vec![]);
    first.model.push_script(ScriptedModel::text_script("pong"));
    first.run(UserInput::message("ping")).await.unwrap();

    let second = Harness::new(blueprint, first.sink.protocol_events());
    second.model.push_script(ScriptedModel::text_script("pong again"));
    second.run(UserInput::message("ping again")).await.unwrap();

    let requests = second.model.requests();
    let messages = &requests[0].messages;
    // Prior user prompt + prior response + the new prompt.
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[1].response_text(), "pong");
    assert!(matches!(
        messages.last().unwrap(),
        ModelMessage::Request { parts }
            if matches!(&parts[0], RequestPart::UserPrompt { content, .. } if content == "ping again")
    ));
    let _ = &second.blueprint;
}

// ── Max turns guardrail ────────────────────────────────────────────

#[tokio::test]
async fn max_turns_bounds_graph_execution() {
    let mut blueprint = Blueprint::new(
        Uuid::new_v4(),
        SpaceConfig::Referenced {
            class_name: "GraphSpace".into(),
            version: "1.0.0".into(),
            config: serde_json::json!({
                "nodes": [
                    {"id": "a", "instructions": "Say a."},
                    {"id": "b", "instructions": "Say b."},
                    {"id": "c", "instructions": "Say c."},
                ],
            }),
            agents: vec![inline_agent("worker", "Worker", vec![])],
            widgets: vec![],
        },
    );
    blueprint.max_turns = Some(2);

    let harness = Harness::new(blueprint, vec![]);
    harness.model.push_script(ScriptedModel::text_script("a"));
    harness.model.push_script(ScriptedModel::text_script("b"));
    harness.model.push_script(ScriptedModel::text_script("c"));

    harness.run(UserInput::message("go")).await.unwrap();
    assert_eq!(harness.model.call_count(), 2);
}

// ── Thinking parts stream as reasoning events ──────────────────────

#[tokio::test]
async fn thinking_streams_as_reasoning_and_condenses() {
    let harness = Harness::new(simple_blueprint(), vec![]);
    harness.model.push_script(vec![
        ModelEvent::Thinking { text: "let me ".into() },
        ModelEvent::Thinking { text: "think".into() },
        ModelEvent::Token { text: "answer".into() },
        ModelEvent::Done { usage: None, finish_reason: Some("stop".into()) },
    ]);

    harness.run(UserInput::message("hard question")).await.unwrap();

    let vsp = harness.sink.vsp_types();
    let reasoning_start = vsp.iter().position(|t| t == "reasoning-start").unwrap();
    let reasoning_end = vsp.iter().position(|t| t == "reasoning-end").unwrap();
    let text_start = vsp.iter().position(|t| t == "text-start").unwrap();
    assert!(reasoning_start < reasoning_end && reasoning_end < text_start);

    let log = harness.sink.protocol_events();
    let reasoning = log.iter().find(|e| e.is(event_type::REASONING_COMPLETE)).unwrap();
    assert_eq!(reasoning.str_field("content"), Some("let me think"));
}
