//! One agent turn: assemble prompt + history + tools, stream the model,
//! dispatch tools step by step, record everything.
//!
//! Flat model deltas become VSP part events here (`text-start/delta/end`,
//! `tool-input-*`, ...) with proper part tracking; the log side condenses
//! the same stream into `*-complete` events. Approval-gated tool calls
//! pause the turn with `tool-approval-request`; the next request resumes
//! with a deferred-results bundle.

use std::time::Instant;

use futures_util::StreamExt;
use serde_json::Value;
use uuid::Uuid;

use chimera_domain::error::{Error, Result};
use chimera_domain::event::Event;
use chimera_domain::input::{DeferredToolResults, ToolDecision, UserInput};
use chimera_domain::message::{ModelMessage, RequestPart, ResponsePart};
use chimera_domain::stream::{ModelEvent, Usage};
use chimera_domain::tool::ToolCall;
use chimera_domain::trace::TraceEvent;
use chimera_providers::ModelRequest;

use crate::plugin::HookContext;
use crate::space::PluginSet;
use crate::streaming::EventSink;
use crate::thread::{SpaceHandle, ThreadDeps};
use crate::toolset::{validate_args, MergedTools, ToolContext, Toolset};

/// Maximum model steps (tool round-trips) in one turn before we
/// force-stop.
const MAX_STEPS: usize = 25;

/// How an agent turn ended.
#[derive(Debug, Clone)]
pub enum TurnOutcome {
    /// The model produced a final text answer.
    Completed { text: String },
    /// The model requested approval-gated tools; the thread pauses until
    /// the client resumes with decisions.
    Deferred { approvals: Vec<ToolCall> },
}

impl TurnOutcome {
    pub fn text(&self) -> &str {
        match self {
            Self::Completed { text } => text,
            Self::Deferred { .. } => "",
        }
    }

    pub fn is_deferred(&self) -> bool {
        matches!(self, Self::Deferred { .. })
    }
}

/// Run one turn of the space's active agent.
///
/// `history_events` is the log up to (but not including) this turn; the
/// driver controls the boundary. `user_input` is only set on the first
/// turn of a request.
pub async fn run_agent_turn(
    space: &SpaceHandle,
    deps: &ThreadDeps,
    history_events: &[Event],
    message: &str,
    user_input: Option<&UserInput>,
) -> Result<TurnOutcome> {
    let agent = space.active_agent()?;
    let state = &deps.state;
    let sink = deps.sink.as_ref();
    let message_id = format!("msg_{}", Uuid::new_v4().simple());

    sink.emit_both(
        Event::agent_start(&agent.identifier, &agent.name, &message_id),
        true,
    )
    .await?;

    // ── Plugin aggregation ─────────────────────────────────────────
    let plugins = PluginSet::new(space.clone().plugins());
    let hook_ctx = HookContext {
        state: state.clone(),
        sink: deps.sink.clone(),
        client_context: deps.client_context.clone(),
    };

    let mut ambient: Vec<String> = Vec::new();
    for provider in plugins.instruction_providers() {
        match provider.get_instructions(&hook_ctx).await {
            Ok(Some(text)) if !text.is_empty() => ambient.push(text),
            Ok(_) => {}
            Err(e) => {
                return Err(Error::Plugin {
                    plugin: provider.class_name().to_string(),
                    message: format!("get_instructions failed: {e}"),
                })
            }
        }
    }

    let toolsets: Vec<Toolset> = plugins
        .toolset_providers()
        .iter()
        .filter_map(|p| p.get_toolset(&hook_ctx))
        .filter(|t| !t.is_empty())
        .collect();
    let tools = MergedTools::merge(&toolsets);

    // ── Model + history ────────────────────────────────────────────
    // Precedence: client-context override, agent model, env default.
    let model_string = deps
        .client_context
        .as_ref()
        .and_then(|c| c.model.clone())
        .or_else(|| agent.model_string.clone());
    let model = deps.resolver.resolve(model_string.as_deref())?;

    let transformer = space.transformer();
    let mut messages = transformer.transform(history_events, Some(&agent.identifier));

    let tool_ctx = ToolContext {
        thread_id: state.thread_id,
        sink: deps.sink.clone(),
        client_context: deps.client_context.clone(),
        active_agent: Some(agent.identifier.clone()),
    };

    // ── Prompt or deferred resume ──────────────────────────────────
    match user_input {
        Some(input @ UserInput::DeferredTools { .. }) => {
            let bundle = transformer
                .build_deferred_tool_results(history_events, input)
                .unwrap_or_default();
            resume_deferred(&bundle, history_events, &tools, &tool_ctx, deps, &mut messages)
                .await?;
        }
        _ => {
            let attachments = match user_input {
                Some(UserInput::Message { attachments, .. }) => attachments.clone(),
                _ => Vec::new(),
            };
            messages.push(ModelMessage::Request {
                parts: vec![RequestPart::UserPrompt {
                    content: compose_user_message(&ambient, message),
                    attachments,
                    timestamp: None,
                }],
            });
        }
    }

    // ── Step loop ──────────────────────────────────────────────────
    let mut final_text = String::new();
    let mut part_seq = 0usize;

    for step_index in 0..MAX_STEPS {
        if deps.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        tracing::debug!(step = step_index, agent = %agent.identifier, "step start");
        sink.emit_both(Event::start_step(), true).await?;

        let request = ModelRequest {
            system_prompt: agent.base_prompt.clone(),
            messages: messages.clone(),
            tools: tools.definitions(),
            temperature: None,
            model: None,
        };

        let started = Instant::now();
        let mut stream = model.run_stream(request).await?;
        let mut step = StepStream::new(&message_id, part_seq);

        loop {
            tokio::select! {
                _ = deps.cancel.cancelled() => return Err(Error::Cancelled),
                next = stream.next() => {
                    let Some(event) = next else { break };
                    match event? {
                        ModelEvent::Error { message } => return Err(Error::Model(message)),
                        other => step.handle(other, sink).await?,
                    }
                }
            }
        }
        drop(stream);
        step.finish(sink).await?;
        part_seq = step.part_seq;

        TraceEvent::ModelRequest {
            model: model.model_id().to_string(),
            duration_ms: started.elapsed().as_millis() as u64,
            input_tokens: step.usage.as_ref().map(|u| u.input_tokens),
            output_tokens: step.usage.as_ref().map(|u| u.output_tokens),
        }
        .emit();

        if let Some(usage) = &step.usage {
            // Live token accounting; transient, never persisted.
            sink.emit_vsp(Event::app_usage(&message_id, usage), true).await;
        }
        sink.emit_both(Event::finish_step(step.usage.as_ref()), true).await?;

        // Record the response for subsequent steps.
        let mut parts: Vec<ResponsePart> = Vec::new();
        if !step.thinking.is_empty() {
            parts.push(ResponsePart::Thinking { content: step.thinking.clone() });
        }
        if !step.text.is_empty() {
            parts.push(ResponsePart::Text { content: step.text.clone() });
        }
        for call in &step.tool_calls {
            parts.push(ResponsePart::ToolCall {
                tool_name: call.tool_name.clone(),
                tool_call_id: call.call_id.clone(),
                args: call.arguments.clone(),
            });
        }
        if !parts.is_empty() {
            messages.push(ModelMessage::Response { parts, usage: step.usage.clone() });
        }

        // No tool calls: this is the final answer.
        if step.tool_calls.is_empty() {
            final_text = step.text.clone();
            break;
        }

        // ── Tool dispatch ──────────────────────────────────────────
        let mut approvals_needed: Vec<ToolCall> = Vec::new();
        for call in &step.tool_calls {
            if deps.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let Some(tool) = tools.get(&call.tool_name) else {
                let error = format!("unknown tool '{}'", call.tool_name);
                sink.emit_both(Event::tool_error(&call.call_id, &call.tool_name, &error), true)
                    .await?;
                messages.push(ModelMessage::retry_prompt(
                    error,
                    Some(call.tool_name.clone()),
                    Some(call.call_id.clone()),
                ));
                continue;
            };

            if tool.requires_approval {
                approvals_needed.push(call.clone());
                continue;
            }

            execute_tool(tool, call, None, &tool_ctx, sink, &mut messages).await?;
        }

        if !approvals_needed.is_empty() {
            for call in &approvals_needed {
                let approval_id = format!("appr_{}", Uuid::new_v4().simple());
                sink.emit_both(Event::tool_approval_request(&approval_id, &call.call_id), true)
                    .await?;
            }
            sink.emit_both(
                Event::agent_finish(&agent.identifier, &agent.name, &message_id),
                true,
            )
            .await?;
            return Ok(TurnOutcome::Deferred { approvals: approvals_needed });
        }

        if step_index == MAX_STEPS - 1 {
            sink.emit_vsp(
                Event::error(&format!("tool step limit reached ({MAX_STEPS} steps)")),
                true,
            )
            .await;
        }
    }

    sink.emit_both(
        Event::agent_finish(&agent.identifier, &agent.name, &message_id),
        true,
    )
    .await?;

    Ok(TurnOutcome::Completed { text: final_text })
}

/// Ambient instructions ride in the user message, clearly demarcated;
/// the system prompt stays persona-only.
fn compose_user_message(ambient: &[String], message: &str) -> String {
    if ambient.is_empty() {
        message.to_string()
    } else {
        format!("{}\n\n{message}", ambient.join("\n\n"))
    }
}

/// Validate, execute, and record one tool call. `override_args` replaces
/// the recorded arguments on approval-with-override.
async fn execute_tool(
    tool: &crate::toolset::Tool,
    call: &ToolCall,
    override_args: Option<Value>,
    tool_ctx: &ToolContext,
    sink: &dyn EventSink,
    messages: &mut Vec<ModelMessage>,
) -> Result<()> {
    let args = override_args.unwrap_or_else(|| call.arguments.clone());

    if let Err(e) = validate_args(&tool.definition, &args) {
        let error = e.to_string();
        sink.emit_both(Event::tool_error(&call.call_id, &call.tool_name, &error), true)
            .await?;
        messages.push(ModelMessage::retry_prompt(
            error,
            Some(call.tool_name.clone()),
            Some(call.call_id.clone()),
        ));
        return Ok(());
    }

    let started = Instant::now();
    match tool.execute(args, tool_ctx.clone()).await {
        Ok(output) => {
            TraceEvent::ToolDispatched {
                tool_name: call.tool_name.clone(),
                duration_ms: started.elapsed().as_millis() as u64,
                is_error: false,
            }
            .emit();
            sink.emit_both(
                Event::tool_output_available(&call.call_id, &call.tool_name, output.clone()),
                true,
            )
            .await?;
            messages.push(ModelMessage::tool_return(
                call.tool_name.clone(),
                call.call_id.clone(),
                output,
            ));
        }
        Err(e) => {
            TraceEvent::ToolDispatched {
                tool_name: call.tool_name.clone(),
                duration_ms: started.elapsed().as_millis() as u64,
                is_error: true,
            }
            .emit();
            let error = e.to_string();
            sink.emit_both(Event::tool_error(&call.call_id, &call.tool_name, &error), true)
                .await?;
            messages.push(ModelMessage::retry_prompt(
                error,
                Some(call.tool_name.clone()),
                Some(call.call_id.clone()),
            ));
        }
    }
    Ok(())
}

/// Resume at the approval point: execute approved calls, surface denials,
/// inject external results. The message history itself is untouched —
/// only these tool results are appended.
async fn resume_deferred(
    bundle: &DeferredToolResults,
    history: &[Event],
    tools: &MergedTools,
    tool_ctx: &ToolContext,
    deps: &ThreadDeps,
    messages: &mut Vec<ModelMessage>,
) -> Result<()> {
    let sink = deps.sink.as_ref();
    let recorded = pending_tool_inputs(history);

    for (call_id, decision) in &bundle.approvals {
        let Some((tool_name, input)) = recorded.get(call_id) else {
            tracing::warn!(tool_call_id = %call_id, "approval for unknown tool call; ignored");
            continue;
        };

        match decision {
            ToolDecision::Denied { message } => {
                sink.emit_both(Event::tool_output_denied(call_id), true).await?;
                messages.push(ModelMessage::retry_prompt(
                    format!("The user denied execution of this tool call: {message}"),
                    Some(tool_name.clone()),
                    Some(call_id.clone()),
                ));
            }
            ToolDecision::Approved { override_args } => {
                let call = ToolCall {
                    call_id: call_id.clone(),
                    tool_name: tool_name.clone(),
                    arguments: input.clone(),
                };
                match tools.get(tool_name) {
                    Some(tool) => {
                        execute_tool(tool, &call, override_args.clone(), tool_ctx, sink, messages)
                            .await?;
                    }
                    None => {
                        let error = format!("unknown tool '{tool_name}'");
                        sink.emit_both(Event::tool_error(call_id, tool_name, &error), true)
                            .await?;
                        messages.push(ModelMessage::retry_prompt(
                            error,
                            Some(tool_name.clone()),
                            Some(call_id.clone()),
                        ));
                    }
                }
            }
        }
    }

    // Externally-executed calls: the client did the work, we record it.
    for (call_id, output) in &bundle.calls {
        let tool_name = recorded
            .get(call_id)
            .map(|(name, _)| name.clone())
            .unwrap_or_else(|| "external".to_string());
        sink.emit_both(
            Event::tool_output_available(call_id, &tool_name, output.clone()),
            true,
        )
        .await?;
        messages.push(ModelMessage::tool_return(tool_name, call_id.clone(), output.clone()));
    }

    Ok(())
}

/// Recorded `tool-input-available` events that never resolved:
/// `call_id -> (tool_name, input)`.
fn pending_tool_inputs(history: &[Event]) -> std::collections::HashMap<String, (String, Value)> {
    use chimera_domain::event::event_type;

    let mut pending = std::collections::HashMap::new();
    for event in history {
        match event.event_type() {
            event_type::TOOL_INPUT_AVAILABLE => {
                if let Some(id) = event.str_field("toolCallId") {
                    pending.insert(
                        id.to_string(),
                        (
                            event.str_field("toolName").unwrap_or("").to_string(),
                            event.get("input").cloned().unwrap_or(serde_json::json!({})),
                        ),
                    );
                }
            }
            event_type::TOOL_OUTPUT_AVAILABLE
            | event_type::TOOL_OUTPUT_DENIED
            | event_type::TOOL_ERROR => {
                if let Some(id) = event.str_field("toolCallId") {
                    pending.remove(id);
                }
            }
            _ => {}
        }
    }
    pending
}

// ── Part tracking ──────────────────────────────────────────────────

/// Turns flat model deltas into VSP part events for one step, tracking
/// open text/reasoning parts and in-flight tool-call buffers.
struct StepStream {
    message_id: String,
    part_seq: usize,
    open_text: Option<String>,
    open_reasoning: Option<String>,
    text: String,
    thinking: String,
    /// In-flight tool calls: (call_id, tool_name, accumulated args).
    tool_bufs: Vec<(String, String, String)>,
    tool_calls: Vec<ToolCall>,
    usage: Option<Usage>,
}

impl StepStream {
    fn new(message_id: &str, part_seq: usize) -> Self {
        Self {
            message_id: message_id.to_string(),
            part_seq,
            open_text: None,
            open_reasoning: None,
            text: String::new(),
            thinking: String::new(),
            tool_bufs: Vec::new(),
            tool_calls: Vec::new(),
            usage: None,
        }
    }

    async fn handle(&mut self, event: ModelEvent, sink: &dyn EventSink) -> Result<()> {
        match event {
            ModelEvent::Thinking { text } => {
                self.close_text(sink).await?;
                if self.open_reasoning.is_none() {
                    let id = format!("{}_reasoning_{}", self.message_id, self.part_seq);
                    self.part_seq += 1;
                    sink.emit_both(Event::reasoning_start(&id), true).await?;
                    self.open_reasoning = Some(id);
                }
                let id = self.open_reasoning.clone().unwrap_or_default();
                emit_delta(sink, Event::reasoning_delta(&id, &text)).await?;
                self.thinking.push_str(&text);
            }

            ModelEvent::Token { text } => {
                self.close_reasoning(sink).await?;
                if self.open_text.is_none() {
                    let id = format!("{}_text_{}", self.message_id, self.part_seq);
                    self.part_seq += 1;
                    sink.emit_both(Event::text_start(&id), true).await?;
                    self.open_text = Some(id);
                }
                let id = self.open_text.clone().unwrap_or_default();
                emit_delta(sink, Event::text_delta(&id, &text)).await?;
                self.text.push_str(&text);
            }

            ModelEvent::ToolCallStarted { call_id, tool_name } => {
                self.close_text(sink).await?;
                self.close_reasoning(sink).await?;
                sink.emit_both(Event::tool_input_start(&call_id, &tool_name), true).await?;
                self.tool_bufs.push((call_id, tool_name, String::new()));
            }

            ModelEvent::ToolCallDelta { call_id, delta } => {
                match self.tool_bufs.iter_mut().find(|(id, _, _)| id == &call_id) {
                    Some((_, _, args)) => args.push_str(&delta),
                    None => {
                        tracing::warn!(call_id = %call_id, "tool-call delta with no start; skipped");
                        return Ok(());
                    }
                }
                emit_delta(sink, Event::tool_input_delta(&call_id, &delta)).await?;
            }

            ModelEvent::ToolCallFinished { call_id, tool_name, arguments } => {
                self.tool_bufs.retain(|(id, _, _)| id != &call_id);
                sink.emit_both(
                    Event::tool_input_available(&call_id, &tool_name, arguments.clone()),
                    true,
                )
                .await?;
                self.tool_calls.push(ToolCall { call_id, tool_name, arguments });
            }

            ModelEvent::Done { usage, .. } => {
                self.usage = usage;
            }

            // Handled by the caller before dispatch.
            ModelEvent::Error { .. } => {}
        }
        Ok(())
    }

    /// Close any open parts and assemble tool calls that streamed
    /// start+delta but never a finish (some providers skip it).
    async fn finish(&mut self, sink: &dyn EventSink) -> Result<()> {
        self.close_text(sink).await?;
        self.close_reasoning(sink).await?;

        for (call_id, tool_name, args) in std::mem::take(&mut self.tool_bufs) {
            let arguments: Value = if args.trim().is_empty() {
                serde_json::json!({})
            } else {
                serde_json::from_str(&args).unwrap_or_else(|e| {
                    tracing::warn!(
                        call_id = %call_id,
                        tool = %tool_name,
                        error = %e,
                        "tool call arguments are not valid JSON; defaulting to empty object"
                    );
                    serde_json::json!({})
                })
            };
            sink.emit_both(
                Event::tool_input_available(&call_id, &tool_name, arguments.clone()),
                true,
            )
            .await?;
            self.tool_calls.push(ToolCall { call_id, tool_name, arguments });
        }
        Ok(())
    }

    async fn close_text(&mut self, sink: &dyn EventSink) -> Result<()> {
        if let Some(id) = self.open_text.take() {
            sink.emit_both(Event::text_end(&id), true).await?;
        }
        Ok(())
    }

    async fn close_reasoning(&mut self, sink: &dyn EventSink) -> Result<()> {
        if let Some(id) = self.open_reasoning.take() {
            sink.emit_both(Event::reasoning_end(&id), true).await?;
        }
        Ok(())
    }
}

/// Deltas stream without `threadId` and reach the log only for
/// condensation.
async fn emit_delta(sink: &dyn EventSink, event: Event) -> Result<()> {
    sink.emit_protocol(event.clone()).await?;
    sink.emit_vsp(event, false).await;
    Ok(())
}
