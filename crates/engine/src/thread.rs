//! The multi-turn thread driver.
//!
//! Reconstructs durable plugin state, runs the user-input hooks, records
//! the user turn, then drives agent turns while the space asks to
//! continue. The driver knows only the [`Space`] trait and the event
//! seam; widgets, agents and transformers stay behind it.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use chimera_domain::error::{Error, Result};
use chimera_domain::event::Event;
use chimera_domain::input::{ClientContext, UserInput};
use chimera_domain::trace::TraceEvent;
use chimera_providers::ModelResolver;

use crate::plugin::{replay_mutations, HookContext, HookResult, Mutation};
use crate::runner::run_agent_turn;
use crate::space::{PluginSet, Space, TurnDecision};
use crate::state::ThreadState;
use crate::streaming::EventSink;

pub type SpaceHandle = Arc<dyn Space>;

/// Everything a running thread needs, bundled once by the caller.
#[derive(Clone)]
pub struct ThreadDeps {
    pub state: Arc<ThreadState>,
    pub sink: Arc<dyn EventSink>,
    pub resolver: Arc<dyn ModelResolver>,
    pub cancel: CancellationToken,
    pub client_context: Option<ClientContext>,
}

/// Drive a thread for one request: zero or more agent turns, until the
/// space reports completion, the turn limit is hit, an approval pauses
/// execution, or cancellation lands.
pub async fn run_thread(space: SpaceHandle, deps: ThreadDeps, user_input: UserInput) -> Result<()> {
    let state = deps.state.clone();

    // ── State reconstruction ───────────────────────────────────────
    // Replay every durable mutation through its plugin before the first
    // turn runs; live state and replayed state are the same thing.
    let history = state.events();
    replay_mutations(&space.clone().plugins(), &history)?;

    TraceEvent::ThreadStarted {
        thread_id: state.thread_id.to_string(),
        agent_count: space.agents().len(),
        history_events: history.len(),
    }
    .emit();

    // ── Resolve the driving message ────────────────────────────────
    let mut message = match &user_input {
        UserInput::Message { content, .. } => content.clone(),
        UserInput::Scheduled { prompt, .. } => prompt.clone(),
        UserInput::DeferredTools { .. } => String::new(),
    };
    let records_user_turn = !matches!(user_input, UserInput::DeferredTools { .. });

    // ── User-input hooks ───────────────────────────────────────────
    if records_user_turn {
        let hook_ctx = HookContext {
            state: state.clone(),
            sink: deps.sink.clone(),
            client_context: deps.client_context.clone(),
        };
        let plugins = PluginSet::new(space.clone().plugins());
        for plugin in plugins.user_input_handlers() {
            let result = plugin
                .on_user_input(&message, &hook_ctx)
                .await
                .map_err(|e| Error::Plugin {
                    plugin: plugin.class_name().to_string(),
                    message: format!("on_user_input failed: {e}"),
                })?;
            match result {
                None | Some(HookResult::Continue) => {}
                Some(HookResult::ContinueWith(mutations)) => {
                    apply_hook_mutations(&space, &deps, mutations).await?;
                }
                Some(HookResult::Override(value)) => {
                    if let Some(text) = value.as_str() {
                        message = text.to_string();
                    }
                }
                Some(HookResult::Transform(transform)) => {
                    let transformed = transform(serde_json::Value::String(message.clone()));
                    if let Some(text) = transformed.as_str() {
                        message = text.to_string();
                    }
                }
                Some(HookResult::Block { reason }) => {
                    tracing::info!(plugin = plugin.class_name(), reason, "user input blocked");
                    return Ok(());
                }
                Some(HookResult::Halt { reason }) => {
                    tracing::warn!(plugin = plugin.class_name(), reason, "thread halted");
                    return Ok(());
                }
                Some(HookResult::AwaitHuman { prompt }) => {
                    tracing::info!(plugin = plugin.class_name(), prompt, "awaiting human signal");
                    return Ok(());
                }
            }
        }
    }

    // The first turn's history excludes this request's user message —
    // the message rides in the prompt; later turns see it in the log.
    let first_turn_history = state.events();

    // ── Record the user turn ───────────────────────────────────────
    if records_user_turn {
        deps.sink.emit_both(Event::user_turn_start(), true).await?;
        deps.sink.emit_both(Event::user_message(&message), true).await?;
        deps.sink.emit_both(Event::user_turn_end(), true).await?;
    }

    // ── Turn loop ──────────────────────────────────────────────────
    let mut turns_run: u32 = 0;
    let mut turn_input = Some(&user_input);

    loop {
        if deps.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if let Some(max_turns) = state.max_turns {
            if turns_run >= max_turns {
                tracing::warn!(max_turns, "turn limit reached; completing thread");
                break;
            }
        }

        let history = if turns_run == 0 {
            first_turn_history.clone()
        } else {
            state.events()
        };
        let turn_message = space.prepare_message(&message);
        let agent_id = space.active_agent()?.identifier.clone();

        let turn = run_agent_turn(&space, &deps, &history, &turn_message, turn_input);
        let outcome = match space.turn_timeout() {
            Some(limit) => tokio::time::timeout(limit, turn)
                .await
                .map_err(|_| Error::Timeout(format!("turn exceeded {}s", limit.as_secs())))??,
            None => turn.await?,
        };
        turns_run += 1;
        turn_input = None;

        TraceEvent::TurnCompleted {
            thread_id: state.thread_id.to_string(),
            turn: turns_run,
            agent_id,
            deferred: outcome.is_deferred(),
        }
        .emit();

        // ── Agent-output hooks ─────────────────────────────────────
        let hook_ctx = HookContext {
            state: state.clone(),
            sink: deps.sink.clone(),
            client_context: deps.client_context.clone(),
        };
        let plugins = PluginSet::new(space.clone().plugins());
        let mut stop = false;
        for plugin in plugins.agent_output_handlers() {
            let result = plugin
                .on_agent_output(&outcome, &hook_ctx)
                .await
                .map_err(|e| Error::Plugin {
                    plugin: plugin.class_name().to_string(),
                    message: format!("on_agent_output failed: {e}"),
                })?;
            match result {
                None | Some(HookResult::Continue) => {}
                Some(HookResult::ContinueWith(mutations)) => {
                    apply_hook_mutations(&space, &deps, mutations).await?;
                }
                Some(HookResult::Halt { reason }) | Some(HookResult::Block { reason }) => {
                    tracing::warn!(plugin = plugin.class_name(), reason, "turn loop stopped by hook");
                    stop = true;
                }
                Some(other) => {
                    tracing::debug!(plugin = plugin.class_name(), result = ?other, "ignored hook result");
                }
            }
        }
        if stop || outcome.is_deferred() {
            break;
        }

        match space.should_continue_turn(outcome.text()) {
            TurnDecision::Complete => break,
            TurnDecision::Continue { next_prompt } => message = next_prompt,
        }
    }

    TraceEvent::ThreadFinished {
        thread_id: state.thread_id.to_string(),
        turns: turns_run,
    }
    .emit();
    Ok(())
}

/// Persist hook-returned mutations, then apply each through its owning
/// plugin (same discipline as [`StatefulPlugin::mutate`]).
///
/// [`StatefulPlugin::mutate`]: crate::plugin::StatefulPlugin::mutate
async fn apply_hook_mutations(
    space: &SpaceHandle,
    deps: &ThreadDeps,
    mutations: Vec<Mutation>,
) -> Result<()> {
    let plugins = space.clone().plugins();
    for mutation in mutations {
        let event = Event::app_mutation(&mutation.source, mutation.payload.clone());
        deps.sink.emit_protocol(event.clone()).await?;
        replay_mutations(&plugins, &[event])?;
    }
    Ok(())
}
