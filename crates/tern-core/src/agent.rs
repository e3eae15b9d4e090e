// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The agent loop: drive a model through repeated tool-augmented reasoning
//! iterations until it finishes, errors, aborts, or hits the iteration
//! bound.
//!
//! One [`AgentRunner`] serves one run.  The loop is single-threaded and
//! cooperative: its only suspension points are the streaming completion,
//! tool execution (strictly in model order), and approval awaits.  Abort is
//! a flag observed at those points — in-flight tool executions complete.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

use tern_config::{AgentMode, EditApprovalMode, ModelConfig, ProviderConfig};
use tern_model::{
    resolve_adapter, CompletionRequest, FinishReason, HttpTransport, StreamData,
    StreamProcessor, ToolResult, UniversalMessage, UniversalToolDefinition, Usage,
};
use tern_tools::{ExecutionContext, PathApprovalRequest, PathApprover, ToolExecutor};

use crate::approval::{ToolApprovalRequest, ToolApprover};
use crate::conversation::ConversationManager;
use crate::events::{display_output, AgentEvent, AgentEventData};

/// Tools whose calls are gated behind the tool-approval callback.
const MUTATING_TOOLS: &[&str] = &[
    "write_file",
    "str_replace",
    "delete_file",
    "move_file",
    "create_directory",
    "execute_command",
];

const DEFAULT_MAX_ITERATIONS: u32 = 50;

// ─── Request / response ───────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub request_id: String,
    pub user_message: String,
    /// Extra context (open files, selections) concatenated onto the user turn.
    pub file_context: Option<String>,
    pub model: ModelConfig,
    pub provider: ProviderConfig,
    pub system_prompt: Option<String>,
    pub agent_mode: AgentMode,
    /// Explicit tool subset; `None` uses the mode catalog unfiltered.
    pub tool_names: Option<Vec<String>>,
    pub max_iterations: u32,
    pub project_path: Option<std::path::PathBuf>,
    pub conversation_history: Vec<UniversalMessage>,
    pub edit_approval: EditApprovalMode,
}

impl AgentRequest {
    pub fn new(
        user_message: impl Into<String>,
        model: ModelConfig,
        provider: ProviderConfig,
    ) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            user_message: user_message.into(),
            file_context: None,
            model,
            provider,
            system_prompt: None,
            agent_mode: AgentMode::Builder,
            tool_names: None,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            project_path: None,
            conversation_history: Vec::new(),
            edit_approval: EditApprovalMode::Ask,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AgentResponse {
    pub content: String,
    pub tool_calls_executed: Vec<ToolResult>,
    pub iterations: u32,
    pub conversation_history: Vec<UniversalMessage>,
    pub aborted: bool,
    pub error: Option<String>,
}

// ─── Event emission ───────────────────────────────────────────────────────────

/// Sequenced sender shared between the loop and its stream callback.
#[derive(Clone)]
struct Emitter {
    inner: Arc<Mutex<EmitterInner>>,
}

struct EmitterInner {
    sink: UnboundedSender<AgentEvent>,
    seq: u64,
}

impl Emitter {
    fn new(sink: UnboundedSender<AgentEvent>) -> Self {
        Self { inner: Arc::new(Mutex::new(EmitterInner { sink, seq: 0 })) }
    }

    fn emit(&self, data: AgentEventData) {
        let mut inner = self.inner.lock().unwrap();
        let event = AgentEvent { seq: inner.seq, timestamp: chrono::Utc::now(), data };
        inner.seq += 1;
        // A dropped receiver means the consumer lost interest; the run
        // itself continues.
        let _ = inner.sink.send(event);
    }
}

/// Wraps the host's path approver so the loop's event stream shows the
/// escalation before the decision is awaited.  Aborted runs resolve
/// negative without consulting the host.
struct EventedPathApprover {
    emitter: Emitter,
    abort: Arc<AtomicBool>,
    inner: Option<Arc<dyn PathApprover>>,
}

#[async_trait::async_trait]
impl PathApprover for EventedPathApprover {
    async fn approve(&self, req: &PathApprovalRequest) -> bool {
        self.emitter.emit(AgentEventData::PathApprovalRequired {
            approval_id: req.approval_id.clone(),
            file_path: req.path.display().to_string(),
            reason: req.reason.clone(),
        });
        if self.abort.load(Ordering::SeqCst) {
            return false;
        }
        match &self.inner {
            Some(inner) => inner.approve(req).await,
            None => false,
        }
    }
}

// ─── Abort handle ─────────────────────────────────────────────────────────────

/// Cooperative abort: flips a flag observed between stream callbacks,
/// before each iteration, and after a stream resolves.  Idempotent.
#[derive(Clone)]
pub struct AbortHandle {
    flag: Arc<AtomicBool>,
}

impl AbortHandle {
    pub fn abort(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

// ─── Runner ───────────────────────────────────────────────────────────────────

pub struct AgentRunner {
    transport: Arc<dyn HttpTransport>,
    executor: Arc<ToolExecutor>,
    abort: Arc<AtomicBool>,
}

impl AgentRunner {
    pub fn new(transport: Arc<dyn HttpTransport>, executor: Arc<ToolExecutor>) -> Self {
        Self { transport, executor, abort: Arc::new(AtomicBool::new(false)) }
    }

    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle { flag: Arc::clone(&self.abort) }
    }

    fn aborted(&self) -> bool {
        self.abort.load(Ordering::SeqCst)
    }

    /// Drive one run to completion.  Never panics and never returns early
    /// through `?` — every failure mode is folded into the response.
    pub async fn run(
        &self,
        request: AgentRequest,
        sink: UnboundedSender<AgentEvent>,
        tool_approver: Option<Arc<dyn ToolApprover>>,
        path_approver: Option<Arc<dyn PathApprover>>,
    ) -> AgentResponse {
        self.abort.store(false, Ordering::SeqCst);
        let emitter = Emitter::new(sink);

        let adapter = resolve_adapter(&request.model, &request.provider);
        debug!(
            request_id = %request.request_id,
            model = %request.model.id,
            format = ?adapter.format(),
            "starting agent run"
        );

        // Tool catalog: mode-filtered built-ins (optionally narrowed to an
        // explicit subset) plus namespaced MCP tools.
        let mut catalog: Vec<UniversalToolDefinition> =
            self.executor.registry().definitions_for_mode(request.agent_mode);
        if let Some(names) = &request.tool_names {
            catalog.retain(|d| names.iter().any(|n| n == &d.name));
        }
        if let Some(mcp) = self.executor.mcp() {
            catalog.extend(mcp.all_tools().await);
        }

        // Conversation seeded from history; the context window, when known,
        // doubles as the eviction threshold.
        let mut conversation = match request.model.context_window {
            Some(window) => ConversationManager::new().with_limit(window as usize),
            None => ConversationManager::new(),
        };
        conversation.seed(request.conversation_history.clone());
        let user_turn = match &request.file_context {
            Some(fc) if !fc.is_empty() => format!("{}\n\n{fc}", request.user_message),
            _ => request.user_message.clone(),
        };
        conversation.push_user(user_turn);

        let exec_ctx = ExecutionContext {
            project_root: request.project_path.clone(),
            path_approver: Some(Arc::new(EventedPathApprover {
                emitter: emitter.clone(),
                abort: Arc::clone(&self.abort),
                inner: path_approver,
            })),
            ..ExecutionContext::default()
        };

        emitter.emit(AgentEventData::Thinking {
            message: "Analyzing the task…".to_string(),
        });

        let mut total_content = String::new();
        let mut executed: Vec<ToolResult> = Vec::new();
        let mut total_usage: Option<Usage> = None;
        let mut iterations: u32 = 0;
        let mut finished = false;
        let mut error: Option<String> = None;
        // Session-wide grant for EditApprovalMode::SessionOnly.
        let mut session_grant: Option<bool> = None;

        while iterations < request.max_iterations {
            if self.aborted() {
                emitter.emit(AgentEventData::AgentAborted {
                    iteration: iterations,
                    content: total_content.clone(),
                });
                return self.respond(total_content, executed, iterations, &conversation, true, None);
            }
            iterations += 1;
            emitter.emit(AgentEventData::IterationStart {
                iteration: iterations,
                max_iterations: request.max_iterations,
            });

            let send_tools = request.model.supports_tools != Some(false) && !catalog.is_empty();
            let completion = CompletionRequest {
                messages: conversation.messages().to_vec(),
                system: request.system_prompt.clone(),
                tools: if send_tools { catalog.clone() } else { Vec::new() },
                max_output_tokens: request.model.max_output_tokens,
            };

            let url = adapter.build_url(&request.provider, &request.model);
            let headers = match adapter.build_headers(&request.provider, &request.model) {
                Ok(h) => h,
                Err(e) => {
                    let message = format!("[UNKNOWN] {e}");
                    emitter.emit(AgentEventData::AgentError {
                        error: message.clone(),
                        iteration: Some(iterations),
                    });
                    return self.respond(
                        total_content, executed, iterations, &conversation, false, Some(message),
                    );
                }
            };
            let body = adapter.build_request_body(&completion, &request.model);

            // Stream the completion through the processor, forwarding
            // incremental events; the callback's return value is the
            // transport-level cancellation handle.
            let mut processor = StreamProcessor::new(adapter);
            let status = {
                let emitter = emitter.clone();
                let abort = Arc::clone(&self.abort);
                let processor = &mut processor;
                let mut started: HashSet<u32> = HashSet::new();
                let mut on_data = move |data: StreamData| -> bool {
                    if let StreamData::Chunk(bytes) = data {
                        for delta in processor.feed(&bytes) {
                            if let Some(text) = delta.content {
                                emitter.emit(AgentEventData::TextDelta { content: text });
                            }
                            if let Some(text) = delta.reasoning_content {
                                emitter.emit(AgentEventData::ReasoningDelta { content: text });
                            }
                            for tc in delta.tool_calls.unwrap_or_default() {
                                if started.insert(tc.index) {
                                    emitter.emit(AgentEventData::ToolCallStart {
                                        index: Some(tc.index),
                                        id: tc.id.unwrap_or_default(),
                                        name: tc.name.unwrap_or_default(),
                                        arguments: None,
                                    });
                                } else if !tc.arguments.is_empty() {
                                    emitter.emit(AgentEventData::ToolCallDelta {
                                        index: tc.index,
                                        arguments: tc.arguments,
                                    });
                                }
                            }
                        }
                    }
                    !abort.load(Ordering::SeqCst)
                };
                self.transport
                    .stream_request(&url, "POST", &headers, body, &mut on_data)
                    .await
            };

            let status = match status {
                Ok(s) => s,
                Err(e) => {
                    let kind = if e.to_string().to_lowercase().contains("timeout") {
                        "TIMEOUT"
                    } else {
                        "NETWORK"
                    };
                    let message = format!("[{kind}] {e:#}");
                    emitter.emit(AgentEventData::AgentError {
                        error: message.clone(),
                        iteration: Some(iterations),
                    });
                    return self.respond(
                        total_content, executed, iterations, &conversation, false, Some(message),
                    );
                }
            };

            let outcome = processor.finish();

            if self.aborted() {
                total_content.push_str(&outcome.content);
                emitter.emit(AgentEventData::AgentAborted {
                    iteration: iterations,
                    content: total_content.clone(),
                });
                return self.respond(total_content, executed, iterations, &conversation, true, None);
            }

            if !status.ok {
                let provider_error =
                    adapter.parse_error(status.status, status.error_body.as_deref().unwrap_or(""));
                let message = provider_error.to_string();
                emitter.emit(AgentEventData::AgentError {
                    error: message.clone(),
                    iteration: Some(iterations),
                });
                return self.respond(
                    total_content, executed, iterations, &conversation, false, Some(message),
                );
            }

            total_content.push_str(&outcome.content);
            if let Some(usage) = &outcome.usage {
                total_usage.get_or_insert_with(Usage::default).add(usage);
            }

            let wants_tools = outcome.finish_reason == Some(FinishReason::ToolCalls)
                && !outcome.tool_calls.is_empty();
            if !wants_tools {
                if !outcome.content.is_empty() {
                    conversation.push_assistant(&outcome.content);
                }
                emitter.emit(AgentEventData::IterationComplete {
                    iteration: iterations,
                    tool_call_count: 0,
                    continuing: false,
                });
                finished = true;
                break;
            }

            // Persist the assistant turn first so the wire history pairs
            // every tool result with its originating call.
            conversation
                .push_assistant_with_tool_calls(&outcome.content, outcome.tool_calls.clone());

            let call_count = outcome.tool_calls.len();
            for call in &outcome.tool_calls {
                let gate = tool_approver.as_ref().filter(|_| {
                    self.needs_tool_approval(&call.name, request.edit_approval, session_grant)
                });
                let result = if let Some(approver) = gate {
                    let approval = ToolApprovalRequest {
                        approval_id: uuid::Uuid::new_v4().to_string(),
                        tool_call_id: call.id.clone(),
                        tool_name: call.name.clone(),
                        arguments: call.arguments.clone(),
                    };
                    emitter.emit(AgentEventData::ToolApprovalRequired {
                        approval_id: approval.approval_id.clone(),
                        tool_name: approval.tool_name.clone(),
                        tool_args: approval.arguments.clone(),
                        tool_call_id: approval.tool_call_id.clone(),
                    });
                    let approved = !self.aborted() && approver.approve(&approval).await;
                    // A session-wide grant latches only on approval; a
                    // decline keeps asking.
                    if approved && request.edit_approval == EditApprovalMode::SessionOnly {
                        session_grant = Some(true);
                    }
                    if approved {
                        self.executor.execute(call, &exec_ctx).await
                    } else {
                        ToolResult {
                            tool_call_id: call.id.clone(),
                            tool_name: call.name.clone(),
                            success: false,
                            output: format!("User declined this {} operation.", call.name),
                            duration_ms: None,
                        }
                    }
                } else {
                    self.executor.execute(call, &exec_ctx).await
                };

                emitter.emit(AgentEventData::ToolResult {
                    id: result.tool_call_id.clone(),
                    name: result.tool_name.clone(),
                    success: result.success,
                    output: display_output(&result.output),
                    duration_ms: result.duration_ms,
                });
                conversation.push_tool_result(&result);
                executed.push(result);
            }

            emitter.emit(AgentEventData::IterationComplete {
                iteration: iterations,
                tool_call_count: call_count,
                continuing: true,
            });
        }

        if !finished {
            let warning = format!(
                "\n\n[Maximum iterations ({}) reached; stopping the run.]",
                request.max_iterations
            );
            warn!(request_id = %request.request_id, "iteration bound reached");
            total_content.push_str(&warning);
            let message = format!(
                "maximum iterations ({}) reached before the model finished",
                request.max_iterations
            );
            error = Some(message.clone());
            emitter.emit(AgentEventData::AgentError { error: message, iteration: Some(iterations) });
        }

        emitter.emit(AgentEventData::AgentComplete {
            iterations,
            tool_calls_executed: executed.len(),
            content_length: total_content.len(),
            usage: total_usage,
        });
        self.respond(total_content, executed, iterations, &conversation, false, error)
    }

    /// The approval gate applies to the mutating tool set, only when an
    /// approver is installed, and honours the session-wide grant mode.
    fn needs_tool_approval(
        &self,
        tool_name: &str,
        mode: EditApprovalMode,
        session_grant: Option<bool>,
    ) -> bool {
        if !MUTATING_TOOLS.contains(&tool_name) {
            return false;
        }
        match mode {
            EditApprovalMode::AllowAll => false,
            EditApprovalMode::Ask => true,
            EditApprovalMode::SessionOnly => session_grant != Some(true),
        }
    }

    fn respond(
        &self,
        content: String,
        tool_calls_executed: Vec<ToolResult>,
        iterations: u32,
        conversation: &ConversationManager,
        aborted: bool,
        error: Option<String>,
    ) -> AgentResponse {
        AgentResponse {
            content,
            tool_calls_executed,
            iterations,
            conversation_history: conversation.messages().to_vec(),
            aborted,
            error,
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_mutating_tools_are_never_gated() {
        let runner = test_runner();
        assert!(!runner.needs_tool_approval("read_file", EditApprovalMode::Ask, None));
        assert!(!runner.needs_tool_approval("search_files", EditApprovalMode::Ask, None));
    }

    #[test]
    fn mutating_tools_gated_in_ask_mode() {
        let runner = test_runner();
        for tool in MUTATING_TOOLS {
            assert!(runner.needs_tool_approval(tool, EditApprovalMode::Ask, None));
            assert!(runner.needs_tool_approval(tool, EditApprovalMode::Ask, Some(true)));
        }
    }

    #[test]
    fn allow_all_disables_the_gate() {
        let runner = test_runner();
        assert!(!runner.needs_tool_approval("write_file", EditApprovalMode::AllowAll, None));
    }

    #[test]
    fn session_only_stops_gating_after_a_grant() {
        let runner = test_runner();
        assert!(runner.needs_tool_approval("write_file", EditApprovalMode::SessionOnly, None));
        assert!(!runner.needs_tool_approval("write_file", EditApprovalMode::SessionOnly, Some(true)));
        // A decline never latches: the next call asks again.
        assert!(runner.needs_tool_approval("write_file", EditApprovalMode::SessionOnly, Some(false)));
    }

    #[test]
    fn abort_handle_is_idempotent() {
        let runner = test_runner();
        let handle = runner.abort_handle();
        handle.abort();
        handle.abort();
        assert!(handle.is_aborted());
    }

    fn test_runner() -> AgentRunner {
        let transport = Arc::new(tern_model::mock::ScriptedTransport::new(vec![]));
        let registry = Arc::new(tern_tools::ToolRegistry::with_builtins());
        AgentRunner::new(transport, Arc::new(tern_tools::ToolExecutor::new(registry)))
    }
}
