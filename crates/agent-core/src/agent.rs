//! Orchestration Loop
//!
//! Drives one turn through a three-state machine:
//!
//! ```text
//!            tool_calls non-empty
//!   REASON ───────────────────────▶ EXECUTE
//!     │   ◀───────────────────────────┘
//!     │ tool_calls empty (or cycle cap)
//!     ▼
//!    DONE
//! ```
//!
//! State is loaded from the checkpointer at the start of a turn and saved at
//! every point where it is aligned: after the user input is appended, after
//! each EXECUTE phase, and at DONE. A restored thread therefore never holds
//! unanswered tool calls and always resumes in REASON.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::{Stream, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::checkpoint::{Checkpointer, MemoryCheckpointer, ThreadId};
use crate::error::{AgentError, Result};
use crate::executor::{DEFAULT_TOOL_CONCURRENCY, ToolExecutor};
use crate::logger::{CallLogger, NoopCallLogger};
use crate::message::{
    AssistantMessage, ConversationState, Message, ToolCallRequest, ToolResultMessage,
};
use crate::provider::{GenerationOptions, LlmProvider};
use crate::reasoning::Reasoner;
use crate::tool::{Tool, ToolRegistry};

/// Content of the assistant message synthesized when a turn hits the cycle cap
pub const MAX_CYCLES_MESSAGE: &str =
    "Maximum iterations reached before a final answer was produced. Please refine the request.";

/// Agent configuration
#[derive(Clone, Debug)]
pub struct AgentConfig {
    /// System instruction prepended to every reasoning step
    pub system_prompt: String,

    /// Maximum REASON phases per turn
    pub max_cycles: usize,

    /// Maximum concurrently running tool calls
    pub tool_concurrency: usize,

    /// Per-call tool timeout
    pub tool_timeout: Option<Duration>,

    /// Fail the turn when a checkpoint cannot be saved
    pub strict_checkpoints: bool,

    /// Generation options
    pub generation: GenerationOptions,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            system_prompt: String::new(),
            max_cycles: 25,
            tool_concurrency: DEFAULT_TOOL_CONCURRENCY,
            tool_timeout: Some(Duration::from_secs(300)),
            strict_checkpoints: false,
            generation: GenerationOptions::default(),
        }
    }
}

/// A new user turn
#[derive(Clone, Debug, Default)]
pub struct UserInput {
    pub text: String,
    /// Image reference attached to this turn
    pub image: Option<String>,
}

impl UserInput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            image: None,
        }
    }

    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    /// The image reference (if any) comes first so the model reads the
    /// question with the image already in context.
    fn into_messages(self) -> Vec<Message> {
        let mut messages = Vec::with_capacity(2);
        let has_image = self.image.is_some();
        if let Some(path) = self.image {
            messages.push(Message::user_image(path));
        }
        if !self.text.is_empty() || !has_image {
            messages.push(Message::user(self.text));
        }
        messages
    }
}

/// What happened in the step that produced a [`TurnUpdate`]
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    /// REASON produced tool calls; EXECUTE is next
    ToolCallsRequested { calls: Vec<ToolCallRequest> },
    /// EXECUTE finished; every call of the batch has a result
    ToolResults { results: Vec<ToolResultMessage> },
    /// REASON produced a final answer
    Final { message: AssistantMessage },
    /// The cycle cap forced termination
    CycleCapReached { cycles: usize },
}

impl TurnEvent {
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Final { .. } | Self::CycleCapReached { .. })
    }
}

/// One item of the caller-facing turn stream
#[derive(Clone, Debug, Serialize)]
pub struct TurnUpdate {
    pub thread_id: ThreadId,
    /// Full history after this step
    pub history: Vec<Message>,
    /// Current display artifact reference
    pub display: Option<String>,
    pub event: TurnEvent,
}

/// Result of a completed turn
#[derive(Clone, Debug)]
pub struct TurnOutcome {
    pub thread_id: ThreadId,
    pub final_message: AssistantMessage,
    pub history: Vec<Message>,
    pub display: Option<String>,
    /// REASON phases run
    pub cycles: usize,
    pub hit_cycle_cap: bool,
}

/// Lazy stream of turn updates; a fatal error arrives as the last item
pub type TurnStream = Pin<Box<dyn Stream<Item = Result<TurnUpdate>> + Send>>;

enum Phase {
    Reason,
    Execute(Vec<ToolCallRequest>),
    Done {
        message: AssistantMessage,
        capped: bool,
    },
}

impl Phase {
    /// Transition out of REASON for the message it just produced
    fn after_reason(message: &AssistantMessage) -> Self {
        if message.has_tool_calls() {
            Self::Execute(message.tool_calls.clone())
        } else {
            Self::Done {
                message: message.clone(),
                capped: false,
            }
        }
    }
}

/// Serializes turns per thread; different threads proceed independently
#[derive(Debug, Default)]
struct ThreadLocks {
    locks: Mutex<HashMap<ThreadId, Arc<tokio::sync::Mutex<()>>>>,
}

impl ThreadLocks {
    fn lock_for(&self, thread: &ThreadId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        Arc::clone(locks.entry(thread.clone()).or_default())
    }
}

type UpdateSender = UnboundedSender<Result<TurnUpdate>>;

/// The tool-orchestration agent
pub struct Agent {
    reasoner: Reasoner,
    executor: ToolExecutor,
    checkpointer: Arc<dyn Checkpointer>,
    config: AgentConfig,
    locks: ThreadLocks,
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("reasoner", &self.reasoner)
            .field("executor", &self.executor)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Agent {
    pub fn new(
        reasoner: Reasoner,
        executor: ToolExecutor,
        checkpointer: Arc<dyn Checkpointer>,
        config: AgentConfig,
    ) -> Self {
        Self {
            reasoner,
            executor,
            checkpointer,
            config,
            locks: ThreadLocks::default(),
        }
    }

    pub fn builder() -> AgentBuilder {
        AgentBuilder::new()
    }

    /// Run a turn to completion
    pub async fn run_turn(&self, thread: &ThreadId, input: UserInput) -> Result<TurnOutcome> {
        self.drive(thread, input, None).await
    }

    /// Run a turn, yielding an update after every REASON/EXECUTE step.
    ///
    /// Nothing happens until the stream is first polled. Once started the
    /// turn runs to completion (and is checkpointed) even if the stream is
    /// dropped.
    pub fn stream_turn(self: &Arc<Self>, thread: ThreadId, input: UserInput) -> TurnStream {
        let agent = Arc::clone(self);
        let started = futures::stream::once(async move {
            let (tx, rx) = mpsc::unbounded_channel();
            tokio::spawn(async move {
                if let Err(e) = agent.drive(&thread, input, Some(&tx)).await {
                    // Receiver gone means nobody is listening for the error either.
                    let _ = tx.send(Err(e));
                }
            });
            UnboundedReceiverStream::new(rx)
        });
        Box::pin(started.flatten())
    }

    /// Current checkpointed history of a thread
    pub async fn history(&self, thread: &ThreadId) -> Result<Vec<Message>> {
        Ok(self
            .checkpointer
            .load(thread)
            .await?
            .map(ConversationState::into_messages)
            .unwrap_or_default())
    }

    /// Forget a thread
    pub async fn clear_thread(&self, thread: &ThreadId) -> Result<()> {
        tracing::info!(thread = %thread, "Clearing thread");
        self.checkpointer.delete(thread).await
    }

    pub fn tools(&self) -> &ToolRegistry {
        self.executor.registry()
    }

    pub fn provider(&self) -> &Arc<dyn LlmProvider> {
        self.reasoner.provider()
    }

    pub fn checkpointer(&self) -> &Arc<dyn Checkpointer> {
        &self.checkpointer
    }

    pub const fn config(&self) -> &AgentConfig {
        &self.config
    }

    async fn drive(
        &self,
        thread: &ThreadId,
        input: UserInput,
        updates: Option<&UpdateSender>,
    ) -> Result<TurnOutcome> {
        let lock = self.locks.lock_for(thread);
        let _turn = lock.lock().await;

        let mut state = self.restore(thread).await?;
        let mut display = input.image.clone();
        tracing::info!(thread = %thread, prior_messages = state.len(), "Starting turn");

        state.extend(input.into_messages());
        self.checkpoint(thread, &state).await?;

        let mut cycles = 0;
        let mut phase = Phase::Reason;

        loop {
            phase = match phase {
                Phase::Reason if cycles >= self.config.max_cycles => {
                    tracing::warn!(thread = %thread, cycles, "Cycle cap reached, forcing termination");
                    let message = AssistantMessage::new(MAX_CYCLES_MESSAGE);
                    state.push(message.clone());
                    Phase::Done {
                        message,
                        capped: true,
                    }
                }
                Phase::Reason => {
                    cycles += 1;
                    let mut message = self.reasoner.reason(&state).await.inspect_err(|e| {
                        tracing::error!(thread = %thread, cycle = cycles, error = %e, "Reasoning step failed");
                    })?;
                    let renamed = message.dedupe_call_ids();
                    if renamed > 0 {
                        tracing::warn!(thread = %thread, renamed, "Model repeated tool call ids, renamed duplicates");
                    }
                    state.push(message.clone());

                    let next = Phase::after_reason(&message);
                    if let Phase::Execute(calls) = &next {
                        let event = TurnEvent::ToolCallsRequested {
                            calls: calls.clone(),
                        };
                        emit(updates, thread, &state, display.as_deref(), event);
                    }
                    next
                }
                Phase::Execute(calls) => {
                    let results = self.executor.execute(&calls).await;
                    if let Some(artifact) = results.iter().rev().find_map(|r| r.artifact.clone()) {
                        display = Some(artifact);
                    }
                    state.extend(results.iter().cloned());
                    self.checkpoint(thread, &state).await?;

                    emit(updates, thread, &state, display.as_deref(), TurnEvent::ToolResults { results });
                    Phase::Reason
                }
                Phase::Done { message, capped } => {
                    self.checkpoint(thread, &state).await?;

                    let event = if capped {
                        TurnEvent::CycleCapReached { cycles }
                    } else {
                        TurnEvent::Final {
                            message: message.clone(),
                        }
                    };
                    emit(updates, thread, &state, display.as_deref(), event);
                    tracing::info!(thread = %thread, cycles, capped, "Turn finished");

                    return Ok(TurnOutcome {
                        thread_id: thread.clone(),
                        final_message: message,
                        history: state.into_messages(),
                        display,
                        cycles,
                        hit_cycle_cap: capped,
                    });
                }
            };
        }
    }

    async fn restore(&self, thread: &ThreadId) -> Result<ConversationState> {
        let state = self.checkpointer.load(thread).await?.unwrap_or_default();
        state.validate_alignment()?;
        Ok(state)
    }

    async fn checkpoint(&self, thread: &ThreadId, state: &ConversationState) -> Result<()> {
        match self.checkpointer.save(thread, state).await {
            Ok(()) => Ok(()),
            Err(e) if self.config.strict_checkpoints => Err(e),
            Err(e) => {
                tracing::warn!(thread = %thread, error = %e, "Checkpoint save failed, continuing");
                Ok(())
            }
        }
    }
}

fn emit(
    updates: Option<&UpdateSender>,
    thread: &ThreadId,
    state: &ConversationState,
    display: Option<&str>,
    event: TurnEvent,
) {
    let Some(tx) = updates else { return };
    let update = TurnUpdate {
        thread_id: thread.clone(),
        history: state.messages().to_vec(),
        display: display.map(str::to_owned),
        event,
    };
    if tx.send(Ok(update)).is_err() {
        tracing::debug!(thread = %thread, "Turn stream dropped, continuing without updates");
    }
}

/// Builder for [`Agent`]
pub struct AgentBuilder {
    provider: Option<Arc<dyn LlmProvider>>,
    tools: ToolRegistry,
    checkpointer: Option<Arc<dyn Checkpointer>>,
    logger: Option<Arc<dyn CallLogger>>,
    config: AgentConfig,
}

impl Default for AgentBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentBuilder {
    pub fn new() -> Self {
        Self {
            provider: None,
            tools: ToolRegistry::new(),
            checkpointer: None,
            logger: None,
            config: AgentConfig::default(),
        }
    }

    #[must_use]
    pub fn provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    #[must_use]
    pub fn tool<T: Tool + 'static>(mut self, tool: T) -> Self {
        self.tools.register(tool);
        self
    }

    #[must_use]
    pub fn tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    #[must_use]
    pub fn checkpointer(mut self, checkpointer: Arc<dyn Checkpointer>) -> Self {
        self.checkpointer = Some(checkpointer);
        self
    }

    #[must_use]
    pub fn call_logger(mut self, logger: Arc<dyn CallLogger>) -> Self {
        self.logger = Some(logger);
        self
    }

    #[must_use]
    pub fn config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = prompt.into();
        self
    }

    #[must_use]
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.generation.model = model.into();
        self
    }

    #[must_use]
    pub const fn max_cycles(mut self, max: usize) -> Self {
        self.config.max_cycles = max;
        self
    }

    #[must_use]
    pub const fn tool_concurrency(mut self, concurrency: usize) -> Self {
        self.config.tool_concurrency = concurrency;
        self
    }

    #[must_use]
    pub const fn tool_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.tool_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn strict_checkpoints(mut self, strict: bool) -> Self {
        self.config.strict_checkpoints = strict;
        self
    }

    pub fn build(self) -> Result<Agent> {
        let provider = self
            .provider
            .ok_or_else(|| AgentError::Config("Provider is required".into()))?;
        if self.config.max_cycles == 0 {
            return Err(AgentError::Config("max_cycles must be at least 1".into()));
        }

        let schemas = self.tools.schemas();
        let executor = ToolExecutor::new(Arc::new(self.tools))
            .with_concurrency(self.config.tool_concurrency)
            .with_timeout(self.config.tool_timeout)
            .with_logger(self.logger.unwrap_or_else(|| Arc::new(NoopCallLogger)));
        let reasoner = Reasoner::new(
            provider,
            self.config.system_prompt.clone(),
            schemas,
            self.config.generation.clone(),
        );
        let checkpointer = self
            .checkpointer
            .unwrap_or_else(|| Arc::new(MemoryCheckpointer::new()));

        Ok(Agent::new(reasoner, executor, checkpointer, self.config))
    }
}
