//! Tool Executor
//!
//! Runs one batch of tool calls and returns exactly one result message per
//! call. Failures never escape: an unknown tool, a validation error, a tool
//! error, a timeout or a panic all become tool-result text the model can
//! read and recover from.
//!
//! Batches of more than one call are spawned onto the runtime and bounded by
//! a semaphore; the executor only returns once every call has finished.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::Semaphore;

use crate::error::{AgentError, Result};
use crate::logger::{CallLogger, NoopCallLogger};
use crate::message::{ToolCallRequest, ToolResultMessage};
use crate::tool::{Tool, ToolOutput, ToolRegistry};

/// Content returned when the model asks for a tool that is not registered
pub const INVALID_TOOL_SENTINEL: &str = "invalid tool, please retry";

/// Default cap on concurrently running tool calls
pub const DEFAULT_TOOL_CONCURRENCY: usize = 4;

/// Prefix of the content returned when a tool call fails
pub const TOOL_FAILURE_PREFIX: &str = "Tool execution failed: ";

/// Executes tool-call batches against a shared registry
#[derive(Clone)]
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    logger: Arc<dyn CallLogger>,
    limiter: Arc<Semaphore>,
    concurrency: usize,
    timeout: Option<Duration>,
}

impl std::fmt::Debug for ToolExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolExecutor")
            .field("registry", &self.registry)
            .field("concurrency", &self.concurrency)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            logger: Arc::new(NoopCallLogger),
            limiter: Arc::new(Semaphore::new(DEFAULT_TOOL_CONCURRENCY)),
            concurrency: DEFAULT_TOOL_CONCURRENCY,
            timeout: None,
        }
    }

    /// Cap concurrently running calls. Zero is treated as one.
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self.limiter = Arc::new(Semaphore::new(self.concurrency));
        self
    }

    /// Per-call timeout
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_logger(mut self, logger: Arc<dyn CallLogger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub const fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Execute a batch.
    ///
    /// Returns one result per request, linked by `call_id`. Results are in
    /// completion order, not request order.
    pub async fn execute(&self, calls: &[ToolCallRequest]) -> Vec<ToolResultMessage> {
        let results = match calls {
            [] => Vec::new(),
            [call] => vec![self.execute_inline(call).await],
            _ => self.execute_parallel(calls).await,
        };

        self.logger.log(&results).await;
        results
    }

    async fn execute_inline(&self, call: &ToolCallRequest) -> ToolResultMessage {
        match self.registry.get(&call.name) {
            Some(tool) => invoke_one(tool, call, self.timeout).await,
            None => unknown_tool(call),
        }
    }

    async fn execute_parallel(&self, calls: &[ToolCallRequest]) -> Vec<ToolResultMessage> {
        tracing::debug!(
            calls = calls.len(),
            limit = self.concurrency,
            "Running tool batch in parallel"
        );

        let mut results = Vec::with_capacity(calls.len());
        let mut pending = FuturesUnordered::new();

        for call in calls {
            let Some(tool) = self.registry.get(&call.name) else {
                results.push(unknown_tool(call));
                continue;
            };

            let limiter = Arc::clone(&self.limiter);
            let timeout = self.timeout;
            let owned = call.clone();
            let handle = tokio::spawn(async move {
                // Only fails if the semaphore is closed, which never happens.
                let _permit = limiter.acquire_owned().await.ok();
                invoke_one(tool, &owned, timeout).await
            });
            let call = call.clone();
            pending.push(async move { (call, handle.await) });
        }

        while let Some((call, joined)) = pending.next().await {
            let result = joined.unwrap_or_else(|e| {
                let reason = if e.is_panic() {
                    "tool panicked".to_string()
                } else {
                    e.to_string()
                };
                tracing::warn!(tool = %call.name, id = %call.id, %reason, "Tool task did not complete");
                failure(&call, &reason)
            });
            results.push(result);
        }

        results
    }
}

async fn invoke_one(
    tool: Arc<dyn Tool>,
    call: &ToolCallRequest,
    timeout: Option<Duration>,
) -> ToolResultMessage {
    tracing::debug!(tool = %call.name, id = %call.id, "Executing tool");

    let outcome = AssertUnwindSafe(run_tool(tool.as_ref(), &call.arguments, timeout))
        .catch_unwind()
        .await
        .unwrap_or_else(|_| Err(AgentError::ToolExecution("tool panicked".into())));

    match outcome {
        Ok(output) => {
            tracing::debug!(tool = %call.name, id = %call.id, "Tool completed");
            ToolResultMessage::for_call(call, output.render()).with_artifact(output.artifact)
        }
        Err(e) => {
            tracing::warn!(tool = %call.name, id = %call.id, error = %e, "Tool failed");
            failure(call, &e.to_string())
        }
    }
}

async fn run_tool(
    tool: &dyn Tool,
    args: &serde_json::Value,
    timeout: Option<Duration>,
) -> Result<ToolOutput> {
    tool.validate(args)?;
    match timeout {
        Some(limit) => tokio::time::timeout(limit, tool.invoke(args))
            .await
            .map_err(|_| AgentError::ToolTimeout(limit.as_secs()))?,
        None => tool.invoke(args).await,
    }
}

fn unknown_tool(call: &ToolCallRequest) -> ToolResultMessage {
    tracing::warn!(tool = %call.name, id = %call.id, "Model requested unknown tool");
    ToolResultMessage::for_call(call, INVALID_TOOL_SENTINEL)
}

fn failure(call: &ToolCallRequest, description: &str) -> ToolResultMessage {
    ToolResultMessage::for_call(call, format!("{TOOL_FAILURE_PREFIX}{description}"))
}
