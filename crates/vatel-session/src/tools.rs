//! Tool calls: the agent asks, the client answers with one output per id.

use async_trait::async_trait;
use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, PoisonError},
};
use tokio::task::JoinSet;
use tracing::{Instrument, debug, info, info_span, warn};
use vatel_realtime::{MessageSink, SessionError};
use vatel_types::{Message, ToolCall, ToolCallArgument};

/// Output sent when no handler is registered or the handler fails.
pub const DEFAULT_TOOL_OUTPUT: &str = "ok";

/// A tool invocation as handed to a [`ToolHandler`].
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallRequest {
    pub tool_call_id: String,
    pub tool_name: String,
    pub arguments: Vec<ToolCallArgument>,
}

impl ToolCallRequest {
    /// The first argument called `name`, if any.
    pub fn argument(&self, name: &str) -> Option<&ToolCallArgument> {
        self.arguments
            .iter()
            .find(|argument| argument.name.as_deref() == Some(name))
    }
}

impl From<ToolCall> for ToolCallRequest {
    fn from(call: ToolCall) -> Self {
        Self {
            tool_call_id: call.tool_call_id,
            tool_name: call.tool_name,
            arguments: call.arguments,
        }
    }
}

/// Runs tools on behalf of the remote agent.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Returns the output string sent back to the agent.
    async fn call(&self, request: ToolCallRequest) -> anyhow::Result<String>;
}

/// Routes calls to per-tool handlers by tool name.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    handlers: HashMap<String, Arc<dyn ToolHandler>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, tool_name: impl Into<String>, handler: Arc<dyn ToolHandler>) -> Self {
        self.handlers.insert(tool_name.into(), handler);
        self
    }

    pub fn tool_names(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }
}

#[async_trait]
impl ToolHandler for ToolRegistry {
    async fn call(&self, request: ToolCallRequest) -> anyhow::Result<String> {
        match self.handlers.get(&request.tool_name) {
            Some(handler) => handler.call(request).await,
            None => anyhow::bail!("no handler registered for tool {:?}", request.tool_name),
        }
    }
}

type PendingSet = Arc<Mutex<HashSet<String>>>;

/// Tracks outstanding tool calls and answers each exactly once.
///
/// Every accepted call runs on its own task, so a slow tool never stalls the
/// read loop. Outputs are correlated by id only; concurrent calls may finish
/// in any order.
pub struct ToolCallCoordinator {
    sink: Arc<dyn MessageSink>,
    handler: Option<Arc<dyn ToolHandler>>,
    fallback_output: String,
    pending: PendingSet,
    tasks: JoinSet<()>,
}

impl ToolCallCoordinator {
    pub fn new(
        sink: Arc<dyn MessageSink>,
        handler: Option<Arc<dyn ToolHandler>>,
        fallback_output: impl Into<String>,
    ) -> Self {
        Self {
            sink,
            handler,
            fallback_output: fallback_output.into(),
            pending: Arc::default(),
            tasks: JoinSet::new(),
        }
    }

    /// Registers `call` and starts answering it in the background.
    ///
    /// Returns `false` without doing anything if a call with the same id is
    /// still outstanding.
    pub fn dispatch(&mut self, call: ToolCall) -> bool {
        // Reap finished tasks so the set does not grow for the whole session.
        while self.tasks.try_join_next().is_some() {}

        let request = ToolCallRequest::from(call);
        if !lock(&self.pending).insert(request.tool_call_id.clone()) {
            warn!(
                tool_call_id = %request.tool_call_id,
                tool = %request.tool_name,
                "Ignoring duplicate tool call id."
            );
            return false;
        }

        let span = info_span!(
            "tool_call",
            tool_call_id = %request.tool_call_id,
            tool = %request.tool_name
        );
        let sink = self.sink.clone();
        let handler = self.handler.clone();
        let pending = self.pending.clone();
        let fallback = self.fallback_output.clone();
        self.tasks.spawn(
            async move {
                let tool_call_id = request.tool_call_id.clone();
                let output = match handler {
                    Some(handler) => match handler.call(request).await {
                        Ok(output) => output,
                        Err(e) => {
                            warn!(error = %e, "Tool handler failed; sending fallback output.");
                            fallback
                        }
                    },
                    None => {
                        debug!("No tool handler registered; sending fallback output.");
                        fallback
                    }
                };
                if let Err(e) = send_output(&pending, sink.as_ref(), &tool_call_id, output).await {
                    warn!(error = %e, "Failed to send tool call output.");
                }
            }
            .instrument(span),
        );
        true
    }

    /// Sends `output` for an outstanding call.
    ///
    /// Fails with [`SessionError::UnknownToolCall`] without writing anything
    /// if `tool_call_id` is not pending.
    pub async fn complete(
        &self,
        tool_call_id: &str,
        output: impl Into<String>,
    ) -> Result<(), SessionError> {
        send_output(&self.pending, self.sink.as_ref(), tool_call_id, output.into()).await
    }

    pub fn is_pending(&self, tool_call_id: &str) -> bool {
        lock(&self.pending).contains(tool_call_id)
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.pending).len()
    }

    /// Waits for every in-flight tool task to finish.
    pub async fn join_all(&mut self) {
        while self.tasks.join_next().await.is_some() {}
    }

    /// Cancels in-flight tool tasks and forgets their pending records.
    /// Returns how many calls were left unanswered.
    pub async fn abort_all(&mut self) -> usize {
        self.tasks.abort_all();
        while self.tasks.join_next().await.is_some() {}
        let unanswered = {
            let mut pending = lock(&self.pending);
            let unanswered = pending.len();
            pending.clear();
            unanswered
        };
        if unanswered > 0 {
            info!(unanswered, "Abandoned outstanding tool calls.");
        }
        unanswered
    }
}

/// Claims the pending record, then writes the output. Claiming first means a
/// second completion for the same id fails instead of sending twice.
async fn send_output(
    pending: &Mutex<HashSet<String>>,
    sink: &dyn MessageSink,
    tool_call_id: &str,
    output: String,
) -> Result<(), SessionError> {
    let claimed = lock(pending).remove(tool_call_id);
    if !claimed {
        return Err(SessionError::UnknownToolCall(tool_call_id.to_string()));
    }
    sink.send(Message::tool_call_output(tool_call_id, output))
        .await
}

fn lock(pending: &Mutex<HashSet<String>>) -> std::sync::MutexGuard<'_, HashSet<String>> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}
