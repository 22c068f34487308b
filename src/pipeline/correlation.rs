use std::fmt;
use std::future::Future;
use std::str::FromStr;

use tracing::Instrument;
use uuid::Uuid;

use crate::events::EventMetadata;

// ============================================================================
// Correlation Propagation
// ============================================================================
//
// Every command dispatch and message consumption runs inside:
//
// 1. a `tracing` span carrying handler name, message id, conversation id and
//    trace id, so every log line emitted below it is correlated
// 2. a task-local `CorrelationContext`, so events raised below it are stamped
//    with the same conversation id and trace context
//
// Both are dropped when the wrapped future completes, fails, panics or is
// cancelled.
//
// ============================================================================

tokio::task_local! {
    static CURRENT: CorrelationContext;
}

/// W3C trace context (`traceparent` header, version 00).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceContext {
    pub trace_id: u128,
    pub span_id: u64,
    pub sampled: bool,
}

impl TraceContext {
    pub fn new_root() -> Self {
        Self {
            trace_id: Uuid::new_v4().as_u128(),
            span_id: new_span_id(),
            sampled: true,
        }
    }

    /// Same trace, new span.
    pub fn child(&self) -> Self {
        Self {
            trace_id: self.trace_id,
            span_id: new_span_id(),
            sampled: self.sampled,
        }
    }

    pub fn to_traceparent(&self) -> String {
        self.to_string()
    }
}

fn new_span_id() -> u64 {
    let (high, low) = Uuid::new_v4().as_u64_pair();
    // All-zero span ids are invalid per W3C.
    match high ^ low {
        0 => 1,
        id => id,
    }
}

impl fmt::Display for TraceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "00-{:032x}-{:016x}-{:02x}",
            self.trace_id,
            self.span_id,
            if self.sampled { 1 } else { 0 }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid traceparent: {0}")]
pub struct InvalidTraceParent(pub String);

impl FromStr for TraceContext {
    type Err = InvalidTraceParent;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidTraceParent(s.to_string());
        let parts: Vec<&str> = s.trim().split('-').collect();
        let [version, trace_id, span_id, flags] = parts.as_slice() else {
            return Err(invalid());
        };
        if *version != "00" || trace_id.len() != 32 || span_id.len() != 16 || flags.len() != 2 {
            return Err(invalid());
        }

        let trace_id = u128::from_str_radix(trace_id, 16).map_err(|_| invalid())?;
        let span_id = u64::from_str_radix(span_id, 16).map_err(|_| invalid())?;
        let flags = u8::from_str_radix(flags, 16).map_err(|_| invalid())?;
        if trace_id == 0 || span_id == 0 {
            return Err(invalid());
        }

        Ok(Self {
            trace_id,
            span_id,
            sampled: flags & 0x01 == 0x01,
        })
    }
}

/// Ambient correlation data for one command or message invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelationContext {
    /// Command handler or consumer type being invoked.
    pub handler: String,
    pub message_id: Option<Uuid>,
    pub conversation_id: Option<Uuid>,
    pub trace: TraceContext,
}

impl CorrelationContext {
    /// Root context for a command that did not arrive as a message.
    pub fn for_command(handler: impl Into<String>) -> Self {
        Self {
            handler: handler.into(),
            message_id: None,
            conversation_id: Some(Uuid::now_v7()),
            trace: TraceContext::new_root(),
        }
    }

    /// Context for consuming an inbound message. The conversation falls back
    /// to the message id so follow-up events stay linked to it.
    pub fn for_message(
        consumer_type: impl Into<String>,
        message_id: Uuid,
        conversation_id: Option<Uuid>,
        activity_context: Option<&str>,
    ) -> Self {
        let trace = match activity_context.map(TraceContext::from_str) {
            Some(Ok(parent)) => parent.child(),
            Some(Err(e)) => {
                tracing::debug!(error = %e, "Ignoring inbound trace context");
                TraceContext::new_root()
            }
            None => TraceContext::new_root(),
        };

        Self {
            handler: consumer_type.into(),
            message_id: Some(message_id),
            conversation_id: Some(conversation_id.unwrap_or(message_id)),
            trace,
        }
    }

    /// Nested invocation inside this one: same conversation and trace.
    pub fn child(&self, handler: impl Into<String>) -> Self {
        Self {
            handler: handler.into(),
            message_id: self.message_id,
            conversation_id: self.conversation_id,
            trace: self.trace.child(),
        }
    }

    pub fn current() -> Option<CorrelationContext> {
        CURRENT.try_with(|ctx| ctx.clone()).ok()
    }

    /// Child of the current context, or a fresh command root.
    pub fn inherit_or_root(handler: impl Into<String>) -> Self {
        let handler = handler.into();
        match Self::current() {
            Some(parent) => parent.child(handler),
            None => Self::for_command(handler),
        }
    }

    pub fn event_metadata(&self) -> EventMetadata {
        EventMetadata::new(Some(self.trace.to_traceparent()), self.conversation_id)
    }
}

/// Run `future` with `ctx` as the ambient correlation context and inside a
/// span carrying its identifiers.
pub async fn with_correlation<F>(ctx: CorrelationContext, future: F) -> F::Output
where
    F: Future,
{
    let span = tracing::info_span!(
        "relay",
        handler = %ctx.handler,
        message_id = tracing::field::Empty,
        conversation_id = tracing::field::Empty,
        trace_id = %format!("{:032x}", ctx.trace.trace_id),
    );
    if let Some(message_id) = ctx.message_id {
        span.record("message_id", tracing::field::display(message_id));
    }
    if let Some(conversation_id) = ctx.conversation_id {
        span.record("conversation_id", tracing::field::display(conversation_id));
    }

    CURRENT.scope(ctx, future.instrument(span)).await
}
