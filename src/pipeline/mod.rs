// ============================================================================
// Relay Pipeline - filters wrapped around command and consumer execution
// ============================================================================
//
// - correlation:  span + task-local trace/conversation context
// - relay_filter: capture → append in the business transaction → publish
// - idempotency:  inbox ledger check/insert around bus consumers
//
// ============================================================================

pub mod correlation;
pub mod idempotency;
pub mod relay_filter;

pub use correlation::{with_correlation, CorrelationContext, InvalidTraceParent, TraceContext};
pub use idempotency::{ConsumeOutcome, IdempotentConsumer, MessageConsumer};
pub use relay_filter::{CommandHandler, InlineRelay, PendingPublish, PublishSummary};
