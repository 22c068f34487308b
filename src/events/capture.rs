use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::future::Either;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::event::{CapturedEvent, DomainEvent};
use crate::error::CaptureViolation;

// ============================================================================
// Event Capture Scope
// ============================================================================
//
// Handlers call `raise(event)` anywhere below a `capture_events_of(work)`
// call; nothing threads an accumulator through the call graph.
//
// The collector lives in a tokio task-local, so it follows the future across
// worker threads and await points. Re-entering `capture_events_of` shadows the
// outer collector for the inner future: inner events belong to the inner
// scope only.
//
// `tokio::spawn` starts a fresh task without the task-local; wrap the spawned
// future in `in_current_scope` to keep it attached to the caller's scope.
//
// ============================================================================

tokio::task_local! {
    static CAPTURE_SCOPE: EventCollector;
}

/// What to do with an event raised while no scope is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapturePolicy {
    /// Drop the event and log a warning.
    #[default]
    Warn,
    /// Drop the event, log at debug level only.
    Silent,
}

static VIOLATION_POLICY: AtomicU8 = AtomicU8::new(0);

pub fn set_capture_policy(policy: CapturePolicy) {
    let raw = match policy {
        CapturePolicy::Warn => 0,
        CapturePolicy::Silent => 1,
    };
    VIOLATION_POLICY.store(raw, Ordering::Relaxed);
}

pub fn capture_policy() -> CapturePolicy {
    match VIOLATION_POLICY.load(Ordering::Relaxed) {
        1 => CapturePolicy::Silent,
        _ => CapturePolicy::Warn,
    }
}

/// Shared, append-only buffer behind one capture scope.
#[derive(Clone, Default)]
pub struct EventCollector {
    events: Arc<Mutex<Vec<CapturedEvent>>>,
}

impl EventCollector {
    /// The collector of the innermost active scope, if any.
    pub fn current() -> Option<EventCollector> {
        CAPTURE_SCOPE.try_with(|collector| collector.clone()).ok()
    }

    fn push(&self, event: CapturedEvent) {
        // Poisoning only happens if a push panicked; the Vec is still valid.
        let mut events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        events.push(event);
    }

    fn drain(&self) -> Vec<CapturedEvent> {
        let mut events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        std::mem::take(&mut *events)
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Run `work` and return its output together with every event raised while
/// it ran, in raise order.
pub async fn capture_events_of<F>(work: F) -> (F::Output, Vec<CapturedEvent>)
where
    F: Future,
{
    let collector = EventCollector::default();
    let output = CAPTURE_SCOPE.scope(collector.clone(), work).await;
    (output, collector.drain())
}

/// Attach `future` to the caller's capture scope so it can be spawned as a
/// separate task. Outside any scope the future is returned unchanged.
///
/// Events raised after the owning `capture_events_of` has returned are lost.
pub fn in_current_scope<F>(future: F) -> impl Future<Output = F::Output>
where
    F: Future,
{
    match EventCollector::current() {
        Some(collector) => Either::Left(CAPTURE_SCOPE.scope(collector, future)),
        None => Either::Right(future),
    }
}

pub fn is_capturing() -> bool {
    CAPTURE_SCOPE.try_with(|_| ()).is_ok()
}

/// Record `event` in the active capture scope.
///
/// Returns the id the event will carry as outbox row and bus message.
pub fn try_raise<E: DomainEvent>(event: E) -> Result<Uuid, CaptureViolation> {
    let captured = CapturedEvent::new(event);
    let id = captured.id;
    CAPTURE_SCOPE
        .try_with(|collector| collector.push(captured))
        .map_err(|_| CaptureViolation {
            event_type: E::event_type(),
        })?;
    Ok(id)
}

/// Record `event` in the active capture scope, dropping it (and logging per
/// `CapturePolicy`) when there is none.
pub fn raise<E: DomainEvent>(event: E) {
    if let Err(violation) = try_raise(event) {
        match capture_policy() {
            CapturePolicy::Warn => tracing::warn!(
                event_type = violation.event_type,
                "Dropping domain event raised outside of a capture scope"
            ),
            CapturePolicy::Silent => tracing::debug!(
                event_type = violation.event_type,
                "Dropping domain event raised outside of a capture scope"
            ),
        }
    }
}
