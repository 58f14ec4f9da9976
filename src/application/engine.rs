//! Component F: the Request/Response Engine.
//!
//! Grounded on `support::ocpp_frame` for the wire shape and on the teacher's
//! `session/manager.rs::SessionManager::send_to` for the "one send path, report
//! failure instead of blocking" shape — generalized into the full `spec.md` §4.F
//! state machine: at most one in-flight outgoing Call, msgId pairing, CallError
//! synthesis for malformed/unknown/oversized inbound Calls, and per-Request
//! timeout expiry. The engine never decides retry-vs-abort itself (`spec.md`
//! §7 leaves that to the owning service); it only reports what happened.

use crate::application::error::EngineError;
use crate::application::operations::{Operation, OperationRegistry};
use crate::application::queue::{Request, RequestOrigin, RequestQueue};
use crate::ports::Connection;
use crate::support::json_pool::CapacityExceeded;
use crate::support::{CallErrorCode, JsonPool, OcppFrame};
use serde_json::Value;
use tracing::{debug, warn};

/// What happened to a `Request` this tick, once it stopped being in-flight.
pub enum CompletionStatus {
    Confirmed,
    Errored { code: String, description: String },
    TimedOut,
}

/// One outgoing Request's final (or timed-out, possibly-retryable) outcome.
pub struct Completion {
    pub origin: RequestOrigin,
    pub op_nr: u64,
    pub attempt_nr: u32,
    pub operation: Box<dyn Operation>,
    pub status: CompletionStatus,
}

/// An inbound Call whose payload parsed successfully and whose `action` was
/// known to the registry. The engine has not yet applied any side effects —
/// the owning service downcasts `operation.as_any_mut()`, populates the
/// response fields, and hands it back via [`Engine::respond`] or
/// [`Engine::reject`].
pub struct InboundCall {
    pub unique_id: String,
    pub operation: Box<dyn Operation>,
}

#[derive(Default)]
pub struct TickOutcome {
    pub completions: Vec<Completion>,
    pub inbound_calls: Vec<InboundCall>,
}

struct InFlight {
    unique_id: String,
    request: Request,
}

pub struct Engine {
    registry: OperationRegistry,
    json_pool: JsonPool,
    queue: RequestQueue,
    in_flight: Option<InFlight>,
}

impl Engine {
    pub fn new(registry: OperationRegistry, json_pool: JsonPool, queue: RequestQueue) -> Self {
        Self {
            registry,
            json_pool,
            queue,
            in_flight: None,
        }
    }

    pub fn queue(&self) -> &RequestQueue {
        &self.queue
    }

    pub fn queue_mut(&mut self) -> &mut RequestQueue {
        &mut self.queue
    }

    pub fn has_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    /// One engine tick: drain inbound frames, expire a stale in-flight Call,
    /// then (if the slot is free) dequeue and send the next Request.
    ///
    /// Split into [`Engine::receive`]/[`Engine::send_next`] so a caller that
    /// applies a completion's side effects (e.g. `Context::dispatch_completion`
    /// restamping a still-queued Request) can do so between the two halves —
    /// otherwise a Request dequeued by the same call that just confirmed the
    /// Request ahead of it in the queue would go out before that side effect
    /// ever ran.
    pub fn tick<C: Connection>(&mut self, conn: &mut C, now_ms: u64, boot_gate_open: bool) -> TickOutcome {
        let outcome = self.receive(conn, now_ms);
        self.send_next(conn, now_ms, boot_gate_open);
        outcome
    }

    /// Drain inbound frames and expire a stale in-flight Call. Does not send.
    pub fn receive<C: Connection>(&mut self, conn: &mut C, now_ms: u64) -> TickOutcome {
        let mut outcome = TickOutcome::default();

        while let Some(raw) = conn.try_recv() {
            self.handle_inbound_frame(conn, &raw, &mut outcome);
        }

        if let Some(completion) = self.expire_if_timed_out(now_ms) {
            outcome.completions.push(completion);
        }

        outcome
    }

    /// Dequeue and send the next Request, if the in-flight slot is free.
    pub fn send_next<C: Connection>(&mut self, conn: &mut C, now_ms: u64, boot_gate_open: bool) {
        if self.in_flight.is_none() {
            self.try_send_next(conn, now_ms, boot_gate_open);
        }
    }

    fn handle_inbound_frame<C: Connection>(&mut self, conn: &mut C, raw: &str, outcome: &mut TickOutcome) {
        if self.json_pool.check_capacity(raw).is_err() {
            if let Some(unique_id) = salvage_unique_id(raw) {
                let err = EngineError::JsonCapacityExceeded(CapacityExceeded);
                self.send_call_error(conn, &unique_id, err.call_error_code(), "document too large");
            }
            return;
        }

        let frame = match OcppFrame::parse(raw) {
            Ok(frame) => frame,
            Err(parse_err) => {
                if let Some(unique_id) = salvage_unique_id(raw) {
                    let description = parse_err.to_string();
                    let err = EngineError::Frame(parse_err);
                    self.send_call_error(conn, &unique_id, err.call_error_code(), &description);
                } else {
                    warn!("dropping unparseable frame with no recoverable msgId: {parse_err}");
                }
                return;
            }
        };

        match frame {
            OcppFrame::Call {
                unique_id,
                action,
                payload,
            } => self.handle_inbound_call(conn, unique_id, action, payload, outcome),
            OcppFrame::CallResult { unique_id, payload } => {
                self.handle_call_result(unique_id, payload, outcome);
            }
            OcppFrame::CallError {
                unique_id,
                error_code,
                error_description,
                ..
            } => {
                self.handle_call_error(unique_id, error_code, error_description, outcome);
            }
        }
    }

    fn handle_inbound_call<C: Connection>(
        &mut self,
        conn: &mut C,
        unique_id: String,
        action: String,
        payload: Value,
        outcome: &mut TickOutcome,
    ) {
        let Some(mut operation) = self.registry.create(&action) else {
            let err = EngineError::UnknownAction(action);
            self.send_call_error(conn, &unique_id, err.call_error_code(), &err.to_string());
            return;
        };
        if let Err(code) = operation.process_req(&payload) {
            self.send_call_error(conn, &unique_id, code, "malformed request payload");
            return;
        }
        outcome.inbound_calls.push(InboundCall { unique_id, operation });
    }

    /// Serialize `operation.create_conf()` and send it as the CallResult for
    /// `unique_id`, once a service has populated the operation's response
    /// fields via `as_any_mut`.
    pub fn respond<C: Connection>(&mut self, conn: &mut C, unique_id: &str, operation: &dyn Operation) {
        let frame = OcppFrame::call_result(unique_id, operation.create_conf());
        let text = match frame.serialize() {
            Ok(text) => text,
            Err(err) => {
                warn!("failed to serialize CallResult for {unique_id}: {err}");
                return;
            }
        };
        if self.json_pool.check_capacity(&text).is_err() {
            let err = EngineError::JsonCapacityExceeded(CapacityExceeded);
            self.send_call_error(conn, unique_id, err.call_error_code(), "response exceeded json pool capacity");
            return;
        }
        if !conn.send(&text) {
            warn!("failed to send CallResult for {unique_id}: connection not online");
        }
    }

    pub fn reject<C: Connection>(&mut self, conn: &mut C, unique_id: &str, code: CallErrorCode, description: &str) {
        self.send_call_error(conn, unique_id, code, description);
    }

    fn send_call_error<C: Connection>(&mut self, conn: &mut C, unique_id: &str, code: CallErrorCode, description: &str) {
        let frame = OcppFrame::error_response(unique_id, code.as_str(), description);
        if let Ok(text) = frame.serialize() {
            let _ = conn.send(&text);
        }
    }

    fn handle_call_result(&mut self, unique_id: String, payload: Value, outcome: &mut TickOutcome) {
        let Some(in_flight) = self.in_flight.take() else {
            warn!("received CallResult {unique_id} with no in-flight Call; discarding");
            return;
        };
        if in_flight.unique_id != unique_id {
            warn!(
                "stale CallResult {unique_id} does not match in-flight {}; discarding",
                in_flight.unique_id
            );
            self.in_flight = Some(in_flight);
            return;
        }
        let mut request = in_flight.request;
        let status = match request.operation.process_conf(&payload) {
            Ok(()) => CompletionStatus::Confirmed,
            Err(code) => CompletionStatus::Errored {
                code: code.to_string(),
                description: "malformed CallResult payload".to_string(),
            },
        };
        outcome.completions.push(Completion {
            origin: request.origin,
            op_nr: request.op_nr,
            attempt_nr: request.attempt_nr,
            operation: std::mem::replace(&mut request.operation, Box::new(NullOperation)),
            status,
        });
    }

    fn handle_call_error(&mut self, unique_id: String, error_code: String, error_description: String, outcome: &mut TickOutcome) {
        let Some(in_flight) = self.in_flight.take() else {
            warn!("received CallError {unique_id} with no in-flight Call; discarding");
            return;
        };
        if in_flight.unique_id != unique_id {
            self.in_flight = Some(in_flight);
            return;
        }
        let request = in_flight.request;
        outcome.completions.push(Completion {
            origin: request.origin,
            op_nr: request.op_nr,
            attempt_nr: request.attempt_nr,
            operation: request.operation,
            status: CompletionStatus::Errored {
                code: error_code,
                description: error_description,
            },
        });
    }

    fn expire_if_timed_out(&mut self, now_ms: u64) -> Option<Completion> {
        let timed_out = match &self.in_flight {
            Some(in_flight) => {
                let last = in_flight.request.last_attempt_tick.unwrap_or(now_ms);
                now_ms.saturating_sub(last) > in_flight.request.timeout_ms
            }
            None => false,
        };
        if !timed_out {
            return None;
        }
        let in_flight = self.in_flight.take()?;
        let request = in_flight.request;
        Some(Completion {
            origin: request.origin,
            op_nr: request.op_nr,
            attempt_nr: request.attempt_nr,
            operation: request.operation,
            status: CompletionStatus::TimedOut,
        })
    }

    fn try_send_next<C: Connection>(&mut self, conn: &mut C, now_ms: u64, boot_gate_open: bool) {
        let Some(mut request) = self.queue.pop_next(boot_gate_open) else {
            return;
        };
        let unique_id = OcppFrame::unique_id();
        let frame = OcppFrame::call(unique_id.clone(), request.operation.action(), request.operation.create_req());
        let text = match frame.serialize() {
            Ok(text) => text,
            Err(err) => {
                warn!("failed to serialize outgoing {}: {err}", request.operation.action());
                return;
            }
        };
        if !conn.send(&text) {
            debug!("connection not online; re-queuing {}", request.operation.action());
            self.queue.requeue_front(request);
            return;
        }
        request.attempt_nr += 1;
        request.last_attempt_tick = Some(now_ms);
        self.in_flight = Some(InFlight { unique_id, request });
    }
}

/// Inert placeholder used only to satisfy `Box<dyn Operation>`'s move-out
/// requirement in [`Engine::handle_call_result`]; never observed by a caller.
#[derive(Debug, Default)]
struct NullOperation;

impl Operation for NullOperation {
    fn action(&self) -> &'static str {
        "_Null"
    }
    fn create_req(&self) -> Value {
        Value::Null
    }
    fn process_req(&mut self, _payload: &Value) -> Result<(), CallErrorCode> {
        Err(CallErrorCode::NotImplemented)
    }
    fn create_conf(&self) -> Value {
        Value::Null
    }
    fn process_conf(&mut self, _payload: &Value) -> Result<(), CallErrorCode> {
        Ok(())
    }
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

fn salvage_unique_id(raw: &str) -> Option<String> {
    let value: Value = serde_json::from_str(raw).ok()?;
    let array = value.as_array()?;
    array.get(1)?.as_str().map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::operations::core::HeartbeatOp;
    use crate::ports::NoopConnection;
    use serde_json::json;

    fn engine() -> Engine {
        Engine::new(OperationRegistry::new(), JsonPool::default(), RequestQueue::new(4))
    }

    #[test]
    fn sends_next_queued_request_when_online() {
        let mut engine = engine();
        let mut conn = NoopConnection::new();
        conn.set_online(true);
        engine
            .queue_mut()
            .push_volatile(RequestOrigin::Heartbeat, Box::new(HeartbeatOp::default()), 40_000);
        let outcome = engine.tick(&mut conn, 0, true);
        assert!(outcome.completions.is_empty());
        assert!(engine.has_in_flight());
        assert_eq!(conn.sent().len(), 1);
        assert!(conn.sent()[0].starts_with("[2,"));
    }

    #[test]
    fn matches_call_result_by_unique_id_and_completes() {
        let mut engine = engine();
        let mut conn = NoopConnection::new();
        conn.set_online(true);
        engine
            .queue_mut()
            .push_volatile(RequestOrigin::Heartbeat, Box::new(HeartbeatOp::default()), 40_000);
        engine.tick(&mut conn, 0, true);
        let sent = conn.sent()[0].clone();
        let unique_id = OcppFrame::parse(&sent).unwrap().unique_id_of().to_string();
        let result = OcppFrame::call_result(unique_id, json!({"currentTime": "2023-01-01T00:00:00Z"}))
            .serialize()
            .unwrap();
        conn.push_incoming(result);
        let outcome = engine.tick(&mut conn, 10, true);
        assert_eq!(outcome.completions.len(), 1);
        assert!(matches!(outcome.completions[0].status, CompletionStatus::Confirmed));
        assert!(!engine.has_in_flight());
    }

    #[test]
    fn stale_call_result_is_discarded() {
        let mut engine = engine();
        let mut conn = NoopConnection::new();
        conn.set_online(true);
        engine
            .queue_mut()
            .push_volatile(RequestOrigin::Heartbeat, Box::new(HeartbeatOp::default()), 40_000);
        engine.tick(&mut conn, 0, true);
        conn.push_incoming(
            OcppFrame::call_result("not-the-real-id", json!({}))
                .serialize()
                .unwrap(),
        );
        let outcome = engine.tick(&mut conn, 5, true);
        assert!(outcome.completions.is_empty());
        assert!(engine.has_in_flight());
    }

    #[test]
    fn timeout_produces_completion_and_frees_slot() {
        let mut engine = engine();
        let mut conn = NoopConnection::new();
        conn.set_online(true);
        engine
            .queue_mut()
            .push_volatile(RequestOrigin::Heartbeat, Box::new(HeartbeatOp::default()), 1_000);
        engine.tick(&mut conn, 0, true);
        assert!(engine.has_in_flight());
        let outcome = engine.tick(&mut conn, 2_000, true);
        assert_eq!(outcome.completions.len(), 1);
        assert!(matches!(outcome.completions[0].status, CompletionStatus::TimedOut));
        assert!(!engine.has_in_flight());
    }

    #[test]
    fn unknown_action_yields_not_implemented_call_error() {
        let mut engine = engine();
        let mut conn = NoopConnection::new();
        conn.set_online(true);
        conn.push_incoming(OcppFrame::call("1", "Frobnicate", json!({})).serialize().unwrap());
        let outcome = engine.tick(&mut conn, 0, true);
        assert!(outcome.inbound_calls.is_empty());
        assert_eq!(conn.sent().len(), 1);
        assert!(conn.sent()[0].contains("NotImplemented"));
    }

    #[test]
    fn known_action_is_surfaced_as_inbound_call() {
        let mut engine = engine();
        let mut conn = NoopConnection::new();
        conn.set_online(true);
        conn.push_incoming(
            OcppFrame::call("1", "Reset", json!({"type": "Hard"}))
                .serialize()
                .unwrap(),
        );
        let outcome = engine.tick(&mut conn, 0, true);
        assert_eq!(outcome.inbound_calls.len(), 1);
        assert_eq!(outcome.inbound_calls[0].operation.action(), "Reset");
    }

    #[test]
    fn malformed_json_with_recoverable_id_gets_formation_violation() {
        let mut engine = engine();
        let mut conn = NoopConnection::new();
        conn.set_online(true);
        conn.push_incoming("[2,\"abc\",\"Reset\"]".to_string()); // wrong arity but array/id parseable
        let outcome = engine.tick(&mut conn, 0, true);
        assert!(outcome.inbound_calls.is_empty());
        assert!(conn.sent()[0].contains("FormationViolation"));
    }

    #[test]
    fn boot_gate_blocks_volatile_sends() {
        let mut engine = engine();
        let mut conn = NoopConnection::new();
        conn.set_online(true);
        engine
            .queue_mut()
            .push_volatile(RequestOrigin::Heartbeat, Box::new(HeartbeatOp::default()), 40_000);
        engine.tick(&mut conn, 0, false);
        assert!(conn.sent().is_empty());
        assert!(!engine.has_in_flight());
    }
}
