use std::fmt;
use std::io;
use std::sync::Arc;

use chrono::NaiveDate;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tracing::debug;
use ulid::Ulid;

use crate::engine::{Availability, BookingRequest, Engine, EngineError};
use crate::limits::MAX_LINE_LEN;
use crate::model::*;

/// One request line, tagged by `"op"`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    CheckAvailability {
        resource_id: Ulid,
        date: NaiveDate,
        window: Window,
        actor: Ulid,
    },
    LockSlot {
        resource_id: Ulid,
        date: NaiveDate,
        window: Window,
        actor: Ulid,
        #[serde(default)]
        ttl_minutes: Option<u32>,
    },
    ReleaseSlot {
        resource_id: Ulid,
        date: NaiveDate,
        window: Window,
        actor: Ulid,
    },
    CreateBooking(BookingRequest),
    RecordSettlement {
        booking_id: Ulid,
        amount: Amount,
        kind: SettlementKind,
        #[serde(default)]
        proof: String,
        #[serde(default)]
        status: Option<BookingStatus>,
    },
    CancelBooking {
        booking_id: Ulid,
    },
    GetBooking {
        booking_id: Ulid,
    },
    ListSlots {
        resource_id: Ulid,
        date: NaiveDate,
    },
    ListSettlements {
        booking_id: Ulid,
    },
}

/// Failures that happen before a request reaches the engine.
#[derive(Debug)]
pub enum ProtocolError {
    Malformed(String),
    LineTooLong,
}

impl ProtocolError {
    pub fn code(&self) -> &'static str {
        match self {
            ProtocolError::Malformed(_) => "bad_request",
            ProtocolError::LineTooLong => "line_too_long",
        }
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::Malformed(msg) => write!(f, "malformed request: {msg}"),
            ProtocolError::LineTooLong => write!(f, "request exceeds {MAX_LINE_LEN} bytes"),
        }
    }
}

impl std::error::Error for ProtocolError {}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

/// One response line: `{"ok":true,"data":...}` or `{"ok":false,"error":{...}}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Response {
    fn success(data: impl Serialize) -> Self {
        match serde_json::to_value(data) {
            Ok(data) => Self {
                ok: true,
                data: Some(data),
                error: None,
            },
            Err(e) => Self::failure("internal", e.to_string()),
        }
    }

    fn failure(code: &'static str, message: String) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(ErrorBody { code, message }),
        }
    }

    fn to_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(r#"{{"ok":false,"error":{{"code":"internal","message":"{e}"}}}}"#)
        })
    }
}

impl From<EngineError> for Response {
    fn from(e: EngineError) -> Self {
        Response::failure(e.code(), e.to_string())
    }
}

impl From<ProtocolError> for Response {
    fn from(e: ProtocolError) -> Self {
        Response::failure(e.code(), e.to_string())
    }
}

#[derive(Serialize)]
struct AvailabilityView {
    available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    lock: Option<SlotRecord>,
}

impl From<Availability> for AvailabilityView {
    fn from(a: Availability) -> Self {
        Self {
            available: a.available,
            reason: a.reason.map(|r| r.to_string()),
            lock: a.same_actor_lock,
        }
    }
}

pub fn parse_request(line: &str) -> Result<Request, ProtocolError> {
    serde_json::from_str(line).map_err(|e| ProtocolError::Malformed(e.to_string()))
}

pub async fn execute(engine: &Engine, req: Request) -> Result<Value, EngineError> {
    let value = match req {
        Request::CheckAvailability {
            resource_id,
            date,
            window,
            actor,
        } => {
            let availability = engine
                .check_availability(SlotKey::new(resource_id, date), window, actor)
                .await;
            to_value(AvailabilityView::from(availability))?
        }
        Request::LockSlot {
            resource_id,
            date,
            window,
            actor,
            ttl_minutes,
        } => to_value(
            engine
                .lock_slot(SlotKey::new(resource_id, date), window, actor, ttl_minutes)
                .await?,
        )?,
        Request::ReleaseSlot {
            resource_id,
            date,
            window,
            actor,
        } => {
            engine
                .release_slot(SlotKey::new(resource_id, date), window, actor)
                .await?;
            Value::Null
        }
        Request::CreateBooking(request) => to_value(engine.create_booking(request).await?)?,
        Request::RecordSettlement {
            booking_id,
            amount,
            kind,
            proof,
            status,
        } => to_value(
            engine
                .record_settlement(booking_id, amount, kind, proof, status)
                .await?,
        )?,
        Request::CancelBooking { booking_id } => {
            to_value(engine.cancel_booking(booking_id).await?)?
        }
        Request::GetBooking { booking_id } => to_value(engine.get_booking(booking_id).await?)?,
        Request::ListSlots { resource_id, date } => {
            to_value(engine.list_slots(SlotKey::new(resource_id, date)).await)?
        }
        Request::ListSettlements { booking_id } => {
            to_value(engine.list_settlements(booking_id).await?)?
        }
    };
    Ok(value)
}

fn to_value(data: impl Serialize) -> Result<Value, EngineError> {
    serde_json::to_value(data).map_err(|e| EngineError::DependencyFailure(e.to_string()))
}

/// Parse and execute one request line, recording per-op metrics.
pub async fn handle_line(engine: &Engine, line: &str) -> Response {
    let req = match parse_request(line) {
        Ok(req) => req,
        Err(e) => {
            metrics::counter!(crate::observability::REQUESTS_TOTAL, "op" => "unknown", "status" => "error")
                .increment(1);
            return e.into();
        }
    };

    let op = crate::observability::op_label(&req);
    let start = std::time::Instant::now();
    let result = execute(engine, req).await;
    metrics::histogram!(crate::observability::REQUEST_DURATION_SECONDS, "op" => op)
        .record(start.elapsed().as_secs_f64());

    match result {
        Ok(data) => {
            metrics::counter!(crate::observability::REQUESTS_TOTAL, "op" => op, "status" => "ok")
                .increment(1);
            Response::success(data)
        }
        Err(e) => {
            debug!("{op} failed: {e}");
            metrics::counter!(crate::observability::REQUESTS_TOTAL, "op" => op, "status" => "error")
                .increment(1);
            e.into()
        }
    }
}

/// Serve one client: one response line per request line, in order.
pub async fn process_connection(socket: TcpStream, engine: Arc<Engine>) -> io::Result<()> {
    let mut framed = Framed::new(socket, LinesCodec::new_with_max_length(MAX_LINE_LEN));

    while let Some(frame) = framed.next().await {
        let response = match frame {
            Ok(line) if line.trim().is_empty() => continue,
            Ok(line) => handle_line(&engine, &line).await,
            Err(LinesCodecError::MaxLineLengthExceeded) => ProtocolError::LineTooLong.into(),
            Err(LinesCodecError::Io(e)) => return Err(e),
        };
        framed.send(response.to_line()).await.map_err(|e| match e {
            LinesCodecError::Io(e) => e,
            other => io::Error::other(other.to_string()),
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::engine::ExpiryPolicy;
    use crate::notify::LogNotifier;
    use serde_json::json;
    use std::path::PathBuf;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("moorage_test_wire");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 7, 4).unwrap()
    }

    fn engine(name: &str) -> Engine {
        let clock = Arc::new(ManualClock::new(TimeOfDay::MIDNIGHT.on(date())));
        Engine::new(
            test_wal_path(name),
            ExpiryPolicy::default(),
            clock,
            Arc::new(LogNotifier),
        )
        .unwrap()
    }

    fn to_json(resp: &Response) -> Value {
        serde_json::from_str(&resp.to_line()).unwrap()
    }

    #[test]
    fn parses_tagged_requests() {
        let rid = Ulid::new();
        let actor = Ulid::new();
        let line = json!({
            "op": "lock_slot",
            "resource_id": rid.to_string(),
            "date": "2026-07-04",
            "window": {"start": "09:00", "end": "11:00"},
            "actor": actor.to_string(),
        })
        .to_string();
        let req = parse_request(&line).unwrap();
        assert_eq!(
            req,
            Request::LockSlot {
                resource_id: rid,
                date: date(),
                window: Window::parse("09:00", "11:00").unwrap(),
                actor,
                ttl_minutes: None,
            }
        );
    }

    #[test]
    fn rejects_unknown_op_and_bad_windows() {
        assert!(matches!(
            parse_request(r#"{"op":"drop_table"}"#),
            Err(ProtocolError::Malformed(_))
        ));
        let line = json!({
            "op": "list_slots",
            "resource_id": Ulid::new().to_string(),
            "date": "2026-02-30",
        })
        .to_string();
        assert!(parse_request(&line).is_err());

        let line = json!({
            "op": "check_availability",
            "resource_id": Ulid::new().to_string(),
            "date": "2026-07-04",
            "window": {"start": "11:00", "end": "09:00"},
            "actor": Ulid::new().to_string(),
        })
        .to_string();
        assert!(parse_request(&line).is_err());
    }

    #[tokio::test]
    async fn malformed_line_gets_bad_request() {
        let engine = engine("malformed.wal");
        let resp = to_json(&handle_line(&engine, "not json").await);
        assert_eq!(resp["ok"], json!(false));
        assert_eq!(resp["error"]["code"], json!("bad_request"));
    }

    #[tokio::test]
    async fn conflict_surfaces_code_and_reason() {
        let engine = engine("conflict.wal");
        let rid = Ulid::new().to_string();
        let lock = |actor: Ulid| {
            json!({
                "op": "lock_slot",
                "resource_id": rid,
                "date": "2026-07-04",
                "window": {"start": "09:00", "end": "11:00"},
                "actor": actor.to_string(),
            })
            .to_string()
        };

        let first = to_json(&handle_line(&engine, &lock(Ulid::new())).await);
        assert_eq!(first["ok"], json!(true));
        assert_eq!(first["data"]["status"], json!("locked"));

        let second = to_json(&handle_line(&engine, &lock(Ulid::new())).await);
        assert_eq!(second["ok"], json!(false));
        assert_eq!(second["error"]["code"], json!("slot_unavailable"));
        assert_eq!(
            second["error"]["message"],
            json!("Slot locked by another employee")
        );
    }

    #[tokio::test]
    async fn booking_and_settlement_flow() {
        let engine = engine("flow.wal");
        let line = json!({
            "op": "create_booking",
            "customer_id": Ulid::new().to_string(),
            "employee_id": Ulid::new().to_string(),
            "resource_id": Ulid::new().to_string(),
            "date": "2026-07-04",
            "window": {"start": "14:00", "end": "16:00"},
            "quoted_amount": 500,
        })
        .to_string();
        let created = to_json(&handle_line(&engine, &line).await);
        assert_eq!(created["ok"], json!(true));
        assert_eq!(created["data"]["pending_amount"], json!(500));
        assert_eq!(created["data"]["status"], json!("initiated"));
        let booking_id = created["data"]["id"].as_str().unwrap().to_string();

        let settle = json!({
            "op": "record_settlement",
            "booking_id": booking_id,
            "amount": 200,
            "kind": "advance",
            "proof": "txn-1",
            "status": "inprogress",
        })
        .to_string();
        let settled = to_json(&handle_line(&engine, &settle).await);
        assert_eq!(settled["data"]["pending_amount"], json!(300));
        assert_eq!(settled["data"]["status"], json!("inprogress"));

        let list = json!({"op": "list_settlements", "booking_id": booking_id}).to_string();
        let listed = to_json(&handle_line(&engine, &list).await);
        assert_eq!(listed["data"].as_array().unwrap().len(), 1);
        assert_eq!(listed["data"][0]["amount"], json!(200));
    }
}
