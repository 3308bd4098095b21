//! Request handling behind the `/aircraft` routes. Every status code the
//! HTTP surface returns is decided here, so the contract is testable without
//! a server.

use gcs_fc::{mission, FlightMode, MissionPlan, TakeoffParams};
use gcs_payload::WinchState;
use gcs_proto::{Location, MissionUpload, Waypoint};
use mavlink::Message;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{ApiError, ValidationError};
use crate::session::Session;

#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
}

impl ApiResponse {
    pub fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    pub fn json<T: Serialize>(status: u16, body: &T) -> Self {
        match serde_json::to_value(body) {
            Ok(v) => Self::new(status, v),
            Err(e) => Self::new(500, json!({ "error": e.to_string() })),
        }
    }
}

type Handled = Result<ApiResponse, ApiError>;

fn respond(r: Handled) -> ApiResponse {
    r.unwrap_or_else(|e| {
        if e.status() >= 500 {
            warn!("api: {}", e);
        }
        e.response()
    })
}

pub fn validate_connect(body: Option<&Value>) -> Result<(String, String, Option<u16>, Option<u32>), ValidationError> {
    let req = object(body).ok_or(ValidationError::MissingIpAddress)?;
    let address = match req.get("ipAddress") {
        Some(Value::String(s)) => s.clone(),
        Some(v) if !v.is_null() => v.to_string(),
        _ => return Err(ValidationError::MissingIpAddress),
    };
    let port = match req.get("port") {
        Some(Value::Number(n)) => n.as_u64().and_then(|p| u16::try_from(p).ok()),
        Some(Value::String(s)) => s.parse().ok(),
        _ => None,
    }
    .ok_or(ValidationError::MissingPort)?;
    let transport = req.get("transport").and_then(Value::as_str).unwrap_or("tcp").to_string();
    let baud = req.get("baud").and_then(Value::as_u64).and_then(|b| u32::try_from(b).ok());
    Ok((transport, address, Some(port), baud))
}

/// Check an upload body in the order clients rely on: shape, waypoints,
/// takeoff altitude.
pub fn validate_mission(body: Option<&Value>) -> Result<MissionUpload, ValidationError> {
    let req = object(body).filter(|m| !m.is_empty()).ok_or(ValidationError::InvalidMission)?;

    let wps = match req.get("wps") {
        Some(Value::Array(a)) if !a.is_empty() => a,
        _ => return Err(ValidationError::NoWaypoints),
    };
    let takeoff_alt = match req.get("takeoffAlt") {
        None | Some(Value::Null) => return Err(ValidationError::MissingTakeoffAlt),
        Some(v) => v.as_f64().ok_or(ValidationError::MissingTakeoffAlt)?,
    };
    if takeoff_alt <= 0.0 {
        return Err(ValidationError::NonPositiveTakeoffAlt);
    }
    let wps = wps
        .iter()
        .map(|w| serde_json::from_value::<Waypoint>(w.clone()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| ValidationError::InvalidMission)?;
    let rtl = req.get("rtl").and_then(Value::as_bool).unwrap_or(false);

    Ok(MissionUpload { wps, takeoff_alt, rtl })
}

fn object(body: Option<&Value>) -> Option<&Map<String, Value>> {
    body.and_then(Value::as_object)
}

/// Numeric field with a default, the way the control routes read their
/// optional parameters.
fn number(body: Option<&Value>, key: &str, default: f64) -> f64 {
    object(body).and_then(|m| m.get(key)).and_then(Value::as_f64).unwrap_or(default)
}

fn location_of(v: &Value) -> Option<Location> {
    Some(Location::new(v.get("lat")?.as_f64()?, v.get("lng")?.as_f64()?, v.get("alt")?.as_f64()?))
}

pub struct Controller {
    session: Arc<Session>,
}

impl Controller {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn index(&self) -> ApiResponse {
        ApiResponse::new(
            200,
            json!({
                "name": "groundlink",
                "version": env!("CARGO_PKG_VERSION"),
                "connected": self.session.is_connected(),
            }),
        )
    }

    pub async fn connect(&self, body: Option<&Value>) -> ApiResponse {
        let (transport, address, port, baud) = match validate_connect(body) {
            Ok(req) => req,
            Err(e) => return ApiError::from(e).response(),
        };
        match self.session.connect(&transport, &address, port, baud).await {
            Ok(()) => ApiResponse::new(201, json!({ "msg": "Connected to the aircraft successfully" })),
            Err(e) => {
                warn!("api: connect to {} failed: {}", address, e);
                ApiResponse::new(400, json!({ "error": format!("Mavlink is not connected: {}", e) }))
            }
        }
    }

    pub fn disconnect(&self) -> ApiResponse {
        let was = self.session.disconnect();
        ApiResponse::new(200, json!({ "disconnected": was }))
    }

    pub async fn heartbeat(&self) -> ApiResponse {
        respond(self.heartbeat_reply(200).await)
    }

    pub async fn arm(&self) -> ApiResponse {
        respond(self.command_then_heartbeat(|s| s.arm(), 201).await)
    }

    pub async fn disarm(&self) -> ApiResponse {
        respond(self.command_then_heartbeat(|s| s.disarm(), 201).await)
    }

    pub async fn set_mode(&self, mode: FlightMode) -> ApiResponse {
        respond(self.command_then_heartbeat(|s| s.set_mode(mode), 200).await)
    }

    pub async fn gps(&self) -> ApiResponse {
        respond(self.try_gps().await)
    }

    pub async fn flight_mode(&self) -> ApiResponse {
        respond(self.try_flight_mode().await)
    }

    /// The next frame the link decodes, whatever its type.
    pub async fn latest_message(&self) -> ApiResponse {
        respond(self.try_latest_message().await)
    }

    pub fn snapshot(&self) -> ApiResponse {
        respond(self.session.vehicle().map(|v| ApiResponse::json(200, &v.snapshot())).map_err(ApiError::from))
    }

    pub async fn fly_to(&self, body: Option<&Value>) -> ApiResponse {
        let target = Location::new(number(body, "lat", 0.0), number(body, "lng", 0.0), number(body, "alt", 0.0));
        respond(self.command_then_heartbeat(|s| s.fly_to(target), 200).await)
    }

    pub async fn takeoff(&self, body: Option<&Value>) -> ApiResponse {
        let p = TakeoffParams {
            pitch: number(body, "pitch", 0.0) as f32,
            yaw: number(body, "yaw", 0.0) as f32,
            lat: number(body, "lat", 0.0) as f32,
            lng: number(body, "lng", 0.0) as f32,
            alt: number(body, "alt", 0.0) as f32,
        };
        respond(self.command_then_heartbeat(|s| Ok(s.vehicle()?.takeoff(p)?), 200).await)
    }

    pub async fn home_position(&self) -> ApiResponse {
        respond(self.try_home_position().await)
    }

    pub async fn upload_mission(&self, body: Option<&Value>) -> ApiResponse {
        respond(self.try_upload_mission(body).await)
    }

    pub async fn download_mission(&self) -> ApiResponse {
        respond(self.try_download_mission().await)
    }

    /// Starts the reroute and answers with the current position; the
    /// reroute itself keeps flying in the background.
    pub async fn reroute(&self, body: Option<&Value>) -> ApiResponse {
        respond(self.try_reroute(body).await)
    }

    pub fn winch_status(&self) -> ApiResponse {
        let r = self.session.vehicle().map_err(ApiError::from).map(|_| winch_reply(self.session.winch().get()));
        respond(r)
    }

    /// Operator reel-in. Applies whatever the winch is doing.
    pub fn winch_command(&self) -> ApiResponse {
        let r = self.session.vehicle().map_err(ApiError::from).map(|_| {
            let prev = self.session.winch().request_emergency_reel();
            warn!("api: emergency reel requested (winch was {})", prev);
            winch_reply(self.session.winch().get())
        });
        respond(r)
    }

    pub fn endurance_decision(&self, body: Option<&Value>) -> ApiResponse {
        respond(self.try_endurance_decision(body))
    }

    async fn heartbeat_reply(&self, status: u16) -> Handled {
        let hb = self.session.vehicle()?.heartbeat().await?;
        Ok(ApiResponse::json(status, &hb))
    }

    async fn command_then_heartbeat<F>(&self, command: F, status: u16) -> Handled
    where
        F: FnOnce(&Session) -> Result<(), gcs_fc::ConnectionError>,
    {
        command(&self.session)?;
        self.heartbeat_reply(status).await
    }

    async fn try_gps(&self) -> Handled {
        let loc = self.session.vehicle()?.location().await?;
        Ok(ApiResponse::json(200, &loc))
    }

    async fn try_flight_mode(&self) -> Handled {
        let hb = self.session.vehicle()?.heartbeat().await?;
        Ok(ApiResponse::new(200, json!({ "mode": hb.mode })))
    }

    async fn try_latest_message(&self) -> Handled {
        let frame = self.session.vehicle()?.next_frame().await?;
        Ok(ApiResponse::new(
            200,
            json!({
                "type": frame.message.message_name(),
                "id": frame.message.message_id(),
                "sysid": frame.header.system_id,
                "compid": frame.header.component_id,
                "fields": format!("{:?}", frame.message),
            }),
        ))
    }

    async fn try_home_position(&self) -> Handled {
        let home = self.session.vehicle()?.home_position().await?;
        Ok(ApiResponse::json(200, &home))
    }

    async fn try_upload_mission(&self, body: Option<&Value>) -> Handled {
        let vehicle = self.session.vehicle()?;
        let req = validate_mission(body)?;
        let plan = MissionPlan::build(&req.wps, req.takeoff_alt, req.rtl);
        let uploaded = mission::upload(&vehicle, &plan, self.session.airdrop())
            .await
            .map_err(ApiError::Upload)?;
        info!("api: mission of {} waypoints uploaded", uploaded);
        Ok(ApiResponse::new(201, json!({ "result": "Waypoints uploaded successfully!", "wps_uploaded": uploaded })))
    }

    async fn try_download_mission(&self) -> Handled {
        let vehicle = self.session.vehicle()?;
        let plan = mission::download(&vehicle, self.session.airdrop())
            .await
            .map_err(ApiError::Download)?;
        Ok(ApiResponse::json(200, &plan))
    }

    async fn try_reroute(&self, body: Option<&Value>) -> Handled {
        let vehicle = self.session.vehicle()?;
        let points = object(body)
            .and_then(|m| m.get("waypoints"))
            .and_then(Value::as_array)
            .ok_or_else(|| ValidationError::BadRequest("waypoints were not given".into()))?
            .iter()
            .map(location_of)
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| ValidationError::BadRequest("every waypoint needs lat, lng and alt".into()))?;
        self.session.reroute(points)?;
        let loc = vehicle.location().await?;
        Ok(ApiResponse::json(200, &loc))
    }

    fn try_endurance_decision(&self, body: Option<&Value>) -> Handled {
        let extend = object(body)
            .and_then(|m| m.get("extend"))
            .and_then(Value::as_bool)
            .ok_or_else(|| ValidationError::BadRequest("extend must be true or false".into()))?;
        if !self.session.decision().answer(extend) {
            return Err(ApiError::NoPendingDecision);
        }
        info!("api: endurance extension {}", if extend { "accepted" } else { "declined" });
        Ok(ApiResponse::new(200, json!({ "extend": extend })))
    }
}

fn winch_reply(state: WinchState) -> ApiResponse {
    ApiResponse::new(200, json!({ "status": state.code(), "state": state.to_string() }))
}
