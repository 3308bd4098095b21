use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put, MethodRouter};
use axum::{Json, Router};
use gcs_fc::FlightMode;
use gcs_session::{ApiResponse, Controller};
use serde_json::Value;
use std::sync::Arc;

type Api = State<Arc<Controller>>;
type Body = Option<Json<Value>>;

fn reply(r: ApiResponse) -> Response {
    let status = StatusCode::from_u16(r.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(r.body)).into_response()
}

fn body(b: &Body) -> Option<&Value> {
    b.as_ref().map(|Json(v)| v)
}

pub fn router(api: Arc<Controller>) -> Router {
    let aircraft = Router::new()
        .route("/connect", post(connect))
        .route("/disconnect", post(disconnect))
        .route("/arm", put(arm))
        .route("/disarm", put(disarm))
        .route("/rtl", mode(FlightMode::Rtl))
        .route("/manual", mode(FlightMode::Manual))
        .route("/auto", mode(FlightMode::Auto))
        .route("/guided", mode(FlightMode::Guided))
        .route("/loiter", mode(FlightMode::Loiter))
        .route("/telemetry/gps", get(gps))
        .route("/telemetry/flightmode", get(flight_mode))
        .route("/telemetry/heartbeat", get(heartbeat))
        .route("/telemetry/snapshot", get(snapshot))
        .route("/telemetry/msg", get(latest_message))
        .route("/flyto", post(fly_to))
        .route("/takeoff", post(takeoff))
        .route("/home_position", get(home_position))
        .route("/mission", post(upload_mission).get(download_mission))
        .route("/reroute", post(reroute))
        .route("/winchstatus", get(winch_status))
        .route("/winch/command", post(winch_command))
        .route("/endurance/decision", post(endurance_decision));

    Router::new().route("/", get(index)).nest("/aircraft", aircraft).with_state(api)
}

fn mode(m: FlightMode) -> MethodRouter<Arc<Controller>> {
    put(move |State(api): Api| async move { reply(api.set_mode(m).await) })
}

async fn index(State(api): Api) -> Response {
    reply(api.index())
}

async fn connect(State(api): Api, b: Body) -> Response {
    reply(api.connect(body(&b)).await)
}

async fn disconnect(State(api): Api) -> Response {
    reply(api.disconnect())
}

async fn arm(State(api): Api) -> Response {
    reply(api.arm().await)
}

async fn disarm(State(api): Api) -> Response {
    reply(api.disarm().await)
}

async fn gps(State(api): Api) -> Response {
    reply(api.gps().await)
}

async fn flight_mode(State(api): Api) -> Response {
    reply(api.flight_mode().await)
}

async fn heartbeat(State(api): Api) -> Response {
    reply(api.heartbeat().await)
}

async fn latest_message(State(api): Api) -> Response {
    reply(api.latest_message().await)
}

async fn snapshot(State(api): Api) -> Response {
    reply(api.snapshot())
}

async fn fly_to(State(api): Api, b: Body) -> Response {
    reply(api.fly_to(body(&b)).await)
}

async fn takeoff(State(api): Api, b: Body) -> Response {
    reply(api.takeoff(body(&b)).await)
}

async fn home_position(State(api): Api) -> Response {
    reply(api.home_position().await)
}

async fn upload_mission(State(api): Api, b: Body) -> Response {
    reply(api.upload_mission(body(&b)).await)
}

async fn download_mission(State(api): Api) -> Response {
    reply(api.download_mission().await)
}

async fn reroute(State(api): Api, b: Body) -> Response {
    reply(api.reroute(body(&b)).await)
}

async fn winch_status(State(api): Api) -> Response {
    reply(api.winch_status())
}

async fn winch_command(State(api): Api) -> Response {
    reply(api.winch_command())
}

async fn endurance_decision(State(api): Api, b: Body) -> Response {
    reply(api.endurance_decision(body(&b)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use gcs_session::{Session, SessionConfig};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    async fn call(addr: std::net::SocketAddr, method: &str, path: &str, json: Option<&str>) -> (u16, Value) {
        let mut sock = TcpStream::connect(addr).await.unwrap();
        let body = json.unwrap_or("");
        let ctype = if json.is_some() { "Content-Type: application/json\r\n" } else { "" };
        let req = format!(
            "{} {} HTTP/1.1\r\nHost: test\r\n{}Content-Length: {}\r\nConnection: close\r\n\r\n{}",
            method,
            path,
            ctype,
            body.len(),
            body
        );
        sock.write_all(req.as_bytes()).await.unwrap();
        let mut raw = String::new();
        sock.read_to_string(&mut raw).await.unwrap();
        let status = raw.split_whitespace().nth(1).unwrap().parse().unwrap();
        let json = raw.split("\r\n\r\n").nth(1).unwrap_or_default();
        (status, serde_json::from_str(json).unwrap_or(Value::Null))
    }

    #[tokio::test]
    async fn routes_map_to_controller_codes() {
        let api = Arc::new(Controller::new(Arc::new(Session::new(SessionConfig::default()))));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router(api)).await.unwrap() });

        let (status, body) = call(addr, "GET", "/", None).await;
        assert_eq!(status, 200);
        assert_eq!(body["connected"], false);

        let (status, body) = call(addr, "PUT", "/aircraft/arm", None).await;
        assert_eq!(status, 400);
        assert_eq!(body["error"], "Aircraft connection has not been established");

        let (status, _) = call(addr, "GET", "/aircraft/telemetry/msg", None).await;
        assert_eq!(status, 400);

        let (status, _) = call(addr, "POST", "/aircraft/connect", Some(r#"{"port": 5760}"#)).await;
        assert_eq!(status, 401);

        let (status, _) = call(addr, "POST", "/aircraft/endurance/decision", Some(r#"{"extend": true}"#)).await;
        assert_eq!(status, 409);
    }
}
