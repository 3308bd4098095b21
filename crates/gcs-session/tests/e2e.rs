use gcs_fc::sim::SimLink;
use gcs_fc::{FlightMode, FrameLink};
use gcs_payload::WinchState;
use gcs_session::{Controller, Session, SessionConfig};
use mavlink::common::MavCmd;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

fn config() -> SessionConfig {
    let mut cfg = SessionConfig::default();
    cfg.link.heartbeat_timeout_ms = 2000;
    cfg.link.telemetry_timeout_ms = 2000;
    cfg.failsafe.rc_enable = false;
    cfg.failsafe.endurance_enable = false;
    cfg
}

async fn connected(sim: &Arc<SimLink>) -> Controller {
    let session = Arc::new(Session::new(config()));
    let link: Arc<dyn FrameLink> = sim.clone();
    session.connect_link(link).await.unwrap();
    Controller::new(session)
}

fn mission(n: usize) -> Value {
    let wps: Vec<Value> = (0..n)
        .map(|i| json!({ "lat": 49.2600 + i as f64 * 0.001, "lng": -123.2400, "alt": 50.0 }))
        .collect();
    json!({ "wps": wps, "takeoffAlt": 12, "rtl": true })
}

async fn eventually(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

#[tokio::test(flavor = "multi_thread")]
async fn arm_then_mission_round_trip() {
    let sim = Arc::new(SimLink::new());
    let api = connected(&sim).await;
    assert_eq!(api.index().body["connected"], true);

    let r = api.arm().await;
    assert_eq!(r.status, 201);
    assert!(sim.armed());
    assert!(eventually(|| api.snapshot().body["armed"] == true).await);

    let r = api.upload_mission(Some(&mission(4))).await;
    assert_eq!(r.status, 201, "{}", r.body);
    assert_eq!(r.body["result"], "Waypoints uploaded successfully!");
    assert_eq!(r.body["wps_uploaded"], 4);
    assert_eq!(sim.mission().len(), 7);

    let r = api.download_mission().await;
    assert_eq!(r.status, 200);
    assert_eq!(r.body["wps"].as_array().unwrap().len(), 4);
    assert!((r.body["takeoffAlt"].as_f64().unwrap() - 12.0).abs() < 1e-3);
    assert_eq!(r.body["rtl"], true);
}

#[tokio::test(flavor = "multi_thread")]
async fn connect_requests_telemetry_streams() {
    let sim = Arc::new(SimLink::new());
    let _api = connected(&sim).await;
    assert!(eventually(|| sim.commands().contains(&MavCmd::MAV_CMD_SET_MESSAGE_INTERVAL)).await);
}

#[tokio::test(flavor = "multi_thread")]
async fn mission_validation_codes_once_connected() {
    let sim = Arc::new(SimLink::new());
    let api = connected(&sim).await;
    let wp = json!([{ "lat": 49.26, "lng": -123.24, "alt": 50 }]);

    assert_eq!(api.upload_mission(Some(&Value::Null)).await.status, 405);
    assert_eq!(api.upload_mission(None).await.status, 405);
    assert_eq!(api.upload_mission(Some(&json!({ "wps": [] }))).await.status, 402);
    assert_eq!(api.upload_mission(Some(&json!({ "wps": wp }))).await.status, 403);
    assert_eq!(api.upload_mission(Some(&json!({ "wps": wp, "takeoffAlt": -12 }))).await.status, 404);
    // nothing reached the vehicle
    assert!(sim.mission().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn short_mission_store_fails_the_upload() {
    let sim = Arc::new(SimLink::new().with_mission_capacity(4));
    let api = connected(&sim).await;
    let r = api.upload_mission(Some(&mission(4))).await;
    assert_eq!(r.status, 401);
    assert_eq!(r.body["error"], "Waypoints failed to upload.");
    assert!(api.session().airdrop().get().is_unknown());
}

#[tokio::test(flavor = "multi_thread")]
async fn mode_routes_and_flight_mode() {
    let sim = Arc::new(SimLink::new());
    let api = connected(&sim).await;

    assert_eq!(api.set_mode(FlightMode::Loiter).await.status, 200);
    assert_eq!(sim.mode(), Some(FlightMode::Loiter));
    assert!(eventually(|| api.session().vehicle().unwrap().flight_mode() == Some(FlightMode::Loiter)).await);
    let r = api.flight_mode().await;
    assert_eq!(r.status, 200);
    assert_eq!(r.body["mode"], "LOITER");
}

#[tokio::test(flavor = "multi_thread")]
async fn home_position_and_gps() {
    let sim = Arc::new(SimLink::new());
    let api = connected(&sim).await;

    let home = api.home_position().await;
    assert_eq!(home.status, 200);
    assert!((home.body["lat"].as_f64().unwrap() - 49.2572585).abs() < 1e-6);

    let gps = api.gps().await;
    assert_eq!(gps.status, 200);
    assert!(gps.body["lng"].as_f64().unwrap() < -123.0);
}

#[tokio::test(flavor = "multi_thread")]
async fn fly_to_moves_the_simulated_aircraft() {
    let sim = Arc::new(SimLink::new());
    let api = connected(&sim).await;
    let target = json!({ "lat": 49.2590, "lng": -123.2400, "alt": 40 });
    assert_eq!(api.fly_to(Some(&target)).await.status, 200);
    assert!((sim.location().lat - 49.2590).abs() < 1e-6);
}

#[tokio::test(flavor = "multi_thread")]
async fn reroute_answers_with_position_and_runs_in_background() {
    let sim = Arc::new(SimLink::new());
    let api = connected(&sim).await;

    let bad = api.reroute(Some(&json!({ "waypoints": [{ "lat": 1.0 }] }))).await;
    assert_eq!(bad.status, 400);

    let body = json!({ "waypoints": [{ "lat": 49.2580, "lng": -123.2420, "alt": 60 }] });
    let r = api.reroute(Some(&body)).await;
    assert_eq!(r.status, 200);
    assert!(r.body["lat"].is_number());
    assert!(eventually(|| sim.mode() == Some(FlightMode::Auto)).await);
    assert_eq!(sim.mode_history(), vec![FlightMode::Guided, FlightMode::Auto]);
}

#[tokio::test(flavor = "multi_thread")]
async fn winch_routes() {
    let sim = Arc::new(SimLink::new());
    let api = connected(&sim).await;

    let r = api.winch_status();
    assert_eq!(r.status, 200);
    assert_eq!(r.body["status"], WinchState::Disconnected.code());

    let r = api.winch_command();
    assert_eq!(r.status, 200);
    assert_eq!(r.body["status"], 5);
    assert_eq!(api.session().winch().get(), WinchState::EmergencyReel);
}

#[tokio::test(flavor = "multi_thread")]
async fn connect_is_idempotent_and_disconnect_tears_down() {
    let sim = Arc::new(SimLink::new());
    let api = connected(&sim).await;
    let session = api.session().clone();
    let before = session.vehicle().unwrap();

    let link: Arc<dyn FrameLink> = Arc::new(SimLink::new());
    session.connect_link(link).await.unwrap();
    assert!(Arc::ptr_eq(&before, &session.vehicle().unwrap()));

    assert_eq!(api.disconnect().body["disconnected"], true);
    assert!(!session.is_connected());
    assert!(!before.is_alive());
    assert_eq!(api.arm().await.status, 400);
    assert_eq!(api.disconnect().body["disconnected"], false);
}

#[tokio::test(flavor = "multi_thread")]
async fn lost_link_reads_as_not_connected() {
    let sim = Arc::new(SimLink::new());
    let api = connected(&sim).await;
    sim.drop_link();
    assert!(eventually(|| !api.session().is_connected()).await);
    let r = api.heartbeat().await;
    assert_eq!(r.status, 400);
    assert_eq!(r.body["error"], "Aircraft connection has not been established");
}

#[tokio::test(flavor = "multi_thread")]
async fn connect_route_contract() {
    let api = Controller::new(Arc::new(Session::new(config())));

    assert_eq!(api.connect(Some(&json!({ "port": 5760 }))).await.status, 401);
    assert_eq!(api.connect(Some(&json!({ "ipAddress": "127.0.0.1" }))).await.status, 402);

    let bad = json!({ "ipAddress": "x", "port": 1, "transport": "carrier-pigeon" });
    let r = api.connect(Some(&bad)).await;
    assert_eq!(r.status, 400);

    let sim = json!({ "ipAddress": "local", "port": 0, "transport": "sim" });
    assert_eq!(api.connect(Some(&sim)).await.status, 201);
    assert!(api.session().is_connected());
    assert_eq!(api.connect(Some(&sim)).await.status, 201);
}

#[tokio::test(flavor = "multi_thread")]
async fn silent_endpoint_fails_the_handshake() {
    let mut cfg = config();
    cfg.link.heartbeat_timeout_ms = 300;
    let session = Session::new(cfg);
    let link: Arc<dyn FrameLink> = Arc::new(SimLink::silent());
    let err = session.connect_link(link).await.unwrap_err();
    assert!(matches!(err, gcs_fc::ConnectionError::NoHeartbeat(_)));
    assert!(!session.is_connected());
}

#[tokio::test(flavor = "multi_thread")]
async fn handshake_targets_the_autopilot_not_a_peripheral() {
    let sim = Arc::new(SimLink::silent());
    let feeder = sim.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        feeder.inject_camera_heartbeat();
        tokio::time::sleep(Duration::from_millis(50)).await;
        feeder.inject_vehicle_heartbeat();
    });

    let session = Session::new(config());
    let link: Arc<dyn FrameLink> = sim.clone();
    session.connect_link(link).await.unwrap();
    assert_eq!(session.vehicle().unwrap().target(), (1, 1));
    session.disconnect();
}

#[tokio::test(flavor = "multi_thread")]
async fn latest_message_reports_the_next_frame() {
    let sim = Arc::new(SimLink::new());
    let api = connected(&sim).await;

    let r = api.latest_message().await;
    assert_eq!(r.status, 200, "{}", r.body);
    assert!(r.body["type"].is_string());
    assert!(r.body["id"].is_number());
    assert_eq!(r.body["sysid"], 1);

    api.disconnect();
    assert_eq!(api.latest_message().await.status, 400);
}
