use gcs_proto::RelayTelemetry;
use gcs_uplink::{Relay, RelayConfig, Sample};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

fn record() -> RelayTelemetry {
    RelayTelemetry {
        latitude_dege7: 492_572_585.0,
        longitude_dege7: -1_232_423_108.0,
        altitude_msl_m: 77.0,
        heading_deg: 90.0,
        groundspeed_m_s: 18.5,
        chan3_raw: 1500,
        winch_status: 1,
    }
}

/// Accepts connections, hands each request body to the test and answers
/// with `status`.
async fn server(status: &'static str) -> (String, mpsc::UnboundedReceiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        loop {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 1024];
            while !buf.ends_with(b"}") {
                let n = sock.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..n]);
            }
            let text = String::from_utf8(buf).unwrap();
            let body = text.split("\r\n\r\n").nth(1).unwrap_or_default().to_string();
            let _ = tx.send(body);
            sock.write_all(format!("HTTP/1.1 {}\r\nContent-Length: 0\r\n\r\n", status).as_bytes()).await.unwrap();
        }
    });
    (format!("http://{}/telemetry", addr), rx)
}

fn config(endpoint: String) -> RelayConfig {
    RelayConfig { enable: true, endpoint, rate_hz: 50.0, timeout_ms: 1000 }
}

#[tokio::test]
async fn posts_relay_json() {
    let (endpoint, mut bodies) = server("204 No Content").await;
    let mut relay = Relay::new(&config(endpoint)).unwrap();

    assert_eq!(relay.post(&record()).await.unwrap(), 204);
    let body: serde_json::Value = serde_json::from_str(&bodies.recv().await.unwrap()).unwrap();
    assert_eq!(body["latitude_dege7"], 492_572_585.0);
    assert_eq!(body["chan3_raw"], 1500);
    assert_eq!(body["winch_status"], 1);
    assert_eq!(relay.link_health().sent, 1);
}

#[tokio::test]
async fn server_errors_count_as_failures() {
    let (endpoint, _bodies) = server("503 Service Unavailable").await;
    let mut relay = Relay::new(&config(endpoint)).unwrap();
    assert!(relay.post(&record()).await.is_err());
    assert!(relay.post(&record()).await.is_err());
    assert_eq!(relay.link_health().consecutive_failures, 2);
}

#[tokio::test]
async fn unreachable_endpoint_is_an_error_not_a_hang() {
    // bind then drop so the port is closed
    let addr = TcpListener::bind("127.0.0.1:0").await.unwrap().local_addr().unwrap();
    let mut relay = Relay::new(&config(format!("http://{}/", addr))).unwrap();
    assert!(relay.post(&record()).await.is_err());
    assert_eq!(relay.link_health().consecutive_failures, 1);
}

#[tokio::test]
async fn run_skips_missing_fixes_and_stops_with_the_session() {
    let (endpoint, mut bodies) = server("200 OK").await;
    let relay = Relay::new(&config(endpoint)).unwrap();

    let ticks = Arc::new(AtomicUsize::new(0));
    let counter = ticks.clone();
    relay
        .run(move || match counter.fetch_add(1, Ordering::SeqCst) {
            0 => Sample::NoFix,
            1 | 2 => Sample::Ready(record()),
            _ => Sample::Stopped,
        })
        .await;

    assert_eq!(ticks.load(Ordering::SeqCst), 4);
    assert!(bodies.recv().await.is_some());
    assert!(bodies.recv().await.is_some());
    assert!(bodies.try_recv().is_err());
}
