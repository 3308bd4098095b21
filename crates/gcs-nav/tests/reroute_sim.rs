use gcs_fc::sim::SimLink;
use gcs_fc::{FlightMode, FrameLink, LinkWriter, TelemetryBus, TelemetryError, Vehicle};
use gcs_nav::{geo, RerouteEngine, RerouteOutcome};
use gcs_proto::Location;
use std::sync::Arc;
use std::time::Duration;

fn connect(sim: &Arc<SimLink>) -> Arc<Vehicle> {
    let link: Arc<dyn FrameLink> = sim.clone();
    let writer = Arc::new(LinkWriter::new(link, 255, 190));
    let bus = TelemetryBus::start(writer.clone(), Duration::from_millis(500));
    Arc::new(Vehicle::new(bus, writer, 1, 1, Duration::from_secs(2)))
}

fn points() -> Vec<Location> {
    vec![Location::new(49.2590, -123.2440, 40.0), Location::new(49.2605, -123.2460, 45.0)]
}

#[tokio::test(flavor = "multi_thread")]
async fn flies_every_point_then_resumes_auto() {
    let sim = Arc::new(SimLink::new());
    let vehicle = connect(&sim);
    let engine = RerouteEngine::new();

    let outcome = tokio::time::timeout(Duration::from_secs(10), engine.reroute(vehicle.clone(), points()))
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(outcome, RerouteOutcome::Completed));
    assert_eq!(sim.mode_history(), vec![FlightMode::Guided, FlightMode::Auto]);
    assert!(geo::distance_m(&sim.location(), &points()[1]) <= 1.0);
    vehicle.bus().shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn new_reroute_supersedes_the_running_one() {
    let sim = Arc::new(SimLink::new());
    sim.hold_position(true);
    let vehicle = connect(&sim);
    let engine = RerouteEngine::new();

    let first = engine.reroute(vehicle.clone(), points());
    tokio::time::sleep(Duration::from_millis(500)).await;

    sim.hold_position(false);
    let second = engine.reroute(vehicle.clone(), vec![points()[0]]);

    let first = tokio::time::timeout(Duration::from_secs(5), first).await.unwrap().unwrap();
    let second = tokio::time::timeout(Duration::from_secs(10), second).await.unwrap().unwrap();
    assert!(matches!(first, RerouteOutcome::Superseded));
    assert!(matches!(second, RerouteOutcome::Completed));
    assert_eq!(sim.mode_history().last(), Some(&FlightMode::Auto));
    vehicle.bus().shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn stop_abandons_the_route_without_switching_to_auto() {
    let sim = Arc::new(SimLink::new());
    sim.hold_position(true);
    let vehicle = connect(&sim);
    let engine = RerouteEngine::new();

    let task = engine.reroute(vehicle.clone(), points());
    tokio::time::sleep(Duration::from_millis(500)).await;
    engine.stop();

    let outcome = tokio::time::timeout(Duration::from_secs(3), task).await.unwrap().unwrap();
    assert!(matches!(outcome, RerouteOutcome::Superseded));
    assert_eq!(sim.mode_history(), vec![FlightMode::Guided]);
    vehicle.bus().shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn link_loss_fails_the_route() {
    let sim = Arc::new(SimLink::new());
    sim.hold_position(true);
    let vehicle = connect(&sim);
    let engine = RerouteEngine::new();

    let task = engine.reroute(vehicle.clone(), points());
    tokio::time::sleep(Duration::from_millis(300)).await;
    sim.drop_link();

    let outcome = tokio::time::timeout(Duration::from_secs(3), task).await.unwrap().unwrap();
    assert!(matches!(outcome, RerouteOutcome::Failed(TelemetryError::LinkLost | TelemetryError::Link(_))));
}
