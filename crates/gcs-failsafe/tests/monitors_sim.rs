use gcs_failsafe::{DecisionPort, EnduranceClock, EnduranceMonitor, EnduranceState, RcMonitor, RcState, RcTimings};
use gcs_fc::sim::SimLink;
use gcs_fc::{FlightMode, FrameLink, LinkWriter, TelemetryBus, Vehicle};
use gcs_payload::{WinchCell, WinchState};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn connect(sim: &Arc<SimLink>) -> Arc<Vehicle> {
    let link: Arc<dyn FrameLink> = sim.clone();
    let writer = Arc::new(LinkWriter::new(link, 255, 190));
    let bus = TelemetryBus::start(writer.clone(), Duration::from_millis(500));
    Arc::new(Vehicle::new(bus, writer, 1, 1, Duration::from_secs(2)))
}

fn fast_rc() -> RcTimings {
    RcTimings {
        threshold: 975,
        sample: Duration::from_millis(20),
        rtl_after: Duration::from_millis(300),
        terminate_after: Duration::from_millis(900),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn sustained_rc_loss_escalates_to_termination() {
    let sim = Arc::new(SimLink::new());
    sim.set_rc_channel3(900);
    let vehicle = connect(&sim);
    let winch = WinchCell::default();
    winch.set(WinchState::InProgress);

    let monitor = RcMonitor::new(fast_rc());
    let end = tokio::time::timeout(
        Duration::from_secs(10),
        monitor.run(vehicle.clone(), winch.clone(), Arc::new(AtomicBool::new(false))),
    )
    .await
    .unwrap();

    assert_eq!(end, RcState::Terminated);
    assert!(sim.terminated());
    assert_eq!(sim.mode_history(), vec![FlightMode::Rtl]);
    assert_eq!(winch.get(), WinchState::EmergencyReel);
    vehicle.bus().shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn zero_sample_period_still_monitors() {
    let sim = Arc::new(SimLink::new());
    sim.set_rc_channel3(900);
    let vehicle = connect(&sim);
    let timings = RcTimings { sample: Duration::ZERO, ..fast_rc() };

    let end = tokio::time::timeout(
        Duration::from_secs(10),
        RcMonitor::new(timings).run(vehicle.clone(), WinchCell::default(), Arc::new(AtomicBool::new(false))),
    )
    .await
    .unwrap();
    assert_eq!(end, RcState::Terminated);
    assert_eq!(sim.mode_history(), vec![FlightMode::Rtl]);
    vehicle.bus().shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn rc_recovery_after_rtl_loiters() {
    let sim = Arc::new(SimLink::new());
    sim.set_rc_channel3(900);
    let vehicle = connect(&sim);
    let returning_home = Arc::new(AtomicBool::new(false));

    let task = tokio::spawn(RcMonitor::new(fast_rc()).run(vehicle.clone(), WinchCell::default(), returning_home.clone()));

    for _ in 0..100 {
        if sim.mode() == Some(FlightMode::Rtl) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(sim.mode(), Some(FlightMode::Rtl));

    sim.set_rc_channel3(1500);
    for _ in 0..100 {
        if sim.mode() == Some(FlightMode::Loiter) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(sim.mode_history(), vec![FlightMode::Rtl, FlightMode::Loiter]);
    assert!(!sim.terminated());

    returning_home.store(true, Ordering::Release);
    let end = tokio::time::timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
    assert_eq!(end, RcState::Connected);
    vehicle.bus().shutdown();
}

fn fast_endurance(port: &DecisionPort) -> EnduranceMonitor {
    EnduranceMonitor::new(
        EnduranceClock::new(Duration::from_millis(300), Duration::from_millis(300)),
        Duration::from_millis(500),
        port.clone(),
    )
    .with_tick(Duration::from_millis(20))
}

async fn until_pending(port: &DecisionPort) {
    for _ in 0..200 {
        if port.is_pending() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("no extension prompt");
}

#[tokio::test(flavor = "multi_thread")]
async fn extension_then_decline_returns_home() {
    let sim = Arc::new(SimLink::silent());
    let vehicle = connect(&sim);
    let port = DecisionPort::new();
    let returning_home = Arc::new(AtomicBool::new(false));

    let task = tokio::spawn(fast_endurance(&port).run(vehicle.clone(), WinchCell::default(), returning_home.clone()));

    until_pending(&port).await;
    assert!(port.answer(true));
    assert!(!returning_home.load(Ordering::Acquire));

    until_pending(&port).await;
    assert!(port.answer(false));

    let end = tokio::time::timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
    assert_eq!(end, EnduranceState::ReturningHome);
    assert!(returning_home.load(Ordering::Acquire));
    assert_eq!(sim.mode_history(), vec![FlightMode::Rtl]);
    vehicle.bus().shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn unanswered_prompt_waits_for_the_winch_then_returns_home() {
    let sim = Arc::new(SimLink::silent());
    let vehicle = connect(&sim);
    let port = DecisionPort::new();
    let returning_home = Arc::new(AtomicBool::new(false));
    let winch = WinchCell::default();
    winch.set(WinchState::InProgress);

    let task = tokio::spawn(fast_endurance(&port).run(vehicle.clone(), winch.clone(), returning_home.clone()));

    for _ in 0..200 {
        if returning_home.load(Ordering::Acquire) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(returning_home.load(Ordering::Acquire));
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(sim.mode_history().is_empty(), "RTL must wait for the drop");

    winch.set(WinchState::Complete);
    let end = tokio::time::timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
    assert_eq!(end, EnduranceState::ReturningHome);
    assert_eq!(sim.mode(), Some(FlightMode::Rtl));
    vehicle.bus().shutdown();
}
