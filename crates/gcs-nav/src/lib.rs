pub mod geo;
pub mod reroute;

pub use reroute::{RerouteEngine, RerouteOutcome};
