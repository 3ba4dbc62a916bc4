pub mod credibility;
pub mod oracle;
pub mod venue;

pub use credibility::{CredibilityGate, HttpCredibilityGate, StaticCredibilityGate};
pub use oracle::{PriceOracle, SimulatedOracle, VenueOracle};
pub use venue::{DryRunGateway, ExecutionGateway, HttpVenueGateway, SimulatedMarket};
