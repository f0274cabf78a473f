pub mod gate;
pub mod portfolio;

pub use gate::{MarketState, RiskGate};
pub use portfolio::{assess_portfolio, should_halt, PortfolioRisk};
