pub mod circuit_breaker;
pub mod config;
pub mod retry;
pub mod store;
pub mod types;

pub use circuit_breaker::{BreakerSnapshot, BreakerState, CircuitBreaker, CircuitBreakerConfig};
pub use config::AppConfig;
pub use retry::RetryPolicy;
pub use store::{
    InMemoryPositionStore, InMemoryTraderDirectory, MarketDataSource, PositionStore,
    TraderDirectory,
};
pub use types::{
    AccountState, CandidateSignal, CloseReason, ExperienceLevel, MarketSnapshot, Position,
    PositionStatus, RiskAction, RiskLevel, RiskTolerance, RiskVerdict, TradeDirection,
    TradingParams,
};
