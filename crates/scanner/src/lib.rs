pub mod advisor;
pub mod debounce;
pub mod indicators;
pub mod market;
pub mod scanner;

pub use advisor::{HttpAdvisor, Opportunity, SignalAdvisor};
pub use debounce::DebounceMap;
pub use market::BrokerMarketData;
pub use scanner::{ScanReport, Scanner, ScannerCommand, ScannerHandle};
