// folio-rebalancer: 온체인 포트폴리오 자동 리밸런싱 엔진

pub mod config;
pub mod constants;
pub mod error;
pub mod types;

pub mod adapters;
pub mod aggregator;
pub mod chain;
pub mod evaluator;
pub mod executor;
pub mod gas;
pub mod mev;
pub mod notify;
pub mod queue;
pub mod scheduler;
pub mod storage;

#[cfg(test)]
pub mod mocks;

// Re-exports for convenience
pub use config::Config;
pub use error::RebalanceError;
pub use executor::RebalanceExecutor;
pub use queue::RebalanceQueue;
pub use scheduler::Scheduler;
pub use types::{ExecutionPlan, RebalanceJob, RebalanceRecord, Strategy};
