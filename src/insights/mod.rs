pub mod config;
pub mod generator;
pub mod scheduler;

pub use config::InsightConfig;
pub use generator::InsightGenerator;
pub use scheduler::InsightScheduler;
