//! Daemon, classifier and worker configuration models.

mod app;
mod health;
mod recovery;
mod scheduler;

pub use app::AppConfig;
pub use health::{parse_daily_time, HealthConfig, UsageWindowConfig};
pub use recovery::RecoveryConfig;
pub use scheduler::SchedulerConfig;
