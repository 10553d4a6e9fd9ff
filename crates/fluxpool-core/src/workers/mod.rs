//! Background workers.
//!
//! - **Temp-unschedulable recovery** - lease-queue driven re-check of quota pauses
//! - **Account / subscription expiration** - advisory-locked batch sweeps
//! - **Rate-limit reactivation** - drains rows disabled on 429 by older releases
//! - **Daily usage refresh** - once-a-day usage read that pauses or resumes accounts
//!
//! Every worker is started with a receiver from [`WorkerSet::subscribe`] and
//! exits after its current iteration once [`WorkerSet::shutdown`] is called.

mod daily_refresh;
mod expiration;
mod lifecycle;
mod reactivate;
mod recovery;


pub use daily_refresh::{next_run_after, DailyUsageRefreshWorker};
pub use expiration::{ExpirationTarget, ExpirationWorker, SWEEP_BUDGET};
pub use lifecycle::WorkerSet;
pub use reactivate::RateLimitReactivateWorker;
pub use recovery::{PollSummary, RecoveryOutcome, TempUnschedRecoveryWorker};
