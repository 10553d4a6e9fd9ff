//! Account health state machine.
//!
//! Applies classifier decisions to the account store and keeps the Redis
//! temp-unschedulable mirror in step with the database.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  AccountHealthService                                        │
//! │  ├── classify()        pure decision, no I/O                 │
//! │  ├── AccountRepository one write per transition              │
//! │  └── TempUnschedCache  best-effort mirror, TTL = until - now │
//! └──────────────────────────────────────────────────────────────┘
//! ```

mod service;


pub use service::{AccountHealthService, DEFAULT_REPO_TIMEOUT, SESSION_STATUS_HEADER};
