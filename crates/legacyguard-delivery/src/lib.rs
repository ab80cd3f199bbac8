//! # LegacyGuard Delivery
//!
//! The time-capsule delivery core: deciding when a capsule unlocks,
//! walking the `locked → unlocked → delivered` state machine, and sending
//! one notification per recipient with at-least-once semantics.
//!
//! ## Architecture
//! ```text
//! Delivery loop (tokio interval + cron schedule)
//!   └── Dispatcher::run_pass()
//!         ├── scan: one query for locked capsules, one for unlocked leftovers
//!         ├── per capsule: evaluator::should_unlock (pure, no I/O)
//!         ├── conditional claim: UPDATE ... WHERE status = 'locked'
//!         ├── per recipient: Mailer::send under a bounded timeout,
//!         │     outcome recorded in capsule_deliveries + notification_logs
//!         └── delivered once every recipient is settled
//! ```
//!
//! Failures are isolated per capsule and per recipient; only a storage
//! failure on the scan queries aborts a pass.

pub mod dispatcher;
pub mod engine;
pub mod evaluator;
pub mod notice;
pub mod schedule;

pub use dispatcher::{DeliveryFailure, DeliveryReport, Dispatcher};
pub use evaluator::should_unlock;
pub use schedule::CronSchedule;
