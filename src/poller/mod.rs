//! Poller — identity cache, warm-up, the per-tick cycle and its scheduler.

pub mod cache;
pub mod cycle;
pub mod schedule;
pub mod warmup;

pub use cache::IdentityCache;
pub use cycle::{PollConfig, PollCycle, TickReport};
pub use schedule::{Schedule, Scheduler, SchedulerSummary};
pub use warmup::{WarmupConfig, WarmupReport, WarmupSource, warm_cache};
