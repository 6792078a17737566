//! Time-shifted message delivery
//!
//! Two mechanisms:
//! - Ephemeral timers: a detached copy of this binary sleeps, then delivers
//! - Durable jobs: tagged lines in the user's crontab

mod cron;
mod scheduler;
mod task;
mod timer;

pub use cron::*;
pub use scheduler::*;
pub use task::*;
pub use timer::*;
