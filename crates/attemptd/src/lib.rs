//! Git workspace synchronization engines for task attempts.

pub mod action_gate;
pub mod branch_status;
pub mod checkpoint_restore;
pub mod conflict;
pub mod event_log;
pub mod orchestrator;
pub mod pulse;

pub use action_gate::*;
pub use branch_status::*;
pub use checkpoint_restore::*;
pub use conflict::*;
pub use event_log::*;
pub use orchestrator::*;
pub use pulse::*;
