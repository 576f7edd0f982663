// Process module - Launching, watching and restarting supervised children

pub mod monitor;
pub mod restart;
pub mod spawner;
pub mod supervisor;
mod types;

pub use monitor::{MemorySampler, Monitor, SysinfoSampler};
pub use restart::{Action, PolicyEngine};
pub use spawner::{launch, Launched};
pub use supervisor::{StatusSnapshot, Supervisor, SupervisorHandle};
pub use types::{ExitCode, ProcessEvent, ProcessInstance, SupervisorState};
