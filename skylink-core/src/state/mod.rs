pub mod heartbeat;
pub mod link;
pub mod machine;
pub mod params;

pub use heartbeat::HeartbeatTracker;
pub use link::{LinkState, LossReason};
pub use machine::{Effect, LinkMachine};
pub use params::ParameterSync;
