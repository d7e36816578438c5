pub mod clock;
pub mod coordinator;
pub mod notify;
pub mod persist;
pub mod service;
pub mod state;
pub mod write_behind;

pub use clock::{Clock, ManualClock, RuntimeClock};
pub use coordinator::TimerCoordinator;
pub use notify::{Subscribers, Subscription};
pub use persist::TimeStore;
pub use service::{TimerHandle, TimerService};
pub use state::{StartOutcome, StartRequest, TimerEvent, TimerMode, TimerSnapshot};
pub use write_behind::FlushRequest;
