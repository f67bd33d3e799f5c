pub mod errors;
pub mod events;
pub mod models;
pub mod schedule;
pub mod traits;

pub use errors::{TimerError, TimerResult};
pub use events::{
    AfterTaskEvent, AfterTaskObserver, BeforeTaskEvent, BeforeTaskObserver, DispatchMode,
    EventNotifier, ObserverId, ViewChangedEvent, ViewChangedObserver,
};
pub use models::{ClusterView, MembershipState, NodeAddress, TaskDefinition};
pub use schedule::{parse_offset, ScheduleExpression};
pub use traits::TaskExecutor;
