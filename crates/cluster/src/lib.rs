pub mod election;
pub mod in_memory;
pub mod membership;
pub mod transport;

pub use election::{LowestAddressPolicy, MasterElectionPolicy, PriorityPolicy};
pub use in_memory::{InMemoryGroupRegistry, InMemoryGroupTransport};
pub use membership::{ClusterMembership, ViewChangeHandler};
pub use transport::{GroupTransport, ViewEvent};
