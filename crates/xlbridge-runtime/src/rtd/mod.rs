//! Real-time data topics: publishers push values, the manager tracks which
//! host subscriptions are attached to which topic.

pub mod function;
pub mod manager;
pub mod polling;
pub mod publisher;
pub mod slot;

pub use function::{FunctionPublisher, RtdContext, RtdFunction};
pub use manager::{RtdManager, TopicId, TopicUpdate};
pub use polling::{PollingPublisher, UrlPublisher};
pub use publisher::{PublisherState, RtdPublisher};
pub use slot::{Producer, ProducerSlot};
