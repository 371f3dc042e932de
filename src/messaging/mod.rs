pub mod memory;
pub mod redpanda;

pub use memory::{InMemoryPublisher, PublishedEvent};
pub use redpanda::RedpandaClient;
