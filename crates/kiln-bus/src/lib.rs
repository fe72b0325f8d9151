pub mod bus;
pub mod error;
pub mod event;
pub mod stream;

pub use bus::{EventBus, EventReceiver, InMemoryBus};
pub use error::{BusError, StreamError};
pub use event::{Event, EventReason, EventWithOrg};
pub use stream::{stream_key, InMemoryLogStream, LogStream, STREAM_COMPLETE};
