pub mod buffer;
pub mod constants;
pub mod event;
pub mod producer;
pub mod service;
pub mod session;
pub mod transport;
mod well_known;

pub use buffer::{Batch, Buffer, QueuedEvent, RequeueOutcome};
pub use event::{Event, Properties, RawEvent};
pub use service::{EventTracker, FlushReason, TrackerError, TrackerService};
pub use transport::{HttpTransport, SendOutcome, Transport};
