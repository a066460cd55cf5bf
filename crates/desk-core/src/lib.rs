pub mod live_event;
pub mod merge;
pub mod partition;
pub mod record;
pub mod triage;

pub use live_event::{Envelope, LiveEvent, PROTOCOL_VERSION};
pub use merge::merge_slices;
pub use partition::{ViewerSession, GUEST_PARTITION, SUPPORT_PARTITION};
pub use record::{Assignee, Message, Priority, Record, RecordKind, RecordStatus, Sender};
pub use triage::classify;
