pub mod envelope;
pub mod error;

pub use envelope::{make_event, normalize_event_type, Envelope, MakeOpts};
pub use error::EventError;
