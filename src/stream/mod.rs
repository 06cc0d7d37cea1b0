pub mod manager;
pub mod pump;
pub mod types;


pub use manager::{StreamContext, StreamHandle, StreamId, StreamManager, StreamWriter, next_stream_id};
pub use pump::{PumpOutcome, PumpSettings, pump};
pub use types::*;
