//! gRPC Streaming Server
//!
//! Implements `SportsLinesService`. Every bidirectional stream gets its own
//! session:
//!
//! 1. Each inbound request stops the running emission task and waits for it
//! 2. The request is validated; a rejection ends the stream
//! 3. A changed sport set sends a snapshot and, one interval later, starts
//!    deltas against it; an unchanged set restarts deltas right away
//! 4. Half-close, transport failure, storage failure or shutdown end the
//!    stream with the matching status

pub mod emitter;
pub mod server;
pub mod session;

// Allow clippy warnings and missing docs in generated code
#[allow(
    missing_docs,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::unwrap_used,
    clippy::expect_used
)]
pub mod proto {
    pub mod sportslines {
        pub mod v1 {
            include!(concat!(env!("OUT_DIR"), "/sportslines.v1.rs"));
        }
    }
}

pub use server::SportsLinesServer;
pub use session::{SessionError, StreamSession};
