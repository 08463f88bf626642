//! # banter-client
//!
//! The client-side messaging engine: per-conversation message timeline with
//! optimistic-write reconciliation, delivery/read aggregation, presence and
//! typing tracking, and the session loop that wires them to the transport.

pub mod config;
pub mod events;
pub mod presence;
pub mod receipts;
pub mod session;
pub mod timeline;

mod error;

pub use config::ClientConfig;
pub use error::ClientError;
pub use events::SessionEvent;
pub use presence::PresenceTracker;
pub use receipts::{derive_tick, ReadMarker, Tick};
pub use session::{spawn_session, SessionCommand, SessionHandle, SessionParams};
pub use timeline::Timeline;

use tracing_subscriber::{fmt, EnvFilter};

/// Install the global tracing subscriber. `RUST_LOG` overrides the default
/// filter.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("banter_client=debug,banter_net=debug,banter_media=info,warn")
    });

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
