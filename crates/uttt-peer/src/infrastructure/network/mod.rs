//! Network infrastructure: discovery over UDP broadcast, the pending-request
//! registry, the connection arbiter, and the established peer session.
//!
//! Data flow:
//!
//! ```text
//! DiscoveryListener ──► PendingRequestRegistry ──► ConnectionArbiter ──► PeerSession
//! DiscoveryBroadcaster (while searching)                                    │
//!                                                            inbound messages dispatched
//!                                                            to the application layer
//! ```

pub mod arbiter;
pub mod discovery;
pub mod pending;
pub mod session;

pub use arbiter::{spawn_accept_loop, ArbiterError, ConnectionArbiter};
pub use discovery::{DiscoveryBroadcaster, DiscoveryError};
pub use pending::{PendingPeer, PendingRequestRegistry};
pub use session::{PeerSession, SessionError, SessionEvent, SessionRole};
