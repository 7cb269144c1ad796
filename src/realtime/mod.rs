// Realtime notification and presence fabric

pub mod frames;
pub mod registry;
pub mod router;
pub mod ws;

pub use frames::{post_topic, ClientFrame, ServerFrame};
pub use registry::{Connection, ConnectionRegistry, EnqueueResult, PresenceTransition};
pub use router::{EventRouter, Target};
pub use ws::notifications_ws;
