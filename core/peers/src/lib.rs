mod handle;
mod registry;
mod reservation;

pub use handle::{PeerHandle, PeerSnapshot};
pub use registry::{PeerEvent, PeerRegistry};
pub use reservation::Reservation;
