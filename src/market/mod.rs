//! Market-side domain: the 15-minute window clock and strike latching.

pub mod clock;
pub mod strike;

pub use clock::{time_left_min, window_bounds, WINDOW_MS};
pub use strike::StrikeTracker;
