// Six-wheel rover drive runtime
//
// Turns rover-level (forward, turn) commands from the vehicle bus into per-wheel
// velocity targets, and stops every wheel when the command stream goes stale.

pub mod config;
pub mod drive;
pub mod messages;
pub mod motor;
pub mod runtime;
pub mod source;
