//! Feed module
//!
//! Consumer side of the connection: listener dispatch, bounded windows and
//! the market tick payload.

pub mod listeners;
pub mod ticks;
pub mod window;
