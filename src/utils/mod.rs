//! Various useful things.

pub mod net;
pub mod str;
pub mod sync;
pub mod tls;
