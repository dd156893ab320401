//! Messages, conversations and the parameters sent along with them
mod conversation;
mod message;
mod params;
mod tools;

pub use conversation::*;
pub use message::*;
pub use params::*;
pub use tools::*;
