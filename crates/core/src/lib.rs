//! Rideline Core
//!
//! Domain types shared between the voice session manager and the host
//! application: the ride draft being assembled by the conversation, the
//! host-facing control surface, and the tool-call dispatch layer that maps
//! structured commands from the assistant onto that surface.

pub mod ride;
pub mod tools;
