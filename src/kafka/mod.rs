//! The Kafka wire protocol, treated as a pure (de)serialization library
//! (spec section 1). Nothing in this module touches a socket, the message
//! pool, or the router -- it only turns batches into request bytes and
//! response bytes back into typed acks.

pub mod protocol;
pub mod types;
