//! Shared wire protocol, state model and validation for the turtle relay
//! gateway: the envelope/codec spoken on the Controller byte stream, the
//! `State`/`TurtleState` data model, diffing/merging over it, and range
//! validation. Used by both the gateway binary and the mock Controller.

pub mod codec;
pub mod envelope;
pub mod mock;
pub mod patch;
pub mod state;
pub mod validate;
