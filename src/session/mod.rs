//! The single in-memory chat session.
//!
//! [`state`] holds the reducer that every mutation goes through;
//! [`driver`] runs turns (reformulate, search, answer) and publishes a
//! [`state::SessionView`] after each accepted event.

pub mod driver;
pub mod state;
