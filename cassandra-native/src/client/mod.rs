//! The [Session](session::Session) and the builder configuring it.

pub mod session;

pub mod session_builder;
