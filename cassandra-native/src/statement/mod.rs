//! Statements the session can execute.

pub mod prepared;
pub mod unprepared;

pub use prepared::PreparedStatement;
pub use unprepared::Statement;
