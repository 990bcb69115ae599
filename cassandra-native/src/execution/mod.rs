//! Execution of requests: the operation contract shared by every request kind,
//! the dispatch loop running an operation to its outcome, and the handle
//! returned by the `Session::begin_*` methods.

pub(crate) mod operation;
pub(crate) mod request_handle;
pub(crate) mod token;

pub use request_handle::RequestHandle;
