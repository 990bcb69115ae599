//! Results of executed requests.

pub mod query_result;
