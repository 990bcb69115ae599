mod events;
mod retries;
mod session;
pub(crate) mod utils;
