//! Unprepared statements.

use crate::frame::types::Consistency;
use crate::routing::RoutingKey;

/// CQL statement sent as text on every execution.
#[derive(Debug, Clone)]
pub struct Statement {
    pub(crate) contents: String,
    pub(crate) consistency: Option<Consistency>,
    pub(crate) routing_key: Option<RoutingKey>,
}

impl Statement {
    /// Creates a new [`Statement`] from a CQL query string.
    pub fn new(query_text: impl Into<String>) -> Self {
        Self {
            contents: query_text.into(),
            consistency: None,
            routing_key: None,
        }
    }

    /// Returns the string representation of the CQL query.
    pub fn contents(&self) -> &str {
        &self.contents
    }

    /// Sets the consistency to be used when executing this statement.
    /// Without it, the session default applies.
    pub fn set_consistency(&mut self, c: Consistency) {
        self.consistency = Some(c);
    }

    /// Gets the consistency to be used when executing this statement if it is filled.
    pub fn get_consistency(&self) -> Option<Consistency> {
        self.consistency
    }

    /// Sets the routing key handed to the load balancing policy.
    pub fn set_routing_key(&mut self, key: Option<RoutingKey>) {
        self.routing_key = key;
    }

    /// Gets the routing key, if set.
    pub fn get_routing_key(&self) -> Option<&RoutingKey> {
        self.routing_key.as_ref()
    }
}

impl From<String> for Statement {
    fn from(s: String) -> Statement {
        Statement::new(s)
    }
}

impl<'a> From<&'a str> for Statement {
    fn from(s: &'a str) -> Statement {
        Statement::new(s.to_owned())
    }
}
