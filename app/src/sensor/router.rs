use crate::models::schema::ActiveTableSet;
use sensorlog_core::TableSpec;

/// Maps `<namespace>/<routing key>/<suffix>` topics onto tables
#[derive(Debug, Clone)]
pub struct MessageRouter {
    namespace: Option<String>,
}

impl MessageRouter {
    pub fn new(subscription: &str) -> Self {
        let first = subscription.split('/').next().unwrap_or_default();
        let namespace = match first {
            "" | "+" | "#" => None,
            literal => Some(literal.to_owned()),
        };
        MessageRouter { namespace }
    }

    pub fn routing_key<'a>(&self, topic: &'a str) -> Option<&'a str> {
        let levels: Vec<&str> = topic.split('/').collect();
        if levels.len() != 3 || levels.iter().any(|l| l.is_empty()) {
            return None;
        }
        if let Some(namespace) = &self.namespace {
            if levels[0] != namespace {
                return None;
            }
        }
        Some(levels[1])
    }

    pub fn resolve<'a>(&self, topic: &str, tables: &'a ActiveTableSet) -> Option<&'a TableSpec> {
        tables.by_routing_key(self.routing_key(topic)?)
    }
}
