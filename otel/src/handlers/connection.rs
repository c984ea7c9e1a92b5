//! Connection attribute capture.

use std::sync::Arc;

use super::HandlerState;
use crate::{attributes, correlation::ConnectionAttributes};
use warren_hooks::{ConnectEvent, ConnectOutcome};

impl HandlerState {
    /// Stashes the span attribute set of a freshly established connection.
    ///
    /// Runs once per connection; reconnects keep the set captured first.
    /// Failed connect attempts are ignored.
    pub(crate) fn on_after_connect(&self, event: &ConnectEvent<'_>) {
        let connection = match &event.outcome {
            ConnectOutcome::Connected { connection } => *connection,
            ConnectOutcome::Failed { .. } => return,
        };
        if connection.extensions().contains::<ConnectionAttributes>() {
            return;
        }

        let mut attributes = match attributes::connection_attributes(connection.config()) {
            Ok(attributes) => attributes,
            Err(err) => {
                // The URI is not logged: it may embed credentials.
                tracing::error!(%err, "failed to derive connection attributes from broker URI");
                return;
            }
        };
        attributes.extend(attributes::server_properties_attributes(connection));
        connection
            .extensions()
            .insert(ConnectionAttributes(Arc::new(attributes)));
    }
}
