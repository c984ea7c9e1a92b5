//! Trace context carriers over AMQP message headers.

use opentelemetry::propagation::{Extractor, Injector};

use warren_hooks::Headers;

/// [`Injector`] writing trace context entries into outgoing message [`Headers`].
#[derive(Debug)]
pub struct HeaderInjector<'a>(pub &'a mut Headers);

impl Injector for HeaderInjector<'_> {
    fn set(&mut self, key: &str, value: String) {
        self.0.insert(key, value);
    }
}

/// [`Extractor`] reading trace context entries from received message [`Headers`].
#[derive(Debug)]
pub struct HeaderExtractor<'a>(pub &'a Headers);

impl Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key)
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().collect()
    }
}
