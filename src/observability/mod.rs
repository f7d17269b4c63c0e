//! Observability: JSON event lines and counters
//!
//! Cache, admin and document paths report what they did through
//! `log_event`; counters live in a shared `MetricsRegistry`. Neither ever
//! changes the outcome of the operation being observed.
//!
//! # Usage
//!
//! ```ignore
//! use metadoc::observability::{log_event, Event, MetricsRegistry};
//!
//! log_event(Event::MetaBuilt, &[("entity_type", "Invoice")]);
//!
//! let metrics = MetricsRegistry::new();
//! metrics.increment_cache_hits();
//! ```

mod events;
mod logger;
mod metrics;

pub use events::Event;
pub use logger::{Logger, Severity};
pub use metrics::{MetricsRegistry, MetricsSnapshot};

/// Log a lifecycle event at its default severity
pub fn log_event(event: Event, fields: &[(&str, &str)]) {
    Logger::log(event.severity(), event.as_str(), fields);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_event_does_not_panic() {
        log_event(Event::MetaBuilt, &[("entity_type", "Invoice")]);
        log_event(Event::OverrideIgnored, &[]);
    }
}
