//! Protocol registry: priority-ordered parser matching and dispatch.

use crate::protocols::Engine;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// A registered protocol parser descriptor.
#[derive(Clone)]
pub struct ParserDescriptor {
    /// Parser/protocol name (matches `Kind::parser_name`).
    pub name: &'static str,
    /// Priority; higher wins. Ties broken by registration order.
    pub priority: u32,
    /// Classify the initial byte window. Must not block or allocate
    /// unboundedly; called synchronously during dispatch.
    pub matches: fn(&[u8]) -> bool,
    /// Construct a fresh engine instance for a connection.
    pub new_engine: fn() -> Arc<dyn Engine>,
}

/// An immutable, priority-ordered set of parsers. Built once at startup
/// and read-only afterward, so no lock is needed to consult it.
pub struct ProtocolRegistry {
    // Pre-sorted by (priority desc, registration order asc); the
    // `generic` parser is always present and always matches, so dispatch
    // never falls through without a result.
    ordered: Vec<ParserDescriptor>,
}

impl ProtocolRegistry {
    /// Build a registry from a set of parser descriptors, sorting them by
    /// descending priority (stable, so registration order breaks ties).
    pub fn new(parsers: Vec<ParserDescriptor>) -> Self {
        let mut ordered = parsers;
        ordered.sort_by_key(|p| std::cmp::Reverse(p.priority));
        Self { ordered }
    }

    /// Classify the initial bytes and return the winning descriptor. A
    /// matcher that panics is isolated and treated as a non-match, so the
    /// flow degrades to whichever parser (ultimately `generic`) comes
    /// next.
    pub fn dispatch(&self, initial_bytes: &[u8]) -> &ParserDescriptor {
        for parser in &self.ordered {
            let matched = panic::catch_unwind(AssertUnwindSafe(|| (parser.matches)(initial_bytes)))
                .unwrap_or_else(|_| {
                    tracing::warn!(parser = parser.name, "protocol matcher panicked, skipping");
                    false
                });
            if matched {
                return parser;
            }
        }
        // Unreachable in a correctly configured registry: `generic` always
        // matches and is always registered. Fall back to the lowest
        // priority entry (registration's last resort) rather than panic.
        self.ordered
            .last()
            .expect("registry must contain at least the generic parser")
    }

    /// All registered parsers, in dispatch order.
    pub fn parsers(&self) -> &[ParserDescriptor] {
        &self.ordered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::generic::GenericEngine;

    fn generic_descriptor() -> ParserDescriptor {
        ParserDescriptor {
            name: "generic",
            priority: 0,
            matches: |_| true,
            new_engine: || Arc::new(GenericEngine::default()),
        }
    }

    fn always_false(_: &[u8]) -> bool {
        false
    }

    fn always_true(_: &[u8]) -> bool {
        true
    }

    fn panics(_: &[u8]) -> bool {
        panic!("boom");
    }

    #[test]
    fn generic_always_wins_when_nothing_else_matches() {
        let registry = ProtocolRegistry::new(vec![
            ParserDescriptor {
                name: "http",
                priority: 10,
                matches: always_false,
                new_engine: || Arc::new(GenericEngine::default()),
            },
            generic_descriptor(),
        ]);
        assert_eq!(registry.dispatch(b"anything").name, "generic");
    }

    #[test]
    fn higher_priority_wins_ties_broken_by_registration_order() {
        let registry = ProtocolRegistry::new(vec![
            ParserDescriptor {
                name: "first",
                priority: 5,
                matches: always_true,
                new_engine: || Arc::new(GenericEngine::default()),
            },
            ParserDescriptor {
                name: "second",
                priority: 5,
                matches: always_true,
                new_engine: || Arc::new(GenericEngine::default()),
            },
            generic_descriptor(),
        ]);
        assert_eq!(registry.dispatch(b"x").name, "first");
    }

    #[test]
    fn panicking_matcher_is_isolated() {
        let registry = ProtocolRegistry::new(vec![
            ParserDescriptor {
                name: "flaky",
                priority: 100,
                matches: panics,
                new_engine: || Arc::new(GenericEngine::default()),
            },
            generic_descriptor(),
        ]);
        assert_eq!(registry.dispatch(b"x").name, "generic");
    }
}
