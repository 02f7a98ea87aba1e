//! Boundary kinds.
//!
//! A boundary kind names one instrumented surface ("servlet service",
//! "http client execute"). The interception guard de-duplicates re-entrant
//! crossings per kind, so two different kinds nested inside each other each
//! emit their own request/response pair.

use std::fmt;

/// An instrumented surface.
///
/// Kinds compare by name. The `opens_transaction` flag decides whether the
/// outermost crossing of this kind, when it finds no transaction context on
/// its thread, starts a transaction (and therefore publishes the
/// begin/end lifecycle pair) or only runs inside an implicit context.
#[derive(Clone, Copy, Debug)]
pub struct BoundaryKind {
    name: &'static str,
    opens_transaction: bool,
}

impl BoundaryKind {
    /// Inbound service entry point (e.g. a servlet's `service` method).
    pub const SERVICE: Self = Self::new("servlet.service", true);

    /// Outbound HTTP client call (e.g. an HTTP client's `execute` method).
    pub const HTTP_CLIENT: Self = Self::new("http-client.execute", false);

    /// Define a custom boundary kind.
    #[must_use]
    pub const fn new(name: &'static str, opens_transaction: bool) -> Self {
        Self {
            name,
            opens_transaction,
        }
    }

    /// Stable name of this kind.
    #[must_use]
    pub const fn name(self) -> &'static str {
        self.name
    }

    /// Whether an outermost crossing of this kind starts a transaction.
    #[must_use]
    pub const fn opens_transaction(self) -> bool {
        self.opens_transaction
    }
}

impl PartialEq for BoundaryKind {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for BoundaryKind {}

impl std::hash::Hash for BoundaryKind {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl fmt::Display for BoundaryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds_compare_by_name() {
        let custom = BoundaryKind::new("servlet.service", false);
        assert_eq!(custom, BoundaryKind::SERVICE);
        assert_ne!(BoundaryKind::SERVICE, BoundaryKind::HTTP_CLIENT);
    }

    #[test]
    fn test_builtin_kinds() {
        assert!(BoundaryKind::SERVICE.opens_transaction());
        assert!(!BoundaryKind::HTTP_CLIENT.opens_transaction());
        assert_eq!(BoundaryKind::HTTP_CLIENT.to_string(), "http-client.execute");
    }
}
