use std::collections::BTreeSet;

use crate::registry::ConnectionRegistry;

/// Identities of the pages currently connected, derived from the registry.
///
/// Holds no state of its own; it is recomputed whenever a page reports its
/// first URL or a page with an identity disconnects.
pub struct PageDirectory;

impl PageDirectory {
    pub fn compute(registry: &ConnectionRegistry) -> BTreeSet<String> {
        registry
            .all_pages()
            .filter_map(|(_, page)| page.identity())
            .filter(|identity| !identity.is_empty())
            .map(str::to_owned)
            .collect()
    }
}
