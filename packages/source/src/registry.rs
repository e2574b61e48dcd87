//! Government station registry, loaded from the embedded `sites.toml`.
//!
//! The file is baked into the binary at compile time via [`include_str!`]
//! and parsed once on first use.

use std::sync::LazyLock;

use serde::Deserialize;

const SITES_TOML: &str = include_str!("../sites.toml");

/// A registered fixed monitoring station.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SiteEntry {
    /// Value of the feed's `siteid` column.
    pub id: String,
    /// County-qualified station name, e.g. `臺中市西屯`.
    pub name: String,
}

#[derive(Deserialize)]
struct SitesFile {
    site: Vec<SiteEntry>,
}

static SITES: LazyLock<Vec<SiteEntry>> = LazyLock::new(|| {
    toml::from_str::<SitesFile>(SITES_TOML)
        .unwrap_or_else(|e| panic!("embedded sites.toml is invalid: {e}"))
        .site
});

/// Returns every registered station in registry order.
///
/// # Panics
///
/// Panics if the embedded TOML registry is malformed.
#[must_use]
pub fn all_sites() -> &'static [SiteEntry] {
    &SITES
}

/// Looks up a station name by id.
///
/// # Panics
///
/// Panics if the embedded TOML registry is malformed.
#[must_use]
pub fn site_name(id: &str) -> Option<&'static str> {
    all_sites()
        .iter()
        .find(|site| site.id == id)
        .map(|site| site.name.as_str())
}
