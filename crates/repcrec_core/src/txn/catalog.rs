//! Static placement of variables onto sites.

use std::ops::RangeInclusive;

use super::{SimConfig, SiteId, Value, VarId};

/// Variable placement. Even variables are replicated on every site; odd
/// variables live only at `1 + (id mod sites)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Catalog {
    sites: u32,
    variables: u32,
}

impl Catalog {
    pub fn new(config: &SimConfig) -> Self {
        Self {
            sites: config.sites.max(1),
            variables: config.variables.max(1),
        }
    }

    pub fn site_count(&self) -> u32 {
        self.sites
    }

    pub fn site_ids(&self) -> RangeInclusive<SiteId> {
        1..=self.sites
    }

    pub fn variable_ids(&self) -> RangeInclusive<VarId> {
        1..=self.variables
    }

    pub fn has_site(&self, site: SiteId) -> bool {
        self.site_ids().contains(&site)
    }

    pub fn has_variable(&self, var: VarId) -> bool {
        self.variable_ids().contains(&var)
    }

    pub fn is_replicated(&self, var: VarId) -> bool {
        var % 2 == 0
    }

    /// Home site of a non-replicated variable.
    pub fn home_site(&self, var: VarId) -> SiteId {
        1 + var % self.sites
    }

    pub fn hosts(&self, site: SiteId, var: VarId) -> bool {
        self.has_variable(var) && (self.is_replicated(var) || self.home_site(var) == site)
    }

    pub fn initial_value(&self, var: VarId) -> Value {
        10 * Value::from(var)
    }

    /// Variables stored at `site`, ascending.
    pub fn variables_at(&self, site: SiteId) -> impl Iterator<Item = VarId> + '_ {
        self.variable_ids().filter(move |var| self.hosts(site, *var))
    }
}
