use courier_core::{
    config::{FilterConfig, ListFilter},
    model::{ContentItem, Policy},
};

/// Whitelist passes members only, blacklist passes everything else.
fn list_admits(list: &ListFilter, include: bool) -> bool {
    if list.as_whitelist {
        include
    } else {
        !include
    }
}

/// Whether the configured threshold shows items of `policy`.
pub fn policy_allows(threshold: u8, policy: Policy) -> bool {
    match threshold {
        0 => policy == Policy::Normal,
        1 => policy != Policy::RestrictedB,
        2 => policy != Policy::RestrictedA,
        3 => true,
        _ => false,
    }
}

/// The combined creator, tag, pid and policy filter. All four must pass.
#[derive(Debug, Clone, Default)]
pub struct ItemFilter {
    config: FilterConfig,
}

impl ItemFilter {
    pub fn new(config: FilterConfig) -> Self {
        Self { config }
    }

    pub fn uid_admits(&self, item: &ContentItem) -> bool {
        list_admits(&self.config.uid, self.config.uid.values.contains(&item.uid))
    }

    pub fn tag_admits(&self, item: &ContentItem) -> bool {
        let include = self
            .config
            .tag
            .values
            .iter()
            .any(|t| item.tags.contains(t));
        list_admits(&self.config.tag, include)
    }

    pub fn pid_admits(&self, item: &ContentItem) -> bool {
        list_admits(&self.config.pid, self.config.pid.values.contains(&item.pid))
    }

    pub fn policy_admits(&self, item: &ContentItem) -> bool {
        policy_allows(self.config.show_policy_limited, item.policy)
    }

    pub fn admits(&self, item: &ContentItem) -> bool {
        self.pid_admits(item)
            && self.tag_admits(item)
            && self.uid_admits(item)
            && self.policy_admits(item)
    }
}
