use std::cmp::Ordering;

use super::TargetFramework;

/// Library items built for one target framework.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameworkGroup {
    pub framework: TargetFramework,
    pub items: Vec<String>,
}

impl FrameworkGroup {
    pub fn new(framework: TargetFramework, items: Vec<String>) -> Self {
        Self { framework, items }
    }
}

/// Versioned library item groups plus an optional platform-agnostic fallback.
///
/// Resolution is a pure function of the profile and the host framework.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompatibilityProfile {
    groups: Vec<FrameworkGroup>,
    fallback: Option<FrameworkGroup>,
}

impl CompatibilityProfile {
    /// Build a profile, separating agnostic groups into the fallback.
    ///
    /// Multiple agnostic groups are merged in source order.
    pub fn from_groups(groups: impl IntoIterator<Item = FrameworkGroup>) -> Self {
        let mut profile = Self::default();
        for group in groups {
            if group.framework.is_any() {
                match profile.fallback.as_mut() {
                    Some(fallback) => fallback.items.extend(group.items),
                    None => profile.fallback = Some(group),
                }
            } else {
                profile.groups.push(group);
            }
        }
        profile
    }

    pub fn groups(&self) -> &[FrameworkGroup] {
        &self.groups
    }

    pub fn fallback(&self) -> Option<&FrameworkGroup> {
        self.fallback.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty() && self.fallback.is_none()
    }

    /// Groups the host can load, best first.
    ///
    /// Versioned groups are ordered by descending version with the standard
    /// family after others on ties; the sort is stable so equal groups keep
    /// source order. The agnostic fallback is used only when no versioned
    /// group is compatible.
    pub fn compatible_groups(&self, host: &TargetFramework) -> Vec<&FrameworkGroup> {
        let mut compatible: Vec<&FrameworkGroup> = self
            .groups
            .iter()
            .filter(|g| g.framework.is_compatible_with(host))
            .collect();

        if compatible.is_empty() {
            return self.fallback.iter().collect();
        }
        compatible.sort_by(|a, b| Self::rank(a, b));
        compatible
    }

    /// Every compatible item path, best group first.
    pub fn ordered_items<'a>(&'a self, host: &TargetFramework) -> impl Iterator<Item = &'a str> {
        self.compatible_groups(host)
            .into_iter()
            .flat_map(|g| g.items.iter().map(String::as_str))
    }

    /// Return the first compatible item path ending with `suffix`.
    pub fn resolve(&self, host: &TargetFramework, suffix: &str) -> Option<&str> {
        self.ordered_items(host).find(|item| item.ends_with(suffix))
    }

    fn rank(a: &FrameworkGroup, b: &FrameworkGroup) -> Ordering {
        b.framework
            .version
            .cmp(&a.framework.version)
            .then_with(|| {
                a.framework
                    .is_standard()
                    .cmp(&b.framework.is_standard())
            })
    }
}
