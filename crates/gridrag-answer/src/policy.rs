use std::collections::{HashMap, HashSet};

use gridrag_core::config::PolicySettings;
use gridrag_core::error::CompositionError;
use gridrag_core::types::{Authority, RiskLevel};

pub const GENERAL: &str = "general";
pub const SAFETY_CRITICAL: &str = "safety_critical";

/// Answer category implied by the query's risk level.
pub fn query_category(risk: RiskLevel) -> &'static str {
    if risk >= RiskLevel::High {
        SAFETY_CRITICAL
    } else {
        GENERAL
    }
}

/// Category contributed by a piece of evidence, e.g. `authority.critical`.
pub fn authority_category(authority: Authority) -> String {
    format!("authority.{authority}")
}

/// `category -> permitted roles`; categories without a rule are open to all.
#[derive(Debug, Clone, Default)]
pub struct RolePolicy {
    rules: HashMap<String, HashSet<String>>,
}

impl RolePolicy {
    pub fn unrestricted() -> Self {
        Self::default()
    }

    pub fn from_settings(settings: &PolicySettings) -> Self {
        settings.categories.iter().fold(Self::default(), |p, (category, roles)| p.with_rule(category, roles.iter().map(String::as_str)))
    }

    pub fn with_rule<'a>(mut self, category: &str, roles: impl IntoIterator<Item = &'a str>) -> Self {
        let roles = roles.into_iter().map(|r| r.trim().to_lowercase()).collect();
        self.rules.insert(category.trim().to_lowercase(), roles);
        self
    }

    pub fn permits(&self, role: &str, category: &str) -> bool {
        match self.rules.get(&category.to_lowercase()) {
            Some(roles) => roles.contains(&role.trim().to_lowercase()),
            None => true,
        }
    }

    pub fn check(&self, role: &str, category: &str) -> Result<(), CompositionError> {
        if self.permits(role, category) {
            Ok(())
        } else {
            Err(CompositionError::AccessDenied { role: role.to_string(), category: category.to_string() })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unlisted_categories_are_open_and_roles_ignore_case() {
        let policy = RolePolicy::unrestricted().with_rule(SAFETY_CRITICAL, ["Engineer", "field_tech"]);
        assert!(policy.permits("anyone", GENERAL));
        assert!(policy.permits("ENGINEER", SAFETY_CRITICAL));
        assert!(!policy.permits("intern", SAFETY_CRITICAL));
        assert_eq!(
            policy.check("intern", SAFETY_CRITICAL),
            Err(CompositionError::AccessDenied { role: "intern".into(), category: SAFETY_CRITICAL.into() })
        );
    }

    #[test]
    fn high_and_critical_queries_are_safety_critical() {
        assert_eq!(query_category(RiskLevel::Critical), SAFETY_CRITICAL);
        assert_eq!(query_category(RiskLevel::High), SAFETY_CRITICAL);
        assert_eq!(query_category(RiskLevel::Medium), GENERAL);
        assert_eq!(authority_category(Authority::Critical), "authority.critical");
    }
}
