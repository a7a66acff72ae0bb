use serde::{Deserialize, Serialize};

/// Process-wide feature switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureToggles {
    /// Allow creating documents in module configurations.
    #[serde(default)]
    pub module_feature: bool,
    /// Load the `watershed` configuration.
    #[serde(default)]
    pub watershed_feature: bool,
    /// Read the session from the new authentication cookie.
    #[serde(default)]
    pub use_new_authentication: bool,
}

impl FeatureToggles {
    /// Whether configurations with this code may be loaded.
    pub fn allows_code(&self, code: &str) -> bool {
        code != "watershed" || self.watershed_feature
    }
}
