use qcat_core::FeatureToggles;
use serde::{Deserialize, Serialize};
use time::Duration;

/// Session cookie read when `use_new_authentication` is off.
pub const LEGACY_SESSION_COOKIE: &str = "fe_typo_user";
/// Session cookie read when `use_new_authentication` is on.
pub const SESSION_COOKIE: &str = "wocat_session";

/// The part of the process settings the engine reads. Built by the
/// binary and handed to [`crate::AccessBoundary::new`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSettings {
    #[serde(default = "default_lock_ttl")]
    pub lock_ttl_minutes: i64,
    /// Public site root used in notification links.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_languages")]
    pub languages: Vec<String>,
    #[serde(default = "default_directory_timeout")]
    pub directory_timeout_ms: u64,
    #[serde(default)]
    pub features: FeatureToggles,
}

fn default_lock_ttl() -> i64 {
    10
}

fn default_base_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_languages() -> Vec<String> {
    vec!["en".to_string(), "es".to_string(), "fr".to_string()]
}

fn default_directory_timeout() -> u64 {
    3000
}

impl Default for EngineSettings {
    fn default() -> Self {
        EngineSettings {
            lock_ttl_minutes: default_lock_ttl(),
            base_url: default_base_url(),
            languages: default_languages(),
            directory_timeout_ms: default_directory_timeout(),
            features: FeatureToggles::default(),
        }
    }
}

impl EngineSettings {
    pub fn lock_ttl(&self) -> Duration {
        Duration::minutes(self.lock_ttl_minutes.max(1))
    }

    pub fn directory_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.directory_timeout_ms)
    }

    pub fn session_cookie(&self) -> &'static str {
        if self.features.use_new_authentication {
            SESSION_COOKIE
        } else {
            LEGACY_SESSION_COOKIE
        }
    }

    /// Public URL of a document, as used in notifications.
    pub fn document_url(&self, configuration: &str, identifier: &str) -> String {
        format!(
            "{}/{}/view/{}/",
            self.base_url.trim_end_matches('/'),
            configuration,
            identifier
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_url_and_cookie_follow_settings() {
        let mut settings = EngineSettings {
            base_url: "https://qcat.example.org/".to_string(),
            ..EngineSettings::default()
        };
        assert_eq!(
            settings.document_url("technologies", "technologies_12"),
            "https://qcat.example.org/technologies/view/technologies_12/"
        );
        assert_eq!(settings.session_cookie(), LEGACY_SESSION_COOKIE);
        settings.features.use_new_authentication = true;
        assert_eq!(settings.session_cookie(), SESSION_COOKIE);
        assert_eq!(settings.lock_ttl(), Duration::minutes(10));
    }
}
