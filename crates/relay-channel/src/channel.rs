use std::collections::BTreeSet;

use relay_config::ChannelConfig;
use secrecy::SecretString;
use serde::Serialize;
use url::Url;

/// Channel identifier
pub type ChannelId = u64;

/// An upstream endpoint and the (group, model) pairs it serves
#[derive(Debug, Clone)]
pub struct Channel {
    pub id: ChannelId,
    pub name: Option<String>,
    pub base_url: Url,
    pub credential: Option<SecretString>,
    pub enabled: bool,
    /// Priority tier, higher is preferred
    pub priority: i64,
    /// Relative weight within the tier
    pub weight: u64,
    pub groups: BTreeSet<String>,
    pub models: BTreeSet<String>,
    pub tag: Option<String>,
}

impl Channel {
    /// Whether this channel serves the given group and model
    ///
    /// Ignores the enabled flag; eligibility is decided by the selector
    pub fn serves(&self, group: &str, model: &str) -> bool {
        self.groups.contains(group) && self.models.contains(model)
    }

    /// Credential-free representation for admin listings
    pub fn view(&self) -> ChannelView {
        ChannelView {
            id: self.id,
            name: self.name.clone(),
            base_url: self.base_url.to_string(),
            enabled: self.enabled,
            priority: self.priority,
            weight: self.weight,
            groups: self.groups.iter().cloned().collect(),
            models: self.models.iter().cloned().collect(),
            tag: self.tag.clone(),
            has_credential: self.credential.is_some(),
        }
    }
}

impl From<ChannelConfig> for Channel {
    fn from(config: ChannelConfig) -> Self {
        Self {
            id: config.id,
            name: config.name,
            base_url: config.base_url,
            credential: config.credential,
            enabled: config.enabled,
            priority: config.priority,
            weight: config.weight,
            groups: config.groups,
            models: config.models,
            tag: config.tag,
        }
    }
}

/// Serializable channel summary with the credential redacted
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ChannelView {
    pub id: ChannelId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub base_url: String,
    pub enabled: bool,
    pub priority: i64,
    pub weight: u64,
    pub groups: Vec<String>,
    pub models: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    pub has_credential: bool,
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub fn channel(id: ChannelId, priority: i64, weight: u64) -> Channel {
        Channel {
            id,
            name: None,
            base_url: Url::parse("https://upstream.example.com/v1").unwrap(),
            credential: None,
            enabled: true,
            priority,
            weight,
            groups: BTreeSet::from(["default".to_owned()]),
            models: BTreeSet::from(["gpt-4o-mini".to_owned()]),
            tag: None,
        }
    }

    #[test]
    fn serves_requires_group_and_model() {
        let ch = channel(1, 0, 0);
        assert!(ch.serves("default", "gpt-4o-mini"));
        assert!(!ch.serves("vip", "gpt-4o-mini"));
        assert!(!ch.serves("default", "gpt-4o"));
    }

    #[test]
    fn view_redacts_credential() {
        let mut ch = channel(1, 0, 0);
        ch.credential = Some(SecretString::from("sk-secret"));

        let json = serde_json::to_string(&ch.view()).unwrap();
        assert!(!json.contains("sk-secret"));
        assert!(json.contains("\"has_credential\":true"));
    }
}
