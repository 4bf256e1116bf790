//! Discovery filter policy
//!
//! Decides once per discovered container whether it should be streamed.
//! Excluded containers never reach the streaming state.

use crate::models::ContainerDescriptor;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A `key=value` label selector. A selector without `=` matches an empty value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelSelector {
    pub key: String,
    pub value: String,
}

impl LabelSelector {
    pub fn parse(selector: &str) -> Self {
        let (key, value) = selector.split_once('=').unwrap_or((selector, ""));
        Self {
            key: key.trim().to_string(),
            value: value.trim().to_string(),
        }
    }

    pub fn matches(&self, container: &ContainerDescriptor) -> bool {
        container
            .labels
            .get(&self.key)
            .map(|v| v == &self.value)
            .unwrap_or(false)
    }
}

impl std::fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

/// Include/exclude rules applied to discovered containers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerFilter {
    pub include_labels: Vec<LabelSelector>,
    pub exclude_labels: Vec<LabelSelector>,
    /// Substrings of which at least one must appear in the image name
    pub include_images: Vec<String>,
}

impl ContainerFilter {
    /// Build a filter from raw `key=value` strings and image substrings
    pub fn from_strings(
        include_labels: &[String],
        exclude_labels: &[String],
        include_images: &[String],
    ) -> Self {
        let selectors = |raw: &[String]| -> Vec<LabelSelector> {
            raw.iter()
                .filter(|s| !s.trim().is_empty())
                .map(|s| LabelSelector::parse(s))
                .collect()
        };

        Self {
            include_labels: selectors(include_labels),
            exclude_labels: selectors(exclude_labels),
            include_images: include_images
                .iter()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }

    /// Whether a container should be streamed
    pub fn should_monitor(&self, container: &ContainerDescriptor) -> bool {
        if let Some(selector) = self.exclude_labels.iter().find(|s| s.matches(container)) {
            debug!(container = %container.name, label = %selector, "Excluding container by label");
            return false;
        }

        if !self.include_labels.is_empty()
            && !self.include_labels.iter().any(|s| s.matches(container))
        {
            debug!(container = %container.name, "Container lacks an include label");
            return false;
        }

        if !self.include_images.is_empty()
            && !self
                .include_images
                .iter()
                .any(|pattern| container.image.contains(pattern.as_str()))
        {
            debug!(container = %container.name, image = %container.image, "Image not included");
            return false;
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn container(image: &str, labels: &[(&str, &str)]) -> ContainerDescriptor {
        ContainerDescriptor {
            id: "abc123".to_string(),
            name: "api".to_string(),
            image: image.to_string(),
            state: "running".to_string(),
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<HashMap<_, _>>(),
        }
    }

    #[test]
    fn test_default_filter_monitors_everything() {
        let filter = ContainerFilter::default();
        assert!(filter.should_monitor(&container("nginx:latest", &[])));
    }

    #[test]
    fn test_exclude_label_wins() {
        let filter = ContainerFilter::from_strings(
            &["team=web".to_string()],
            &["sentinel.ignore=true".to_string()],
            &[],
        );

        let excluded = container("nginx", &[("team", "web"), ("sentinel.ignore", "true")]);
        assert!(!filter.should_monitor(&excluded));

        let included = container("nginx", &[("team", "web"), ("sentinel.ignore", "false")]);
        assert!(filter.should_monitor(&included));
    }

    #[test]
    fn test_include_labels_require_a_match() {
        let filter = ContainerFilter::from_strings(&["team=web".to_string()], &[], &[]);

        assert!(filter.should_monitor(&container("nginx", &[("team", "web")])));
        assert!(!filter.should_monitor(&container("nginx", &[("team", "db")])));
        assert!(!filter.should_monitor(&container("nginx", &[])));
    }

    #[test]
    fn test_include_images_by_substring() {
        let filter = ContainerFilter::from_strings(&[], &[], &["myorg/".to_string()]);

        assert!(filter.should_monitor(&container("registry.io/myorg/api:1.2", &[])));
        assert!(!filter.should_monitor(&container("postgres:16", &[])));
    }

    #[test]
    fn test_label_selector_parse() {
        let selector = LabelSelector::parse(" env = prod ");
        assert_eq!(selector.key, "env");
        assert_eq!(selector.value, "prod");
        assert_eq!(selector.to_string(), "env=prod");

        let bare = LabelSelector::parse("flag");
        assert_eq!(bare.key, "flag");
        assert_eq!(bare.value, "");
    }
}
