use serde::Deserialize;
use serde_json::Value;

use crate::sanitize::SanitizePolicy;

pub const DEFAULT_IMAGE_ROUTE_PREFIX: &str = "/api/images/";
pub const DEFAULT_META_DESCRIPTION_MAX_LENGTH: usize = 155;

/// Caller-supplied engine options. Every field is optional.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineOptions {
    pub image_route_prefix: Option<String>,
    pub meta_description_max_length: Option<usize>,
    pub gfm: Option<bool>,
    pub allowed_url_protocols: Option<Vec<String>>,
    pub max_nesting_depth: Option<usize>,
    pub max_attribute_count: Option<usize>,
}

/// Options with defaults applied.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub image_route_prefix: String,
    pub meta_description_max_length: usize,
    pub gfm: bool,
    pub sanitize: SanitizePolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from_options(None)
    }
}

impl EngineConfig {
    pub fn from_options(options: Option<EngineOptions>) -> Self {
        let options = options.unwrap_or_default();
        let defaults = SanitizePolicy::default();
        let image_route_prefix = options
            .image_route_prefix
            .filter(|prefix| !prefix.trim().is_empty())
            .map(|prefix| {
                if prefix.ends_with('/') {
                    prefix
                } else {
                    format!("{prefix}/")
                }
            })
            .unwrap_or_else(|| DEFAULT_IMAGE_ROUTE_PREFIX.to_string());

        Self {
            image_route_prefix,
            meta_description_max_length: options
                .meta_description_max_length
                .filter(|length| *length > 0)
                .unwrap_or(DEFAULT_META_DESCRIPTION_MAX_LENGTH),
            gfm: options.gfm.unwrap_or(true),
            sanitize: SanitizePolicy {
                allowed_url_protocols: options
                    .allowed_url_protocols
                    .unwrap_or(defaults.allowed_url_protocols),
                max_nesting_depth: options
                    .max_nesting_depth
                    .unwrap_or(defaults.max_nesting_depth),
                max_attribute_count: options
                    .max_attribute_count
                    .unwrap_or(defaults.max_attribute_count),
            },
        }
    }

    /// Resolves options passed across the JS boundary as a plain object.
    pub fn from_value(options: Option<Value>) -> Result<Self, serde_json::Error> {
        let parsed = match options {
            Some(Value::Null) | None => None,
            Some(value) => Some(serde_json::from_value::<EngineOptions>(value)?),
        };
        Ok(Self::from_options(parsed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults_apply_when_no_options_are_given() {
        let config = EngineConfig::default();
        assert_eq!(config.image_route_prefix, "/api/images/");
        assert_eq!(config.meta_description_max_length, 155);
        assert!(config.gfm);
        assert_eq!(
            config.sanitize.allowed_url_protocols,
            vec!["https:", "http:", "mailto:"]
        );
    }

    #[test]
    fn camel_case_options_override_defaults() {
        let config = EngineConfig::from_value(Some(json!({
            "imageRoutePrefix": "/media",
            "metaDescriptionMaxLength": 80,
            "gfm": false,
            "maxNestingDepth": 4
        })))
        .unwrap();

        assert_eq!(config.image_route_prefix, "/media/");
        assert_eq!(config.meta_description_max_length, 80);
        assert!(!config.gfm);
        assert_eq!(config.sanitize.max_nesting_depth, 4);
    }

    #[test]
    fn malformed_options_are_rejected() {
        assert!(EngineConfig::from_value(Some(json!({ "gfm": "yes" }))).is_err());
        assert!(EngineConfig::from_value(Some(Value::Null)).is_ok());
    }
}
