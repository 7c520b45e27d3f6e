// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Settings a host can load from its own configuration file.

use std::fmt;

use serde::Deserialize;

/// Entrypoint used when none is configured.
pub const DEFAULT_ENTRYPOINT: &str = "/debug/pprof/";

fn default_entrypoint() -> String {
    DEFAULT_ENTRYPOINT.to_owned()
}

/// Plugin settings as they appear in a host's configuration file.
///
/// ```
/// # use pprof_plugin::config::PluginConfig;
/// let config: PluginConfig = serde_json::from_str(r#"{"token": "s3cret"}"#).unwrap();
/// assert_eq!(config.entrypoint, "/debug/pprof/");
/// ```
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct PluginConfig {
    /// Shared secret expected in the entrypoint's `token` query parameter.
    pub token: String,
    /// Public entrypoint path.
    #[serde(default = "default_entrypoint")]
    pub entrypoint: String,
}

impl fmt::Debug for PluginConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginConfig")
            .field("token", &"<redacted>")
            .field("entrypoint", &self.entrypoint)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::Plugin;

    #[test]
    fn test_deserialize_config() {
        let config: PluginConfig =
            serde_json::from_str(r#"{"token": "abc", "entrypoint": "/ops/pprof"}"#).unwrap();
        assert_eq!(
            config,
            PluginConfig {
                token: "abc".into(),
                entrypoint: "/ops/pprof".into(),
            }
        );
        assert!(serde_json::from_str::<PluginConfig>(r#"{"entrypoint": "/x"}"#).is_err());
    }

    #[test]
    fn test_debug_redacts_token() {
        let config = PluginConfig {
            token: "hunter2".into(),
            entrypoint: default_entrypoint(),
        };
        assert!(!format!("{config:?}").contains("hunter2"));
    }

    #[test]
    fn test_plugin_from_config() {
        let plugin = Plugin::from_config(PluginConfig {
            token: "abc".into(),
            entrypoint: "/ops/pprof".into(),
        })
        .build();
        assert_eq!(plugin.routes().entrypoint(), "/ops/pprof");
    }
}
