//! Mixin configuration resources.

use serde::{Deserialize, Serialize};
use weave_types::internal_name;

use crate::error::{MixinError, Result};
use crate::meta::MixinMeta;
use crate::options::Side;

/// One parsed mixin configuration resource.
///
/// The JSON shape follows the conventional config format: a package
/// prefix, plain plus side-filtered mixin lists, and session-level knobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MixinConfig {
    /// Resource name this config was loaded from; set by [`parse`](Self::parse).
    #[serde(skip)]
    pub name: String,
    /// Package prefix for all declared mixin names, in dotted form.
    #[serde(default)]
    pub package: String,
    /// Mixins applied on both sides.
    #[serde(default)]
    pub mixins: Vec<String>,
    /// Mixins applied on the client side only.
    #[serde(default)]
    pub client: Vec<String>,
    /// Mixins applied on the server side only.
    #[serde(default)]
    pub server: Vec<String>,
    /// Default priority for mixins that do not declare one.
    #[serde(default)]
    pub priority: Option<i32>,
    /// Verbose logging for this config's mixins.
    #[serde(default)]
    pub verbose: bool,
    /// Name of the refmap resource.
    #[serde(default)]
    pub refmap: Option<String>,
    /// Compatibility level this config requires.
    #[serde(default, rename = "compatibilityLevel")]
    pub compatibility_level: Option<u32>,
    /// When `true`, a missing mixin or target fails the session.
    #[serde(default)]
    pub required: bool,
    /// Name of an optional parent config.
    #[serde(default)]
    pub parent: Option<String>,
}

impl MixinConfig {
    /// Parse a config resource from its JSON text.
    pub fn parse(name: &str, json: &str) -> Result<Self> {
        let mut config: MixinConfig =
            serde_json::from_str(json).map_err(|err| MixinError::InvalidConfig {
                name: name.into(),
                reason: err.to_string(),
            })?;
        config.name = name.into();
        Ok(config)
    }

    /// The default priority for this config's mixins.
    pub fn default_priority(&self) -> i32 {
        self.priority.unwrap_or(MixinMeta::DEFAULT_PRIORITY)
    }

    /// Internal names of all mixin classes active on the given side.
    pub fn mixin_classes(&self, side: Side) -> Vec<String> {
        let prefix = if self.package.is_empty() {
            String::new()
        } else {
            format!("{}/", internal_name(&self.package))
        };
        let qualify = |simple: &String| format!("{prefix}{}", internal_name(simple));

        let mut classes: Vec<String> = self.mixins.iter().map(qualify).collect();
        match side {
            Side::Client => classes.extend(self.client.iter().map(qualify)),
            Side::Server => classes.extend(self.server.iter().map(qualify)),
            Side::Universal => {
                classes.extend(self.client.iter().map(qualify));
                classes.extend(self.server.iter().map(qualify));
            }
        }
        classes
    }
}
