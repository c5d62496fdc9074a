use crate::error::CommonError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Value of the `acKind` field for image manifests.
pub const IMAGE_MANIFEST_KIND: &str = "ImageManifest";

/// Schema version written into every manifest.
pub const MANIFEST_VERSION: &str = "0.8.11";

/// A validated manifest name.
///
/// Names are lowercase ASCII alphanumeric runs joined by single `-`, `.`,
/// `_`, `~` or `/` separators, e.g. `example.com/app-server`. They may not
/// start or end with a separator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
#[cfg_attr(feature = "schema", schemars(transparent))]
#[serde(try_from = "String", into = "String")]
pub struct AcName(String);

impl AcName {
    pub fn new(name: impl Into<String>) -> Result<Self, CommonError> {
        let name = name.into();
        validate_name(&name)?;
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn validate_name(name: &str) -> Result<(), CommonError> {
    let invalid = |reason: &str| CommonError::InvalidName {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    if name.is_empty() {
        return Err(invalid("name is empty"));
    }

    let mut previous_was_separator = true;
    for c in name.chars() {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            previous_was_separator = false;
        } else if matches!(c, '-' | '.' | '_' | '~' | '/') {
            if previous_was_separator {
                return Err(invalid(
                    "separators must sit between alphanumeric characters",
                ));
            }
            previous_was_separator = true;
        } else {
            return Err(invalid(
                "only lowercase alphanumerics and '-', '.', '_', '~', '/' are allowed",
            ));
        }
    }

    if previous_was_separator {
        return Err(invalid("name ends with a separator"));
    }

    Ok(())
}

impl TryFrom<String> for AcName {
    type Error = CommonError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<AcName> for String {
    fn from(value: AcName) -> Self {
        value.0
    }
}

impl fmt::Display for AcName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A name/value label attached to the image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
pub struct Label {
    pub name: AcName,
    pub value: String,
}

impl Label {
    pub fn new(name: &str, value: impl Into<String>) -> Result<Self, CommonError> {
        Ok(Self {
            name: AcName::new(name)?,
            value: value.into(),
        })
    }
}

/// The application the image runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
pub struct App {
    /// Entrypoint executable followed by its arguments.
    pub exec: Vec<String>,
    pub user: String,
    pub group: String,
}

/// The image manifest stored as the `manifest` entry of the artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct ImageManifest {
    pub ac_kind: String,
    pub ac_version: String,
    pub name: AcName,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<Label>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app: Option<App>,
}

impl ImageManifest {
    /// A manifest with no app and no labels.
    pub fn blank(name: AcName) -> Self {
        Self {
            ac_kind: IMAGE_MANIFEST_KIND.to_string(),
            ac_version: MANIFEST_VERSION.to_string(),
            name,
            labels: Vec::new(),
            app: None,
        }
    }

    /// Find a label value by name.
    pub fn label(&self, name: &str) -> Option<&str> {
        self.labels
            .iter()
            .find(|label| label.name.as_str() == name)
            .map(|label| label.value.as_str())
    }

    pub fn to_json(&self) -> Result<String, CommonError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
