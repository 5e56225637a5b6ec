use serde::{Deserialize, Serialize};

use crate::error::{FxError, FxResult};

/// Engine-wide evaluation settings.
///
/// Hosts usually build this with [`EngineConfig::default`] and override individual fields, or load
/// it from JSON with [`EngineConfig::from_json`]. Every field has a default so partial documents
/// are accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    /// Culture used by text/number conversions.
    pub culture: CultureConfig,
    /// Maximum nesting of user-defined function calls before an error value is produced.
    pub max_call_depth: u32,
    /// When `false`, every table operation is evaluated locally after materializing rows.
    pub enable_delegation: bool,
    /// Attach a warning when `CountRows` runs directly on a remote source.
    pub count_rows_warning: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            culture: CultureConfig::default(),
            max_call_depth: 64,
            enable_delegation: true,
            count_rows_warning: true,
        }
    }
}

impl EngineConfig {
    pub fn from_json(json: &str) -> FxResult<Self> {
        let config: Self = serde_json::from_str(json).map_err(|e| FxError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> FxResult<()> {
        if self.max_call_depth == 0 {
            return Err(FxError::Config("maxCallDepth must be at least 1".into()));
        }
        if self.culture.decimal_separator.is_ascii_digit()
            || self.culture.decimal_separator.is_whitespace()
        {
            return Err(FxError::Config(format!(
                "invalid decimal separator {:?}",
                self.culture.decimal_separator
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CultureConfig {
    /// BCP-47 style name, e.g. `en-US`.
    pub name: String,
    pub decimal_separator: char,
}

impl Default for CultureConfig {
    fn default() -> Self {
        Self::en_us()
    }
}

impl CultureConfig {
    pub fn en_us() -> Self {
        Self {
            name: "en-US".to_string(),
            decimal_separator: '.',
        }
    }

    pub fn de_de() -> Self {
        Self {
            name: "de-DE".to_string(),
            decimal_separator: ',',
        }
    }

    /// Parse a culture-formatted number. Surrounding whitespace is ignored.
    pub fn parse_number(&self, text: &str) -> Option<f64> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return None;
        }
        let normalized = if self.decimal_separator == '.' {
            trimmed.to_string()
        } else {
            trimmed.replace(self.decimal_separator, ".")
        };
        normalized.parse::<f64>().ok().filter(|n| n.is_finite())
    }

    pub fn format_number(&self, n: f64) -> String {
        let text = if n.fract() == 0.0 && n.abs() < 1e15 {
            format!("{}", n as i64)
        } else {
            format!("{n}")
        };
        if self.decimal_separator == '.' {
            text
        } else {
            text.replace('.', &self.decimal_separator.to_string())
        }
    }
}
