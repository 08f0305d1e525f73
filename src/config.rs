//! Engine configuration
//!
//! Resource limits the interpreter enforces. Every field has a default, so a
//! JSON document only needs to name the settings it changes.

use serde::{Deserialize, Serialize};

use crate::parser::limits::{MAX_MEMORY_PAGES_32, MAX_TABLE_SIZE};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid configuration: {field} must be at least {min}, got {value}")]
    OutOfRange { field: &'static str, min: u64, value: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Nested guest calls before "call stack exhausted"
    pub max_call_depth: u32,
    /// Operand stack entries across all active frames
    pub max_value_stack: u32,
    /// Upper bound on any memory's size in pages, whatever it declares
    pub max_memory_pages: u32,
    /// Upper bound on any table's size in elements
    pub max_table_elements: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            max_call_depth: 1_000,
            max_value_stack: 1 << 20,
            max_memory_pages: MAX_MEMORY_PAGES_32,
            max_table_elements: MAX_TABLE_SIZE,
        }
    }
}

impl Config {
    pub fn from_json(json: &str) -> Result<Config, ConfigError> {
        let config: Config = serde_json::from_str(json)?;
        config.check()?;
        Ok(config)
    }

    pub fn to_json(&self) -> String {
        // a struct of integers always serializes
        serde_json::to_string(self).unwrap_or_default()
    }

    fn check(&self) -> Result<(), ConfigError> {
        let at_least_one = [
            ("max_call_depth", self.max_call_depth),
            ("max_value_stack", self.max_value_stack),
        ];
        for (field, value) in at_least_one {
            if value == 0 {
                return Err(ConfigError::OutOfRange {
                    field,
                    min: 1,
                    value: value as u64,
                });
            }
        }
        Ok(())
    }

    pub fn with_max_call_depth(mut self, depth: u32) -> Self {
        self.max_call_depth = depth;
        self
    }

    pub fn with_max_memory_pages(mut self, pages: u32) -> Self {
        self.max_memory_pages = pages;
        self
    }

    pub fn with_max_table_elements(mut self, elements: u32) -> Self {
        self.max_table_elements = elements;
        self
    }
}
