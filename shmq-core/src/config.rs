// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Queue creation parameters and the YAML queue manifest.
//!
//! Creation parameters are only meaningful together, so they travel as one
//! validated record. Any invalid field results in a HardValidationError.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Deserializer};

use crate::error::{HardValidationError, QueueError, QueueResult};
use crate::types::{Permissions, QueueName};

/// Upper bound on the number of slots in one queue.
pub const MAX_CAPACITY: usize = 65536;

/// Upper bound on a single message payload (16 MB).
pub const MAX_MESSAGE_LEN: usize = 16 * 1024 * 1024;

/// Parameters fixed when a queue is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueConfig {
    capacity: usize,
    max_message_len: usize,
    permissions: Permissions,
}

impl QueueConfig {
    /// Create a validated configuration.
    pub fn new(
        capacity: usize,
        max_message_len: usize,
        permissions: Permissions,
    ) -> Result<Self, HardValidationError> {
        if !(1..=MAX_CAPACITY).contains(&capacity) {
            return Err(HardValidationError::InvalidFieldValue {
                field: "capacity",
                value: capacity.to_string(),
                reason: format!("Capacity must be between 1 and {}", MAX_CAPACITY),
            });
        }

        if !(1..=MAX_MESSAGE_LEN).contains(&max_message_len) {
            return Err(HardValidationError::InvalidFieldValue {
                field: "max_message_len",
                value: max_message_len.to_string(),
                reason: format!("Maximum message length must be between 1 and {}", MAX_MESSAGE_LEN),
            });
        }

        Ok(Self {
            capacity,
            max_message_len,
            permissions,
        })
    }

    /// Number of messages the queue can hold.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Largest accepted payload in bytes.
    pub fn max_message_len(&self) -> usize {
        self.max_message_len
    }

    /// Mode bits for the backing object.
    pub fn permissions(&self) -> Permissions {
        self.permissions
    }
}

/// Raw queue entry as parsed from YAML (before validation).
#[derive(Debug, Deserialize)]
struct RawQueueConfig {
    name: String,
    capacity: Option<usize>,
    max_message_len: Option<usize>,
    #[serde(default = "default_permissions", deserialize_with = "deserialize_mode")]
    permissions: u32,
}

fn default_permissions() -> u32 {
    Permissions::OWNER_RW.bits()
}

/// Modes are written either as an integer or as an octal string like "0666".
fn deserialize_mode<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawMode {
        Int(u32),
        Text(String),
    }

    match RawMode::deserialize(deserializer)? {
        RawMode::Int(mode) => Ok(mode),
        RawMode::Text(text) => Permissions::parse_octal(&text)
            .map(|mode| mode.bits())
            .map_err(serde::de::Error::custom),
    }
}

/// Raw root manifest file.
#[derive(Debug, Deserialize)]
struct RawManifest {
    queues: Vec<RawQueueConfig>,
}

/// One validated manifest entry.
#[derive(Debug, Clone)]
pub struct QueueDefinition {
    pub name: QueueName,
    pub config: QueueConfig,
}

/// Complete validated manifest.
#[derive(Debug)]
pub struct Manifest {
    pub queues: Vec<QueueDefinition>,
}

impl Manifest {
    /// Look up a queue definition by name.
    pub fn get(&self, name: &QueueName) -> Option<&QueueDefinition> {
        self.queues.iter().find(|q| &q.name == name)
    }
}

/// Manifest loader with strict validation.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load and validate a manifest from a YAML file.
    pub fn load_file(path: impl AsRef<Path>) -> QueueResult<Manifest> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(QueueError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| QueueError::ConfigParse {
            message: format!("Failed to read {}: {}", path.display(), e),
        })?;

        Self::load_string(&content)
    }

    /// Load and validate a manifest from a YAML string.
    pub fn load_string(content: &str) -> QueueResult<Manifest> {
        let raw: RawManifest =
            serde_yaml::from_str(content).map_err(|e| QueueError::ConfigParse {
                message: format!("YAML parse error: {}", e),
            })?;

        Ok(Self::validate(raw)?)
    }

    fn validate(raw: RawManifest) -> Result<Manifest, HardValidationError> {
        let mut queues = Vec::with_capacity(raw.queues.len());
        let mut seen = HashSet::new();

        for (index, raw_queue) in raw.queues.into_iter().enumerate() {
            let queue = Self::validate_queue(raw_queue, index)?;

            if !seen.insert(queue.name.clone()) {
                return Err(HardValidationError::DuplicateQueueName {
                    name: queue.name.to_string(),
                });
            }

            queues.push(queue);
        }

        if queues.is_empty() {
            return Err(HardValidationError::SchemaValidation {
                message: "At least one queue must be defined".to_string(),
            });
        }

        Ok(Manifest { queues })
    }

    fn validate_queue(
        raw: RawQueueConfig,
        index: usize,
    ) -> Result<QueueDefinition, HardValidationError> {
        let context = format!("queue[{}] '{}'", index, raw.name);
        let name = QueueName::new(raw.name)?;

        let capacity = raw
            .capacity
            .ok_or_else(|| HardValidationError::MissingRequiredField {
                field: "capacity",
                context: context.clone(),
            })?;
        let max_message_len =
            raw.max_message_len
                .ok_or(HardValidationError::MissingRequiredField {
                    field: "max_message_len",
                    context,
                })?;

        let config = QueueConfig::new(capacity, max_message_len, Permissions::new(raw.permissions)?)?;
        Ok(QueueDefinition { name, config })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_config_bounds() {
        assert!(QueueConfig::new(5, 25, Permissions::default()).is_ok());
        assert!(QueueConfig::new(0, 25, Permissions::default()).is_err());
        assert!(QueueConfig::new(MAX_CAPACITY + 1, 25, Permissions::default()).is_err());
        assert!(QueueConfig::new(5, 0, Permissions::default()).is_err());
        assert!(QueueConfig::new(5, MAX_MESSAGE_LEN + 1, Permissions::default()).is_err());
    }

    #[test]
    fn test_load_manifest() {
        let manifest = ConfigLoader::load_string(
            r#"
queues:
  - name: /projet_file_msg
    capacity: 5
    max_message_len: 25
    permissions: "0666"
  - name: audit
    capacity: 64
    max_message_len: 512
"#,
        )
        .unwrap();

        assert_eq!(manifest.queues.len(), 2);
        let first = &manifest.queues[0];
        assert_eq!(first.name.as_str(), "projet_file_msg");
        assert_eq!(first.config.capacity(), 5);
        assert_eq!(first.config.max_message_len(), 25);
        assert_eq!(first.config.permissions().bits(), 0o666);

        let audit = manifest.get(&QueueName::new("audit").unwrap()).unwrap();
        assert_eq!(audit.config.permissions(), Permissions::OWNER_RW);
    }

    #[test]
    fn test_integer_permissions() {
        let manifest = ConfigLoader::load_string(
            r#"
queues:
  - name: q
    capacity: 1
    max_message_len: 8
    permissions: 416
"#,
        )
        .unwrap();
        assert_eq!(manifest.queues[0].config.permissions().bits(), 0o640);
    }

    #[test]
    fn test_missing_creation_parameter() {
        let err = ConfigLoader::load_string(
            r#"
queues:
  - name: q
    capacity: 4
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("max_message_len"));
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let err = ConfigLoader::load_string(
            r#"
queues:
  - name: q
    capacity: 4
    max_message_len: 8
  - name: /q
    capacity: 2
    max_message_len: 8
"#,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            QueueError::InvalidConfig(HardValidationError::DuplicateQueueName { .. })
        ));
    }

    #[test]
    fn test_empty_manifest_rejected() {
        assert!(ConfigLoader::load_string("queues: []").is_err());
    }
}
