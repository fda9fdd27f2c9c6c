//! Model registry: declared parameter sets and output attachments per model

use crate::error::{Result, WorkerError};
use crate::models::{AttributeValue, RunParameters};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Declared parameter of a model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterDef {
    pub name: String,
    #[serde(default)]
    pub default: Option<AttributeValue>,
}

/// Declared output attachment of a model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentDef {
    pub filename: String,
    #[serde(default)]
    pub mime_type: Option<String>,
}

/// Schema of one predictive model: its identifier, the parameters runs may
/// set, and the output attachments a successful run must publish
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelDefinition {
    pub identifier: String,
    pub parameters: Vec<ParameterDef>,
    pub outputs: Vec<AttachmentDef>,
}

impl ModelDefinition {
    pub fn declares_parameter(&self, name: &str) -> bool {
        self.parameters.iter().any(|p| p.name == name)
    }

    /// Check run-specific arguments against the declared parameter set
    pub fn validate_arguments<'a>(
        &self,
        arguments: impl IntoIterator<Item = &'a String>,
    ) -> Result<()> {
        for name in arguments {
            if !self.declares_parameter(name) {
                return Err(WorkerError::InvalidModel {
                    message: format!(
                        "argument '{}' is not in the parameter set of model '{}'",
                        name, self.identifier
                    ),
                });
            }
        }
        Ok(())
    }

    /// Filenames of every declared output attachment
    pub fn output_filenames(&self) -> impl Iterator<Item = &str> {
        self.outputs.iter().map(|a| a.filename.as_str())
    }

    /// Fill in declared parameter defaults for keys no other layer set.
    /// Defaults are the lowest-precedence layer: they never override
    /// image-group options or run arguments.
    pub fn apply_defaults(&self, parameters: &mut RunParameters) {
        for parameter in &self.parameters {
            if let Some(default) = &parameter.default {
                if parameters.get(&parameter.name).is_none() {
                    parameters.insert(parameter.name.clone(), default.clone());
                }
            }
        }
    }
}

/// Registry of known model definitions
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    models: HashMap<String, ModelDefinition>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load model definitions from a JSON file containing a list of
    /// `ModelDefinition` objects
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let definitions: Vec<ModelDefinition> = serde_json::from_str(&content)?;
        let mut registry = Self::new();
        for definition in definitions {
            registry.insert(definition);
        }
        Ok(registry)
    }

    pub fn insert(&mut self, definition: ModelDefinition) {
        self.models.insert(definition.identifier.clone(), definition);
    }

    /// Look up a model by name
    pub fn get(&self, identifier: &str) -> Result<&ModelDefinition> {
        self.models
            .get(identifier)
            .ok_or_else(|| WorkerError::InvalidModel {
                message: format!("unknown model '{}'", identifier),
            })
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_model() -> ModelDefinition {
        ModelDefinition {
            identifier: "benson17".to_string(),
            parameters: vec![
                ParameterDef {
                    name: "gabor_orientations".to_string(),
                    default: None,
                },
                ParameterDef {
                    name: "max_eccentricity".to_string(),
                    default: Some(AttributeValue::Number(10.0)),
                },
            ],
            outputs: vec![
                AttachmentDef {
                    filename: "results.tar.gz".to_string(),
                    mime_type: Some("application/gzip".to_string()),
                },
                AttachmentDef {
                    filename: "cortical-images.tar".to_string(),
                    mime_type: Some("application/x-tar".to_string()),
                },
            ],
        }
    }

    #[test]
    fn test_unknown_model_is_invalid() {
        let registry = ModelRegistry::new();
        let err = registry.get("not a valid run name").unwrap_err();
        assert_eq!(err.error_type(), "invalid_model");
    }

    #[test]
    fn test_lookup_and_outputs() {
        let mut registry = ModelRegistry::new();
        registry.insert(test_model());

        let model = registry.get("benson17").unwrap();
        let outputs: Vec<&str> = model.output_filenames().collect();
        assert_eq!(outputs, vec!["results.tar.gz", "cortical-images.tar"]);
    }

    #[test]
    fn test_out_of_schema_argument_is_invalid() {
        let model = test_model();
        let names = vec!["gabor_orientations".to_string()];
        assert!(model.validate_arguments(&names).is_ok());

        let names = vec!["not_a_parameter".to_string()];
        let err = model.validate_arguments(&names).unwrap_err();
        assert_eq!(err.error_type(), "invalid_model");
    }

    #[test]
    fn test_defaults_fill_gaps_without_overriding() {
        let model = test_model();
        let mut parameters = RunParameters::new();
        parameters.insert("gabor_orientations", AttributeValue::Number(4.0));

        model.apply_defaults(&mut parameters);

        // max_eccentricity was unset, so the declared default lands
        assert_eq!(
            parameters.get("max_eccentricity"),
            Some(&AttributeValue::Number(10.0))
        );
        // An explicitly set key keeps its value
        assert_eq!(
            parameters.get("gabor_orientations"),
            Some(&AttributeValue::Number(4.0))
        );
        // gabor_orientations declares no default, so nothing else appears
        assert_eq!(parameters.len(), 2);
    }

    #[test]
    fn test_registry_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("models.json");
        let json = serde_json::to_string(&vec![test_model()]).unwrap();
        std::fs::write(&path, json).unwrap();

        let registry = ModelRegistry::from_json_file(&path).unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry.get("benson17").is_ok());
    }
}
