//! Core data models for model runs, run parameters and engine results

use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// One unit of work: identifies a model run to execute.
///
/// Carries no payload beyond identifiers; all large data is fetched from the
/// data store by the resource resolver. Serialized as compact JSON for queue
/// transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelRunRequest {
    pub run_id: String,
    pub experiment_id: String,
    pub callback_reference: String,
}

impl ModelRunRequest {
    pub fn new(
        run_id: impl Into<String>,
        experiment_id: impl Into<String>,
        callback_reference: impl Into<String>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            experiment_id: experiment_id.into(),
            callback_reference: callback_reference.into(),
        }
    }

    /// Decode a request from its queue transport encoding
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Encode the request for queue transport
    pub fn to_vec(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Request identifier for logging purposes
    pub fn log_key(&self) -> String {
        format!("{}:{}", self.experiment_id, self.run_id)
    }
}

/// Typed value of a named run parameter.
///
/// Keys are not predeclared; values are passed through to the computation
/// engine uninterpreted. The untagged encoding matches what clients submit:
/// plain scalars, quantity objects with a unit, or labeled numeric maps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Bool(bool),
    Number(f64),
    Text(String),
    Quantity { value: f64, unit: String },
    NumberList(Vec<f64>),
    LabeledMap(HashMap<String, f64>),
}

/// Effective parameter set of a model run.
///
/// Built by layering image-group options under run-specific arguments:
/// later layers win on key collision, no key is ever dropped.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunParameters {
    values: HashMap<String, AttributeValue>,
}

impl RunParameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge parameter layers in increasing precedence
    pub fn layered(
        options: &HashMap<String, AttributeValue>,
        arguments: &HashMap<String, AttributeValue>,
    ) -> Self {
        let mut values = options.clone();
        for (name, value) in arguments {
            values.insert(name.clone(), value.clone());
        }
        Self { values }
    }

    pub fn insert(&mut self, name: impl Into<String>, value: AttributeValue) {
        self.values.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&AttributeValue> {
        self.values.get(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &AttributeValue)> {
        self.values.iter()
    }
}

/// State of a model run. A terminal state is immutable once set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    Running,
    Success,
    Failed { reason: String },
}

impl RunState {
    pub fn is_running(&self) -> bool {
        matches!(self, RunState::Running)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RunState::Success)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, RunState::Failed { .. })
    }

    /// SUCCESS and FAILED are terminal; only one transition out of RUNNING
    /// may ever be observed.
    pub fn is_terminal(&self) -> bool {
        !self.is_running()
    }
}

/// Model run record owned by the data store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRun {
    pub identifier: String,
    pub experiment_id: String,
    pub model: String,
    pub state: RunState,
    pub arguments: HashMap<String, AttributeValue>,
    /// Logical attachment name to stored file, populated only as part of a
    /// successful transition
    pub attachments: HashMap<String, PathBuf>,
    pub created_at: DateTime<Utc>,
    /// Set by the store when the run reaches a terminal state
    pub finished_at: Option<DateTime<Utc>>,
}

/// Subject resource owning a pre-existing anatomical dataset directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subject {
    pub identifier: String,
    pub data_directory: PathBuf,
}

/// One stimulus image in an image group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub identifier: String,
    pub folder: String,
    pub name: String,
    pub path: PathBuf,
}

impl ImageRecord {
    /// Manifest line for this image: folder and name, concatenated
    pub fn manifest_entry(&self) -> String {
        format!("{}{}", self.folder, self.name)
    }
}

/// Ordered sequence of stimulus images plus an options mapping
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageGroup {
    pub identifier: String,
    pub images: Vec<ImageRecord>,
    pub options: HashMap<String, AttributeValue>,
}

/// Experiment tying a subject and an image group together.
///
/// `functional_data` optionally points at a measured functional scan; when
/// present the cortical image export doubles to cover measured responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Experiment {
    pub identifier: String,
    pub name: String,
    pub subject_id: String,
    pub image_group_id: String,
    pub functional_data: Option<PathBuf>,
}

/// Population receptive field descriptor of one cortical location, in
/// degrees of visual angle
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PrfDescriptor {
    pub center_x: f64,
    pub center_y: f64,
    pub radius: f64,
}

/// One cortical measurement location: anatomical visual-area label plus
/// its receptive field
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CorticalLocation {
    pub visual_area: u8,
    pub prf: PrfDescriptor,
}

/// Response values per cortical location (rows) and stimulus image (columns)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseMatrix {
    rows: Vec<Vec<f64>>,
}

impl ResponseMatrix {
    pub fn new(rows: Vec<Vec<f64>>) -> Self {
        Self { rows }
    }

    pub fn location_count(&self) -> usize {
        self.rows.len()
    }

    pub fn stimulus_count(&self) -> usize {
        self.rows.first().map(Vec::len).unwrap_or(0)
    }

    pub fn value(&self, location: usize, stimulus: usize) -> Option<f64> {
        self.rows.get(location).and_then(|row| row.get(stimulus)).copied()
    }
}

/// Measured functional responses mapped onto cortical locations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionalData {
    pub responses: ResponseMatrix,
    pub locations: Vec<CorticalLocation>,
}

/// Output of one engine invocation.
///
/// Created fresh per invocation, consumed by the packagers, then discarded;
/// never persisted directly. Files the engine wrote into the output
/// directory are part of the bundle via `exported_files`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultBundle {
    pub prediction: ResponseMatrix,
    pub cortex_locations: Vec<CorticalLocation>,
    pub functional: Option<FunctionalData>,
    pub max_eccentricity: f64,
    pub exported_files: Vec<PathBuf>,
}
