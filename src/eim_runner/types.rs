//! EIM runner protocol messages

use crate::models::LabelScores;
use serde::Deserialize;

/// Reply to `hello`
#[derive(Debug, Clone, Deserialize)]
pub struct HelloResponse {
    #[serde(default)]
    pub project: ProjectInfo,
    pub model_parameters: ModelParameters,
}

/// Edge Impulse project the model was built from
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProjectInfo {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub deploy_version: Option<u64>,
}

/// Input/output description of the model
#[derive(Debug, Clone, Deserialize)]
pub struct ModelParameters {
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub image_input_width: u32,
    #[serde(default)]
    pub image_input_height: u32,
    #[serde(default)]
    pub image_channel_count: u32,
    #[serde(default)]
    pub model_type: Option<String>,
}

/// Reply to `classify`
#[derive(Debug, Clone, Deserialize)]
pub struct ClassifyResponse {
    #[serde(default)]
    pub result: ClassifyResult,
    #[serde(default)]
    pub timing: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClassifyResult {
    #[serde(default)]
    pub classification: LabelScores,
}

/// Common envelope fields present on every reply
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct Envelope {
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
}
