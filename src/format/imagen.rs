use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// :predict request (proxy -> Vertex)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct PredictRequest {
    pub instances: Vec<PredictInstance>,
    pub parameters: PredictParameters,
}

#[derive(Debug, Clone, Serialize)]
pub struct PredictInstance {
    pub prompt: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictParameters {
    pub sample_count: u32,
    pub aspect_ratio: String,
    pub safety_setting: &'static str,
}

// ---------------------------------------------------------------------------
// :predict response (Vertex -> proxy)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct PredictResponse {
    #[serde(default)]
    pub predictions: Vec<Prediction>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prediction {
    #[serde(default)]
    pub bytes_base64_encoded: String,
    #[serde(default)]
    pub mime_type: Option<String>,
}
