//! TensorFlow Serving REST client.
//!
//! Sends one patch per request as `{"inputs": {<input_key>: [patch]}}` to
//! `/v1/models/<model>:predict`. The reply's `outputs` keeps the batch
//! dimension of one and holds either class indices (`[1][h][w]`) or
//! per-class scores (`[1][h][w][k]`, reduced by argmax).

use std::time::Duration;

use image::RgbImage;
use reqwest::blocking::Client;
use serde_json::{json, Value};
use tiler_core::error::BackendError;
use tiler_core::{BackendConfig, ClassMap, InferenceBackend};

pub struct TfServingBackend {
    client: Client,
    base_url: String,
    input_key: String,
    output_key: String,
    timeout: Option<Duration>,
}

impl TfServingBackend {
    pub fn new(config: &BackendConfig) -> anyhow::Result<Self> {
        let mut builder = Client::builder();
        if let Some(timeout) = config.timeout() {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            client: builder.build()?,
            base_url: format!("http://{}:{}", config.host, config.port),
            input_key: config.input_key.clone(),
            output_key: config.output_key.clone(),
            timeout: config.timeout(),
        })
    }

    fn predict_url(&self, model: &str) -> String {
        format!("{}/v1/models/{model}:predict", self.base_url)
    }
}

impl InferenceBackend for TfServingBackend {
    fn predict(&self, patch: &RgbImage, model: &str) -> Result<ClassMap, BackendError> {
        let mut inputs = serde_json::Map::new();
        inputs.insert(self.input_key.clone(), json!([encode_patch(patch)]));
        let body = json!({ "inputs": inputs });
        let response = self.client.post(self.predict_url(model)).json(&body).send().map_err(|e| {
            if e.is_timeout() {
                BackendError::Timeout(self.timeout.unwrap_or_default())
            } else {
                BackendError::Transport(e.to_string())
            }
        })?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().unwrap_or_default();
            return Err(BackendError::Transport(format!("HTTP {status}: {text}")));
        }
        let reply: Value = response.json().map_err(|e| BackendError::Malformed(e.to_string()))?;
        decode_outputs(&reply, &self.output_key)
    }
}

/// `[h][w][3]` nested array of channel values.
fn encode_patch(patch: &RgbImage) -> Value {
    let rows: Vec<Value> = patch
        .rows()
        .map(|row| Value::Array(row.map(|p| json!([p[0], p[1], p[2]])).collect()))
        .collect();
    Value::Array(rows)
}

fn malformed(msg: impl Into<String>) -> BackendError {
    BackendError::Malformed(msg.into())
}

fn as_array(v: &Value) -> Result<&Vec<Value>, BackendError> {
    v.as_array().ok_or_else(|| malformed("expected a nested array"))
}

fn as_number(v: &Value) -> Result<f64, BackendError> {
    v.as_f64().ok_or_else(|| malformed(format!("expected a number, got {v}")))
}

/// Decode a predict reply into a class map.
fn decode_outputs(reply: &Value, output_key: &str) -> Result<ClassMap, BackendError> {
    let outputs = reply.get("outputs").ok_or_else(|| malformed("reply has no `outputs`"))?;
    let tensor = match outputs {
        Value::Object(map) => map
            .get(output_key)
            .ok_or_else(|| malformed(format!("`outputs` has no `{output_key}`")))?,
        other => other,
    };

    let batch = as_array(tensor)?;
    let [image] = batch.as_slice() else {
        return Err(malformed(format!("expected a batch of one, got {}", batch.len())));
    };
    let rows = as_array(image)?;
    let height = rows.len();
    let width = rows.first().map(as_array).transpose()?.map_or(0, Vec::len);
    if height == 0 || width == 0 {
        return Err(malformed("empty prediction"));
    }

    let mut data = Vec::with_capacity(width * height);
    for row in rows {
        let cols = as_array(row)?;
        if cols.len() != width {
            return Err(malformed("ragged prediction rows"));
        }
        for cell in cols {
            let class = match cell {
                Value::Array(scores) => argmax(scores)?,
                v => as_number(v)?.round().clamp(0.0, 255.0) as u8,
            };
            data.push(class);
        }
    }
    ClassMap::from_vec(width, height, data).ok_or_else(|| malformed("prediction size mismatch"))
}

/// Index of the highest score; the first wins ties.
fn argmax(scores: &[Value]) -> Result<u8, BackendError> {
    let mut best: Option<(usize, f64)> = None;
    for (i, s) in scores.iter().enumerate() {
        let s = as_number(s)?;
        if best.map_or(true, |(_, b)| s > b) {
            best = Some((i, s));
        }
    }
    let (index, _) = best.ok_or_else(|| malformed("empty score vector"))?;
    u8::try_from(index).map_err(|_| malformed(format!("class index {index} exceeds 255")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_keyed_class_indices() {
        let reply = json!({ "outputs": { "output": [[[0, 1, 2], [2, 1, 0]]] } });
        let map = decode_outputs(&reply, "output").unwrap();
        assert_eq!((map.width, map.height), (3, 2));
        assert_eq!(map.data, vec![0, 1, 2, 2, 1, 0]);
    }

    #[test]
    fn reduces_scores_by_argmax() {
        let reply = json!({ "outputs": [[[[0.1, 0.9], [0.7, 0.3]]]] });
        let map = decode_outputs(&reply, "output").unwrap();
        assert_eq!((map.width, map.height), (2, 1));
        assert_eq!(map.data, vec![1, 0]);
    }

    #[test]
    fn rejects_malformed_replies() {
        assert!(decode_outputs(&json!({}), "output").is_err());
        assert!(decode_outputs(&json!({ "outputs": { "other": [[[0]]] } }), "output").is_err());
        assert!(decode_outputs(&json!({ "outputs": [[[0, 1], [0]]] }), "output").is_err());
        assert!(decode_outputs(&json!({ "outputs": [[[0]], [[1]]] }), "output").is_err());
    }

    #[test]
    fn patch_is_encoded_row_major() {
        let img = RgbImage::from_fn(2, 1, |x, _| image::Rgb([x as u8, 5, 6]));
        assert_eq!(encode_patch(&img), json!([[[0, 5, 6], [1, 5, 6]]]));
    }
}
