use thiserror::Error;

/// Failures at the HTTP client boundary (chat endpoint and model registry).
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid base_url: {0:?}")]
    InvalidBaseUrl(String),

    /// The server reported that the requested model does not exist.
    #[error("{message}")]
    ModelNotFound { model: String, message: String },

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error("Malformed response: {0}")]
    Malformed(String),

    /// A streamed response went quiet for longer than the idle limit.
    #[error("No data from server for {0:?}")]
    Stalled(std::time::Duration),

    /// Error event reported inside an otherwise successful stream.
    #[error("Registry error: {0}")]
    Registry(String),
}

impl ApiError {
    pub fn is_model_not_found(&self, model: &str) -> bool {
        matches!(self, ApiError::ModelNotFound { model: m, .. } if m == model)
    }
}

/// Convert a non-2xx response into an error, recognising "model not found"
/// bodies for `model` when one is given.
pub async fn from_response(resp: reqwest::Response, model: Option<&str>) -> ApiError {
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    classify(status, body, model)
}

fn classify(status: u16, body: String, model: Option<&str>) -> ApiError {
    if let (Some(model), Some(message)) = (model, error_message(&body)) {
        if message.contains("not found") && message.contains(model) {
            return ApiError::ModelNotFound {
                model: model.to_string(),
                message,
            };
        }
    }
    ApiError::Status { status, body }
}

/// Accepts both `{"error":{"message":"..."}}` and `{"error":"..."}`.
fn error_message(body: &str) -> Option<String> {
    let v: serde_json::Value = serde_json::from_str(body).ok()?;
    let err = v.get("error")?;
    err.get("message")
        .and_then(|m| m.as_str())
        .or_else(|| err.as_str())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openai_style_not_found_is_structured() {
        let body = r#"{"error":{"message":"model \"llama3\" not found, try pulling it first","type":"api_error"}}"#;
        let err = classify(404, body.to_string(), Some("llama3"));
        assert!(err.is_model_not_found("llama3"));
        assert!(!err.is_model_not_found("llama3.1"));
    }

    #[test]
    fn plain_error_string_is_accepted() {
        let body = r#"{"error":"model 'qwen' not found"}"#;
        assert!(classify(404, body.to_string(), Some("qwen")).is_model_not_found("qwen"));
    }

    #[test]
    fn other_model_or_other_error_stays_a_status_error() {
        let body = r#"{"error":{"message":"model \"other\" not found"}}"#;
        assert!(matches!(
            classify(404, body.to_string(), Some("llama3")),
            ApiError::Status { status: 404, .. }
        ));
        assert!(matches!(
            classify(500, "boom".to_string(), Some("llama3")),
            ApiError::Status { status: 500, .. }
        ));
        assert!(matches!(
            classify(404, body.to_string(), None),
            ApiError::Status { .. }
        ));
    }
}
