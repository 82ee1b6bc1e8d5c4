//! Local model registry (Ollama) operations: list, pull, unload.
//!
//! Registry endpoints live at the origin of the chat `base_url`, so
//! `http://localhost:11434/v1` talks to `http://localhost:11434/api/...`.

use crate::error::{self, ApiError};
use futures_util::StreamExt;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{debug, info, warn};

const TAGS_TIMEOUT: Duration = Duration::from_secs(15);
const PS_TIMEOUT: Duration = Duration::from_secs(10);
const UNLOAD_TIMEOUT: Duration = Duration::from_secs(15);
/// Pulls have no total limit, but the headers and every chunk must arrive
/// within this window.
pub const PULL_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

pub fn registry_root(base_url: &str) -> Result<String, ApiError> {
    let invalid = || ApiError::InvalidBaseUrl(base_url.to_string());
    let parsed = url::Url::parse(base_url.trim()).map_err(|_| invalid())?;
    if !matches!(parsed.scheme(), "http" | "https") || !parsed.has_host() {
        return Err(invalid());
    }
    Ok(parsed.origin().ascii_serialization())
}

/// `round(100 * completed / total)` clamped to 0..=100, or `None` when the
/// total is unknown or zero.
pub fn pull_percent(completed: Option<f64>, total: Option<f64>) -> Option<u8> {
    match (completed, total) {
        (Some(c), Some(t)) if t != 0.0 => Some((100.0 * c / t).round().clamp(0.0, 100.0) as u8),
        _ => None,
    }
}

async fn get_json(client: &reqwest::Client, url: &str, timeout: Duration) -> Result<Value, ApiError> {
    let resp = client.get(url).timeout(timeout).send().await?;
    if !resp.status().is_success() {
        return Err(error::from_response(resp, None).await);
    }
    resp.json::<Value>()
        .await
        .map_err(|e| ApiError::Malformed(e.to_string()))
}

fn model_names<'a>(data: &'a Value, field: &'a str) -> impl Iterator<Item = String> + 'a {
    data.get("models")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(move |m| m.get(field).and_then(Value::as_str))
        .filter(|name| !name.is_empty())
        .map(str::to_string)
}

/// Names of installed models (`GET /api/tags`).
pub async fn list_installed(client: &reqwest::Client, base_url: &str) -> Result<BTreeSet<String>, ApiError> {
    let url = format!("{}/api/tags", registry_root(base_url)?);
    let data = get_json(client, &url, TAGS_TIMEOUT).await?;
    let models: BTreeSet<String> = model_names(&data, "name").collect();
    debug!("Installed models: {:?}", models);
    Ok(models)
}

/// Models currently loaded into memory (`GET /api/ps`).
pub async fn list_running(client: &reqwest::Client, base_url: &str) -> Result<Vec<String>, ApiError> {
    let url = format!("{}/api/ps", registry_root(base_url)?);
    let data = get_json(client, &url, PS_TIMEOUT).await?;
    Ok(model_names(&data, "model").collect())
}

/// Pull `model`, reporting `(status, percent)` for every streamed event.
pub async fn pull(
    client: &reqwest::Client,
    base_url: &str,
    model: &str,
    on_progress: &mut dyn FnMut(&str, Option<u8>),
) -> Result<(), ApiError> {
    pull_with_idle_limit(client, base_url, model, PULL_IDLE_TIMEOUT, on_progress).await
}

async fn pull_with_idle_limit(
    client: &reqwest::Client,
    base_url: &str,
    model: &str,
    idle: Duration,
    on_progress: &mut dyn FnMut(&str, Option<u8>),
) -> Result<(), ApiError> {
    let url = format!("{}/api/pull", registry_root(base_url)?);
    info!("Pulling model {} via {}", model, url);
    let send = client
        .post(&url)
        .json(&json!({ "name": model, "stream": true }))
        .send();
    let resp = tokio::time::timeout(idle, send)
        .await
        .map_err(|_| ApiError::Stalled(idle))??;
    if !resp.status().is_success() {
        return Err(error::from_response(resp, Some(model)).await);
    }

    let mut pending: Vec<u8> = Vec::new();
    let mut body = resp.bytes_stream();
    loop {
        let chunk = match tokio::time::timeout(idle, body.next()).await {
            Ok(Some(chunk)) => chunk?,
            Ok(None) => break,
            Err(_) => {
                warn!("Pull of {} stalled for {:?}", model, idle);
                return Err(ApiError::Stalled(idle));
            }
        };
        pending.extend_from_slice(&chunk);
        while let Some(pos) = pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = pending.drain(..=pos).collect();
            pull_event(&line, on_progress)?;
        }
    }
    pull_event(&pending, on_progress)?;
    info!("Pull of {} finished", model);
    Ok(())
}

fn pull_event(raw: &[u8], on_progress: &mut dyn FnMut(&str, Option<u8>)) -> Result<(), ApiError> {
    let line = String::from_utf8_lossy(raw);
    let line = line.trim();
    if line.is_empty() {
        return Ok(());
    }
    let Ok(evt) = serde_json::from_str::<Value>(line) else {
        debug!("Skipping non-JSON pull line: {:?}", line);
        return Ok(());
    };
    if let Some(err) = evt.get("error").and_then(Value::as_str) {
        return Err(ApiError::Registry(err.to_string()));
    }
    let status = evt.get("status").and_then(Value::as_str).unwrap_or("Downloading");
    let percent = pull_percent(
        evt.get("completed").and_then(Value::as_f64),
        evt.get("total").and_then(Value::as_f64),
    );
    on_progress(status, percent);
    Ok(())
}

/// Drop one model from memory with a zero keep-alive generate call.
pub async fn unload_model(client: &reqwest::Client, base_url: &str, model: &str) -> Result<(), ApiError> {
    let url = format!("{}/api/generate", registry_root(base_url)?);
    let resp = client
        .post(&url)
        .timeout(UNLOAD_TIMEOUT)
        .json(&json!({ "model": model, "keep_alive": 0 }))
        .send()
        .await?;
    if !resp.status().is_success() {
        return Err(error::from_response(resp, Some(model)).await);
    }
    Ok(())
}

/// Best-effort unload of every running model. Returns the names attempted,
/// whether or not each unload succeeded.
pub async fn unload_all_running(client: &reqwest::Client, base_url: &str) -> Result<Vec<String>, ApiError> {
    let running = list_running(client, base_url).await?;
    for name in &running {
        match unload_model(client, base_url, name).await {
            Ok(()) => info!("Unloaded model {}", name),
            Err(e) => warn!("Failed to unload model {}: {}", name, e),
        }
    }
    Ok(running)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{serve, Reply};

    fn client() -> reqwest::Client {
        crate::translator::build_client().unwrap()
    }

    #[test]
    fn root_is_origin_of_base_url() {
        assert_eq!(registry_root("http://localhost:11434/v1").unwrap(), "http://localhost:11434");
        assert_eq!(registry_root(" https://models.lan/v1/ ").unwrap(), "https://models.lan");
        assert!(matches!(registry_root(""), Err(ApiError::InvalidBaseUrl(_))));
        assert!(matches!(registry_root("localhost:11434"), Err(ApiError::InvalidBaseUrl(_))));
    }

    #[test]
    fn percent_is_rounded_and_clamped() {
        assert_eq!(pull_percent(Some(150.0), Some(100.0)), Some(100));
        assert_eq!(pull_percent(Some(0.0), Some(0.0)), None);
        assert_eq!(pull_percent(Some(1.0), Some(3.0)), Some(33));
        assert_eq!(pull_percent(Some(2.0), Some(3.0)), Some(67));
        assert_eq!(pull_percent(None, Some(100.0)), None);
        assert_eq!(pull_percent(Some(5.0), None), None);
    }

    #[tokio::test]
    async fn installed_names_skip_invalid_entries() {
        let server = serve(|_| {
            Reply::json(
                200,
                json!({"models": [{"name": "llama3:latest"}, {"name": ""}, {"name": 42}, {"size": 1}, {"name": "qwen2.5:7b"}]}),
            )
        })
        .await;
        let models = list_installed(&client(), &format!("{}/v1", server.origin)).await.unwrap();
        assert_eq!(models.into_iter().collect::<Vec<_>>(), vec!["llama3:latest", "qwen2.5:7b"]);
        let reqs = server.requests();
        assert_eq!((reqs[0].method.as_str(), reqs[0].path.as_str()), ("GET", "/api/tags"));
    }

    #[tokio::test]
    async fn pull_reports_each_event() {
        let server = serve(|_| {
            Reply::ndjson(&[
                json!({"status": "pulling manifest"}),
                json!({"status": "downloading", "completed": 50, "total": 200}),
                json!({"completed": 200, "total": 200}),
                json!({"status": "success"}),
            ])
        })
        .await;
        let mut seen = Vec::new();
        let mut on_progress = |s: &str, p: Option<u8>| seen.push((s.to_string(), p));
        pull(&client(), &server.origin, "llama3", &mut on_progress).await.unwrap();
        assert_eq!(
            seen,
            vec![
                ("pulling manifest".to_string(), None),
                ("downloading".to_string(), Some(25)),
                ("Downloading".to_string(), Some(100)),
                ("success".to_string(), None),
            ]
        );
        let body = server.requests()[0].json();
        assert_eq!(body, json!({"name": "llama3", "stream": true}));
    }

    #[tokio::test]
    async fn pull_error_event_fails() {
        let server = serve(|_| {
            Reply::ndjson(&[json!({"status": "pulling manifest"}), json!({"error": "pull model manifest: file does not exist"})])
        })
        .await;
        let mut on_progress = |_: &str, _: Option<u8>| {};
        let err = pull(&client(), &server.origin, "nope", &mut on_progress).await.unwrap_err();
        assert!(matches!(err, ApiError::Registry(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn stalled_pull_gives_up_and_keeps_earlier_events() {
        let server = serve(|_| Reply::stalled(&json!({"status": "pulling manifest"}).to_string())).await;
        let mut seen = Vec::new();
        let mut on_progress = |s: &str, _: Option<u8>| seen.push(s.to_string());
        let idle = Duration::from_millis(200);
        let err = pull_with_idle_limit(&client(), &server.origin, "llama3", idle, &mut on_progress)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Stalled(d) if d == idle), "got {err:?}");
        assert_eq!(seen, vec!["pulling manifest"]);
    }

    #[tokio::test]
    async fn unload_continues_past_failures() {
        let server = serve(|req| match req.path.as_str() {
            "/api/ps" => Reply::json(200, json!({"models": [{"model": "a"}, {"model": "b"}, {"model": "c"}]})),
            "/api/generate" if req.json()["model"] == "b" => Reply::text(500, "boom"),
            _ => Reply::json(200, json!({"done": true})),
        })
        .await;
        let attempted = unload_all_running(&client(), &server.origin).await.unwrap();
        assert_eq!(attempted, vec!["a", "b", "c"]);

        let unloads: Vec<Value> = server
            .requests()
            .iter()
            .filter(|r| r.path == "/api/generate")
            .map(|r| r.json())
            .collect();
        assert_eq!(unloads.len(), 3);
        assert!(unloads.iter().all(|b| b["keep_alive"] == 0));
    }

    #[tokio::test]
    async fn nothing_running_means_nothing_attempted() {
        let server = serve(|_| Reply::json(200, json!({"models": []}))).await;
        let attempted = unload_all_running(&client(), &server.origin).await.unwrap();
        assert!(attempted.is_empty());
        assert_eq!(server.requests().len(), 1);
    }
}
