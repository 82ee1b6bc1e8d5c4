//! Blocking facade over the async HTTP clients. Pipeline runs happen on
//! their own short-lived threads, so each call simply blocks on the runtime.

use crate::error::ApiError;
use crate::registry;
use crate::translator::{self, TranslationRequest};
use anyhow::{Context, Result};
use std::collections::BTreeSet;

pub trait Backend: Send + Sync {
    fn translate(&self, req: &TranslationRequest, on_partial: Option<&mut dyn FnMut(&str)>) -> Result<String, ApiError>;
    fn list_installed(&self, base_url: &str) -> Result<BTreeSet<String>, ApiError>;
    fn pull(&self, base_url: &str, model: &str, on_progress: &mut dyn FnMut(&str, Option<u8>)) -> Result<(), ApiError>;
    fn unload_all_running(&self, base_url: &str) -> Result<Vec<String>, ApiError>;
}

pub struct HttpBackend {
    rt: tokio::runtime::Runtime,
    client: reqwest::Client,
}

impl HttpBackend {
    pub fn new() -> Result<Self> {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("gpttrans-http")
            .enable_all()
            .build()
            .context("failed to start tokio runtime")?;
        let client = translator::build_client().context("failed to build HTTP client")?;
        Ok(Self { rt, client })
    }
}

impl Backend for HttpBackend {
    fn translate(&self, req: &TranslationRequest, on_partial: Option<&mut dyn FnMut(&str)>) -> Result<String, ApiError> {
        self.rt.block_on(translator::translate(&self.client, req, on_partial))
    }

    fn list_installed(&self, base_url: &str) -> Result<BTreeSet<String>, ApiError> {
        self.rt.block_on(registry::list_installed(&self.client, base_url))
    }

    fn pull(&self, base_url: &str, model: &str, on_progress: &mut dyn FnMut(&str, Option<u8>)) -> Result<(), ApiError> {
        self.rt.block_on(registry::pull(&self.client, base_url, model, on_progress))
    }

    fn unload_all_running(&self, base_url: &str) -> Result<Vec<String>, ApiError> {
        self.rt.block_on(registry::unload_all_running(&self.client, base_url))
    }
}
