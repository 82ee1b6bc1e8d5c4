//! The copy, translate, paste, restore cycle and the guarded model actions.
//!
//! Every operation here competes for one `SingleFlight` guard. A hotkey
//! press or action that arrives while another run holds the guard is
//! dropped, never queued.

use crate::backend::Backend;
use crate::config::Settings;
use crate::events::Notifier;
use crate::guard::SingleFlight;
use crate::input::{Clipboard, KeySender};
use crate::translator::TranslationRequest;
use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::sync::{Arc, RwLock};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Settle delays. Clipboard and injected input are asynchronous relative to
/// this thread, so fixed waits are the only portable synchronization.
#[derive(Debug, Clone, Copy)]
pub struct Timings {
    /// After Ctrl+C, before re-reading the clipboard.
    pub copy_settle: Duration,
    /// After writing the translation, before Ctrl+V.
    pub paste_settle: Duration,
    /// After Ctrl+V, before restoring the original clipboard.
    pub restore_delay: Duration,
    /// Minimum spacing between streaming detail updates.
    pub partial_interval: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            copy_settle: Duration::from_millis(250),
            paste_settle: Duration::from_millis(50),
            restore_delay: Duration::from_millis(500),
            partial_interval: Duration::from_millis(80),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Clipboard was empty or unchanged after the copy.
    NothingSelected,
    /// The model answered with nothing; the clipboard was restored.
    EmptyTranslation,
    Pasted,
}

const TAIL_CHARS: usize = 80;

/// `"<n> chars: <last 80 chars>"`, newlines folded to spaces.
fn summarize_partial(text: &str) -> String {
    let count = text.chars().count();
    let tail: String = text.chars().skip(count.saturating_sub(TAIL_CHARS)).collect();
    format!("{} chars: {}", count, tail.replace('\n', " ").trim())
}

/// Forwards streaming progress at most once per `interval`.
struct PartialReporter<'a> {
    notifier: &'a Notifier,
    interval: Duration,
    last: Option<Instant>,
}

impl PartialReporter<'_> {
    fn report(&mut self, text: &str) {
        let now = Instant::now();
        if matches!(self.last, Some(last) if now.duration_since(last) < self.interval) {
            return;
        }
        self.last = Some(now);
        self.notifier.overlay_detail(summarize_partial(text));
    }
}

/// Ollama lists `llama3` as `llama3:latest`.
fn is_installed(installed: &BTreeSet<String>, model: &str) -> bool {
    installed.contains(model) || (!model.contains(':') && installed.contains(&format!("{}:latest", model)))
}

struct Inner {
    settings: RwLock<Arc<Settings>>,
    guard: SingleFlight,
    notifier: Notifier,
    clipboard: Box<dyn Clipboard>,
    keys: Box<dyn KeySender>,
    backend: Box<dyn Backend>,
    timings: Timings,
}

#[derive(Clone)]
pub struct Pipeline {
    inner: Arc<Inner>,
}

impl Pipeline {
    pub fn new(
        settings: Settings,
        notifier: Notifier,
        clipboard: Box<dyn Clipboard>,
        keys: Box<dyn KeySender>,
        backend: Box<dyn Backend>,
        timings: Timings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                settings: RwLock::new(Arc::new(settings)),
                guard: SingleFlight::new(),
                notifier,
                clipboard,
                keys,
                backend,
                timings,
            }),
        }
    }

    pub fn settings(&self) -> Arc<Settings> {
        let guard = self.inner.settings.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    /// Runs already in flight keep the snapshot they started with.
    pub fn set_settings(&self, settings: Settings) {
        let mut guard = self.inner.settings.write().unwrap_or_else(|e| e.into_inner());
        *guard = Arc::new(settings);
    }

    pub fn is_busy(&self) -> bool {
        self.inner.guard.is_busy()
    }

    pub fn notifier(&self) -> &Notifier {
        &self.inner.notifier
    }

    /// Hotkey entry point. Returns whether a run was started.
    pub fn on_hotkey(&self) -> bool {
        info!("Hotkey triggered");
        self.spawn_guarded("translate-flow", |p| {
            let _ = p.translate_and_report();
        })
    }

    /// Run `work` on the calling thread if the guard is free.
    pub fn try_run<T>(&self, name: &str, work: impl FnOnce(&Pipeline) -> T) -> Option<T> {
        let Some(_run) = self.inner.guard.try_acquire() else {
            warn!("{} ignored: another operation is in progress", name);
            return None;
        };
        Some(work(self))
    }

    fn spawn_guarded(&self, name: &str, work: impl FnOnce(&Pipeline) + Send + 'static) -> bool {
        let Some(run) = self.inner.guard.try_acquire() else {
            warn!("{} ignored: another operation is in progress", name);
            return false;
        };
        let this = self.clone();
        let spawned = thread::Builder::new().name(name.to_string()).spawn(move || {
            let _run = run;
            work(&this);
        });
        match spawned {
            Ok(_) => true,
            Err(e) => {
                error!("Failed to start {} thread: {}", name, e);
                self.inner.notifier.error(format!("Failed to start {}: {}", name, e));
                false
            }
        }
    }

    fn translate_and_report(&self) -> Result<Outcome> {
        let result = self.run_translate();
        match &result {
            Ok(outcome) => info!("Translate flow finished: {:?}", outcome),
            Err(e) => {
                error!("Translate flow failed: {:#}", e);
                self.inner.notifier.error(format!("{:#}", e));
            }
        }
        result
    }

    /// One capture/translate/deliver/restore cycle. Caller holds the guard.
    fn run_translate(&self) -> Result<Outcome> {
        let settings = self.settings();
        let timings = self.inner.timings;

        let original = self.remember_clipboard();
        self.inner.keys.simulate_copy();
        thread::sleep(timings.copy_settle);
        let selected = match self.inner.clipboard.read() {
            Ok(text) => text,
            Err(e) => {
                warn!("Clipboard unreadable after copy: {:#}", e);
                String::new()
            }
        };
        if selected.is_empty() || selected == original {
            info!("No new text copied; skipping translation");
            return Ok(Outcome::NothingSelected);
        }
        info!("Captured {} chars from selection", selected.chars().count());

        let request = TranslationRequest::new(selected, &settings);
        self.inner.notifier.busy_start();
        let translated = self.translate_with_retry(&settings, &request);
        self.inner.notifier.busy_end();
        let translated = translated?;

        if translated.is_empty() {
            info!("Translation came back empty; nothing to paste");
            self.restore_clipboard(&original);
            return Ok(Outcome::EmptyTranslation);
        }

        self.inner
            .clipboard
            .write(&translated)
            .context("Failed to put translation on the clipboard")?;
        thread::sleep(timings.paste_settle);
        self.inner.keys.simulate_paste();

        thread::sleep(timings.restore_delay);
        self.restore_clipboard(&original);
        Ok(Outcome::Pasted)
    }

    /// Best effort: an unreadable clipboard counts as empty.
    fn remember_clipboard(&self) -> String {
        self.inner.clipboard.read().unwrap_or_else(|e| {
            debug!("Original clipboard unreadable: {:#}", e);
            String::new()
        })
    }

    /// Best effort: failure is logged, never surfaced.
    fn restore_clipboard(&self, original: &str) {
        if let Err(e) = self.inner.clipboard.write(original) {
            warn!("Failed to restore clipboard: {:#}", e);
        }
    }

    fn translate_with_retry(&self, settings: &Settings, request: &TranslationRequest) -> Result<String> {
        let managed = settings.uses_model_registry();
        if managed {
            self.ensure_model(&settings.base_url, &settings.model)?;
        }

        let mut partials = PartialReporter {
            notifier: &self.inner.notifier,
            interval: self.inner.timings.partial_interval,
            last: None,
        };
        let first = self
            .inner
            .backend
            .translate(request, Some(&mut |t: &str| partials.report(t)));
        match first {
            Ok(text) => Ok(text),
            Err(e) if managed && e.is_model_not_found(&settings.model) => {
                warn!("{}; installing and retrying once", e);
                self.ensure_model(&settings.base_url, &settings.model)?;
                let retried = self
                    .inner
                    .backend
                    .translate(request, Some(&mut |t: &str| partials.report(t)));
                retried.context("Translation failed after installing the model")
            }
            Err(e) => Err(anyhow::Error::new(e).context("Translation failed")),
        }
    }

    /// Pull `model` unless the registry already has it. Caller holds the guard.
    fn ensure_model(&self, base_url: &str, model: &str) -> Result<()> {
        let installed = self
            .inner
            .backend
            .list_installed(base_url)
            .with_context(|| format!("Failed to list models at {}", base_url))?;
        if is_installed(&installed, model) {
            debug!("Model {} already installed", model);
            return Ok(());
        }
        info!("Model {} missing; pulling", model);
        self.pull_with_progress(base_url, model)
    }

    fn pull_with_progress(&self, base_url: &str, model: &str) -> Result<()> {
        let n = &self.inner.notifier;
        let start = format!("Downloading model: {}", model);
        n.overlay_message(&start);
        n.overlay_progress(None);
        n.download_progress(true, start, None);

        self.inner
            .backend
            .pull(base_url, model, &mut |status: &str, percent: Option<u8>| {
                n.overlay_message(status);
                n.overlay_progress(percent);
                n.download_progress(true, status, percent);
            })
            .with_context(|| format!("Failed to download model {}", model))?;

        n.overlay_progress(Some(100));
        n.download_progress(false, "Download complete", Some(100));
        Ok(())
    }

    /// Wraps a model action with busy events and failure reporting.
    fn model_action<T>(&self, action: impl FnOnce(&Pipeline) -> Result<T>, failure: &str) -> Result<T> {
        let n = &self.inner.notifier;
        n.busy_start();
        let result = action(self);
        if let Err(e) = &result {
            error!("{}: {:#}", failure, e);
            n.download_progress(false, format!("{}: {:#}", failure, e), None);
            n.error(format!("{:#}", e));
        }
        n.busy_end();
        result
    }

    fn download(&self, base_url: &str, model: &str) -> Result<()> {
        self.model_action(|p| p.pull_with_progress(base_url, model), "Download failed")
    }

    fn ensure_current_model(&self) -> Result<()> {
        let settings = self.settings();
        self.model_action(|p| p.ensure_model(&settings.base_url, &settings.model), "Download failed")
    }

    fn unload(&self) -> Result<Vec<String>> {
        let settings = self.settings();
        self.model_action(
            |p| {
                let n = &p.inner.notifier;
                let start = "Unloading models from memory...";
                n.overlay_message(start);
                n.overlay_progress(None);
                n.download_progress(true, start, None);
                let attempted = p
                    .inner
                    .backend
                    .unload_all_running(&settings.base_url)
                    .context("Failed to query running models")?;
                let done = if attempted.is_empty() { "No running models." } else { "Unloaded models." };
                n.overlay_message(done);
                n.download_progress(false, done, None);
                Ok(attempted)
            },
            "Unload failed",
        )
    }

    /// Always pulls, even if installed. Returns whether the action started.
    pub fn download_model_async(&self, base_url: &str, model: &str) -> bool {
        let (base_url, model) = (base_url.to_string(), model.to_string());
        self.spawn_guarded("model-download", move |p| {
            let _ = p.download(&base_url, &model);
        })
    }

    pub fn download_model_blocking(&self, base_url: &str, model: &str) -> Option<Result<()>> {
        self.try_run("model-download", |p| p.download(base_url, model))
    }

    /// Pull the configured model only if it is missing.
    pub fn ensure_model_async(&self) -> bool {
        self.spawn_guarded("model-ensure", |p| {
            let _ = p.ensure_current_model();
        })
    }

    /// No-op unless the active profile uses the model registry.
    pub fn unload_models_async(&self) -> bool {
        if !self.settings().uses_model_registry() {
            return false;
        }
        self.spawn_guarded("model-unload", |p| {
            let _ = p.unload();
        })
    }

    pub fn unload_models_blocking(&self) -> Option<Result<Vec<String>>> {
        if !self.settings().uses_model_registry() {
            debug!("Unload skipped: active profile has no model registry");
            return None;
        }
        self.try_run("model-unload", |p| p.unload())
    }

    pub fn list_installed_blocking(&self) -> Option<Result<BTreeSet<String>>> {
        let settings = self.settings();
        self.try_run("model-list", |p| {
            p.inner
                .backend
                .list_installed(&settings.base_url)
                .with_context(|| format!("Failed to list models at {}", settings.base_url))
        })
    }
}
