//! Binds the configured hotkey to the pipeline and keeps the two in sync
//! across settings changes.

use crate::config::Settings;
use crate::events::Event;
use crate::hotkey::{BindingState, ErrorFn, HotkeySource, TriggerFn};
use crate::keys;
use crate::pipeline::Pipeline;
use anyhow::Result;
use crossbeam_channel::Receiver;
use std::sync::Arc;
use tracing::{info, warn};

pub struct Engine {
    pipeline: Pipeline,
    hotkeys: Box<dyn HotkeySource>,
}

impl Engine {
    pub fn new(pipeline: Pipeline, hotkeys: Box<dyn HotkeySource>) -> Self {
        Self { pipeline, hotkeys }
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn binding_state(&self) -> BindingState {
        self.hotkeys.state()
    }

    /// (Re)binds the hotkey from the current settings. An unparseable hotkey
    /// leaves nothing bound and is reported as an error event.
    pub fn register(&mut self) -> BindingState {
        let settings = self.pipeline.settings();
        let spec = keys::parse(&settings.hotkey);
        if !spec.is_valid() {
            let message = format!("Could not parse hotkey '{}': no main key found.", settings.hotkey);
            warn!("{}", message);
            self.hotkeys.unregister();
            self.pipeline.notifier().error(message);
            return self.hotkeys.state();
        }

        let pipeline = self.pipeline.clone();
        let on_trigger: TriggerFn = Arc::new(move || {
            pipeline.on_hotkey();
        });
        let notifier = self.pipeline.notifier().clone();
        let on_error: ErrorFn = Arc::new(move |message| notifier.error(message));

        let state = self.hotkeys.register(spec, on_trigger, on_error);
        info!("Hotkey {} is {:?}", spec, state);
        state
    }

    pub fn unregister(&mut self) {
        self.hotkeys.unregister();
    }

    /// Swap in a new settings snapshot and rebind. Invalid settings are
    /// rejected and the old snapshot stays in effect.
    pub fn update_settings(&mut self, settings: Settings) -> Result<BindingState> {
        settings.validate()?;
        info!(
            "Settings updated: profile={} model={} hotkey={}",
            settings.active_profile, settings.model, settings.hotkey
        );
        self.pipeline.set_settings(settings);
        Ok(self.register())
    }

    /// Hand every event to `on_event` until `quit` fires or the event
    /// channel closes, then shut down. A quit channel whose senders are all
    /// gone is ignored rather than treated as a request to quit.
    pub fn run_until_quit(&mut self, events: &Receiver<Event>, quit: &Receiver<()>, mut on_event: impl FnMut(&Event)) {
        let mut quit = quit.clone();
        loop {
            crossbeam_channel::select! {
                recv(events) -> event => match event {
                    Ok(event) => on_event(&event),
                    Err(_) => {
                        info!("Event channel closed");
                        break;
                    }
                },
                recv(quit) -> signal => match signal {
                    Ok(()) => {
                        info!("Quit requested");
                        break;
                    }
                    Err(_) => quit = crossbeam_channel::never(),
                },
            }
        }
        self.shutdown();
    }

    /// Best-effort unload of registry models, then release the hotkey.
    pub fn shutdown(&mut self) {
        info!("Shutting down");
        match self.pipeline.unload_models_blocking() {
            Some(Err(e)) => warn!("Unload on shutdown failed: {:#}", e),
            Some(Ok(models)) => info!("Unloaded {} model(s) on shutdown", models.len()),
            None => {}
        }
        self.unregister();
    }
}
