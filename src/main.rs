#![cfg_attr(target_os = "windows", windows_subsystem = "windows")]

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::{Receiver, Sender};
use std::thread;
use tracing::{debug, error, info, warn};

use gpttrans::cli::{self, Command};
use gpttrans::config::Settings;
use gpttrans::engine::Engine;
use gpttrans::events::{self, Event};
use gpttrans::hotkey::{self, BindingState};
use gpttrans::pipeline::{Pipeline, Timings};
use gpttrans::{backend, input, keys, logger, tray};

fn toast(title: &str, body: &str) {
    #[cfg(windows)]
    {
        let _ = winrt_notification::Toast::new("GPTTrans")
            .title(title)
            .text1(body)
            .show();
    }
    #[cfg(not(windows))]
    {
        let _ = (title, body);
    }
}

/// GUI-subsystem builds have no console; borrow the parent's so one-shot
/// commands can print.
fn attach_parent_console() {
    #[cfg(windows)]
    unsafe {
        use windows::Win32::System::Console::{AttachConsole, ATTACH_PARENT_PROCESS};
        let _ = AttachConsole(ATTACH_PARENT_PROCESS);
    }
}

/// Sends one `()` on `quit` at Ctrl+C. Does nothing if the signal handler
/// can't be set up.
fn forward_ctrl_c(quit: Sender<()>) {
    let rt = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            warn!("No Ctrl+C handler: {}", e);
            return;
        }
    };
    let spawned = thread::Builder::new().name("ctrl-c".into()).spawn(move || {
        if rt.block_on(tokio::signal::ctrl_c()).is_ok() {
            info!("Ctrl+C received");
            let _ = quit.send(());
        }
    });
    if let Err(e) = spawned {
        warn!("No Ctrl+C handler: {}", e);
    }
}

fn log_event(event: &Event) {
    match event {
        Event::Error(message) => {
            error!("{}", message);
            toast("GPTTrans", message);
        }
        Event::BusyStart => debug!("Busy"),
        Event::BusyEnd => debug!("Idle"),
        Event::OverlayMessage(message) => info!("{}", message),
        Event::OverlayProgress(percent) => debug!("Progress: {:?}", percent),
        Event::OverlayDetail(detail) => debug!("Streaming: {}", detail),
        Event::DownloadProgress { in_progress: true, status, percent } => debug!("{} ({:?})", status, percent),
        Event::DownloadProgress { status, .. } => info!("{}", status),
    }
}

/// Console rendering of model action progress for one-shot commands.
fn print_events(events: Receiver<Event>) {
    for event in events {
        debug!("{:?}", event);
        match event {
            Event::DownloadProgress { status, percent: Some(p), .. } => println!("{} {}%", status, p),
            Event::DownloadProgress { status, percent: None, .. } => println!("{}", status),
            Event::Error(message) => eprintln!("Error: {}", message),
            _ => {}
        }
    }
}

fn run_hotkey(pipeline: Pipeline, events: Receiver<Event>) -> Result<()> {
    let mut engine = Engine::new(pipeline, hotkey::system_source());
    engine.register();
    let hotkey = keys::parse(&engine.pipeline().settings().hotkey);
    if engine.binding_state() == BindingState::Active {
        toast("GPTTrans", &format!("Ready. Select text and press {} to translate.", hotkey));
    }
    if engine.pipeline().settings().uses_model_registry() {
        engine.pipeline().ensure_model_async();
    }

    let (quit_tx, quit_rx) = crossbeam_channel::bounded(1);
    forward_ctrl_c(quit_tx.clone());
    tray::spawn(format!("GPTTrans ({})", hotkey), quit_tx);
    engine.run_until_quit(&events, &quit_rx, log_event);
    Ok(())
}

/// Runs a one-shot command while a printer thread renders its events.
fn one_shot<T>(pipeline: Pipeline, events: Receiver<Event>, work: impl FnOnce(&Pipeline) -> T) -> T {
    let printer = thread::spawn(move || print_events(events));
    let out = work(&pipeline);
    // Last notifier goes with the pipeline, which ends the printer.
    drop(pipeline);
    let _ = printer.join();
    out
}

fn run(args: cli::Args) -> Result<()> {
    let path = args.config.clone().unwrap_or_else(Settings::default_path);
    let settings = Settings::load(&path).with_env_overrides();
    settings.validate().context("Invalid settings")?;
    if args.save_defaults {
        settings.save(&path)?;
        info!("Saved settings to {}", path.display());
    }
    info!(
        "Profile {} | model {} at {} | {} -> {} | hotkey {}",
        settings.active_profile,
        settings.model,
        settings.base_url,
        settings.source_lang,
        settings.target_lang,
        settings.hotkey
    );

    let (notifier, events) = events::channel();
    let backend = backend::HttpBackend::new()?;
    let pipeline = Pipeline::new(
        settings,
        notifier,
        Box::new(input::SystemClipboard),
        Box::new(input::SystemKeys::default()),
        Box::new(backend),
        Timings::default(),
    );

    match args.command() {
        Command::Run => run_hotkey(pipeline, events),
        Command::Models => {
            let models = one_shot(pipeline, events, |p| p.list_installed_blocking())
                .context("Another operation is in progress")??;
            for model in models {
                println!("{}", model);
            }
            Ok(())
        }
        Command::Pull { model } => {
            let settings = pipeline.settings();
            let model = model.unwrap_or_else(|| settings.model.clone());
            one_shot(pipeline, events, |p| p.download_model_blocking(&settings.base_url, &model))
                .context("Another operation is in progress")?
        }
        Command::Unload => {
            let profile = pipeline.settings().active_profile.clone();
            match one_shot(pipeline, events, |p| p.unload_models_blocking()) {
                Some(result) => {
                    for model in result? {
                        println!("{}", model);
                    }
                }
                None => println!("Profile {} has no model registry; nothing to unload.", profile),
            }
            Ok(())
        }
    }
}

fn main() {
    let args = cli::Args::parse();
    if args.command() != Command::Run {
        attach_parent_console();
    }
    logger::init(args.verbosity);

    if let Err(e) = run(args) {
        error!("Fatal: {:#}", e);
        toast("GPTTrans", &format!("Error: {:#}", e));
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
