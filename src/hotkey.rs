//! System-wide hotkey binding with a dedicated message-loop thread.

use crate::keys::{HotkeySpec, Modifiers, PhysicalKey};
use std::sync::Arc;
use std::time::Duration;

pub type TriggerFn = Arc<dyn Fn() + Send + Sync>;
pub type ErrorFn = Arc<dyn Fn(String) + Send + Sync>;

/// How long `register` waits for the bind attempt, and `unregister` for the
/// loop thread to exit.
pub const THREAD_WAIT: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingState {
    Unregistered,
    /// The loop thread was started but has not confirmed the bind in time.
    Registering,
    Active,
}

pub trait HotkeySource: Send {
    /// Drops any existing binding, then binds `spec`. Bind failures go to
    /// `on_error`; `on_trigger` runs on the source's own thread.
    fn register(&mut self, spec: HotkeySpec, on_trigger: TriggerFn, on_error: ErrorFn) -> BindingState;
    /// Idempotent. Waits at most `THREAD_WAIT` for the loop thread.
    fn unregister(&mut self);
    fn state(&self) -> BindingState;
}

/// Windows virtual-key code for a physical key.
pub fn virtual_key_code(key: PhysicalKey) -> u32 {
    match key {
        PhysicalKey::Letter(c) => c as u32,
        PhysicalKey::Digit(d) => 0x30 + d as u32,
        PhysicalKey::F(n) => 0x70 + (n as u32 - 1),
        PhysicalKey::Space => 0x20,
        PhysicalKey::Enter => 0x0D,
        PhysicalKey::Tab => 0x09,
        PhysicalKey::Escape => 0x1B,
    }
}

/// `MOD_*` flags for `RegisterHotKey`, without `MOD_NOREPEAT`.
pub fn modifier_flags(m: Modifiers) -> u32 {
    let mut flags = 0;
    if m.contains(Modifiers::ALT) {
        flags |= 0x0001;
    }
    if m.contains(Modifiers::CTRL) {
        flags |= 0x0002;
    }
    if m.contains(Modifiers::SHIFT) {
        flags |= 0x0004;
    }
    if m.contains(Modifiers::META) {
        flags |= 0x0008;
    }
    flags
}

#[cfg(windows)]
mod win_hotkey {
    use super::{modifier_flags, virtual_key_code, BindingState, ErrorFn, HotkeySource, TriggerFn, THREAD_WAIT};
    use crate::keys::HotkeySpec;
    use crossbeam_channel::{Receiver, RecvTimeoutError};
    use std::thread::{self, JoinHandle};
    use std::time::Instant;
    use tracing::{debug, error, info, warn};
    use windows::Win32::Foundation::{HWND, LPARAM, WPARAM};
    use windows::Win32::System::Threading::GetCurrentThreadId;
    use windows::Win32::UI::Input::KeyboardAndMouse as km;
    use windows::Win32::UI::WindowsAndMessaging as wm;

    const HOTKEY_ID: i32 = 1;

    enum LoopMsg {
        Started(u32),
        Bound,
        Failed,
        Exited,
    }

    struct Worker {
        thread_id: Option<u32>,
        events: Receiver<LoopMsg>,
        handle: JoinHandle<()>,
    }

    pub struct WinHotkeySource {
        worker: Option<Worker>,
        state: BindingState,
    }

    impl WinHotkeySource {
        pub fn new() -> Self {
            Self { worker: None, state: BindingState::Unregistered }
        }
    }

    fn run_loop(spec: HotkeySpec, on_trigger: TriggerFn, on_error: ErrorFn, tx: crossbeam_channel::Sender<LoopMsg>) {
        unsafe {
            let mut msg = wm::MSG::default();
            // Make sure the thread has a message queue before anyone posts to it.
            let _ = wm::PeekMessageW(&mut msg, HWND(std::ptr::null_mut()), 0, 0, wm::PM_NOREMOVE);
            let tid = GetCurrentThreadId();
            let _ = tx.send(LoopMsg::Started(tid));

            let Some(key) = spec.key else {
                let _ = tx.send(LoopMsg::Failed);
                return;
            };
            let modifiers = km::HOT_KEY_MODIFIERS(modifier_flags(spec.modifiers)) | km::MOD_NOREPEAT;
            info!("Hotkey thread started (tid={}). Registering {} ...", tid, spec);
            if let Err(e) = km::RegisterHotKey(HWND(std::ptr::null_mut()), HOTKEY_ID, modifiers, virtual_key_code(key)) {
                let message = format!("RegisterHotKey {} failed ({}). Hotkey may be in use.", spec, e);
                error!("{}", message);
                on_error(message);
                let _ = tx.send(LoopMsg::Failed);
                let _ = tx.send(LoopMsg::Exited);
                return;
            }
            info!("RegisterHotKey {} OK. Entering message loop.", spec);
            let _ = tx.send(LoopMsg::Bound);

            loop {
                let got = wm::GetMessageW(&mut msg, HWND(std::ptr::null_mut()), 0, 0);
                if got.0 <= 0 {
                    info!("Hotkey message loop exiting (GetMessageW returned {})", got.0);
                    break;
                }
                if msg.message == wm::WM_HOTKEY && msg.wParam.0 == HOTKEY_ID as usize {
                    debug!("WM_HOTKEY received ({})", spec);
                    on_trigger();
                }
            }
            let _ = km::UnregisterHotKey(HWND(std::ptr::null_mut()), HOTKEY_ID);
            info!("UnregisterHotKey {}", spec);
            let _ = tx.send(LoopMsg::Exited);
        }
    }

    impl HotkeySource for WinHotkeySource {
        fn register(&mut self, spec: HotkeySpec, on_trigger: TriggerFn, on_error: ErrorFn) -> BindingState {
            self.unregister();
            if !spec.is_valid() {
                on_error(format!("Refusing to register hotkey {} without a main key", spec));
                return self.state;
            }

            let (tx, rx) = crossbeam_channel::unbounded();
            let loop_error = on_error.clone();
            let spawned = thread::Builder::new()
                .name("hotkey-loop".into())
                .spawn(move || run_loop(spec, on_trigger, loop_error, tx));
            let handle = match spawned {
                Ok(handle) => handle,
                Err(e) => {
                    on_error(format!("Failed to start hotkey thread: {}", e));
                    return self.state;
                }
            };

            let mut worker = Worker { thread_id: None, events: rx, handle };
            let deadline = Instant::now() + THREAD_WAIT;
            self.state = BindingState::Registering;
            loop {
                match worker.events.recv_deadline(deadline) {
                    Ok(LoopMsg::Started(tid)) => worker.thread_id = Some(tid),
                    Ok(LoopMsg::Bound) => {
                        self.state = BindingState::Active;
                        break;
                    }
                    Ok(LoopMsg::Failed) | Ok(LoopMsg::Exited) | Err(RecvTimeoutError::Disconnected) => {
                        let _ = worker.handle.join();
                        self.state = BindingState::Unregistered;
                        return self.state;
                    }
                    Err(RecvTimeoutError::Timeout) => {
                        warn!("Hotkey bind not confirmed within {:?}", THREAD_WAIT);
                        break;
                    }
                }
            }
            self.worker = Some(worker);
            self.state
        }

        fn unregister(&mut self) {
            let Some(worker) = self.worker.take() else {
                self.state = BindingState::Unregistered;
                return;
            };
            if let Some(tid) = worker.thread_id {
                debug!("Posting WM_QUIT to hotkey thread (tid={})", tid);
                unsafe {
                    if let Err(e) = wm::PostThreadMessageW(tid, wm::WM_QUIT, WPARAM(0), LPARAM(0)) {
                        warn!("PostThreadMessageW failed: {}", e);
                    }
                }
            }
            let deadline = Instant::now() + THREAD_WAIT;
            let exited = loop {
                match worker.events.recv_deadline(deadline) {
                    Ok(LoopMsg::Exited) | Err(RecvTimeoutError::Disconnected) => break true,
                    Ok(_) => continue,
                    Err(RecvTimeoutError::Timeout) => break false,
                }
            };
            if exited {
                let _ = worker.handle.join();
            } else {
                warn!("Hotkey thread did not exit within {:?}; detaching it", THREAD_WAIT);
            }
            self.state = BindingState::Unregistered;
        }

        fn state(&self) -> BindingState {
            self.state
        }
    }

    impl Drop for WinHotkeySource {
        fn drop(&mut self) {
            self.unregister();
        }
    }
}

#[cfg(windows)]
pub use win_hotkey::WinHotkeySource;

/// Stand-in for platforms without a global hotkey implementation.
#[cfg(not(windows))]
pub struct UnsupportedHotkeySource;

#[cfg(not(windows))]
impl HotkeySource for UnsupportedHotkeySource {
    fn register(&mut self, spec: HotkeySpec, _on_trigger: TriggerFn, on_error: ErrorFn) -> BindingState {
        on_error(format!("Cannot register {}: global hotkeys are only supported on Windows", spec));
        BindingState::Unregistered
    }

    fn unregister(&mut self) {}

    fn state(&self) -> BindingState {
        BindingState::Unregistered
    }
}

pub fn system_source() -> Box<dyn HotkeySource> {
    #[cfg(windows)]
    {
        Box::new(WinHotkeySource::new())
    }
    #[cfg(not(windows))]
    {
        Box::new(UnsupportedHotkeySource)
    }
}
