//! Notification-area icon. Its only menu entry is Quit, which is the exit
//! path for GUI-subsystem builds that have no console to Ctrl+C.

use crossbeam_channel::Sender;

#[cfg(windows)]
mod win_tray {
    use crossbeam_channel::{Receiver, Sender};
    use std::thread;
    use std::time::Duration;
    use tracing::{error, info};
    use tray_icon::menu::{Menu, MenuEvent, MenuItem};
    use tray_icon::{Icon, TrayIcon, TrayIconBuilder};
    use windows::Win32::Foundation::HWND;
    use windows::Win32::UI::WindowsAndMessaging as wm;

    const PUMP_INTERVAL: Duration = Duration::from_millis(25);

    struct TrayHandle {
        #[allow(dead_code)]
        tray: TrayIcon,
        menu_events: Receiver<MenuEvent>,
        quit_item: MenuItem,
        quit: Sender<()>,
    }

    fn dot_icon() -> anyhow::Result<Icon> {
        let (w, h) = (16usize, 16usize);
        let rgba: Vec<u8> = std::iter::repeat([0x14, 0xB8, 0xA6, 0xFF]).take(w * h).flatten().collect();
        Ok(Icon::from_rgba(rgba, w as u32, h as u32)?)
    }

    impl TrayHandle {
        fn new(tooltip: &str, quit: Sender<()>) -> anyhow::Result<Self> {
            let menu = Menu::new();
            let quit_item = MenuItem::new("Quit", true, None);
            menu.append_items(&[&quit_item])?;
            let tray = TrayIconBuilder::new()
                .with_tooltip(tooltip)
                .with_menu(Box::new(menu))
                .with_icon(dot_icon()?)
                .build()?;
            Ok(Self {
                tray,
                menu_events: MenuEvent::receiver().clone(),
                quit_item,
                quit,
            })
        }

        /// Returns false once Quit was chosen.
        fn pump(&self) -> bool {
            while let Ok(event) = self.menu_events.try_recv() {
                if event.id == *self.quit_item.id() {
                    info!("Tray: Quit clicked");
                    let _ = self.quit.send(());
                    return false;
                }
            }
            true
        }
    }

    pub fn spawn(tooltip: String, quit: Sender<()>) {
        let spawned = thread::Builder::new().name("tray".into()).spawn(move || {
            // The icon must live and be pumped on the thread that created it.
            let tray = match TrayHandle::new(&tooltip, quit) {
                Ok(tray) => tray,
                Err(e) => {
                    error!("Tray failed: {:#}", e);
                    return;
                }
            };
            info!("Tray created");
            loop {
                unsafe {
                    let mut msg = wm::MSG::default();
                    while wm::PeekMessageW(&mut msg, HWND(std::ptr::null_mut()), 0, 0, wm::PM_REMOVE).into() {
                        let _ = wm::TranslateMessage(&msg);
                        wm::DispatchMessageW(&msg);
                    }
                }
                if !tray.pump() {
                    break;
                }
                thread::sleep(PUMP_INTERVAL);
            }
        });
        if let Err(e) = spawned {
            error!("Failed to start tray thread: {}", e);
        }
    }
}

/// Show the tray icon; choosing Quit sends one `()` on `quit`.
pub fn spawn(tooltip: String, quit: Sender<()>) {
    #[cfg(windows)]
    win_tray::spawn(tooltip, quit);
    #[cfg(not(windows))]
    {
        let _ = (tooltip, quit);
    }
}
