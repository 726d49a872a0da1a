//! p9wl entrypoint: wires the display-streaming pipeline, input dispatch,
//! keyboard translation, clipboard bridge and focus machine into a running
//! process driven by a `calloop` event loop.

use anyhow::{Context, Result, bail};
use calloop::generic::Generic;
use calloop::{EventLoop, Interest, Mode, PostAction};
use clap::Parser;
use core_clipboard::{SelectionOwner, SnarfFile};
use core_events::InputEvent;
use core_fb::FrameQueue;
use core_focus::FocusState;
use core_input::{InputRing, WindowBounds, run_keyboard_reader, run_mouse_reader, run_wctl_poller};
use core_keymap::KeyMap;
use core_scene::Arena;
use core_sender::{FrameSender, RemoteWindow, SendError, SenderConfig, WindowGeometry, run_sender_loop};
use core_wire::{Plan9Conn, WireError};
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;

/// CLI surface, deliberately thin: everything that shapes runtime behavior
/// lives in `p9wl.toml`, not here.
#[derive(Parser, Debug)]
#[command(name = "p9wl", version, about = "Plan 9 remote-display Wayland compositor")]
struct Args {
    /// Overrides discovery of `p9wl.toml`.
    #[arg(long = "config")]
    config: Option<PathBuf>,
    /// Path to the remote draw channel (a 9P-mounted draw image file).
    #[arg(long = "draw", default_value = "/mnt/wsys/draw/new")]
    draw: PathBuf,
    /// Path to `/dev/mouse` on the 9P mount.
    #[arg(long = "mouse", default_value = "/dev/mouse")]
    mouse: PathBuf,
    /// Path to `/dev/kbd` on the 9P mount.
    #[arg(long = "kbd", default_value = "/dev/kbd")]
    kbd: PathBuf,
    /// Path to `/dev/wctl` on the 9P mount.
    #[arg(long = "wctl", default_value = "/dev/wctl")]
    wctl: PathBuf,
    /// Path to `/dev/kbmap` on the 9P mount.
    #[arg(long = "kbmap", default_value = "/dev/kbmap")]
    kbmap: PathBuf,
    /// Path to `/dev/snarf` on the 9P mount.
    #[arg(long = "snarf", default_value = "/dev/snarf")]
    snarf: PathBuf,
    /// Seconds between forced full-frame refreshes (0 disables).
    #[arg(long = "full-frame-interval", default_value_t = 0)]
    full_frame_interval: u64,
}

struct AppStartup {
    log_guard: Option<WorkerGuard>,
}

impl AppStartup {
    fn new() -> Self {
        Self { log_guard: None }
    }

    fn configure_logging(&mut self, log_path: Option<&std::path::Path>) {
        let dir = log_path
            .and_then(|p| p.parent())
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| std::path::Path::new("."));
        let file_name = log_path
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "p9wl.log".to_string());

        let file_appender = tracing_appender::rolling::never(dir, file_name);
        let (nb_writer, guard) = tracing_appender::non_blocking(file_appender);
        if tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_writer(nb_writer)
            .try_init()
            .is_ok()
        {
            self.log_guard = Some(guard);
        }
        // Else a subscriber is already installed (test harness); `guard`
        // drops here and its writer thread shuts down cleanly.
    }

    fn install_panic_hook() {
        static HOOK: Once = Once::new();
        HOOK.call_once(|| {
            let default_panic = std::panic::take_hook();
            std::panic::set_hook(Box::new(move |info| {
                error!(target: "runtime.panic", %info, "panic");
                default_panic(info);
            }));
        });
    }
}

/// Plan 9 draw channel over an already-mounted special file. The 9P
/// walk/open/read/write/clunk primitives that make `draw` behave this way
/// are assumed; this type only needs batched writes and one blocking
/// response read per outstanding write.
struct FileDrawConn {
    file: File,
    iounit: u32,
    msize: u32,
}

impl Plan9Conn for FileDrawConn {
    fn iounit(&self) -> u32 {
        self.iounit
    }
    fn msize(&self) -> u32 {
        self.msize
    }
    fn write_batch(&mut self, bytes: &[u8]) -> Result<(), WireError> {
        self.file.write_all(bytes).map_err(WireError::Transport)
    }
    fn recv_response(&mut self) -> Result<(), WireError> {
        let mut ack = [0u8; 1];
        match self.file.read(&mut ack) {
            Ok(0) => Err(WireError::Transport(std::io::Error::from(
                std::io::ErrorKind::UnexpectedEof,
            ))),
            // The mount's draw-error convention: a single 'u' byte means the
            // remote rejected our window image id; anything else is a plain ack.
            Ok(_) if ack[0] == b'u' => Err(WireError::UnknownId),
            Ok(_) => Ok(()),
            Err(e) => Err(WireError::Transport(e)),
        }
    }
}

/// Window geometry as observed through `/dev/wctl`, shared between the
/// poller thread (writer) and the sender thread (reader, via
/// [`RemoteWindow::lookup`]).
struct WctlWindow {
    bounds: Arc<Mutex<WindowBounds>>,
    resize_pending: Arc<AtomicBool>,
    dst_id: u32,
    screen_id: u32,
}

impl RemoteWindow for WctlWindow {
    fn lookup(&mut self) -> Result<WindowGeometry, SendError> {
        let b = *self.bounds.lock().unwrap();
        Ok(WindowGeometry {
            dst_id: self.dst_id,
            screen_id: self.screen_id,
            x0: b.x0,
            y0: b.y0,
            x1: b.x1,
            y1: b.y1,
        })
    }
    fn resize_pending(&self) -> bool {
        self.resize_pending.load(Ordering::Acquire)
    }
}

/// `/dev/snarf`, reopened for each read or write as Plan 9's snarf file
/// expects -- never held open across a whole copy/paste session.
struct FileSnarf {
    path: PathBuf,
}

impl SnarfFile for FileSnarf {
    fn write_snarf(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        let mut f = OpenOptions::new().write(true).truncate(true).open(&self.path)?;
        f.write_all(bytes)
    }
    fn read_snarf(&mut self) -> std::io::Result<Vec<u8>> {
        let mut f = File::open(&self.path)?;
        let mut buf = Vec::with_capacity(core_clipboard::DEFAULT_SNARF_CAPACITY);
        f.take(core_clipboard::DEFAULT_SNARF_CAPACITY as u64)
            .read_to_end(&mut buf)?;
        Ok(buf)
    }
}

/// Reasserting selection ownership in the real Wayland data-device protocol
/// is out of scope; this bridges the trait to a trace line so the copy path
/// is otherwise complete and pluggable.
struct LoggingSelectionOwner;
impl SelectionOwner for LoggingSelectionOwner {
    fn reclaim(&mut self) -> Result<(), String> {
        debug!(target: "clipboard", "selection_ownership_reclaimed");
        Ok(())
    }
}

/// Minimal scene node, enough to exercise [`FocusState`] against real
/// [`core_scene::SceneHandle`]s. The Wayland scene graph itself is out of
/// scope (`core-scene`'s `SceneQuery` trait is the boundary a real one
/// would implement).
struct SceneNode {
    #[allow(dead_code)]
    is_toplevel: bool,
}

/// Owns everything the main loop's wake callback needs.
struct AppState {
    ring: Arc<InputRing>,
    keymap: KeyMap,
    focus: FocusState,
    scene: Arena<SceneNode>,
}

impl AppState {
    /// Drain the input ring and fold each event into focus/keymap state.
    /// There is no Wayland seat downstream of this (out of scope), so
    /// tracing the translated result is as far as the wiring goes.
    fn drain_input(&mut self) {
        for event in self.ring.drain() {
            match event {
                InputEvent::Mouse { x, y, buttons, scroll } => {
                    let held = !buttons.is_empty();
                    if held {
                        self.focus.button_pressed();
                    } else {
                        let _ = self.focus.button_released();
                    }
                    debug!(target: "input.mouse", x, y, ?buttons, ?scroll, "mouse_frame");
                }
                InputEvent::Key(key) => {
                    debug!(target: "input.kbd", token = ?key.token, pressed = key.pressed, mods = ?key.mods, "key_event");
                    if let core_events::KeyToken::Char(c) = key.token {
                        if let Some(entry) = self.keymap.lookup(c as u32) {
                            debug!(target: "keymap", rune = c as u32, keycode = entry.keycode, "rune_resolved");
                        }
                    }
                }
            }
        }
    }
}

fn open_setup_file(path: &std::path::Path, what: &str) -> Result<File> {
    File::open(path).with_context(|| format!("failed to open {what} at {}", path.display()))
}

fn main() -> Result<()> {
    let args = Args::parse();
    let mut startup = AppStartup::new();

    let config = core_config::load_from(args.config.clone())
        .context("failed to load configuration")?;
    startup.configure_logging(config.file.log.path.as_deref());
    AppStartup::install_panic_hook();

    info!(target: "runtime", "startup");

    let kbmap_file = open_setup_file(&args.kbmap, "kbmap")?;
    let keymap = KeyMap::load(kbmap_file).context("failed to parse kbmap")?;
    info!(target: "keymap", entries = keymap.len(), "keymap_loaded");

    let draw_file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(&args.draw)
        .with_context(|| format!("failed to open draw channel at {}", args.draw.display()))?;

    let mut wctl_file = open_setup_file(&args.wctl, "wctl")?;
    let mut baseline_text = String::new();
    wctl_file
        .read_to_string(&mut baseline_text)
        .context("failed to read initial window bounds")?;
    let baseline = core_input::parse_wctl_frame(baseline_text.trim())
        .context("malformed initial /dev/wctl response")?;

    let bounds = Arc::new(Mutex::new(baseline));
    let resize_pending = Arc::new(AtomicBool::new(false));
    let window_changed = Arc::new(AtomicBool::new(false));

    let queue = Arc::new(FrameQueue::new(
        (baseline.x1 - baseline.x0).max(0) as u32,
        (baseline.y1 - baseline.y0).max(0) as u32,
    ));

    let sender_config = SenderConfig {
        max_shift: config.file.scroll.max_shift,
        scratch_bound: 4096,
        max_depth: config.file.pipeline.max_depth,
        unknown_id_retry_threshold: 3,
    };
    let conn = FileDrawConn {
        file: draw_file,
        // Real negotiation happens over the mount's ctl file (out of
        // scope); these match the values `p9wl.toml` assumes until then.
        iounit: 65536,
        msize: 65536 + 24,
    };
    let window = WctlWindow {
        bounds: bounds.clone(),
        resize_pending: resize_pending.clone(),
        dst_id: 1,
        screen_id: 1,
    };
    let mut sender = FrameSender::new(conn, window, sender_config);

    let shutdown = Arc::new(AtomicBool::new(false));

    let sender_queue = queue.clone();
    let sender_window_changed = window_changed.clone();
    let sender_shutdown = shutdown.clone();
    let sender_thread = std::thread::Builder::new()
        .name("p9wl-sender".into())
        .spawn(move || {
            run_sender_loop(&mut sender, &sender_queue, &sender_window_changed, || {
                !sender_shutdown.load(Ordering::Acquire)
            });
        })
        .context("failed to spawn sender thread")?;

    let ring = Arc::new(InputRing::new().context("failed to create input ring self-pipe")?);

    let mouse_file = open_setup_file(&args.mouse, "mouse")?;
    let mouse_ring = ring.clone();
    let mouse_thread = std::thread::Builder::new()
        .name("p9wl-mouse".into())
        .spawn(move || {
            if let Err(e) = run_mouse_reader(mouse_file, &mouse_ring) {
                warn!(target: "input.mouse", error = %e, "mouse_reader_exited");
            }
        })
        .context("failed to spawn mouse reader thread")?;

    let kbd_file = open_setup_file(&args.kbd, "kbd")?;
    let kbd_ring = ring.clone();
    let kbd_thread = std::thread::Builder::new()
        .name("p9wl-kbd".into())
        .spawn(move || {
            if let Err(e) = run_keyboard_reader(kbd_file, &kbd_ring) {
                warn!(target: "input.kbd", error = %e, "keyboard_reader_exited");
            }
        })
        .context("failed to spawn keyboard reader thread")?;

    let wctl_path = args.wctl.clone();
    let wctl_bounds = bounds.clone();
    let wctl_window_changed = window_changed.clone();
    let wctl_shutdown = shutdown.clone();
    let wctl_thread = std::thread::Builder::new()
        .name("p9wl-wctl".into())
        .spawn(move || {
            run_wctl_poller(
                move || {
                    let mut f = File::open(&wctl_path)?;
                    let mut text = String::new();
                    f.read_to_string(&mut text)?;
                    Ok(text)
                },
                move |new_bounds| {
                    *wctl_bounds.lock().unwrap() = new_bounds;
                    wctl_window_changed.store(true, Ordering::Release);
                },
                move || !wctl_shutdown.load(Ordering::Acquire),
            );
        })
        .context("failed to spawn wctl poller thread")?;

    // The compositor's render/commit path -- the thing that would call
    // `queue.publish(&live_framebuffer)` on every commit -- sits on the
    // other side of the Wayland scene graph and is out of scope. `queue`
    // is kept alive here so the sender thread above has a producer-shaped
    // handle ready for that caller to drive.
    let _ = &queue;
    let _snarf = FileSnarf { path: args.snarf.clone() };
    let _owner = LoggingSelectionOwner;

    let mut app = AppState {
        ring: ring.clone(),
        keymap,
        focus: FocusState::new(),
        scene: Arena::new(),
    };
    let _ = app.scene.insert(SceneNode { is_toplevel: true });

    let mut event_loop: EventLoop<AppState> =
        EventLoop::try_new().context("failed to create calloop event loop")?;
    let wake_fd = ring
        .wake_fd_dup()
        .context("failed to dup input ring wake fd")?;
    event_loop
        .handle()
        .insert_source(Generic::new(wake_fd, Interest::READ, Mode::Level), |_, _, app| {
            app.drain_input();
            Ok(PostAction::Continue)
        })
        .map_err(|e| anyhow::anyhow!("failed to register input wake source: {e}"))?;

    if args.full_frame_interval > 0 {
        let period = Duration::from_secs(args.full_frame_interval);
        event_loop
            .handle()
            .insert_source(calloop::timer::Timer::from_duration(period), move |_, _, _app| {
                debug!(target: "runtime", "full_frame_interval_tick");
                calloop::timer::TimeoutAction::ToDuration(period)
            })
            .map_err(|e| anyhow::anyhow!("failed to register full-frame timer: {e}"))?;
    }

    info!(target: "runtime", "entering_event_loop");
    loop {
        if shutdown.load(Ordering::Acquire) {
            break;
        }
        event_loop
            .dispatch(Some(Duration::from_millis(200)), &mut app)
            .context("event loop dispatch failed")?;
    }

    shutdown.store(true, Ordering::Release);
    let _ = sender_thread.join();
    let _ = mouse_thread.join();
    let _ = kbd_thread.join();
    let _ = wctl_thread.join();

    if app.scene.iter().next().is_none() {
        bail!("no surfaces ever mapped");
    }
    Ok(())
}
