//! ZX Spectrum emulator binary.
//!
//! Positional file arguments dispatch on extension: `.tap`/`.tzx` insert a
//! tape, `.sna` loads a snapshot, `.trd`/`.scl` mount disks. Runs with a
//! winit window and a pixels framebuffer at 50 Hz, with cpal pulling the
//! mixed audio, or headless with `--headless --frames N`.
//!
//! Hotkeys: F6 rewind tape, F7 tape play/pause, F8 print disk catalogs,
//! F9 toggle TR-DOS paging, F12 CPU reset, Esc quit.

#![allow(clippy::cast_possible_truncation)]

use std::path::{Path, PathBuf};
use std::process;
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use emu_zx::audio::SampleQueue;
use emu_zx::{Spectrum, SpectrumConfig, SpectrumModel};
use format_sna::SnaSnapshot;
use format_spectrum_tap::TapFile;
use format_tzx::TzxFile;
use pixels::{Pixels, SurfaceTexture};
use winit::application::ApplicationHandler;
use winit::event::{ElementState, WindowEvent};
use winit::event_loop::{ActiveEventLoop, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Window, WindowAttributes, WindowId};

/// Framebuffer dimensions.
const FB_WIDTH: u32 = 320;
const FB_HEIGHT: u32 = 288;

/// Window scale factor.
const SCALE: u32 = 3;

/// Frame period for 50 Hz PAL.
const FRAME_DURATION: Duration = Duration::from_micros(20_000);

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

struct CliArgs {
    files: Vec<PathBuf>,
    rom_path: Option<PathBuf>,
    trdos_rom_path: Option<PathBuf>,
    model_128k: bool,
    disks_read_only: bool,
    drive_count: usize,
    headless: bool,
    frames: u32,
}

fn parse_args() -> CliArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut cli = CliArgs {
        files: Vec::new(),
        rom_path: None,
        trdos_rom_path: None,
        model_128k: false,
        disks_read_only: false,
        drive_count: 2,
        headless: false,
        frames: 200,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--rom" => {
                i += 1;
                cli.rom_path = args.get(i).map(PathBuf::from);
            }
            "--trdos-rom" => {
                i += 1;
                cli.trdos_rom_path = args.get(i).map(PathBuf::from);
            }
            "--128k" => cli.model_128k = true,
            "--ro" => cli.disks_read_only = true,
            "--drive-count" => {
                i += 1;
                if let Some(s) = args.get(i) {
                    match s.parse::<usize>() {
                        Ok(n) if (1..=4).contains(&n) => cli.drive_count = n,
                        _ => {
                            eprintln!("--drive-count must be 1..4");
                            process::exit(1);
                        }
                    }
                }
            }
            "--headless" => cli.headless = true,
            "--frames" => {
                i += 1;
                if let Some(s) = args.get(i) {
                    cli.frames = s.parse().unwrap_or(200);
                }
            }
            "--help" | "-h" => {
                eprintln!("Usage: emu-zx [OPTIONS] [FILES...]");
                eprintln!();
                eprintln!("Files dispatch by extension:");
                eprintln!("  .tap .tzx   insert into the tape deck");
                eprintln!("  .sna        load a 48K snapshot");
                eprintln!("  .trd .scl   mount a TR-DOS disk");
                eprintln!();
                eprintln!("Options:");
                eprintln!("  --rom <file>         Machine ROM (default roms/48.rom or roms/128.rom)");
                eprintln!("  --trdos-rom <file>   Beta Disk Interface ROM (enables TR-DOS)");
                eprintln!("  --128k               Select the 128K model");
                eprintln!("  --ro                 Mount disks read-only");
                eprintln!("  --drive-count <n>    Drive slots, 1-4 [default: 2]");
                eprintln!("  --headless           Run without a window or audio device");
                eprintln!("  --frames <n>         Frames to run in headless mode [default: 200]");
                process::exit(0);
            }
            other if other.starts_with('-') => {
                eprintln!("Unknown argument: {other}");
                process::exit(1);
            }
            file => cli.files.push(PathBuf::from(file)),
        }
        i += 1;
    }

    cli
}

fn read_file_or_exit(path: &Path, what: &str) -> Vec<u8> {
    match std::fs::read(path) {
        Ok(data) => data,
        Err(e) => {
            eprintln!("Failed to read {what} {}: {e}", path.display());
            process::exit(1);
        }
    }
}

// ---------------------------------------------------------------------------
// Machine construction
// ---------------------------------------------------------------------------

/// Disk images that came from files and must flush back on exit.
struct MountedDisk {
    drive: usize,
    path: PathBuf,
}

fn make_spectrum(cli: &CliArgs) -> (Spectrum, Vec<MountedDisk>) {
    let model = if cli.model_128k {
        SpectrumModel::Spectrum128K
    } else {
        SpectrumModel::Spectrum48K
    };

    let rom_path = cli.rom_path.clone().unwrap_or_else(|| {
        PathBuf::from(if cli.model_128k {
            "roms/128.rom"
        } else {
            "roms/48.rom"
        })
    });
    let rom = read_file_or_exit(&rom_path, "ROM");
    let expected = if cli.model_128k { 0x8000 } else { 0x4000 };
    if rom.len() != expected {
        eprintln!(
            "ROM {} is {} bytes, expected {expected}",
            rom_path.display(),
            rom.len()
        );
        process::exit(1);
    }

    let trdos_rom = cli.trdos_rom_path.as_ref().map(|path| {
        let rom = read_file_or_exit(path, "TR-DOS ROM");
        if rom.len() != 0x4000 {
            eprintln!(
                "TR-DOS ROM {} is {} bytes, expected 16384",
                path.display(),
                rom.len()
            );
            process::exit(1);
        }
        rom
    });

    let config = SpectrumConfig {
        model,
        rom,
        trdos_rom,
        drive_count: cli.drive_count,
        disks_read_only: cli.disks_read_only,
    };
    let mut spectrum = Spectrum::new(&config);
    let mut mounted = Vec::new();
    let mut next_drive = 0usize;

    for path in &cli.files {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        let data = read_file_or_exit(path, "file");

        match ext.as_str() {
            "tap" => match TapFile::parse(&data) {
                Ok(tap) => {
                    eprintln!("Tape: {} ({} blocks)", path.display(), tap.blocks.len());
                    spectrum.insert_tap(&tap);
                    spectrum.tape_play();
                }
                Err(e) => {
                    eprintln!("Failed to parse TAP {}: {e}", path.display());
                    process::exit(1);
                }
            },
            "tzx" => match TzxFile::parse(&data) {
                Ok(tzx) => {
                    eprintln!("Tape: {} ({} blocks)", path.display(), tzx.blocks.len());
                    spectrum.insert_tzx(tzx);
                    spectrum.tape_play();
                }
                Err(e) => {
                    eprintln!("Failed to parse TZX {}: {e}", path.display());
                    process::exit(1);
                }
            },
            "sna" => match SnaSnapshot::parse(&data) {
                Ok(snapshot) => {
                    if let Err(e) = spectrum.apply_sna(&snapshot) {
                        eprintln!("Failed to load SNA {}: {e}", path.display());
                        process::exit(1);
                    }
                    eprintln!("Snapshot: {}", path.display());
                }
                Err(e) => {
                    eprintln!("Failed to parse SNA {}: {e}", path.display());
                    process::exit(1);
                }
            },
            "trd" => {
                // The machine enforces the slot count and the --ro policy
                if let Err(e) = spectrum.mount_trd(next_drive, &data, false) {
                    eprintln!("Failed to mount TRD {}: {e}", path.display());
                    process::exit(1);
                }
                eprintln!(
                    "Disk {}: {}",
                    char::from(b'A' + next_drive as u8),
                    path.display()
                );
                if !cli.disks_read_only {
                    mounted.push(MountedDisk {
                        drive: next_drive,
                        path: path.clone(),
                    });
                }
                next_drive += 1;
            }
            "scl" => {
                if let Err(e) = spectrum.mount_scl(next_drive, &data) {
                    eprintln!("Failed to mount SCL {}: {e}", path.display());
                    process::exit(1);
                }
                eprintln!(
                    "Disk {} (SCL, read-only): {}",
                    char::from(b'A' + next_drive as u8),
                    path.display()
                );
                next_drive += 1;
            }
            other => {
                eprintln!("Unknown file type .{other}: {}", path.display());
                process::exit(1);
            }
        }
    }

    (spectrum, mounted)
}

/// Write dirty images back to their files.
fn flush_disks(spectrum: &mut Spectrum, mounted: &[MountedDisk]) {
    for disk in mounted {
        let Some(image) = spectrum.unmount_disk(disk.drive) else {
            continue;
        };
        if image.is_dirty() && !image.is_read_only() {
            if let Err(e) = std::fs::write(&disk.path, image.bytes()) {
                eprintln!("Failed to flush {}: {e}", disk.path.display());
            } else {
                eprintln!("Flushed {}", disk.path.display());
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Audio
// ---------------------------------------------------------------------------

/// Start the cpal output stream pulling from the mixer queue. Returns the
/// stream so it stays alive; `None` (with a warning) when no device works.
fn start_audio(queue: SampleQueue) -> Option<cpal::Stream> {
    let host = cpal::default_host();
    let device = host.default_output_device()?;
    let config = match device.default_output_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("No audio output config: {e}");
            return None;
        }
    };

    let channels = config.channels() as usize;
    let stream = device.build_output_stream(
        &config.into(),
        move |out: &mut [f32], _| {
            let mut queue = match queue.lock() {
                Ok(queue) => queue,
                Err(_) => return,
            };
            for frame in out.chunks_mut(channels) {
                let sample = queue.pop_front().unwrap_or(0);
                let value = f32::from(sample) / f32::from(i16::MAX);
                for channel in frame {
                    *channel = value;
                }
            }
        },
        |e| eprintln!("Audio stream error: {e}"),
        None,
    );

    match stream {
        Ok(stream) => {
            if let Err(e) = stream.play() {
                eprintln!("Failed to start audio: {e}");
                return None;
            }
            Some(stream)
        }
        Err(e) => {
            eprintln!("Failed to build audio stream: {e}");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Keyboard mapping
// ---------------------------------------------------------------------------

/// Map a host key to Spectrum matrix positions (row, bit). Backspace is
/// the CAPS SHIFT + 0 combination, so it maps to two keys.
fn map_key(code: KeyCode) -> &'static [(usize, u8)] {
    match code {
        KeyCode::ShiftLeft | KeyCode::ShiftRight => &[(0, 0)],
        KeyCode::KeyZ => &[(0, 1)],
        KeyCode::KeyX => &[(0, 2)],
        KeyCode::KeyC => &[(0, 3)],
        KeyCode::KeyV => &[(0, 4)],
        KeyCode::KeyA => &[(1, 0)],
        KeyCode::KeyS => &[(1, 1)],
        KeyCode::KeyD => &[(1, 2)],
        KeyCode::KeyF => &[(1, 3)],
        KeyCode::KeyG => &[(1, 4)],
        KeyCode::KeyQ => &[(2, 0)],
        KeyCode::KeyW => &[(2, 1)],
        KeyCode::KeyE => &[(2, 2)],
        KeyCode::KeyR => &[(2, 3)],
        KeyCode::KeyT => &[(2, 4)],
        KeyCode::Digit1 => &[(3, 0)],
        KeyCode::Digit2 => &[(3, 1)],
        KeyCode::Digit3 => &[(3, 2)],
        KeyCode::Digit4 => &[(3, 3)],
        KeyCode::Digit5 => &[(3, 4)],
        KeyCode::Digit0 => &[(4, 0)],
        KeyCode::Digit9 => &[(4, 1)],
        KeyCode::Digit8 => &[(4, 2)],
        KeyCode::Digit7 => &[(4, 3)],
        KeyCode::Digit6 => &[(4, 4)],
        KeyCode::KeyP => &[(5, 0)],
        KeyCode::KeyO => &[(5, 1)],
        KeyCode::KeyI => &[(5, 2)],
        KeyCode::KeyU => &[(5, 3)],
        KeyCode::KeyY => &[(5, 4)],
        KeyCode::Enter => &[(6, 0)],
        KeyCode::KeyL => &[(6, 1)],
        KeyCode::KeyK => &[(6, 2)],
        KeyCode::KeyJ => &[(6, 3)],
        KeyCode::KeyH => &[(6, 4)],
        KeyCode::Space => &[(7, 0)],
        KeyCode::ControlLeft | KeyCode::ControlRight => &[(7, 1)], // Symbol Shift
        KeyCode::KeyM => &[(7, 2)],
        KeyCode::KeyN => &[(7, 3)],
        KeyCode::KeyB => &[(7, 4)],
        KeyCode::Backspace => &[(0, 0), (4, 0)], // CAPS SHIFT + 0
        _ => &[],
    }
}

// ---------------------------------------------------------------------------
// Windowed application
// ---------------------------------------------------------------------------

struct App {
    spectrum: Spectrum,
    mounted: Vec<MountedDisk>,
    window: Option<&'static Window>,
    pixels: Option<Pixels<'static>>,
    _audio: Option<cpal::Stream>,
    last_frame_time: Instant,
}

impl App {
    fn new(spectrum: Spectrum, mounted: Vec<MountedDisk>) -> Self {
        let audio = start_audio(spectrum.audio_queue());
        Self {
            spectrum,
            mounted,
            window: None,
            pixels: None,
            _audio: audio,
            last_frame_time: Instant::now(),
        }
    }

    fn handle_key(&mut self, code: KeyCode, pressed: bool) {
        for &(row, bit) in map_key(code) {
            self.spectrum.set_key(row, bit, pressed);
        }
    }

    fn handle_hotkey(&mut self, code: KeyCode) {
        match code {
            KeyCode::F6 => {
                self.spectrum.tape_rewind();
                eprintln!("Tape rewound");
            }
            KeyCode::F7 => {
                self.spectrum.tape_toggle();
                eprintln!(
                    "Tape {}",
                    if self.spectrum.bus.tape.is_playing() {
                        "playing"
                    } else {
                        "paused"
                    }
                );
            }
            KeyCode::F8 => print!("{}", self.spectrum.dump_catalogs()),
            KeyCode::F9 => {
                self.spectrum.toggle_trdos();
                eprintln!(
                    "TR-DOS ROM {}",
                    if self.spectrum.bus.trdos_active() {
                        "paged in"
                    } else {
                        "paged out"
                    }
                );
            }
            KeyCode::F12 => {
                self.spectrum.reset();
                eprintln!("CPU reset");
            }
            _ => {}
        }
    }

    fn update_pixels(&mut self) {
        let Some(pixels) = self.pixels.as_mut() else {
            return;
        };

        let fb = self.spectrum.framebuffer();
        let frame = pixels.frame_mut();
        for (i, &argb) in fb.iter().enumerate() {
            let offset = i * 4;
            frame[offset] = ((argb >> 16) & 0xFF) as u8;
            frame[offset + 1] = ((argb >> 8) & 0xFF) as u8;
            frame[offset + 2] = (argb & 0xFF) as u8;
            frame[offset + 3] = 0xFF;
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let size = winit::dpi::LogicalSize::new(FB_WIDTH * SCALE, FB_HEIGHT * SCALE);
        let attrs = WindowAttributes::default()
            .with_title("ZX Spectrum")
            .with_inner_size(size)
            .with_resizable(false);

        match event_loop.create_window(attrs) {
            Ok(window) => {
                // The window lives for the whole process; leaking it gives
                // the 'static borrow pixels wants.
                let window: &'static Window = Box::leak(Box::new(window));
                let inner = window.inner_size();
                let surface = SurfaceTexture::new(inner.width, inner.height, window);
                match Pixels::new(FB_WIDTH, FB_HEIGHT, surface) {
                    Ok(pixels) => self.pixels = Some(pixels),
                    Err(e) => {
                        eprintln!("Failed to create pixel surface: {e}");
                        event_loop.exit();
                        return;
                    }
                }
                self.window = Some(window);
            }
            Err(e) => {
                eprintln!("Failed to create window: {e}");
                event_loop.exit();
            }
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                flush_disks(&mut self.spectrum, &self.mounted);
                event_loop.exit();
            }
            WindowEvent::KeyboardInput { event, .. } => {
                if let PhysicalKey::Code(code) = event.physical_key {
                    let pressed = event.state == ElementState::Pressed;
                    if code == KeyCode::Escape && pressed {
                        flush_disks(&mut self.spectrum, &self.mounted);
                        event_loop.exit();
                        return;
                    }
                    if pressed && !event.repeat {
                        self.handle_hotkey(code);
                    }
                    self.handle_key(code, pressed);
                }
            }
            WindowEvent::RedrawRequested => {
                let now = Instant::now();
                if now.duration_since(self.last_frame_time) >= FRAME_DURATION {
                    self.spectrum.run_frame();
                    self.update_pixels();
                    self.last_frame_time = now;
                }

                if let Some(pixels) = self.pixels.as_ref()
                    && let Err(e) = pixels.render()
                {
                    eprintln!("Render error: {e}");
                    event_loop.exit();
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = self.window {
            window.request_redraw();
        }
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

fn run_headless(cli: &CliArgs) {
    let (mut spectrum, mounted) = make_spectrum(cli);
    for _ in 0..cli.frames {
        spectrum.run_frame();
        // No audio device: keep the queue from saturating
        let _ = spectrum.bus.mixer.drain(4096);
    }
    flush_disks(&mut spectrum, &mounted);
}

fn main() {
    let cli = parse_args();

    if cli.headless {
        run_headless(&cli);
        return;
    }

    let (spectrum, mounted) = make_spectrum(&cli);
    let mut app = App::new(spectrum, mounted);

    let event_loop = match EventLoop::new() {
        Ok(event_loop) => event_loop,
        Err(e) => {
            eprintln!("Failed to create event loop: {e}");
            process::exit(1);
        }
    };

    if let Err(e) = event_loop.run_app(&mut app) {
        eprintln!("Event loop error: {e}");
        process::exit(1);
    }
}
