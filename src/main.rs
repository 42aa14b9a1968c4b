use std::io::{self, BufRead};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Context as _;
use crossbeam_channel::{never, select, tick, unbounded, Receiver};

use nowplaying::art::{handoff, ImageRegistrar, MemoryRegistry};
use nowplaying::{logging, AppContext, Config, MediaEvent, MediaInfo};

/// How often pending art registrations are served from the main thread
const PUMP_INTERVAL: Duration = Duration::from_millis(50);

enum Command {
    Info,
    ResetCache,
    Quit,
}

// ========================================================================
// INPUT THREADS
// ========================================================================

fn start_stdin_reader() -> Receiver<Command> {
    let (tx, rx) = unbounded();

    let spawned = thread::Builder::new().name("stdin".into()).spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            let cmd = match line.trim() {
                "i" | "info" => Command::Info,
                "r" | "reset" => Command::ResetCache,
                "q" | "quit" => Command::Quit,
                "" => continue,
                other => {
                    println!("Unknown command '{}'. Use i, r or q.", other);
                    continue;
                }
            };
            if tx.send(cmd).is_err() {
                break;
            }
        }
        // EOF behaves like quit
        let _ = tx.send(Command::Quit);
    });

    if let Err(e) = spawned {
        tracing::warn!("[Main] Could not start stdin reader: {}", e);
    }
    rx
}

/// SIGUSR1 clears the art cache, so a running overlay can be nudged into
/// refetching without a restart.
#[cfg(unix)]
fn start_signal_listener() -> anyhow::Result<Receiver<Command>> {
    use signal_hook::consts::SIGUSR1;
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGUSR1]).context("registering SIGUSR1 handler")?;
    let (tx, rx) = unbounded();
    thread::Builder::new()
        .name("signals".into())
        .spawn(move || {
            for _ in signals.forever() {
                tracing::info!("[Main] SIGUSR1 received");
                if tx.send(Command::ResetCache).is_err() {
                    break;
                }
            }
        })
        .context("spawning signal thread")?;
    Ok(rx)
}

#[cfg(not(unix))]
fn start_signal_listener() -> anyhow::Result<Receiver<Command>> {
    Ok(never())
}

// ========================================================================
// OUTPUT
// ========================================================================

fn print_now_playing(info: Option<&MediaInfo>) {
    let Some(info) = info else {
        println!("\n⏹  Nothing playing");
        return;
    };

    println!("\n🎵 NOW PLAYING 🎵");
    println!("   Source: {}", info.source);
    println!("   Track:  {}", info.display_title().as_deref().unwrap_or("-"));
    println!("   Artist: {}", info.display_artist().as_deref().unwrap_or("-"));
    if let Some(album) = &info.album {
        println!("   Album:  {}", album);
    }
    match info.art {
        Some(handle) => println!("   Art:    #{}", handle.id()),
        None => println!("   Art:    [none]"),
    }
}

fn main() -> anyhow::Result<()> {
    let log_dir = Config::project_dirs().map(|dirs| dirs.data_dir().join("logs"));
    let _log_guard = logging::init(log_dir.as_deref());

    println!("========================================");
    println!("   NowPlaying v{}", env!("CARGO_PKG_VERSION"));
    println!("========================================");
    println!("Commands:");
    println!("  [i] info     Show current track");
    println!("  [r] reset    Clear the album art cache");
    println!("  [q] quit     Exit");
    println!("----------------------------------------");

    let config = Config::load();

    // Images are registered on this thread; workers hand them over
    let registry = MemoryRegistry::new();
    let (registrar, inbox) = handoff(config.registration_timeout());
    let registrar: Arc<dyn ImageRegistrar> = Arc::new(registrar);

    let (ctx, events) = AppContext::start(config, registrar).context("starting media poller")?;
    tracing::info!("[Main] Running with the {} detector", ctx.detector_name);

    let commands = start_stdin_reader();
    let signals = start_signal_listener().unwrap_or_else(|e| {
        tracing::warn!("[Main] {:#}; cache reset via signal unavailable", e);
        never()
    });
    let pump = tick(PUMP_INTERVAL);

    loop {
        select! {
            recv(events) -> event => match event {
                Ok(MediaEvent::Changed(media)) => print_now_playing(media.as_ref()),
                Ok(MediaEvent::ArtResolved { key, handle }) => {
                    let current = ctx.current();
                    // Only report art that still belongs to what's on screen
                    if current.as_ref().and_then(MediaInfo::art_key).as_ref() == Some(&key) {
                        match handle {
                            Some(h) => println!("   🖼  Album art ready (#{})", h.id()),
                            None => println!("   🖼  No album art found"),
                        }
                    }
                }
                Err(_) => break,
            },
            recv(commands) -> cmd => match cmd {
                Ok(Command::Info) => print_now_playing(ctx.current().as_ref()),
                Ok(Command::ResetCache) => {
                    ctx.reset_art_cache();
                    println!("[CMD] Album art cache cleared");
                }
                Ok(Command::Quit) | Err(_) => break,
            },
            recv(signals) -> sig => {
                if let Ok(Command::ResetCache) = sig {
                    ctx.reset_art_cache();
                }
            },
            recv(pump) -> _ => {
                inbox.pump(|image| registry.register(image.clone()).ok());
            },
        }
    }

    println!("[Main] Shutting down...");
    ctx.shutdown();
    Ok(())
}
