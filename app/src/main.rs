use std::{
    env::current_exe,
    io::stdout,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use backend::{
    CameraSystem, Database, DefaultCamera, Settings, YoloDetector, init_onnxruntime,
};
use base64::{Engine, prelude::BASE64_STANDARD};
use command::{Command, HELP};
use fern::Dispatch;
use log::{LevelFilter, error, info};
use tokio::io::{AsyncBufReadExt, BufReader, stdin};

mod command;

#[cfg(target_os = "windows")]
const ONNXRUNTIME_LIB: &str = "onnxruntime.dll";
#[cfg(target_os = "macos")]
const ONNXRUNTIME_LIB: &str = "libonnxruntime.dylib";
#[cfg(not(any(target_os = "windows", target_os = "macos")))]
const ONNXRUNTIME_LIB: &str = "libonnxruntime.so";

#[tokio::main]
async fn main() -> Result<()> {
    let exe_dir = current_exe()?
        .parent()
        .map(Path::to_path_buf)
        .context("executable has no parent directory")?;
    init_logging(&exe_dir)?;

    let database = Database::open_default()?;
    let mut settings = database.query_settings()?;
    init_onnxruntime(&exe_dir.join(ONNXRUNTIME_LIB))?;
    let camera = DefaultCamera::new(
        settings.camera_index,
        settings.capture_width,
        settings.capture_height,
    )?;
    let detector = YoloDetector::new(&settings.model_path, settings.min_confidence)?;
    let system = CameraSystem::start(&settings, camera, detector)?;
    println!("{HELP}");

    let mut lines = BufReader::new(stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let command = match line.parse::<Command>() {
            Ok(command) => command,
            Err(err) => {
                println!("{err:#}");
                continue;
            }
        };
        if command == Command::Quit {
            break;
        }
        if let Err(err) = execute(&system, &database, &mut settings, command).await {
            error!(target: "app", "command failed {err:#}");
        }
    }

    system.stop();
    info!(target: "app", "exiting");
    Ok(())
}

fn init_logging(exe_dir: &Path) -> Result<()> {
    let level = if cfg!(debug_assertions) {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{} {} {}] {}",
                humantime::format_rfc3339(std::time::SystemTime::now()),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(level)
        .chain(stdout())
        .chain(fern::log_file(exe_dir.join("log.txt"))?)
        .apply()?;
    log_panics::init();
    Ok(())
}

async fn execute(
    system: &CameraSystem,
    database: &Database,
    settings: &mut Settings,
    command: Command,
) -> Result<()> {
    match command {
        Command::Counting(enabled) => {
            system.set_counting_enabled(enabled);
            settings.counting_enabled = enabled;
            database.upsert_settings(settings)?;
        }
        Command::Lines(lines) => {
            system.set_lines(lines.clone());
            settings.lines = lines;
            database.upsert_settings(settings)?;
        }
        Command::Feed => println!("{}", serde_json::to_string_pretty(&system.vehicle_feed())?),
        Command::Sync => {
            let synced = system.sync_sheet().await?;
            println!("synced {synced} rows");
        }
        Command::SaveLayout { name, slots } => {
            system.save_layout(&name, &slots)?;
            println!("saved layout {name} with {} slots", slots.len());
        }
        Command::LoadLayout(name) => {
            let slots = system.load_layout(&name)?;
            println!("loaded layout {name} with {} slots", slots.len());
        }
        Command::ListLayouts => {
            for name in system.list_layouts()? {
                println!("{name}");
            }
        }
        Command::Occupancy => {
            println!("{}", serde_json::to_string_pretty(&system.detect_occupancy()?)?)
        }
        Command::Snapshot { path, annotated } => write_snapshot(system, path, annotated)?,
        Command::Help => println!("{HELP}"),
        Command::Quit => (),
    }

    Ok(())
}

fn write_snapshot(system: &CameraSystem, path: PathBuf, annotated: bool) -> Result<()> {
    let Some(jpeg) = system.frame_jpeg_base64(annotated)? else {
        println!("no frame captured yet");
        return Ok(());
    };
    std::fs::write(&path, BASE64_STANDARD.decode(jpeg)?)
        .with_context(|| format!("failed to write {}", path.display()))?;
    println!("wrote {}", path.display());
    Ok(())
}
