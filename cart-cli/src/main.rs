//! Cartridge CLI - copy files onto cartridge storage and report.
//!
//! Usage:
//!   cart [archives/files...] [options]
//!
//! Examples:
//!   cart bundle.zip                      # Import a ZIP archive into an in-process device
//!   cart notes.txt image.bin --verify    # Import loose files and read them back
//!   cart bundle.zip --server 10.0.0.5:19876
//!   cart bundle.zip --cache-frames 8 --json

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use clap::Parser;
use log::{debug, info};
use serde::Serialize;

use cart_core::transport::DeviceCounters;
use cart_core::{
    export_file, import_archive, import_file, CartConfig, CartDriver, CartError, CartResult,
    CartTransport, ImportedFile, MemoryDevice, TcpTransport,
};

/// Cartridge storage CLI
#[derive(Parser, Debug)]
#[command(name = "cart")]
#[command(about = "Import files onto cartridge storage")]
struct Args {
    /// ZIP archives or loose files to import
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Device controller address (host:port); omit for an in-process device
    #[arg(short, long)]
    server: Option<String>,

    /// Override the frame cache size
    #[arg(long)]
    cache_frames: Option<usize>,

    /// Read every imported file back and compare
    #[arg(long)]
    verify: bool,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,

    /// Enable debug logging
    #[arg(short, long)]
    trace: bool,
}

/// Outcome of one import run.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Report {
    device: String,
    files: Vec<ImportedFile>,
    total_bytes: usize,
    verified: Option<bool>,
    cache_capacity: usize,
    cache_occupied: usize,
    free_frames: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    device_ops: Option<DeviceCounters>,
}

/// What `run` observed before powering off.
struct Session {
    files: Vec<ImportedFile>,
    verified: Option<bool>,
    cache_occupied: usize,
    free_frames: usize,
}

impl Session {
    fn into_report(
        self,
        device: String,
        cache_capacity: usize,
        device_ops: Option<DeviceCounters>,
    ) -> Report {
        Report {
            device,
            total_bytes: self.files.iter().map(|f| f.bytes).sum(),
            files: self.files,
            verified: self.verified,
            cache_capacity,
            cache_occupied: self.cache_occupied,
            free_frames: self.free_frames,
            device_ops,
        }
    }
}

/// Host data waiting to be imported, with the cartridge files it becomes.
struct Input {
    archive: Option<PathBuf>,
    files: Vec<(String, Vec<u8>)>,
}

/// Every regular entry of a ZIP archive, in archive order.
fn read_archive(path: &Path) -> CartResult<Vec<(String, Vec<u8>)>> {
    let mut archive = zip::ZipArchive::new(BufReader::new(File::open(path)?))?;
    let mut files = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        if entry.is_dir() {
            continue;
        }
        let mut data = Vec::new();
        entry.read_to_end(&mut data)?;
        files.push((entry.name().to_string(), data));
    }
    Ok(files)
}

fn collect_inputs(paths: &[PathBuf]) -> Result<Vec<Input>, Box<dyn std::error::Error>> {
    let mut inputs = Vec::with_capacity(paths.len());
    for path in paths {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();

        if ext == "zip" {
            match read_archive(path) {
                Ok(files) => inputs.push(Input {
                    archive: Some(path.clone()),
                    files,
                }),
                Err(e) => {
                    eprintln!("Failed to load {}: {}", path.display(), e);
                    return Err(e.into());
                }
            }
            continue;
        }

        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| format!("Not a file name: {}", path.display()))?
            .to_string();
        match std::fs::read(path) {
            Ok(data) => inputs.push(Input {
                archive: None,
                files: vec![(name, data)],
            }),
            Err(e) => {
                eprintln!("Failed to read {}: {}", path.display(), e);
                return Err(e.into());
            }
        }
    }
    Ok(inputs)
}

/// Importing a name twice would overwrite the first copy in place.
fn check_unique_names(inputs: &[Input]) -> Result<(), String> {
    let mut seen = HashSet::new();
    for (name, _) in inputs.iter().flat_map(|input| &input.files) {
        if !seen.insert(name.as_str()) {
            return Err(format!("Duplicate file name: {}", name));
        }
    }
    Ok(())
}

fn import_archive_path<T: CartTransport>(
    driver: &mut CartDriver<T>,
    path: &Path,
) -> CartResult<Vec<ImportedFile>> {
    let reader = BufReader::new(File::open(path)?);
    let files = import_archive(driver, reader)?;
    eprintln!("Imported archive: {} ({} files)", path.display(), files.len());
    Ok(files)
}

/// Compare every imported file with its source bytes.
fn verify<T: CartTransport>(driver: &mut CartDriver<T>, inputs: &[Input]) -> CartResult<bool> {
    let mut ok = true;
    for (name, data) in inputs.iter().flat_map(|input| &input.files) {
        let stored = export_file(driver, name)?;
        if &stored != data {
            eprintln!(
                "Verify failed: {} ({} bytes stored, {} expected)",
                name,
                stored.len(),
                data.len()
            );
            ok = false;
        } else {
            debug!("verified {}", name);
        }
    }
    Ok(ok)
}

/// Power the device on, import everything, optionally verify, power off.
///
/// The device is powered off even when an import fails; the import error
/// wins over a power-off error.
fn run<T: CartTransport>(
    driver: &mut CartDriver<T>,
    inputs: &[Input],
    check: bool,
) -> CartResult<Session> {
    driver.power_on()?;
    let result = import_all(driver, inputs, check);
    let off = driver.power_off();
    let session = result?;
    off?;
    Ok(session)
}

fn import_all<T: CartTransport>(
    driver: &mut CartDriver<T>,
    inputs: &[Input],
    check: bool,
) -> CartResult<Session> {
    let mut files = Vec::new();
    for input in inputs {
        match &input.archive {
            Some(path) => files.extend(import_archive_path(driver, path)?),
            None => {
                for (name, data) in &input.files {
                    files.push(import_file(driver, name, data)?);
                }
            }
        }
    }

    let verified = if check {
        Some(verify(driver, inputs)?)
    } else {
        None
    };

    Ok(Session {
        files,
        verified,
        cache_occupied: driver.cache().occupied(),
        free_frames: driver.free_frames(),
    })
}

fn print_report(report: &Report, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    println!("Device: {}", report.device);
    for file in &report.files {
        println!("  {:<40} {:>10} bytes", file.name, file.bytes);
    }
    println!("Total: {} files, {} bytes", report.files.len(), report.total_bytes);
    if let Some(ok) = report.verified {
        println!("Verify: {}", if ok { "ok" } else { "FAILED" });
    }
    println!(
        "Cache: {}/{} frames, {} frames free on media",
        report.cache_occupied, report.cache_capacity, report.free_frames
    );
    if let Some(ops) = &report.device_ops {
        println!(
            "Device ops: init {} zero {} load {} read {} write {} off {} rejected {}",
            ops.init_media,
            ops.zero_cartridge,
            ops.load_cartridge,
            ops.read_frame,
            ops.write_frame,
            ops.power_off,
            ops.rejected
        );
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let level = if args.trace { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let mut config = match &args.config {
        Some(path) => CartConfig::from_path(path)?,
        None => CartConfig::default(),
    };
    if let Some(frames) = args.cache_frames {
        config = config.with_cache_frames(frames);
    }
    config.validate()?;
    info!("configuration: {:?}", config);

    let inputs = collect_inputs(&args.files)?;
    if let Err(e) = check_unique_names(&inputs) {
        eprintln!("{}", e);
        return Err(e.into());
    }
    if inputs.is_empty() {
        eprintln!("Nothing to import");
        return Ok(());
    }

    let report = match &args.server {
        Some(addr) => {
            let mut driver = CartDriver::new(config.clone(), TcpTransport::new(addr.as_str()))?;
            let session = run(&mut driver, &inputs, args.verify).map_err(|e| report_error(&e))?;
            session.into_report(addr.clone(), config.cache_frames, None)
        }
        None => {
            let device = MemoryDevice::new(config.max_cartridges, config.frames_per_cartridge);
            let mut driver = CartDriver::new(config.clone(), device)?;
            let session = run(&mut driver, &inputs, args.verify).map_err(|e| report_error(&e))?;
            let ops = driver.transport().counters();
            session.into_report("in-process".to_string(), config.cache_frames, Some(ops))
        }
    };

    print_report(&report, args.json)?;

    if report.verified == Some(false) {
        return Err("verification failed".into());
    }
    Ok(())
}

fn report_error(e: &CartError) -> String {
    eprintln!("Error: {}", e);
    e.to_string()
}
