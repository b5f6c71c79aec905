// Stdio host for the Cloud Vision GUI
// Messages in both directions are framed as [4 bytes native-endian length][JSON]

use anyhow::{anyhow, Context, Result};
use chrono::Local;
use log::{LevelFilter, Log, Metadata, Record};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use cloud_vision_sync_lib::paths::{get_app_data_dir, get_log_file_path};
use cloud_vision_sync_lib::upload::load_image;
use cloud_vision_sync_lib::{CloudVision, ModelBranch, ModelSync, SyncConfig, SyncError};

/// Global log file handle
static LOG_FILE: Mutex<Option<File>> = Mutex::new(None);

static LOGGER: HostLogger = HostLogger;

/// Writes every record to stderr and the log file (stdout carries the protocol)
struct HostLogger;

impl Log for HostLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let msg = format!("{} [{}] {}", record.level(), record.target(), record.args());
        eprintln!("[Cloud Vision Host] {}", msg);
        write_to_log_file(&msg);
    }

    fn flush(&self) {
        if let Ok(mut guard) = LOG_FILE.lock() {
            if let Some(ref mut file) = *guard {
                let _ = file.flush();
            }
        }
    }
}

/// Initialize log file (overwrites on each start)
fn init_log_file(app_dir: &Path) {
    let path = get_log_file_path(app_dir);
    if let Ok(file) = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&path)
    {
        if let Ok(mut guard) = LOG_FILE.lock() {
            *guard = Some(file);
        }
    }
}

fn write_to_log_file(message: &str) {
    if let Ok(mut guard) = LOG_FILE.lock() {
        if let Some(ref mut file) = *guard {
            let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
            let _ = writeln!(file, "[{}] {}", timestamp, message);
            let _ = file.flush();
        }
    }
}

/// Set binary mode for stdin/stdout on Windows
#[cfg(windows)]
fn set_binary_mode() {
    const O_BINARY: i32 = 0x8000;

    extern "C" {
        fn _setmode(fd: i32, mode: i32) -> i32;
    }

    unsafe {
        _setmode(0, O_BINARY);
        _setmode(1, O_BINARY);
    }
}

#[cfg(not(windows))]
fn set_binary_mode() {}

#[derive(Debug, Deserialize)]
struct HostMessage {
    id: String,
    command: String,
    #[serde(default)]
    params: Value,
}

#[derive(Debug, Serialize)]
struct HostError {
    kind: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<u16>,
    offline: bool,
}

impl HostError {
    fn from_anyhow(err: &anyhow::Error) -> Self {
        match err.downcast_ref::<SyncError>() {
            Some(sync) => Self {
                kind: sync.kind(),
                message: sync.to_string(),
                status: sync.status_code(),
                offline: sync.is_offline(),
            },
            None => Self {
                kind: "host",
                message: format!("{:#}", err),
                status: None,
                offline: false,
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct HostResponse {
    id: String,
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<HostError>,
}

/// Largest accepted message body; longer frames are rejected before allocating.
const MAX_MESSAGE_BYTES: usize = 1024 * 1024;

/// Read one framed message. `Ok(None)` means stdin was closed.
fn read_message(input: &mut impl Read) -> Result<Option<HostMessage>> {
    let mut length_bytes = [0u8; 4];
    match input.read_exact(&mut length_bytes) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e).context("Failed to read message length"),
    }

    let length = u32::from_ne_bytes(length_bytes) as usize;
    if length > MAX_MESSAGE_BYTES {
        return Err(anyhow!(
            "Message of {} bytes exceeds the {} byte limit",
            length,
            MAX_MESSAGE_BYTES
        ));
    }

    let mut buffer = vec![0u8; length];
    input
        .read_exact(&mut buffer)
        .context("Failed to read message body")?;

    let message: HostMessage =
        serde_json::from_slice(&buffer).context("Failed to parse message JSON")?;

    Ok(Some(message))
}

fn send_response(output: &mut impl Write, response: &HostResponse) -> Result<()> {
    let json = serde_json::to_string(response).context("Failed to serialize response")?;
    let length = u32::try_from(json.len()).context("Response too large")?;

    output
        .write_all(&length.to_ne_bytes())
        .context("Failed to write response length")?;
    output
        .write_all(json.as_bytes())
        .context("Failed to write response body")?;
    output.flush().context("Failed to flush stdout")?;

    Ok(())
}

fn required_str(params: &Value, name: &str) -> Result<String> {
    params
        .get(name)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| anyhow!("Missing string parameter '{}'", name))
}

fn optional_str(params: &Value, name: &str) -> Option<String> {
    params.get(name).and_then(Value::as_str).map(str::to_string)
}

struct Host {
    sync: ModelSync,
}

impl Host {
    fn branch(&self, params: &Value) -> ModelBranch {
        optional_str(params, "branch")
            .map(ModelBranch::new)
            .unwrap_or_else(|| self.sync.cloud().config().model_branch.clone())
    }

    fn resource_id(&self, params: &Value) -> Result<String> {
        let id = optional_str(params, "resource_id")
            .unwrap_or_else(|| self.sync.cloud().config().resource_instance_id.clone());
        if id.is_empty() {
            return Err(anyhow!("No resource instance id configured"));
        }
        Ok(id)
    }

    async fn handle(&self, command: &str, params: &Value) -> Result<Value> {
        let cloud = self.sync.cloud();
        match command {
            "get_bucket_list" => {
                let buckets = cloud.get_bucket_list(&self.resource_id(params)?).await?;
                Ok(json!({ "buckets": buckets }))
            }
            "get_available_models" => {
                let models = self.sync.discover_models(&self.resource_id(params)?).await?;
                Ok(json!({ "models": models }))
            }
            "get_latest_model_date" => {
                let bucket = required_str(params, "bucket")?;
                let date = cloud.get_latest_model_date(&bucket, &self.branch(params)).await?;
                Ok(json!({ "bucket": bucket, "last_modified": date }))
            }
            "download_model" => {
                let bucket = required_str(params, "bucket")?;
                let outcome = cloud.download_model(&bucket, &self.branch(params)).await?;
                Ok(serde_json::to_value(outcome)?)
            }
            "check_updates" => {
                let status = match optional_str(params, "bucket") {
                    Some(bucket) => self.sync.update_if_stale(&bucket, &self.branch(params)).await?,
                    None => self.sync.check_selected().await?,
                };
                Ok(serde_json::to_value(status)?)
            }
            "upload_image" => {
                let bucket = required_str(params, "bucket")?;
                let path = required_str(params, "path")?;
                let image = load_image(Path::new(&path))?;
                let uploaded = cloud.upload_image(&image, &bucket).await?;
                Ok(serde_json::to_value(uploaded)?)
            }
            "get_selected_bucket" => {
                let bucket = self.sync.settings().selected_bucket()?;
                Ok(json!({ "bucket": bucket }))
            }
            "set_selected_bucket" => {
                let bucket = required_str(params, "bucket")?;
                self.sync.settings().set_selected_bucket(Some(bucket.clone()))?;
                Ok(json!({ "bucket": bucket }))
            }
            "locate_model" => {
                let bucket = required_str(params, "bucket")?;
                let path = cloud.locate_model(&bucket)?;
                Ok(json!({ "bucket": bucket, "path": path }))
            }
            "remove_model" => {
                let bucket = required_str(params, "bucket")?;
                let removed = self.sync.remove_model(&bucket).await?;
                Ok(json!({ "bucket": bucket, "removed": removed }))
            }
            _ => Err(anyhow!("Unknown command: {}", command)),
        }
    }
}

/// Process a single command
fn process_command(host: &Host, runtime: &tokio::runtime::Runtime, message: HostMessage) -> HostResponse {
    log::info!("Command: {}", message.command);

    match runtime.block_on(host.handle(&message.command, &message.params)) {
        Ok(data) => HostResponse {
            id: message.id,
            success: true,
            data: Some(data),
            error: None,
        },
        Err(e) => {
            log::warn!("Error: {:#} (cmd: {})", e, message.command);
            HostResponse {
                id: message.id,
                success: false,
                data: None,
                error: Some(HostError::from_anyhow(&e)),
            }
        }
    }
}

fn load_config() -> SyncConfig {
    // Missing files are fine; the environment may already be populated.
    let _ = dotenvy::dotenv();
    let _ = dotenvy::from_filename(".Credentials");
    SyncConfig::from_env()
}

fn run() -> Result<()> {
    set_binary_mode();

    let config = load_config();

    let app_dir = get_app_data_dir(config.data_dir.as_deref())?;
    init_log_file(&app_dir);
    log::set_logger(&LOGGER).map_err(|e| anyhow!("Failed to install logger: {}", e))?;
    log::set_max_level(LevelFilter::Info);

    log::info!("Host started");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    let cloud = Arc::new(CloudVision::new(config)?);
    let host = Host {
        sync: ModelSync::open(cloud)?,
    };

    let mut stdin = io::stdin().lock();
    let mut stdout = io::stdout().lock();

    loop {
        match read_message(&mut stdin) {
            Ok(Some(message)) => {
                let response = process_command(&host, &runtime, message);
                if let Err(e) = send_response(&mut stdout, &response) {
                    log::error!("write_error: {:#}", e);
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                log::error!("read_error: {:#}", e);
                break;
            }
        }
    }

    log::info!("Host stopped");
    log::logger().flush();
    Ok(())
}

fn main() {
    if let Err(e) = run() {
        eprintln!("[Cloud Vision Host] fatal: {:#}", e);
        std::process::exit(1);
    }
}
