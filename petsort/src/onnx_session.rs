use crate::color_utils::symbols;
use anyhow::{anyhow, Result};
use log::Level;
use ort::{
    execution_providers::{CPUExecutionProvider, CoreMLExecutionProvider, ExecutionProvider},
    logging::LogLevel,
    session::Session,
    value::ValueType,
};
use serde::Serialize;
use std::fs;
use std::path::Path;

fn log_level_from_ort(level: LogLevel) -> Level {
    match level {
        LogLevel::Verbose => Level::Trace,
        LogLevel::Info => Level::Trace,
        LogLevel::Warning => Level::Debug,
        LogLevel::Error => Level::Info,
        LogLevel::Fatal => Level::Error,
    }
}

fn ort_level_from_log(level: Level) -> LogLevel {
    match level {
        // ONNX's info output is closer to our debug/trace in volume
        Level::Trace => LogLevel::Verbose,
        Level::Debug => LogLevel::Warning,
        Level::Info => LogLevel::Error,
        Level::Warn => LogLevel::Error,
        Level::Error => LogLevel::Fatal,
    }
}

/// Configuration for creating ONNX sessions
pub struct SessionConfig<'a> {
    pub device: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub model_path: String,
    pub model_size_bytes: usize,
    pub execution_providers: Vec<String>,
    pub model_checksum: String,
}

#[derive(Debug, Clone)]
pub struct DeviceSelection {
    pub device: String,
    pub reason: String,
}

/// Determine optimal device based on user preference
pub fn determine_optimal_device(requested_device: &str) -> DeviceSelection {
    match requested_device {
        "auto" => match CoreMLExecutionProvider::default().is_available() {
            Ok(true) => DeviceSelection {
                device: "coreml".to_string(),
                reason: "Auto-selected CoreML (available)".to_string(),
            },
            _ => DeviceSelection {
                device: "cpu".to_string(),
                reason: "Auto-selected CPU (CoreML not available)".to_string(),
            },
        },
        other => DeviceSelection {
            device: other.to_string(),
            reason: format!("User explicitly chose {other}"),
        },
    }
}

pub fn calculate_md5_bytes(bytes: &[u8]) -> String {
    format!("{:x}", md5::compute(bytes))
}

/// Create an ONNX Runtime session for the model at `model_path`
pub fn create_onnx_session(
    model_path: &Path,
    config: &SessionConfig,
) -> Result<(Session, ModelInfo)> {
    let bytes = fs::read(model_path)
        .map_err(|e| anyhow!("Failed to read model {}: {}", model_path.display(), e))?;
    if bytes.is_empty() {
        return Err(anyhow!(
            "Model file is empty (0 bytes): {}",
            model_path.display()
        ));
    }

    let execution_providers = match config.device {
        "coreml" => match CoreMLExecutionProvider::default().is_available() {
            Ok(true) => vec![
                CoreMLExecutionProvider::default().build(),
                CPUExecutionProvider::default().build(),
            ],
            _ => {
                log::warn!(
                    "{}CoreML not available, falling back to CPU",
                    symbols::warning()
                );
                vec![CPUExecutionProvider::default().build()]
            }
        },
        "cpu" => vec![CPUExecutionProvider::default().build()],
        other => {
            log::warn!("{}Unknown device '{other}', using CPU", symbols::warning());
            vec![CPUExecutionProvider::default().build()]
        }
    };

    let ep_names: Vec<String> = execution_providers
        .iter()
        .map(|ep| format!("{ep:?}"))
        .collect();

    // Match ORT verbosity to whatever our logger has enabled
    let ort_log_level = [
        Level::Trace,
        Level::Debug,
        Level::Info,
        Level::Warn,
        Level::Error,
    ]
    .into_iter()
    .find(|&lvl| log::log_enabled!(lvl))
    .map(ort_level_from_log)
    .unwrap_or(LogLevel::Fatal);

    let session = Session::builder()
        .map_err(|e| anyhow!("Failed to create session builder: {}", e))?
        .with_logger(Box::new(|level, _, _, _, msg| {
            log::log!(log_level_from_ort(level), "[onnx] {msg}")
        }))
        .map_err(|e| anyhow!("Failed to set logger: {}", e))?
        .with_log_level(ort_log_level)
        .map_err(|e| anyhow!("Failed to set log level: {}", e))?
        .with_execution_providers(execution_providers)
        .map_err(|e| anyhow!("Failed to set execution providers: {}", e))?
        .commit_from_memory(&bytes)
        .map_err(|e| anyhow!("Failed to load model {}: {}", model_path.display(), e))?;

    let model_info = ModelInfo {
        model_path: model_path.display().to_string(),
        model_size_bytes: bytes.len(),
        execution_providers: ep_names,
        model_checksum: calculate_md5_bytes(&bytes),
    };

    log::debug!(
        "{}Execution providers registered for {}: {}",
        symbols::system_setup(),
        model_info.model_path,
        model_info.execution_providers.join(" -> ")
    );

    Ok((session, model_info))
}

/// Static tensor shape of a model input or output, if it is a tensor.
/// Dynamic axes are reported as -1 by ONNX Runtime.
pub fn tensor_shape(value_type: &ValueType) -> Option<Vec<i64>> {
    match value_type {
        ValueType::Tensor { shape, .. } => Some(shape.iter().copied().collect()),
        _ => None,
    }
}

/// Number of classes declared by a classifier's `[batch, classes]` output, if static
pub fn declared_class_count(session: &Session) -> Option<usize> {
    let output = session.outputs.first()?;
    let shape = tensor_shape(&output.output_type)?;
    match shape.last() {
        Some(&n) if n > 0 => Some(n as usize),
        _ => None,
    }
}

/// Square input edge declared by a `[1, 3, H, W]` model input, if static
pub fn declared_input_size(session: &Session) -> Option<u32> {
    let input = session.inputs.first()?;
    let shape = tensor_shape(&input.input_type)?;
    match shape.get(3) {
        Some(&w) if w > 0 => Some(w as u32),
        _ => None,
    }
}
