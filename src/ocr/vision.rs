//! Vision-language OCR through the llama.cpp multimodal CLI
//!
//! The runtime wants a file reference, so each call writes the frame to a
//! temporary JPEG that is removed when the call returns.

use image::{DynamicImage, ImageFormat};
use std::ffi::OsString;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{debug, info};

use super::{OcrError, TextRecognizer};
use crate::config::OcrConfig;
use crate::gpu::{AccelerationMode, AccelerationProbe};

pub const EXTRACTION_PROMPT: &str =
    "Extract all visible text from this image. Provide only the text content, no descriptions.";

const MAX_TOKENS: u32 = 512;
const TEMPERATURE: &str = "0.1";
const GGUF_MAGIC: &[u8; 4] = b"GGUF";

/// Runtime flags fixed at load time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchSettings {
    pub gpu_layers: i32,
    pub context_size: u32,
    pub threads: u32,
}

impl LaunchSettings {
    /// GPU offload only when an accelerator was found and GPU use is on
    pub fn resolve(config: &OcrConfig, mode: AccelerationMode) -> Self {
        let gpu_layers = if config.use_gpu && mode.is_accelerated() {
            config.gpu_layers
        } else {
            0
        };
        Self {
            gpu_layers,
            context_size: config.context_size,
            threads: config.threads,
        }
    }
}

pub struct VisionEngine {
    runtime: PathBuf,
    model: PathBuf,
    projector: Option<PathBuf>,
    settings: LaunchSettings,
    acceleration: AccelerationMode,
}

impl VisionEngine {
    /// Validate the model and runtime, then fix launch settings.
    ///
    /// A missing model creates its parent directory so the operator knows
    /// where to drop the weights.
    pub fn load(config: &OcrConfig, probe: &dyn AccelerationProbe) -> Result<Self, OcrError> {
        let model = config.model_path.clone();
        if !model.is_file() {
            if let Some(parent) = model.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            return Err(OcrError::ModelNotFound(model.display().to_string()));
        }
        validate_gguf(&model)?;

        if let Some(projector) = &config.projector_path {
            if !projector.is_file() {
                return Err(OcrError::ModelNotFound(projector.display().to_string()));
            }
        }

        check_runtime(&config.runtime_path)?;

        let acceleration = probe.detect();
        let settings = LaunchSettings::resolve(config, acceleration);
        info!(
            "✅ Vision OCR ready: {} ({}, gpu_layers={})",
            model.display(),
            acceleration,
            settings.gpu_layers
        );

        Ok(Self {
            runtime: config.runtime_path.clone(),
            model,
            projector: config.projector_path.clone(),
            settings,
            acceleration,
        })
    }

    pub fn acceleration(&self) -> AccelerationMode {
        self.acceleration
    }

    pub fn settings(&self) -> LaunchSettings {
        self.settings
    }

    fn command_args(&self, image: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["-m".into(), self.model.clone().into()];
        if let Some(projector) = &self.projector {
            args.push("--mmproj".into());
            args.push(projector.clone().into());
        }
        args.push("--image".into());
        args.push(image.into());
        for (flag, value) in [
            ("-p", EXTRACTION_PROMPT.to_string()),
            ("-n", MAX_TOKENS.to_string()),
            ("--temp", TEMPERATURE.to_string()),
            ("-ngl", self.settings.gpu_layers.to_string()),
            ("-c", self.settings.context_size.to_string()),
            ("-t", self.settings.threads.to_string()),
        ] {
            args.push(flag.into());
            args.push(value.into());
        }
        args
    }
}

impl TextRecognizer for VisionEngine {
    fn name(&self) -> &'static str {
        "vision"
    }

    fn recognize(&self, image: &DynamicImage) -> Result<String, OcrError> {
        // Dropped (and deleted) on every return path
        let mut frame = tempfile::Builder::new()
            .prefix("media_vault_ocr_")
            .suffix(".jpg")
            .tempfile()?;
        DynamicImage::ImageRgb8(image.to_rgb8()).write_to(frame.as_file_mut(), ImageFormat::Jpeg)?;

        debug!("Running {} on {}", self.runtime.display(), frame.path().display());
        let output = Command::new(&self.runtime)
            .args(self.command_args(frame.path()))
            .stdin(Stdio::null())
            .output()
            .map_err(|e| OcrError::NotAvailable(format!("{}: {}", self.runtime.display(), e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OcrError::Failed(stderr.trim().to_string()));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

fn validate_gguf(path: &Path) -> Result<(), OcrError> {
    let mut magic = [0u8; 4];
    File::open(path)?
        .read_exact(&mut magic)
        .map_err(|_| OcrError::InvalidModel(format!("{}: truncated", path.display())))?;
    if &magic != GGUF_MAGIC {
        return Err(OcrError::InvalidModel(format!("{}: not a GGUF file", path.display())));
    }
    Ok(())
}

fn check_runtime(runtime: &Path) -> Result<(), OcrError> {
    let status = Command::new(runtime)
        .arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map_err(|e| OcrError::NotAvailable(format!("{}: {}", runtime.display(), e)))?;
    if !status.success() {
        return Err(OcrError::NotAvailable(format!(
            "{} --version exited with {}",
            runtime.display(),
            status
        )));
    }
    Ok(())
}
