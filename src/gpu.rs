//! GPU Acceleration Detection
//!
//! Decides whether the vision OCR runtime may offload layers to a GPU.
//!
//! ## Detection Cascade
//!
//! 1. **NVIDIA** (`nvidia-smi`) - CUDA build of the runtime
//! 2. **AMD** (`rocm-smi`) - ROCm/HIP build of the runtime
//! 3. **CPU** - Always available
//!
//! Each vendor tool gets a short timeout; a hung driver must not stall startup.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Timeout applied to each vendor detection tool
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Acceleration backend available to the vision runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccelerationMode {
    /// NVIDIA vendor runtime
    #[serde(rename = "gpu-a")]
    Cuda,
    /// AMD vendor runtime
    #[serde(rename = "gpu-b")]
    Rocm,
    #[serde(rename = "cpu")]
    Cpu,
}

impl AccelerationMode {
    pub fn is_accelerated(&self) -> bool {
        !matches!(self, AccelerationMode::Cpu)
    }

    /// Short label used in status reports
    pub fn label(&self) -> &'static str {
        match self {
            AccelerationMode::Cuda => "gpu-a",
            AccelerationMode::Rocm => "gpu-b",
            AccelerationMode::Cpu => "cpu",
        }
    }
}

impl fmt::Display for AccelerationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Source of the acceleration decision
pub trait AccelerationProbe: Send + Sync {
    fn detect(&self) -> AccelerationMode;
}

/// Probes the host by running vendor tools
pub struct SystemProbe {
    timeout: Duration,
}

impl SystemProbe {
    pub fn new() -> Self {
        Self { timeout: PROBE_TIMEOUT }
    }
}

impl Default for SystemProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl AccelerationProbe for SystemProbe {
    fn detect(&self) -> AccelerationMode {
        let mode = if tool_succeeds("nvidia-smi", self.timeout) {
            AccelerationMode::Cuda
        } else if tool_succeeds("rocm-smi", self.timeout) {
            AccelerationMode::Rocm
        } else {
            AccelerationMode::Cpu
        };
        info!("🔧 Acceleration probe: {}", mode);
        mode
    }
}

/// Fixed answer, for tests and forced CPU runs
pub struct FixedProbe(pub AccelerationMode);

impl AccelerationProbe for FixedProbe {
    fn detect(&self) -> AccelerationMode {
        self.0
    }
}

/// Run `program` and report whether it exited successfully within `timeout`.
/// Missing binaries and timeouts both count as failure.
pub(crate) fn tool_succeeds(program: &str, timeout: Duration) -> bool {
    let mut child = match Command::new(program)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            debug!("{} not runnable: {}", program, e);
            return false;
        }
    };

    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return status.success(),
            Ok(None) if Instant::now() >= deadline => {
                debug!("{} timed out after {:?}", program, timeout);
                let _ = child.kill();
                let _ = child.wait();
                return false;
            }
            Ok(None) => thread::sleep(Duration::from_millis(20)),
            Err(e) => {
                debug!("{} wait failed: {}", program, e);
                return false;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels() {
        assert_eq!(AccelerationMode::Cuda.label(), "gpu-a");
        assert_eq!(AccelerationMode::Rocm.label(), "gpu-b");
        assert_eq!(AccelerationMode::Cpu.to_string(), "cpu");
        assert!(AccelerationMode::Rocm.is_accelerated());
        assert!(!AccelerationMode::Cpu.is_accelerated());
    }

    #[test]
    fn test_serialized_as_label() {
        for mode in [AccelerationMode::Cuda, AccelerationMode::Rocm, AccelerationMode::Cpu] {
            let json = serde_json::to_string(&mode).unwrap();
            assert_eq!(json, format!("\"{}\"", mode.label()));
            assert_eq!(serde_json::from_str::<AccelerationMode>(&json).unwrap(), mode);
        }
    }

    #[test]
    fn test_fixed_probe() {
        assert_eq!(FixedProbe(AccelerationMode::Cuda).detect(), AccelerationMode::Cuda);
    }

    #[test]
    fn test_missing_tool_fails() {
        assert!(!tool_succeeds("definitely-not-a-gpu-tool-xyz", PROBE_TIMEOUT));
    }

    #[cfg(unix)]
    #[test]
    fn test_hung_tool_times_out() {
        let started = Instant::now();
        // `yes` never exits on its own
        assert!(!tool_succeeds("yes", Duration::from_millis(200)));
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
