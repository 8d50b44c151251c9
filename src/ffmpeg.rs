//! FFmpeg command wrapper utilities

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FfmpegError {
    #[error("FFmpeg not found: {0}")]
    NotInstalled(String),

    #[error("FFmpeg execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Invalid output: {0}")]
    InvalidOutput(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub struct FfmpegCommand {
    program: PathBuf,
    args: Vec<OsString>,
}

impl FfmpegCommand {
    pub fn new() -> Self {
        Self::with_program("ffmpeg")
    }

    /// Use a specific ffmpeg binary instead of the one on PATH
    pub fn with_program(program: impl AsRef<Path>) -> Self {
        Self {
            program: program.as_ref().to_path_buf(),
            args: vec!["-hide_banner".into(), "-loglevel".into(), "error".into()],
        }
    }

    /// Seek to `seconds` before opening the next input (fast, timestamp based)
    pub fn seek(mut self, seconds: f64) -> Self {
        self.args.push("-ss".into());
        self.args.push(format!("{:.3}", seconds).into());
        self
    }

    /// The path is passed through unchanged, whatever its encoding
    pub fn input(mut self, path: impl AsRef<Path>) -> Self {
        self.args.push("-i".into());
        self.args.push(path.as_ref().as_os_str().to_os_string());
        self
    }

    pub fn args(mut self, args: &[&str]) -> Self {
        self.args.extend(args.iter().map(OsString::from));
        self
    }

    /// Emit exactly one PNG-encoded frame on stdout
    pub fn single_png_frame(self) -> Self {
        self.args(&["-frames:v", "1", "-f", "image2pipe", "-vcodec", "png", "-"])
    }

    pub fn execute(self) -> Result<Output, FfmpegError> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .output()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    FfmpegError::NotInstalled(self.program.display().to_string())
                }
                _ => FfmpegError::ExecutionFailed(e.to_string()),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(FfmpegError::ExecutionFailed(stderr.trim().to_string()));
        }

        Ok(output)
    }

    /// Run and return stdout, failing when ffmpeg produced nothing
    pub fn execute_to_bytes(self) -> Result<Vec<u8>, FfmpegError> {
        let output = self.execute()?;
        if output.stdout.is_empty() {
            return Err(FfmpegError::InvalidOutput("no frame decoded".to_string()));
        }
        Ok(output.stdout)
    }

    #[cfg(test)]
    fn arg_list(&self) -> &[OsString] {
        &self.args
    }
}

impl Default for FfmpegCommand {
    fn default() -> Self {
        Self::new()
    }
}

/// Check whether the given ffmpeg binary answers `-version`
pub fn is_ffmpeg_installed(program: impl AsRef<Path>) -> bool {
    Command::new(program.as_ref())
        .arg("-version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seek_precedes_input() {
        let cmd = FfmpegCommand::new().seek(5.0).input("clip.mp4").single_png_frame();
        let args = cmd.arg_list();
        let ss = args.iter().position(|a| a == "-ss").unwrap();
        let i = args.iter().position(|a| a == "-i").unwrap();
        assert!(ss < i, "seek must come before the input for timestamp seeking");
        assert_eq!(args[ss + 1], "5.000");
        assert_eq!(args.last().and_then(|a| a.to_str()), Some("-"));
    }

    #[cfg(unix)]
    #[test]
    fn test_input_keeps_raw_bytes() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let name = OsStr::from_bytes(b"/videos/caf\xe9.mp4");
        let cmd = FfmpegCommand::new().input(Path::new(name));
        let args = cmd.arg_list();
        let i = args.iter().position(|a| a == "-i").unwrap();
        assert_eq!(args[i + 1].as_bytes(), b"/videos/caf\xe9.mp4");
    }

    #[test]
    fn test_missing_binary_reports_not_installed() {
        let err = FfmpegCommand::with_program("/nonexistent/ffmpeg-binary")
            .input("clip.mp4")
            .execute()
            .unwrap_err();
        assert!(matches!(err, FfmpegError::NotInstalled(_)));
        assert!(!is_ffmpeg_installed("/nonexistent/ffmpeg-binary"));
    }
}
