//! Tesseract CLI fallback, fed PNG bytes over stdin

use image::{DynamicImage, ImageFormat};
use std::io::{Cursor, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::info;

use super::{OcrError, TextRecognizer};

pub struct TesseractEngine {
    binary: PathBuf,
}

impl TesseractEngine {
    /// Confirm the binary answers `--version`; `None` searches PATH
    pub fn probe(binary: Option<&Path>) -> Result<Self, OcrError> {
        let binary = binary.map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("tesseract"));
        let output = Command::new(&binary)
            .arg("--version")
            .stdin(Stdio::null())
            .output()
            .map_err(|e| OcrError::NotAvailable(format!("{}: {}", binary.display(), e)))?;
        if !output.status.success() {
            return Err(OcrError::NotAvailable(format!(
                "{} --version exited with {}",
                binary.display(),
                output.status
            )));
        }

        // Older releases print the banner on stderr
        let banner = if output.stdout.is_empty() { &output.stderr } else { &output.stdout };
        let version = String::from_utf8_lossy(banner);
        info!("✅ Tesseract ready: {}", version.lines().next().unwrap_or("unknown version"));
        Ok(Self { binary })
    }
}

impl TextRecognizer for TesseractEngine {
    fn name(&self) -> &'static str {
        "tesseract"
    }

    fn recognize(&self, image: &DynamicImage) -> Result<String, OcrError> {
        let mut png = Cursor::new(Vec::new());
        image.write_to(&mut png, ImageFormat::Png)?;

        let mut child = Command::new(&self.binary)
            .args(["stdin", "stdout"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| OcrError::NotAvailable(format!("{}: {}", self.binary.display(), e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            match stdin.write_all(png.get_ref()) {
                Ok(()) => {}
                // Exit status decides the outcome
                Err(e) if e.kind() == ErrorKind::BrokenPipe => {}
                Err(e) => return Err(e.into()),
            }
        }

        let output = child.wait_with_output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OcrError::Failed(stderr.trim().to_string()));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_binary() {
        let result = TesseractEngine::probe(Some(Path::new("/nonexistent/tesseract")));
        assert!(matches!(result, Err(OcrError::NotAvailable(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_reads_stdin_and_trims() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("tesseract");
        std::fs::write(
            &bin,
            "#!/bin/sh\n\
             if [ \"$1\" = \"--version\" ]; then echo 'tesseract 5.3.0'; exit 0; fi\n\
             bytes=$(wc -c)\n\
             echo \" read $bytes \"\n",
        )
        .unwrap();
        std::fs::set_permissions(&bin, std::fs::Permissions::from_mode(0o755)).unwrap();

        let engine = TesseractEngine::probe(Some(&bin)).unwrap();
        let text = engine.recognize(&DynamicImage::new_rgb8(10, 10)).unwrap();
        assert!(text.starts_with("read "), "got {:?}", text);
        let bytes: usize = text.trim_start_matches("read ").trim().parse().unwrap();
        assert!(bytes > 8);
    }
}
