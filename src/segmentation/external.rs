//! Out-of-process segmentation over NIfTI files.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use super::{SegmentationBackendError, Segmenter, WatershedParams};
use crate::field::{read_labels, write_field, LabelVolume, VolumetricField};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Runs an external watershed tool.
///
/// The tool is invoked as
/// `program [args..] --input <nii> --output <nii> --radius R --tolerance T
/// --connectivity C --dams true|false`, must write an int32
/// (or float32) label volume to the output path, and is killed if it runs
/// longer than the timeout. Its stderr goes to `segmenter.log` in the work
/// directory.
#[derive(Debug, Clone)]
pub struct ExternalSegmenter {
    program: PathBuf,
    args: Vec<String>,
    work_dir: PathBuf,
    timeout: Duration,
}

impl ExternalSegmenter {
    pub fn new(program: impl Into<PathBuf>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            work_dir: work_dir.into(),
            timeout: Duration::from_secs(600),
        }
    }

    /// Arguments placed before the generated flags.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Segmenter for ExternalSegmenter {
    fn name(&self) -> &str {
        self.program
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("external")
    }

    fn segment(
        &self,
        image: &VolumetricField,
        params: &WatershedParams,
    ) -> Result<LabelVolume, SegmentationBackendError> {
        std::fs::create_dir_all(&self.work_dir)?;
        let input = self.work_dir.join("input.nii");
        let output = self.work_dir.join("output.nii");
        let log = self.work_dir.join("segmenter.log");

        if output.exists() {
            std::fs::remove_file(&output)?;
        }
        write_field(&input, image)?;
        let log_file = std::fs::File::create(&log)?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg("--input")
            .arg(&input)
            .arg("--output")
            .arg(&output)
            .arg("--radius")
            .arg(params.radius.to_string())
            .arg("--tolerance")
            .arg(params.tolerance.to_string())
            .arg("--connectivity")
            .arg(params.connectivity.as_u32().to_string())
            .arg("--dams")
            .arg(params.dams.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::from(log_file))
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => SegmentationBackendError::Missing {
                    program: self.program.display().to_string(),
                },
                _ => SegmentationBackendError::Io(e),
            })?;

        tracing::debug!(
            program = %self.program.display(),
            pid = child.id(),
            "Segmentation backend started"
        );

        let started = Instant::now();
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if started.elapsed() >= self.timeout {
                let _ = child.kill();
                let _ = child.wait();
                tracing::warn!(timeout = ?self.timeout, "Segmentation backend killed after timeout");
                return Err(SegmentationBackendError::Timeout {
                    timeout: self.timeout,
                });
            }
            std::thread::sleep(POLL_INTERVAL);
        };

        if !status.success() {
            return Err(SegmentationBackendError::Failed {
                code: status.code(),
                log,
            });
        }

        let labels = read_labels(&output)?;
        if labels.resolution() != image.resolution() {
            return Err(SegmentationBackendError::ResolutionMismatch {
                expected: image.resolution(),
                actual: labels.resolution(),
            });
        }
        Ok(labels)
    }
}
