//! Primary output packaging: image manifest and results archive

use crate::error::{Result, WorkerError};
use crate::models::{ImageGroup, ResultBundle};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Logical name of the stimulus image manifest
pub const IMAGE_MANIFEST_NAME: &str = "images.txt";
/// Filename of the primary predicted-volume output the engine must produce
pub const PREDICTION_VOLUME_NAME: &str = "prediction.mgz";
/// Filename of the packaged results archive
pub const RESULTS_ARCHIVE_NAME: &str = "results.tar.gz";

/// Packages the primary engine output into a results archive.
///
/// The image manifest reflects the caller-provided image ordering and
/// names, intentionally overwriting anything the engine itself wrote:
/// downstream consumers key visualizations by the caller's naming
/// convention, not the engine's internal indexing.
pub struct OutputPackager;

impl OutputPackager {
    pub fn new() -> Self {
        Self
    }

    /// Write the manifest and bundle it with the predicted volume into
    /// `results.tar.gz` inside the output directory. Returns the archive
    /// path.
    pub fn package(
        &self,
        bundle: &ResultBundle,
        image_group: &ImageGroup,
        output_dir: &Path,
    ) -> Result<PathBuf> {
        let manifest = self.write_image_manifest(image_group, output_dir)?;

        let prediction = output_dir.join(PREDICTION_VOLUME_NAME);
        if !prediction.is_file() {
            return Err(WorkerError::PackagingError {
                message: format!(
                    "expected primary output '{}' is absent from the output directory \
                     (engine exported {} file(s))",
                    PREDICTION_VOLUME_NAME,
                    bundle.exported_files.len()
                ),
            });
        }

        let archive_path = output_dir.join(RESULTS_ARCHIVE_NAME);
        let file = File::create(&archive_path).map_err(packaging_io)?;
        let encoder = GzEncoder::new(file, Compression::default());
        let mut builder = tar::Builder::new(encoder);
        builder
            .append_path_with_name(&prediction, PREDICTION_VOLUME_NAME)
            .map_err(packaging_io)?;
        builder
            .append_path_with_name(&manifest, IMAGE_MANIFEST_NAME)
            .map_err(packaging_io)?;
        builder
            .into_inner()
            .and_then(|encoder| encoder.finish())
            .map_err(packaging_io)?;

        tracing::info!(
            archive = %archive_path.display(),
            image_count = image_group.images.len(),
            "packaged results archive"
        );
        Ok(archive_path)
    }

    /// Write `images.txt`: one `folder + name` line per stimulus image, in
    /// the image group's original order
    pub fn write_image_manifest(
        &self,
        image_group: &ImageGroup,
        output_dir: &Path,
    ) -> Result<PathBuf> {
        let path = output_dir.join(IMAGE_MANIFEST_NAME);
        let mut file = File::create(&path).map_err(packaging_io)?;
        for image in &image_group.images {
            writeln!(file, "{}", image.manifest_entry()).map_err(packaging_io)?;
        }
        Ok(path)
    }
}

impl Default for OutputPackager {
    fn default() -> Self {
        Self::new()
    }
}

fn packaging_io(e: std::io::Error) -> WorkerError {
    WorkerError::PackagingError {
        message: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ImageRecord, ResponseMatrix};
    use flate2::read::GzDecoder;
    use std::collections::HashMap;

    fn test_group(count: usize) -> ImageGroup {
        ImageGroup {
            identifier: "imgs-1".to_string(),
            images: (0..count)
                .map(|i| ImageRecord {
                    identifier: format!("img-{}", i),
                    folder: "/stimuli/".to_string(),
                    name: format!("validate_{:04}.png", i),
                    path: PathBuf::from(format!("/data/validate_{:04}.png", i)),
                })
                .collect(),
            options: HashMap::new(),
        }
    }

    fn test_bundle() -> ResultBundle {
        ResultBundle {
            prediction: ResponseMatrix::default(),
            cortex_locations: Vec::new(),
            functional: None,
            max_eccentricity: 10.0,
            exported_files: vec![PathBuf::from(PREDICTION_VOLUME_NAME)],
        }
    }

    #[test]
    fn test_manifest_lines_match_image_group() {
        let dir = tempfile::tempdir().unwrap();
        let group = test_group(5);
        let path = OutputPackager::new()
            .write_image_manifest(&group, dir.path())
            .unwrap();

        let content = std::fs::read_to_string(path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[0], "/stimuli/validate_0000.png");
        assert_eq!(lines[4], "/stimuli/validate_0004.png");
    }

    #[test]
    fn test_manifest_overwrites_engine_output() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(IMAGE_MANIFEST_NAME), "engine-internal-0\n").unwrap();

        let group = test_group(2);
        let path = OutputPackager::new()
            .write_image_manifest(&group, dir.path())
            .unwrap();

        let content = std::fs::read_to_string(path).unwrap();
        assert!(!content.contains("engine-internal-0"));
        assert_eq!(content.lines().count(), 2);
    }

    #[test]
    fn test_missing_prediction_volume_is_packaging_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = OutputPackager::new()
            .package(&test_bundle(), &test_group(3), dir.path())
            .unwrap_err();
        assert_eq!(err.error_type(), "packaging_error");
    }

    #[test]
    fn test_archive_contains_prediction_and_manifest() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(PREDICTION_VOLUME_NAME), b"volume-bytes").unwrap();

        let archive = OutputPackager::new()
            .package(&test_bundle(), &test_group(3), dir.path())
            .unwrap();

        let file = File::open(archive).unwrap();
        let mut tar = tar::Archive::new(GzDecoder::new(file));
        let names: Vec<String> = tar
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().display().to_string())
            .collect();
        assert_eq!(names, vec![PREDICTION_VOLUME_NAME, IMAGE_MANIFEST_NAME]);
    }
}
