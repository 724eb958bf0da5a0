use std::borrow::Cow;
use std::error::Error;
use std::fs;
use std::path::Path;

use log::debug;
use ndarray::Array3;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uviscore::cube::{ImageCube, Observation, QualityMask};

use crate::data::utility::{is_compressed_path, zstd_compress, zstd_decompress};

/// One image sample on disk.
///
/// JSON has no literal for NaN or infinities, those are written as strings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
enum Sample {
    Finite(f64),
    NonFinite(Cow<'static, str>),
}

impl Sample {
    fn encode(value: f64) -> Self {
        if value.is_finite() {
            Sample::Finite(value)
        } else if value.is_nan() {
            Sample::NonFinite(Cow::Borrowed("NaN"))
        } else if value > 0.0 {
            Sample::NonFinite(Cow::Borrowed("inf"))
        } else {
            Sample::NonFinite(Cow::Borrowed("-inf"))
        }
    }

    fn decode(&self) -> Result<f64, String> {
        match self {
            Sample::Finite(value) => Ok(*value),
            Sample::NonFinite(text) => match text.as_ref() {
                "NaN" | "nan" => Ok(f64::NAN),
                "inf" | "+inf" | "Infinity" => Ok(f64::INFINITY),
                "-inf" | "-Infinity" => Ok(f64::NEG_INFINITY),
                other => Err(format!("invalid image sample '{}'", other)),
            },
        }
    }
}

/// Serializes an image cube with non-finite samples spelled out
struct Samples<'a>(&'a ImageCube);

impl Serialize for Samples<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.mapv(Sample::encode).serialize(serializer)
    }
}

fn deserialize_samples<'de, D: Deserializer<'de>>(deserializer: D) -> Result<ImageCube, D::Error> {
    let samples = Array3::<Sample>::deserialize(deserializer)?;
    let mut images = ImageCube::zeros(samples.raw_dim());
    for (value, sample) in images.iter_mut().zip(samples.iter()) {
        *value = sample.decode().map_err(D::Error::custom)?;
    }
    Ok(images)
}

#[derive(Deserialize)]
struct ObservationDocument {
    #[serde(deserialize_with = "deserialize_samples")]
    images: ImageCube,
    data_quality: QualityMask,
    #[serde(default)]
    exposure_times: Vec<f64>,
}

#[derive(Serialize)]
struct ObservationDocumentRef<'a> {
    images: Samples<'a>,
    data_quality: &'a QualityMask,
    exposure_times: &'a [f64],
}

/// Reads an observation from a JSON file, decompressing it first if the path ends in `.zst`
///
/// # Arguments
///
/// * `path` - observation file
///
/// # Returns
///
/// * `Observation` - images and data quality, checked to share the same non-empty shape
///
pub fn read_observation(path: &Path) -> Result<Observation, Box<dyn Error>> {
    let raw = fs::read(path)?;
    let bytes = if is_compressed_path(path) {
        zstd_decompress(&raw)?
    } else {
        raw
    };

    let document: ObservationDocument = serde_json::from_slice(&bytes)?;
    let obs = Observation {
        images: document.images,
        data_quality: document.data_quality,
        exposure_times: document.exposure_times,
    };
    let shape = obs.validate()?;
    debug!(
        "read observation {} with {} frames of {}x{}",
        path.display(),
        shape.frames,
        shape.rows,
        shape.cols
    );
    Ok(obs)
}

/// Writes an observation as JSON, zstd compressed if the path ends in `.zst`
///
/// # Arguments
///
/// * `path` - destination file, parent directories are created
/// * `obs` - observation to persist
/// * `compression_level` - zstd level, ignored for plain JSON
///
pub fn write_observation(
    path: &Path,
    obs: &Observation,
    compression_level: i32,
) -> Result<(), Box<dyn Error>> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_vec(&ObservationDocumentRef {
        images: Samples(&obs.images),
        data_quality: &obs.data_quality,
        exposure_times: &obs.exposure_times,
    })?;
    let bytes = if is_compressed_path(path) {
        zstd_compress(&json, compression_level)?
    } else {
        json
    };

    fs::write(path, &bytes)?;
    debug!("wrote {} bytes to {}", bytes.len(), path.display());
    Ok(())
}

/// Quick-look numbers for an observation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ObservationSummary {
    pub frames: usize,
    pub rows: usize,
    pub cols: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub flagged_samples: usize,
    /// pixels whose whole time series sums to zero
    pub dark_pixels: usize,
    pub total_exposure_time: f64,
}

impl ObservationSummary {
    pub fn new(obs: &Observation) -> Self {
        let shape = obs.shape();
        let (min, max) = obs
            .images
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
        let mean = obs.images.mean().unwrap_or(f64::NAN);
        let dark_pixels = obs
            .images
            .sum_axis(ndarray::Axis(0))
            .iter()
            .filter(|&&total| total == 0.0)
            .count();

        ObservationSummary {
            frames: shape.frames,
            rows: shape.rows,
            cols: shape.cols,
            min,
            max,
            mean,
            flagged_samples: obs.flagged_samples(),
            dark_pixels,
            total_exposure_time: obs.exposure_times.iter().sum(),
        }
    }

    pub fn summary(&self) -> String {
        let samples = self.frames * self.rows * self.cols;
        let pct = if samples > 0 {
            (self.flagged_samples as f64 / samples as f64) * 100.0
        } else {
            0.0
        };

        format!(
            "Observation: {} frames of {}x{} pixels\n\
             - intensity range: {:.3} .. {:.3} (mean {:.3})\n\
             - flagged samples: {} ({:.3}%)\n\
             - pixels outside subarray: {}\n\
             - total exposure time: {:.3}",
            self.frames,
            self.rows,
            self.cols,
            self.min,
            self.max,
            self.mean,
            self.flagged_samples,
            pct,
            self.dark_pixels,
            self.total_exposure_time,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_finite_samples_survive_json() {
        let mut images = ImageCube::from_elem((2, 1, 2), 1.5);
        images[[0, 0, 0]] = f64::NAN;
        images[[0, 0, 1]] = f64::INFINITY;
        images[[1, 0, 0]] = f64::NEG_INFINITY;

        let json = serde_json::to_string(&Samples(&images)).unwrap();
        assert!(json.contains("\"NaN\""));
        assert!(json.contains("\"-inf\""));

        let mut deserializer = serde_json::Deserializer::from_str(&json);
        let decoded = deserialize_samples(&mut deserializer).unwrap();
        assert!(decoded[[0, 0, 0]].is_nan());
        assert_eq!(decoded[[0, 0, 1]], f64::INFINITY);
        assert_eq!(decoded[[1, 0, 0]], f64::NEG_INFINITY);
        assert_eq!(decoded[[1, 0, 1]], 1.5);
    }

    #[test]
    fn test_unknown_sample_text_is_rejected() {
        assert!(Sample::NonFinite(Cow::Borrowed("lots")).decode().is_err());
        assert_eq!(Sample::Finite(2.0).decode(), Ok(2.0));
    }

    #[test]
    fn test_summary_counts() {
        let mut images = ImageCube::from_elem((2, 2, 2), 4.0);
        images[[0, 0, 0]] = 0.0;
        images[[1, 0, 0]] = 0.0;
        let mut data_quality = QualityMask::zeros((2, 2, 2));
        data_quality[[1, 1, 1]] = 1;
        let obs = Observation::new(images, data_quality)
            .unwrap()
            .with_exposure_times(vec![1.5, 2.5]);

        let summary = ObservationSummary::new(&obs);
        assert_eq!(summary.min, 0.0);
        assert_eq!(summary.max, 4.0);
        assert_eq!(summary.mean, 3.0);
        assert_eq!(summary.flagged_samples, 1);
        assert_eq!(summary.dark_pixels, 1);
        assert_eq!(summary.total_exposure_time, 4.0);
        assert!(summary.summary().contains("2 frames of 2x2"));
    }
}
