//! Boundary to the trained classifiers.
//!
//! Each condition has one [`Scorer`] that turns features into the probability of
//! the positive (disease) class. Models are exported as JSON logistic models:
//! standardised inputs, one coefficient per input and an intercept. The x-ray
//! model consumes a mean-pooled grid over the preprocessed 224x224 grayscale image.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use image::imageops::FilterType;
use serde::Deserialize;

use crate::error::TriageError;
use crate::models::{Condition, Features};

pub const IMAGE_SIDE: u32 = 224;

pub trait Scorer: Send + Sync {
    fn score(&self, features: &Features) -> Result<f64, TriageError>;
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogisticModel {
    pub coefficients: Vec<f64>,
    pub intercept: f64,
    #[serde(default)]
    pub scaler_mean: Vec<f64>,
    #[serde(default)]
    pub scaler_scale: Vec<f64>,
}

impl LogisticModel {
    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read model {}", path.display()))?;
        let model: LogisticModel = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse model {}", path.display()))?;
        model.validate()?;
        Ok(model)
    }

    fn validate(&self) -> anyhow::Result<()> {
        let width = self.coefficients.len();
        anyhow::ensure!(width > 0, "model has no coefficients");
        anyhow::ensure!(
            self.scaler_mean.is_empty() || self.scaler_mean.len() == width,
            "scaler_mean has {} entries, expected {width}",
            self.scaler_mean.len()
        );
        anyhow::ensure!(
            self.scaler_scale.is_empty() || self.scaler_scale.len() == width,
            "scaler_scale has {} entries, expected {width}",
            self.scaler_scale.len()
        );
        anyhow::ensure!(
            self.scaler_scale.iter().all(|scale| *scale != 0.0),
            "scaler_scale contains a zero"
        );
        Ok(())
    }

    pub fn probability(&self, values: &[f64]) -> Result<f64, TriageError> {
        if values.len() != self.coefficients.len() {
            return Err(TriageError::Scoring(format!(
                "expected {} features, got {}",
                self.coefficients.len(),
                values.len()
            )));
        }

        let logit = values
            .iter()
            .enumerate()
            .map(|(i, value)| {
                let mean = self.scaler_mean.get(i).copied().unwrap_or(0.0);
                let scale = self.scaler_scale.get(i).copied().unwrap_or(1.0);
                self.coefficients[i] * (value - mean) / scale
            })
            .sum::<f64>()
            + self.intercept;

        Ok(1.0 / (1.0 + (-logit).exp()))
    }
}

pub struct TabularScorer {
    model: LogisticModel,
}

impl TabularScorer {
    pub fn new(model: LogisticModel) -> Self {
        Self { model }
    }
}

impl Scorer for TabularScorer {
    fn score(&self, features: &Features) -> Result<f64, TriageError> {
        match features {
            Features::Tabular(values) => self.model.probability(values),
            Features::Image(_) => Err(TriageError::Scoring(
                "tabular model cannot score an image".to_string(),
            )),
        }
    }
}

pub struct XrayScorer {
    model: LogisticModel,
    grid: u32,
}

impl XrayScorer {
    pub fn new(model: LogisticModel) -> anyhow::Result<Self> {
        let cells = model.coefficients.len();
        let grid = (cells as f64).sqrt().round() as u32;
        anyhow::ensure!(
            grid > 0 && (grid * grid) as usize == cells && IMAGE_SIDE % grid == 0,
            "x-ray model needs a square pooling grid dividing {IMAGE_SIDE}, got {cells} coefficients"
        );
        Ok(Self { model, grid })
    }
}

impl Scorer for XrayScorer {
    fn score(&self, features: &Features) -> Result<f64, TriageError> {
        match features {
            Features::Image(bytes) => {
                let pooled = pooled_intensities(bytes, self.grid)?;
                self.model.probability(&pooled)
            }
            Features::Tabular(_) => Err(TriageError::Scoring(
                "x-ray model needs an image".to_string(),
            )),
        }
    }
}

/// Decodes an upload, converts it to grayscale, resizes it to 224x224, scales
/// pixels to [0, 1] and averages them over a `grid` x `grid` layout.
pub fn pooled_intensities(bytes: &[u8], grid: u32) -> Result<Vec<f64>, TriageError> {
    let decoded = image::load_from_memory(bytes)
        .map_err(|_| TriageError::BadInput("Cannot decode image".to_string()))?;
    let gray = decoded
        .resize_exact(IMAGE_SIDE, IMAGE_SIDE, FilterType::Triangle)
        .to_luma8();

    let cell = IMAGE_SIDE / grid;
    let mut pooled = vec![0.0; (grid * grid) as usize];
    for (x, y, pixel) in gray.enumerate_pixels() {
        let index = ((y / cell) * grid + x / cell) as usize;
        pooled[index] += pixel[0] as f64 / 255.0;
    }

    let per_cell = (cell * cell) as f64;
    for value in pooled.iter_mut() {
        *value /= per_cell;
    }
    Ok(pooled)
}

/// Scorers available to the pipeline, keyed by condition.
#[derive(Clone, Default)]
pub struct ModelRegistry {
    scorers: HashMap<Condition, Arc<dyn Scorer>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads `<condition>_model.json` for every condition found in `dir`.
    ///
    /// A model that fails to load is logged and left out; requests for that
    /// condition are refused later with `ModelUnavailable`.
    pub fn load(dir: &Path) -> Self {
        let mut registry = Self::new();

        for condition in Condition::ALL {
            let path = model_path(dir, condition);
            match load_scorer(condition, &path) {
                Ok(scorer) => {
                    tracing::info!(%condition, path = %path.display(), "loaded model");
                    registry.scorers.insert(condition, scorer);
                }
                Err(err) => {
                    tracing::warn!(%condition, "{} model load failed: {err:#}", condition.display_name());
                }
            }
        }

        registry
    }

    pub fn get(&self, condition: Condition) -> Result<Arc<dyn Scorer>, TriageError> {
        self.scorers
            .get(&condition)
            .cloned()
            .ok_or(TriageError::ModelUnavailable(condition))
    }

    pub fn is_loaded(&self, condition: Condition) -> bool {
        self.scorers.contains_key(&condition)
    }
}

pub fn model_path(dir: &Path, condition: Condition) -> PathBuf {
    dir.join(format!("{}_model.json", condition.as_str()))
}

fn load_scorer(condition: Condition, path: &Path) -> anyhow::Result<Arc<dyn Scorer>> {
    let model = LogisticModel::from_path(path)?;

    Ok(match condition {
        Condition::Xray => Arc::new(XrayScorer::new(model)?),
        Condition::Diabetes | Condition::Heart | Condition::Cancer => {
            let expected = condition.feature_names().len();
            anyhow::ensure!(
                model.coefficients.len() == expected,
                "{condition} model has {} coefficients, expected {expected}",
                model.coefficients.len()
            );
            Arc::new(TabularScorer::new(model))
        }
    })
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn png(width: u32, height: u32, shade: u8) -> Vec<u8> {
        let img = image::GrayImage::from_pixel(width, height, image::Luma([shade]));
        let mut bytes = Vec::new();
        image::DynamicImage::ImageLuma8(img)
            .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn logistic_model_applies_scaler() {
        let model = LogisticModel {
            coefficients: vec![2.0],
            intercept: 0.0,
            scaler_mean: vec![10.0],
            scaler_scale: vec![5.0],
        };
        let at_mean = model.probability(&[10.0]).unwrap();
        assert!((at_mean - 0.5).abs() < 1e-12);
        assert!(model.probability(&[20.0]).unwrap() > 0.9);
        assert!(matches!(
            model.probability(&[1.0, 2.0]),
            Err(TriageError::Scoring(_))
        ));
    }

    #[test]
    fn pooling_averages_uniform_image() {
        let pooled = pooled_intensities(&png(64, 48, 255), 4).unwrap();
        assert_eq!(pooled.len(), 16);
        assert!(pooled.iter().all(|value| (value - 1.0).abs() < 1e-9));
    }

    #[test]
    fn garbage_bytes_are_bad_input() {
        let err = pooled_intensities(b"not an image", 4).unwrap_err();
        assert!(err.is_input_error());
    }

    #[test]
    fn xray_scorer_rejects_non_square_grid() {
        let model = LogisticModel {
            coefficients: vec![0.1; 10],
            intercept: 0.0,
            scaler_mean: Vec::new(),
            scaler_scale: Vec::new(),
        };
        assert!(XrayScorer::new(model).is_err());
    }

    #[test]
    fn registry_loads_models_from_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            model_path(dir.path(), Condition::Cancer),
            r#"{"coefficients":[0.1,0.1,0.1,0.1,0.1],"intercept":-0.5}"#,
        )
        .unwrap();
        std::fs::write(
            model_path(dir.path(), Condition::Heart),
            r#"{"coefficients":[1.0],"intercept":0.0}"#,
        )
        .unwrap();

        let registry = ModelRegistry::load(dir.path());
        assert!(registry.is_loaded(Condition::Cancer));
        assert!(!registry.is_loaded(Condition::Heart));
        assert!(matches!(
            registry.get(Condition::Diabetes),
            Err(TriageError::ModelUnavailable(Condition::Diabetes))
        ));

        let scorer = registry.get(Condition::Cancer).unwrap();
        let probability = scorer
            .score(&Features::Tabular(vec![1.0, 1.0, 1.0, 1.0, 1.0]))
            .unwrap();
        assert!((probability - 0.5).abs() < 1e-9);
    }
}
