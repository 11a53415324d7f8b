//! Image classification with an exported Teachable Machine model.
//!
//! The model is an ONNX export of the image project, taking a single NHWC `[1, S, S, 3]` input
//! normalized to `[-1, 1]` and returning one probability per category. `metadata.json` next to
//! it names the categories and the input size `S`.
use std::{
    future::Future,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use image::{imageops, RgbImage};
use reqwest::Client;
use serde::Deserialize;
use tract_onnx::prelude::*;

use crate::{hashed, utils::download_file};

type NnModel = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Base URL of the bundled image project.
pub const DEFAULT_MODEL_URL: &str = "https://teachablemachine.withgoogle.com/models/8oyQv2ekf/";

/// Probability of one category for one frame.
#[derive(Clone, Debug, PartialEq)]
pub struct Prediction {
    pub class_name: String,
    pub probability: f32,
}

pub trait Classifier {
    /// Number of categories, known once the metadata is loaded.
    fn total_classes(&self) -> usize;

    /// Classify one frame. Returns one prediction per category, in category order.
    fn predict(&self, frame: &RgbImage) -> Result<Vec<Prediction>>;
}

/// Something that can produce a ready-to-run classifier.
pub trait ModelLoader {
    type Model: Classifier + Send + Sync + 'static;

    fn load(&self) -> impl Future<Output = Result<Self::Model>> + Send;
}

/// Contents of `metadata.json`.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Metadata {
    pub labels: Vec<String>,
    #[serde(rename = "imageSize", default = "default_image_size")]
    pub image_size: u32,
    #[serde(rename = "modelName", default)]
    pub model_name: Option<String>,
    #[serde(rename = "tmVersion", default)]
    pub tm_version: Option<String>,
}

fn default_image_size() -> u32 {
    224
}

impl Metadata {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
        let metadata: Metadata = serde_json::from_slice(&raw)
            .with_context(|| format!("invalid model metadata in {}", path.display()))?;
        if metadata.labels.is_empty() {
            bail!("model metadata in {} lists no categories", path.display());
        }

        Ok(metadata)
    }
}

/// Runnable classification model with its category names.
pub struct TmModel {
    model: NnModel,
    metadata: Metadata,
}

impl TmModel {
    pub fn from_files(model_path: impl AsRef<Path>, metadata_path: impl AsRef<Path>) -> Result<Self> {
        let metadata = Metadata::from_path(metadata_path)?;
        let model = get_tm_model(model_path.as_ref(), metadata.image_size)?;
        log::info!(
            "Loaded model {} with {} categories",
            metadata.model_name.as_deref().unwrap_or("<unnamed>"),
            metadata.labels.len()
        );

        Ok(Self { model, metadata })
    }
}

impl Classifier for TmModel {
    fn total_classes(&self) -> usize {
        self.metadata.labels.len()
    }

    fn predict(&self, frame: &RgbImage) -> Result<Vec<Prediction>> {
        let input = preproc(frame, self.metadata.image_size);
        let raw_nn_out = self.model.run(tvec!(input.into()))?;
        let probabilities: Vec<f32> = raw_nn_out[0].to_array_view::<f32>()?.iter().copied().collect();

        label_probabilities(&self.metadata.labels, &probabilities)
    }
}

fn get_tm_model(path: &Path, image_size: u32) -> Result<NnModel> {
    let size = image_size as usize;
    let input_fact = InferenceFact::dt_shape(f32::datum_type(), tvec!(1, size, size, 3));
    let model = tract_onnx::onnx()
        .model_for_path(path)
        .with_context(|| format!("failed to parse model {}", path.display()))?
        .with_input_fact(0, input_fact)?
        .into_optimized()?
        .into_runnable()?;

    Ok(model)
}

/// Center-crop the frame to a square, resize it to `size` and normalize to `[-1, 1]`.
pub fn preproc(frame: &RgbImage, size: u32) -> Tensor {
    let side = frame.width().min(frame.height());
    let x = (frame.width() - side) / 2;
    let y = (frame.height() - side) / 2;
    let cropped = imageops::crop_imm(frame, x, y, side, side).to_image();
    let resized: RgbImage =
        imageops::resize(&cropped, size, size, imageops::FilterType::Triangle);

    tract_ndarray::Array4::from_shape_fn(
        (1, size as usize, size as usize, 3),
        |(_, y, x, c)| resized[(x as _, y as _)][c] as f32 / 127.5 - 1.0,
    )
    .into()
}

/// Pair raw model outputs with their category names.
pub fn label_probabilities(labels: &[String], probabilities: &[f32]) -> Result<Vec<Prediction>> {
    if labels.len() != probabilities.len() {
        bail!(
            "model returned {} probabilities for {} categories",
            probabilities.len(),
            labels.len()
        );
    }

    Ok(labels
        .iter()
        .zip(probabilities)
        .map(|(class_name, probability)| Prediction {
            class_name: class_name.clone(),
            probability: *probability,
        })
        .collect())
}

/// Where the model definition and its metadata are fetched from.
#[derive(Clone, Debug, PartialEq)]
pub struct ModelSource {
    pub base_url: String,
    pub model_file: String,
    pub metadata_file: String,
}

impl Default for ModelSource {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_MODEL_URL.into(),
            model_file: "model.onnx".into(),
            metadata_file: "metadata.json".into(),
        }
    }
}

impl ModelSource {
    pub fn model_url(&self) -> String {
        join_url(&self.base_url, &self.model_file)
    }

    pub fn metadata_url(&self) -> String {
        join_url(&self.base_url, &self.metadata_file)
    }
}

fn join_url(base: &str, file: &str) -> String {
    match base.ends_with('/') {
        true => format!("{base}{file}"),
        false => format!("{base}/{file}"),
    }
}

/// Fetches the model files over HTTP on every load and keeps the latest copy on disk.
pub struct RemoteModelLoader {
    client: Client,
    source: ModelSource,
    cache_dir: PathBuf,
}

impl RemoteModelLoader {
    pub fn new(source: ModelSource, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            client: Client::new(),
            source,
            cache_dir: cache_dir.into(),
        }
    }

    /// Cache directory of this model source.
    pub fn model_dir(&self) -> PathBuf {
        self.cache_dir
            .join(format!("{:016x}", hashed(&self.source.base_url)))
    }
}

impl ModelLoader for RemoteModelLoader {
    type Model = TmModel;

    fn load(&self) -> impl Future<Output = Result<TmModel>> + Send {
        let model_dir = self.model_dir();
        let model_path = model_dir.join(&self.source.model_file);
        let metadata_path = model_dir.join(&self.source.metadata_file);
        let model_url = self.source.model_url();
        let metadata_url = self.source.metadata_url();
        let client = self.client.clone();

        async move {
            std::fs::create_dir_all(&model_dir)
                .with_context(|| format!("failed to create {}", model_dir.display()))?;

            log::info!("Fetching model from {model_url}");
            download_file(&client, &model_url, &model_path).await?;
            download_file(&client, &metadata_url, &metadata_path).await?;

            tokio::task::spawn_blocking(move || TmModel::from_files(model_path, metadata_path))
                .await?
        }
    }
}

#[cfg(test)]
mod test {

    use super::*;
    use image::Rgb;

    #[test]
    fn metadata_parses_teachable_machine_export() -> Result<()> {
        let raw = r#"{
            "tfjsVersion": "1.3.1",
            "tmVersion": "2.4.7",
            "packageVersion": "0.8.4-alpha2",
            "packageName": "@teachablemachine/image",
            "timeStamp": "2023-06-01T10:00:00.000Z",
            "userMetadata": {},
            "modelName": "tm-my-image-model",
            "labels": ["Cat", "Dog", "Nothing"],
            "imageSize": 224
        }"#;
        let metadata: Metadata = serde_json::from_str(raw)?;

        assert_eq!(metadata.labels, vec!["Cat", "Dog", "Nothing"]);
        assert_eq!(metadata.image_size, 224);
        assert_eq!(metadata.model_name.as_deref(), Some("tm-my-image-model"));
        assert_eq!(metadata.tm_version.as_deref(), Some("2.4.7"));

        let minimal: Metadata = serde_json::from_str(r#"{"labels": ["A"]}"#)?;
        assert_eq!(minimal.image_size, 224);

        Ok(())
    }

    #[test]
    fn preproc_crops_resizes_and_normalizes() -> Result<()> {
        // Left and right quarters black, center white: only white survives the center crop
        let frame = RgbImage::from_fn(8, 4, |x, _| match x {
            2..=5 => Rgb([255, 255, 255]),
            _ => Rgb([0, 0, 0]),
        });

        let tensor = preproc(&frame, 6);

        assert_eq!(tensor.shape(), &[1, 6, 6, 3]);
        assert!(tensor
            .to_array_view::<f32>()?
            .iter()
            .all(|value| (value - 1.0).abs() < 1e-6));

        let black = preproc(&RgbImage::new(3, 5), 2);
        assert!(black
            .to_array_view::<f32>()?
            .iter()
            .all(|value| (value + 1.0).abs() < 1e-6));

        Ok(())
    }

    #[test]
    fn probabilities_keep_category_order() -> Result<()> {
        let labels = vec!["Cat".to_owned(), "Dog".to_owned()];
        let predictions = label_probabilities(&labels, &[0.25, 0.75])?;

        assert_eq!(predictions[0].class_name, "Cat");
        assert_eq!(predictions[0].probability, 0.25);
        assert_eq!(predictions[1].class_name, "Dog");
        assert_eq!(predictions[1].probability, 0.75);

        assert!(label_probabilities(&labels, &[1.0]).is_err());

        Ok(())
    }

    #[test]
    fn urls_join_base_and_file() {
        let source = ModelSource::default();
        assert_eq!(
            source.model_url(),
            "https://teachablemachine.withgoogle.com/models/8oyQv2ekf/model.onnx"
        );
        assert_eq!(
            source.metadata_url(),
            "https://teachablemachine.withgoogle.com/models/8oyQv2ekf/metadata.json"
        );

        let source = ModelSource {
            base_url: "http://127.0.0.1:8000/model".into(),
            ..Default::default()
        };
        assert_eq!(source.model_url(), "http://127.0.0.1:8000/model/model.onnx");
    }

    #[test]
    fn cache_dir_is_keyed_by_source() {
        let a = RemoteModelLoader::new(ModelSource::default(), "/tmp/tmcam");
        let b = RemoteModelLoader::new(
            ModelSource {
                base_url: "http://127.0.0.1:8000/".into(),
                ..Default::default()
            },
            "/tmp/tmcam",
        );

        assert!(a.model_dir().starts_with("/tmp/tmcam"));
        assert_ne!(a.model_dir(), b.model_dir());
    }
}
