//! Command line configuration.
//!
use std::path::PathBuf;

use clap::Parser;

use crate::{
    board::{DisplayConfig, HIGH_CONFIDENCE_THRESHOLD, PERCENT_DECIMALS},
    controller::{ControllerSettings, DEFAULT_REFRESH_RATE},
    nn::{ModelSource, DEFAULT_MODEL_URL},
    sensors::{check_format, WebcamConfig, CAPTURE_FORMAT},
};

#[derive(Parser, Debug)]
#[clap(author, version)]
pub struct Args {
    /// Address to serve the page on
    #[clap(long, default_value = "127.0.0.1:3000")]
    pub server_address: String,

    /// Base URL of the exported image model
    #[clap(long, default_value = DEFAULT_MODEL_URL)]
    pub model_url: String,

    /// File name of the model definition under the base URL
    #[clap(long, default_value = "model.onnx")]
    pub model_file: String,

    /// File name of the model metadata under the base URL
    #[clap(long, default_value = "metadata.json")]
    pub metadata_file: String,

    /// Directory to keep downloaded model files in
    #[clap(long)]
    pub cache_dir: Option<PathBuf>,

    /// Video device to capture from
    #[clap(long, default_value = "/dev/video0")]
    pub device: String,

    /// Pixel format requested from the device, only MJPG is supported
    #[clap(long, default_value = CAPTURE_FORMAT, value_parser = parse_format)]
    pub format: String,

    /// Width of captured frames
    #[clap(long, default_value_t = 300)]
    pub width: u32,

    /// Height of captured frames
    #[clap(long, default_value_t = 200)]
    pub height: u32,

    /// Do not mirror captured frames
    #[clap(long)]
    pub no_flip: bool,

    /// Probability from which a category is highlighted
    #[clap(long, default_value_t = HIGH_CONFIDENCE_THRESHOLD)]
    pub high_confidence: f32,

    /// Decimal digits of displayed percentages
    #[clap(long, default_value_t = PERCENT_DECIMALS)]
    pub decimals: usize,

    /// Frame loop ticks per second
    #[clap(long, default_value_t = DEFAULT_REFRESH_RATE)]
    pub refresh_rate: u32,
}

fn parse_format(format: &str) -> Result<String, String> {
    check_format(format)
        .map(|_| format.to_owned())
        .map_err(|err| err.to_string())
}

impl Args {
    pub fn model_source(&self) -> ModelSource {
        ModelSource {
            base_url: self.model_url.clone(),
            model_file: self.model_file.clone(),
            metadata_file: self.metadata_file.clone(),
        }
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.cache_dir.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("tmcam")
        })
    }

    pub fn settings(&self) -> ControllerSettings {
        ControllerSettings {
            webcam: WebcamConfig {
                device: self.device.clone(),
                format: self.format.clone(),
                width: self.width,
                height: self.height,
                flip: !self.no_flip,
            },
            display: DisplayConfig {
                high_confidence_threshold: self.high_confidence,
                decimals: self.decimals,
            },
            refresh_rate: self.refresh_rate,
        }
    }
}

#[cfg(test)]
mod test {

    use super::*;

    #[test]
    fn defaults_mirror_a_300_by_200_feed() {
        let args = Args::parse_from(["tmcam"]);

        assert_eq!(args.model_source(), ModelSource::default());
        assert_eq!(args.settings(), ControllerSettings::default());
        assert!(args.cache_dir().ends_with("tmcam"));
    }

    #[test]
    fn flags_override_settings() {
        let args = Args::parse_from([
            "tmcam",
            "--no-flip",
            "--width",
            "640",
            "--height",
            "480",
            "--high-confidence",
            "0.9",
            "--decimals",
            "1",
            "--cache-dir",
            "/tmp/models",
        ]);
        let settings = args.settings();

        assert!(!settings.webcam.flip);
        assert_eq!((settings.webcam.width, settings.webcam.height), (640, 480));
        assert_eq!(settings.display.high_confidence_threshold, 0.9);
        assert_eq!(settings.display.decimals, 1);
        assert_eq!(args.cache_dir(), PathBuf::from("/tmp/models"));
    }

    #[test]
    fn non_mjpg_format_is_rejected() {
        assert!(Args::try_parse_from(["tmcam", "--format", "YUYV"]).is_err());
        assert!(Args::try_parse_from(["tmcam", "--format", "MJ"]).is_err());
        assert!(Args::try_parse_from(["tmcam", "--format", ""]).is_err());

        let args = Args::parse_from(["tmcam", "--format", "MJPG"]);
        assert_eq!(args.settings().webcam.format, "MJPG");
    }
}
