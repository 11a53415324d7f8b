//! Sensors module.
//!
use std::future::Future;

use anyhow::{anyhow, bail, Context, Result};
use image::{imageops, RgbImage};
use rscam::{Camera, Config};

/// Source of successive frames.
pub trait CaptureSource {
    /// Capture the next frame.
    fn update(&mut self) -> Result<RgbImage>;

    /// Release the device. Calling it again has no effect.
    fn stop(&mut self);
}

/// Acquires capture sources.
pub trait CameraFactory {
    type Camera: CaptureSource + Send + 'static;

    fn setup(&self, config: &WebcamConfig) -> impl Future<Output = Result<Self::Camera>> + Send;
}

/// Requested capture device and frame geometry.
#[derive(Clone, Debug, PartialEq)]
pub struct WebcamConfig {
    pub device: String,
    pub format: String,
    pub width: u32,
    pub height: u32,
    /// Mirror frames horizontally.
    pub flip: bool,
}

impl Default for WebcamConfig {
    fn default() -> Self {
        Self {
            device: "/dev/video0".into(),
            format: CAPTURE_FORMAT.into(),
            width: 300,
            height: 200,
            flip: true,
        }
    }
}

/// The only pixel format frames can be decoded from.
pub const CAPTURE_FORMAT: &str = "MJPG";

/// Accept `format` only if captured frames in it can be decoded.
pub fn check_format(format: &str) -> Result<&'static [u8]> {
    if format != CAPTURE_FORMAT {
        bail!("unsupported pixel format {format:?}, only {CAPTURE_FORMAT} is decoded");
    }
    Ok(CAPTURE_FORMAT.as_bytes())
}

/// Video4Linux cameras.
#[derive(Clone, Copy, Debug, Default)]
pub struct V4lCameras;

impl CameraFactory for V4lCameras {
    type Camera = Webcam;

    fn setup(&self, config: &WebcamConfig) -> impl Future<Output = Result<Webcam>> + Send {
        let config = config.clone();
        async move { tokio::task::spawn_blocking(move || Webcam::open(&config)).await? }
    }
}

/// Initialized, streaming camera.
pub struct Webcam {
    cam: Option<Camera>,
    width: u32,
    height: u32,
    flip: bool,
}

impl Webcam {
    /// Open the device and start streaming MJPG frames.
    pub fn open(config: &WebcamConfig) -> Result<Self> {
        let format = check_format(&config.format)?;
        let mut cam = Camera::new(&config.device)
            .with_context(|| format!("failed to open camera {}", config.device))?;
        log_supported_formats(&cam, &config.format);

        log::info!("Using camera {}", config.device);

        let resolution = get_resolution(&cam, format, (config.width, config.height))?;
        let frame_rate = get_max_frame_rate(&cam, format, resolution)?;
        log::debug!("Capturing {resolution:?} at interval {frame_rate:?}");

        cam.start(&Config {
            interval: frame_rate,
            resolution,
            format,
            ..Default::default()
        })
        .with_context(|| format!("failed to start camera {}", config.device))?;

        Ok(Self {
            cam: Some(cam),
            width: config.width,
            height: config.height,
            flip: config.flip,
        })
    }
}

impl CaptureSource for Webcam {
    fn update(&mut self) -> Result<RgbImage> {
        let cam = self.cam.as_ref().ok_or_else(|| anyhow!("camera is stopped"))?;
        let frame = cam.capture().context("failed to capture frame")?;
        let image: RgbImage =
            turbojpeg::decompress_image(&frame[..]).context("failed to decompress frame")?;

        Ok(fit_frame(image, self.width, self.height, self.flip))
    }

    fn stop(&mut self) {
        if let Some(mut cam) = self.cam.take() {
            if let Err(err) = cam.stop() {
                log::warn!("Error stopping camera: {err}");
            }
        }
    }
}

impl Drop for Webcam {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Scale and crop a frame to fill `width` x `height`, mirroring it if requested.
pub fn fit_frame(image: RgbImage, width: u32, height: u32, flip: bool) -> RgbImage {
    let image = match image.dimensions() == (width, height) {
        true => image,
        false => image::DynamicImage::ImageRgb8(image)
            .resize_to_fill(width, height, imageops::FilterType::Triangle)
            .to_rgb8(),
    };

    match flip {
        true => imageops::flip_horizontal(&image),
        false => image,
    }
}

/// Pick the smallest resolution covering `target`, or the largest one if none does.
pub fn select_resolution(resolutions: &[(u32, u32)], target: (u32, u32)) -> Option<(u32, u32)> {
    let covering = resolutions
        .iter()
        .filter(|res| res.0 >= target.0 && res.1 >= target.1)
        .min_by_key(|res| res.0 * res.1);

    covering
        .or_else(|| resolutions.iter().max_by_key(|res| res.0 * res.1))
        .copied()
}

/// Get the resolution to capture at for the given format.
fn get_resolution(cam: &Camera, format: &[u8], target: (u32, u32)) -> Result<(u32, u32)> {
    let resolution_info = cam.resolutions(format)?;
    log::debug!("Found resolutions: {:?}", &resolution_info);
    match resolution_info {
        rscam::ResolutionInfo::Discretes(resolutions) => select_resolution(&resolutions, target),
        rscam::ResolutionInfo::Stepwise { min, max, step: _ } => Some((
            target.0.clamp(min.0, max.0),
            target.1.clamp(min.1, max.1),
        )),
    }
    .ok_or_else(|| anyhow!("No resolution found"))
}

/// Get the maximum supported frame rate for the given format and resolution.
fn get_max_frame_rate(cam: &Camera, format: &[u8], resolution: (u32, u32)) -> Result<(u32, u32)> {
    let interval_info = cam.intervals(format, resolution)?;
    log::debug!("Found frame rates: {:?}", &interval_info);
    match interval_info {
        // Intervals are (numerator, denominator) seconds per frame
        rscam::IntervalInfo::Discretes(intervals) => intervals
            .iter()
            .max_by(|a, b| (a.1 as f64 / a.0 as f64).total_cmp(&(b.1 as f64 / b.0 as f64)))
            .copied(),
        rscam::IntervalInfo::Stepwise { min, max: _, step: _ } => Some(min),
    }
    .ok_or_else(|| anyhow!("No frame rate found"))
}

fn log_supported_formats(cam: &Camera, format: &str) {
    let formats: Vec<_> = cam.formats().filter_map(|fmt| fmt.ok()).collect();
    log::debug!(
        "Supported formats: {:?}, using format {:?}",
        formats,
        format
    );
}

#[cfg(test)]
mod test {

    use super::*;
    use image::Rgb;

    #[test]
    fn smallest_covering_resolution_wins() {
        let resolutions = [(1280, 720), (320, 240), (640, 480), (160, 120)];

        assert_eq!(select_resolution(&resolutions, (300, 200)), Some((320, 240)));
        assert_eq!(select_resolution(&resolutions, (640, 400)), Some((640, 480)));
        assert_eq!(select_resolution(&resolutions, (1920, 1080)), Some((1280, 720)));
        assert_eq!(select_resolution(&[], (300, 200)), None);
    }

    #[test]
    fn only_mjpg_is_accepted() {
        assert_eq!(check_format("MJPG").ok(), Some(&b"MJPG"[..]));

        for format in ["YUYV", "MJP", "MJ", "", "mjpg"] {
            assert!(check_format(format).is_err(), "{format:?} accepted");
        }
    }

    #[test]
    fn unsupported_format_fails_before_opening_device() {
        let config = WebcamConfig {
            device: "/dev/does-not-exist".into(),
            format: "MJ".into(),
            ..Default::default()
        };

        match Webcam::open(&config) {
            Ok(_) => panic!("opened camera with format MJ"),
            Err(err) => assert!(format!("{err:#}").contains("unsupported pixel format")),
        }
    }

    #[test]
    fn frames_are_resized_and_mirrored() {
        let image = RgbImage::from_fn(4, 2, |x, _| match x {
            0 => Rgb([255, 0, 0]),
            _ => Rgb([0, 0, 0]),
        });

        let mirrored = fit_frame(image.clone(), 4, 2, true);
        assert_eq!(mirrored[(3, 0)], Rgb([255, 0, 0]));
        assert_eq!(mirrored[(0, 0)], Rgb([0, 0, 0]));

        let unchanged = fit_frame(image.clone(), 4, 2, false);
        assert_eq!(unchanged, image);

        let resized = fit_frame(RgbImage::new(640, 480), 300, 200, true);
        assert_eq!(resized.dimensions(), (300, 200));
    }

    #[test]
    fn get_cam_info_if_available() -> Result<()> {
        let cam_name = "/dev/video0";
        let cam = Camera::new(cam_name);

        match cam {
            Err(err) => println!("Could not initialize camera (maybe non available): {err}"),
            Ok(cam) => {
                let formats: Vec<_> = cam.formats().collect();
                println!("Supported formats: {formats:?}");

                let format = b"MJPG";
                if let Ok(resolution) = get_resolution(&cam, format, (300, 200)) {
                    let frame_rates = cam.intervals(format, resolution)?;
                    println!("Selected {resolution:?}, frame rates: {frame_rates:?}");
                }
            }
        }

        Ok(())
    }
}
