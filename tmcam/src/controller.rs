//! Run loop controller.
//!
//! Owns the session lifecycle: on start, the model is loaded and the camera acquired, then a frame
//! loop captures a frame, classifies it and writes the predictions into the display slots, paced
//! by a refresh interval. There is at most one inference in flight, and frames are processed in
//! capture order.
use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use anyhow::{Context, Result};
use bytes::Bytes;
use common::protocol::{CaptureSurface, PageState};
use tokio::{
    sync::broadcast,
    task::JoinHandle,
    time::{interval, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::{
    board::DisplayConfig,
    meter::METER,
    nn::{Classifier, ModelLoader, Prediction},
    page::Page,
    sensors::{CameraFactory, CaptureSource, WebcamConfig},
    utils::as_jpeg_stream_item,
};

/// Default refresh rate of the frame loop, in ticks per second.
pub const DEFAULT_REFRESH_RATE: u32 = 60;

/// JPEG quality of frames sent to stream viewers.
const STREAM_JPEG_QUALITY: i32 = 85;

pub type BroadcastSender = broadcast::Sender<Bytes>;
pub type BroadcastReceiver = broadcast::Receiver<Bytes>;

#[derive(Clone, Debug, PartialEq)]
pub struct ControllerSettings {
    pub webcam: WebcamConfig,
    pub display: DisplayConfig,
    pub refresh_rate: u32,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            webcam: WebcamConfig::default(),
            display: DisplayConfig::default(),
            refresh_rate: DEFAULT_REFRESH_RATE,
        }
    }
}

impl ControllerSettings {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.refresh_rate.max(1) as f64)
    }
}

enum Session<C> {
    Idle,
    Running {
        token: CancellationToken,
        handle: JoinHandle<Option<C>>,
    },
}

impl<C> Session<C> {
    /// A loop that ended on its own cancelled its token and counts as idle.
    fn is_running(&self) -> bool {
        match self {
            Session::Idle => false,
            Session::Running { token, .. } => !token.is_cancelled(),
        }
    }
}

pub struct RunLoopController<L: ModelLoader, F: CameraFactory> {
    loader: L,
    cameras: F,
    settings: ControllerSettings,
    session: tokio::sync::Mutex<Session<F::Camera>>,
    page: Arc<Mutex<Page>>,
    frames_tx: BroadcastSender,
}

impl<L: ModelLoader, F: CameraFactory> RunLoopController<L, F> {
    pub fn new(loader: L, cameras: F, settings: ControllerSettings) -> Self {
        let (frames_tx, _) = broadcast::channel(8);
        Self {
            loader,
            cameras,
            settings,
            session: tokio::sync::Mutex::new(Session::Idle),
            page: Arc::new(Mutex::new(Page::new())),
            frames_tx,
        }
    }

    /// Load the model, acquire the camera and start the frame loop.
    ///
    /// Returns `false` without doing anything if the loop is already running.
    pub async fn start(&self, surface: CaptureSurface) -> Result<bool> {
        let mut session = self.session.lock().await;
        if session.is_running() {
            log::debug!("Start requested while running");
            return Ok(false);
        }
        // Release the camera of a loop that ended on an error
        shutdown(std::mem::replace(&mut *session, Session::Idle)).await;

        lock(&self.page).begin_loading();

        let acquired = async {
            let model = self.loader.load().await.context("failed to load model")?;
            let camera = self
                .cameras
                .setup(&self.settings.webcam)
                .await
                .context("failed to set up camera")?;
            Ok::<_, anyhow::Error>((model, camera))
        }
        .await;

        let (model, camera) = match acquired {
            Ok(acquired) => acquired,
            Err(err) => {
                lock(&self.page).abort_loading();
                return Err(err);
            }
        };

        let num_classes = model.total_classes();
        lock(&self.page).attach(surface, num_classes);

        let token = CancellationToken::new();
        let handle = tokio::spawn(run_loop(
            camera,
            Arc::new(model),
            token.clone(),
            Arc::clone(&self.page),
            self.frames_tx.clone(),
            self.settings.clone(),
        ));
        *session = Session::Running { token, handle };

        log::info!("Started with {num_classes} categories on {surface:?}");
        Ok(true)
    }

    /// Stop the frame loop, release the camera and clear the page.
    ///
    /// Returns `false` without doing anything if the loop is idle.
    pub async fn stop(&self) -> bool {
        let mut session = self.session.lock().await;
        if !session.is_running() {
            log::debug!("Stop requested while idle");
            return false;
        }

        shutdown(std::mem::replace(&mut *session, Session::Idle)).await;
        lock(&self.page).detach();

        log::info!("Stopped");
        true
    }

    pub fn state(&self) -> PageState {
        lock(&self.page).snapshot()
    }

    /// Receive every classified frame as a multipart JPEG item.
    pub fn subscribe_frames(&self) -> BroadcastReceiver {
        self.frames_tx.subscribe()
    }
}

fn lock(page: &Mutex<Page>) -> MutexGuard<'_, Page> {
    page.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Cancel the loop of a session, wait for it and release its camera.
async fn shutdown<C: CaptureSource>(session: Session<C>) {
    if let Session::Running { token, handle } = session {
        token.cancel();
        match handle.await {
            Ok(Some(mut camera)) => camera.stop(),
            Ok(None) => (),
            Err(err) => log::error!("Frame loop task failed: {err}"),
        }
    }
}

struct TickOutput {
    predictions: Vec<Prediction>,
    frame: Option<Bytes>,
}

/// Capture and classify one frame. Encodes it for viewers if `encode` is set.
fn tick<C: CaptureSource, M: Classifier>(
    camera: &mut C,
    model: &M,
    encode: bool,
) -> Result<TickOutput> {
    let frame = camera.update()?;
    METER.tick_captured();

    let frame_item = match encode {
        true => {
            let jpeg =
                turbojpeg::compress_image(&frame, STREAM_JPEG_QUALITY, turbojpeg::Subsamp::Sub2x2)?;
            Some(as_jpeg_stream_item(&jpeg))
        }
        false => None,
    };

    let predictions = model.predict(&frame)?;
    METER.tick_classified();

    Ok(TickOutput {
        predictions,
        frame: frame_item,
    })
}

/// Drive ticks until cancelled. Gives the camera back unless a tick panicked.
async fn run_loop<C, M>(
    mut camera: C,
    model: Arc<M>,
    token: CancellationToken,
    page: Arc<Mutex<Page>>,
    frames_tx: BroadcastSender,
    settings: ControllerSettings,
) -> Option<C>
where
    C: CaptureSource + Send + 'static,
    M: Classifier + Send + Sync + 'static,
{
    let mut refresh = interval(settings.frame_interval());
    refresh.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = refresh.tick() => (),
        }

        let encode = frames_tx.receiver_count() > 0;
        let model = Arc::clone(&model);
        let joined = tokio::task::spawn_blocking(move || {
            let output = tick(&mut camera, &*model, encode);
            (camera, output)
        })
        .await;

        let output = match joined {
            Ok((returned, output)) => {
                camera = returned;
                output
            }
            Err(err) => {
                log::error!("Frame tick panicked: {err}");
                token.cancel();
                lock(&page).detach();
                return None;
            }
        };

        // Stopped while the tick was in flight, the slots are gone
        if token.is_cancelled() {
            break;
        }

        match output {
            Ok(output) => {
                lock(&page)
                    .board_mut()
                    .update(&output.predictions, &settings.display);
                if let Some(frame) = output.frame {
                    frames_tx.send(frame).ok();
                }
            }
            Err(err) => {
                log::error!("Frame tick failed: {err:#}");
                camera.stop();
                token.cancel();
                lock(&page).detach();
                break;
            }
        }
    }

    Some(camera)
}

#[cfg(test)]
mod test {

    use super::*;

    #[test]
    fn frame_interval_follows_refresh_rate() {
        let settings = ControllerSettings {
            refresh_rate: 50,
            ..Default::default()
        };
        assert_eq!(settings.frame_interval(), Duration::from_millis(20));

        let settings = ControllerSettings {
            refresh_rate: 0,
            ..Default::default()
        };
        assert_eq!(settings.frame_interval(), Duration::from_secs(1));
    }
}
