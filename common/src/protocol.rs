//! Snapshot of the classifier page, as rendered by the browser.
//!
use serde::{Deserialize, Serialize};

/// Marker attached to a display slot after its first prediction.
///
/// Serialized as the element ids the page styles.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum LabelMarker {
    #[serde(rename = "maxLabel")]
    HighConfidence,
    #[serde(rename = "normalLabel")]
    Normal,
}

/// One category's latest formatted prediction.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct LabelSlot {
    pub text: String,
    pub marker: Option<LabelMarker>,
}

/// Element the live capture is shown in.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureSurface {
    /// Inline video element with fixed size, used on iPhone and iPad.
    Video,
    /// Drawable canvas, used everywhere else.
    Canvas,
}

impl CaptureSurface {
    pub fn for_user_agent(user_agent: &str) -> Self {
        if user_agent.contains("iPhone") || user_agent.contains("iPad") {
            CaptureSurface::Video
        } else {
            CaptureSurface::Canvas
        }
    }
}

/// Everything the browser needs to draw the page.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct PageState {
    pub start_enabled: bool,
    pub stop_enabled: bool,
    pub loading: bool,
    pub capture: Option<CaptureSurface>,
    pub labels: Vec<LabelSlot>,
}

#[cfg(test)]
mod test {

    use super::*;

    #[test]
    fn markers_use_page_element_ids() -> Result<(), serde_json::Error> {
        let state = PageState {
            start_enabled: false,
            stop_enabled: true,
            loading: false,
            capture: Some(CaptureSurface::Canvas),
            labels: vec![
                LabelSlot {
                    text: "Cat: 80.00%".into(),
                    marker: Some(LabelMarker::HighConfidence),
                },
                LabelSlot {
                    text: "Dog: 20.00%".into(),
                    marker: Some(LabelMarker::Normal),
                },
                LabelSlot::default(),
            ],
        };

        let json = serde_json::to_value(&state)?;
        assert_eq!(json["capture"], "canvas");
        assert_eq!(json["labels"][0]["marker"], "maxLabel");
        assert_eq!(json["labels"][1]["marker"], "normalLabel");
        assert!(json["labels"][2]["marker"].is_null());

        let deserialized: PageState = serde_json::from_value(json)?;
        assert_eq!(state, deserialized);

        Ok(())
    }

    #[test]
    fn ios_devices_get_a_video_element() {
        let iphone = "Mozilla/5.0 (iPhone; CPU iPhone OS 16_5 like Mac OS X) AppleWebKit/605.1.15";
        let ipad = "Mozilla/5.0 (iPad; CPU OS 16_5 like Mac OS X) AppleWebKit/605.1.15";
        let linux = "Mozilla/5.0 (X11; Linux x86_64; rv:109.0) Gecko/20100101 Firefox/115.0";

        assert_eq!(CaptureSurface::for_user_agent(iphone), CaptureSurface::Video);
        assert_eq!(CaptureSurface::for_user_agent(ipad), CaptureSurface::Video);
        assert_eq!(CaptureSurface::for_user_agent(linux), CaptureSurface::Canvas);
        assert_eq!(CaptureSurface::for_user_agent(""), CaptureSurface::Canvas);
    }
}
