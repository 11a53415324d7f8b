//! Common code shared between the `tmcam` server and the page it serves.
pub mod protocol;
