//! Classify your webcam stream with an exported image model and show per-class probabilities in
//! the browser.
use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
};

pub mod board;
pub mod config;
pub mod controller;
pub mod endpoints;
pub mod meter;
pub mod nn;
pub mod page;
pub mod sensors;
pub mod utils;

/// Stable-per-process hash of a name, used to key cache directories.
pub fn hashed(name: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    name.hash(&mut hasher);
    hasher.finish()
}
