//! Playable broadcast descriptors.
//!
//! Plain data only; choosing and presenting stations is the embedder's
//! concern.

use serde::{Deserialize, Serialize};

/// One selectable broadcast: a display name and its stream URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    pub name: String,
    pub url: String,
}

impl SourceDescriptor {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
        }
    }
}

const DEFAULT_STATIONS: &[(&str, &str)] = &[
    ("Med Radio", "https://medradio-maroc.ice.infomaniak.ch/medradio-maroc-64.mp3"),
    ("FIP", "https://icecast.radiofrance.fr/fip-midfi.mp3"),
    ("France Inter", "https://icecast.radiofrance.fr/franceinter-midfi.mp3"),
    ("France Info", "https://icecast.radiofrance.fr/franceinfo-midfi.mp3"),
];

/// The built-in station list. Embedders usually supply their own.
pub fn default_stations() -> Vec<SourceDescriptor> {
    DEFAULT_STATIONS
        .iter()
        .map(|(name, url)| SourceDescriptor::new(*name, *url))
        .collect()
}
