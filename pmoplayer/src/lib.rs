//! Web-radio player sessions on top of [`pmostream`].
//!
//! - [`StreamSession`] runs one fetch-and-buffer pipeline for one broadcast
//!   and publishes its lifecycle over a watch channel.
//! - [`PlayerController`] owns the playback element, switches between
//!   broadcasts with a strict abort-then-start handover, and projects the
//!   element's own events into observable playback state.
//! - [`SourceDescriptor`] carries the station data; presentation stays with
//!   the embedder.

pub mod controller;
pub mod session;
pub mod sources;

pub use controller::{ControllerEvent, PlayerConfig, PlayerController};
pub use session::{SessionStatus, StreamSession};
pub use sources::{default_stations, SourceDescriptor};
