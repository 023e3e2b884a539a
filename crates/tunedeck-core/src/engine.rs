//! Platform audio engine interface
//!
//! The engine owns decoding and output; this crate only drives it through
//! one loaded resource at a time. Each resource is tagged with a
//! [`ResourceId`] chosen by the caller, and every asynchronous status update
//! carries that tag so updates from a replaced resource can be told apart.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;


/// Generation tag identifying one loaded resource.
pub type ResourceId = u64;


/// Errors that can occur on resource operations.
#[derive( Debug, Error )]
pub enum EngineError {
    #[error( "Invalid media URI: {0}" )]
    InvalidUri( String ),

    #[error( "IO error: {0}" )]
    Io( #[from] std::io::Error ),

    #[error( "Resource {0} is not loaded" )]
    Unloaded( ResourceId ),

    #[error( "Audio engine error: {0}" )]
    Platform( String ),
}


/// Point-in-time status reported by a resource.
#[derive( Debug, Clone, Copy, PartialEq, Eq, Default )]
pub struct PlaybackStatus {
    pub is_loaded: bool,
    pub is_playing: bool,
    pub position_ms: u64,
    pub duration_ms: Option<u64>,
    /// Set on the single update emitted when playback reaches the end naturally
    pub did_just_finish: bool,
}


/// Status pushed by the engine outside of any command.
#[derive( Debug, Clone, Copy, PartialEq, Eq )]
pub struct StatusUpdate {
    pub resource: ResourceId,
    pub status: PlaybackStatus,
}


/// Parameters for loading a new resource.
#[derive( Debug, Clone )]
pub struct CreateRequest {
    pub id: ResourceId,
    pub uri: String,
    /// Start playing as soon as the resource is loaded
    pub auto_start: bool,
    pub start_position_ms: u64,
    pub status_tx: mpsc::UnboundedSender<StatusUpdate>,
}


/// Platform audio engine.
#[async_trait]
pub trait AudioEngine: Send + Sync {
    /// One-time audio mode setup (keep playing in background, duck other apps).
    async fn configure_background_playback( &self ) -> Result<(), EngineError>;

    /// Loads a new resource for `request.uri`.
    async fn create( &self, request: CreateRequest ) -> Result<Box<dyn SoundResource>, EngineError>;
}


/// One loaded, playable audio stream.
#[async_trait]
pub trait SoundResource: Send + Sync {
    fn id( &self ) -> ResourceId;

    async fn play( &mut self ) -> Result<(), EngineError>;

    async fn pause( &mut self ) -> Result<(), EngineError>;

    async fn set_position( &mut self, position_ms: u64 ) -> Result<(), EngineError>;

    async fn status( &self ) -> Result<PlaybackStatus, EngineError>;

    /// Releases the resource. Completes only once the platform has torn it
    /// down; the resource is dropped afterwards and never used again.
    async fn unload( &mut self ) -> Result<(), EngineError>;
}
