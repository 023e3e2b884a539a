//! TuneDeck Core - Playback session engine
//!
//! This crate provides the core of the player: the playback session manager,
//! the device library source, persisted playlists, and the bridge to the
//! platform's media notification. Platform services (audio engine, media
//! index, key-value storage, notifications) are reached through traits.

pub mod clock;
pub mod command;
pub mod config;
pub mod engine;
pub mod library;
pub mod notification;
pub mod playlist;
pub mod probe;
pub mod session;
pub mod storage;
pub mod track;

pub use clock::{ ClockEngine, ClockOp };
pub use command::{ Command, CommandError, TrackRef };
pub use config::SessionConfig;
pub use engine::{ AudioEngine, EngineError, PlaybackStatus, ResourceId, SoundResource, StatusUpdate };
pub use library::{ DirectoryMediaSource, LibraryError, LibrarySource, MediaSource, PermissionStatus };
pub use notification::{ NotificationBridge, NotificationPlatform, NotificationResponse, RemoteCommand };
pub use playlist::{ Playlist, PlaylistError, PlaylistStore };
pub use session::{ AppState, Platform, SessionError, SessionManager, SessionPhase, SessionSnapshot };
pub use storage::{ FileStore, KeyValueStore, MemoryStore, ResumeState, StorageError };
pub use track::Track;
