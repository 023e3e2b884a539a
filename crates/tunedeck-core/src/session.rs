//! Playback session manager
//!
//! The SessionManager owns the single live audio resource and every piece of
//! transport state. All UI surfaces and the notification controls go through
//! its commands; state changes are published on a watch channel.
//!
//! Resource swaps are serialized by one async mutex (the "slot"): a new
//! resource is only created after the previous one has been fully unloaded,
//! so at most one resource is ever alive. Each resource gets a fresh
//! [`ResourceId`]; status updates tagged with any other id are dropped.

use std::sync::{ Arc, Mutex as StdMutex, MutexGuard, RwLock, Weak };
use std::sync::atomic::{ AtomicU64, Ordering };
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{ mpsc, watch, Mutex };
use tokio::task::JoinHandle;
use tokio::time::{ Instant, MissedTickBehavior };

use crate::config::SessionConfig;
use crate::engine::{ AudioEngine, CreateRequest, EngineError, ResourceId, SoundResource, StatusUpdate };
use crate::library::{ LibraryError, LibrarySource, MediaSource };
use crate::notification::{ ActionSubscription, NotificationBridge, RemoteCommand };
use crate::playlist::{ Playlist, PlaylistError, PlaylistStore };
use crate::storage::{ KeyValueStore, ResumeState, StorageError };
use crate::track::Track;


/// Errors surfaced by session commands.
#[derive( Debug, Error )]
pub enum SessionError {
    #[error( "Audio resource error: {0}" )]
    Resource( #[from] EngineError ),

    #[error( "Library error: {0}" )]
    Library( #[from] LibraryError ),

    #[error( "Playlist error: {0}" )]
    Playlist( #[from] PlaylistError ),

    #[error( "Storage error: {0}" )]
    Storage( #[from] StorageError ),

    #[error( "No track loaded" )]
    NoResource,
}


/// Foreground state of the host application.
#[derive( Debug, Clone, Copy, PartialEq, Eq )]
pub enum AppState {
    Active,
    Inactive,
    Background,
}


impl AppState {
    fn is_foreground( self ) -> bool {
        self == AppState::Active
    }
}


/// Transport phase derived from session state.
#[derive( Debug, Clone, Copy, PartialEq, Eq )]
pub enum SessionPhase {
    Idle,
    Loading,
    Playing,
    Paused,
}


/// Observable session state.
#[derive( Debug, Clone, Default, PartialEq, Eq )]
pub struct SessionSnapshot {
    pub current_track: Option<Track>,
    pub is_playing: bool,
    /// True while a resource is being created or swapped
    pub is_loading: bool,
    pub position_ms: u64,
    pub duration_ms: u64,
    pub permission_granted: bool,
}


impl SessionSnapshot {
    pub fn phase( &self ) -> SessionPhase {
        if self.is_loading {
            SessionPhase::Loading
        } else if self.current_track.is_none() {
            SessionPhase::Idle
        } else if self.is_playing {
            SessionPhase::Playing
        } else {
            SessionPhase::Paused
        }
    }
}


/// Platform collaborators the session drives.
pub struct Platform {
    pub engine: Arc<dyn AudioEngine>,
    pub media: Arc<dyn MediaSource>,
    pub store: Arc<dyn KeyValueStore>,
    pub notifications: NotificationBridge,
}


/// Index of the track `forward`/backward from `current_id`, wrapping around.
///
/// A current id missing from `tracks` resolves to the first track going
/// forward and the last going backward.
pub fn cyclic_neighbor( tracks: &[Track], current_id: &str, forward: bool ) -> Option<usize> {
    let len = tracks.len();
    if len == 0 {
        return None;
    }

    Some( match ( tracks.iter().position( |t| t.id == current_id ), forward ) {
        ( Some( i ), true ) => ( i + 1 ) % len,
        ( Some( i ), false ) => ( i + len - 1 ) % len,
        ( None, true ) => 0,
        ( None, false ) => len - 1,
    })
}


fn lock<T>( mutex: &StdMutex<T> ) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else( |e| e.into_inner() )
}


/// The one resource currently owned, with its position poller.
struct LiveResource {
    resource: Box<dyn SoundResource>,
    poller: JoinHandle<()>,
}


impl LiveResource {
    fn id( &self ) -> ResourceId {
        self.resource.id()
    }


    /// Stops polling and unloads, waiting for the platform teardown.
    async fn teardown( mut self ) -> Result<(), EngineError> {
        self.poller.abort();
        self.resource.unload().await
    }
}


type Slot = Option<LiveResource>;


struct Inner {
    config: SessionConfig,
    engine: Arc<dyn AudioEngine>,
    library: LibrarySource,
    store: Arc<dyn KeyValueStore>,
    notifications: NotificationBridge,
    playlists: Mutex<PlaylistStore>,
    tracks: RwLock<Vec<Track>>,
    state: watch::Sender<SessionSnapshot>,
    /// Guards the live resource; held for the whole of every resource operation
    slot: Mutex<Slot>,
    /// Id of the owned resource, 0 when none
    current_resource: AtomicU64,
    next_resource_id: AtomicU64,
    status_tx: mpsc::UnboundedSender<StatusUpdate>,
    remote_tx: mpsc::UnboundedSender<RemoteCommand>,
    /// Position restored from storage, applied when the resource is first created
    restored_position: StdMutex<Option<u64>>,
    app_state: StdMutex<AppState>,
    action_subscription: StdMutex<Option<ActionSubscription>>,
    event_loop: StdMutex<Option<JoinHandle<()>>>,
}


/// Handle to the playback session. Cheap to clone; all clones share one session.
#[derive( Clone )]
pub struct SessionManager {
    inner: Arc<Inner>,
}


impl SessionManager {
    /// Creates the session and starts its status-event loop.
    ///
    /// Must be called from within a Tokio runtime. No resource is created
    /// until the first playback command.
    pub fn new( config: SessionConfig, platform: Platform ) -> Self {
        let ( status_tx, status_rx ) = mpsc::unbounded_channel();
        let ( remote_tx, remote_rx ) = mpsc::unbounded_channel();
        let ( state, _ ) = watch::channel( SessionSnapshot::default() );

        let inner = Arc::new( Inner {
            library: LibrarySource::new( platform.media, config.scan_limit ),
            playlists: Mutex::new( PlaylistStore::new( Arc::clone( &platform.store ) ) ),
            config,
            engine: platform.engine,
            store: platform.store,
            notifications: platform.notifications,
            tracks: RwLock::new( Vec::new() ),
            state,
            slot: Mutex::new( None ),
            current_resource: AtomicU64::new( 0 ),
            next_resource_id: AtomicU64::new( 0 ),
            status_tx,
            remote_tx,
            restored_position: StdMutex::new( None ),
            app_state: StdMutex::new( AppState::Active ),
            action_subscription: StdMutex::new( None ),
            event_loop: StdMutex::new( None ),
        });

        let handle = tokio::spawn( event_loop( Arc::downgrade( &inner ), status_rx, remote_rx ) );
        *lock( &inner.event_loop ) = Some( handle );

        Self { inner }
    }


    /// Startup sequence: audio mode, library, playlists, resume state, notifications.
    ///
    /// Each step logs its own failure and the remaining steps still run.
    pub async fn initialize( &self ) {
        let inner = &self.inner;
        tracing::info!( "Setting up audio player" );

        if let Err( e ) = inner.engine.configure_background_playback().await {
            tracing::warn!( "Failed to configure background playback: {}", e );
        }

        if let Err( e ) = self.refresh_library().await {
            tracing::warn!( "Library unavailable: {}", e );
        }

        if let Err( e ) = inner.playlists.lock().await.load().await {
            tracing::error!( "Error loading playlists: {}", e );
        }

        let restored = inner.restore_resume_state().await;

        let remote_tx = inner.remote_tx.clone();
        let subscription = inner.notifications.on_action( move |cmd| {
            let _ = remote_tx.send( cmd );
        });
        *lock( &inner.action_subscription ) = Some( subscription );
        inner.notifications.setup().await;

        if let Some( track ) = restored {
            if inner.config.show_restored_notification {
                inner.notifications.show( &track, false ).await;
            }
        }
    }


    /// Rescans the media source and replaces the library.
    ///
    /// On failure the previous library is kept; a denied permission is recorded
    /// in the snapshot.
    pub async fn refresh_library( &self ) -> Result<usize, SessionError> {
        let inner = &self.inner;
        match inner.library.scan().await {
            Ok( tracks ) => {
                let count = tracks.len();
                *inner.tracks.write().unwrap_or_else( |e| e.into_inner() ) = tracks;
                inner.update( |s| s.permission_granted = true );
                Ok( count )
            }
            Err( LibraryError::PermissionDenied ) => {
                inner.update( |s| s.permission_granted = false );
                Err( LibraryError::PermissionDenied.into() )
            }
            Err( e ) => {
                tracing::error!( "Error loading tracks: {}", e );
                Err( e.into() )
            }
        }
    }


    /// Plays `track`, or resumes it if it is already the live track.
    pub async fn play_track( &self, track: Track ) -> Result<(), SessionError> {
        self.inner.play_track( track ).await
    }


    /// Pauses the live resource. No-op when nothing is loaded.
    pub async fn pause( &self ) -> Result<(), SessionError> {
        self.inner.pause().await
    }


    /// Resumes the live resource, or loads the current track if none is live.
    pub async fn resume( &self ) -> Result<(), SessionError> {
        self.inner.resume().await
    }


    /// Single entry point for list rows and play/pause buttons.
    ///
    /// Without a track, or with the current one, flips play/pause; any other
    /// track starts playing.
    pub async fn toggle( &self, track: Option<Track> ) -> Result<(), SessionError> {
        self.inner.toggle( track ).await
    }


    /// Plays the next library track, wrapping to the first.
    pub async fn next( &self ) -> Result<(), SessionError> {
        self.inner.skip( true ).await
    }


    /// Plays the previous library track, wrapping to the last.
    pub async fn previous( &self ) -> Result<(), SessionError> {
        self.inner.skip( false ).await
    }


    /// Seeks the live resource. The new position shows immediately and is
    /// corrected by the next poll.
    pub async fn seek_to( &self, position_ms: u64 ) -> Result<(), SessionError> {
        self.inner.seek_to( position_ms ).await
    }


    /// Runs a command issued from the notification controls.
    pub async fn handle_remote( &self, command: RemoteCommand ) -> Result<(), SessionError> {
        self.inner.handle_remote( command ).await
    }


    /// Reacts to the host moving between foreground and background.
    ///
    /// Leaving the foreground persists the resume state; returning reconciles
    /// session state with what the live resource actually reports.
    pub async fn handle_app_state( &self, next: AppState ) {
        let previous = std::mem::replace( &mut *lock( &self.inner.app_state ), next );

        match ( previous.is_foreground(), next.is_foreground() ) {
            ( true, false ) => {
                tracing::info!( "App went to background" );
                self.inner.persist_resume_state().await;
            }
            ( false, true ) => {
                tracing::info!( "App came to foreground" );
                self.inner.reconcile().await;
            }
            _ => {}
        }
    }


    /// Tears the session down: persists resume state, unloads the resource,
    /// stops background tasks and clears the notification.
    pub async fn shutdown( &self ) {
        let inner = &self.inner;
        tracing::info!( "Cleaning up audio player" );

        inner.persist_resume_state().await;

        {
            let mut slot = inner.slot.lock().await;
            if let Some( live ) = slot.take() {
                inner.current_resource.store( 0, Ordering::SeqCst );
                if let Err( e ) = live.teardown().await {
                    tracing::error!( "Error unloading sound: {}", e );
                }
            }
        }
        inner.update( |s| {
            s.is_playing = false;
            s.is_loading = false;
        });

        lock( &inner.action_subscription ).take();
        if let Some( handle ) = lock( &inner.event_loop ).take() {
            handle.abort();
        }
        inner.notifications.dismiss_all().await;
    }


    // Playlists


    /// Gets all playlists.
    pub async fn playlists( &self ) -> Vec<Playlist> {
        self.inner.playlists.lock().await.playlists().to_vec()
    }


    /// Gets one playlist by id.
    pub async fn playlist( &self, id: &str ) -> Option<Playlist> {
        self.inner.playlists.lock().await.get( id ).cloned()
    }


    pub async fn create_playlist( &self, name: &str ) -> Result<Playlist, SessionError> {
        Ok( self.inner.playlists.lock().await.create( name ).await? )
    }


    pub async fn rename_playlist( &self, id: &str, name: &str ) -> Result<bool, SessionError> {
        Ok( self.inner.playlists.lock().await.rename( id, name ).await? )
    }


    pub async fn delete_playlist( &self, id: &str ) -> Result<bool, SessionError> {
        Ok( self.inner.playlists.lock().await.delete( id ).await? )
    }


    /// Adds a track to a playlist. Adding a track already present is a no-op.
    pub async fn add_track_to_playlist( &self, playlist_id: &str, track: Track ) -> Result<bool, SessionError> {
        Ok( self.inner.playlists.lock().await.add_track( playlist_id, track ).await? )
    }


    pub async fn remove_track_from_playlist( &self, playlist_id: &str, track_id: &str ) -> Result<bool, SessionError> {
        Ok( self.inner.playlists.lock().await.remove_track( playlist_id, track_id ).await? )
    }


    // Observable state


    /// Subscribes to session state changes.
    pub fn subscribe( &self ) -> watch::Receiver<SessionSnapshot> {
        self.inner.state.subscribe()
    }


    /// Gets a copy of the current session state.
    pub fn snapshot( &self ) -> SessionSnapshot {
        self.inner.snapshot()
    }


    pub fn phase( &self ) -> SessionPhase {
        self.inner.state.borrow().phase()
    }


    /// Gets the library in scan order.
    pub fn tracks( &self ) -> Vec<Track> {
        self.inner.tracks.read().unwrap_or_else( |e| e.into_inner() ).clone()
    }


    /// Finds a library track by id.
    pub fn track( &self, id: &str ) -> Option<Track> {
        self.inner.tracks.read().unwrap_or_else( |e| e.into_inner() )
            .iter()
            .find( |t| t.id == id )
            .cloned()
    }


    pub fn current_track( &self ) -> Option<Track> {
        self.inner.state.borrow().current_track.clone()
    }


    pub fn is_playing( &self ) -> bool {
        self.inner.state.borrow().is_playing
    }


    pub fn is_loading( &self ) -> bool {
        self.inner.state.borrow().is_loading
    }


    /// Gets the playback position in milliseconds.
    pub fn position( &self ) -> u64 {
        self.inner.state.borrow().position_ms
    }


    /// Gets the current track's duration in milliseconds.
    pub fn duration( &self ) -> u64 {
        self.inner.state.borrow().duration_ms
    }


    pub fn permission_granted( &self ) -> bool {
        self.inner.state.borrow().permission_granted
    }


    /// Id of the live resource, if one is loaded.
    pub fn current_resource_id( &self ) -> Option<ResourceId> {
        match self.inner.current_resource.load( Ordering::SeqCst ) {
            0 => None,
            id => Some( id ),
        }
    }


    /// The notification bridge; platforms deliver notification taps through it.
    pub fn notifications( &self ) -> &NotificationBridge {
        &self.inner.notifications
    }


    #[cfg( test )]
    pub( crate ) fn status_sender( &self ) -> mpsc::UnboundedSender<StatusUpdate> {
        self.inner.status_tx.clone()
    }
}


impl Inner {
    fn snapshot( &self ) -> SessionSnapshot {
        self.state.borrow().clone()
    }


    /// Applies `f` to the state, notifying subscribers only if something changed.
    fn update( &self, f: impl FnOnce( &mut SessionSnapshot ) ) {
        self.state.send_if_modified( |s| {
            let before = s.clone();
            f( s );
            *s != before
        });
    }


    fn current_track_id( &self ) -> Option<String> {
        self.state.borrow().current_track.as_ref().map( |t| t.id.clone() )
    }


    async fn play_track( self: &Arc<Self>, track: Track ) -> Result<(), SessionError> {
        let mut slot = self.slot.lock().await;
        self.play_locked( &mut slot, track ).await
    }


    async fn play_locked( self: &Arc<Self>, slot: &mut Slot, track: Track ) -> Result<(), SessionError> {
        if slot.is_some() && self.current_track_id().as_deref() == Some( track.id.as_str() ) {
            return self.resume_live( slot ).await;
        }

        lock( &self.restored_position ).take();
        self.load( slot, track, 0 ).await
    }


    /// Swaps the live resource for a new one playing `track` from `start_ms`.
    async fn load( self: &Arc<Self>, slot: &mut Slot, track: Track, start_ms: u64 ) -> Result<(), SessionError> {
        tracing::info!( "Playing track: {}", track.display_title() );
        self.update( |s| s.is_loading = true );

        if let Some( previous ) = slot.take() {
            self.current_resource.store( 0, Ordering::SeqCst );
            tracing::debug!( "Unloading previous sound {}", previous.id() );
            if let Err( e ) = previous.teardown().await {
                tracing::warn!( "Error unloading previous sound: {}", e );
            }
        }

        let id = self.next_resource_id.fetch_add( 1, Ordering::SeqCst ) + 1;
        self.current_resource.store( id, Ordering::SeqCst );

        let request = CreateRequest {
            id,
            uri: track.uri.clone(),
            auto_start: true,
            start_position_ms: start_ms,
            status_tx: self.status_tx.clone(),
        };
        tracing::debug!( "Creating sound {} for {}", id, track.uri );

        let resource = match self.engine.create( request ).await {
            Ok( resource ) => resource,
            Err( e ) => {
                self.current_resource.store( 0, Ordering::SeqCst );
                tracing::error!( "Error playing track {}: {}", track.display_title(), e );
                self.update( |s| {
                    s.is_loading = false;
                    s.is_playing = false;
                });
                // Previous sound is gone; stop advertising playback
                match self.snapshot().current_track {
                    Some( current ) => self.notifications.show( &current, false ).await,
                    None => self.notifications.dismiss_all().await,
                }
                return Err( e.into() );
            }
        };

        *slot = Some( LiveResource {
            resource,
            poller: self.spawn_poller( id ),
        });

        self.update( |s| {
            s.current_track = Some( track.clone() );
            s.is_playing = true;
            s.is_loading = false;
            s.position_ms = start_ms;
            s.duration_ms = track.duration;
        });

        let resume = ResumeState { track, position_ms: start_ms };
        if let Err( e ) = resume.save( self.store.as_ref() ).await {
            tracing::warn!( "Failed to save last playing track: {}", e );
        }
        self.notifications.show( &resume.track, true ).await;

        tracing::info!( "Track playing successfully" );
        Ok(())
    }


    async fn pause( self: &Arc<Self> ) -> Result<(), SessionError> {
        let mut slot = self.slot.lock().await;
        let Some( live ) = slot.as_mut() else {
            return Ok(());
        };

        if let Err( e ) = live.resource.pause().await {
            tracing::error!( "Error pausing track: {}", e );
            return Err( e.into() );
        }

        self.update( |s| s.is_playing = false );
        self.refresh_notification( false ).await;
        tracing::info!( "Paused" );
        Ok(())
    }


    async fn resume( self: &Arc<Self> ) -> Result<(), SessionError> {
        let mut slot = self.slot.lock().await;
        if slot.is_some() {
            return self.resume_live( &mut slot ).await;
        }

        let Some( track ) = self.snapshot().current_track else {
            return Ok(());
        };
        tracing::info!( "No live sound, reloading {}", track.display_title() );
        let start_ms = lock( &self.restored_position ).take().unwrap_or( 0 );
        self.load( &mut slot, track, start_ms ).await
    }


    async fn resume_live( &self, slot: &mut Slot ) -> Result<(), SessionError> {
        let Some( live ) = slot.as_mut() else {
            return Ok(());
        };

        if let Err( e ) = live.resource.play().await {
            tracing::error!( "Error resuming track: {}", e );
            return Err( e.into() );
        }

        self.update( |s| s.is_playing = true );
        self.refresh_notification( true ).await;
        tracing::info!( "Resumed" );
        Ok(())
    }


    async fn toggle( self: &Arc<Self>, track: Option<Track> ) -> Result<(), SessionError> {
        if let Some( track ) = track {
            if self.current_track_id().as_deref() != Some( track.id.as_str() ) {
                return self.play_track( track ).await;
            }
        }

        let is_playing = self.state.borrow().is_playing;
        if is_playing {
            self.pause().await
        } else {
            self.resume().await
        }
    }


    async fn skip( self: &Arc<Self>, forward: bool ) -> Result<(), SessionError> {
        let mut slot = self.slot.lock().await;
        self.skip_locked( &mut slot, forward ).await
    }


    /// Picks the neighbour of the current track while the slot is held, so the
    /// target reflects every command that ran before this one.
    async fn skip_locked( self: &Arc<Self>, slot: &mut Slot, forward: bool ) -> Result<(), SessionError> {
        let Some( current_id ) = self.current_track_id() else {
            return Ok(());
        };

        let target = {
            let tracks = self.tracks.read().unwrap_or_else( |e| e.into_inner() );
            cyclic_neighbor( &tracks, &current_id, forward ).map( |i| tracks[ i ].clone() )
        };

        match target {
            Some( track ) => {
                tracing::info!( "Playing {} track", if forward { "next" } else { "previous" } );
                self.play_locked( slot, track ).await
            }
            None => Ok(()),
        }
    }


    /// Advances past the resource that just finished, unless another command
    /// replaced it while this update waited for the slot.
    async fn advance_after( self: &Arc<Self>, finished: ResourceId ) -> Result<(), SessionError> {
        let mut slot = self.slot.lock().await;
        if self.current_resource.load( Ordering::SeqCst ) != finished {
            tracing::debug!( "Sound {} was replaced before it could advance", finished );
            return Ok(());
        }
        self.skip_locked( &mut slot, true ).await
    }


    async fn seek_to( &self, position_ms: u64 ) -> Result<(), SessionError> {
        let mut slot = self.slot.lock().await;
        let Some( live ) = slot.as_mut() else {
            return Err( SessionError::NoResource );
        };

        tracing::info!( "Seeking to position: {}", position_ms );
        if let Err( e ) = live.resource.set_position( position_ms ).await {
            tracing::error!( "Error seeking to position: {}", e );
            return Err( e.into() );
        }

        self.update( |s| s.position_ms = position_ms );
        Ok(())
    }


    async fn handle_remote( self: &Arc<Self>, command: RemoteCommand ) -> Result<(), SessionError> {
        match command {
            RemoteCommand::Play => self.resume().await,
            RemoteCommand::Pause => self.pause().await,
            RemoteCommand::Next => self.skip( true ).await,
            RemoteCommand::Previous => self.skip( false ).await,
        }
    }


    async fn refresh_notification( &self, is_playing: bool ) {
        if let Some( track ) = self.snapshot().current_track {
            self.notifications.show( &track, is_playing ).await;
        }
    }


    fn spawn_poller( self: &Arc<Self>, id: ResourceId ) -> JoinHandle<()> {
        let weak = Arc::downgrade( self );
        let period = self.config.poll_interval;
        tokio::spawn( poll_loop( weak, id, period ) )
    }


    /// Mirrors the live resource's position into session state.
    async fn poll_once( &self, id: ResourceId ) {
        // Skip the tick while a command owns the resource
        let Ok( slot ) = self.slot.try_lock() else {
            return;
        };
        let Some( live ) = slot.as_ref().filter( |l| l.id() == id ) else {
            return;
        };

        match live.resource.status().await {
            Ok( status ) if status.is_loaded => self.update( |s| {
                s.position_ms = status.position_ms;
                if let Some( duration ) = status.duration_ms {
                    s.duration_ms = duration;
                }
            }),
            Ok( _ ) => {}
            Err( e ) => tracing::warn!( "Error updating position: {}", e ),
        }
    }


    /// Applies an engine status update if it comes from the owned resource.
    async fn on_status( self: &Arc<Self>, update: StatusUpdate ) {
        if update.resource != self.current_resource.load( Ordering::SeqCst ) {
            tracing::debug!( "Ignoring status from stale sound {}", update.resource );
            return;
        }

        let status = update.status;
        if !status.is_loaded {
            return;
        }
        self.update( |s| s.is_playing = status.is_playing );

        if status.did_just_finish {
            tracing::info!( "Track finished, playing next track" );
            if let Err( e ) = self.advance_after( update.resource ).await {
                tracing::error!( "Error playing next track: {}", e );
            }
        }
    }


    /// Re-reads the live resource and adopts what it reports.
    async fn reconcile( &self ) {
        let slot = self.slot.lock().await;
        let Some( live ) = slot.as_ref() else {
            return;
        };

        let status = match live.resource.status().await {
            Ok( status ) if status.is_loaded => status,
            Ok( _ ) => return,
            Err( e ) => {
                tracing::error!( "Error getting sound status: {}", e );
                return;
            }
        };

        let was_playing = self.state.borrow().is_playing;
        self.update( |s| {
            s.is_playing = status.is_playing;
            s.position_ms = status.position_ms;
            if let Some( duration ) = status.duration_ms {
                s.duration_ms = duration;
            }
        });

        if was_playing != status.is_playing {
            tracing::info!( "Playback changed while in background (playing: {})", status.is_playing );
            self.refresh_notification( status.is_playing ).await;
        }
    }


    async fn persist_resume_state( &self ) {
        let snapshot = self.snapshot();
        let Some( track ) = snapshot.current_track else {
            return;
        };

        let state = ResumeState { track, position_ms: snapshot.position_ms };
        if let Err( e ) = state.save( self.store.as_ref() ).await {
            tracing::warn!( "Failed to save resume state: {}", e );
        }
    }


    /// Loads the stored track and position into state without creating a resource.
    async fn restore_resume_state( &self ) -> Option<Track> {
        let state = match ResumeState::load( self.store.as_ref() ).await {
            Ok( Some( state ) ) => state,
            Ok( None ) => return None,
            Err( e ) => {
                tracing::warn!( "Failed to read resume state: {}", e );
                return None;
            }
        };

        tracing::info!( "Restoring last track: {} at position {}", state.track.display_title(), state.position_ms );
        *lock( &self.restored_position ) = Some( state.position_ms );
        self.update( |s| {
            s.current_track = Some( state.track.clone() );
            s.position_ms = state.position_ms;
            s.duration_ms = state.track.duration;
            s.is_playing = false;
        });
        Some( state.track )
    }
}


async fn poll_loop( session: Weak<Inner>, id: ResourceId, period: Duration ) {
    let mut ticker = tokio::time::interval_at( Instant::now() + period, period );
    ticker.set_missed_tick_behavior( MissedTickBehavior::Delay );

    loop {
        ticker.tick().await;
        let Some( inner ) = session.upgrade() else {
            break;
        };
        inner.poll_once( id ).await;
    }
}


/// Serializes engine status updates and notification commands.
async fn event_loop(
    session: Weak<Inner>,
    mut status_rx: mpsc::UnboundedReceiver<StatusUpdate>,
    mut remote_rx: mpsc::UnboundedReceiver<RemoteCommand>,
) {
    loop {
        tokio::select! {
            Some( update ) = status_rx.recv() => {
                let Some( inner ) = session.upgrade() else { break };
                inner.on_status( update ).await;
            }
            Some( command ) = remote_rx.recv() => {
                let Some( inner ) = session.upgrade() else { break };
                tracing::info!( "Remote command: {:?}", command );
                if let Err( e ) = inner.handle_remote( command ).await {
                    tracing::error!( "Remote command {:?} failed: {}", command, e );
                }
            }
            else => break,
        }
    }

    tracing::debug!( "Session event loop: exiting" );
}


#[cfg( test )]
mod tests {
    use super::*;
    use proptest::prelude::*;

    use crate::clock::ClockEngine;
    use crate::engine::PlaybackStatus;
    use crate::library::{ AssetRef, AudioAsset, MediaError, PermissionStatus };
    use crate::storage::MemoryStore;
    use crate::track::sample_track;


    struct NoMedia;


    #[async_trait::async_trait]
    impl MediaSource for NoMedia {
        async fn request_permission( &self ) -> Result<PermissionStatus, MediaError> {
            Ok( PermissionStatus::Granted )
        }


        async fn list_audio_assets( &self, _limit: usize ) -> Result<Vec<AssetRef>, MediaError> {
            Ok( Vec::new() )
        }


        async fn asset_info( &self, asset: &AssetRef ) -> Result<AudioAsset, MediaError> {
            Err( MediaError::NotFound( asset.id.clone() ) )
        }
    }


    fn session( engine: &ClockEngine ) -> SessionManager {
        SessionManager::new( SessionConfig::default(), Platform {
            engine: Arc::new( engine.clone() ),
            media: Arc::new( NoMedia ),
            store: Arc::new( MemoryStore::new() ),
            notifications: NotificationBridge::disabled(),
        })
    }


    fn ids( n: usize ) -> Vec<Track> {
        ( 0..n ).map( |i| sample_track( &i.to_string(), "x.mp3" ) ).collect()
    }


    #[test]
    fn test_cyclic_neighbor() {
        let tracks = ids( 3 );
        assert_eq!( cyclic_neighbor( &tracks, "1", true ), Some( 2 ) );
        assert_eq!( cyclic_neighbor( &tracks, "2", true ), Some( 0 ) );
        assert_eq!( cyclic_neighbor( &tracks, "0", false ), Some( 2 ) );
        assert_eq!( cyclic_neighbor( &tracks, "gone", true ), Some( 0 ) );
        assert_eq!( cyclic_neighbor( &tracks, "gone", false ), Some( 2 ) );
        assert_eq!( cyclic_neighbor( &[], "0", true ), None );
    }


    #[test]
    fn test_phase() {
        let mut snap = SessionSnapshot::default();
        assert_eq!( snap.phase(), SessionPhase::Idle );
        snap.current_track = Some( sample_track( "1", "a.mp3" ) );
        assert_eq!( snap.phase(), SessionPhase::Paused );
        snap.is_playing = true;
        assert_eq!( snap.phase(), SessionPhase::Playing );
        snap.is_loading = true;
        assert_eq!( snap.phase(), SessionPhase::Loading );
    }


    #[tokio::test( start_paused = true )]
    async fn test_stale_status_is_ignored() {
        let engine = ClockEngine::new();
        let session = session( &engine );

        session.play_track( sample_track( "a", "a.mp3" ) ).await.unwrap();
        let stale = session.current_resource_id().unwrap();
        session.play_track( sample_track( "b", "b.mp3" ) ).await.unwrap();
        assert!( session.is_playing() );

        session.status_sender().send( StatusUpdate {
            resource: stale,
            status: PlaybackStatus {
                is_loaded: true,
                is_playing: false,
                position_ms: 0,
                duration_ms: None,
                did_just_finish: true,
            },
        }).unwrap();
        tokio::time::sleep( Duration::from_millis( 10 ) ).await;

        assert!( session.is_playing() );
        assert_eq!( session.current_track().unwrap().id, "b" );
    }


    #[tokio::test( start_paused = true )]
    async fn test_finish_after_queued_play_is_dropped() {
        let engine = ClockEngine::new();
        let session = session( &engine );
        *session.inner.tracks.write().unwrap() = vec![
            sample_track( "a", "a.mp3" ),
            sample_track( "b", "b.mp3" ),
            sample_track( "c", "c.mp3" ),
        ];

        session.play_track( sample_track( "a", "a.mp3" ) ).await.unwrap();
        let finished = session.current_resource_id().unwrap();

        // Queue an explicit play behind a held slot, then let the finish arrive
        let guard = session.inner.slot.lock().await;
        let queued = {
            let session = session.clone();
            tokio::spawn( async move { session.play_track( sample_track( "c", "c.mp3" ) ).await } )
        };
        tokio::time::sleep( Duration::from_millis( 1 ) ).await;

        session.status_sender().send( StatusUpdate {
            resource: finished,
            status: PlaybackStatus {
                is_loaded: true,
                is_playing: false,
                position_ms: 0,
                duration_ms: None,
                did_just_finish: true,
            },
        }).unwrap();
        tokio::time::sleep( Duration::from_millis( 1 ) ).await;

        drop( guard );
        queued.await.unwrap().unwrap();
        tokio::time::sleep( Duration::from_millis( 10 ) ).await;

        assert_eq!( session.current_track().unwrap().id, "c" );
        assert!( session.is_playing() );
        assert_eq!( engine.created_count(), 2 );
    }


    #[tokio::test( start_paused = true )]
    async fn test_polling_mirrors_position() {
        let engine = ClockEngine::new();
        engine.register( "file:///music/a.mp3", 60_000 );
        let session = session( &engine );

        session.play_track( sample_track( "a", "a.mp3" ) ).await.unwrap();
        tokio::time::sleep( Duration::from_millis( 3_500 ) ).await;

        assert_eq!( session.position(), 3_000 );
        assert_eq!( session.duration(), 60_000 );
    }


    #[tokio::test( start_paused = true )]
    async fn test_seek_requires_resource() {
        let engine = ClockEngine::new();
        let session = session( &engine );

        assert!( matches!( session.seek_to( 5_000 ).await, Err( SessionError::NoResource ) ) );

        session.play_track( sample_track( "a", "a.mp3" ) ).await.unwrap();
        session.seek_to( 42_000 ).await.unwrap();
        assert_eq!( session.position(), 42_000 );
    }


    #[tokio::test( start_paused = true )]
    async fn test_pause_without_resource_is_noop() {
        let engine = ClockEngine::new();
        let session = session( &engine );

        session.pause().await.unwrap();
        session.resume().await.unwrap();
        assert_eq!( session.phase(), SessionPhase::Idle );
        assert_eq!( engine.created_count(), 0 );
    }


    proptest! {
        #[test]
        fn prop_next_then_previous_returns( len in 1usize..20, start in 0usize..20 ) {
            let tracks = ids( len );
            let start = start % len;
            let id = start.to_string();

            let next = cyclic_neighbor( &tracks, &id, true ).unwrap();
            let back = cyclic_neighbor( &tracks, &tracks[ next ].id, false ).unwrap();
            prop_assert_eq!( back, start );
            prop_assert!( next < len );
        }
    }
}
