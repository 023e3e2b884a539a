//! Now-playing notification bridge
//!
//! Keeps one platform notification in sync with playback and turns taps on
//! its action buttons into typed [`RemoteCommand`]s. Everything here is best
//! effort: platform failures are logged and never reach the caller.

use std::collections::HashMap;
use std::sync::{ Arc, Mutex as StdMutex, Weak };
use std::sync::atomic::{ AtomicU64, Ordering };

use async_trait::async_trait;
use serde::{ Deserialize, Serialize };
use thiserror::Error;
use tokio::sync::{ Mutex, OnceCell };

use crate::library::PermissionStatus;
use crate::track::Track;


/// Channel and category id used for the playback notification.
pub const PLAYBACK_CHANNEL: &str = "playback";

/// Action identifier delivered when the notification body itself is tapped.
pub const DEFAULT_ACTION: &str = "default";


/// Errors reported by a notification platform.
#[derive( Debug, Error )]
pub enum NotificationError {
    #[error( "Notification permission not granted" )]
    PermissionDenied,

    #[error( "Notification platform error: {0}" )]
    Platform( String ),
}


/// Command issued from the notification's controls.
#[derive( Debug, Clone, Copy, PartialEq, Eq, Hash )]
pub enum RemoteCommand {
    Play,
    Pause,
    Next,
    Previous,
}


impl RemoteCommand {
    pub const ALL: [RemoteCommand; 4] = [
        RemoteCommand::Play,
        RemoteCommand::Pause,
        RemoteCommand::Next,
        RemoteCommand::Previous,
    ];


    /// Identifier of the action button for this command.
    pub fn action_id( self ) -> &'static str {
        match self {
            RemoteCommand::Play => "play",
            RemoteCommand::Pause => "pause",
            RemoteCommand::Next => "next",
            RemoteCommand::Previous => "prev",
        }
    }


    /// Label shown on the action button.
    pub fn button_title( self ) -> &'static str {
        match self {
            RemoteCommand::Play => "Play",
            RemoteCommand::Pause => "Pause",
            RemoteCommand::Next => "Next",
            RemoteCommand::Previous => "Previous",
        }
    }


    pub fn from_action_id( id: &str ) -> Option<Self> {
        Self::ALL.into_iter().find( |c| c.action_id() == id )
    }
}


/// Importance level requested for a channel.
#[derive( Debug, Clone, Copy, PartialEq, Eq )]
pub enum Importance {
    Default,
    High,
    Max,
}


/// Platform channel description (one-time setup).
#[derive( Debug, Clone, PartialEq, Eq )]
pub struct ChannelSpec {
    pub id: String,
    pub name: String,
    pub importance: Importance,
    pub silent: bool,
    pub public_on_lock_screen: bool,
}


impl ChannelSpec {
    /// The silent, lock-screen-visible playback channel.
    pub fn playback() -> Self {
        Self {
            id: PLAYBACK_CHANNEL.to_string(),
            name: "Playback Controls".to_string(),
            importance: Importance::Max,
            silent: true,
            public_on_lock_screen: true,
        }
    }
}


/// Button attached to a notification category.
#[derive( Debug, Clone, PartialEq, Eq )]
pub struct ActionButton {
    pub identifier: String,
    pub title: String,
}


/// Data carried inside the notification and handed back on tap.
#[derive( Debug, Clone, PartialEq, Eq, Serialize, Deserialize )]
pub struct NotificationPayload {
    #[serde( rename = "trackId" )]
    pub track_id: String,
    #[serde( rename = "isPlaying" )]
    pub is_playing: bool,
}


/// A notification ready to present.
#[derive( Debug, Clone, PartialEq, Eq )]
pub struct NotificationContent {
    pub title: String,
    pub body: String,
    pub payload: NotificationPayload,
    pub category: String,
    pub sticky: bool,
    pub color: Option<String>,
    pub large_icon: Option<String>,
}


impl NotificationContent {
    /// Builds the now-playing notification for a track.
    pub fn now_playing( track: &Track, is_playing: bool ) -> Self {
        Self {
            title: track.display_title().to_string(),
            body: format!( "{} • {}", track.display_artist(), track.display_album() ),
            payload: NotificationPayload {
                track_id: track.id.clone(),
                is_playing,
            },
            category: PLAYBACK_CHANNEL.to_string(),
            sticky: true,
            color: Some( "#6200ee".to_string() ),
            large_icon: track.artwork.clone(),
        }
    }
}


/// User interaction with a presented notification.
#[derive( Debug, Clone, PartialEq, Eq )]
pub struct NotificationResponse {
    pub action_identifier: String,
    pub payload: Option<NotificationPayload>,
}


impl NotificationResponse {
    /// Maps the response to a command.
    ///
    /// A plain tap on the body toggles based on the playing flag carried in
    /// the payload; a missing payload is treated as paused.
    pub fn command( &self ) -> Option<RemoteCommand> {
        if self.action_identifier == DEFAULT_ACTION {
            let playing = self.payload.as_ref().map( |p| p.is_playing ).unwrap_or( false );
            return Some( if playing { RemoteCommand::Pause } else { RemoteCommand::Play } );
        }
        RemoteCommand::from_action_id( &self.action_identifier )
    }
}


/// OS notification service.
#[async_trait]
pub trait NotificationPlatform: Send + Sync {
    async fn create_channel( &self, channel: &ChannelSpec ) -> Result<(), NotificationError>;

    async fn register_category( &self, id: &str, actions: &[ActionButton] ) -> Result<(), NotificationError>;

    async fn permission_status( &self ) -> Result<PermissionStatus, NotificationError>;

    async fn request_permission( &self ) -> Result<PermissionStatus, NotificationError>;

    async fn present( &self, content: NotificationContent ) -> Result<(), NotificationError>;

    async fn dismiss_all( &self ) -> Result<(), NotificationError>;
}


type ActionHandler = Arc<dyn Fn( RemoteCommand ) + Send + Sync>;
type HandlerMap = StdMutex<HashMap<u64, ActionHandler>>;


/// Registration returned by [`NotificationBridge::on_action`].
///
/// The handler stays registered until this is dropped or unsubscribed.
pub struct ActionSubscription {
    id: u64,
    handlers: Weak<HandlerMap>,
}


impl ActionSubscription {
    pub fn unsubscribe( self ) {}
}


impl Drop for ActionSubscription {
    fn drop( &mut self ) {
        if let Some( handlers ) = self.handlers.upgrade() {
            handlers.lock().unwrap_or_else( |e| e.into_inner() ).remove( &self.id );
        }
    }
}


/// Best-effort bridge between playback state and the platform notification.
pub struct NotificationBridge {
    platform: Option<Arc<dyn NotificationPlatform>>,
    ready: OnceCell<()>,
    present_lock: Mutex<()>,
    handlers: Arc<HandlerMap>,
    next_handler_id: AtomicU64,
}


impl NotificationBridge {
    pub fn new( platform: Arc<dyn NotificationPlatform> ) -> Self {
        Self::with_platform( Some( platform ) )
    }


    /// A bridge that performs no platform calls. Action routing still works.
    pub fn disabled() -> Self {
        Self::with_platform( None )
    }


    fn with_platform( platform: Option<Arc<dyn NotificationPlatform>> ) -> Self {
        Self {
            platform,
            ready: OnceCell::new(),
            present_lock: Mutex::new( () ),
            handlers: Arc::new( StdMutex::new( HashMap::new() ) ),
            next_handler_id: AtomicU64::new( 0 ),
        }
    }


    pub fn is_enabled( &self ) -> bool {
        self.platform.is_some()
    }


    /// One-time channel, category and permission setup. Later calls return immediately.
    pub async fn setup( &self ) {
        let Some( platform ) = &self.platform else {
            return;
        };

        self.ready.get_or_init( || async {
            tracing::info!( "Setting up notifications" );

            if let Err( e ) = platform.create_channel( &ChannelSpec::playback() ).await {
                tracing::warn!( "Failed to create notification channel: {}", e );
            }

            let buttons: Vec<ActionButton> = RemoteCommand::ALL.iter()
                .map( |c| ActionButton {
                    identifier: c.action_id().to_string(),
                    title: c.button_title().to_string(),
                })
                .collect();
            if let Err( e ) = platform.register_category( PLAYBACK_CHANNEL, &buttons ).await {
                tracing::warn!( "Failed to register notification actions: {}", e );
            }

            Self::ensure_permission( platform.as_ref() ).await;
        }).await;
    }


    async fn ensure_permission( platform: &dyn NotificationPlatform ) {
        match platform.permission_status().await {
            Ok( PermissionStatus::Granted ) => {}
            Ok( _ ) => match platform.request_permission().await {
                Ok( status ) => tracing::info!( "Notification permission status: {:?}", status ),
                Err( e ) => tracing::warn!( "Notification permission request failed: {}", e ),
            },
            Err( e ) => tracing::warn!( "Failed to read notification permission: {}", e ),
        }
    }


    /// Asks for notification permission if it has not been granted yet.
    pub async fn request_permission( &self ) -> PermissionStatus {
        let Some( platform ) = &self.platform else {
            return PermissionStatus::Denied;
        };

        if let Ok( PermissionStatus::Granted ) = platform.permission_status().await {
            return PermissionStatus::Granted;
        }
        match platform.request_permission().await {
            Ok( status ) => status,
            Err( e ) => {
                tracing::warn!( "Notification permission request failed: {}", e );
                PermissionStatus::Denied
            }
        }
    }


    /// Replaces any shown notification with one for `track`.
    pub async fn show( &self, track: &Track, is_playing: bool ) {
        let Some( platform ) = &self.platform else {
            return;
        };

        let _guard = self.present_lock.lock().await;
        tracing::debug!( "Updating notification: {} (playing: {})", track.display_title(), is_playing );

        if let Err( e ) = platform.dismiss_all().await {
            tracing::warn!( "Failed to dismiss notifications: {}", e );
        }
        if let Err( e ) = platform.present( NotificationContent::now_playing( track, is_playing ) ).await {
            tracing::warn!( "Failed to show notification: {}", e );
        }
    }


    /// Removes every notification this app shows.
    pub async fn dismiss_all( &self ) {
        let Some( platform ) = &self.platform else {
            return;
        };

        let _guard = self.present_lock.lock().await;
        if let Err( e ) = platform.dismiss_all().await {
            tracing::warn!( "Failed to dismiss notifications: {}", e );
        }
    }


    /// Registers a handler for commands issued from the notification.
    pub fn on_action( &self, handler: impl Fn( RemoteCommand ) + Send + Sync + 'static ) -> ActionSubscription {
        let id = self.next_handler_id.fetch_add( 1, Ordering::Relaxed );
        self.handlers.lock().unwrap_or_else( |e| e.into_inner() ).insert( id, Arc::new( handler ) );

        ActionSubscription {
            id,
            handlers: Arc::downgrade( &self.handlers ),
        }
    }


    /// Entry point for the platform when the user interacts with the notification.
    ///
    /// @returns The command that was dispatched, if the response mapped to one
    pub fn handle_response( &self, response: &NotificationResponse ) -> Option<RemoteCommand> {
        tracing::info!( "Notification action received: {}", response.action_identifier );

        let Some( command ) = response.command() else {
            tracing::debug!( "Ignoring notification action {}", response.action_identifier );
            return None;
        };

        let handlers: Vec<ActionHandler> = self.handlers
            .lock()
            .unwrap_or_else( |e| e.into_inner() )
            .values()
            .cloned()
            .collect();
        for handler in handlers {
            handler( command );
        }

        Some( command )
    }
}


#[cfg( test )]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use crate::track::sample_track;


    #[derive( Debug, Clone, PartialEq )]
    enum Call {
        Channel( ChannelSpec ),
        Category( Vec<String> ),
        PermissionStatus,
        RequestPermission,
        Present( NotificationContent ),
        DismissAll,
    }


    #[derive( Default )]
    struct Recorder {
        calls: StdMutex<Vec<Call>>,
        granted: bool,
        failing: bool,
    }


    impl Recorder {
        fn record( &self, call: Call ) -> Result<(), NotificationError> {
            self.calls.lock().unwrap().push( call );
            if self.failing {
                return Err( NotificationError::Platform( "unavailable".into() ) );
            }
            Ok(())
        }


        fn calls( &self ) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }
    }


    #[async_trait]
    impl NotificationPlatform for Recorder {
        async fn create_channel( &self, channel: &ChannelSpec ) -> Result<(), NotificationError> {
            self.record( Call::Channel( channel.clone() ) )
        }


        async fn register_category( &self, _id: &str, actions: &[ActionButton] ) -> Result<(), NotificationError> {
            self.record( Call::Category( actions.iter().map( |a| a.identifier.clone() ).collect() ) )
        }


        async fn permission_status( &self ) -> Result<PermissionStatus, NotificationError> {
            self.record( Call::PermissionStatus )?;
            Ok( if self.granted { PermissionStatus::Granted } else { PermissionStatus::Undetermined } )
        }


        async fn request_permission( &self ) -> Result<PermissionStatus, NotificationError> {
            self.record( Call::RequestPermission )?;
            Ok( PermissionStatus::Granted )
        }


        async fn present( &self, content: NotificationContent ) -> Result<(), NotificationError> {
            self.record( Call::Present( content ) )
        }


        async fn dismiss_all( &self ) -> Result<(), NotificationError> {
            self.record( Call::DismissAll )
        }
    }


    fn response( action: &str, is_playing: Option<bool> ) -> NotificationResponse {
        NotificationResponse {
            action_identifier: action.to_string(),
            payload: is_playing.map( |is_playing| NotificationPayload {
                track_id: "1".into(),
                is_playing,
            }),
        }
    }


    #[tokio::test]
    async fn test_setup_runs_once() {
        let recorder = Arc::new( Recorder::default() );
        let bridge = NotificationBridge::new( recorder.clone() );

        bridge.setup().await;
        bridge.setup().await;

        let calls = recorder.calls();
        let channels: Vec<_> = calls.iter()
            .filter_map( |c| match c { Call::Channel( spec ) => Some( spec ), _ => None } )
            .collect();
        assert_eq!( channels.len(), 1 );
        assert_eq!( channels[ 0 ].id, PLAYBACK_CHANNEL );
        assert_eq!( channels[ 0 ].importance, Importance::Max );
        assert!( channels[ 0 ].silent );
        assert!( channels[ 0 ].public_on_lock_screen );
        assert!( calls.contains( &Call::Category( vec![
            "play".into(), "pause".into(), "next".into(), "prev".into(),
        ])));
        assert!( calls.contains( &Call::RequestPermission ) );
    }


    #[tokio::test]
    async fn test_setup_skips_request_when_granted() {
        let recorder = Arc::new( Recorder { granted: true, ..Default::default() } );
        let bridge = NotificationBridge::new( recorder.clone() );

        bridge.setup().await;
        assert!( !recorder.calls().contains( &Call::RequestPermission ) );
    }


    #[tokio::test]
    async fn test_show_dismisses_first() {
        let recorder = Arc::new( Recorder::default() );
        let bridge = NotificationBridge::new( recorder.clone() );
        let track = sample_track( "9", "Daft Punk - One More Time.mp3" );

        bridge.show( &track, true ).await;

        let calls = recorder.calls();
        assert_eq!( calls.len(), 2 );
        assert_eq!( calls[ 0 ], Call::DismissAll );
        let Call::Present( content ) = &calls[ 1 ] else { panic!( "expected present" ) };
        assert_eq!( content.title, "One More Time" );
        assert_eq!( content.body, "Daft Punk • Unknown Album" );
        assert_eq!( content.payload, NotificationPayload { track_id: "9".into(), is_playing: true } );
        assert!( content.sticky );
    }


    #[tokio::test]
    async fn test_platform_errors_are_swallowed() {
        let recorder = Arc::new( Recorder { failing: true, ..Default::default() } );
        let bridge = NotificationBridge::new( recorder.clone() );

        bridge.setup().await;
        bridge.show( &sample_track( "1", "a.mp3" ), false ).await;
        bridge.dismiss_all().await;

        assert!( recorder.calls().len() >= 4 );
    }


    #[tokio::test]
    async fn test_disabled_bridge_is_silent() {
        let bridge = NotificationBridge::disabled();
        bridge.setup().await;
        bridge.show( &sample_track( "1", "a.mp3" ), true ).await;
        assert!( !bridge.is_enabled() );
        assert_eq!( bridge.request_permission().await, PermissionStatus::Denied );
    }


    #[test]
    fn test_action_mapping() {
        assert_eq!( response( "play", None ).command(), Some( RemoteCommand::Play ) );
        assert_eq!( response( "pause", None ).command(), Some( RemoteCommand::Pause ) );
        assert_eq!( response( "next", None ).command(), Some( RemoteCommand::Next ) );
        assert_eq!( response( "prev", None ).command(), Some( RemoteCommand::Previous ) );
        assert_eq!( response( "snooze", None ).command(), None );
    }


    #[test]
    fn test_default_tap_infers_from_payload() {
        assert_eq!( response( DEFAULT_ACTION, Some( true ) ).command(), Some( RemoteCommand::Pause ) );
        assert_eq!( response( DEFAULT_ACTION, Some( false ) ).command(), Some( RemoteCommand::Play ) );
        assert_eq!( response( DEFAULT_ACTION, None ).command(), Some( RemoteCommand::Play ) );
    }


    #[test]
    fn test_handlers_and_unsubscribe() {
        let bridge = NotificationBridge::disabled();
        let count = Arc::new( AtomicUsize::new( 0 ) );
        let seen = Arc::new( StdMutex::new( Vec::new() ) );

        let counter = count.clone();
        let sub = bridge.on_action( move |_| { counter.fetch_add( 1, Ordering::SeqCst ); } );
        let log = seen.clone();
        let _keep = bridge.on_action( move |cmd| log.lock().unwrap().push( cmd ) );

        assert_eq!( bridge.handle_response( &response( "next", None ) ), Some( RemoteCommand::Next ) );
        sub.unsubscribe();
        bridge.handle_response( &response( DEFAULT_ACTION, Some( true ) ) );
        assert_eq!( bridge.handle_response( &response( "bogus", None ) ), None );

        assert_eq!( count.load( Ordering::SeqCst ), 1 );
        assert_eq!( *seen.lock().unwrap(), vec![ RemoteCommand::Next, RemoteCommand::Pause ] );
    }


    #[test]
    fn test_payload_json_shape() {
        let payload = NotificationPayload { track_id: "5".into(), is_playing: false };
        assert_eq!( serde_json::to_string( &payload ).unwrap(), r#"{"trackId":"5","isPlaying":false}"# );
    }
}
