//! Session-level behavior driven through the public API with a clock engine
//! and in-memory platform fakes.

use std::sync::{ Arc, Mutex };
use std::time::Duration;

use async_trait::async_trait;
use proptest::prelude::*;

use tunedeck_core::library::{ AssetRef, AudioAsset, MediaError };
use tunedeck_core::notification::{
    ActionButton, ChannelSpec, NotificationContent, NotificationError, NotificationPayload,
};
use tunedeck_core::{
    AppState, ClockEngine, ClockOp, KeyValueStore, MediaSource, MemoryStore, NotificationBridge,
    NotificationPlatform, NotificationResponse, PermissionStatus, Platform, ResumeState,
    SessionConfig, SessionError, SessionManager, SessionPhase, Track,
};


struct FakeMedia {
    assets: Vec<AudioAsset>,
    granted: bool,
}


#[async_trait]
impl MediaSource for FakeMedia {
    async fn request_permission( &self ) -> Result<PermissionStatus, MediaError> {
        Ok( if self.granted { PermissionStatus::Granted } else { PermissionStatus::Denied } )
    }


    async fn list_audio_assets( &self, limit: usize ) -> Result<Vec<AssetRef>, MediaError> {
        Ok( self.assets.iter().take( limit ).map( |a| AssetRef { id: a.id.clone() } ).collect() )
    }


    async fn asset_info( &self, asset: &AssetRef ) -> Result<AudioAsset, MediaError> {
        self.assets.iter()
            .find( |a| a.id == asset.id )
            .cloned()
            .ok_or_else( || MediaError::NotFound( asset.id.clone() ) )
    }
}


/// Notification platform that records every call.
#[derive( Default )]
struct Recorder {
    calls: Mutex<Vec<String>>,
    presented: Mutex<Vec<NotificationContent>>,
}


impl Recorder {
    fn calls( &self ) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }


    fn last_presented( &self ) -> Option<NotificationContent> {
        self.presented.lock().unwrap().last().cloned()
    }


    fn record( &self, call: &str ) {
        self.calls.lock().unwrap().push( call.to_string() );
    }
}


#[async_trait]
impl NotificationPlatform for Recorder {
    async fn create_channel( &self, _channel: &ChannelSpec ) -> Result<(), NotificationError> {
        self.record( "channel" );
        Ok(())
    }


    async fn register_category( &self, _id: &str, _actions: &[ActionButton] ) -> Result<(), NotificationError> {
        self.record( "category" );
        Ok(())
    }


    async fn permission_status( &self ) -> Result<PermissionStatus, NotificationError> {
        Ok( PermissionStatus::Granted )
    }


    async fn request_permission( &self ) -> Result<PermissionStatus, NotificationError> {
        Ok( PermissionStatus::Granted )
    }


    async fn present( &self, content: NotificationContent ) -> Result<(), NotificationError> {
        self.record( "present" );
        self.presented.lock().unwrap().push( content );
        Ok(())
    }


    async fn dismiss_all( &self ) -> Result<(), NotificationError> {
        self.record( "dismiss" );
        Ok(())
    }
}


/// Library `[A, B, C]`; each track lasts `secs` seconds on the clock engine.
fn assets( secs: f64 ) -> Vec<AudioAsset> {
    [ "a", "b", "c" ].iter()
        .map( |id| AudioAsset {
            id: id.to_string(),
            uri: format!( "mem://{}", id ),
            filename: format!( "Band - Song {}.mp3", id.to_uppercase() ),
            duration_secs: secs,
        })
        .collect()
}


struct Harness {
    session: SessionManager,
    engine: ClockEngine,
    store: Arc<MemoryStore>,
    notifications: Arc<Recorder>,
}


impl Harness {
    fn build( media: FakeMedia, store: Arc<MemoryStore> ) -> Self {
        let engine = ClockEngine::new();
        for asset in &media.assets {
            engine.register( asset.uri.clone(), ( asset.duration_secs * 1000.0 ) as u64 );
        }
        let notifications = Arc::new( Recorder::default() );

        let session = SessionManager::new( SessionConfig::default(), Platform {
            engine: Arc::new( engine.clone() ),
            media: Arc::new( media ),
            store: store.clone(),
            notifications: NotificationBridge::new( notifications.clone() ),
        });

        Self { session, engine, store, notifications }
    }


    async fn start( secs: f64 ) -> Self {
        let harness = Self::build( FakeMedia { assets: assets( secs ), granted: true }, Arc::new( MemoryStore::new() ) );
        harness.session.initialize().await;
        harness
    }


    fn track( &self, id: &str ) -> Track {
        self.session.track( id ).unwrap()
    }


    fn current_id( &self ) -> Option<String> {
        self.session.current_track().map( |t| t.id )
    }
}


/// Lets spawned tasks (event loop, pollers) drain pending work.
async fn settle() {
    tokio::time::sleep( Duration::from_millis( 5 ) ).await;
}


#[tokio::test( start_paused = true )]
async fn test_initialize_loads_library() {
    let h = Harness::start( 60.0 ).await;

    let tracks = h.session.tracks();
    assert_eq!( tracks.len(), 3 );
    assert_eq!( tracks[ 0 ].artist, "Band" );
    assert_eq!( tracks[ 0 ].title, "Song A" );
    assert_eq!( tracks[ 0 ].duration, 60_000 );
    assert!( h.session.permission_granted() );
    assert_eq!( h.session.phase(), SessionPhase::Idle );
    assert_eq!( h.engine.created_count(), 0 );
}


#[tokio::test( start_paused = true )]
async fn test_permission_denied_is_recorded() {
    let h = Harness::build( FakeMedia { assets: assets( 60.0 ), granted: false }, Arc::new( MemoryStore::new() ) );
    h.session.initialize().await;

    assert!( !h.session.permission_granted() );
    assert!( h.session.tracks().is_empty() );
    assert!( matches!( h.session.refresh_library().await, Err( SessionError::Library( _ ) ) ) );
}


#[tokio::test( start_paused = true )]
async fn test_play_track_updates_state() {
    let h = Harness::start( 60.0 ).await;
    let a = h.track( "a" );

    h.session.play_track( a.clone() ).await.unwrap();

    let snap = h.session.snapshot();
    assert_eq!( snap.current_track, Some( a.clone() ) );
    assert!( snap.is_playing );
    assert!( !snap.is_loading );
    assert_eq!( snap.duration_ms, 60_000 );
    assert_eq!( h.engine.live_count(), 1 );

    let resume = ResumeState::load( h.store.as_ref() ).await.unwrap().unwrap();
    assert_eq!( resume.track, a );
    assert_eq!( resume.position_ms, 0 );

    let shown = h.notifications.last_presented().unwrap();
    assert_eq!( shown.title, "Song A" );
    assert!( shown.payload.is_playing );
}


#[tokio::test( start_paused = true )]
async fn test_single_resource_sequential() {
    let h = Harness::start( 60.0 ).await;

    for id in [ "a", "b", "c", "a", "c", "b" ] {
        h.session.play_track( h.track( id ) ).await.unwrap();
        assert_eq!( h.engine.live_count(), 1 );
    }

    assert_eq!( h.engine.peak_live(), 1 );
    assert_eq!( h.engine.created_count(), 6 );
    assert_eq!( h.current_id().as_deref(), Some( "b" ) );
}


#[tokio::test( start_paused = true )]
async fn test_single_resource_concurrent() {
    let h = Harness::start( 60.0 ).await;
    h.engine.set_create_delay( Duration::from_millis( 200 ) );

    let ( first, second, third ) = tokio::join!(
        h.session.play_track( h.track( "a" ) ),
        h.session.play_track( h.track( "b" ) ),
        h.session.play_track( h.track( "c" ) ),
    );
    first.unwrap();
    second.unwrap();
    third.unwrap();

    assert_eq!( h.engine.peak_live(), 1 );
    assert_eq!( h.engine.live_count(), 1 );
    assert_eq!( h.session.current_resource_id(), h.engine.live_ids().first().copied() );
    assert!( !h.session.is_loading() );
}


#[tokio::test( start_paused = true )]
async fn test_toggle_alternates() {
    let h = Harness::start( 60.0 ).await;
    let b = h.track( "b" );

    h.session.play_track( b.clone() ).await.unwrap();
    assert_eq!( h.session.phase(), SessionPhase::Playing );

    h.session.toggle( Some( b.clone() ) ).await.unwrap();
    assert_eq!( h.session.phase(), SessionPhase::Paused );

    h.session.toggle( Some( b ) ).await.unwrap();
    assert_eq!( h.session.phase(), SessionPhase::Playing );
    assert_eq!( h.engine.created_count(), 1 );
}


#[tokio::test( start_paused = true )]
async fn test_toggle_other_track_plays_it() {
    let h = Harness::start( 60.0 ).await;

    h.session.toggle( Some( h.track( "a" ) ) ).await.unwrap();
    h.session.toggle( Some( h.track( "c" ) ) ).await.unwrap();

    assert_eq!( h.current_id().as_deref(), Some( "c" ) );
    assert!( h.session.is_playing() );

    h.session.toggle( None ).await.unwrap();
    assert!( !h.session.is_playing() );
}


#[tokio::test( start_paused = true )]
async fn test_play_same_track_resumes() {
    let h = Harness::start( 60.0 ).await;
    let a = h.track( "a" );

    h.session.play_track( a.clone() ).await.unwrap();
    h.session.pause().await.unwrap();
    h.session.play_track( a ).await.unwrap();

    assert!( h.session.is_playing() );
    assert_eq!( h.engine.created_count(), 1 );
}


#[tokio::test( start_paused = true )]
async fn test_cyclic_navigation() {
    let h = Harness::start( 60.0 ).await;

    h.session.play_track( h.track( "b" ) ).await.unwrap();
    h.session.next().await.unwrap();
    assert_eq!( h.current_id().as_deref(), Some( "c" ) );

    h.session.next().await.unwrap();
    assert_eq!( h.current_id().as_deref(), Some( "a" ) );

    h.session.previous().await.unwrap();
    assert_eq!( h.current_id().as_deref(), Some( "c" ) );
}


#[tokio::test( start_paused = true )]
async fn test_navigation_without_current_is_noop() {
    let h = Harness::start( 60.0 ).await;

    h.session.next().await.unwrap();
    h.session.previous().await.unwrap();

    assert_eq!( h.session.phase(), SessionPhase::Idle );
    assert_eq!( h.engine.created_count(), 0 );
}


#[tokio::test( start_paused = true )]
async fn test_auto_advance_on_finish() {
    let h = Harness::start( 5.0 ).await;

    h.session.play_track( h.track( "b" ) ).await.unwrap();
    tokio::time::sleep( Duration::from_millis( 5_100 ) ).await;

    assert_eq!( h.current_id().as_deref(), Some( "c" ) );
    assert!( h.session.is_playing() );
    assert_eq!( h.engine.live_count(), 1 );
}


#[tokio::test( start_paused = true )]
async fn test_auto_advance_wraps() {
    let h = Harness::start( 2.0 ).await;

    h.session.play_track( h.track( "c" ) ).await.unwrap();
    tokio::time::sleep( Duration::from_millis( 2_050 ) ).await;

    assert_eq!( h.current_id().as_deref(), Some( "a" ) );
}


#[tokio::test( start_paused = true )]
async fn test_foreground_reconciles_external_pause() {
    let h = Harness::start( 60.0 ).await;

    h.session.play_track( h.track( "a" ) ).await.unwrap();
    h.session.handle_app_state( AppState::Background ).await;

    let id = h.session.current_resource_id().unwrap();
    assert!( h.engine.interrupt( id ) );
    tokio::time::sleep( Duration::from_millis( 1_500 ) ).await;
    assert!( h.session.is_playing() );

    h.session.handle_app_state( AppState::Active ).await;
    assert!( !h.session.is_playing() );
    assert_eq!( h.session.phase(), SessionPhase::Paused );
}


#[tokio::test( start_paused = true )]
async fn test_background_persists_position() {
    let h = Harness::start( 60.0 ).await;

    h.session.play_track( h.track( "b" ) ).await.unwrap();
    tokio::time::sleep( Duration::from_millis( 2_500 ) ).await;
    h.session.handle_app_state( AppState::Inactive ).await;

    let resume = ResumeState::load( h.store.as_ref() ).await.unwrap().unwrap();
    assert_eq!( resume.track.id, "b" );
    assert_eq!( resume.position_ms, 2_000 );
}


#[tokio::test( start_paused = true )]
async fn test_restore_without_resource() {
    let store = Arc::new( MemoryStore::new() );
    let track = assets( 60.0 ).into_iter()
        .map( tunedeck_core::library::track_from_asset )
        .nth( 1 )
        .unwrap();
    ResumeState { track: track.clone(), position_ms: 30_000 }.save( store.as_ref() ).await.unwrap();

    let h = Harness::build( FakeMedia { assets: assets( 60.0 ), granted: true }, store );
    h.session.initialize().await;

    let snap = h.session.snapshot();
    assert_eq!( snap.current_track, Some( track ) );
    assert_eq!( snap.position_ms, 30_000 );
    assert!( !snap.is_playing );
    assert_eq!( h.session.current_resource_id(), None );
    assert_eq!( h.engine.created_count(), 0 );

    let shown = h.notifications.last_presented().unwrap();
    assert!( !shown.payload.is_playing );

    h.session.resume().await.unwrap();
    assert!( h.session.is_playing() );
    assert_eq!( h.session.position(), 30_000 );

    tokio::time::sleep( Duration::from_millis( 1_500 ) ).await;
    assert_eq!( h.session.position(), 31_000 );
}


#[tokio::test( start_paused = true )]
async fn test_failed_create_clears_loading() {
    let h = Harness::start( 60.0 ).await;
    h.engine.fail_uri( "mem://b" );

    h.session.play_track( h.track( "a" ) ).await.unwrap();
    let result = h.session.play_track( h.track( "b" ) ).await;

    assert!( matches!( result, Err( SessionError::Resource( _ ) ) ) );
    assert!( !h.session.is_loading() );
    assert!( !h.session.is_playing() );
    assert_eq!( h.current_id().as_deref(), Some( "a" ) );
    assert_eq!( h.engine.live_count(), 0 );
    assert_eq!( h.session.current_resource_id(), None );
}


#[tokio::test( start_paused = true )]
async fn test_failed_switch_updates_notification() {
    let h = Harness::start( 60.0 ).await;
    h.engine.fail_uri( "mem://b" );

    h.session.play_track( h.track( "a" ) ).await.unwrap();
    assert!( h.session.play_track( h.track( "b" ) ).await.is_err() );

    let shown = h.notifications.last_presented().unwrap();
    assert_eq!( shown.payload.is_playing, h.session.is_playing() );
    assert!( !shown.payload.is_playing );
    assert_eq!( shown.title, "Song A" );
    assert_eq!( shown.payload.track_id, "a" );
}


#[tokio::test( start_paused = true )]
async fn test_failed_pause_keeps_playing() {
    let h = Harness::start( 60.0 ).await;
    h.session.play_track( h.track( "a" ) ).await.unwrap();

    h.engine.fail_next( ClockOp::Pause );
    assert!( matches!( h.session.pause().await, Err( SessionError::Resource( _ ) ) ) );
    assert!( h.session.is_playing() );
    assert!( h.notifications.last_presented().unwrap().payload.is_playing );

    h.session.pause().await.unwrap();
    assert!( !h.session.is_playing() );
}


#[tokio::test( start_paused = true )]
async fn test_failed_resume_stays_paused() {
    let h = Harness::start( 60.0 ).await;
    h.session.play_track( h.track( "a" ) ).await.unwrap();
    h.session.pause().await.unwrap();

    h.engine.fail_next( ClockOp::Play );
    assert!( h.session.resume().await.is_err() );
    assert_eq!( h.session.phase(), SessionPhase::Paused );
    assert!( !h.notifications.last_presented().unwrap().payload.is_playing );
}


#[tokio::test( start_paused = true )]
async fn test_failed_seek_keeps_position() {
    let h = Harness::start( 60.0 ).await;
    h.session.play_track( h.track( "a" ) ).await.unwrap();
    h.session.pause().await.unwrap();
    h.session.seek_to( 10_000 ).await.unwrap();

    h.engine.fail_next( ClockOp::Seek );
    assert!( matches!( h.session.seek_to( 30_000 ).await, Err( SessionError::Resource( _ ) ) ) );
    assert_eq!( h.session.position(), 10_000 );

    tokio::time::sleep( Duration::from_millis( 1_100 ) ).await;
    assert_eq!( h.session.position(), 10_000 );
}


#[tokio::test( start_paused = true )]
async fn test_failed_unload_keeps_single_resource() {
    let h = Harness::start( 60.0 ).await;
    h.session.play_track( h.track( "a" ) ).await.unwrap();

    h.engine.fail_next( ClockOp::Unload );
    h.session.play_track( h.track( "b" ) ).await.unwrap();

    assert_eq!( h.current_id().as_deref(), Some( "b" ) );
    assert!( h.session.is_playing() );
    assert_eq!( h.engine.live_count(), 1 );
    assert_eq!( h.engine.peak_live(), 1 );
    assert_eq!( h.engine.live_ids(), vec![ h.session.current_resource_id().unwrap() ] );
}


#[tokio::test( start_paused = true )]
async fn test_seek_is_optimistic() {
    let h = Harness::start( 60.0 ).await;

    assert!( matches!( h.session.seek_to( 1_000 ).await, Err( SessionError::NoResource ) ) );

    h.session.play_track( h.track( "a" ) ).await.unwrap();
    h.session.seek_to( 45_000 ).await.unwrap();
    assert_eq!( h.session.position(), 45_000 );

    tokio::time::sleep( Duration::from_millis( 1_100 ) ).await;
    assert_eq!( h.session.position(), 46_000 );
}


#[tokio::test( start_paused = true )]
async fn test_notification_default_tap_pauses() {
    let h = Harness::start( 60.0 ).await;
    let a = h.track( "a" );
    h.session.play_track( a.clone() ).await.unwrap();

    let command = h.session.notifications().handle_response( &NotificationResponse {
        action_identifier: "default".into(),
        payload: Some( NotificationPayload { track_id: a.id.clone(), is_playing: true } ),
    });
    assert!( command.is_some() );
    settle().await;

    assert!( !h.session.is_playing() );
}


#[tokio::test( start_paused = true )]
async fn test_notification_next_action() {
    let h = Harness::start( 60.0 ).await;
    h.session.play_track( h.track( "a" ) ).await.unwrap();

    h.session.notifications().handle_response( &NotificationResponse {
        action_identifier: "next".into(),
        payload: None,
    });
    settle().await;

    assert_eq!( h.current_id().as_deref(), Some( "b" ) );
}


#[tokio::test( start_paused = true )]
async fn test_notification_setup_once() {
    let h = Harness::start( 60.0 ).await;
    h.session.initialize().await;

    let calls = h.notifications.calls();
    assert_eq!( calls.iter().filter( |c| *c == "channel" ).count(), 1 );
    assert_eq!( calls.iter().filter( |c| *c == "category" ).count(), 1 );
}


#[tokio::test( start_paused = true )]
async fn test_playlist_crud_through_session() {
    let h = Harness::start( 60.0 ).await;

    let list = h.session.create_playlist( "Mix" ).await.unwrap();
    assert!( h.session.add_track_to_playlist( &list.id, h.track( "a" ) ).await.unwrap() );
    assert!( !h.session.add_track_to_playlist( &list.id, h.track( "a" ) ).await.unwrap() );
    assert!( h.session.rename_playlist( &list.id, "Road" ).await.unwrap() );

    let stored = h.session.playlist( &list.id ).await.unwrap();
    assert_eq!( stored.name, "Road" );
    assert_eq!( stored.tracks.len(), 1 );
    assert!( h.store.get( "playlists" ).await.unwrap().unwrap().contains( "Road" ) );

    assert!( h.session.remove_track_from_playlist( &list.id, "a" ).await.unwrap() );
    assert!( h.session.delete_playlist( &list.id ).await.unwrap() );
    assert!( h.session.playlists().await.is_empty() );
    assert!( matches!( h.session.create_playlist( "  " ).await, Err( SessionError::Playlist( _ ) ) ) );
}


#[tokio::test( start_paused = true )]
async fn test_subscribe_sees_transitions() {
    let h = Harness::start( 60.0 ).await;
    let mut rx = h.session.subscribe();

    h.session.play_track( h.track( "a" ) ).await.unwrap();
    rx.changed().await.unwrap();
    assert_eq!( rx.borrow_and_update().phase(), SessionPhase::Playing );
}


#[tokio::test( start_paused = true )]
async fn test_shutdown_releases_everything() {
    let h = Harness::start( 60.0 ).await;
    h.session.play_track( h.track( "c" ) ).await.unwrap();
    tokio::time::sleep( Duration::from_millis( 3_200 ) ).await;

    h.session.shutdown().await;

    assert_eq!( h.engine.live_count(), 0 );
    assert!( !h.session.is_playing() );
    assert_eq!( h.notifications.calls().last().map( String::as_str ), Some( "dismiss" ) );

    let resume = ResumeState::load( h.store.as_ref() ).await.unwrap().unwrap();
    assert_eq!( resume.track.id, "c" );
    assert_eq!( resume.position_ms, 3_000 );
}


fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .start_paused( true )
        .build()
        .unwrap()
}


proptest! {
    #![proptest_config( ProptestConfig::with_cases( 32 ) )]

    #[test]
    fn prop_single_resource_for_any_sequence( picks in proptest::collection::vec( 0usize..3, 1..12 ) ) {
        let ( peak, live ) = runtime().block_on( async {
            let h = Harness::start( 60.0 ).await;
            for i in picks {
                let id = [ "a", "b", "c" ][ i ];
                h.session.play_track( h.track( id ) ).await.unwrap();
            }
            ( h.engine.peak_live(), h.engine.live_count() )
        });

        prop_assert_eq!( peak, 1 );
        prop_assert_eq!( live, 1 );
    }
}
