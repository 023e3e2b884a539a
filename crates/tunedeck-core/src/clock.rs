//! Headless clock-driven audio engine
//!
//! Produces no sound. Each resource advances its position against the tokio
//! clock and reports natural completion once its known duration elapses,
//! which is enough to drive a session without an audio device and makes
//! timing deterministic under `tokio::time::pause`.

use std::collections::{ HashMap, HashSet };
use std::sync::{ Arc, Mutex as StdMutex, MutexGuard };
use std::sync::atomic::{ AtomicUsize, Ordering };
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::engine::{
    AudioEngine, CreateRequest, EngineError, PlaybackStatus, ResourceId, SoundResource, StatusUpdate,
};


fn lock<T>( mutex: &StdMutex<T> ) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else( |e| e.into_inner() )
}


/// Playback clock of one resource.
#[derive( Debug )]
struct ClockState {
    loaded: bool,
    playing: bool,
    /// Position when `anchor` was taken
    base_ms: u64,
    anchor: Instant,
    duration_ms: Option<u64>,
}


impl ClockState {
    fn position( &self ) -> u64 {
        let mut pos = self.base_ms;
        if self.playing {
            pos += self.anchor.elapsed().as_millis() as u64;
        }
        match self.duration_ms {
            Some( d ) => pos.min( d ),
            None => pos,
        }
    }


    /// Re-anchors the clock at the current position.
    fn freeze( &mut self ) {
        self.base_ms = self.position();
        self.anchor = Instant::now();
    }


    fn status( &self, did_just_finish: bool ) -> PlaybackStatus {
        PlaybackStatus {
            is_loaded: self.loaded,
            is_playing: self.playing,
            position_ms: self.position(),
            duration_ms: self.duration_ms,
            did_just_finish,
        }
    }
}


/// Resource operation that can be made to fail once.
#[derive( Debug, Clone, Copy, PartialEq, Eq, Hash )]
pub enum ClockOp {
    Play,
    Pause,
    Seek,
    Unload,
}


#[derive( Default )]
struct Shared {
    durations: StdMutex<HashMap<String, u64>>,
    failing: StdMutex<HashSet<String>>,
    /// Operations whose next call on any resource fails
    faults: StdMutex<HashSet<ClockOp>>,
    live: StdMutex<HashMap<ResourceId, Arc<StdMutex<ClockState>>>>,
    create_delay: StdMutex<Duration>,
    peak_live: AtomicUsize,
    created: AtomicUsize,
}


/// Engine whose resources only keep time.
#[derive( Clone, Default )]
pub struct ClockEngine {
    shared: Arc<Shared>,
}


impl ClockEngine {
    pub fn new() -> Self {
        Self::default()
    }


    /// Sets the duration reported for `uri`. Unregistered URIs never finish.
    pub fn register( &self, uri: impl Into<String>, duration_ms: u64 ) {
        lock( &self.shared.durations ).insert( uri.into(), duration_ms );
    }


    /// Makes every future `create` for `uri` fail.
    pub fn fail_uri( &self, uri: impl Into<String> ) {
        lock( &self.shared.failing ).insert( uri.into() );
    }


    /// Makes the next `op` on any live resource fail without touching its clock.
    pub fn fail_next( &self, op: ClockOp ) {
        lock( &self.shared.faults ).insert( op );
    }


    /// Delays every `create` by `delay`, simulating a slow load.
    pub fn set_create_delay( &self, delay: Duration ) {
        *lock( &self.shared.create_delay ) = delay;
    }


    /// Pauses a live resource without emitting any status update, as when the
    /// OS pauses playback while the app is not listening.
    ///
    /// @returns false if no live resource has this id
    pub fn interrupt( &self, id: ResourceId ) -> bool {
        let Some( state ) = lock( &self.shared.live ).get( &id ).cloned() else {
            return false;
        };
        let mut state = lock( &state );
        state.freeze();
        state.playing = false;
        true
    }


    /// Number of resources currently loaded.
    pub fn live_count( &self ) -> usize {
        lock( &self.shared.live ).len()
    }


    /// Ids of the resources currently loaded.
    pub fn live_ids( &self ) -> Vec<ResourceId> {
        lock( &self.shared.live ).keys().copied().collect()
    }


    /// Highest number of simultaneously loaded resources seen so far.
    pub fn peak_live( &self ) -> usize {
        self.shared.peak_live.load( Ordering::SeqCst )
    }


    /// Number of successful `create` calls.
    pub fn created_count( &self ) -> usize {
        self.shared.created.load( Ordering::SeqCst )
    }
}


#[async_trait]
impl AudioEngine for ClockEngine {
    async fn configure_background_playback( &self ) -> Result<(), EngineError> {
        tracing::debug!( "Clock engine: background playback needs no setup" );
        Ok(())
    }


    async fn create( &self, request: CreateRequest ) -> Result<Box<dyn SoundResource>, EngineError> {
        let delay = *lock( &self.shared.create_delay );
        if !delay.is_zero() {
            tokio::time::sleep( delay ).await;
        }

        if request.uri.is_empty() || lock( &self.shared.failing ).contains( &request.uri ) {
            return Err( EngineError::InvalidUri( request.uri ) );
        }

        let duration_ms = lock( &self.shared.durations ).get( &request.uri ).copied();
        let state = Arc::new( StdMutex::new( ClockState {
            loaded: true,
            playing: request.auto_start,
            base_ms: duration_ms.map_or( request.start_position_ms, |d| request.start_position_ms.min( d ) ),
            anchor: Instant::now(),
            duration_ms,
        }));

        {
            let mut live = lock( &self.shared.live );
            live.insert( request.id, Arc::clone( &state ) );
            self.shared.peak_live.fetch_max( live.len(), Ordering::SeqCst );
        }
        self.shared.created.fetch_add( 1, Ordering::SeqCst );

        let mut resource = ClockResource {
            id: request.id,
            state,
            shared: Arc::clone( &self.shared ),
            status_tx: request.status_tx,
            finish_watch: None,
        };
        resource.emit( false );
        resource.arm_finish_watch();

        tracing::debug!( "Clock engine: created resource {} for {}", request.id, request.uri );
        Ok( Box::new( resource ) )
    }
}


struct ClockResource {
    id: ResourceId,
    state: Arc<StdMutex<ClockState>>,
    shared: Arc<Shared>,
    status_tx: mpsc::UnboundedSender<StatusUpdate>,
    finish_watch: Option<JoinHandle<()>>,
}


impl ClockResource {
    fn emit( &self, did_just_finish: bool ) {
        let status = lock( &self.state ).status( did_just_finish );
        let _ = self.status_tx.send( StatusUpdate { resource: self.id, status } );
    }


    fn disarm( &mut self ) {
        if let Some( task ) = self.finish_watch.take() {
            task.abort();
        }
    }


    /// Schedules the natural-completion update for the current clock.
    fn arm_finish_watch( &mut self ) {
        self.disarm();

        let remaining = {
            let state = lock( &self.state );
            match ( state.playing, state.duration_ms ) {
                ( true, Some( d ) ) => d.saturating_sub( state.position() ),
                _ => return,
            }
        };

        let id = self.id;
        let state = Arc::clone( &self.state );
        let tx = self.status_tx.clone();
        self.finish_watch = Some( tokio::spawn( async move {
            tokio::time::sleep( Duration::from_millis( remaining ) ).await;

            let status = {
                let mut state = lock( &state );
                let Some( duration ) = state.duration_ms else { return };
                if !state.loaded || !state.playing || state.position() < duration {
                    return;
                }
                state.playing = false;
                state.base_ms = duration;
                state.anchor = Instant::now();
                state.status( true )
            };
            let _ = tx.send( StatusUpdate { resource: id, status } );
        }));
    }


    fn ensure_loaded( &self ) -> Result<(), EngineError> {
        if lock( &self.state ).loaded { Ok(()) } else { Err( EngineError::Unloaded( self.id ) ) }
    }


    /// Consumes a pending failure for `op`.
    fn take_fault( &self, op: ClockOp ) -> Result<(), EngineError> {
        if lock( &self.shared.faults ).remove( &op ) {
            return Err( EngineError::Platform( format!( "{:?} failed on resource {}", op, self.id ) ) );
        }
        Ok(())
    }


    fn release( &mut self ) {
        self.disarm();
        lock( &self.state ).loaded = false;
        lock( &self.shared.live ).remove( &self.id );
    }
}


#[async_trait]
impl SoundResource for ClockResource {
    fn id( &self ) -> ResourceId {
        self.id
    }


    async fn play( &mut self ) -> Result<(), EngineError> {
        self.ensure_loaded()?;
        self.take_fault( ClockOp::Play )?;
        {
            let mut state = lock( &self.state );
            if state.duration_ms.is_some_and( |d| state.position() >= d ) {
                state.base_ms = 0;
            } else {
                state.freeze();
            }
            state.anchor = Instant::now();
            state.playing = true;
        }
        self.emit( false );
        self.arm_finish_watch();
        Ok(())
    }


    async fn pause( &mut self ) -> Result<(), EngineError> {
        self.ensure_loaded()?;
        self.take_fault( ClockOp::Pause )?;
        {
            let mut state = lock( &self.state );
            state.freeze();
            state.playing = false;
        }
        self.disarm();
        self.emit( false );
        Ok(())
    }


    async fn set_position( &mut self, position_ms: u64 ) -> Result<(), EngineError> {
        self.ensure_loaded()?;
        self.take_fault( ClockOp::Seek )?;
        {
            let mut state = lock( &self.state );
            state.base_ms = state.duration_ms.map_or( position_ms, |d| position_ms.min( d ) );
            state.anchor = Instant::now();
        }
        self.arm_finish_watch();
        Ok(())
    }


    async fn status( &self ) -> Result<PlaybackStatus, EngineError> {
        self.ensure_loaded()?;
        Ok( lock( &self.state ).status( false ) )
    }


    async fn unload( &mut self ) -> Result<(), EngineError> {
        self.ensure_loaded()?;
        self.take_fault( ClockOp::Unload )?;
        self.release();
        tracing::debug!( "Clock engine: unloaded resource {}", self.id );
        Ok(())
    }
}


impl Drop for ClockResource {
    fn drop( &mut self ) {
        self.release();
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    fn request( id: ResourceId, uri: &str, tx: &mpsc::UnboundedSender<StatusUpdate> ) -> CreateRequest {
        CreateRequest {
            id,
            uri: uri.to_string(),
            auto_start: true,
            start_position_ms: 0,
            status_tx: tx.clone(),
        }
    }


    #[tokio::test( start_paused = true )]
    async fn test_position_advances_and_pauses() {
        let engine = ClockEngine::new();
        engine.register( "a", 10_000 );
        let ( tx, _rx ) = mpsc::unbounded_channel();

        let mut res = engine.create( request( 1, "a", &tx ) ).await.unwrap();
        tokio::time::advance( Duration::from_millis( 2_500 ) ).await;
        assert_eq!( res.status().await.unwrap().position_ms, 2_500 );

        res.pause().await.unwrap();
        tokio::time::advance( Duration::from_secs( 3 ) ).await;
        let status = res.status().await.unwrap();
        assert!( !status.is_playing );
        assert_eq!( status.position_ms, 2_500 );

        res.set_position( 9_000 ).await.unwrap();
        assert_eq!( res.status().await.unwrap().position_ms, 9_000 );
    }


    #[tokio::test( start_paused = true )]
    async fn test_finish_emits_once() {
        let engine = ClockEngine::new();
        engine.register( "a", 1_000 );
        let ( tx, mut rx ) = mpsc::unbounded_channel();

        let _res = engine.create( request( 7, "a", &tx ) ).await.unwrap();
        let first = rx.recv().await.unwrap();
        assert!( first.status.is_playing );
        assert!( !first.status.did_just_finish );

        let done = rx.recv().await.unwrap();
        assert_eq!( done.resource, 7 );
        assert!( done.status.did_just_finish );
        assert!( !done.status.is_playing );
        assert_eq!( done.status.position_ms, 1_000 );
    }


    #[tokio::test( start_paused = true )]
    async fn test_live_counting_and_unload() {
        let engine = ClockEngine::new();
        let ( tx, _rx ) = mpsc::unbounded_channel();

        let mut a = engine.create( request( 1, "a", &tx ) ).await.unwrap();
        assert_eq!( engine.live_count(), 1 );
        a.unload().await.unwrap();
        assert_eq!( engine.live_count(), 0 );
        assert!( matches!( a.play().await, Err( EngineError::Unloaded( 1 ) ) ) );

        let b = engine.create( request( 2, "b", &tx ) ).await.unwrap();
        drop( b );
        assert_eq!( engine.live_count(), 0 );
        assert_eq!( engine.peak_live(), 1 );
        assert_eq!( engine.created_count(), 2 );
    }


    #[tokio::test( start_paused = true )]
    async fn test_interrupt_is_silent() {
        let engine = ClockEngine::new();
        let ( tx, mut rx ) = mpsc::unbounded_channel();

        let res = engine.create( request( 3, "a", &tx ) ).await.unwrap();
        rx.recv().await.unwrap();

        assert!( engine.interrupt( 3 ) );
        assert!( !engine.interrupt( 99 ) );
        assert!( !res.status().await.unwrap().is_playing );
        assert!( rx.try_recv().is_err() );
    }


    #[tokio::test( start_paused = true )]
    async fn test_fail_next_is_one_shot() {
        let engine = ClockEngine::new();
        engine.register( "a", 10_000 );
        let ( tx, _rx ) = mpsc::unbounded_channel();
        let mut res = engine.create( request( 1, "a", &tx ) ).await.unwrap();

        engine.fail_next( ClockOp::Pause );
        assert!( matches!( res.pause().await, Err( EngineError::Platform( _ ) ) ) );
        assert!( res.status().await.unwrap().is_playing );
        res.pause().await.unwrap();
        assert!( !res.status().await.unwrap().is_playing );

        engine.fail_next( ClockOp::Seek );
        assert!( res.set_position( 5_000 ).await.is_err() );
        assert_eq!( res.status().await.unwrap().position_ms, 0 );

        engine.fail_next( ClockOp::Unload );
        assert!( res.unload().await.is_err() );
        assert_eq!( engine.live_count(), 1 );
        drop( res );
        assert_eq!( engine.live_count(), 0 );
    }


    #[tokio::test]
    async fn test_failing_uri() {
        let engine = ClockEngine::new();
        engine.fail_uri( "bad" );
        let ( tx, _rx ) = mpsc::unbounded_channel();

        assert!( matches!( engine.create( request( 1, "bad", &tx ) ).await, Err( EngineError::InvalidUri( _ ) ) ) );
        assert!( matches!( engine.create( request( 2, "", &tx ) ).await, Err( EngineError::InvalidUri( _ ) ) ) );
        assert_eq!( engine.live_count(), 0 );
    }
}
