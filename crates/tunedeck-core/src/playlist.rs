//! User playlists
//!
//! Playlists are kept in memory and written back as one JSON document after
//! every mutation. There are no partial writes: each save persists the full
//! ordered collection.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{ AtomicU64, Ordering };
use std::time::{ SystemTime, UNIX_EPOCH };

use serde::{ Deserialize, Serialize };
use thiserror::Error;

use crate::storage::{ KeyValueStore, StorageError, PLAYLISTS_KEY };
use crate::track::Track;


/// Errors that can occur with playlist operations.
#[derive( Debug, Error )]
pub enum PlaylistError {
    #[error( "Playlist name cannot be empty" )]
    EmptyName,

    #[error( "Storage error: {0}" )]
    Storage( #[from] StorageError ),

    #[error( "Invalid playlist data: {0}" )]
    Corrupt( #[from] serde_json::Error ),
}


/// A named, ordered collection of tracks.
///
/// Tracks are stored as full copies; insertion order is play order.
#[derive( Debug, Clone, PartialEq, Eq, Serialize, Deserialize )]
pub struct Playlist {
    pub id: String,
    pub name: String,
    pub tracks: Vec<Track>,
}


impl Playlist {
    /// Creates an empty playlist.
    pub fn new( id: impl Into<String>, name: impl Into<String> ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            tracks: Vec::new(),
        }
    }


    /// Returns true if a track with this id is in the playlist.
    pub fn contains( &self, track_id: &str ) -> bool {
        self.tracks.iter().any( |t| t.id == track_id )
    }


    /// Appends a track unless one with the same id is already present.
    ///
    /// @returns true if the track was added
    pub fn add_track( &mut self, track: Track ) -> bool {
        if self.contains( &track.id ) {
            return false;
        }
        self.tracks.push( track );
        true
    }


    /// Removes the track with the given id.
    ///
    /// @returns true if a track was removed
    pub fn remove_track( &mut self, track_id: &str ) -> bool {
        let before = self.tracks.len();
        self.tracks.retain( |t| t.id != track_id );
        self.tracks.len() != before
    }


    /// Drops repeated track ids, keeping the first occurrence.
    ///
    /// @returns The number of duplicates removed
    pub fn dedup( &mut self ) -> usize {
        let original_len = self.tracks.len();
        let mut seen = HashSet::new();
        self.tracks.retain( |t| seen.insert( t.id.clone() ) );
        original_len - self.tracks.len()
    }


    /// Gets the number of tracks.
    pub fn len( &self ) -> usize {
        self.tracks.len()
    }


    /// Returns true if the playlist is empty.
    pub fn is_empty( &self ) -> bool {
        self.tracks.is_empty()
    }


    /// Sum of track durations in milliseconds.
    pub fn total_duration( &self ) -> u64 {
        self.tracks.iter().map( |t| t.duration ).sum()
    }
}


static LAST_ID: AtomicU64 = AtomicU64::new( 0 );


/// Generates a time-based playlist id, strictly increasing within the process.
fn next_playlist_id() -> u64 {
    let now = SystemTime::now()
        .duration_since( UNIX_EPOCH )
        .map( |d| d.as_millis() as u64 )
        .unwrap_or( 0 );

    let prev = LAST_ID
        .fetch_update( Ordering::SeqCst, Ordering::SeqCst, |last| Some( now.max( last + 1 ) ) )
        .unwrap_or_else( |last| last );
    now.max( prev + 1 )
}


/// Validates a user-supplied playlist name.
fn validate_name( name: &str ) -> Result<(), PlaylistError> {
    if name.trim().is_empty() {
        return Err( PlaylistError::EmptyName );
    }
    Ok(())
}


/// Playlist collection backed by a key-value store.
pub struct PlaylistStore {
    store: Arc<dyn KeyValueStore>,
    playlists: Vec<Playlist>,
}


impl PlaylistStore {
    /// Creates an empty collection over the given store. Call [`load`](Self::load) to read it.
    pub fn new( store: Arc<dyn KeyValueStore> ) -> Self {
        Self {
            store,
            playlists: Vec::new(),
        }
    }


    /// Replaces the in-memory collection with the persisted one.
    ///
    /// A missing key loads as an empty collection. On error the in-memory
    /// collection is left untouched.
    pub async fn load( &mut self ) -> Result<&[Playlist], PlaylistError> {
        let Some( json ) = self.store.get( PLAYLISTS_KEY ).await? else {
            tracing::info!( "No playlists found in storage" );
            self.playlists.clear();
            return Ok( &self.playlists );
        };

        let mut playlists: Vec<Playlist> = serde_json::from_str( &json )?;
        for playlist in &mut playlists {
            let removed = playlist.dedup();
            if removed > 0 {
                tracing::warn!( "Dropped {} duplicate tracks from playlist {}", removed, playlist.id );
            }
        }

        tracing::info!( "Loaded {} playlists", playlists.len() );
        self.playlists = playlists;
        Ok( &self.playlists )
    }


    /// Gets all playlists in creation order.
    pub fn playlists( &self ) -> &[Playlist] {
        &self.playlists
    }


    /// Gets one playlist by id.
    pub fn get( &self, id: &str ) -> Option<&Playlist> {
        self.playlists.iter().find( |p| p.id == id )
    }


    /// Creates and persists a new empty playlist.
    ///
    /// Names that are empty after trimming are rejected before anything changes.
    pub async fn create( &mut self, name: &str ) -> Result<Playlist, PlaylistError> {
        validate_name( name )?;

        let mut id = next_playlist_id();
        while self.get( &id.to_string() ).is_some() {
            id = next_playlist_id();
        }

        let playlist = Playlist::new( id.to_string(), name );
        tracing::info!( "Creating playlist {} ({})", playlist.name, playlist.id );
        self.playlists.push( playlist.clone() );
        self.save().await?;
        Ok( playlist )
    }


    /// Renames a playlist.
    ///
    /// @returns false if no playlist has this id
    pub async fn rename( &mut self, id: &str, name: &str ) -> Result<bool, PlaylistError> {
        validate_name( name )?;

        let Some( playlist ) = self.playlists.iter_mut().find( |p| p.id == id ) else {
            return Ok( false );
        };
        playlist.name = name.to_string();
        self.save().await?;
        Ok( true )
    }


    /// Deletes a playlist.
    ///
    /// @returns false if no playlist has this id
    pub async fn delete( &mut self, id: &str ) -> Result<bool, PlaylistError> {
        let before = self.playlists.len();
        self.playlists.retain( |p| p.id != id );
        if self.playlists.len() == before {
            return Ok( false );
        }

        tracing::info!( "Deleted playlist {}", id );
        self.save().await?;
        Ok( true )
    }


    /// Appends a track to a playlist. Adding a track already present is a no-op.
    ///
    /// @returns true if the playlist changed
    pub async fn add_track( &mut self, playlist_id: &str, track: Track ) -> Result<bool, PlaylistError> {
        let Some( playlist ) = self.playlists.iter_mut().find( |p| p.id == playlist_id ) else {
            tracing::warn!( "Add to unknown playlist {}", playlist_id );
            return Ok( false );
        };

        let title = track.title.clone();
        if !playlist.add_track( track ) {
            tracing::debug!( "Track {} already in playlist {}", title, playlist_id );
            return Ok( false );
        }

        tracing::info!( "Added {} to playlist {}", title, playlist_id );
        self.save().await?;
        Ok( true )
    }


    /// Removes a track from a playlist.
    ///
    /// @returns true if the playlist changed
    pub async fn remove_track( &mut self, playlist_id: &str, track_id: &str ) -> Result<bool, PlaylistError> {
        let Some( playlist ) = self.playlists.iter_mut().find( |p| p.id == playlist_id ) else {
            return Ok( false );
        };

        if !playlist.remove_track( track_id ) {
            return Ok( false );
        }

        self.save().await?;
        Ok( true )
    }


    /// Persists the full collection. The in-memory collection stays
    /// authoritative if this fails; the next successful save catches up.
    async fn save( &self ) -> Result<(), PlaylistError> {
        tracing::debug!( "Saving {} playlists to storage", self.playlists.len() );
        let json = serde_json::to_string( &self.playlists )?;
        if let Err( e ) = self.store.set( PLAYLISTS_KEY, json ).await {
            tracing::error!( "Failed to save playlists: {}", e );
            return Err( e.into() );
        }
        Ok(())
    }
}


#[cfg( test )]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use proptest::prelude::*;

    use crate::storage::MemoryStore;
    use crate::track::sample_track;


    fn store() -> ( Arc<MemoryStore>, PlaylistStore ) {
        let backing = Arc::new( MemoryStore::new() );
        let playlists = PlaylistStore::new( backing.clone() );
        ( backing, playlists )
    }


    #[tokio::test]
    async fn test_create_rejects_blank_name() {
        let ( backing, mut playlists ) = store();

        assert!( matches!( playlists.create( "   " ).await, Err( PlaylistError::EmptyName ) ) );
        assert!( playlists.playlists().is_empty() );
        assert_eq!( backing.get( PLAYLISTS_KEY ).await.unwrap(), None );
    }


    #[tokio::test]
    async fn test_create_assigns_unique_ids() {
        let ( _, mut playlists ) = store();

        let a = playlists.create( "Morning" ).await.unwrap();
        let b = playlists.create( "Evening" ).await.unwrap();

        assert_ne!( a.id, b.id );
        assert!( b.id.parse::<u64>().unwrap() > a.id.parse::<u64>().unwrap() );
        assert_eq!( playlists.playlists().len(), 2 );
    }


    #[tokio::test]
    async fn test_add_track_is_idempotent() {
        let ( _, mut playlists ) = store();
        let id = playlists.create( "Mix" ).await.unwrap().id;
        let track = sample_track( "t1", "A - B.mp3" );

        assert!( playlists.add_track( &id, track.clone() ).await.unwrap() );
        assert!( !playlists.add_track( &id, track ).await.unwrap() );
        assert_eq!( playlists.get( &id ).unwrap().len(), 1 );
    }


    #[tokio::test]
    async fn test_unknown_playlist_is_noop() {
        let ( _, mut playlists ) = store();
        let track = sample_track( "t1", "A - B.mp3" );

        assert!( !playlists.add_track( "missing", track ).await.unwrap() );
        assert!( !playlists.remove_track( "missing", "t1" ).await.unwrap() );
        assert!( !playlists.delete( "missing" ).await.unwrap() );
        assert!( !playlists.rename( "missing", "x" ).await.unwrap() );
    }


    #[tokio::test]
    async fn test_remove_and_delete() {
        let ( _, mut playlists ) = store();
        let id = playlists.create( "Mix" ).await.unwrap().id;
        playlists.add_track( &id, sample_track( "t1", "a.mp3" ) ).await.unwrap();
        playlists.add_track( &id, sample_track( "t2", "b.mp3" ) ).await.unwrap();

        assert!( playlists.remove_track( &id, "t1" ).await.unwrap() );
        assert!( !playlists.remove_track( &id, "t1" ).await.unwrap() );
        assert_eq!( playlists.get( &id ).unwrap().tracks[ 0 ].id, "t2" );

        assert!( playlists.delete( &id ).await.unwrap() );
        assert!( playlists.get( &id ).is_none() );
    }


    #[tokio::test]
    async fn test_persistence_roundtrip() {
        let ( backing, mut playlists ) = store();
        let first = playlists.create( "Road Trip" ).await.unwrap().id;
        let second = playlists.create( "Focus" ).await.unwrap().id;
        playlists.add_track( &first, sample_track( "t3", "C - Three.mp3" ) ).await.unwrap();
        playlists.add_track( &first, sample_track( "t1", "A - One.mp3" ) ).await.unwrap();
        playlists.add_track( &second, sample_track( "t2", "B - Two.mp3" ) ).await.unwrap();
        playlists.rename( &second, "Deep Focus" ).await.unwrap();

        let mut reloaded = PlaylistStore::new( backing );
        let loaded = reloaded.load().await.unwrap();
        assert_eq!( loaded, playlists.playlists() );
    }


    #[tokio::test]
    async fn test_load_missing_is_empty() {
        let ( _, mut playlists ) = store();
        assert!( playlists.load().await.unwrap().is_empty() );
    }


    #[tokio::test]
    async fn test_load_corrupt_keeps_memory() {
        let ( backing, mut playlists ) = store();
        playlists.create( "Keep" ).await.unwrap();
        backing.set( PLAYLISTS_KEY, "[{\"id\":".into() ).await.unwrap();

        assert!( matches!( playlists.load().await, Err( PlaylistError::Corrupt( _ ) ) ) );
        assert_eq!( playlists.playlists().len(), 1 );
    }


    #[tokio::test]
    async fn test_load_drops_duplicate_ids() {
        let ( backing, mut playlists ) = store();
        let mut stored = Playlist::new( "1", "Dupes" );
        stored.tracks.push( sample_track( "t1", "a.mp3" ) );
        stored.tracks.push( sample_track( "t1", "a.mp3" ) );
        backing.set( PLAYLISTS_KEY, serde_json::to_string( &vec![ stored ] ).unwrap() ).await.unwrap();

        let loaded = playlists.load().await.unwrap();
        assert_eq!( loaded[ 0 ].len(), 1 );
    }


    /// Store whose writes always fail.
    struct ReadOnlyStore;


    #[async_trait]
    impl KeyValueStore for ReadOnlyStore {
        async fn get( &self, _key: &str ) -> Result<Option<String>, StorageError> {
            Ok( None )
        }


        async fn set( &self, _key: &str, _value: String ) -> Result<(), StorageError> {
            Err( StorageError::Backend( "read-only".into() ) )
        }


        async fn remove( &self, _key: &str ) -> Result<(), StorageError> {
            Ok(())
        }
    }


    #[tokio::test]
    async fn test_failed_save_keeps_memory_state() {
        let mut playlists = PlaylistStore::new( Arc::new( ReadOnlyStore ) );

        let result = playlists.create( "Unsaved" ).await;
        assert!( matches!( result, Err( PlaylistError::Storage( _ ) ) ) );
        assert_eq!( playlists.playlists().len(), 1 );
    }


    proptest! {
        #[test]
        fn prop_add_never_duplicates( ids in proptest::collection::vec( 0u8..8, 0..40 ) ) {
            let mut playlist = Playlist::new( "p", "prop" );
            for id in &ids {
                playlist.add_track( sample_track( &id.to_string(), "x.mp3" ) );
            }

            let unique: HashSet<_> = ids.iter().collect();
            prop_assert_eq!( playlist.len(), unique.len() );
            prop_assert_eq!( playlist.dedup(), 0 );
        }
    }
}
