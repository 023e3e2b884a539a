//! Durable key-value storage
//!
//! Everything the player persists goes through a string key-value store:
//! the playlist collection and the resume state (last track and position).

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex as StdMutex;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::track::Track;


/// Key holding the JSON-encoded playlist collection.
pub const PLAYLISTS_KEY: &str = "playlists";

/// Key holding the JSON-encoded last playing track.
pub const LAST_TRACK_KEY: &str = "lastPlayingTrack";

/// Key holding the last playback position in milliseconds, as a decimal string.
pub const LAST_POSITION_KEY: &str = "lastPlayingPosition";


/// Errors that can occur while reading or writing the store.
#[derive( Debug, Error )]
pub enum StorageError {
    #[error( "IO error: {0}" )]
    Io( #[from] std::io::Error ),

    #[error( "Serialization error: {0}" )]
    Serialize( #[from] serde_json::Error ),

    #[error( "Storage backend error: {0}" )]
    Backend( String ),
}


/// String key-value store backing all persistence.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get( &self, key: &str ) -> Result<Option<String>, StorageError>;

    async fn set( &self, key: &str, value: String ) -> Result<(), StorageError>;

    async fn remove( &self, key: &str ) -> Result<(), StorageError>;
}


/// In-memory store, used by tests and as a fallback when no data directory exists.
#[derive( Debug, Default )]
pub struct MemoryStore {
    entries: StdMutex<HashMap<String, String>>,
}


impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }


    fn entries( &self ) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>, StorageError> {
        self.entries.lock().map_err( |_| StorageError::Backend( "memory store poisoned".into() ) )
    }
}


#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get( &self, key: &str ) -> Result<Option<String>, StorageError> {
        Ok( self.entries()?.get( key ).cloned() )
    }


    async fn set( &self, key: &str, value: String ) -> Result<(), StorageError> {
        self.entries()?.insert( key.to_string(), value );
        Ok(())
    }


    async fn remove( &self, key: &str ) -> Result<(), StorageError> {
        self.entries()?.remove( key );
        Ok(())
    }
}


/// Store persisted as a single JSON object (`key -> string`) on disk.
///
/// Every write rewrites the whole file through a temporary sibling and a rename,
/// so a crash mid-write leaves the previous contents intact.
#[derive( Debug )]
pub struct FileStore {
    path: PathBuf,
    lock: Mutex<()>,
}


impl FileStore {
    /// Creates a store backed by the given file. The file is created on first write.
    pub fn new( path: impl Into<PathBuf> ) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new( () ),
        }
    }


    /// Gets the default data directory.
    /// Uses the platform local data dir, e.g. ~/.local/share/tunedeck on Linux.
    pub fn default_dir() -> Option<PathBuf> {
        dirs::data_local_dir().map( |d| d.join( "tunedeck" ) )
    }


    async fn read_all( &self ) -> Result<HashMap<String, String>, StorageError> {
        match tokio::fs::read_to_string( &self.path ).await {
            Ok( contents ) if contents.trim().is_empty() => Ok( HashMap::new() ),
            Ok( contents ) => Ok( serde_json::from_str( &contents )? ),
            Err( e ) if e.kind() == std::io::ErrorKind::NotFound => Ok( HashMap::new() ),
            Err( e ) => Err( StorageError::Io( e ) ),
        }
    }


    async fn write_all( &self, entries: &HashMap<String, String> ) -> Result<(), StorageError> {
        if let Some( parent ) = self.path.parent() {
            tokio::fs::create_dir_all( parent ).await?;
        }

        let json = serde_json::to_string_pretty( entries )?;
        let tmp = self.path.with_extension( "json.tmp" );
        tokio::fs::write( &tmp, json ).await?;
        tokio::fs::rename( &tmp, &self.path ).await?;
        Ok(())
    }
}


#[async_trait]
impl KeyValueStore for FileStore {
    async fn get( &self, key: &str ) -> Result<Option<String>, StorageError> {
        let _guard = self.lock.lock().await;
        Ok( self.read_all().await?.remove( key ) )
    }


    async fn set( &self, key: &str, value: String ) -> Result<(), StorageError> {
        let _guard = self.lock.lock().await;
        let mut entries = self.read_all().await?;
        entries.insert( key.to_string(), value );
        self.write_all( &entries ).await
    }


    async fn remove( &self, key: &str ) -> Result<(), StorageError> {
        let _guard = self.lock.lock().await;
        let mut entries = self.read_all().await?;
        if entries.remove( key ).is_some() {
            self.write_all( &entries ).await?;
        }
        Ok(())
    }
}


/// Last playing track and position, persisted across backgrounding and restarts.
#[derive( Debug, Clone, PartialEq, Eq )]
pub struct ResumeState {
    pub track: Track,
    pub position_ms: u64,
}


impl ResumeState {
    /// Loads the resume state, if a track was stored.
    ///
    /// A missing or unparsable position is treated as 0.
    pub async fn load( store: &dyn KeyValueStore ) -> Result<Option<Self>, StorageError> {
        let Some( track_json ) = store.get( LAST_TRACK_KEY ).await? else {
            return Ok( None );
        };
        let track: Track = serde_json::from_str( &track_json )?;

        let position_ms = store.get( LAST_POSITION_KEY ).await?
            .and_then( |s| s.trim().parse::<u64>().ok() )
            .unwrap_or( 0 );

        Ok( Some( Self { track, position_ms } ) )
    }


    /// Saves the track and position under their two keys.
    pub async fn save( &self, store: &dyn KeyValueStore ) -> Result<(), StorageError> {
        store.set( LAST_TRACK_KEY, serde_json::to_string( &self.track )? ).await?;
        store.set( LAST_POSITION_KEY, self.position_ms.to_string() ).await
    }
}


#[cfg( test )]
mod tests {
    use super::*;
    use crate::track::sample_track;


    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = MemoryStore::new();
        assert_eq!( store.get( "k" ).await.unwrap(), None );

        store.set( "k", "v".into() ).await.unwrap();
        assert_eq!( store.get( "k" ).await.unwrap().as_deref(), Some( "v" ) );

        store.remove( "k" ).await.unwrap();
        assert_eq!( store.get( "k" ).await.unwrap(), None );
    }


    #[tokio::test]
    async fn test_file_store_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join( "nested" ).join( "store.json" );

        {
            let store = FileStore::new( &path );
            store.set( "a", "1".into() ).await.unwrap();
            store.set( "b", "2".into() ).await.unwrap();
        }

        let store = FileStore::new( &path );
        assert_eq!( store.get( "a" ).await.unwrap().as_deref(), Some( "1" ) );
        assert_eq!( store.get( "b" ).await.unwrap().as_deref(), Some( "2" ) );
        assert!( !path.with_extension( "json.tmp" ).exists() );
    }


    #[tokio::test]
    async fn test_file_store_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join( "store.json" );
        std::fs::write( &path, "{ not json" ).unwrap();

        let store = FileStore::new( &path );
        assert!( matches!( store.get( "a" ).await, Err( StorageError::Serialize( _ ) ) ) );
    }


    #[tokio::test]
    async fn test_resume_state_roundtrip() {
        let store = MemoryStore::new();
        assert_eq!( ResumeState::load( &store ).await.unwrap(), None );

        let state = ResumeState {
            track: sample_track( "7", "Air - La Femme d'Argent.flac" ),
            position_ms: 73_500,
        };
        state.save( &store ).await.unwrap();

        assert_eq!( store.get( LAST_POSITION_KEY ).await.unwrap().as_deref(), Some( "73500" ) );
        assert_eq!( ResumeState::load( &store ).await.unwrap(), Some( state ) );
    }


    #[tokio::test]
    async fn test_resume_state_bad_position_defaults_to_zero() {
        let store = MemoryStore::new();
        let track = sample_track( "7", "a.mp3" );
        store.set( LAST_TRACK_KEY, serde_json::to_string( &track ).unwrap() ).await.unwrap();
        store.set( LAST_POSITION_KEY, "later".into() ).await.unwrap();

        let state = ResumeState::load( &store ).await.unwrap().unwrap();
        assert_eq!( state.position_ms, 0 );
    }
}
