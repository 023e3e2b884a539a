//! Library scanning
//!
//! Lists the audio assets a media source exposes and maps each one to a
//! Track. Display metadata is inferred from the filename only.

use std::path::{ Path, PathBuf };
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::probe;
use crate::track::{ Track, UNKNOWN_ALBUM, UNKNOWN_ARTIST, UNKNOWN_TITLE };


/// Default upper bound on the number of assets requested per scan.
pub const DEFAULT_SCAN_LIMIT: usize = 1000;

/// Supported audio file extensions.
const SUPPORTED_EXTENSIONS: &[&str] = &[
    "mp3", "flac", "ogg", "wav", "m4a", "aac", "opus", "wma", "aiff", "alac",
];


/// Outcome of an access request.
#[derive( Debug, Clone, Copy, PartialEq, Eq )]
pub enum PermissionStatus {
    Granted,
    Denied,
    Undetermined,
}


/// Errors reported by a media source.
#[derive( Debug, Error )]
pub enum MediaError {
    #[error( "IO error: {0}" )]
    Io( #[from] std::io::Error ),

    #[error( "Asset not found: {0}" )]
    NotFound( String ),

    #[error( "Media platform error: {0}" )]
    Platform( String ),
}


/// Errors that can occur during a library scan.
#[derive( Debug, Error )]
pub enum LibraryError {
    #[error( "Media library access denied" )]
    PermissionDenied,

    #[error( "Scan failed: {0}" )]
    Scan( #[from] MediaError ),
}


/// Opaque handle to one asset in the device media index.
#[derive( Debug, Clone, PartialEq, Eq )]
pub struct AssetRef {
    pub id: String,
}


/// Asset details as the platform reports them.
#[derive( Debug, Clone, PartialEq )]
pub struct AudioAsset {
    pub id: String,
    pub uri: String,
    pub filename: String,
    /// Duration in seconds
    pub duration_secs: f64,
}


/// Device media index.
#[async_trait]
pub trait MediaSource: Send + Sync {
    async fn request_permission( &self ) -> Result<PermissionStatus, MediaError>;

    /// Lists at most `limit` audio assets.
    async fn list_audio_assets( &self, limit: usize ) -> Result<Vec<AssetRef>, MediaError>;

    /// Resolves the details of one asset.
    async fn asset_info( &self, asset: &AssetRef ) -> Result<AudioAsset, MediaError>;
}


/// Removes the final extension (`.xxx` with no `/` or `.` in it).
pub fn strip_extension( filename: &str ) -> &str {
    match filename.rfind( '.' ) {
        Some( idx ) if idx + 1 < filename.len() && !filename[ idx + 1.. ].contains( '/' ) => {
            &filename[ ..idx ]
        }
        _ => filename,
    }
}


/// Infers `( artist, title )` from a filename of the form `"Artist - Title.ext"`.
///
/// Splits at the first `-`. Names without one get an unknown artist and the
/// bare name as title.
///
/// @param filename - The original file name, extension included
///
/// @returns The inferred artist and title
pub fn infer_metadata( filename: &str ) -> ( String, String ) {
    let name = strip_extension( filename );

    if let Some(( left, right )) = name.split_once( '-' ) {
        let artist = left.trim();
        let title = right.trim();
        return (
            if artist.is_empty() { UNKNOWN_ARTIST } else { artist }.to_string(),
            if title.is_empty() { UNKNOWN_TITLE } else { title }.to_string(),
        );
    }

    let title = if name.is_empty() { UNKNOWN_TITLE } else { name };
    ( UNKNOWN_ARTIST.to_string(), title.to_string() )
}


/// Converts a platform duration in seconds to milliseconds.
fn secs_to_millis( secs: f64 ) -> u64 {
    if secs.is_finite() && secs > 0.0 {
        ( secs * 1000.0 ).round() as u64
    } else {
        0
    }
}


/// Builds a Track from platform asset details.
pub fn track_from_asset( asset: AudioAsset ) -> Track {
    let ( artist, title ) = infer_metadata( &asset.filename );
    Track {
        id: asset.id,
        uri: asset.uri,
        filename: asset.filename,
        title,
        artist,
        album: UNKNOWN_ALBUM.to_string(),
        duration: secs_to_millis( asset.duration_secs ),
        artwork: None,
    }
}


/// Scans a media source into Tracks.
pub struct LibrarySource {
    source: Arc<dyn MediaSource>,
    limit: usize,
}


impl LibrarySource {
    pub fn new( source: Arc<dyn MediaSource>, limit: usize ) -> Self {
        Self { source, limit }
    }


    /// Asks the platform for media library access.
    pub async fn request_permission( &self ) -> PermissionStatus {
        match self.source.request_permission().await {
            Ok( status ) => status,
            Err( e ) => {
                tracing::warn!( "Media permission request failed: {}", e );
                PermissionStatus::Denied
            }
        }
    }


    /// Lists the library.
    ///
    /// Assets whose details cannot be resolved are logged and left out.
    pub async fn scan( &self ) -> Result<Vec<Track>, LibraryError> {
        if self.request_permission().await != PermissionStatus::Granted {
            return Err( LibraryError::PermissionDenied );
        }

        let mut assets = self.source.list_audio_assets( self.limit ).await?;
        assets.truncate( self.limit );
        tracing::info!( "Found {} audio assets", assets.len() );

        let mut tracks = Vec::with_capacity( assets.len() );
        for asset in &assets {
            match self.source.asset_info( asset ).await {
                Ok( info ) => tracks.push( track_from_asset( info ) ),
                Err( e ) => tracing::warn!( "Skipping asset {}: {}", asset.id, e ),
            }
        }

        tracing::info!( "Loaded {} tracks", tracks.len() );
        Ok( tracks )
    }
}


/// Media source over local directories.
///
/// Asset ids are absolute paths; URIs are `file://` locators.
#[derive( Debug, Clone, Default )]
pub struct DirectoryMediaSource {
    roots: Vec<PathBuf>,
}


impl DirectoryMediaSource {
    pub fn new( roots: Vec<PathBuf> ) -> Self {
        let mut source = Self::default();
        for root in roots {
            source.add_root( root );
        }
        source
    }


    /// Adds a root directory to scan.
    pub fn add_root( &mut self, path: PathBuf ) {
        if !self.roots.contains( &path ) {
            self.roots.push( path );
        }
    }


    fn scan_recursive( dir: &Path, limit: usize, found: &mut Vec<PathBuf> ) -> Result<(), MediaError> {
        let entries = match std::fs::read_dir( dir ) {
            Ok( e ) => e,
            Err( e ) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                tracing::warn!( "Access denied: {:?}", dir );
                return Ok(()); // Skip inaccessible directories
            }
            Err( e ) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err( MediaError::NotFound( dir.display().to_string() ) );
            }
            Err( e ) => return Err( MediaError::Io( e ) ),
        };

        let mut paths: Vec<PathBuf> = entries.flatten().map( |e| e.path() ).collect();
        paths.sort();

        for path in paths {
            if found.len() >= limit {
                break;
            }
            if path.is_dir() {
                // Subdirectories may vanish or turn unreadable mid-scan
                if let Err( e ) = Self::scan_recursive( &path, limit, found ) {
                    tracing::warn!( "Skipping {:?}: {}", path, e );
                }
            } else if is_audio_file( &path ) {
                found.push( path );
            }
        }

        Ok(())
    }
}


#[async_trait]
impl MediaSource for DirectoryMediaSource {
    async fn request_permission( &self ) -> Result<PermissionStatus, MediaError> {
        if self.roots.is_empty() {
            return Ok( PermissionStatus::Granted );
        }

        let denied = self.roots.iter().all( |root| {
            matches!(
                std::fs::read_dir( root ),
                Err( ref e ) if e.kind() == std::io::ErrorKind::PermissionDenied
            )
        });

        Ok( if denied { PermissionStatus::Denied } else { PermissionStatus::Granted } )
    }


    async fn list_audio_assets( &self, limit: usize ) -> Result<Vec<AssetRef>, MediaError> {
        let roots = self.roots.clone();

        let paths = tokio::task::spawn_blocking( move || {
            let mut found = Vec::new();
            let mut scanned = 0;
            let mut last_error = None;

            for root in &roots {
                tracing::info!( "Scanning: {:?}", root );
                match DirectoryMediaSource::scan_recursive( root, limit, &mut found ) {
                    Ok(()) => scanned += 1,
                    Err( e ) => {
                        tracing::warn!( "Skipping library root {:?}: {}", root, e );
                        last_error = Some( e );
                    }
                }
            }

            // Only fail when no root could be read at all
            match last_error {
                Some( e ) if scanned == 0 => Err( e ),
                _ => Ok( found ),
            }
        })
        .await
        .map_err( |e| MediaError::Platform( e.to_string() ) )??;

        Ok( paths.into_iter()
            .map( |p| AssetRef { id: absolute( &p ).display().to_string() } )
            .collect() )
    }


    async fn asset_info( &self, asset: &AssetRef ) -> Result<AudioAsset, MediaError> {
        let path = PathBuf::from( &asset.id );

        tokio::task::spawn_blocking( move || {
            if !path.is_file() {
                return Err( MediaError::NotFound( path.display().to_string() ) );
            }

            let filename = path.file_name()
                .map( |n| n.to_string_lossy().into_owned() )
                .unwrap_or_default();

            let duration_secs = match probe::probe_duration_secs( &path ) {
                Ok( secs ) => secs.unwrap_or( 0.0 ),
                Err( e ) => {
                    tracing::debug!( "No duration for {:?}: {}", path, e );
                    0.0
                }
            };

            Ok( AudioAsset {
                id: path.display().to_string(),
                uri: file_uri( &path ),
                filename,
                duration_secs,
            })
        })
        .await
        .map_err( |e| MediaError::Platform( e.to_string() ) )?
    }
}


/// Checks if a file has a supported audio extension.
fn is_audio_file( path: &Path ) -> bool {
    path.extension()
        .and_then( |e| e.to_str() )
        .map( |e| SUPPORTED_EXTENSIONS.contains( &e.to_lowercase().as_str() ) )
        .unwrap_or( false )
}


fn absolute( path: &Path ) -> PathBuf {
    std::path::absolute( path ).unwrap_or_else( |_| path.to_path_buf() )
}


/// Converts a path to a `file://` URI.
pub fn file_uri( path: &Path ) -> String {
    let s = path.display().to_string().replace( '\\', "/" );
    if s.starts_with( '/' ) {
        format!( "file://{}", s )
    } else {
        format!( "file:///{}", s )
    }
}



#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_infer_artist_title() {
        let ( artist, title ) = infer_metadata( "Daft Punk - One More Time.mp3" );
        assert_eq!( artist, "Daft Punk" );
        assert_eq!( title, "One More Time" );
    }


    #[test]
    fn test_infer_no_separator() {
        let ( artist, title ) = infer_metadata( "track01.mp3" );
        assert_eq!( artist, UNKNOWN_ARTIST );
        assert_eq!( title, "track01" );
    }


    #[test]
    fn test_infer_splits_at_first_dash() {
        let ( artist, title ) = infer_metadata( "AC-DC - Back In Black.flac" );
        assert_eq!( artist, "AC" );
        assert_eq!( title, "DC - Back In Black" );
    }


    #[test]
    fn test_infer_empty_segments() {
        assert_eq!(
            infer_metadata( " - Intro.ogg" ),
            ( UNKNOWN_ARTIST.to_string(), "Intro".to_string() ),
        );
        assert_eq!(
            infer_metadata( "Someone - .ogg" ),
            ( "Someone".to_string(), UNKNOWN_TITLE.to_string() ),
        );
        assert_eq!(
            infer_metadata( ".mp3" ),
            ( UNKNOWN_ARTIST.to_string(), UNKNOWN_TITLE.to_string() ),
        );
    }


    #[test]
    fn test_strip_extension() {
        assert_eq!( strip_extension( "a.b.mp3" ), "a.b" );
        assert_eq!( strip_extension( "noext" ), "noext" );
        assert_eq!( strip_extension( "trailing." ), "trailing." );
    }


    #[test]
    fn test_duration_converted_once() {
        let track = track_from_asset( AudioAsset {
            id: "1".into(),
            uri: "file:///a.mp3".into(),
            filename: "a.mp3".into(),
            duration_secs: 215.4,
        });
        assert_eq!( track.duration, 215_400 );
        assert_eq!( track.album, UNKNOWN_ALBUM );
        assert_eq!( track.artwork, None );
    }


    #[test]
    fn test_file_uri() {
        assert_eq!( file_uri( Path::new( "/music/a b.mp3" ) ), "file:///music/a b.mp3" );
        assert_eq!( file_uri( Path::new( "C:\\Music\\a.mp3" ) ), "file:///C:/Music/a.mp3" );
    }


    /// In-memory media index with per-asset failures.
    struct FakeSource {
        permission: PermissionStatus,
        assets: Vec<AudioAsset>,
        broken: Vec<String>,
    }


    #[async_trait]
    impl MediaSource for FakeSource {
        async fn request_permission( &self ) -> Result<PermissionStatus, MediaError> {
            Ok( self.permission )
        }


        async fn list_audio_assets( &self, limit: usize ) -> Result<Vec<AssetRef>, MediaError> {
            Ok( self.assets.iter().take( limit ).map( |a| AssetRef { id: a.id.clone() } ).collect() )
        }


        async fn asset_info( &self, asset: &AssetRef ) -> Result<AudioAsset, MediaError> {
            if self.broken.contains( &asset.id ) {
                return Err( MediaError::Platform( "boom".into() ) );
            }
            self.assets.iter()
                .find( |a| a.id == asset.id )
                .cloned()
                .ok_or_else( || MediaError::NotFound( asset.id.clone() ) )
        }
    }


    fn asset( id: &str, filename: &str ) -> AudioAsset {
        AudioAsset {
            id: id.into(),
            uri: format!( "content://media/{}", id ),
            filename: filename.into(),
            duration_secs: 1.0,
        }
    }


    #[tokio::test]
    async fn test_scan_skips_broken_assets() {
        let source = FakeSource {
            permission: PermissionStatus::Granted,
            assets: vec![ asset( "1", "a.mp3" ), asset( "2", "b.mp3" ), asset( "3", "c.mp3" ) ],
            broken: vec![ "2".into() ],
        };
        let library = LibrarySource::new( Arc::new( source ), 10 );

        let tracks = library.scan().await.unwrap();
        let ids: Vec<_> = tracks.iter().map( |t| t.id.as_str() ).collect();
        assert_eq!( ids, vec![ "1", "3" ] );
    }


    #[tokio::test]
    async fn test_scan_respects_limit() {
        let source = FakeSource {
            permission: PermissionStatus::Granted,
            assets: ( 0..5 ).map( |i| asset( &i.to_string(), "x.mp3" ) ).collect(),
            broken: Vec::new(),
        };
        let library = LibrarySource::new( Arc::new( source ), 2 );
        assert_eq!( library.scan().await.unwrap().len(), 2 );
    }


    #[tokio::test]
    async fn test_scan_permission_denied() {
        let source = FakeSource {
            permission: PermissionStatus::Denied,
            assets: vec![ asset( "1", "a.mp3" ) ],
            broken: Vec::new(),
        };
        let library = LibrarySource::new( Arc::new( source ), 10 );
        assert!( matches!( library.scan().await, Err( LibraryError::PermissionDenied ) ) );
    }


    #[tokio::test]
    async fn test_directory_source_scan() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join( "Album" );
        std::fs::create_dir( &sub ).unwrap();
        std::fs::write( dir.path().join( "Daft Punk - One More Time.wav" ),
            crate::probe::silent_wav( 8000, 8000 ) ).unwrap();
        std::fs::write( sub.join( "track01.mp3" ), b"not really audio" ).unwrap();
        std::fs::write( dir.path().join( "cover.jpg" ), b"jpeg" ).unwrap();

        let source = DirectoryMediaSource::new( vec![ dir.path().to_path_buf() ] );
        let library = LibrarySource::new( Arc::new( source ), 10 );
        let tracks = library.scan().await.unwrap();

        assert_eq!( tracks.len(), 2 );
        let daft = tracks.iter().find( |t| t.artist == "Daft Punk" ).unwrap();
        assert_eq!( daft.title, "One More Time" );
        assert_eq!( daft.duration, 1000 );
        assert!( daft.uri.starts_with( "file://" ) );

        let other = tracks.iter().find( |t| t.filename == "track01.mp3" ).unwrap();
        assert_eq!( other.title, "track01" );
        assert_eq!( other.duration, 0 );
    }


    #[tokio::test]
    async fn test_directory_source_missing_root() {
        let source = DirectoryMediaSource::new( vec![ PathBuf::from( "/no/such/music/dir" ) ] );
        let library = LibrarySource::new( Arc::new( source ), 10 );
        assert!( matches!( library.scan().await, Err( LibraryError::Scan( MediaError::NotFound( _ ) ) ) ) );
    }


    #[tokio::test]
    async fn test_directory_source_skips_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write( dir.path().join( "Band - Song.mp3" ), b"" ).unwrap();

        let source = DirectoryMediaSource::new( vec![
            PathBuf::from( "/no/such/music/dir" ),
            dir.path().to_path_buf(),
        ]);
        let library = LibrarySource::new( Arc::new( source ), 10 );
        let tracks = library.scan().await.unwrap();

        assert_eq!( tracks.len(), 1 );
        assert_eq!( tracks[ 0 ].title, "Song" );
    }
}
