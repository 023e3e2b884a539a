//! Application settings management
//!
//! Persistent host settings: where to look for music and how the session is tuned.

use std::fs;
use std::path::{ Path, PathBuf };
use std::time::Duration;

use serde::{ Deserialize, Serialize };

use tunedeck_core::SessionConfig;


/// Application settings.
#[derive( Debug, Clone, PartialEq, Eq, Serialize, Deserialize )]
#[serde( default )]
pub struct Settings {
    /// Directories scanned for music
    pub library_roots: Vec<PathBuf>,

    /// Maximum number of tracks loaded per scan
    pub scan_limit: usize,

    /// Interval between position polls, in milliseconds
    pub poll_interval_ms: u64,

    /// Show now-playing notifications on the console
    pub notifications_enabled: bool,

    /// Show a paused notification for the restored track at startup
    pub show_restored_notification: bool,
}


impl Default for Settings {
    fn default() -> Self {
        let session = SessionConfig::default();
        Self {
            library_roots: dirs::audio_dir().into_iter().collect(),
            scan_limit: session.scan_limit,
            poll_interval_ms: session.poll_interval.as_millis() as u64,
            notifications_enabled: true,
            show_restored_notification: session.show_restored_notification,
        }
    }
}


impl Settings {
    /// Returns the path to the settings file.
    pub fn settings_path() -> Option<PathBuf> {
        dirs::config_dir().map( |p| p.join( "tunedeck" ).join( "settings.json" ) )
    }


    /// Loads settings from disk, or returns defaults if not found.
    pub fn load() -> Self {
        match Self::settings_path() {
            Some( path ) => Self::load_from( &path ),
            None => Self::default(),
        }
    }


    /// Loads settings from `path`. A missing or malformed file yields defaults.
    pub fn load_from( path: &Path ) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string( path ) {
            Ok( contents ) => serde_json::from_str( &contents ).unwrap_or_else( |e| {
                tracing::warn!( "Malformed settings at {}: {}", path.display(), e );
                Self::default()
            }),
            Err( e ) => {
                tracing::warn!( "Failed to read settings: {}", e );
                Self::default()
            }
        }
    }


    /// Saves settings to disk.
    pub fn save( &self ) {
        if let Some( path ) = Self::settings_path() {
            self.save_to( &path );
        }
    }


    pub fn save_to( &self, path: &Path ) {
        // Create parent directory if needed
        if let Some( parent ) = path.parent() {
            if !parent.exists() {
                if let Err( e ) = fs::create_dir_all( parent ) {
                    tracing::warn!( "Failed to create settings directory: {}", e );
                    return;
                }
            }
        }

        match serde_json::to_string_pretty( self ) {
            Ok( json ) => {
                if let Err( e ) = fs::write( path, json ) {
                    tracing::warn!( "Failed to save settings: {}", e );
                }
            }
            Err( e ) => {
                tracing::warn!( "Failed to serialize settings: {}", e );
            }
        }
    }


    /// Session tuning derived from these settings.
    pub fn session_config( &self ) -> SessionConfig {
        SessionConfig {
            poll_interval: Duration::from_millis( self.poll_interval_ms.max( 1 ) ),
            scan_limit: self.scan_limit,
            show_restored_notification: self.show_restored_notification,
        }
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load_from( &dir.path().join( "settings.json" ) );
        assert_eq!( settings, Settings::default() );
    }


    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join( "settings.json" );
        fs::write( &path, r#"{ "scan_limit": 50, "library_roots": [ "/music" ] }"# ).unwrap();

        let settings = Settings::load_from( &path );
        assert_eq!( settings.scan_limit, 50 );
        assert_eq!( settings.library_roots, vec![ PathBuf::from( "/music" ) ] );
        assert!( settings.notifications_enabled );
        assert_eq!( settings.poll_interval_ms, 1000 );
    }


    #[test]
    fn test_malformed_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join( "settings.json" );
        fs::write( &path, "{ not json" ).unwrap();

        assert_eq!( Settings::load_from( &path ), Settings::default() );
    }


    #[test]
    fn test_save_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join( "nested" ).join( "settings.json" );
        let settings = Settings {
            library_roots: vec![ PathBuf::from( "/srv/music" ) ],
            scan_limit: 10,
            poll_interval_ms: 250,
            notifications_enabled: false,
            show_restored_notification: false,
        };

        settings.save_to( &path );
        assert_eq!( Settings::load_from( &path ), settings );

        let config = settings.session_config();
        assert_eq!( config.poll_interval, Duration::from_millis( 250 ) );
        assert_eq!( config.scan_limit, 10 );
    }
}
