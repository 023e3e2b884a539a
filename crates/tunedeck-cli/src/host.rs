//! Line-oriented host
//!
//! Executes parsed commands against the session and prints the results.
//! Stands in for the screens of a graphical player: the library list, the
//! mini player, the playlist screens and the notification shade.

use std::io::Write;
use std::time::Duration;

use anyhow::{ anyhow, Result };

use tunedeck_core::notification::NotificationPayload;
use tunedeck_core::track::format_millis;
use tunedeck_core::{
    command, AppState, ClockEngine, Command, NotificationResponse, SessionManager, SessionPhase,
    Track, TrackRef,
};


/// Whether the input loop should keep going.
#[derive( Debug, Clone, Copy, PartialEq, Eq )]
pub enum Flow {
    Continue,
    Quit,
}


/// Application state.
pub struct Host<W: Write> {
    session: SessionManager,
    engine: ClockEngine,
    out: W,
}


impl<W: Write> Host<W> {
    pub fn new( session: SessionManager, engine: ClockEngine, out: W ) -> Self {
        Self { session, engine, out }
    }


    /// Makes the clock engine aware of the durations found by the scan.
    pub fn register_durations( &self ) {
        for track in self.session.tracks() {
            if track.duration > 0 {
                self.engine.register( track.uri.clone(), track.duration );
            }
        }
    }


    /// Runs one command.
    ///
    /// @param cmd - The command to execute
    ///
    /// @returns Whether to keep reading input
    pub async fn execute( &mut self, cmd: Command ) -> Result<Flow> {
        match cmd {
            // Playback commands
            Command::Play { track } => {
                let track = self.library_track( &track )?;
                self.session.play_track( track ).await?;
                self.print_now_playing()?;
            }
            Command::Pause => self.session.pause().await?,
            Command::Resume => self.session.resume().await?,
            Command::Toggle { track } => {
                let track = track.map( |t| self.library_track( &t ) ).transpose()?;
                self.session.toggle( track ).await?;
            }
            Command::Next => {
                self.session.next().await?;
                self.print_now_playing()?;
            }
            Command::Prev => {
                self.session.previous().await?;
                self.print_now_playing()?;
            }
            Command::Seek { position } => {
                self.session.seek_to( position.as_millis() as u64 ).await?;
            }

            // Library commands
            Command::List => self.print_library()?,
            Command::Status => self.print_status()?,
            Command::Refresh => {
                let count = self.session.refresh_library().await?;
                self.register_durations();
                writeln!( self.out, "Loaded {} tracks", count )?;
            }

            // Playlist commands
            Command::Playlists => self.print_playlists().await?,
            Command::Create { name } => {
                let playlist = self.session.create_playlist( &name ).await?;
                writeln!( self.out, "Created playlist {} ({})", playlist.name, playlist.id )?;
            }
            Command::Rename { playlist, name } => {
                let changed = self.session.rename_playlist( &playlist, &name ).await?;
                self.report( changed, "Renamed", "No such playlist" )?;
            }
            Command::Delete { playlist } => {
                let changed = self.session.delete_playlist( &playlist ).await?;
                self.report( changed, "Deleted", "No such playlist" )?;
            }
            Command::Add { playlist, track } => {
                let track = self.library_track( &track )?;
                let changed = self.session.add_track_to_playlist( &playlist, track ).await?;
                self.report( changed, "Added", "Already in playlist or no such playlist" )?;
            }
            Command::Remove { playlist, track } => {
                let track_id = self.playlist_track_id( &playlist, &track ).await?;
                let changed = self.session.remove_track_from_playlist( &playlist, &track_id ).await?;
                self.report( changed, "Removed", "Not in playlist" )?;
            }
            Command::Show { playlist } => self.print_playlist( &playlist ).await?,

            // Lifecycle commands
            Command::Background => self.session.handle_app_state( AppState::Background ).await,
            Command::Foreground => {
                self.session.handle_app_state( AppState::Active ).await;
                self.print_status()?;
            }
            Command::Tap { action } => self.tap( action ).await?,

            Command::Help => writeln!( self.out, "{}", command::help_text() )?,
            Command::Quit => return Ok( Flow::Quit ),
        }

        Ok( Flow::Continue )
    }


    fn library_track( &self, track: &TrackRef ) -> Result<Track> {
        match track {
            TrackRef::Index( n ) => self.session.tracks()
                .into_iter()
                .nth( n - 1 )
                .ok_or_else( || anyhow!( "No track number {}", n ) ),
            TrackRef::Id( id ) => self.session.track( id )
                .ok_or_else( || anyhow!( "No track with id {}", id ) ),
        }
    }


    async fn playlist_track_id( &self, playlist: &str, track: &TrackRef ) -> Result<String> {
        match track {
            TrackRef::Id( id ) => Ok( id.clone() ),
            TrackRef::Index( n ) => {
                let playlist = self.session.playlist( playlist ).await
                    .ok_or_else( || anyhow!( "No playlist with id {}", playlist ) )?;
                playlist.tracks.get( n - 1 )
                    .map( |t| t.id.clone() )
                    .ok_or_else( || anyhow!( "No track number {} in {}", n, playlist.name ) )
            }
        }
    }


    /// Simulates the user tapping the notification.
    async fn tap( &mut self, action: String ) -> Result<()> {
        let snapshot = self.session.snapshot();
        let payload = snapshot.current_track.as_ref().map( |t| NotificationPayload {
            track_id: t.id.clone(),
            is_playing: snapshot.is_playing,
        });
        let response = NotificationResponse { action_identifier: action, payload };

        match self.session.notifications().handle_response( &response ) {
            Some( command ) => {
                writeln!( self.out, "Notification: {:?}", command )?;
                // Remote commands run on the session's event loop
                tokio::time::sleep( Duration::from_millis( 50 ) ).await;
            }
            None => writeln!( self.out, "Notification action ignored: {}", response.action_identifier )?,
        }
        Ok(())
    }


    fn report( &mut self, changed: bool, done: &str, unchanged: &str ) -> Result<()> {
        writeln!( self.out, "{}", if changed { done } else { unchanged } )?;
        Ok(())
    }


    fn print_now_playing( &mut self ) -> Result<()> {
        if let Some( track ) = self.session.current_track() {
            writeln!( self.out, "Now playing: {} - {}", track.display_artist(), track.display_title() )?;
        }
        Ok(())
    }


    fn print_library( &mut self ) -> Result<()> {
        if !self.session.permission_granted() {
            writeln!( self.out, "Music library access was denied" )?;
            return Ok(());
        }

        let tracks = self.session.tracks();
        if tracks.is_empty() {
            writeln!( self.out, "No music found. Use 'refresh' to scan again." )?;
            return Ok(());
        }

        let current = self.session.current_track().map( |t| t.id );
        for ( i, track ) in tracks.iter().enumerate() {
            let marker = if current.as_deref() == Some( track.id.as_str() ) { '*' } else { ' ' };
            writeln!(
                self.out,
                "{}{:>3}. {} - {} [{}]",
                marker,
                i + 1,
                track.display_artist(),
                track.display_title(),
                format_millis( track.duration ),
            )?;
        }
        Ok(())
    }


    fn print_status( &mut self ) -> Result<()> {
        let snap = self.session.snapshot();
        let phase = match snap.phase() {
            SessionPhase::Idle => "Stopped",
            SessionPhase::Loading => "Loading",
            SessionPhase::Playing => "Playing",
            SessionPhase::Paused => "Paused",
        };

        match &snap.current_track {
            Some( track ) => writeln!(
                self.out,
                "{}: {} - {} ({} / {})",
                phase,
                track.display_artist(),
                track.display_title(),
                format_millis( snap.position_ms ),
                format_millis( snap.duration_ms ),
            )?,
            None => writeln!( self.out, "{}", phase )?,
        }
        Ok(())
    }


    async fn print_playlists( &mut self ) -> Result<()> {
        let playlists = self.session.playlists().await;
        if playlists.is_empty() {
            writeln!( self.out, "No playlists" )?;
        }
        for playlist in playlists {
            writeln!(
                self.out,
                "{}  {} ({} tracks, {})",
                playlist.id,
                playlist.name,
                playlist.len(),
                format_millis( playlist.total_duration() ),
            )?;
        }
        Ok(())
    }


    async fn print_playlist( &mut self, id: &str ) -> Result<()> {
        let playlist = self.session.playlist( id ).await
            .ok_or_else( || anyhow!( "No playlist with id {}", id ) )?;

        writeln!( self.out, "{}", playlist.name )?;
        for ( i, track ) in playlist.tracks.iter().enumerate() {
            writeln!( self.out, "{:>3}. {} - {}", i + 1, track.display_artist(), track.display_title() )?;
        }
        Ok(())
    }


    #[cfg( test )]
    fn output( &self ) -> &W {
        &self.out
    }
}


#[cfg( test )]
mod tests {
    use super::*;
    use std::sync::Arc;

    use tunedeck_core::{
        DirectoryMediaSource, MemoryStore, NotificationBridge, Platform, SessionConfig,
    };


    async fn host( dir: &tempfile::TempDir ) -> Host<Vec<u8>> {
        for name in [ "Band - One.mp3", "Band - Two.mp3", "three.flac" ] {
            std::fs::write( dir.path().join( name ), b"" ).unwrap();
        }

        let engine = ClockEngine::new();
        let session = SessionManager::new( SessionConfig::default(), Platform {
            engine: Arc::new( engine.clone() ),
            media: Arc::new( DirectoryMediaSource::new( vec![ dir.path().to_path_buf() ] ) ),
            store: Arc::new( MemoryStore::new() ),
            notifications: NotificationBridge::disabled(),
        });
        session.initialize().await;
        Host::new( session, engine, Vec::new() )
    }


    async fn run( host: &mut Host<Vec<u8>>, line: &str ) -> Flow {
        host.execute( Command::parse( line ).unwrap() ).await.unwrap()
    }


    fn take_output( host: &mut Host<Vec<u8>> ) -> String {
        String::from_utf8( std::mem::take( &mut host.out ) ).unwrap()
    }


    #[tokio::test( start_paused = true )]
    async fn test_list_and_play() {
        let dir = tempfile::tempdir().unwrap();
        let mut host = host( &dir ).await;

        run( &mut host, "list" ).await;
        let listing = take_output( &mut host );
        assert!( listing.contains( "  1. Band - One [0:00]" ) );
        assert!( listing.contains( "  3. Unknown Artist - three" ) );

        run( &mut host, "play 2" ).await;
        assert_eq!( take_output( &mut host ), "Now playing: Band - Two\n" );

        run( &mut host, "next" ).await;
        assert_eq!( take_output( &mut host ), "Now playing: Unknown Artist - three\n" );

        run( &mut host, "pause" ).await;
        run( &mut host, "status" ).await;
        assert!( take_output( &mut host ).starts_with( "Paused: Unknown Artist - three" ) );
    }


    #[tokio::test( start_paused = true )]
    async fn test_playlist_commands() {
        let dir = tempfile::tempdir().unwrap();
        let mut host = host( &dir ).await;

        run( &mut host, "create Road Trip" ).await;
        let id = host.session.playlists().await[ 0 ].id.clone();
        take_output( &mut host );

        run( &mut host, &format!( "add {} 1", id ) ).await;
        run( &mut host, &format!( "add {} 1", id ) ).await;
        assert_eq!( take_output( &mut host ), "Added\nAlready in playlist or no such playlist\n" );

        run( &mut host, &format!( "show {}", id ) ).await;
        assert_eq!( take_output( &mut host ), "Road Trip\n  1. Band - One\n" );

        run( &mut host, &format!( "remove {} 1", id ) ).await;
        run( &mut host, &format!( "delete {}", id ) ).await;
        assert_eq!( take_output( &mut host ), "Removed\nDeleted\n" );
    }


    #[tokio::test( start_paused = true )]
    async fn test_tap_toggles_playback() {
        let dir = tempfile::tempdir().unwrap();
        let mut host = host( &dir ).await;

        run( &mut host, "play 1" ).await;
        run( &mut host, "tap" ).await;
        assert!( !host.session.is_playing() );

        run( &mut host, "tap" ).await;
        assert!( host.session.is_playing() );

        run( &mut host, "tap snooze" ).await;
        assert!( host.output().ends_with( b"Notification action ignored: snooze\n" ) );
    }


    #[tokio::test( start_paused = true )]
    async fn test_unknown_track_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut host = host( &dir ).await;

        assert!( host.execute( Command::parse( "play 9" ).unwrap() ).await.is_err() );
        assert_eq!( run( &mut host, "quit" ).await, Flow::Quit );
    }
}
