//! Host command parsing.
//!
//! Line-oriented commands a host uses to drive the session: transport,
//! library, playlists, lifecycle transitions and simulated notification taps.

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;


/// Errors that can occur during command parsing.
#[derive( Debug, Error, PartialEq, Eq )]
pub enum CommandError {
    #[error( "Unknown command: {0}" )]
    Unknown( String ),

    #[error( "Invalid argument: {0}" )]
    InvalidArgument( String ),

    #[error( "Missing argument: {0}" )]
    MissingArgument( String ),
}


/// Reference to a library track: 1-based position in the listing, or its id.
#[derive( Debug, Clone, PartialEq, Eq )]
pub enum TrackRef {
    Index( usize ),
    Id( String ),
}


impl FromStr for TrackRef {
    type Err = CommandError;


    fn from_str( s: &str ) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err( CommandError::MissingArgument( "track".into() ) );
        }

        match s.parse::<usize>() {
            Ok( 0 ) => Err( CommandError::InvalidArgument( "Track numbers start at 1".into() ) ),
            Ok( n ) => Ok( TrackRef::Index( n ) ),
            Err( _ ) => Ok( TrackRef::Id( s.to_string() ) ),
        }
    }
}


/// Parsed host command.
#[derive( Debug, Clone, PartialEq, Eq )]
pub enum Command {
    // Playback commands
    Play { track: TrackRef },
    Pause,
    Resume,
    Toggle { track: Option<TrackRef> },
    Next,
    Prev,
    Seek { position: Duration },

    // Library commands
    List,
    Status,
    Refresh,

    // Playlist commands
    Playlists,
    Create { name: String },
    Rename { playlist: String, name: String },
    Delete { playlist: String },
    Add { playlist: String, track: TrackRef },
    Remove { playlist: String, track: TrackRef },
    Show { playlist: String },

    // Lifecycle commands
    Background,
    Foreground,
    Tap { action: String },

    Help,
    Quit,
}


/// Splits `args` into the first word and the trimmed rest.
fn split_first( args: Option<&str> ) -> ( Option<&str>, Option<&str> ) {
    let Some( args ) = args else {
        return ( None, None );
    };
    let mut parts = args.splitn( 2, char::is_whitespace );
    let first = parts.next().filter( |s| !s.is_empty() );
    let rest = parts.next().map( str::trim ).filter( |s| !s.is_empty() );
    ( first, rest )
}


fn required<'a>( value: Option<&'a str>, what: &str ) -> Result<&'a str, CommandError> {
    value.ok_or_else( || CommandError::MissingArgument( what.into() ) )
}


impl Command {
    /// Parses a command line.
    ///
    /// @param input - The command string to parse
    ///
    /// @returns The parsed command or an error
    pub fn parse( input: &str ) -> Result<Self, CommandError> {
        let input = input.trim();
        let mut parts = input.splitn( 2, char::is_whitespace );
        let cmd = parts.next().unwrap_or( "" ).to_lowercase();
        let args = parts.next().map( str::trim ).filter( |s| !s.is_empty() );

        match cmd.as_str() {
            // Playback commands
            "play" | "p" => {
                let track = required( args, "track" )?.parse()?;
                Ok( Command::Play { track } )
            }
            "pause" | "pa" => Ok( Command::Pause ),
            "resume" | "r" => Ok( Command::Resume ),
            "toggle" | "t" | "space" => {
                let track = args.map( |s| s.parse() ).transpose()?;
                Ok( Command::Toggle { track } )
            }
            "next" | "n" => Ok( Command::Next ),
            "prev" | "previous" | "pr" => Ok( Command::Prev ),
            "seek" | "sk" => {
                let position = parse_time( required( args, "time position" )? )?;
                Ok( Command::Seek { position } )
            }

            // Library commands
            "list" | "ls" | "l" => Ok( Command::List ),
            "status" | "st" => Ok( Command::Status ),
            "refresh" | "rescan" => Ok( Command::Refresh ),

            // Playlist commands
            "playlists" | "pls" => Ok( Command::Playlists ),
            "create" | "new" => {
                let name = required( args, "playlist name" )?;
                Ok( Command::Create { name: name.to_string() } )
            }
            "rename" | "mv" => {
                let ( playlist, name ) = split_first( args );
                Ok( Command::Rename {
                    playlist: required( playlist, "playlist id" )?.to_string(),
                    name: required( name, "playlist name" )?.to_string(),
                })
            }
            "delete" | "del" => {
                let playlist = required( args, "playlist id" )?;
                Ok( Command::Delete { playlist: playlist.to_string() } )
            }
            "add" | "a" => {
                let ( playlist, track ) = split_first( args );
                Ok( Command::Add {
                    playlist: required( playlist, "playlist id" )?.to_string(),
                    track: required( track, "track" )?.parse()?,
                })
            }
            "remove" | "rm" => {
                let ( playlist, track ) = split_first( args );
                Ok( Command::Remove {
                    playlist: required( playlist, "playlist id" )?.to_string(),
                    track: required( track, "track" )?.parse()?,
                })
            }
            "show" | "cat" => {
                let playlist = required( args, "playlist id" )?;
                Ok( Command::Show { playlist: playlist.to_string() } )
            }

            // Lifecycle commands
            "background" | "bg" => Ok( Command::Background ),
            "foreground" | "fg" => Ok( Command::Foreground ),
            "tap" => {
                let action = args.unwrap_or( crate::notification::DEFAULT_ACTION );
                Ok( Command::Tap { action: action.to_lowercase() } )
            }

            "help" | "h" | "?" => Ok( Command::Help ),
            "quit" | "q" | "exit" => Ok( Command::Quit ),

            "" => Err( CommandError::Unknown( "empty command".into() ) ),
            other => Err( CommandError::Unknown( other.to_string() ) ),
        }
    }
}


/// Parses a time string like "1:30" or "90" into a Duration.
///
/// @param s - Time string in format "MM:SS", "M:SS", or just seconds
///
/// @returns Duration or error
pub fn parse_time( s: &str ) -> Result<Duration, CommandError> {
    let s = s.trim();

    if let Some(( min, sec )) = s.split_once( ':' ) {
        let minutes: u64 = min.parse()
            .map_err( |_| CommandError::InvalidArgument( format!( "Invalid minutes: {}", min ) ) )?;
        let seconds: u64 = sec.parse()
            .map_err( |_| CommandError::InvalidArgument( format!( "Invalid seconds: {}", sec ) ) )?;
        if seconds >= 60 {
            return Err( CommandError::InvalidArgument( format!( "Invalid seconds: {}", sec ) ) );
        }
        Ok( Duration::from_secs( minutes * 60 + seconds ) )
    } else {
        let seconds: u64 = s.parse()
            .map_err( |_| CommandError::InvalidArgument( format!( "Invalid time: {}", s ) ) )?;
        Ok( Duration::from_secs( seconds ) )
    }
}


/// Returns help text listing all available commands.
pub fn help_text() -> &'static str {
    r#"Playback Commands:
  play <n|id>         Play library track      [p]
  pause               Pause playback          [pa]
  resume              Resume playback         [r]
  toggle [n|id]       Toggle play/pause       [t]
  next                Next track              [n]
  prev                Previous track          [pr]
  seek <time>         Seek (e.g., 1:30 or 90) [sk]

Library Commands:
  list                List library tracks     [ls]
  status              Show playback status    [st]
  refresh             Rescan the library

Playlist Commands:
  playlists           List playlists          [pls]
  create <name>       Create a playlist       [new]
  rename <id> <name>  Rename a playlist       [mv]
  delete <id>         Delete a playlist       [del]
  add <id> <n|id>     Add a track             [a]
  remove <id> <n|id>  Remove a track          [rm]
  show <id>           Show playlist tracks

Other Commands:
  background          Simulate app background [bg]
  foreground          Simulate app foreground [fg]
  tap [action]        Notification action (play/pause/next/prev/default)
  help                Show this help          [?]
  quit                Exit tunedeck           [q]"#
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_parse_play_index() {
        let cmd = Command::parse( "play 3" ).unwrap();
        assert_eq!( cmd, Command::Play { track: TrackRef::Index( 3 ) } );
    }


    #[test]
    fn test_parse_play_id() {
        let cmd = Command::parse( "p /music/a.mp3" ).unwrap();
        assert_eq!( cmd, Command::Play { track: TrackRef::Id( "/music/a.mp3".into() ) } );
    }


    #[test]
    fn test_parse_play_zero() {
        assert!( matches!( Command::parse( "play 0" ), Err( CommandError::InvalidArgument( _ ) ) ) );
    }


    #[test]
    fn test_parse_toggle() {
        assert_eq!( Command::parse( "toggle" ).unwrap(), Command::Toggle { track: None } );
        assert_eq!(
            Command::parse( "t 2" ).unwrap(),
            Command::Toggle { track: Some( TrackRef::Index( 2 ) ) }
        );
    }


    #[test]
    fn test_parse_seek() {
        let cmd = Command::parse( "seek 1:30" ).unwrap();
        assert_eq!( cmd, Command::Seek { position: Duration::from_secs( 90 ) } );
    }


    #[test]
    fn test_parse_seek_seconds() {
        let cmd = Command::parse( "seek 45" ).unwrap();
        assert_eq!( cmd, Command::Seek { position: Duration::from_secs( 45 ) } );
    }


    #[test]
    fn test_parse_seek_bad_seconds() {
        assert!( matches!( Command::parse( "seek 1:75" ), Err( CommandError::InvalidArgument( _ ) ) ) );
    }


    #[test]
    fn test_parse_create_keeps_spaces() {
        let cmd = Command::parse( "create  Road Trip  " ).unwrap();
        assert_eq!( cmd, Command::Create { name: "Road Trip".into() } );
    }


    #[test]
    fn test_parse_add() {
        let cmd = Command::parse( "add 1700000000000 4" ).unwrap();
        assert_eq!( cmd, Command::Add { playlist: "1700000000000".into(), track: TrackRef::Index( 4 ) } );
    }


    #[test]
    fn test_parse_rename() {
        let cmd = Command::parse( "rename 17 Late Night" ).unwrap();
        assert_eq!( cmd, Command::Rename { playlist: "17".into(), name: "Late Night".into() } );
    }


    #[test]
    fn test_parse_add_missing_track() {
        let result = Command::parse( "add 1700000000000" );
        assert_eq!( result, Err( CommandError::MissingArgument( "track".into() ) ) );
    }


    #[test]
    fn test_parse_tap_defaults() {
        assert_eq!( Command::parse( "tap" ).unwrap(), Command::Tap { action: "default".into() } );
        assert_eq!( Command::parse( "tap NEXT" ).unwrap(), Command::Tap { action: "next".into() } );
    }


    #[test]
    fn test_parse_unknown() {
        let result = Command::parse( "foobar" );
        assert!( matches!( result, Err( CommandError::Unknown( _ ) ) ) );
    }


    #[test]
    fn test_parse_missing_arg() {
        let result = Command::parse( "play" );
        assert!( matches!( result, Err( CommandError::MissingArgument( _ ) ) ) );
    }
}
