//! Command-line argument parsing for TuneDeck.

use std::path::PathBuf;

use clap::Parser;


/// TuneDeck - A headless music player driven from the terminal.
#[derive( Parser, Debug )]
#[command( name = "tunedeck" )]
#[command( version, about, long_about = None )]
pub struct Args {
    /// Music directory to scan. Repeat to scan several; replaces the configured roots.
    #[arg( short, long = "library", value_name = "DIR" )]
    pub library: Vec<PathBuf>,

    /// Directory holding the persisted store (playlists, resume state).
    #[arg( short, long, value_name = "DIR" )]
    pub data_dir: Option<PathBuf>,

    /// Log debug output.
    #[arg( short, long )]
    pub verbose: bool,

    /// Write logs to `tunedeck.log` in the data directory instead of stderr.
    #[arg( long )]
    pub log_file: bool,

    /// Disable console notifications.
    #[arg( long )]
    pub no_notifications: bool,
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_repeatable_library() {
        let args = Args::parse_from( [ "tunedeck", "-l", "/a", "--library", "/b", "--no-notifications" ] );
        assert_eq!( args.library, vec![ PathBuf::from( "/a" ), PathBuf::from( "/b" ) ] );
        assert!( args.no_notifications );
        assert!( !args.verbose );
        assert!( args.data_dir.is_none() );
    }
}
