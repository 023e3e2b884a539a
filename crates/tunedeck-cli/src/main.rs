//! TuneDeck CLI - Headless music player host

mod cli;
mod host;
mod notifier;
mod settings;

use std::fs::{ self, OpenOptions };
use std::io::{ self, Write };
use std::path::{ Path, PathBuf };
use std::sync::{ Arc, Mutex };

use anyhow::{ Context, Result };
use clap::Parser;
use tokio::io::{ AsyncBufReadExt, BufReader };
use tracing_subscriber::EnvFilter;

use cli::Args;
use host::{ Flow, Host };
use notifier::ConsoleNotifier;
use settings::Settings;

use tunedeck_core::{
    ClockEngine, Command, DirectoryMediaSource, FileStore, NotificationBridge, Platform,
    SessionManager,
};


/// Name of the durable store inside the data directory.
const STORE_FILE: &str = "store.json";

/// Name of the log file written with `--log-file`.
const LOG_FILE: &str = "tunedeck.log";


/// Installs the tracing subscriber. `RUST_LOG` overrides the level.
fn init_logging( args: &Args, data_dir: &Path ) -> Result<()> {
    let default = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else( |_| EnvFilter::new( default ) );
    let builder = tracing_subscriber::fmt()
        .with_env_filter( filter )
        .with_target( false );

    if args.log_file {
        let path = data_dir.join( LOG_FILE );
        let file = OpenOptions::new()
            .create( true )
            .append( true )
            .open( &path )
            .with_context( || format!( "Failed to open log file {}", path.display() ) )?;
        builder.with_ansi( false ).with_writer( Mutex::new( file ) ).init();
    } else {
        builder.with_writer( io::stderr ).init();
    }
    Ok(())
}


/// Builds the session from settings and flags.
fn build_session( args: &Args, settings: &Settings, data_dir: &Path ) -> ( SessionManager, ClockEngine ) {
    let roots = if args.library.is_empty() {
        settings.library_roots.clone()
    } else {
        args.library.clone()
    };
    if roots.is_empty() {
        tracing::warn!( "No music directories configured; pass --library <dir>" );
    }

    let notifications = if args.no_notifications || !settings.notifications_enabled {
        NotificationBridge::disabled()
    } else {
        NotificationBridge::new( Arc::new( ConsoleNotifier::stdout() ) )
    };

    let engine = ClockEngine::new();
    let session = SessionManager::new( settings.session_config(), Platform {
        engine: Arc::new( engine.clone() ),
        media: Arc::new( DirectoryMediaSource::new( roots ) ),
        store: Arc::new( FileStore::new( data_dir.join( STORE_FILE ) ) ),
        notifications,
    });

    ( session, engine )
}


fn prompt() {
    print!( "> " );
    let _ = io::stdout().flush();
}


#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let data_dir = args.data_dir.clone()
        .or_else( FileStore::default_dir )
        .unwrap_or_else( || PathBuf::from( ".tunedeck" ) );
    fs::create_dir_all( &data_dir )
        .with_context( || format!( "Failed to create data directory {}", data_dir.display() ) )?;

    init_logging( &args, &data_dir )?;

    let settings = Settings::load();
    tracing::debug!( "Settings: {:?}", settings );
    if Settings::settings_path().is_some_and( |p| !p.exists() ) {
        settings.save();
    }

    let ( session, engine ) = build_session( &args, &settings, &data_dir );
    session.initialize().await;

    let mut host = Host::new( session.clone(), engine, io::stdout() );
    host.register_durations();
    host.execute( Command::Status ).await?;

    let mut lines = BufReader::new( tokio::io::stdin() ).lines();
    loop {
        prompt();

        let line = tokio::select! {
            line = lines.next_line() => line.context( "Failed to read input" )?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some( line ) = line else {
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        let cmd = match Command::parse( &line ) {
            Ok( cmd ) => cmd,
            Err( e ) => {
                println!( "{} (try 'help')", e );
                continue;
            }
        };

        match host.execute( cmd ).await {
            Ok( Flow::Quit ) => break,
            Ok( Flow::Continue ) => {}
            Err( e ) => {
                tracing::debug!( "Command failed: {:#}", e );
                println!( "Error: {}", e );
            }
        }
    }

    session.shutdown().await;
    Ok(())
}
