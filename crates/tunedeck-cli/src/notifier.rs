//! Console notification platform
//!
//! Renders the now-playing notification as a line of text with its action
//! buttons, standing in for the OS notification shade.

use std::io::{ self, Write };
use std::sync::Mutex;

use async_trait::async_trait;

use tunedeck_core::notification::{
    ActionButton, ChannelSpec, NotificationContent, NotificationError, NotificationPlatform,
};
use tunedeck_core::PermissionStatus;


/// Prints notifications to a writer (stdout by default).
pub struct ConsoleNotifier<W: Write + Send = io::Stdout> {
    out: Mutex<W>,
    buttons: Mutex<Vec<ActionButton>>,
}


impl ConsoleNotifier {
    pub fn stdout() -> Self {
        Self::new( io::stdout() )
    }
}


impl<W: Write + Send> ConsoleNotifier<W> {
    pub fn new( out: W ) -> Self {
        Self {
            out: Mutex::new( out ),
            buttons: Mutex::new( Vec::new() ),
        }
    }


    fn write_line( &self, line: &str ) -> Result<(), NotificationError> {
        let mut out = self.out.lock().map_err( |_| NotificationError::Platform( "console poisoned".into() ) )?;
        writeln!( out, "{}", line )
            .and_then( |_| out.flush() )
            .map_err( |e| NotificationError::Platform( e.to_string() ) )
    }


    #[cfg( test )]
    fn into_inner( self ) -> W {
        self.out.into_inner().unwrap_or_else( |e| e.into_inner() )
    }
}


#[async_trait]
impl<W: Write + Send> NotificationPlatform for ConsoleNotifier<W> {
    async fn create_channel( &self, channel: &ChannelSpec ) -> Result<(), NotificationError> {
        tracing::debug!(
            "Console notifier: channel {} ({}), importance {:?}, silent {}, lock screen {}",
            channel.id, channel.name, channel.importance, channel.silent, channel.public_on_lock_screen
        );
        Ok(())
    }


    async fn register_category( &self, id: &str, actions: &[ActionButton] ) -> Result<(), NotificationError> {
        tracing::debug!( "Console notifier: category {} with {} actions", id, actions.len() );
        *self.buttons.lock().map_err( |_| NotificationError::Platform( "buttons poisoned".into() ) )? = actions.to_vec();
        Ok(())
    }


    async fn permission_status( &self ) -> Result<PermissionStatus, NotificationError> {
        Ok( PermissionStatus::Granted )
    }


    async fn request_permission( &self ) -> Result<PermissionStatus, NotificationError> {
        Ok( PermissionStatus::Granted )
    }


    async fn present( &self, content: NotificationContent ) -> Result<(), NotificationError> {
        let state = if content.payload.is_playing { "▶" } else { "⏸" };
        let buttons = self.buttons
            .lock()
            .map_err( |_| NotificationError::Platform( "buttons poisoned".into() ) )?
            .iter()
            .map( |b| format!( "[{}]", b.identifier ) )
            .collect::<Vec<_>>()
            .join( " " );

        self.write_line( &format!( "{} {} | {}  {}", state, content.title, content.body, buttons ) )
    }


    async fn dismiss_all( &self ) -> Result<(), NotificationError> {
        Ok(())
    }
}


#[cfg( test )]
mod tests {
    use super::*;

    use tunedeck_core::Track;


    fn track() -> Track {
        Track {
            id: "1".into(),
            uri: "file:///music/a.mp3".into(),
            filename: "Band - Song.mp3".into(),
            title: "Song".into(),
            artist: "Band".into(),
            album: "Unknown Album".into(),
            duration: 1_000,
            artwork: None,
        }
    }


    #[tokio::test]
    async fn test_present_renders_line() {
        let notifier = ConsoleNotifier::new( Vec::new() );
        notifier.register_category( "playback", &[
            ActionButton { identifier: "prev".into(), title: "Previous".into() },
            ActionButton { identifier: "next".into(), title: "Next".into() },
        ]).await.unwrap();

        notifier.present( NotificationContent::now_playing( &track(), true ) ).await.unwrap();

        let text = String::from_utf8( notifier.into_inner() ).unwrap();
        assert_eq!( text, "▶ Song | Band • Unknown Album  [prev] [next]\n" );
    }
}
