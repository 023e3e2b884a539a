//! Track data model
//!
//! A Track is an immutable value created once by the library scan. Playlists
//! and the resume state store full copies of it, so its serialized shape is
//! part of the durable contract.

use serde::{ Deserialize, Serialize };


/// Fallback artist when the filename carries none.
pub const UNKNOWN_ARTIST: &str = "Unknown Artist";

/// Fallback title when the filename is empty.
pub const UNKNOWN_TITLE: &str = "Unknown Title";

/// Album value for every scanned track (no tag extraction is performed).
pub const UNKNOWN_ALBUM: &str = "Unknown Album";


/// A single playable audio item.
#[derive( Debug, Clone, PartialEq, Eq, Serialize, Deserialize )]
pub struct Track {
    /// Stable identifier from the media index
    pub id: String,
    /// Platform locator of the audio payload
    pub uri: String,
    pub filename: String,
    pub title: String,
    pub artist: String,
    pub album: String,
    /// Duration in milliseconds
    pub duration: u64,
    pub artwork: Option<String>,
}


impl Track {
    /// Title to show, falling back to the filename.
    pub fn display_title( &self ) -> &str {
        if self.title.is_empty() { &self.filename } else { &self.title }
    }


    pub fn display_artist( &self ) -> &str {
        if self.artist.is_empty() { UNKNOWN_ARTIST } else { &self.artist }
    }


    pub fn display_album( &self ) -> &str {
        if self.album.is_empty() { UNKNOWN_ALBUM } else { &self.album }
    }
}


/// Formats milliseconds as `m:ss`.
pub fn format_millis( millis: u64 ) -> String {
    let total_secs = millis / 1000;
    format!( "{}:{:02}", total_secs / 60, total_secs % 60 )
}


#[cfg( test )]
pub( crate ) fn sample_track( id: &str, filename: &str ) -> Track {
    let ( artist, title ) = crate::library::infer_metadata( filename );
    Track {
        id: id.to_string(),
        uri: format!( "file:///music/{}", filename ),
        filename: filename.to_string(),
        title,
        artist,
        album: UNKNOWN_ALBUM.to_string(),
        duration: 180_000,
        artwork: None,
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_json_shape() {
        let track = sample_track( "42", "Daft Punk - One More Time.mp3" );
        let value = serde_json::to_value( &track ).unwrap();

        assert_eq!( value[ "id" ], "42" );
        assert_eq!( value[ "artist" ], "Daft Punk" );
        assert_eq!( value[ "duration" ], 180_000 );
        assert!( value[ "artwork" ].is_null() );
        assert_eq!( value.as_object().unwrap().len(), 8 );
    }


    #[test]
    fn test_display_fallbacks() {
        let mut track = sample_track( "1", "intro.flac" );
        track.title.clear();
        track.artist.clear();
        track.album.clear();

        assert_eq!( track.display_title(), "intro.flac" );
        assert_eq!( track.display_artist(), UNKNOWN_ARTIST );
        assert_eq!( track.display_album(), UNKNOWN_ALBUM );
    }


    #[test]
    fn test_format_millis() {
        assert_eq!( format_millis( 0 ), "0:00" );
        assert_eq!( format_millis( 61_999 ), "1:01" );
        assert_eq!( format_millis( 600_000 ), "10:00" );
    }
}
