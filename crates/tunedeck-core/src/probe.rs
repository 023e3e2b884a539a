//! Container probing via Symphonia
//!
//! Reads only what the container header reports (the track length); no
//! packets are decoded and no tags are read.

use std::fs::File;
use std::path::Path;

use symphonia::core::codecs::CODEC_TYPE_NULL;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::{ MediaSourceStream, MediaSourceStreamOptions };
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use thiserror::Error;


/// Errors that can occur while probing a file.
#[derive( Debug, Error )]
pub enum ProbeError {
    #[error( "Failed to open file: {0}" )]
    FileOpen( #[from] std::io::Error ),

    #[error( "Unsupported format" )]
    UnsupportedFormat,

    #[error( "No audio tracks found" )]
    NoAudioTrack,
}


/// Probes an audio file and returns its duration in seconds, if the container knows it.
pub fn probe_duration_secs( path: &Path ) -> Result<Option<f64>, ProbeError> {
    let file = File::open( path )?;
    let mss = MediaSourceStream::new( Box::new( file ), MediaSourceStreamOptions::default() );

    let mut hint = Hint::new();
    if let Some( ext ) = path.extension().and_then( |e| e.to_str() ) {
        hint.with_extension( ext );
    }

    let probed = symphonia::default::get_probe()
        .format( &hint, mss, &FormatOptions::default(), &MetadataOptions::default() )
        .map_err( |_| ProbeError::UnsupportedFormat )?;

    let track = probed.format
        .tracks()
        .iter()
        .find( |t| t.codec_params.codec != CODEC_TYPE_NULL )
        .ok_or( ProbeError::NoAudioTrack )?;

    let params = &track.codec_params;
    let duration = match ( params.n_frames, params.sample_rate ) {
        ( Some( frames ), Some( rate ) ) if rate > 0 => Some( frames as f64 / rate as f64 ),
        _ => None,
    };

    tracing::debug!( "Probed {:?}: duration {:?}s", path, duration );
    Ok( duration )
}


/// Builds a mono 16-bit PCM WAV file holding `frames` silent samples.
#[cfg( test )]
pub( crate ) fn silent_wav( sample_rate: u32, frames: u32 ) -> Vec<u8> {
    let data_len = frames * 2;
    let mut bytes = Vec::with_capacity( 44 + data_len as usize );
    bytes.extend_from_slice( b"RIFF" );
    bytes.extend_from_slice( &( 36 + data_len ).to_le_bytes() );
    bytes.extend_from_slice( b"WAVEfmt " );
    bytes.extend_from_slice( &16u32.to_le_bytes() );
    bytes.extend_from_slice( &1u16.to_le_bytes() ); // PCM
    bytes.extend_from_slice( &1u16.to_le_bytes() ); // mono
    bytes.extend_from_slice( &sample_rate.to_le_bytes() );
    bytes.extend_from_slice( &( sample_rate * 2 ).to_le_bytes() );
    bytes.extend_from_slice( &2u16.to_le_bytes() );
    bytes.extend_from_slice( &16u16.to_le_bytes() );
    bytes.extend_from_slice( b"data" );
    bytes.extend_from_slice( &data_len.to_le_bytes() );
    bytes.resize( 44 + data_len as usize, 0 );
    bytes
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_missing_file() {
        let result = probe_duration_secs( Path::new( "/definitely/not/here.mp3" ) );
        assert!( matches!( result, Err( ProbeError::FileOpen( _ ) ) ) );
    }


    #[test]
    fn test_garbage_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join( "noise.mp3" );
        std::fs::write( &path, b"this is not audio at all" ).unwrap();

        assert!( probe_duration_secs( &path ).is_err() );
    }


    #[test]
    fn test_wav_duration() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join( "tone.wav" );
        std::fs::write( &path, silent_wav( 8000, 16000 ) ).unwrap();

        let secs = probe_duration_secs( &path ).unwrap().unwrap();
        assert!( ( secs - 2.0 ).abs() < 1e-6 );
    }
}
