//! Local speaker output for jobs that do not return audio to the client.

/// Play WAV bytes on a detached thread. Returns immediately.
#[cfg(feature = "audio-playback")]
pub fn play_detached(wav: Vec<u8>) {
    std::thread::spawn(move || {
        if let Err(e) = play_audio(&wav) {
            tracing::error!("Failed to play audio: {}", e);
        }
    });
}

#[cfg(not(feature = "audio-playback"))]
pub fn play_detached(wav: Vec<u8>) {
    tracing::warn!(
        "Built without audio-playback; dropping {} bytes of audio",
        wav.len()
    );
}

#[cfg(feature = "audio-playback")]
fn play_audio(wav: &[u8]) -> Result<(), Box<dyn std::error::Error>> {
    use rodio::Source;
    use std::io::Cursor;

    let (_stream, stream_handle) = rodio::OutputStream::try_default()?;
    let source = rodio::Decoder::new(Cursor::new(wav.to_vec()))?;
    stream_handle.play_raw(source.convert_samples())?;

    // The stream stops when `_stream` drops.
    let secs = crate::audio::wav_duration_secs(wav).unwrap_or(1.0);
    std::thread::sleep(std::time::Duration::from_secs_f32(secs + 0.25));

    Ok(())
}
