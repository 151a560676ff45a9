//! Chirp-Render: offline song renderer
//!
//! Decodes a song (URL string, URL file, or JSON file) and renders it to a
//! 16-bit stereo WAV file.
//!
//! # Usage
//!
//! ```bash
//! # Render a song URL for its loop length
//! chirp-render '9n31s0k0...' -o song.wav
//!
//! # Render a JSON export for ten seconds at 48 kHz
//! chirp-render song.json -o song.wav --seconds 10 --sample-rate 48000
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;

use chirp_song::{from_url, Song};
use chirp_synth::{Synth, DEFAULT_SAMPLE_RATE};

/// Render chirp songs to WAV files.
#[derive(Parser)]
#[command(name = "chirp-render")]
#[command(about = "Render chirp song URLs or JSON files to WAV")]
#[command(version)]
struct Args {
    /// Song URL, or path to a file containing a URL or JSON export.
    song: String,

    /// Output WAV path.
    #[arg(short, long, default_value = "song.wav")]
    output: PathBuf,

    /// Seconds to render; defaults to one pass of the song's loop.
    #[arg(long)]
    seconds: Option<f64>,

    /// Output sample rate in Hz.
    #[arg(long, default_value_t = DEFAULT_SAMPLE_RATE)]
    sample_rate: u32,

    /// Seed for the engine's random jitter (guitar plucks, noise phases).
    #[arg(long, default_value_t = 0x5eed)]
    seed: u64,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    let song = load_song(&args.song)?;
    let seconds = args.seconds.unwrap_or_else(|| loop_seconds(&song));

    let mut synth = Synth::with_seed(args.sample_rate, args.seed);
    synth.set_song(song);
    synth.set_looping(false);
    synth.play();

    let total = (seconds * args.sample_rate as f64) as usize;
    let mut left = vec![0.0f32; total];
    let mut right = vec![0.0f32; total];
    synth.synthesize(&mut left, &mut right);

    write_wav(&args.output, &left, &right, args.sample_rate)
        .with_context(|| format!("writing {}", args.output.display()))?;
    println!(
        "Rendered {:.2}s ({} samples) to {}",
        seconds,
        total,
        args.output.display()
    );
    Ok(())
}

/// Accept a literal URL or a path to a file holding a URL or JSON export.
fn load_song(input: &str) -> Result<Song> {
    let text = if Path::new(input).exists() {
        fs::read_to_string(input).with_context(|| format!("reading {input}"))?
    } else {
        input.to_string()
    };
    from_url(&text).with_context(|| "parsing song".to_string())
}

/// Duration of one pass from the song start through the loop, plus a
/// short tail for releases and reverb.
fn loop_seconds(song: &Song) -> f64 {
    let bars = (song.loop_start + song.loop_length) as f64;
    let seconds_per_bar = song.beats_per_bar as f64 * 60.0 / song.tempo as f64;
    bars * seconds_per_bar + 1.0
}

fn write_wav(path: &Path, left: &[f32], right: &[f32], sample_rate: u32) -> Result<()> {
    let spec = hound::WavSpec {
        channels: 2,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)?;
    for (&l, &r) in left.iter().zip(right.iter()) {
        writer.write_sample((l.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)?;
        writer.write_sample((r.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)?;
    }
    writer.finalize()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loop_seconds_covers_the_loop() {
        let song = Song::new();
        // 16 bars of 8 beats at 150 BPM, plus the tail.
        let expected = 16.0 * 8.0 * 60.0 / 150.0 + 1.0;
        assert!((loop_seconds(&song) - expected).abs() < 1e-9);
    }

    #[test]
    fn test_load_song_accepts_literal_url() {
        let url = chirp_song::to_url(&Song::new());
        let song = load_song(&url).unwrap();
        assert_eq!(song, Song::new());
    }
}
