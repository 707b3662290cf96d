use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "calmwave", version)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Option<Command>,

    /// List output devices and exit
    #[arg(long)]
    pub list_devices: bool,

    /// Use a specific output device by substring match
    #[arg(long)]
    pub device: Option<String>,

    /// TOML config file (store location, catalog backend, engine overrides)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Local settings file; overrides `[store] path`
    #[arg(long)]
    pub store: Option<PathBuf>,

    /// Resampler input chunk size in frames (higher => more latency, lower => more overhead)
    #[arg(long)]
    pub chunk_frames: Option<usize>,

    /// Decoded audio buffered ahead of the device, in seconds
    #[arg(long)]
    pub buffer_seconds: Option<f32>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Play a track, soundscape or radio stream
    Play(PlayArgs),

    /// Run a breathing exercise
    Breathe(BreatheArgs),

    /// Manage locally stored breathing patterns
    Patterns {
        #[command(subcommand)]
        cmd: PatternsCommand,
    },

    /// Show or change voice-over clip URLs
    Voices {
        #[command(subcommand)]
        cmd: VoicesCommand,
    },

    /// Dump rows of a hosted catalog table as JSON
    Catalog {
        /// meditations, soundscapes, breathing_patterns or radio_streams
        table: String,

        /// Only the row with this id
        #[arg(long)]
        id: Option<String>,
    },

    /// Show local practice statistics
    Stats,
}

#[derive(ClapArgs, Debug)]
pub struct PlayArgs {
    /// Audio URL, storage path, or catalog id when `--from` is given
    pub source: String,

    /// Resolve `source` as an id in this catalog table
    #[arg(long)]
    pub from: Option<String>,

    /// Track to crossfade into near the end
    #[arg(long)]
    pub next: Option<String>,

    /// Restart the track when it ends
    #[arg(long = "loop")]
    pub looping: bool,

    /// Output volume in [0, 1]
    #[arg(long)]
    pub volume: Option<f32>,

    /// Enable the EQ/compressor/reverb chain
    #[arg(long)]
    pub effects: bool,

    /// EQ band gain as `index=dB` or `<hz>hz=dB`, e.g. `60hz=3`; repeatable
    #[arg(long = "eq", value_name = "BAND=DB")]
    pub eq: Vec<String>,

    /// Reverb wet share in [0, 1]
    #[arg(long)]
    pub reverb: Option<f32>,

    /// Keep the chain connected but dry
    #[arg(long)]
    pub bypass: bool,

    /// Reverb impulse response (file path or URL)
    #[arg(long)]
    pub impulse: Option<String>,
}

#[derive(ClapArgs, Debug)]
pub struct BreatheArgs {
    /// Pattern id from the local store
    #[arg(long, default_value = "relax-478")]
    pub pattern: String,

    /// Voice-over: vera or marco
    #[arg(long)]
    pub voice: Option<String>,

    /// Skip the second hold (inhale, hold, exhale)
    #[arg(long)]
    pub three_phase: bool,

    /// Override the pattern's cycle count
    #[arg(long)]
    pub cycles: Option<u32>,
}

#[derive(Subcommand, Debug)]
pub enum PatternsCommand {
    /// List stored patterns
    List,
    /// Print one pattern as JSON
    Show { id: String },
    /// Delete a stored pattern
    Remove { id: String },
    /// Replace local patterns with the hosted catalog's
    Sync,
}

#[derive(Subcommand, Debug)]
pub enum VoicesCommand {
    /// Print the clip URLs of every voice
    Show,
    /// Replace the clip URLs of one voice
    Set {
        voice: String,
        #[arg(long)]
        inhale: String,
        #[arg(long)]
        hold: String,
        #[arg(long)]
        exhale: String,
    },
}
