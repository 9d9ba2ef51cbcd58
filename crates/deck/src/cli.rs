use std::path::PathBuf;

use clap::{Parser, Subcommand};

const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("DECK_GIT_SHA"),
    ", ",
    env!("DECK_BUILD_DATE"),
    ")"
);

#[derive(Parser, Debug)]
#[command(name = "deck", version = VERSION, about = "Play folders of audio on independent output channels")]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Option<Command>,

    /// List output devices and exit
    #[arg(long)]
    pub list_devices: bool,

    /// Use a specific output device by substring match
    #[arg(long, env = "DECK_DEVICE")]
    pub device: Option<String>,

    /// TOML config file; flags override its values
    #[arg(long, env = "DECK_CONFIG")]
    pub config: Option<PathBuf>,

    /// Resampler input chunk size in frames
    #[arg(long)]
    pub chunk_frames: Option<usize>,

    /// Max frames the output callback pulls per refill
    #[arg(long)]
    pub refill_max_frames: Option<usize>,

    /// Queue buffer target in seconds (per stage)
    #[arg(long)]
    pub buffer_seconds: Option<f32>,

    /// Gain applied to both sides of every new engine (0.0 - 1.0)
    #[arg(long)]
    pub volume: Option<f32>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the playlist a folder resolves to
    List {
        folder: PathBuf,

        /// Keep directory order instead of sorting by file name
        #[arg(long)]
        no_sort: bool,
    },

    /// Play a folder and read control commands from stdin
    Play {
        folder: PathBuf,

        /// Number of engines playing the folder, each on its own channel
        #[arg(long, default_value_t = 1)]
        players: usize,

        /// Keep directory order instead of sorting by file name
        #[arg(long)]
        no_sort: bool,

        /// Start every engine right away
        #[arg(long)]
        autoplay: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_play_with_players() {
        let args = Args::try_parse_from(["deck", "play", "/music", "--players", "2"]).unwrap();
        match args.cmd {
            Some(Command::Play {
                folder,
                players,
                no_sort,
                autoplay,
            }) => {
                assert_eq!(folder, PathBuf::from("/music"));
                assert_eq!(players, 2);
                assert!(!no_sort);
                assert!(!autoplay);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn list_devices_needs_no_subcommand() {
        let args = Args::try_parse_from(["deck", "--list-devices"]).unwrap();
        assert!(args.list_devices);
        assert!(args.cmd.is_none());
    }

    #[test]
    fn tuning_flags_are_optional() {
        let args = Args::try_parse_from(["deck", "--buffer-seconds", "0.5", "list", "."]).unwrap();
        assert_eq!(args.buffer_seconds, Some(0.5));
        assert_eq!(args.chunk_frames, None);
    }
}
