//! deck: play folders of audio on independent output channels.
//!
//! `deck play <folder>` resolves the folder into a playlist, builds one engine per
//! `--players`, each on its own output channel, and drives them from a stdin console.
//! `deck list <folder>` prints what the folder resolves to.

mod cli;
mod config;
mod console;

use std::io;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use deck_player::cpal_backend::CpalBackend;
use deck_player::device;
use deck_player::{Engine, EngineRegistry, Playlist};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let args = cli::Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,deck=info,deck_player=info")
        }))
        .init();

    if args.list_devices {
        for d in device::list_output_devices()? {
            let marker = if d.is_default { " (default)" } else { "" };
            println!("#{}: {}{marker}", d.index, d.name);
        }
        return Ok(());
    }

    let file = match args.config.as_deref() {
        Some(path) => config::DeckConfig::load(path)?,
        None => config::DeckConfig::default(),
    };
    let settings = config::resolve(&args, &file);

    match &args.cmd {
        Some(cli::Command::List { folder, no_sort }) => {
            let playlist = Playlist::from_folder(folder, !no_sort)?;
            for (i, track) in playlist.iter().enumerate() {
                println!("{i:>3}  {}  [{}]", track.display_name(), track.media_kind());
            }
            tracing::info!(tracks = playlist.len(), "listed folder");
        }
        Some(cli::Command::Play {
            folder,
            players,
            no_sort,
            autoplay,
        }) => {
            let playlist = Playlist::from_folder(folder, !no_sort)?;
            if playlist.is_empty() {
                bail!("no audio files in {}", folder.display());
            }
            if *players == 0 {
                bail!("--players must be at least 1");
            }

            let registry =
                match EngineRegistry::install_global(Arc::new(CpalBackend::new(settings.backend))) {
                    Ok(registry) => registry,
                    Err(existing) => {
                        tracing::warn!("audio registry already initialized; reusing it");
                        existing
                    }
                };

            let engines = (0..*players)
                .map(|_| Engine::with_registry(&registry, playlist.clone(), settings.engine.clone()))
                .collect::<Result<Vec<_>, _>>()
                .context("create engines")?;
            let engines = Arc::new(engines);
            tracing::info!(
                engines = engines.len(),
                backend = registry.backend_name(),
                tracks = playlist.len(),
                "deck ready"
            );

            let for_signal = engines.clone();
            if let Err(e) = ctrlc::set_handler(move || {
                for engine in for_signal.iter() {
                    engine.stop();
                }
                std::process::exit(130);
            }) {
                tracing::warn!("failed to install Ctrl-C handler: {e}");
            }

            if *autoplay {
                for engine in engines.iter() {
                    engine.play()?;
                }
            }

            let mut deck = console::Deck::new(engines);
            deck.run(io::stdin().lock(), io::stdout())?;
        }
        None => bail!("no command given; try `deck play <folder>` or `deck --help`"),
    }

    Ok(())
}
