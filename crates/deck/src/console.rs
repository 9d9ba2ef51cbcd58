//! Line-oriented control console for one or more engines.

use std::io::{BufRead, Write};
use std::sync::Arc;

use anyhow::{Result, anyhow};
use deck_player::{DeckError, Engine, EngineVolume};

pub const HELP: &str = "\
commands:
  use <n>          select engine n
  play | stop      start / stop the selected engine
  next | prev      jump to the next / previous track
  index <i>        select track i without starting it
  goto <i>         play track i now
  vol <v>          set both gains (0.0 - 1.0)
  left <v>         set the left gain
  right <v>        set the right gain
  swap <i> <j>     exchange two playlist entries (rewinds to track 0)
  move <i> <j>     move a playlist entry (rewinds to track 0)
  list             show the selected engine's playlist
  status           print every engine's status as JSON
  help | quit";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Use(usize),
    Play,
    Stop,
    Next,
    Prev,
    Index(usize),
    Goto(usize),
    Volume(f32),
    Left(f32),
    Right(f32),
    Swap(usize, usize),
    Move(usize, usize),
    List,
    Status,
    Help,
    Quit,
}

pub fn parse_command(line: &str) -> Result<Command> {
    let mut words = line.split_whitespace();
    let verb = words.next().ok_or_else(|| anyhow!("empty command"))?;
    let args: Vec<&str> = words.collect();

    let cmd = match (verb, args.as_slice()) {
        ("use", [n]) => Command::Use(parse_arg(n)?),
        ("play", []) => Command::Play,
        ("stop", []) => Command::Stop,
        ("next" | "skip", []) => Command::Next,
        ("prev" | "previous", []) => Command::Prev,
        ("index", [i]) => Command::Index(parse_arg(i)?),
        ("goto", [i]) => Command::Goto(parse_arg(i)?),
        ("vol" | "volume", [v]) => Command::Volume(parse_arg(v)?),
        ("left", [v]) => Command::Left(parse_arg(v)?),
        ("right", [v]) => Command::Right(parse_arg(v)?),
        ("swap", [i, j]) => Command::Swap(parse_arg(i)?, parse_arg(j)?),
        ("move", [i, j]) => Command::Move(parse_arg(i)?, parse_arg(j)?),
        ("list", []) => Command::List,
        ("status", []) => Command::Status,
        ("help" | "?", []) => Command::Help,
        ("quit" | "exit", []) => Command::Quit,
        _ => return Err(anyhow!("unknown command: {line}")),
    };
    Ok(cmd)
}

fn parse_arg<T: std::str::FromStr>(raw: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    raw.parse::<T>()
        .map_err(|e| anyhow!("bad argument {raw:?}: {e}"))
}

/// Engines driven by the console, plus the one commands go to.
pub struct Deck {
    engines: Arc<Vec<Engine>>,
    selected: usize,
}

impl Deck {
    pub fn new(engines: Arc<Vec<Engine>>) -> Self {
        Self {
            engines,
            selected: 0,
        }
    }

    /// Read commands until `quit` or end of input, then stop every engine.
    pub fn run(&mut self, input: impl BufRead, mut out: impl Write) -> Result<()> {
        writeln!(out, "{} engine(s) ready; type `help` for commands", self.engines.len())?;
        for line in input.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match parse_command(&line) {
                Ok(Command::Quit) => break,
                Ok(cmd) => {
                    if let Err(e) = self.execute(cmd, &mut out) {
                        writeln!(out, "error: {e:#}")?;
                    }
                }
                Err(e) => writeln!(out, "error: {e}")?,
            }
        }
        self.stop_all();
        Ok(())
    }

    pub fn stop_all(&self) {
        for engine in self.engines.iter() {
            engine.stop();
        }
    }

    fn engine(&self) -> &Engine {
        &self.engines[self.selected]
    }

    fn execute(&mut self, cmd: Command, out: &mut impl Write) -> Result<()> {
        match cmd {
            Command::Use(n) => {
                if n >= self.engines.len() {
                    return Err(anyhow!("no engine {n}; have {}", self.engines.len()));
                }
                self.selected = n;
                writeln!(out, "engine {n} ({}) selected", self.engine().channel_id())?;
            }
            Command::Play => self.engine().play()?,
            Command::Stop => self.engine().stop(),
            Command::Next => {
                let index = self.engine().skip()?;
                writeln!(out, "track {index}")?;
            }
            Command::Prev => {
                let index = self.engine().previous()?;
                writeln!(out, "track {index}")?;
            }
            Command::Index(i) => self.engine().set_index(i)?,
            Command::Goto(i) => self.engine().play_track_at(i)?,
            Command::Volume(v) => report_volume(out, self.engine().set_volume(v))?,
            Command::Left(v) => report_volume(out, self.engine().set_left_volume(v))?,
            Command::Right(v) => report_volume(out, self.engine().set_right_volume(v))?,
            Command::Swap(i, j) => {
                let mut playlist = self.engine().playlist();
                playlist.exchange(i, j)?;
                self.engine().set_playlist(playlist);
            }
            Command::Move(from, to) => {
                let mut playlist = self.engine().playlist();
                playlist.move_track(from, to)?;
                self.engine().set_playlist(playlist);
            }
            Command::List => {
                let current = self.engine().current_index();
                for (i, track) in self.engine().playlist().iter().enumerate() {
                    let marker = if i == current { '>' } else { ' ' };
                    writeln!(out, "{marker} {i:>3}  {}  [{}]", track.display_name(), track.media_kind())?;
                }
            }
            Command::Status => {
                let statuses: Vec<_> = self.engines.iter().map(Engine::status).collect();
                writeln!(out, "{}", serde_json::to_string_pretty(&statuses)?)?;
            }
            Command::Help => writeln!(out, "{HELP}")?,
            Command::Quit => {}
        }
        Ok(())
    }
}

fn report_volume(out: &mut impl Write, applied: Result<EngineVolume, DeckError>) -> Result<()> {
    let volume = applied?;
    writeln!(out, "volume L {:.2} R {:.2}", volume.left, volume.right)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::time::Duration;

    use deck_player::testing::{FakeBackend, fixture_playlist, names, wait_until, WAIT};
    use deck_player::{EngineConfig, EngineRegistry, OutputChannel, PlaybackState};

    fn deck_of(tag: &str, engines: usize, tracks: usize) -> (Deck, Arc<FakeBackend>, Arc<Vec<Engine>>) {
        let backend = FakeBackend::new();
        let registry = EngineRegistry::new(backend.clone());
        let config = EngineConfig {
            poll_interval: Duration::from_millis(5),
            ..EngineConfig::default()
        };
        let engines: Vec<Engine> = (0..engines)
            .map(|i| {
                let playlist = fixture_playlist(&format!("{tag}-{i}"), tracks);
                Engine::with_registry(&registry, playlist, config.clone()).unwrap()
            })
            .collect();
        let engines = Arc::new(engines);
        (Deck::new(engines.clone()), backend, engines)
    }

    fn run_script(deck: &mut Deck, script: &str) -> String {
        let mut out = Vec::new();
        deck.run(Cursor::new(script), &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn use_checks_engine_bounds() {
        let (mut deck, _backend, _engines) = deck_of("console-use", 2, 2);
        let out = run_script(&mut deck, "use 5\nuse 1\nquit\n");
        assert!(out.contains("error: no engine 5; have 2"), "{out}");
        assert!(out.contains("engine 1 ("), "{out}");
        assert_eq!(deck.selected, 1);
    }

    #[test]
    fn swap_and_move_rewrite_the_playlist_and_rewind() {
        let (mut deck, _backend, engines) = deck_of("console-swap", 1, 3);
        run_script(&mut deck, "index 2\nswap 0 2\n");
        assert_eq!(names(&engines[0].playlist()), vec!["02.mp3", "01.mp3", "00.mp3"]);
        assert_eq!(engines[0].current_index(), 0);

        run_script(&mut deck, "index 1\nmove 0 2\n");
        assert_eq!(names(&engines[0].playlist()), vec!["01.mp3", "00.mp3", "02.mp3"]);
        assert_eq!(engines[0].current_index(), 0);
    }

    #[test]
    fn bad_swap_reports_and_keeps_playlist() {
        let (mut deck, _backend, engines) = deck_of("console-bad-swap", 1, 3);
        engines[0].set_index(1).unwrap();
        let out = run_script(&mut deck, "swap 0 9\n");
        assert!(out.contains("error:"), "{out}");
        assert_eq!(names(&engines[0].playlist()), vec!["00.mp3", "01.mp3", "02.mp3"]);
        assert_eq!(engines[0].current_index(), 1);
    }

    #[test]
    fn status_prints_every_engine_as_json() {
        let (mut deck, _backend, _engines) = deck_of("console-status", 2, 4);
        let out = run_script(&mut deck, "left 0.3\nstatus\n");
        let json = &out[out.find('[').unwrap()..=out.rfind(']').unwrap()];
        let statuses: serde_json::Value = serde_json::from_str(json).unwrap();

        let statuses = statuses.as_array().unwrap();
        assert_eq!(statuses.len(), 2);
        assert_eq!(statuses[0]["state"], "idle");
        assert_eq!(statuses[0]["playlist_len"], 4);
        assert!((statuses[0]["left_volume"].as_f64().unwrap() - 0.3).abs() < 1e-6);
        assert_eq!(statuses[1]["left_volume"], 1.0);
    }

    #[test]
    fn transport_commands_drive_the_selected_engine() {
        let (mut deck, backend, engines) = deck_of("console-transport", 2, 3);
        let out = run_script(&mut deck, "use 1\nplay\nnext\nvol 0.5\nright 2\n");
        assert!(out.contains("track 1"), "{out}");
        assert!(out.contains("volume L 0.50 R 0.50"), "{out}");
        assert!(out.contains("volume L 0.50 R 1.00"), "{out}");
        assert!(backend.channel(engines[0].channel_id()).plays().is_empty());
        assert!(!backend.channel(engines[1].channel_id()).plays().is_empty());
    }

    #[test]
    fn quit_stops_every_engine() {
        let (mut deck, backend, engines) = deck_of("console-quit", 2, 3);
        let out = run_script(&mut deck, "play\nuse 1\ngoto 2\nquit\nplay\n");
        assert!(!out.contains("error"), "{out}");
        for engine in engines.iter() {
            assert_eq!(engine.state(), PlaybackState::Stopped);
            let channel = backend.channel(engine.channel_id());
            assert!(wait_until(WAIT, || !channel.is_busy()));
        }
        assert_eq!(engines[1].current_index(), 2);
    }

    #[test]
    fn end_of_input_also_stops_engines() {
        let (mut deck, _backend, engines) = deck_of("console-eof", 1, 2);
        run_script(&mut deck, "play\n");
        assert_eq!(engines[0].state(), PlaybackState::Stopped);
    }

    #[test]
    fn unknown_lines_are_reported_and_skipped() {
        let (mut deck, _backend, _engines) = deck_of("console-unknown", 1, 1);
        let out = run_script(&mut deck, "\n  \ndance\nhelp\n");
        assert!(out.contains("error: unknown command: dance"), "{out}");
        assert!(out.contains("commands:"), "{out}");
    }

    #[test]
    fn parses_control_commands() {
        assert_eq!(parse_command("play").unwrap(), Command::Play);
        assert_eq!(parse_command("  next ").unwrap(), Command::Next);
        assert_eq!(parse_command("goto 3").unwrap(), Command::Goto(3));
        assert_eq!(parse_command("vol 0.5").unwrap(), Command::Volume(0.5));
        assert_eq!(parse_command("swap 1 2").unwrap(), Command::Swap(1, 2));
        assert_eq!(parse_command("use 1").unwrap(), Command::Use(1));
        assert_eq!(parse_command("exit").unwrap(), Command::Quit);
    }

    #[test]
    fn rejects_bad_arguments() {
        assert!(parse_command("goto -1").is_err());
        assert!(parse_command("vol loud").is_err());
        assert!(parse_command("swap 1").is_err());
        assert!(parse_command("play now").is_err());
        assert!(parse_command("dance").is_err());
    }

    #[test]
    fn out_of_range_volume_parses_and_is_left_to_the_engine() {
        assert_eq!(parse_command("left 2.5").unwrap(), Command::Left(2.5));
    }
}
