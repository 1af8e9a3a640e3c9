use std::{path::PathBuf, str::FromStr};

use anyhow::{Context, Error, Result, bail};
use backend::{Line, Slot};

pub const HELP: &str = "\
commands:
  count on|off                        toggle vehicle counting
  lines x1 y1 x2 y2 x1 y1 x2 y2       set both reference lines, `lines clear` removes them
  feed                                print the latest events and counts
  sync                                upload unsynced events to the spreadsheet
  save <name> <slots json>            save a layout, e.g. [{\"points\":[{\"x\":0,\"y\":0},...]}]
  load <name>                         load a layout for occupancy detection
  layouts                             list saved layouts
  occupancy                           evaluate the loaded layout
  snapshot <path> [raw]               write the latest frame as JPEG
  quit";

/// An operator command read from stdin.
#[derive(Debug, PartialEq)]
pub enum Command {
    Counting(bool),
    Lines(Vec<Line>),
    Feed,
    Sync,
    SaveLayout { name: String, slots: Vec<Slot> },
    LoadLayout(String),
    ListLayouts,
    Occupancy,
    Snapshot { path: PathBuf, annotated: bool },
    Help,
    Quit,
}

impl FromStr for Command {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let (head, rest) = s.split_once(char::is_whitespace).unwrap_or((s, ""));
        let rest = rest.trim();

        let command = match head {
            "count" => match rest {
                "on" => Command::Counting(true),
                "off" => Command::Counting(false),
                _ => bail!("expected `count on` or `count off`"),
            },
            "lines" => Command::Lines(parse_lines(rest)?),
            "feed" => Command::Feed,
            "sync" => Command::Sync,
            "save" => {
                let Some((name, slots)) = rest.split_once(char::is_whitespace) else {
                    bail!("expected `save <name> <slots json>`");
                };
                let slots = serde_json::from_str::<Vec<Slot>>(slots.trim())
                    .context("invalid slots json")?;
                Command::SaveLayout {
                    name: name.to_string(),
                    slots,
                }
            }
            "load" if !rest.is_empty() => Command::LoadLayout(rest.to_string()),
            "load" => bail!("expected `load <name>`"),
            "layouts" => Command::ListLayouts,
            "occupancy" => Command::Occupancy,
            "snapshot" => {
                let mut args = rest.split_whitespace();
                let Some(path) = args.next() else {
                    bail!("expected `snapshot <path> [raw]`");
                };
                let annotated = match args.next() {
                    None => true,
                    Some("raw") => false,
                    Some(arg) => bail!("unknown snapshot option {arg}"),
                };
                Command::Snapshot {
                    path: PathBuf::from(path),
                    annotated,
                }
            }
            "help" | "" => Command::Help,
            "quit" | "exit" => Command::Quit,
            _ => bail!("unknown command {head}, type `help`"),
        };

        Ok(command)
    }
}

fn parse_lines(s: &str) -> Result<Vec<Line>> {
    if s.is_empty() || s == "clear" {
        return Ok(vec![]);
    }

    let values = s
        .split_whitespace()
        .map(|value| {
            value
                .parse::<f32>()
                .with_context(|| format!("invalid coordinate {value}"))
        })
        .collect::<Result<Vec<_>>>()?;
    if values.len() != 8 {
        bail!("expected 8 coordinates for two lines, got {}", values.len());
    }

    Ok(values
        .chunks_exact(4)
        .map(|line| Line::new(line[0], line[1], line[2], line[3]))
        .collect())
}
