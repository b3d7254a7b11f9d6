//! Command-line front end: decode a sequence file and dump the event
//! stream as a table or as JSON.

use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};

use seqmidi::{ByteWindow, FormatKind, SequenceDecoder};
#[cfg(feature = "cps")]
use seqmidi::CpsV2Family;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum FormatArg {
    /// CPS v1 driver
    #[cfg(feature = "cps")]
    Cps1,
    /// CPS v2 driver
    #[cfg(feature = "cps")]
    Cps2,
    /// Square-SNES driver
    #[cfg(feature = "square-snes")]
    Snes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum FamilyArg {
    Classic,
    Cps3,
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Decode sound-driver sequences to a MIDI-ready event stream", long_about = None)]
struct Args {
    /// Sequence file (raw bytes extracted from a ROM)
    file: PathBuf,

    /// Sequence format
    #[arg(short, long, value_enum)]
    format: FormatArg,

    /// CPS v1 driver revision times 100 (e.g. 116, 140)
    #[arg(long, default_value_t = 140)]
    rev: u16,

    /// CPS v2 hardware family
    #[arg(long, value_enum, default_value_t = FamilyArg::Classic)]
    family: FamilyArg,

    /// Virtual offset of the sequence header within the file's address
    /// space
    #[arg(short, long, default_value_t = 0)]
    offset: u32,

    /// Dump the decoded sequence as JSON instead of a table
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let data = fs::read(&args.file)
        .with_context(|| format!("reading {}", args.file.display()))?;
    if data.is_empty() {
        bail!("{}: empty file", args.file.display());
    }
    let window = ByteWindow::load(data, args.offset);

    let format = match args.format {
        #[cfg(feature = "cps")]
        FormatArg::Cps1 => FormatKind::CpsV1 { rev: args.rev },
        #[cfg(feature = "cps")]
        FormatArg::Cps2 => FormatKind::CpsV2 {
            family: match args.family {
                FamilyArg::Classic => CpsV2Family::Classic,
                FamilyArg::Cps3 => CpsV2Family::Cps3,
            },
        },
        #[cfg(feature = "square-snes")]
        FormatArg::Snes => FormatKind::SquareSnes,
    };

    let decoder = SequenceDecoder::new(format, args.offset);
    let seq = decoder
        .decode(&window)
        .with_context(|| format!("decoding {} as {}", args.file.display(), format.name()))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&seq)?);
        return Ok(());
    }

    println!(
        "{}: {} tracks, {} ppqn, {} tempo changes",
        format.name(),
        seq.tracks.len(),
        seq.ppqn,
        seq.tempo_map.entries().len()
    );
    for track in &seq.tracks {
        println!(
            "track {:2}  [{:#06x}..{:#06x}]  {:?}  {} events  {} ticks",
            track.index,
            track.start,
            track.end,
            track.state,
            track.events.len(),
            track.total_ticks
        );
        if let Some(err) = &track.error {
            println!("          error: {}", err);
        }
        for ev in &track.events {
            println!("  {:>8}  {:#06x}  {:?}", ev.tick, ev.offset, ev.kind);
        }
    }
    Ok(())
}
