use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use animgif::{Compositor, Decoder, EncoderOptions, FileDestination, GifWriter};

/// Re-encodes a GIF animation with minimal frame rectangles, disposal selection and
/// transparency-assisted compression.
#[derive(Parser, Debug)]
#[command(name = "animgif")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// GIF file to read
    input: PathBuf,

    /// Where to write the optimized GIF
    output: PathBuf,

    /// Frames held back before being written
    #[arg(long, default_value_t = 4)]
    queue_capacity: usize,

    /// Ticks per second assumed for frames that do not declare a rate
    #[arg(long, default_value_t = 50)]
    frame_rate: u32,

    /// Do not write the looping extension
    #[arg(long)]
    no_loop: bool,

    /// Discard this many frames from the end of the animation
    #[arg(long)]
    drop_trailing: Option<usize>,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let file = File::open(&cli.input)
        .with_context(|| format!("could not open {}", cli.input.display()))?;
    let mut decoder = Decoder::new(BufReader::new(file));
    decoder
        .parse()
        .with_context(|| format!("could not decode {}", cli.input.display()))?;

    let options = EncoderOptions {
        queue_capacity: cli.queue_capacity,
        default_frame_rate: cli.frame_rate,
        loop_animation: !cli.no_loop,
        drop_trailing: cli.drop_trailing,
    };
    let mut writer = GifWriter::new(FileDestination::new(&cli.output), options);

    for (i, frame) in Compositor::new(&decoder).enumerate() {
        writer
            .add_frame(&frame)
            .with_context(|| format!("frame {i} could not be encoded"))?;
    }

    let frame_count = writer.frame_count();
    if writer.finish().is_err() {
        // the writer has already reported the failed write
        std::process::exit(1);
    }
    info!(
        "wrote {frame_count} frames from {} to {}",
        cli.input.display(),
        cli.output.display()
    );
    Ok(())
}
