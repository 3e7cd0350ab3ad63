// This file is part of orion128.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

mod app;

use std::env;
use std::fs;
use std::path::Path;
use std::process;

use log::info;
use orion128_core::{new_shared, DisplaySink, Shared};
use orion128_emu::system::{Config, Orientation, Orion128};
use termion::raw::IntoRawMode;

use crate::app::FrameBuffer;

static NAME: &str = "orion128";
static VERSION: &str = env!("CARGO_PKG_VERSION");

const DISPLAY_WIDTH: u32 = 480;
const DISPLAY_HEIGHT: u32 = 320;

fn main() {
    match run(env::args().collect()) {
        Ok(rc) => process::exit(rc),
        Err(err) => {
            eprintln!("Error: {}", err);
            process::exit(1)
        }
    }
}

fn build_cli_options() -> getopts::Options {
    let mut opts = getopts::Options::new();
    opts.optopt("", "rom", "boot ROM image (2 KiB monitor)", "path")
        .optopt("", "romdisk", "ROM-disk image", "path")
        .optopt("", "ram", "initial RAM image, loaded into page 1", "path")
        // Logging
        .optopt("", "loglevel", "set log level", "[error|warn|info|debug|trace]")
        // Diagnostics
        .optflag("", "trace", "enable the instruction tracer")
        .optflag("", "cycles", "report the emulated clock speed")
        // Display
        .optopt("", "orientation", "display orientation", "[landscape|portrait]")
        .optflag("", "flip-v", "flip the display vertically")
        .optflag("", "flip-h", "flip the display horizontally")
        // Execution
        .optopt("", "steps", "run a bounded number of steps and exit", "number")
        // Help
        .optflag("h", "help", "display this help")
        .optflag("V", "version", "display this version");
    opts
}

fn build_config(matches: &getopts::Matches) -> Result<Config, String> {
    let mut config = Config::new();
    config.trace = matches.opt_present("trace");
    config.cycles = matches.opt_present("cycles");
    if let Some(name) = matches.opt_str("orientation") {
        config.orientation =
            Orientation::from(&name).ok_or_else(|| format!("invalid orientation {}", name))?;
    }
    config.flip_vertically = matches.opt_present("flip-v");
    config.flip_horizontally = matches.opt_present("flip-h");
    Ok(config)
}

fn init_logging(matches: &getopts::Matches) -> Result<(), String> {
    let loglevel = matches
        .opt_str("loglevel")
        .unwrap_or_else(|| "info".to_string());
    let mut builder = env_logger::Builder::new();
    builder.parse_filters(&loglevel);
    if let Ok(filters) = env::var("RUST_LOG") {
        builder.parse_filters(&filters);
    }
    builder
        .try_init()
        .map_err(|_| "cannot initialize logging".to_string())
}

fn load_image(path: &str) -> Result<Vec<u8>, String> {
    fs::read(Path::new(path)).map_err(|err| format!("cannot read {}: {}", path, err))
}

fn print_help(opts: &getopts::Options) {
    println!("{} {}", NAME, VERSION);
    println!();
    println!("Usage:");
    print!("{}", opts.usage("Orion-128 rustified emulator"));
}

fn print_version() {
    println!("{} {}", NAME, VERSION);
}

fn run(args: Vec<String>) -> Result<i32, String> {
    let opts = build_cli_options();
    let matches = opts
        .parse(&args[1..])
        .map_err(|f| format!("Invalid options\n{}", f))?;
    if matches.opt_present("help") {
        print_help(&opts);
        return Ok(0);
    }
    if matches.opt_present("version") {
        print_version();
        return Ok(0);
    }
    init_logging(&matches)?;
    info!("Starting {}", NAME);

    let config = build_config(&matches)?;
    let rom = load_image(
        &matches
            .opt_str("rom")
            .ok_or_else(|| "missing --rom image".to_string())?,
    )?;
    let rom_disk = match matches.opt_str("romdisk") {
        Some(path) => load_image(&path)?,
        None => Vec::new(),
    };
    let ram = match matches.opt_str("ram") {
        Some(path) => load_image(&path)?,
        None => Vec::new(),
    };

    let sink: Shared<dyn DisplaySink + Send> =
        new_shared(FrameBuffer::new(DISPLAY_WIDTH, DISPLAY_HEIGHT, &config));
    let mut machine =
        Orion128::new(config, sink, &rom, &rom_disk, &ram).map_err(|err| format!("{}", err))?;

    // Raw mode so key bytes arrive unbuffered; running under a pipe is
    // fine without it.
    let _raw = std::io::stdout().into_raw_mode().ok();
    let _reader = app::io::spawn_reader(machine.key_sender());

    match matches.opt_str("steps") {
        Some(count) => {
            let count = count
                .parse::<u64>()
                .map_err(|_| format!("invalid step count {}", count))?;
            for _ in 0..count {
                machine.step();
            }
        }
        None => loop {
            machine.step();
        },
    }
    Ok(0)
}
