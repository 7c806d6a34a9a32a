//! # recio Record Inspector
//!
//! Binary entry point for inspecting record-structured files with the
//! unit engine itself: each record is located, validated, and listed the
//! same way a program reading the file would see it.
//!
//! ## Usage
//!
//! ```bash
//! # List the records of a formatted (text) file
//! recio data.txt
//!
//! # List the records of a sequential unformatted file
//! recio --unformatted data.bin
//!
//! # Foreign byte order and full hex payloads
//! recio --unformatted --convert BIG_ENDIAN --hex data.bin
//! ```

use std::path::PathBuf;

use eyre::{bail, Result};
use recio::{
    Access, Action, Convert, Direction, ExternalFileUnit, IoErrorHandler, IoStat, OpenStatus,
    Position,
};

const PREVIEW_BYTES: usize = 60;

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let mut unformatted = false;
    let mut hex = false;
    let mut convert = Convert::Unknown;
    let mut file: Option<PathBuf> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_usage();
                return Ok(());
            }
            "--version" | "-v" => {
                println!("recio {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            "--unformatted" | "-u" => {
                unformatted = true;
            }
            "--hex" | "-x" => {
                hex = true;
            }
            "--convert" | "-c" => {
                i += 1;
                let Some(mode) = args.get(i) else {
                    bail!("--convert requires a mode");
                };
                convert = match Convert::parse(mode) {
                    Some(parsed) => parsed,
                    None => bail!(
                        "unknown conversion '{}' (expected UNKNOWN, NATIVE, LITTLE_ENDIAN, BIG_ENDIAN, or SWAP)",
                        mode
                    ),
                };
            }
            arg if arg.starts_with('-') => {
                bail!("unknown option: {}", arg);
            }
            path => {
                if file.is_some() {
                    bail!("multiple files specified");
                }
                file = Some(PathBuf::from(path));
            }
        }
        i += 1;
    }

    let Some(path) = file else {
        print_usage();
        return Ok(());
    };

    let mut unit = ExternalFileUnit::new(1);
    unit.access = Access::Sequential;
    unit.is_unformatted = Some(unformatted);
    let mut handler = IoErrorHandler::new();
    unit.open_unit(
        Some(OpenStatus::Old),
        Some(Action::Read),
        Position::Rewind,
        Some(path.clone()),
        convert,
        &mut handler,
    );
    if handler.in_error() {
        bail!(
            "cannot open '{}': {}",
            path.display(),
            handler.message().unwrap_or("unknown error")
        );
    }
    let stat = unit.set_direction(Direction::Input);
    if stat != IoStat::Ok {
        bail!("cannot read '{}': {}", path.display(), stat);
    }

    let mut index: u64 = 1;
    let mut total_bytes: u64 = 0;
    loop {
        let mut handler = IoErrorHandler::new();
        if !unit.begin_reading_record(&mut handler) {
            if handler.io_stat() == IoStat::End {
                break;
            }
            bail!(
                "record {}: {}",
                index,
                handler.message().unwrap_or("unreadable record")
            );
        }
        let extent = unit.record_length.unwrap_or(0);
        let payload_len = if unformatted {
            extent - recio::encoding::RECORD_MARKER_BYTES as i64
        } else {
            extent
        };
        let mut payload = vec![0u8; payload_len.max(0) as usize];
        if !payload.is_empty() && !unit.receive(&mut payload, 1, &mut handler) {
            bail!(
                "record {}: {}",
                index,
                handler.message().unwrap_or("short record")
            );
        }
        print_record(index, &payload, hex, unit.unterminated_record);
        total_bytes += payload.len() as u64;
        unit.finish_reading_record(&mut handler);
        index += 1;
    }
    println!("{} records, {} payload bytes", index - 1, total_bytes);
    Ok(())
}

fn print_record(index: u64, payload: &[u8], hex: bool, unterminated: bool) {
    let note = if unterminated { " (no terminator)" } else { "" };
    if hex {
        print!("{:>6}  {:>8}  ", index, payload.len());
        for byte in payload {
            print!("{:02x}", byte);
        }
        println!("{}", note);
    } else {
        let preview: String = String::from_utf8_lossy(payload)
            .chars()
            .take(PREVIEW_BYTES)
            .map(|c| if c.is_control() { '.' } else { c })
            .collect();
        println!("{:>6}  {:>8}  {}{}", index, payload.len(), preview, note);
    }
}

fn print_usage() {
    println!("recio - list the records of a record-structured file");
    println!();
    println!("Usage: recio [OPTIONS] FILE");
    println!();
    println!("Options:");
    println!("  -u, --unformatted     sequential unformatted (length-marked) records");
    println!("  -c, --convert MODE    byte order of the file's record markers");
    println!("  -x, --hex             dump full payloads as hex");
    println!("  -h, --help            show this help");
    println!("  -v, --version         show version");
}
