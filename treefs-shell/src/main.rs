mod cli;

use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::process::ExitCode;
use std::sync::{Arc, Mutex};

use clap::Parser;
use cli::Cli;
use log::debug;
use treefs::{BlockDevice, FileSystem, SECTOR_SIZE};

/// Host-file block device: the image holds the sectors back to back.
struct BlockFile(Mutex<std::fs::File>);

impl BlockDevice for BlockFile {
    fn read_sector(&self, sector_id: usize, buf: &mut [u8]) {
        let mut file = self.0.lock().unwrap();
        file.seek(SeekFrom::Start((sector_id * SECTOR_SIZE) as u64))
            .expect("seek failed");
        assert_eq!(
            file.read(buf).unwrap(),
            SECTOR_SIZE,
            "not a complete sector"
        );
    }

    fn write_sector(&self, sector_id: usize, buf: &[u8]) {
        let mut file = self.0.lock().unwrap();
        file.seek(SeekFrom::Start((sector_id * SECTOR_SIZE) as u64))
            .expect("seek failed");
        assert_eq!(
            file.write(buf).unwrap(),
            SECTOR_SIZE,
            "not a complete sector"
        );
    }
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("treefs: {message}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<(), String> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .open(&cli.disk)
        .map_err(|err| format!("{}: {err}", cli.disk.display()))?;
    file.set_len((cli.sectors * SECTOR_SIZE) as u64)
        .map_err(|err| format!("{}: {err}", cli.disk.display()))?;
    let device = Arc::new(BlockFile(Mutex::new(file)));
    let mut fs = FileSystem::new(device, cli.sectors, cli.format).map_err(|err| err.to_string())?;

    if let Some(path) = &cli.mkdir {
        fs.mkdir(path).map_err(|err| format!("mkdir {path}: {err}"))?;
    }
    if let Some(args) = &cli.cp {
        copy_in(&mut fs, &args[0], &args[1])?;
    }
    if let Some(path) = &cli.list {
        print_lines(&fs.list(path, false).map_err(|err| format!("list {path}: {err}"))?);
    }
    if let Some(path) = &cli.list_recursive {
        print_lines(&fs.list(path, true).map_err(|err| format!("list {path}: {err}"))?);
    }
    if let Some(path) = &cli.remove {
        fs.remove(path, false)
            .map_err(|err| format!("remove {path}: {err}"))?;
    }
    if let Some(path) = &cli.remove_recursive {
        fs.remove(path, true)
            .map_err(|err| format!("remove {path}: {err}"))?;
    }
    Ok(())
}

/// Create `path` sized to the host file and copy the bytes in.
fn copy_in(fs: &mut FileSystem, host: &str, path: &str) -> Result<(), String> {
    let data = std::fs::read(host).map_err(|err| format!("{host}: {err}"))?;
    fs.create(path, data.len())
        .map_err(|err| format!("cp {path}: {err}"))?;
    let mut file = fs.open(path).map_err(|err| format!("cp {path}: {err}"))?;
    let written = file.write_at(0, &data);
    assert_eq!(written, data.len(), "short write into a fresh file");
    debug!("copied {written} bytes from {host} to {path}");
    Ok(())
}

fn print_lines(lines: &[String]) {
    for line in lines {
        println!("{line}");
    }
}
