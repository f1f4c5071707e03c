mod cli;

use std::fs;
use std::fs::OpenOptions;
use std::io;
use std::io::Write;
use std::path::Path;
use std::process;
use std::sync::{Arc, Mutex};

use chain_fs::ChainFileSystem;
use chain_fs::{NUM_SECTORS, SECTOR_SIZE};
use chain_fs_fuse::BlockFile;
use clap::Parser;
use cli::{Cli, Command};

const TRANSFER_SIZE: usize = 10;

fn main() -> io::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Command::Format => {
            let fs = ChainFileSystem::format(open_image(&cli.image, true)?);
            fs.check();
        }
        Command::Copy { files } => {
            let fs = ChainFileSystem::mount(open_image(&cli.image, false)?);
            for path in files {
                copy_in(&fs, &path)?;
            }
        }
        Command::Ls => {
            let fs = ChainFileSystem::mount(open_image(&cli.image, false)?);
            for name in fs.list() {
                println!("{name}");
            }
        }
        Command::Cat { name } => {
            let fs = ChainFileSystem::mount(open_image(&cli.image, false)?);
            let Some(mut file) = fs.open(&name) else {
                eprintln!("cat: unable to open {name}");
                process::exit(1);
            };

            let mut stdout = io::stdout().lock();
            let mut buf = [0u8; TRANSFER_SIZE];
            loop {
                let n = file.read(&mut buf);
                if n == 0 {
                    break;
                }
                stdout.write_all(&buf[..n])?;
            }
        }
        Command::Check => {
            let fs = ChainFileSystem::mount(open_image(&cli.image, false)?);
            if !fs.check() {
                process::exit(1);
            }
        }
    }

    Ok(())
}

fn open_image(path: &Path, create: bool) -> io::Result<Arc<BlockFile>> {
    let fd = OpenOptions::new()
        .read(true)
        .write(true)
        .create(create)
        .open(path)?;
    fd.set_len((NUM_SECTORS * SECTOR_SIZE) as u64)?;

    Ok(Arc::new(BlockFile(Mutex::new(fd))))
}

fn copy_in(fs: &ChainFileSystem, path: &Path) -> io::Result<()> {
    let data = fs::read(path)?;
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "bad file name"))?;

    println!("copying {name} ({} bytes)", data.len());
    if !fs.create(name, 0) {
        eprintln!("copy: could not create {name}");
        process::exit(1);
    }

    let file = fs.open(name).unwrap_or_else(|| {
        eprintln!("copy: could not reopen {name}");
        process::exit(1);
    });
    let written = file.write_at(0, &data);
    assert_eq!(written, data.len(), "short write for {name}");

    Ok(())
}
