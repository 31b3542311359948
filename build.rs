//! Renders the `sisyphus` man pages into the build output directory.
//!
//! `sisyphus.1` documents the global options and lists the build operations;
//! each operation (`prepare`, `build`, `watch`, `download`, ...) also gets its
//! own `sisyphus-<operation>.1` page with the host, package and transfer
//! options it accepts.

use std::env;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use clap::CommandFactory;
use clap_mangen::Man;

#[path = "src/cli/mod.rs"]
mod cli;

use cli::Cli;

fn write_page(man: &Man, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let mut buffer = Vec::new();
    man.render(&mut buffer)?;
    File::create(path)?.write_all(&buffer)?;
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut stdout = std::io::stdout();
    writeln!(stdout, "cargo:rerun-if-changed=build.rs")?;
    writeln!(stdout, "cargo:rerun-if-changed=src/cli/mod.rs")?;

    let out_dir =
        PathBuf::from(env::var_os("OUT_DIR").ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, "OUT_DIR was not set")
        })?);

    let command = Cli::command();
    write_page(&Man::new(command.clone()), &out_dir.join("sisyphus.1"))?;

    for operation in command.get_subcommands() {
        let title = format!("sisyphus-{}", operation.get_name());
        let page = Man::new(operation.clone()).title(title.clone());
        write_page(&page, &out_dir.join(format!("{title}.1")))?;
    }

    Ok(())
}
