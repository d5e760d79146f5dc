use anyhow::Result;
use clap::{crate_version, App, Arg};
use std::path::PathBuf;

pub struct DaemonCliConfig {
    pub detach_tty: bool,
    pub config_path: PathBuf,
    pub log_file: Option<PathBuf>,
    pub dump_config: bool,
}

pub fn cli_app() -> Result<DaemonCliConfig> {
    let matches = App::new("shutterd")
        .version(crate_version!())
        .about("Supervisor daemon for a signal-driven still-image capture program")
        .arg(
            Arg::with_name("detach_tty")
                .short("d")
                .long("detach")
                .help("Detaches the daemon from its controlling terminal")
                .takes_value(false),
        )
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("FILE")
                .help("Path to the configuration file")
                .takes_value(true)
                .default_value("./shutterd.toml"),
        )
        .arg(
            Arg::with_name("log_file")
                .short("l")
                .long("log-file")
                .value_name("FILE")
                .help("Write logs to the file (overrides log.filename)")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("dump_config")
                .long("dump-config")
                .help("Print the effective configuration at startup")
                .takes_value(false),
        )
        .get_matches();

    Ok(DaemonCliConfig {
        detach_tty: matches.is_present("detach_tty"),
        config_path: PathBuf::from(
            matches.value_of("config").expect("config has a default"),
        ),
        log_file: matches.value_of("log_file").map(PathBuf::from),
        dump_config: matches.is_present("dump_config"),
    })
}
