use crate::common::box_error::BoxError;
use env_logger::{Builder, Env, Target};
use log::LevelFilter;
use std::{fs::OpenOptions, io::Write};

/// Set up env_logger for the binary.
///
/// `RUST_LOG` is honoured, the default level is info.  With a log file the
/// records are appended to it; `CON` means standard error.  Quiet without a
/// log file switches logging off.
pub fn init_logging(log: Option<&str>, quiet: bool) -> Result<(), BoxError> {
    let mut builder = Builder::from_env(Env::default().default_filter_or("info"));
    match log {
        Some("CON") => {
            builder.target(Target::Stderr);
        }
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            builder.target(Target::Pipe(Box::new(file)));
        }
        None if quiet => {
            builder.filter_level(LevelFilter::Off);
        }
        None => (),
    }
    builder.format(|buf, record| {
        writeln!(
            buf,
            "{} {:5} {}: {}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
            record.level(),
            record.target(),
            record.args()
        )
    });
    builder.try_init()?;
    Ok(())
}
