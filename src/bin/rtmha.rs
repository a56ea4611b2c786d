use clap::Parser;
use log::{error, info};
use rtmha::{
    common::box_error::BoxError,
    host::{self, logging::init_logging, Args, HostSettings},
};
use std::process::ExitCode;

fn start(args: Args) -> Result<(), BoxError> {
    init_logging(args.log.as_deref(), args.quiet)?;
    let settings = HostSettings::build(&args)?;
    info!("starting rtmha, pid {}", settings.control.pid);
    host::run(&settings)
}

fn main() -> ExitCode {
    let args = Args::parse();
    match start(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
