//! Process level glue for the `rtmha` binary.
//!
//! Reads the settings file and command line into [`HostSettings`], then
//! [`run`]s rounds of: fresh command dispatcher with its plugins, lock file,
//! command line commands, block clock, control server.  In daemon mode a new
//! round starts whenever the control server exits.
use crate::{
    common::{box_error::BoxError, config::Config},
    control::{
        CommandDispatcher, ControlServer, ControlSettings, HostCommands, DEFAULT_FAIL_ACK,
        DEFAULT_INTERFACE, DEFAULT_OK_ACK, DEFAULT_PORT,
    },
    hot_swap,
    processing::{run_block_clock, BlockProcessor, GainParameters, GainPlugin},
    reactor::AsyncNotify,
};
use log::{error, info, warn};
use simple_error::bail;
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

pub mod cli;
pub mod lock_file;
pub mod logging;

pub use cli::Args;
use lock_file::{LockFile, LOCK_DIR};

pub const GREETING: &str = concat!(
    "rtmha real time audio host version ",
    env!("CARGO_PKG_VERSION"),
    "\n",
    "Send commands as text lines to the control port, every answer ends\n",
    "with the success or failure token.\n"
);

/// Everything a host run needs, after merging settings file and command line
#[derive(Debug, Clone)]
pub struct HostSettings {
    pub control: ControlSettings,
    pub log: Option<String>,
    pub daemon: bool,
    pub lock_str: Option<String>,
    pub lock_dir: PathBuf,
    pub quiet: bool,
    pub commands: Vec<String>,
    pub fragsize: usize,
    pub srate: u32,
    pub gain_db: f32,
}

pub fn default_settings() -> json::JsonValue {
    json::object! {
        "port": DEFAULT_PORT,
        "interface": DEFAULT_INTERFACE,
        "ok_ack": DEFAULT_OK_ACK,
        "fail_ack": DEFAULT_FAIL_ACK,
        "daemon": false,
        "fragsize": 64,
        "srate": 48000,
        "gain_db": 0.0
    }
}

impl HostSettings {
    /// Command line values win over the settings file, which wins over defaults
    pub fn build(args: &Args) -> Result<HostSettings, BoxError> {
        let config = Config::build(args.settings.clone(), default_settings())?;
        let port = match args.port {
            Some(p) => p,
            None => {
                let p = config.get_u32_value("port", None)?;
                match u16::try_from(p) {
                    Ok(p) => p,
                    Err(_) => {
                        bail!("port {} in {} is out of range", p, config.filename())
                    }
                }
            }
        };
        let fragsize = config.get_u32_value("fragsize", None)? as usize;
        let srate = config.get_u32_value("srate", None)?;
        if fragsize == 0 || srate == 0 {
            bail!("fragsize and srate must be positive");
        }
        Ok(HostSettings {
            control: ControlSettings {
                port,
                interface: match &args.interface {
                    Some(i) => i.clone(),
                    None => config.get_str_value("interface", None)?,
                },
                announce_port: args.announce.filter(|p| *p != 0),
                ok_ack: match &args.ok_ack {
                    Some(a) => a.clone(),
                    None => config.get_str_value("ok_ack", None)?,
                },
                fail_ack: match &args.fail_ack {
                    Some(a) => a.clone(),
                    None => config.get_str_value("fail_ack", None)?,
                },
                pid: std::process::id(),
            },
            log: args.log.clone(),
            daemon: args.daemon || config.get_bool_value("daemon", None)?,
            lock_str: args.lockstr.clone(),
            lock_dir: PathBuf::from(LOCK_DIR),
            quiet: args.quiet,
            commands: args.commands.clone(),
            fragsize,
            srate,
            gain_db: config.get_f32_value("gain_db", None)?,
        })
    }
}

/// Run host rounds until an exit request outside daemon mode
pub fn run(settings: &HostSettings) -> Result<(), BoxError> {
    if !settings.quiet {
        print!("{}", GREETING);
    }
    let mut daemon = settings.daemon;
    let mut port = 0;
    loop {
        match run_round(settings, port)? {
            Some(next) => port = next,
            None => daemon = false,
        }
        if !daemon {
            break;
        }
        info!("daemon mode, restarting server");
    }
    Ok(())
}

/// One dispatcher lifetime.
///
/// `carried_port` is the `port` value the previous round's dispatcher ended
/// with, it wins over the configured port when nonzero.  Returns the port
/// value to carry into the next round, or `None` when the command line
/// commands already asked for exit, so no server was started.
fn run_round(settings: &HostSettings, carried_port: u16) -> Result<Option<u16>, BoxError> {
    let (writer, reader) = hot_swap::channel();
    let mut commands = HostCommands::new(settings.control.pid);
    commands.register(
        "gain",
        Box::new(GainParameters::new(writer, settings.gain_db)),
    );

    let _lock = match &settings.lock_str {
        Some(content) => Some(LockFile::create(
            Path::new(&settings.lock_dir),
            settings.control.port,
            content,
        )?),
        None => None,
    };

    for command in &settings.commands {
        info!("Parsing command line argument \"{}\"", command);
        let output = commands.dispatch(command)?;
        if !settings.quiet && !output.is_empty() {
            println!("{}", output.trim_end());
        }
    }
    info!("Command line arguments parsed, accepting network control input");
    if commands.exit_requested() {
        return Ok(None);
    }

    let mut control = settings.control.clone();
    let requested = if carried_port > 0 {
        carried_port
    } else {
        commands.port()
    };
    if requested > 0 {
        info!("Overwriting port number by configuration value {}", requested);
        control.port = requested;
    }

    let stop = Arc::new(AsyncNotify::new()?);
    let processor = BlockProcessor::new(GainPlugin::new(settings.srate as f32), reader);
    let clock = run_block_clock(processor, settings.fragsize, settings.srate, stop.clone())?;

    let mut server = ControlServer::new(control, commands)?;
    let served = server.run();
    stop.set();
    match clock.join() {
        Ok(Ok(blocks)) => info!("audio processing stopped after {} blocks", blocks),
        Ok(Err(e)) => warn!("audio processing failed: {}", e),
        Err(_) => error!("block clock thread panicked"),
    }
    served?;
    Ok(Some(server.dispatcher().port()))
}
