use clap::Parser;

/// Real time audio host with a line based TCP control channel
#[derive(Parser, Debug, Clone, Default)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// TCP port for the control channel (default 33337, 0 lets the OS choose)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Interface to bind the control channel to (default 127.0.0.1)
    #[arg(short, long)]
    pub interface: Option<String>,

    /// Announce pid and port to 127.0.0.1:<ANNOUNCE> after binding
    #[arg(short, long)]
    pub announce: Option<u16>,

    /// Success acknowledgement token
    #[arg(short, long)]
    pub ok_ack: Option<String>,

    /// Failure acknowledgement token
    #[arg(short, long)]
    pub fail_ack: Option<String>,

    /// Append log records to this file, CON logs to standard error
    #[arg(short = 'm', long)]
    pub log: Option<String>,

    /// Restart the server after each exit request
    #[arg(short, long)]
    pub daemon: bool,

    /// Create the lock file locks/<port> with this content
    #[arg(short, long)]
    pub lockstr: Option<String>,

    /// Suppress all output
    #[arg(short, long)]
    pub quiet: bool,

    /// Settings file
    #[arg(short, long, default_value = "rtmha-settings.json")]
    pub settings: String,

    /// Commands executed before the server starts, e.g. gain.db=-6
    pub commands: Vec<String>,
}

#[cfg(test)]
mod test_cli {
    use super::*;

    #[test]
    fn long_options() {
        let args = Args::parse_from([
            "rtmha",
            "--port=4000",
            "--interface=0.0.0.0",
            "--announce=5000",
            "--ok-ack=OK",
            "--fail-ack=NO",
            "--log=CON",
            "--daemon",
            "--lockstr=mine",
            "--quiet",
            "gain.db=-6",
            "cmd=quit",
        ]);
        assert_eq!(args.port, Some(4000));
        assert_eq!(args.interface.as_deref(), Some("0.0.0.0"));
        assert_eq!(args.announce, Some(5000));
        assert_eq!(args.ok_ack.as_deref(), Some("OK"));
        assert_eq!(args.fail_ack.as_deref(), Some("NO"));
        assert_eq!(args.log.as_deref(), Some("CON"));
        assert!(args.daemon);
        assert_eq!(args.lockstr.as_deref(), Some("mine"));
        assert!(args.quiet);
        assert_eq!(args.commands, vec!["gain.db=-6", "cmd=quit"]);
    }

    #[test]
    fn defaults() {
        let args = Args::parse_from(["rtmha"]);
        assert_eq!(args.port, None);
        assert_eq!(args.settings, "rtmha-settings.json");
        assert!(!args.daemon);
        assert!(args.commands.is_empty());
    }

    #[test]
    fn short_options() {
        let args = Args::parse_from(["rtmha", "-p", "0", "-q", "-d"]);
        assert_eq!(args.port, Some(0));
        assert!(args.quiet && args.daemon);
    }
}
