//! The host's own command language.
//!
//! Commands are `name=value` assignments, `name?` queries and the `?` / `?list`
//! listing.  The host knows three names itself:
//!
//! - `cmd`: only `cmd=quit`, which asks the server to shut down
//! - `port`: configured server port, settable
//! - `pid`: process id, read only
//!
//! Names starting with a registered plugin prefix followed by a dot
//! (`gain.db=-6`) are handed to that plugin's [`ParameterHandler`].
use super::CommandDispatcher;
use crate::common::box_error::BoxError;
use log::{debug, info};
use simple_error::bail;
use std::collections::BTreeMap;

/// A plugin's parameter parser.  It validates requests, builds a new
/// configuration and publishes it, typically through a
/// [`crate::hot_swap::ConfigWriter`].
pub trait ParameterHandler: Send {
    /// `request` is the command without the plugin prefix, e.g. `db=-6` or `db?`
    fn parse(&mut self, request: &str) -> Result<String, BoxError>;

    /// Current values, for listings
    fn variables(&self) -> Vec<(String, String)> {
        Vec::new()
    }
}

pub struct HostCommands {
    pid: u32,
    port: u16,
    exit: bool,
    plugins: BTreeMap<String, Box<dyn ParameterHandler>>,
}

impl HostCommands {
    pub fn new(pid: u32) -> HostCommands {
        HostCommands {
            pid,
            port: 0,
            exit: false,
            plugins: BTreeMap::new(),
        }
    }

    pub fn register(&mut self, prefix: &str, handler: Box<dyn ParameterHandler>) {
        self.plugins.insert(prefix.to_string(), handler);
    }

    /// The configured port, 0 when the command line decides
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn request_exit(&mut self) {
        self.exit = true;
    }

    fn list(&self) -> String {
        let mut out = format!("cmd = (write only)\npid = {}\nport = {}\n", self.pid, self.port);
        for (prefix, handler) in &self.plugins {
            for (name, value) in handler.variables() {
                out += &format!("{}.{} = {}\n", prefix, name, value);
            }
        }
        out
    }

    fn plugin_for(&mut self, name: &str) -> Option<(usize, &mut Box<dyn ParameterHandler>)> {
        self.plugins
            .iter_mut()
            .find(|(prefix, _)| {
                name.len() > prefix.len()
                    && name.starts_with(prefix.as_str())
                    && name.as_bytes()[prefix.len()] == b'.'
            })
            .map(|(prefix, handler)| (prefix.len() + 1, handler))
    }

    fn query(&mut self, name: &str) -> Result<String, BoxError> {
        match name {
            "pid" => Ok(self.pid.to_string()),
            "port" => Ok(self.port.to_string()),
            "cmd" => {
                bail!("\"cmd\" is write only")
            }
            _ => {
                bail!("unknown variable \"{}\"", name)
            }
        }
    }

    fn assign(&mut self, name: &str, value: &str) -> Result<String, BoxError> {
        match name {
            "cmd" => match value {
                "quit" => {
                    info!("exit requested");
                    self.exit = true;
                    Ok(String::new())
                }
                _ => {
                    bail!("unknown command \"{}\"", value)
                }
            },
            "port" => match value.parse::<u16>() {
                Ok(port) => {
                    self.port = port;
                    Ok(String::new())
                }
                Err(_) => {
                    bail!("invalid port \"{}\", expected 0..65535", value)
                }
            },
            "pid" => {
                bail!("\"pid\" is read only")
            }
            _ => {
                bail!("unknown variable \"{}\"", name)
            }
        }
    }
}

impl CommandDispatcher for HostCommands {
    fn dispatch(&mut self, line: &str) -> Result<String, BoxError> {
        let command = line.trim();
        if command == "?" || command == "?list" {
            return Ok(self.list());
        }
        let name = match command.find(['=', '?']) {
            Some(pos) => command[..pos].trim(),
            None => {
                bail!("invalid command \"{}\"", command)
            }
        };
        if let Some((skip, handler)) = self.plugin_for(name) {
            debug!("forwarding \"{}\" to plugin", command);
            return handler.parse(&command[skip..]);
        }
        if let Some(value) = command.strip_prefix(name).and_then(|r| r.trim_start().strip_prefix('=')) {
            return self.assign(name, value.trim());
        }
        if command.ends_with('?') {
            return self.query(name);
        }
        bail!("invalid command \"{}\"", command)
    }

    fn exit_requested(&self) -> bool {
        self.exit
    }

    fn server_started(&mut self, port: u16) {
        self.port = port;
    }
}
