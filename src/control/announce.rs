//! Tell the process that started us which port we listen on
use crate::{
    reactor::TimeoutWatcher,
    tcp::{Client, TcpError},
};
use log::info;
use std::time::Duration;

pub const ANNOUNCE_TIMEOUT: Duration = Duration::from_secs(5);

/// Connect to `127.0.0.1:announce_port` and send `pid=<pid>\nport=<port>\n`.
pub fn send_port_announcement(
    announce_port: u16,
    pid: u32,
    port: u16,
    timeout: Duration,
) -> Result<(), TcpError> {
    info!("announcing port {} to 127.0.0.1:{}", port, announce_port);
    let watcher = TimeoutWatcher::new(timeout);
    let mut conn = Client::connect_with_timeout("127.0.0.1", announce_port, &watcher)?;
    conn.write(format!("pid={}\nport={}\n", pid, port).as_bytes())?;
    info!("announcement sent, closing connection");
    Ok(())
}
