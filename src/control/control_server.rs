//! Accept loop and per client command loop
use super::{
    announce::{send_port_announcement, ANNOUNCE_TIMEOUT},
    CommandDispatcher, DEFAULT_FAIL_ACK, DEFAULT_INTERFACE, DEFAULT_OK_ACK, DEFAULT_PORT,
};
use crate::{
    common::box_error::BoxError,
    reactor::{AsyncNotify, EventWatcher, ReactorError},
    tcp::{Connection, Server, TcpError},
    thread::Thread,
};
use log::{debug, error, info, warn};
use simple_error::bail;
use std::sync::Arc;

/// Everything the control server needs to know about its surroundings
#[derive(Debug, Clone)]
pub struct ControlSettings {
    pub port: u16,
    pub interface: String,
    /// announce pid and port to this local port after binding
    pub announce_port: Option<u16>,
    pub ok_ack: String,
    pub fail_ack: String,
    pub pid: u32,
}

impl Default for ControlSettings {
    fn default() -> Self {
        ControlSettings {
            port: DEFAULT_PORT,
            interface: DEFAULT_INTERFACE.to_string(),
            announce_port: None,
            ok_ack: DEFAULT_OK_ACK.to_string(),
            fail_ack: DEFAULT_FAIL_ACK.to_string(),
            pid: std::process::id(),
        }
    }
}

/// Why a client session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClientEnd {
    Eof,
    Stopped,
    Exit,
}

pub struct ControlServer<D> {
    settings: ControlSettings,
    dispatcher: D,
    exit: Arc<AsyncNotify>,
    stop: Arc<AsyncNotify>,
}

impl<D: CommandDispatcher + 'static> ControlServer<D> {
    pub fn new(settings: ControlSettings, dispatcher: D) -> Result<ControlServer<D>, ReactorError> {
        Ok(ControlServer {
            settings,
            dispatcher,
            exit: Arc::new(AsyncNotify::new()?),
            stop: Arc::new(AsyncNotify::new()?),
        })
    }

    pub fn settings(&self) -> &ControlSettings {
        &self.settings
    }

    pub fn dispatcher(&self) -> &D {
        &self.dispatcher
    }

    pub fn dispatcher_mut(&mut self) -> &mut D {
        &mut self.dispatcher
    }

    pub fn into_dispatcher(self) -> D {
        self.dispatcher
    }

    /// Set from any thread to shut the server down
    pub fn exit_event(&self) -> &Arc<AsyncNotify> {
        &self.exit
    }

    /// Set from any thread to drop the current client
    pub fn stop_event(&self) -> &Arc<AsyncNotify> {
        &self.stop
    }

    /// Bind, announce and tell the dispatcher the port
    pub fn listen(&mut self) -> Result<Server, BoxError> {
        info!(
            "opening control server on {}:{}",
            self.settings.interface, self.settings.port
        );
        let server = Server::bind(self.settings.port, &self.settings.interface)?;
        if let Some(announce_port) = self.settings.announce_port {
            send_port_announcement(
                announce_port,
                self.settings.pid,
                server.get_port(),
                ANNOUNCE_TIMEOUT,
            )?;
        }
        self.dispatcher.server_started(server.get_port());
        Ok(server)
    }

    /// Run the whole Idle -> Listening -> Idle cycle on this thread
    pub fn run(&mut self) -> Result<(), BoxError> {
        let server = self.listen()?;
        self.serve(server)
    }

    /// Accept clients one after the other until an exit request.  The server
    /// socket is closed when this returns.
    pub fn serve(&mut self, server: Server) -> Result<(), BoxError> {
        let mut watcher = EventWatcher::new();
        watcher.observe(server.accept_event());
        watcher.observe(&self.exit);
        watcher.observe(&self.stop);

        'accepting: while !self.dispatcher.exit_requested() {
            let signaled = watcher.wait()?;
            if signaled.contains(self.exit.as_ref()) {
                break;
            }
            if signaled.contains(self.stop.as_ref()) {
                debug!("stop request without a client");
                self.stop.reset();
            }
            if !signaled.contains(server.accept_event().as_ref()) {
                continue;
            }
            let conn = match server.try_accept() {
                Ok(Some(conn)) => conn,
                Ok(None) => continue,
                Err(e) => {
                    warn!("accept failed: {}", e);
                    continue;
                }
            };
            info!(
                "control client connected from {}:{}",
                conn.peer_address(),
                conn.peer_port()
            );
            match self.serve_client(conn) {
                Ok(ClientEnd::Exit) => break 'accepting,
                Ok(end) => debug!("client session ended: {:?}", end),
                Err(e) => error!("control connection failed: {}", e),
            }
        }
        self.exit.reset();
        info!("exit request, closing server on port {}", server.get_port());
        Ok(())
    }

    fn serve_client(&mut self, mut conn: Connection) -> Result<ClientEnd, TcpError> {
        let mut watcher = EventWatcher::new();
        watcher.observe(conn.read_event());
        watcher.observe(&self.exit);
        watcher.observe(&self.stop);
        loop {
            while conn.can_read_line(b'\n')? {
                let line = conn.read_line(b'\n')?;
                let response = self.respond(line.trim_end_matches(['\r', '\n']));
                conn.write(response.as_bytes())?;
                if self.dispatcher.exit_requested() {
                    return Ok(ClientEnd::Exit);
                }
            }
            if conn.eof()? {
                return Ok(ClientEnd::Eof);
            }
            let signaled = watcher.wait()?;
            if signaled.contains(self.exit.as_ref()) {
                return Ok(ClientEnd::Exit);
            }
            if signaled.contains(self.stop.as_ref()) {
                info!("stop request, closing client connection");
                self.stop.reset();
                return Ok(ClientEnd::Stopped);
            }
        }
    }

    /// The complete answer to one command line, acknowledgement included
    pub fn respond(&mut self, line: &str) -> String {
        let (mut text, ack) = if line.is_empty() {
            (String::new(), &self.settings.ok_ack)
        } else {
            debug!("received: \"{}\"", line);
            match self.dispatcher.dispatch(line) {
                Ok(out) => (out, &self.settings.ok_ack),
                Err(e) => {
                    warn!("command \"{}\" failed: {}", line, e);
                    (e.to_string(), &self.settings.fail_ack)
                }
            }
        };
        if !text.is_empty() && !text.ends_with('\n') {
            text.push('\n');
        }
        text.push_str(ack);
        text.push('\n');
        text
    }

    /// Bind now, then serve on a background thread
    pub fn spawn(mut self) -> Result<ControlHandle<D>, BoxError> {
        let server = self.listen()?;
        let port = server.get_port();
        let exit = self.exit.clone();
        let stop = self.stop.clone();
        let thread = Thread::spawn("control-server", move || {
            self.serve(server)?;
            Ok(self)
        })?;
        Ok(ControlHandle {
            port,
            exit,
            stop,
            thread,
        })
    }
}

/// Remote control for a server running on its own thread
pub struct ControlHandle<D> {
    port: u16,
    exit: Arc<AsyncNotify>,
    stop: Arc<AsyncNotify>,
    thread: Thread<ControlServer<D>>,
}

impl<D: CommandDispatcher + 'static> ControlHandle<D> {
    /// The port actually bound
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Close the current client connection, keep listening
    pub fn stop_client(&self) {
        self.stop.set();
    }

    /// Close everything and end the server thread
    pub fn request_exit(&self) {
        self.exit.set();
    }

    /// Block until the server thread ended, for whatever reason
    pub fn wait(&self) -> Result<(), ReactorError> {
        self.thread.wait()
    }

    pub fn is_finished(&self) -> bool {
        self.thread.state() == crate::thread::ThreadState::Finished
    }

    /// Shut down and get the server, with its dispatcher, back
    pub fn release(self) -> Result<ControlServer<D>, BoxError> {
        self.request_exit();
        self.wait()?;
        match self.thread.take_result() {
            Some(result) => result,
            None => {
                bail!("control server thread left no result")
            }
        }
    }
}
