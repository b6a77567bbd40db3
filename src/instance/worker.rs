use crate::config::TransportConfig;
use crate::error::Error;
use crate::instance::state::Status;
use crate::msg::Logger;
use crate::net::{Service, Transport};

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::runtime::Builder;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

/// Interval used while waiting for the worker thread to finish
const JOIN_POLL: Duration = Duration::from_millis(10);

pub enum Command {
    /// Close the transport, acknowledged once the server task is gone
    Shutdown(mpsc::Sender<()>),
    /// Leave the scheduler loop and end the thread
    Halt,
}

/// Dedicated thread running a current-thread runtime that serves one transport
pub struct Worker {
    handle: JoinHandle<()>,
    commands: UnboundedSender<Command>,
}

impl Worker {
    pub fn spawn(
        name: &str,
        transport: TransportConfig,
        service: Service,
        status: Status,
        log: Logger,
    ) -> Result<Self, Error> {
        let (commands, receiver) = unbounded_channel();
        let handle = std::thread::Builder::new()
            .name(format!("slave-{}", name))
            .spawn(move || {
                let failed = status.clone();
                let log_panic = log.clone();
                let res = catch_unwind(AssertUnwindSafe(move || {
                    run(transport, service, status, log, receiver)
                }));
                if res.is_err() {
                    log_panic.err("Worker panicked");
                    failed.fail(Error::Transport(str!("Worker panicked")));
                }
            })
            .map_err(|e| Error::Transport(format!("Failed to spawn worker ({})", e)))?;
        Ok(Self { handle, commands })
    }

    /// Ask the worker to close its transport and wait for the acknowledgement
    pub fn shutdown(&self, timeout: Duration) -> Result<(), Error> {
        let (ack, done) = mpsc::channel();
        self.commands
            .send(Command::Shutdown(ack))
            .map_err(|_| Error::NotRunning)?;
        match done.recv_timeout(timeout) {
            Ok(()) => Ok(()),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(Error::NotRunning),
            Err(mpsc::RecvTimeoutError::Timeout) => {
                Err(Error::Timeout(str!("transport shutdown")))
            }
        }
    }

    pub fn halt(&self) {
        let _ = self.commands.send(Command::Halt);
    }

    /// Join the thread if it finishes within `timeout`, otherwise detach it
    pub fn join(self, timeout: Duration) -> Result<(), Error> {
        let deadline = Instant::now() + timeout;
        while !self.handle.is_finished() {
            if Instant::now() >= deadline {
                return Err(Error::Timeout(str!("worker join")));
            }
            std::thread::sleep(JOIN_POLL);
        }
        self.handle
            .join()
            .map_err(|_| Error::Transport(str!("Worker panicked")))
    }
}

fn run(
    config: TransportConfig,
    service: Service,
    status: Status,
    log: Logger,
    mut commands: UnboundedReceiver<Command>,
) {
    let runtime = match Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            log.err(&format!("Failed to build runtime ({})", e));
            status.fail(e.into());
            return;
        }
    };

    runtime.block_on(async move {
        let transport = match Transport::bind(&config).await {
            Ok(transport) => transport,
            Err(e) => {
                log.err(&format!("Failed to start {}: {}", config, e));
                status.fail(e);
                return;
            }
        };
        status.running();
        log.ok(&format!("Serving on {}", config));

        let mut server = tokio::spawn(transport.serve(service));
        let mut finished = false;
        loop {
            tokio::select! {
                res = &mut server, if !finished => {
                    finished = true;
                    let error = match res {
                        Ok(Ok(())) => Error::Transport(str!("Server terminated")),
                        Ok(Err(e)) => e,
                        Err(e) => Error::Transport(e.to_string()),
                    };
                    log.err(&format!("Server on {} stopped: {}", config, error));
                    status.fail(error);
                }
                cmd = commands.recv() => match cmd {
                    Some(Command::Shutdown(ack)) => {
                        if !finished {
                            server.abort();
                            let _ = (&mut server).await;
                            finished = true;
                        }
                        let _ = ack.send(());
                    }
                    Some(Command::Halt) | None => break,
                },
            }
        }
        server.abort();
    });
}
