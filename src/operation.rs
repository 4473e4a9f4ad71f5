//! Running the server.
//!
//! This module implements what happens when the program is started. It is
//! encapsulated in the type [`Operation`] which is created from the
//! configuration and then executed.

use std::future::Future;
use std::sync::Arc;
use log::{error, info, warn};
use tokio::runtime::Runtime;
use crate::config::{Config, DEFAULT_PORT};
use crate::error::{ExitError, Failed};
use crate::http::{listen, ListenOptions, Listening, Server};
use crate::log::Logger;

#[cfg(unix)] use tokio::signal::unix::{Signal, SignalKind, signal};


//------------ Operation -----------------------------------------------------

/// Serve a directory until told to stop.
pub struct Operation {
    config: Config,
}

impl Operation {
    /// Prepares everything.
    ///
    /// Call this before doing anything else.
    pub fn prepare() -> Result<(), Failed> {
        Logger::init()
    }

    /// Creates the operation from the configuration.
    pub fn new(config: Config) -> Self {
        Operation { config }
    }

    /// Runs the server.
    ///
    /// Switches logging to the configured target, starts listening, and
    /// then runs until interrupted or the listener fails.
    pub fn run(self) -> Result<(), ExitError> {
        Logger::switch_logging(&self.config)?;
        let server = Arc::new(Server::from_config(&self.config)?);
        let runtime = Runtime::new().map_err(|err| {
            error!("Failed to create runtime: {}", err);
            Failed
        })?;
        let res: Result<(), Failed> = runtime.block_on(async move {
            let (listening, http) = self.bind(server).await?;
            println!("Server started {}", listening.url());
            info!(
                "Serving {} on {} ({}).",
                self.config.root.display(), listening.socket_addr(),
                listening.family
            );
            let mut http = tokio::spawn(http);
            let mut signal = SignalListener::new()?;
            loop {
                tokio::select! {
                    sig = signal.next() => match sig {
                        UserSignal::RotateLog => Logger::rotate_log()?,
                        UserSignal::Terminate => {
                            info!("Shutting down.");
                            break Ok(())
                        }
                    },
                    _ = &mut http => break Err(Failed),
                }
            }
        });
        res.map_err(Into::into)
    }

    /// Binds the listener.
    ///
    /// If no port was configured explicitly and the default port can’t be
    /// used, falls back to a port picked by the system.
    async fn bind(
        &self, server: Arc<Server>,
    ) -> Result<(Listening, impl Future<Output = ()> + Send), Failed> {
        let options: ListenOptions = self.config.listen_options();
        let host = self.config.host.as_str();
        if let Some(port) = self.config.port {
            return listen(server, port, host, &options).await
        }
        match listen(server.clone(), DEFAULT_PORT, host, &options).await {
            Ok(res) => Ok(res),
            Err(_) => {
                warn!(
                    "Cannot use default port {}, using any free port.",
                    DEFAULT_PORT
                );
                listen(server, 0, host, &options).await
            }
        }
    }
}


//------------ SignalListener ------------------------------------------------

#[allow(dead_code)]
enum UserSignal {
    RotateLog,
    Terminate,
}

/// Waits for a user telling us to quit or rotate the log.
#[cfg(unix)]
struct SignalListener {
    usr2: Signal,
}

#[cfg(unix)]
impl SignalListener {
    pub fn new() -> Result<Self, Failed> {
        Ok(SignalListener {
            usr2: match signal(SignalKind::user_defined2()) {
                Ok(usr2) => usr2,
                Err(err) => {
                    error!("Attaching to signal USR2 failed: {err}");
                    return Err(Failed)
                }
            },
        })
    }

    /// Waits for the next thing to do.
    pub async fn next(&mut self) -> UserSignal {
        tokio::select! {
            _ = self.usr2.recv() => UserSignal::RotateLog,
            _ = tokio::signal::ctrl_c() => UserSignal::Terminate,
        }
    }
}

#[cfg(not(unix))]
struct SignalListener;

#[cfg(not(unix))]
impl SignalListener {
    pub fn new() -> Result<Self, Failed> {
        Ok(SignalListener)
    }

    /// Waits for the next thing to do.
    pub async fn next(&mut self) -> UserSignal {
        let _ = tokio::signal::ctrl_c().await;
        UserSignal::Terminate
    }
}
