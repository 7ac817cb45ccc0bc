// Copyright (C) 2023 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

//! Server lifecycle: bind the listening prefixes, run one accept loop per
//! prefix with one task per accepted connection, and drain gracefully on
//! shutdown.

use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use varco_handling::{CorsPolicy, Engine, HostBinding};
use varco_http1::serve_connection;

use crate::prefix::ListeningPrefix;

/// A named group of listening prefixes sharing one CORS policy.
#[derive(Clone, Debug)]
pub struct ListeningHost {
    pub label: String,
    pub prefixes: Vec<ListeningPrefix>,
    pub cors: Option<CorsPolicy>,
}

impl ListeningHost {
    #[must_use]
    pub fn new(label: impl Into<String>, prefixes: Vec<ListeningPrefix>) -> Self {
        Self {
            label: label.into(),
            prefixes,
            cors: None,
        }
    }

    #[must_use]
    pub fn with_cors(mut self, cors: CorsPolicy) -> Self {
        self.cors = Some(cors);
        self
    }

    /// The per-connection binding for one of this host's prefixes.
    #[must_use]
    fn binding_for(&self, prefix: &ListeningPrefix) -> HostBinding {
        let mut binding = HostBinding::new(self.label.clone())
            .with_scheme(prefix.scheme.as_str())
            .with_base_path(prefix.base_path.clone());
        if !prefix.is_wildcard_host() {
            binding = binding.with_hostname(prefix.host.clone());
        }
        if let Some(cors) = &self.cors {
            binding = binding.with_cors(cors.clone());
        }
        binding
    }
}

struct BoundListener {
    listener: TcpListener,
    binding: Arc<HostBinding>,
}

/// The running server: an engine plus its listeners.
pub struct Server {
    engine: Arc<Engine>,
    hosts: Vec<ListeningHost>,
    bound: Vec<BoundListener>,
    local_addrs: Vec<SocketAddr>,
    shutdown: watch::Sender<bool>,
    accept_tasks: Vec<JoinHandle<()>>,
}

impl Server {
    #[must_use]
    pub fn new(engine: Engine) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            engine: Arc::new(engine),
            hosts: Vec::new(),
            bound: Vec::new(),
            local_addrs: Vec::new(),
            shutdown,
            accept_tasks: Vec::new(),
        }
    }

    #[must_use]
    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub fn add_host(&mut self, host: ListeningHost) {
        self.hosts.push(host);
    }

    /// Bind a listener for every prefix of every host. Must precede
    /// [`Server::start`].
    pub async fn bind(&mut self) -> io::Result<()> {
        for host in &self.hosts {
            for prefix in &host.prefixes {
                let listener = TcpListener::bind(prefix.bind_address()).await?;
                self.local_addrs.push(listener.local_addr()?);
                log::info!("listening on {prefix} ({})", host.label);
                self.bound.push(BoundListener {
                    listener,
                    binding: Arc::new(host.binding_for(prefix)),
                });
            }
        }
        Ok(())
    }

    /// The addresses the listeners actually bound, in `bind` order. Useful
    /// with port 0.
    #[must_use]
    pub fn local_addrs(&self) -> &[SocketAddr] {
        &self.local_addrs
    }

    /// Freeze the route table and start accepting connections.
    pub fn start(&mut self) {
        self.engine.router.freeze();
        self.engine.metrics.mark_started();

        for bound in self.bound.drain(..) {
            self.accept_tasks.push(tokio::spawn(accept_loop(
                bound.listener,
                bound.binding,
                Arc::clone(&self.engine),
                self.shutdown.subscribe(),
            )));
        }
    }

    /// Stop accepting, then wait up to the configured grace period for
    /// in-flight exchanges to drain. Handlers that outlive the grace
    /// period keep running on their own tasks, but their connections are
    /// no longer observed.
    pub async fn stop(&mut self) {
        _ = self.shutdown.send(true);

        for task in self.accept_tasks.drain(..) {
            _ = task.await;
        }

        let deadline = Instant::now() + self.engine.settings.grace_period;
        while self.engine.metrics.snapshot().active_connections > 0 && Instant::now() < deadline {
            sleep(Duration::from_millis(10)).await;
        }

        let remaining = self.engine.metrics.snapshot().active_connections;
        if remaining > 0 {
            log::warn!("shutdown grace period elapsed with {remaining} connections still active");
        }
    }
}

#[cfg(unix)]
const ERRNO_EMFILE: i32 = 24;

async fn accept_loop(
    listener: TcpListener,
    binding: Arc<HostBinding>,
    engine: Arc<Engine>,
    shutdown: watch::Receiver<bool>,
) {
    let mut shutdown_signal = shutdown.clone();

    loop {
        tokio::select! {
            changed = shutdown_signal.changed() => {
                if changed.is_err() || *shutdown_signal.borrow() {
                    break;
                }
            }

            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(accepted) => accepted,
                    Err(error) => {
                        // Out of file descriptors: shed load instead of
                        // spinning on the error.
                        #[cfg(unix)]
                        if error.raw_os_error() == Some(ERRNO_EMFILE) {
                            tokio::task::yield_now().await;
                            continue;
                        }

                        log::error!("error accepting connection: {error}");
                        continue;
                    }
                };

                tokio::spawn(serve_connection(
                    stream,
                    peer,
                    Arc::clone(&binding),
                    Arc::clone(&engine),
                    shutdown.clone(),
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bindings_inherit_prefix_scheme_and_base_path() {
        let host = ListeningHost::new(
            "public",
            vec![
                ListeningPrefix::parse("https://api.example:8443/v1/").unwrap(),
                ListeningPrefix::parse("http://+:8080/v1/").unwrap(),
            ],
        )
        .with_cors(CorsPolicy::allow_origin("https://a.example"));

        let strict = host.binding_for(&host.prefixes[0]);
        assert_eq!(strict.scheme, "https");
        assert_eq!(strict.base_path, "/v1/");
        assert_eq!(strict.hostnames, vec!["api.example"]);
        assert!(strict.cors.is_some());

        let open = host.binding_for(&host.prefixes[1]);
        assert!(open.hostnames.is_empty());
    }
}
