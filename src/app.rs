//! # Composition Root
//!
//! [`App::build`] turns a [`ServerConfig`] and a loaded [`Contract`] into the
//! independent parts of the server (router, dispatcher, content pipeline,
//! upload store, event hub) and [`App::start`] wires them to live sockets.
//!
//! ```rust,ignore
//! let contract = load_contract(&config.contract_path, &PackageInfo::current())?;
//! let mut app = App::build(config, contract)?;
//! unsafe {
//!     app.dispatcher_mut().register_handler("upload_video", |req| { /* ... */ });
//! }
//! app.add_collaborator(Box::new(encoder));
//! let running = app.start()?;
//! running.join();
//! ```

use crate::config::ServerConfig;
use crate::dispatcher::Dispatcher;
use crate::events::sse::{SseHandle, SseTransport};
use crate::events::{EncodeCompletion, EventHub, EventPublisher};
use crate::middleware::BasicAuthGate;
use crate::pipeline::{ContentPipeline, Limits};
use crate::router::Router;
use crate::server::{AppService, HttpServer, ServerHandle};
use crate::spec::Contract;
use crate::static_files::StaticFiles;
use crate::upload::UploadStore;
use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// A server that is built but not yet listening.
pub struct App {
    config: ServerConfig,
    contract: Arc<Contract>,
    router: Arc<Router>,
    dispatcher: Dispatcher,
    pipeline: Arc<ContentPipeline>,
    statics: Arc<StaticFiles>,
    hub: Arc<EventHub>,
    collaborators: Vec<Box<dyn EncodeCompletion>>,
}

impl App {
    /// Build every component from `config` and `contract`.
    ///
    /// # Errors
    ///
    /// Fails when the ports are unusable, the upload directory cannot be
    /// created or the contract's routes are ambiguous.
    pub fn build(config: ServerConfig, contract: Contract) -> anyhow::Result<Self> {
        config.check_ports()?;
        let uploads = UploadStore::open(&config.upload_temp_dir).with_context(|| {
            format!(
                "failed to prepare upload directory {}",
                config.upload_temp_dir.display()
            )
        })?;
        if let Some(secs) = config.stale_upload_secs {
            match uploads.sweep_stale(Duration::from_secs(secs)) {
                Ok(0) => {}
                Ok(removed) => info!(removed = removed, "Removed stale uploads"),
                Err(e) => warn!(error = %e, "Stale upload sweep failed"),
            }
        }

        let router = Router::new(contract.routes.clone()).context("failed to build routing table")?;
        let limits = Limits {
            json: config.json_limit_bytes,
            text: config.text_limit_bytes,
            field: config.field_limit_bytes,
        };
        let dispatcher = Dispatcher::new();

        Ok(Self {
            statics: Arc::new(StaticFiles::from_roots(&config.static_roots)),
            hub: Arc::new(EventHub::new(config.subscriber_queue)),
            pipeline: Arc::new(ContentPipeline::new(uploads, limits)),
            router: Arc::new(router),
            contract: Arc::new(contract),
            dispatcher,
            collaborators: Vec::new(),
            config,
        })
    }

    /// Bind handlers here before [`start`](Self::start).
    pub fn dispatcher_mut(&mut self) -> &mut Dispatcher {
        &mut self.dispatcher
    }

    #[must_use]
    pub fn router(&self) -> &Router {
        &self.router
    }

    #[must_use]
    pub fn hub(&self) -> Arc<EventHub> {
        Arc::clone(&self.hub)
    }

    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Register a collaborator that is handed a publisher once live.
    pub fn add_collaborator(&mut self, collaborator: Box<dyn EncodeCompletion>) {
        self.collaborators.push(collaborator);
    }

    /// Declared operations without a bound handler, as `METHOD /path (name)`.
    #[must_use]
    pub fn unbound_operations(&self) -> Vec<String> {
        let mut unbound: Vec<String> = self
            .router
            .routes()
            .filter(|r| !self.dispatcher.has_handler(&r.handler_name))
            .map(|r| format!("{} {} ({})", r.method, r.full_path(), r.handler_name))
            .collect();
        unbound.sort();
        unbound
    }

    /// The request handler as it will be served.
    #[must_use]
    pub fn service(&self) -> AppService {
        AppService::new(
            Arc::clone(&self.router),
            Arc::new(self.dispatcher.clone()),
            Arc::clone(&self.pipeline),
            Arc::clone(&self.statics),
            Arc::clone(&self.contract),
            self.config.basic_auth.as_ref().map(BasicAuthGate::new),
        )
    }

    /// Listen on the configured ports, attach the event hub and hand the
    /// collaborators their publisher.
    ///
    /// # Errors
    ///
    /// Fails when either socket cannot be bound.
    pub fn start(self) -> anyhow::Result<Running> {
        for op in self.unbound_operations() {
            warn!(operation = %op, "Operation has no handler and will answer 501");
        }

        let service = self.service();
        let listen = self.config.listen_addr();
        let server = HttpServer(service)
            .start(listen.as_str())
            .with_context(|| format!("failed to bind {listen}"))?;
        server
            .wait_ready()
            .with_context(|| format!("server on {listen} did not come up"))?;

        let event_addr = self.config.event_addr();
        let transport = SseTransport::new(
            event_addr.as_str(),
            Duration::from_secs(self.config.heartbeat_secs),
        )
        .with_gate(self.config.basic_auth.as_ref().map(BasicAuthGate::new));
        let events = match self.hub.initialize(transport) {
            Ok(h) => h,
            Err(e) => {
                server.stop();
                return Err(anyhow::Error::new(e).context(format!("failed to bind {event_addr}")));
            }
        };

        let publisher: Arc<dyn EventPublisher> = Arc::clone(&self.hub) as Arc<dyn EventPublisher>;
        for mut collaborator in self.collaborators {
            collaborator.ready(Arc::clone(&publisher));
        }

        info!(
            addr = %server.addr(),
            event_addr = %events.addr(),
            routes = self.router.len(),
            handlers = self.dispatcher.handlers.len(),
            "mediagate ready"
        );
        Ok(Running {
            server,
            events,
            hub: self.hub,
        })
    }
}

/// A listening server.
pub struct Running {
    server: ServerHandle,
    events: SseHandle,
    hub: Arc<EventHub>,
}

impl Running {
    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        self.server.addr()
    }

    #[must_use]
    pub fn event_addr(&self) -> SocketAddr {
        self.events.addr()
    }

    #[must_use]
    pub fn hub(&self) -> Arc<EventHub> {
        Arc::clone(&self.hub)
    }

    /// Stop both listeners and drop every live connection.
    pub fn stop(self) {
        self.events.stop();
        self.server.stop();
    }

    /// Block until the HTTP server exits.
    pub fn join(self) -> std::thread::Result<()> {
        self.server.join()
    }
}
