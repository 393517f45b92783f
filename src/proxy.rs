/// Default directory Nginx serves HTTP challenge tokens from.
pub const ACME_WEBROOT: &str = "/var/www/certbot";

/// One `location` proxied to a port on the loopback interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub path: String,
    pub port: u16,
    /// Forward `Upgrade`/`Connection` and disable response
    /// buffering.
    pub websocket: bool,
}

/// Configuration for the Nginx reverse proxy in front of the
/// application containers.
///
/// # Example
///
/// ```
/// use onager::Proxy;
///
/// let proxy = Proxy::new()
///     .route("/api/", 8000)
///     .websocket("/api/ws", 8000)
///     .route("/", 3000)
///     .security_headers();
///
/// assert_eq!(proxy.routes.len(), 3);
/// assert!(proxy.security_headers);
/// ```
#[derive(Debug, Clone)]
pub struct Proxy {
    pub routes: Vec<Route>,
    pub security_headers: bool,
    pub client_max_body_size: Option<String>,
    pub acme_webroot: String,
}

impl Default for Proxy {
    fn default() -> Self {
        Self {
            routes: Vec::new(),
            security_headers: false,
            client_max_body_size: None,
            acme_webroot: ACME_WEBROOT.to_string(),
        }
    }
}

impl Proxy {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn route(mut self, path: &str, port: u16) -> Self {
        self.routes.push(Route {
            path: path.to_string(),
            port,
            websocket: false,
        });
        self
    }

    #[must_use]
    pub fn websocket(mut self, path: &str, port: u16) -> Self {
        self.routes.push(Route {
            path: path.to_string(),
            port,
            websocket: true,
        });
        self
    }

    #[must_use]
    pub const fn security_headers(mut self) -> Self {
        self.security_headers = true;
        self
    }

    #[must_use]
    pub fn client_max_body_size(mut self, size: &str) -> Self {
        self.client_max_body_size = Some(size.to_string());
        self
    }

    #[must_use]
    pub fn acme_webroot(mut self, dir: &str) -> Self {
        self.acme_webroot = dir.to_string();
        self
    }
}
