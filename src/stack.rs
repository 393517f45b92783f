use crate::app::App;
use crate::artifact::ExcludeSet;
use crate::proxy::Proxy;

/// What gets deployed: containers, proxy routes, the source tree
/// and the secret files that travel beside it.
///
/// # Example
///
/// ```
/// use onager::{App, Proxy, Stack};
///
/// let stack = Stack::new()
///     .app(App::new("api").port(8000).env_file("api/.env"))
///     .proxy(Proxy::new().route("/", 8000))
///     .source("api")
///     .secret("api/.env");
///
/// assert_eq!(stack.sources, vec!["api"]);
/// assert_eq!(stack.secrets, vec!["api/.env"]);
/// ```
#[derive(Debug, Clone)]
pub struct Stack {
    pub apps: Vec<App>,
    pub proxy: Proxy,
    /// Directories or files, relative to the project root.
    pub sources: Vec<String>,
    pub excludes: ExcludeSet,
    /// Files uploaded out-of-band, relative to the project root.
    pub secrets: Vec<String>,
    /// Local tools checked before anything is mutated.
    pub required_tools: Vec<String>,
}

impl Default for Stack {
    fn default() -> Self {
        Self {
            apps: Vec::new(),
            proxy: Proxy::new(),
            sources: Vec::new(),
            excludes: ExcludeSet::default(),
            secrets: Vec::new(),
            required_tools: vec!["gcloud".to_string()],
        }
    }
}

impl Stack {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend on 8000 and frontend on 3000 behind one domain,
    /// each with its own env file.
    #[must_use]
    pub fn web() -> Self {
        Self::new()
            .app(
                App::new("backend")
                    .env_file("backend/.env")
                    .env("ENV_MODE", "production")
                    .port(8000)
                    .healthcheck("curl -f http://localhost:8000/api/health || exit 1"),
            )
            .app(
                App::new("frontend")
                    .env_file("frontend/.env.local")
                    .env("NODE_ENV", "production")
                    .port(3000)
                    .depends_on("backend"),
            )
            .proxy(
                Proxy::new()
                    .websocket("/api/ws", 8000)
                    .route("/api/", 8000)
                    .route("/", 3000)
                    .security_headers()
                    .client_max_body_size("50M"),
            )
            .source("backend")
            .source("frontend")
            .secret("backend/.env")
            .secret("frontend/.env.local")
    }

    #[must_use]
    pub fn app(mut self, app: App) -> Self {
        self.apps.push(app);
        self
    }

    #[must_use]
    pub fn proxy(mut self, proxy: Proxy) -> Self {
        self.proxy = proxy;
        self
    }

    #[must_use]
    pub fn source(mut self, path: &str) -> Self {
        self.sources.push(path.to_string());
        self
    }

    #[must_use]
    pub fn exclude(mut self, pattern: &str) -> Self {
        self.excludes = self.excludes.with(pattern);
        self
    }

    #[must_use]
    pub fn excludes(mut self, excludes: ExcludeSet) -> Self {
        self.excludes = excludes;
        self
    }

    #[must_use]
    pub fn secret(mut self, path: &str) -> Self {
        self.secrets.push(path.to_string());
        self
    }

    #[must_use]
    pub fn require_tool(mut self, tool: &str) -> Self {
        self.required_tools.push(tool.to_string());
        self
    }
}
