/// One application container built from a directory of the
/// uploaded artifact.
///
/// # Example
///
/// ```
/// use onager::App;
///
/// let app = App::new("backend")
///     .context("backend")
///     .env("ENV_MODE", "production")
///     .env_file("backend/.env")
///     .port(8000)
///     .healthcheck("curl -f http://localhost:8000/api/health");
///
/// assert_eq!(app.name, "backend");
/// assert_eq!(app.port, Some(8000));
/// ```
#[derive(Debug, Clone)]
pub struct App {
    pub name: String,
    /// Build context relative to the install directory.
    pub context: String,
    pub env: Vec<(String, String)>,
    /// Local secret file, shipped out-of-band and mounted as the
    /// service's env file.
    pub env_file: Option<String>,
    pub volumes: Vec<(String, String)>,
    /// Port published on the loopback interface for Nginx.
    pub port: Option<u16>,
    pub healthcheck: Option<String>,
    pub depends_on: Vec<String>,
}

impl App {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            context: name.to_string(),
            env: Vec::new(),
            env_file: None,
            volumes: Vec::new(),
            port: None,
            healthcheck: None,
            depends_on: Vec::new(),
        }
    }

    #[must_use]
    pub fn context(mut self, dir: &str) -> Self {
        self.context = dir.to_string();
        self
    }

    #[must_use]
    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.env.push((key.to_string(), value.to_string()));
        self
    }

    #[must_use]
    pub fn env_file(mut self, path: &str) -> Self {
        self.env_file = Some(path.to_string());
        self
    }

    #[must_use]
    pub fn volume(mut self, name: &str, mount: &str) -> Self {
        self.volumes.push((name.to_string(), mount.to_string()));
        self
    }

    #[must_use]
    pub const fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    #[must_use]
    pub fn healthcheck(mut self, cmd: &str) -> Self {
        self.healthcheck = Some(cmd.to_string());
        self
    }

    #[must_use]
    pub fn depends_on(mut self, service: &str) -> Self {
        self.depends_on.push(service.to_string());
        self
    }
}
