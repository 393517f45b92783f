//! Nginx site configuration built from typed directives.
//!
//! Sites are assembled as a small tree of [`Node`]s and formatted
//! in one place, so domains, header values and paths never pass
//! through string templates. Arguments that need it are quoted by
//! the formatter.

use std::fmt::Write as _;

use crate::proxy::{Proxy, Route};

/// A directive or block in an Nginx configuration file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Directive { name: String, args: Vec<String> },
    Block { name: String, args: Vec<String>, children: Vec<Node> },
}

impl Node {
    #[must_use]
    pub fn directive(name: &str, args: &[&str]) -> Self {
        Self::Directive {
            name: name.to_string(),
            args: args.iter().map(|a| (*a).to_string()).collect(),
        }
    }

    #[must_use]
    pub fn block(name: &str, args: &[&str]) -> Self {
        Self::Block {
            name: name.to_string(),
            args: args.iter().map(|a| (*a).to_string()).collect(),
            children: Vec::new(),
        }
    }

    /// Append a child. No-op on a plain directive.
    #[must_use]
    pub fn child(mut self, node: Self) -> Self {
        if let Self::Block { children, .. } = &mut self {
            children.push(node);
        }
        self
    }

    #[must_use]
    pub fn children(mut self, nodes: impl IntoIterator<Item = Self>) -> Self {
        if let Self::Block { children, .. } = &mut self {
            children.extend(nodes);
        }
        self
    }
}

/// A complete configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NginxConfig {
    pub nodes: Vec<Node>,
}

impl NginxConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn node(mut self, node: Node) -> Self {
        self.nodes.push(node);
        self
    }
}

/// Format a configuration with four-space indentation.
#[must_use]
pub fn format(config: &NginxConfig) -> String {
    let mut out = String::new();
    for (i, node) in config.nodes.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        write_node(&mut out, node, 0);
    }
    out
}

fn write_node(out: &mut String, node: &Node, depth: usize) {
    let indent = "    ".repeat(depth);
    match node {
        Node::Directive { name, args } => {
            let _ = writeln!(out, "{indent}{}{};", name, join_args(args));
        }
        Node::Block {
            name,
            args,
            children,
        } => {
            let _ = writeln!(out, "{indent}{}{} {{", name, join_args(args));
            for child in children {
                write_node(out, child, depth + 1);
            }
            let _ = writeln!(out, "{indent}}}");
        }
    }
}

fn join_args(args: &[String]) -> String {
    args.iter().fold(String::new(), |mut acc, arg| {
        acc.push(' ');
        acc.push_str(&quote_arg(arg));
        acc
    })
}

/// Quote an argument if Nginx would otherwise split or
/// misinterpret it.
#[must_use]
pub fn quote_arg(arg: &str) -> String {
    let needs_quotes = arg.is_empty()
        || arg
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, ';' | '{' | '}' | '#' | '"' | '\''));
    if needs_quotes {
        format!("\"{}\"", arg.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        arg.to_string()
    }
}

/// Directory certbot writes the live certificate for `domain` to.
#[must_use]
pub fn cert_dir(domain: &str) -> String {
    format!("/etc/letsencrypt/live/{domain}")
}

/// HTTP-only site used before a certificate exists: answers the
/// HTTP challenge and serves the application over plain HTTP.
#[must_use]
pub fn render_http_only(proxy: &Proxy, domain: &str) -> String {
    let server = http_listener(domain)
        .child(acme_location(proxy))
        .children(body_size(proxy))
        .children(proxy.routes.iter().map(route_location));

    format(&NginxConfig::new().node(server))
}

/// Full site once the certificate is installed: HTTP redirects to
/// HTTPS, HTTPS terminates TLS and proxies the routes.
#[must_use]
pub fn render_https(proxy: &Proxy, domain: &str) -> String {
    let redirect = http_listener(domain).child(acme_location(proxy)).child(
        Node::block("location", &["/"])
            .child(Node::directive("return", &["301", "https://$host$request_uri"])),
    );

    let certs = cert_dir(domain);
    let fullchain = format!("{certs}/fullchain.pem");
    let privkey = format!("{certs}/privkey.pem");

    let mut tls = Node::block("server", &[])
        .child(Node::directive("listen", &["443", "ssl", "http2"]))
        .child(Node::directive("listen", &["[::]:443", "ssl", "http2"]))
        .child(Node::directive("server_name", &[domain]))
        .child(Node::directive("ssl_certificate", &[&fullchain]))
        .child(Node::directive("ssl_certificate_key", &[&privkey]))
        .child(Node::directive("ssl_protocols", &["TLSv1.2", "TLSv1.3"]))
        .child(Node::directive("ssl_prefer_server_ciphers", &["on"]))
        .child(Node::directive("ssl_session_cache", &["shared:SSL:10m"]))
        .child(Node::directive("ssl_session_timeout", &["10m"]));

    if proxy.security_headers {
        tls = tls.children(security_headers());
    }

    let tls = tls
        .children(body_size(proxy))
        .children(proxy.routes.iter().map(route_location));

    format(&NginxConfig::new().node(redirect).node(tls))
}

fn http_listener(domain: &str) -> Node {
    Node::block("server", &[])
        .child(Node::directive("listen", &["80"]))
        .child(Node::directive("listen", &["[::]:80"]))
        .child(Node::directive("server_name", &[domain]))
}

fn acme_location(proxy: &Proxy) -> Node {
    Node::block("location", &["/.well-known/acme-challenge/"])
        .child(Node::directive("root", &[&proxy.acme_webroot]))
}

fn body_size(proxy: &Proxy) -> Option<Node> {
    proxy
        .client_max_body_size
        .as_deref()
        .map(|size| Node::directive("client_max_body_size", &[size]))
}

fn security_headers() -> Vec<Node> {
    [
        ("Strict-Transport-Security", "max-age=31536000; includeSubDomains"),
        ("X-Frame-Options", "SAMEORIGIN"),
        ("X-Content-Type-Options", "nosniff"),
        ("X-XSS-Protection", "1; mode=block"),
        ("Referrer-Policy", "strict-origin-when-cross-origin"),
    ]
    .into_iter()
    .map(|(name, value)| Node::directive("add_header", &[name, value, "always"]))
    .collect()
}

fn route_location(route: &Route) -> Node {
    let upstream = format!("http://127.0.0.1:{}", route.port);
    let mut location = Node::block("location", &[&route.path])
        .child(Node::directive("proxy_pass", &[&upstream]))
        .child(Node::directive("proxy_http_version", &["1.1"]))
        .child(Node::directive("proxy_set_header", &["Host", "$host"]))
        .child(Node::directive("proxy_set_header", &["X-Real-IP", "$remote_addr"]))
        .child(Node::directive(
            "proxy_set_header",
            &["X-Forwarded-For", "$proxy_add_x_forwarded_for"],
        ))
        .child(Node::directive("proxy_set_header", &["X-Forwarded-Proto", "$scheme"]));

    if route.websocket {
        location = location
            .child(Node::directive("proxy_set_header", &["Upgrade", "$http_upgrade"]))
            .child(Node::directive("proxy_set_header", &["Connection", "upgrade"]))
            .child(Node::directive("proxy_buffering", &["off"]))
            .child(Node::directive("proxy_cache", &["off"]))
            .child(Node::directive("proxy_read_timeout", &["86400s"]));
    } else {
        location = location.child(Node::directive("proxy_read_timeout", &["300s"]));
    }
    location
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_nested_blocks() {
        let config = NginxConfig::new().node(
            Node::block("server", &[])
                .child(Node::directive("listen", &["80"]))
                .child(Node::block("location", &["/"]).child(Node::directive("return", &["204"]))),
        );

        assert_eq!(
            format(&config),
            "server {\n    listen 80;\n    location / {\n        return 204;\n    }\n}\n"
        );
    }

    #[test]
    fn quotes_values_with_separators() {
        assert_eq!(quote_arg("nosniff"), "nosniff");
        assert_eq!(quote_arg("1; mode=block"), "\"1; mode=block\"");
        assert_eq!(quote_arg("a\"b"), "\"a\\\"b\"");
        assert_eq!(quote_arg(""), "\"\"");
        assert_eq!(quote_arg("$host"), "$host");
    }

    #[test]
    fn child_on_directive_is_ignored() {
        let node = Node::directive("listen", &["80"]).child(Node::directive("x", &[]));
        assert_eq!(node, Node::directive("listen", &["80"]));
    }
}
