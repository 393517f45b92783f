#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use std::rc::Rc;

use onager::cmd::CommandRunner;
use onager::error::{DeployError, DeployResult};

/// In-memory stand-in for the `gcloud` CLI. Clones share state, so
/// a test keeps one handle while the pipeline owns another.
#[derive(Clone, Default)]
pub struct FakeCloud {
    state: Rc<RefCell<CloudState>>,
}

#[derive(Default)]
pub struct CloudState {
    pub firewalls: BTreeSet<String>,
    pub buckets: BTreeSet<String>,
    /// Instance name to the startup script it was created with.
    pub instances: BTreeMap<String, String>,
    pub objects: BTreeMap<String, Vec<u8>>,
    pub calls: Vec<String>,
    pub interactive: Vec<String>,
    /// Remote `/var/lib/onager/status` contents.
    pub status_file: String,
    /// Remote `/var/lib/onager/certificate-status` contents.
    pub certificate_status: String,
    pub certbot_output: String,
    pub missing_tools: BTreeSet<String>,
    pub authenticated: bool,
    pub fail_uploads: bool,
    pub fail_interactive: bool,
    /// Upload attempts, with whether the local file existed.
    pub uploads: Vec<(String, bool)>,
}

impl FakeCloud {
    pub fn new() -> Self {
        let cloud = Self::default();
        cloud.state.borrow_mut().authenticated = true;
        cloud
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut CloudState) -> R) -> R {
        f(&mut self.state.borrow_mut())
    }

    pub fn count_calls(&self, prefix: &str) -> usize {
        self.with(|s| s.calls.iter().filter(|c| c.starts_with(prefix)).count())
    }

    pub fn startup_script(&self, instance: &str) -> Option<String> {
        self.with(|s| s.instances.get(instance).cloned())
    }

    fn handle(&self, args: &[&str]) -> DeployResult<String> {
        let mut s = self.state.borrow_mut();
        let line = args.join(" ");
        s.calls.push(line.clone());

        match args {
            ["auth", "list", ..] => Ok(if s.authenticated {
                "ops@example.com".to_string()
            } else {
                String::new()
            }),

            ["compute", "firewall-rules", "create", name, ..] => {
                if s.firewalls.insert((*name).to_string()) {
                    Ok(String::new())
                } else {
                    Err(failed(
                        &line,
                        &format!(
                            "ERROR: The resource 'projects/p/global/firewalls/{name}' already exists"
                        ),
                    ))
                }
            }
            ["compute", "firewall-rules", "describe", name, ..] => {
                if s.firewalls.contains(*name) {
                    Ok((*name).to_string())
                } else {
                    Err(failed(&line, &format!("ERROR: The resource '{name}' was not found")))
                }
            }

            ["storage", "buckets", "create", uri, ..] => {
                if s.buckets.insert((*uri).to_string()) {
                    Ok(String::new())
                } else {
                    Err(failed(
                        &line,
                        "ERROR: HTTPError 409: Your previous request to create the named bucket succeeded and you already own it.",
                    ))
                }
            }
            ["storage", "buckets", "describe", uri, ..] => {
                if s.buckets.contains(*uri) {
                    Ok(uri.trim_start_matches("gs://").to_string())
                } else {
                    Err(failed(&line, "ERROR: HTTPError 404: The specified bucket does not exist."))
                }
            }

            ["storage", "cp", "--quiet", local, uri, ..] => {
                let present = Path::new(local).is_file();
                s.uploads.push(((*uri).to_string(), present));
                if s.fail_uploads {
                    return Err(failed(&line, "ERROR: network unreachable"));
                }
                let bytes = fs::read(local).map_err(DeployError::Io)?;
                s.objects.insert((*uri).to_string(), bytes);
                Ok(String::new())
            }
            ["storage", "ls", uri, ..] => {
                let found: Vec<String> = s
                    .objects
                    .keys()
                    .filter(|k| k.starts_with(*uri))
                    .cloned()
                    .collect();
                if found.is_empty() {
                    Err(failed(&line, "ERROR: One or more URLs matched no objects."))
                } else {
                    Ok(found.join("\n"))
                }
            }
            ["storage", "rm", "--recursive", uri, ..] => {
                let before = s.objects.len();
                s.objects.retain(|k, _| !k.starts_with(*uri));
                if s.objects.len() == before {
                    Err(failed(&line, "ERROR: One or more URLs matched no objects."))
                } else {
                    Ok(String::new())
                }
            }

            ["compute", "instances", "create", name, rest @ ..] => {
                if s.instances.contains_key(*name) {
                    return Err(failed(
                        &line,
                        &format!(
                            "ERROR: The resource 'projects/p/zones/z/instances/{name}' already exists"
                        ),
                    ));
                }
                let script = rest
                    .iter()
                    .find_map(|a| a.strip_prefix("--metadata-from-file=startup-script="))
                    .map(|path| fs::read_to_string(path).unwrap_or_default())
                    .unwrap_or_default();
                s.instances.insert((*name).to_string(), script);
                Ok(String::new())
            }
            ["compute", "instances", "describe", name, ..] => {
                if s.instances.contains_key(*name) {
                    Ok("RUNNING\t34.120.0.10".to_string())
                } else {
                    Err(failed(
                        &line,
                        &format!(
                            "ERROR: The resource 'projects/p/zones/z/instances/{name}' was not found"
                        ),
                    ))
                }
            }
            ["compute", "instances", "delete", name, ..] => {
                s.instances.remove(*name);
                Ok(String::new())
            }

            ["compute", "ssh", name, rest @ ..] => {
                if !s.instances.contains_key(*name) {
                    return Err(failed(&line, "ERROR: ssh: connect to host refused"));
                }
                let command = rest
                    .iter()
                    .find_map(|a| a.strip_prefix("--command="))
                    .unwrap_or_default();
                if command.contains("/var/lib/onager/certificate-status") {
                    Ok(s.certificate_status.clone())
                } else if command.contains("/var/lib/onager/status") {
                    Ok(s.status_file.clone())
                } else if command.contains("certbot certificates") {
                    Ok(s.certbot_output.clone())
                } else {
                    Ok(String::new())
                }
            }

            _ => Err(failed(&line, "ERROR: unexpected command")),
        }
    }
}

impl CommandRunner for FakeCloud {
    fn run(&self, program: &str, args: &[&str]) -> DeployResult<String> {
        assert_eq!(program, "gcloud", "only gcloud is faked");
        self.handle(args)
    }

    fn run_interactive(&self, program: &str, args: &[&str]) -> DeployResult<()> {
        let mut s = self.state.borrow_mut();
        s.interactive.push(format!("{program} {}", args.join(" ")));
        if s.fail_interactive {
            Err(failed(program, "remote command exited with 1"))
        } else {
            Ok(())
        }
    }

    fn command_exists(&self, program: &str) -> bool {
        !self.with(|s| s.missing_tools.contains(program))
    }
}

fn failed(command: &str, stderr: &str) -> DeployError {
    DeployError::CommandFailed {
        command: command.to_string(),
        code: Some(1),
        stderr: stderr.to_string(),
    }
}

/// A project tree with a backend, a frontend and their env files.
pub fn project_tree(root: &Path) {
    let files = [
        ("backend/app.py", "print('hi')\n"),
        ("backend/requirements.txt", "fastapi\n"),
        ("backend/.env", "SECRET_KEY=s3cr3t\n"),
        ("backend/__pycache__/app.cpython-311.pyc", "bytecode"),
        ("frontend/package.json", "{}\n"),
        ("frontend/src/page.tsx", "export default 1;\n"),
        ("frontend/.env.local", "NEXT_PUBLIC_API=/api\n"),
        ("frontend/node_modules/react/index.js", "module.exports = {};\n"),
    ];
    for (path, content) in files {
        let full = root.join(path);
        fs::create_dir_all(full.parent().expect("parent")).expect("mkdir");
        fs::write(full, content).expect("write");
    }
}
