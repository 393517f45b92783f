use onager::App;

#[test]
fn builder_chain() {
    let app = App::new("backend")
        .context("services/backend")
        .env("ENV_MODE", "production")
        .env("WORKERS", "4")
        .env_file("services/backend/.env")
        .volume("uploads", "/app/uploads")
        .port(8000)
        .healthcheck("curl -f http://localhost:8000/api/health")
        .depends_on("db");

    assert_eq!(app.context, "services/backend");
    assert_eq!(app.env.len(), 2);
    assert_eq!(app.env[1], ("WORKERS".to_string(), "4".to_string()));
    assert_eq!(app.env_file.as_deref(), Some("services/backend/.env"));
    assert_eq!(app.volumes, vec![("uploads".to_string(), "/app/uploads".to_string())]);
    assert_eq!(app.port, Some(8000));
    assert_eq!(app.depends_on, vec!["db"]);
}

#[test]
fn context_defaults_to_name() {
    assert_eq!(App::new("frontend").context, "frontend");
}

#[test]
fn clone_is_independent() {
    let base = App::new("api").port(8000);
    let changed = base.clone().port(9000);

    assert_eq!(base.port, Some(8000));
    assert_eq!(changed.port, Some(9000));
}
