use docker_compose_types::{
    BuildStep, Compose, ComposeNetworks, ComposeVolume, DependsOnOptions, Environment,
    Healthcheck, HealthcheckTest, Labels, MapOrEmpty, NetworkSettings, Networks, Ports, Service,
    Services, StringOrList, TopLevelVolumes, Volumes,
};
use indexmap::IndexMap;

use crate::app::App;
use crate::error::DeployResult;

/// Render the `docker-compose.yml` written into the install
/// directory on the instance.
pub fn render(apps: &[App], network_name: &str) -> DeployResult<String> {
    let mut services = IndexMap::new();

    for app in apps {
        services.insert(app.name.clone(), Some(app_service(app, network_name)));
    }

    let compose = Compose {
        services: Services(services),
        volumes: top_level_volumes(apps),
        networks: network(network_name),
        ..Default::default()
    };

    Ok(serde_yaml::to_string(&compose)?)
}

fn app_service(app: &App, network_name: &str) -> Service {
    let ports = app
        .port
        .map(|p| vec![format!("127.0.0.1:{p}:{p}")])
        .unwrap_or_default();

    let environment = if app.env.is_empty() {
        Environment::default()
    } else {
        Environment::List(app.env.iter().map(|(k, v)| format!("{k}={v}")).collect())
    };

    let volumes: Vec<Volumes> = app
        .volumes
        .iter()
        .map(|(name, mount)| Volumes::Simple(format!("{name}:{mount}")))
        .collect();

    let healthcheck = app.healthcheck.as_ref().map(|cmd| Healthcheck {
        test: Some(HealthcheckTest::Multiple(vec![
            "CMD".to_string(),
            "sh".to_string(),
            "-c".to_string(),
            cmd.clone(),
        ])),
        interval: Some("30s".to_string()),
        timeout: Some("10s".to_string()),
        retries: 3,
        start_period: Some("20s".to_string()),
        ..Default::default()
    });

    let depends_on = if app.depends_on.is_empty() {
        DependsOnOptions::default()
    } else {
        DependsOnOptions::Simple(app.depends_on.clone())
    };

    Service {
        build_: Some(BuildStep::Simple(format!("./{}", app.context))),
        image: Some(format!("{}:latest", app.name)),
        container_name: Some(app.name.clone()),
        restart: Some("unless-stopped".to_string()),
        ports: Ports::Short(ports),
        env_file: app
            .env_file
            .as_ref()
            .map(|path| StringOrList::Simple(path.clone())),
        environment,
        volumes,
        healthcheck,
        depends_on,
        networks: Networks::Simple(vec![network_name.to_string()]),
        ..Default::default()
    }
}

fn local_volume() -> ComposeVolume {
    ComposeVolume {
        driver: Some("local".to_string()),
        driver_opts: IndexMap::new(),
        external: None,
        labels: Labels::default(),
        name: None,
    }
}

fn top_level_volumes(apps: &[App]) -> TopLevelVolumes {
    let mut vols = IndexMap::new();

    for app in apps {
        for (name, _) in &app.volumes {
            // Bind mounts are paths, not named volumes.
            if !name.starts_with('.') && !name.starts_with('/') {
                vols.insert(name.clone(), MapOrEmpty::Map(local_volume()));
            }
        }
    }

    TopLevelVolumes(vols)
}

fn network(name: &str) -> ComposeNetworks {
    let mut nets = IndexMap::new();
    nets.insert(
        name.to_string(),
        MapOrEmpty::Map(NetworkSettings {
            driver: Some("bridge".to_string()),
            ..Default::default()
        }),
    );
    ComposeNetworks(nets)
}
