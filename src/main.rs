use std::process;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use flowdeploy::cli::{
    format_deploy_result, format_flow_list, format_instance_list, format_service_list,
    format_status, format_stop_result, format_test_result, format_topology,
    format_validation_result, validate_catalog, ApiClient, Cli, Commands, GetResource, ServeArgs,
    TopologyArgs,
};
use flowdeploy::config::{load_catalog, load_settings_or_default};
use flowdeploy::flow::{ControlPlane, DryRunControlPlane, RyuRestClient};
use flowdeploy::lifecycle::{ControllerConfig, ServiceController};
use flowdeploy::runtime::{ContainerRuntime, ProcessRuntime, SimulatedRuntime};
use flowdeploy::server::{create_router, AppState};
use flowdeploy::topology::{build_topology, TopologySpec, TopologyView};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    let result = match cli.command {
        Commands::Serve(args) => serve(args).await,
        Commands::Validate(args) => {
            let result = validate_catalog(&args.file);
            print!(
                "{}",
                format_validation_result(&result, &args.file.display().to_string())
            );
            if !result.valid {
                process::exit(1);
            }
            Ok(())
        }
        Commands::Topology(args) => show_topology(args),
        command => run_client(&cli.server, command).await,
    };

    if let Err(e) = result {
        error!("{:#}", e);
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

async fn serve(args: ServeArgs) -> anyhow::Result<()> {
    // Load .env file if specified
    if let Some(ref env_file) = args.env_file {
        dotenvy::from_path(env_file)
            .with_context(|| format!("Failed to load env file {}", env_file.display()))?;
    }

    let mut settings = load_settings_or_default(args.config.as_deref())
        .context("Failed to load settings")?;
    if let Some(kind) = args.topology {
        settings.topology.kind = kind;
        settings.topology.file = None;
    }
    if let Some(bind_addr) = args.bind_addr {
        settings.server.bind_addr = bind_addr;
    }
    if let Some(port) = args.port {
        settings.server.port = port;
    }

    let catalog = load_catalog(&settings).context("Failed to load service catalog")?;
    let spec = settings
        .topology
        .load()
        .context("Failed to load topology")?;
    let topology = Arc::new(TopologyView::from_spec(&spec).context("Invalid topology")?);

    let (runtime, control_plane): (Arc<dyn ContainerRuntime>, Arc<dyn ControlPlane>) =
        if args.dry_run {
            warn!("Dry run: processes and flow pushes are simulated");
            (
                Arc::new(SimulatedRuntime::new()),
                Arc::new(DryRunControlPlane::new()),
            )
        } else {
            (
                Arc::new(ProcessRuntime::new(
                    settings.runtime.host_exec.clone(),
                    settings.runtime.work_dir.clone(),
                    settings.runtime.startup_check(),
                )),
                Arc::new(RyuRestClient::new(
                    settings.control_plane.url.clone(),
                    settings.control_plane.timeout(),
                )?),
            )
        };

    let mut config = ControllerConfig::from_settings(&settings);
    config.seed = args.seed;

    let mut controller = ServiceController::new(
        config,
        catalog,
        topology.clone(),
        runtime,
        control_plane,
    );

    let started = controller.bootstrap().await;
    info!(
        "Bootstrapped {} filler instances on {} hosts",
        started.len(),
        topology.hosts().len()
    );

    let state = AppState::from_controller(controller).with_dry_run(args.dry_run);
    let shared = state.controller.clone();
    let app = create_router(state);

    let addr = format!("{}:{}", settings.server.bind_addr, settings.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("Server listening on {}", addr);
    info!("Endpoints:");
    info!("  GET    /health                  - Health check");
    info!("  GET    /v1/status               - Capacity per host");
    info!("  GET    /v1/services             - Service catalog");
    info!("  GET    /v1/instances            - Running components");
    info!("  POST   /v1/instances            - Deploy a service");
    info!("  DELETE /v1/instances/{{key}}      - Stop an instance");
    info!("  GET    /v1/instances/{{key}}/test - Reporter output");
    info!("  GET    /v1/flows                - Installed rules");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
            }
        })
        .await
        .context("Server error")?;

    info!("Shutting down, stopping every instance");
    shared.lock().await.shutdown().await;
    Ok(())
}

fn show_topology(args: TopologyArgs) -> anyhow::Result<()> {
    let spec = match args.file {
        Some(ref path) => TopologySpec::load(path)?,
        None => build_topology(args.kind),
    };
    let view = TopologyView::from_spec(&spec)?;
    print!("{}", format_topology(&view));
    Ok(())
}

async fn run_client(server: &str, command: Commands) -> anyhow::Result<()> {
    let client = ApiClient::new(server);

    match command {
        Commands::Deploy { service } => {
            let result = client.deploy(&service).await?;
            print!("{}", format_deploy_result(&service, &result));
            if !result.success {
                process::exit(1);
            }
        }
        Commands::Stop { key } => {
            let result = client.stop(&key).await?;
            print!("{}", format_stop_result(&key, &result));
            if !result.success {
                process::exit(1);
            }
        }
        Commands::Test { key } => {
            let result = client.test(&key).await?;
            print!("{}", format_test_result(&key, &result));
            if !result.success {
                process::exit(1);
            }
        }
        Commands::Get(args) => match args.resource {
            GetResource::Instances => {
                print!("{}", format_instance_list(&client.list_instances().await?))
            }
            GetResource::Flows => print!("{}", format_flow_list(&client.list_flows().await?)),
            GetResource::Status => print!("{}", format_status(&client.status().await?)),
            GetResource::Services => {
                print!("{}", format_service_list(&client.list_services().await?))
            }
        },
        Commands::Serve(_) | Commands::Validate(_) | Commands::Topology(_) => {
            unreachable!("handled locally")
        }
    }

    Ok(())
}
