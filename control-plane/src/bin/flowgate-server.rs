use clap::Parser;
use flowgate_control_plane::config::Config;
use flowgate_control_plane::control_plane::ControlPlane;
use flowgate_control_plane::event::{pub_sub, ControlPlaneEvent};
use flowgate_control_plane::transport;
use std::path::PathBuf;
use std::process::exit;
use std::time::Duration;
use tracing::{debug, error, info};

/// How often the idle-session sweep runs, independent of the configured
/// idle timeout itself — frequent enough that a session rarely outlives its
/// timeout by more than this much.
const IDLE_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "flowgate-server", about = "FlowGate OpAMP control plane")]
struct Cli {
    #[arg(long, default_value = "flowgate.yaml")]
    config: PathBuf,
}

fn main() {
    let cli = Cli::parse();

    let config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(err) => {
            println!("failed to load configuration from {:?}: {err}", cli.config);
            exit(1);
        }
    };

    if let Err(err) = config.logging.try_init() {
        println!("failed to initialize logging: {err}");
        exit(1);
    }

    if let Err(err) = run(config) {
        error!(error = %err, "flowgate-server exited with an error");
        exit(1);
    }
}

fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let control_plane = ControlPlane::build(&config)?;

    let (shutdown_publisher, shutdown_consumer) = pub_sub::<ControlPlaneEvent>();
    ctrlc::set_handler(move || {
        info!("received shutdown signal");
        let _ = shutdown_publisher.publish(ControlPlaneEvent::Shutdown);
    })?;

    runtime.block_on(async move {
        let state = control_plane.transport_state.clone();
        let sessions = control_plane.sessions.clone();

        let idle_sweep_sessions = sessions.clone();
        let idle_timeout = config.transport.session_idle_timeout;
        let idle_sweep = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(IDLE_SWEEP_INTERVAL);
            loop {
                ticker.tick().await;
                let closed = idle_sweep_sessions
                    .close_idle_sessions(std::time::SystemTime::now(), idle_timeout);
                if closed > 0 {
                    debug!(closed, "closed idle sessions");
                }
            }
        });

        let server = actix_web::HttpServer::new(move || {
            actix_web::App::new()
                .app_data(actix_web::web::Data::new(state.clone()))
                .configure(transport::configure::<flowgate_control_plane::control_plane::Store>)
        })
        .bind(config.transport.stream_listen_addr)?
        .bind(config.transport.poll_listen_addr)?
        .run();

        let handle = server.handle();
        let shutdown_task = tokio::task::spawn_blocking(move || shutdown_consumer.recv());

        tokio::select! {
            result = server => {
                result?;
            }
            _ = shutdown_task => {
                info!("stopping http server");
                handle.stop(true).await;
                sessions.close_all(flowgate_control_plane::session::CloseReason::ServerShuttingDown);
            }
        }
        idle_sweep.abort();

        info!("exiting gracefully");
        Ok::<(), std::io::Error>(())
    })?;

    Ok(())
}
