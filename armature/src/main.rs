use std::time::{Duration, Instant};

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use armature_core::lifecycle::LifecycleManager;
use armature_core::registry::ServiceRegistry;
use armature_services::CalculatorService;

mod config;
use config::AppConfig;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Path of the config file (TOML or JSON)
    #[clap(short, long, value_parser)]
    config: Option<String>,

    /// Expression to evaluate through the calculator service
    #[clap(short, long, value_parser)]
    eval: Option<String>,

    /// How long to run the update loop when no expression is given, in ms
    #[clap(long, default_value_t = 1000)]
    run_for_ms: u64,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };

    let mut registry = ServiceRegistry::new();
    let background_group = registry.create_service_thread_group_id();
    armature_services::register_demo_services(&mut registry, background_group)?;
    let registrations = registry.extract_registrations();

    let mut manager = LifecycleManager::new(config.lifecycle.clone(), registrations);
    let start = manager.start_services_async();
    manager.run_until(start)?;
    info!("all services started");

    if let Some(expression) = args.eval {
        evaluate(&mut manager, &expression)?;
    } else {
        run_main_loop(
            &mut manager,
            Duration::from_millis(args.run_for_ms),
            config.lifecycle.restricted_sleep_limit(),
        );
    }

    let shutdown = manager.shutdown_services_async();
    let errors = manager.run_until(shutdown);
    for e in &errors {
        error!(error = %e, "shutdown error");
    }
    anyhow::ensure!(
        errors.is_empty(),
        "shutdown completed with {} errors",
        errors.len()
    );
    info!("all services stopped");
    Ok(())
}

fn evaluate(manager: &mut LifecycleManager, expression: &str) -> Result<()> {
    let calculator = manager
        .main_host()
        .service_host()
        .provider()
        .get_service::<dyn CalculatorService>()?;
    let result = manager.main_host_mut().run_until({
        let expression = expression.to_string();
        async move { calculator.evaluate_async(&expression).await }
    });
    match result {
        Ok(value) => {
            println!("{expression} = {value}");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, expression, "evaluation failed");
            Ok(())
        }
    }
}

/// Drives the cooperative main loop, honouring per-tick sleep hints.
/// Sleeping is restricted so the loop keeps re-checking its deadline.
fn run_main_loop(manager: &mut LifecycleManager, run_for: Duration, restricted_limit: Duration) {
    let deadline = Instant::now() + run_for;
    loop {
        let result = manager.update();
        if result.is_quit() {
            info!("a service requested quit");
            break;
        }
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        let hint = result.allow_sleep_with_limit(false, restricted_limit);
        if let Some(limit) = hint.sleep_duration() {
            std::thread::sleep(limit.min(deadline - now));
        }
    }
}
