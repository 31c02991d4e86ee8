/// Polder service entry point.
///
/// Usage: polder_service [run|predict|forecast|verify] [--dry-run]
///
///   run       load the model, register both jobs, run until `quit` on stdin
///   predict   one prediction cycle; an optional JSON argument supplies overrides
///   forecast  one forecast cycle
///   verify    preflight check of every location and channel
///
/// `--dry-run` swaps the database for an empty in-memory tree.

use chrono::Utc;
use polder_service::audit::PgDecisionLog;
use polder_service::classifier::TreeEnsemble;
use polder_service::config::Config;
use polder_service::inference::InferenceEngine;
use polder_service::ingest::bmkg::BmkgClient;
use polder_service::logging::{self, Component};
use polder_service::on_demand::OnDemandHandler;
use polder_service::pipeline::Pipeline;
use polder_service::scheduler::{Scheduler, ShutdownPolicy};
use polder_service::store::rtdb::RtdbStore;
use polder_service::store::{MemoryStore, TreeStore};
use polder_service::verify;
use std::error::Error;
use std::io::BufRead;
use std::sync::{Arc, mpsc};
use std::thread;

const USAGE: &str = "usage: polder_service [run|predict [JSON]|forecast|verify] [--dry-run]";

fn main() {
    dotenv::dotenv().ok();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let dry_run = args.iter().any(|a| a == "--dry-run");
    let positional: Vec<&str> = args
        .iter()
        .filter(|a| !a.starts_with("--"))
        .map(String::as_str)
        .collect();
    let command = positional.first().copied().unwrap_or("run");

    let config = match Config::load(&Config::default_path()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("✗ {}", e);
            std::process::exit(1);
        }
    };
    logging::init_logger(
        config.logging.level,
        config.logging.file.as_deref(),
        config.logging.console_timestamps,
    );

    let result = match command {
        "run" => run(&config, dry_run),
        "predict" => predict(&config, dry_run, positional.get(1).copied()),
        "forecast" => forecast(&config, dry_run),
        "verify" => verify_sources(&config, dry_run),
        "help" => {
            println!("{}", USAGE);
            Ok(())
        }
        other => {
            eprintln!("unknown command '{}'\n{}", other, USAGE);
            std::process::exit(2);
        }
    };

    if let Err(e) = result {
        logging::error(Component::System, None, &e.to_string());
        std::process::exit(1);
    }
}

// ---------------------------------------------------------------------------
// Startup
// ---------------------------------------------------------------------------

/// Builds the process-wide handles. A model that cannot be loaded, or does
/// not satisfy the decision contract, stops the process here.
fn build_pipeline(config: &Config, dry_run: bool) -> Result<Arc<Pipeline>, Box<dyn Error>> {
    let offset = config
        .utc_offset()
        .ok_or("time.utc_offset_hours is not a valid offset")?;

    let model = TreeEnsemble::load(&config.model.path)?;
    let engine = InferenceEngine::new(Arc::new(model))?;

    let store: Arc<dyn TreeStore> = if dry_run {
        logging::info(Component::System, None, "dry run: using an empty in-memory store");
        Arc::new(MemoryStore::new())
    } else {
        if config.store_auth_token().is_none() {
            logging::warn(
                Component::Store,
                None,
                &format!("{} not set; requests are unauthenticated", config.store.auth_token_env),
            );
        }
        Arc::new(RtdbStore::new(
            &config.store.base_url,
            config.store_auth_token(),
            config.store_timeout(),
        )?)
    };
    let weather = Arc::new(BmkgClient::new(&config.weather.base_url, config.weather_timeout())?);

    let mut pipeline = Pipeline::new(
        store,
        weather,
        Arc::new(engine),
        &config.store.root,
        config.weather.locations.clone(),
        offset,
    );

    if config.audit.enabled && !dry_run {
        match PgDecisionLog::connect_from_env(&config.audit.database_url_env, config.audit_timeout()) {
            Ok(log) => {
                logging::info(Component::Audit, None, "decision audit log connected");
                pipeline = pipeline.with_audit(Box::new(log));
            }
            Err(e) => logging::warn(
                Component::Audit,
                None,
                &format!("audit disabled for this run: {}", e),
            ),
        }
    }

    Ok(Arc::new(pipeline))
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

fn run(config: &Config, dry_run: bool) -> Result<(), Box<dyn Error>> {
    let pipeline = build_pipeline(config, dry_run)?;
    let scheduler = Scheduler::new()?;
    pipeline.register_jobs(&scheduler, &config.schedule)?;
    scheduler.start()?;

    logging::info(
        Component::System,
        None,
        &format!(
            "serving {} channels, {} forecast locations under /{}",
            polder_service::channels::CHANNEL_REGISTRY.len(),
            pipeline.locations().len(),
            pipeline.root()
        ),
    );

    let (stop_tx, stop_rx) = mpsc::channel();
    thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            match line {
                Ok(l) if l.trim() == "quit" => {
                    let _ = stop_tx.send(());
                    return;
                }
                Ok(_) => {}
                Err(_) => return,
            }
        }
    });

    match stop_rx.recv() {
        Ok(()) => {
            let policy = if config.schedule.wait_on_shutdown {
                ShutdownPolicy::WaitForRunning
            } else {
                ShutdownPolicy::Abandon
            };
            scheduler.shutdown(policy);
        }
        // stdin closed (detached): run until the process is killed
        Err(_) => scheduler.wait(),
    }
    Ok(())
}

fn predict(config: &Config, dry_run: bool, body: Option<&str>) -> Result<(), Box<dyn Error>> {
    let pipeline = build_pipeline(config, dry_run)?;
    let handler = OnDemandHandler::new(pipeline, config.on_demand.persist_overrides);

    let body = body.map(serde_json::from_str::<serde_json::Value>).transpose()?;
    let response = handler.handle_json(body.as_ref());
    println!("{}", serde_json::to_string_pretty(&response)?);

    match response.get("message").and_then(|m| m.as_str()) {
        Some(message) => Err(message.into()),
        None => Ok(()),
    }
}

fn forecast(config: &Config, dry_run: bool) -> Result<(), Box<dyn Error>> {
    let pipeline = build_pipeline(config, dry_run)?;
    let handler = OnDemandHandler::new(pipeline, config.on_demand.persist_overrides);
    let response = handler.forecast_json();
    println!("{}", serde_json::to_string_pretty(&response)?);

    match response.get("message").and_then(|m| m.as_str()) {
        Some(message) => Err(message.into()),
        None => Ok(()),
    }
}

fn verify_sources(config: &Config, dry_run: bool) -> Result<(), Box<dyn Error>> {
    let pipeline = build_pipeline(config, dry_run)?;
    let report = verify::run_verification_at(
        pipeline.weather(),
        pipeline.store(),
        pipeline.root(),
        pipeline.locations(),
        pipeline.offset(),
        Utc::now(),
    );
    verify::print_summary(&report);

    std::fs::write("verification_report.json", serde_json::to_string_pretty(&report)?)?;
    println!("\nFull report saved to: verification_report.json");
    Ok(())
}
