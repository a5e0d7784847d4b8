mod ai;
mod backup;
mod config;
mod db;
mod grading;
mod ipc;
mod logging;
mod roles;
mod scoping;

use std::io::{self, BufRead, Write};
use std::process;
use tracing::{error, info, warn};

fn main() {
    let cfg = match config::AppConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("merittracd: invalid configuration: {e:#}");
            process::exit(2);
        }
    };
    if let Err(e) = logging::init_logging(&cfg.log) {
        eprintln!("merittracd: logging disabled: {e:#}");
    }

    let analyzer = match ai::GeminiAnalyzer::new(cfg.ai.clone()) {
        Ok(a) => a,
        Err(e) => {
            error!(error = %e, "failed to build analysis client");
            process::exit(1);
        }
    };
    if cfg.ai.api_key.is_none() {
        warn!("MERITTRAC_AI_API_KEY not set; analysis.generate will be unavailable");
    }

    let mut state = ipc::AppState {
        workspace: None,
        db: None,
        session: None,
        analyzer: Box::new(analyzer),
    };
    if let Some(path) = cfg.workspace.clone() {
        if let Err(e) = ipc::open_workspace(&mut state, path) {
            error!(error = %e, "failed to open startup workspace");
        }
    }
    info!(version = env!("CARGO_PKG_VERSION"), "merittracd ready");

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "stdin closed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // No id to echo back.
                let resp = serde_json::json!({
                    "ok": false,
                    "error": { "code": "bad_json", "message": e.to_string() }
                });
                let _ = writeln!(stdout, "{}", resp);
                let _ = stdout.flush();
                continue;
            }
        };

        let resp = ipc::handle_request(&mut state, req);
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }
    info!("merittracd shutting down");
}
