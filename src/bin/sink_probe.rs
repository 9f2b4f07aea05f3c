//! Sends one test message through configured sinks, to check credentials and
//! chat ids before running the engine.
//!
//! Usage: `sink-probe [SINK_ID...]` (no ids: every configured sink).

use std::process::ExitCode;

use tracker_notify::{builtin_sinks, config, Message};

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt().with_target(false).init();

    let cfg = match config::load_default() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("sink-probe: {e}");
            return ExitCode::from(2);
        }
    };
    let wanted: Vec<String> = std::env::args().skip(1).collect();
    let registry = builtin_sinks();

    let mut failures = 0;
    let mut probed = 0;
    for sc in cfg.sinks.iter().filter(|s| wanted.is_empty() || wanted.contains(&s.id)) {
        probed += 1;
        let sink = match registry.build(&sc.id, &sc.kind, sc) {
            Ok(s) => s,
            Err(e) => {
                println!("{:<16} {:<9} BUILD FAILED  {e}", sc.id, sc.kind);
                failures += 1;
                continue;
            }
        };
        let msg = Message {
            id: format!("probe-{}", chrono::Utc::now().timestamp()),
            source_id: "sink-probe".into(),
            title: "tracker-notify test message".into(),
            body: format!("If you can read this, sink `{}` works.", sc.id),
            link: None,
        };
        match sink.send(&msg).await {
            Ok(()) => println!("{:<16} {:<9} ok", sc.id, sc.kind),
            Err(e) => {
                println!("{:<16} {:<9} FAILED  {e:#}", sc.id, sc.kind);
                failures += 1;
            }
        }
    }

    if probed == 0 {
        eprintln!("sink-probe: no matching sinks in configuration");
        return ExitCode::from(2);
    }
    if failures > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
