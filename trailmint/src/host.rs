//! trailmint-host - native-messaging host for the browser extension
//!
//! The browser starts this process and speaks to it over stdin/stdout:
//! every message is a 32-bit native-endian length followed by a JSON
//! request, and every request gets exactly one framed JSON response.
//! Logs go to $XDG_STATE_HOME/trailmint/ only, never to stdout.
//!
//! The process exits when the browser closes stdin. Open tabs are
//! finalized first so their time is not lost.

use std::io::{self, BufReader, BufWriter};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use trailmint_core::framing::{read_frame, write_message};
use trailmint_core::messaging::{Request, Response, Router};
use trailmint_core::{Config, StateStore};

fn main() -> Result<()> {
    let config = Config::load().context("failed to load configuration")?;
    let _log_guard =
        trailmint_core::logging::init(&config.logging).context("failed to initialize logging")?;

    let db_path = Config::database_path();
    let store = StateStore::open(&db_path).context("failed to open database")?;
    store.migrate().context("failed to run database migrations")?;

    let mut router =
        Router::from_config(Arc::new(store), config).context("failed to create router")?;

    tracing::info!(db = %db_path.display(), "Native host started");

    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut reader = BufReader::new(stdin.lock());
    let mut writer = BufWriter::new(stdout.lock());

    let result = serve(&mut router, &mut reader, &mut writer);

    router.shutdown(Utc::now());
    match &result {
        Ok(count) => tracing::info!(requests = count, "Native host stopped"),
        Err(e) => tracing::error!(error = %e, "Native host stopped on error"),
    }
    result.map(|_| ())
}

/// Answer framed requests until EOF. Returns the number handled.
fn serve<R: io::Read, W: io::Write>(
    router: &mut Router,
    reader: &mut R,
    writer: &mut W,
) -> Result<u64> {
    let mut handled = 0u64;

    while let Some(body) = read_frame(reader).context("failed to read request")? {
        let response = match serde_json::from_slice::<Request>(&body) {
            Ok(request) => router.handle(request),
            Err(e) => {
                tracing::warn!(error = %e, len = body.len(), "Malformed request");
                Response::Failed {
                    success: false,
                    error: format!("malformed request: {}", e),
                    category: None,
                }
            }
        };

        if let Err(e) = write_message(writer, &response) {
            // Most likely an oversized reply; the extension still gets an answer
            tracing::warn!(error = %e, "Failed to write response");
            let fallback = Response::Failed {
                success: false,
                error: e.to_string(),
                category: None,
            };
            write_message(writer, &fallback).context("failed to write response")?;
        }
        handled += 1;
    }

    Ok(handled)
}
