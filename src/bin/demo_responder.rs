//! Demo FastCGI responder (component I, not part of the library's public
//! contract). Loads a small JSON config, starts logging, and serves a
//! handler that reads the file named by the `X-Script-Filename` bookkeeping
//! header (see `fastcgi_responder::SCRIPT_FILENAME_HEADER`).
//!
//! Grounded in `original_source/src/unit.go`'s `GetConfig` and
//! `src/main.go`'s `markDownFunc`: a web server in front of this would
//! resolve a request path to a file on disk and set that header, the same
//! role Nginx/Unit's `SCRIPT_FILENAME` CGI var plays for a PHP-FPM style
//! backend.

use fastcgi_responder::{HttpRequest, ResponseWriter, ServerSpec, SCRIPT_FILENAME_HEADER};
use serde::Deserialize;
use std::io::{self, BufWriter, Write};
use std::net::TcpStream;
use std::process::ExitCode;

#[derive(Deserialize)]
struct Config {
    listen: String,
    #[serde(default = "default_log_level")]
    log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn load_config(path: &str) -> Result<Config, String> {
    let data = std::fs::read_to_string(path).map_err(|e| format!("reading {path}: {e}"))?;
    serde_json::from_str(&data).map_err(|e| format!("parsing {path}: {e}"))
}

fn handle(request: HttpRequest, mut response: ResponseWriter<BufWriter<TcpStream>>) {
    let Some(file_path) = request.headers.get(SCRIPT_FILENAME_HEADER) else {
        response.write_status(500);
        let _ = response.write(b"missing X-Script-Filename");
        return;
    };

    match std::fs::read(file_path) {
        Ok(contents) => {
            let _ = response.write(&contents);
        }
        Err(e) => {
            log::warn!(error:err = e, path = file_path.as_str(); "failed to read requested file");
            response.write_status(404);
            let _ = response.write(b"not found");
        }
    }
}

fn main() -> ExitCode {
    let config = match load_config("config.json") {
        Ok(c) => c,
        Err(e) => {
            eprintln!("demo-responder: {e}");
            return ExitCode::FAILURE;
        }
    };

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(&config.log_level),
    )
    .init();

    let spec = ServerSpec::new(handle);
    let address = match config.listen.parse() {
        Ok(addr) => addr,
        Err(e) => {
            eprintln!("demo-responder: invalid listen address {:?}: {e}", config.listen);
            return ExitCode::FAILURE;
        }
    };

    let handle = match spec.start(address) {
        Ok(h) => h,
        Err(e) => {
            eprintln!("demo-responder: failed to start server: {e}");
            return ExitCode::FAILURE;
        }
    };

    log::info!("demo-responder listening on {}", handle.address());
    let _ = io::stdout().flush();

    match handle.join() {
        fastcgi_responder::ServerExitReason::Normal => ExitCode::SUCCESS,
        fastcgi_responder::ServerExitReason::Err(e) => {
            eprintln!("demo-responder: server loop error: {e}");
            ExitCode::FAILURE
        }
        fastcgi_responder::ServerExitReason::Panic(msg) => {
            eprintln!("demo-responder: server loop panicked: {msg}");
            ExitCode::FAILURE
        }
    }
}
