//! Merge command line flags over the config file.

use std::path::PathBuf;

use rslurp::config::ConfigFile;
use rslurp::{OutputTarget, SessionConfig, TlsPolicy};

use crate::error::CliError;
use crate::Cli;

/// Build the session configuration: flag, then config file, then default.
pub fn resolve(cli: &Cli, file: &ConfigFile) -> Result<SessionConfig, CliError> {
    let mut builder = file.apply(SessionConfig::builder());

    let out = cli
        .out
        .clone()
        .or_else(|| file.out.clone())
        .unwrap_or_else(|| PathBuf::from("."));
    let output = if cli.tar || file.tar == Some(true) {
        OutputTarget::Archive(out)
    } else {
        OutputTarget::Directory(out)
    };
    builder = builder
        .with_output(output)
        .with_dry_run(cli.dry_run)
        .with_verbose(cli.verbose);

    if let Some(workers) = cli.workers {
        builder = builder.with_workers(workers);
    }
    if let Some(matching) = &cli.matching {
        builder = builder.with_pattern(matching.clone());
    }
    if let Some(delay) = cli.ui_delay {
        builder = builder.with_ui_interval(delay);
    }

    let builder = builder.map_http(|mut http| {
        if let Some(timeout) = cli.timeout {
            http = http.with_timeout(timeout);
        }
        // Each half of the credentials falls back to the file on its own.
        let username = cli.username.clone().or_else(|| file.username.clone());
        let password = cli.password.clone().or_else(|| file.password.clone());
        if let Some(username) = username {
            http = http.with_credentials(username, password.unwrap_or_default());
        }
        if cli.no_verify_cert {
            http = http.with_verify_certs(false);
        }
        if cli.fast_cipher {
            http = http.with_tls_policy(TlsPolicy::Fast);
        }
        if let Some(root_ca) = &cli.root_ca {
            http = http.with_root_ca(root_ca.clone());
        }
        http
    });

    Ok(builder.build()?)
}
