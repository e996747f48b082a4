use anyhow::Context;
use clap::error::ErrorKind;
use clap::Parser;
use dsrepl_mgmt::cli::Cli;
use dsrepl_mgmt::console::Console;
use dsrepl_mgmt::directory::ldap::LdapConnector;
use dsrepl_mgmt::logging;
use dsrepl_mgmt::operations::Executor;
use dsrepl_mgmt::{ReturnCode, ToolConfig};
use std::process::ExitCode;

fn exit(code: ReturnCode) -> ExitCode {
    ExitCode::from(code.code())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => exit(ReturnCode::ErrorUserData),
            };
        }
    };

    let config = match ToolConfig::load(cli.config.as_deref()).context("cannot load the tool configuration") {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{:#}", e);
            return exit(ReturnCode::ErrorUserData);
        }
    };
    let log = match logging::init(config.log_dir.as_deref()) {
        Ok(log) => Some(log),
        Err(e) => {
            eprintln!("Warning: no log file for this operation: {:#}", e);
            None
        }
    };
    tracing::info!("dsreplication {} starting", env!("CARGO_PKG_VERSION"));

    let console = Console::new(!cli.no_prompt, cli.quiet);
    let result = match cli.into_operation(config, &console) {
        Ok((session, op)) => {
            let connector = LdapConnector;
            Executor::new(&session, &connector, &console).run(&op).await
        }
        Err(e) => Err(e),
    };

    match result {
        Ok(code) => {
            if let Some(log) = log {
                if let Err(e) = log.remove() {
                    tracing::debug!("cannot remove the log file: {}", e);
                }
            }
            exit(code)
        }
        Err(e) => {
            tracing::error!("{}: {}", e.code, e.chain());
            console.error(&e.message);
            if let Some(log) = &log {
                console.error(&format!(
                    "See {} for a detailed log of this operation.",
                    log.path().display()
                ));
            }
            exit(e.code)
        }
    }
}
