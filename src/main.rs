use std::env;
use std::fs::OpenOptions;
use std::process::ExitCode;

use env_logger::{Builder, Env, Target};

use handle_sweep::config::load_env_file;
use handle_sweep::{Notifier, Sweep, SweepConfig, TelegramNotifier};

fn init_logger() {
    let mut builder = Builder::from_env(Env::default().default_filter_or("info"));

    if let Ok(path) = env::var("LOG_FILE_PATH")
        && !path.trim().is_empty()
    {
        match OpenOptions::new().create(true).append(true).open(&path) {
            Ok(file) => {
                builder.target(Target::Pipe(Box::new(file)));
            }
            Err(err) => eprintln!("cannot open log file {path}: {err}; logging to stderr"),
        }
    }

    builder.init();
}

#[tokio::main]
async fn main() -> ExitCode {
    // `.env` may carry LOG_FILE_PATH, so it is loaded before the logger.
    let env_file = load_env_file(None);
    init_logger();

    match env_file {
        Ok(true) => log::debug!("environment file loaded"),
        Ok(false) => log::debug!("no environment file found"),
        Err(err) => {
            log::error!("failed to load configuration: {err}");
            return ExitCode::FAILURE;
        }
    }

    let config = match SweepConfig::from_process_env() {
        Ok(config) => config,
        Err(err) => {
            log::error!("failed to load configuration: {err}");
            return ExitCode::FAILURE;
        }
    };

    let problems = config.validate();
    if !problems.is_empty() {
        let notifier = TelegramNotifier::new(
            config.telegram_bot_token.clone(),
            config.telegram_chat_id.clone(),
        );
        let text = format!(
            "‼️ Sweep not started, configuration is invalid:\n{}",
            problems.join("\n")
        );
        if !notifier.send(&text).await {
            log::debug!("configuration alert not delivered via {}", notifier.name());
        }
        return ExitCode::FAILURE;
    }

    let mut sweep = match Sweep::builder(config).build() {
        Ok(sweep) => sweep,
        Err(err) => {
            log::error!("failed to start sweep: {err}");
            return ExitCode::FAILURE;
        }
    };

    let summary = sweep.run().await;
    if summary.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
