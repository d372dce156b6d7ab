//! takt CLI entry point.

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use takt::cli::{self, AppContext, Cli};
use takt::infrastructure::logging::{LogConfig, LoggerImpl};

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let args = Cli::parse();

    let ctx = match AppContext::load(args.project_dir.as_deref()) {
        Ok(ctx) => ctx,
        Err(err) => return cli::handle_error(&err, args.json).into(),
    };

    let _logger = match LoggerImpl::init(&LogConfig::from(&ctx.config.logging)) {
        Ok(logger) => Some(logger),
        Err(err) => {
            eprintln!("warning: logging disabled: {err:#}");
            None
        }
    };

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping");
            on_signal.cancel();
        }
    });

    let code = match cli::execute(args.command, &ctx, args.quiet, args.json, cancel).await {
        Ok(code) => code,
        Err(err) => cli::handle_error(&err, args.json),
    };
    code.into()
}
