// CLI modules
mod cli;

use clap::{Parser, Subcommand};
use cli::{args::Args, op::Op, Derive, Doc, Hash, Identity, Init, Inscribe, Manifest, Version, Wallet};

use vellum::logging::init_logging;
use vellum::state::AppState;

command_enum! {
    (Derive, Derive),
    (Doc, Doc),
    (Hash, Hash),
    (Identity, Identity),
    (Init, Init),
    (Inscribe, Inscribe),
    (Manifest, Manifest),
    (Version, Version),
    (Wallet, Wallet),
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // File logging only once the state directory exists
    let guards = match AppState::load(args.config_path.clone()) {
        Ok(state) => init_logging(&state.config.log_level, Some(&state.logs_path)),
        Err(_) => init_logging("warn", None),
    };

    let ctx = cli::op::OpContext::new(args.chain_url, args.config_path);

    let code = match args.command.execute(&ctx).await {
        Ok(output) => {
            println!("{}", output);
            0
        }
        Err(e) => {
            tracing::debug!(error = ?e, "command failed");
            eprintln!("Error: {}", e);
            1
        }
    };

    // flush the non-blocking writers before exiting
    drop(guards);
    std::process::exit(code);
}
