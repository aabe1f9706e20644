use anyhow::Result;
use std::env;

use codepod::config::Config;
use codepod::logging;
use codepod::rest::server::run_server;

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    match args.get(1).map(String::as_str) {
        Some("version") => {
            println!("codepod {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Some("serve") | None => {
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(async {
                let config = Config::from_env();
                let _log_guard = logging::init(&config.log_dir)?;
                run_server(config).await
            })
        }
        Some(other) => {
            eprintln!("Unknown command: {other}");
            eprintln!("Usage: codepod [serve|version]");
            std::process::exit(1);
        }
    }
}
