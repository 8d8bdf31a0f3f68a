mod html;
mod monitor;

use anyhow::Result;

use crate::monitor::MonitorConfig;

fn main() {
    if let Err(err) = run() {
        eprintln!("{err:?}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let config = MonitorConfig::from_args(&args)?;
    monitor::run(config)
}
