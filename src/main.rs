use anyhow::Result;

use mps_comm::{boot, cli};

fn main() -> Result<()> {
    let matches = cli::parse_args();
    let log_file = matches
        .subcommand()
        .and_then(|(_, sub)| sub.get_one::<String>("log-file").cloned());
    match log_file {
        Some(path) => boot::init_daemon_logger(&path)?,
        None => boot::init_common(),
    }
    cli::actions::run(&matches)
}
