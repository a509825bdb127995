use std::{error::Error, io, path::PathBuf, process::ExitCode, time::Duration};

use clap::Parser;
use hbapi::{Config, FifoConnector, Request, Session, cli, correlator};
use log::info;

#[derive(Debug, Parser)]
#[command(version, about = "Ping cluster members over the heartbeat API", long_about = None)]
struct Cli {
    /// Service name to sign on with
    #[arg(short, long, default_value = "hb_ping")]
    service: String,
    /// Ping a single node instead of every active node
    #[arg(short, long)]
    node: Option<String>,
    /// Request subtype sent to responders
    #[arg(long, default_value = "ping")]
    subtype: String,
    /// Seconds to wait for replies
    #[arg(short, long, default_value_t = 5)]
    timeout: u64,
    /// Heartbeat state directory
    #[arg(long, default_value = hbapi::config::DEFAULT_BASE_DIR)]
    base_dir: PathBuf,
}

fn main() -> Result<ExitCode, Box<dyn Error>> {
    env_logger::init();

    let cli = Cli::parse();
    let timeout = Duration::from_secs(cli.timeout);
    let config = Config::default().with_base_dir(cli.base_dir);
    let mut session = Session::signon(&mut FifoConnector, Some(&cli.service), config)?;
    info!(
        "signed on to {} as {}",
        session.node_name(),
        session.client_id()
    );

    cli::write_snapshot(io::stdout().lock(), &session.snapshot()?)?;

    let request = Request::new(&cli.subtype)?;
    let collected = match cli.node.as_deref() {
        Some(node) => correlator::unicast_and_wait(&mut session, &request, node, timeout)?,
        None => correlator::broadcast_and_collect(&mut session, &request, None, timeout)?,
    };
    cli::write_collected(io::stdout().lock(), &collected)?;

    session.signoff()?;
    if collected.is_complete() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}
