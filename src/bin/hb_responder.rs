use std::{
    error::Error,
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use clap::Parser;
use hbapi::{
    Config, DispatchTable, FifoConnector, Message, Outbox, RequestKinds, Session,
    dispatch::respond,
    protocol::{ApiResult, types},
};
use log::{info, warn};

#[derive(Debug, Parser)]
#[command(version, about = "Answer ping requests from the cluster", long_about = None)]
struct Cli {
    /// Service name to sign on with
    #[arg(short, long, default_value = "hb_responder")]
    service: String,
    /// Heartbeat state directory
    #[arg(long, default_value = hbapi::config::DEFAULT_BASE_DIR)]
    base_dir: PathBuf,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let cli = Cli::parse();
    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    ctrlc::set_handler(move || flag.store(false, Ordering::SeqCst))?;

    let config = Config::default().with_base_dir(cli.base_dir);
    let mut session = Session::signon(&mut FifoConnector, Some(&cli.service), config)?;
    info!(
        "{} answering requests on {}",
        session.client_id(),
        session.node_name()
    );

    let mut table = DispatchTable::new();
    table.insert("ping", |msg: &Message, outbox: &mut dyn Outbox| {
        info!("ping from {}", msg.origin().unwrap_or("unknown"));
        respond(outbox, msg, &RequestKinds::default(), ApiResult::OK, None)
    });
    table.set_bad_request(|msg: &Message, outbox: &mut dyn Outbox| {
        let comment = format!("unsupported request '{}'", msg.subtype().unwrap_or_default());
        respond(
            outbox,
            msg,
            &RequestKinds::default(),
            ApiResult::BADREQ,
            Some(&comment),
        )
    });
    session.set_msg_callback(types::TEST_REQUEST, Some(table.into_callback()));
    session.set_node_status_callback(Some(Box::new(|node: &str, status: &str| {
        info!("node {node} is now {status}")
    })));
    session.set_if_status_callback(Some(Box::new(
        |node: &str, interface: &str, status: &str| {
            info!("link {node}/{interface} is now {status}")
        },
    )));

    while running.load(Ordering::SeqCst) {
        match session.read_next_timeout(Some(Duration::from_secs(1))) {
            Ok(Some(msg)) => info!("unhandled message of type {:?}", msg.kind()),
            Ok(None) => {}
            Err(e) => {
                warn!("lost connection to the daemon: {e}");
                return Err(e.into());
            }
        }
    }

    info!("shutting down");
    session.signoff()?;
    Ok(())
}
