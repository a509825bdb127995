use std::{error::Error, io, path::PathBuf, time::Duration};

use clap::Parser;
use hbapi::{
    Command, Config, FifoConnector, FifoTransport, Request, Session, SessionError, cli,
    correlator, prompt,
};

#[derive(Parser)]
#[command(version, about = "Interactive heartbeat client", long_about = None)]
struct Cli {
    /// Sign on as a named service instead of a casual client
    #[arg(short, long)]
    service: Option<String>,
    /// Heartbeat state directory
    #[arg(long, default_value = hbapi::config::DEFAULT_BASE_DIR)]
    base_dir: PathBuf,
    /// Seconds to wait for daemon answers and ping replies
    #[arg(short, long, default_value_t = 5)]
    timeout: u64,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let cli = Cli::parse();
    let timeout = Duration::from_secs(cli.timeout);
    let config = Config::default()
        .with_base_dir(cli.base_dir)
        .with_timeout(timeout);
    let mut session = Session::signon(&mut FifoConnector, cli.service.as_deref(), config)?;
    println!(
        "signed on to {} as {}",
        session.node_name(),
        session.client_id()
    );

    let stdin = io::stdin();
    let stdout = io::stdout();

    loop {
        let cmd = match prompt(stdin.lock(), stdout.lock()) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("{e}");
                continue;
            }
        };

        if let Command::Exit = cmd {
            if let Err(e) = session.signoff() {
                eprintln!("failed to sign off cleanly. error: {e}");
            }
            break;
        }

        if let Err(e) = execute(&mut session, cmd, timeout) {
            eprintln!("command error: {e}");
        }
    }

    Ok(())
}

fn execute(
    session: &mut Session<FifoTransport>,
    cmd: Command,
    timeout: Duration,
) -> Result<(), Box<dyn Error>> {
    match cmd {
        Command::Exit => {}
        Command::Nodes => print_list(session.nodes()?),
        Command::Active => println!(
            "{}",
            session.nodes_with_status(Some(hbapi::protocol::ACTIVE_STATUS))?.join(" ")
        ),
        Command::Status(node) => print_value(session.node_status(&node)?),
        Command::Interfaces(node) => print_list(session.interfaces(&node)?),
        Command::InterfaceStatus { node, interface } => {
            print_value(session.interface_status(&node, &interface)?)
        }
        Command::Snapshot => cli::write_snapshot(io::stdout().lock(), &session.snapshot()?)?,
        Command::Ping(node) => {
            let request = Request::new("ping")?;
            let collected = match node {
                Some(node) => correlator::unicast_and_wait(session, &request, &node, timeout),
                None => correlator::broadcast_and_collect(session, &request, None, timeout),
            };
            match collected {
                Ok(collected) => cli::write_collected(io::stdout().lock(), &collected)?,
                Err(SessionError::NotPermitted) => {
                    eprintln!("casual clients cannot ping, sign on with --service")
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
    Ok(())
}

fn print_list(items: Option<Vec<String>>) {
    match items {
        Some(items) => println!("{}", items.join(" ")),
        None => println!("(request failed)"),
    }
}

fn print_value(value: Option<String>) {
    println!("{}", value.as_deref().unwrap_or("(request failed)"));
}
