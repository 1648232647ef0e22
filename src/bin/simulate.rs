use std::{path::PathBuf, process};

use structopt::StructOpt;
use tracing::{error, info};
use tracing_subscriber::FmtSubscriber;

use fedledger_client::{
    crypto::EcdhKeyPair,
    settings::Settings,
    testutils::{Simulation, ToyEngine},
    PassiveNotifier,
    RoundController,
    RunOutcome,
};

#[derive(Debug, StructOpt)]
#[structopt(name = "fedledger-sim")]
/// Run a participant against an in-process simulation of the contract, the store and the
/// aggregator of its project.
struct Opt {
    /// Path of the configuration file
    #[structopt(short, parse(from_os_str))]
    config_path: PathBuf,
}

#[tokio::main]
async fn main() {
    let opt = Opt::from_args();

    let settings = Settings::new(opt.config_path).unwrap_or_else(|err| {
        eprintln!("{}", err);
        process::exit(1);
    });

    let client_settings = settings.client_settings();
    let address = settings.identity.address;
    let Settings {
        log: log_settings, ..
    } = settings;

    let _fmt_subscriber = FmtSubscriber::builder()
        .with_env_filter(log_settings.filter)
        .with_ansi(true)
        .init();

    let simulation = Simulation::toy(client_settings.project_id);
    let mut controller = RoundController::new(
        client_settings,
        EcdhKeyPair::generate(),
        simulation.ledger(address),
        simulation.event_log(),
        simulation.store(),
        ToyEngine::default(),
        PassiveNotifier,
    );

    let cancel = controller.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received ctrl-c, stopping at the next wait");
            cancel.cancel();
        }
    });

    match controller.run().await {
        Ok(RunOutcome::Completed { iterations }) => {
            info!(
                "completed {} rounds, global model at iteration {}",
                iterations,
                simulation.iteration()
            );
        }
        Ok(RunOutcome::Cancelled(round)) => info!("stopped in {}", round),
        Err(err) => {
            error!("{}", err);
            process::exit(1);
        }
    }
}
