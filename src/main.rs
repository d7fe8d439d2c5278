extern crate chrono;
extern crate serde_json;
extern crate log;
extern crate log4rs;
extern crate ctrlc;
#[macro_use]
extern crate clap;


use std::process::exit;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{App, ArgMatches};

mod auth;
mod backend;
mod clock;
mod config;
mod firebase;
mod path;
mod payload;
mod record;
mod scheduler;
mod sensor;
mod summary;
mod sync;

use crate::auth::AuthSession;
use crate::backend::PlaceholderLight;
use crate::clock::{Clock, SystemClock};
use crate::config::Configuration;
use crate::firebase::{FirebaseDatastore, FirebaseIdentity};
use crate::path::NodePath;
use crate::scheduler::{NodeContext, Scheduler};
use crate::sensor::SensorSampler;
use crate::sync::SyncClient;

static DEFAULT_CONFIG_PATH: &'static str = "resources/gianode.yml";
static DEFAULT_LOG_CONFIG_PATH: &'static str = "resources/log.yml";

fn main() {
    let cli_yaml = clap::load_yaml!("cli.yml");
    let matches = App::from(cli_yaml).get_matches();

    let log_config_path = matches.value_of("log-config").unwrap_or(DEFAULT_LOG_CONFIG_PATH);
    match log4rs::init_file(log_config_path, Default::default()) {
        Ok(_) => {},
        Err(err) => {
            eprintln!("Could not create logger from yaml configuration \'{}\': {}", log_config_path, err);
            exit(-100);
        }
    };

    let configuration_path = matches.value_of("config").unwrap_or(DEFAULT_CONFIG_PATH);
    let configuration = match Configuration::from_file(configuration_path) {
        Ok(configuration) => configuration,
        Err(err) => {
            log::error!(target: "gianode", "{}", err);
            exit(100);
        }
    };

    if let Some(network) = &configuration.network {
        log::info!(target: "gianode", "Expecting network \'{}\' to be associated", network.ssid);
    }

    let http_client = match firebase::http_client(&configuration.firebase) {
        Ok(client) => client,
        Err(err) => {
            log::error!(target: "gianode", "Cannot create the https client: \'{}\'", err);
            exit(101);
        }
    };

    match matches.subcommand() {
        ("summary", Some(summary_matches)) => run_summary(&configuration, http_client, summary_matches),
        _ => run_node(&configuration, http_client),
    }
}

fn run_node(configuration: &Configuration, http_client: reqwest::blocking::Client) {
    let terminate_programm = Arc::new(AtomicBool::new(false));
    let terminate_handler = Arc::clone(&terminate_programm);

    match ctrlc::set_handler(move || {
        log::info!(target: "gianode", "Termination signal received!");
        terminate_handler.store(true, Ordering::SeqCst);
    }) {
        Ok(_) => {},
        Err(err) => {
            log::error!(target: "gianode", "Error setting termination handler: \'{}\'", err);
            exit(201);
        }
    };

    let sampler = SensorSampler::new(
        configuration.sensors.build(),
        Box::new(PlaceholderLight::new(configuration.light.clone())),
        configuration.soil.clone(),
    );

    let identity = FirebaseIdentity::new(http_client.clone(), &configuration.firebase);
    let auth = match AuthSession::new(Box::new(identity), configuration.auth.clone()) {
        Ok(auth) => auth,
        Err(err) => {
            log::error!(target: "gianode", "Invalid fallback identity: \'{}\'", err);
            exit(102);
        }
    };

    let sync = SyncClient::new(Box::new(FirebaseDatastore::new(http_client, &configuration.firebase)));

    let clock: Rc<dyn Clock> = Rc::new(SystemClock::new());
    let interval = Duration::from_millis(configuration.sampling.interval_ms);
    log::info!(target: "gianode", "Sampling every {:?}", interval);

    let mut scheduler = Scheduler::start(NodeContext { sampler, auth, sync }, clock, interval);
    scheduler.run(Duration::from_millis(configuration.sampling.poll_resolution_ms), &terminate_programm);

    log::info!(target: "gianode", "Exiting");
    exit(0);
}

/// Number of recent history points the summary looks at.
fn history_limit(matches: &ArgMatches) -> Result<usize, clap::Error> {
    value_t!(matches, "hist", usize)
}

fn run_summary(configuration: &Configuration, http_client: reqwest::blocking::Client, matches: &ArgMatches) {
    let identity = matches.value_of("uid").unwrap_or(configuration.auth.fallback_identity.as_str());
    let node = match NodePath::new(identity) {
        Ok(node) => node,
        Err(err) => {
            log::error!(target: "gianode", "Invalid identity \'{}\': \'{}\'", identity, err);
            exit(110);
        }
    };
    let limit = match history_limit(matches) {
        Ok(limit) => limit,
        Err(err) => {
            log::error!(target: "gianode", "Invalid history length: \'{}\'", err);
            exit(111);
        }
    };

    let store = FirebaseDatastore::new(http_client, &configuration.firebase);
    let (latest, history) = match summary::fetch(&store, &node, matches.value_of("token")) {
        Ok(data) => data,
        Err(err) => {
            log::error!(target: "gianode", "Cannot read \'nodes/{}\': \'{}\'", node.identity(), err);
            exit(112);
        }
    };

    let latest = match latest {
        Some(latest) => latest,
        None => {
            println!("No data found under nodes/{}", node.identity());
            exit(1);
        }
    };

    println!("Snapshot: {}", latest.snapshot_line());
    println!("History: {}", summary::describe_history(&history, limit));
    exit(0);
}
