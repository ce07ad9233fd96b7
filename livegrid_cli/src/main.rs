use clap::{Arg, Command};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use liblivegrid::config::Config;
use liblivegrid::consumer::{run_consumer, ChannelSource};
use liblivegrid::dispatcher::RunDispatcher;
use liblivegrid::sim::{publish_demo_run, SimChannelReader, ROI_SOURCE};
use liblivegrid::sink::LogSinkProvider;

fn make_template_config(path: &Path) {
    let config = Config::default();
    let yaml_str = serde_yaml::to_string(&config).unwrap();
    let mut file = File::create(path).expect("Could create template config file!");
    file.write_all(yaml_str.as_bytes())
        .expect("Failed to write yaml data to file!");
}

fn main() {
    // Create a cli
    let matches = Command::new("livegrid_cli")
        .arg_required_else_help(true)
        .subcommand(Command::new("new").about("Make a template configuration yaml file"))
        .subcommand(
            Command::new("demo")
                .about("Run the worker against a built-in simulated scan and control system"),
        )
        .arg(
            Arg::new("path")
                .short('p')
                .long("path")
                .help("Path to the configuration file"),
        )
        .get_matches();

    // Initialize feedback
    simplelog::TermLogger::init(
        simplelog::LevelFilter::Debug,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    )
    .expect("Could not create logging!");

    // Parse the cli
    let config_path = PathBuf::from(matches.get_one::<String>("path").expect("We require args"));

    if let Some(("new", _)) = matches.subcommand() {
        log::info!(
            "Making a template config at {}...",
            config_path.to_string_lossy()
        );
        make_template_config(&config_path);
        log::info!("Done.");
        return;
    }

    // Load our config
    log::info!("Loading config from {}...", config_path.to_string_lossy());
    let config = match Config::read_config_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            log::error!("{e}");
            return;
        }
    };
    log::info!("Config successfully loaded.");
    log::info!("Topics: {}", config.topics.join(", "));
    log::info!("Bootstrap servers: {}", config.bootstrap_servers);
    log::info!("Group id: {}", config.group_id);
    log::info!("Plan match: {:?}", config.plan_match);
    log::info!("Array counter key: {}", config.array_counter_key);
    log::info!("Grid: {} x {}", config.grid_rows, config.grid_cols);
    log::info!("ROI channel: {:?}", config.roi_channel);

    // Wire the simulated publisher and control system through the consumer
    // seam. A broker-backed DocumentSource substitutes here unchanged.
    let (tx, rx) = mpsc::channel();
    let reader = SimChannelReader::new();
    reader.set_value(ROI_SOURCE, 5.0);

    let loop_forever = matches!(matches.subcommand(), Some(("demo", _)));
    let publisher_config = config.clone();
    let publisher = std::thread::spawn(move || {
        for counter in 1.. {
            if publish_demo_run(&tx, &publisher_config).is_err() {
                break;
            }
            log::info!("Published demo scan {counter}.");
            if !loop_forever {
                break;
            }
            std::thread::sleep(Duration::from_secs(2));
        }
    });

    let mut dispatcher = RunDispatcher::new(config, Arc::new(reader), Arc::new(LogSinkProvider));
    let mut source = ChannelSource::new(rx);
    run_consumer(
        &mut source,
        &mut dispatcher,
        Duration::from_millis(500),
        || log::trace!("waiting for documents..."),
    );

    if publisher.join().is_err() {
        log::error!("Failed to join the publisher thread!");
    }
    log::info!("Done.");
}
