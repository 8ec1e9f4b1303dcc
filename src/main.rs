use std::{error::Error, process, sync::Arc, time::Duration};

use clap::{command, Parser, ValueHint};
use exponential_backoff::Backoff;
use log::{debug, error, info, warn, LevelFilter};

use kava::{
    config::Config,
    controller::Controller,
    endpoints::{self, Context},
    error::ErrorKind,
    events::EventBus,
    platform::{Authority, HeadlessPlatform, Platform},
    player::{memory::MemoryEngine, PlaybackEngine},
    remote::Client,
    signal,
};

/// Profile to display when not built in release mode.
#[cfg(debug_assertions)]
const BUILD_PROFILE: &str = "debug";
/// Profile to display when not built release mode.
#[cfg(not(debug_assertions))]
const BUILD_PROFILE: &str = "release";

/// Group name for mutually exclusive logging options.
const ARGS_GROUP_LOGGING: &str = "logging";

/// Bounds of the delay between connection attempts.
const MIN_RETRY: Duration = Duration::from_secs(1);
const MAX_RETRY: Duration = Duration::from_secs(60);

/// Command line arguments as parsed by `clap`.
#[derive(Clone, Debug, Default, Hash, PartialEq, Eq, PartialOrd, Ord, Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    ///
    /// Built-in defaults are used when the file does not exist.
    #[arg(short, long, value_name = "FILE", value_hint = ValueHint::FilePath, default_value_t = String::from("kava.toml"))]
    config: String,

    /// Kava server to connect to
    ///
    /// Overrides the URI in the configuration file.
    #[arg(long, env = "KAVA_URI", value_hint = ValueHint::Url)]
    uri: Option<String>,

    /// Suppresses all output except warnings and errors.
    #[arg(short, long, default_value_t = false, group = ARGS_GROUP_LOGGING)]
    quiet: bool,

    /// Enable verbose logging
    ///
    /// Specify twice for trace logging.
    #[arg(short, long, action = clap::ArgAction::Count, group = ARGS_GROUP_LOGGING)]
    verbose: u8,
}

/// Initializes the logger facade.
///
/// The logging level is determined as follows, in order of precedence from
/// highest to lowest:
/// 1. Command line arguments
/// 2. `RUST_LOG` environment variable
/// 3. Hard coded default
///
/// # Panics
///
/// Panics when a logger facade is already initialized.
fn init_logger(args: &Args) {
    let mut logger = env_logger::Builder::from_env(
        // Note: if you change the default logging level here, then you should
        // probably also change the verbosity levels below.
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
    );

    if args.quiet || args.verbose > 0 {
        let level = match args.verbose {
            // Quiet and verbose are mutually exclusive.
            0 => LevelFilter::Warn,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        };

        // Filter log messages of external crates.
        logger.filter_module("kava", level);
    }

    logger.init();
}

/// Loads the configuration, falling back to defaults if there is no file.
fn load_config(args: &Args) -> kava::error::Result<Config> {
    let mut config = match Config::from_file(&args.config) {
        Ok(config) => config,
        Err(e) if e.kind == ErrorKind::NotFound => {
            info!("{} not found, using defaults", args.config);
            Config::default()
        }
        Err(e) => return Err(e),
    };

    if let Some(uri) = &args.uri {
        config.kava.uri.clone_from(uri);
    }
    Ok(config)
}

/// Main application loop.
///
/// Keeps the bridge connected until a shutdown signal arrives. Failed
/// attempts are retried with exponential backoff, a lost connection is
/// reconnected right away.
///
/// # Errors
///
/// Returns an error when the configuration is invalid or signal handlers
/// cannot be installed.
async fn run(args: Args) -> Result<(), Box<dyn Error>> {
    let config = load_config(&args)?;
    debug!("{config:#?}");

    let bus = EventBus::new();
    let engine = Arc::new(MemoryEngine::new(config.catalog.clone(), bus.clone()));
    let platform: Arc<dyn Platform> = Arc::new(HeadlessPlatform::new(
        config.bot.clone(),
        config.voice_channels.clone(),
    ));
    let client = Client::new(&config.kava)?;

    let controller = Arc::new(Controller::new(
        Arc::clone(&engine) as Arc<dyn PlaybackEngine>,
        Arc::clone(&platform),
        Some(Arc::new(client.downgrade()) as Arc<dyn Authority>),
        &config,
    ));
    bus.subscribe(&controller);

    let context = Arc::new(Context::new(
        platform,
        Arc::clone(&engine) as Arc<dyn PlaybackEngine>,
        controller,
    ));
    endpoints::register(&client, &context);

    let clock = Arc::clone(&engine).start_clock(config.player.tick_interval);
    let mut signals = signal::Handler::new()?;

    let backoff = Backoff::new(u32::MAX, MIN_RETRY, MAX_RETRY);
    let mut delays = (&backoff).into_iter();

    loop {
        // Not cancelled by signals: the handshake is bounded by the connect
        // timeout.
        if let Err(e) = client.connect().await {
            // Subsecond jitter spreads out bridges restarted together.
            let delay = delays.next().flatten().unwrap_or(MAX_RETRY)
                + Duration::from_millis(fastrand::u64(..1_000));
            error!("{e}");
            info!("reconnecting in {:.1}s", delay.as_secs_f32());

            tokio::select! {
                biased;

                signal = signals.recv() => {
                    if signal.is_shutdown() {
                        info!("shutting down gracefully on {signal}");
                        break;
                    }
                }

                () = tokio::time::sleep(delay) => {}
            }
            continue;
        }

        delays = (&backoff).into_iter();

        tokio::select! {
            // Prioritize shutdown signals.
            biased;

            signal = signals.recv() => {
                client.close();
                if signal.is_shutdown() {
                    info!("shutting down gracefully on {signal}");
                    break;
                }
                info!("reconnecting on {signal}");
            }

            () = client.wait_disconnected() => warn!("connection to {} lost", client.uri()),
        }
    }

    clock.abort();
    client.close();
    client.tasks().quiesce().await;
    Ok(())
}

/// Main entry point of the application.
#[tokio::main]
async fn main() {
    // `clap` handles our command line arguments and help text.
    let args = Args::parse();
    init_logger(&args);

    // Dump command line arguments before we do anything more.
    // This aids in debugging of whatever comes next.
    debug!("Command {args:#?}");

    let cmd = command!();
    let name = cmd.get_name().to_string();
    let version = cmd.get_version().unwrap_or("UNKNOWN").to_string();

    info!("starting {name}/{version}; {BUILD_PROFILE}");

    if let Err(e) = run(args).await {
        error!("{e}");
        process::exit(1);
    }
}
