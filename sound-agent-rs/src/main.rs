//! Sound Agent service.
//!
//! Monitors the audio endpoints of this machine and reports every change to
//! the configured REST backend until Ctrl+C or a termination signal.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use signal_hook::consts::{SIGINT, SIGTERM};
use tracing::info;
use tracing_subscriber::EnvFilter;

use sound_agent_rs::api::transport::DEFAULT_REQUEST_TIMEOUT;
use sound_agent_rs::api::{
    AudioDeviceApiClient, BrokerSettings, HttpRequestDispatcher, HttpRequestProcessor,
    NullDispatcher, ProcessorSettings, RabbitMqDispatcher, ReqwestTransport, ServiceObserver,
};
use sound_agent_rs::config::{self, AgentConfig, CliArgs, TransportMethod, USAGE};
use sound_agent_rs::crypt::{self, CONFIG_KEY};
use sound_agent_rs::{CollectionOptions, DeviceObserver, HostIdentity, SoundDeviceCollection};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("sound_agent=info,sound_agent_rs=info")),
        )
        .init();

    let args = CliArgs::parse(std::env::args().skip(1))?;

    if args.help {
        print!("{USAGE}");
        return Ok(());
    }
    if args.version {
        println!("Version {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }
    if let Some(value) = &args.encrypt {
        println!("{}", crypt::encrypt(value, CONFIG_KEY)?);
        return Ok(());
    }
    if let Some(url) = &args.url {
        info!(url = %url, "Got server URL");
    }
    if let Some(transport) = &args.transport {
        info!(transport = %transport, "Got transport method");
    }

    let file = config::load_file(args.config.as_deref())?;
    let config = AgentConfig::resolve(file, &args).context("Invalid configuration")?;

    run(config)
}

fn run(config: AgentConfig) -> Result<()> {
    info!("Starting Sound Agent...");

    #[cfg(windows)]
    let _com = sound_agent_rs::audio::ComGuard::new().context("COM initialization failed")?;

    let collection = open_collection(CollectionOptions {
        name_filter: config.name_filter.clone(),
        scope: config.scope,
    })?;

    let client = AudioDeviceApiClient::new(build_dispatcher(&config)?, HostIdentity::detect());
    info!(
        host = %client.host().host_name,
        os = %client.host().os_name,
        "Host identified"
    );

    let observer = Arc::new(ServiceObserver::new(&collection, client));
    let subscribed: Arc<dyn DeviceObserver> = observer.clone();
    collection.subscribe(subscribed.clone());

    collection.reset_content();
    observer.post_and_print_collection();

    wait_for_termination()?;

    collection.unsubscribe(&subscribed);
    info!("Stopping...");
    Ok(())
}

#[cfg(windows)]
fn open_collection(options: CollectionOptions) -> Result<Arc<SoundDeviceCollection>> {
    sound_agent_rs::create_device_collection(options).context("Failed to open the audio endpoints")
}

#[cfg(not(windows))]
fn open_collection(_options: CollectionOptions) -> Result<Arc<SoundDeviceCollection>> {
    anyhow::bail!("Audio endpoint monitoring requires Windows Core Audio")
}

fn build_dispatcher(config: &AgentConfig) -> Result<Arc<dyn HttpRequestDispatcher>> {
    match config.transport {
        TransportMethod::None => Ok(Arc::new(NullDispatcher)),
        TransportMethod::Direct => {
            let transport =
                ReqwestTransport::new(DEFAULT_REQUEST_TIMEOUT).context("Failed to build HTTP client")?;
            let settings = ProcessorSettings::new(
                config.api_base_url.as_str(),
                config.universal_token.as_str(),
                config.codespace_name.as_str(),
            );
            info!(url = %settings.api_base_url, "Direct HTTP delivery");
            Ok(Arc::new(HttpRequestProcessor::new(settings, Arc::new(transport))))
        }
        TransportMethod::RabbitMq => {
            let settings = BrokerSettings::new(
                config.rabbitmq_uri.as_str(),
                config.rabbitmq_queue.as_str(),
            );
            info!(queue = %settings.queue_name, "RabbitMQ delivery");
            let dispatcher =
                RabbitMqDispatcher::new(settings).context("Failed to start the broker publisher")?;
            Ok(Arc::new(dispatcher))
        }
    }
}

fn wait_for_termination() -> Result<()> {
    let term = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(SIGINT, Arc::clone(&term)).context("Failed to hook SIGINT")?;
    signal_hook::flag::register(SIGTERM, Arc::clone(&term)).context("Failed to hook SIGTERM")?;

    info!("Running, press Ctrl+C to stop");
    while !term.load(Ordering::Relaxed) {
        std::thread::sleep(Duration::from_millis(200));
    }
    Ok(())
}
