//! Console monitor for the device collection.
//!
//! Prints the merged devices after every event. Enter regenerates the list,
//! `S` or `Q` quits. A first argument of `0` limits tracking to render
//! endpoints.

use std::io::{self, BufRead, Write};
use std::sync::{Arc, Weak};

use anyhow::{Context, Result};
use chrono::Local;
use tracing_subscriber::EnvFilter;

use sound_agent_rs::{
    CollectionOptions, DeviceEventType, DeviceObserver, EnumerationScope, SoundDeviceCollection,
};

fn timestamp() -> String {
    Local::now().format("%H:%M:%S%.3f").to_string()
}

struct ConsoleObserver {
    collection: Weak<SoundDeviceCollection>,
}

impl ConsoleObserver {
    fn print_collection(collection: &SoundDeviceCollection) {
        for (i, device) in collection.devices().iter().enumerate() {
            println!("{} [{i}]: {device}", timestamp());
        }
        println!(
            "\n{} Press Enter to regenerate device list; To stop, type S or Q and press Enter",
            timestamp()
        );
    }
}

impl DeviceObserver for ConsoleObserver {
    fn on_collection_changed(&self, event: DeviceEventType, group_id: &str) {
        println!("\n{} Event caught: {event}. Device PnP id: {group_id}", timestamp());
        if let Some(collection) = self.collection.upgrade() {
            Self::print_collection(&collection);
        }
    }
}

/// Block until the user asks to regenerate (`true`) or to stop (`false`).
fn wait_for_input(input: &mut impl BufRead) -> Result<bool> {
    loop {
        let mut line = String::new();
        if input.read_line(&mut line).context("Failed to read console input")? == 0 {
            return Ok(false);
        }
        match line.trim() {
            "" => return Ok(true),
            "S" | "s" | "Q" | "q" => return Ok(false),
            other => {
                println!("\n{} Input {other} not recognized.", timestamp());
                io::stdout().flush().ok();
            }
        }
    }
}

fn scope_from_args() -> EnumerationScope {
    match std::env::args().nth(1) {
        Some(arg) if arg.starts_with('0') => EnumerationScope::RenderOnly,
        _ => EnumerationScope::RenderAndCapture,
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    #[cfg(windows)]
    let _com = sound_agent_rs::audio::ComGuard::new().context("COM initialization failed")?;

    let collection = open_collection(CollectionOptions {
        name_filter: String::new(),
        scope: scope_from_args(),
    })?;

    let observer: Arc<dyn DeviceObserver> = Arc::new(ConsoleObserver {
        collection: Arc::downgrade(&collection),
    });
    collection.subscribe(observer.clone());

    let stdin = io::stdin();
    let mut input = stdin.lock();
    loop {
        println!("{} Regenerating device list.", timestamp());
        collection.reset_content();
        ConsoleObserver::print_collection(&collection);

        if !wait_for_input(&mut input)? {
            break;
        }
    }

    collection.unsubscribe(&observer);
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
