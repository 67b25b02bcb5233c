// Fixed-rate drive loop with command watchdog
//
// A reception task decodes command frames from zenoh into the command feed.
// The control loop ticks at `loop_hz`, runs one drive cycle, and publishes the
// resulting wheel targets and health. Telemetry failures are logged and never
// stop the loop.

use serde::Serialize;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, warn};
use zenoh::handlers::FifoChannelHandler;
use zenoh::pubsub::{Publisher, Subscriber};
use zenoh::sample::Sample;

use crate::config::RuntimeConfig;
use crate::drive::{CommandSource, DriveBase, WheelActuator};
use crate::messages::WheelTelemetry;
use crate::motor;
use crate::source::{command_channel, CommandFeed};

pub type Error = Box<dyn std::error::Error + Send + Sync>;

/// Drain the command subscriber into the feed until the session closes
async fn receive_commands(subscriber: Subscriber<FifoChannelHandler<Sample>>, feed: CommandFeed) {
    while let Ok(sample) = subscriber.recv_async().await {
        let payload = sample.payload().to_bytes();
        feed.publish_payload(&payload);
    }
    warn!("Command subscriber closed, no further commands will arrive");
}

async fn publish_json<T: Serialize>(publisher: &Publisher<'_>, value: &T) {
    let json = match serde_json::to_string(value) {
        Ok(json) => json,
        Err(e) => {
            warn!("Failed to encode telemetry: {}", e);
            return;
        }
    };
    if let Err(e) = publisher.put(json).await {
        warn!("Failed to publish on {}: {}", publisher.key_expr(), e);
    }
}

/// One drive cycle, returning what was sent to the wheels
///
/// Wheel writes go to the serial bus, so the cycle runs under `block_in_place`
/// to keep other tasks (command reception included) moving. Needs the
/// multi-threaded runtime.
pub fn drive_cycle<S: CommandSource, A: WheelActuator>(drive: &mut DriveBase<S, A>) -> WheelTelemetry {
    tokio::task::block_in_place(|| drive.update_velocity());
    WheelTelemetry {
        mode: drive.mode(),
        targets: drive.targets(),
        faulted: drive.faulted_wheels(),
    }
}

pub async fn run(config: RuntimeConfig) -> Result<(), Error> {
    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;

    info!("Setting up publishers and subscribers...");
    let subscriber = session
        .declare_subscriber(config.topics.command.as_str())
        .await?;
    let pub_wheels = session
        .declare_publisher(config.topics.wheels.as_str())
        .await?;
    let pub_health = session
        .declare_publisher(config.topics.health.as_str())
        .await?;

    let wheels = if config.motor.enabled {
        motor::servo_wheels(&config.motor)?
    } else {
        warn!("Motor control disabled, wheels are simulated");
        motor::sim_wheels()
    };

    let (feed, source) = command_channel();
    let reception = tokio::spawn(receive_commands(subscriber, feed));

    let mut drive = DriveBase::new(source, wheels, config.drive.params());
    let mut tick = interval(config.loop_period());
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!(
        "Runtime started: {}Hz loop, {}ms watchdog timeout",
        config.loop_hz, config.drive.stale_command_ms
    );
    info!("Subscribed to: {}", config.topics.command);
    info!(
        "Publishing to: {}, {}",
        config.topics.wheels, config.topics.health
    );

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = tick.tick() => {}
            _ = &mut shutdown => {
                info!("Shutdown requested");
                break;
            }
        }

        // 1. One drive cycle (includes watchdog logic)
        let telemetry = drive_cycle(&mut drive);

        // 2. Publish wheel targets
        publish_json(&pub_wheels, &telemetry).await;

        // 3. Publish health
        publish_json(&pub_health, &drive.health()).await;
    }

    info!("Stopping all wheels");
    drive.stop();
    reception.abort();
    Ok(())
}
