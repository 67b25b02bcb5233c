// Bus-backed command source
//
// The reception task owns a `CommandFeed` and publishes every decoded frame into
// a watch channel. The control loop holds a `BusCommandSource` and copies the
// latest value out under the channel's read guard, so it always observes one
// whole frame and never blocks on the reception side for longer than that copy.

use std::time::Instant;

use tokio::sync::watch;
use tracing::{debug, warn};

use crate::drive::CommandSource;
use crate::messages::{CommandFrame, VelocityCommand};

/// Writer half, owned by the reception task
#[derive(Debug)]
pub struct CommandFeed {
    tx: watch::Sender<Option<VelocityCommand>>,
}

/// Reader half, handed to the drive base
#[derive(Debug, Clone)]
pub struct BusCommandSource {
    rx: watch::Receiver<Option<VelocityCommand>>,
}

/// Create a connected feed/source pair with no command yet
pub fn command_channel() -> (CommandFeed, BusCommandSource) {
    let (tx, rx) = watch::channel(None);
    (CommandFeed { tx }, BusCommandSource { rx })
}

impl CommandFeed {
    /// Stamp a frame with its arrival time and make it the latest command
    pub fn publish(&self, frame: CommandFrame) {
        self.publish_at(frame, Instant::now());
    }

    pub fn publish_at(&self, frame: CommandFrame, received_at: Instant) {
        debug!("Received command: {:?}", frame);
        // send_replace stores the value even when every reader is gone
        self.tx
            .send_replace(Some(VelocityCommand::from_frame(frame, received_at)));
    }

    /// Decode a raw bus payload and publish it
    ///
    /// Undecodable payloads are dropped; the previous command keeps ageing.
    pub fn publish_payload(&self, payload: &[u8]) -> bool {
        match serde_json::from_slice::<CommandFrame>(payload) {
            Ok(frame) => {
                self.publish(frame);
                true
            }
            Err(e) => {
                warn!("Failed to parse command: {}", e);
                false
            }
        }
    }
}

impl CommandSource for BusCommandSource {
    fn latest(&self) -> Option<VelocityCommand> {
        *self.rx.borrow()
    }
}
