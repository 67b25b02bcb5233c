// Rover teleop over zenoh
//
// Holds a body command built from the keyboard and republishes it as a
// `CommandFrame` every 20 ms. Releasing the drive keys lets the command decay
// to zero, and closing this tool lets the runtime's watchdog stop the rover.
//
//   W / S   forward / reverse
//   A / D   turn left (CCW) / right (CW)
//   R / F   gear up / down
//   Q, Esc  quit
//
// Usage: cargo run --example cmd_publisher

use std::time::{Duration, Instant};

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use rover_drive_runtime::config::TOPIC_CMD_DRIVE;
use rover_drive_runtime::messages::CommandFrame;
use tracing::info;

type Error = Box<dyn std::error::Error + Send + Sync>;

/// (name, forward m/s, turn rad/s)
const GEARS: [(&str, f32, f32); 3] = [("low", 0.1, 0.3), ("mid", 0.3, 0.8), ("high", 0.6, 1.5)];
const PUBLISH_PERIOD: Duration = Duration::from_millis(20);
const HOLD_TIME: Duration = Duration::from_millis(100);

struct Teleop {
    gear: usize,
    frame: CommandFrame,
    last_drive_key: Instant,
}

impl Teleop {
    fn new() -> Self {
        Self {
            gear: 0,
            frame: CommandFrame {
                forward_vel: 0.0,
                turn_rate: 0.0,
            },
            last_drive_key: Instant::now(),
        }
    }

    /// Apply one key; `false` means quit
    fn handle(&mut self, code: KeyCode) -> bool {
        let (_, speed, turn) = GEARS[self.gear];
        match code {
            KeyCode::Char('w') => self.drive(Some(speed), None),
            KeyCode::Char('s') => self.drive(Some(-speed), None),
            KeyCode::Char('a') => self.drive(None, Some(turn)),
            KeyCode::Char('d') => self.drive(None, Some(-turn)),
            KeyCode::Char('r') => self.shift(self.gear + 1),
            KeyCode::Char('f') => self.shift(self.gear.saturating_sub(1)),
            KeyCode::Char('q') | KeyCode::Esc => return false,
            _ => {}
        }
        true
    }

    fn drive(&mut self, forward: Option<f32>, turn: Option<f32>) {
        if let Some(v) = forward {
            self.frame.forward_vel = v;
        }
        if let Some(w) = turn {
            self.frame.turn_rate = w;
        }
        self.last_drive_key = Instant::now();
    }

    fn shift(&mut self, gear: usize) {
        self.gear = gear.min(GEARS.len() - 1);
        info!("Gear: {}", GEARS[self.gear].0);
    }

    /// Frame to publish now
    fn frame(&mut self) -> CommandFrame {
        if self.last_drive_key.elapsed() > HOLD_TIME {
            self.frame.forward_vel = 0.0;
            self.frame.turn_rate = 0.0;
        }
        self.frame
    }
}

async fn teleop_loop(publisher: &zenoh::pubsub::Publisher<'_>) -> Result<(), Error> {
    let mut teleop = Teleop::new();
    loop {
        if event::poll(PUBLISH_PERIOD)? {
            if let Event::Key(KeyEvent { code, kind, .. }) = event::read()? {
                if kind != KeyEventKind::Release && !teleop.handle(code) {
                    break;
                }
            }
        }
        publisher.put(serde_json::to_string(&teleop.frame())?).await?;
    }

    // Explicit stop on exit
    teleop.drive(Some(0.0), Some(0.0));
    publisher.put(serde_json::to_string(&teleop.frame())?).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let session = zenoh::open(zenoh::Config::default()).await?;
    let publisher = session.declare_publisher(TOPIC_CMD_DRIVE).await?;
    info!("Publishing drive commands on {}", TOPIC_CMD_DRIVE);
    info!("Gear: {}", GEARS[0].0);

    enable_raw_mode()?;
    let result = teleop_loop(&publisher).await;
    disable_raw_mode()?;
    result
}
