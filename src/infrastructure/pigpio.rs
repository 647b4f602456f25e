//! Client for the pigpio daemon's TCP socket interface.
//!
//! The daemon exposes GPIO over two byte protocols: 16-byte command frames
//! (cmd, p1, p2, p3 as little-endian u32, response echoing the first three
//! words with the result in the fourth) and, once a notification handle is
//! opened with NOIB, a stream of 12-byte gpio reports (seqno, flags, tick,
//! level). One command socket is shared by all hoppers; a second socket
//! carries the report stream, which a reader task fans out per sensor pin.

use crate::domain::hardware::{
    Edge, EdgeEvent, HardwareBackend, HardwareConnection, HopperLink, HopperPins, MotorSwitch,
};
use crate::error::{ChangeError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, warn};

const CMD_MODES: u32 = 0;
const CMD_PUD: u32 = 2;
const CMD_WRITE: u32 = 4;
const CMD_NB: u32 = 19;
const CMD_NOIB: u32 = 99;

const MODE_INPUT: u32 = 0;
const MODE_OUTPUT: u32 = 1;
const PUD_UP: u32 = 2;

/// Reports with any flag bit set are watchdogs/keepalives, not samples.
const REPORT_LEN: usize = 12;

/// Connects to a pigpiod instance, usually on the default port of the
/// local daemon.
pub struct PigpioBackend {
    addr: String,
}

impl PigpioBackend {
    pub const DEFAULT_ADDR: &'static str = "127.0.0.1:8888";

    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }
}

impl Default for PigpioBackend {
    fn default() -> Self {
        Self::new(Self::DEFAULT_ADDR)
    }
}

#[async_trait]
impl HardwareBackend for PigpioBackend {
    async fn connect(&self) -> Result<Arc<dyn HardwareConnection>> {
        let connection = PigpioConnection::open(&self.addr).await?;
        Ok(Arc::new(connection))
    }
}

struct Watch {
    mask: u32,
    senders: HashMap<u8, mpsc::UnboundedSender<EdgeEvent>>,
}

struct PigpioShared {
    command: tokio::sync::Mutex<TcpStream>,
    watch: Mutex<Watch>,
    notify_handle: u32,
    alive: AtomicBool,
}

impl PigpioShared {
    /// Sends one command frame and returns the daemon's result word.
    async fn command(&self, cmd: u32, p1: u32, p2: u32) -> Result<i32> {
        let mut stream = self.command.lock().await;
        let result = exchange(&mut stream, cmd, p1, p2).await;
        // A transport failure means the daemon is gone; a negative status
        // is just a rejected command on a healthy socket.
        if matches!(result, Err(ChangeError::Io(_))) {
            self.alive.store(false, Ordering::SeqCst);
        }
        result
    }
}

/// One command frame and its response, on any pigpiod socket.
async fn exchange(stream: &mut TcpStream, cmd: u32, p1: u32, p2: u32) -> Result<i32> {
    let mut frame = [0u8; 16];
    frame[0..4].copy_from_slice(&cmd.to_le_bytes());
    frame[4..8].copy_from_slice(&p1.to_le_bytes());
    frame[8..12].copy_from_slice(&p2.to_le_bytes());
    stream.write_all(&frame).await?;

    let mut response = [0u8; 16];
    stream.read_exact(&mut response).await?;
    let res = i32::from_le_bytes(response[12..16].try_into().expect("4-byte slice"));
    if res < 0 {
        return Err(ChangeError::Hardware(format!(
            "pigpio command {cmd} failed with status {res}"
        )));
    }
    Ok(res)
}

/// A live connection to the daemon, shared by all hoppers in the process.
pub struct PigpioConnection {
    shared: Arc<PigpioShared>,
}

impl PigpioConnection {
    pub async fn open(addr: &str) -> Result<Self> {
        let command = TcpStream::connect(addr)
            .await
            .map_err(|_| ChangeError::DaemonUnavailable(addr.to_string()))?;
        let mut notify = TcpStream::connect(addr)
            .await
            .map_err(|_| ChangeError::DaemonUnavailable(addr.to_string()))?;

        // NOIB turns this second socket into the report stream; the result
        // is the notification handle used for NB mask updates.
        let notify_handle = exchange(&mut notify, CMD_NOIB, 0, 0).await? as u32;
        debug!(addr, notify_handle, "connected to pigpio daemon");

        let shared = Arc::new(PigpioShared {
            command: tokio::sync::Mutex::new(command),
            watch: Mutex::new(Watch {
                mask: 0,
                senders: HashMap::new(),
            }),
            notify_handle,
            alive: AtomicBool::new(true),
        });

        tokio::spawn(read_reports(notify, Arc::clone(&shared)));
        Ok(Self { shared })
    }
}

#[async_trait]
impl HardwareConnection for PigpioConnection {
    async fn bind_hopper(&self, pins: HopperPins) -> Result<HopperLink> {
        if pins.sensor_pin >= 32 {
            return Err(ChangeError::Hardware(format!(
                "sensor pin {} outside the notifiable bank",
                pins.sensor_pin
            )));
        }

        let shared = &self.shared;
        shared
            .command(CMD_MODES, pins.sensor_pin as u32, MODE_INPUT)
            .await?;
        shared.command(CMD_PUD, pins.sensor_pin as u32, PUD_UP).await?;
        shared
            .command(CMD_MODES, pins.enable_pin as u32, MODE_OUTPUT)
            .await?;
        // Park the motor at the inactive level before anything else runs.
        let inactive = if pins.enable_active_low { 1 } else { 0 };
        shared
            .command(CMD_WRITE, pins.enable_pin as u32, inactive)
            .await?;

        let (tx, rx) = mpsc::unbounded_channel();
        let mask = {
            let mut watch = shared.watch.lock().expect("watch lock");
            watch.senders.insert(pins.sensor_pin, tx);
            watch.mask |= 1 << pins.sensor_pin;
            watch.mask
        };
        shared.command(CMD_NB, shared.notify_handle, mask).await?;
        debug!(
            sensor = pins.sensor_pin,
            enable = pins.enable_pin,
            mask = format_args!("{mask:#010x}"),
            "hopper lines configured"
        );

        Ok(HopperLink {
            motor: Box::new(PigpioMotor {
                shared: Arc::clone(shared),
                pin: pins.enable_pin,
                active_low: pins.enable_active_low,
            }),
            edges: rx,
        })
    }

    fn is_alive(&self) -> bool {
        self.shared.alive.load(Ordering::SeqCst)
    }
}

struct PigpioMotor {
    shared: Arc<PigpioShared>,
    pin: u8,
    active_low: bool,
}

#[async_trait]
impl MotorSwitch for PigpioMotor {
    async fn set_enabled(&self, enabled: bool) -> Result<()> {
        let level = u32::from(enabled != self.active_low);
        self.shared.command(CMD_WRITE, self.pin as u32, level).await?;
        Ok(())
    }
}

/// Consumes the report stream and fans edges out to the sensor channels.
///
/// Level words cover bank 1 (gpio 0-31); the first sample only seeds the
/// baseline so reconnects do not produce phantom edges.
async fn read_reports(mut stream: TcpStream, shared: Arc<PigpioShared>) {
    let mut buf = [0u8; REPORT_LEN];
    let mut last_level: Option<u32> = None;

    loop {
        if let Err(e) = stream.read_exact(&mut buf).await {
            warn!(error = %e, "pigpio report stream closed");
            break;
        }
        let flags = u16::from_le_bytes(buf[2..4].try_into().expect("2-byte slice"));
        let tick = u32::from_le_bytes(buf[4..8].try_into().expect("4-byte slice"));
        let level = u32::from_le_bytes(buf[8..12].try_into().expect("4-byte slice"));
        if flags != 0 {
            continue;
        }

        let Some(previous) = last_level.replace(level) else {
            continue;
        };
        let changed = level ^ previous;
        if changed == 0 {
            continue;
        }

        let watch = shared.watch.lock().expect("watch lock");
        for (&pin, sender) in &watch.senders {
            let bit = 1u32 << pin;
            if changed & bit != 0 {
                let edge = if level & bit != 0 {
                    Edge::Rising
                } else {
                    Edge::Falling
                };
                let _ = sender.send(EdgeEvent::new(edge, tick));
            }
        }
    }

    shared.alive.store(false, Ordering::SeqCst);
    // Dropping the senders closes every edge channel, which actuators see
    // as a fault on their next receive.
    shared.watch.lock().expect("watch lock").senders.clear();
}
