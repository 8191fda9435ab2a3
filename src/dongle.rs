//! The dongle session: USB discovery/reset/capability query, network and
//! channel allocation, frame composition, and the reader/dispatcher thread
//! pair that drives every configured channel.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::channel::{ChannelConfig, ChannelInterface, ChannelRuntime, ChannelStatus};
use crate::config::{
    CHANNEL_CLOSE_TIMEOUT, CHANNEL_CONFIG_TIMEOUT, NETWORK_KEY_TIMEOUT, RESET_SETTLE_TIME,
};
use crate::deframer::Deframer;
use crate::error::AntError;
use crate::frame::{self, Frame};
use crate::network::NetworkTable;
use crate::protocol::{
    MSG_ASSIGN_CHANNEL, MSG_CAPABILITIES, MSG_CHANNEL_ID, MSG_CHANNEL_RESPONSE,
    MSG_CLOSE_CHANNEL, MSG_OPEN_CHANNEL, MSG_REQUEST_MESSAGE, MSG_RESET_SYSTEM,
    MSG_SET_CHANNEL_FREQUENCY, MSG_SET_CHANNEL_PERIOD, MSG_SET_CHANNEL_SEARCH_TIMEOUT,
    MSG_SET_CHANNEL_TX_POWER, MSG_SET_NETWORK_KEY, MSG_STARTUP, MSG_UNASSIGN_CHANNEL,
    MSG_ANT_VERSION, DEFAULT_CHANNEL_PERIOD, DEFAULT_RF_FREQUENCY, DEFAULT_TRANSMIT_POWER,
    EVENT_CHANNEL_CLOSED, RESPONSE_NO_ERROR,
};
use crate::usb::AntUsb;

/// Cause recorded from the `StartupMessage` reset-type bit field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResetCause {
    PowerOn,
    Command,
    Other(String),
}

impl ResetCause {
    fn decode(byte: u8) -> Self {
        if byte == 0 {
            ResetCause::PowerOn
        } else if byte & 0x20 != 0 {
            ResetCause::Command
        } else {
            ResetCause::Other(format!("{:08b}", byte))
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct Capabilities {
    pub max_channels: u8,
    pub max_networks: u8,
    pub ant_version: String,
}

type ChannelTable = HashMap<u8, Box<dyn ChannelInterface + Send>>;

/// A live ANT dongle session. See spec §4.3 for the lifecycle:
/// `startup() -> calibrate() -> [configure_channel]* -> [I/O]* -> release()`.
pub struct DongleSession {
    usb: Arc<AntUsb>,
    capabilities: Capabilities,
    pub last_reset_type: ResetCause,
    network_table: Mutex<NetworkTable>,
    network_synced: Mutex<HashSet<u8>>,
    channels: Arc<(Mutex<ChannelTable>, Condvar)>,
    network_flag: Arc<(Mutex<bool>, Condvar)>,
    write_lock: Arc<Mutex<()>>,
    deframer: Arc<Mutex<Deframer>>,
    reader_active: Arc<AtomicBool>,
    dispatcher_active: Arc<AtomicBool>,
    reader_handle: Mutex<Option<JoinHandle<()>>>,
    dispatcher_handle: Mutex<Option<JoinHandle<()>>>,
}

impl DongleSession {
    /// Find the USB device, reset it, and calibrate against its reported
    /// capabilities. Does not yet start the reader/dispatcher threads — call
    /// `start_threads()` once `configure_channel` calls are ready to begin
    /// (spec §4.3: the dispatcher may start any time after this synchronous
    /// setup, so long as writer serialization is preserved).
    pub fn startup() -> Result<Self, AntError> {
        let (usb, mut deframer, last_reset_type) = match Self::open_and_reset() {
            Ok(result) => result,
            Err(_) => Self::open_and_reset()?, // retry once on a transient USB hiccup
        };

        let capabilities = calibrate(&usb, &mut deframer)?;
        let network_table = NetworkTable::new(capabilities.max_networks as usize);

        Ok(Self {
            usb: Arc::new(usb),
            capabilities,
            last_reset_type,
            network_table: Mutex::new(network_table),
            network_synced: Mutex::new(HashSet::new()),
            channels: Arc::new((Mutex::new(HashMap::new()), Condvar::new())),
            network_flag: Arc::new((Mutex::new(false), Condvar::new())),
            write_lock: Arc::new(Mutex::new(())),
            deframer: Arc::new(Mutex::new(deframer)),
            reader_active: Arc::new(AtomicBool::new(false)),
            dispatcher_active: Arc::new(AtomicBool::new(false)),
            reader_handle: Mutex::new(None),
            dispatcher_handle: Mutex::new(None),
        })
    }

    fn open_and_reset() -> Result<(AntUsb, Deframer, ResetCause), AntError> {
        let usb = AntUsb::open()?;

        let reset_frame = frame::compose(MSG_RESET_SYSTEM, &[0x00])?;
        usb.write_frame(&reset_frame)?;
        std::thread::sleep(RESET_SETTLE_TIME);

        let mut deframer = Deframer::new();
        let last_reset_type = read_message_direct(&usb, &mut deframer, MSG_STARTUP, Duration::from_secs(2))
            .map(|payload| ResetCause::decode(payload.first().copied().unwrap_or(0)))
            .unwrap_or(ResetCause::Other("no startup message observed".into()));

        Ok((usb, deframer, last_reset_type))
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    pub fn cycplus(&self) -> bool {
        self.usb.cycplus
    }

    /// Start the reader and dispatcher threads. Idempotent.
    pub fn start_threads(&self) {
        if self.reader_active.swap(true, Ordering::SeqCst) {
            return;
        }
        self.dispatcher_active.store(true, Ordering::SeqCst);

        let usb = Arc::clone(&self.usb);
        let reader_active = Arc::clone(&self.reader_active);
        let deframer = Arc::clone(&self.deframer);
        let reader = std::thread::spawn(move || {
            while reader_active.load(Ordering::SeqCst) {
                match usb.read_chunk() {
                    Ok(bytes) if !bytes.is_empty() => {
                        deframer.lock().unwrap_or_else(|e| e.into_inner()).push_bytes(&bytes);
                    }
                    Ok(_) => {}
                    Err(_) => {} // transient USB read errors are swallowed
                }
            }
        });

        let dispatcher_active = Arc::clone(&self.dispatcher_active);
        let deframer = Arc::clone(&self.deframer);
        let channels = Arc::clone(&self.channels);
        let network_flag = Arc::clone(&self.network_flag);
        let write_lock = Arc::clone(&self.write_lock);
        let usb = Arc::clone(&self.usb);
        let dispatcher = std::thread::spawn(move || {
            dispatcher_loop(dispatcher_active, deframer, channels, network_flag, write_lock, usb);
        });

        *self.reader_handle.lock().unwrap() = Some(reader);
        *self.dispatcher_handle.lock().unwrap() = Some(dispatcher);
    }

    fn stop_threads(&self) {
        self.dispatcher_active.store(false, Ordering::SeqCst);
        if let Some(h) = self.dispatcher_handle.lock().unwrap().take() {
            let _ = h.join();
        }
        self.reader_active.store(false, Ordering::SeqCst);
        if let Some(h) = self.reader_handle.lock().unwrap().take() {
            let _ = h.join();
        }
    }

    fn write(&self, frame: &Frame) -> Result<(), AntError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let wire = frame.compose()?;
        self.usb.write_frame(&wire)
    }

    fn next_free_channel(&self, guard: &ChannelTable) -> Result<u8, AntError> {
        for n in 0..self.capabilities.max_channels {
            if !guard.contains_key(&n) {
                return Ok(n);
            }
        }
        Err(AntError::NoMoreChannels)
    }

    /// Allocate a channel and run it through the assign/id/rf/period/power/
    /// search-timeout/open sequence, per spec §4.3 table. Each step's
    /// deadline is fatal on expiry — no half-configured channel is left
    /// behind (the channel slot is freed on failure).
    pub fn configure_channel(
        &self,
        interface: Box<dyn ChannelInterface + Send>,
    ) -> Result<u8, AntError> {
        let network_slot = match interface.config().network_key {
            Some(key) => {
                let slot = self.network_table.lock().unwrap().slot_for_key(key)?;
                let needs_sync = self.network_synced.lock().unwrap().insert(slot);
                if needs_sync {
                    self.send_network_key(slot, key)?;
                }
                slot
            }
            None => 0, // public network, Bushido vendor extension
        };
        self.finish_configure_channel(interface, network_slot)
    }

    fn send_network_key(&self, slot: u8, key: u64) -> Result<(), AntError> {
        let mut payload = vec![slot];
        payload.extend_from_slice(&key.to_le_bytes());
        self.write(&Frame::new(MSG_SET_NETWORK_KEY, payload))?;

        let (lock, cvar) = &*self.network_flag;
        let mut set = lock.lock().unwrap();
        let deadline = Instant::now() + NETWORK_KEY_TIMEOUT;
        while !*set {
            let now = Instant::now();
            if now >= deadline {
                return Err(AntError::ResponseTimeout {
                    channel: 0,
                    command: MSG_SET_NETWORK_KEY,
                });
            }
            let (guard, _) = cvar.wait_timeout(set, deadline - now).unwrap();
            set = guard;
        }
        *set = false;
        Ok(())
    }

    fn finish_configure_channel(
        &self,
        mut interface: Box<dyn ChannelInterface + Send>,
        network_slot: u8,
    ) -> Result<u8, AntError> {
        let (lock, _) = &*self.channels;
        let number = {
            let mut guard = lock.lock().unwrap();
            let number = self.next_free_channel(&guard)?;
            interface.runtime_mut().number = number;
            interface.runtime_mut().network_slot = network_slot;
            guard.insert(number, interface);
            number
        };

        if let Err(e) = self.run_configure_sequence(number, network_slot) {
            let mut guard = lock.lock().unwrap();
            guard.remove(&number);
            return Err(e);
        }

        Ok(number)
    }

    fn run_configure_sequence(&self, number: u8, network_slot: u8) -> Result<(), AntError> {
        let config = self.channel_config_snapshot(number)?;

        self.write(&Frame::new(
            MSG_ASSIGN_CHANNEL,
            vec![number, config.channel_type().as_byte(), network_slot],
        ))?;
        self.wait_for_status(number, ChannelStatus::Assigned)?;

        let dn = config.device_number.to_le_bytes();
        self.write(&Frame::new(
            MSG_CHANNEL_ID,
            vec![number, dn[0], dn[1], config.device_type_id, config.transmission_type],
        ))?;
        self.wait_for_action(number, MSG_CHANNEL_ID)?;

        if config.rf_frequency != DEFAULT_RF_FREQUENCY {
            self.write(&Frame::new(
                MSG_SET_CHANNEL_FREQUENCY,
                vec![number, config.rf_frequency],
            ))?;
            self.wait_for_action(number, MSG_SET_CHANNEL_FREQUENCY)?;
        }

        if config.channel_period != DEFAULT_CHANNEL_PERIOD {
            let period = config.channel_period.to_le_bytes();
            self.write(&Frame::new(
                MSG_SET_CHANNEL_PERIOD,
                vec![number, period[0], period[1]],
            ))?;
            self.wait_for_action(number, MSG_SET_CHANNEL_PERIOD)?;
        }

        if config.transmit_power != DEFAULT_TRANSMIT_POWER {
            self.write(&Frame::new(
                MSG_SET_CHANNEL_TX_POWER,
                vec![number, config.transmit_power],
            ))?;
            self.wait_for_action(number, MSG_SET_CHANNEL_TX_POWER)?;
        }

        if !config.master {
            self.write(&Frame::new(
                MSG_SET_CHANNEL_SEARCH_TIMEOUT,
                vec![number, config.search_timeout],
            ))?;
            self.wait_for_action(number, MSG_SET_CHANNEL_SEARCH_TIMEOUT)?;
        }

        self.write(&Frame::new(MSG_OPEN_CHANNEL, vec![number]))?;
        self.wait_for_status(number, ChannelStatus::Open)?;

        Ok(())
    }

    fn channel_config_snapshot(&self, number: u8) -> Result<ChannelConfig, AntError> {
        let (lock, _) = &*self.channels;
        let guard = lock.lock().unwrap();
        guard
            .get(&number)
            .map(|i| i.config().clone())
            .ok_or(AntError::NoMoreChannels)
    }

    fn wait_for_status(&self, channel: u8, target: ChannelStatus) -> Result<(), AntError> {
        self.wait_for(channel, CHANNEL_CONFIG_TIMEOUT, |rt| rt.status == target)
    }

    fn wait_for_action(&self, channel: u8, action: u8) -> Result<(), AntError> {
        self.wait_for(channel, CHANNEL_CONFIG_TIMEOUT, |rt| {
            rt.last_action == Some(action)
        })
    }

    fn wait_for<F>(&self, channel: u8, timeout: Duration, predicate: F) -> Result<(), AntError>
    where
        F: Fn(&ChannelRuntime) -> bool,
    {
        let (lock, cvar) = &*self.channels;
        let mut guard = lock.lock().unwrap();
        let deadline = Instant::now() + timeout;
        loop {
            match guard.get(&channel) {
                Some(iface) if predicate(iface.runtime()) => return Ok(()),
                Some(_) => {}
                None => {
                    return Err(AntError::ResponseTimeout {
                        channel,
                        command: 0,
                    })
                }
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(AntError::ResponseTimeout { channel, command: 0 });
            }
            let (g, _) = cvar.wait_timeout(guard, deadline - now).unwrap();
            guard = g;
        }
    }

    /// Close then unassign a channel while the dispatcher thread is running
    /// (uses the condvar-signalled status waits).
    pub fn close_and_unassign(&self, channel: u8) -> Result<(), AntError> {
        self.write(&Frame::new(MSG_CLOSE_CHANNEL, vec![channel]))?;
        self.wait_for(channel, CHANNEL_CLOSE_TIMEOUT, |rt| {
            rt.status == ChannelStatus::Closed
        })?;
        self.write(&Frame::new(MSG_UNASSIGN_CHANNEL, vec![channel]))?;
        self.wait_for_status(channel, ChannelStatus::Unassigned)?;

        let (lock, _) = &*self.channels;
        let mut guard = lock.lock().unwrap();
        if let Some(iface) = guard.remove(&channel) {
            let slot = iface.runtime().network_slot;
            self.network_table.lock().unwrap().free_slot(slot);
            self.network_synced.lock().unwrap().remove(&slot);
        }
        Ok(())
    }

    /// Tear down every live channel, reset the dongle (unless it's a CYCPLUS
    /// unit that misbehaves when reset while it owns open channels) and
    /// release the USB interface. Per spec §5, channel teardown here is
    /// strictly sequenced after the dispatcher thread stops, so it reads
    /// responses directly rather than relying on condvar signalling.
    pub fn release(&self) -> Result<(), AntError> {
        let live_channels: Vec<u8> = {
            let (lock, _) = &*self.channels;
            lock.lock().unwrap().keys().copied().collect()
        };

        self.stop_threads();

        let mut deframer = Deframer::new();
        for channel in live_channels {
            let _ = close_and_unassign_direct(&self.usb, &mut deframer, channel);
        }

        if !self.usb.cycplus {
            let reset_frame = frame::compose(MSG_RESET_SYSTEM, &[0x00])?;
            self.usb.write_frame(&reset_frame)?;
            std::thread::sleep(RESET_SETTLE_TIME);
        }

        self.usb.release_interfaces();
        Ok(())
    }
}

fn calibrate(usb: &AntUsb, deframer: &mut Deframer) -> Result<Capabilities, AntError> {
    usb.write_frame(&frame::compose(MSG_REQUEST_MESSAGE, &[0, MSG_CAPABILITIES])?)?;
    let caps_payload = read_message_direct(usb, deframer, MSG_CAPABILITIES, Duration::from_secs(2))
        .unwrap_or_default();

    usb.write_frame(&frame::compose(MSG_REQUEST_MESSAGE, &[0, MSG_ANT_VERSION])?)?;
    let version_payload = read_message_direct(usb, deframer, MSG_ANT_VERSION, Duration::from_secs(2))
        .unwrap_or_default();

    Ok(Capabilities {
        max_channels: caps_payload.first().copied().unwrap_or(8),
        max_networks: caps_payload.get(1).copied().unwrap_or(3),
        ant_version: String::from_utf8_lossy(&version_payload)
            .trim_end_matches('\0')
            .to_string(),
    })
}

/// Read directly from USB (bypassing the dispatcher) until a message with
/// `expected_id` is seen or `timeout` elapses. Used before the reader/
/// dispatcher threads are running (startup/calibrate) and during
/// teardown (release), matching spec §4.3's single-writer/ordering notes.
fn read_message_direct(
    usb: &AntUsb,
    deframer: &mut Deframer,
    expected_id: u8,
    timeout: Duration,
) -> Option<Vec<u8>> {
    let deadline = Instant::now() + timeout;
    loop {
        match deframer.next_frame() {
            Ok(raw) => {
                if let Ok(decoded) = frame::decompose(&raw) {
                    if decoded.id == expected_id {
                        return Some(decoded.payload);
                    }
                }
                continue;
            }
            Err(AntError::NoFrameYet) => {
                if Instant::now() >= deadline {
                    return None;
                }
                if let Ok(bytes) = usb.read_chunk() {
                    if !bytes.is_empty() {
                        deframer.push_bytes(&bytes);
                    }
                }
            }
            Err(_) => continue,
        }
    }
}

fn close_and_unassign_direct(
    usb: &AntUsb,
    deframer: &mut Deframer,
    channel: u8,
) -> Result<(), AntError> {
    usb.write_frame(&frame::compose(MSG_CLOSE_CHANNEL, &[channel])?)?;
    wait_for_channel_response_direct(usb, deframer, channel, MSG_CLOSE_CHANNEL, Some(EVENT_CHANNEL_CLOSED))?;
    usb.write_frame(&frame::compose(MSG_UNASSIGN_CHANNEL, &[channel])?)?;
    wait_for_channel_response_direct(usb, deframer, channel, MSG_UNASSIGN_CHANNEL, None)?;
    Ok(())
}

fn wait_for_channel_response_direct(
    usb: &AntUsb,
    deframer: &mut Deframer,
    channel: u8,
    command: u8,
    event_code: Option<u8>,
) -> Result<(), AntError> {
    let deadline = Instant::now() + CHANNEL_CLOSE_TIMEOUT;
    loop {
        match deframer.next_frame() {
            Ok(raw) => {
                if let Ok(decoded) = frame::decompose(&raw) {
                    if decoded.id == MSG_CHANNEL_RESPONSE
                        && decoded.payload.len() >= 3
                        && decoded.payload[0] == channel
                    {
                        let code = decoded.payload[2];
                        let matches = match event_code {
                            Some(expected) => code == expected,
                            None => decoded.payload[1] == command && code == RESPONSE_NO_ERROR,
                        };
                        if matches {
                            return Ok(());
                        }
                    }
                }
                continue;
            }
            Err(AntError::NoFrameYet) => {
                if Instant::now() >= deadline {
                    return Err(AntError::ResponseTimeout { channel, command });
                }
                if let Ok(bytes) = usb.read_chunk() {
                    if !bytes.is_empty() {
                        deframer.push_bytes(&bytes);
                    }
                }
            }
            Err(_) => continue,
        }
    }
}

fn dispatcher_loop(
    active: Arc<AtomicBool>,
    deframer: Arc<Mutex<Deframer>>,
    channels: Arc<(Mutex<ChannelTable>, Condvar)>,
    network_flag: Arc<(Mutex<bool>, Condvar)>,
    write_lock: Arc<Mutex<()>>,
    usb: Arc<AntUsb>,
) {
    while active.load(Ordering::SeqCst) {
        let raw = {
            let mut guard = deframer.lock().unwrap_or_else(|e| e.into_inner());
            guard.next_frame()
        };
        let raw = match raw {
            Ok(raw) => raw,
            Err(AntError::NoFrameYet) => {
                std::thread::sleep(Duration::from_millis(5));
                continue;
            }
            Err(e) => {
                log::warn!("deframer error: {}", e);
                continue;
            }
        };

        let decoded = match frame::decompose(&raw) {
            Ok(f) => f,
            Err(e) => {
                log::warn!("dropping invalid frame: {}", e);
                continue;
            }
        };

        if decoded.id == MSG_CHANNEL_RESPONSE
            && decoded.payload.len() >= 3
            && decoded.payload[0] == 0
            && decoded.payload[1] == MSG_SET_NETWORK_KEY
            && decoded.payload[2] == RESPONSE_NO_ERROR
        {
            let (lock, cvar) = &*network_flag;
            *lock.lock().unwrap() = true;
            cvar.notify_all();
            continue;
        }

        let Some(channel) = decoded.channel() else {
            continue;
        };

        let (lock, cvar) = &*channels;
        let outgoing = {
            let mut guard = lock.lock().unwrap();
            let Some(iface) = guard.get_mut(&channel) else {
                log::warn!("frame for unconfigured channel {}", channel);
                continue;
            };
            let result = crate::channel::handle_message(iface.as_mut(), &decoded);
            cvar.notify_all();
            match result {
                Ok(frames) => frames,
                Err(AntError::UnknownMessageId(id)) => {
                    log::warn!("channel {} unknown message id {:#x}", channel, id);
                    None
                }
                Err(AntError::WrongChannel { expected, found }) => {
                    log::warn!(
                        "frame for channel {} delivered as channel {}",
                        expected,
                        found
                    );
                    None
                }
                Err(e) => {
                    log::warn!("channel {} dispatch error: {}", channel, e);
                    None
                }
            }
        };

        if let Some(frames) = outgoing {
            let _guard = write_lock.lock().unwrap_or_else(|e| e.into_inner());
            for frame in frames {
                if let Ok(wire) = frame.compose() {
                    let _ = usb.write_frame(&wire);
                }
            }
        }
    }
}
