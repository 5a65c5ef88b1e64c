use std::collections::VecDeque;
use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::time::{Duration, Instant as HostInstant};

use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use relay_core::NodeConfig;
use relay_core::channel::{BYTE_CHANNEL_CAPACITY, ByteChannel};
use relay_core::console::{self, ConsoleCommand, ConsoleError};
use relay_core::dispatch::{Command, CommandDispatcher};
use relay_core::frame::{Frame, FrameDecoder, FrameReader, FrameWriter};
use relay_core::relay::{ALARM_LINE, Direction, LOWER_LINE, RAISE_LINE, TimingModeCell};
use relay_core::sampling::ChannelId;
use relay_core::storage::{CounterBank, StorageFault};
use relay_core::telemetry::{TelemetryEventKind, TelemetryRecord};
use relay_core::transport::{InterruptDriver, PollingDriver, SerialPort, TransportMode};

use crate::node::{NodeStorage, SimulatedNode};

type NodeChannel = ByteChannel<NoopRawMutex, BYTE_CHANNEL_CAPACITY>;

/// Largest number of ticks a single `run` may request.
const MAX_RUN_TICKS: u32 = 1_000_000;

/// Serial line between the console (host side) and the simulated node.
#[derive(Default)]
pub struct LoopbackPort {
    to_node: VecDeque<u8>,
    to_host: VecDeque<u8>,
}

impl LoopbackPort {
    fn send_from_host(&mut self, bytes: &[u8]) {
        self.to_node.extend(bytes);
    }

    fn take_host_bytes(&mut self) -> Vec<u8> {
        self.to_host.drain(..).collect()
    }
}

impl SerialPort for LoopbackPort {
    fn read_byte(&mut self) -> Option<u8> {
        self.to_node.pop_front()
    }

    fn transmit_ready(&self) -> bool {
        true
    }

    fn write_byte(&mut self, byte: u8) {
        self.to_host.push_back(byte);
    }
}

/// The node side of the serial link, serviced either way.
enum Transport {
    Interrupt {
        driver: InterruptDriver<'static, NoopRawMutex, BYTE_CHANNEL_CAPACITY>,
        port: LoopbackPort,
    },
    Polling(PollingDriver<'static, LoopbackPort, NoopRawMutex, BYTE_CHANNEL_CAPACITY>),
}

impl Transport {
    fn new(mode: TransportMode, rx: &'static NodeChannel, tx: &'static NodeChannel) -> Self {
        let producer = rx.take_producer().expect("fresh rx channel");
        let consumer = tx.take_consumer().expect("fresh tx channel");
        match mode {
            TransportMode::Interrupt => Transport::Interrupt {
                driver: InterruptDriver::new(producer, consumer),
                port: LoopbackPort::default(),
            },
            TransportMode::Polling => {
                Transport::Polling(PollingDriver::new(LoopbackPort::default(), producer, consumer))
            }
        }
    }

    fn port_mut(&mut self) -> &mut LoopbackPort {
        match self {
            Transport::Interrupt { port, .. } => port,
            Transport::Polling(driver) => driver.port_mut(),
        }
    }

    /// Raises receive interrupts for pending host bytes.
    fn receive(&mut self) {
        match self {
            Transport::Interrupt { driver, port } => {
                while let Some(byte) = port.read_byte() {
                    driver.on_byte_received(byte);
                }
            }
            Transport::Polling(driver) => {
                driver.drain();
            }
        }
    }

    /// Raises transmit-ready interrupts until the node's queue is empty.
    fn transmit(&mut self) {
        match self {
            Transport::Interrupt { driver, port } => {
                while port.transmit_ready() && driver.on_transmit_ready(port) {}
            }
            Transport::Polling(driver) => {
                driver.drain();
            }
        }
    }
}

pub struct Session {
    config: NodeConfig,
    mode: &'static TimingModeCell,
    dispatcher: CommandDispatcher<'static>,
    transport: Transport,
    reader: FrameReader<'static, NoopRawMutex, BYTE_CHANNEL_CAPACITY>,
    writer: FrameWriter<'static, NoopRawMutex, BYTE_CHANNEL_CAPACITY>,
    host_decoder: FrameDecoder,
    node: SimulatedNode,
    desync_reported: u32,
    transcript: Option<TranscriptLogger>,
    started_at: HostInstant,
}

impl Session {
    pub fn new(config: NodeConfig, transcript: Option<&Path>) -> io::Result<Self> {
        // Leaked once per session so the endpoints can borrow them for 'static.
        let rx: &'static NodeChannel = Box::leak(Box::new(NodeChannel::new()));
        let tx: &'static NodeChannel = Box::leak(Box::new(NodeChannel::new()));
        let mode: &'static TimingModeCell = Box::leak(Box::new(TimingModeCell::default()));

        let transcript = transcript.map(TranscriptLogger::new).transpose()?;

        Ok(Self {
            config,
            mode,
            dispatcher: CommandDispatcher::new(mode.take_writer().expect("fresh mode cell")),
            transport: Transport::new(config.transport, rx, tx),
            reader: FrameReader::new(rx.take_consumer().expect("fresh rx channel")),
            writer: FrameWriter::new(tx.take_producer().expect("fresh tx channel")),
            host_decoder: FrameDecoder::new(),
            node: SimulatedNode::new(config.relay, NodeStorage::new()),
            desync_reported: 0,
            transcript,
            started_at: HostInstant::now(),
        })
    }

    /// Queues the boot announcement and returns what the host receives.
    pub fn startup(&mut self) -> io::Result<Vec<String>> {
        let mut lines = vec![format!(
            "node up: {} transport, {} baud, timing {}",
            self.config.transport,
            self.config.baud_rate,
            self.mode.get()
        )];
        for frame in self.dispatcher.startup_frames(self.node.counters()) {
            if self.writer.try_write_frame(frame).is_err() {
                lines.push("transmit queue full, startup frame dropped".to_string());
            }
        }
        self.transport.transmit();
        lines.extend(self.collect_host_frames());
        self.record_output(&lines)?;
        Ok(lines)
    }

    pub fn handle_command(&mut self, line: &str) -> io::Result<Vec<String>> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(Vec::new());
        }
        if let Some(transcript) = self.transcript.as_mut() {
            transcript.append_line(self.started_at.elapsed(), TranscriptRole::Host, trimmed)?;
        }

        let lines = match console::parse_line(trimmed) {
            Ok(command) => self.execute(command),
            Err(ConsoleError::Empty) => Vec::new(),
            Err(err) => vec![format!("ERR syntax {err}")],
        };
        self.record_output(&lines)?;
        Ok(lines)
    }

    fn execute(&mut self, command: ConsoleCommand) -> Vec<String> {
        match command {
            ConsoleCommand::Request(frame) => self.send_request(frame),
            ConsoleCommand::Set {
                channel,
                millivolts,
            } => {
                self.node.set_level(channel, millivolts);
                vec![format!("{channel} set to {}", format_volts(millivolts))]
            }
            ConsoleCommand::Run { ticks } => self.run(ticks),
            ConsoleCommand::Status => self.status(),
            ConsoleCommand::Events => self.events(),
            ConsoleCommand::Fail(fault) => {
                self.node.counters_mut().store_mut().device_mut().inject(fault);
                let label = match fault {
                    StorageFault::Erase => "erase",
                    StorageFault::Program => "program",
                };
                vec![format!("next storage {label} will fail")]
            }
            ConsoleCommand::Help => console::HELP.lines().map(str::to_string).collect(),
        }
    }

    fn send_request(&mut self, request: Frame) -> Vec<String> {
        let mut lines = vec![format!("-> {}", describe_frame(request))];

        self.transport.port_mut().send_from_host(&request.to_bytes());
        self.transport.receive();

        while let Some(frame) = self.reader.try_read_frame() {
            let before = self.mode.get();
            let dispatch = self.dispatcher.handle(frame, self.node.counters_mut());

            if self.mode.get() != before {
                self.node.note(TelemetryEventKind::ModeChanged(self.mode.get()));
            }
            if dispatch.success && frame.parameter1 == 1 {
                match dispatch.command {
                    Some(Command::Raises) => {
                        self.node.note(TelemetryEventKind::CounterReset(Direction::Raise));
                    }
                    Some(Command::Lowers) => {
                        self.node.note(TelemetryEventKind::CounterReset(Direction::Lower));
                    }
                    _ => {}
                }
            }
            if !dispatch.success && !frame.ack_requested() {
                lines.push(format!("node ignored {}", describe_frame(frame)));
            }

            for reply in dispatch.replies {
                if self.writer.try_write_frame(reply).is_err() {
                    lines.push("transmit queue full, reply dropped".to_string());
                }
            }
        }

        let dropped = self.reader.decoder().dropped_bytes();
        if dropped > self.desync_reported {
            self.node.note(TelemetryEventKind::FrameDesync {
                dropped: dropped - self.desync_reported,
            });
            self.desync_reported = dropped;
        }

        self.transport.transmit();
        lines.extend(self.collect_host_frames());
        lines
    }

    fn collect_host_frames(&mut self) -> Vec<String> {
        let bytes = self.transport.port_mut().take_host_bytes();
        bytes
            .into_iter()
            .filter_map(|byte| self.host_decoder.push(byte))
            .map(|frame| format!("<- {}", describe_frame(frame)))
            .collect()
    }

    fn run(&mut self, ticks: u32) -> Vec<String> {
        let ticks = ticks.min(MAX_RUN_TICKS);
        let events = self.node.run(ticks, self.mode.get());
        let elapsed = self.config.relay.tick_period * ticks;

        let mut lines = vec![format!(
            "ran {ticks} ticks ({}), now at tick {}",
            format_duration_short(elapsed),
            self.node.tick()
        )];
        lines.extend(events.iter().map(describe_record));
        lines
    }

    fn status(&self) -> Vec<String> {
        let rms = self.node.window_rms();
        let mut lines = vec![format!(
            "timing {}, tick {}, raises {}, lowers {}",
            self.mode.get(),
            self.node.tick(),
            self.node.counters().count(Direction::Raise),
            self.node.counters().count(Direction::Lower),
        )];
        for channel in ChannelId::ALL {
            let relay = self.node.relay(channel);
            lines.push(format!(
                "  {channel}: input {} rms {} state {:?}",
                format_volts(self.node.level(channel)),
                rms[channel.index()],
                relay.state()
            ));
        }
        let output = self.node.output();
        lines.push(format!(
            "  lines: lower {} raise {} alarm {}",
            output.level(LOWER_LINE),
            output.level(RAISE_LINE),
            output.level(ALARM_LINE)
        ));
        for direction in [Direction::Raise, Direction::Lower] {
            if !self.node.counters().is_bound(direction) {
                lines.push(format!("  {direction} counter has no storage slot"));
            }
        }
        lines
    }

    fn events(&self) -> Vec<String> {
        let telemetry = self.node.telemetry();
        if telemetry.is_empty() {
            return vec!["no events recorded".to_string()];
        }
        telemetry.oldest_first().map(describe_record).collect()
    }

    fn record_output(&mut self, lines: &[String]) -> io::Result<()> {
        let elapsed = self.started_at.elapsed();
        if let Some(transcript) = self.transcript.as_mut() {
            for line in lines {
                transcript.append_line(elapsed, TranscriptRole::Node, line)?;
            }
        }
        Ok(())
    }
}

struct TranscriptLogger {
    writer: BufWriter<std::fs::File>,
}

impl TranscriptLogger {
    fn new(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        let mut logger = Self {
            writer: BufWriter::new(file),
        };

        writeln!(logger.writer, "# Voltage relay emulator transcript")?;
        writeln!(
            logger.writer,
            "# Timestamps are milliseconds since session start"
        )?;
        writeln!(logger.writer)?;
        logger.writer.flush()?;
        Ok(logger)
    }

    fn append_line(
        &mut self,
        elapsed: Duration,
        role: TranscriptRole,
        line: &str,
    ) -> io::Result<()> {
        writeln!(
            self.writer,
            "[+{:>6} ms] {} {}",
            elapsed.as_millis(),
            role.prefix(),
            line
        )?;
        self.writer.flush()
    }
}

#[derive(Copy, Clone)]
enum TranscriptRole {
    Host,
    Node,
}

impl TranscriptRole {
    fn prefix(self) -> &'static str {
        match self {
            TranscriptRole::Host => "HOST>",
            TranscriptRole::Node => "NODE<",
        }
    }
}

fn describe_frame(frame: Frame) -> String {
    let [command, p1, p2, p3, checksum] = frame.to_bytes();
    let label = match Command::from_code(frame.command_code()) {
        Some(command) => command.to_string(),
        None => "unknown".to_string(),
    };
    let ack = if frame.ack_requested() { " ack" } else { "" };
    format!("{command:02x} {p1:02x} {p2:02x} {p3:02x} [{checksum:02x}] ({label}{ack})")
}

fn describe_record(record: &TelemetryRecord) -> String {
    record.to_string()
}

fn format_volts(millivolts: i32) -> String {
    let sign = if millivolts < 0 { "-" } else { "" };
    let magnitude = millivolts.unsigned_abs();
    format!("{sign}{}.{:03} V", magnitude / 1_000, magnitude % 1_000)
}

fn format_duration_short(duration: Duration) -> String {
    if duration.as_secs() > 0 {
        format!("{:.3}s", duration.as_secs_f64())
    } else {
        format!("{}ms", duration.as_millis())
    }
}
