use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;

use ignition_core::controller::{IgnitionController, OneShotTimer};
use ignition_core::device::{Actuator, CoilLevel};
use ignition_core::diagnostics::{DiagnosticCommand, decode_u32, decode_u64};
use ignition_core::engine::{Generation, Transition, TransitionNote};
use ignition_core::telemetry::{TelemetryPayload, TelemetryRecord};
use ignition_core::tick::{ManualTickSource, TICKS_PER_US, us_to_ticks};
use ignition_core::timing::TimingState;

use crate::grammar::{self, Command};

/// Cadence of the predictor staleness check, matching the firmware ticker.
const HOUSEKEEPING_PERIOD_US: u64 = 100_000;
const DEFAULT_HISTORY: usize = 8;
/// Notable events printed per command before the rest are elided.
const MAX_NARRATED: usize = 12;
/// Fastest crank the bench simulates (1 ms per revolution).
const MAX_CRANK_RPM: u32 = 60_000;

pub const HELP_TOPICS: &[(&str, &str)] = &[
    (
        "start",
        "start                          - bring the engine up with the coil off",
    ),
    (
        "rpm",
        "rpm <speed>                    - set the simulated crank speed (0 stops it)",
    ),
    (
        "run",
        "run <duration>                 - advance simulated time, e.g. `run 500ms`",
    ),
    (
        "ramp",
        "ramp <from> <to> <duration>    - sweep the crank speed while time advances",
    ),
    (
        "glitch",
        "glitch                         - inject one extra crank edge now",
    ),
    (
        "stall",
        "stall <duration>               - drop the crank signal for a while",
    ),
    (
        "get",
        "get <rpm|tick|period|state>    - query the diagnostics interface",
    ),
    (
        "status",
        "status                         - display engine and predictor state",
    ),
    (
        "history",
        "history [count]                - show recent telemetry records",
    ),
    (
        "help",
        "help [topic]                   - show help for a command",
    ),
];

/// Coil model that remembers its level and counts dwell pulses.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SimulatedCoil {
    level: CoilLevel,
    pulses: u32,
}

impl SimulatedCoil {
    const fn new() -> Self {
        Self {
            level: CoilLevel::Deenergized,
            pulses: 0,
        }
    }

    pub const fn level(&self) -> CoilLevel {
        self.level
    }

    pub const fn pulses(&self) -> u32 {
        self.pulses
    }
}

impl Actuator for SimulatedCoil {
    fn apply(&mut self, level: CoilLevel) {
        if level.is_energized() && !self.level.is_energized() {
            self.pulses = self.pulses.wrapping_add(1);
        }
        self.level = level;
    }
}

/// One-shot timer expressed as an absolute deadline on the simulated clock.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct SimulatedTimer {
    now_us: u64,
    deadline: Option<(u64, Generation)>,
}

impl SimulatedTimer {
    pub const fn deadline(&self) -> Option<(u64, Generation)> {
        self.deadline
    }
}

impl OneShotTimer for SimulatedTimer {
    fn schedule(&mut self, after_us: u32, generation: Generation) {
        self.deadline = Some((self.now_us + u64::from(after_us), generation));
    }

    fn cancel(&mut self) {
        self.deadline = None;
    }
}

pub type SimController = IgnitionController<ManualTickSource, SimulatedCoil, SimulatedTimer>;

#[derive(Clone, Copy, Debug)]
struct Ramp {
    from: u32,
    to: u32,
    start_us: u64,
    end_us: u64,
}

impl Ramp {
    fn speed_at(&self, at_us: u64) -> u32 {
        if at_us >= self.end_us {
            return self.to;
        }
        let span = self.end_us.saturating_sub(self.start_us).max(1);
        let progress = at_us.saturating_sub(self.start_us);
        let (low, high) = (u64::from(self.from.min(self.to)), u64::from(self.from.max(self.to)));
        let step = (high - low) * progress / span;
        let speed = if self.to >= self.from {
            low + step
        } else {
            high - step
        };
        u32::try_from(speed).unwrap_or(u32::MAX)
    }
}

/// Totals gathered while simulated time advances.
#[derive(Debug, Default)]
struct RunSummary {
    edges: u32,
    accepted: u32,
    rejected: u32,
    dropped_timers: u32,
    resets: u32,
    pulses: u32,
    narrated: Vec<String>,
    elided: usize,
}

impl RunSummary {
    fn narrate(&mut self, line: String) {
        if self.narrated.len() < MAX_NARRATED {
            self.narrated.push(line);
        } else {
            self.elided += 1;
        }
    }

    fn into_lines(self, headline: &str) -> Vec<String> {
        let mut lines = self.narrated;
        if self.elided > 0 {
            lines.push(format!("  ... {} more events", self.elided));
        }
        lines.push(format!(
            "{headline}: edges={} accepted={} rejected={} coil-pulses={} dropped-timers={} resets={}",
            self.edges, self.accepted, self.rejected, self.pulses, self.dropped_timers, self.resets
        ));
        lines
    }
}

/// Bench session: a simulated crank and clock wrapped around the controller.
pub struct Session {
    controller: SimController,
    transcript: Option<TranscriptLogger>,
    now_us: u64,
    epoch_us: u64,
    speed_rpm: u32,
    ramp: Option<Ramp>,
    next_edge_us: Option<u64>,
    next_housekeeping_us: u64,
}

impl Session {
    pub fn new(transcript: Option<&Path>) -> io::Result<Self> {
        let transcript = transcript.map(TranscriptLogger::new).transpose()?;
        Ok(Self {
            controller: IgnitionController::new(
                ManualTickSource::new(),
                SimulatedCoil::new(),
                SimulatedTimer::default(),
            ),
            transcript,
            now_us: 0,
            epoch_us: 0,
            speed_rpm: 0,
            ramp: None,
            next_edge_us: None,
            next_housekeeping_us: HOUSEKEEPING_PERIOD_US,
        })
    }

    pub fn handle_command(&mut self, line: &str) -> io::Result<Vec<String>> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(Vec::new());
        }
        self.record(TranscriptRole::Host, &[trimmed.to_string()])?;

        let lines = if let Some(topic) = trimmed
            .get(..5)
            .filter(|head| head.eq_ignore_ascii_case("help "))
            .map(|_| trimmed[5..].trim())
        {
            Self::help(Some(topic))
        } else {
            match grammar::parse(trimmed) {
                Ok(command) => self.execute(command),
                Err(err) => vec![format!("ERR syntax {err}")],
            }
        };

        self.record(TranscriptRole::Emulator, &lines)?;
        Ok(lines)
    }

    fn execute(&mut self, command: Command) -> Vec<String> {
        match command {
            Command::Start => self.start(),
            Command::Rpm(speed) => self.set_speed(speed),
            Command::Run { millis } => {
                let summary = self.advance(u64::from(millis) * 1_000, true);
                self.finish(summary, &format!("ran {millis} ms"))
            }
            Command::Ramp { from, to, millis } => self.ramp(from, to, millis),
            Command::Glitch => self.glitch(),
            Command::Stall { millis } => self.stall(millis),
            Command::Get(query) => vec![self.query(query)],
            Command::Status => self.status(),
            Command::History(count) => self.history(count.unwrap_or(DEFAULT_HISTORY)),
            Command::Help => Self::help(None),
        }
    }

    fn start(&mut self) -> Vec<String> {
        self.sync_clock();
        let entered = self
            .controller
            .start()
            .actuate
            .unwrap_or(TimingState::Invalid);
        self.epoch_us = self.now_us;
        vec![format!(
            "{} engine started in {entered}, coil {}",
            stamp(self.now_us),
            self.controller.actuator().level()
        )]
    }

    fn set_speed(&mut self, speed: u32) -> Vec<String> {
        if speed > MAX_CRANK_RPM {
            return vec![format!("ERR crank speed above {MAX_CRANK_RPM} rpm")];
        }
        self.ramp = None;
        self.speed_rpm = speed;
        match period_for(speed) {
            Some(period_us) => {
                if self.next_edge_us.is_none() {
                    self.next_edge_us = Some(self.now_us + period_us);
                }
                vec![format!("crank at {speed} rpm (period {period_us} us)")]
            }
            None => {
                self.next_edge_us = None;
                vec!["crank stopped".to_string()]
            }
        }
    }

    fn ramp(&mut self, from: u32, to: u32, millis: u32) -> Vec<String> {
        if from == 0 || to == 0 {
            return vec!["ERR ramp speeds must be non-zero; use `rpm 0` to stop".to_string()];
        }
        if from.max(to) > MAX_CRANK_RPM {
            return vec![format!("ERR crank speed above {MAX_CRANK_RPM} rpm")];
        }
        let duration_us = u64::from(millis) * 1_000;
        self.ramp = Some(Ramp {
            from,
            to,
            start_us: self.now_us,
            end_us: self.now_us + duration_us,
        });
        self.speed_rpm = from;
        if self.next_edge_us.is_none() {
            self.next_edge_us = period_for(from).map(|period| self.now_us + period);
        }

        let summary = self.advance(duration_us, true);
        self.ramp = None;
        self.speed_rpm = to;
        self.finish(summary, &format!("ramped {from} -> {to} rpm over {millis} ms"))
    }

    fn glitch(&mut self) -> Vec<String> {
        self.sync_clock();
        let transition = self.controller.on_rotation_edge();
        let mut lines = vec![format!("{} injected crank edge", stamp(self.now_us))];
        lines.extend(self.describe(&transition));
        lines
    }

    fn stall(&mut self, millis: u32) -> Vec<String> {
        let summary = self.advance(u64::from(millis) * 1_000, false);
        self.next_edge_us = period_for(self.speed_rpm).map(|period| self.now_us + period);
        self.finish(summary, &format!("crank signal lost for {millis} ms"))
    }

    /// Moves simulated time forward, delivering due timer expiries, crank
    /// edges, and housekeeping passes in that order at each instant.
    fn advance(&mut self, duration_us: u64, crank: bool) -> RunSummary {
        let end_us = self.now_us + duration_us;
        let pulses_before = self.controller.actuator().pulses();
        let mut summary = RunSummary::default();

        loop {
            let timer = self.controller.timer().deadline();
            let edge_us = self.next_edge_us.filter(|_| crank);
            let due = [timer.map(|(at, _)| at), edge_us, Some(self.next_housekeeping_us)]
                .into_iter()
                .flatten()
                .min();
            let Some(at_us) = due.filter(|at| *at <= end_us) else {
                break;
            };
            self.now_us = self.now_us.max(at_us);
            self.sync_clock();

            if let Some((deadline, generation)) = timer
                && deadline <= at_us
            {
                let transition = self.controller.on_timer_expired(generation);
                self.tally(&transition, &mut summary);
            } else if edge_us == Some(at_us) {
                summary.edges += 1;
                let transition = self.controller.on_rotation_edge();
                self.tally(&transition, &mut summary);
                let speed = self.current_speed(at_us);
                self.next_edge_us = period_for(speed).map(|period| at_us + period);
            } else {
                if self.controller.on_housekeeping() {
                    summary.resets += 1;
                    summary.narrate(format!(
                        "{} predictor reset: no crank edge for too long",
                        stamp(self.now_us)
                    ));
                }
                self.next_housekeeping_us += HOUSEKEEPING_PERIOD_US;
            }
        }

        self.now_us = end_us;
        self.sync_clock();
        summary.pulses = self.controller.actuator().pulses().wrapping_sub(pulses_before);
        summary
    }

    fn finish(&self, summary: RunSummary, headline: &str) -> Vec<String> {
        let mut lines = summary.into_lines(headline);
        lines.push(format!(
            "{} state {} rpm {} coil {}",
            stamp(self.now_us),
            self.controller.engine().state().current_state,
            self.controller.engine().state().rpm_estimate,
            self.controller.actuator().level()
        ));
        lines
    }

    fn tally(&self, transition: &Transition, summary: &mut RunSummary) {
        match transition.note {
            TransitionNote::CycleAccepted { .. } => summary.accepted += 1,
            TransitionNote::CycleRejected { .. } => summary.rejected += 1,
            TransitionNote::StaleTimer { .. } | TransitionNote::Spurious => {
                summary.dropped_timers += 1;
            }
            _ => {}
        }
        if let Some(line) = self.describe(transition) {
            summary.narrate(line);
        }
    }

    /// Narration for transitions worth surfacing; routine cycles stay quiet.
    fn describe(&self, transition: &Transition) -> Option<String> {
        let at = stamp(self.now_us);
        match transition.note {
            TransitionNote::Primed => Some(format!("{at} first crank edge, waiting for a full window")),
            TransitionNote::CycleRejected {
                period_us,
                forecast_us,
                reason,
                ..
            } => Some(format!(
                "{at} cycle rejected ({reason}): period {period_us} us, forecast {forecast_us} us"
            )),
            TransitionNote::StaleTimer { generation } => {
                Some(format!("{at} stale timer dropped (generation {generation})"))
            }
            TransitionNote::Spurious => Some(format!("{at} spurious timer expiry")),
            TransitionNote::NotStarted => Some(format!("{at} engine not started; edge ignored")),
            TransitionNote::Started
            | TransitionNote::CycleAccepted { .. }
            | TransitionNote::Advanced { .. }
            | TransitionNote::Halted { .. } => None,
        }
    }

    fn query(&self, query: DiagnosticCommand) -> String {
        let Some(response) = self.controller.ioctl(&query.request()) else {
            return format!("ERR {query}: no data (engine not started)");
        };
        let value = match query {
            DiagnosticCommand::GetTick => decode_u64(&response).map(|ticks| {
                format!("{ticks} ticks ({} us)", ticks / TICKS_PER_US)
            }),
            DiagnosticCommand::GetRpm => decode_u32(&response).map(|rpm| format!("{rpm} rpm")),
            DiagnosticCommand::GetPeriod => {
                decode_u32(&response).map(|period| format!("{period} us"))
            }
            DiagnosticCommand::GetState => decode_u32(&response).map(|raw| {
                TimingState::from_raw(raw)
                    .map_or_else(|| format!("unknown ({raw})"), |state| state.to_string())
            }),
        };
        match value {
            Some(value) => format!("{query} = {value}"),
            None => format!("ERR {query}: malformed response {response}"),
        }
    }

    fn status(&self) -> Vec<String> {
        let engine = self.controller.engine();
        let state = engine.state();
        let predictor = engine.predictor();
        let counters = self.controller.telemetry().counters();
        let crank = match self.ramp {
            Some(ramp) => format!("ramping to {} rpm", ramp.to),
            None if self.speed_rpm == 0 => "stopped".to_string(),
            None => format!("{} rpm", self.speed_rpm),
        };

        vec![
            format!("clock: {}", stamp(self.now_us)),
            format!("crank: {crank}"),
            format!(
                "engine: {} state={} event={} armed={} generation={}",
                if state.initialized { "started" } else { "stopped" },
                state.current_state,
                state.current_event,
                state.armed,
                state.generation
            ),
            format!(
                "speed: {} rpm period={} us forecast={} us",
                state.rpm_estimate, state.last_period_us, state.predicted_period_us
            ),
            format!(
                "predictor: {} samples, invalid streak {}",
                predictor.len(),
                predictor.invalid_streak()
            ),
            format!(
                "counters: accepted={} rejected={} resets={} stale={} spurious={}",
                counters.accepted,
                counters.rejected,
                counters.predictor_resets,
                counters.stale_timers,
                counters.spurious_timers
            ),
            format!(
                "coil: {} pulses={}",
                self.controller.actuator().level(),
                self.controller.actuator().pulses()
            ),
        ]
    }

    fn history(&self, count: usize) -> Vec<String> {
        let telemetry = self.controller.telemetry();
        if telemetry.is_empty() {
            return vec!["no telemetry recorded".to_string()];
        }
        let skip = telemetry.len().saturating_sub(count);
        telemetry
            .oldest_first()
            .skip(skip)
            .map(format_record)
            .collect()
    }

    fn help(topic: Option<&str>) -> Vec<String> {
        let mut lines = Vec::new();
        match topic {
            Some(target) if !target.is_empty() => {
                if let Some((_, detail)) = HELP_TOPICS
                    .iter()
                    .find(|(name, _)| name.eq_ignore_ascii_case(target))
                {
                    lines.push((*detail).to_string());
                } else {
                    lines.push(format!("No help available for `{target}`."));
                    lines.push(format!("Available topics: {}", help_topic_list()));
                }
            }
            _ => {
                lines.push("Available commands:".to_string());
                for (_, detail) in HELP_TOPICS {
                    lines.push(format!("  {detail}"));
                }
                lines.push("Type `help <topic>` for a specific command.".to_string());
            }
        }
        lines
    }

    fn current_speed(&self, at_us: u64) -> u32 {
        self.ramp
            .map_or(self.speed_rpm, |ramp| ramp.speed_at(at_us))
    }

    /// Points the controller's clock and timer at the simulated present.
    fn sync_clock(&mut self) {
        let since_epoch = self.now_us.saturating_sub(self.epoch_us);
        self.controller.ticks_mut().set(us_to_ticks(since_epoch));
        self.controller.timer_mut().now_us = self.now_us;
    }

    fn record(&mut self, role: TranscriptRole, lines: &[String]) -> io::Result<()> {
        let now_us = self.now_us;
        if let Some(transcript) = self.transcript.as_mut() {
            for line in lines {
                transcript.append_line(now_us, role, line)?;
            }
        }
        Ok(())
    }
}

fn period_for(speed_rpm: u32) -> Option<u64> {
    if speed_rpm == 0 {
        return None;
    }
    Some(60_000_000 / u64::from(speed_rpm)).filter(|period| *period > 0)
}

fn stamp(now_us: u64) -> String {
    format!("[{:>6}.{:03} ms]", now_us / 1_000, now_us % 1_000)
}

fn format_record(record: &TelemetryRecord) -> String {
    let detail = match record.details {
        TelemetryPayload::None => String::new(),
        TelemetryPayload::Cycle(cycle) => format!(
            " period={} us forecast={} us",
            cycle.period_us, cycle.forecast_us
        ),
        TelemetryPayload::Event { elapsed_us } => format!(" elapsed={elapsed_us} us"),
        TelemetryPayload::Timer { generation } => format!(" generation={generation}"),
    };
    format!(
        "#{:<4} {:>10} us {}{detail}",
        record.id,
        record.timestamp / TICKS_PER_US,
        record.event
    )
}

fn help_topic_list() -> String {
    let mut buffer = String::new();
    for (index, (name, _)) in HELP_TOPICS.iter().enumerate() {
        if index > 0 {
            buffer.push_str(", ");
        }
        buffer.push_str(name);
    }
    buffer
}

struct TranscriptLogger {
    writer: BufWriter<std::fs::File>,
}

impl TranscriptLogger {
    fn new(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
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
        writeln!(logger.writer, "# Ignition bench emulator transcript")?;
        logger.writer.flush()?;
        Ok(logger)
    }

    fn append_line(&mut self, now_us: u64, role: TranscriptRole, line: &str) -> io::Result<()> {
        writeln!(self.writer, "{} {} {}", stamp(now_us), role.prefix(), line)?;
        self.writer.flush()
    }
}

#[derive(Clone, Copy, Debug)]
enum TranscriptRole {
    Host,
    Emulator,
}

impl TranscriptRole {
    fn prefix(self) -> &'static str {
        match self {
            TranscriptRole::Host => "HOST>",
            TranscriptRole::Emulator => "EMU <",
        }
    }
}
