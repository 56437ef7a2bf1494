//! Simulated counter, pulled-up wires and bus slaves for whole-stack tests.
//!
//! Time advances one tick per counter read, and one tick is one microsecond, so datasheet values
//! read directly as ticks. Slaves only see the master through the lines it pulls low, the same
//! way a real device does.
#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::convert::Infallible;
use std::rc::Rc;

use gpio_script::crc::crc8;
use gpio_script::{elapsed, Clock, Edge, Engine, Mode, Pin, PinLine, Tick};

pub const FREQUENCY: u32 = 1_000_000;

pub fn pin(n: u8) -> Pin {
    Pin::new(n).unwrap()
}

#[derive(Default)]
pub struct Time {
    now: Cell<Tick>,
    stall: Cell<Tick>,
    /// Counter reads still to go before `stall` applies.
    skip: Cell<usize>,
}

impl Time {
    /// The tick of the last counter read.
    pub fn peek(&self) -> Tick {
        self.now.get()
    }
}

#[derive(Clone)]
pub struct SimClock(Rc<Time>);

impl Clock for SimClock {
    fn now(&self) -> Tick {
        let stall = match self.0.skip.get() {
            0 => self.0.stall.replace(0),
            n => {
                self.0.skip.set(n - 1);
                0
            }
        };
        let now = self.0.now.get().wrapping_add(1).wrapping_add(stall);
        self.0.now.set(now);
        now
    }

    fn frequency(&self) -> u32 {
        FREQUENCY
    }
}

pub trait Slave {
    /// The master now pulls the lines in `low` low.
    fn master(&mut self, now: Tick, low: u32);

    /// Lines this slave pulls low at `now`.
    fn pulls(&self, now: Tick) -> u32;
}

impl<S: Slave> Slave for Rc<RefCell<S>> {
    fn master(&mut self, now: Tick, low: u32) {
        self.borrow_mut().master(now, low)
    }

    fn pulls(&self, now: Tick) -> u32 {
        self.borrow().pulls(now)
    }
}

/// Lines with pull-ups: a line reads low while the master or any slave pulls it low.
pub struct Wire {
    time: Rc<Time>,
    lines: u8,
    outputs: u32,
    latches: u32,
    slaves: Vec<Box<dyn Slave>>,
    changes: usize,
    stall: Option<(usize, usize, Tick)>,
    rising: u32,
    falling: u32,
    last: u32,
    events: u32,
}

impl Wire {
    pub fn attach<S: Slave + 'static>(&mut self, slave: S) {
        self.slaves.push(Box::new(slave));
    }

    /// Delays the first counter read after the `n`-th change of the master's lines, counting from
    /// now, by `ticks`.
    pub fn stall_after(&mut self, n: usize, ticks: Tick) {
        self.stall_later(n, 0, ticks);
    }

    /// Like `stall_after`, delaying the counter read that follows `reads` others instead.
    pub fn stall_later(&mut self, n: usize, reads: usize, ticks: Tick) {
        self.stall = Some((self.changes + n, reads, ticks));
    }

    /// Number of times the master changed what it pulls low.
    pub fn changes(&self) -> usize {
        self.changes
    }

    pub fn now(&self) -> Tick {
        self.time.peek()
    }

    fn low(&self) -> u32 {
        self.outputs & !self.latches
    }

    fn update(&mut self, before: u32) {
        let low = self.low();
        if low == before {
            return;
        }
        self.changes += 1;
        if let Some((n, reads, ticks)) = self.stall {
            if n == self.changes {
                self.time.skip.set(reads);
                self.time.stall.set(ticks);
                self.stall = None;
            }
        }
        let now = self.time.peek();
        for slave in &mut self.slaves {
            slave.master(now, low);
        }
    }

    fn levels(&self) -> u32 {
        let now = self.time.peek();
        let pulled = self
            .slaves
            .iter()
            .fold(self.low(), |acc, slave| acc | slave.pulls(now));
        !pulled & ((1u64 << self.lines) - 1) as u32
    }
}

impl PinLine for Wire {
    type Error = Infallible;

    fn set_mode(&mut self, pin: Pin, mode: Mode) -> Result<(), Infallible> {
        let before = self.low();
        match mode {
            Mode::In => self.outputs &= !pin.mask(),
            Mode::Out => self.outputs |= pin.mask(),
        }
        self.update(before);
        Ok(())
    }

    fn drive_high(&mut self, pin: Pin) -> Result<(), Infallible> {
        let before = self.low();
        self.latches |= pin.mask();
        self.update(before);
        Ok(())
    }

    fn drive_low(&mut self, pin: Pin) -> Result<(), Infallible> {
        let before = self.low();
        self.latches &= !pin.mask();
        self.update(before);
        Ok(())
    }

    fn sample_levels(&mut self) -> Result<u32, Infallible> {
        let levels = self.levels();
        self.events |= (levels & !self.last & self.rising) | (!levels & self.last & self.falling);
        self.last = levels;
        Ok(levels)
    }

    fn arm_edge(&mut self, pin: Pin, edge: Option<Edge>) -> Result<(), Infallible> {
        let mask = pin.mask();
        self.rising &= !mask;
        self.falling &= !mask;
        match edge {
            Some(Edge::Rising) => self.rising |= mask,
            Some(Edge::Falling) => self.falling |= mask,
            Some(Edge::Both) => {
                self.rising |= mask;
                self.falling |= mask;
            }
            None => {}
        }
        self.last = self.levels();
        self.events &= !mask;
        Ok(())
    }

    fn read_and_clear_edges(&mut self, mask: u32) -> Result<u32, Infallible> {
        self.sample_levels()?;
        let events = self.events & mask;
        self.events &= !mask;
        Ok(events)
    }

    fn contains(&self, pin: Pin) -> bool {
        pin.index() < self.lines
    }
}

/// An engine over `lines` idle wires, with the counter at 0.
pub fn bench(lines: u8) -> Engine<SimClock, Wire> {
    let time = Rc::new(Time::default());
    let wire = Wire {
        time: time.clone(),
        lines,
        outputs: 0,
        latches: 0,
        slaves: Vec::new(),
        changes: 0,
        stall: None,
        rising: 0,
        falling: 0,
        last: 0,
        events: 0,
    };
    Engine::new(SimClock(time), wire)
}

/// Shortest low pulse a 1-Wire device takes as a reset.
const RESET_LOW: Tick = 480;
/// A device samples a write slot, and holds a 0 read slot, this long after the falling edge.
const SAMPLE: Tick = 30;

fn bits(bytes: &[u8]) -> VecDeque<bool> {
    bytes
        .iter()
        .flat_map(|byte| (0..8).map(move |n| byte & (1 << n) != 0))
        .collect()
}

/// Collects bits LSB first.
#[derive(Copy, Clone, Default)]
struct Shift {
    value: u8,
    count: u8,
}

impl Shift {
    fn push(&mut self, bit: bool) -> Option<u8> {
        self.value |= (bit as u8) << self.count;
        self.count += 1;
        if self.count == 8 {
            let value = self.value;
            *self = Shift::default();
            Some(value)
        } else {
            None
        }
    }
}

enum Step {
    Idle,
    Rom(Shift),
    Match(u8, bool),
    Search { index: u8, phase: u8 },
    Function(Shift),
    Scratch(Shift, usize),
    Send(VecDeque<bool>),
    Echo(Option<bool>),
}

#[derive(Copy, Clone, PartialEq, Eq)]
enum Role {
    Presence,
    Echo,
    Rom,
}

/// A 1-Wire device, decoding slots from the low time of the master's pulses.
pub struct Device {
    pub rom: u64,
    pub alarm: bool,
    pub parasite: bool,
    pub scratchpad: [u8; 9],
    /// Taken off the bus: neither listens nor pulls.
    pub absent: bool,
    /// Function commands received, in order.
    pub functions: Vec<u8>,
    /// Release to presence pulse, and its length.
    presence: (Tick, Tick),
    role: Role,
    step: Step,
    low: bool,
    fell: Tick,
    sending: Option<bool>,
    pulse: Option<Tick>,
    hold_until: Option<Tick>,
}

impl Device {
    fn with_role(role: Role, rom: u64) -> Device {
        Device {
            rom,
            alarm: false,
            parasite: false,
            scratchpad: [0; 9],
            absent: false,
            functions: Vec::new(),
            presence: (20, 100),
            role,
            step: Step::Idle,
            low: false,
            fell: 0,
            sending: None,
            pulse: None,
            hold_until: None,
        }
    }

    /// A device answering ROM and DS18X20 function commands.
    pub fn new(rom: u64) -> Device {
        Device::with_role(Role::Rom, rom)
    }

    /// Answers resets with a presence pulse `delay` ticks after the release, lasting `length`.
    pub fn presence(delay: Tick, length: Tick) -> Device {
        let mut device = Device::with_role(Role::Presence, 0);
        device.presence = (delay, length);
        device
    }

    /// After a reset, answers each read slot with the bit of the write slot before it.
    pub fn echo() -> Device {
        Device::with_role(Role::Echo, 0)
    }

    pub fn with_scratchpad(mut self, first: [u8; 8]) -> Device {
        self.scratchpad[..8].copy_from_slice(&first);
        self.scratchpad[8] = crc8(&first);
        self
    }

    pub fn shared(self) -> Rc<RefCell<Device>> {
        Rc::new(RefCell::new(self))
    }

    fn fall(&mut self, now: Tick) {
        self.fell = now;
        self.sending = match &mut self.step {
            Step::Send(bits) => bits.pop_front(),
            Step::Search { index, phase: 0 } => Some(self.rom & (1 << *index) != 0),
            Step::Search { index, phase: 1 } => Some(self.rom & (1 << *index) == 0),
            Step::Echo(pending) => pending.take(),
            _ => None,
        };
        if self.sending == Some(false) {
            self.hold_until = Some(now + SAMPLE);
        }
    }

    fn release(&mut self, now: Tick) {
        if elapsed(self.fell, now) >= RESET_LOW {
            self.pulse = Some(now + self.presence.0);
            self.hold_until = None;
            self.sending = None;
            self.step = match self.role {
                Role::Presence => Step::Idle,
                Role::Echo => Step::Echo(None),
                Role::Rom => Step::Rom(Shift::default()),
            };
            return;
        }
        if self.sending.take().is_some() {
            if let Step::Search { phase, .. } = &mut self.step {
                *phase += 1;
            }
            return;
        }
        let bit = elapsed(self.fell, now) < SAMPLE;
        if let Some(next) = self.receive(bit) {
            self.step = next;
        }
    }

    fn receive(&mut self, bit: bool) -> Option<Step> {
        let rom = self.rom;
        match &mut self.step {
            Step::Rom(shift) => shift.push(bit).map(|command| match command {
                0x33 => Step::Send(bits(&rom.to_le_bytes())),
                0x55 => Step::Match(0, true),
                0xCC => Step::Function(Shift::default()),
                0xF0 => Step::Search { index: 0, phase: 0 },
                0xEC if self.alarm => Step::Search { index: 0, phase: 0 },
                _ => Step::Idle,
            }),
            Step::Match(count, matching) => {
                *matching &= bit == (rom & (1 << *count) != 0);
                *count += 1;
                match (*count, *matching) {
                    (64, true) => Some(Step::Function(Shift::default())),
                    (64, false) => Some(Step::Idle),
                    _ => None,
                }
            }
            Step::Search { index, phase: 2 } => {
                if bit != (rom & (1 << *index) != 0) || *index == 63 {
                    Some(Step::Idle)
                } else {
                    Some(Step::Search {
                        index: *index + 1,
                        phase: 0,
                    })
                }
            }
            Step::Function(shift) => {
                let command = shift.push(bit)?;
                self.functions.push(command);
                Some(match command {
                    0xBE => Step::Send(bits(&self.scratchpad)),
                    0x4E => Step::Scratch(Shift::default(), 2),
                    0xB4 => Step::Send(VecDeque::from([!self.parasite])),
                    _ => Step::Idle,
                })
            }
            Step::Scratch(shift, at) => {
                let value = shift.push(bit)?;
                self.scratchpad[*at] = value;
                *at += 1;
                let crc = crc8(&self.scratchpad[..8]);
                self.scratchpad[8] = crc;
                if *at == 5 {
                    Some(Step::Idle)
                } else {
                    None
                }
            }
            Step::Echo(pending) => {
                *pending = Some(bit);
                None
            }
            _ => None,
        }
    }
}

impl Slave for Device {
    fn master(&mut self, now: Tick, low: u32) {
        let pulled = low & 1 != 0;
        if self.absent || pulled == self.low {
            return;
        }
        self.low = pulled;
        if pulled {
            self.fall(now);
        } else {
            self.release(now);
        }
    }

    fn pulls(&self, now: Tick) -> u32 {
        if self.absent {
            return 0;
        }
        let presence = self
            .pulse
            .is_some_and(|at| now >= at && now < at + self.presence.1);
        let hold = self.hold_until.is_some_and(|until| now < until);
        (presence || hold) as u32
    }
}

const SCL: u32 = 1 << 0;
const SDA: u32 = 1 << 1;

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
enum Phase {
    Idle,
    Address,
    Write,
    Read,
}

/// An ADS1115 on SCL = pin 0 and SDA = pin 1.
pub struct Adc {
    pub address: u8,
    pub registers: [u16; 4],
    /// Conversion result per mux setting.
    pub inputs: [i16; 8],
    /// Whether a started conversion ever completes.
    pub converts: bool,
    /// SCL is held low for this long after each release.
    pub stretch: Tick,
    /// SCL is held low for good.
    pub stuck: bool,
    /// Completed (START ... STOP) transactions addressed to this device.
    pub transactions: usize,
    master: u32,
    phase: Phase,
    clock: u8,
    shift: u8,
    reading: bool,
    acked: bool,
    sda_low: bool,
    scl_until: Tick,
    pointer: usize,
    written: Vec<u8>,
    out: VecDeque<u8>,
    byte: u8,
    addressed: bool,
}

impl Adc {
    pub fn new(address: u8) -> Adc {
        Adc {
            address,
            registers: [0, 0x8583, 0x8000, 0x7FFF],
            inputs: [0; 8],
            converts: true,
            stretch: 0,
            stuck: false,
            transactions: 0,
            master: 0,
            phase: Phase::Idle,
            clock: 0,
            shift: 0,
            reading: false,
            acked: false,
            sda_low: false,
            scl_until: 0,
            pointer: 0,
            written: Vec::new(),
            out: VecDeque::new(),
            byte: 0,
            addressed: false,
        }
    }

    pub fn shared(self) -> Rc<RefCell<Adc>> {
        Rc::new(RefCell::new(self))
    }

    fn sda(&self, master: u32) -> bool {
        master & SDA == 0 && !self.sda_low
    }

    fn store(&mut self) {
        if let Some((pointer, value)) = self.written.split_first() {
            self.pointer = (*pointer & 0b11) as usize;
            if let [high, low] = value {
                let mut value = u16::from_be_bytes([*high, *low]);
                if self.pointer == 1 && value & 0x8000 != 0 {
                    let mux = ((value >> 12) & 0b111) as usize;
                    self.registers[0] = self.inputs[mux] as u16;
                    if !self.converts {
                        value &= !0x8000;
                    }
                } else if self.pointer == 1 {
                    value |= self.registers[1] & 0x8000;
                }
                self.registers[self.pointer] = value;
            }
        }
        self.written.clear();
    }

    fn load(&mut self) {
        if self.out.is_empty() {
            self.out.extend(self.registers[self.pointer].to_be_bytes());
        }
        self.byte = self.out.pop_front().unwrap_or(0xFF);
        self.sda_low = self.byte & 0x80 == 0;
    }

    fn rise(&mut self, sda: bool) {
        self.clock += 1;
        match self.phase {
            Phase::Address | Phase::Write if self.clock <= 8 => {
                self.shift = (self.shift << 1) | sda as u8;
            }
            Phase::Read if self.clock == 9 => self.acked = !sda,
            _ => {}
        }
    }

    fn fall(&mut self) {
        match (self.phase, self.clock) {
            (Phase::Address, 8) => {
                if self.shift >> 1 == self.address {
                    self.sda_low = true;
                    self.reading = self.shift & 1 != 0;
                    self.addressed = true;
                } else {
                    self.phase = Phase::Idle;
                }
            }
            (Phase::Address, 9) => {
                self.sda_low = false;
                self.clock = 0;
                if self.reading {
                    self.phase = Phase::Read;
                    self.load();
                } else {
                    self.phase = Phase::Write;
                }
            }
            (Phase::Write, 8) => {
                self.sda_low = true;
                self.written.push(self.shift);
            }
            (Phase::Write, 9) => {
                self.sda_low = false;
                self.clock = 0;
            }
            (Phase::Read, 1..=7) => self.sda_low = self.byte & (0x80 >> self.clock) == 0,
            (Phase::Read, 8) => self.sda_low = false,
            (Phase::Read, 9) => {
                self.clock = 0;
                if self.acked {
                    self.load();
                } else {
                    self.phase = Phase::Idle;
                }
            }
            _ => {}
        }
    }

    fn start(&mut self) {
        self.store();
        self.phase = Phase::Address;
        self.clock = 0;
        self.shift = 0;
        self.sda_low = false;
        self.out.clear();
    }

    fn stop(&mut self) {
        self.store();
        if self.addressed {
            self.transactions += 1;
        }
        self.addressed = false;
        self.phase = Phase::Idle;
        self.sda_low = false;
    }
}

impl Slave for Adc {
    fn master(&mut self, now: Tick, low: u32) {
        let before = self.master;
        self.master = low;
        let scl_high = low & SCL == 0;
        match before ^ low {
            SCL if scl_high => {
                self.scl_until = now + self.stretch;
                let sda = self.sda(low);
                self.rise(sda);
            }
            SCL => self.fall(),
            SDA if scl_high => {
                if self.sda(low) {
                    self.stop();
                } else {
                    self.start();
                }
            }
            _ => {}
        }
    }

    fn pulls(&self, now: Tick) -> u32 {
        let mut pulls = 0;
        if self.sda_low {
            pulls |= SDA;
        }
        if self.stuck || now < self.scl_until {
            pulls |= SCL;
        }
        pulls
    }
}

/// Records how long the master holds SCL low each time it pulls it.
#[derive(Default)]
pub struct ClockWatch {
    pub lows: Vec<Tick>,
    pulled: Option<Tick>,
}

impl ClockWatch {
    pub fn shared(self) -> Rc<RefCell<ClockWatch>> {
        Rc::new(RefCell::new(self))
    }
}

impl Slave for ClockWatch {
    fn master(&mut self, now: Tick, low: u32) {
        match (self.pulled, low & SCL != 0) {
            (None, true) => self.pulled = Some(now),
            (Some(at), false) => {
                self.lows.push(elapsed(at, now));
                self.pulled = None;
            }
            _ => {}
        }
    }

    fn pulls(&self, _now: Tick) -> u32 {
        0
    }
}

/// Three MAX7219s behind LOAD = pin 0, CLK = pin 1, DIN = pin 2, checking every minimum of
/// `Max7219Timing` given in ticks.
pub struct Chain {
    /// Shift registers, nearest to DIN first.
    pub shift: Vec<u16>,
    /// Words latched by each LOAD rising edge.
    pub frames: Vec<Vec<u16>>,
    pub violations: Vec<&'static str>,
    /// ch, cl, ds, css, csh, csw
    minimums: [Tick; 6],
    levels: u32,
    clk_rose: Option<Tick>,
    clk_fell: Option<Tick>,
    din_changed: Tick,
    load_fell: Tick,
    load_rose: Option<Tick>,
}

const LOAD: u32 = 1 << 0;
const CLK: u32 = 1 << 1;
const DIN: u32 = 1 << 2;

impl Chain {
    pub fn new(devices: usize, minimums: [Tick; 6]) -> Chain {
        Chain {
            shift: vec![0; devices],
            frames: Vec::new(),
            violations: Vec::new(),
            minimums,
            levels: LOAD | CLK | DIN,
            clk_rose: None,
            clk_fell: None,
            din_changed: 0,
            load_fell: 0,
            load_rose: None,
        }
    }

    pub fn shared(self) -> Rc<RefCell<Chain>> {
        Rc::new(RefCell::new(self))
    }

    fn check(&mut self, since: Option<Tick>, now: Tick, min: Tick, name: &'static str) {
        if let Some(since) = since {
            if elapsed(since, now) < min {
                self.violations.push(name);
            }
        }
    }
}

impl Slave for Chain {
    fn master(&mut self, now: Tick, low: u32) {
        let levels = !low & (LOAD | CLK | DIN);
        let changed = self.levels ^ levels;
        self.levels = levels;
        let [ch, cl, ds, css, csh, csw] = self.minimums;
        let load_low = levels & LOAD == 0;

        if changed & DIN != 0 {
            self.din_changed = now;
        }
        if changed & LOAD != 0 {
            if load_low {
                self.check(self.load_rose, now, csw, "csw");
                self.load_fell = now;
            } else {
                self.check(self.clk_rose, now, csh, "csh");
                self.load_rose = Some(now);
                self.frames.push(self.shift.clone());
            }
        }
        if changed & CLK != 0 {
            if levels & CLK != 0 {
                if load_low {
                    self.check(Some(self.din_changed), now, ds, "ds");
                    self.check(Some(self.load_fell), now, css, "css");
                    self.check(self.clk_fell, now, cl, "cl");
                    let mut carry = levels & DIN != 0;
                    for word in self.shift.iter_mut() {
                        let out = *word & 0x8000 != 0;
                        *word = (*word << 1) | carry as u16;
                        carry = out;
                    }
                }
                self.clk_rose = Some(now);
            } else {
                self.check(self.clk_rose, now, ch, "ch");
                self.clk_fell = Some(now);
            }
        }
    }

    fn pulls(&self, _now: Tick) -> u32 {
        0
    }
}
