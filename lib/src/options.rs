// SPDX-FileCopyrightText: 2021 Kent Gibson <warthog618@gmail.com>
//
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Options are applied in order, so later options override earlier options
//! in the same category.
//!
//! Line configuration options apply to all lines in a request unless
//! scoped to a subset of lines with [`with_lines`].
//! Once a line has been configured by a subset option it no longer tracks
//! the request default configuration until it is reverted with [`defaulted`].
//!
//! ```no_run
//! use gpioline::{options, Chip};
//! use std::time::Duration;
//!
//! # fn example() -> gpioline::Result<()> {
//! let chip = Chip::from_name("gpiochip0")?;
//! let lines = chip.request_lines(
//!     &[3, 4, 5],
//!     &[
//!         options::as_input(),
//!         options::with_lines(&[4, 5], [options::with_debounce_period(Duration::from_millis(10))]),
//!     ],
//! )?;
//! # Ok(())
//! # }
//! ```

use crate::line::{Bias, Drive, EdgeDetection, EventClock, LineConfig, LineEvent, Offset, Value};
use crate::{AbiVersion, Error, Result};
use nohash_hasher::IntMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// The handler called with each edge event detected on a requested line.
///
/// Handlers are called serially from the watcher thread, so should return promptly.
pub type EventHandler = Arc<dyn Fn(LineEvent) + Send + Sync>;

/// A directive that modifies the configuration of a chip, a line request,
/// or a subset of the lines within a request.
///
/// Options are created using the functions in this module.
#[derive(Clone)]
pub enum ConfigOption {
    /// Set lines as inputs.
    AsInput,

    /// Set lines as outputs with the given values, mapped to lines in order.
    AsOutput(Vec<Value>),

    /// Set lines as active low.
    AsActiveLow,

    /// Set lines as active high.
    AsActiveHigh,

    /// Set the drive for output lines.
    Drive(Drive),

    /// Set the bias for lines.
    Bias(Option<Bias>),

    /// Set edge detection for input lines.
    Edge(Option<EdgeDetection>),

    /// Set the debounce period for input lines.
    Debounce(Duration),

    /// Set the source clock for edge event timestamps.
    EventClock(EventClock),

    /// Set the consumer label for requested lines.
    Consumer(String),

    /// Set the handler for edge events.
    EventHandler(EventHandler),

    /// Pin the uAPI ABI version.
    AbiVersion(AbiVersion),

    /// Set the kernel edge event buffer size hint.
    EventBufferSize(u32),

    /// Apply the contained options only to the given offsets.
    WithLines(Vec<Offset>, Vec<ConfigOption>),

    /// Revert lines to the default configuration.
    Defaulted,
}

impl ConfigOption {
    fn name(&self) -> &'static str {
        use ConfigOption::*;
        match self {
            AsInput => "as_input",
            AsOutput(_) => "as_output",
            AsActiveLow => "as_active_low",
            AsActiveHigh => "as_active_high",
            Drive(_) => "with_drive",
            Bias(_) => "with_bias",
            Edge(_) => "with_edge_detection",
            Debounce(_) => "with_debounce_period",
            EventClock(_) => "with_event_clock",
            Consumer(_) => "with_consumer",
            EventHandler(_) => "with_event_handler",
            AbiVersion(_) => "with_abi_version",
            EventBufferSize(_) => "with_event_buffer_size",
            WithLines(..) => "with_lines",
            Defaulted => "defaulted",
        }
    }

    fn invalid_in(&self, context: &str) -> Error {
        Error::InvalidArgument(format!("{} cannot be applied {}", self.name(), context))
    }

    // Applies a line config option, returning false if the option is of some other kind.
    fn apply_to_line_config(&self, cfg: &mut LineConfig) -> bool {
        use ConfigOption::*;
        match self {
            AsInput => cfg.to_input(),
            AsOutput(_) => cfg.to_output(),
            AsActiveLow => cfg.active_low = true,
            AsActiveHigh => cfg.active_low = false,
            Drive(drive) => cfg.set_drive(*drive),
            Bias(bias) => cfg.set_bias(*bias),
            Edge(edge) => cfg.set_edge_detection(*edge),
            Debounce(period) => cfg.set_debounce_period(*period),
            EventClock(clock) => cfg.event_clock = *clock,
            _ => return false,
        }
        true
    }

    /// Apply the option to the chip defaults.
    pub(crate) fn apply_to_chip(&self, co: &mut ChipOptions) -> Result<()> {
        use ConfigOption::*;
        match self {
            Consumer(consumer) => co.consumer = consumer.clone(),
            EventHandler(handler) => co.handler = Some(handler.clone()),
            AbiVersion(abiv) => co.abi_version = Some(*abiv),
            EventBufferSize(size) => co.event_buffer_size = *size,
            Defaulted => co.config = LineConfig::default(),
            WithLines(..) => return Err(self.invalid_in("to a chip")),
            // values are meaningless without offsets
            _ => {
                self.apply_to_line_config(&mut co.config);
            }
        }
        Ok(())
    }

    /// Apply the option to a request being constructed.
    pub(crate) fn apply_to_request(&self, ro: &mut RequestOptions) -> Result<()> {
        use ConfigOption::*;
        match self {
            Consumer(consumer) => ro.consumer = consumer.clone(),
            EventHandler(handler) => ro.handler = Some(handler.clone()),
            AbiVersion(abiv) => ro.abi_version = Some(*abiv),
            EventBufferSize(size) => ro.event_buffer_size = *size,
            _ => self.apply_to_lines(&mut ro.lco)?,
        }
        Ok(())
    }

    /// Apply the option to the configuration of an existing request.
    pub(crate) fn apply_to_reconfig(&self, lco: &mut LineConfigOptions) -> Result<()> {
        use ConfigOption::*;
        match self {
            Consumer(_) | EventHandler(_) | AbiVersion(_) | EventBufferSize(_) => {
                Err(self.invalid_in("when reconfiguring"))
            }
            _ => self.apply_to_lines(lco),
        }
    }

    // Apply a line config option to the whole request.
    fn apply_to_lines(&self, lco: &mut LineConfigOptions) -> Result<()> {
        use ConfigOption::*;
        match self {
            WithLines(offsets, opts) => {
                for opt in opts {
                    opt.apply_to_subset(lco, offsets)?;
                }
            }
            Defaulted => lco.reset(),
            AsOutput(values) => {
                lco.default.to_output();
                // branched lines only track subset options
                for (idx, offset) in lco.offsets.clone().into_iter().enumerate() {
                    if !lco.is_branched(offset) {
                        let value = values.get(idx).copied().unwrap_or_default();
                        lco.values.insert(offset, value);
                    }
                }
            }
            _ => {
                if !self.apply_to_line_config(&mut lco.default) {
                    return Err(self.invalid_in("to lines"));
                }
            }
        }
        Ok(())
    }

    // Apply a line config option to the subset of lines.
    fn apply_to_subset(&self, lco: &mut LineConfigOptions, offsets: &[Offset]) -> Result<()> {
        use ConfigOption::*;
        match self {
            Defaulted => lco.unbranch(offsets),
            AsOutput(values) => {
                for offset in offsets {
                    lco.branch(*offset).to_output();
                }
                lco.set_values(offsets, values);
            }
            _ => {
                let mut scratch = LineConfig::default();
                if !self.apply_to_line_config(&mut scratch) {
                    return Err(self.invalid_in("to a subset of lines"));
                }
                for offset in offsets {
                    self.apply_to_line_config(lco.branch(*offset));
                }
            }
        }
        Ok(())
    }
}

impl fmt::Debug for ConfigOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use ConfigOption::*;
        match self {
            AsOutput(values) => f.debug_tuple("AsOutput").field(values).finish(),
            Drive(drive) => f.debug_tuple("Drive").field(drive).finish(),
            Bias(bias) => f.debug_tuple("Bias").field(bias).finish(),
            Edge(edge) => f.debug_tuple("Edge").field(edge).finish(),
            Debounce(period) => f.debug_tuple("Debounce").field(period).finish(),
            EventClock(clock) => f.debug_tuple("EventClock").field(clock).finish(),
            Consumer(consumer) => f.debug_tuple("Consumer").field(consumer).finish(),
            EventHandler(_) => f.write_str("EventHandler"),
            AbiVersion(abiv) => f.debug_tuple("AbiVersion").field(abiv).finish(),
            EventBufferSize(size) => f.debug_tuple("EventBufferSize").field(size).finish(),
            WithLines(offsets, opts) => f.debug_tuple("WithLines").field(offsets).field(opts).finish(),
            AsInput => f.write_str("AsInput"),
            AsActiveLow => f.write_str("AsActiveLow"),
            AsActiveHigh => f.write_str("AsActiveHigh"),
            Defaulted => f.write_str("Defaulted"),
        }
    }
}

/// Set lines as inputs.
pub fn as_input() -> ConfigOption {
    ConfigOption::AsInput
}

/// Set lines as outputs.
///
/// The values are applied to the lines in scope in order.
/// Lines beyond the provided values are set inactive, and extra values are ignored.
///
/// ```
/// use gpioline::{options, Value};
///
/// let opt = options::as_output([Value::Active, Value::Inactive]);
/// let opt = options::as_output([1u8, 0, 1]);
/// ```
pub fn as_output<I, V>(values: I) -> ConfigOption
where
    I: IntoIterator<Item = V>,
    V: Into<Value>,
{
    ConfigOption::AsOutput(values.into_iter().map(Into::into).collect())
}

/// Set lines as active low.
pub fn as_active_low() -> ConfigOption {
    ConfigOption::AsActiveLow
}

/// Set lines as active high.
///
/// This is the default.
pub fn as_active_high() -> ConfigOption {
    ConfigOption::AsActiveHigh
}

/// Set the drive for lines.
///
/// Implies output and clears any edge detection and debounce.
pub fn with_drive(drive: Drive) -> ConfigOption {
    ConfigOption::Drive(drive)
}

/// Set lines as open-drain outputs.
pub fn as_open_drain() -> ConfigOption {
    ConfigOption::Drive(Drive::OpenDrain)
}

/// Set lines as open-source outputs.
pub fn as_open_source() -> ConfigOption {
    ConfigOption::Drive(Drive::OpenSource)
}

/// Set lines as push-pull outputs.
pub fn as_push_pull() -> ConfigOption {
    ConfigOption::Drive(Drive::PushPull)
}

/// Set the bias for lines.
///
/// A line with a bias and no direction is set as an input.
pub fn with_bias<B: Into<Option<Bias>>>(bias: B) -> ConfigOption {
    ConfigOption::Bias(bias.into())
}

/// Enable pull-up on lines.
pub fn with_pull_up() -> ConfigOption {
    ConfigOption::Bias(Some(Bias::PullUp))
}

/// Enable pull-down on lines.
pub fn with_pull_down() -> ConfigOption {
    ConfigOption::Bias(Some(Bias::PullDown))
}

/// Disable bias on lines.
pub fn with_bias_disabled() -> ConfigOption {
    ConfigOption::Bias(Some(Bias::Disabled))
}

/// Set the edge detection for lines.
///
/// Enabling edge detection implies input.
pub fn with_edge_detection<E: Into<Option<EdgeDetection>>>(edge: E) -> ConfigOption {
    ConfigOption::Edge(edge.into())
}

/// Detect rising edges.
pub fn with_rising_edge() -> ConfigOption {
    ConfigOption::Edge(Some(EdgeDetection::RisingEdge))
}

/// Detect falling edges.
pub fn with_falling_edge() -> ConfigOption {
    ConfigOption::Edge(Some(EdgeDetection::FallingEdge))
}

/// Detect both rising and falling edges.
pub fn with_both_edges() -> ConfigOption {
    ConfigOption::Edge(Some(EdgeDetection::BothEdges))
}

/// Disable edge detection.
pub fn without_edges() -> ConfigOption {
    ConfigOption::Edge(None)
}

/// Set the debounce period for lines.
///
/// A non-zero period implies input, and a zero period disables debounce.
/// Requires uAPI ABI v2.
pub fn with_debounce_period(period: Duration) -> ConfigOption {
    ConfigOption::Debounce(period)
}

/// Disable debounce.
pub fn without_debounce() -> ConfigOption {
    ConfigOption::Debounce(Duration::ZERO)
}

/// Set the source clock for edge event timestamps.
///
/// Selecting a clock other than monotonic requires uAPI ABI v2.
pub fn with_event_clock(clock: EventClock) -> ConfigOption {
    ConfigOption::EventClock(clock)
}

/// Set the consumer label recorded by the kernel for requested lines.
pub fn with_consumer<S: Into<String>>(consumer: S) -> ConfigOption {
    ConfigOption::Consumer(consumer.into())
}

/// Set the handler for edge events detected on requested lines.
///
/// The handler is called from a dedicated watcher thread, one event at a time,
/// in the order the kernel reports them.
/// The handler must not close the request it is handling events for.
pub fn with_event_handler<F>(handler: F) -> ConfigOption
where
    F: Fn(LineEvent) + Send + Sync + 'static,
{
    ConfigOption::EventHandler(Arc::new(handler))
}

/// Use the given uAPI ABI version rather than negotiating one.
pub fn with_abi_version(abiv: AbiVersion) -> ConfigOption {
    ConfigOption::AbiVersion(abiv)
}

/// Suggest the size of the kernel edge event buffer.
///
/// Ignored under uAPI ABI v1.
pub fn with_event_buffer_size(size: u32) -> ConfigOption {
    ConfigOption::EventBufferSize(size)
}

/// Apply the options only to the given lines.
///
/// The lines branch from the request default configuration and are no
/// longer affected by request-wide options.
/// Offsets not in the request are ignored.
pub fn with_lines<C: Into<Vec<ConfigOption>>>(offsets: &[Offset], opts: C) -> ConfigOption {
    ConfigOption::WithLines(offsets.to_vec(), opts.into())
}

/// Revert lines to the default configuration.
///
/// Within [`with_lines`] the lines resume tracking the request default.
/// Otherwise the request default, all per-line configuration and all output
/// values are reset.
pub fn defaulted() -> ConfigOption {
    ConfigOption::Defaulted
}

/// The defaults inherited by requests from a chip.
#[derive(Clone)]
pub(crate) struct ChipOptions {
    pub consumer: String,
    pub config: LineConfig,
    pub abi_version: Option<AbiVersion>,
    pub handler: Option<EventHandler>,
    pub event_buffer_size: u32,
}

impl ChipOptions {
    pub(crate) fn new(opts: &[ConfigOption]) -> Result<ChipOptions> {
        let mut co = ChipOptions::default();
        for opt in opts {
            opt.apply_to_chip(&mut co)?;
        }
        Ok(co)
    }
}

impl Default for ChipOptions {
    fn default() -> Self {
        ChipOptions {
            consumer: format!("gpioline-p{}", std::process::id()),
            config: LineConfig::default(),
            abi_version: None,
            handler: None,
            event_buffer_size: 0,
        }
    }
}

/// The configuration of the lines in a request.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub(crate) struct LineConfigOptions {
    /// The requested offsets, in request order.
    pub offsets: Vec<Offset>,

    /// The output values, sparse.
    pub values: IntMap<Offset, Value>,

    /// The configuration of lines not branched by a subset option.
    pub default: LineConfig,

    /// The configuration that [`defaulted`] reverts to.
    pub base: LineConfig,

    /// The configuration of branched lines.
    pub overrides: Option<IntMap<Offset, LineConfig>>,
}

impl LineConfigOptions {
    pub(crate) fn new(offsets: &[Offset], base: &LineConfig) -> LineConfigOptions {
        LineConfigOptions {
            offsets: offsets.to_vec(),
            default: base.clone(),
            base: base.clone(),
            ..Default::default()
        }
    }

    /// The effective configuration of a line.
    pub(crate) fn config(&self, offset: Offset) -> &LineConfig {
        self.overrides
            .as_ref()
            .and_then(|o| o.get(&offset))
            .unwrap_or(&self.default)
    }

    /// The output value of a line, defaulting to inactive.
    pub(crate) fn value(&self, offset: Offset) -> Value {
        self.values.get(&offset).copied().unwrap_or_default()
    }

    /// True if no requested line is configured differently from the default.
    pub(crate) fn is_uniform(&self) -> bool {
        self.offsets
            .iter()
            .all(|offset| *self.config(*offset) == self.default)
    }

    fn is_branched(&self, offset: Offset) -> bool {
        self.overrides
            .as_ref()
            .is_some_and(|o| o.contains_key(&offset))
    }

    fn branch(&mut self, offset: Offset) -> &mut LineConfig {
        let default = &self.default;
        self.overrides
            .get_or_insert_with(IntMap::default)
            .entry(offset)
            .or_insert_with(|| default.clone())
    }

    fn unbranch(&mut self, offsets: &[Offset]) {
        if let Some(overrides) = self.overrides.as_mut() {
            for offset in offsets {
                overrides.remove(offset);
            }
            if overrides.is_empty() {
                self.overrides = None;
            }
        }
        for offset in offsets {
            self.values.remove(offset);
        }
    }

    fn reset(&mut self) {
        self.default = self.base.clone();
        self.overrides = None;
        self.values.clear();
    }

    fn set_values(&mut self, offsets: &[Offset], values: &[Value]) {
        for (idx, offset) in offsets.iter().enumerate() {
            let value = values.get(idx).copied().unwrap_or_default();
            self.values.insert(*offset, value);
        }
    }
}

/// The options for a request being constructed.
pub(crate) struct RequestOptions {
    pub lco: LineConfigOptions,
    pub consumer: String,
    pub abi_version: Option<AbiVersion>,
    pub handler: Option<EventHandler>,
    pub event_buffer_size: u32,
}

impl RequestOptions {
    /// Seed the request from the chip defaults and apply the request options.
    pub(crate) fn new(
        co: &ChipOptions,
        offsets: &[Offset],
        opts: &[ConfigOption],
    ) -> Result<RequestOptions> {
        let mut ro = RequestOptions {
            lco: LineConfigOptions::new(offsets, &co.config),
            consumer: co.consumer.clone(),
            abi_version: co.abi_version,
            handler: co.handler.clone(),
            event_buffer_size: co.event_buffer_size,
        };
        for opt in opts {
            opt.apply_to_request(&mut ro)?;
        }
        Ok(ro)
    }
}

/// Apply reconfigure options over the current configuration of a request.
///
/// The current configuration is untouched if any option fails to apply.
pub(crate) fn reconfigured(
    current: &LineConfigOptions,
    opts: &[ConfigOption],
) -> Result<LineConfigOptions> {
    let mut lco = current.clone();
    for opt in opts {
        opt.apply_to_reconfig(&mut lco)?;
    }
    Ok(lco)
}
