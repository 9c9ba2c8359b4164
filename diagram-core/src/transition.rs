//! Animated attribute transitions.
//!
//! A transition moves the value at one attribute path of a cell towards a
//! target over time. Each (cell, path) pair goes through three phases:
//!
//! 1. **delayed**: waiting for the start delay to elapse,
//! 2. **scheduled**: started (start value captured, `TransitionStart`
//!    published), waiting for its first frame,
//! 3. **running**: writing one interpolated value per frame until progress
//!    reaches 1.
//!
//! Timing lives outside the graph. The graph asks a [`FrameScheduler`] for
//! frames and the host calls [`Graph::run_frame`] when one fires.
//! [`ManualScheduler`] drives frames from an explicit clock.

use std::cell::RefCell;
use std::f64::consts::PI;
use std::rc::Rc;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use serde_json::{json, Map, Value};

use crate::attributes::{AttrPath, SetOptions};
use crate::cell::CellId;
use crate::config::TransitionConfig;
use crate::event::{GraphEvent, TransitionOutcome};
use crate::graph::Graph;
use crate::{GraphError, GraphResult};

/// Delay between two frames of a running transition.
pub const FRAME_INTERVAL: Duration = Duration::from_millis(16);

/// Handle of a requested frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameHandle(pub u64);

/// Source of frames for transitions.
pub trait FrameScheduler {
    /// Request a single callback after `delay`.
    fn request_frame(&mut self, delay: Duration) -> FrameHandle;

    /// Revoke a requested callback. Unknown handles are ignored.
    fn cancel_frame(&mut self, handle: FrameHandle);
}

#[derive(Debug, Default)]
struct ManualState {
    now: Duration,
    next: u64,
    pending: Vec<(Duration, FrameHandle)>,
}

/// A scheduler driven by an explicit clock.
///
/// Clones share the same clock and queue: hand one clone to the graph and
/// keep another to call [`ManualScheduler::advance`].
#[derive(Debug, Clone, Default)]
pub struct ManualScheduler {
    state: Rc<RefCell<ManualState>>,
}

impl ManualScheduler {
    /// Create a scheduler with its clock at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current clock value.
    #[must_use]
    pub fn now(&self) -> Duration {
        self.state.borrow().now
    }

    /// Number of frames waiting to fire.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.state.borrow().pending.len()
    }

    /// Whether a frame is waiting to fire.
    #[must_use]
    pub fn is_pending(&self, handle: FrameHandle) -> bool {
        self.state
            .borrow()
            .pending
            .iter()
            .any(|(_, pending)| *pending == handle)
    }

    /// Move the clock forward by `step`, running every frame that falls due
    /// on `graph` in due order. Frames requested while running are fired too
    /// when they fall inside the step. Returns the number of frames run.
    pub fn advance(&self, graph: &mut Graph, step: Duration) -> usize {
        let target = self.now() + step;
        let mut fired = 0;
        loop {
            let (due, handle) = {
                let mut state = self.state.borrow_mut();
                let Some(index) = state
                    .pending
                    .iter()
                    .enumerate()
                    .filter(|(_, (due, _))| *due <= target)
                    .min_by_key(|(_, frame)| **frame)
                    .map(|(index, _)| index)
                else {
                    state.now = target;
                    break;
                };
                let frame = state.pending.remove(index);
                state.now = frame.0;
                frame
            };
            graph.run_frame(handle, due);
            fired += 1;
        }
        fired
    }
}

impl FrameScheduler for ManualScheduler {
    fn request_frame(&mut self, delay: Duration) -> FrameHandle {
        let mut state = self.state.borrow_mut();
        state.next += 1;
        let handle = FrameHandle(state.next);
        let due = state.now + delay;
        state.pending.push((due, handle));
        handle
    }

    fn cancel_frame(&mut self, handle: FrameHandle) {
        self.state
            .borrow_mut()
            .pending
            .retain(|(_, pending)| *pending != handle);
    }
}

/// Easing curve mapping linear progress to eased progress.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum TimingFunction {
    /// `t`
    #[default]
    Linear,
    /// `t²`
    Quad,
    /// `t³`
    Cubic,
    /// Slow at both ends.
    InOut,
    /// `2^(10(t − 1))`
    Exponential,
    /// Bouncing arrival.
    Bounce,
    /// Mirror the curve: `1 − f(1 − t)`.
    Reverse(Box<TimingFunction>),
    /// First half `f`, second half its reverse.
    Reflect(Box<TimingFunction>),
    /// Limit the output of a curve.
    Clamp {
        /// Clamped curve.
        inner: Box<TimingFunction>,
        /// Lower bound.
        min: f64,
        /// Upper bound.
        max: f64,
    },
    /// Overshoot backwards before moving (default overshoot 1.70158).
    Back(f64),
    /// Oscillate into place (default frequency factor 1.5).
    Elastic(f64),
}

impl TimingFunction {
    /// [`TimingFunction::Back`] with the usual overshoot.
    #[must_use]
    pub const fn back() -> Self {
        Self::Back(1.70158)
    }

    /// [`TimingFunction::Elastic`] with the usual factor.
    #[must_use]
    pub const fn elastic() -> Self {
        Self::Elastic(1.5)
    }

    /// Mirror this curve.
    #[must_use]
    pub fn reverse(self) -> Self {
        Self::Reverse(Box::new(self))
    }

    /// Reflect this curve around the midpoint.
    #[must_use]
    pub fn reflect(self) -> Self {
        Self::Reflect(Box::new(self))
    }

    /// Limit this curve to `[min, max]`.
    #[must_use]
    pub fn clamp(self, min: f64, max: f64) -> Self {
        Self::Clamp {
            inner: Box::new(self),
            min,
            max,
        }
    }

    /// Evaluate at progress `t`.
    #[must_use]
    pub fn apply(&self, t: f64) -> f64 {
        match self {
            Self::Linear => t,
            Self::Quad => t * t,
            Self::Cubic => t * t * t,
            Self::InOut => {
                if t <= 0.0 {
                    return 0.0;
                }
                if t >= 1.0 {
                    return 1.0;
                }
                let t2 = t * t;
                let t3 = t2 * t;
                4.0 * if t < 0.5 { t3 } else { 3.0 * (t - t2) + t3 - 0.75 }
            }
            Self::Exponential => 2f64.powf(10.0 * (t - 1.0)),
            Self::Bounce => bounce(t),
            Self::Reverse(inner) => 1.0 - inner.apply(1.0 - t),
            Self::Reflect(inner) => {
                0.5 * if t < 0.5 {
                    inner.apply(2.0 * t)
                } else {
                    2.0 - inner.apply(2.0 - 2.0 * t)
                }
            }
            Self::Clamp { inner, min, max } => inner.apply(t).max(*min).min(*max),
            Self::Back(s) => t * t * ((s + 1.0) * t - s),
            Self::Elastic(x) => 2f64.powf(10.0 * (t - 1.0)) * (20.0 * PI * x / 3.0 * t).cos(),
        }
    }
}

fn bounce(t: f64) -> f64 {
    // Below 0, or at NaN, the thresholds never match.
    if t.is_nan() {
        return 0.0;
    }
    let t = t.clamp(0.0, 1.0);
    let (mut a, mut b) = (0.0, 1.0);
    loop {
        if t >= (7.0 - 4.0 * a) / 11.0 {
            let q = (11.0 - 6.0 * a - 11.0 * t) / 4.0;
            return -q * q + b * b;
        }
        a += b;
        b /= 2.0;
    }
}

/// How values are interpolated between start and target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Interpolation {
    /// Numbers. A missing start value counts as 0.
    #[default]
    Number,
    /// Objects of numbers, key by key over the start value's keys.
    Object,
    /// `#rrggbb` colours, channel by channel.
    HexColor,
    /// Lengths with a unit such as `10px` or `50%`.
    Unit,
}

/// Value generator for one running transition.
#[derive(Debug, Clone, PartialEq)]
enum Interpolator {
    Number {
        from: f64,
        delta: f64,
    },
    Object {
        from: Map<String, Value>,
        to: Map<String, Value>,
    },
    HexColor {
        from: [f64; 3],
        to: [f64; 3],
    },
    Unit {
        from: f64,
        delta: f64,
        decimals: usize,
        unit: String,
    },
}

impl Interpolator {
    fn new(kind: Interpolation, from: Option<&Value>, to: &Value) -> Result<Self, String> {
        match kind {
            Interpolation::Number => {
                let to = to.as_f64().ok_or("target is not a number")?;
                let from = match from {
                    None | Some(Value::Null) => 0.0,
                    Some(value) => value.as_f64().ok_or("start value is not a number")?,
                };
                Ok(Self::Number {
                    from,
                    delta: to - from,
                })
            }
            Interpolation::Object => {
                let to = to.as_object().ok_or("target is not an object")?;
                let from = from
                    .and_then(Value::as_object)
                    .ok_or("start value is not an object")?;
                Ok(Self::Object {
                    from: from.clone(),
                    to: to.clone(),
                })
            }
            Interpolation::HexColor => Ok(Self::HexColor {
                from: parse_hex_color(from.and_then(Value::as_str).ok_or("start value is not a colour")?)?,
                to: parse_hex_color(to.as_str().ok_or("target is not a colour")?)?,
            }),
            Interpolation::Unit => {
                let (from, unit, _) =
                    parse_unit(from.and_then(Value::as_str).ok_or("start value is not a length")?)?;
                let (to, _, decimals) = parse_unit(to.as_str().ok_or("target is not a length")?)?;
                Ok(Self::Unit {
                    from,
                    delta: to - from,
                    decimals,
                    unit,
                })
            }
        }
    }

    fn at(&self, t: f64) -> Value {
        match self {
            Self::Number { from, delta } => json!(from + delta * t),
            Self::Object { from, to } => {
                let mut value = Map::new();
                for (key, start) in from {
                    let end = to.get(key);
                    let current = match (start.as_f64(), end.and_then(Value::as_f64)) {
                        (Some(a), Some(b)) => json!(a + (b - a) * t),
                        _ if t >= 1.0 => end.cloned().unwrap_or_else(|| start.clone()),
                        _ => start.clone(),
                    };
                    value.insert(key.clone(), current);
                }
                Value::Object(value)
            }
            Self::HexColor { from, to } => {
                let channel = |i: usize| to_channel(from[i] + (to[i] - from[i]) * t);
                Value::String(format!("#{:02x}{:02x}{:02x}", channel(0), channel(1), channel(2)))
            }
            Self::Unit {
                from,
                delta,
                decimals,
                unit,
            } => Value::String(format!("{:.*}{unit}", *decimals, from + delta * t)),
        }
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn to_channel(value: f64) -> u8 {
    value.clamp(0.0, 255.0) as u8
}

fn parse_hex_color(color: &str) -> Result<[f64; 3], String> {
    let hex = color
        .strip_prefix('#')
        .filter(|hex| hex.len() == 6)
        .ok_or_else(|| format!("'{color}' is not a #rrggbb colour"))?;
    let value = u32::from_str_radix(hex, 16).map_err(|e| format!("'{color}': {e}"))?;
    Ok([
        f64::from((value >> 16) & 0xff),
        f64::from((value >> 8) & 0xff),
        f64::from(value & 0xff),
    ])
}

fn unit_pattern() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(-?[0-9]*\.?[0-9]*)(px|em|cm|mm|in|pt|pc|%)").ok())
        .as_ref()
}

/// Split a length into number, unit and number of decimals.
fn parse_unit(length: &str) -> Result<(f64, String, usize), String> {
    let captures = unit_pattern()
        .and_then(|re| re.captures(length))
        .ok_or_else(|| format!("'{length}' has no unit"))?;
    let number = captures.get(1).map_or("", |m| m.as_str());
    let unit = captures.get(2).map_or("", |m| m.as_str());
    let value = number
        .parse::<f64>()
        .map_err(|e| format!("'{length}': {e}"))?;
    let decimals = number.split_once('.').map_or(0, |(_, fraction)| fraction.len());
    Ok((value, unit.to_owned(), decimals))
}

/// Options for [`Graph::transition`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransitionOptions {
    /// Total duration; `None` uses [`TransitionConfig::duration_ms`].
    pub duration: Option<Duration>,
    /// Delay before starting; `None` uses [`TransitionConfig::delay_ms`].
    pub delay: Option<Duration>,
    /// Easing curve.
    pub timing: TimingFunction,
    /// Value interpolation.
    pub interpolation: Interpolation,
    /// Options of every frame's write.
    pub set_options: SetOptions,
}

impl TransitionOptions {
    /// Set the duration.
    #[must_use]
    pub const fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    /// Set the start delay.
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Set the easing curve.
    #[must_use]
    pub fn with_timing(mut self, timing: TimingFunction) -> Self {
        self.timing = timing;
        self
    }

    /// Set the interpolation.
    #[must_use]
    pub const fn with_interpolation(mut self, interpolation: Interpolation) -> Self {
        self.interpolation = interpolation;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Phase {
    Delayed,
    Scheduled,
    Running { first_frame: Duration },
}

struct ActiveTransition {
    cell: CellId,
    path: AttrPath,
    target: Value,
    options: TransitionOptions,
    phase: Phase,
    handle: FrameHandle,
    interpolator: Option<Interpolator>,
}

/// Transition bookkeeping owned by a graph.
pub(crate) struct Transitions {
    config: TransitionConfig,
    scheduler: Box<dyn FrameScheduler>,
    // Handle to the built-in clock while no other scheduler is installed.
    manual: Option<ManualScheduler>,
    active: Vec<ActiveTransition>,
}

impl Transitions {
    pub(crate) fn new(config: TransitionConfig) -> Self {
        let manual = ManualScheduler::new();
        Self {
            config,
            scheduler: Box::new(manual.clone()),
            manual: Some(manual),
            active: Vec::new(),
        }
    }

    fn position(&self, handle: FrameHandle) -> Option<usize> {
        self.active.iter().position(|t| t.handle == handle)
    }
}

impl Graph {
    /// Use `scheduler` for transition frames.
    #[must_use]
    pub fn with_scheduler(mut self, scheduler: impl FrameScheduler + 'static) -> Self {
        self.set_scheduler(scheduler);
        self
    }

    /// Replace the frame scheduler. Active transitions are cancelled first,
    /// since their frames belong to the old scheduler.
    pub fn set_scheduler(&mut self, scheduler: impl FrameScheduler + 'static) {
        let cells: Vec<CellId> = self.transitions.active.iter().map(|t| t.cell.clone()).collect();
        for cell in cells {
            self.stop_transitions(&cell, None);
        }
        self.transitions.scheduler = Box::new(scheduler);
        self.transitions.manual = None;
    }

    /// The built-in [`ManualScheduler`] a new graph starts with.
    ///
    /// Advance it to drive transitions without installing a scheduler of
    /// your own. Returns `None` once [`Graph::set_scheduler`] has replaced it.
    #[must_use]
    pub fn manual_scheduler(&self) -> Option<ManualScheduler> {
        self.transitions.manual.clone()
    }

    /// Animate the value at `path` towards `target`.
    ///
    /// Transitions already active on `path` or below it are cancelled first.
    /// The start value is read when the delay has elapsed.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::CellNotFound`] if the cell is not live and
    /// [`GraphError::InvalidTransition`] if `target` does not suit the
    /// interpolation.
    pub fn transition(
        &mut self,
        id: &CellId,
        path: impl Into<AttrPath>,
        target: Value,
        options: TransitionOptions,
    ) -> GraphResult<FrameHandle> {
        if !self.contains(id) {
            return Err(GraphError::CellNotFound(id.clone()));
        }
        let path = path.into();
        Interpolator::new(options.interpolation, Some(&target), &target).map_err(|reason| {
            GraphError::InvalidTransition {
                path: path.to_string(),
                reason,
            }
        })?;

        self.stop_transitions(id, Some(&path));
        let delay = options.delay.unwrap_or(self.transitions.config.delay());
        let handle = self.transitions.scheduler.request_frame(delay);
        tracing::debug!("Scheduled transition of {path} on {id} after {delay:?}");
        self.transitions.active.push(ActiveTransition {
            cell: id.clone(),
            path,
            target,
            options,
            phase: Phase::Delayed,
            handle,
            interpolator: None,
        });
        Ok(handle)
    }

    /// Run the transition step owning `handle` at time `now`.
    ///
    /// Revoked or unknown handles are ignored.
    pub fn run_frame(&mut self, handle: FrameHandle, now: Duration) {
        let Some(index) = self.transitions.position(handle) else {
            tracing::trace!("Ignoring stale frame {handle:?}");
            return;
        };
        match self.transitions.active[index].phase {
            Phase::Delayed => self.start_transition(index),
            Phase::Scheduled => self.step_transition(index, now, now),
            Phase::Running { first_frame } => self.step_transition(index, first_frame, now),
        }
    }

    fn start_transition(&mut self, index: usize) {
        let entry = &self.transitions.active[index];
        let (cell, path) = (entry.cell.clone(), entry.path.clone());
        let from = self.get_cell(&cell).and_then(|c| c.prop(&path));
        let interpolator = match Interpolator::new(entry.options.interpolation, from, &entry.target) {
            Ok(interpolator) => interpolator,
            Err(reason) => {
                tracing::warn!("Dropping transition of {path} on {cell}: {reason}");
                self.transitions.active.remove(index);
                return;
            }
        };

        let handle = self.transitions.scheduler.request_frame(FRAME_INTERVAL);
        let entry = &mut self.transitions.active[index];
        entry.interpolator = Some(interpolator);
        entry.phase = Phase::Scheduled;
        entry.handle = handle;
        self.emit(&GraphEvent::TransitionStart {
            cell,
            path: path.to_string(),
        });
    }

    fn step_transition(&mut self, index: usize, first_frame: Duration, now: Duration) {
        let entry = &self.transitions.active[index];
        let duration = entry
            .options
            .duration
            .unwrap_or(self.transitions.config.duration());
        let elapsed = now.saturating_sub(first_frame);
        let progress = if duration.is_zero() {
            1.0
        } else {
            (elapsed.as_secs_f64() / duration.as_secs_f64()).min(1.0)
        };
        let finished = progress >= 1.0;
        let Some(interpolator) = &entry.interpolator else {
            return;
        };
        let value = interpolator.at(entry.options.timing.apply(progress));
        let (cell, path) = (entry.cell.clone(), entry.path.clone());
        let set_options = entry.options.set_options.clone();
        tracing::trace!("Transition of {path} on {cell} at {progress:.3}");

        // Bookkeeping happens before the write so that cascades triggered by
        // it see a consistent transition list.
        if finished {
            self.transitions.active.remove(index);
        } else {
            let handle = self.transitions.scheduler.request_frame(FRAME_INTERVAL);
            let entry = &mut self.transitions.active[index];
            entry.handle = handle;
            entry.phase = Phase::Running { first_frame };
        }

        if let Err(e) = self.set_prop(&cell, &path, value, &set_options) {
            tracing::warn!("Transition of {path} on {cell} failed: {e}");
            if !finished {
                self.stop_transitions(&cell, Some(&path));
            }
            return;
        }
        if finished {
            self.emit(&GraphEvent::TransitionEnd {
                cell,
                path: path.to_string(),
                outcome: TransitionOutcome::Completed,
            });
        }
    }

    /// Cancel the cell's transitions whose path starts with `prefix` (all of
    /// them with `None`). Started transitions publish a cancelled
    /// `TransitionEnd`. Returns how many were cancelled.
    pub fn stop_transitions(&mut self, id: &CellId, prefix: Option<&AttrPath>) -> usize {
        let (stopped, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.transitions.active)
            .into_iter()
            .partition(|t| t.cell == *id && prefix.is_none_or(|prefix| t.path.starts_with(prefix)));
        self.transitions.active = kept;

        for transition in &stopped {
            self.transitions.scheduler.cancel_frame(transition.handle);
            tracing::debug!("Cancelled transition of {} on {id}", transition.path);
            if transition.phase != Phase::Delayed {
                self.emit(&GraphEvent::TransitionEnd {
                    cell: id.clone(),
                    path: transition.path.to_string(),
                    outcome: TransitionOutcome::Cancelled,
                });
            }
        }
        stopped.len()
    }

    /// Paths with an active (delayed, scheduled or running) transition.
    #[must_use]
    pub fn get_transitions(&self, id: &CellId) -> Vec<AttrPath> {
        let mut paths: Vec<AttrPath> = Vec::new();
        for transition in self.transitions.active.iter().filter(|t| t.cell == *id) {
            if !paths.contains(&transition.path) {
                paths.push(transition.path.clone());
            }
        }
        paths
    }

    pub(crate) fn cancel_cell_transitions(&mut self, id: &CellId) {
        self.stop_transitions(id, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Cell;

    fn id(s: &str) -> CellId {
        CellId::from(s)
    }

    fn animated_graph() -> (Graph, ManualScheduler, Rc<RefCell<Vec<GraphEvent>>>) {
        let scheduler = ManualScheduler::new();
        let mut graph = Graph::new().with_scheduler(scheduler.clone());
        graph
            .add_cell(
                Cell::element("basic.Rect")
                    .with_id("a")
                    .with_prop("position", json!({ "x": 0, "y": 0 })),
            )
            .expect("add");
        let events = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&events);
        graph.subscribe(move |event| sink.borrow_mut().push(event.clone()));
        (graph, scheduler, events)
    }

    fn x(graph: &Graph) -> f64 {
        graph
            .get_cell(&id("a"))
            .and_then(|cell| cell.prop("position/x"))
            .and_then(Value::as_f64)
            .unwrap_or(f64::NAN)
    }

    fn ends(events: &[GraphEvent]) -> Vec<TransitionOutcome> {
        events
            .iter()
            .filter_map(|event| match event {
                GraphEvent::TransitionEnd { outcome, .. } => Some(*outcome),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_timing_functions() {
        assert!((TimingFunction::Linear.apply(0.5) - 0.5).abs() < 1e-12);
        assert!((TimingFunction::Quad.apply(0.5) - 0.25).abs() < 1e-12);
        assert!((TimingFunction::Cubic.apply(0.5) - 0.125).abs() < 1e-12);
        assert!((TimingFunction::InOut.apply(0.25) - 0.0625).abs() < 1e-12);
        assert!((TimingFunction::Exponential.apply(1.0) - 1.0).abs() < 1e-12);
        assert!((TimingFunction::Bounce.apply(1.0) - 1.0).abs() < 1e-12);
        assert!(TimingFunction::Bounce.apply(0.0).abs() < 1e-12);
        assert!((TimingFunction::Quad.reverse().apply(0.5) - 0.75).abs() < 1e-12);
        assert!((TimingFunction::Linear.reflect().apply(0.75) - 0.75).abs() < 1e-12);
        assert!(TimingFunction::back().apply(0.2) < 0.0);
        assert!(TimingFunction::back().clamp(0.0, 1.0).apply(0.2).abs() < 1e-12);
        assert!((TimingFunction::elastic().apply(1.0) - (10.0 * PI).cos()).abs() < 1e-12);
    }

    #[test]
    fn test_bounce_handles_out_of_range_progress() {
        assert!(TimingFunction::Bounce.apply(f64::NAN).abs() < 1e-12);
        assert!(TimingFunction::Bounce.apply(-3.0).abs() < 1e-12);
        assert!((TimingFunction::Bounce.apply(7.0) - 1.0).abs() < 1e-12);
        assert!((TimingFunction::Bounce.reverse().apply(f64::NAN) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_interpolators() {
        let number = Interpolator::new(Interpolation::Number, Some(&json!(10)), &json!(20))
            .expect("number");
        assert_eq!(number.at(0.5), json!(15.0));

        let object = Interpolator::new(
            Interpolation::Object,
            Some(&json!({ "x": 0, "y": 10 })),
            &json!({ "x": 10, "y": 0 }),
        )
        .expect("object");
        assert_eq!(object.at(0.5), json!({ "x": 5.0, "y": 5.0 }));

        let color = Interpolator::new(
            Interpolation::HexColor,
            Some(&json!("#000000")),
            &json!("#ffffff"),
        )
        .expect("colour");
        assert_eq!(color.at(0.5), json!("#7f7f7f"));
        assert_eq!(color.at(1.0), json!("#ffffff"));

        let unit = Interpolator::new(Interpolation::Unit, Some(&json!("10px")), &json!("20.5px"))
            .expect("unit");
        assert_eq!(unit.at(0.4), json!("14.2px"));

        assert!(Interpolator::new(Interpolation::Unit, Some(&json!("10")), &json!("20px")).is_err());
        assert!(Interpolator::new(Interpolation::HexColor, Some(&json!("red")), &json!("#fff")).is_err());
    }

    #[test]
    fn test_transition_runs_to_completion() {
        let (mut graph, scheduler, events) = animated_graph();
        graph
            .transition(&id("a"), "position/x", json!(100), TransitionOptions::default())
            .expect("transition");
        assert_eq!(graph.get_transitions(&id("a")), vec![AttrPath::parse("position/x")]);

        scheduler.advance(&mut graph, Duration::from_millis(10));
        assert!(events
            .borrow()
            .iter()
            .any(|e| matches!(e, GraphEvent::TransitionStart { path, .. } if path == "position/x")));

        scheduler.advance(&mut graph, Duration::from_millis(70));
        let midway = x(&graph);
        assert!(midway > 0.0 && midway < 100.0, "midway value {midway}");

        scheduler.advance(&mut graph, Duration::from_secs(1));
        assert!((x(&graph) - 100.0).abs() < 1e-9);
        assert_eq!(ends(&events.borrow()), vec![TransitionOutcome::Completed]);
        assert!(graph.get_transitions(&id("a")).is_empty());
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn test_superseded_transition_never_writes() {
        let (mut graph, scheduler, events) = animated_graph();
        let first = graph
            .transition(&id("a"), "position/x", json!(1000), TransitionOptions::default())
            .expect("first");
        scheduler.advance(&mut graph, Duration::from_millis(30));

        graph
            .transition(&id("a"), "position/x", json!(50), TransitionOptions::default())
            .expect("second");
        assert_eq!(ends(&events.borrow()), vec![TransitionOutcome::Cancelled]);
        events.borrow_mut().clear();

        graph.run_frame(first, scheduler.now());
        scheduler.advance(&mut graph, Duration::from_secs(1));

        for event in events.borrow().iter() {
            if let GraphEvent::Change { current: Some(position), .. } = event {
                let written = position["x"].as_f64().unwrap_or(f64::NAN);
                assert!(written <= 50.0, "stale write {written}");
            }
        }
        assert!((x(&graph) - 50.0).abs() < 1e-9);
        assert_eq!(ends(&events.borrow()), vec![TransitionOutcome::Completed]);
    }

    #[test]
    fn test_stop_transitions_by_prefix() {
        let (mut graph, scheduler, events) = animated_graph();
        for path in ["position/x", "position/y", "size/width"] {
            graph
                .transition(&id("a"), path, json!(10), TransitionOptions::default())
                .expect("transition");
        }
        scheduler.advance(&mut graph, Duration::from_millis(10));

        let prefix = AttrPath::parse("position");
        assert_eq!(graph.stop_transitions(&id("a"), Some(&prefix)), 2);
        assert_eq!(graph.stop_transitions(&id("a"), Some(&prefix)), 0);
        assert_eq!(graph.get_transitions(&id("a")), vec![AttrPath::parse("size/width")]);
        assert_eq!(
            ends(&events.borrow()),
            vec![TransitionOutcome::Cancelled, TransitionOutcome::Cancelled]
        );
        assert_eq!(scheduler.pending(), 1);
    }

    #[test]
    fn test_delayed_transition_cancels_silently() {
        let (mut graph, scheduler, events) = animated_graph();
        let handle = graph
            .transition(&id("a"), "position/x", json!(10), TransitionOptions::default())
            .expect("transition");
        graph.stop_transitions(&id("a"), None);
        assert!(!scheduler.is_pending(handle));
        assert!(ends(&events.borrow()).is_empty());
    }

    #[test]
    fn test_removal_cancels_transitions() {
        let (mut graph, scheduler, events) = animated_graph();
        graph
            .transition(&id("a"), "position/x", json!(10), TransitionOptions::default())
            .expect("transition");
        scheduler.advance(&mut graph, Duration::from_millis(10));
        graph.remove_cell(&id("a")).expect("remove");
        assert_eq!(scheduler.pending(), 0);
        assert_eq!(ends(&events.borrow()), vec![TransitionOutcome::Cancelled]);
    }

    #[test]
    fn test_invalid_target() {
        let (mut graph, _, _) = animated_graph();
        let result = graph.transition(
            &id("a"),
            "attrs/body/fill",
            json!("red"),
            TransitionOptions::default(),
        );
        assert!(matches!(result, Err(GraphError::InvalidTransition { .. })));
        assert!(matches!(
            graph.transition(&id("zz"), "x", json!(1), TransitionOptions::default()),
            Err(GraphError::CellNotFound(_))
        ));
    }

    #[test]
    fn test_default_scheduler_drives_transitions() {
        let mut graph = Graph::new();
        graph
            .add_cell(
                Cell::element("basic.Rect")
                    .with_id("a")
                    .with_prop("position", json!({ "x": 0, "y": 0 })),
            )
            .expect("add");
        let scheduler = graph.manual_scheduler().expect("built-in scheduler");

        graph
            .transition(&id("a"), "position/x", json!(40), TransitionOptions::default())
            .expect("transition");
        scheduler.advance(&mut graph, Duration::from_secs(1));
        assert!((x(&graph) - 40.0).abs() < 1e-9);

        graph.set_scheduler(ManualScheduler::new());
        assert!(graph.manual_scheduler().is_none());
    }

    #[test]
    fn test_zero_duration_completes_on_first_frame() {
        let (mut graph, scheduler, events) = animated_graph();
        let options = TransitionOptions::default()
            .with_duration(Duration::ZERO)
            .with_delay(Duration::ZERO)
            .with_timing(TimingFunction::Quad);
        graph
            .transition(&id("a"), "position/x", json!(7), options)
            .expect("transition");
        scheduler.advance(&mut graph, FRAME_INTERVAL);
        assert!((x(&graph) - 7.0).abs() < 1e-9);
        assert_eq!(ends(&events.borrow()), vec![TransitionOutcome::Completed]);
    }
}
