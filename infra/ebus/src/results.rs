//! Result aggregation for `event_collect` and `broadcast_collect`.
//!
//! The plain `*_result` dispatches keep the value returned by the last handler
//! invoked. A [`ResultSink`] sees every returned value instead.

/// Receives every value returned by the handlers of one dispatch, in invocation order.
pub trait ResultSink<R> {
    fn accept(&mut self, value: R);
}

/// Keeps every returned value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateResults<R> {
    pub values: Vec<R>,
}

impl<R> AggregateResults<R> {
    #[must_use]
    pub const fn new() -> Self {
        Self { values: Vec::new() }
    }

    #[must_use]
    pub fn into_inner(self) -> Vec<R> {
        self.values
    }
}

impl<R> Default for AggregateResults<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> ResultSink<R> for AggregateResults<R> {
    fn accept(&mut self, value: R) {
        self.values.push(value);
    }
}

/// Folds returned values into an accumulator.
///
/// ```rust
/// use ebus::{ReduceResult, ResultSink};
///
/// let mut total = ReduceResult::new(0, |acc: &mut i32, x| *acc += x);
/// total.accept(2);
/// total.accept(5);
/// assert_eq!(total.value, 7);
/// ```
pub struct ReduceResult<R, F> {
    pub value: R,
    op: F,
}

impl<R, F: FnMut(&mut R, R)> ReduceResult<R, F> {
    pub const fn new(initial: R, op: F) -> Self {
        Self { value: initial, op }
    }

    pub fn into_inner(self) -> R {
        self.value
    }
}

impl<R, F: FnMut(&mut R, R)> ResultSink<R> for ReduceResult<R, F> {
    fn accept(&mut self, value: R) {
        (self.op)(&mut self.value, value);
    }
}

impl<R: std::fmt::Debug, F> std::fmt::Debug for ReduceResult<R, F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReduceResult").field("value", &self.value).finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Logic {
    And,
    Or,
}

/// Combines `bool` results with `&&` or `||`.
///
/// With no handlers the value stays at the identity: `true` for `and`, `false` for `or`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogicalResult {
    pub value: bool,
    logic: Logic,
}

impl LogicalResult {
    #[must_use]
    pub const fn and() -> Self {
        Self { value: true, logic: Logic::And }
    }

    #[must_use]
    pub const fn or() -> Self {
        Self { value: false, logic: Logic::Or }
    }
}

impl ResultSink<bool> for LogicalResult {
    fn accept(&mut self, value: bool) {
        self.value = match self.logic {
            Logic::And => self.value && value,
            Logic::Or => self.value || value,
        };
    }
}
