//! Ordered call/write/guard events inside one function.
//!
//! Reentrancy and call-safety checks look at what happens a few statements
//! after or before an external call. Detectors record the interesting
//! events of a function with a statement ordinal (tree detectors) or a
//! code-line ordinal (text detectors), then query the sequence here.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    /// External or cross-module call.
    Call,
    /// Write to persistent state.
    Write,
    /// Lock or reentrancy guard taken.
    Guard,
    /// Authorization primitive.
    Auth,
}

#[derive(Debug, Clone)]
pub struct Step {
    pub kind: StepKind,
    pub ordinal: usize,
    pub line: usize,
    pub col: usize,
    pub label: String,
}

#[derive(Debug, Default)]
pub struct Flow {
    steps: Vec<Step>,
}

impl Flow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, kind: StepKind, ordinal: usize, line: usize, col: usize, label: impl Into<String>) {
        self.steps.push(Step {
            kind,
            ordinal,
            line,
            col,
            label: label.into(),
        });
    }

    /// Calls in source order.
    pub fn calls(&self) -> Vec<&Step> {
        let mut calls: Vec<&Step> = self.steps.iter().filter(|s| s.kind == StepKind::Call).collect();
        calls.sort_by_key(|s| (s.line, s.col));
        calls
    }

    pub fn has(&self, kind: StepKind) -> bool {
        self.steps.iter().any(|s| s.kind == kind)
    }

    /// First state write within `window` statements after `call` that no
    /// guard covers. A guard taken at or before the call covers every
    /// later write; one taken after the call covers writes from its own
    /// statement on.
    pub fn write_after(&self, call: &Step, window: usize) -> Option<&Step> {
        let guards: Vec<usize> = self
            .steps
            .iter()
            .filter(|s| s.kind == StepKind::Guard)
            .map(|s| s.ordinal)
            .collect();
        if guards.iter().any(|&g| g <= call.ordinal) {
            return None;
        }

        self.steps
            .iter()
            .filter(|s| {
                s.kind == StepKind::Write
                    && s.ordinal > call.ordinal
                    && s.ordinal <= call.ordinal + window
                    && !guards.iter().any(|&g| g > call.ordinal && g <= s.ordinal)
            })
            .min_by_key(|s| (s.ordinal, s.line, s.col))
    }

    /// Whether an authorization step sits within `lookback` statements
    /// before `call` (or in the call's own statement).
    pub fn authorized_before(&self, call: &Step, lookback: usize) -> bool {
        let floor = call.ordinal.saturating_sub(lookback);
        self.steps.iter().any(|s| {
            s.kind == StepKind::Auth
                && s.ordinal >= floor
                && s.ordinal <= call.ordinal
                && (s.line, s.col) <= (call.line, call.col)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flow(steps: &[(StepKind, usize)]) -> Flow {
        let mut f = Flow::new();
        for (i, (kind, ord)) in steps.iter().enumerate() {
            f.push(*kind, *ord, ord + 1, i + 1, format!("s{}", i));
        }
        f
    }

    #[test]
    fn test_write_inside_window() {
        let f = flow(&[(StepKind::Call, 2), (StepKind::Write, 4)]);
        let call = f.calls()[0];
        assert!(f.write_after(call, 3).is_some());
        assert!(f.write_after(call, 1).is_none());
    }

    #[test]
    fn test_write_before_call_is_ignored() {
        let f = flow(&[(StepKind::Write, 1), (StepKind::Call, 2)]);
        assert!(f.write_after(f.calls()[0], 3).is_none());
    }

    #[test]
    fn test_guard_suppresses_write() {
        let f = flow(&[(StepKind::Guard, 0), (StepKind::Call, 2), (StepKind::Write, 3)]);
        assert!(f.write_after(f.calls()[0], 3).is_none());
    }

    #[test]
    fn test_guard_between_call_and_write_suppresses() {
        let f = flow(&[(StepKind::Call, 1), (StepKind::Guard, 2), (StepKind::Write, 3)]);
        assert!(f.write_after(f.calls()[0], 3).is_none());
    }

    #[test]
    fn test_guard_after_write_does_not_cover_it() {
        let f = flow(&[(StepKind::Call, 1), (StepKind::Write, 2), (StepKind::Guard, 3)]);
        let write = f.write_after(f.calls()[0], 3).expect("write before the lock");
        assert_eq!(write.ordinal, 2);
    }

    #[test]
    fn test_auth_lookback() {
        let f = flow(&[(StepKind::Auth, 1), (StepKind::Call, 5)]);
        let call = f.calls()[0];
        assert!(!f.authorized_before(call, 3));
        assert!(f.authorized_before(call, 4));
    }
}
