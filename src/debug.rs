// Stepwright: Debug controller (breakpoint cursor over the flattened steps)

use crate::workflow::{flatten, WorkflowStep};
use serde::Serialize;
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DebugState {
    Detached,
    Armed,
    Running,
    PausedAtBreakpoint,
    Stopped,
}

/// Navigates a workflow the way a debugger would, without executing
/// anything. Breakpoints outlive attach/stop cycles.
#[derive(Debug, Clone)]
pub struct DebugController {
    state: DebugState,
    step_ids: Vec<String>,
    cursor: Option<usize>,
    breakpoints: HashSet<String>,
}

impl DebugController {
    pub fn new() -> Self {
        Self {
            state: DebugState::Detached,
            step_ids: Vec::new(),
            cursor: None,
            breakpoints: HashSet::new(),
        }
    }

    pub fn state(&self) -> DebugState {
        self.state
    }

    pub fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    /// Id of the step under the cursor.
    pub fn current_step(&self) -> Option<&str> {
        self.cursor
            .and_then(|i| self.step_ids.get(i))
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.step_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.step_ids.is_empty()
    }

    pub fn breakpoints(&self) -> &HashSet<String> {
        &self.breakpoints
    }

    /// Toggle membership of `step_id`; returns whether it is now set.
    pub fn toggle_breakpoint(&mut self, step_id: &str) -> bool {
        if self.breakpoints.remove(step_id) {
            false
        } else {
            self.breakpoints.insert(step_id.to_string());
            true
        }
    }

    pub fn clear_breakpoints(&mut self) {
        self.breakpoints.clear();
    }

    /// Load the flattened step ids of `steps`.
    pub fn attach(&mut self, steps: &[WorkflowStep]) {
        self.step_ids = flatten(steps).into_iter().map(|s| s.id.clone()).collect();
        self.cursor = None;
        self.state = DebugState::Armed;
    }

    pub fn start(&mut self) {
        if self.step_ids.is_empty() {
            self.cursor = None;
            self.state = DebugState::Stopped;
            return;
        }
        self.cursor = Some(0);
        self.state = if self.breakpoints.contains(&self.step_ids[0]) {
            DebugState::PausedAtBreakpoint
        } else {
            DebugState::Running
        };
    }

    /// Move to the next breakpoint after the cursor, or to the end.
    pub fn continue_to_breakpoint(&mut self) {
        let Some(current) = self.cursor else {
            return;
        };
        let next = self
            .step_ids
            .iter()
            .enumerate()
            .skip(current + 1)
            .find(|(_, id)| self.breakpoints.contains(*id))
            .map(|(j, _)| j);

        match next {
            Some(j) => {
                self.cursor = Some(j);
                self.state = DebugState::PausedAtBreakpoint;
            }
            None => self.finish(),
        }
    }

    /// Move exactly one position.
    pub fn step_over(&mut self) {
        let Some(current) = self.cursor else {
            return;
        };
        let next = current + 1;
        if next >= self.step_ids.len() {
            self.finish();
            return;
        }
        self.cursor = Some(next);
        self.state = if self.breakpoints.contains(&self.step_ids[next]) {
            DebugState::PausedAtBreakpoint
        } else {
            DebugState::Running
        };
    }

    pub fn stop(&mut self) {
        self.cursor = None;
        self.state = DebugState::Detached;
    }

    fn finish(&mut self) {
        self.cursor = Some(self.step_ids.len());
        self.state = DebugState::Stopped;
    }
}

impl Default for DebugController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn steps() -> Vec<WorkflowStep> {
        vec![
            WorkflowStep::new("a", "log"),
            WorkflowStep::new("g", "group").with_children(vec![
                WorkflowStep::new("b", "log"),
                WorkflowStep::new("c", "log"),
            ]),
            WorkflowStep::new("d", "log"),
        ]
    }

    #[test]
    fn test_start_positions_at_zero() {
        let mut dbg = DebugController::new();
        assert_eq!(dbg.state(), DebugState::Detached);
        dbg.attach(&steps());
        assert_eq!(dbg.state(), DebugState::Armed);
        dbg.start();
        assert_eq!(dbg.cursor(), Some(0));
        assert_eq!(dbg.current_step(), Some("a"));
        assert_eq!(dbg.state(), DebugState::Running);
    }

    #[test]
    fn test_continue_lands_on_next_breakpoint() {
        let mut dbg = DebugController::new();
        dbg.toggle_breakpoint("c");
        dbg.toggle_breakpoint("d");
        dbg.attach(&steps());
        dbg.start();

        dbg.continue_to_breakpoint();
        assert_eq!(dbg.current_step(), Some("c"));
        assert_eq!(dbg.cursor(), Some(3));
        assert_eq!(dbg.state(), DebugState::PausedAtBreakpoint);

        dbg.continue_to_breakpoint();
        assert_eq!(dbg.current_step(), Some("d"));

        dbg.continue_to_breakpoint();
        assert_eq!(dbg.state(), DebugState::Stopped);
        assert_eq!(dbg.current_step(), None);
    }

    #[test]
    fn test_step_over_advances_one() {
        let mut dbg = DebugController::new();
        dbg.toggle_breakpoint("b");
        dbg.attach(&steps());
        dbg.start();

        dbg.step_over();
        assert_eq!(dbg.current_step(), Some("g"));
        assert_eq!(dbg.state(), DebugState::Running);
        dbg.step_over();
        assert_eq!(dbg.current_step(), Some("b"));
        assert_eq!(dbg.state(), DebugState::PausedAtBreakpoint);
        dbg.step_over();
        dbg.step_over();
        assert_eq!(dbg.current_step(), Some("d"));
        dbg.step_over();
        assert_eq!(dbg.state(), DebugState::Stopped);
    }

    #[test]
    fn test_toggle_and_stop() {
        let mut dbg = DebugController::new();
        assert!(dbg.toggle_breakpoint("x"));
        assert!(!dbg.toggle_breakpoint("x"));
        assert!(dbg.breakpoints().is_empty());

        dbg.toggle_breakpoint("b");
        dbg.attach(&steps());
        dbg.start();
        dbg.stop();
        assert_eq!(dbg.state(), DebugState::Detached);
        assert_eq!(dbg.cursor(), None);
        assert!(dbg.breakpoints().contains("b"));
    }

    #[test]
    fn test_start_on_empty_workflow() {
        let mut dbg = DebugController::new();
        dbg.attach(&[]);
        dbg.start();
        assert_eq!(dbg.state(), DebugState::Stopped);
    }
}
