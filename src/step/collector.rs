//! Completion policy for one step.

use serde_json::Value;

use super::channel::Outcome;
use crate::error::ChainError;
use crate::options::AnyPassedPredicate;

/// Accumulates outcomes until the node's completion policy is satisfied.
///
/// Transitions only forward: once done, further outcomes are ignored.
pub(crate) struct Collector {
    values: Vec<Value>,
    error: Option<ChainError>,
    target: usize,
    received: usize,
    done: bool,
    any_passed: Option<AnyPassedPredicate>,
}

impl Collector {
    pub(crate) fn new(target: usize, any_passed: Option<AnyPassedPredicate>) -> Self {
        Self {
            values: Vec::with_capacity(target),
            error: None,
            target,
            received: 0,
            done: false,
            any_passed,
        }
    }

    fn is_full(&self) -> bool {
        self.received >= self.target
    }

    fn complete(&mut self) -> bool {
        self.done = true;
        true
    }

    /// Feed one outcome. Returns true once the step is complete.
    pub(crate) fn decide(&mut self, outcome: Outcome) -> bool {
        if self.done || self.is_full() {
            return true;
        }
        self.received += 1;

        match &self.any_passed {
            Some(accepts) => {
                // Errors never complete an any-passed step on their own.
                let passed = matches!(&outcome, Ok(value) if accepts(value));
                if passed {
                    if let Ok(value) = outcome {
                        self.values.push(value);
                    }
                    return self.complete();
                }
                if self.is_full() {
                    self.error = Some(ChainError::NoPassed);
                    return self.complete();
                }
            }
            None => match outcome {
                Err(err) => {
                    self.error = Some(err);
                    return self.complete();
                }
                Ok(value) => {
                    self.values.push(value);
                    if self.is_full() {
                        return self.complete();
                    }
                }
            },
        }
        false
    }

    /// Force completion with `err`, e.g. when the run deadline fires.
    pub(crate) fn interrupt(&mut self, err: ChainError) {
        if !self.done {
            self.error = Some(err);
            self.done = true;
        }
    }

    pub(crate) fn is_done(&self) -> bool {
        self.done
    }

    pub(crate) fn finish(self) -> Result<Vec<Value>, ChainError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.values),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    fn fail(msg: &str) -> Outcome {
        Err(ChainError::task(anyhow::anyhow!(msg.to_string())))
    }

    #[test]
    fn test_wait_for_all_collects_target_count() {
        let mut collector = Collector::new(3, None);
        assert!(!collector.decide(Ok(json!(1))));
        assert!(!collector.decide(Ok(json!(2))));
        assert!(collector.decide(Ok(json!(3))));
        assert!(collector.is_done());
        assert_eq!(collector.finish().unwrap(), vec![json!(1), json!(2), json!(3)]);
    }

    #[test]
    fn test_first_error_fails_fast() {
        let mut collector = Collector::new(3, None);
        assert!(!collector.decide(Ok(json!(1))));
        assert!(collector.decide(fail("test error")));
        // Later outcomes are ignored.
        assert!(collector.decide(Ok(json!(3))));
        assert_eq!(collector.finish().unwrap_err().to_string(), "test error");
    }

    #[test]
    fn test_any_passed_keeps_only_the_match() {
        let mut collector = Collector::new(3, Some(Arc::new(|v: &Value| *v == json!(7))));
        assert!(!collector.decide(Ok(json!(2))));
        assert!(collector.decide(Ok(json!(7))));
        assert!(collector.decide(Ok(json!(7))));
        assert_eq!(collector.finish().unwrap(), vec![json!(7)]);
    }

    #[test]
    fn test_any_passed_ignores_errors_until_exhausted() {
        let mut collector = Collector::new(2, Some(Arc::new(|_: &Value| true)));
        assert!(!collector.decide(fail("first")));
        assert!(collector.decide(Ok(json!(100))));
        assert_eq!(collector.finish().unwrap(), vec![json!(100)]);
    }

    #[test]
    fn test_any_passed_without_match_reports_no_passed() {
        let mut collector = Collector::new(3, Some(Arc::new(|v: &Value| *v == json!(9))));
        assert!(!collector.decide(Ok(json!(2))));
        assert!(!collector.decide(fail("boom")));
        assert!(collector.decide(Ok(json!(8))));
        assert!(matches!(collector.finish(), Err(ChainError::NoPassed)));
    }

    #[test]
    fn test_interrupt_overrides_pending_and_keeps_completed() {
        let mut collector = Collector::new(2, None);
        collector.decide(Ok(json!(1)));
        collector.interrupt(ChainError::Timeout);
        assert!(matches!(collector.finish(), Err(ChainError::Timeout)));

        let mut collector = Collector::new(1, None);
        collector.decide(Ok(json!(1)));
        collector.interrupt(ChainError::Timeout);
        assert_eq!(collector.finish().unwrap(), vec![json!(1)]);
    }
}
