//! Ordered multi-store writes with compensation.
//!
//! Each step mutates one store and knows how to undo itself. When a step
//! fails, the steps that already completed are compensated in reverse order
//! and the original error is returned.

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::errors::DcrmError;

#[async_trait]
pub trait SagaStep<C: Send + Sync>: Send + Sync {
    fn name(&self) -> &'static str;

    async fn execute(&self, context: &mut C) -> Result<(), DcrmError>;

    async fn compensate(&self, context: &C) -> Result<(), DcrmError>;
}

pub struct Saga<C: Send + Sync> {
    name: &'static str,
    steps: Vec<Box<dyn SagaStep<C>>>,
}

impl<C: Send + Sync> Saga<C> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            steps: Vec::new(),
        }
    }

    #[must_use]
    pub fn step(mut self, step: impl SagaStep<C> + 'static) -> Self {
        self.steps.push(Box::new(step));
        self
    }

    pub async fn run(&self, context: &mut C) -> Result<(), DcrmError> {
        for (index, step) in self.steps.iter().enumerate() {
            debug!(saga = self.name, step = step.name(), "executing step");
            if let Err(error) = step.execute(context).await {
                debug!(saga = self.name, step = step.name(), error = ?error, "step failed, compensating");
                for completed in self.steps[..index].iter().rev() {
                    if let Err(compensation_error) = completed.compensate(context).await {
                        warn!(
                            saga = self.name,
                            step = completed.name(),
                            error = ?compensation_error,
                            "compensation failed"
                        );
                    }
                }
                return Err(error);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Journal {
        entries: Mutex<Vec<String>>,
    }

    impl Journal {
        fn push(&self, entry: String) {
            self.entries.lock().unwrap().push(entry);
        }
    }

    struct Recorded {
        name: &'static str,
        fail_execute: bool,
        fail_compensate: bool,
    }

    impl Recorded {
        fn ok(name: &'static str) -> Self {
            Self {
                name,
                fail_execute: false,
                fail_compensate: false,
            }
        }
    }

    #[async_trait]
    impl SagaStep<Journal> for Recorded {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn execute(&self, context: &mut Journal) -> Result<(), DcrmError> {
            if self.fail_execute {
                return Err(DcrmError::InvalidInput(self.name.to_string()));
            }
            context.push(format!("do {}", self.name));
            Ok(())
        }

        async fn compensate(&self, context: &Journal) -> Result<(), DcrmError> {
            context.push(format!("undo {}", self.name));
            if self.fail_compensate {
                return Err(DcrmError::ApplicationStoreFailed("delete", "down".to_string()));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_all_steps_succeed() {
        let saga = Saga::new("test").step(Recorded::ok("a")).step(Recorded::ok("b"));
        let mut journal = Journal::default();

        saga.run(&mut journal).await.unwrap();
        assert_eq!(*journal.entries.lock().unwrap(), vec!["do a", "do b"]);
    }

    #[tokio::test]
    async fn test_failure_compensates_completed_steps_in_reverse() {
        let saga = Saga::new("test")
            .step(Recorded::ok("a"))
            .step(Recorded::ok("b"))
            .step(Recorded {
                name: "c",
                fail_execute: true,
                fail_compensate: false,
            });
        let mut journal = Journal::default();

        let error = saga.run(&mut journal).await.unwrap_err();
        assert!(matches!(error, DcrmError::InvalidInput(step) if step == "c"));
        assert_eq!(
            *journal.entries.lock().unwrap(),
            vec!["do a", "do b", "undo b", "undo a"]
        );
    }

    #[tokio::test]
    async fn test_compensation_failure_does_not_mask_original_error() {
        let saga = Saga::new("test")
            .step(Recorded::ok("a"))
            .step(Recorded {
                name: "b",
                fail_execute: false,
                fail_compensate: true,
            })
            .step(Recorded {
                name: "c",
                fail_execute: true,
                fail_compensate: false,
            });
        let mut journal = Journal::default();

        let error = saga.run(&mut journal).await.unwrap_err();
        assert!(matches!(error, DcrmError::InvalidInput(_)));
        assert_eq!(
            *journal.entries.lock().unwrap(),
            vec!["do a", "do b", "undo b", "undo a"]
        );
    }

    #[tokio::test]
    async fn test_first_step_failure_compensates_nothing() {
        let saga = Saga::new("test").step(Recorded {
            name: "a",
            fail_execute: true,
            fail_compensate: false,
        });
        let mut journal = Journal::default();

        assert!(saga.run(&mut journal).await.is_err());
        assert!(journal.entries.lock().unwrap().is_empty());
    }
}
