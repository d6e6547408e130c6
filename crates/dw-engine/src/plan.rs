// plan.rs — Two-phase staging of multi-resource operations.
//
// A Plan is an ordered list of described actions over a context value.
// Running it is precheck-everything, then execute-in-order; a failed
// action triggers the compensators of every action that already ran, in
// reverse. The plan is always passed explicitly — there is no global
// mutable plan anywhere in the tool.

use tracing::{debug, warn};

use crate::error::EngineError;

type Precheck<'a, C> = Box<dyn Fn(&mut C) -> Result<(), EngineError> + 'a>;
type Execute<'a, C> = Box<dyn FnMut(&mut C) -> Result<(), EngineError> + 'a>;
type Compensate<'a, C> = Box<dyn FnMut(&mut C) + 'a>;

pub struct Action<'a, C> {
    description: String,
    precheck: Option<Precheck<'a, C>>,
    execute: Execute<'a, C>,
    compensate: Option<Compensate<'a, C>>,
}

impl<'a, C> Action<'a, C> {
    pub fn new(
        description: impl Into<String>,
        execute: impl FnMut(&mut C) -> Result<(), EngineError> + 'a,
    ) -> Self {
        Self {
            description: description.into(),
            precheck: None,
            execute: Box::new(execute),
            compensate: None,
        }
    }

    pub fn with_precheck(
        mut self,
        precheck: impl Fn(&mut C) -> Result<(), EngineError> + 'a,
    ) -> Self {
        self.precheck = Some(Box::new(precheck));
        self
    }

    pub fn with_compensator(mut self, compensate: impl FnMut(&mut C) + 'a) -> Self {
        self.compensate = Some(Box::new(compensate));
        self
    }
}

pub struct Plan<'a, C> {
    what: String,
    actions: Vec<Action<'a, C>>,
}

impl<'a, C> Plan<'a, C> {
    pub fn new(what: impl Into<String>) -> Self {
        Self {
            what: what.into(),
            actions: Vec::new(),
        }
    }

    pub fn push(&mut self, action: Action<'a, C>) {
        self.actions.push(action);
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// The action descriptions, in order (echoed under `--verbose`).
    pub fn describe(&self) -> Vec<String> {
        self.actions.iter().map(|a| a.description.clone()).collect()
    }

    /// Validate everything, then execute in order. On a mid-plan failure
    /// the compensators of completed actions run in reverse and the
    /// original error is returned.
    pub fn run(mut self, ctx: &mut C) -> Result<(), EngineError> {
        for action in &self.actions {
            if let Some(precheck) = &action.precheck {
                precheck(ctx)?;
            }
        }
        let mut completed: Vec<&mut Action<'a, C>> = Vec::new();
        let what = self.what.clone();
        for action in self.actions.iter_mut() {
            debug!(plan = %what, action = %action.description, "execute");
            if let Err(err) = (action.execute)(ctx) {
                warn!(plan = %what, action = %action.description, %err, "action failed; compensating");
                for done in completed.into_iter().rev() {
                    if let Some(compensate) = &mut done.compensate {
                        compensate(ctx);
                    }
                }
                return Err(err);
            }
            completed.push(action);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Ctx {
        log: Vec<&'static str>,
    }

    #[test]
    fn prechecks_all_run_before_any_execution() {
        let mut plan: Plan<Ctx> = Plan::new("test");
        plan.push(
            Action::new("first", |c: &mut Ctx| {
                c.log.push("exec1");
                Ok(())
            })
            .with_precheck(|_| Ok(())),
        );
        plan.push(
            Action::new("second", |c: &mut Ctx| {
                c.log.push("exec2");
                Ok(())
            })
            .with_precheck(|_| {
                Err(EngineError::precondition("second refuses", None))
            }),
        );
        let mut ctx = Ctx::default();
        let err = plan.run(&mut ctx).expect_err("precheck fails");
        assert_eq!(err.exit_code(), 1);
        // Nothing executed: the failing precheck aborted the whole plan.
        assert!(ctx.log.is_empty());
    }

    #[test]
    fn failure_compensates_completed_actions_in_reverse() {
        let mut plan: Plan<Ctx> = Plan::new("test");
        plan.push(
            Action::new("a", |c: &mut Ctx| {
                c.log.push("a");
                Ok(())
            })
            .with_compensator(|c: &mut Ctx| c.log.push("undo-a")),
        );
        plan.push(
            Action::new("b", |c: &mut Ctx| {
                c.log.push("b");
                Ok(())
            })
            .with_compensator(|c: &mut Ctx| c.log.push("undo-b")),
        );
        plan.push(Action::new("boom", |_: &mut Ctx| {
            Err(EngineError::internal("boom"))
        }));
        let mut ctx = Ctx::default();
        plan.run(&mut ctx).expect_err("third action fails");
        assert_eq!(ctx.log, vec!["a", "b", "undo-b", "undo-a"]);
    }
}
