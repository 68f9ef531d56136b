use crate::{common::*, config::LearningRateSchedule, error::ensure_config};

#[derive(Debug, Clone)]
pub enum LrScheduler {
    Constant {
        lr: R64,
    },
    StepWise {
        step: usize,
        warmup: Option<(usize, R64)>,
        steps: Vec<(usize, R64)>,
    },
}

impl LrScheduler {
    pub fn new(config: &LearningRateSchedule, init_step: impl Into<Option<usize>>) -> Result<Self> {
        let init_step = init_step.into();

        let mut scheduler = match *config {
            LearningRateSchedule::Constant { lr } => {
                ensure_config!(lr > 0.0, "the lr must be positive");
                Self::Constant { lr }
            }
            LearningRateSchedule::StepWise { ref steps } => {
                check_steps(steps)?;
                Self::StepWise {
                    step: 0,
                    warmup: None,
                    steps: steps.clone(),
                }
            }
            LearningRateSchedule::Warmup {
                warmup_steps,
                warmup_lr,
                ref steps,
            } => {
                check_steps(steps)?;
                ensure_config!(warmup_lr > 0.0, "warmup_lr must be positive");
                Self::StepWise {
                    step: 0,
                    warmup: (warmup_steps > 0).then(|| (warmup_steps, warmup_lr)),
                    steps: steps.clone(),
                }
            }
        };

        if let Some(init_step) = init_step {
            scheduler.set_step(init_step);
        }

        Ok(scheduler)
    }

    pub fn set_step(&mut self, new_step: usize) {
        if let Self::StepWise { step, .. } = self {
            *step = new_step;
        }
    }

    /// The learning rate of the current step.
    pub fn lr(&self) -> f64 {
        match self {
            Self::Constant { lr } => lr.raw(),
            Self::StepWise {
                step,
                warmup,
                steps,
            } => {
                let index = match steps.binary_search_by_key(step, |(step_thresh, _lr)| *step_thresh)
                {
                    Ok(index) => index,
                    Err(index) => index.saturating_sub(1),
                };
                let lr = steps[index].1.raw();

                match *warmup {
                    Some((warmup_steps, warmup_lr)) if *step < warmup_steps => {
                        let ratio = *step as f64 / warmup_steps as f64;
                        warmup_lr.raw() + (lr - warmup_lr.raw()) * ratio
                    }
                    _ => lr,
                }
            }
        }
    }

    /// Returns the learning rate of the current step and advances by one.
    pub fn next(&mut self) -> f64 {
        let lr = self.lr();
        if let Self::StepWise { step, .. } = self {
            *step += 1;
        }
        lr
    }
}

fn check_steps(steps: &[(usize, R64)]) -> Result<()> {
    ensure_config!(
        !steps.is_empty() && steps[0].0 == 0,
        "the steps must start from zero"
    );
    ensure_config!(
        steps.iter().tuple_windows().all(|(prev, next)| prev.0 < next.0),
        "the steps must be monotonic"
    );
    ensure_config!(
        steps.iter().all(|(_, lr)| *lr > 0.0),
        "lr must be positive"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn step_wise_schedule() {
        let config = LearningRateSchedule::StepWise {
            steps: vec![(0, r64(0.1)), (3, r64(0.01)), (5, r64(0.001))],
        };
        let mut scheduler = LrScheduler::new(&config, None).unwrap();
        let lrs: Vec<_> = (0..7).map(|_| scheduler.next()).collect();
        assert_eq!(lrs, vec![0.1, 0.1, 0.1, 0.01, 0.01, 0.001, 0.001]);

        scheduler.set_step(4);
        assert_eq!(scheduler.lr(), 0.01);
    }

    #[test]
    fn warmup_ramps_linearly() {
        let config = LearningRateSchedule::Warmup {
            warmup_steps: 4,
            warmup_lr: r64(1e-4),
            steps: vec![(0, r64(1e-3)), (10, r64(1e-4))],
        };
        let mut scheduler = LrScheduler::new(&config, None).unwrap();
        assert_abs_diff_eq!(scheduler.next(), 1e-4);
        assert_abs_diff_eq!(scheduler.next(), 1e-4 + 0.25 * 9e-4, epsilon = 1e-12);

        scheduler.set_step(4);
        assert_abs_diff_eq!(scheduler.lr(), 1e-3);
        scheduler.set_step(12);
        assert_abs_diff_eq!(scheduler.lr(), 1e-4);
    }

    #[test]
    fn default_schedule_is_valid() {
        let scheduler = LrScheduler::new(&LearningRateSchedule::default(), 280_000).unwrap();
        assert_abs_diff_eq!(scheduler.lr(), 1e-4);
    }

    #[test]
    fn reject_non_monotonic_steps() {
        let config = LearningRateSchedule::StepWise {
            steps: vec![(0, r64(0.1)), (5, r64(0.01)), (5, r64(0.001))],
        };
        assert!(LrScheduler::new(&config, None).is_err());
    }
}
