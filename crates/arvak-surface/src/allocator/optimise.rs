//! Hill-climbing over placement plans.

use tracing::{debug, info, instrument};

use super::{Allocator, Plan};
use crate::error::CompileResult;
use crate::geometry::Qcb;
use crate::mapper::ExternTable;
use crate::scheduler::Scheduler;

/// Outcome of [`Allocator::optimise`].
#[derive(Debug, Clone)]
pub struct Placement {
    pub plan: Plan,
    pub qcb: Qcb,
    /// Scheduled cycle count of the layout.
    pub cycles: u32,
}

impl Allocator<'_> {
    /// Cycle count of a layout under the DAG scheduler.
    pub fn evaluate(&self, qcb: &Qcb) -> CompileResult<u32> {
        let schedule = Scheduler::new(self.graph, qcb.n_channels())
            .with_externs(ExternTable::from_qcb(qcb))
            .run()?;
        Ok(schedule.cycles)
    }

    /// Place `plan`, then repeatedly try one more routing lane or one more
    /// instance of each extern template, keeping a candidate only if it
    /// schedules in strictly fewer cycles.
    ///
    /// The starting plan must place; candidates that fail to place or to
    /// schedule count as no improvement.
    #[instrument(skip(self, plan))]
    pub fn optimise(&self, plan: Plan, max_rounds: usize) -> CompileResult<Placement> {
        let qcb = self.place(&plan)?;
        let cycles = self.evaluate(&qcb)?;
        let mut best = Placement { plan, qcb, cycles };
        info!("Initial placement schedules in {} cycles", best.cycles);

        for round in 0..max_rounds {
            let mut candidates = vec![best.plan.with_lane()];
            candidates.extend(
                best.plan
                    .templates()
                    .into_iter()
                    .map(|t| best.plan.with_instance(t)),
            );

            let mut improved: Option<Placement> = None;
            for candidate in candidates {
                let qcb = match self.place(&candidate) {
                    Ok(qcb) => qcb,
                    Err(e) => {
                        debug!("Round {round}: candidate rejected: {e}");
                        continue;
                    }
                };
                let Ok(cycles) = self.evaluate(&qcb) else {
                    continue;
                };
                let bar = improved.as_ref().map_or(best.cycles, |p| p.cycles);
                if cycles < bar {
                    improved = Some(Placement {
                        plan: candidate,
                        qcb,
                        cycles,
                    });
                }
            }

            match improved {
                Some(p) => {
                    debug!(
                        "Round {round}: {} -> {} cycles ({} lanes, {} externs)",
                        best.cycles,
                        p.cycles,
                        p.plan.lanes,
                        p.plan.externs.len()
                    );
                    best = p;
                }
                None => break,
            }
        }

        info!(
            "Placement settled at {} cycles with {} channels",
            best.cycles,
            best.qcb.n_channels()
        );
        Ok(best)
    }
}
