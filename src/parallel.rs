//! Per-stage fan-out over script units.
//!
//! Every stage runs its per-unit operation through [`for_each_unit`]: all units
//! run on the rayon pool, the call returns only after every unit finished, and
//! a failure is reported as the first error in registration order.

use rayon::prelude::*;
use tracing::debug;

use crate::error::{CompileError, Result};
use crate::logger::Logger;
use crate::unit::ScriptUnit;

/// Runs `op` on every unit in parallel with a full join. Each failure is
/// logged; the first one in registration order is returned, tagged with the
/// stage name.
pub fn for_each_unit<F>(
    stage: &'static str,
    units: &mut [ScriptUnit],
    logger: &dyn Logger,
    op: F,
) -> Result<()>
where
    F: Fn(&mut ScriptUnit) -> Result<()> + Sync + Send,
{
    debug!(stage, units = units.len(), "stage fan-out");

    let results: Vec<(String, Result<()>)> = units
        .par_iter_mut()
        .map(|unit| {
            let outcome = op(unit);
            (unit.file_name.clone(), outcome)
        })
        .collect();

    collect_first_error(stage, results, logger)
}

/// Read-only variant for stages that only inspect units.
pub fn for_each_unit_ref<F>(
    stage: &'static str,
    units: &[ScriptUnit],
    logger: &dyn Logger,
    op: F,
) -> Result<()>
where
    F: Fn(&ScriptUnit) -> Result<()> + Sync + Send,
{
    debug!(stage, units = units.len(), "stage fan-out (read-only)");

    let results: Vec<(String, Result<()>)> = units
        .par_iter()
        .map(|unit| (unit.file_name.clone(), op(unit)))
        .collect();

    collect_first_error(stage, results, logger)
}

fn collect_first_error(
    stage: &'static str,
    results: Vec<(String, Result<()>)>,
    logger: &dyn Logger,
) -> Result<()> {
    let mut first = None;
    for (unit, outcome) in results {
        if let Err(source) = outcome {
            logger.error(format_args!("[{}] {}: {}", stage, unit, source));
            if first.is_none() {
                first = Some(CompileError::StageFailed {
                    stage,
                    unit,
                    source: Box::new(source),
                });
            }
        }
    }

    match first {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
