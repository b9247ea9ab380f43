use std::{collections::BTreeMap, thread};

use chrono::{DateTime, Utc};
use log::{error, info};

use crate::{
    context::{ContextLoader, ServiceContext},
    core::{errors::StepFailure, types::IssuanceUnit},
    notify::{
        AlertMessage, FailedUnit,
        report::{failure_report, grouping_failure},
    },
    reconcile::{
        grouper::{GroupingError, build_units},
        pipeline::Pipeline,
    },
};

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassReport {
    pub started_at: DateTime<Utc>,
    /// Units the grouper produced.
    pub units: usize,
    /// Units that finished on their first run.
    pub succeeded: usize,
    /// Units that failed once and finished on the retry.
    pub recovered: usize,
    pub failures: Vec<FailedUnit>,
}

impl PassReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Runs one pass: group, run every unit, retry each failure once from the
/// step that failed, then alert on whatever is still failing.
///
/// A grouping error skips the pass entirely; it is alerted and returned.
pub fn run_once(context: &ServiceContext, now: DateTime<Utc>) -> Result<PassReport, GroupingError> {
    info!("[reconcile] pass started at {now}");

    let units = match build_units(
        context.cdn.as_ref(),
        context.store.as_ref(),
        &context.settings.renewal,
        now,
    ) {
        Ok(units) => units,
        Err(err) => {
            error!("[reconcile] skipping pass: {err}");
            send_alert(context, grouping_failure(&err.to_string()));
            return Err(err);
        }
    };

    let pipeline = Pipeline::new(context, now);
    let mut report = PassReport {
        started_at: now,
        units: units.len(),
        succeeded: 0,
        recovered: 0,
        failures: Vec::new(),
    };

    let mut retries: BTreeMap<String, (IssuanceUnit, StepFailure)> = BTreeMap::new();
    for mut unit in units {
        match pipeline.run(&mut unit) {
            Ok(()) => report.succeeded += 1,
            Err(failure) => {
                retries.insert(unit.parent_domain.clone(), (unit, failure));
            }
        }
    }

    for (parent, (mut unit, first)) in retries {
        info!("[reconcile] {parent}: retrying from {}", first.step);
        match pipeline.resume(first.step, &mut unit) {
            Ok(()) => report.recovered += 1,
            Err(failure) => report.failures.push(FailedUnit {
                parent_domain: parent,
                hostnames: unit.hostnames,
                step: failure.step,
                error: failure.source.to_string(),
            }),
        }
    }

    if !report.failures.is_empty() {
        send_alert(context, failure_report(&report.failures));
    }

    let level = if report.is_clean() {
        log::Level::Info
    } else {
        log::Level::Warn
    };
    log::log!(
        level,
        "[reconcile] pass finished: {} unit(s), {} succeeded, {} recovered on retry, {} failed",
        report.units,
        report.succeeded,
        report.recovered,
        report.failures.len()
    );
    Ok(report)
}

/// Reconciles forever, reloading the configuration between passes.
pub fn run_forever(loader: &mut ContextLoader) -> ! {
    loop {
        let context = loader.current();
        // Failures are alerted and logged inside the pass.
        let _ = run_once(&context, Utc::now());

        let interval = context.settings.pass_interval;
        info!("[reconcile] next pass in {}s", interval.as_secs());
        thread::sleep(interval);

        if loader.reload_if_changed() {
            info!("[reconcile] configuration reloaded");
        }
    }
}

fn send_alert(context: &ServiceContext, alert: AlertMessage) {
    if let Err(err) = context
        .notifier
        .notify(&alert.subject, &alert.text, &alert.html)
    {
        error!("[alert] failed to send \"{}\": {err}", alert.subject);
    }
}
