//! `chartwatch audit`: report constraint audit results

use clap::Args;

use chartwatch_lifecycle::audit::total_violations;
use chartwatch_lifecycle::{ConstraintAudit, ConstraintAuditor};

use super::Harness;
use crate::{Error, GlobalArgs, Result};

#[derive(Args, Debug)]
pub struct AuditArgs {
    /// Fail unless every constraint has been audited
    #[arg(long)]
    pub require_complete: bool,

    /// Fail if any constraint reports violations
    #[arg(long)]
    pub fail_on_violations: bool,
}

/// JSON document printed on stdout
#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditReport<'a> {
    pub complete: bool,
    pub attempts: u32,
    pub total_violations: u64,
    pub constraints: &'a [ConstraintAudit],
}

pub async fn run(global: &GlobalArgs, args: AuditArgs) -> Result<()> {
    let harness = Harness::connect(&global.config, global.kubeconfig.clone()).await?;
    if harness.config.constraints.is_empty() {
        return Err(Error::validation("no constraint kinds configured"));
    }

    let auditor = ConstraintAuditor::new(harness.aggregate_reader(), harness.config.poller());
    let polled = auditor.wait_for_audit(&harness.config.constraints).await?;

    let report = AuditReport {
        complete: polled.ready,
        attempts: polled.attempts,
        total_violations: total_violations(&polled.value),
        constraints: &polled.value,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    check_report(&report, &args)
}

/// Apply the failure flags to a finished report
pub fn check_report(report: &AuditReport<'_>, args: &AuditArgs) -> Result<()> {
    if args.require_complete && !report.complete {
        let pending = report
            .constraints
            .iter()
            .filter(|c| !c.is_audited())
            .count();
        return Err(Error::command_failed(format!(
            "audit incomplete after {} attempts: {} of {} constraints not yet audited",
            report.attempts,
            pending,
            report.constraints.len()
        )));
    }
    if args.fail_on_violations && report.total_violations > 0 {
        return Err(Error::command_failed(format!(
            "{} constraint violations",
            report.total_violations
        )));
    }
    Ok(())
}
