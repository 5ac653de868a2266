use fail::fail_point;

use crate::bail;
use crate::error::{ErrorKind, FlowResult};

pub const DISCOVERY_BEFORE_SCAN: &str = "discovery.before_scan";
pub const WORKER_BEFORE_PROCESS: &str = "worker.before_process";

/// Evaluates a named fail point, turning its configured action into a
/// transfer error.
///
/// The optional fail point parameter selects how the injected error is
/// classified by the worker failure policy: `skip_item`, `retire_worker` or
/// `abort` (the default).
pub fn flow_fail_point(name: &str) -> FlowResult<()> {
    fail_point!(name, |parameter| {
        let mut error_kind = ErrorKind::WithAbort;
        if let Some(parameter) = parameter {
            error_kind = match parameter.as_str() {
                "skip_item" => ErrorKind::WithSkipItem,
                "retire_worker" => ErrorKind::WithRetireWorker,
                "abort" => ErrorKind::WithAbort,
                _ => ErrorKind::WithAbort,
            }
        }

        bail!(
            error_kind,
            "fail point triggered",
            format!("the fail point '{name}' injected an error")
        );
    });

    Ok(())
}
