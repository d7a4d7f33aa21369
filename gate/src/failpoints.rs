use fail::fail_point;

use crate::bail;
use crate::error::{ErrorKind, GateError, GateResult};

/// Fires between folding a completion and committing the new state.
pub const RECORD_COMPLETION__BEFORE_COMMIT: &str = "record_completion.before_commit";

/// Fires after a trigger is committed and before it is published.
pub const RECORD_COMPLETION__BEFORE_DISPATCH: &str = "record_completion.before_dispatch";

/// Returns an error when the named failpoint is configured with `return`.
///
/// The optional parameter selects the error kind: `retry` or `no_retry` (default).
pub fn gate_fail_point(name: &str) -> GateResult<()> {
    fail_point!(name, |parameter| {
        let error_kind = match parameter.as_deref() {
            Some("retry") => ErrorKind::WithRetry,
            _ => ErrorKind::WithNoRetry,
        };

        bail!(
            error_kind,
            "An error occurred in a fail point",
            format!("The failpoint '{name}' returned an error")
        );
    });

    Ok(())
}
