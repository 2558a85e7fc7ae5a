//! The Run FSM's intervention operations (spec.md §4.5): `pause`, `resume`,
//! `cancel`, each valid only from the states the spec lists.

use fleetd_shared::models::RunStatus;
use fleetd_shared::FleetError;

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum Intervention {
    Pause,
    Resume,
    Cancel,
}

/// Checks whether `intervention` is legal from `current`, returning the
/// target status on success or a `Conflict` describing the violation.
pub fn validate_intervention(
    current: RunStatus,
    intervention: Intervention,
) -> Result<RunStatus, FleetError> {
    use Intervention::*;
    use RunStatus::*;

    match (intervention, current) {
        (Pause, Running) => Ok(Paused),
        (Resume, Paused) => Ok(Running),
        (Cancel, Queued | Assigned | Running | Paused) => Ok(Cancelled),
        _ => Err(FleetError::conflict(format!(
            "{intervention:?} is not valid from status {current:?}"
        ))),
    }
}

impl std::fmt::Debug for Intervention {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Intervention::Pause => "pause",
            Intervention::Resume => "resume",
            Intervention::Cancel => "cancel",
        };
        write!(f, "{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pause_requires_running() {
        assert_eq!(
            validate_intervention(RunStatus::Running, Intervention::Pause),
            Ok(RunStatus::Paused)
        );
        assert!(validate_intervention(RunStatus::Queued, Intervention::Pause).is_err());
    }

    #[test]
    fn resume_requires_paused() {
        assert_eq!(
            validate_intervention(RunStatus::Paused, Intervention::Resume),
            Ok(RunStatus::Running)
        );
        assert!(validate_intervention(RunStatus::Running, Intervention::Resume).is_err());
    }

    #[test]
    fn cancel_allowed_from_non_terminal_states() {
        for status in [RunStatus::Queued, RunStatus::Assigned, RunStatus::Running, RunStatus::Paused] {
            assert_eq!(
                validate_intervention(status, Intervention::Cancel),
                Ok(RunStatus::Cancelled)
            );
        }
    }

    #[test]
    fn cancel_rejected_from_terminal_states() {
        for status in [RunStatus::Done, RunStatus::Failed, RunStatus::Cancelled, RunStatus::Timeout] {
            assert!(validate_intervention(status, Intervention::Cancel).is_err());
        }
    }
}
