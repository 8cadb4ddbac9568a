//! Human-readable result lines, written to stderr.

use stagebox_orchestrator::orchestrator::UpgradeOutcome;

const GREEN: &str = "\x1b[32m";
const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";
const RESET: &str = "\x1b[0m";

/// Renders the summary of a finished upgrade.
#[must_use]
pub fn format_outcome(outcome: &UpgradeOutcome) -> String {
    match outcome {
        UpgradeOutcome::Staged { name, version } => format!(
            "{GREEN}●{RESET} {BOLD}upgrade to {version} applied in place{RESET} {DIM}[{name}]{RESET}"
        ),
        UpgradeOutcome::Promoted {
            name,
            dataset,
            version,
        } => format!(
            "{GREEN}●{RESET} {BOLD}{version} staged on {dataset}{RESET}, active after reboot {DIM}[{name}]{RESET}"
        ),
    }
}

/// Prints the summary of a finished upgrade.
pub fn print_outcome(outcome: &UpgradeOutcome) {
    #[allow(clippy::print_stderr)]
    {
        eprintln!("{}", format_outcome(outcome));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stagebox_common::types::{ContainerName, DatasetName};

    #[test]
    fn staged_outcome_names_version_and_container() {
        let line = format_outcome(&UpgradeOutcome::Staged {
            name: ContainerName::new("upgrade.a1").unwrap(),
            version: "7.1.0".into(),
        });
        assert!(line.contains("7.1.0"));
        assert!(line.contains("upgrade.a1"));
    }

    #[test]
    fn promoted_outcome_names_dataset() {
        let line = format_outcome(&UpgradeOutcome::Promoted {
            name: ContainerName::new("upgrade.b2").unwrap(),
            dataset: DatasetName::parse("rpool/ROOT/upgrade.b2").unwrap(),
            version: "7.1.0".into(),
        });
        assert!(line.contains("rpool/ROOT/upgrade.b2"));
        assert!(line.contains("reboot"));
    }
}
