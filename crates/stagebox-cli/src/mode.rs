//! Command-line spelling of the upgrade mode.

use clap::ValueEnum;
use stagebox_common::types::UpgradeMode;

/// How the upgrade container is populated.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModeArg {
    /// Clone the running root and discard it after the upgrade.
    InPlace,
    /// Bootstrap a fresh root from the update image and boot into it next.
    NotInPlace,
}

impl From<ModeArg> for UpgradeMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::InPlace => Self::InPlace,
            ModeArg::NotInPlace => Self::NotInPlace,
        }
    }
}
