//! `timetravel flag ...`

use clap::Subcommand;
use serde::Serialize;
use timetravel_core::flags::rollout_bucket;
use timetravel_core::{FeatureFlag, ROLLOUT_HASH_VERSION, RequestContext, Timetravel};

use crate::output::print_json;

#[derive(Debug, Subcommand)]
pub enum FlagCommand {
    /// List every flag currently defined
    List,

    /// Evaluate a flag for a user
    Check {
        key: String,

        /// Caller user id; without one the flag evaluates as disabled
        #[arg(long, value_name = "ID")]
        user: Option<i64>,
    },

    /// Create or change a flag definition
    Set {
        key: String,

        #[arg(long, conflicts_with = "disabled")]
        enabled: bool,

        #[arg(long)]
        disabled: bool,

        /// Percentage of users (0-100) for whom the enabled flag is on
        #[arg(long, value_name = "PERCENT", value_parser = clap::value_parser!(u8).range(0..=100))]
        rollout: Option<u8>,

        #[arg(long)]
        description: Option<String>,
    },
}

#[derive(Debug, Serialize)]
struct CheckOutput<'a> {
    flag: &'a str,
    user_id: Option<i64>,
    enabled: bool,
    bucket: Option<u32>,
    rollout_hash_version: u32,
}

/// Merge the requested changes into the existing definition (or a new
/// disabled one at 100%).
fn apply_changes(
    existing: Option<FeatureFlag>,
    key: String,
    enabled: Option<bool>,
    rollout: Option<u8>,
    description: Option<String>,
) -> FeatureFlag {
    let mut flag = existing.unwrap_or_else(|| FeatureFlag::new(key, false, 100));
    if let Some(enabled) = enabled {
        flag.enabled = enabled;
    }
    if let Some(rollout) = rollout {
        flag.rollout_percentage = rollout.min(100);
    }
    if description.is_some() {
        flag.description = description;
    }
    flag
}

pub fn run(app: &Timetravel, command: FlagCommand) -> anyhow::Result<()> {
    match command {
        FlagCommand::List => print_json(&app.flag_engine().flags()),
        FlagCommand::Check { key, user } => {
            let ctx = user.map_or_else(RequestContext::anonymous, RequestContext::for_user);
            let enabled = app.flags().is_enabled(&ctx, &key);
            print_json(&CheckOutput {
                flag: &key,
                user_id: user,
                enabled,
                bucket: user.map(rollout_bucket),
                rollout_hash_version: ROLLOUT_HASH_VERSION,
            })
        }
        FlagCommand::Set {
            key,
            enabled,
            disabled,
            rollout,
            description,
        } => {
            let toggle = match (enabled, disabled) {
                (true, _) => Some(true),
                (_, true) => Some(false),
                _ => None,
            };
            let existing = app.flag_engine().flag(&key);
            let flag = apply_changes(existing, key, toggle, rollout, description);
            app.flag_source().save_flag(&flag)?;
            let count = app.flags().refresh()?;
            tracing::info!(flag = %flag.key, flags = count, "flag saved and cache refreshed");
            print_json(&app.flag_engine().flag(&flag.key).unwrap_or(flag))
        }
    }
}
