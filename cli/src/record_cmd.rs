//! `timetravel record ...`

use clap::Subcommand;
use timetravel_core::{RecordData, RecordPatch, Timetravel};

use crate::output::print_json;

#[derive(Debug, Subcommand)]
pub enum RecordCommand {
    /// Show the current version of a record
    Get { policyholder_id: i64 },

    /// Replace a record's data, writing the next version
    Put {
        policyholder_id: i64,

        /// Fields as KEY=VALUE
        #[arg(value_name = "KEY=VALUE", value_parser = parse_key_value)]
        fields: Vec<(String, String)>,
    },

    /// Set or remove individual fields of an existing record
    Patch {
        policyholder_id: i64,

        /// Fields to set, as KEY=VALUE
        #[arg(value_name = "KEY=VALUE", value_parser = parse_key_value)]
        fields: Vec<(String, String)>,

        /// Field to remove (repeatable)
        #[arg(long = "unset", value_name = "KEY")]
        unset: Vec<String>,
    },

    /// List every stored version number
    Versions { policyholder_id: i64 },

    /// Show the data exactly as it was at one version
    Show { policyholder_id: i64, version: i64 },

    /// Show the audit trail (or the event log with --events)
    History {
        policyholder_id: i64,

        #[arg(long)]
        events: bool,
    },
}

/// Parse `KEY=VALUE`; the value may itself contain `=`.
fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got `{raw}`")),
    }
}

fn build_patch(fields: Vec<(String, String)>, unset: Vec<String>) -> RecordPatch {
    fields
        .into_iter()
        .map(|(k, v)| (k, Some(v)))
        .chain(unset.into_iter().map(|k| (k, None)))
        .collect()
}

pub fn run(app: &Timetravel, command: RecordCommand) -> anyhow::Result<()> {
    let records = app.records();
    match command {
        RecordCommand::Get { policyholder_id } => print_json(&records.get_record(policyholder_id)?),
        RecordCommand::Put {
            policyholder_id,
            fields,
        } => {
            let data: RecordData = fields.into_iter().collect();
            print_json(&records.upsert_record(policyholder_id, data)?)
        }
        RecordCommand::Patch {
            policyholder_id,
            fields,
            unset,
        } => {
            let patch = build_patch(fields, unset);
            if patch.is_empty() {
                anyhow::bail!("nothing to change: pass KEY=VALUE fields or --unset KEY");
            }
            print_json(&records.update_record(policyholder_id, &patch)?)
        }
        RecordCommand::Versions { policyholder_id } => {
            print_json(&records.list_versions(policyholder_id)?)
        }
        RecordCommand::Show {
            policyholder_id,
            version,
        } => print_json(&records.get_version(policyholder_id, version)?),
        RecordCommand::History {
            policyholder_id,
            events,
        } => {
            if events {
                print_json(&app.store().events(policyholder_id)?)
            } else {
                print_json(&app.store().audit_trail(policyholder_id)?)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_key_value() {
        assert_eq!(
            parse_key_value("name=John").unwrap(),
            ("name".to_string(), "John".to_string())
        );
        assert_eq!(
            parse_key_value("expr=a=b").unwrap(),
            ("expr".to_string(), "a=b".to_string())
        );
        assert_eq!(
            parse_key_value("empty=").unwrap(),
            ("empty".to_string(), String::new())
        );
        assert!(parse_key_value("novalue").is_err());
        assert!(parse_key_value("=value").is_err());
    }

    #[test]
    fn test_build_patch_unset_wins_over_set() {
        let patch = build_patch(
            vec![("a".to_string(), "1".to_string()), ("b".to_string(), "2".to_string())],
            vec!["b".to_string()],
        );
        assert_eq!(patch, RecordPatch::new().set("a", "1").delete("b"));
    }
}
