//! ZFS command lines.

use crate::gateway::{RemoteLogin, ShellCommand};
use crate::naming::Snapshot;
use crate::replication::SendStep;
use std::collections::BTreeMap;

const LIST: &str = "zfs list -o name -H";

/// `zfs list -o name -H`
pub fn list_datasets() -> ShellCommand {
    ShellCommand::read_only(LIST)
}

/// `zfs list -o name -H -t snapshot`
pub fn list_snapshots() -> ShellCommand {
    ShellCommand::read_only(format!("{LIST} -t snapshot"))
}

/// `zfs destroy <snapshot>`
pub fn destroy(snapshot: &str) -> ShellCommand {
    ShellCommand::mutating(format!("zfs destroy {snapshot}"))
}

/// `zfs snapshot [-r] <name>`
pub fn snapshot(name: &str, recursive: bool) -> ShellCommand {
    let flag = if recursive { " -r" } else { "" };
    ShellCommand::mutating(format!("zfs snapshot{flag} {name}"))
}

/// `zfs send -v [-i <baseline>] <target> | ssh ... zfs recv -F <target>`
pub fn send(step: &SendStep, remote: &RemoteLogin) -> ShellCommand {
    let mut line = String::from("zfs send -v");
    if let Some(baseline) = &step.baseline {
        line.push_str(" -i ");
        line.push_str(&baseline.name);
    }
    line.push(' ');
    line.push_str(&step.target.name);
    line.push_str(" | ");
    line.push_str(&remote.prefix());
    line.push_str(" zfs recv -F ");
    line.push_str(&step.target.name);
    ShellCommand::mutating(line)
}

/// Keep listing lines that contain `filter` (all lines when `None`).
pub fn filter_names(lines: Vec<String>, filter: Option<&str>) -> Vec<String> {
    match filter {
        Some(pattern) if !pattern.is_empty() => lines
            .into_iter()
            .filter(|line| line.contains(pattern))
            .collect(),
        _ => lines,
    }
}

/// Group snapshots under the listed datasets. Every dataset gets an entry;
/// snapshots of unlisted datasets are dropped.
pub fn group_by_dataset(
    datasets: &[String],
    snapshots: Vec<Snapshot>,
) -> BTreeMap<String, Vec<Snapshot>> {
    let mut grouped: BTreeMap<String, Vec<Snapshot>> = datasets
        .iter()
        .map(|d| (d.clone(), Vec::new()))
        .collect();
    for snapshot in snapshots {
        if let Some(owned) = grouped.get_mut(&snapshot.dataset) {
            owned.push(snapshot);
        }
    }
    for owned in grouped.values_mut() {
        owned.sort_by(Snapshot::cmp_newest_first);
    }
    grouped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::naming::SnapshotNaming;
    use std::path::PathBuf;

    fn remote() -> RemoteLogin {
        RemoteLogin {
            host: "sshIP".to_string(),
            port: 22,
            key_path: PathBuf::from("sshKeyPath"),
            user: "sshUser".to_string(),
        }
    }

    #[test]
    fn test_listing_commands() {
        assert_eq!(list_datasets().line(), "zfs list -o name -H");
        assert_eq!(list_snapshots().line(), "zfs list -o name -H -t snapshot");
        assert!(!list_snapshots().is_mutating());
    }

    #[test]
    fn test_snapshot_command() {
        assert_eq!(
            snapshot("tank/data@20220805-000000", true).line(),
            "zfs snapshot -r tank/data@20220805-000000"
        );
        assert_eq!(
            snapshot("tank/data@20220805-000000", false).line(),
            "zfs snapshot tank/data@20220805-000000"
        );
    }

    #[test]
    fn test_send_commands() {
        let naming = SnapshotNaming::default();
        let base = naming.parse("nas/documents@20220803-000000").unwrap();
        let target = naming.parse("nas/documents@20220805-000000").unwrap();

        let incremental = send(
            &SendStep {
                target: target.clone(),
                baseline: Some(base),
            },
            &remote(),
        );
        assert_eq!(
            incremental.line(),
            "zfs send -v -i nas/documents@20220803-000000 nas/documents@20220805-000000 \
             | ssh -p 22 -i sshKeyPath sshUser@sshIP zfs recv -F nas/documents@20220805-000000"
        );

        let full = send(
            &SendStep {
                target,
                baseline: None,
            },
            &remote(),
        );
        assert!(full.line().starts_with("zfs send -v nas/documents@20220805-000000 | ssh"));
        assert!(full.is_mutating());
    }

    #[test]
    fn test_filter_names() {
        let lines = vec![
            "nas/documents".to_string(),
            "nas/media".to_string(),
            "backup/documents".to_string(),
        ];
        assert_eq!(
            filter_names(lines.clone(), Some("documents")),
            vec!["nas/documents", "backup/documents"]
        );
        assert_eq!(filter_names(lines.clone(), None).len(), 3);
        assert_eq!(filter_names(lines, Some("")).len(), 3);
    }

    #[test]
    fn test_group_by_dataset() {
        let naming = SnapshotNaming::default();
        let snapshots = naming.parse_all([
            "nas/documents@20220801-000000",
            "nas/documents@20220805-000000",
            "nas/documents/archive@20220803-000000",
            "other@20220803-000000",
        ]);
        let datasets = vec![
            "nas/documents".to_string(),
            "nas/documents/archive".to_string(),
            "nas/media".to_string(),
        ];
        let grouped = group_by_dataset(&datasets, snapshots);
        assert_eq!(grouped.len(), 3);
        assert_eq!(grouped["nas/documents"][0].name, "nas/documents@20220805-000000");
        assert_eq!(grouped["nas/documents/archive"].len(), 1);
        assert!(grouped["nas/media"].is_empty());
    }
}
