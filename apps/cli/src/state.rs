//! Persists `rg_state` records to a sidecar JSON file next to the
//! configuration file, so that successive `rgmctl` invocations (each a
//! fresh process, each wiring a fresh [`InMemoryLock`]) observe the
//! previous invocation's transitions. A real cluster's distributed lock
//! already persists this durably; this sidecar is this workspace's stand-in
//! for that, not a production design — see `DESIGN.md`.

use std::path::{Path, PathBuf};

use std::collections::HashSet;

use anyhow::{Context, Result};

use rgm_core::NodeId;
use rgm_forest::ForestHandle;
use rgm_state::{InMemoryLock, RgState, RgStateRecord};

fn sidecar_path(config_path: &Path) -> PathBuf {
    let mut name = config_path.file_name().unwrap_or_default().to_os_string();
    name.push(".state.json");
    config_path.with_file_name(name)
}

/// Loads any previously persisted records for `config_path` into `lock`.
/// Absent or unreadable sidecar files are treated as "no prior state".
pub fn load_into(config_path: &Path, lock: &InMemoryLock) -> Result<()> {
    let path = sidecar_path(config_path);
    let Ok(text) = std::fs::read_to_string(&path) else {
        return Ok(());
    };
    let records: Vec<RgStateRecord> = serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    for record in records {
        lock.seed(record);
    }
    Ok(())
}

/// Snapshots every record currently held by `lock` to `config_path`'s
/// sidecar file.
pub fn save_from(config_path: &Path, lock: &InMemoryLock) -> Result<()> {
    let path = sidecar_path(config_path);
    let records = lock.dump();
    let text = serde_json::to_string_pretty(&records)?;
    std::fs::write(&path, text).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

/// Initializes `rg_state` for every group in `forest` that `lock` has no
/// record of yet, mirroring `RequestKind::Init`'s autostart logic
/// (`STOPPED` unless `autostart="0"`, in which case `DISABLED`). A group
/// already seen by a prior invocation (surfaced through `load_into`) is
/// left untouched so its real lifecycle state survives across restarts.
pub fn seed_new_groups(forest: &ForestHandle, lock: &InMemoryLock) {
    let known: HashSet<_> = lock.dump().into_iter().map(|r| r.name).collect();
    let guard = forest.read();
    for name in guard.group_names() {
        if known.contains(&name) {
            continue;
        }
        let autostart = guard
            .find_group(&name)
            .and_then(|root| guard.resources[root.resource].attr("autostart"))
            .is_none_or(|value| value != "0");

        let mut record = RgStateRecord::new(name.clone());
        record.transition_to(RgState::Stopped, NodeId::NONE).expect("Uninitialized -> Stopped is always valid");
        if !autostart {
            record.transition_to(RgState::Disabled, NodeId::NONE).expect("any state -> Disabled is always valid");
        }
        lock.seed(record);
    }
}
