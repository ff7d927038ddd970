//! Rewrites a client's `mcpServers`/`mcp_servers` object so each entry
//! invokes the shim instead of the tool server directly.

use std::path::Path;

use serde_json::{json, Value};

use crate::error::ImporterError;
use crate::io;

const SERVERS_KEYS: [&str; 2] = ["mcpServers", "mcp_servers"];

/// Outcome of a single import run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    /// Entries newly rewritten to route through the shim.
    pub rewritten: usize,
    /// Entries already in rewritten form, left as-is.
    pub already_rewritten: usize,
    /// Whether a new backup file was created (`false` if one already existed).
    pub backup_created: bool,
}

fn find_servers_key(config: &Value) -> Option<&'static str> {
    SERVERS_KEYS.into_iter().find(|key| config.get(key).is_some_and(Value::is_object))
}

/// True if `entry` already routes through `shim_path` (command matches the
/// shim and its args contain a `--` separator).
pub fn is_rewritten(entry: &Value, shim_path: &str) -> bool {
    let command_matches = entry.get("command").and_then(Value::as_str) == Some(shim_path);
    let has_separator = entry
        .get("args")
        .and_then(Value::as_array)
        .is_some_and(|args| args.iter().any(|a| a.as_str() == Some("--")));
    command_matches && has_separator
}

fn rewrite_entry(name: &str, entry: &Value, shim_path: &str) -> Value {
    let original_command = entry.get("command").and_then(Value::as_str).unwrap_or_default();
    let original_args: Vec<Value> = entry
        .get("args")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let mut new_args = vec![json!(format!("--server-name={name}")), json!("--"), json!(original_command)];
    new_args.extend(original_args);

    let mut rewritten = json!({
        "command": shim_path,
        "args": new_args,
    });
    if let Some(env) = entry.get("env") {
        rewritten.as_object_mut().expect("object literal above").insert("env".into(), env.clone());
    }
    rewritten
}

/// Reads `config_path`, backs it up on first mutation, rewrites every
/// `mcpServers`/`mcp_servers` entry not already in rewritten form, and
/// writes the result back atomically.
pub fn import_config(config_path: &Path, shim_path: &str) -> Result<ImportSummary, ImporterError> {
    let original_bytes =
        std::fs::read(config_path).map_err(|source| ImporterError::Read { path: config_path.to_path_buf(), source })?;
    let mut config: Value = serde_json::from_slice(&original_bytes)
        .map_err(|source| ImporterError::InvalidJson { path: config_path.to_path_buf(), source })?;

    let servers_key = find_servers_key(&config)
        .ok_or_else(|| ImporterError::NoServersObject { path: config_path.to_path_buf() })?;

    let mode = io::existing_mode(config_path);
    let backup = io::backup_path(config_path);
    let backup_created = if backup.exists() {
        false
    } else {
        io::atomic_write(&backup, &original_bytes, mode)?;
        true
    };

    let mut summary = ImportSummary { backup_created, ..ImportSummary::default() };

    let servers = config
        .get_mut(servers_key)
        .and_then(Value::as_object_mut)
        .expect("find_servers_key already confirmed this is an object");

    let names: Vec<String> = servers.keys().cloned().collect();
    for name in names {
        let entry = servers.get(&name).expect("iterating over own keys").clone();
        if is_rewritten(&entry, shim_path) {
            summary.already_rewritten += 1;
        } else {
            servers.insert(name.clone(), rewrite_entry(&name, &entry, shim_path));
            summary.rewritten += 1;
        }
    }

    let rendered = serde_json::to_vec_pretty(&config).expect("serializing a parsed Value cannot fail");
    io::atomic_write(config_path, &rendered, mode)?;

    Ok(summary)
}

/// Copies the backup at `<config_path>.subluminal.bak` back over
/// `config_path`. The backup file itself is left in place afterward.
pub fn restore_config(config_path: &Path) -> Result<(), ImporterError> {
    let backup = io::backup_path(config_path);
    if !backup.exists() {
        return Err(ImporterError::NoBackup { path: backup });
    }
    let contents =
        std::fs::read(&backup).map_err(|source| ImporterError::Read { path: backup.clone(), source })?;
    let mode = io::existing_mode(config_path);
    io::atomic_write(config_path, &contents, mode)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHIM: &str = "/usr/local/bin/sublum-shim";

    fn write_config(dir: &Path, body: &str) -> std::path::PathBuf {
        let path = dir.join("config.json");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn import_rewrites_a_plain_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            dir.path(),
            r#"{"mcpServers":{"git":{"command":"git-mcp","args":["--verbose"],"env":{"TOKEN":"x"}}}}"#,
        );
        let summary = import_config(&path, SHIM).unwrap();
        assert_eq!(summary, ImportSummary { rewritten: 1, already_rewritten: 0, backup_created: true });

        let rewritten: Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        let git = &rewritten["mcpServers"]["git"];
        assert_eq!(git["command"], SHIM);
        assert_eq!(git["args"], json!(["--server-name=git", "--", "git-mcp", "--verbose"]));
        assert_eq!(git["env"]["TOKEN"], "x");
    }

    #[test]
    fn import_supports_snake_case_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), r#"{"mcp_servers":{"fs":{"command":"fs-mcp","args":[]}}}"#);
        let summary = import_config(&path, SHIM).unwrap();
        assert_eq!(summary.rewritten, 1);
    }

    #[test]
    fn reimporting_an_already_rewritten_entry_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            dir.path(),
            r#"{"mcpServers":{"git":{"command":"git-mcp","args":["--verbose"]}}}"#,
        );
        import_config(&path, SHIM).unwrap();
        let first_pass: Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();

        let summary = import_config(&path, SHIM).unwrap();
        assert_eq!(summary, ImportSummary { rewritten: 0, already_rewritten: 1, backup_created: false });

        let second_pass: Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(first_pass, second_pass, "re-running import must not double-wrap an entry");
    }

    #[test]
    fn backup_is_created_once_and_left_untouched_afterward() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), r#"{"mcpServers":{"git":{"command":"git-mcp","args":[]}}}"#);
        import_config(&path, SHIM).unwrap();
        let backup_path = io::backup_path(&path);
        let backup_after_first = std::fs::read(&backup_path).unwrap();

        // Mutate the config again to confirm a second import doesn't refresh the backup.
        let mut config: Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        config["mcpServers"]["extra"] = json!({"command": "extra-mcp", "args": []});
        std::fs::write(&path, serde_json::to_vec(&config).unwrap()).unwrap();

        import_config(&path, SHIM).unwrap();
        let backup_after_second = std::fs::read(&backup_path).unwrap();
        assert_eq!(backup_after_first, backup_after_second);
    }

    #[test]
    fn restore_copies_backup_back_onto_config() {
        let dir = tempfile::tempdir().unwrap();
        let original = r#"{"mcpServers":{"git":{"command":"git-mcp","args":[]}}}"#;
        let path = write_config(dir.path(), original);
        import_config(&path, SHIM).unwrap();
        assert_ne!(std::fs::read_to_string(&path).unwrap(), original);

        restore_config(&path).unwrap();
        let restored: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        let expected: Value = serde_json::from_str(original).unwrap();
        assert_eq!(restored, expected);
    }

    #[test]
    fn restore_without_a_backup_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), r#"{"mcpServers":{}}"#);
        assert!(restore_config(&path).is_err());
    }

    #[test]
    fn missing_servers_object_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), r#"{"other":true}"#);
        assert!(import_config(&path, SHIM).is_err());
    }
}
