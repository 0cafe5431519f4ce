//! # CLI Command Implementations
//!
//! This module contains the actual implementations of CLI commands.
//!
//! Commands that change the ledger act as the local operator, who has admin
//! rights.

use super::SnapshotFormat;
use crate::api;
use crate::config::{AppConfig, Backend};
use crate::error::AppError;
use chrono::Utc;
use stampcard_core::{
    Actor, Ledger, LedgerError, MAX_SNAPSHOT_PAYLOAD_SIZE, Role, Snapshot,
    primitives::{MAGIC_BYTES, STAMP_COUNT},
};
use std::path::{Path, PathBuf};

/// Email recorded for grants made from the command line.
pub const OPERATOR_EMAIL: &str = "operator@localhost";

fn operator() -> Actor {
    Actor::new(OPERATOR_EMAIL, Role::Admin)
}

// =============================================================================
// FILE VALIDATION
// =============================================================================

/// Validate file size before reading.
fn validate_file_size(path: &Path, max_size: u64) -> Result<(), AppError> {
    let metadata = std::fs::metadata(path)
        .map_err(|e| AppError::Config(format!("Cannot read file metadata: {}", e)))?;

    if metadata.len() > max_size {
        return Err(LedgerError::Serialization(format!(
            "File size {} bytes exceeds maximum allowed {} bytes",
            metadata.len(),
            max_size
        ))
        .into());
    }
    Ok(())
}

/// Canonicalize an input path and make sure it is a regular file.
fn validate_file_path(path: &Path) -> Result<PathBuf, AppError> {
    let canonical = path.canonicalize().map_err(|e| {
        AppError::Config(format!("Invalid file path '{}': {}", path.display(), e))
    })?;

    if !canonical.is_file() {
        return Err(AppError::Config(format!(
            "Path '{}' is not a regular file",
            path.display()
        )));
    }

    Ok(canonical)
}

/// Canonicalize the parent of an output path; the file itself may not exist yet.
fn validate_output_path(path: &Path) -> Result<PathBuf, AppError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let canonical_parent = parent.canonicalize().map_err(|e| {
        AppError::Config(format!(
            "Invalid output directory '{}': {}",
            parent.display(),
            e
        ))
    })?;

    if !canonical_parent.is_dir() {
        return Err(AppError::Config(format!(
            "Output directory '{}' is not a valid directory",
            parent.display()
        )));
    }

    let filename = path
        .file_name()
        .ok_or_else(|| AppError::Config("Output path has no filename".to_string()))?;

    Ok(canonical_parent.join(filename))
}

fn print_json(value: &serde_json::Value) {
    println!("{}", serde_json::to_string_pretty(value).unwrap_or_default());
}

// =============================================================================
// SERVER COMMAND
// =============================================================================

/// Start the HTTP server.
pub async fn cmd_server(config: &AppConfig) -> Result<(), AppError> {
    config.validate_for_server()?;
    let ledger = open_ledger(config)?;

    println!("Stamp Card Server Starting...");
    println!();
    println!("Configuration:");
    println!("  Address:  {}", config.server.addr());
    println!("  Backend:  {}", config.storage.backend);
    println!("  Database: {:?}", config.storage.path);
    println!("  Domain:   @{}", config.auth.allowed_domain);
    println!();
    println!("Endpoints:");
    println!("  GET  /health            - Health check");
    println!("  POST /api/login         - Log in with an identity token");
    println!("  GET  /api/profile       - Own profile");
    println!("  GET  /api/stamps        - Stamp card");
    println!("  POST /api/stamps/grant  - Grant a stamp");
    println!("  POST /api/stamps/revoke - Revoke a stamp");
    println!("  POST /api/role          - Change a role");
    println!("  GET  /api/users         - List users");
    println!("  GET  /api/grants        - Manager grant history");
    println!();
    println!("Press Ctrl+C to stop");
    println!();

    api::run_server(config, ledger).await
}

// =============================================================================
// STATUS COMMAND
// =============================================================================

/// Show ledger status.
pub fn cmd_status(config: &AppConfig, json_mode: bool) -> Result<(), AppError> {
    let ledger = open_ledger(config)?;
    let operator = operator();
    let users = ledger.list_users(&operator)?;
    let manager_grants = ledger.grant_count(&operator)?;

    let count_role = |role: Role| users.iter().filter(|u| u.role == role).count();
    let stamps_granted: usize = users.iter().map(|u| u.stamps.count_granted()).sum();
    let complete_cards = users.iter().filter(|u| u.stamps.is_complete()).count();

    if json_mode {
        print_json(&serde_json::json!({
            "database": config.storage.path.to_string_lossy(),
            "backend": config.storage.backend.to_string(),
            "users": users.len(),
            "students": count_role(Role::Student),
            "managers": count_role(Role::Manager),
            "admins": count_role(Role::Admin),
            "stamps_granted": stamps_granted,
            "complete_cards": complete_cards,
            "manager_grants": manager_grants,
        }));
        return Ok(());
    }

    println!("Stamp Card Ledger Status");
    println!("========================");
    println!("Database: {:?}", config.storage.path);
    println!("Backend:  {}", config.storage.backend);
    println!();
    println!(
        "Users:          {} ({} students, {} managers, {} admins)",
        users.len(),
        count_role(Role::Student),
        count_role(Role::Manager),
        count_role(Role::Admin)
    );
    println!("Stamps granted: {}", stamps_granted);
    println!("Complete cards: {} ({} slots each)", complete_cards, STAMP_COUNT);
    println!("Manager grants: {}", manager_grants);

    Ok(())
}

// =============================================================================
// INIT COMMAND
// =============================================================================

/// Initialize new database.
pub fn cmd_init(config: &AppConfig, force: bool) -> Result<(), AppError> {
    if config.storage.backend == Backend::Memory {
        return Err(AppError::Config(
            "The memory backend has nothing to initialize. Use --backend redb.".to_string(),
        ));
    }

    let db_path = &config.storage.path;
    if db_path.exists() {
        if !force {
            return Err(AppError::Config(
                "Database already exists. Use --force to overwrite.".to_string(),
            ));
        }
        std::fs::remove_file(db_path)?;
    }

    let _ledger = Ledger::with_redb(db_path)?;
    tracing::info!(event = "database_initialized", path = ?db_path, "database initialized");
    println!("Initialized new redb database at {:?}", db_path);

    Ok(())
}

// =============================================================================
// USERS COMMAND
// =============================================================================

/// List users with their stamp counts.
pub fn cmd_users(config: &AppConfig, json_mode: bool) -> Result<(), AppError> {
    let ledger = open_ledger(config)?;
    let users = ledger.list_users(&operator())?;

    if json_mode {
        let rows: Vec<api::UserResponse> = users.iter().map(api::UserResponse::from).collect();
        print_json(&serde_json::json!({ "users": rows, "total": users.len() }));
        return Ok(());
    }

    if users.is_empty() {
        println!("No users yet");
        return Ok(());
    }

    println!("{:<40} {:<8} {:>6}  NAME", "EMAIL", "ROLE", "STAMPS");
    for user in &users {
        println!(
            "{:<40} {:<8} {:>3}/{:<2}  {}",
            user.email,
            user.role.name(),
            user.stamps.count_granted(),
            STAMP_COUNT,
            user.display_name
        );
    }
    println!();
    println!("{} users", users.len());

    Ok(())
}

// =============================================================================
// GRANT / REVOKE COMMANDS
// =============================================================================

/// Grant a stamp as the operator.
pub fn cmd_grant(
    config: &AppConfig,
    json_mode: bool,
    target: &str,
    stamp: Option<&str>,
    auto: bool,
) -> Result<(), AppError> {
    let ledger = open_ledger(config)?;
    let stamp_id = ledger.grant(&operator(), target, stamp, auto)?;

    tracing::info!(
        event = "stamp_granted",
        actor = OPERATOR_EMAIL,
        target_email = %target,
        stamp_id = %stamp_id,
        "stamp granted from the command line"
    );

    if json_mode {
        print_json(&serde_json::json!({ "target_email": target, "stamp_id": stamp_id }));
    } else {
        println!("Granted {} to {}", stamp_id, target);
    }
    Ok(())
}

/// Revoke a stamp as the operator.
pub fn cmd_revoke(
    config: &AppConfig,
    json_mode: bool,
    target: &str,
    stamp: &str,
) -> Result<(), AppError> {
    let ledger = open_ledger(config)?;
    let outcome = ledger.revoke(&operator(), target, stamp)?;

    tracing::info!(
        event = "stamp_revoked",
        actor = OPERATOR_EMAIL,
        target_email = %target,
        stamp_id = %outcome.stamp_id,
        was_granted = outcome.was_granted,
        released_manager = outcome.released.as_ref().map(|r| r.manager_email.as_str()),
        "stamp revoked from the command line"
    );

    if json_mode {
        print_json(&serde_json::json!({
            "target_email": target,
            "stamp_id": outcome.stamp_id,
            "was_granted": outcome.was_granted,
            "released_grant": outcome.released,
        }));
        return Ok(());
    }

    if outcome.was_granted {
        println!("Revoked {} from {}", outcome.stamp_id, target);
    } else {
        println!("{} was not set for {}", outcome.stamp_id, target);
    }
    if let Some(released) = &outcome.released {
        println!(
            "Released grant by {} (made {})",
            released.manager_email, released.granted_at
        );
    }
    Ok(())
}

// =============================================================================
// SET-ROLE COMMAND
// =============================================================================

/// Change a user's role.
pub fn cmd_set_role(
    config: &AppConfig,
    json_mode: bool,
    email: &str,
    role: &str,
) -> Result<(), AppError> {
    let role: Role = role.parse()?;
    let ledger = open_ledger(config)?;
    let user = ledger.set_role(&operator(), email, role)?;

    tracing::info!(
        event = "role_changed",
        actor = OPERATOR_EMAIL,
        target_email = %user.email,
        role = %user.role,
        "role changed from the command line"
    );

    if json_mode {
        print_json(&serde_json::json!({ "email": user.email, "role": user.role }));
    } else {
        println!("{} is now {}", user.email, user.role);
    }
    Ok(())
}

// =============================================================================
// RESET COMMAND
// =============================================================================

/// Clear every card and the grant history, after writing a backup.
pub fn cmd_reset(
    config: &AppConfig,
    json_mode: bool,
    yes: bool,
    no_backup: bool,
    backup_dir: &Path,
) -> Result<(), AppError> {
    if !yes {
        return Err(AppError::Config(
            "Reset clears every stamp card. Re-run with --yes to confirm.".to_string(),
        ));
    }

    let ledger = open_ledger(config)?;

    let backup_path = if no_backup {
        None
    } else {
        let file_name = format!(
            "stampcard-backup-{}.json",
            Utc::now().format("%Y%m%dT%H%M%SZ")
        );
        let path = validate_output_path(&backup_dir.join(file_name))?;
        let written = write_snapshot(&ledger.snapshot()?, &path, SnapshotFormat::Json)?;
        tracing::info!(event = "backup_written", path = ?path, bytes = written, "pre-reset backup written");
        Some(path)
    };

    let summary = ledger.reset_all(&operator())?;
    tracing::warn!(
        event = "ledger_reset",
        actor = OPERATOR_EMAIL,
        users_reset = summary.users_reset,
        grants_deleted = summary.grants_deleted,
        "all stamp cards reset"
    );

    if json_mode {
        print_json(&serde_json::json!({
            "users_reset": summary.users_reset,
            "grants_deleted": summary.grants_deleted,
            "backup": backup_path.as_ref().map(|p| p.to_string_lossy().into_owned()),
        }));
        return Ok(());
    }

    if let Some(path) = &backup_path {
        println!("Backup written to {:?}", path);
    }
    println!(
        "Reset {} stamp cards and deleted {} manager grants",
        summary.users_reset, summary.grants_deleted
    );
    Ok(())
}

// =============================================================================
// BACKUP / RESTORE COMMANDS
// =============================================================================

/// Write a snapshot of the ledger.
pub fn cmd_backup(config: &AppConfig, output: &Path, format: SnapshotFormat) -> Result<(), AppError> {
    let validated_output = validate_output_path(output)?;
    let ledger = open_ledger(config)?;
    let snapshot = ledger.snapshot()?;
    let written = write_snapshot(&snapshot, &validated_output, format)?;

    tracing::info!(event = "backup_written", path = ?validated_output, bytes = written, "backup written");
    println!(
        "Backed up {} users and {} manager grants ({} bytes) to {:?}",
        snapshot.users.len(),
        snapshot.grants.len(),
        written,
        validated_output
    );
    Ok(())
}

/// Replace the ledger contents with a snapshot file.
pub fn cmd_restore(
    config: &AppConfig,
    json_mode: bool,
    input: &Path,
    yes: bool,
) -> Result<(), AppError> {
    if !yes {
        return Err(AppError::Config(
            "Restore replaces every user and grant. Re-run with --yes to confirm.".to_string(),
        ));
    }

    let validated_path = validate_file_path(input)?;
    validate_file_size(&validated_path, MAX_SNAPSHOT_PAYLOAD_SIZE as u64)?;
    let data = std::fs::read(&validated_path)?;
    let snapshot = read_snapshot(&data)?;
    let (users, grants) = (snapshot.users.len(), snapshot.grants.len());

    let ledger = open_ledger(config)?;
    ledger.restore(snapshot)?;

    tracing::warn!(
        event = "ledger_restored",
        path = ?validated_path,
        users,
        grants,
        "ledger restored from snapshot"
    );

    if json_mode {
        print_json(&serde_json::json!({ "users": users, "grants": grants }));
    } else {
        println!(
            "Restored {} users and {} manager grants from {:?}",
            users, grants, validated_path
        );
    }
    Ok(())
}

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

/// Open the ledger selected by the configuration.
pub fn open_ledger(config: &AppConfig) -> Result<Ledger, AppError> {
    match config.storage.backend {
        Backend::Redb => Ok(Ledger::with_redb(&config.storage.path)?),
        Backend::Memory => {
            tracing::warn!("Using the memory backend: changes are lost when the process exits");
            Ok(Ledger::in_memory())
        }
    }
}

/// Encode and write a snapshot, returning the number of bytes written.
pub fn write_snapshot(
    snapshot: &Snapshot,
    path: &Path,
    format: SnapshotFormat,
) -> Result<usize, AppError> {
    let data = match format {
        SnapshotFormat::Binary => snapshot.to_bytes()?,
        SnapshotFormat::Json => serde_json::to_vec_pretty(snapshot)
            .map_err(|e| LedgerError::Serialization(e.to_string()))?,
    };
    std::fs::write(path, &data)?;
    Ok(data.len())
}

/// Decode a snapshot, telling binary from JSON by the magic bytes.
pub fn read_snapshot(data: &[u8]) -> Result<Snapshot, AppError> {
    if data.starts_with(MAGIC_BYTES) {
        return Ok(Snapshot::from_bytes(data)?);
    }
    serde_json::from_slice(data).map_err(|e| {
        LedgerError::Serialization(format!("not a binary or JSON snapshot: {}", e)).into()
    })
}

// =============================================================================
// TESTS
// =============================================================================
