use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::warn;

use crate::error::RpcError;
use crate::odoo::client::{OdooApi, OdooClient};

/// Both cleanup operations are gated on this flag, independent of the
/// registry-level guard on the tool definition.
pub const CLEANUP_GUARD_VAR: &str = "ODOO_ENABLE_CLEANUP_TOOLS";

const DEFAULT_DAYS_THRESHOLD: i64 = 180;

pub fn ensure_enabled(operation: &str) -> Result<(), RpcError> {
    let enabled = std::env::var(CLEANUP_GUARD_VAR)
        .map(|v| {
            let s = v.trim().to_ascii_lowercase();
            matches!(s.as_str(), "1" | "true" | "yes" | "y" | "on")
        })
        .unwrap_or(false);
    if enabled {
        Ok(())
    } else {
        Err(RpcError::OperationDisabled(format!(
            "{operation} requires {CLEANUP_GUARD_VAR}=true"
        )))
    }
}

#[derive(Debug, Clone, Default)]
pub struct CleanupOptions {
    pub remove_test_data: Option<bool>,
    pub archive_stale_records: Option<bool>,
    pub cleanup_drafts: Option<bool>,
    pub days_threshold: Option<i64>,
    pub dry_run: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepDetail {
    pub model: String,
    pub operation: String,
    pub records_affected: i64,
    pub note: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupReport {
    pub success: bool,
    pub timestamp: String,
    pub removed: i64,
    pub dry_run: bool,
    pub details: Vec<SweepDetail>,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl CleanupReport {
    fn new(dry_run: bool) -> Self {
        Self {
            success: true,
            timestamp: Utc::now().to_rfc3339(),
            removed: 0,
            dry_run,
            details: Vec::new(),
            warnings: Vec::new(),
            errors: Vec::new(),
        }
    }

    fn record(&mut self, model: &str, operation: &str, count: i64, note: impl Into<String>) {
        if count == 0 {
            return;
        }
        self.removed += count;
        self.details.push(SweepDetail {
            model: model.to_string(),
            operation: operation.to_string(),
            records_affected: count,
            note: note.into(),
        });
    }

    fn fail(&mut self, model: &str, err: impl std::fmt::Display) {
        self.success = false;
        self.errors.push(format!("{model}: {err}"));
    }
}

fn cutoff_date(days: i64) -> String {
    (Utc::now() - Duration::days(days)).format("%Y-%m-%d").to_string()
}

/// Routine database hygiene: drop obvious test records, archive stale leads,
/// delete old drafts, logs and orphaned attachments.
///
/// Every write call is suppressed when `dry_run` is set (the default); the
/// report then says what would have been removed. Per-model failures are
/// collected rather than aborting the sweep.
pub async fn database_cleanup(client: &OdooClient, options: CleanupOptions) -> CleanupReport {
    let dry_run = options.dry_run.unwrap_or(true);
    let days = options.days_threshold.unwrap_or(DEFAULT_DAYS_THRESHOLD);
    let cutoff = cutoff_date(days);
    let mut report = CleanupReport::new(dry_run);

    if options.remove_test_data.unwrap_or(true) {
        let test_domains: &[(&str, Value)] = &[
            ("res.partner", json!([["name", "like", "Test%"]])),
            ("res.partner", json!([["name", "like", "Demo%"]])),
            ("sale.order", json!([["name", "like", "%TEST%"]])),
            ("account.move", json!([["ref", "like", "%TEST%"]])),
        ];
        for (model, domain) in test_domains {
            match sweep_unlink(client, model, domain.clone(), dry_run).await {
                Ok(count) => report.record(model, "unlink", count, "test data"),
                Err(e) => report.fail(model, e),
            }
        }
    }

    if options.archive_stale_records.unwrap_or(true) {
        let domain = json!([["active", "=", true], ["write_date", "<", cutoff]]);
        match sweep_archive(client, "crm.lead", domain, dry_run).await {
            Ok(count) => report.record(
                "crm.lead",
                "archive",
                count,
                format!("no activity since {cutoff}"),
            ),
            Err(e) => report.fail("crm.lead", e),
        }
    }

    if options.cleanup_drafts.unwrap_or(true) {
        for model in ["sale.order", "purchase.order"] {
            let domain = json!([["state", "=", "draft"], ["write_date", "<", cutoff]]);
            match sweep_unlink(client, model, domain, dry_run).await {
                Ok(count) => report.record(model, "unlink", count, "stale draft"),
                Err(e) => report.fail(model, e),
            }
        }
    }

    // Logs and orphaned attachments are always considered.
    let log_domain = json!([["date", "<", cutoff]]);
    match sweep_unlink(client, "mail.message", log_domain, dry_run).await {
        Ok(count) => report.record("mail.message", "unlink", count, "old message"),
        Err(e) => report.fail("mail.message", e),
    }
    let orphan_domain = json!([["res_model", "=", false], ["create_date", "<", cutoff]]);
    match sweep_unlink(client, "ir.attachment", orphan_domain, dry_run).await {
        Ok(count) => report.record("ir.attachment", "unlink", count, "orphaned attachment"),
        Err(e) => report.fail("ir.attachment", e),
    }

    report
}

#[derive(Debug, Clone, Default)]
pub struct DeepCleanupOptions {
    pub dry_run: Option<bool>,
    pub keep_company_defaults: Option<bool>,
    pub keep_user_accounts: Option<bool>,
    pub keep_menus: Option<bool>,
    pub keep_groups: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeepCleanupReport {
    pub success: bool,
    pub timestamp: String,
    pub removed: i64,
    pub dry_run: bool,
    pub details: Vec<SweepDetail>,
    pub retained: Vec<String>,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

/// Empty the transactional models of a database, keeping structural
/// defaults according to the `keep_*` flags. Destructive; `dry_run`
/// defaults to true and suppresses every unlink.
pub async fn deep_cleanup(client: &OdooClient, options: DeepCleanupOptions) -> DeepCleanupReport {
    let dry_run = options.dry_run.unwrap_or(true);
    let keep_defaults = options.keep_company_defaults.unwrap_or(true);
    let keep_users = options.keep_user_accounts.unwrap_or(true);
    let keep_menus = options.keep_menus.unwrap_or(true);
    let keep_groups = options.keep_groups.unwrap_or(true);

    let mut inner = CleanupReport::new(dry_run);
    let mut retained = Vec::new();

    // Transactional documents, children before parents.
    let full_sweep = [
        "sale.order",
        "purchase.order",
        "account.move",
        "stock.picking",
        "stock.move",
        "crm.lead",
        "project.task",
        "project.project",
        "calendar.event",
        "hr.employee",
        "mail.message",
        "ir.attachment",
    ];
    for model in full_sweep {
        match sweep_unlink(client, model, json!([]), dry_run).await {
            Ok(count) => inner.record(model, "unlink", count, "deep cleanup"),
            Err(e) => {
                // Some modules may be uninstalled; that is expected.
                warn!(model, error = %e, "deep cleanup sweep failed");
                inner.warnings.push(format!("{model}: {e}"));
            }
        }
    }

    // Partners: optionally keep companies and the records users point at.
    let partner_domain = if keep_defaults {
        retained.push("company partners".to_string());
        json!([["is_company", "=", false], ["user_ids", "=", false]])
    } else {
        json!([["user_ids", "=", false]])
    };
    match sweep_unlink(client, "res.partner", partner_domain, dry_run).await {
        Ok(count) => inner.record("res.partner", "unlink", count, "deep cleanup"),
        Err(e) => inner.fail("res.partner", e),
    }

    if keep_users {
        retained.push("user accounts".to_string());
    } else {
        let domain = json!([["id", "!=", 1], ["login", "not in", ["admin", "__system__"]]]);
        match sweep_unlink(client, "res.users", domain, dry_run).await {
            Ok(count) => inner.record("res.users", "unlink", count, "deep cleanup"),
            Err(e) => inner.fail("res.users", e),
        }
    }

    if keep_menus {
        retained.push("menus".to_string());
    }
    if keep_groups {
        retained.push("security groups".to_string());
    }

    DeepCleanupReport {
        success: inner.success,
        timestamp: inner.timestamp,
        removed: inner.removed,
        dry_run,
        details: inner.details,
        retained,
        warnings: inner.warnings,
        errors: inner.errors,
    }
}

/// Count matches, and unlink them unless this is a dry run.
async fn sweep_unlink(
    client: &OdooClient,
    model: &str,
    domain: Value,
    dry_run: bool,
) -> crate::odoo::error::OdooResult<i64> {
    let ids = client.search(model, Some(domain), None, None, None, None).await?;
    if ids.is_empty() {
        return Ok(0);
    }
    let count = ids.len() as i64;
    if !dry_run {
        client.unlink(model, ids, None).await?;
    }
    Ok(count)
}

/// Count matches, and archive them (write active=false) unless dry-running.
async fn sweep_archive(
    client: &OdooClient,
    model: &str,
    domain: Value,
    dry_run: bool,
) -> crate::odoo::error::OdooResult<i64> {
    let ids = client.search(model, Some(domain), None, None, None, None).await?;
    if ids.is_empty() {
        return Ok(0);
    }
    let count = ids.len() as i64;
    if !dry_run {
        client.write(model, ids, json!({"active": false}), None).await?;
    }
    Ok(count)
}
