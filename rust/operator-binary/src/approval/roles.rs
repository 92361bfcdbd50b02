//! Role store access. Roles are a fixed bootstrap set; assignment of users
//! to roles is administered externally.

use sqlx::PgPool;

use super::models::ApproverRole;

/// Every role that must exist before any approval can be authorized.
pub const BOOTSTRAP_ROLES: [&str; 4] = ["ADMIN", "OPS", "SRE", "K8S"];

/// Idempotently seed the fixed role set.
pub async fn ensure_bootstrap_roles(pool: &PgPool) -> Result<(), sqlx::Error> {
    for role in BOOTSTRAP_ROLES {
        sqlx::query("INSERT INTO roles (name) VALUES ($1) ON CONFLICT (name) DO NOTHING")
            .bind(role)
            .execute(pool)
            .await?;
    }
    tracing::debug!(roles = ?BOOTSTRAP_ROLES, "role set seeded");
    Ok(())
}

/// Whether the acting identity holds the given approver role.
pub async fn user_has_role(
    pool: &PgPool,
    username: &str,
    role: ApproverRole,
) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar(
        "SELECT EXISTS ( \
             SELECT 1 \
             FROM users u \
             JOIN user_roles ur ON ur.user_id = u.id \
             JOIN roles r ON r.id = ur.role_id \
             WHERE u.username = $1 AND r.name = $2 \
         )",
    )
    .bind(username)
    .bind(role.to_string())
    .fetch_one(pool)
    .await
}
