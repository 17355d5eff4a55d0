use sea_orm::{DatabaseConnection, TransactionTrait};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::Tool;
use crate::repositories::ToolRepository;

/// Longest subdomain label handed out
pub const MAX_SUBDOMAIN_LEN: usize = 30;

/// Used when a display name has no ASCII alphanumerics at all
const FALLBACK_SLUG: &str = "tool";

/// Attempts at persisting a subdomain when another process wins the race
const MAX_ASSIGN_ATTEMPTS: usize = 5;

/// Derive the base slug for a display name.
///
/// Lowercases, collapses every run of characters outside `[a-z0-9]` into a
/// single hyphen, trims hyphens from both ends and truncates to
/// [`MAX_SUBDOMAIN_LEN`].
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_hyphen = false;

    for c in name.chars() {
        let c = c.to_ascii_lowercase();
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            if pending_hyphen && !slug.is_empty() {
                slug.push('-');
            }
            pending_hyphen = false;
            slug.push(c);
        } else {
            pending_hyphen = true;
        }
    }

    let slug = truncate_label(&slug, MAX_SUBDOMAIN_LEN);
    if slug.is_empty() {
        FALLBACK_SLUG.to_string()
    } else {
        slug
    }
}

/// The n-th probe for a base slug: `base`, `base-1`, `base-2`, ...
///
/// The base is shortened as needed so the suffix always fits.
pub fn candidate(base: &str, attempt: u32) -> String {
    if attempt == 0 {
        return truncate_label(base, MAX_SUBDOMAIN_LEN);
    }

    let suffix = format!("-{}", attempt);
    let room = MAX_SUBDOMAIN_LEN.saturating_sub(suffix.len());
    let head = truncate_label(base, room);
    if head.is_empty() {
        format!("{}{}", FALLBACK_SLUG, suffix)
    } else {
        format!("{}{}", head, suffix)
    }
}

/// Check a subdomain label against `^[a-z0-9-]+$`, length and hyphen rules
pub fn validate_subdomain(subdomain: &str) -> AppResult<()> {
    if subdomain.is_empty() || subdomain.len() > MAX_SUBDOMAIN_LEN {
        return Err(AppError::Validation(format!(
            "Subdomain must be 1-{} characters",
            MAX_SUBDOMAIN_LEN
        )));
    }
    if !subdomain
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(AppError::Validation(format!(
            "Subdomain '{}' may only contain a-z, 0-9 and '-'",
            subdomain
        )));
    }
    if subdomain.starts_with('-') || subdomain.ends_with('-') {
        return Err(AppError::Validation(format!(
            "Subdomain '{}' may not start or end with '-'",
            subdomain
        )));
    }
    Ok(())
}

fn truncate_label(label: &str, max_len: usize) -> String {
    // Labels are ASCII by construction, so byte slicing is safe
    let cut = &label[..label.len().min(max_len)];
    cut.trim_matches('-').to_string()
}

/// Hands out unique subdomains for tools.
///
/// Allocation and persistence happen under one in-process lock; the unique
/// index on `tools.subdomain` catches races with other processes.
#[derive(Default)]
pub struct SubdomainAllocator {
    guard: Mutex<()>,
}

impl SubdomainAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// First free candidate for `name`, ignoring subdomains held by `tool_id` itself
    pub async fn allocate<C>(&self, conn: &C, name: &str, tool_id: Uuid) -> AppResult<String>
    where
        C: sea_orm::ConnectionTrait,
    {
        let base = slugify(name);
        let mut attempt = 0u32;

        loop {
            let probe = candidate(&base, attempt);
            if !ToolRepository::subdomain_taken(conn, &probe, tool_id).await? {
                return Ok(probe);
            }
            attempt += 1;
        }
    }

    /// Allocate a subdomain for `tool` and commit it to the tool row
    pub async fn assign(&self, db: &DatabaseConnection, tool: &Tool) -> AppResult<String> {
        let _guard = self.guard.lock().await;

        for attempt in 1..=MAX_ASSIGN_ATTEMPTS {
            let txn = db.begin().await?;

            // Another request may have assigned one while we waited
            let current = ToolRepository::find_for_update(&txn, tool.id).await?;
            if let Some(existing) = current.subdomain {
                txn.commit().await?;
                return Ok(existing);
            }

            let subdomain = self.allocate(&txn, &tool.name, tool.id).await?;
            match ToolRepository::assign_subdomain(&txn, tool.id, &subdomain).await {
                Ok(_) => {
                    txn.commit().await?;
                    tracing::info!(tool_id = %tool.id, subdomain = %subdomain, "Subdomain allocated");
                    return Ok(subdomain);
                }
                Err(AppError::Conflict(_)) => {
                    tracing::warn!(
                        tool_id = %tool.id,
                        subdomain = %subdomain,
                        attempt,
                        "Subdomain claimed concurrently, retrying"
                    );
                    txn.rollback().await?;
                }
                Err(e) => return Err(e),
            }
        }

        Err(AppError::Conflict(format!(
            "Subdomain for tool '{}'",
            tool.name
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_valid(s: &str) -> bool {
        validate_subdomain(s).is_ok()
    }

    #[test]
    fn test_slugify_basic() {
        assert_eq!(slugify("My Cool Tool"), "my-cool-tool");
        assert_eq!(slugify("  --Hello,   World!!  "), "hello-world");
        assert_eq!(slugify("Version 2.0 (beta)"), "version-2-0-beta");
    }

    #[test]
    fn test_slugify_non_ascii_and_empty() {
        assert_eq!(slugify("Café Ünïcode"), "caf-n-code");
        assert_eq!(slugify("!!!"), "tool");
        assert_eq!(slugify(""), "tool");
    }

    #[test]
    fn test_slugify_truncates_without_trailing_hyphen() {
        // 29 chars of 'a' then a separator lands the cut right after a hyphen
        let name = format!("{} bcdef", "a".repeat(29));
        let slug = slugify(&name);
        assert_eq!(slug, "a".repeat(29));
        assert!(is_valid(&slug));

        let long = slugify(&"word ".repeat(20));
        assert!(long.len() <= MAX_SUBDOMAIN_LEN);
        assert!(is_valid(&long));
    }

    #[test]
    fn test_candidates_stay_within_limit() {
        let base = slugify(&"x".repeat(40));
        assert_eq!(candidate(&base, 0).len(), MAX_SUBDOMAIN_LEN);

        for attempt in [1, 9, 10, 123, 99_999] {
            let probe = candidate(&base, attempt);
            assert!(probe.len() <= MAX_SUBDOMAIN_LEN, "{}", probe);
            assert!(probe.ends_with(&format!("-{}", attempt)));
            assert!(is_valid(&probe), "{}", probe);
        }

        assert_eq!(candidate("my-cool-tool", 1), "my-cool-tool-1");
        assert_eq!(candidate("my-cool-tool", 2), "my-cool-tool-2");
    }

    #[test]
    fn test_slugify_always_valid() {
        let names = [
            "My Cool Tool",
            "---",
            "a",
            "ALL CAPS NAME WITH MANY MANY MANY WORDS",
            "emoji 🚀 launcher",
            "tabs\tand\nnewlines",
            "under_score-and-dash",
            "1234567890123456789012345678901234567890",
        ];
        for name in names {
            let slug = slugify(name);
            assert!(is_valid(&slug), "{:?} -> {:?}", name, slug);
        }
    }

    #[test]
    fn test_validate_subdomain() {
        assert!(is_valid("my-tool-1"));
        assert!(!is_valid(""));
        assert!(!is_valid("-leading"));
        assert!(!is_valid("trailing-"));
        assert!(!is_valid("Upper"));
        assert!(!is_valid("dots.not.allowed"));
        assert!(!is_valid(&"a".repeat(31)));
    }
}
