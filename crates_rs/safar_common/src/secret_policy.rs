pub fn is_production_like(env_name: &str) -> bool {
    let env = env_name.trim().to_ascii_lowercase();
    matches!(env.as_str(), "prod" | "production" | "staging")
}

/// Validate a configured secret for the given environment. Dev and test skip
/// all checks; prod/staging require presence (when `required_in_prod`), a
/// minimum length and a value that does not look like a shipped default.
pub fn enforce_value_policy_for_env(
    env_name: &str,
    key: &str,
    value: Option<&str>,
    required_in_prod: bool,
) -> Result<(), String> {
    if !is_production_like(env_name) {
        return Ok(());
    }

    let secret = value.map(str::trim).unwrap_or("");
    if secret.is_empty() {
        if required_in_prod {
            return Err(format!("{key} must be set in prod/staging"));
        }
        return Ok(());
    }

    if secret.len() < 16 {
        return Err(format!(
            "{key} must be at least 16 characters in prod/staging"
        ));
    }
    if looks_like_placeholder(secret) {
        return Err(format!(
            "{key} looks like a placeholder/default value; use a strong random secret"
        ));
    }
    Ok(())
}

fn looks_like_placeholder(secret: &str) -> bool {
    let s = secret.trim().to_ascii_lowercase();
    let banned_exact = [
        "change-me", "changeme", "secret", "password", "default", "dummy", "example", "test",
    ];
    if banned_exact.iter().any(|v| *v == s) {
        return true;
    }
    let banned_fragments = [
        "change-me",
        "change_me",
        "replace-me",
        "replace_me",
        "your-secret",
        "your_secret",
        "dev-secret",
        "dev_secret",
    ];
    banned_fragments.iter().any(|v| s.contains(v))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_prod_skips_validation() {
        assert!(enforce_value_policy_for_env("dev", "CHECKOUT_KEY_SECRET", Some("x"), true).is_ok());
        assert!(enforce_value_policy_for_env("test", "CHECKOUT_KEY_SECRET", None, true).is_ok());
    }

    #[test]
    fn prod_requires_secret_when_flagged() {
        assert!(enforce_value_policy_for_env("prod", "CHECKOUT_KEY_SECRET", None, true).is_err());
        assert!(enforce_value_policy_for_env("prod", "CHECKOUT_KEY_SECRET", None, false).is_ok());
    }

    #[test]
    fn prod_rejects_short_or_placeholder_secret() {
        assert!(
            enforce_value_policy_for_env("staging", "CHECKOUT_KEY_SECRET", Some("short"), true)
                .is_err()
        );
        assert!(enforce_value_policy_for_env(
            "prod",
            "CHECKOUT_KEY_SECRET",
            Some("change-me-checkout-secret"),
            true
        )
        .is_err());
    }

    #[test]
    fn prod_accepts_strong_secret() {
        assert!(enforce_value_policy_for_env(
            "prod",
            "CHECKOUT_KEY_SECRET",
            Some("k2Vq8rW-p41xNzT7hB3m"),
            true
        )
        .is_ok());
    }
}
