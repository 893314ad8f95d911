//! Password policy validation.
//!
//! The rule set mirrors the registration form: a minimum length plus
//! toggleable character-class requirements. Each unmet rule yields its own
//! message so callers can report every failure at once.

const DEFAULT_MIN_LENGTH: usize = 8;

#[derive(Clone, Debug)]
pub struct PasswordPolicy {
    min_length: usize,
    require_lowercase: bool,
    require_uppercase: bool,
    require_number: bool,
    require_symbol: bool,
}

impl PasswordPolicy {
    #[must_use]
    pub fn new(min_length: usize) -> Self {
        Self {
            min_length,
            require_lowercase: true,
            require_uppercase: true,
            require_number: true,
            require_symbol: true,
        }
    }

    #[must_use]
    pub fn with_require_lowercase(mut self, require: bool) -> Self {
        self.require_lowercase = require;
        self
    }

    #[must_use]
    pub fn with_require_uppercase(mut self, require: bool) -> Self {
        self.require_uppercase = require;
        self
    }

    #[must_use]
    pub fn with_require_number(mut self, require: bool) -> Self {
        self.require_number = require;
        self
    }

    #[must_use]
    pub fn with_require_symbol(mut self, require: bool) -> Self {
        self.require_symbol = require;
        self
    }

    /// Check a candidate password and return the list of unmet rules.
    ///
    /// An empty list means the password passes the policy.
    #[must_use]
    pub fn violations(&self, password: &str) -> Vec<String> {
        let mut failures = Vec::new();

        if password.chars().count() < self.min_length {
            failures.push(format!(
                "Password must be at least {} characters long",
                self.min_length
            ));
        }
        if self.require_lowercase && !password.chars().any(|c| c.is_ascii_lowercase()) {
            failures.push("Password must include at least one lowercase letter".to_string());
        }
        if self.require_uppercase && !password.chars().any(|c| c.is_ascii_uppercase()) {
            failures.push("Password must include at least one uppercase letter".to_string());
        }
        if self.require_number && !password.chars().any(|c| c.is_ascii_digit()) {
            failures.push("Password must include at least one number".to_string());
        }
        if self.require_symbol && !password.chars().any(|c| !c.is_ascii_alphanumeric()) {
            failures.push("Password must include at least one symbol".to_string());
        }

        failures
    }
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_LENGTH)
    }
}
