//! Input validation for API requests.
//!
//! Each function checks one field and returns a message suitable for a
//! field-level validation error. Use `ValidationErrorBuilder` from the `error`
//! module to collect several of them into one `ApiError`.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    /// Pragmatic email check: one @, no spaces, a dot in the domain
    static ref EMAIL_REGEX: Regex = Regex::new(
        r"^[^\s@]+@[^\s@]+\.[^\s@]+$"
    ).unwrap();

    /// French phone numbers: 0X XX XX XX XX or +33 X XX XX XX XX, with optional separators
    static ref PHONE_REGEX: Regex = Regex::new(
        r"^(\+33\s?[1-9]|0[1-9])([\s.-]?\d{2}){4}$"
    ).unwrap();

    /// Five-digit French postal code
    static ref POSTAL_CODE_REGEX: Regex = Regex::new(
        r"^\d{5}$"
    ).unwrap();

    /// ISO calendar date
    static ref DATE_REGEX: Regex = Regex::new(
        r"^\d{4}-\d{2}-\d{2}$"
    ).unwrap();
}

pub const MIN_PASSWORD_LENGTH: usize = 8;

/// Validate an email address
pub fn validate_email(email: &str) -> Result<(), String> {
    if email.trim().is_empty() {
        return Err("Email is required".to_string());
    }

    if email.len() > 254 {
        return Err("Email is too long (max 254 characters)".to_string());
    }

    if !EMAIL_REGEX.is_match(email) {
        return Err("Invalid email format".to_string());
    }

    Ok(())
}

/// Validate password strength
pub fn validate_password(password: &str) -> Result<(), String> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LENGTH
        ));
    }

    if password.len() > 128 {
        return Err("Password is too long (max 128 characters)".to_string());
    }

    if !password.chars().any(|c| c.is_alphabetic()) {
        return Err("Password must contain at least one letter".to_string());
    }

    if !password.chars().any(|c| c.is_ascii_digit()) {
        return Err("Password must contain at least one digit".to_string());
    }

    Ok(())
}

/// Validate that the confirmation matches the password
pub fn validate_password_confirmation(password: &str, confirmation: &str) -> Result<(), String> {
    if password != confirmation {
        return Err("Passwords do not match".to_string());
    }
    Ok(())
}

/// Validate a required free-text field with a maximum length
pub fn validate_required_text(value: &str, label: &str, max_len: usize) -> Result<(), String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(format!("{} is required", label));
    }

    if trimmed.chars().count() > max_len {
        return Err(format!("{} is too long (max {} characters)", label, max_len));
    }

    Ok(())
}

/// Validate an optional free-text field with a maximum length
pub fn validate_optional_text(value: &Option<String>, label: &str, max_len: usize) -> Result<(), String> {
    if let Some(v) = value {
        if v.chars().count() > max_len {
            return Err(format!("{} is too long (max {} characters)", label, max_len));
        }
    }
    Ok(())
}

/// Validate a phone number (optional field)
pub fn validate_phone(phone: &Option<String>) -> Result<(), String> {
    if let Some(p) = phone {
        if p.is_empty() {
            return Ok(()); // Empty string treated as no phone
        }

        if !PHONE_REGEX.is_match(p.trim()) {
            return Err("Invalid phone number format".to_string());
        }
    }

    Ok(())
}

/// Validate a postal code (optional field)
pub fn validate_postal_code(postal_code: &Option<String>) -> Result<(), String> {
    if let Some(code) = postal_code {
        if code.is_empty() {
            return Ok(());
        }

        if !POSTAL_CODE_REGEX.is_match(code.trim()) {
            return Err("Postal code must be 5 digits".to_string());
        }
    }

    Ok(())
}

/// Validate a calendar date in YYYY-MM-DD form (optional field)
pub fn validate_date(date: &Option<String>) -> Result<(), String> {
    if let Some(d) = date {
        if d.is_empty() {
            return Ok(());
        }

        if !DATE_REGEX.is_match(d) || chrono::NaiveDate::parse_from_str(d, "%Y-%m-%d").is_err() {
            return Err("Invalid date, expected YYYY-MM-DD".to_string());
        }
    }

    Ok(())
}

/// Validate a non-negative amount (optional field)
pub fn validate_amount(amount: Option<f64>, label: &str) -> Result<(), String> {
    if let Some(a) = amount {
        if !a.is_finite() || a < 0.0 {
            return Err(format!("{} must be a positive amount", label));
        }
    }
    Ok(())
}

/// Validate a budget range where both ends are optional
pub fn validate_budget(min: Option<f64>, max: Option<f64>) -> Result<(), String> {
    validate_amount(min, "Minimum budget")?;
    validate_amount(max, "Maximum budget")?;

    if let (Some(min), Some(max)) = (min, max) {
        if min > max {
            return Err("Minimum budget cannot exceed maximum budget".to_string());
        }
    }

    Ok(())
}

/// Validate a percentage in 0..=100
pub fn validate_percentage(value: f64, label: &str) -> Result<(), String> {
    if !value.is_finite() || !(0.0..=100.0).contains(&value) {
        return Err(format!("{} must be between 0 and 100", label));
    }
    Ok(())
}

/// Validate a list of specialties
pub fn validate_specialties(specialties: &[String]) -> Result<(), String> {
    if specialties.len() > 20 {
        return Err("Too many specialties (max 20)".to_string());
    }

    if specialties.iter().any(|s| s.trim().is_empty() || s.len() > 60) {
        return Err("Each specialty must be between 1 and 60 characters".to_string());
    }

    Ok(())
}

/// Trimmed, lowercased and deduplicated specialties, in input order.
/// Directory lookups compare against this stored form.
pub fn normalize_specialties(specialties: &[String]) -> Vec<String> {
    let mut normalized: Vec<String> = Vec::with_capacity(specialties.len());
    for specialty in specialties {
        let value = specialty.trim().to_lowercase();
        if !value.is_empty() && !normalized.contains(&value) {
            normalized.push(value);
        }
    }
    normalized
}

/// Normalize an email for storage and lookups
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
