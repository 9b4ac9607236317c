use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

struct SecretPattern {
    regex: Regex,
    replace: fn(&Captures<'_>) -> String,
}

static SECRET_PATTERNS: Lazy<Vec<SecretPattern>> = Lazy::new(|| {
    vec![
        SecretPattern {
            regex: Regex::new(r"(?i)\b(identified\s+by)\s+'(?:[^'\\]|\\.|'')*'").expect("valid regex"),
            replace: |caps| format!("{} '[REDACTED]'", &caps[1]),
        },
        SecretPattern {
            regex: Regex::new(r#"(?i)\b(password|passwd|pwd)\s*[:=]\s*("[^"]*"|'[^']*'|[^\s;,&]+)"#)
                .expect("valid regex"),
            replace: |caps| format!("{}=[REDACTED]", caps[1].to_ascii_lowercase()),
        },
        SecretPattern {
            regex: Regex::new(r"(?i)\b(mysql://[^:/@\s]+):([^@\s]+)@").expect("valid regex"),
            replace: |caps| format!("{}:[REDACTED]@", &caps[1]),
        },
    ]
});

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RedactionResult {
    pub content: String,
    pub redaction_count: usize,
}

/// Strips passwords from SQL text and connection strings before they are logged.
#[derive(Debug, Default, Clone)]
pub struct Redactor;

impl Redactor {
    pub fn new() -> Self {
        Self
    }

    pub fn redact(&self, input: &str) -> RedactionResult {
        if input.is_empty() {
            return RedactionResult {
                content: String::new(),
                redaction_count: 0,
            };
        }

        let mut result = input.to_string();
        let mut redaction_count = 0usize;
        for pattern in SECRET_PATTERNS.iter() {
            let matches = pattern.regex.find_iter(&result).count();
            if matches == 0 {
                continue;
            }
            redaction_count += matches;
            result = pattern.regex.replace_all(&result, pattern.replace).to_string();
        }

        RedactionResult {
            content: result,
            redaction_count,
        }
    }
}

pub fn redact_sql(input: &str) -> String {
    Redactor::new().redact(input).content
}

#[cfg(test)]
mod tests {
    use super::{redact_sql, Redactor};

    #[test]
    fn redacts_create_user_password() {
        let result = Redactor::new().redact("CREATE USER 'bob'@'%' IDENTIFIED BY 's3cr''et'");
        assert_eq!(result.content, "CREATE USER 'bob'@'%' IDENTIFIED BY '[REDACTED]'");
        assert_eq!(result.redaction_count, 1);
    }

    #[test]
    fn redacts_connection_strings() {
        assert_eq!(redact_sql("server=db;user=bob;password=hunter2;"), "server=db;user=bob;password=[REDACTED];");
        assert_eq!(redact_sql("mysql://bob:hunter2@db:3306/plant"), "mysql://bob:[REDACTED]@db:3306/plant");
    }

    #[test]
    fn leaves_plain_sql_alone() {
        let sql = "SELECT `ts`, `temp` FROM `sensor` ORDER BY `ts` ASC";
        let result = Redactor::new().redact(sql);
        assert_eq!(result.content, sql);
        assert_eq!(result.redaction_count, 0);
    }
}
