//! MySQL account administration and privilege inference from `SHOW GRANTS`.
//!
//! Tiers are guessed from grant text by substring matching. They drive what
//! the session offers, never what the server allows.

use crate::db::{quote_literal, Backend, Dialect};
use crate::errors::{AppError, AppResult};
use crate::models::{Account, Privilege};
use crate::redaction::redact_sql;
use tracing::{debug, info};

const LIST_ACCOUNTS_SQL: &str = "SELECT Host, User FROM mysql.user WHERE User NOT LIKE 'mysql.%'";

/// Classifies grant lines; the first line that matches a tier wins. With a
/// `scope`, only grants on `*.*` or naming that database count.
pub fn classify_grants<S: AsRef<str>>(grants: &[S], scope: Option<&str>) -> Option<Privilege> {
    for grant in grants {
        let grant = grant.as_ref();
        let in_scope = match scope {
            Some(database) => grant.contains("*.*") || grant.contains(database),
            None => true,
        };
        if !in_scope {
            continue;
        }
        if (grant.contains("ALL") || grant.contains("CREATE USER")) && grant.contains("WITH GRANT OPTION") {
            return Some(Privilege::Admin);
        }
        if grant.contains("SELECT") && grant.contains("INSERT") {
            return Some(Privilege::ReadAndWrite);
        }
        if grant.contains("SELECT") {
            return Some(Privilege::ReadOnly);
        }
    }
    None
}

pub fn account_name(user: &str, host: &str) -> String {
    format!("{}@{}", quote_literal(user), quote_literal(host))
}

/// `GRANT` statements for a tier on `database`.
pub fn grant_statements(user: &str, host: &str, database: &str, privilege: Privilege) -> Vec<String> {
    let account = account_name(user, host);
    let scope = format!("{}.*", Dialect::Mysql.quote_ident(database));
    match privilege {
        Privilege::Admin => vec![
            format!("GRANT ALL ON *.* TO {} WITH GRANT OPTION", account),
            format!("GRANT SELECT ON mysql.user TO {}", account),
        ],
        Privilege::ReadAndWrite => vec![format!("GRANT SELECT, INSERT, ALTER ON {} TO {}", scope, account)],
        Privilege::ReadOnly => vec![format!("GRANT SELECT ON {} TO {}", scope, account)],
    }
}

pub fn current_privilege(backend: &dyn Backend) -> AppResult<Option<Privilege>> {
    let grants = backend.query("SHOW GRANTS", &[])?.first_column_strings();
    Ok(classify_grants(&grants, None))
}

pub fn current_host(backend: &dyn Backend) -> AppResult<Option<String>> {
    let Some(sql) = backend.dialect().current_host_sql() else {
        return Ok(None);
    };
    Ok(backend.query(sql, &[])?.first_column_strings().into_iter().next())
}

fn require_name(value: &str, what: &str) -> AppResult<()> {
    if value.trim().is_empty() {
        return Err(AppError::Validation(format!("{} is required", what)));
    }
    Ok(())
}

fn run_batch(backend: &dyn Backend, statements: Vec<String>) -> AppResult<()> {
    for statement in &statements {
        debug!(sql = %redact_sql(statement), "account statement");
    }
    backend.execute_batch(&statements)
}

/// Local mirror of server accounts. Filled once, then updated optimistically
/// after each administrative batch.
#[derive(Debug, Clone, Default)]
pub struct AccountAdmin {
    database: String,
    host: String,
    accounts: Vec<Account>,
}

impl AccountAdmin {
    /// `host` is the host part of the session user; new accounts are created on it.
    pub fn new(database: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            host: host.into(),
            accounts: Vec::new(),
        }
    }

    pub fn accounts(&self) -> &[Account] {
        &self.accounts
    }

    pub fn reset(&mut self) {
        self.accounts.clear();
    }

    /// Populates from the server only when the cache is empty.
    pub fn list_accounts(&mut self, backend: &dyn Backend) -> AppResult<Vec<Account>> {
        if !self.accounts.is_empty() {
            return Ok(self.accounts.clone());
        }

        let users = backend.query(LIST_ACCOUNTS_SQL, &[])?;
        let host_index = users.column_index("Host").unwrap_or(0);
        let user_index = users.column_index("User").unwrap_or(1);

        let mut accounts = Vec::with_capacity(users.len());
        for row in &users.rows {
            let (Some(host), Some(user)) = (row.get(host_index), row.get(user_index)) else {
                continue;
            };
            let host = host.to_export_string();
            let user = user.to_export_string();
            let grants = backend
                .query(&format!("SHOW GRANTS FOR {}", account_name(&user, &host)), &[])?
                .first_column_strings();
            let privilege = classify_grants(&grants, Some(&self.database)).unwrap_or(Privilege::ReadOnly);
            accounts.push(Account { host, user, privilege });
        }

        info!(accounts = accounts.len(), "accounts loaded");
        self.accounts = accounts;
        Ok(self.accounts.clone())
    }

    pub fn create_account(
        &mut self,
        backend: &dyn Backend,
        user: &str,
        password: &str,
        privilege: Privilege,
    ) -> AppResult<Account> {
        require_name(user, "user name")?;
        require_name(password, "password")?;
        if self.position(&self.host, user).is_some() {
            return Err(AppError::Duplicate(format!("account {} already exists", account_name(user, &self.host))));
        }

        let mut statements = vec![format!(
            "CREATE USER {} IDENTIFIED BY {}",
            account_name(user, &self.host),
            quote_literal(password)
        )];
        statements.extend(grant_statements(user, &self.host, &self.database, privilege));
        statements.push("FLUSH PRIVILEGES".to_string());
        run_batch(backend, statements)?;

        let account = Account {
            host: self.host.clone(),
            user: user.to_string(),
            privilege,
        };
        info!(user, host = %self.host, privilege = privilege.as_str(), "account created");
        self.accounts.push(account.clone());
        Ok(account)
    }

    pub fn assign_privilege(
        &mut self,
        backend: &dyn Backend,
        host: &str,
        user: &str,
        privilege: Privilege,
    ) -> AppResult<Account> {
        require_name(user, "user name")?;
        let mut statements = vec![format!("REVOKE ALL, GRANT OPTION FROM {}", account_name(user, host))];
        statements.extend(grant_statements(user, host, &self.database, privilege));
        statements.push("FLUSH PRIVILEGES".to_string());
        run_batch(backend, statements)?;

        let account = Account {
            host: host.to_string(),
            user: user.to_string(),
            privilege,
        };
        match self.position(host, user) {
            Some(index) => self.accounts[index].privilege = privilege,
            None => self.accounts.push(account.clone()),
        }
        info!(user, host, privilege = privilege.as_str(), "privilege assigned");
        Ok(account)
    }

    pub fn delete_account(&mut self, backend: &dyn Backend, host: &str, user: &str) -> AppResult<()> {
        require_name(user, "user name")?;
        run_batch(
            backend,
            vec![
                format!("DROP USER {}", account_name(user, host)),
                "FLUSH PRIVILEGES".to_string(),
            ],
        )?;
        if let Some(index) = self.position(host, user) {
            self.accounts.remove(index);
        }
        info!(user, host, "account deleted");
        Ok(())
    }

    fn position(&self, host: &str, user: &str) -> Option<usize> {
        self.accounts
            .iter()
            .position(|account| account.host == host && account.user == user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::ScriptedBackend;
    use crate::db::SqlValue;

    fn text(value: &str) -> SqlValue {
        SqlValue::Text(value.to_string())
    }

    fn server() -> ScriptedBackend {
        ScriptedBackend::mysql()
            .respond(
                "SELECT Host, User FROM mysql.user",
                &["Host", "User"],
                vec![vec![text("%"), text("alice")], vec![text("localhost"), text("bob")], vec![text("%"), text("carol")]],
            )
            .respond(
                "SHOW GRANTS FOR 'alice'@'%'",
                &["Grants"],
                vec![vec![text("GRANT ALL PRIVILEGES ON *.* TO `alice`@`%` WITH GRANT OPTION")]],
            )
            .respond(
                "SHOW GRANTS FOR 'bob'@'localhost'",
                &["Grants"],
                vec![
                    vec![text("GRANT USAGE ON *.* TO `bob`@`localhost`")],
                    vec![text("GRANT SELECT, INSERT, ALTER ON `plant`.* TO `bob`@`localhost`")],
                ],
            )
            .respond(
                "SHOW GRANTS FOR 'carol'@'%'",
                &["Grants"],
                vec![vec![text("GRANT SELECT, INSERT ON `other`.* TO `carol`@`%`")]],
            )
    }

    #[test]
    fn classifies_grant_lines() {
        let admin = ["GRANT CREATE USER ON *.* TO `x`@`%` WITH GRANT OPTION"];
        assert_eq!(classify_grants(&admin, None), Some(Privilege::Admin));
        let write = ["GRANT USAGE ON *.* TO `x`@`%`", "GRANT SELECT, INSERT ON `plant`.* TO `x`@`%`"];
        assert_eq!(classify_grants(&write, Some("plant")), Some(Privilege::ReadAndWrite));
        assert_eq!(classify_grants(&write, Some("other")), None);
        let read = ["GRANT SELECT ON `plant`.* TO `x`@`%`"];
        assert_eq!(classify_grants(&read, None), Some(Privilege::ReadOnly));
        assert_eq!(classify_grants(&["GRANT USAGE ON *.* TO `x`@`%`"], None), None);
    }

    #[test]
    fn list_accounts_populates_once() {
        let backend = server();
        let mut admin = AccountAdmin::new("plant", "%");
        let accounts = admin.list_accounts(&backend).expect("accounts");
        let tiers: Vec<_> = accounts.iter().map(|a| (a.user.as_str(), a.privilege)).collect();
        assert_eq!(
            tiers,
            vec![
                ("alice", Privilege::Admin),
                ("bob", Privilege::ReadAndWrite),
                ("carol", Privilege::ReadOnly),
            ]
        );

        let issued = backend.statements().len();
        admin.list_accounts(&backend).expect("cached");
        assert_eq!(backend.statements().len(), issued);
    }

    #[test]
    fn create_account_issues_grants_then_mirrors() {
        let backend = ScriptedBackend::mysql();
        let mut admin = AccountAdmin::new("plant", "%");
        let account = admin
            .create_account(&backend, "dave", "pa'ss", Privilege::ReadAndWrite)
            .expect("create");
        assert_eq!(account.host, "%");
        assert_eq!(
            backend.statements(),
            vec![
                "CREATE USER 'dave'@'%' IDENTIFIED BY 'pa''ss'".to_string(),
                "GRANT SELECT, INSERT, ALTER ON `plant`.* TO 'dave'@'%'".to_string(),
                "FLUSH PRIVILEGES".to_string(),
            ]
        );
        assert_eq!(admin.accounts(), &[account]);

        let duplicate = admin.create_account(&backend, "dave", "x", Privilege::ReadOnly);
        assert!(matches!(duplicate, Err(AppError::Duplicate(_))));
    }

    #[test]
    fn assign_privilege_revokes_first() {
        let backend = server();
        let mut admin = AccountAdmin::new("plant", "%");
        admin.list_accounts(&backend).expect("accounts");
        admin
            .assign_privilege(&backend, "localhost", "bob", Privilege::Admin)
            .expect("assign");
        let statements = backend.statements();
        let tail = &statements[statements.len() - 4..];
        assert_eq!(tail[0], "REVOKE ALL, GRANT OPTION FROM 'bob'@'localhost'");
        assert_eq!(tail[1], "GRANT ALL ON *.* TO 'bob'@'localhost' WITH GRANT OPTION");
        assert_eq!(tail[2], "GRANT SELECT ON mysql.user TO 'bob'@'localhost'");
        assert_eq!(tail[3], "FLUSH PRIVILEGES");
        let bob = admin.accounts().iter().find(|a| a.user == "bob").expect("bob");
        assert_eq!(bob.privilege, Privilege::Admin);
    }

    #[test]
    fn failed_batch_leaves_cache_untouched() {
        let backend = server().fail_on("DROP USER");
        let mut admin = AccountAdmin::new("plant", "%");
        admin.list_accounts(&backend).expect("accounts");
        let outcome = admin.delete_account(&backend, "%", "alice");
        assert!(matches!(outcome, Err(AppError::Query(_))));
        assert_eq!(admin.accounts().len(), 3);

        let backend = server();
        let mut admin = AccountAdmin::new("plant", "%");
        admin.list_accounts(&backend).expect("accounts");
        admin.delete_account(&backend, "%", "alice").expect("delete");
        assert_eq!(admin.accounts().len(), 2);
    }

    #[test]
    fn current_user_lookups() {
        let backend = ScriptedBackend::mysql()
            .respond("SHOW GRANTS", &["Grants"], vec![vec![text("GRANT SELECT ON `plant`.* TO `x`@`%`")]])
            .respond("SELECT SUBSTRING_INDEX", &["host"], vec![vec![text("10.0.0.%")]]);
        assert_eq!(current_privilege(&backend).expect("privilege"), Some(Privilege::ReadOnly));
        assert_eq!(current_host(&backend).expect("host"), Some("10.0.0.%".to_string()));
    }
}
