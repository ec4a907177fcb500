//! Built-in CTF university data set
//!
//! The vulnerable properties (plaintext and unsalted-MD5 passwords, flags
//! reachable from low-privilege accounts, reusable coupons, writable grades)
//! are inert data. Nothing here executes them.

use async_trait::async_trait;

use super::{quote_ident, quote_literal, SeedError, SeedPlan, SeedProvider, SeedValue, TableSeed};

/// Account players connect with
#[derive(Debug, Clone)]
pub struct PlayerAccount {
    pub username: String,
    pub password: String,
    /// MySQL host pattern, `%` for any
    pub host: String,
}

impl Default for PlayerAccount {
    fn default() -> Self {
        Self {
            username: "ctf_player".to_string(),
            password: "player_password_456".to_string(),
            host: "%".to_string(),
        }
    }
}

/// Declarative seed for the `users`/`secrets`/`messages`/`coupons`/
/// `grades`/`fees` challenge schema
#[derive(Debug, Clone)]
pub struct CtfUniversityCatalog {
    database: String,
    player: PlayerAccount,
}

impl CtfUniversityCatalog {
    pub fn new(database: impl Into<String>, player: PlayerAccount) -> Self {
        Self {
            database: database.into(),
            player,
        }
    }

    /// Build the plan synchronously (used by tests and `check-config`)
    pub fn build(&self) -> Result<SeedPlan, SeedError> {
        let mut plan = SeedPlan::new(&self.database);
        plan.tables = tables();
        plan.grants = self.grants();
        plan.validate()?;
        Ok(plan)
    }

    fn grants(&self) -> Vec<String> {
        let account = format!(
            "{}@{}",
            quote_literal(&self.player.username),
            quote_literal(&self.player.host)
        );
        let password = quote_literal(&self.player.password);
        vec![
            format!("CREATE USER IF NOT EXISTS {account} IDENTIFIED BY {password}"),
            format!("ALTER USER {account} IDENTIFIED BY {password}"),
            format!(
                "GRANT SELECT, INSERT, UPDATE, DELETE ON {}.* TO {account}",
                quote_ident(&self.database)
            ),
            "FLUSH PRIVILEGES".to_string(),
        ]
    }
}

#[async_trait]
impl SeedProvider for CtfUniversityCatalog {
    fn name(&self) -> &str {
        "catalog"
    }

    async fn plan(&self) -> Result<SeedPlan, SeedError> {
        self.build()
    }
}

fn text(s: &str) -> SeedValue {
    SeedValue::Text(s.to_string())
}

fn int(n: i64) -> SeedValue {
    SeedValue::Int(n)
}

fn tables() -> Vec<TableSeed> {
    let users = TableSeed::new(
        "users",
        r#"
CREATE TABLE `users` (
    `id` INT NOT NULL AUTO_INCREMENT,
    `username` VARCHAR(50) NOT NULL,
    `password` VARCHAR(255) NOT NULL,
    `email` VARCHAR(100) NOT NULL,
    `role` ENUM('student', 'staff', 'admin') NOT NULL DEFAULT 'student',
    `created_at` TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    PRIMARY KEY (`id`),
    UNIQUE KEY `uq_users_username` (`username`)
) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4"#,
    )
    .columns(&["id", "username", "password", "email", "role"])
    .row(vec![int(1), text("admin"), text("admin123"), text("admin@ctop.edu"), text("admin")])
    .row(vec![int(2), text("jdoe"), text("password1"), text("jdoe@ctop.edu"), text("student")])
    .row(vec![
        int(3),
        text("asmith"),
        text("5f4dcc3b5aa765d61d8327deb882cf99"),
        text("asmith@ctop.edu"),
        text("student"),
    ])
    .row(vec![int(4), text("prof_miller"), text("Spring2024!"), text("miller@ctop.edu"), text("staff")])
    .row(vec![int(5), text("bursar"), text("fees4ever"), text("bursar@ctop.edu"), text("staff")])
    .row(vec![int(6), text("guest"), text("guest"), text("guest@ctop.edu"), text("student")]);

    let secrets = TableSeed::new(
        "secrets",
        r#"
CREATE TABLE `secrets` (
    `id` INT NOT NULL AUTO_INCREMENT,
    `owner_id` INT NOT NULL,
    `label` VARCHAR(100) NOT NULL,
    `flag` VARCHAR(255) NOT NULL,
    PRIMARY KEY (`id`),
    CONSTRAINT `fk_secrets_owner` FOREIGN KEY (`owner_id`) REFERENCES `users` (`id`)
) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4"#,
    )
    .depends_on(&["users"])
    .columns(&["id", "owner_id", "label", "flag"])
    .row(vec![int(1), int(1), text("root flag"), text("CTF{sql_1nj3ct10n_m4st3r}")])
    .row(vec![int(2), int(4), text("exam answers"), text("CTF{pr1v1l3g3_3sc4l4t10n}")])
    .row(vec![int(3), int(5), text("bursar vault"), text("CTF{1d0r_f33_w41v3r}")]);

    let messages = TableSeed::new(
        "messages",
        r#"
CREATE TABLE `messages` (
    `id` INT NOT NULL AUTO_INCREMENT,
    `sender_id` INT NOT NULL,
    `recipient_id` INT NOT NULL,
    `subject` VARCHAR(150) NOT NULL,
    `body` TEXT NOT NULL,
    `sent_at` TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    PRIMARY KEY (`id`),
    CONSTRAINT `fk_messages_sender` FOREIGN KEY (`sender_id`) REFERENCES `users` (`id`),
    CONSTRAINT `fk_messages_recipient` FOREIGN KEY (`recipient_id`) REFERENCES `users` (`id`)
) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4"#,
    )
    .depends_on(&["users"])
    .columns(&["id", "sender_id", "recipient_id", "subject", "body"])
    .row(vec![
        int(1),
        int(4),
        int(2),
        text("Midterm"),
        text("Your midterm grade has been posted."),
    ])
    .row(vec![
        int(2),
        int(1),
        int(5),
        text("Vault access"),
        text("Temporary vault password is the same as your login. Rotate it soon."),
    ])
    .row(vec![
        int(3),
        int(5),
        int(3),
        text("Outstanding balance"),
        text("Please settle your library fee before registration closes."),
    ]);

    let coupons = TableSeed::new(
        "coupons",
        r#"
CREATE TABLE `coupons` (
    `id` INT NOT NULL AUTO_INCREMENT,
    `code` VARCHAR(32) NOT NULL,
    `discount_percent` INT NOT NULL,
    `max_uses` INT NOT NULL,
    `times_used` INT NOT NULL DEFAULT 0,
    `active` BOOLEAN NOT NULL DEFAULT TRUE,
    PRIMARY KEY (`id`),
    UNIQUE KEY `uq_coupons_code` (`code`)
) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4"#,
    )
    .columns(&["id", "code", "discount_percent", "max_uses", "times_used", "active"])
    .row(vec![int(1), text("WELCOME10"), int(10), int(1), int(0), SeedValue::Bool(true)])
    .row(vec![int(2), text("STAFF50"), int(50), int(5), int(0), SeedValue::Bool(true)])
    .row(vec![int(3), text("EXPIRED99"), int(99), int(1), int(1), SeedValue::Bool(false)]);

    let grades = TableSeed::new(
        "grades",
        r#"
CREATE TABLE `grades` (
    `id` INT NOT NULL AUTO_INCREMENT,
    `student_id` INT NOT NULL,
    `course` VARCHAR(50) NOT NULL,
    `grade` VARCHAR(2) NOT NULL,
    `updated_by` INT NULL,
    PRIMARY KEY (`id`),
    CONSTRAINT `fk_grades_student` FOREIGN KEY (`student_id`) REFERENCES `users` (`id`),
    CONSTRAINT `fk_grades_updated_by` FOREIGN KEY (`updated_by`) REFERENCES `users` (`id`)
) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4"#,
    )
    .depends_on(&["users"])
    .columns(&["id", "student_id", "course", "grade", "updated_by"])
    .row(vec![int(1), int(2), text("CS101"), text("C"), SeedValue::from(Some(4i64))])
    .row(vec![int(2), int(2), text("SEC201"), text("D"), SeedValue::from(Some(4i64))])
    .row(vec![int(3), int(3), text("CS101"), text("B"), SeedValue::from(None::<i64>)])
    .row(vec![int(4), int(6), text("SEC201"), text("F"), SeedValue::from(None::<i64>)]);

    let fees = TableSeed::new(
        "fees",
        r#"
CREATE TABLE `fees` (
    `id` INT NOT NULL AUTO_INCREMENT,
    `student_id` INT NOT NULL,
    `description` VARCHAR(100) NOT NULL,
    `amount` DECIMAL(10, 2) NOT NULL,
    `paid` BOOLEAN NOT NULL DEFAULT FALSE,
    PRIMARY KEY (`id`),
    CONSTRAINT `fk_fees_student` FOREIGN KEY (`student_id`) REFERENCES `users` (`id`)
) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4"#,
    )
    .depends_on(&["users"])
    .columns(&["id", "student_id", "description", "amount", "paid"])
    .row(vec![int(1), int(2), text("Tuition"), SeedValue::Float(4500.00), SeedValue::Bool(false)])
    .row(vec![int(2), int(3), text("Library fee"), SeedValue::Float(35.50), SeedValue::Bool(false)])
    .row(vec![int(3), int(6), text("Lab fee"), SeedValue::Float(120.00), SeedValue::Bool(true)]);

    vec![users, secrets, messages, coupons, grades, fees]
}
