//! Scripted database and generation-backend doubles for unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};

use crate::db::{ConnectionConfig, Connector, DbSession, Execution, ResultSet, ScalarValue};
use crate::error::{BackendError, DbError};
use crate::llm::{CompletionRequest, GenerationBackend, TokenStream};

pub fn sample_config() -> ConnectionConfig {
    ConnectionConfig {
        host: "db.local".into(),
        port: 3306,
        username: "app".into(),
        password: "secret".into(),
        database: Some("shop".into()),
    }
}

#[derive(Clone)]
enum Reply {
    Rows(ResultSet),
    Affected(u64),
    Fail(String),
}

#[derive(Clone)]
struct Rule {
    prefix: String,
    reply: Reply,
}

#[derive(Default)]
pub struct SessionLog {
    executed: Mutex<Vec<String>>,
    commits: AtomicUsize,
    rollbacks: AtomicUsize,
    closed: AtomicBool,
    dead: AtomicBool,
}

/// A session answering statements by case-insensitive prefix; rules added
/// later take precedence.
#[derive(Clone)]
pub struct ScriptedSession {
    rules: Vec<Rule>,
    log: Arc<SessionLog>,
}

impl ScriptedSession {
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            log: Arc::new(SessionLog::default()),
        }
    }

    fn with_rule(mut self, prefix: &str, reply: Reply) -> Self {
        self.rules.push(Rule {
            prefix: prefix.trim().to_ascii_uppercase(),
            reply,
        });
        self
    }

    pub fn on_rows(self, prefix: &str, columns: &[&str], rows: Vec<Vec<ScalarValue>>) -> Self {
        let columns = columns.iter().map(|c| c.to_string()).collect();
        self.with_rule(prefix, Reply::Rows(ResultSet::new(columns, rows)))
    }

    pub fn on_affected(self, prefix: &str, rows_affected: u64) -> Self {
        self.with_rule(prefix, Reply::Affected(rows_affected))
    }

    pub fn on_error(self, prefix: &str, message: &str) -> Self {
        self.with_rule(prefix, Reply::Fail(message.to_string()))
    }

    pub fn executed(&self) -> Vec<String> {
        self.log.executed.lock().unwrap().clone()
    }

    pub fn commits(&self) -> usize {
        self.log.commits.load(Ordering::SeqCst)
    }

    pub fn rollbacks(&self) -> usize {
        self.log.rollbacks.load(Ordering::SeqCst)
    }

    fn fresh(&self) -> Self {
        Self {
            rules: self.rules.clone(),
            log: Arc::new(SessionLog::default()),
        }
    }
}

#[async_trait]
impl DbSession for ScriptedSession {
    async fn execute(&mut self, sql: &str) -> Result<Execution, DbError> {
        if self.log.closed.load(Ordering::SeqCst) {
            return Err(DbError::Closed);
        }
        self.log.executed.lock().unwrap().push(sql.to_string());
        let normalized = sql.trim().to_ascii_uppercase();
        let rule = self.rules.iter().rev().find(|r| normalized.starts_with(&r.prefix));
        match rule.map(|r| r.reply.clone()) {
            Some(Reply::Rows(rs)) => Ok(Execution::Rows(rs)),
            Some(Reply::Affected(n)) => Ok(Execution::Affected { rows_affected: n }),
            Some(Reply::Fail(msg)) => Err(DbError::Statement(msg)),
            None => Err(DbError::Statement(format!("no scripted response for: {}", sql))),
        }
    }

    async fn commit(&mut self) -> Result<(), DbError> {
        self.log.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), DbError> {
        self.log.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn ping(&mut self) -> bool {
        !self.log.dead.load(Ordering::SeqCst) && !self.log.closed.load(Ordering::SeqCst)
    }

    async fn close(self: Box<Self>) -> Result<(), DbError> {
        self.log.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Hands out copies of a template session and keeps their logs.
pub struct ScriptedConnector {
    template: ScriptedSession,
    sessions: Mutex<Vec<Arc<SessionLog>>>,
    connects: AtomicUsize,
    refuse: AtomicBool,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::with_script(ScriptedSession::new())
    }

    pub fn with_script(template: ScriptedSession) -> Self {
        Self {
            template,
            sessions: Mutex::new(Vec::new()),
            connects: AtomicUsize::new(0),
            refuse: AtomicBool::new(false),
        }
    }

    pub fn refuse_connections(&self) {
        self.refuse.store(true, Ordering::SeqCst);
    }

    /// Make every session opened so far fail its liveness probe.
    pub fn kill_all(&self) {
        for log in self.sessions.lock().unwrap().iter() {
            log.dead.store(true, Ordering::SeqCst);
        }
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn closed_count(&self) -> usize {
        self.sessions
            .lock()
            .unwrap()
            .iter()
            .filter(|l| l.closed.load(Ordering::SeqCst))
            .count()
    }

    pub fn executed(&self) -> Vec<String> {
        self.sessions
            .lock()
            .unwrap()
            .iter()
            .flat_map(|l| l.executed.lock().unwrap().clone())
            .collect()
    }

    pub fn commits(&self) -> usize {
        self.sessions.lock().unwrap().iter().map(|l| l.commits.load(Ordering::SeqCst)).sum()
    }

    pub fn rollbacks(&self) -> usize {
        self.sessions.lock().unwrap().iter().map(|l| l.rollbacks.load(Ordering::SeqCst)).sum()
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn DbSession>, DbError> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(DbError::Connect {
                host: config.host.clone(),
                port: config.port,
                message: "connection refused".into(),
            });
        }
        self.connects.fetch_add(1, Ordering::SeqCst);
        let session = self.template.fresh();
        self.sessions.lock().unwrap().push(session.log.clone());
        Ok(Box::new(session))
    }
}

fn text(s: &str) -> ScalarValue {
    ScalarValue::Text(s.to_string())
}

const DESCRIBE_COLUMNS: &[&str] = &["Field", "Type", "Null", "Key", "Default", "Extra"];

fn describe_row(field: &str, ty: &str, null: &str, key: &str, extra: &str) -> Vec<ScalarValue> {
    vec![text(field), text(ty), text(null), text(key), ScalarValue::Null, text(extra)]
}

/// A two-table shop: `customers` and `orders` with a foreign key between them.
/// `customers` has no row count or samples scripted.
pub fn shop_session() -> ScriptedSession {
    ScriptedSession::new()
        .on_rows("SELECT DATABASE()", &["DATABASE()"], vec![vec![text("shop")]])
        .on_rows(
            "SHOW TABLES",
            &["Tables_in_shop"],
            vec![vec![text("customers")], vec![text("orders")]],
        )
        .on_rows(
            "SHOW CREATE TABLE `customers`",
            &["Table", "Create Table"],
            vec![vec![
                text("customers"),
                text(
                    "CREATE TABLE `customers` (\n  `id` int NOT NULL AUTO_INCREMENT,\n  `name` varchar(100) DEFAULT NULL,\n  PRIMARY KEY (`id`)\n) ENGINE=InnoDB",
                ),
            ]],
        )
        .on_rows(
            "SHOW CREATE TABLE `orders`",
            &["Table", "Create Table"],
            vec![vec![
                text("orders"),
                text(
                    "CREATE TABLE `orders` (\n  `id` int NOT NULL AUTO_INCREMENT,\n  `customer_id` int NOT NULL,\n  `total` decimal(10,2) NOT NULL,\n  `created_at` datetime NOT NULL,\n  PRIMARY KEY (`id`),\n  KEY `idx_created` (`created_at`),\n  CONSTRAINT `fk_orders_customer` FOREIGN KEY (`customer_id`) REFERENCES `customers` (`id`)\n) ENGINE=InnoDB",
                ),
            ]],
        )
        .on_rows(
            "DESCRIBE `customers`",
            DESCRIBE_COLUMNS,
            vec![
                describe_row("id", "int", "NO", "PRI", "auto_increment"),
                describe_row("name", "varchar(100)", "YES", "", ""),
            ],
        )
        .on_rows(
            "DESCRIBE `orders`",
            DESCRIBE_COLUMNS,
            vec![
                describe_row("id", "int", "NO", "PRI", "auto_increment"),
                describe_row("customer_id", "int", "NO", "MUL", ""),
                describe_row("total", "decimal(10,2)", "NO", "", ""),
                describe_row("created_at", "datetime", "NO", "", ""),
            ],
        )
        .on_rows(
            "SELECT COUNT(*) AS count FROM `orders`",
            &["count"],
            vec![vec![ScalarValue::Int(3)]],
        )
        .on_rows(
            "SELECT * FROM `orders` LIMIT",
            &["id", "customer_id", "total", "created_at"],
            (1..=3)
                .map(|i| {
                    vec![
                        ScalarValue::Int(i),
                        ScalarValue::Int(1),
                        ScalarValue::Float(9.5 * i as f64),
                        text("2024-05-01T09:00:00"),
                    ]
                })
                .collect(),
        )
}

/// Backend replaying queued completions and streams; records every request.
#[derive(Default)]
pub struct ScriptedBackend {
    completions: Mutex<VecDeque<Result<String, BackendError>>>,
    streams: Mutex<VecDeque<Result<Vec<Result<String, BackendError>>, BackendError>>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, text: &str) -> Self {
        self.completions.lock().unwrap().push_back(Ok(text.to_string()));
        self
    }

    pub fn fail(self, err: BackendError) -> Self {
        self.completions.lock().unwrap().push_back(Err(err));
        self
    }

    pub fn stream_reply(self, chunks: &[&str]) -> Self {
        let items = chunks.iter().map(|c| Ok(c.to_string())).collect();
        self.streams.lock().unwrap().push_back(Ok(items));
        self
    }

    pub fn stream_items(self, items: Vec<Result<String, BackendError>>) -> Self {
        self.streams.lock().unwrap().push_back(Ok(items));
        self
    }

    pub fn stream_fail(self, err: BackendError) -> Self {
        self.streams.lock().unwrap().push_back(Err(err));
        self
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl GenerationBackend for ScriptedBackend {
    fn model(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<String, BackendError> {
        self.requests.lock().unwrap().push(request);
        self.completions
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(BackendError::Transport("no scripted completion".into())))
    }

    async fn complete_stream(&self, request: CompletionRequest) -> Result<TokenStream, BackendError> {
        self.requests.lock().unwrap().push(request);
        let next = self
            .streams
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(BackendError::Transport("no scripted stream".into())));
        next.map(|items| stream::iter(items).boxed())
    }
}
